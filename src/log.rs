pub use libc::LOG_ALERT;
pub use libc::LOG_CRIT;
pub use libc::LOG_DEBUG;
pub use libc::LOG_EMERG;
pub use libc::LOG_ERR;
pub use libc::LOG_INFO;
pub use libc::LOG_NOTICE;
pub use libc::LOG_WARNING;
use libc::c_int;
use once_cell::sync::OnceCell;
use std::ffi::CString;
use std::fmt;

pub use libc::LOG_DAEMON;
pub use libc::LOG_USER;

/// syslog keeps the ident pointer, so it has to outlive every later call.
static LOG_IDENT: OnceCell<CString> = OnceCell::new();

#[doc(hidden)]
pub fn emit(level: c_int, args: fmt::Arguments) {
	let mut line = fmt::format(args);
	line.retain(|c| c != '\0');
	line.push('\0');
	unsafe { libc::syslog(level, c"%s".as_ptr(), line.as_ptr() as *const libc::c_char) }
}

#[macro_export]
macro_rules! log {
    // log!(LOG_INFO, "a {} event", "log");
    ($lvl:expr, $($arg:tt)+) => ({
	    $crate::log::emit($lvl, format_args!($($arg)+))
    });
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => {
	    #[cfg(debug_assertions)]
	    println!($($arg)+);
    };
}

#[macro_export]
macro_rules! error {
    // error!("a {} event", "log")
    ($($arg:tt)+) => ($crate::log!($crate::log::LOG_ERR, $($arg)+))
}
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => ($crate::log!($crate::log::LOG_WARNING, $($arg)+))
}
#[macro_export]
macro_rules! notice {
    ($($arg:tt)+) => ($crate::log!($crate::log::LOG_NOTICE, $($arg)+))
}
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => ($crate::log!($crate::log::LOG_INFO, $($arg)+))
}
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => ($crate::log!($crate::log::LOG_DEBUG, $($arg)+))
}

/// Mask that lets through every priority up to and including `level`.
pub fn log_upto(level: c_int) -> c_int {
	(1 << (level + 1)) - 1
}

pub fn setlogmask(mask: c_int) -> c_int {
	unsafe { libc::setlogmask(mask) }
}

/// Opens the syslog connection. Only the first ident passed is kept.
pub fn openlog(ident: &str, logopt: c_int, facility: c_int) {
	let ident = LOG_IDENT.get_or_init(|| {
		CString::new(ident.replace('\0', "")).unwrap_or_default()
	});
	unsafe { libc::openlog(ident.as_ptr(), logopt, facility) }
}

pub fn closelog() {
	unsafe { libc::closelog() }
}
