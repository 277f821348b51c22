use igdpunch::log::{self, log_upto, setlogmask};
use igdpunch::options::{self, DEF_CONF_FILE, Options};
use igdpunch::upnpcommands::{Command, dispatch, format_reply};
use igdpunch::warp::{FdSet, make_timeval, select};
use igdpunch::{GatewaySession, SocketTransport};
use igdpunch::{debug, error, info, notice, warn};
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;
use std::{mem, ptr};

static QUITTING: AtomicBool = AtomicBool::new(false);

const STDIN_FD: i32 = libc::STDIN_FILENO;

extern "C" fn sigterm(_sig: i32) {
	QUITTING.store(true, Relaxed);
}

fn setup_signal_handle() -> i32 {
	let mut sa: libc::sigaction = unsafe { mem::zeroed() };
	sa.sa_sigaction = sigterm as usize;

	if unsafe { libc::sigaction(libc::SIGTERM, &sa, ptr::null_mut()) } < 0 {
		error!("Failed to set SIGTERM handler. EXITING");
		return 1;
	}
	if unsafe { libc::sigaction(libc::SIGINT, &sa, ptr::null_mut()) } < 0 {
		error!("Failed to set SIGINT handler. EXITING");
		return 1;
	}
	sa.sa_sigaction = libc::SIG_IGN;
	if unsafe { libc::sigaction(libc::SIGPIPE, &sa, ptr::null_mut()) } < 0 {
		return 1;
	}
	0
}

fn print_usage(config_file: &str) {
	eprintln!(
		"Usage:
    \tigdpunch --version
    \tigdpunch --help
    \tigdpunch [-f config_file] [-d] [-v]
    \nCommands, one per line on stdin:
    \tscan
    \tadd [local_ip] local_port remote_port
    \tremove remote_port
    \textip
    \tstatus
    \treset
    \tquit
    \nNotes:
    \tDefault config file is '{config_file}', used only if present.
    \t-d mirrors log messages to stderr.
    \t-v enables LOG_INFO messages, -vv LOG_DEBUG as well.
    \t-h / --help prints this help and quits.
    "
	);
}

fn init() -> Option<Options> {
	let mut debug_flag = false;
	let mut verbosity_level = 0;
	let mut optionsfile: Option<PathBuf> = None;

	let args = std::env::args().collect::<Vec<String>>();
	let mut i = 1;
	while i < args.len() {
		match args[i].as_str() {
			"-h" | "--help" => {
				print_usage(DEF_CONF_FILE);
				return None;
			}
			"--version" | "version" => {
				println!("igdpunch version {}", env!("CARGO_PKG_VERSION"));
				return None;
			}
			"-d" => debug_flag = true,
			"-f" => {
				let Some(f) = args.get(i + 1) else {
					eprintln!("Option -f takes one argument.");
					print_usage(DEF_CONF_FILE);
					return None;
				};
				optionsfile = Some(PathBuf::from(f));
				i += 1;
			}
			a if a.starts_with("-v") && a[1..].bytes().all(|c| c == b'v') => verbosity_level = a.len() - 1,
			a => {
				eprintln!("Unknown option: {}", a);
				print_usage(DEF_CONF_FILE);
				return None;
			}
		}
		i += 1;
	}

	let mut openlog_option = libc::LOG_PID | libc::LOG_CONS;
	if debug_flag {
		openlog_option |= libc::LOG_PERROR;
	}
	log::openlog("igdpunch", openlog_option, log::LOG_USER);
	setlogmask(log_upto(match verbosity_level {
		0 => log::LOG_NOTICE,
		1 => log::LOG_INFO,
		_ => log::LOG_DEBUG,
	}));

	let option = match &optionsfile {
		Some(f) => match options::readoptionsfile(f) {
			Ok(o) => o,
			Err(e) => {
				error!("Error reading configuration file {:?}: {}", f, e);
				return None;
			}
		},
		None => match options::readoptionsfile(&PathBuf::from(DEF_CONF_FILE)) {
			Ok(o) => o,
			Err(e) if e.kind() == ErrorKind::NotFound => Options::default(),
			Err(e) => {
				error!("Error reading configuration file {}: {}", DEF_CONF_FILE, e);
				return None;
			}
		},
	};

	if setup_signal_handle() != 0 {
		return None;
	}
	debug!("load option {:?}", option);
	Some(option)
}

/// Appends what is available on stdin to `buf`, 0 at end of input.
fn read_stdin(buf: &mut Vec<u8>) -> io::Result<usize> {
	let mut tmp = [0u8; 512];
	let n = unsafe { libc::read(STDIN_FD, tmp.as_mut_ptr() as *mut libc::c_void, tmp.len()) };
	if n < 0 {
		return Err(io::Error::last_os_error());
	}
	buf.extend_from_slice(&tmp[..n as usize]);
	Ok(n as usize)
}

fn print_status(stdout: &mut impl Write, s: &GatewaySession) {
	let opt = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
	let (local_ip, local_port, remote_port) = s.mapping();
	let _ = writeln!(
		stdout,
		"state {:?}{}\nlocation {}\nhost {} port {} path {}\ncontrol {}\ngateway {}\nexternal {}\nmapping {}:{} -> {}",
		s.state(),
		if s.has_connection() { " (request in flight)" } else { "" },
		opt(s.location().map(str::to_string)),
		opt(s.host().map(str::to_string)),
		opt(s.control_port().map(|p| p.to_string())),
		opt(s.description_path().map(str::to_string)),
		opt(s.control_url().map(str::to_string)),
		opt(s.remote_ip().map(|a| a.to_string())),
		opt(s.external_address().map(|a| a.to_string())),
		local_ip,
		local_port,
		remote_port,
	);
}

/// Runs one command line, `false` on quit.
fn run_command(session: &mut GatewaySession, transport: &mut SocketTransport, line: &str) -> bool {
	let mut stdout = io::stdout();
	match line.trim() {
		"" => return true,
		"status" => {
			print_status(&mut stdout, session);
			return true;
		}
		_ => {}
	}
	let cmd = match Command::from_str(line) {
		Ok(cmd) => cmd,
		Err(e) => {
			warn!("{}", e);
			let _ = writeln!(stdout, "error: {}", e);
			return true;
		}
	};
	if cmd == Command::Quit {
		return false;
	}
	let value = dispatch(session, transport, cmd);
	let _ = writeln!(stdout, "{}", format_reply(&cmd, value));
	let _ = stdout.flush();
	true
}

fn main() {
	let Some(v) = init() else {
		return;
	};
	info!("version {} starting, search target {}", env!("CARGO_PKG_VERSION"), v.search_target);

	let mut transport = SocketTransport::new(v.lan_addr(), v.packet_log);
	let mut session = GatewaySession::new(v);
	let mut stdout = io::stdout();
	let mut stdin_open = true;
	let mut inbuf = Vec::new();

	let mut readset = FdSet::default();
	let mut writeset = FdSet::default();

	'main: while !QUITTING.load(Relaxed) {
		while let Some(ev) = transport.next_event() {
			session.process_event(&mut transport, ev);
		}
		if let Some(e) = session.take_last_error() {
			let _ = writeln!(stdout, "error: {}", e);
		}
		if !stdin_open && transport.is_idle() {
			break;
		}

		readset.clean_up();
		writeset.clean_up();
		let mut max_fd = -1;
		if stdin_open {
			readset.watch(STDIN_FD, &mut max_fd);
		}
		transport.select_fds(&mut readset, &mut writeset, &mut max_fd);

		// short timeout so signals are noticed without a self-pipe
		let mut timeout = make_timeval(Duration::from_secs(1));
		match select(max_fd + 1, Some(&mut readset), Some(&mut writeset), None, Some(&mut timeout)) {
			Ok(0) => continue,
			Ok(_) => {}
			Err(e) if e.kind() == ErrorKind::Interrupted => continue,
			Err(e) => {
				error!("select(all): {}", e);
				break;
			}
		}
		transport.process_fds(&readset, &writeset);

		if stdin_open && readset.is_set(STDIN_FD) {
			match read_stdin(&mut inbuf) {
				Ok(0) => {
					debug!("end of input");
					stdin_open = false;
				}
				Ok(_) => {}
				Err(e) if e.kind() == ErrorKind::Interrupted => {}
				Err(e) => {
					error!("read(stdin): {}", e);
					stdin_open = false;
				}
			}
			while let Some(pos) = inbuf.iter().position(|&c| c == b'\n') {
				let line: Vec<u8> = inbuf.drain(..=pos).collect();
				if !run_command(&mut session, &mut transport, &String::from_utf8_lossy(&line)) {
					break 'main;
				}
			}
		}
	}

	session.reset(&mut transport);
	notice!("igdpunch exiting");
	log::closelog();
}
