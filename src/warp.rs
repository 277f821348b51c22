use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

pub struct FdSet(libc::fd_set);

impl Default for FdSet {
	fn default() -> Self {
		unsafe {
			let mut raw_fd_set = MaybeUninit::<libc::fd_set>::uninit();
			libc::FD_ZERO(raw_fd_set.as_mut_ptr());
			FdSet(raw_fd_set.assume_init())
		}
	}
}

impl FdSet {
	pub fn clear(&mut self, fd: RawFd) {
		unsafe { libc::FD_CLR(fd, &mut self.0) }
	}
	pub fn set(&mut self, fd: RawFd) {
		unsafe { libc::FD_SET(fd, &mut self.0) }
	}
	pub fn is_set(&self, fd: RawFd) -> bool {
		unsafe { libc::FD_ISSET(fd, &self.0) }
	}
	pub fn clean_up(&mut self) {
		unsafe { libc::FD_ZERO(&mut self.0) };
	}
	/// Sets `fd` and raises `max_fd` to cover it.
	pub fn watch(&mut self, fd: RawFd, max_fd: &mut RawFd) {
		self.set(fd);
		if fd > *max_fd {
			*max_fd = fd;
		}
	}
}

fn to_fdset_ptr(opt: Option<&mut FdSet>) -> *mut libc::fd_set {
	match opt {
		None => ptr::null_mut(),
		Some(&mut FdSet(ref mut raw_fd_set)) => raw_fd_set,
	}
}

fn to_mut_ptr<T>(opt: Option<&mut T>) -> *mut T {
	match opt {
		None => ptr::null_mut::<T>(),
		Some(p) => p,
	}
}

pub fn select(
	nfds: i32,
	readfds: Option<&mut FdSet>,
	writefds: Option<&mut FdSet>,
	errorfds: Option<&mut FdSet>,
	timeval: Option<&mut libc::timeval>,
) -> io::Result<usize> {
	match unsafe {
		libc::select(
			nfds as libc::c_int,
			to_fdset_ptr(readfds),
			to_fdset_ptr(writefds),
			to_fdset_ptr(errorfds),
			to_mut_ptr(timeval),
		)
	} {
		-1 => Err(io::Error::last_os_error()),
		res => Ok(res as usize),
	}
}

pub fn make_timeval(duration: Duration) -> libc::timeval {
	libc::timeval { tv_sec: duration.as_secs() as _, tv_usec: duration.subsec_micros() as _ }
}
