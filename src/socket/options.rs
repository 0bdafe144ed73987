use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::SocketError;
use crate::fd_registry::FdRegistry;
use crate::hook;
use crate::scheduler::Interest;
use super::Socket;

/// Reads a socket option into `value`.
///
/// `value` must be the type the kernel writes for this option.
pub(crate) fn getsockopt<T: Copy>(fd: RawFd, level: libc::c_int, option: libc::c_int, value: &mut T) -> std::io::Result<()> {
	let mut len = std::mem::size_of::<T>() as libc::socklen_t;
	syscall!(getsockopt(fd, level, option, (value as *mut T).cast(), &mut len)).map(|_| ())
}

/// Reads and clears the socket error status (`SO_ERROR`).
///
/// Returns `None` if no error is pending.
pub(crate) fn take_error(fd: RawFd) -> std::io::Result<Option<std::io::Error>> {
	let mut error: libc::c_int = 0;
	getsockopt(fd, libc::SOL_SOCKET, libc::SO_ERROR, &mut error)?;
	if error == 0 {
		Ok(None)
	} else {
		Ok(Some(std::io::Error::from_raw_os_error(error)))
	}
}

fn millis_to_timeval(ms: u64) -> libc::timeval {
	libc::timeval {
		tv_sec: (ms / 1000) as libc::time_t,
		tv_usec: ((ms % 1000) * 1000) as libc::suseconds_t,
	}
}

impl Socket {
	/// Reads option `option` at `level` into `value`, `false` on failure.
	pub fn get_option<T: Copy>(&self, level: libc::c_int, option: libc::c_int, value: &mut T) -> bool {
		self.try_get_option(level, option, value).is_ok()
	}

	pub fn try_get_option<T: Copy>(&self, level: libc::c_int, option: libc::c_int, value: &mut T) -> Result<(), SocketError> {
		let fd = self.raw_fd().ok_or(SocketError::NoDescriptor)?;
		getsockopt(fd, level, option, value).map_err(|err| {
			let errno = err.raw_os_error().unwrap_or(libc::EIO);
			log::debug!(fd = fd, level = level, option = option, errno = errno; "getOption failed: {err}");
			SocketError::GetOption { errno, level, option }
		})
	}

	/// Sets option `option` at `level` to `value`, `false` on failure.
	pub fn set_option<T: Copy>(&self, level: libc::c_int, option: libc::c_int, value: &T) -> bool {
		self.try_set_option(level, option, value).is_ok()
	}

	pub fn try_set_option<T: Copy>(&self, level: libc::c_int, option: libc::c_int, value: &T) -> Result<(), SocketError> {
		let fd = self.raw_fd().ok_or(SocketError::NoDescriptor)?;
		hook::setsockopt(fd, level, option, value).map_err(|err| {
			let errno = err.raw_os_error().unwrap_or(libc::EIO);
			log::debug!(fd = fd, level = level, option = option, errno = errno; "setOption failed: {err}");
			SocketError::SetOption { errno, level, option }
		})
	}

	/// Pending socket error (`SO_ERROR`), or the error of the query itself.
	pub fn get_error(&self) -> i32 {
		let mut error: libc::c_int = 0;
		match self.try_get_option(libc::SOL_SOCKET, libc::SO_ERROR, &mut error) {
			Ok(()) => error,
			Err(err) => err.errno().unwrap_or(0),
		}
	}

	/// Send timeout in milliseconds as recorded in the descriptor registry.
	pub fn get_send_timeout(&self) -> Option<u64> {
		self.registry_timeout(Interest::Write)
	}

	/// Sets the send timeout (`SO_SNDTIMEO`), 0 disables it.
	pub fn set_send_timeout(&self, ms: u64) -> bool {
		self.set_option(libc::SOL_SOCKET, libc::SO_SNDTIMEO, &millis_to_timeval(ms))
	}

	/// Receive timeout in milliseconds as recorded in the descriptor registry.
	pub fn get_recv_timeout(&self) -> Option<u64> {
		self.registry_timeout(Interest::Read)
	}

	/// Sets the receive timeout (`SO_RCVTIMEO`), 0 disables it.
	pub fn set_recv_timeout(&self, ms: u64) -> bool {
		self.set_option(libc::SOL_SOCKET, libc::SO_RCVTIMEO, &millis_to_timeval(ms))
	}

	fn registry_timeout(&self, interest: Interest) -> Option<u64> {
		let ctx = FdRegistry::global().get(self.raw_fd()?)?;
		ctx.timeout(interest).map(|timeout: Duration| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
	}

	/// When enabled, operations fail with `EAGAIN` instead of suspending.
	pub fn set_nonblocking(&self, nonblocking: bool) -> bool {
		let Some(fd) = self.raw_fd() else {
			return false;
		};
		match hook::set_nonblocking(fd, nonblocking) {
			Ok(()) => true,
			Err(err) => {
				log::debug!(fd = fd; "set_nonblocking({nonblocking}) failed: {err}");
				false
			}
		}
	}
}
