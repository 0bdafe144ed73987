/// Helper macro to execute a system call that returns an `io::Result`.
macro_rules! syscall {
	($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
		#[allow(unused_unsafe)]
		let res = unsafe { libc::$fn($($arg, )*) };
		if res == -1 {
			Err(std::io::Error::last_os_error())
		} else {
			Ok(res)
		}
	}};
}

pub mod addr;
pub mod fd_registry;
pub mod scheduler;
pub mod socket;
mod error;
mod hook;

pub use self::error::{IoError, SocketError, errno};
pub use self::addr::{Address, Family, FromSockAddr, ToSockAddr, SocketAddrV4, SocketAddrV6, UnixAddr};
pub use self::fd_registry::{FdCtx, FdRegistry};
pub use self::scheduler::{Interest, PollScheduler, Scheduler, Wakeup, default_scheduler};
pub use self::socket::{DEFAULT_BACKLOG, SockType, Socket, SocketBuilder, SocketConfig};
