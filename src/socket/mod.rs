mod builder;
mod cancel;
mod lifecycle;
pub(crate) mod options;
mod resolve;
mod transfer;

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use crate::addr::{Address, Family};
use crate::scheduler::Scheduler;

pub use self::builder::{SocketBuilder, SocketConfig};
pub use self::lifecycle::DEFAULT_BACKLOG;

/// Socket type, fixed at construction.
///
/// - `Stream`: reliable, ordered byte stream (TCP or Unix stream)
/// - `Datagram`: unreliable, unordered packets (UDP or Unix datagram)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockType {
	Stream,
	Datagram,
}

impl SockType {
	/// Returns the libc constant for this socket type.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			SockType::Stream => libc::SOCK_STREAM,
			SockType::Datagram => libc::SOCK_DGRAM,
		}
	}
}

impl fmt::Display for SockType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.raw())
	}
}

/// A network endpoint whose blocking operations suspend on a [`Scheduler`].
///
/// The descriptor is allocated lazily for stream sockets (on `bind` or
/// `connect`) and eagerly for datagram sockets. Every operation reports
/// failure by value: `false`, a negative count or `None`. The `try_*`
/// variants return the classified error instead.
///
/// Dropping the socket closes it.
pub struct Socket {
	fd: Option<OwnedFd>,
	family: Family,
	sock_type: SockType,
	protocol: libc::c_int,
	connected: bool,
	local_addr: Option<Address>,
	remote_addr: Option<Address>,
	config: SocketConfig,
	scheduler: Arc<dyn Scheduler>,
}

impl Socket {
	pub(crate) fn new(
		family: Family,
		sock_type: SockType,
		protocol: libc::c_int,
		config: SocketConfig,
		scheduler: Arc<dyn Scheduler>,
	) -> Socket {
		Socket {
			fd: None,
			family,
			sock_type,
			protocol,
			connected: false,
			local_addr: None,
			remote_addr: None,
			config,
			scheduler,
		}
	}

	/// New, unopened socket with the same family, type, protocol, config and scheduler.
	pub(crate) fn sibling(&self) -> Socket {
		Socket::new(self.family, self.sock_type, self.protocol, self.config, self.scheduler.clone())
	}

	pub fn family(&self) -> Family {
		self.family
	}

	pub fn sock_type(&self) -> SockType {
		self.sock_type
	}

	pub fn protocol(&self) -> libc::c_int {
		self.protocol
	}

	/// Returns the raw descriptor, `None` if unset.
	#[inline]
	pub fn raw_fd(&self) -> Option<RawFd> {
		self.fd.as_ref().map(|fd| fd.as_raw_fd())
	}

	/// True while the socket owns a descriptor.
	pub fn is_valid(&self) -> bool {
		self.fd.is_some()
	}

	pub fn is_connected(&self) -> bool {
		self.connected
	}

	/// Cached local address, without querying the OS.
	pub fn local_address(&self) -> Option<&Address> {
		self.local_addr.as_ref()
	}

	/// Cached remote address, without querying the OS.
	pub fn remote_address(&self) -> Option<&Address> {
		self.remote_addr.as_ref()
	}

	pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
		&self.scheduler
	}

	/// Writes the one-line description used by `Display`.
	pub fn dump<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
		write!(
			w,
			"[Socket sock={} is_connected={} family={} type={} protocol={}",
			self.raw_fd().unwrap_or(-1),
			u8::from(self.connected),
			self.family,
			self.sock_type,
			self.protocol,
		)?;
		if let Some(addr) = &self.local_addr {
			write!(w, " local_address={}", addr)?;
		}
		if let Some(addr) = &self.remote_addr {
			write!(w, " remote_address={}", addr)?;
		}
		w.write_str("]")
	}
}

impl fmt::Display for Socket {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.dump(f)
	}
}

impl fmt::Debug for Socket {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.dump(f)
	}
}

impl Drop for Socket {
	fn drop(&mut self) {
		if self.fd.is_some() {
			self.close();
		}
	}
}
