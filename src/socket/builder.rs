use std::sync::Arc;
use std::time::Duration;

use crate::addr::{Address, Family};
use crate::scheduler::{Scheduler, default_scheduler};
use super::{SockType, Socket};

/// Options applied to every descriptor a socket opens or accepts.
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
	/// `SO_REUSEADDR`.
	pub reuse_addr: bool,
	/// `TCP_NODELAY`, stream sockets only.
	pub tcp_nodelay: bool,
	/// Bound for `connect` calls that don't pass their own timeout.
	pub connect_timeout: Option<Duration>,
	/// `SO_RCVBUF`.
	pub recv_buffer: Option<usize>,
	/// `SO_SNDBUF`.
	pub send_buffer: Option<usize>,
}

impl Default for SocketConfig {
	fn default() -> Self {
		Self {
			reuse_addr: true,
			tcp_nodelay: true,  // Low latency by default
			connect_timeout: None,
			recv_buffer: None,
			send_buffer: None,
		}
	}
}

impl SocketConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn reuse_addr(mut self, enable: bool) -> Self {
		self.reuse_addr = enable;
		self
	}

	pub fn tcp_nodelay(mut self, enable: bool) -> Self {
		self.tcp_nodelay = enable;
		self
	}

	pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.connect_timeout = timeout;
		self
	}

	pub fn recv_buffer(mut self, size: usize) -> Self {
		self.recv_buffer = Some(size);
		self
	}

	pub fn send_buffer(mut self, size: usize) -> Self {
		self.send_buffer = Some(size);
		self
	}
}

/// Builder for [`Socket`].
///
/// ```ignore
/// let sock = SocketBuilder::new(Family::Ipv4, SockType::Stream)
///     .config(SocketConfig::new().connect_timeout(Some(Duration::from_secs(5))))
///     .build();
/// ```
pub struct SocketBuilder {
	family: Family,
	sock_type: SockType,
	protocol: libc::c_int,
	config: SocketConfig,
	scheduler: Option<Arc<dyn Scheduler>>,
}

impl SocketBuilder {
	pub fn new(family: Family, sock_type: SockType) -> Self {
		Self {
			family,
			sock_type,
			protocol: 0,
			config: SocketConfig::default(),
			scheduler: None,
		}
	}

	pub fn protocol(mut self, protocol: libc::c_int) -> Self {
		self.protocol = protocol;
		self
	}

	pub fn config(mut self, config: SocketConfig) -> Self {
		self.config = config;
		self
	}

	/// Scheduler that suspended operations wait on, the process default otherwise.
	pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
		self.scheduler = Some(scheduler);
		self
	}

	/// Builds the socket.
	///
	/// Datagram sockets get their descriptor right away and count as
	/// connected, they need no handshake to transmit. Stream sockets defer
	/// the descriptor to `bind` or `connect`.
	pub fn build(self) -> Socket {
		let scheduler = self.scheduler.unwrap_or_else(default_scheduler);
		let mut sock = Socket::new(self.family, self.sock_type, self.protocol, self.config, scheduler);
		if self.sock_type == SockType::Datagram && sock.new_sock().is_ok() {
			sock.connected = true;
		}
		sock
	}
}

/// Factories.
impl Socket {
	/// Stream socket in the family of `addr`.
	pub fn create_tcp(addr: &Address) -> Socket {
		SocketBuilder::new(addr.family(), SockType::Stream).build()
	}

	/// Datagram socket in the family of `addr`.
	pub fn create_udp(addr: &Address) -> Socket {
		SocketBuilder::new(addr.family(), SockType::Datagram).build()
	}

	pub fn create_tcp_v4() -> Socket {
		SocketBuilder::new(Family::Ipv4, SockType::Stream).build()
	}

	pub fn create_udp_v4() -> Socket {
		SocketBuilder::new(Family::Ipv4, SockType::Datagram).build()
	}

	pub fn create_tcp_v6() -> Socket {
		SocketBuilder::new(Family::Ipv6, SockType::Stream).build()
	}

	pub fn create_udp_v6() -> Socket {
		SocketBuilder::new(Family::Ipv6, SockType::Datagram).build()
	}

	pub fn create_unix_stream() -> Socket {
		SocketBuilder::new(Family::Unix, SockType::Stream).build()
	}

	pub fn create_unix_datagram() -> Socket {
		SocketBuilder::new(Family::Unix, SockType::Datagram).build()
	}
}
