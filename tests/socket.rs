//! Socket lifecycle: creation, bind, listen, accept, connect and close.

use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use fiberlane::{
    Address, Family, FdRegistry, Interest, Scheduler, SockType, Socket, SocketAddrV4, SocketAddrV6,
    SocketBuilder, SocketConfig, SocketError, UnixAddr, Wakeup,
};

mod util;

use util::{any_local_v4, init, tcp_listener, tmp_path};

#[test]
fn datagram_factories_open_a_descriptor() {
    init();
    for sock in [Socket::create_udp_v4(), Socket::create_udp_v6(), Socket::create_unix_datagram()] {
        assert!(sock.is_valid(), "{sock}");
        assert!(sock.is_connected(), "{sock}");
        assert_eq!(sock.sock_type(), SockType::Datagram);
    }
}

#[test]
fn stream_factories_defer_the_descriptor() {
    init();
    for sock in [Socket::create_tcp_v4(), Socket::create_tcp_v6(), Socket::create_unix_stream()] {
        assert!(!sock.is_valid(), "{sock}");
        assert!(!sock.is_connected(), "{sock}");
        assert_eq!(sock.raw_fd(), None);
    }
}

#[test]
fn factories_follow_the_address_family() {
    init();
    let v6 = Address::V6(SocketAddrV6::localhost(0));
    assert_eq!(Socket::create_tcp(&v6).family(), Family::Ipv6);
    assert_eq!(Socket::create_udp(&any_local_v4()).family(), Family::Ipv4);
}

#[test]
fn close_is_idempotent() {
    init();
    let mut sock = Socket::create_udp_v4();
    let fd = sock.raw_fd().unwrap();
    assert!(FdRegistry::global().get(fd).is_some());

    assert!(sock.close());
    assert!(!sock.is_valid());
    assert!(!sock.is_connected());
    assert!(sock.close());

    let mut never_opened = Socket::create_tcp_v4();
    assert!(never_opened.close());
}

#[test]
fn bind_rejects_family_mismatch() {
    init();
    let mut sock = Socket::create_tcp_v4();
    let addr = Address::V6(SocketAddrV6::localhost(0));
    match sock.try_bind(&addr) {
        Err(SocketError::FamilyMismatch { socket, addr, .. }) => {
            assert_eq!(socket, Family::Ipv4);
            assert_eq!(addr, Family::Ipv6);
        }
        res => panic!("unexpected result: {res:?}"),
    }
    // Checked before a descriptor is opened.
    assert!(!sock.is_valid());
}

#[test]
fn bind_resolves_the_kernel_chosen_port() {
    init();
    let mut sock = Socket::create_tcp_v4();
    assert!(sock.bind(&any_local_v4()));
    assert!(sock.is_valid());
    match sock.local_address() {
        Some(Address::V4(addr)) => {
            assert_eq!(addr.ip(), [127, 0, 0, 1]);
            assert_ne!(addr.port(), 0);
        }
        addr => panic!("unexpected local address: {addr:?}"),
    }
}

#[test]
fn listen_without_descriptor_fails() {
    init();
    let sock = Socket::create_tcp_v4();
    assert!(!sock.listen(fiberlane::DEFAULT_BACKLOG));
    assert!(matches!(sock.try_listen(1), Err(SocketError::NoDescriptor)));
    assert!(sock.accept().is_none());
}

#[test]
fn reconnect_without_remote_fails() {
    init();
    let mut sock = Socket::create_tcp_v4();
    assert!(matches!(sock.try_reconnect(None), Err(SocketError::NoRemoteAddress)));
}

#[test]
fn accept_resolves_both_addresses() {
    init();
    let (listener, addr) = tcp_listener();
    let mut client = Socket::create_tcp_v4();
    assert!(client.connect(&addr, Some(Duration::from_secs(5))));
    assert!(client.is_connected());
    assert_eq!(client.remote_address(), Some(&addr));

    let server = listener.accept().unwrap();
    assert!(server.is_connected());
    assert_eq!(server.family(), Family::Ipv4);
    assert_eq!(server.sock_type(), SockType::Stream);
    assert_eq!(server.local_address(), Some(&addr));
    assert_eq!(server.remote_address(), client.local_address());
}

#[test]
fn address_lookups_are_cached() {
    init();
    let (_listener, addr) = tcp_listener();
    let mut client = Socket::create_tcp_v4();
    assert!(client.connect(&addr, None));
    let local = client.get_local_address();
    assert_eq!(client.get_local_address(), local);
    assert_eq!(client.get_remote_address(), addr);
    assert_eq!(client.get_remote_address(), addr);
}

#[test]
fn unconnected_lookup_yields_unknown() {
    init();
    let mut sock = Socket::create_tcp_v4();
    let addr = sock.get_remote_address();
    assert!(addr.is_unknown());
    assert_eq!(addr.family(), Family::Ipv4);
    assert!(sock.remote_address().is_none());
}

#[test]
fn reconnect_after_close_re_resolves() {
    init();
    let (listener, addr) = tcp_listener();
    let mut client = Socket::create_tcp_v4();
    assert!(client.connect(&addr, None));
    let _first = listener.accept().unwrap();
    let before = client.local_address().cloned().unwrap();

    assert!(client.close());
    // Addresses survive close.
    assert_eq!(client.remote_address(), Some(&addr));

    assert!(client.reconnect(Some(Duration::from_secs(5))));
    let _second = listener.accept().unwrap();
    let after = client.local_address().cloned().unwrap();
    assert!(!after.is_unknown());
    assert_ne!(before, after);
}

#[test]
fn connect_refused_closes_the_socket() {
    init();
    // Grab a free port, then stop listening on it.
    let port = {
        let (_listener, addr) = tcp_listener();
        match addr {
            Address::V4(addr) => addr.port(),
            _ => unreachable!(),
        }
    };
    let mut sock = Socket::create_tcp_v4();
    let target = Address::V4(SocketAddrV4::localhost(port));
    match sock.try_connect(&target, Some(Duration::from_secs(1))) {
        Err(SocketError::Connect { errno, .. }) => assert_eq!(errno, libc::ECONNREFUSED),
        res => panic!("unexpected result: {res:?}"),
    }
    assert!(!sock.is_valid());
    assert!(!sock.is_connected());
}

/// Lets every wait run out its timer.
struct ExpiringScheduler;

impl Scheduler for ExpiringScheduler {
    fn wait_ready(&self, _: RawFd, _: Interest, timeout: Option<Duration>) -> io::Result<Wakeup> {
        thread::sleep(timeout.unwrap_or(Duration::from_millis(500)));
        Ok(Wakeup::TimedOut)
    }

    fn cancel_interest(&self, _: RawFd, _: Interest) -> bool {
        true
    }
}

#[test]
fn connect_gives_up_after_timeout() {
    init();
    let (_listener, addr) = tcp_listener();
    let mut sock = SocketBuilder::new(Family::Ipv4, SockType::Stream)
        .scheduler(Arc::new(ExpiringScheduler))
        .build();
    let start = Instant::now();
    match sock.try_connect(&addr, Some(Duration::from_millis(50))) {
        Err(SocketError::ConnectTimeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 50),
        res => panic!("unexpected result: {res:?}"),
    }
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(450), "{elapsed:?}");
    assert!(!sock.is_valid());
    assert!(!sock.is_connected());
}

#[test]
fn configured_connect_timeout_applies() {
    init();
    let (_listener, addr) = tcp_listener();
    let config = SocketConfig::new().connect_timeout(Some(Duration::from_millis(80)));
    let mut sock = SocketBuilder::new(Family::Ipv4, SockType::Stream)
        .config(config)
        .scheduler(Arc::new(ExpiringScheduler))
        .build();
    let start = Instant::now();
    match sock.try_connect(&addr, None) {
        Err(SocketError::ConnectTimeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 80),
        res => panic!("unexpected result: {res:?}"),
    }
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(80), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(450), "{elapsed:?}");
    assert!(!sock.is_valid());
}

#[test]
fn unix_bind_removes_stale_file() {
    init();
    let path = tmp_path("stale");
    std::fs::write(&path, b"").unwrap();
    let addr = Address::Unix(UnixAddr::from_path(&path));

    let mut sock = Socket::create_unix_stream();
    assert!(sock.bind(&addr));
    assert!(sock.listen(4));
    match sock.get_local_address() {
        Address::Unix(local) => assert_eq!(local.fs_path(), Some(path.as_path())),
        addr => panic!("unexpected local address: {addr:?}"),
    }
    drop(sock);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn unix_bind_refuses_live_listener() {
    init();
    let path = tmp_path("live");
    let addr = Address::Unix(UnixAddr::from_path(&path));

    let mut listener = Socket::create_unix_stream();
    assert!(listener.bind(&addr));
    assert!(listener.listen(4));

    let mut other = Socket::create_unix_stream();
    assert!(matches!(other.try_bind(&addr), Err(SocketError::AddrInUse { .. })));
    assert!(path.exists());

    // Once the listener is gone the path is reusable.
    drop(listener);
    let mut again = Socket::create_unix_stream();
    assert!(again.bind(&addr));
    drop(again);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn unix_datagram_bind_refuses_live_stream_listener() {
    init();
    let path = tmp_path("mixed");
    let addr = Address::Unix(UnixAddr::from_path(&path));

    let mut listener = Socket::create_unix_stream();
    assert!(listener.bind(&addr));
    assert!(listener.listen(4));

    let mut dgram = Socket::create_unix_datagram();
    assert!(matches!(dgram.try_bind(&addr), Err(SocketError::AddrInUse { .. })));
    assert!(path.exists());

    // The listener is still reachable.
    let mut client = Socket::create_unix_stream();
    assert!(client.connect(&addr, Some(Duration::from_secs(1))));
    assert!(listener.accept().is_some());

    drop(listener);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn unix_stream_accept() {
    init();
    let path = tmp_path("accept");
    let addr = Address::Unix(UnixAddr::from_path(&path));
    let mut listener = Socket::create_unix_stream();
    assert!(listener.bind(&addr));
    assert!(listener.listen(4));

    let mut client = Socket::create_unix_stream();
    assert!(client.connect(&addr, Some(Duration::from_secs(1))));
    let mut server = listener.accept().unwrap();
    assert_eq!(server.family(), Family::Unix);
    assert_eq!(server.get_local_address(), addr);
    match server.get_remote_address() {
        Address::Unix(remote) => assert!(remote.is_unnamed()),
        addr => panic!("unexpected remote address: {addr:?}"),
    }
    drop(listener);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn cancel_without_descriptor_is_a_noop() {
    init();
    let sock = Socket::create_tcp_v4();
    assert!(sock.cancel_read());
    assert!(sock.cancel_write());
    assert!(sock.cancel_accept());
    assert!(sock.cancel_all());
}

#[derive(Default)]
struct RecordingScheduler {
    cancelled: Mutex<Vec<(RawFd, Interest)>>,
}

impl Scheduler for RecordingScheduler {
    fn wait_ready(&self, _: RawFd, _: Interest, _: Option<Duration>) -> io::Result<Wakeup> {
        Ok(Wakeup::Cancelled)
    }

    fn cancel_interest(&self, fd: RawFd, interest: Interest) -> bool {
        self.cancelled.lock().unwrap().push((fd, interest));
        true
    }
}

#[test]
fn cancel_maps_to_interests() {
    init();
    let scheduler = Arc::new(RecordingScheduler::default());
    let sock = SocketBuilder::new(Family::Ipv4, SockType::Datagram).scheduler(scheduler.clone()).build();
    let fd = sock.raw_fd().unwrap();

    assert!(sock.cancel_read());
    assert!(sock.cancel_write());
    assert!(sock.cancel_accept());
    assert!(sock.cancel_all());
    assert_eq!(
        *scheduler.cancelled.lock().unwrap(),
        [
            (fd, Interest::Read),
            (fd, Interest::Write),
            (fd, Interest::Read),
            (fd, Interest::Read),
            (fd, Interest::Write),
        ]
    );
}

#[test]
fn display_describes_the_socket() {
    init();
    let mut sock = Socket::create_udp_v4();
    assert!(sock.bind(&any_local_v4()));
    let fd = sock.raw_fd().unwrap();
    let text = sock.to_string();
    assert!(text.starts_with(&format!("[Socket sock={fd} is_connected=1 family={}", libc::AF_INET)), "{text}");
    assert!(text.contains(" local_address=127.0.0.1:"), "{text}");
    assert!(!text.contains("remote_address"), "{text}");
    assert!(text.ends_with(']'), "{text}");

    sock.close();
    assert!(sock.to_string().starts_with("[Socket sock=-1 is_connected=0"));
}

#[test]
fn fresh_socket_has_no_error() {
    init();
    let sock = Socket::create_udp_v4();
    assert_eq!(sock.get_error(), 0);

    let mut reuse: libc::c_int = 0;
    assert!(sock.get_option(libc::SOL_SOCKET, libc::SO_REUSEADDR, &mut reuse));
    assert_ne!(reuse, 0);
}

#[test]
fn oversized_buffer_size_is_skipped() {
    init();
    let default = Socket::create_udp_v4();
    let mut expected: libc::c_int = 0;
    assert!(default.get_option(libc::SOL_SOCKET, libc::SO_RCVBUF, &mut expected));

    // Would truncate to 1 as a C int.
    let config = SocketConfig::new().recv_buffer((1 << 32) + 1);
    let sock = SocketBuilder::new(Family::Ipv4, SockType::Datagram).config(config).build();
    assert!(sock.is_valid());
    let mut size: libc::c_int = 0;
    assert!(sock.get_option(libc::SOL_SOCKET, libc::SO_RCVBUF, &mut size));
    assert_eq!(size, expected);
}
