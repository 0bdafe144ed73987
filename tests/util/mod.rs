//! Test utilities.

#![allow(dead_code, unused_imports)] // Not all tests use all code here.

use std::path::PathBuf;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fiberlane::{Address, SocketAddrV4, Socket};

/// Initialise logging.
pub(crate) fn init() {
    static START: Once = Once::new();
    START.call_once(|| {
        std_logger::Config::logfmt().with_call_location(true).init();
    });
}

/// Unique path for a local-domain socket, removed if it already exists.
pub(crate) fn tmp_path(name: &str) -> PathBuf {
    static COUNT: AtomicUsize = AtomicUsize::new(0);
    let n = COUNT.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("fiberlane.{}.{n}.{name}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

/// Loopback address with a kernel-assigned port.
pub(crate) fn any_local_v4() -> Address {
    Address::V4(SocketAddrV4::localhost(0))
}

/// Listening TCP socket on an ephemeral loopback port.
pub(crate) fn tcp_listener() -> (Socket, Address) {
    let mut listener = Socket::create_tcp_v4();
    assert!(listener.bind(&any_local_v4()), "bind failed");
    assert!(listener.listen(16), "listen failed");
    let addr = listener.get_local_address();
    assert!(!addr.is_unknown());
    (listener, addr)
}

/// Connected TCP pair: (client, accepted server side).
pub(crate) fn tcp_pair() -> (Socket, Socket) {
    let (listener, addr) = tcp_listener();
    let mut client = Socket::create_tcp_v4();
    assert!(client.connect(&addr, Some(Duration::from_secs(5))), "connect failed");
    let server = listener.accept().expect("accept failed");
    (client, server)
}
