use crate::addr::Family;

/// Socket lifecycle and configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket({family}, {sock_type}, {protocol}) failed: {}", errno_to_str(*.errno))]
    Create { errno: i32, family: i32, sock_type: i32, protocol: i32 },

    #[error("bind({addr}) failed: {}", errno_to_str(*.errno))]
    Bind { errno: i32, addr: String },

    #[error("bind({path}) failed: address in use by a live listener")]
    AddrInUse { path: String },

    #[error("listen(backlog={backlog}) failed: {}", errno_to_str(*.errno))]
    Listen { errno: i32, backlog: i32 },

    #[error("listen() on a socket without descriptor")]
    NoDescriptor,

    #[error("connect({addr}) failed: {}", errno_to_str(*.errno))]
    Connect { errno: i32, addr: String },

    #[error("connect({addr}) timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u128 },

    #[error("reconnect() without a remote address")]
    NoRemoteAddress,

    #[error("accept() failed: {}", errno_to_str(*.errno))]
    Accept { errno: i32 },

    #[error("descriptor {fd} is not an open socket")]
    InvalidDescriptor { fd: i32 },

    #[error("setsockopt(level={level}, option={option}) failed: {}", errno_to_str(*.errno))]
    SetOption { errno: i32, level: i32, option: i32 },

    #[error("getsockopt(level={level}, option={option}) failed: {}", errno_to_str(*.errno))]
    GetOption { errno: i32, level: i32, option: i32 },

    #[error("socket family {socket} does not match address family {addr} ({display})")]
    FamilyMismatch { socket: Family, addr: Family, display: String },

    #[error("close() failed: {}", errno_to_str(*.errno))]
    Close { errno: i32 },
}

impl SocketError {
    /// Returns the OS error code carried by this error, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            SocketError::Create { errno, .. }
            | SocketError::Bind { errno, .. }
            | SocketError::Listen { errno, .. }
            | SocketError::Connect { errno, .. }
            | SocketError::Accept { errno }
            | SocketError::SetOption { errno, .. }
            | SocketError::GetOption { errno, .. }
            | SocketError::Close { errno } => Some(*errno),
            SocketError::ConnectTimeout { .. } => Some(libc::ETIMEDOUT),
            SocketError::AddrInUse { .. } => Some(libc::EADDRINUSE),
            SocketError::InvalidDescriptor { .. } | SocketError::NoDescriptor => Some(libc::EBADF),
            SocketError::FamilyMismatch { .. } | SocketError::NoRemoteAddress => None,
        }
    }
}

/// Data transfer errors.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("receive failed: {}", errno_to_str(*.errno))]
    Read { errno: i32 },

    #[error("send failed: {}", errno_to_str(*.errno))]
    Write { errno: i32 },

    #[error("socket is not connected")]
    NotConnected,

    #[error("destination address cannot be encoded")]
    InvalidAddress,
}

impl IoError {
    pub(crate) fn read(err: std::io::Error) -> Self {
        IoError::Read { errno: err.raw_os_error().unwrap_or(libc::EIO) }
    }

    pub(crate) fn write(err: std::io::Error) -> Self {
        IoError::Write { errno: err.raw_os_error().unwrap_or(libc::EIO) }
    }
}

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Converts errno to human-readable string.
pub(crate) fn errno_to_str(errno: i32) -> String {
    match errno {
        libc::EACCES => "permission denied".into(),
        libc::EADDRINUSE => "address already in use".into(),
        libc::EADDRNOTAVAIL => "address not available".into(),
        libc::EAFNOSUPPORT => "address family not supported".into(),
        libc::EAGAIN => "resource temporarily unavailable".into(),
        libc::EBADF => "bad file descriptor".into(),
        libc::ECANCELED => "operation canceled".into(),
        libc::ECONNREFUSED => "connection refused".into(),
        libc::ECONNRESET => "connection reset by peer".into(),
        libc::EINPROGRESS => "operation in progress".into(),
        libc::EINTR => "interrupted by signal".into(),
        libc::EINVAL => "invalid argument".into(),
        libc::EISCONN => "already connected".into(),
        libc::EMFILE => "too many open files".into(),
        libc::ENETUNREACH => "network unreachable".into(),
        libc::ENOBUFS => "no buffer space available".into(),
        libc::ENOENT => "no such file or directory".into(),
        libc::ENOTCONN => "not connected".into(),
        libc::ENOTSOCK => "not a socket".into(),
        libc::EPIPE => "broken pipe".into(),
        libc::ETIMEDOUT => "connection timed out".into(),
        _ => format!("errno {}", errno),
    }
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
    match errno {
        libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
        libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
        libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
        libc::EAGAIN => std::io::ErrorKind::WouldBlock,
        libc::ECONNREFUSED => std::io::ErrorKind::ConnectionRefused,
        libc::ECONNRESET => std::io::ErrorKind::ConnectionReset,
        libc::EINTR => std::io::ErrorKind::Interrupted,
        libc::EINVAL => std::io::ErrorKind::InvalidInput,
        libc::ENOTCONN => std::io::ErrorKind::NotConnected,
        libc::EPIPE => std::io::ErrorKind::BrokenPipe,
        libc::ETIMEDOUT => std::io::ErrorKind::TimedOut,
        _ => std::io::ErrorKind::Other,
    }
}

impl From<SocketError> for std::io::Error {
    fn from(err: SocketError) -> Self {
        let kind = match &err {
            SocketError::FamilyMismatch { .. } | SocketError::NoRemoteAddress => {
                std::io::ErrorKind::InvalidInput
            }
            other => errno_to_kind(other.errno().unwrap_or(0)),
        };
        std::io::Error::new(kind, err)
    }
}

impl From<IoError> for std::io::Error {
    fn from(err: IoError) -> Self {
        let kind = match &err {
            IoError::Read { errno } => errno_to_kind(*errno),
            IoError::Write { errno } => errno_to_kind(*errno),
            IoError::NotConnected => std::io::ErrorKind::NotConnected,
            IoError::InvalidAddress => std::io::ErrorKind::InvalidInput,
        };
        std::io::Error::new(kind, err)
    }
}
