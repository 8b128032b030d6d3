//! Error kinds surfaced by the runtime.
//!
//! Modeled by hand, the same way `wayland-backend::types::client::WaylandError`
//! is: a plain enum with hand-written `Display`/`Error` impls rather than a
//! derive-macro error crate.

use std::fmt;

/// Every error the runtime can surface, per the error kinds enumerated in
/// the design document.
#[derive(Debug)]
pub enum Error {
    /// `XDG_RUNTIME_DIR` or `WAYLAND_DISPLAY` is not set.
    EnvironmentMissing(&'static str),
    /// The compositor socket refused the connection.
    ConnectFailed(std::io::Error),
    /// The peer closed the socket, or the local end was shut down.
    Disconnected,
    /// A requested interface is not advertised by the registry.
    UnsupportedProtocol(String),
    /// A buffer/pool size mismatch, unknown format, unknown MIME type, or
    /// similar caller-supplied argument is invalid.
    InvalidArgument(String),
    /// Double registration, re-binding a bound proxy, or binding before the
    /// initial sync: a bug in the calling application.
    ProgrammerError(String),
    /// A malformed message header or truncated payload.
    Codec(String),
    /// An event-loop adapter or protocol feature was invoked that the
    /// current adapter/variant does not support.
    Unsupported(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EnvironmentMissing(var) => {
                write!(f, "required environment variable {var} is not set")
            }
            Error::ConnectFailed(e) => write!(f, "failed to connect to compositor socket: {e}"),
            Error::Disconnected => f.write_str("the connection to the compositor was closed"),
            Error::UnsupportedProtocol(name) => {
                write!(f, "interface {name} is not supported by the compositor")
            }
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::ProgrammerError(msg) => write!(f, "programmer error: {msg}"),
            Error::Codec(msg) => write!(f, "codec error: {msg}"),
            Error::Unsupported(what) => write!(f, "not implemented: {what}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConnectFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::BrokenPipe
            || e.raw_os_error() == Some(rustix::io::Errno::BADF.raw_os_error())
        {
            Error::Disconnected
        } else {
            Error::Codec(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
