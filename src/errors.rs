use std::fmt;
use std::io;

/// Everything that can go wrong while relaying one client, or while
/// starting the server up. The relay loop never panics on remote input;
/// every branch that depends on bytes read off the wire returns one of
/// these instead.
#[derive(Debug)]
pub enum Error {
    /// Any I/O failure on a client or upstream socket (recv, send, connect).
    /// Covers both "fatal socket error" and "peer closed mid read" once we've
    /// already turned `recv() == 0` into `PeerClosed` at the call site.
    Io(io::Error),

    /// `recv()` returned 0: the peer went away cleanly. Always resolved into
    /// a full pair teardown, never retried.
    PeerClosed,

    /// Handshake `ATYP` byte was neither 1 (IPv4) nor 3 (domain).
    UnsupportedAddressType(u8),

    /// The first read didn't contain enough bytes for a full handshake
    /// header (`ATYP` + address + port).
    TruncatedHandshake,

    /// A domain name in the handshake wasn't valid UTF-8.
    InvalidHostName,

    /// The connect-timeout elapsed before the upstream socket finished
    /// connecting.
    ConnectTimeout,

    /// Startup-time configuration problem (missing password, bad bind
    /// address, unreadable config file, ...). Fatal: the process exits.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "i/o error: {}", e),
            Error::PeerClosed => write!(f, "peer closed the connection"),
            Error::UnsupportedAddressType(atyp) => {
                write!(f, "unsupported address type: {}", atyp)
            }
            Error::TruncatedHandshake => write!(f, "truncated handshake header"),
            Error::InvalidHostName => write!(f, "handshake host name is not valid utf-8"),
            Error::ConnectTimeout => write!(f, "upstream connect timed out"),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl Error {
    /// Whether this error represents orderly teardown that doesn't need to
    /// be logged at error level (peer closed, or a timeout we already log
    /// more specifically elsewhere).
    pub fn is_routine(&self) -> bool {
        matches!(self, Error::PeerClosed)
    }
}
