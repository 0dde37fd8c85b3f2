//! Contains the `Error` and `Result` types that `credprobe` uses.

use thiserror::Error;

/// The result type for all methods that can return an error in the `credprobe` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur during a scan. The inner [`ErrorKind`] is boxed to keep
/// the type cheap to move through probe state machines.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Creates an error indicating that the target could not be reached or that the
    /// transport gave out mid-probe.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed {
            message: message.into(),
        })
    }

    /// Creates an error indicating that the remote end spoke, but not the protocol
    /// the probe expected.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol {
            message: message.into(),
        })
    }

    /// Creates an error indicating that the surrounding context was cancelled.
    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled)
    }

    /// Creates an error for misuse of the scanner itself rather than anything the
    /// target did.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal {
            message: message.into(),
        })
    }

    /// Whether this error indicates the target could not be reached.
    pub fn is_connection_failed(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::ConnectionFailed { .. })
    }

    /// Whether this error indicates the remote end violated the expected protocol.
    pub fn is_protocol(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Protocol { .. })
    }

    /// Whether this error was produced by context cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Canceled)
    }

    /// Whether this error indicates scanner misuse (unknown service, malformed port).
    pub fn is_internal(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Internal { .. })
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into())
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::ConnectionFailed {
            message: err.to_string(),
        }
    }
}

/// The types of errors that a probe can surface. Fine-grained protocol codes are
/// folded into this closed set before they leave a probe; downstream policy
/// (back-off, early exit) only ever sees these.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The target could not be reached, refused the connection, or the transport
    /// failed partway through an attempt.
    #[error("connection failed: {message}")]
    #[non_exhaustive]
    ConnectionFailed { message: String },

    /// The remote end answered with something other than the expected protocol.
    #[error("protocol error: {message}")]
    #[non_exhaustive]
    Protocol { message: String },

    /// The surrounding context was cancelled before the operation completed.
    #[error("operation canceled")]
    Canceled,

    /// The scanner was misused: unknown service name, malformed port, duplicate
    /// registration. Raised before any probe runs.
    #[error("internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },
}

/// Transport-level signals recognized in raw driver error text. Most driver
/// crates only expose strings, so classification has to sniff them.
const NETWORK_ERROR_SIGNALS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection aborted",
    "broken pipe",
    "timed out",
    "timeout",
    "deadline has elapsed",
    "no route to host",
    "network is unreachable",
    "host unreachable",
    "unexpected end of file",
    "unexpected eof",
    "early eof",
    "failed to lookup address",
    "name or service not known",
    "no such host",
    "nodename nor servname",
];

/// Whether a raw error message looks like a transport failure rather than
/// anything the remote service said.
pub(crate) fn looks_like_network_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    NETWORK_ERROR_SIGNALS
        .iter()
        .any(|signal| message.contains(signal))
}

/// Classifies a raw driver message that is already known not to be a credential
/// rejection. Anything unrecognized is a protocol error: an unknown message must
/// never be mistaken for reachability feedback, let alone a success.
pub(crate) fn classify_raw(message: impl Into<String>) -> Error {
    let message = message.into();
    if looks_like_network_error(&message) {
        Error::connection_failed(message)
    } else {
        Error::protocol(message)
    }
}
