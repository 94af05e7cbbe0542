use std::io;

use thiserror::Error;

/// Client error type.
///
/// Every exchange ends with either a [`Response`][crate::Response] or exactly
/// one of these errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The host name could not be resolved to any address.
    #[error("resolve: {0}")]
    Resolve(#[source] io::Error),

    /// No candidate address accepted a connection. Holds the error from the
    /// last candidate tried.
    #[error("connection: {0}")]
    Connect(#[source] io::Error),

    /// Writing the request to the connection failed.
    #[error("write: {0}")]
    Write(#[source] io::Error),

    /// Reading the response from the connection failed.
    #[error("read: {0}")]
    Read(#[source] io::Error),

    /// The exchange deadline expired.
    #[error("request timeout")]
    Timeout,

    /// The request could not be sent, such as a URI without a host.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The peer sent something that is not an HTTP/1.x response.
    #[error("protocol: {0}")]
    Protocol(String),

    /// The client engine stopped before the exchange completed.
    #[error("client engine shut down")]
    Shutdown,
}

/// The kind of an [`Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// See [`Error::Resolve`].
    Resolve,
    /// See [`Error::Connect`].
    Connect,
    /// See [`Error::Write`].
    Write,
    /// See [`Error::Read`].
    Read,
    /// See [`Error::Timeout`].
    Timeout,
    /// See [`Error::InvalidRequest`].
    InvalidRequest,
    /// See [`Error::Protocol`].
    Protocol,
    /// See [`Error::Shutdown`].
    Shutdown,
}

impl Error {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Resolve(_) => ErrorKind::Resolve,
            Error::Connect(_) => ErrorKind::Connect,
            Error::Write(_) => ErrorKind::Write,
            Error::Read(_) => ErrorKind::Read,
            Error::Timeout => ErrorKind::Timeout,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Shutdown => ErrorKind::Shutdown,
        }
    }

    /// Returns `true` if the exchange failed because its deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}
