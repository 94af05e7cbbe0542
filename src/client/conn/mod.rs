//! Transports and connections.
//!
//! A [`Transport`] resolves host names and creates unconnected
//! [`Connection`]s. The engine drives one connection per exchange: it
//! connects to a resolved candidate, writes the request and reads the
//! response.
//!
//! [`TcpTransport`] is the real socket implementation. With the `mocks`
//! feature, [`MockTransport`][mock::MockTransport] replays scripted responses.

use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use http::Uri;

use crate::BoxFuture;

pub mod dns;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;
pub mod tcp;

pub use self::tcp::{TcpConnection, TcpTransport, TcpTransportConfig};

/// Resolves names and creates connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type created by this transport.
    type Connection: Connection;

    /// Resolve a host and port to candidate addresses, in the order they
    /// should be tried.
    fn resolve(&self, host: &str, port: u16) -> BoxFuture<'static, io::Result<Vec<SocketAddr>>>;

    /// Create a new, unconnected connection for a request to `uri`.
    fn connection(&self, uri: &Uri) -> Self::Connection;
}

/// A single connection used by one exchange.
pub trait Connection: Send + 'static {
    /// Connect to `addr`. `host` is the name the address was resolved from.
    fn connect<'a>(&'a mut self, addr: SocketAddr, host: &'a str)
        -> BoxFuture<'a, io::Result<()>>;

    /// Write all of `buf`, returning the number of bytes written.
    fn write<'a>(&'a mut self, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>>;

    /// Read whatever is available, appending it to `buf`.
    ///
    /// Returns zero at the end of the stream.
    fn read<'a>(&'a mut self, buf: &'a mut BytesMut) -> BoxFuture<'a, io::Result<usize>>;

    /// Read until `buf` contains `delimiter`.
    ///
    /// Returns the length of `buf` up to and including the first delimiter.
    /// Bytes after the delimiter stay in `buf`. Data already in `buf` is
    /// searched before reading.
    fn read_until<'a>(
        &'a mut self,
        buf: &'a mut BytesMut,
        delimiter: &'a [u8],
    ) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            let mut searched = 0;
            loop {
                if let Some(position) = find(&buf[searched..], delimiter) {
                    return Ok(searched + position + delimiter.len());
                }
                searched = buf.len().saturating_sub(delimiter.len().saturating_sub(1));

                if self.read(buf).await? == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed before delimiter",
                    ));
                }
            }
        })
    }

    /// Close the connection. Closing twice is a no-op.
    fn disconnect(&mut self) -> BoxFuture<'_, ()>;
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::mock::MockConnection;
    use super::*;

    #[test]
    fn find_subsequence() {
        assert_eq!(find(b"abc\r\n", b"\r\n"), Some(3));
        assert_eq!(find(b"abc", b"\r\n"), None);
        assert_eq!(find(b"\r\n\r\n", b"\r\n\r\n"), Some(0));
    }

    #[tokio::test]
    async fn read_until_across_reads() {
        let mut conn = MockConnection::new()
            .respond("HTTP/1.1 200 OK\r")
            .respond("\nServer: x\r\n");
        conn.connect("127.0.0.1:80".parse().unwrap(), "localhost")
            .await
            .unwrap();

        let mut buf = BytesMut::new();
        let n = conn.read_until(&mut buf, b"\r\n").await.unwrap();
        assert_eq!(&buf[..n], b"HTTP/1.1 200 OK\r\n");
        assert_eq!(&buf[n..], b"Server: x\r\n");
    }

    #[tokio::test]
    async fn read_until_uses_buffered_data() {
        let mut conn = MockConnection::new();
        let mut buf = BytesMut::from(&b"one\r\ntwo"[..]);
        let n = conn.read_until(&mut buf, b"\r\n").await.unwrap();
        assert_eq!(n, 5);
    }

    #[tokio::test]
    async fn read_until_eof() {
        let mut conn = MockConnection::new().respond("partial");
        conn.connect("127.0.0.1:80".parse().unwrap(), "localhost")
            .await
            .unwrap();

        let mut buf = BytesMut::new();
        let err = conn.read_until(&mut buf, b"\r\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
