//! TCP transport implementation for client connections.
//!
//! This module contains the [`TcpTransport`] type, which resolves names with
//! the system resolver and creates [`TcpConnection`]s. Connections are
//! configured with a [`TcpTransportConfig`].
//!
#![cfg_attr(
    feature = "tls",
    doc = "Requests to `https` URIs are wrapped in TLS when the transport has a TLS configuration."
)]

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use http::Uri;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{trace, warn, Instrument as _};

use super::dns::GaiResolver;
use super::{Connection, Transport};
use crate::BoxFuture;

/// Size reserved in the read buffer before each read.
const READ_RESERVE: usize = 8 * 1024;

/// Configuration for TCP connections.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// The timeout for connecting to a single remote address.
    pub connect_timeout: Option<Duration>,

    /// The idle time before TCP keep-alive probes are sent.
    pub keep_alive_timeout: Option<Duration>,

    /// The local IPv4 address to bind to.
    pub local_address_ipv4: Option<Ipv4Addr>,

    /// The local IPv6 address to bind to.
    pub local_address_ipv6: Option<Ipv6Addr>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// Whether to reuse the local address.
    pub reuse_address: bool,

    /// The size of the send buffer.
    pub send_buffer_size: Option<usize>,

    /// The size of the receive buffer.
    pub recv_buffer_size: Option<usize>,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            keep_alive_timeout: Some(Duration::from_secs(90)),
            local_address_ipv4: None,
            local_address_ipv6: None,
            nodelay: true,
            reuse_address: true,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

/// A TCP transport for client connections.
///
/// Names are resolved with a [`GaiResolver`]. Each call to
/// [`Transport::connection`] creates a fresh [`TcpConnection`]; connections
/// are never shared between exchanges.
///
/// # Example
/// ```no_run
/// # use wireline::client::conn::{Connection as _, TcpTransport, Transport as _};
/// # async fn run() -> std::io::Result<()> {
/// let transport = TcpTransport::default();
/// let addrs = transport.resolve("example.com", 80).await?;
///
/// let mut conn = transport.connection(&"http://example.com".parse().unwrap());
/// conn.connect(addrs[0], "example.com").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: Arc<TcpTransportConfig>,
    resolver: GaiResolver,
    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        TcpTransport::builder().build()
    }
}

impl TcpTransport {
    /// Create a new TCP transport builder with the default configuration.
    pub fn builder() -> TcpTransportBuilder {
        TcpTransportBuilder {
            config: Default::default(),
            resolver: GaiResolver::new(),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Get the configuration for the TCP transport.
    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }

    /// Get the resolver used by the TCP transport.
    pub fn resolver(&self) -> &GaiResolver {
        &self.resolver
    }
}

/// Builder for a TCP transport.
#[derive(Debug)]
pub struct TcpTransportBuilder {
    config: TcpTransportConfig,
    resolver: GaiResolver,
    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl TcpTransportBuilder {
    /// Access the TCP connection configuration
    pub fn config(&mut self) -> &mut TcpTransportConfig {
        &mut self.config
    }

    /// Set the TCP connection configuration
    pub fn with_config(mut self, config: TcpTransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the resolver for the TCP transport
    pub fn with_resolver(mut self, resolver: GaiResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Use a resolver which caches lookups.
    pub fn with_cached_resolver(self) -> Self {
        self.with_resolver(GaiResolver::cached())
    }

    /// Use TLS for `https` requests.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, config: rustls::ClientConfig) -> Self {
        self.tls = Some(Arc::new(config));
        self
    }

    /// Build the TCP transport
    pub fn build(self) -> TcpTransport {
        TcpTransport {
            config: Arc::new(self.config),
            resolver: self.resolver,
            #[cfg(feature = "tls")]
            tls: self.tls,
        }
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;

    fn resolve(&self, host: &str, port: u16) -> BoxFuture<'static, io::Result<Vec<SocketAddr>>> {
        self.resolver.resolve(host, port)
    }

    fn connection(&self, uri: &Uri) -> TcpConnection {
        TcpConnection {
            config: self.config.clone(),
            secure: uri.scheme() == Some(&http::uri::Scheme::HTTPS),
            #[cfg(feature = "tls")]
            tls: self.tls.clone(),
            stream: None,
        }
    }
}

trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A single TCP connection, optionally wrapped in TLS.
pub struct TcpConnection {
    config: Arc<TcpTransportConfig>,
    secure: bool,
    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ClientConfig>>,
    stream: Option<Box<dyn Stream>>,
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("secure", &self.secure)
            .field("connected", &self.stream.is_some())
            .finish()
    }
}

impl TcpConnection {
    /// Whether the connection currently has an open stream.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> io::Result<&mut Box<dyn Stream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection is not open"))
    }

    #[cfg(feature = "tls")]
    fn handshake(
        &self,
        stream: TcpStream,
        host: &str,
    ) -> BoxFuture<'static, io::Result<Box<dyn Stream>>> {
        let config = self.tls.clone();
        let host = host.to_owned();
        Box::pin(async move {
            let config = config.ok_or_else(|| {
                io::Error::new(io::ErrorKind::Unsupported, "no TLS configuration for https")
            })?;
            let domain = rustls::pki_types::ServerName::try_from(host)
                .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

            let stream = tokio_rustls::TlsConnector::from(config)
                .connect(domain, stream)
                .await?;
            trace!("tls handshake complete");
            Ok(Box::new(stream) as Box<dyn Stream>)
        })
    }

    #[cfg(not(feature = "tls"))]
    fn handshake(
        &self,
        _stream: TcpStream,
        _host: &str,
    ) -> BoxFuture<'static, io::Result<Box<dyn Stream>>> {
        Box::pin(std::future::ready(Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "https requires the `tls` feature",
        ))))
    }
}

impl Connection for TcpConnection {
    fn connect<'a>(&'a mut self, addr: SocketAddr, host: &'a str) -> BoxFuture<'a, io::Result<()>> {
        let span = tracing::trace_span!("tcp", remote.addr = %addr);
        Box::pin(
            async move {
                self.stream = None;
                let stream = connect(&addr, &self.config).await?;
                trace!("tcp connected");

                let stream: Box<dyn Stream> = if self.secure {
                    let handshake = self.handshake(stream, host);
                    handshake.await?
                } else {
                    Box::new(stream)
                };

                self.stream = Some(stream);
                Ok(())
            }
            .instrument(span),
        )
    }

    fn write<'a>(&'a mut self, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            let stream = self.stream()?;
            stream.write_all(buf).await?;
            stream.flush().await?;
            Ok(buf.len())
        })
    }

    fn read<'a>(&'a mut self, buf: &'a mut BytesMut) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            let stream = self.stream()?;
            buf.reserve(READ_RESERVE);
            stream.read_buf(buf).await
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut stream) = self.stream.take() {
                if let Err(error) = stream.shutdown().await {
                    trace!(%error, "tcp shutdown error");
                }
            }
        })
    }
}

fn bind_local_address(
    socket: &TcpSocket,
    dst_addr: &SocketAddr,
    local_addr_ipv4: &Option<Ipv4Addr>,
    local_addr_ipv6: &Option<Ipv6Addr>,
) -> io::Result<()> {
    match (*dst_addr, local_addr_ipv4, local_addr_ipv6) {
        (SocketAddr::V4(_), Some(addr), _) => {
            socket.bind(SocketAddr::new((*addr).into(), 0))?;
        }
        (SocketAddr::V6(_), _, Some(addr)) => {
            socket.bind(SocketAddr::new((*addr).into(), 0))?;
        }
        _ => {}
    }

    Ok(())
}

async fn connect(addr: &SocketAddr, config: &TcpTransportConfig) -> io::Result<TcpStream> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    trace!("tcp socket opened");

    let guard = tracing::trace_span!("socket_options").entered();

    if config.reuse_address {
        if let Err(e) = socket.set_reuseaddr(true) {
            warn!("tcp set_reuse_address error: {}", e);
        }
    }

    if let Some(size) = config.send_buffer_size {
        if let Err(e) = socket.set_send_buffer_size(size.try_into().unwrap_or(u32::MAX)) {
            warn!("tcp set_buffer_size error: {}", e);
        }
    }

    if let Some(size) = config.recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size.try_into().unwrap_or(u32::MAX)) {
            warn!("tcp set_recv_buffer_size error: {}", e);
        }
    }

    bind_local_address(
        &socket,
        addr,
        &config.local_address_ipv4,
        &config.local_address_ipv6,
    )?;

    drop(guard);

    let stream = match config.connect_timeout {
        Some(dur) => match tokio::time::timeout(dur, socket.connect(*addr)).await {
            Ok(result) => result?,
            Err(_) => {
                trace!(timeout=?dur, "connection timed out");
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {}ms", dur.as_millis()),
                ));
            }
        },
        None => socket.connect(*addr).await?,
    };

    if let Err(e) = stream.set_nodelay(config.nodelay) {
        warn!("tcp set_nodelay error: {}", e);
    }

    if let Some(dur) = config.keep_alive_timeout {
        let keepalive = socket2::TcpKeepalive::new().with_time(dur);
        if let Err(e) = socket2::SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            warn!("tcp set_keepalive error: {}", e);
        }
    }

    Ok(stream)
}
