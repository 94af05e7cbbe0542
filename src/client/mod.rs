//! HTTP/1.x client.
//!
//! The [`Client`] is the entry point: each call builds a fresh exchange and
//! hands it to the client's engine, returning a [`ResponseFuture`].
//!
//! Transports are pluggable through the [`Transport`][conn::Transport] trait.
//! [`Client::new`] uses the TCP transport; [`Client::with_transport`] accepts
//! any other implementation, such as the scripted
//! `MockTransport` available with the `mocks` feature.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request};

use self::conn::TcpTransport;
use self::engine::Engine;

mod codec;
pub mod conn;
mod engine;
mod error;
mod options;
mod response;

pub use self::engine::ResponseFuture;
pub use self::error::{Error, ErrorKind};
pub use self::options::{ClientOptions, Direction, Progress, RequestOptions};
pub use self::response::Response;

#[cfg(feature = "tls")]
/// Get a default TLS client configuration by loading the platform's native certificates.
pub fn default_tls_config() -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::warn!(%error, "could not load platform certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::trace!(added, ignored, "loaded platform certificates");

    let mut cfg = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    cfg.alpn_protocols.push(b"http/1.1".to_vec());
    cfg
}

/// An asynchronous HTTP/1.x client.
///
/// Cloning a client is cheap; clones share the same engine. The engine's
/// worker thread stops once the last clone is dropped and in-flight
/// exchanges have finished.
///
/// # Example
/// ```no_run
/// # use bytes::Bytes;
/// # use wireline::client::{Client, ClientOptions, RequestOptions};
/// # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
/// let client = Client::new(ClientOptions::default())?;
/// let request = http::Request::builder()
///     .uri("http://example.com/")
///     .body(Bytes::new())?;
/// let response = client.get(request, RequestOptions::default()).await?;
/// println!("Response: {:?}", response);
/// # Ok(())
/// # }
/// ```
pub struct Client<T = TcpTransport> {
    engine: Arc<Engine<T>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<T> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish()
    }
}

impl Client {
    /// Create a client which connects over TCP.
    ///
    #[cfg_attr(
        feature = "tls",
        doc = "`https` requests use TLS with the platform's native root certificates."
    )]
    pub fn new(options: ClientOptions) -> io::Result<Self> {
        let mut transport = TcpTransport::builder();
        if options.cache_resolved {
            transport = transport.with_cached_resolver();
        }
        #[cfg(feature = "tls")]
        {
            transport = transport.with_tls(default_tls_config());
        }

        Self::with_transport(transport.build(), options)
    }
}

impl<T> Client<T>
where
    T: conn::Transport,
{
    /// Create a client which uses `transport` for every exchange.
    pub fn with_transport(transport: T, options: ClientOptions) -> io::Result<Self> {
        Ok(Self {
            engine: Arc::new(Engine::new(transport, options)?),
        })
    }

    /// The client-wide options.
    pub fn config(&self) -> &ClientOptions {
        self.engine.options()
    }

    /// The transport used by this client.
    pub fn transport(&self) -> &T {
        self.engine.transport()
    }

    /// Send a request with its own method.
    pub fn execute(&self, request: Request<Bytes>, options: RequestOptions) -> ResponseFuture {
        self.engine.execute(request, options)
    }

    /// Send a request as `GET`.
    pub fn get(&self, request: Request<Bytes>, options: RequestOptions) -> ResponseFuture {
        self.execute(with_method(request, Method::GET), options)
    }

    /// Send a request as `POST`.
    pub fn post(&self, request: Request<Bytes>, options: RequestOptions) -> ResponseFuture {
        self.execute(with_method(request, Method::POST), options)
    }

    /// Send a request as `PUT`.
    pub fn put(&self, request: Request<Bytes>, options: RequestOptions) -> ResponseFuture {
        self.execute(with_method(request, Method::PUT), options)
    }

    /// Send a request as `DELETE`.
    pub fn delete(&self, request: Request<Bytes>, options: RequestOptions) -> ResponseFuture {
        self.execute(with_method(request, Method::DELETE), options)
    }

    /// Send a request as `HEAD`.
    pub fn head(&self, request: Request<Bytes>, options: RequestOptions) -> ResponseFuture {
        self.execute(with_method(request, Method::HEAD), options)
    }

    /// Send a request as `OPTIONS`.
    pub fn options(&self, request: Request<Bytes>, options: RequestOptions) -> ResponseFuture {
        self.execute(with_method(request, Method::OPTIONS), options)
    }
}

fn with_method(mut request: Request<Bytes>, method: Method) -> Request<Bytes> {
    *request.method_mut() = method;
    request
}

#[cfg(test)]
mod tests {

    use static_assertions::assert_impl_all;

    use super::conn::mock::{MockConnection, MockTransport};
    use super::*;

    assert_impl_all!(Client: Send, Sync, Clone);

    fn ok_transport() -> (MockTransport, MockConnection) {
        let conn = MockConnection::new().respond("HTTP/1.1 200 OK\r\n\r\n");
        (MockTransport::new().with_connection(conn.clone()), conn)
    }

    #[test]
    fn method_sugar_sets_method() {
        let cases: [(fn(&Client<MockTransport>, Request<Bytes>) -> ResponseFuture, &str); 6] = [
            (|c, r| c.get(r, RequestOptions::default()), "GET"),
            (|c, r| c.post(r, RequestOptions::default()), "POST"),
            (|c, r| c.put(r, RequestOptions::default()), "PUT"),
            (|c, r| c.delete(r, RequestOptions::default()), "DELETE"),
            (|c, r| c.head(r, RequestOptions::default()), "HEAD"),
            (|c, r| c.options(r, RequestOptions::default()), "OPTIONS"),
        ];

        for (send, method) in cases {
            let (transport, conn) = ok_transport();
            let client = Client::with_transport(transport, ClientOptions::default()).unwrap();
            let request = Request::post("http://example.com/").body(Bytes::new()).unwrap();

            send(&client, request).wait().unwrap();
            assert!(conn
                .written()
                .starts_with(format!("{method} / HTTP/1.1\r\n").as_bytes()));
        }
    }

    #[test]
    fn execute_keeps_request_method() {
        let (transport, conn) = ok_transport();
        let client = Client::with_transport(transport, ClientOptions::default()).unwrap();
        let request = Request::patch("http://example.com/").body(Bytes::new()).unwrap();

        client.execute(request, RequestOptions::default()).wait().unwrap();
        assert!(conn.written().starts_with(b"PATCH / HTTP/1.1\r\n"));
    }
}
