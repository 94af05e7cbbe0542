//! Wireline
//!
//! An asynchronous engine for driving single HTTP/1.x exchanges over a socket.
//!
//! Each exchange resolves the target host, connects to the first reachable
//! candidate address, writes the request, and reads the response until the
//! peer closes the connection. A single deadline covers the whole exchange.
//!
//! ```no_run
//! # use bytes::Bytes;
//! # use wireline::client::{Client, ClientOptions, RequestOptions};
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = Client::new(ClientOptions::default())?;
//! let request = http::Request::builder()
//!     .uri("http://example.com/")
//!     .body(Bytes::new())?;
//! let response = client.get(request, RequestOptions::default()).await?;
//! println!("{} {}", response.status(), response.text());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod client;
pub use client::{Client, Error, Response};

/// Boxed error type used where the concrete error is not important.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A pinned, boxed future which can be sent across threads.
pub use futures_util::future::BoxFuture;
