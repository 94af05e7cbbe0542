//! DNS resolution utilities.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::BoxFuture;

type Cache = Arc<Mutex<HashMap<(Box<str>, u16), Vec<SocketAddr>>>>;

/// GetAddrInfo based resolver.
///
/// This resolver uses the `getaddrinfo` system call to resolve
/// hostnames to IP addresses via the operating system. Lookups run on the
/// blocking thread pool.
///
/// When caching is enabled, successful lookups are kept for the lifetime of
/// the resolver (and its clones).
#[derive(Debug, Default, Clone)]
pub struct GaiResolver {
    cache: Option<Cache>,
}

impl GaiResolver {
    /// Create a new `GaiResolver`.
    pub fn new() -> Self {
        Self { cache: None }
    }

    /// Create a new `GaiResolver` which caches its results.
    pub fn cached() -> Self {
        Self {
            cache: Some(Default::default()),
        }
    }

    /// Whether this resolver caches its results.
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Resolve `host` and `port` to socket addresses.
    pub fn resolve(&self, host: &str, port: u16) -> BoxFuture<'static, io::Result<Vec<SocketAddr>>> {
        let key: (Box<str>, u16) = (host.into(), port);

        if let Some(cache) = &self.cache {
            if let Some(addrs) = cache.lock().get(&key) {
                tracing::trace!(host = %key.0, port, "dns cache hit");
                return Box::pin(std::future::ready(Ok(addrs.clone())));
            }
        }

        let cache = self.cache.clone();
        let span = tracing::Span::current();
        Box::pin(async move {
            let lookup = key.clone();
            let addrs = tokio::task::spawn_blocking(move || {
                tracing::trace_span!(parent: &span, "getaddrinfo").in_scope(|| {
                    tracing::trace!("dns resolution starting");
                    (lookup.0.as_ref(), lookup.1)
                        .to_socket_addrs()
                        .map(|addrs| addrs.collect::<Vec<_>>())
                })
            })
            .await
            .map_err(|join_err| {
                if join_err.is_cancelled() {
                    io::Error::new(io::ErrorKind::Interrupted, join_err)
                } else {
                    io::Error::other(join_err)
                }
            })??;

            if let Some(cache) = cache {
                cache.lock().insert(key, addrs.clone());
            }

            Ok(addrs)
        })
    }
}
