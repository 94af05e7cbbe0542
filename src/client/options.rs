//! Client and per-request configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Which side of the exchange a progress report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bytes written to the connection (the request).
    BytesWritten,

    /// Bytes read from the connection (the response).
    BytesRead,
}

/// Progress callback, called with the cumulative byte count for a direction
/// after every completed write or read.
pub type Progress = Arc<dyn Fn(Direction, u64) + Send + Sync + 'static>;

/// Configuration shared by every exchange made through a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Deadline for a whole exchange, from resolution to the end of the body.
    ///
    /// A zero duration disables the deadline.
    pub timeout: Duration,

    /// Value for the `User-Agent` header when a request has none.
    pub user_agent: String,

    /// Whether resolved addresses should be cached for the lifetime of the client.
    pub cache_resolved: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("wireline/", env!("CARGO_PKG_VERSION")).to_owned(),
            cache_resolved: false,
        }
    }
}

impl ClientOptions {
    /// Set the exchange deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the default user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Cache resolved addresses.
    pub fn with_cache_resolved(mut self, cache: bool) -> Self {
        self.cache_resolved = cache;
        self
    }
}

/// Configuration for a single exchange.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Overrides [`ClientOptions::timeout`] for this exchange.
    pub timeout: Option<Duration>,

    /// Called after every write and read.
    pub progress: Option<Progress>,

    /// Whether redirects should be followed.
    ///
    /// Redirects are not followed yet, so this has no effect.
    pub follow_redirects: bool,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("progress", &self.progress.is_some())
            .field("follow_redirects", &self.follow_redirects)
            .finish()
    }
}

impl RequestOptions {
    /// Set the deadline for this exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a progress callback for this exchange.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(Direction, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Set whether redirects should be followed.
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }
}
