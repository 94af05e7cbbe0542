//! The execution engine.
//!
//! The engine owns a worker thread running a single-threaded tokio runtime.
//! Submitted exchanges are queued to the worker and run there as tasks, so
//! no two exchange steps ever run at the same time. Each exchange owns its
//! [`RequestContext`] outright; nothing is shared between exchanges except
//! the transport.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::thread;

use bytes::Bytes;
use http::header::USER_AGENT;
use http::{HeaderValue, Request};
use pin_project::pin_project;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, warn, Instrument as _};

use self::context::RequestContext;
use self::deadline::Deadline;
use super::codec;
use super::conn::Transport;
use super::options::{ClientOptions, RequestOptions};
use super::{Error, Response};
use crate::BoxFuture;

mod context;
mod deadline;
mod pipeline;

type Job = BoxFuture<'static, ()>;

/// Drives exchanges on a dedicated worker thread.
pub(crate) struct Engine<T> {
    transport: Arc<T>,
    options: ClientOptions,
    queue: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl<T> fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("running", &self.queue.is_some())
            .finish()
    }
}

impl<T> Engine<T>
where
    T: Transport,
{
    /// Start the worker thread.
    pub(crate) fn new(transport: T, options: ClientOptions) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (queue, jobs) = mpsc::unbounded_channel();

        let worker = thread::Builder::new()
            .name("wireline-engine".into())
            .spawn(move || runtime.block_on(run(jobs)))?;

        Ok(Self {
            transport: Arc::new(transport),
            options,
            queue: Some(queue),
            worker: Some(worker),
        })
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Submit an exchange, returning a handle to its eventual outcome.
    pub(crate) fn execute(
        &self,
        mut request: Request<Bytes>,
        options: RequestOptions,
    ) -> ResponseFuture {
        let (completion, outcome) = oneshot::channel();
        let future = ResponseFuture { outcome };

        if !request.headers().contains_key(USER_AGENT) {
            match HeaderValue::from_str(&self.options.user_agent) {
                Ok(value) => {
                    request.headers_mut().insert(USER_AGENT, value);
                }
                Err(_) => warn!(user_agent = %self.options.user_agent, "invalid default user agent"),
            }
        }

        let target = match codec::host_and_port(request.uri()) {
            Ok(target) => target,
            Err(error) => {
                let _ = completion.send(Err(error));
                return future;
            }
        };

        let timeout = options.timeout.unwrap_or(self.options.timeout);
        let expires_at = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        let span = tracing::debug_span!(
            "exchange",
            method = %request.method(),
            uri = %request.uri(),
        );
        let connection = self.transport.connection(request.uri());
        let ctx = RequestContext::new(
            connection,
            request,
            options,
            target,
            Deadline::new(expires_at),
            completion,
        );

        let transport = self.transport.clone();
        let job: Job = Box::pin(
            async move {
                pipeline::drive(transport, ctx).await;
            }
            .instrument(span),
        );

        match &self.queue {
            Some(queue) if queue.send(job).is_ok() => {}
            _ => debug!("engine is not running, dropping exchange"),
        }

        future
    }
}

impl<T> Drop for Engine<T> {
    fn drop(&mut self) {
        drop(self.queue.take());
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                // Dropped by a callback running on the worker; it stops on its own
                // once the queue drains.
                return;
            }
            if worker.join().is_err() {
                error!("client engine worker panicked");
            }
        }
    }
}

/// The worker loop: spawn queued exchanges until the queue closes, then wait
/// for the exchanges still in flight.
async fn run(mut jobs: mpsc::UnboundedReceiver<Job>) {
    let mut exchanges = JoinSet::new();

    loop {
        tokio::select! {
            job = jobs.recv() => match job {
                Some(job) => {
                    exchanges.spawn(job);
                }
                None => break,
            },
            Some(joined) = exchanges.join_next(), if !exchanges.is_empty() => reap(joined),
        }
    }

    debug!(in_flight = exchanges.len(), "client engine draining");
    while let Some(joined) = exchanges.join_next().await {
        reap(joined);
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(join_error) = joined {
        if join_error.is_panic() {
            error!("exchange panicked");
        }
    }
}

/// The eventual outcome of an exchange.
///
/// Resolves to exactly one [`Response`] or [`Error`]. Await it from async
/// code, or call [`wait`][ResponseFuture::wait] to block a thread outside a
/// runtime.
#[derive(Debug)]
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture {
    #[pin]
    outcome: oneshot::Receiver<Result<Response, Error>>,
}

impl ResponseFuture {
    /// Block the current thread until the exchange completes.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn wait(self) -> Result<Response, Error> {
        self.outcome.blocking_recv().unwrap_or(Err(Error::Shutdown))
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.project().outcome.poll(cx)) {
            Ok(outcome) => Poll::Ready(outcome),
            Err(_) => Poll::Ready(Err(Error::Shutdown)),
        }
    }
}
