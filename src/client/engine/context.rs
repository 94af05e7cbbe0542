use bytes::{Bytes, BytesMut};
use http::Request;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::deadline::{Deadline, TimerState};
use crate::client::conn::Connection;
use crate::client::options::{Direction, RequestOptions};
use crate::client::{Error, Response};

/// Sender half of the completion slot.
pub(crate) type Completion = oneshot::Sender<Result<Response, Error>>;

/// State owned by one exchange for its whole lifetime.
///
/// The context moves into the exchange task and is handed from stage to
/// stage. It is consumed by [`finalize`][Self::finalize] or
/// [`set_error`][Self::set_error], which are the only ways an exchange ends.
#[derive(Debug)]
pub(crate) struct RequestContext<C> {
    pub(super) connection: C,
    pub(super) request: Request<Bytes>,
    pub(super) options: RequestOptions,
    pub(super) host: Box<str>,
    pub(super) port: u16,
    pub(super) write_buffer: BytesMut,
    pub(super) read_buffer: BytesMut,
    pub(super) bytes_written: u64,
    pub(super) bytes_read: u64,
    pub(super) timed_out: bool,
    pub(super) deadline: Deadline,
    completion: Completion,
}

impl<C: Connection> RequestContext<C> {
    pub(crate) fn new(
        connection: C,
        request: Request<Bytes>,
        options: RequestOptions,
        (host, port): (Box<str>, u16),
        deadline: Deadline,
        completion: Completion,
    ) -> Self {
        Self {
            connection,
            request,
            options,
            host,
            port,
            write_buffer: BytesMut::new(),
            read_buffer: BytesMut::new(),
            bytes_written: 0,
            bytes_read: 0,
            timed_out: false,
            deadline,
            completion,
        }
    }

    pub(super) fn record_written(&mut self, n: usize) {
        self.bytes_written += n as u64;
        if let Some(progress) = &self.options.progress {
            progress(Direction::BytesWritten, self.bytes_written);
        }
    }

    pub(super) fn record_read(&mut self, n: usize) {
        self.bytes_read += n as u64;
        if let Some(progress) = &self.options.progress {
            progress(Direction::BytesRead, self.bytes_read);
        }
    }

    /// Mark the exchange as timed out and close the connection.
    ///
    /// Returns the error the current stage should fail with.
    pub(super) async fn expire(&mut self) -> Error {
        debug!("exchange deadline expired");
        self.timed_out = true;
        self.connection.disconnect().await;
        Error::Timeout
    }

    /// End the exchange with a response.
    pub(super) async fn finalize(self, response: Response) -> TimerState {
        trace!(status = %response.status(), bytes.read = self.bytes_read, "exchange complete");
        self.finish(Ok(response)).await
    }

    /// End the exchange with an error. Once timed out, the error is always
    /// [`Error::Timeout`].
    pub(super) async fn set_error(self, error: Error) -> TimerState {
        let error = if self.timed_out { Error::Timeout } else { error };
        debug!(%error, "exchange failed");
        self.finish(Err(error)).await
    }

    async fn finish(mut self, result: Result<Response, Error>) -> TimerState {
        self.deadline.cancel();
        self.connection.disconnect().await;

        if self.completion.send(result).is_err() {
            trace!("response future dropped before completion");
        }
        self.deadline.state()
    }
}
