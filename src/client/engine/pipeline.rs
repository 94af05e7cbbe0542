//! The exchange state machine.
//!
//! An exchange moves through the stages in order: resolve, connect, write
//! headers, write body, read status, read headers, then read body until the
//! peer closes the connection. Each stage checks whether the deadline has
//! already expired, then races its I/O against the deadline.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, trace};

use super::context::RequestContext;
use super::deadline::TimerState;
use crate::client::codec;
use crate::client::conn::{find, Connection, Transport};
use crate::client::{Error, Response};

/// Terminates the enclosing stage with a timeout if the deadline expires
/// before `$io` completes.
macro_rules! race {
    ($ctx:ident, $io:expr) => {
        match $ctx.deadline.race($io).await {
            Some(outcome) => outcome,
            None => return Err($ctx.expire().await),
        }
    };
}

#[derive(Debug)]
enum Stage {
    Resolve,
    Connect(Vec<SocketAddr>),
    WriteHeaders,
    WriteBody,
    ReadStatus,
    ReadHeaders(Response),
    ReadBody(Response),
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Connect(_) => "connect",
            Stage::WriteHeaders => "write-headers",
            Stage::WriteBody => "write-body",
            Stage::ReadStatus => "read-status",
            Stage::ReadHeaders(_) => "read-headers",
            Stage::ReadBody(_) => "read-body",
        }
    }
}

enum Step {
    Next(Stage),
    Done(Response),
}

/// Drive one exchange to completion.
///
/// Delivers exactly one outcome to the context's completion slot and returns
/// the final state of the exchange deadline.
pub(crate) async fn drive<T>(transport: Arc<T>, mut ctx: RequestContext<T::Connection>) -> TimerState
where
    T: Transport,
{
    let mut stage = Stage::Resolve;
    loop {
        if ctx.timed_out {
            return ctx.set_error(Error::Timeout).await;
        }

        trace!(stage = stage.name(), "stage");
        match advance(transport.as_ref(), &mut ctx, stage).await {
            Ok(Step::Next(next)) => stage = next,
            Ok(Step::Done(response)) => return ctx.finalize(response).await,
            Err(error) => return ctx.set_error(error).await,
        }
    }
}

async fn advance<T>(
    transport: &T,
    ctx: &mut RequestContext<T::Connection>,
    stage: Stage,
) -> Result<Step, Error>
where
    T: Transport,
{
    match stage {
        Stage::Resolve => {
            let candidates = race!(ctx, transport.resolve(&ctx.host, ctx.port)).map_err(Error::Resolve)?;
            if candidates.is_empty() {
                return Err(Error::Resolve(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no addresses found for {}", ctx.host),
                )));
            }

            trace!(candidates = candidates.len(), "resolved");
            Ok(Step::Next(Stage::Connect(candidates)))
        }

        Stage::Connect(candidates) => {
            let mut last_error = None;
            for addr in candidates {
                match race!(ctx, ctx.connection.connect(addr, &ctx.host)) {
                    Ok(()) => {
                        debug!(%addr, "connected");
                        return Ok(Step::Next(Stage::WriteHeaders));
                    }
                    Err(error) => {
                        debug!(%addr, %error, "connection attempt failed");
                        last_error = Some(error);
                    }
                }
            }

            Err(Error::Connect(last_error.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidates to connect to")
            })))
        }

        Stage::WriteHeaders => {
            ctx.write_buffer.clear();
            codec::encode_head(&ctx.request, &mut ctx.write_buffer)?;

            let written = race!(ctx, ctx.connection.write(&ctx.write_buffer)).map_err(Error::Write)?;
            ctx.record_written(written);
            Ok(Step::Next(Stage::WriteBody))
        }

        Stage::WriteBody => {
            if !ctx.request.body().is_empty() {
                let written =
                    race!(ctx, ctx.connection.write(&ctx.request.body()[..])).map_err(Error::Write)?;
                ctx.record_written(written);
            }
            Ok(Step::Next(Stage::ReadStatus))
        }

        Stage::ReadStatus => {
            let line = read_line(ctx).await?;
            let response = codec::parse_status_line(&line)?;
            trace!(version = response.version(), status = %response.status(), "status line");
            Ok(Step::Next(Stage::ReadHeaders(response)))
        }

        Stage::ReadHeaders(mut response) => {
            let mut block = BytesMut::new();
            loop {
                let line = read_line(ctx).await?;
                if line[..] == b"\r\n"[..] {
                    break;
                }
                block.extend_from_slice(&line);
            }
            codec::parse_headers(&block, &mut response);
            trace!(headers = response.headers().len(), "headers");

            // Body bytes which arrived along with the headers.
            if !ctx.read_buffer.is_empty() {
                response.append_body(ctx.read_buffer.split().freeze());
            }

            Ok(Step::Next(Stage::ReadBody(response)))
        }

        Stage::ReadBody(mut response) => {
            let n = match race!(ctx, ctx.connection.read(&mut ctx.read_buffer)) {
                Ok(n) => n,
                Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => 0,
                Err(error) => return Err(Error::Read(error)),
            };
            ctx.record_read(n);

            if n == 0 {
                return Ok(Step::Done(response));
            }

            response.append_body(ctx.read_buffer.split().freeze());
            Ok(Step::Next(Stage::ReadBody(response)))
        }
    }
}

/// Read one line, including its `\r\n` terminator.
///
/// Lines already buffered are returned without reading. Every completed read
/// is counted, including one which ends the stream.
async fn read_line<C>(ctx: &mut RequestContext<C>) -> Result<BytesMut, Error>
where
    C: Connection,
{
    loop {
        if let Some(position) = find(&ctx.read_buffer, b"\r\n") {
            return Ok(ctx.read_buffer.split_to(position + 2));
        }

        let n = race!(ctx, ctx.connection.read(&mut ctx.read_buffer)).map_err(Error::Read)?;
        ctx.record_read(n);
        if n == 0 {
            return Err(Error::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before end of line",
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;
    use http::{Request, StatusCode};
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    use super::super::deadline::Deadline;
    use super::*;
    use crate::client::conn::mock::{MockConnection, MockTransport};
    use crate::client::options::{Direction, RequestOptions};

    const OK_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n";

    fn get(uri: &str) -> Request<Bytes> {
        Request::get(uri).body(Bytes::new()).unwrap()
    }

    async fn exchange(
        transport: MockTransport,
        request: Request<Bytes>,
        options: RequestOptions,
        timeout: Option<Duration>,
    ) -> (Result<Response, Error>, TimerState) {
        let (tx, rx) = oneshot::channel();
        let connection = transport.connection(request.uri());
        let target = codec::host_and_port(request.uri()).unwrap();
        let deadline = Deadline::new(timeout.map(|timeout| Instant::now() + timeout));
        let ctx = RequestContext::new(connection, request, options, target, deadline, tx);

        let state = drive(Arc::new(transport), ctx).await;
        (rx.await.unwrap(), state)
    }

    #[tokio::test]
    async fn successful_exchange() {
        let conn = MockConnection::new()
            .respond(OK_RESPONSE)
            .respond("hello")
            .respond("");
        let transport = MockTransport::new().with_connection(conn.clone());

        let (result, timer) = exchange(
            transport.clone(),
            get("http://example.com/hello"),
            RequestOptions::default(),
            Some(Duration::from_secs(5)),
        )
        .await;

        let response = result.unwrap();
        assert_eq!(response.version(), "HTTP/1.1");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.status_message(), "OK");
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.text(), "hello");
        assert_eq!(timer, TimerState::Canceled);

        assert_eq!(transport.lookups(), vec![("example.com".to_owned(), 80)]);
        assert_eq!(
            conn.written(),
            Bytes::from_static(b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n")
        );
        assert_eq!(conn.disconnects(), 1);
    }

    #[tokio::test]
    async fn body_in_same_read_as_headers() {
        let conn = MockConnection::new()
            .respond("HTTP/1.1 200 OK\r\nServer: mock\r\n\r\nfirst ")
            .respond("second");
        let transport = MockTransport::new().with_connection(conn);

        let (result, _) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;

        let response = result.unwrap();
        assert_eq!(response.header("server"), Some("mock"));
        assert_eq!(response.body().len(), 2);
        assert_eq!(response.text(), "first second");
    }

    #[tokio::test]
    async fn response_without_headers() {
        let conn = MockConnection::new().respond("HTTP/1.0 204 No Content\r\n\r\n");
        let transport = MockTransport::new().with_connection(conn);

        let (result, timer) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;

        let response = result.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().is_empty());
        assert!(response.body().is_empty());
        assert_eq!(timer, TimerState::Disarmed);
    }

    #[tokio::test]
    async fn status_line_in_its_own_read_without_headers() {
        let conn = MockConnection::new()
            .respond("HTTP/1.1 200 OK\r\n")
            .respond("\r\nbody");
        let transport = MockTransport::new().with_connection(conn);

        let (result, _) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;

        let response = result.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().is_empty());
        assert_eq!(response.text(), "body");
    }

    #[tokio::test]
    async fn header_block_split_across_reads() {
        let conn = MockConnection::new()
            .respond("HTTP/1.1 200 OK\r\nServer: mo")
            .respond("ck\r\nX-Split: yes\r")
            .respond("\n")
            .respond("\r")
            .respond("\ndone");
        let transport = MockTransport::new().with_connection(conn);

        let (result, _) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;

        let response = result.unwrap();
        assert_eq!(response.header("server"), Some("mock"));
        assert_eq!(response.header("x-split"), Some("yes"));
        assert_eq!(response.text(), "done");
    }

    #[tokio::test]
    async fn headers_cut_short_is_a_read_error() {
        let conn = MockConnection::new().respond("HTTP/1.1 200 OK\r\nServer: mock\r\n");
        let transport = MockTransport::new().with_connection(conn);

        let (result, _) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;

        match result {
            Err(Error::Read(error)) => assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_body_is_written() {
        let conn = MockConnection::new().respond("HTTP/1.1 201 Created\r\n\r\n");
        let transport = MockTransport::new().with_connection(conn.clone());
        let request = Request::post("http://example.com/items")
            .body(Bytes::from_static(b"{}"))
            .unwrap();

        let (result, _) = exchange(transport, request, RequestOptions::default(), None).await;
        assert_eq!(result.unwrap().status(), StatusCode::CREATED);

        assert_eq!(conn.writes(), 2);
        assert_eq!(
            conn.written(),
            Bytes::from_static(
                b"POST /items HTTP/1.1\r\nHost: example.com\r\nContent-Length: 2\r\n\r\n{}"
            )
        );
    }

    #[tokio::test]
    async fn connect_falls_back_across_candidates() {
        let a: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:80".parse().unwrap();
        let c: SocketAddr = "10.0.0.3:80".parse().unwrap();

        let conn = MockConnection::new().refuse(a).respond(OK_RESPONSE);
        let transport = MockTransport::new()
            .with_candidates(vec![a, b, c])
            .with_connection(conn.clone());

        let (result, _) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(conn.attempts(), vec![a, b]);
    }

    #[tokio::test]
    async fn connect_surfaces_last_error() {
        let a: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:80".parse().unwrap();

        let conn = MockConnection::new().refuse(a).refuse(b);
        let transport = MockTransport::new()
            .with_candidates(vec![a, b])
            .with_connection(conn.clone());

        let (result, timer) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            Some(Duration::from_secs(5)),
        )
        .await;

        match result {
            Err(Error::Connect(error)) => {
                assert_eq!(error.kind(), io::ErrorKind::ConnectionRefused)
            }
            other => panic!("expected connect error, got {other:?}"),
        }
        assert_eq!(conn.attempts(), vec![a, b]);
        assert!(conn.written().is_empty());
        assert_eq!(timer, TimerState::Canceled);
    }

    #[tokio::test]
    async fn no_candidates_is_a_resolve_error() {
        let transport = MockTransport::new().with_candidates(Vec::new());
        let (result, _) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::Resolve(_))));
    }

    #[tokio::test]
    async fn resolve_error() {
        let conn = MockConnection::new();
        let transport = MockTransport::new()
            .with_resolve_error(io::ErrorKind::NotFound)
            .with_connection(conn.clone());

        let (result, _) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::Resolve(_))));
        assert!(conn.attempts().is_empty());
    }

    #[tokio::test]
    async fn write_error_terminates() {
        let conn = MockConnection::new()
            .fail_writes(io::ErrorKind::BrokenPipe)
            .respond(OK_RESPONSE);
        let transport = MockTransport::new().with_connection(conn);

        let (result, _) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::Write(_))));
    }

    #[tokio::test]
    async fn read_error_discards_partial_body() {
        let conn = MockConnection::new()
            .respond(OK_RESPONSE)
            .respond("partial")
            .read_error(io::ErrorKind::ConnectionReset);
        let transport = MockTransport::new().with_connection(conn);

        let (result, _) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;
        match result {
            Err(Error::Read(error)) => assert_eq!(error.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_status_line() {
        let conn = MockConnection::new().respond("SSH-2.0-OpenSSH_9.0\r\n");
        let transport = MockTransport::new().with_connection(conn);

        let (result, _) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn unsupported_version_is_invalid_request() {
        let conn = MockConnection::new().respond(OK_RESPONSE);
        let transport = MockTransport::new().with_connection(conn.clone());
        let request = Request::get("http://example.com/")
            .version(http::Version::HTTP_2)
            .body(Bytes::new())
            .unwrap();

        let (result, _) = exchange(transport, request, RequestOptions::default(), None).await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert_eq!(conn.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_while_reading_body() {
        let conn = MockConnection::new()
            .respond(OK_RESPONSE)
            .respond("slow")
            .delay(Duration::from_secs(60))
            .respond("never");
        let transport = MockTransport::new().with_connection(conn.clone());

        let (result, timer) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            Some(Duration::from_millis(100)),
        )
        .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(timer, TimerState::Fired);
        assert_eq!(conn.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_while_resolving() {
        let conn = MockConnection::new();
        let transport = MockTransport::new()
            .with_resolve_delay(Duration::from_secs(10))
            .with_connection(conn.clone());

        let (result, timer) = exchange(
            transport,
            get("http://example.com/"),
            RequestOptions::default(),
            Some(Duration::from_millis(10)),
        )
        .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(timer, TimerState::Fired);
        assert!(conn.attempts().is_empty());
    }

    #[tokio::test]
    async fn progress_is_monotonic() {
        let conn = MockConnection::new()
            .respond(OK_RESPONSE)
            .respond("abc")
            .respond("defg");
        let transport = MockTransport::new().with_connection(conn.clone());

        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let options = RequestOptions::default().with_progress(move |direction, total| {
            sink.lock().unwrap().push((direction, total));
        });
        let request = Request::put("http://example.com/")
            .body(Bytes::from_static(b"payload"))
            .unwrap();

        let (result, _) = exchange(transport, request, options, None).await;
        assert!(result.is_ok());

        let reports = reports.lock().unwrap();
        for direction in [Direction::BytesWritten, Direction::BytesRead] {
            let totals: Vec<u64> = reports
                .iter()
                .filter(|(d, _)| *d == direction)
                .map(|(_, total)| *total)
                .collect();
            assert!(!totals.is_empty());
            assert!(totals.windows(2).all(|pair| pair[0] <= pair[1]));
        }

        let written = reports
            .iter()
            .filter(|(d, _)| *d == Direction::BytesWritten)
            .map(|(_, total)| *total)
            .max()
            .unwrap();
        assert_eq!(written, conn.written().len() as u64);

        // One report per completed read: the head, two body chunks and the
        // zero-byte read which ends the stream.
        let read: Vec<u64> = reports
            .iter()
            .filter(|(d, _)| *d == Direction::BytesRead)
            .map(|(_, total)| *total)
            .collect();
        let total = (OK_RESPONSE.len() + 7) as u64;
        assert_eq!(
            read,
            vec![OK_RESPONSE.len() as u64, (OK_RESPONSE.len() + 3) as u64, total, total]
        );
    }
}
