//! HTTP/1.x wire format: request heads out, status lines and headers in.

use bytes::{BufMut as _, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{Request, StatusCode, Uri, Version};
use tracing::warn;

use super::{Error, Response};

/// Extract the host to resolve and the port to connect to.
///
/// The port defaults by scheme: 80 for `http` (or no scheme) and 443 for
/// `https`. Other schemes must name a port explicitly.
pub(crate) fn host_and_port(uri: &Uri) -> Result<(Box<str>, u16), Error> {
    let host = uri
        .host()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| Error::InvalidRequest("missing host in URI".into()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = match uri.port_u16() {
        Some(port) => port,
        None => match uri.scheme_str() {
            None | Some("http") => 80,
            Some("https") => 443,
            Some(scheme) => {
                return Err(Error::InvalidRequest(format!(
                    "missing port in URI for {scheme} scheme"
                )))
            }
        },
    };

    Ok((host.into(), port))
}

/// Serialize the request line and headers, including the blank line which
/// ends the head.
///
/// A `Host` header is added from the URI when the request has none, and a
/// `Content-Length` header when the body is not empty and no framing header
/// is present.
pub(crate) fn encode_head(request: &Request<Bytes>, buf: &mut BytesMut) -> Result<(), Error> {
    let version: &[u8] = match request.version() {
        Version::HTTP_10 => b"HTTP/1.0",
        Version::HTTP_11 => b"HTTP/1.1",
        version => {
            return Err(Error::InvalidRequest(format!(
                "unsupported version {version:?}"
            )))
        }
    };

    let uri = request.uri();
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let target = if target.is_empty() { "/" } else { target };

    buf.put_slice(request.method().as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(target.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(version);
    buf.put_slice(b"\r\n");

    let headers = request.headers();
    if !headers.contains_key(HOST) {
        let host = uri
            .host()
            .ok_or_else(|| Error::InvalidRequest("missing host in URI".into()))?;
        buf.put_slice(b"Host: ");
        buf.put_slice(host.as_bytes());
        if let Some(port) = uri.port() {
            buf.put_u8(b':');
            buf.put_slice(port.as_str().as_bytes());
        }
        buf.put_slice(b"\r\n");
    }

    for (name, value) in headers {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    let body = request.body();
    if !body.is_empty() && !headers.contains_key(CONTENT_LENGTH) && !headers.contains_key(TRANSFER_ENCODING)
    {
        buf.put_slice(b"Content-Length: ");
        buf.put_slice(body.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    Ok(())
}

/// Parse `VERSION STATUS-CODE STATUS-MESSAGE` into an empty response.
///
/// The message may be empty; surrounding whitespace and the line terminator
/// are trimmed.
pub(crate) fn parse_status_line(line: &[u8]) -> Result<Response, Error> {
    let line = std::str::from_utf8(line)
        .map_err(|_| Error::Protocol("status line is not valid UTF-8".into()))?;
    let line = line.trim_end_matches(['\r', '\n']);

    let (version, rest) = next_field(line);
    if !version.starts_with("HTTP/") {
        return Err(Error::Protocol(format!("malformed status line: {line:?}")));
    }
    let (code, message) = next_field(rest);
    let status = code
        .parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| Error::Protocol(format!("invalid status code: {line:?}")))?;
    let message = message.trim();

    Ok(Response::new(version.to_owned(), status, message.to_owned()))
}

/// Split off the first whitespace-delimited field, skipping any run of
/// whitespace before it.
fn next_field(line: &str) -> (&str, &str) {
    let line = line.trim_start();
    line.split_once(char::is_whitespace).unwrap_or((line, ""))
}

/// Parse a header block into the response, stopping at the first empty line.
///
/// Each line is split at its first colon, and one run of spaces after the
/// colon is skipped. Lines without a colon are skipped.
pub(crate) fn parse_headers(block: &[u8], response: &mut Response) {
    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }

        let Some(colon) = line.iter().position(|&b| b == b':') else {
            warn!(line = %String::from_utf8_lossy(line), "skipping header line without a colon");
            continue;
        };

        let key = &line[..colon];
        let value = &line[colon + 1..];
        let start = value.iter().position(|&b| b != b' ').unwrap_or(value.len());

        response.add_header(
            String::from_utf8_lossy(key).into_owned(),
            String::from_utf8_lossy(&value[start..]).into_owned(),
        );
    }
}
