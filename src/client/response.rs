//! The response produced by an exchange.

use bytes::{Bytes, BytesMut};
use http::StatusCode;

/// An HTTP/1.x response.
///
/// Built up while the exchange reads from the connection, and handed to the
/// caller once the peer closes the connection.
#[derive(Debug, Clone)]
pub struct Response {
    version: String,
    status: StatusCode,
    status_message: String,
    headers: Vec<(String, String)>,
    body: Vec<Bytes>,
}

impl Response {
    pub(crate) fn new(version: String, status: StatusCode, status_message: String) -> Self {
        Self {
            version,
            status,
            status_message,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// The protocol version from the status line, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase from the status line.
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// All headers, in the order they were received.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The first header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body fragments, in the order they were received.
    pub fn body(&self) -> &[Bytes] {
        &self.body
    }

    /// The whole body as a single buffer.
    pub fn body_bytes(&self) -> Bytes {
        match self.body.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            fragments => {
                let mut body = BytesMut::with_capacity(fragments.iter().map(Bytes::len).sum());
                for fragment in fragments {
                    body.extend_from_slice(fragment);
                }
                body.freeze()
            }
        }
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body_bytes()).into_owned()
    }

    pub(crate) fn add_header(&mut self, key: String, value: String) {
        self.headers.push((key, value));
    }

    pub(crate) fn append_body(&mut self, fragment: Bytes) {
        if !fragment.is_empty() {
            self.body.push(fragment);
        }
    }
}
