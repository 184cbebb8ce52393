//! The one completed message a stream delivers upward.

use bytes::Bytes;

use crate::error::ErrorCode;
use crate::hpack::HeaderField;

/// A fully assembled response: headers, body, and any trailers, delivered
/// exactly once when the stream reaches the closed state.
#[derive(Debug, Default)]
pub struct Response {
    headers: Vec<HeaderField>,
    trailers: Vec<HeaderField>,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(
        headers: Vec<HeaderField>,
        trailers: Vec<HeaderField>,
        body: Bytes,
    ) -> Self {
        Self {
            headers,
            trailers,
            body,
        }
    }

    /// The `:status` pseudo-header, parsed.
    pub fn status(&self) -> Option<u16> {
        self.header(b":status")
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|v| v.parse().ok())
    }

    /// All header fields, pseudo-headers included, in wire order.
    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    /// Trailing header fields, if the peer sent any.
    pub fn trailers(&self) -> &[HeaderField] {
        &self.trailers
    }

    /// First header value matching `name`. Field names are lowercase on
    /// the wire, so the lookup is byte-exact.
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_slice())
    }

    /// The response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response, returning the body.
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// Terminal status of a completed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Both directions finished normally; the response is complete.
    Complete,
    /// The peer reset the stream with RST_STREAM.
    Reset(ErrorCode),
    /// The stream was beyond a received GOAWAY's last-stream-id; the peer
    /// never processed it, so it is safe to retry elsewhere.
    Retryable,
    /// Cancelled locally (caller request or connection shutdown).
    Canceled,
    /// Torn down by a connection-level error.
    Failed(ErrorCode),
    /// The transport dropped before the stream finished.
    Disconnected,
}

impl StreamOutcome {
    /// Whether a higher layer may safely resubmit the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Retryable | Self::Reset(ErrorCode::RefusedStream)
        )
    }
}
