//! Per-stream state (RFC 7540 Section 5.1).

use bytes::{Bytes, BytesMut};

use crate::admission::RequestId;
use crate::flowcontrol::Window;
use crate::hpack::HeaderField;
use crate::response::Response;

/// Stream lifecycle states (RFC 7540 Section 5.1).
///
/// `ReservedLocal` exists for completeness of the state set; a client
/// never sends PUSH_PROMISE, so nothing transitions into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Request body bytes not yet released by flow control.
#[derive(Debug)]
pub(crate) struct PendingBody {
    pub data: Bytes,
    pub sent: usize,
}

/// State record for one stream, owned by the connection's registry.
pub(crate) struct StreamInner {
    pub state: StreamState,
    pub send_window: Window,
    pub recv_window: Window,
    /// Response headers received so far.
    pub headers: Vec<HeaderField>,
    /// Trailing headers, if a second block arrives.
    pub trailers: Vec<HeaderField>,
    /// Accumulated response body.
    pub body: BytesMut,
    /// Outgoing body bytes awaiting window credit.
    pub pending_body: Option<PendingBody>,
    /// The submission this stream serves; `None` for pushed streams.
    pub request: Option<RequestId>,
}

impl StreamInner {
    pub fn new(state: StreamState, send_window: i64, recv_window: i64) -> Self {
        Self {
            state,
            send_window: Window::new(send_window),
            recv_window: Window::new(recv_window),
            headers: Vec::new(),
            trailers: Vec::new(),
            body: BytesMut::new(),
            pending_body: None,
            request: None,
        }
    }

    /// Whether the peer may still send DATA or trailers on this stream.
    pub fn can_receive(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Whether this stream still has request body waiting on flow control.
    pub fn has_pending_body(&self) -> bool {
        self.pending_body.is_some()
    }

    /// Transition after we send END_STREAM.
    pub fn on_local_end(&mut self) {
        self.state = match self.state {
            StreamState::HalfClosedRemote => StreamState::Closed,
            _ => StreamState::HalfClosedLocal,
        };
    }

    /// Transition after the peer sends END_STREAM.
    pub fn on_remote_end(&mut self) {
        self.state = match self.state {
            StreamState::HalfClosedLocal => StreamState::Closed,
            // A promised stream carries no request body from us.
            StreamState::ReservedRemote => StreamState::Closed,
            _ => StreamState::HalfClosedRemote,
        };
    }

    /// Assemble the one-shot response from the accumulated pieces.
    pub fn into_response(self) -> Response {
        Response::new(self.headers, self.trailers, self.body.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_stream_transitions() {
        let mut s = StreamInner::new(StreamState::Open, 65_535, 65_535);
        s.on_local_end();
        assert_eq!(s.state, StreamState::HalfClosedLocal);
        s.on_remote_end();
        assert_eq!(s.state, StreamState::Closed);

        let mut s = StreamInner::new(StreamState::Open, 65_535, 65_535);
        s.on_remote_end();
        assert_eq!(s.state, StreamState::HalfClosedRemote);
        s.on_local_end();
        assert_eq!(s.state, StreamState::Closed);
    }

    #[test]
    fn reserved_remote_closes_on_remote_end() {
        let mut s = StreamInner::new(StreamState::ReservedRemote, 65_535, 65_535);
        s.on_remote_end();
        assert_eq!(s.state, StreamState::Closed);
    }

    #[test]
    fn response_assembly() {
        let mut s = StreamInner::new(StreamState::Open, 65_535, 65_535);
        s.headers.push(HeaderField::new(b":status", b"200"));
        s.body.extend_from_slice(b"abc");
        s.trailers.push(HeaderField::new(b"grpc-status", b"0"));
        let response = s.into_response();
        assert_eq!(response.status(), Some(200));
        assert_eq!(&response.body()[..], b"abc");
        assert_eq!(response.trailers().len(), 1);
    }
}
