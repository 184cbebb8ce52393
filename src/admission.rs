//! Request admission: a credit-gated FIFO in front of stream creation.
//!
//! The queue itself never sends anything. The connection converts peer
//! events into credits — a SETTINGS receipt re-derives the budget from the
//! advertised concurrency limit, a stream close frees one slot — and then
//! drains as many queued submissions as the credits allow.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::hpack::HeaderField;

/// Handle correlating a submission with its eventual completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// A request submission: the connection builds the pseudo-header block
/// from these parts plus the configured scheme.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub authority: Option<String>,
    /// Additional (non-pseudo) header fields.
    pub headers: Vec<HeaderField>,
    /// Request body; `None` or empty means HEADERS carries END_STREAM.
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            authority: None,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn header(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(HeaderField::new(name, value));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// FIFO of pending submissions plus the credit counter that gates them.
pub(crate) struct AdmissionQueue {
    queue: VecDeque<(RequestId, Request)>,
    credits: u64,
    next_id: u64,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            // No credits until the peer's first SETTINGS arrives.
            credits: 0,
            next_id: 0,
        }
    }

    /// Append a submission. Never blocks, never sends.
    pub fn submit(&mut self, request: Request) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.queue.push_back((id, request));
        id
    }

    /// Remove a queued submission. Consumes no credit. Returns false if
    /// the request already left the queue.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        match self.queue.iter().position(|(qid, _)| *qid == id) {
            Some(at) => {
                self.queue.remove(at);
                true
            }
            None => false,
        }
    }

    /// Replace the credit budget with `limit - in_flight`, clamped at
    /// zero. Called on SETTINGS receipt and on every stream close, so the
    /// budget always reflects the peer's current advertisement.
    pub fn recredit(&mut self, limit: u64, in_flight: u64) {
        self.credits = limit.saturating_sub(in_flight);
    }

    /// Release the next submission if a credit is available.
    pub fn take_ready(&mut self) -> Option<(RequestId, Request)> {
        if self.credits == 0 {
            return None;
        }
        let entry = self.queue.pop_front()?;
        self.credits -= 1;
        Some(entry)
    }

    /// Drop every queued submission (connection teardown).
    pub fn clear(&mut self) {
        self.queue.clear();
        self.credits = 0;
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub fn credits(&self) -> u64 {
        self.credits
    }
}
