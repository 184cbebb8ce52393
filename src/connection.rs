//! HTTP/2 client connection state machine.
//!
//! `Connection` is sans-IO: the embedding task feeds received bytes in via
//! [`Connection::recv`], drains outbound bytes via
//! [`Connection::take_pending_send`], and pulls upward events with
//! [`Connection::poll_event`]. All mutation happens inside `&mut self`
//! methods, so the owning task is the connection's single actor.

use std::collections::{HashMap, VecDeque};

use bytes::{Buf, BytesMut};

use crate::admission::{AdmissionQueue, Request, RequestId};
use crate::config::ConnConfig;
use crate::error::{ErrorCode, H2Error};
use crate::flowcontrol::{DEFAULT_WINDOW_SIZE, Window};
use crate::frame::{self, Frame};
use crate::hpack::{Decoder, Encoder, HeaderField};
use crate::response::{Response, StreamOutcome};
use crate::settings::Settings;
use crate::stream::{PendingBody, StreamInner, StreamState};

/// HTTP/2 client connection preface (RFC 7540 Section 3.5).
const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Events delivered upward, in arrival order.
#[derive(Debug)]
pub enum Event {
    /// A stream reached the closed state and delivered its one message.
    StreamCompleted {
        stream_id: u32,
        /// The submission this stream served; `None` for pushed streams.
        request: Option<RequestId>,
        response: Response,
        outcome: StreamOutcome,
    },
    /// The peer reserved an even stream for a push.
    PushPromise {
        parent_stream_id: u32,
        promised_stream_id: u32,
        headers: Vec<HeaderField>,
    },
    /// The peer sent a PING; the ACK is already queued.
    PingReceived { data: [u8; 8] },
    /// The peer acknowledged one of our PINGs.
    PongReceived { data: [u8; 8] },
    /// The connection is done. Emitted exactly once.
    ConnectionClosed { reason: CloseReason, reconnect: bool },
}

/// Why the connection closed.
#[derive(Debug)]
pub enum CloseReason {
    /// Local shutdown request; GOAWAY NO_ERROR was queued.
    Shutdown,
    /// The peer sent GOAWAY.
    GoAway {
        error_code: ErrorCode,
        last_stream_id: u32,
        debug_data: Vec<u8>,
    },
    /// A fatal protocol error; GOAWAY with this code was queued.
    Error(ErrorCode),
    /// The transport dropped before any GOAWAY.
    Abnormal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    /// Preface sent, waiting for the peer's first SETTINGS.
    Handshake,
    /// Settings exchanged; admitting requests.
    Ready,
    /// GOAWAY seen (either direction); draining, not admitting.
    Closing,
    Closed,
}

/// An in-progress header block (HEADERS or PUSH_PROMISE without
/// END_HEADERS). At most one exists per connection; any other frame before
/// the closing CONTINUATION is a connection error (RFC 7540 Section 4.3).
struct HeaderAssembly {
    stream_id: u32,
    buf: Vec<u8>,
    kind: AssemblyKind,
}

enum AssemblyKind {
    Response { end_stream: bool },
    Promise { promised_stream_id: u32 },
}

/// Client-side HTTP/2 connection core.
pub struct Connection {
    state: ConnState,
    config: ConnConfig,
    local_settings: Settings,
    peer_settings: Settings,

    /// Active streams, keyed by stream id. Closed streams are removed.
    streams: HashMap<u32, StreamInner>,
    /// Next client-initiated stream id (odd, strictly increasing).
    next_stream_id: u32,
    /// Highest even stream id the peer has promised. Doubles as the
    /// last-stream-id we put on an outgoing GOAWAY.
    highest_promised: u32,

    conn_send: Window,
    conn_recv: Window,

    encoder: Encoder,
    decoder: Decoder,

    assembly: Option<HeaderAssembly>,
    admission: AdmissionQueue,

    recv_buf: BytesMut,
    send_buf: Vec<u8>,
    events: VecDeque<Event>,
    pending_close: Option<CloseReason>,
}

impl Connection {
    /// Open a connection. The client preface, our SETTINGS, and (when the
    /// configured window exceeds the default) a connection WINDOW_UPDATE
    /// are queued immediately.
    pub fn new(config: ConnConfig) -> Self {
        let local = config.settings.clone();
        let mut send_buf = Vec::with_capacity(CLIENT_PREFACE.len() + 64);
        send_buf.extend_from_slice(CLIENT_PREFACE);
        Frame::Settings {
            ack: false,
            settings: local.clone(),
        }
        .encode(&mut send_buf);

        let initial_recv = i64::from(local.initial_window_size);
        if initial_recv > DEFAULT_WINDOW_SIZE {
            Frame::WindowUpdate {
                stream_id: 0,
                increment: (initial_recv - DEFAULT_WINDOW_SIZE) as u32,
            }
            .encode(&mut send_buf);
        }

        Self {
            state: ConnState::Handshake,
            peer_settings: Settings::default(),
            streams: HashMap::new(),
            next_stream_id: 1,
            highest_promised: 0,
            conn_send: Window::default(),
            conn_recv: Window::new(initial_recv),
            // The peer's table size is 4096 until its SETTINGS say otherwise.
            encoder: Encoder::new(4096),
            decoder: Decoder::new(
                local.header_table_size as usize,
                local.max_header_list_size,
            ),
            assembly: None,
            admission: AdmissionQueue::new(),
            recv_buf: BytesMut::new(),
            send_buf,
            events: VecDeque::new(),
            pending_close: None,
            local_settings: local,
            config,
        }
    }

    // ── Sans-IO surface ────────────────────────────────────────────────

    /// Feed bytes received from the transport.
    ///
    /// On a fatal error the GOAWAY is already queued in the send buffer;
    /// flush it before closing the transport. Stream-scoped errors are
    /// answered with RST_STREAM internally and do not surface here.
    pub fn recv(&mut self, data: &[u8]) -> Result<(), H2Error> {
        if self.state == ConnState::Closed {
            return Ok(());
        }
        self.recv_buf.extend_from_slice(data);

        while self.state != ConnState::Closed {
            match frame::parse(&self.recv_buf, self.local_settings.max_frame_size) {
                Ok(Some((frame, consumed))) => {
                    self.recv_buf.advance(consumed);
                    if let Err(e) = self.dispatch(frame) {
                        self.react(e)?;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // Drain the offending frame (when its extent is known)
                    // so a stream-scoped error can keep the connection
                    // parsing.
                    let consumed = frame::peek_header(&self.recv_buf)
                        .map(|h| frame::FRAME_HEADER_LEN + h.length as usize)
                        .filter(|total| *total <= self.recv_buf.len())
                        .unwrap_or(self.recv_buf.len());
                    self.recv_buf.advance(consumed);
                    self.react(e)?;
                }
            }
        }

        self.flush_data();
        Ok(())
    }

    /// Next upward event, if any.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Take all bytes queued for the transport.
    pub fn take_pending_send(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.send_buf)
    }

    pub fn has_pending_send(&self) -> bool {
        !self.send_buf.is_empty()
    }

    // ── Requests ───────────────────────────────────────────────────────

    /// Queue a request. It is released — HEADERS (+DATA) sent, stream
    /// registered — as soon as the peer's concurrency limit permits.
    pub fn submit(&mut self, request: Request) -> Result<RequestId, H2Error> {
        if matches!(self.state, ConnState::Closing | ConnState::Closed) {
            return Err(H2Error::Closed);
        }
        let id = self.admission.submit(request);
        self.pump_admission();
        self.flush_data();
        Ok(id)
    }

    /// Cancel a request. Queued: removed without consuming a credit.
    /// In flight: RST_STREAM CANCEL is queued and the stream closes
    /// directly. Returns false if the request is unknown or already done.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        if self.admission.cancel(id) {
            return true;
        }
        let stream_id = self
            .streams
            .iter()
            .find(|(_, s)| s.request == Some(id))
            .map(|(sid, _)| *sid);
        match stream_id {
            Some(sid) => {
                Frame::RstStream {
                    stream_id: sid,
                    error_code: ErrorCode::Cancel,
                }
                .encode(&mut self.send_buf);
                self.finish_stream(sid, StreamOutcome::Canceled);
                true
            }
            None => false,
        }
    }

    /// Send a PING with the given opaque payload.
    pub fn ping(&mut self, data: [u8; 8]) {
        if self.state == ConnState::Closed {
            return;
        }
        Frame::Ping { ack: false, data }.encode(&mut self.send_buf);
    }

    /// Graceful close: queue GOAWAY NO_ERROR with the highest
    /// peer-initiated stream id we processed, cancel everything still in
    /// flight, and stop. Flush the send buffer before dropping the
    /// transport.
    pub fn shutdown(&mut self) {
        if matches!(self.state, ConnState::Closing | ConnState::Closed) {
            return;
        }
        Frame::GoAway {
            last_stream_id: self.highest_promised,
            error_code: ErrorCode::NoError,
            debug_data: Vec::new(),
        }
        .encode(&mut self.send_buf);
        self.state = ConnState::Closing;
        self.pending_close = Some(CloseReason::Shutdown);
        self.admission.clear();
        self.fail_all_streams(StreamOutcome::Canceled);
        self.maybe_finish_close();
    }

    /// Report that the transport dropped out from under us. Every open
    /// stream completes with a disconnected outcome.
    pub fn transport_closed(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closing;
        self.pending_close = Some(CloseReason::Abnormal);
        self.admission.clear();
        self.fail_all_streams(StreamOutcome::Disconnected);
        self.maybe_finish_close();
    }

    // ── Introspection ──────────────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    /// Streams currently registered (open, half-closed, or reserved).
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Submissions still waiting for admission credits.
    pub fn queued_requests(&self) -> usize {
        self.admission.len()
    }

    pub fn peer_settings(&self) -> &Settings {
        &self.peer_settings
    }

    // ── Dispatch ───────────────────────────────────────────────────────

    fn dispatch(&mut self, frame: Frame) -> Result<(), H2Error> {
        // An open header block admits nothing but its own CONTINUATIONs
        // (RFC 7540 Section 4.3).
        if let Some(assembly) = &self.assembly {
            let continues = matches!(
                &frame,
                Frame::Continuation { stream_id, .. } if *stream_id == assembly.stream_id
            );
            if !continues {
                return Err(H2Error::Protocol("header block interrupted".into()));
            }
        }

        // The server preface is a SETTINGS frame (RFC 7540 Section 3.5).
        if self.state == ConnState::Handshake
            && !matches!(frame, Frame::Settings { ack: false, .. })
        {
            return Err(H2Error::Protocol("expected SETTINGS preface".into()));
        }

        match frame {
            Frame::Settings { ack: false, settings } => self.on_settings(settings),
            Frame::Settings { ack: true, .. } => {
                // No-op. A SETTINGS_TIMEOUT watchdog would be cancelled
                // here; timers live in the embedding layer.
                Ok(())
            }
            Frame::Ping { ack, data } => {
                if ack {
                    self.events.push_back(Event::PongReceived { data });
                } else {
                    Frame::Ping { ack: true, data }.encode(&mut self.send_buf);
                    self.events.push_back(Event::PingReceived { data });
                }
                Ok(())
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                self.on_goaway(last_stream_id, error_code, debug_data);
                Ok(())
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.on_window_update(stream_id, increment),
            Frame::Data {
                stream_id,
                payload,
                end_stream,
                padding,
            } => self.on_data(stream_id, payload, end_stream, padding),
            Frame::Headers {
                stream_id,
                block,
                end_stream,
                end_headers,
                ..
            } => self.on_headers(stream_id, block, end_stream, end_headers),
            Frame::Continuation {
                stream_id,
                block,
                end_headers,
            } => self.on_continuation(stream_id, block, end_headers),
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                block,
                end_headers,
            } => self.on_push_promise(stream_id, promised_stream_id, block, end_headers),
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                if self.streams.contains_key(&stream_id) {
                    self.finish_stream(stream_id, StreamOutcome::Reset(error_code));
                }
                Ok(())
            }
            // Priority is advisory; unknown types are discarded
            // (RFC 7540 Section 4.1).
            Frame::Priority { .. } | Frame::Unknown { .. } => Ok(()),
        }
    }

    /// Stream errors reset one stream; everything else tears the
    /// connection down.
    fn react(&mut self, error: H2Error) -> Result<(), H2Error> {
        match error {
            H2Error::Stream { id, code } => {
                Frame::RstStream {
                    stream_id: id,
                    error_code: code,
                }
                .encode(&mut self.send_buf);
                if self.streams.contains_key(&id) {
                    self.finish_stream(id, StreamOutcome::Failed(code));
                }
                Ok(())
            }
            fatal => {
                self.teardown(fatal.goaway_code());
                Err(fatal)
            }
        }
    }

    /// A stream id neither side has used yet. Frames other than HEADERS
    /// and PRIORITY on an idle stream are connection errors (RFC 7540
    /// Section 5.1); ids below the high-water marks belong to streams
    /// that already closed and are ignored.
    fn is_idle(&self, stream_id: u32) -> bool {
        if stream_id.is_multiple_of(2) {
            stream_id > self.highest_promised
        } else {
            stream_id >= self.next_stream_id
        }
    }

    // ── Frame handlers ─────────────────────────────────────────────────

    fn on_settings(&mut self, settings: Settings) -> Result<(), H2Error> {
        let delta = i64::from(settings.initial_window_size)
            - i64::from(self.peer_settings.initial_window_size);
        self.peer_settings = settings;

        self.encoder
            .update_max_size(self.peer_settings.header_table_size as usize);

        // Fan the INITIAL_WINDOW_SIZE delta across every live stream's
        // send window (RFC 7540 Section 6.9.2).
        if delta != 0 {
            for stream in self.streams.values_mut() {
                if stream.state != StreamState::Closed {
                    stream.send_window.resize(delta)?;
                }
            }
        }

        Frame::Settings {
            ack: true,
            settings: Settings::default(),
        }
        .encode(&mut self.send_buf);

        if self.state == ConnState::Handshake {
            self.state = ConnState::Ready;
        }
        self.recredit();
        self.pump_admission();
        Ok(())
    }

    fn on_goaway(&mut self, last_stream_id: u32, error_code: ErrorCode, debug_data: Vec<u8>) {
        self.state = ConnState::Closing;
        self.pending_close = Some(CloseReason::GoAway {
            error_code,
            last_stream_id,
            debug_data,
        });
        self.admission.clear();

        // Streams above the boundary were never processed by the peer;
        // they complete retryable. Lower streams run to completion.
        let mut doomed: Vec<u32> = self
            .streams
            .keys()
            .filter(|id| **id > last_stream_id)
            .copied()
            .collect();
        doomed.sort_unstable();
        for id in doomed {
            self.finish_stream(id, StreamOutcome::Retryable);
        }
        self.maybe_finish_close();
    }

    fn on_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), H2Error> {
        if stream_id == 0 {
            self.conn_send.grow(increment)?;
        } else if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.send_window.grow(increment).map_err(|_| H2Error::Stream {
                id: stream_id,
                code: ErrorCode::FlowControlError,
            })?;
        } else if self.is_idle(stream_id) {
            return Err(H2Error::Protocol("WINDOW_UPDATE on idle stream".into()));
        }
        // Updates for streams that raced with closure are ignored.
        Ok(())
    }

    fn on_data(
        &mut self,
        stream_id: u32,
        payload: Vec<u8>,
        end_stream: bool,
        padding: Option<u8>,
    ) -> Result<(), H2Error> {
        // Flow control covers the entire wire payload: data, the
        // pad-length octet, and the padding itself. A padded empty DATA
        // still consumes window.
        let flow = payload.len() as u32 + padding.map_or(0, |p| u32::from(p) + 1);
        if flow > 0 {
            self.conn_recv.consume(flow)?;
            self.replenish_connection();
        }

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            if self.is_idle(stream_id) {
                return Err(H2Error::Protocol("DATA on idle stream".into()));
            }
            // Recently closed stream; the bytes still counted against the
            // connection window above.
            return Ok(());
        };
        match stream.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(H2Error::Stream {
                    id: stream_id,
                    code: ErrorCode::StreamClosed,
                });
            }
            _ => return Err(H2Error::Protocol("DATA on non-open stream".into())),
        }
        if flow > 0 && stream.recv_window.consume(flow).is_err() {
            return Err(H2Error::Stream {
                id: stream_id,
                code: ErrorCode::FlowControlError,
            });
        }

        stream.body.extend_from_slice(&payload);

        if end_stream {
            stream.on_remote_end();
            if stream.state == StreamState::Closed {
                self.finish_stream(stream_id, StreamOutcome::Complete);
            }
        } else if flow > 0 {
            self.replenish_stream(stream_id);
        }
        Ok(())
    }

    fn on_headers(
        &mut self,
        stream_id: u32,
        block: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
    ) -> Result<(), H2Error> {
        if !end_headers {
            self.assembly = Some(HeaderAssembly {
                stream_id,
                buf: block,
                kind: AssemblyKind::Response { end_stream },
            });
            return Ok(());
        }
        self.finish_response_block(stream_id, &block, end_stream)
    }

    fn on_continuation(
        &mut self,
        _stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    ) -> Result<(), H2Error> {
        let Some(mut assembly) = self.assembly.take() else {
            return Err(H2Error::Protocol("CONTINUATION outside a header block".into()));
        };
        assembly.buf.extend_from_slice(&fragment);
        if !end_headers {
            self.assembly = Some(assembly);
            return Ok(());
        }
        match assembly.kind {
            AssemblyKind::Response { end_stream } => {
                self.finish_response_block(assembly.stream_id, &assembly.buf, end_stream)
            }
            AssemblyKind::Promise { promised_stream_id } => {
                self.finish_promise_block(assembly.stream_id, promised_stream_id, &assembly.buf)
            }
        }
    }

    fn on_push_promise(
        &mut self,
        stream_id: u32,
        promised_stream_id: u32,
        block: Vec<u8>,
        end_headers: bool,
    ) -> Result<(), H2Error> {
        if !self.local_settings.enable_push {
            return Err(H2Error::Protocol("PUSH_PROMISE with push disabled".into()));
        }
        let parent_state = self.streams.get(&stream_id).map(|s| s.state);
        if !matches!(
            parent_state,
            Some(StreamState::Open | StreamState::HalfClosedLocal)
        ) {
            return Err(H2Error::Protocol("PUSH_PROMISE on inactive stream".into()));
        }
        // Promised ids are even and strictly increasing.
        if promised_stream_id == 0
            || !promised_stream_id.is_multiple_of(2)
            || promised_stream_id <= self.highest_promised
        {
            return Err(H2Error::Protocol("invalid promised stream id".into()));
        }
        self.highest_promised = promised_stream_id;

        if !end_headers {
            self.assembly = Some(HeaderAssembly {
                stream_id,
                buf: block,
                kind: AssemblyKind::Promise { promised_stream_id },
            });
            return Ok(());
        }
        self.finish_promise_block(stream_id, promised_stream_id, &block)
    }

    // ── Header block completion ────────────────────────────────────────

    fn finish_response_block(
        &mut self,
        stream_id: u32,
        block: &[u8],
        end_stream: bool,
    ) -> Result<(), H2Error> {
        // Decode unconditionally: the dynamic table must track every
        // block, even one for a stream we no longer know.
        let fields = self.decoder.decode(block)?;

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            if self.is_idle(stream_id) {
                return Err(H2Error::Protocol("HEADERS on idle stream".into()));
            }
            // Stale stream: the block was still decoded to keep the
            // dynamic table in sync.
            return Ok(());
        };
        match stream.state {
            // A promised stream's response begins (RFC 7540 Section 5.1:
            // reserved-remote, recv HEADERS -> half-closed-local).
            StreamState::ReservedRemote => {
                stream.state = StreamState::HalfClosedLocal;
                stream.headers = fields;
            }
            StreamState::Open | StreamState::HalfClosedLocal => {
                if stream.headers.is_empty() {
                    stream.headers = fields;
                } else {
                    // A second block is trailers and must end the stream.
                    if !end_stream {
                        return Err(H2Error::Stream {
                            id: stream_id,
                            code: ErrorCode::ProtocolError,
                        });
                    }
                    stream.trailers = fields;
                }
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(H2Error::Stream {
                    id: stream_id,
                    code: ErrorCode::StreamClosed,
                });
            }
            _ => return Err(H2Error::Protocol("HEADERS on idle stream".into())),
        }

        if end_stream {
            stream.on_remote_end();
            if stream.state == StreamState::Closed {
                self.finish_stream(stream_id, StreamOutcome::Complete);
            }
        }
        Ok(())
    }

    fn finish_promise_block(
        &mut self,
        parent_stream_id: u32,
        promised_stream_id: u32,
        block: &[u8],
    ) -> Result<(), H2Error> {
        let fields = self.decoder.decode(block)?;

        let stream = StreamInner::new(
            StreamState::ReservedRemote,
            i64::from(self.peer_settings.initial_window_size),
            i64::from(self.local_settings.initial_window_size),
        );
        self.streams.insert(promised_stream_id, stream);

        self.events.push_back(Event::PushPromise {
            parent_stream_id,
            promised_stream_id,
            headers: fields,
        });
        Ok(())
    }

    // ── Send path ──────────────────────────────────────────────────────

    fn pump_admission(&mut self) {
        if self.state != ConnState::Ready {
            return;
        }
        while let Some((request_id, request)) = self.admission.take_ready() {
            self.start_stream(request_id, request);
        }
    }

    fn start_stream(&mut self, request_id: RequestId, request: Request) {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        let mut fields = Vec::with_capacity(4 + request.headers.len());
        fields.push(HeaderField::new(b":method", request.method));
        fields.push(HeaderField::new(b":path", request.path));
        fields.push(HeaderField::new(b":scheme", self.config.scheme.as_str()));
        if let Some(authority) = request.authority {
            fields.push(HeaderField::new(b":authority", authority));
        }
        fields.extend(request.headers);

        let mut block = Vec::new();
        self.encoder.encode(&fields, &mut block);

        let body = request.body.filter(|b| !b.is_empty());
        Frame::Headers {
            stream_id,
            block,
            end_stream: body.is_none(),
            end_headers: true,
            priority: None,
        }
        .encode(&mut self.send_buf);

        let mut stream = StreamInner::new(
            StreamState::Open,
            i64::from(self.peer_settings.initial_window_size),
            i64::from(self.local_settings.initial_window_size),
        );
        stream.request = Some(request_id);
        match body {
            Some(data) => stream.pending_body = Some(PendingBody { data, sent: 0 }),
            None => stream.on_local_end(),
        }
        self.streams.insert(stream_id, stream);
    }

    /// Send as much buffered request body as both windows and the peer's
    /// MAX_FRAME_SIZE permit. Runs after control frames, so control
    /// traffic always precedes DATA in the send buffer.
    fn flush_data(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        let max_frame = self.peer_settings.max_frame_size as usize;
        let mut ids: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| s.has_pending_body())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        for stream_id in ids {
            loop {
                let conn_avail = self.conn_send.available();
                if conn_avail <= 0 {
                    return;
                }
                let Some(stream) = self.streams.get_mut(&stream_id) else {
                    break;
                };
                let stream_avail = stream.send_window.available();
                let Some(pending) = &mut stream.pending_body else {
                    break;
                };
                let remaining = pending.data.len() - pending.sent;
                let n = remaining
                    .min(conn_avail as usize)
                    .min(stream_avail.max(0) as usize)
                    .min(max_frame);
                if n == 0 {
                    break;
                }

                let chunk = pending.data.slice(pending.sent..pending.sent + n);
                pending.sent += n;
                let done = pending.sent == pending.data.len();

                // Sized to fit above; the windows cannot underflow.
                let _ = stream.send_window.consume(n as u32);
                let _ = self.conn_send.consume(n as u32);

                Frame::Data {
                    stream_id,
                    payload: chunk.to_vec(),
                    end_stream: done,
                    padding: None,
                }
                .encode(&mut self.send_buf);

                if done {
                    stream.pending_body = None;
                    stream.on_local_end();
                    let closed = stream.state == StreamState::Closed;
                    if closed {
                        self.finish_stream(stream_id, StreamOutcome::Complete);
                    }
                    break;
                }
            }
        }
    }

    // ── Window replenishment ───────────────────────────────────────────

    /// Replenish-to-full policy: once a receive window falls below half
    /// its configured initial size, top it back up in one WINDOW_UPDATE.
    fn replenish_connection(&mut self) {
        let initial = i64::from(self.local_settings.initial_window_size);
        let avail = self.conn_recv.available();
        if avail < initial / 2 {
            let increment = (initial - avail) as u32;
            let _ = self.conn_recv.grow(increment);
            Frame::WindowUpdate {
                stream_id: 0,
                increment,
            }
            .encode(&mut self.send_buf);
        }
    }

    fn replenish_stream(&mut self, stream_id: u32) {
        let initial = i64::from(self.local_settings.initial_window_size);
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        if !stream.can_receive() {
            return;
        }
        let avail = stream.recv_window.available();
        if avail < initial / 2 {
            let increment = (initial - avail) as u32;
            let _ = stream.recv_window.grow(increment);
            Frame::WindowUpdate {
                stream_id,
                increment,
            }
            .encode(&mut self.send_buf);
        }
    }

    // ── Lifecycle plumbing ─────────────────────────────────────────────

    /// Derive the admission budget from the peer's advertisement.
    fn recredit(&mut self) {
        let limit = self
            .peer_settings
            .max_concurrent_streams
            .unwrap_or(self.config.concurrency_ceiling)
            .min(self.config.concurrency_ceiling);
        let in_flight = self
            .streams
            .iter()
            .filter(|(id, _)| *id % 2 == 1)
            .count() as u64;
        self.admission.recredit(u64::from(limit), in_flight);
    }

    /// Remove a stream, deliver its one completion message, and free an
    /// admission slot.
    fn finish_stream(&mut self, stream_id: u32, outcome: StreamOutcome) {
        let Some(stream) = self.streams.remove(&stream_id) else {
            return;
        };
        let request = stream.request;
        self.events.push_back(Event::StreamCompleted {
            stream_id,
            request,
            response: stream.into_response(),
            outcome,
        });
        self.recredit();
        self.pump_admission();
        self.maybe_finish_close();
    }

    fn fail_all_streams(&mut self, outcome: StreamOutcome) {
        let mut ids: Vec<u32> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.finish_stream(id, outcome);
        }
    }

    /// Fatal connection error: queue GOAWAY, fail everything, notify once.
    fn teardown(&mut self, code: ErrorCode) {
        if matches!(self.state, ConnState::Closed) {
            return;
        }
        Frame::GoAway {
            last_stream_id: self.highest_promised,
            error_code: code,
            debug_data: Vec::new(),
        }
        .encode(&mut self.send_buf);
        self.state = ConnState::Closing;
        self.pending_close = Some(CloseReason::Error(code));
        self.admission.clear();
        self.assembly = None;
        self.fail_all_streams(StreamOutcome::Failed(code));
        self.maybe_finish_close();
    }

    fn maybe_finish_close(&mut self) {
        if self.state != ConnState::Closing || !self.streams.is_empty() {
            return;
        }
        let reason = self.pending_close.take().unwrap_or(CloseReason::Shutdown);
        self.events.push_back(Event::ConnectionClosed {
            reason,
            reconnect: self.config.reconnect,
        });
        self.state = ConnState::Closed;
    }
}
