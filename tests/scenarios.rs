//! Connection-level scenarios driven against a scripted peer: frames are
//! built with the public codec, fed straight into `recv()`, and the
//! client's reactions are parsed back out of `take_pending_send()`.

use h2_conn::frame::{self, Frame};
use h2_conn::hpack::{Encoder, HeaderField};
use h2_conn::{
    CloseReason, ConnConfig, Connection, ErrorCode, Event, Request, Settings, StreamOutcome,
};

/// Server side of the conversation. Owns the peer's HPACK encoder so
/// header blocks stay coherent across the whole exchange.
struct Peer {
    encoder: Encoder,
}

impl Peer {
    fn new() -> Self {
        Self {
            encoder: Encoder::new(4096),
        }
    }

    fn settings(&self, settings: Settings) -> Vec<u8> {
        Frame::Settings {
            ack: false,
            settings,
        }
        .encode_to_vec()
    }

    fn response_headers(&mut self, stream_id: u32, status: &str, end_stream: bool) -> Vec<u8> {
        let mut block = Vec::new();
        self.encoder
            .encode(&[HeaderField::new(b":status", status.as_bytes())], &mut block);
        Frame::Headers {
            stream_id,
            block,
            end_stream,
            end_headers: true,
            priority: None,
        }
        .encode_to_vec()
    }

    fn push_promise(
        &mut self,
        stream_id: u32,
        promised_stream_id: u32,
        headers: &[HeaderField],
    ) -> Vec<u8> {
        let mut block = Vec::new();
        self.encoder.encode(headers, &mut block);
        Frame::PushPromise {
            stream_id,
            promised_stream_id,
            block,
            end_headers: true,
        }
        .encode_to_vec()
    }
}

/// Parse every frame the client queued.
fn sent_frames(conn: &mut Connection) -> Vec<Frame> {
    let buf = conn.take_pending_send();
    let mut frames = Vec::new();
    let mut rest = buf.as_slice();
    while let Some((frame, n)) = frame::parse(rest, 1 << 24).unwrap() {
        frames.push(frame);
        rest = &rest[n..];
    }
    assert!(rest.is_empty(), "partial frame in send buffer");
    frames
}

fn headers_sent(frames: &[Frame]) -> Vec<u32> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Headers { stream_id, .. } => Some(*stream_id),
            _ => None,
        })
        .collect()
}

/// Open a connection and complete the settings handshake.
fn handshake(peer: &Peer, settings: Settings) -> Connection {
    let mut conn = Connection::new(ConnConfig::default());
    let preface = conn.take_pending_send();
    assert!(preface.starts_with(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"));
    conn.recv(&peer.settings(settings)).unwrap();
    let frames = sent_frames(&mut conn);
    assert!(matches!(frames[0], Frame::Settings { ack: true, .. }));
    conn
}

fn get(path: &str) -> Request {
    Request::new("GET", path).authority("example.com")
}

// ── 1. Admission pacing under MAX_CONCURRENT_STREAMS ──────────────────

#[test]
fn concurrency_limit_paces_admission() {
    let mut peer = Peer::new();
    let mut conn = handshake(
        &peer,
        Settings {
            max_concurrent_streams: Some(1),
            ..Settings::default()
        },
    );

    for path in ["/a", "/b", "/c"] {
        conn.submit(get(path)).unwrap();
    }
    assert_eq!(headers_sent(&sent_frames(&mut conn)), [1]);
    assert_eq!(conn.queued_requests(), 2);

    // Completing stream 1 releases exactly the second request.
    conn.recv(&peer.response_headers(1, "200", true)).unwrap();
    assert!(matches!(
        conn.poll_event(),
        Some(Event::StreamCompleted { stream_id: 1, .. })
    ));
    assert_eq!(headers_sent(&sent_frames(&mut conn)), [3]);

    conn.recv(&peer.response_headers(3, "200", true)).unwrap();
    assert_eq!(headers_sent(&sent_frames(&mut conn)), [5]);

    conn.recv(&peer.response_headers(5, "200", true)).unwrap();
    assert!(sent_frames(&mut conn).is_empty());
    assert_eq!(conn.queued_requests(), 0);
}

// ── 2. Flow-controlled body with WINDOW_UPDATE resume ─────────────────

#[test]
fn body_split_by_flow_control_windows() {
    let peer = Peer::new();
    let mut conn = handshake(
        &peer,
        Settings {
            initial_window_size: 10,
            ..Settings::default()
        },
    );

    conn.submit(get("/upload").body(vec![0x42; 25])).unwrap();

    let frames = sent_frames(&mut conn);
    assert_eq!(headers_sent(&frames), [1]);
    let data: Vec<_> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::Data {
                payload,
                end_stream,
                ..
            } => Some((payload.len(), *end_stream)),
            _ => None,
        })
        .collect();
    // Only the stream window's worth goes out, without END_STREAM.
    assert_eq!(data, [(10, false)]);

    // Nothing further until credit arrives.
    assert!(sent_frames(&mut conn).is_empty());

    conn.recv(
        &Frame::WindowUpdate {
            stream_id: 1,
            increment: 15,
        }
        .encode_to_vec(),
    )
    .unwrap();
    conn.recv(
        &Frame::WindowUpdate {
            stream_id: 0,
            increment: 15,
        }
        .encode_to_vec(),
    )
    .unwrap();

    let data: Vec<_> = sent_frames(&mut conn)
        .iter()
        .filter_map(|f| match f {
            Frame::Data {
                payload,
                end_stream,
                ..
            } => Some((payload.len(), *end_stream)),
            _ => None,
        })
        .collect();
    assert_eq!(data, [(15, true)]);
}

// ── 3. PING echo ──────────────────────────────────────────────────────

#[test]
fn ping_echoed_with_same_payload() {
    let peer = Peer::new();
    let mut conn = handshake(&peer, Settings::default());

    let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
    conn.recv(&Frame::Ping { ack: false, data }.encode_to_vec())
        .unwrap();

    let frames = sent_frames(&mut conn);
    assert!(frames.contains(&Frame::Ping { ack: true, data }));
    assert!(matches!(
        conn.poll_event(),
        Some(Event::PingReceived { data: d }) if d == data
    ));

    // And a pong event for our own ping coming back.
    conn.ping(data);
    conn.recv(&Frame::Ping { ack: true, data }.encode_to_vec())
        .unwrap();
    assert!(matches!(
        conn.poll_event(),
        Some(Event::PongReceived { data: d }) if d == data
    ));
}

// ── 4. GOAWAY retryability boundary ───────────────────────────────────

#[test]
fn goaway_fails_streams_above_boundary_only() {
    let mut peer = Peer::new();
    let mut conn = handshake(&peer, Settings::default());

    for path in ["/a", "/b", "/c"] {
        conn.submit(get(path)).unwrap();
    }
    assert_eq!(headers_sent(&sent_frames(&mut conn)), [1, 3, 5]);

    conn.recv(
        &Frame::GoAway {
            last_stream_id: 3,
            error_code: ErrorCode::NoError,
            debug_data: Vec::new(),
        }
        .encode_to_vec(),
    )
    .unwrap();

    // Stream 5 was never processed by the peer: retryable, immediately.
    match conn.poll_event() {
        Some(Event::StreamCompleted {
            stream_id: 5,
            outcome,
            ..
        }) => {
            assert_eq!(outcome, StreamOutcome::Retryable);
            assert!(outcome.is_retryable());
        }
        other => panic!("expected stream 5 completion, got {other:?}"),
    }
    assert!(conn.poll_event().is_none());

    // Streams 1 and 3 run to completion; then the connection closes.
    conn.recv(&peer.response_headers(1, "200", true)).unwrap();
    conn.recv(&peer.response_headers(3, "204", true)).unwrap();

    let mut completed = Vec::new();
    let mut closed = None;
    while let Some(event) = conn.poll_event() {
        match event {
            Event::StreamCompleted {
                stream_id, outcome, ..
            } => completed.push((stream_id, outcome)),
            Event::ConnectionClosed { reason, .. } => closed = Some(reason),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(
        completed,
        [
            (1, StreamOutcome::Complete),
            (3, StreamOutcome::Complete)
        ]
    );
    match closed {
        Some(CloseReason::GoAway {
            error_code: ErrorCode::NoError,
            last_stream_id: 3,
            ..
        }) => {}
        other => panic!("expected GoAway close reason, got {other:?}"),
    }
    assert!(conn.is_closed());

    // No stream above the boundary is ever created afterwards.
    assert!(conn.submit(get("/late")).is_err());
}

// ── 5. Interrupted header block ───────────────────────────────────────

#[test]
fn interleaved_frame_during_continuation_is_fatal() {
    let mut peer = Peer::new();
    let mut conn = handshake(&peer, Settings::default());
    conn.submit(get("/")).unwrap();
    let _ = sent_frames(&mut conn);

    // Promise stream 2 so HEADERS on it are legal, then start an
    // unterminated header block.
    conn.recv(&peer.push_promise(1, 2, &[HeaderField::new(b":method", b"GET")]))
        .unwrap();
    conn.recv(
        &Frame::Headers {
            stream_id: 2,
            block: Vec::new(),
            end_stream: false,
            end_headers: false,
            priority: None,
        }
        .encode_to_vec(),
    )
    .unwrap();

    // DATA while the block is open tears the connection down.
    let err = conn
        .recv(
            &Frame::Data {
                stream_id: 2,
                payload: b"x".to_vec(),
                end_stream: false,
                padding: None,
            }
            .encode_to_vec(),
        )
        .unwrap_err();
    assert!(matches!(err, h2_conn::H2Error::Protocol(_)));

    let frames = sent_frames(&mut conn);
    assert!(frames.iter().any(|f| matches!(
        f,
        Frame::GoAway {
            error_code: ErrorCode::ProtocolError,
            ..
        }
    )));

    let mut saw_close = false;
    while let Some(event) = conn.poll_event() {
        if let Event::ConnectionClosed { reason, .. } = event {
            assert!(matches!(
                reason,
                CloseReason::Error(ErrorCode::ProtocolError)
            ));
            saw_close = true;
        }
    }
    assert!(saw_close);
}

// ── 6. Server push maturing into a completed response ─────────────────

#[test]
fn push_promise_then_completed_stream() {
    let mut peer = Peer::new();
    let mut conn = handshake(&peer, Settings::default());
    conn.submit(get("/page")).unwrap();
    let _ = sent_frames(&mut conn);

    conn.recv(&peer.push_promise(
        1,
        2,
        &[
            HeaderField::new(b":method", b"GET"),
            HeaderField::new(b":path", b"/style.css"),
            HeaderField::new(b":scheme", b"https"),
            HeaderField::new(b":authority", b"example.com"),
        ],
    ))
    .unwrap();
    conn.recv(&peer.response_headers(2, "200", true)).unwrap();

    match conn.poll_event() {
        Some(Event::PushPromise {
            parent_stream_id: 1,
            promised_stream_id: 2,
            headers,
        }) => {
            assert!(headers.contains(&HeaderField::new(b":path", b"/style.css")));
        }
        other => panic!("expected push promise, got {other:?}"),
    }
    match conn.poll_event() {
        Some(Event::StreamCompleted {
            stream_id: 2,
            request: None,
            response,
            outcome: StreamOutcome::Complete,
        }) => {
            assert_eq!(response.status(), Some(200));
        }
        other => panic!("expected pushed stream completion, got {other:?}"),
    }
}

// ── Invariants across a busy exchange ─────────────────────────────────

#[test]
fn active_streams_never_exceed_peer_limit() {
    let mut peer = Peer::new();
    let mut conn = handshake(
        &peer,
        Settings {
            max_concurrent_streams: Some(2),
            ..Settings::default()
        },
    );

    for i in 0..6 {
        conn.submit(get(&format!("/{i}"))).unwrap();
        assert!(conn.active_streams() <= 2);
    }
    assert_eq!(conn.active_streams(), 2);
    assert_eq!(headers_sent(&sent_frames(&mut conn)), [1, 3]);

    // Each completion releases exactly one queued request.
    let mut next_expected = [5u32, 7, 9, 11].iter();
    for finished in [1u32, 3, 5, 7, 9] {
        conn.recv(&peer.response_headers(finished, "200", true))
            .unwrap();
        assert!(conn.active_streams() <= 2);
        let opened = headers_sent(&sent_frames(&mut conn));
        match next_expected.next() {
            Some(&expect) => assert_eq!(opened, [expect]),
            None => assert!(opened.is_empty()),
        }
    }
}

#[test]
fn data_frames_respect_peer_max_frame_size() {
    let peer = Peer::new();
    let mut conn = handshake(
        &peer,
        Settings {
            initial_window_size: 1 << 20,
            ..Settings::default()
        },
    );

    // 40k body, default 16384 max frame size, generous windows.
    conn.recv(
        &Frame::WindowUpdate {
            stream_id: 0,
            increment: 1 << 20,
        }
        .encode_to_vec(),
    )
    .unwrap();
    conn.submit(get("/big").body(vec![7u8; 40_000])).unwrap();

    let sizes: Vec<_> = sent_frames(&mut conn)
        .iter()
        .filter_map(|f| match f {
            Frame::Data {
                payload,
                end_stream,
                ..
            } => Some((payload.len(), *end_stream)),
            _ => None,
        })
        .collect();
    assert_eq!(sizes, [(16_384, false), (16_384, false), (7_232, true)]);
    assert_eq!(sizes.iter().map(|(n, _)| n).sum::<usize>(), 40_000);
}

#[test]
fn settings_change_grants_additional_credits() {
    let peer = Peer::new();
    let mut conn = handshake(
        &peer,
        Settings {
            max_concurrent_streams: Some(1),
            ..Settings::default()
        },
    );

    for path in ["/a", "/b", "/c"] {
        conn.submit(get(path)).unwrap();
    }
    assert_eq!(headers_sent(&sent_frames(&mut conn)), [1]);

    // Peer raises the limit mid-flight: the queue drains to the new cap.
    conn.recv(&peer.settings(Settings {
        max_concurrent_streams: Some(3),
        ..Settings::default()
    }))
    .unwrap();
    assert_eq!(headers_sent(&sent_frames(&mut conn)), [3, 5]);
}
