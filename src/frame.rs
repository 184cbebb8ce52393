//! HTTP/2 frame codec (RFC 7540 Section 4).
//!
//! Every frame starts with a fixed 9-byte header:
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                    |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+------...------+
//! |R|                 Stream Identifier (31)       |
//! +-+---------------------------------------------+
//! ```

use crate::error::{ErrorCode, H2Error};
use crate::settings::Settings;

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 9;

// Frame type identifiers (RFC 7540 Section 6).
pub const TYPE_DATA: u8 = 0x0;
pub const TYPE_HEADERS: u8 = 0x1;
pub const TYPE_PRIORITY: u8 = 0x2;
pub const TYPE_RST_STREAM: u8 = 0x3;
pub const TYPE_SETTINGS: u8 = 0x4;
pub const TYPE_PUSH_PROMISE: u8 = 0x5;
pub const TYPE_PING: u8 = 0x6;
pub const TYPE_GOAWAY: u8 = 0x7;
pub const TYPE_WINDOW_UPDATE: u8 = 0x8;
pub const TYPE_CONTINUATION: u8 = 0x9;

// Flag bits.
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

/// Stream dependency and weight from a PRIORITY frame or HEADERS prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

/// One HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// DATA (0x0): request or response body bytes. Padding is preserved
    /// so flow control can account for the full wire payload.
    Data {
        stream_id: u32,
        payload: Vec<u8>,
        end_stream: bool,
        padding: Option<u8>,
    },
    /// HEADERS (0x1): HPACK-encoded header block fragment.
    Headers {
        stream_id: u32,
        block: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
    },
    /// PRIORITY (0x2): advisory stream weighting.
    Priority { stream_id: u32, priority: Priority },
    /// RST_STREAM (0x3): abrupt stream termination.
    RstStream { stream_id: u32, error_code: ErrorCode },
    /// SETTINGS (0x4): connection parameters, always on stream 0.
    Settings { ack: bool, settings: Settings },
    /// PUSH_PROMISE (0x5): server-initiated stream reservation.
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        block: Vec<u8>,
        end_headers: bool,
    },
    /// PING (0x6): liveness probe with 8 opaque bytes.
    Ping { ack: bool, data: [u8; 8] },
    /// GOAWAY (0x7): shutdown signal with a retryability boundary.
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    /// WINDOW_UPDATE (0x8): flow control credit.
    WindowUpdate { stream_id: u32, increment: u32 },
    /// CONTINUATION (0x9): header block continuation.
    Continuation {
        stream_id: u32,
        block: Vec<u8>,
        end_headers: bool,
    },
    /// Any type outside the RFC 7540 baseline; discarded by the
    /// connection (RFC 7540 Section 4.1).
    Unknown {
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        payload: Vec<u8>,
    },
}

/// Decoded 9-byte frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
}

/// Read the frame header at the start of `buf` without consuming payload.
pub fn peek_header(buf: &[u8]) -> Option<FrameHeader> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }
    Some(FrameHeader {
        length: u32::from_be_bytes([0, buf[0], buf[1], buf[2]]),
        frame_type: buf[3],
        flags: buf[4],
        stream_id: be_u31(&buf[5..9]),
    })
}

fn put_header(buf: &mut Vec<u8>, length: u32, frame_type: u8, flags: u8, stream_id: u32) {
    buf.extend_from_slice(&length.to_be_bytes()[1..]);
    buf.push(frame_type);
    buf.push(flags);
    buf.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Read a 31-bit field, dropping the reserved high bit.
fn be_u31(b: &[u8]) -> u32 {
    be_u32(b) & 0x7fff_ffff
}

/// Remove the pad-length octet and trailing padding when PADDED is set.
/// Returns the unpadded payload and the pad length.
fn split_padding(payload: &[u8], flags: u8) -> Result<(&[u8], Option<u8>), H2Error> {
    if flags & FLAG_PADDED == 0 {
        return Ok((payload, None));
    }
    let (&pad_len, rest) = payload
        .split_first()
        .ok_or(H2Error::FrameSize)?;
    if usize::from(pad_len) > rest.len() {
        return Err(H2Error::Protocol("padding exceeds payload".into()));
    }
    Ok((&rest[..rest.len() - usize::from(pad_len)], Some(pad_len)))
}

/// Parse one frame from the start of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` on success, `Ok(None)` when fewer
/// than `9 + length` bytes are available, and `Err` on a protocol
/// violation. A zero WINDOW_UPDATE increment on a non-zero stream is the
/// one stream-scoped error the codec reports; everything else is fatal to
/// the connection.
pub fn parse(buf: &[u8], max_frame_size: u32) -> Result<Option<(Frame, usize)>, H2Error> {
    let Some(header) = peek_header(buf) else {
        return Ok(None);
    };

    if header.length > max_frame_size {
        return Err(H2Error::FrameSize);
    }

    let total = FRAME_HEADER_LEN + header.length as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = &buf[FRAME_HEADER_LEN..total];
    let flags = header.flags;
    let stream_id = header.stream_id;

    let frame = match header.frame_type {
        TYPE_DATA => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("DATA on stream 0".into()));
            }
            let (data, padding) = split_padding(payload, flags)?;
            Frame::Data {
                stream_id,
                payload: data.to_vec(),
                end_stream: flags & FLAG_END_STREAM != 0,
                padding,
            }
        }
        TYPE_HEADERS => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("HEADERS on stream 0".into()));
            }
            let (data, _) = split_padding(payload, flags)?;
            let (priority, block) = if flags & FLAG_PRIORITY != 0 {
                if data.len() < 5 {
                    return Err(H2Error::FrameSize);
                }
                (Some(parse_priority(data)), &data[5..])
            } else {
                (None, data)
            };
            Frame::Headers {
                stream_id,
                block: block.to_vec(),
                end_stream: flags & FLAG_END_STREAM != 0,
                end_headers: flags & FLAG_END_HEADERS != 0,
                priority,
            }
        }
        TYPE_PRIORITY => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("PRIORITY on stream 0".into()));
            }
            if payload.len() != 5 {
                return Err(H2Error::FrameSize);
            }
            Frame::Priority {
                stream_id,
                priority: parse_priority(payload),
            }
        }
        TYPE_RST_STREAM => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("RST_STREAM on stream 0".into()));
            }
            if payload.len() != 4 {
                return Err(H2Error::FrameSize);
            }
            Frame::RstStream {
                stream_id,
                error_code: ErrorCode::from_u32(be_u32(payload)),
            }
        }
        TYPE_SETTINGS => {
            if stream_id != 0 {
                return Err(H2Error::Protocol("SETTINGS on non-zero stream".into()));
            }
            if flags & FLAG_ACK != 0 {
                if !payload.is_empty() {
                    return Err(H2Error::FrameSize);
                }
                Frame::Settings {
                    ack: true,
                    settings: Settings::default(),
                }
            } else {
                Frame::Settings {
                    ack: false,
                    settings: Settings::decode(payload)?,
                }
            }
        }
        TYPE_PUSH_PROMISE => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("PUSH_PROMISE on stream 0".into()));
            }
            let (data, _) = split_padding(payload, flags)?;
            if data.len() < 4 {
                return Err(H2Error::FrameSize);
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id: be_u31(data),
                block: data[4..].to_vec(),
                end_headers: flags & FLAG_END_HEADERS != 0,
            }
        }
        TYPE_PING => {
            if stream_id != 0 {
                return Err(H2Error::Protocol("PING on non-zero stream".into()));
            }
            if payload.len() != 8 {
                return Err(H2Error::FrameSize);
            }
            let mut data = [0u8; 8];
            data.copy_from_slice(payload);
            Frame::Ping {
                ack: flags & FLAG_ACK != 0,
                data,
            }
        }
        TYPE_GOAWAY => {
            if stream_id != 0 {
                return Err(H2Error::Protocol("GOAWAY on non-zero stream".into()));
            }
            if payload.len() < 8 {
                return Err(H2Error::FrameSize);
            }
            Frame::GoAway {
                last_stream_id: be_u31(payload),
                error_code: ErrorCode::from_u32(be_u32(&payload[4..8])),
                debug_data: payload[8..].to_vec(),
            }
        }
        TYPE_WINDOW_UPDATE => {
            if payload.len() != 4 {
                return Err(H2Error::FrameSize);
            }
            let increment = be_u31(payload);
            if increment == 0 {
                return Err(if stream_id == 0 {
                    H2Error::Protocol("zero WINDOW_UPDATE on stream 0".into())
                } else {
                    H2Error::Stream {
                        id: stream_id,
                        code: ErrorCode::FlowControlError,
                    }
                });
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            }
        }
        TYPE_CONTINUATION => {
            if stream_id == 0 {
                return Err(H2Error::Protocol("CONTINUATION on stream 0".into()));
            }
            Frame::Continuation {
                stream_id,
                block: payload.to_vec(),
                end_headers: flags & FLAG_END_HEADERS != 0,
            }
        }
        other => Frame::Unknown {
            frame_type: other,
            flags,
            stream_id,
            payload: payload.to_vec(),
        },
    };

    Ok(Some((frame, total)))
}

fn parse_priority(data: &[u8]) -> Priority {
    let raw = be_u32(data);
    Priority {
        exclusive: raw & 0x8000_0000 != 0,
        dependency: raw & 0x7fff_ffff,
        weight: data[4],
    }
}

impl Frame {
    /// Serialize this frame (header + payload) into `buf`.
    ///
    /// DATA frames longer than the peer's MAX_FRAME_SIZE are never
    /// constructed; the connection splits bodies before encoding.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
                padding,
            } => {
                let mut flags = if *end_stream { FLAG_END_STREAM } else { 0 };
                let mut length = payload.len() as u32;
                if let Some(pad) = padding {
                    flags |= FLAG_PADDED;
                    length += 1 + u32::from(*pad);
                }
                put_header(buf, length, TYPE_DATA, flags, *stream_id);
                if let Some(pad) = padding {
                    buf.push(*pad);
                    buf.extend_from_slice(payload);
                    buf.resize(buf.len() + usize::from(*pad), 0);
                } else {
                    buf.extend_from_slice(payload);
                }
            }
            Frame::Headers {
                stream_id,
                block,
                end_stream,
                end_headers,
                priority,
            } => {
                let mut flags = 0u8;
                if *end_stream {
                    flags |= FLAG_END_STREAM;
                }
                if *end_headers {
                    flags |= FLAG_END_HEADERS;
                }
                let mut length = block.len() as u32;
                if priority.is_some() {
                    flags |= FLAG_PRIORITY;
                    length += 5;
                }
                put_header(buf, length, TYPE_HEADERS, flags, *stream_id);
                if let Some(pri) = priority {
                    put_priority(buf, pri);
                }
                buf.extend_from_slice(block);
            }
            Frame::Priority {
                stream_id,
                priority,
            } => {
                put_header(buf, 5, TYPE_PRIORITY, 0, *stream_id);
                put_priority(buf, priority);
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                put_header(buf, 4, TYPE_RST_STREAM, 0, *stream_id);
                buf.extend_from_slice(&(*error_code as u32).to_be_bytes());
            }
            Frame::Settings { ack, settings } => {
                if *ack {
                    put_header(buf, 0, TYPE_SETTINGS, FLAG_ACK, 0);
                } else {
                    let payload = settings.encode_to_vec();
                    put_header(buf, payload.len() as u32, TYPE_SETTINGS, 0, 0);
                    buf.extend_from_slice(&payload);
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                block,
                end_headers,
            } => {
                let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
                put_header(
                    buf,
                    4 + block.len() as u32,
                    TYPE_PUSH_PROMISE,
                    flags,
                    *stream_id,
                );
                buf.extend_from_slice(&(*promised_stream_id & 0x7fff_ffff).to_be_bytes());
                buf.extend_from_slice(block);
            }
            Frame::Ping { ack, data } => {
                let flags = if *ack { FLAG_ACK } else { 0 };
                put_header(buf, 8, TYPE_PING, flags, 0);
                buf.extend_from_slice(data);
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                put_header(buf, 8 + debug_data.len() as u32, TYPE_GOAWAY, 0, 0);
                buf.extend_from_slice(&(*last_stream_id & 0x7fff_ffff).to_be_bytes());
                buf.extend_from_slice(&(*error_code as u32).to_be_bytes());
                buf.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                put_header(buf, 4, TYPE_WINDOW_UPDATE, 0, *stream_id);
                buf.extend_from_slice(&(*increment & 0x7fff_ffff).to_be_bytes());
            }
            Frame::Continuation {
                stream_id,
                block,
                end_headers,
            } => {
                let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
                put_header(buf, block.len() as u32, TYPE_CONTINUATION, flags, *stream_id);
                buf.extend_from_slice(block);
            }
            Frame::Unknown {
                frame_type,
                flags,
                stream_id,
                payload,
            } => {
                put_header(buf, payload.len() as u32, *frame_type, *flags, *stream_id);
                buf.extend_from_slice(payload);
            }
        }
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

fn put_priority(buf: &mut Vec<u8>, priority: &Priority) {
    let raw = if priority.exclusive {
        priority.dependency | 0x8000_0000
    } else {
        priority.dependency
    };
    buf.extend_from_slice(&raw.to_be_bytes());
    buf.push(priority.weight);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_round_trip(frame: Frame) {
        let wire = frame.encode_to_vec();
        let (parsed, consumed) = parse(&wire, 16_384).unwrap().unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(parsed, frame);
    }

    #[test]
    fn data_round_trip() {
        assert_round_trip(Frame::Data {
            stream_id: 1,
            payload: b"hello".to_vec(),
            end_stream: true,
            padding: None,
        });
    }

    #[test]
    fn padded_data_round_trip() {
        assert_round_trip(Frame::Data {
            stream_id: 3,
            payload: b"body".to_vec(),
            end_stream: false,
            padding: Some(7),
        });
    }

    #[test]
    fn padded_empty_data_round_trip() {
        assert_round_trip(Frame::Data {
            stream_id: 5,
            payload: Vec::new(),
            end_stream: true,
            padding: Some(16),
        });
    }

    #[test]
    fn headers_round_trip() {
        assert_round_trip(Frame::Headers {
            stream_id: 3,
            block: vec![0x82, 0x86, 0x84],
            end_stream: false,
            end_headers: true,
            priority: None,
        });
    }

    #[test]
    fn headers_with_priority_round_trip() {
        assert_round_trip(Frame::Headers {
            stream_id: 1,
            block: vec![0x82],
            end_stream: true,
            end_headers: true,
            priority: Some(Priority {
                exclusive: true,
                dependency: 0,
                weight: 255,
            }),
        });
    }

    #[test]
    fn settings_round_trip() {
        assert_round_trip(Frame::Settings {
            ack: false,
            settings: Settings {
                max_concurrent_streams: Some(64),
                ..Settings::default()
            },
        });
        assert_round_trip(Frame::Settings {
            ack: true,
            settings: Settings::default(),
        });
    }

    #[test]
    fn push_promise_round_trip() {
        assert_round_trip(Frame::PushPromise {
            stream_id: 1,
            promised_stream_id: 2,
            block: vec![0x82],
            end_headers: true,
        });
    }

    #[test]
    fn ping_goaway_window_update_rst_round_trip() {
        assert_round_trip(Frame::Ping {
            ack: false,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
        });
        assert_round_trip(Frame::GoAway {
            last_stream_id: 5,
            error_code: ErrorCode::NoError,
            debug_data: b"bye".to_vec(),
        });
        assert_round_trip(Frame::WindowUpdate {
            stream_id: 1,
            increment: 1000,
        });
        assert_round_trip(Frame::RstStream {
            stream_id: 1,
            error_code: ErrorCode::Cancel,
        });
    }

    #[test]
    fn continuation_round_trip() {
        assert_round_trip(Frame::Continuation {
            stream_id: 7,
            block: vec![0x84],
            end_headers: false,
        });
    }

    #[test]
    fn unknown_type_passes_through() {
        assert_round_trip(Frame::Unknown {
            frame_type: 0xfe,
            flags: 0x42,
            stream_id: 9,
            payload: b"ext".to_vec(),
        });
    }

    #[test]
    fn incomplete_frame_needs_more() {
        let frame = Frame::Data {
            stream_id: 1,
            payload: b"hello".to_vec(),
            end_stream: false,
            padding: None,
        };
        let wire = frame.encode_to_vec();
        for cut in 0..wire.len() {
            assert!(parse(&wire[..cut], 16_384).unwrap().is_none(), "cut={cut}");
        }
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut wire = Vec::new();
        put_header(&mut wire, 20_000, TYPE_DATA, 0, 1);
        assert!(matches!(parse(&wire, 16_384), Err(H2Error::FrameSize)));
    }

    #[test]
    fn data_on_stream_zero_rejected() {
        let mut wire = Vec::new();
        put_header(&mut wire, 0, TYPE_DATA, 0, 0);
        assert!(matches!(parse(&wire, 16_384), Err(H2Error::Protocol(_))));
    }

    #[test]
    fn bad_padding_rejected() {
        let mut wire = Vec::new();
        put_header(&mut wire, 2, TYPE_DATA, FLAG_PADDED, 1);
        wire.extend_from_slice(&[5, 0]); // pad length 5, 1 byte of payload left
        assert!(matches!(parse(&wire, 16_384), Err(H2Error::Protocol(_))));
    }

    #[test]
    fn zero_window_increment_split() {
        // Stream 0: connection error.
        let mut wire = Vec::new();
        put_header(&mut wire, 4, TYPE_WINDOW_UPDATE, 0, 0);
        wire.extend_from_slice(&[0; 4]);
        assert!(matches!(parse(&wire, 16_384), Err(H2Error::Protocol(_))));

        // Stream 1: stream-scoped flow control error.
        let mut wire = Vec::new();
        put_header(&mut wire, 4, TYPE_WINDOW_UPDATE, 0, 1);
        wire.extend_from_slice(&[0; 4]);
        assert!(matches!(
            parse(&wire, 16_384),
            Err(H2Error::Stream {
                id: 1,
                code: ErrorCode::FlowControlError
            })
        ));
    }

    #[test]
    fn settings_length_not_multiple_of_six_rejected() {
        let mut wire = Vec::new();
        put_header(&mut wire, 5, TYPE_SETTINGS, 0, 0);
        wire.extend_from_slice(&[0; 5]);
        assert!(parse(&wire, 16_384).is_err());
    }

    #[test]
    fn settings_ack_with_payload_rejected() {
        let mut wire = Vec::new();
        put_header(&mut wire, 6, TYPE_SETTINGS, FLAG_ACK, 0);
        wire.extend_from_slice(&[0; 6]);
        assert!(matches!(parse(&wire, 16_384), Err(H2Error::FrameSize)));
    }

    #[test]
    fn reserved_bit_cleared_on_parse() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&[0, 0, 4, TYPE_WINDOW_UPDATE, 0]);
        wire.extend_from_slice(&0xffff_ffffu32.to_be_bytes()); // reserved bit set
        wire.extend_from_slice(&100u32.to_be_bytes());
        let (frame, _) = parse(&wire, 16_384).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::WindowUpdate {
                stream_id: 0x7fff_ffff,
                increment: 100
            }
        );
    }
}
