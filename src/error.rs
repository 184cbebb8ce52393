//! Error taxonomy: RFC 7540 Section 7 error codes plus crate-local errors.

/// HTTP/2 error codes (RFC 7540 Section 7).
///
/// Carried on RST_STREAM and GOAWAY frames. Unknown codes map to
/// `InternalError` on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }
}

/// Errors produced by the HTTP/2 connection core.
///
/// `Stream` is the only stream-scoped variant: the connection answers it
/// with RST_STREAM and keeps running. Every other variant is fatal to the
/// connection and maps onto a GOAWAY error code via [`H2Error::goaway_code`].
#[derive(Debug, thiserror::Error)]
pub enum H2Error {
    /// A frame or frame sequence that violates the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Frame length outside the advertised MAX_FRAME_SIZE, or a
    /// fixed-length payload of the wrong size.
    #[error("frame size error")]
    FrameSize,

    /// Connection-level flow control violation (window underflow or
    /// overflow past 2^31 - 1).
    #[error("flow control error")]
    FlowControl,

    /// HPACK decoding failure. Always fatal: the dynamic tables are
    /// stateful across header blocks.
    #[error("compression error")]
    Compression,

    /// Stream-scoped error; the stream is reset, the connection survives.
    #[error("stream {id} error: {code:?}")]
    Stream { id: u32, code: ErrorCode },

    /// Operation attempted on a connection that is shutting down or closed.
    #[error("connection closed")]
    Closed,

    /// Invariant violation inside the core.
    #[error("internal error: {0}")]
    Internal(String),
}

impl H2Error {
    /// The RFC 7540 error code to carry on the GOAWAY frame this error
    /// triggers.
    pub fn goaway_code(&self) -> ErrorCode {
        match self {
            Self::Protocol(_) => ErrorCode::ProtocolError,
            Self::FrameSize => ErrorCode::FrameSizeError,
            Self::FlowControl => ErrorCode::FlowControlError,
            Self::Compression => ErrorCode::CompressionError,
            Self::Stream { code, .. } => *code,
            Self::Closed => ErrorCode::NoError,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}
