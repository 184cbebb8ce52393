//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5).
//!
//! Two instances live on every connection: the local settings (advertised
//! in the handshake, governs what we accept) and the peer settings
//! (received on stream 0, governs what we send).

use crate::error::H2Error;

const ID_HEADER_TABLE_SIZE: u16 = 0x1;
const ID_ENABLE_PUSH: u16 = 0x2;
const ID_MAX_CONCURRENT_STREAMS: u16 = 0x3;
const ID_INITIAL_WINDOW_SIZE: u16 = 0x4;
const ID_MAX_FRAME_SIZE: u16 = 0x5;
const ID_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// The six RFC 7540 Section 6.5.2 parameters.
///
/// `None` for `max_concurrent_streams` / `max_header_list_size` means the
/// peer advertised nothing, i.e. unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1). Default 4096.
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2). Default enabled.
    pub enable_push: bool,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3). Default unbounded.
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4). Default 65535.
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5). Default 16384.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6). Default unbounded.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Defaults for the client role. Push stays enabled; promised streams
    /// are surfaced upward as promise events.
    pub fn client_default() -> Self {
        Self::default()
    }

    /// Serialize as a sequence of 6-byte (identifier, value) entries.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        push_entry(buf, ID_HEADER_TABLE_SIZE, self.header_table_size);
        push_entry(buf, ID_ENABLE_PUSH, u32::from(self.enable_push));
        if let Some(v) = self.max_concurrent_streams {
            push_entry(buf, ID_MAX_CONCURRENT_STREAMS, v);
        }
        push_entry(buf, ID_INITIAL_WINDOW_SIZE, self.initial_window_size);
        push_entry(buf, ID_MAX_FRAME_SIZE, self.max_frame_size);
        if let Some(v) = self.max_header_list_size {
            push_entry(buf, ID_MAX_HEADER_LIST_SIZE, v);
        }
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Parse a SETTINGS payload. The caller has already verified the
    /// length is a multiple of 6.
    pub fn decode(payload: &[u8]) -> Result<Self, H2Error> {
        if !payload.len().is_multiple_of(6) {
            return Err(H2Error::FrameSize);
        }
        let mut settings = Settings::default();
        for entry in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
            match id {
                ID_HEADER_TABLE_SIZE => settings.header_table_size = value,
                ID_ENABLE_PUSH => match value {
                    0 => settings.enable_push = false,
                    1 => settings.enable_push = true,
                    _ => {
                        return Err(H2Error::Protocol("ENABLE_PUSH must be 0 or 1".into()));
                    }
                },
                ID_MAX_CONCURRENT_STREAMS => {
                    settings.max_concurrent_streams = Some(value);
                }
                ID_INITIAL_WINDOW_SIZE => {
                    if value > 0x7fff_ffff {
                        return Err(H2Error::FlowControl);
                    }
                    settings.initial_window_size = value;
                }
                ID_MAX_FRAME_SIZE => {
                    if !(16_384..=16_777_215).contains(&value) {
                        return Err(H2Error::Protocol("MAX_FRAME_SIZE out of range".into()));
                    }
                    settings.max_frame_size = value;
                }
                ID_MAX_HEADER_LIST_SIZE => {
                    settings.max_header_list_size = Some(value);
                }
                // Unknown identifiers MUST be ignored (RFC 7540 Section 6.5.2).
                _ => {}
            }
        }
        Ok(settings)
    }
}

fn push_entry(buf: &mut Vec<u8>, id: u16, value: u32) {
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let settings = Settings::default();
        let decoded = Settings::decode(&settings.encode_to_vec()).unwrap();
        assert_eq!(decoded, settings);
    }

    #[test]
    fn explicit_values_round_trip() {
        let settings = Settings {
            header_table_size: 8192,
            enable_push: false,
            max_concurrent_streams: Some(128),
            initial_window_size: 1_048_576,
            max_frame_size: 32_768,
            max_header_list_size: Some(65_536),
        };
        let decoded = Settings::decode(&settings.encode_to_vec()).unwrap();
        assert_eq!(decoded, settings);
    }

    #[test]
    fn enable_push_two_rejected() {
        let mut buf = Vec::new();
        push_entry(&mut buf, ID_ENABLE_PUSH, 2);
        assert!(matches!(
            Settings::decode(&buf),
            Err(H2Error::Protocol(_))
        ));
    }

    #[test]
    fn oversized_initial_window_rejected() {
        let mut buf = Vec::new();
        push_entry(&mut buf, ID_INITIAL_WINDOW_SIZE, 0x8000_0000);
        assert!(matches!(Settings::decode(&buf), Err(H2Error::FlowControl)));
    }

    #[test]
    fn max_frame_size_bounds() {
        for bad in [16_383u32, 16_777_216] {
            let mut buf = Vec::new();
            push_entry(&mut buf, ID_MAX_FRAME_SIZE, bad);
            assert!(Settings::decode(&buf).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn unknown_identifier_ignored() {
        let mut buf = Vec::new();
        push_entry(&mut buf, 0x42, 7);
        assert_eq!(Settings::decode(&buf).unwrap(), Settings::default());
    }

    #[test]
    fn truncated_entry_rejected() {
        let settings = Settings::default();
        let mut buf = settings.encode_to_vec();
        buf.pop();
        assert!(matches!(Settings::decode(&buf), Err(H2Error::FrameSize)));
    }
}
