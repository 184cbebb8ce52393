//! Connection-open configuration.

use crate::settings::Settings;

/// URI scheme placed in the `:scheme` pseudo-header of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Https,
    Http,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

/// Options recognized when a connection is opened.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Local SETTINGS advertised in the handshake.
    pub settings: Settings,
    /// Scheme for request pseudo-headers.
    pub scheme: Scheme,
    /// Hint to the supervising layer: restart this connection when it
    /// closes. Echoed in the close event; the core itself never
    /// reconnects.
    pub reconnect: bool,
    /// Admission budget used when the peer leaves MAX_CONCURRENT_STREAMS
    /// unbounded.
    pub concurrency_ceiling: u32,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            settings: Settings::client_default(),
            scheme: Scheme::default(),
            reconnect: false,
            concurrency_ceiling: 2_000_000_000,
        }
    }
}
