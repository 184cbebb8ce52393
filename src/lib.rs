//! Sans-IO HTTP/2 client connection core.
//!
//! This crate implements the per-connection state machine of an HTTP/2
//! client: framing, SETTINGS negotiation, flow control, HPACK, the stream
//! lifecycle, server push acceptance, and a credit-gated admission queue
//! in front of stream creation. It owns no socket and spawns no tasks --
//! the embedding layer feeds bytes in via `recv()`, pulls bytes out via
//! `take_pending_send()`, and drains completion events with
//! `poll_event()`.
//!
//! # Architecture
//!
//! ```text
//!   TLS bytes (ALPN "h2")
//!        |
//!   +----v--------------+
//!   | Connection        |  framing + HPACK + flow control
//!   | AdmissionQueue    |  Event: StreamCompleted, PushPromise, ...
//!   +-------------------+
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use h2_conn::{ConnConfig, Connection, Event, Request};
//!
//! let mut conn = Connection::new(ConnConfig::default());
//!
//! // Ship the connection preface (magic + SETTINGS) to the transport.
//! transport_send(&conn.take_pending_send());
//!
//! // Submit a request; it is released once the peer's concurrency
//! // limit permits.
//! let id = conn.submit(
//!     Request::new("GET", "/").authority("example.com"),
//! )?;
//!
//! // Feed received bytes, flush whatever the state machine queued.
//! conn.recv(&received)?;
//! transport_send(&conn.take_pending_send());
//!
//! // Drain events.
//! while let Some(event) = conn.poll_event() {
//!     match event {
//!         Event::StreamCompleted { response, .. } => { /* ... */ }
//!         Event::PushPromise { promised_stream_id, .. } => { /* ... */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod admission;
pub mod config;
pub mod connection;
pub mod error;
pub mod flowcontrol;
pub mod frame;
pub mod hpack;
mod huffman;
pub mod response;
pub mod settings;
mod stream;

pub use admission::{Request, RequestId};
pub use config::{ConnConfig, Scheme};
pub use connection::{CloseReason, Connection, Event};
pub use error::{ErrorCode, H2Error};
pub use frame::Frame;
pub use hpack::HeaderField;
pub use response::{Response, StreamOutcome};
pub use settings::Settings;
pub use stream::StreamState;
