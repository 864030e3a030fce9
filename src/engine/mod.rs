//! The protocol engine boundary.
//!
//! The async layer never touches frames or HPACK directly. It drives an
//! implementation of [`ProtocolEngine`] and reacts to the [`Event`]s it
//! returns. [`H2Engine`] is the bundled HTTP/2 implementation; tests and
//! embedders can supply their own.

mod h2;

pub use self::h2::H2Engine;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::frame::Priority;
use crate::hpack::Header;

/// Something that happened on the connection, in the order the engine saw it.
///
/// Every variant is handled by [`EventDispatcher`](crate::EventDispatcher)
/// with an exhaustive `match`; adding a variant is a compile error there
/// until it is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// First header block on a stream the peer opened.
    RequestReceived { stream_id: u32, headers: Vec<Header> },
    /// First header block on a stream we opened.
    ResponseReceived { stream_id: u32, headers: Vec<Header> },
    DataReceived {
        stream_id: u32,
        data: Bytes,
        /// Bytes this frame took out of the inbound window, padding included.
        flow_controlled_length: usize,
    },
    /// The peer granted more outbound window. `stream_id == 0` is the
    /// connection window.
    WindowUpdated { stream_id: u32, delta: u32 },
    /// Trailing header block; always followed by `StreamEnded`.
    TrailersReceived { stream_id: u32, headers: Vec<Header> },
    /// The peer half-closed the stream.
    StreamEnded { stream_id: u32 },
    /// The stream is gone. `remote_reset` is false when the engine reset it
    /// itself in response to a stream error.
    StreamReset {
        stream_id: u32,
        error_code: u32,
        remote_reset: bool,
    },
    PriorityUpdated { stream_id: u32, priority: Priority },
    /// The peer's SETTINGS, already applied and acknowledged by the engine.
    RemoteSettingsChanged { changed: Vec<(u16, u32)> },
    /// The peer acknowledged our SETTINGS.
    SettingsAcknowledged,
    /// GOAWAY received; the connection is finished.
    ConnectionTerminated { error_code: u32, last_stream_id: u32 },
}

impl Event {
    /// Stream the event belongs to; 0 for connection-scoped events.
    pub fn stream_id(&self) -> u32 {
        match self {
            Event::RequestReceived { stream_id, .. }
            | Event::ResponseReceived { stream_id, .. }
            | Event::DataReceived { stream_id, .. }
            | Event::WindowUpdated { stream_id, .. }
            | Event::TrailersReceived { stream_id, .. }
            | Event::StreamEnded { stream_id }
            | Event::StreamReset { stream_id, .. }
            | Event::PriorityUpdated { stream_id, .. } => *stream_id,
            Event::RemoteSettingsChanged { .. }
            | Event::SettingsAcknowledged
            | Event::ConnectionTerminated { .. } => 0,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::RequestReceived { .. } => "request_received",
            Event::ResponseReceived { .. } => "response_received",
            Event::DataReceived { .. } => "data_received",
            Event::WindowUpdated { .. } => "window_updated",
            Event::TrailersReceived { .. } => "trailers_received",
            Event::StreamEnded { .. } => "stream_ended",
            Event::StreamReset { .. } => "stream_reset",
            Event::PriorityUpdated { .. } => "priority_updated",
            Event::RemoteSettingsChanged { .. } => "remote_settings_changed",
            Event::SettingsAcknowledged => "settings_acknowledged",
            Event::ConnectionTerminated { .. } => "connection_terminated",
        }
    }
}

/// Capability set of a sans-I/O protocol engine.
///
/// Engines never perform I/O: inbound bytes go in through
/// [`receive_data`](Self::receive_data), and everything the engine wants to
/// write accumulates until [`data_to_send`](Self::data_to_send) drains it.
pub trait ProtocolEngine: Send {
    /// Queue the connection preface / initial SETTINGS.
    fn initiate_connection(&mut self);

    /// Parse inbound bytes. An error is a connection-level protocol violation.
    fn receive_data(&mut self, data: &[u8]) -> Result<Vec<Event>, ProtocolError>;

    /// Drain queued output.
    fn data_to_send(&mut self) -> Bytes;

    fn send_headers(&mut self, stream_id: u32, headers: &[Header], end_stream: bool) -> Result<(), ProtocolError>;

    /// Send `data` as DATA frames. `data` must fit in
    /// [`local_flow_control_window`](Self::local_flow_control_window).
    fn send_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<(), ProtocolError>;

    /// The application consumed `len` bytes of the stream; give that much
    /// inbound window back to the peer.
    fn acknowledge_received_data(&mut self, stream_id: u32, len: usize) -> Result<(), ProtocolError>;

    /// Bytes that may be sent on `stream_id` right now.
    fn local_flow_control_window(&self, stream_id: u32) -> Result<usize, ProtocolError>;

    /// Reserve the next id for a locally initiated stream.
    fn next_available_stream_id(&mut self) -> Result<u32, ProtocolError>;

    fn reset_stream(&mut self, stream_id: u32, error_code: u32) -> Result<(), ProtocolError>;

    /// Queue GOAWAY with `error_code`.
    fn close_connection(&mut self, error_code: u32);
}
