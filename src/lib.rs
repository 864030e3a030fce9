//! h2-mux: async stream multiplexing over a sans-I/O HTTP/2 engine
//!
//! This crate sits between a byte transport and a synchronous protocol
//! engine. The engine parses frames and tracks protocol state; this layer
//! turns its events into per-stream async operations with flow control and
//! write backpressure.
//!
//! # Features
//!
//! - **Per-stream async API**: `recv_headers`, `recv_data`, `send_headers`,
//!   `send_data`, `reset`
//! - **Flow control**: sends are cut to the peer's window and suspend until
//!   WINDOW_UPDATE; consumed bytes are acknowledged back to the peer
//! - **Backpressure**: transports pause and resume all stream writers
//! - **Pluggable engine**: anything implementing [`ProtocolEngine`]; the
//!   bundled [`H2Engine`] speaks RFC 7540 framing with HPACK via fluke-hpack
//! - **Tokio driver**: [`spawn_connection`] / [`serve`] run a connection over
//!   any `AsyncRead + AsyncWrite`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use h2_mux::{service_fn, spawn_connection, Config, Header, NoHandler};
//!
//! # async fn run() -> h2_mux::Result<()> {
//! let (client_io, server_io) = tokio::io::duplex(64 * 1024);
//!
//! // Echo server: read the request body, send it back.
//! let echo = service_fn(|stream: h2_mux::Stream, _headers: Vec<Header>| async move {
//!     let body = stream.recv_data(None).await?;
//!     stream.send_headers(&[Header::new(":status", "200")], false).await?;
//!     stream.send_data(body, true).await
//! });
//! spawn_connection(server_io, Arc::new(echo), Config::server())?;
//!
//! let (conn, _task) = spawn_connection(client_io, Arc::new(NoHandler), Config::client())?;
//! let stream = conn.open_stream()?;
//! stream
//!     .send_headers(
//!         &[
//!             Header::new(":method", "POST"),
//!             Header::new(":scheme", "http"),
//!             Header::new(":path", "/echo"),
//!             Header::new(":authority", "localhost"),
//!         ],
//!         false,
//!     )
//!     .await?;
//! stream.send_data(&b"ping"[..], true).await?;
//!
//! let response = stream.recv_headers().await?;
//! assert_eq!(h2_mux::hpack::find(&response, ":status"), Some("200"));
//! assert_eq!(stream.recv_data(None).await?, "ping");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`ProtocolAdapter`] receives transport lifecycle calls and owns an
//!   [`EventDispatcher`]
//! - [`EventDispatcher`] routes engine [`Event`]s to streams and the
//!   [`Handler`]
//! - [`Connection`] serializes engine access, gates writers and tracks
//!   streams
//! - [`Stream`] is the application-facing handle, backed by a [`Buffer`]
//!
//! Server push, priority scheduling and TLS are out of scope.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod flow_control;
pub mod frame;
pub mod handler;
pub mod hpack;
pub mod protocol;
pub mod stream;
pub mod transport;

pub use buffer::Buffer;
pub use config::{Config, Role};
pub use connection::{Connection, WriteState};
pub use dispatcher::EventDispatcher;
pub use engine::{Event, H2Engine, ProtocolEngine};
pub use error::{Cancellation, Error, ProtocolError, Result};
pub use frame::{error_code, Priority};
pub use handler::{service_fn, Handler, NoHandler, ServiceFn};
pub use hpack::{Header, HpackDecoder, HpackEncoder};
pub use protocol::{serve, spawn_connection, ProtocolAdapter};
pub use stream::{Stream, StreamState};
pub use transport::{IoTransport, Transport, TransportEvent};

/// Lock `mutex`, taking the guard back from a poisoned lock.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
