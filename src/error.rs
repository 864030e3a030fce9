//! Error types.
//!
//! Two layers: [`ProtocolError`] is what an engine reports when the peer
//! violates the protocol (the connection is unusable afterwards), and
//! [`Error`] is what the async stream API hands back to callers.

use crate::frame::error_code;

/// A connection-level protocol violation detected by the engine.
///
/// Carries the HTTP/2 error code that should go out in GOAWAY.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("protocol error ({code:#x}): {reason}")]
pub struct ProtocolError {
    pub code: u32,
    pub reason: String,
}

impl ProtocolError {
    pub fn new(code: u32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// PROTOCOL_ERROR with the given reason.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::new(error_code::PROTOCOL_ERROR, reason)
    }

    /// FLOW_CONTROL_ERROR with the given reason.
    pub fn flow_control(reason: impl Into<String>) -> Self {
        Self::new(error_code::FLOW_CONTROL_ERROR, reason)
    }

    /// COMPRESSION_ERROR with the given reason.
    pub fn compression(reason: impl Into<String>) -> Self {
        Self::new(error_code::COMPRESSION_ERROR, reason)
    }
}

/// Why a suspended stream operation was woken without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// The stream was reset, by the peer or locally.
    Reset { stream_id: u32, error_code: u32 },
    /// The whole connection went away.
    ConnectionClosed,
}

impl From<Cancellation> for Error {
    fn from(cause: Cancellation) -> Self {
        match cause {
            Cancellation::Reset {
                stream_id,
                error_code,
            } => Error::StreamReset {
                stream_id,
                error_code,
            },
            Cancellation::ConnectionClosed => Error::ConnectionClosed,
        }
    }
}

/// Errors returned by the async stream and connection API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `Buffer::read` / `Stream::recv_data` called with a negative size.
    #[error("invalid read size: {0}")]
    InvalidSize(isize),

    /// The stream was reset while (or before) the caller waited on it.
    #[error("stream {stream_id} was reset (error code {error_code:#x})")]
    StreamReset { stream_id: u32, error_code: u32 },

    /// The peer ended the stream and every header block was already taken.
    #[error("stream {0} has no more header blocks")]
    NoMoreHeaders(u32),

    /// The connection is closed; no further I/O is possible.
    #[error("connection closed")]
    ConnectionClosed,

    /// An engine event named a stream this connection does not track.
    #[error("unknown stream {0}")]
    UnknownStream(u32),

    /// A capability the caller asked for is not available.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors after which the connection cannot continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::UnknownStream(_)
                | Error::StreamReset { .. }
                | Error::NoMoreHeaders(_)
                | Error::InvalidSize(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
