//! HTTP/2 frame codec.
//!
//! Sans-I/O frame layer used by [`H2Engine`](crate::engine::H2Engine):
//! [`FrameDecoder`] turns raw bytes into [`Frame`]s (reassembling
//! CONTINUATION sequences and stripping padding), and the `put_*` functions
//! append encoded frames to an output buffer.
//!
//! Reference: RFC 9113 (HTTP/2)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// HTTP/2 frame types (RFC 9113 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 9113 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// HTTP/2 error codes (RFC 9113 Section 7)
#[allow(dead_code)]
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
    pub const CONNECT_ERROR: u32 = 0xa;
    pub const ENHANCE_YOUR_CALM: u32 = 0xb;
    pub const INADEQUATE_SECURITY: u32 = 0xc;
    pub const HTTP_1_1_REQUIRED: u32 = 0xd;
}

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Maximum accumulated header block size (256 KB).
/// Bounds memory spent on CONTINUATION floods.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Default SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest value SETTINGS_MAX_FRAME_SIZE may take.
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;

/// The HTTP/2 client connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with the HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.starts_with(CONNECTION_PREFACE)
}

/// Errors raised while decoding frames. All of them are connection errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid connection preface")]
    InvalidPreface,

    #[error("{frame} frame has invalid payload length {length}")]
    BadLength { frame: &'static str, length: u32 },

    #[error("frame of {length} bytes exceeds maximum frame size {max}")]
    TooLarge { length: u32, max: u32 },

    #[error("{0} frame must be associated with a stream")]
    ZeroStreamId(&'static str),

    #[error("{0} frame must be sent on stream 0")]
    NonZeroStreamId(&'static str),

    #[error("invalid padding length in {0} frame")]
    BadPadding(&'static str),

    #[error("header block too large ({size} bytes, max {max})")]
    HeaderBlockTooLarge { size: usize, max: usize },

    #[error("CONTINUATION for stream {got} but pending headers on stream {expected}")]
    ContinuationMismatch { got: u32, expected: u32 },

    #[error("unexpected CONTINUATION frame for stream {0}")]
    UnexpectedContinuation(u32),

    #[error("expected CONTINUATION for stream {0}")]
    ExpectedContinuation(u32),
}

impl FrameError {
    /// The HTTP/2 error code to report for this error.
    pub fn code(&self) -> u32 {
        match self {
            FrameError::BadLength { .. } | FrameError::TooLarge { .. } => {
                error_code::FRAME_SIZE_ERROR
            }
            _ => error_code::PROTOCOL_ERROR,
        }
    }
}

impl From<FrameError> for ProtocolError {
    fn from(err: FrameError) -> Self {
        ProtocolError::new(err.code(), err.to_string())
    }
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32, // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32, // 31 bits (high bit reserved)
}

impl FrameHeader {
    /// Parse a frame header from the front of `data`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }
        let length = u32::from_be_bytes([0, data[0], data[1], data[2]]);
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & 0x7FFF_FFFF;
        Some(Self {
            length,
            frame_type: data[3],
            flags: data[4],
            stream_id,
        })
    }

    /// Append the 9 encoded header bytes to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.length.to_be_bytes()[1..]);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & 0x7FFF_FFFF);
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn is_end_stream(&self) -> bool {
        self.has_flag(flags::END_STREAM)
    }

    pub fn is_end_headers(&self) -> bool {
        self.has_flag(flags::END_HEADERS)
    }
}

/// Stream dependency information carried by PRIORITY and HEADERS frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub depends_on: u32,
    pub weight: u8,
    pub exclusive: bool,
}

impl Priority {
    fn parse(data: &[u8]) -> Self {
        let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        Self {
            depends_on: raw & 0x7FFF_FFFF,
            exclusive: raw & 0x8000_0000 != 0,
            weight: data[4],
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete (CONTINUATION-assembled) header block, still HPACK-encoded.
    Headers {
        stream_id: u32,
        header_block: Bytes,
        end_stream: bool,
        priority: Option<Priority>,
    },
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        /// Full payload length including padding; this is what counts
        /// against flow-control windows.
        flow_controlled_length: usize,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    Settings {
        ack: bool,
        /// (identifier, value) pairs in wire order. Empty for ACK frames.
        settings: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: u32,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
}

#[derive(Debug)]
struct PendingHeaders {
    stream_id: u32,
    end_stream: bool,
    priority: Option<Priority>,
    block: BytesMut,
}

/// Incremental frame parser.
///
/// Feed it whatever the transport delivered; it buffers partial frames and
/// returns every frame completed by the new bytes.
#[derive(Debug)]
pub struct FrameDecoder {
    /// Bytes of incomplete frames
    buffer: BytesMut,
    preface_received: bool,
    max_frame_size: u32,
    /// Header block waiting for CONTINUATION + END_HEADERS
    pending: Option<PendingHeaders>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder for the client side: frames start immediately.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            preface_received: true,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pending: None,
        }
    }

    /// Decoder for the server side: the client preface must come first.
    pub fn expecting_preface() -> Self {
        Self {
            preface_received: false,
            ..Self::new()
        }
    }

    pub fn preface_received(&self) -> bool {
        self.preface_received
    }

    /// Largest frame payload we accept (our advertised SETTINGS_MAX_FRAME_SIZE).
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed raw bytes and get back every frame they complete.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buffer.extend_from_slice(data);

        if !self.preface_received {
            let n = self.buffer.len().min(CONNECTION_PREFACE.len());
            if self.buffer[..n] != CONNECTION_PREFACE[..n] {
                return Err(FrameError::InvalidPreface);
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(Vec::new());
            }
            self.buffer.advance(CONNECTION_PREFACE.len());
            self.preface_received = true;
        }

        let mut frames = Vec::new();
        while let Some(header) = FrameHeader::parse(&self.buffer) {
            if header.length > self.max_frame_size {
                return Err(FrameError::TooLarge {
                    length: header.length,
                    max: self.max_frame_size,
                });
            }
            if self.buffer.len() < header.total_size() {
                break;
            }
            let mut raw = self.buffer.split_to(header.total_size());
            raw.advance(FRAME_HEADER_LEN);
            if let Some(frame) = self.parse_frame(&header, raw.freeze())? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Drop all buffered and pending state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }

    fn parse_frame(&mut self, header: &FrameHeader, payload: Bytes) -> Result<Option<Frame>, FrameError> {
        if header.frame_type != frame_type::CONTINUATION {
            if let Some(pending) = &self.pending {
                return Err(FrameError::ExpectedContinuation(pending.stream_id));
            }
        }

        match header.frame_type {
            frame_type::DATA => {
                require_stream(header, "DATA")?;
                let data = strip_padding(header, payload, "DATA")?;
                Ok(Some(Frame::Data {
                    stream_id: header.stream_id,
                    data,
                    end_stream: header.is_end_stream(),
                    flow_controlled_length: header.length as usize,
                }))
            }
            frame_type::HEADERS => {
                require_stream(header, "HEADERS")?;
                let mut block = strip_padding(header, payload, "HEADERS")?;
                let priority = if header.has_flag(flags::PRIORITY) {
                    if block.len() < 5 {
                        return Err(FrameError::BadLength {
                            frame: "HEADERS",
                            length: header.length,
                        });
                    }
                    let priority = Priority::parse(&block);
                    block.advance(5);
                    Some(priority)
                } else {
                    None
                };

                if header.is_end_headers() {
                    return Ok(Some(Frame::Headers {
                        stream_id: header.stream_id,
                        header_block: block,
                        end_stream: header.is_end_stream(),
                        priority,
                    }));
                }
                check_block_size(block.len())?;
                self.pending = Some(PendingHeaders {
                    stream_id: header.stream_id,
                    end_stream: header.is_end_stream(),
                    priority,
                    block: BytesMut::from(&block[..]),
                });
                Ok(None)
            }
            frame_type::CONTINUATION => {
                let Some(pending) = self.pending.as_mut() else {
                    return Err(FrameError::UnexpectedContinuation(header.stream_id));
                };
                if pending.stream_id != header.stream_id {
                    return Err(FrameError::ContinuationMismatch {
                        got: header.stream_id,
                        expected: pending.stream_id,
                    });
                }
                let size = pending.block.len() + payload.len();
                if let Err(err) = check_block_size(size) {
                    self.pending = None;
                    return Err(err);
                }
                pending.block.extend_from_slice(&payload);
                if !header.is_end_headers() {
                    return Ok(None);
                }
                let Some(done) = self.pending.take() else {
                    return Ok(None);
                };
                Ok(Some(Frame::Headers {
                    stream_id: done.stream_id,
                    header_block: done.block.freeze(),
                    end_stream: done.end_stream,
                    priority: done.priority,
                }))
            }
            frame_type::PRIORITY => {
                require_stream(header, "PRIORITY")?;
                require_length(header, &payload, 5, "PRIORITY")?;
                Ok(Some(Frame::Priority {
                    stream_id: header.stream_id,
                    priority: Priority::parse(&payload),
                }))
            }
            frame_type::RST_STREAM => {
                require_stream(header, "RST_STREAM")?;
                require_length(header, &payload, 4, "RST_STREAM")?;
                Ok(Some(Frame::RstStream {
                    stream_id: header.stream_id,
                    error_code: read_u32(&payload),
                }))
            }
            frame_type::SETTINGS => {
                require_connection(header, "SETTINGS")?;
                let ack = header.has_flag(flags::ACK);
                if (ack && !payload.is_empty()) || payload.len() % 6 != 0 {
                    return Err(FrameError::BadLength {
                        frame: "SETTINGS",
                        length: header.length,
                    });
                }
                let settings = payload
                    .chunks_exact(6)
                    .map(|entry| (u16::from_be_bytes([entry[0], entry[1]]), read_u32(&entry[2..])))
                    .collect();
                Ok(Some(Frame::Settings { ack, settings }))
            }
            frame_type::PUSH_PROMISE => {
                require_stream(header, "PUSH_PROMISE")?;
                Ok(Some(Frame::PushPromise {
                    stream_id: header.stream_id,
                }))
            }
            frame_type::PING => {
                require_connection(header, "PING")?;
                require_length(header, &payload, 8, "PING")?;
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Ok(Some(Frame::Ping {
                    ack: header.has_flag(flags::ACK),
                    data,
                }))
            }
            frame_type::GOAWAY => {
                require_connection(header, "GOAWAY")?;
                if payload.len() < 8 {
                    return Err(FrameError::BadLength {
                        frame: "GOAWAY",
                        length: header.length,
                    });
                }
                Ok(Some(Frame::GoAway {
                    last_stream_id: read_u32(&payload) & 0x7FFF_FFFF,
                    error_code: read_u32(&payload[4..]),
                }))
            }
            frame_type::WINDOW_UPDATE => {
                require_length(header, &payload, 4, "WINDOW_UPDATE")?;
                Ok(Some(Frame::WindowUpdate {
                    stream_id: header.stream_id,
                    increment: read_u32(&payload) & 0x7FFF_FFFF,
                }))
            }
            // Unknown frame types must be ignored (RFC 9113 Section 4.1)
            _ => Ok(None),
        }
    }
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

fn require_stream(header: &FrameHeader, frame: &'static str) -> Result<(), FrameError> {
    if header.stream_id == 0 {
        return Err(FrameError::ZeroStreamId(frame));
    }
    Ok(())
}

fn require_connection(header: &FrameHeader, frame: &'static str) -> Result<(), FrameError> {
    if header.stream_id != 0 {
        return Err(FrameError::NonZeroStreamId(frame));
    }
    Ok(())
}

fn require_length(header: &FrameHeader, payload: &[u8], len: usize, frame: &'static str) -> Result<(), FrameError> {
    if payload.len() != len {
        return Err(FrameError::BadLength {
            frame,
            length: header.length,
        });
    }
    Ok(())
}

fn check_block_size(size: usize) -> Result<(), FrameError> {
    if size > MAX_HEADER_BLOCK_SIZE {
        return Err(FrameError::HeaderBlockTooLarge {
            size,
            max: MAX_HEADER_BLOCK_SIZE,
        });
    }
    Ok(())
}

/// Remove the pad-length byte and trailing padding when PADDED is set.
fn strip_padding(header: &FrameHeader, mut payload: Bytes, frame: &'static str) -> Result<Bytes, FrameError> {
    if !header.has_flag(flags::PADDED) {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(FrameError::BadPadding(frame));
    }
    let pad_length = payload[0] as usize;
    if pad_length >= payload.len() {
        return Err(FrameError::BadPadding(frame));
    }
    payload.truncate(payload.len() - pad_length);
    payload.advance(1);
    Ok(payload)
}

fn put_frame_header(dst: &mut BytesMut, length: usize, frame_type: u8, flags: u8, stream_id: u32) {
    FrameHeader {
        length: length as u32,
        frame_type,
        flags,
        stream_id,
    }
    .encode(dst);
}

/// Append a HEADERS frame, followed by CONTINUATION frames when the block does
/// not fit in `max_frame_size`.
pub fn put_headers(dst: &mut BytesMut, stream_id: u32, block: &[u8], end_stream: bool, max_frame_size: usize) {
    let mut chunks = block.chunks(max_frame_size.max(1));
    let first = chunks.next().unwrap_or(&[]);
    let rest: Vec<&[u8]> = chunks.collect();

    let mut flags_byte = if end_stream { flags::END_STREAM } else { 0 };
    if rest.is_empty() {
        flags_byte |= flags::END_HEADERS;
    }
    put_frame_header(dst, first.len(), frame_type::HEADERS, flags_byte, stream_id);
    dst.put_slice(first);

    let last = rest.len().saturating_sub(1);
    for (i, chunk) in rest.iter().enumerate() {
        put_continuation(dst, stream_id, chunk, i == last);
    }
}

/// Append a CONTINUATION frame.
pub fn put_continuation(dst: &mut BytesMut, stream_id: u32, payload: &[u8], end_headers: bool) {
    let flags_byte = if end_headers { flags::END_HEADERS } else { 0 };
    put_frame_header(dst, payload.len(), frame_type::CONTINUATION, flags_byte, stream_id);
    dst.put_slice(payload);
}

/// Append a single DATA frame. Callers split payloads to the peer's frame size.
pub fn put_data(dst: &mut BytesMut, stream_id: u32, data: &[u8], end_stream: bool) {
    let flags_byte = if end_stream { flags::END_STREAM } else { 0 };
    put_frame_header(dst, data.len(), frame_type::DATA, flags_byte, stream_id);
    dst.put_slice(data);
}

/// Append a SETTINGS frame carrying the given (identifier, value) pairs.
pub fn put_settings(dst: &mut BytesMut, settings: &[(u16, u32)]) {
    put_frame_header(dst, settings.len() * 6, frame_type::SETTINGS, 0, 0);
    for (id, value) in settings {
        dst.put_u16(*id);
        dst.put_u32(*value);
    }
}

pub fn put_settings_ack(dst: &mut BytesMut) {
    put_frame_header(dst, 0, frame_type::SETTINGS, flags::ACK, 0);
}

pub fn put_ping(dst: &mut BytesMut, ack: bool, data: [u8; 8]) {
    let flags_byte = if ack { flags::ACK } else { 0 };
    put_frame_header(dst, 8, frame_type::PING, flags_byte, 0);
    dst.put_slice(&data);
}

/// Append a WINDOW_UPDATE frame; stream 0 updates the connection window.
pub fn put_window_update(dst: &mut BytesMut, stream_id: u32, increment: u32) {
    put_frame_header(dst, 4, frame_type::WINDOW_UPDATE, 0, stream_id);
    dst.put_u32(increment & 0x7FFF_FFFF);
}

pub fn put_rst_stream(dst: &mut BytesMut, stream_id: u32, error_code: u32) {
    put_frame_header(dst, 4, frame_type::RST_STREAM, 0, stream_id);
    dst.put_u32(error_code);
}

pub fn put_goaway(dst: &mut BytesMut, last_stream_id: u32, error_code: u32, debug_data: &[u8]) {
    put_frame_header(dst, 8 + debug_data.len(), frame_type::GOAWAY, 0, 0);
    dst.put_u32(last_stream_id & 0x7FFF_FFFF);
    dst.put_u32(error_code);
    dst.put_slice(debug_data);
}
