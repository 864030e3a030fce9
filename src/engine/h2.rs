//! HTTP/2 engine built on [`FrameDecoder`] and the HPACK wrapper.
//!
//! Tracks just enough per-stream state for the async layer: half-close
//! bookkeeping, outbound and inbound windows, and whether the leading header
//! block has been seen (so a second block is reported as trailers).

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use super::{Event, ProtocolEngine};
use crate::config::{Config, Role};
use crate::error::ProtocolError;
use crate::flow_control::{Window, DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};
use crate::frame::{self, error_code, settings_id, Frame, FrameDecoder, DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE};
use crate::hpack::{Header, HpackDecoder, HpackEncoder};

const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// Id reserved locally, no HEADERS sent yet.
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
}

impl StreamState {
    fn can_send(self) -> bool {
        matches!(self, StreamState::Idle | StreamState::Open | StreamState::HalfClosedRemote)
    }

    fn can_recv(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }
}

#[derive(Debug)]
struct StreamEntry {
    state: StreamState,
    send_window: Window,
    recv_window: Window,
    headers_received: bool,
}

/// Sans-I/O HTTP/2 connection state machine.
#[derive(Debug)]
pub struct H2Engine {
    role: Role,
    local_initial_window: u32,
    local_max_frame_size: u32,
    local_max_concurrent_streams: Option<u32>,
    decoder: FrameDecoder,
    hpack_decoder: HpackDecoder,
    hpack_encoder: HpackEncoder,
    outbound: BytesMut,
    /// Open streams only; closed streams are dropped.
    streams: HashMap<u32, StreamEntry>,
    send_window: Window,
    recv_window: Window,
    peer_initial_window: u32,
    peer_max_frame_size: u32,
    peer_max_concurrent_streams: Option<u32>,
    next_local_stream_id: u32,
    highest_remote_stream_id: u32,
    going_away: bool,
}

impl H2Engine {
    pub fn new(config: &Config) -> Self {
        let mut decoder = match config.role {
            Role::Client => FrameDecoder::new(),
            Role::Server => FrameDecoder::expecting_preface(),
        };
        decoder.set_max_frame_size(config.max_frame_size);

        Self {
            role: config.role,
            local_initial_window: config.initial_window_size,
            local_max_frame_size: config.max_frame_size,
            local_max_concurrent_streams: config.max_concurrent_streams,
            decoder,
            hpack_decoder: HpackDecoder::new(),
            hpack_encoder: HpackEncoder::new(),
            outbound: BytesMut::new(),
            streams: HashMap::new(),
            send_window: Window::default(),
            recv_window: Window::default(),
            peer_initial_window: DEFAULT_INITIAL_WINDOW_SIZE,
            peer_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            peer_max_concurrent_streams: None,
            next_local_stream_id: match config.role {
                Role::Client => 1,
                Role::Server => 2,
            },
            highest_remote_stream_id: 0,
            going_away: false,
        }
    }

    /// Number of streams that are not fully closed.
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    /// The peer's advertised SETTINGS_MAX_CONCURRENT_STREAMS, if any.
    pub fn peer_max_concurrent_streams(&self) -> Option<u32> {
        self.peer_max_concurrent_streams
    }

    pub fn is_going_away(&self) -> bool {
        self.going_away
    }

    fn is_remote_initiated(&self, stream_id: u32) -> bool {
        match self.role {
            Role::Server => stream_id % 2 == 1,
            Role::Client => stream_id % 2 == 0,
        }
    }

    /// True if `stream_id` was in use at some point and is now closed.
    fn was_closed(&self, stream_id: u32) -> bool {
        if self.is_remote_initiated(stream_id) {
            stream_id <= self.highest_remote_stream_id
        } else {
            stream_id < self.next_local_stream_id
        }
    }

    fn new_entry(&self, state: StreamState) -> StreamEntry {
        StreamEntry {
            state,
            send_window: Window::new(self.peer_initial_window),
            recv_window: Window::new(self.local_initial_window),
            headers_received: false,
        }
    }

    fn stream_closed(stream_id: u32) -> ProtocolError {
        ProtocolError::new(error_code::STREAM_CLOSED, format!("stream {} is closed", stream_id))
    }

    fn end_local(&mut self, stream_id: u32) {
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            return;
        };
        if entry.state == StreamState::HalfClosedRemote {
            self.streams.remove(&stream_id);
            trace!(stream_id, "stream closed");
        } else {
            entry.state = StreamState::HalfClosedLocal;
        }
    }

    fn end_remote(&mut self, stream_id: u32) {
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            return;
        };
        if entry.state == StreamState::HalfClosedLocal {
            self.streams.remove(&stream_id);
            trace!(stream_id, "stream closed");
        } else {
            entry.state = StreamState::HalfClosedRemote;
        }
    }

    /// Reset a stream because of a stream-level error and report it.
    fn reset_with(&mut self, stream_id: u32, code: u32, events: &mut Vec<Event>) {
        debug!(stream_id, error_code = code, "resetting stream after stream error");
        frame::put_rst_stream(&mut self.outbound, stream_id, code);
        self.streams.remove(&stream_id);
        events.push(Event::StreamReset {
            stream_id,
            error_code: code,
            remote_reset: false,
        });
    }

    /// Return flow-control credit we will never hand to the application.
    fn release_connection_window(&mut self, len: usize) -> Result<(), ProtocolError> {
        if len == 0 {
            return Ok(());
        }
        self.recv_window.increase(len as u32)?;
        frame::put_window_update(&mut self.outbound, 0, len as u32);
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame, events: &mut Vec<Event>) -> Result<(), ProtocolError> {
        match frame {
            Frame::Headers {
                stream_id,
                header_block,
                end_stream,
                priority,
            } => {
                // Always decode, the HPACK table must stay in sync.
                let headers = self.hpack_decoder.decode(&header_block)?;
                if !self.handle_headers(stream_id, headers, end_stream, events)? {
                    return Ok(());
                }
                if let Some(priority) = priority {
                    events.push(Event::PriorityUpdated { stream_id, priority });
                }
                if end_stream {
                    self.end_remote(stream_id);
                    events.push(Event::StreamEnded { stream_id });
                }
            }
            Frame::Data {
                stream_id,
                data,
                end_stream,
                flow_controlled_length,
            } => {
                self.recv_window.consume(flow_controlled_length)?;
                let receiving = self
                    .streams
                    .get(&stream_id)
                    .map(|entry| entry.state.can_recv())
                    .unwrap_or(false);
                if !receiving {
                    if !self.streams.contains_key(&stream_id) && !self.was_closed(stream_id) {
                        return Err(ProtocolError::protocol(format!("DATA on idle stream {}", stream_id)));
                    }
                    warn!(stream_id, "DATA on closed stream");
                    self.release_connection_window(flow_controlled_length)?;
                    frame::put_rst_stream(&mut self.outbound, stream_id, error_code::STREAM_CLOSED);
                    return Ok(());
                }

                let padding = flow_controlled_length - data.len();
                if let Some(entry) = self.streams.get_mut(&stream_id) {
                    if entry.recv_window.consume(flow_controlled_length).is_err() {
                        self.release_connection_window(flow_controlled_length)?;
                        self.reset_with(stream_id, error_code::FLOW_CONTROL_ERROR, events);
                        return Ok(());
                    }
                    if padding > 0 {
                        entry.recv_window.increase(padding as u32)?;
                        frame::put_window_update(&mut self.outbound, stream_id, padding as u32);
                    }
                }
                self.release_connection_window(padding)?;

                events.push(Event::DataReceived {
                    stream_id,
                    data,
                    flow_controlled_length,
                });
                if end_stream {
                    self.end_remote(stream_id);
                    events.push(Event::StreamEnded { stream_id });
                }
            }
            Frame::Priority { stream_id, priority } => {
                if priority.depends_on == stream_id {
                    return Err(ProtocolError::protocol(format!("stream {} depends on itself", stream_id)));
                }
                events.push(Event::PriorityUpdated { stream_id, priority });
            }
            Frame::RstStream { stream_id, error_code } => {
                if self.streams.remove(&stream_id).is_some() {
                    debug!(stream_id, error_code, "stream reset by peer");
                    events.push(Event::StreamReset {
                        stream_id,
                        error_code,
                        remote_reset: true,
                    });
                } else if !self.was_closed(stream_id) {
                    return Err(ProtocolError::protocol(format!("RST_STREAM on idle stream {}", stream_id)));
                }
            }
            Frame::Settings { ack: true, .. } => {
                events.push(Event::SettingsAcknowledged);
            }
            Frame::Settings { ack: false, settings } => {
                for &(id, value) in &settings {
                    self.apply_remote_setting(id, value, events)?;
                }
                frame::put_settings_ack(&mut self.outbound);
                events.push(Event::RemoteSettingsChanged { changed: settings });
            }
            Frame::PushPromise { stream_id } => {
                return Err(ProtocolError::protocol(format!(
                    "PUSH_PROMISE on stream {} but push is disabled",
                    stream_id
                )));
            }
            Frame::Ping { ack: false, data } => {
                frame::put_ping(&mut self.outbound, true, data);
            }
            Frame::Ping { ack: true, .. } => {}
            Frame::GoAway {
                last_stream_id,
                error_code,
            } => {
                self.going_away = true;
                events.push(Event::ConnectionTerminated {
                    error_code,
                    last_stream_id,
                });
            }
            Frame::WindowUpdate {
                stream_id: 0,
                increment,
            } => {
                if increment == 0 {
                    return Err(ProtocolError::protocol("zero WINDOW_UPDATE increment on connection"));
                }
                self.send_window.increase(increment)?;
                events.push(Event::WindowUpdated {
                    stream_id: 0,
                    delta: increment,
                });
            }
            Frame::WindowUpdate { stream_id, increment } => {
                let Some(entry) = self.streams.get_mut(&stream_id) else {
                    // Closed streams may still see updates in flight.
                    trace!(stream_id, "WINDOW_UPDATE for inactive stream ignored");
                    return Ok(());
                };
                if increment == 0 {
                    self.reset_with(stream_id, error_code::PROTOCOL_ERROR, events);
                } else if entry.send_window.increase(increment).is_err() {
                    self.reset_with(stream_id, error_code::FLOW_CONTROL_ERROR, events);
                } else {
                    events.push(Event::WindowUpdated {
                        stream_id,
                        delta: increment,
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns false when the block was dropped without opening a stream.
    fn handle_headers(
        &mut self,
        stream_id: u32,
        headers: Vec<Header>,
        end_stream: bool,
        events: &mut Vec<Event>,
    ) -> Result<bool, ProtocolError> {
        if let Some(entry) = self.streams.get_mut(&stream_id) {
            if !entry.state.can_recv() {
                return Err(Self::stream_closed(stream_id));
            }
            if !entry.headers_received {
                // Informational (1xx) responses leave room for the final one.
                let informational = headers
                    .iter()
                    .any(|h| h.name == ":status" && h.value.starts_with('1'));
                entry.headers_received = !informational;
                events.push(Event::ResponseReceived { stream_id, headers });
            } else {
                if !end_stream {
                    return Err(ProtocolError::protocol(format!(
                        "trailers on stream {} without END_STREAM",
                        stream_id
                    )));
                }
                events.push(Event::TrailersReceived { stream_id, headers });
            }
            return Ok(true);
        }

        if !self.is_remote_initiated(stream_id) || self.role == Role::Client {
            return Err(ProtocolError::protocol(format!(
                "HEADERS on stream {} which the peer cannot open",
                stream_id
            )));
        }
        if stream_id <= self.highest_remote_stream_id {
            return Err(Self::stream_closed(stream_id));
        }
        // Later frames on an ignored id are treated as on a closed stream.
        self.highest_remote_stream_id = stream_id;
        if self.going_away {
            trace!(stream_id, "ignoring new stream after GOAWAY");
            return Ok(false);
        }

        let mut entry = self.new_entry(StreamState::Open);
        entry.headers_received = true;
        self.streams.insert(stream_id, entry);
        debug!(stream_id, "remote stream opened");
        events.push(Event::RequestReceived { stream_id, headers });
        Ok(true)
    }

    fn apply_remote_setting(&mut self, id: u16, value: u32, events: &mut Vec<Event>) -> Result<(), ProtocolError> {
        match id {
            settings_id::INITIAL_WINDOW_SIZE => {
                if value as i64 > MAX_WINDOW_SIZE {
                    return Err(ProtocolError::flow_control(format!(
                        "SETTINGS_INITIAL_WINDOW_SIZE {} exceeds 2^31-1",
                        value
                    )));
                }
                let delta = value as i64 - self.peer_initial_window as i64;
                for (&stream_id, entry) in self.streams.iter_mut() {
                    entry.send_window.adjust(delta)?;
                    // Senders parked on an empty window must hear about the growth.
                    if delta > 0 {
                        events.push(Event::WindowUpdated {
                            stream_id,
                            delta: delta as u32,
                        });
                    }
                }
                self.peer_initial_window = value;
            }
            settings_id::MAX_FRAME_SIZE => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(ProtocolError::protocol(format!("invalid SETTINGS_MAX_FRAME_SIZE {}", value)));
                }
                self.peer_max_frame_size = value;
            }
            settings_id::ENABLE_PUSH => {
                if value > 1 {
                    return Err(ProtocolError::protocol(format!("invalid SETTINGS_ENABLE_PUSH {}", value)));
                }
            }
            settings_id::MAX_CONCURRENT_STREAMS => {
                self.peer_max_concurrent_streams = Some(value);
            }
            settings_id::HEADER_TABLE_SIZE | settings_id::MAX_HEADER_LIST_SIZE => {
                trace!(id, value, "setting noted");
            }
            _ => {
                // Unknown settings must be ignored.
            }
        }
        Ok(())
    }
}

impl ProtocolEngine for H2Engine {
    fn initiate_connection(&mut self) {
        if self.role == Role::Client {
            self.outbound.extend_from_slice(frame::CONNECTION_PREFACE);
        }
        let mut settings = vec![
            (settings_id::INITIAL_WINDOW_SIZE, self.local_initial_window),
            (settings_id::MAX_FRAME_SIZE, self.local_max_frame_size),
        ];
        if self.role == Role::Client {
            settings.push((settings_id::ENABLE_PUSH, 0));
        }
        if let Some(max) = self.local_max_concurrent_streams {
            settings.push((settings_id::MAX_CONCURRENT_STREAMS, max));
        }
        frame::put_settings(&mut self.outbound, &settings);

        // The connection window is not covered by SETTINGS.
        if self.local_initial_window > DEFAULT_INITIAL_WINDOW_SIZE {
            let bump = self.local_initial_window - DEFAULT_INITIAL_WINDOW_SIZE;
            self.recv_window = Window::new(self.local_initial_window);
            frame::put_window_update(&mut self.outbound, 0, bump);
        }
    }

    fn receive_data(&mut self, data: &[u8]) -> Result<Vec<Event>, ProtocolError> {
        let frames = self.decoder.decode(data)?;
        let mut events = Vec::with_capacity(frames.len());
        for frame in frames {
            self.handle_frame(frame, &mut events)?;
        }
        Ok(events)
    }

    fn data_to_send(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    fn send_headers(&mut self, stream_id: u32, headers: &[Header], end_stream: bool) -> Result<(), ProtocolError> {
        let entry = self
            .streams
            .get_mut(&stream_id)
            .filter(|entry| entry.state.can_send())
            .ok_or_else(|| Self::stream_closed(stream_id))?;
        if entry.state == StreamState::Idle {
            entry.state = StreamState::Open;
        }

        let block = self.hpack_encoder.encode(headers);
        frame::put_headers(
            &mut self.outbound,
            stream_id,
            &block,
            end_stream,
            self.peer_max_frame_size as usize,
        );
        if end_stream {
            self.end_local(stream_id);
        }
        Ok(())
    }

    fn send_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<(), ProtocolError> {
        let connection_available = self.send_window.available();
        let entry = self
            .streams
            .get_mut(&stream_id)
            .filter(|entry| matches!(entry.state, StreamState::Open | StreamState::HalfClosedRemote))
            .ok_or_else(|| Self::stream_closed(stream_id))?;

        let available = connection_available.min(entry.send_window.available());
        if data.len() > available {
            return Err(ProtocolError::flow_control(format!(
                "{} bytes exceed flow-control window of {} on stream {}",
                data.len(),
                available,
                stream_id
            )));
        }
        entry.send_window.consume(data.len())?;
        self.send_window.consume(data.len())?;

        if data.is_empty() {
            frame::put_data(&mut self.outbound, stream_id, &[], end_stream);
        } else {
            let mut chunks = data.chunks(self.peer_max_frame_size as usize).peekable();
            while let Some(chunk) = chunks.next() {
                let last = chunks.peek().is_none();
                frame::put_data(&mut self.outbound, stream_id, chunk, end_stream && last);
            }
        }
        if end_stream {
            self.end_local(stream_id);
        }
        Ok(())
    }

    fn acknowledge_received_data(&mut self, stream_id: u32, len: usize) -> Result<(), ProtocolError> {
        if len == 0 {
            return Ok(());
        }
        self.release_connection_window(len)?;
        if let Some(entry) = self.streams.get_mut(&stream_id) {
            if entry.state.can_recv() {
                entry.recv_window.increase(len as u32)?;
                frame::put_window_update(&mut self.outbound, stream_id, len as u32);
            }
        }
        Ok(())
    }

    fn local_flow_control_window(&self, stream_id: u32) -> Result<usize, ProtocolError> {
        let entry = self
            .streams
            .get(&stream_id)
            .ok_or_else(|| Self::stream_closed(stream_id))?;
        Ok(self.send_window.available().min(entry.send_window.available()))
    }

    fn next_available_stream_id(&mut self) -> Result<u32, ProtocolError> {
        let stream_id = self.next_local_stream_id;
        if stream_id > MAX_STREAM_ID {
            return Err(ProtocolError::protocol("stream ids exhausted"));
        }
        self.next_local_stream_id += 2;
        let entry = self.new_entry(StreamState::Idle);
        self.streams.insert(stream_id, entry);
        Ok(stream_id)
    }

    fn reset_stream(&mut self, stream_id: u32, error_code: u32) -> Result<(), ProtocolError> {
        if self.streams.remove(&stream_id).is_some() {
            frame::put_rst_stream(&mut self.outbound, stream_id, error_code);
        }
        Ok(())
    }

    fn close_connection(&mut self, error_code: u32) {
        if self.going_away {
            return;
        }
        self.going_away = true;
        frame::put_goaway(&mut self.outbound, self.highest_remote_stream_id, error_code, b"");
    }
}
