//! Connection configuration.

use crate::error::{Error, Result};
use crate::flow_control::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};
use crate::frame::{DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE};

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the preface, opens odd-numbered streams.
    Client,
    /// Expects the preface, opens even-numbered streams.
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub role: Role,
    /// Advertised SETTINGS_INITIAL_WINDOW_SIZE for inbound streams.
    pub initial_window_size: u32,
    /// Advertised SETTINGS_MAX_FRAME_SIZE.
    pub max_frame_size: u32,
    /// Advertised SETTINGS_MAX_CONCURRENT_STREAMS. Not enforced locally.
    pub max_concurrent_streams: Option<u32>,
    /// `IoTransport` reports "pause writing" once this many bytes are queued.
    pub write_high_watermark: usize,
    /// ...and "resume writing" once the queue drains to this many bytes.
    pub write_low_watermark: usize,
    /// Size of each socket read.
    pub read_buffer_size: usize,
}

impl Config {
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    fn new(role: Role) -> Self {
        Self {
            role,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: None,
            write_high_watermark: 64 * 1024,
            write_low_watermark: 16 * 1024,
            read_buffer_size: 8 * 1024,
        }
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.initial_window_size = size;
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = Some(max);
        self
    }

    pub fn write_watermarks(mut self, low: usize, high: usize) -> Self {
        self.write_low_watermark = low;
        self.write_high_watermark = high;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_window_size as i64 > MAX_WINDOW_SIZE {
            return Err(Error::InvalidConfig(format!(
                "initial window size {} exceeds 2^31-1",
                self.initial_window_size
            )));
        }
        if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&self.max_frame_size) {
            return Err(Error::InvalidConfig(format!(
                "max frame size {} outside {}..={}",
                self.max_frame_size, DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE
            )));
        }
        if self.write_low_watermark > self.write_high_watermark {
            return Err(Error::InvalidConfig(format!(
                "low watermark {} above high watermark {}",
                self.write_low_watermark, self.write_high_watermark
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig("read buffer size must be non-zero".into()));
        }
        Ok(())
    }
}
