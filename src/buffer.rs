//! Inbound byte buffer with suspend-until-satisfied reads.
//!
//! The dispatcher appends DATA payloads as they arrive; one application task
//! reads them back, either all at once after end-of-input or `n` bytes at a
//! time. A read that cannot be satisfied records how many bytes it needs and
//! sleeps until `append` crosses that threshold or `eof` is signalled.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

use crate::error::{Cancellation, Error, Result};

#[derive(Debug, Default)]
struct State {
    chunks: VecDeque<Bytes>,
    /// Always the sum of `chunks` lengths.
    len: usize,
    /// Bytes the suspended reader is waiting for.
    pending: Option<usize>,
    eof: bool,
    cancelled: Option<Cancellation>,
}

impl State {
    /// Remove up to `n` bytes from the front.
    fn take(&mut self, n: usize) -> Bytes {
        let n = n.min(self.len);
        self.len -= n;

        if let Some(front) = self.chunks.front_mut() {
            if front.len() >= n {
                let out = front.split_to(n);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let Some(mut chunk) = self.chunks.pop_front() else {
                break;
            };
            let want = n - out.len();
            if chunk.len() > want {
                out.extend_from_slice(&chunk.split_to(want));
                self.chunks.push_front(chunk);
            } else {
                out.extend_from_slice(&chunk);
            }
        }
        out.freeze()
    }
}

/// Byte accumulator feeding `Stream::recv_data`.
#[derive(Debug, Default)]
pub struct Buffer {
    state: Mutex<State>,
    /// Completion signal: fired when the pending threshold is met, on eof,
    /// and on cancellation.
    complete: Notify,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        crate::lock(&self.state)
    }

    /// Append a chunk. Never blocks.
    pub fn append(&self, data: Bytes) {
        let mut state = self.lock();
        if !data.is_empty() {
            state.len += data.len();
            state.chunks.push_back(data);
        }
        if let Some(wanted) = state.pending {
            if state.len >= wanted {
                drop(state);
                self.complete.notify_one();
            }
        }
    }

    /// No more data will arrive. Permanent.
    pub fn eof(&self) {
        self.lock().eof = true;
        self.complete.notify_one();
    }

    /// Wake the reader with an error; every later read fails the same way.
    ///
    /// Once end-of-input has fired, [`Cancellation::ConnectionClosed`] no
    /// longer fails reads: what is buffered drains, then reads return empty.
    pub fn cancel(&self, cause: Cancellation) {
        let mut state = self.lock();
        if state.cancelled.is_none() {
            state.cancelled = Some(cause);
        }
        drop(state);
        self.complete.notify_one();
    }

    /// Buffered byte count.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_eof(&self) -> bool {
        self.lock().eof
    }

    /// Read from the buffer.
    ///
    /// * `None` waits for end-of-input and returns everything buffered.
    /// * `Some(0)` returns empty at once; negative sizes are rejected.
    /// * `Some(n)` returns exactly `n` bytes, or fewer if end-of-input comes
    ///   first, waiting as long as necessary.
    ///
    /// Reads must not overlap: there is a single pending threshold.
    pub async fn read(&self, size: Option<isize>) -> Result<Bytes> {
        let wanted = match size {
            Some(n) if n < 0 => return Err(Error::InvalidSize(n)),
            Some(0) => return Ok(Bytes::new()),
            Some(n) => Some(n as usize),
            None => None,
        };

        loop {
            {
                let mut state = self.lock();
                if let Some(cause) = state.cancelled {
                    // A body that ended before the connection went away stays readable.
                    let drained_after_close = state.eof && cause == Cancellation::ConnectionClosed;
                    if !drained_after_close {
                        state.pending = None;
                        return Err(cause.into());
                    }
                }
                match wanted {
                    None if state.eof => {
                        let len = state.len;
                        return Ok(state.take(len));
                    }
                    None => {}
                    Some(n) if state.len >= n || state.eof => {
                        state.pending = None;
                        return Ok(state.take(n));
                    }
                    Some(n) => state.pending = Some(n),
                }
            }
            self.complete.notified().await;
        }
    }

    /// Everything until end-of-input.
    pub async fn read_to_end(&self) -> Result<Bytes> {
        self.read(None).await
    }
}
