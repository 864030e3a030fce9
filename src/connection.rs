//! Connection-wide coordination: the engine lock, the write gate and the
//! stream map.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::engine::{Event, ProtocolEngine};
use crate::error::{Cancellation, Error, ProtocolError, Result};
use crate::stream::Stream;
use crate::transport::Transport;

/// Whether stream writers may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Ready,
    /// The transport asked us to stop; writers wait for `resume_writing`.
    Paused,
    /// Terminal. Writers fail with [`Error::ConnectionClosed`].
    Closed,
}

pub(crate) struct ConnectionInner {
    engine: Mutex<Box<dyn ProtocolEngine>>,
    transport: Arc<dyn Transport>,
    write_state: watch::Sender<WriteState>,
    streams: Mutex<HashMap<u32, Stream>>,
}

/// Shared handle to one multiplexed connection.
///
/// All engine access goes through one lock, and output is drained to the
/// transport while that lock is held, so bytes reach the wire in the order
/// the engine produced them.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("write_state", &self.write_state())
            .field("streams", &self.stream_count())
            .finish()
    }
}

impl Connection {
    pub fn new(engine: Box<dyn ProtocolEngine>, transport: Arc<dyn Transport>) -> Self {
        let (write_state, _) = watch::channel(WriteState::Ready);
        Self {
            inner: Arc::new(ConnectionInner {
                engine: Mutex::new(engine),
                transport,
                write_state,
                streams: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    fn engine(&self) -> MutexGuard<'_, Box<dyn ProtocolEngine>> {
        crate::lock(&self.inner.engine)
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<u32, Stream>> {
        crate::lock(&self.inner.streams)
    }

    // -- write gate --------------------------------------------------------

    pub fn write_state(&self) -> WriteState {
        *self.inner.write_state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.write_state() == WriteState::Closed
    }

    /// Block stream writers until [`resume_writing`](Self::resume_writing).
    pub fn pause_writing(&self) {
        let paused = self.inner.write_state.send_if_modified(|state| {
            if *state == WriteState::Ready {
                *state = WriteState::Paused;
                true
            } else {
                false
            }
        });
        if paused {
            debug!("writing paused");
        }
    }

    pub fn resume_writing(&self) {
        let resumed = self.inner.write_state.send_if_modified(|state| {
            if *state == WriteState::Paused {
                *state = WriteState::Ready;
                true
            } else {
                false
            }
        });
        if resumed {
            debug!("writing resumed");
        }
    }

    /// Wait until writing is allowed.
    pub async fn wait_writable(&self) -> Result<()> {
        let mut rx = self.inner.write_state.subscribe();
        let state = *rx
            .wait_for(|state| *state != WriteState::Paused)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        match state {
            WriteState::Closed => Err(Error::ConnectionClosed),
            _ => Ok(()),
        }
    }

    // -- engine ------------------------------------------------------------

    /// Drain engine output to the transport.
    pub fn flush(&self) {
        let mut engine = self.engine();
        self.flush_locked(&mut **engine);
    }

    fn flush_locked(&self, engine: &mut dyn ProtocolEngine) {
        let data = engine.data_to_send();
        if data.is_empty() {
            return;
        }
        if self.is_closed() {
            trace!(len = data.len(), "discarding output for closed connection");
            return;
        }
        trace!(len = data.len(), "flushing");
        self.inner.transport.write(data);
    }

    /// Run `f` against the engine, then flush whatever it queued.
    pub(crate) fn with_engine<R>(
        &self,
        f: impl FnOnce(&mut dyn ProtocolEngine) -> Result<R, ProtocolError>,
    ) -> Result<R> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let mut engine = self.engine();
        let result = f(&mut **engine);
        self.flush_locked(&mut **engine);
        Ok(result?)
    }

    pub(crate) fn receive_data(&self, data: &[u8]) -> Result<Vec<Event>, ProtocolError> {
        self.engine().receive_data(data)
    }

    pub(crate) fn local_flow_control_window(&self, stream_id: u32) -> Result<usize> {
        Ok(self.engine().local_flow_control_window(stream_id)?)
    }

    pub(crate) fn acknowledge_received_data(&self, stream_id: u32, len: usize) -> Result<()> {
        self.with_engine(|engine| engine.acknowledge_received_data(stream_id, len))
    }

    /// Queue GOAWAY and push it out. The connection stays open until
    /// [`close`](Self::close).
    pub fn go_away(&self, error_code: u32) {
        let mut engine = self.engine();
        engine.close_connection(error_code);
        self.flush_locked(&mut **engine);
    }

    // -- streams -----------------------------------------------------------

    /// A stream handle bound to this connection. Not registered.
    pub fn create_stream(&self, stream_id: u32) -> Stream {
        Stream::new(stream_id, Arc::downgrade(&self.inner))
    }

    pub(crate) fn register(&self, stream: Stream) {
        self.streams().insert(stream.id(), stream);
    }

    /// Open a locally initiated stream with the engine's next id.
    pub fn open_stream(&self) -> Result<Stream> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let stream_id = self.engine().next_available_stream_id()?;
        let stream = self.create_stream(stream_id);
        self.register(stream.clone());
        debug!(stream_id, "stream opened");
        Ok(stream)
    }

    pub fn stream(&self, stream_id: u32) -> Option<Stream> {
        self.streams().get(&stream_id).cloned()
    }

    /// Streams currently tracked. Fully closed and reset streams are evicted.
    pub fn stream_count(&self) -> usize {
        self.streams().len()
    }

    pub(crate) fn all_streams(&self) -> Vec<Stream> {
        self.streams().values().cloned().collect()
    }

    pub(crate) fn evict(&self, stream_id: u32) {
        if self.streams().remove(&stream_id).is_some() {
            trace!(stream_id, "stream evicted");
        }
    }

    /// Close the connection: fail pending stream operations and close the
    /// transport. Only the first call has any effect.
    pub fn close(&self) {
        let closed = self.inner.write_state.send_if_modified(|state| {
            if *state == WriteState::Closed {
                false
            } else {
                *state = WriteState::Closed;
                true
            }
        });
        if !closed {
            return;
        }

        let streams: Vec<Stream> = self.streams().drain().map(|(_, stream)| stream).collect();
        for stream in &streams {
            stream.cancel(Cancellation::ConnectionClosed);
        }
        self.inner.transport.close();
        info!(cancelled_streams = streams.len(), "connection closed");
    }
}
