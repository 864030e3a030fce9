//! Per-stream async API.
//!
//! A [`Stream`] is a cheap handle. The inbound side (header queue, data
//! buffer, window signal) is fed by the [`EventDispatcher`](crate::EventDispatcher);
//! the outbound side goes through the owning [`Connection`]'s engine. The
//! handle only holds a weak reference to the connection: once the connection
//! is gone, operations fail with [`Error::ConnectionClosed`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::connection::{Connection, ConnectionInner};
use crate::error::{Cancellation, Error, Result};
use crate::hpack::Header;

/// Where a stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

#[derive(Debug, Default)]
struct Inner {
    headers: VecDeque<Vec<Header>>,
    opened: bool,
    local_closed: bool,
    remote_closed: bool,
    cancelled: Option<Cancellation>,
}

#[derive(Debug)]
struct Shared {
    id: u32,
    buffer: Buffer,
    inner: Mutex<Inner>,
    headers_ready: Notify,
    window_updated: Notify,
}

/// Handle to one logical stream.
#[derive(Clone)]
pub struct Stream {
    shared: Arc<Shared>,
    conn: Weak<ConnectionInner>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Stream {
    pub(crate) fn new(id: u32, conn: Weak<ConnectionInner>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                buffer: Buffer::new(),
                inner: Mutex::new(Inner::default()),
                headers_ready: Notify::new(),
                window_updated: Notify::new(),
            }),
            conn,
        }
    }

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn state(&self) -> StreamState {
        let inner = self.lock();
        if inner.cancelled.is_some() {
            return StreamState::Closed;
        }
        match (inner.opened, inner.local_closed, inner.remote_closed) {
            (_, true, true) => StreamState::Closed,
            (_, true, false) => StreamState::HalfClosedLocal,
            (_, false, true) => StreamState::HalfClosedRemote,
            (true, false, false) => StreamState::Open,
            (false, false, false) => StreamState::Created,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        crate::lock(&self.shared.inner)
    }

    fn connection(&self) -> Result<Connection> {
        self.conn
            .upgrade()
            .map(Connection::from_inner)
            .ok_or(Error::ConnectionClosed)
    }

    fn check_cancelled(&self) -> Result<()> {
        match self.lock().cancelled {
            Some(cause) => Err(cause.into()),
            None => Ok(()),
        }
    }

    /// Wait for the next header block: leading headers first, then trailers.
    ///
    /// Blocks already queued when the connection closes are still returned;
    /// after that the call fails with [`Error::ConnectionClosed`].
    pub async fn recv_headers(&self) -> Result<Vec<Header>> {
        loop {
            {
                let mut inner = self.lock();
                // Blocks that arrived before the connection closed can still be taken.
                let readable = matches!(inner.cancelled, None | Some(Cancellation::ConnectionClosed));
                if readable {
                    if let Some(headers) = inner.headers.pop_front() {
                        return Ok(headers);
                    }
                }
                if let Some(cause) = inner.cancelled {
                    return Err(cause.into());
                }
                if inner.remote_closed {
                    return Err(Error::NoMoreHeaders(self.id()));
                }
            }
            self.shared.headers_ready.notified().await;
        }
    }

    /// Read body bytes (see [`Buffer::read`]) and hand exactly the number of
    /// bytes returned back to the peer as flow-control credit.
    ///
    /// Credit is only released when a read returns. `None` waits for the end
    /// of the stream, so a body larger than the receive window needs sized
    /// reads or the peer stalls.
    pub async fn recv_data(&self, size: Option<isize>) -> Result<Bytes> {
        let data = self.shared.buffer.read(size).await?;
        if !data.is_empty() {
            if let Ok(conn) = self.connection() {
                match conn.acknowledge_received_data(self.id(), data.len()) {
                    // Nobody left to grant credit to; the bytes are still ours.
                    Ok(()) | Err(Error::ConnectionClosed) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(data)
    }

    /// The whole body, once the peer has ended the stream.
    pub async fn recv_body(&self) -> Result<Bytes> {
        self.recv_data(None).await
    }

    /// Send one header block. Never split.
    pub async fn send_headers(&self, headers: &[Header], end_stream: bool) -> Result<()> {
        let conn = self.connection()?;
        conn.wait_writable().await?;
        self.check_cancelled()?;

        conn.with_engine(|engine| engine.send_headers(self.id(), headers, end_stream))?;
        self.lock().opened = true;
        trace!(stream_id = self.id(), end_stream, "headers sent");
        if end_stream {
            self.end_local(&conn);
        }
        Ok(())
    }

    /// Send `data`, cut into chunks that fit the stream's flow-control window.
    ///
    /// Waits for write readiness before every chunk and for window credit
    /// whenever the window is empty. `end_stream` goes out only with the
    /// final chunk.
    pub async fn send_data(&self, data: impl Into<Bytes>, end_stream: bool) -> Result<()> {
        let conn = self.connection()?;
        let mut remaining: Bytes = data.into();

        if remaining.is_empty() {
            // Empty DATA frames are not flow controlled.
            conn.wait_writable().await?;
            self.check_cancelled()?;
            conn.with_engine(|engine| engine.send_data(self.id(), Bytes::new(), end_stream))?;
        } else {
            loop {
                conn.wait_writable().await?;
                let window = self.wait_for_window(&conn).await?;

                let chunk = remaining.split_to(window.min(remaining.len()));
                let last = remaining.is_empty();
                trace!(stream_id = self.id(), len = chunk.len(), window, last, "sending chunk");
                conn.with_engine(|engine| engine.send_data(self.id(), chunk, end_stream && last))?;
                if last {
                    break;
                }
            }
        }

        if end_stream {
            self.end_local(&conn);
        }
        Ok(())
    }

    /// Current outbound window, waiting while it is zero.
    async fn wait_for_window(&self, conn: &Connection) -> Result<usize> {
        loop {
            self.check_cancelled()?;
            let window = conn.local_flow_control_window(self.id())?;
            if window > 0 {
                return Ok(window);
            }
            trace!(stream_id = self.id(), "flow-control window exhausted, waiting");
            self.shared.window_updated.notified().await;
        }
    }

    /// Abort the stream with RST_STREAM.
    pub fn reset(&self, error_code: u32) -> Result<()> {
        let conn = self.connection()?;
        conn.with_engine(|engine| engine.reset_stream(self.id(), error_code))?;
        debug!(stream_id = self.id(), error_code, "stream reset locally");
        self.cancel(Cancellation::Reset {
            stream_id: self.id(),
            error_code,
        });
        conn.evict(self.id());
        Ok(())
    }

    fn end_local(&self, conn: &Connection) {
        let closed = {
            let mut inner = self.lock();
            inner.local_closed = true;
            inner.remote_closed
        };
        if closed {
            conn.evict(self.id());
        }
    }

    pub(crate) fn push_headers(&self, headers: Vec<Header>) {
        let mut inner = self.lock();
        inner.opened = true;
        inner.headers.push_back(headers);
        drop(inner);
        self.shared.headers_ready.notify_one();
    }

    pub(crate) fn append_data(&self, data: Bytes) {
        self.shared.buffer.append(data);
    }

    pub(crate) fn notify_window(&self) {
        self.shared.window_updated.notify_one();
    }

    /// Peer half-closed the stream. Returns true if both halves are now closed.
    pub(crate) fn end_remote(&self) -> bool {
        self.shared.buffer.eof();
        let closed = {
            let mut inner = self.lock();
            inner.remote_closed = true;
            inner.local_closed
        };
        // A recv_headers waiting for trailers that never come must wake up.
        self.shared.headers_ready.notify_one();
        closed
    }

    /// Wake every waiter on this stream with `cause`.
    pub(crate) fn cancel(&self, cause: Cancellation) {
        {
            let mut inner = self.lock();
            if inner.cancelled.is_some() {
                return;
            }
            inner.cancelled = Some(cause);
        }
        self.shared.buffer.cancel(cause);
        self.shared.headers_ready.notify_one();
        self.shared.window_updated.notify_one();
    }
}
