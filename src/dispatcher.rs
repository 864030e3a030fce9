//! Routes engine events to streams, the handler and the connection.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::connection::Connection;
use crate::engine::Event;
use crate::error::{Cancellation, Error, Result};
use crate::handler::Handler;
use crate::stream::Stream;

pub struct EventDispatcher {
    connection: Connection,
    handler: Arc<dyn Handler>,
    closed: bool,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("connection", &self.connection)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    pub fn new(handler: Arc<dyn Handler>, connection: Connection) -> Self {
        Self {
            connection,
            handler,
            closed: false,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Open a locally initiated stream.
    pub fn create_stream(&self) -> Result<Stream> {
        self.connection.open_stream()
    }

    fn stream(&self, stream_id: u32) -> Result<Stream> {
        self.connection
            .stream(stream_id)
            .ok_or(Error::UnknownStream(stream_id))
    }

    /// Apply one event.
    ///
    /// [`Error::UnknownStream`] means the event named a stream that is not
    /// tracked (never opened, or already evicted); the caller may skip it.
    /// Events arriving after [`close`](Self::close) are ignored.
    pub fn process(&mut self, event: Event) -> Result<()> {
        if self.closed {
            trace!(kind = event.kind(), "connection closed, event ignored");
            return Ok(());
        }
        trace!(kind = event.kind(), stream_id = event.stream_id(), "dispatching");

        match event {
            Event::RequestReceived { stream_id, headers } => {
                let stream = self.connection.create_stream(stream_id);
                self.connection.register(stream.clone());
                debug!(stream_id, "accepting stream");
                self.handler.accept(stream, headers)?;
            }
            Event::ResponseReceived { stream_id, headers }
            | Event::TrailersReceived { stream_id, headers } => {
                self.stream(stream_id)?.push_headers(headers);
            }
            Event::DataReceived { stream_id, data, .. } => {
                self.stream(stream_id)?.append_data(data);
            }
            Event::WindowUpdated { stream_id: 0, delta } => {
                // Connection window grew: any blocked stream may proceed.
                trace!(delta, "connection window updated");
                for stream in self.connection.all_streams() {
                    stream.notify_window();
                }
            }
            Event::WindowUpdated { stream_id, .. } => {
                self.stream(stream_id)?.notify_window();
            }
            Event::StreamEnded { stream_id } => {
                if self.stream(stream_id)?.end_remote() {
                    self.connection.evict(stream_id);
                }
            }
            Event::StreamReset {
                stream_id,
                error_code,
                remote_reset,
            } => {
                let stream = self.stream(stream_id)?;
                debug!(stream_id, error_code, remote_reset, "stream reset");
                self.handler.cancel(&stream);
                stream.cancel(Cancellation::Reset {
                    stream_id,
                    error_code,
                });
                self.connection.evict(stream_id);
            }
            Event::ConnectionTerminated {
                error_code,
                last_stream_id,
            } => {
                info!(error_code, last_stream_id, "peer terminated connection");
                self.close();
            }
            Event::PriorityUpdated { stream_id, priority } => {
                trace!(stream_id, ?priority, "priority ignored");
            }
            Event::RemoteSettingsChanged { changed } => {
                trace!(?changed, "remote settings applied");
            }
            Event::SettingsAcknowledged => {
                trace!("settings acknowledged");
            }
        }
        Ok(())
    }

    /// Close the connection and the handler. Only the first call does anything.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.connection.close();
        self.handler.close();
    }
}
