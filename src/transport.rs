//! Byte sinks underneath a connection.
//!
//! [`Transport`] is the narrow write-side interface the connection needs.
//! [`IoTransport`] implements it over any [`AsyncWrite`] by handing writes to
//! a dedicated writer task, and reports backpressure through a
//! [`TransportEvent`] channel that the connection driver turns into
//! `pause_writing` / `resume_writing` calls.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::Config;

/// Where encoded bytes go.
///
/// `write` must not block: implementations queue and report backpressure out
/// of band.
pub trait Transport: Send + Sync {
    fn write(&self, data: Bytes);

    /// Flush what is queued, then shut down. Called once per connection.
    fn close(&self);
}

/// Signals from the writer task.
#[derive(Debug)]
pub enum TransportEvent {
    /// Queued bytes crossed the high watermark.
    Pause,
    /// Queued bytes drained to the low watermark.
    Resume,
    /// The writer stopped. `None` after an orderly close.
    Lost(Option<io::Error>),
}

enum Command {
    Write(Bytes),
    Close,
}

#[derive(Debug)]
struct Backlog {
    queued: AtomicUsize,
    paused: AtomicBool,
    high: usize,
    low: usize,
}

/// [`Transport`] over an [`AsyncWrite`] half, drained by a spawned task.
#[derive(Debug)]
pub struct IoTransport {
    commands: mpsc::UnboundedSender<Command>,
    backlog: Arc<Backlog>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Write(data) => write!(f, "Write({} bytes)", data.len()),
            Command::Close => f.write_str("Close"),
        }
    }
}

impl IoTransport {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn<W>(writer: W, config: &Config) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(Backlog {
            queued: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            high: config.write_high_watermark,
            low: config.write_low_watermark,
        });

        tokio::spawn(write_loop(writer, command_rx, backlog.clone(), events.clone()));

        let transport = Arc::new(Self {
            commands,
            backlog,
            events,
        });
        (transport, event_rx)
    }

    /// Bytes handed to `write` but not yet written out.
    pub fn queued(&self) -> usize {
        self.backlog.queued.load(Ordering::Acquire)
    }
}

impl Transport for IoTransport {
    fn write(&self, data: Bytes) {
        let len = data.len();
        if self.commands.is_closed() {
            trace!(len, "writer gone, dropping output");
            return;
        }
        let queued = self.backlog.queued.fetch_add(len, Ordering::AcqRel) + len;
        // The pause flag must be set before the writer can see this chunk,
        // or its matching resume could be missed.
        if queued >= self.backlog.high && !self.backlog.paused.swap(true, Ordering::AcqRel) {
            debug!(queued, high = self.backlog.high, "write backlog above high watermark");
            let _ = self.events.send(TransportEvent::Pause);
        }
        if self.commands.send(Command::Write(data)).is_err() {
            self.backlog.queued.fetch_sub(len, Ordering::AcqRel);
        }
    }

    fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut commands: mpsc::UnboundedReceiver<Command>,
    backlog: Arc<Backlog>,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = commands.recv().await {
        match command {
            Command::Write(data) => {
                let len = data.len();
                if let Err(err) = writer.write_all(&data).await {
                    warn!(error = %err, "transport write failed");
                    let _ = events.send(TransportEvent::Lost(Some(err)));
                    return;
                }
                let queued = backlog.queued.fetch_sub(len, Ordering::AcqRel) - len;
                if queued <= backlog.low && backlog.paused.swap(false, Ordering::AcqRel) {
                    debug!(queued, low = backlog.low, "write backlog drained");
                    let _ = events.send(TransportEvent::Resume);
                }
            }
            Command::Close => break,
        }
    }

    let result = writer.shutdown().await;
    trace!("writer shut down");
    let _ = events.send(TransportEvent::Lost(result.err()));
}
