//! Application-side callbacks for peer-initiated streams.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hpack::Header;
use crate::stream::Stream;

/// Receives streams the peer opens.
///
/// Callbacks run on the connection's driving task and must not block; long
/// work belongs in a spawned task (see [`service_fn`]).
pub trait Handler: Send + Sync {
    /// A new stream arrived carrying its leading header block. An error is
    /// fatal to the connection.
    fn accept(&self, stream: Stream, headers: Vec<Header>) -> Result<()>;

    /// The stream was reset. Its pending operations are being cancelled.
    fn cancel(&self, stream: &Stream);

    /// The connection is closing. Called once.
    fn close(&self);
}

/// Handler for endpoints that never accept streams, e.g. clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHandler;

impl Handler for NoHandler {
    fn accept(&self, stream: Stream, _headers: Vec<Header>) -> Result<()> {
        warn!(stream_id = stream.id(), "inbound stream on a connection without a handler");
        Err(Error::NotImplemented("request handling"))
    }

    fn cancel(&self, _stream: &Stream) {}

    fn close(&self) {}
}

/// Handler that runs `f` in its own task for every accepted stream.
///
/// Tasks still running when the connection closes are aborted.
pub fn service_fn<F, Fut>(f: F) -> ServiceFn<F>
where
    F: Fn(Stream, Vec<Header>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    ServiceFn {
        f,
        tasks: Mutex::new(HashMap::new()),
    }
}

pub struct ServiceFn<F> {
    f: F,
    tasks: Mutex<HashMap<u32, AbortHandle>>,
}

impl<F> std::fmt::Debug for ServiceFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFn").finish_non_exhaustive()
    }
}

impl<F, Fut> Handler for ServiceFn<F>
where
    F: Fn(Stream, Vec<Header>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn accept(&self, stream: Stream, headers: Vec<Header>) -> Result<()> {
        let stream_id = stream.id();
        let fut = (self.f)(stream, headers);
        let task = tokio::spawn(async move {
            if let Err(err) = fut.await {
                debug!(stream_id, error = %err, "stream task failed");
            }
        });

        let mut tasks = crate::lock(&self.tasks);
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.insert(stream_id, task.abort_handle());
        Ok(())
    }

    fn cancel(&self, stream: &Stream) {
        debug!(stream_id = stream.id(), "stream cancelled");
    }

    fn close(&self) {
        let tasks = std::mem::take(&mut *crate::lock(&self.tasks));
        for handle in tasks.into_values() {
            handle.abort();
        }
    }
}
