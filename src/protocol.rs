//! Transport lifecycle glue and the tokio connection driver.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::dispatcher::EventDispatcher;
use crate::engine::{H2Engine, ProtocolEngine};
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::transport::{IoTransport, Transport, TransportEvent};

type EngineFactory = Box<dyn Fn(&Config) -> Box<dyn ProtocolEngine> + Send>;

/// Binds a transport to an engine, a [`Connection`] and an [`EventDispatcher`].
///
/// The owner calls the lifecycle methods as things happen on the transport:
/// [`connection_made`](Self::connection_made) once, then
/// [`data_received`](Self::data_received) per read, then
/// [`connection_lost`](Self::connection_lost).
pub struct ProtocolAdapter {
    config: Config,
    handler: Arc<dyn Handler>,
    engine_factory: EngineFactory,
    dispatcher: Option<EventDispatcher>,
}

impl std::fmt::Debug for ProtocolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolAdapter")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl ProtocolAdapter {
    /// Adapter over the bundled [`H2Engine`].
    pub fn new(handler: Arc<dyn Handler>, config: Config) -> Self {
        Self::with_engine(handler, config, |config| Box::new(H2Engine::new(config)))
    }

    /// Adapter over a caller-supplied engine.
    pub fn with_engine<F>(handler: Arc<dyn Handler>, config: Config, factory: F) -> Self
    where
        F: Fn(&Config) -> Box<dyn ProtocolEngine> + Send + 'static,
    {
        Self {
            config,
            handler,
            engine_factory: Box::new(factory),
            dispatcher: None,
        }
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.dispatcher.as_ref().map(EventDispatcher::connection)
    }

    /// True once the connection has been closed for any reason.
    pub fn is_closed(&self) -> bool {
        self.dispatcher.as_ref().is_some_and(EventDispatcher::is_closed)
    }

    /// Start the connection: build the engine, queue and flush its preface.
    pub fn connection_made(&mut self, transport: Arc<dyn Transport>) -> Connection {
        let mut engine = (self.engine_factory)(&self.config);
        engine.initiate_connection();
        let connection = Connection::new(engine, transport);
        connection.flush();

        info!(role = ?self.config.role, "connection established");
        self.dispatcher = Some(EventDispatcher::new(self.handler.clone(), connection.clone()));
        connection
    }

    /// Feed bytes read from the transport.
    ///
    /// A protocol violation sends GOAWAY, closes the connection and is
    /// returned. Events for unknown streams are logged and skipped.
    pub fn data_received(&mut self, data: &[u8]) -> Result<()> {
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            return Err(Error::ConnectionClosed);
        };
        if dispatcher.is_closed() {
            debug!(len = data.len(), "data after close ignored");
            return Ok(());
        }
        let connection = dispatcher.connection().clone();

        let events = match connection.receive_data(data) {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "protocol violation, closing connection");
                connection.go_away(err.code);
                dispatcher.close();
                return Err(err.into());
            }
        };
        // Engine replies (SETTINGS ACK, PING ACK, WINDOW_UPDATE) go out first.
        connection.flush();

        for event in events {
            if dispatcher.is_closed() {
                break;
            }
            match dispatcher.process(event) {
                Ok(()) => {}
                Err(err) if !err.is_fatal() => {
                    warn!(error = %err, "event skipped");
                }
                Err(err) => {
                    error!(error = %err, "event processing failed, closing connection");
                    dispatcher.close();
                    return Err(err);
                }
            }
        }
        connection.flush();
        Ok(())
    }

    pub fn pause_writing(&self) {
        if let Some(connection) = self.connection() {
            connection.pause_writing();
        }
    }

    pub fn resume_writing(&self) {
        if let Some(connection) = self.connection() {
            connection.resume_writing();
        }
    }

    /// The transport is gone. Closes the connection and the handler.
    pub fn connection_lost(&mut self, err: Option<&io::Error>) {
        match err {
            Some(err) => warn!(error = %err, "connection lost"),
            None => debug!("connection lost"),
        }
        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.close();
        }
    }
}

/// Run a connection over `io` on a spawned task.
///
/// Returns the [`Connection`] (for opening streams) and the task handle,
/// which resolves when the connection ends.
pub fn spawn_connection<IO>(
    io: IO,
    handler: Arc<dyn Handler>,
    config: Config,
) -> Result<(Connection, JoinHandle<Result<()>>)>
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    config.validate()?;
    let (mut reader, writer) = tokio::io::split(io);
    let (transport, mut transport_events) = IoTransport::spawn(writer, &config);

    let mut buf = vec![0u8; config.read_buffer_size];
    let mut adapter = ProtocolAdapter::new(handler, config);
    let connection = adapter.connection_made(transport);

    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        loop {
            let read = tokio::select! {
                read = reader.read(&mut buf) => read,
                Some(event) = transport_events.recv() => {
                    match event {
                        TransportEvent::Pause => adapter.pause_writing(),
                        TransportEvent::Resume => adapter.resume_writing(),
                        TransportEvent::Lost(err) => {
                            adapter.connection_lost(err.as_ref());
                            return err.map_or(Ok(()), |err| Err(err.into()));
                        }
                    }
                    continue;
                }
            };

            match read {
                Ok(0) => {
                    adapter.connection_lost(None);
                    return Ok(());
                }
                Ok(n) => {
                    adapter.data_received(&buf[..n])?;
                    if adapter.is_closed() {
                        return Ok(());
                    }
                }
                Err(err) => {
                    adapter.connection_lost(Some(&err));
                    return Err(err.into());
                }
            }
        }
    });

    Ok((connection, task))
}

/// Serve one connection with `handler` until it closes.
pub async fn serve<IO>(io: IO, handler: Arc<dyn Handler>, config: Config) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (_connection, task) = spawn_connection(io, handler, config)?;
    task.await.map_err(|err| Error::Io(io::Error::other(err)))?
}
