//! Test doubles: a scripted engine, a recording transport and a recording
//! handler, plus a harness wiring them to a `ProtocolAdapter`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use h2_mux::{
    Config, Connection, Event, Handler, Header, ProtocolAdapter, ProtocolEngine, ProtocolError,
    Result, Stream, Transport,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Outbound window per stream; missing entries read as zero.
    pub windows: HashMap<u32, usize>,
    /// Scripted results for successive `receive_data` calls.
    pub script: VecDeque<Result<Vec<Event>, ProtocolError>>,
    /// (stream, len, end_stream) per `send_data` call.
    pub sent_data: Vec<(u32, usize, bool)>,
    pub sent_headers: Vec<(u32, Vec<Header>, bool)>,
    pub acknowledged: Vec<(u32, usize)>,
    pub resets: Vec<(u32, u32)>,
    pub goaway: Option<u32>,
    pub next_stream_id: u32,
    output: Vec<u8>,
}

/// Engine double. Clones share state so tests can inspect and script it
/// after handing a clone to the adapter.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_window(&self, stream_id: u32, window: usize) {
        self.state().windows.insert(stream_id, window);
    }

    pub fn window(&self, stream_id: u32) -> usize {
        self.state().windows.get(&stream_id).copied().unwrap_or(0)
    }

    /// Queue the events the next `receive_data` call returns.
    pub fn script(&self, events: Vec<Event>) {
        self.state().script.push_back(Ok(events));
    }

    pub fn script_error(&self, err: ProtocolError) {
        self.state().script.push_back(Err(err));
    }

    pub fn sent_data(&self) -> Vec<(u32, usize, bool)> {
        self.state().sent_data.clone()
    }
}

impl ProtocolEngine for MockEngine {
    fn initiate_connection(&mut self) {
        let mut state = self.state();
        state.next_stream_id = 1;
        state.output.extend_from_slice(b"PREFACE");
    }

    fn receive_data(&mut self, _data: &[u8]) -> Result<Vec<Event>, ProtocolError> {
        let mut state = self.state();
        let result = state.script.pop_front().unwrap_or_else(|| Ok(Vec::new()));
        // Window updates take effect before the dispatcher sees them.
        if let Ok(events) = &result {
            for event in events {
                if let Event::WindowUpdated { stream_id, delta } = event {
                    let delta = *delta as usize;
                    if *stream_id == 0 {
                        state.windows.values_mut().for_each(|w| *w += delta);
                    } else {
                        *state.windows.entry(*stream_id).or_insert(0) += delta;
                    }
                }
            }
        }
        result
    }

    fn data_to_send(&mut self) -> Bytes {
        Bytes::from(std::mem::take(&mut self.state().output))
    }

    fn send_headers(&mut self, stream_id: u32, headers: &[Header], end_stream: bool) -> Result<(), ProtocolError> {
        let mut state = self.state();
        state.sent_headers.push((stream_id, headers.to_vec(), end_stream));
        state.output.extend_from_slice(b"HEADERS");
        Ok(())
    }

    fn send_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<(), ProtocolError> {
        let mut state = self.state();
        let window = state.windows.entry(stream_id).or_insert(0);
        if data.len() > *window {
            return Err(ProtocolError::flow_control("window exceeded"));
        }
        *window -= data.len();
        state.sent_data.push((stream_id, data.len(), end_stream));
        state.output.extend_from_slice(&data);
        Ok(())
    }

    fn acknowledge_received_data(&mut self, stream_id: u32, len: usize) -> Result<(), ProtocolError> {
        self.state().acknowledged.push((stream_id, len));
        Ok(())
    }

    fn local_flow_control_window(&self, stream_id: u32) -> Result<usize, ProtocolError> {
        Ok(self.window(stream_id))
    }

    fn next_available_stream_id(&mut self) -> Result<u32, ProtocolError> {
        let mut state = self.state();
        let stream_id = state.next_stream_id;
        state.next_stream_id += 2;
        Ok(stream_id)
    }

    fn reset_stream(&mut self, stream_id: u32, error_code: u32) -> Result<(), ProtocolError> {
        self.state().resets.push((stream_id, error_code));
        Ok(())
    }

    fn close_connection(&mut self, error_code: u32) {
        let mut state = self.state();
        state.goaway = Some(error_code);
        state.output.extend_from_slice(b"GOAWAY");
    }
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    writes: Mutex<Vec<Bytes>>,
    closes: AtomicUsize,
}

impl RecordingTransport {
    /// Drain everything written so far.
    pub fn take(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.writes.lock().unwrap())
    }

    pub fn writes(&self) -> Vec<Bytes> {
        self.writes.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn write(&self, data: Bytes) {
        self.writes.lock().unwrap().push(data);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct RecordingHandler {
    accepted: Mutex<Vec<(Stream, Vec<Header>)>>,
    cancelled: Mutex<Vec<u32>>,
    closes: AtomicUsize,
}

impl RecordingHandler {
    pub fn accepted(&self) -> Vec<(Stream, Vec<Header>)> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<u32> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Handler for RecordingHandler {
    fn accept(&self, stream: Stream, headers: Vec<Header>) -> Result<()> {
        self.accepted.lock().unwrap().push((stream, headers));
        Ok(())
    }

    fn cancel(&self, stream: &Stream) {
        self.cancelled.lock().unwrap().push(stream.id());
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// An adapter over a [`MockEngine`] with recording transport and handler.
pub struct Harness {
    pub engine: MockEngine,
    pub handler: Arc<RecordingHandler>,
    pub transport: Arc<RecordingTransport>,
    pub adapter: ProtocolAdapter,
    pub conn: Connection,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_handler(Arc::new(RecordingHandler::default()))
    }

    pub fn with_handler(handler: Arc<RecordingHandler>) -> Self {
        init_tracing();
        let engine = MockEngine::default();
        let factory_engine = engine.clone();
        let mut adapter = ProtocolAdapter::with_engine(handler.clone(), Config::server(), move |_| {
            Box::new(factory_engine.clone()) as Box<dyn ProtocolEngine>
        });
        let transport = Arc::new(RecordingTransport::default());
        let conn = adapter.connection_made(transport.clone());
        Self {
            engine,
            handler,
            transport,
            adapter,
            conn,
        }
    }

    /// Deliver `events` through the adapter as if bytes had arrived.
    pub fn deliver(&mut self, events: Vec<Event>) -> Result<()> {
        self.engine.script(events);
        self.adapter.data_received(b"")
    }
}

pub fn request_headers() -> Vec<Header> {
    vec![
        Header::new(":method", "POST"),
        Header::new(":scheme", "http"),
        Header::new(":path", "/upload"),
        Header::new(":authority", "localhost"),
    ]
}
