//! Write gating: pause_writing / resume_writing and transport watermarks

use std::sync::Arc;

use bytes::Bytes;
use h2_mux::{Config, Error, IoTransport, Transport, TransportEvent, WriteState};
use tokio::io::AsyncReadExt;

use crate::support::Harness;

#[tokio::test]
async fn paused_connection_holds_every_writer() {
    let harness = Harness::new();
    harness.engine.set_window(1, 100);
    harness.engine.set_window(3, 100);
    let a = harness.conn.open_stream().unwrap();
    let b = harness.conn.open_stream().unwrap();

    harness.adapter.pause_writing();
    assert_eq!(harness.conn.write_state(), WriteState::Paused);

    let senders: Vec<_> = [a, b]
        .into_iter()
        .map(|stream| tokio::spawn(async move { stream.send_data(&b"data"[..], false).await }))
        .collect();
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert!(senders.iter().all(|sender| !sender.is_finished()));
    assert!(harness.engine.sent_data().is_empty());

    harness.adapter.resume_writing();
    for sender in senders {
        sender.await.unwrap().unwrap();
    }
    assert_eq!(harness.engine.sent_data().len(), 2);
}

#[tokio::test]
async fn pause_and_resume_are_idempotent() {
    let harness = Harness::new();
    harness.conn.pause_writing();
    harness.conn.pause_writing();
    assert_eq!(harness.conn.write_state(), WriteState::Paused);
    harness.conn.resume_writing();
    harness.conn.resume_writing();
    assert_eq!(harness.conn.write_state(), WriteState::Ready);
}

#[tokio::test]
async fn close_releases_paused_writers_with_error() {
    let mut harness = Harness::new();
    harness.engine.set_window(1, 100);
    let stream = harness.conn.open_stream().unwrap();
    harness.conn.pause_writing();

    let sender = tokio::spawn(async move { stream.send_data(&b"data"[..], false).await });
    tokio::task::yield_now().await;
    assert!(!sender.is_finished());

    harness.adapter.connection_lost(None);
    assert!(matches!(sender.await.unwrap(), Err(Error::ConnectionClosed)));
    // Resuming a closed connection does not reopen it.
    harness.conn.resume_writing();
    assert_eq!(harness.conn.write_state(), WriteState::Closed);
}

#[tokio::test]
async fn io_transport_reports_watermarks() {
    let (near, mut far) = tokio::io::duplex(16);
    let config = Config::server().write_watermarks(8, 32);
    let (transport, mut events) = IoTransport::spawn(near, &config);
    let transport: Arc<dyn Transport> = transport;

    transport.write(Bytes::from(vec![1u8; 40]));
    assert!(matches!(events.recv().await, Some(TransportEvent::Pause)));

    let mut sink = vec![0u8; 40];
    far.read_exact(&mut sink).await.unwrap();
    assert!(matches!(events.recv().await, Some(TransportEvent::Resume)));

    transport.close();
    assert!(matches!(events.recv().await, Some(TransportEvent::Lost(None))));
}
