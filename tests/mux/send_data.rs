//! Outbound data: window-sized chunking and suspension on empty windows

use bytes::Bytes;
use h2_mux::{error_code, Error, Event};

use crate::support::Harness;

#[tokio::test]
async fn chunks_follow_window_and_end_stream_rides_last() {
    let mut harness = Harness::new();
    harness.engine.set_window(1, 10);
    let stream = harness.conn.open_stream().unwrap();
    assert_eq!(stream.id(), 1);

    let sender = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.send_data(vec![7u8; 25], true).await })
    };

    for _ in 0..100 {
        if sender.is_finished() {
            break;
        }
        tokio::task::yield_now().await;
        if harness.engine.window(1) == 0 {
            harness
                .deliver(vec![Event::WindowUpdated {
                    stream_id: 1,
                    delta: 10,
                }])
                .unwrap();
        }
    }
    sender.await.unwrap().unwrap();

    assert_eq!(
        harness.engine.sent_data(),
        vec![(1, 10, false), (1, 10, false), (1, 5, true)]
    );
    let written: usize = harness.transport.writes().iter().map(Bytes::len).sum();
    assert_eq!(written, "PREFACE".len() + 25);
}

#[tokio::test]
async fn empty_payload_skips_window_wait() {
    let harness = Harness::new();
    let stream = harness.conn.open_stream().unwrap();
    assert_eq!(harness.engine.window(1), 0);

    stream.send_data(Bytes::new(), true).await.unwrap();
    assert_eq!(harness.engine.sent_data(), vec![(1, 0, true)]);
}

#[tokio::test]
async fn window_update_unblocks_suspended_send() {
    let mut harness = Harness::new();
    let stream = harness.conn.open_stream().unwrap();

    let sender = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.send_data(&b"payload"[..], false).await })
    };
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert!(!sender.is_finished());
    assert!(harness.engine.sent_data().is_empty());

    harness
        .deliver(vec![Event::WindowUpdated {
            stream_id: 1,
            delta: 1024,
        }])
        .unwrap();
    sender.await.unwrap().unwrap();
    assert_eq!(harness.engine.sent_data(), vec![(1, 7, false)]);
}

#[tokio::test]
async fn connection_window_update_wakes_every_stream() {
    let mut harness = Harness::new();
    let a = harness.conn.open_stream().unwrap();
    let b = harness.conn.open_stream().unwrap();
    harness.engine.set_window(a.id(), 0);
    harness.engine.set_window(b.id(), 0);

    let senders: Vec<_> = [a, b]
        .into_iter()
        .map(|stream| tokio::spawn(async move { stream.send_data(&b"abc"[..], true).await }))
        .collect();
    tokio::task::yield_now().await;

    harness
        .deliver(vec![Event::WindowUpdated {
            stream_id: 0,
            delta: 3,
        }])
        .unwrap();
    for sender in senders {
        sender.await.unwrap().unwrap();
    }

    let mut sent = harness.engine.sent_data();
    sent.sort();
    assert_eq!(sent, vec![(1, 3, true), (3, 3, true)]);
}

#[tokio::test]
async fn reset_fails_suspended_send() {
    let mut harness = Harness::new();
    let stream = harness.conn.open_stream().unwrap();

    let sender = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.send_data(&b"never"[..], true).await })
    };
    tokio::task::yield_now().await;

    harness
        .deliver(vec![Event::StreamReset {
            stream_id: 1,
            error_code: error_code::CANCEL,
            remote_reset: true,
        }])
        .unwrap();

    assert!(matches!(
        sender.await.unwrap(),
        Err(Error::StreamReset {
            stream_id: 1,
            error_code: 0x8
        })
    ));
    assert_eq!(harness.handler.cancelled(), vec![1]);
    assert!(harness.conn.stream(1).is_none());
}

#[tokio::test]
async fn local_reset_sends_rst_and_evicts() {
    let harness = Harness::new();
    let stream = harness.conn.open_stream().unwrap();

    stream.reset(error_code::CANCEL).unwrap();
    assert_eq!(harness.engine.state().resets, vec![(1, error_code::CANCEL)]);
    assert!(stream.is_closed());
    assert_eq!(harness.conn.stream_count(), 0);
    assert!(matches!(
        stream.send_data(&b"late"[..], false).await,
        Err(Error::StreamReset { .. })
    ));
}

#[tokio::test]
async fn finished_stream_is_evicted() {
    let mut harness = Harness::new();
    harness.engine.set_window(1, 100);
    let stream = harness.conn.open_stream().unwrap();

    stream.send_headers(&crate::support::request_headers(), false).await.unwrap();
    stream.send_data(&b"body"[..], true).await.unwrap();
    assert_eq!(harness.conn.stream_count(), 1);

    harness
        .deliver(vec![
            Event::ResponseReceived {
                stream_id: 1,
                headers: vec![h2_mux::Header::new(":status", "200")],
            },
            Event::StreamEnded { stream_id: 1 },
        ])
        .unwrap();
    assert_eq!(harness.conn.stream_count(), 0);
    assert!(stream.is_closed());
    // The handle still works for reading what arrived.
    assert_eq!(stream.recv_headers().await.unwrap()[0].value, "200");
}
