//! Tests for connection and stream control frames

use h2_mux::frame::{flags, settings_id, Frame, FrameDecoder, Priority};

#[test]
fn test_settings_pairs_in_wire_order() {
    let mut decoder = FrameDecoder::new();
    let data = [
        0, 0, 12, 4, 0, 0, 0, 0, 0, //
        0, 4, 0, 1, 0, 0, // INITIAL_WINDOW_SIZE = 65536
        0, 3, 0, 0, 0, 100, // MAX_CONCURRENT_STREAMS = 100
    ];

    let frames = decoder.decode(&data).unwrap();
    assert_eq!(
        frames,
        vec![Frame::Settings {
            ack: false,
            settings: vec![
                (settings_id::INITIAL_WINDOW_SIZE, 65_536),
                (settings_id::MAX_CONCURRENT_STREAMS, 100),
            ],
        }]
    );
}

#[test]
fn test_ping_and_ack() {
    let mut decoder = FrameDecoder::new();
    let mut data = vec![0, 0, 8, 6, 0, 0, 0, 0, 0];
    data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    data.extend_from_slice(&[0, 0, 8, 6, flags::ACK, 0, 0, 0, 0]);
    data.extend_from_slice(&[8, 7, 6, 5, 4, 3, 2, 1]);

    let frames = decoder.decode(&data).unwrap();
    assert_eq!(
        frames,
        vec![
            Frame::Ping {
                ack: false,
                data: [1, 2, 3, 4, 5, 6, 7, 8]
            },
            Frame::Ping {
                ack: true,
                data: [8, 7, 6, 5, 4, 3, 2, 1]
            },
        ]
    );
}

#[test]
fn test_goaway_ignores_debug_data() {
    let mut decoder = FrameDecoder::new();
    let mut data = vec![0, 0, 11, 7, 0, 0, 0, 0, 0];
    data.extend_from_slice(&[0x80, 0, 0, 7]); // reserved bit set
    data.extend_from_slice(&[0, 0, 0, 2]);
    data.extend_from_slice(b"bye");

    let frames = decoder.decode(&data).unwrap();
    assert_eq!(
        frames,
        vec![Frame::GoAway {
            last_stream_id: 7,
            error_code: 2
        }]
    );
}

#[test]
fn test_window_update_masks_reserved_bit() {
    let mut decoder = FrameDecoder::new();
    let data = [0, 0, 4, 8, 0, 0, 0, 0, 3, 0x80, 0, 0x10, 0];

    let frames = decoder.decode(&data).unwrap();
    assert_eq!(
        frames,
        vec![Frame::WindowUpdate {
            stream_id: 3,
            increment: 4096
        }]
    );
}

#[test]
fn test_rst_stream() {
    let mut decoder = FrameDecoder::new();
    let data = [0, 0, 4, 3, 0, 0, 0, 0, 5, 0, 0, 0, 8];
    assert_eq!(
        decoder.decode(&data).unwrap(),
        vec![Frame::RstStream {
            stream_id: 5,
            error_code: 8
        }]
    );
}

#[test]
fn test_priority_frame() {
    let mut decoder = FrameDecoder::new();
    // exclusive dependency on stream 1, weight 15
    let data = [0, 0, 5, 2, 0, 0, 0, 0, 3, 0x80, 0, 0, 1, 15];
    assert_eq!(
        decoder.decode(&data).unwrap(),
        vec![Frame::Priority {
            stream_id: 3,
            priority: Priority {
                depends_on: 1,
                weight: 15,
                exclusive: true
            }
        }]
    );
}

#[test]
fn test_push_promise_reported() {
    let mut decoder = FrameDecoder::new();
    let data = [0, 0, 4, 5, 4, 0, 0, 0, 1, 0, 0, 0, 2];
    assert_eq!(decoder.decode(&data).unwrap(), vec![Frame::PushPromise { stream_id: 1 }]);
}
