//! Tests for frame encoders

use bytes::BytesMut;
use h2_mux::error_code;
use h2_mux::frame::{self, flags, frame_type, Frame, FrameDecoder, FrameHeader};

#[test]
fn test_put_rst_stream() {
    let mut out = BytesMut::new();
    frame::put_rst_stream(&mut out, 1, error_code::HTTP_1_1_REQUIRED);
    assert_eq!(out.len(), 13);
    assert_eq!(&out[0..3], &[0, 0, 4]);
    assert_eq!(out[3], frame_type::RST_STREAM);
    assert_eq!(&out[9..], &[0, 0, 0, 0xd]);
}

#[test]
fn test_put_settings_ack() {
    let mut out = BytesMut::new();
    frame::put_settings_ack(&mut out);
    assert_eq!(&out[..], &[0, 0, 0, frame_type::SETTINGS, flags::ACK, 0, 0, 0, 0]);
}

#[test]
fn test_put_settings_with_window() {
    let mut out = BytesMut::new();
    frame::put_settings(&mut out, &[(4, 1_048_576)]);
    assert_eq!(out.len(), 15);
    assert_eq!(&out[9..11], &[0, 4]);
    assert_eq!(&out[11..], &[0, 0x10, 0, 0]);
}

#[test]
fn test_put_ping_ack() {
    let data = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    let mut out = BytesMut::new();
    frame::put_ping(&mut out, true, data);
    assert_eq!(out.len(), 17);
    assert_eq!(out[3], frame_type::PING);
    assert_eq!(out[4], flags::ACK);
    assert_eq!(&out[9..], &data);
}

#[test]
fn test_put_window_update() {
    let mut out = BytesMut::new();
    frame::put_window_update(&mut out, 7, 32_768);
    let header = FrameHeader::parse(&out).unwrap();
    assert_eq!(header.frame_type, frame_type::WINDOW_UPDATE);
    assert_eq!(header.stream_id, 7);
    assert_eq!(&out[9..], &[0, 0, 0x80, 0]);
}

#[test]
fn test_put_data_end_stream_flag() {
    let mut out = BytesMut::new();
    frame::put_data(&mut out, 3, b"abc", true);
    frame::put_data(&mut out, 3, b"", false);

    let frames = FrameDecoder::new().decode(&out).unwrap();
    assert_eq!(frames.len(), 2);
    assert!(matches!(&frames[0], Frame::Data { end_stream: true, data, .. } if &data[..] == b"abc"));
    assert!(matches!(&frames[1], Frame::Data { end_stream: false, data, .. } if data.is_empty()));
}

#[test]
fn test_small_header_block_is_single_frame() {
    let mut out = BytesMut::new();
    frame::put_headers(&mut out, 1, &[0x82, 0x86], false, 16_384);
    let header = FrameHeader::parse(&out).unwrap();
    assert_eq!(header.frame_type, frame_type::HEADERS);
    assert!(header.is_end_headers());
    assert!(!header.is_end_stream());
    assert_eq!(out.len(), header.total_size());
}
