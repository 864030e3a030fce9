//! Tests for HPACK encoding and header helpers

use h2_mux::hpack::find;
use h2_mux::{Header, HpackDecoder, HpackEncoder};

#[test]
fn test_encode_indexed_header() {
    let mut encoder = HpackEncoder::new();
    // :method GET is static table entry 2.
    assert_eq!(encoder.encode(&[Header::new(":method", "GET")]), vec![0x82]);
}

#[test]
fn test_encoder_state_carries_across_blocks() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();
    let headers = vec![Header::new("x-request-id", "abc-123-def")];

    // Both sides keep table state per connection; consecutive blocks must
    // stay in sync.
    for _ in 0..3 {
        assert_eq!(decoder.decode(&encoder.encode(&headers)).unwrap(), headers);
    }
}

#[test]
fn test_encode_decode_preserves_order_and_duplicates() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();

    let headers = vec![
        Header::new(":status", "200"),
        Header::new("content-type", "application/json"),
        Header::new("set-cookie", "session=xyz"),
        Header::new("set-cookie", "theme=dark"),
    ];

    let decoded = decoder.decode(&encoder.encode(&headers)).unwrap();
    assert_eq!(decoded, headers);
}

#[test]
fn test_header_from_tuple() {
    let header: Header = (":path", "/").into();
    assert_eq!(header, Header::new(":path", "/"));
    assert!(header.is_pseudo());
    assert!(!Header::new("host", "example.com").is_pseudo());
}

#[test]
fn test_find_returns_first_match() {
    let headers = vec![
        Header::new("set-cookie", "a=1"),
        Header::new("set-cookie", "b=2"),
        Header::new(":status", "204"),
    ];
    assert_eq!(find(&headers, "set-cookie"), Some("a=1"));
    assert_eq!(find(&headers, ":status"), Some("204"));
    assert_eq!(find(&headers, "content-length"), None);
}
