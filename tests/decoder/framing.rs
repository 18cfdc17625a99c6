//! Tests for frame header parsing, fragmentation, preface and DATA frames

use h2_framing::{
    flags, frame_type, DecoderConfig, ErrorCode, FrameDecoder, FrameKind, H2FrameHeader, CONNECTION_PREFACE,
};

use crate::support::{decoder, raw_frame, Event, Recorder};

#[test]
fn test_frame_header_headers() {
    // HEADERS frame, length 10, stream 3, END_HEADERS
    let header_bytes = [0, 0, 10, 1, 4, 0, 0, 0, 3];
    let header = H2FrameHeader::parse(&header_bytes).unwrap();

    assert_eq!(header.length, 10);
    assert_eq!(header.frame_type, frame_type::HEADERS);
    assert_eq!(header.kind(), FrameKind::Headers);
    assert_eq!(header.stream_id, 3);
    assert!(!header.is_end_stream());
    assert!(header.is_end_headers());
}

#[test]
fn test_total_size() {
    let header = H2FrameHeader::new(100, FrameKind::Data, 0, 1);
    assert_eq!(header.total_size(), 109); // 9 + 100
}

#[test]
fn test_fragmented_data_frame() {
    let mut codec = decoder();
    let mut recorder = Recorder::new();

    let frame = raw_frame(frame_type::DATA, flags::END_STREAM, 1, b"hello");

    codec.feed(&frame[..5], &mut recorder).unwrap();
    assert!(recorder.events.is_empty(), "half a frame header yields nothing");

    codec.feed(&frame[5..11], &mut recorder).unwrap();
    assert_eq!(
        recorder.events,
        vec![Event::DataBegin(1, 5, true), Event::DataItem(1, b"he".to_vec())]
    );

    codec.feed(&frame[11..], &mut recorder).unwrap();
    assert_eq!(recorder.data_for(1), b"hello");
    assert_eq!(recorder.events.last(), Some(&Event::EndStream(1)));
}

#[test]
fn test_byte_at_a_time_matches_single_feed() {
    let mut wire = raw_frame(frame_type::SETTINGS, 0, 0, &[0, 4, 0, 0, 0xff, 0xff]);
    wire.extend(raw_frame(frame_type::HEADERS, flags::END_HEADERS, 1, &[0x82, 0x86, 0x84]));
    wire.extend(raw_frame(frame_type::DATA, 0, 1, b"abc"));
    wire.extend(raw_frame(frame_type::PING, 0, 0, &[1, 2, 3, 4, 5, 6, 7, 8]));
    wire.extend(raw_frame(frame_type::DATA, flags::END_STREAM, 1, b"def"));

    let mut whole = Recorder::new();
    decoder().feed(&wire, &mut whole).unwrap();

    let mut codec = decoder();
    let mut split = Recorder::new();
    for byte in &wire {
        codec.feed(std::slice::from_ref(byte), &mut split).unwrap();
    }

    assert_eq!(whole.frames, split.frames);
    assert_eq!(split.data_for(1), b"abcdef");
    assert_eq!(split.frames.len(), 5);
}

#[test]
fn test_padded_data_frame() {
    let mut codec = decoder();
    let mut recorder = Recorder::new();

    // length 10: pad length 4, "hello", 4 bytes of padding
    let mut payload = vec![4];
    payload.extend_from_slice(b"hello");
    payload.extend_from_slice(&[0, 0, 0, 0]);
    let frame = raw_frame(frame_type::DATA, flags::END_STREAM | flags::PADDED, 1, &payload);

    codec.feed(&frame, &mut recorder).unwrap();
    assert_eq!(
        recorder.events,
        vec![
            Event::DataBegin(1, 10, true),
            Event::DataItem(1, b"hello".to_vec()),
            Event::EndStream(1),
        ]
    );
}

#[test]
fn test_padding_exceeding_payload_is_connection_error() {
    let mut codec = decoder();
    let mut recorder = Recorder::new();

    let mut payload = vec![10];
    payload.extend_from_slice(b"hello");
    let frame = raw_frame(frame_type::DATA, flags::PADDED, 1, &payload);

    let err = codec.feed(&frame, &mut recorder).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::PROTOCOL_ERROR);
    assert!(err.to_string().contains("Invalid padding"));
}

#[test]
fn test_empty_data_frame() {
    let mut recorder = Recorder::new();
    decoder()
        .feed(&raw_frame(frame_type::DATA, flags::END_STREAM, 1, &[]), &mut recorder)
        .unwrap();
    assert_eq!(recorder.events, vec![Event::DataBegin(1, 0, true), Event::EndStream(1)]);
}

#[test]
fn test_frame_larger_than_max_frame_size() {
    let mut codec = decoder();
    let mut recorder = Recorder::new();

    // Only the header is needed to reject it
    let header = [0, 0x40, 0x01, frame_type::DATA, 0, 0, 0, 0, 1];
    let err = codec.feed(&header, &mut recorder).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::FRAME_SIZE_ERROR);
}

#[test]
fn test_raised_max_frame_size_accepts_larger_frames() {
    let mut codec = decoder();
    codec.set_max_frame_size(32 * 1024);
    let mut recorder = Recorder::new();

    let payload = vec![7u8; 20_000];
    codec
        .feed(&raw_frame(frame_type::DATA, 0, 1, &payload), &mut recorder)
        .unwrap();
    assert_eq!(recorder.data_for(1).len(), 20_000);
}

#[test]
fn test_unknown_frame_type_skipped() {
    let mut codec = decoder();
    let mut recorder = Recorder::new();

    let mut wire = raw_frame(0xfa, 0xff, 7, b"extension payload");
    wire.extend(raw_frame(frame_type::DATA, 0, 1, b"x"));

    codec.feed(&wire, &mut recorder).unwrap();
    assert_eq!(
        recorder.events,
        vec![Event::DataBegin(1, 1, false), Event::DataItem(1, b"x".to_vec())]
    );
}

#[test]
fn test_data_on_stream_zero_is_connection_error() {
    let mut recorder = Recorder::new();
    let err = decoder()
        .feed(&raw_frame(frame_type::DATA, 0, 0, b"x"), &mut recorder)
        .unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::PROTOCOL_ERROR);
}

#[test]
fn test_server_expects_preface_then_settings() {
    let mut codec = FrameDecoder::new(DecoderConfig::server());
    let mut recorder = Recorder::new();

    let mut data = CONNECTION_PREFACE.to_vec();
    data.extend(raw_frame(frame_type::SETTINGS, 0, 0, &[]));

    // Split inside the preface
    codec.feed(&data[..10], &mut recorder).unwrap();
    assert!(!codec.preface_received());
    codec.feed(&data[10..], &mut recorder).unwrap();

    assert!(codec.preface_received());
    assert_eq!(recorder.events, vec![Event::Settings(vec![])]);
}

#[test]
fn test_invalid_preface_is_connection_error() {
    let mut codec = FrameDecoder::new(DecoderConfig::server());
    let mut recorder = Recorder::new();

    let err = codec.feed(b"GET / HTTP/1.1\r\n", &mut recorder).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::PROTOCOL_ERROR);
    assert!(codec.is_failed());
}

#[test]
fn test_first_frame_must_be_settings() {
    let mut codec = FrameDecoder::new(DecoderConfig::client());
    let mut recorder = Recorder::new();

    let err = codec
        .feed(&raw_frame(frame_type::PING, 0, 0, &[0; 8]), &mut recorder)
        .unwrap_err();
    assert!(err.is_connection_error());
    assert!(recorder.events.is_empty());
}

#[test]
fn test_first_frame_cannot_be_settings_ack() {
    let mut codec = FrameDecoder::new(DecoderConfig::client());
    let mut recorder = Recorder::new();

    let err = codec
        .feed(&raw_frame(frame_type::SETTINGS, flags::ACK, 0, &[]), &mut recorder)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PROTOCOL_ERROR);
}

#[test]
fn test_client_role_needs_no_preface() {
    let mut codec = FrameDecoder::new(DecoderConfig::client());
    let mut recorder = Recorder::new();

    codec
        .feed(&raw_frame(frame_type::SETTINGS, 0, 0, &[0, 3, 0, 0, 0, 100]), &mut recorder)
        .unwrap();
    assert!(codec.preface_received());
    assert_eq!(recorder.frames.len(), 1);
}

#[test]
fn test_reset_allows_new_preface() {
    let mut codec = FrameDecoder::new(DecoderConfig::server());
    let mut recorder = Recorder::new();

    let mut data = CONNECTION_PREFACE.to_vec();
    data.extend(raw_frame(frame_type::SETTINGS, 0, 0, &[]));
    codec.feed(&data, &mut recorder).unwrap();

    codec.reset();
    assert!(!codec.preface_received());
    codec.feed(&data, &mut recorder).unwrap();
    assert_eq!(recorder.count(|e| matches!(e, Event::Settings(_))), 2);
}
