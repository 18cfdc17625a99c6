//! Tests for SETTINGS, PING, GOAWAY, WINDOW_UPDATE, RST_STREAM and PRIORITY

use h2_framing::{flags, frame_type, settings_id, ErrorCode, Frame, Priority, Setting};

use crate::support::{decoder, raw_frame, Event, Recorder};

fn setting_bytes(id: u16, value: u32) -> Vec<u8> {
    let mut bytes = id.to_be_bytes().to_vec();
    bytes.extend_from_slice(&value.to_be_bytes());
    bytes
}

#[test]
fn test_settings_entries_in_order() {
    let mut payload = setting_bytes(settings_id::MAX_CONCURRENT_STREAMS, 100);
    payload.extend(setting_bytes(settings_id::INITIAL_WINDOW_SIZE, 1 << 20));
    payload.extend(setting_bytes(settings_id::MAX_FRAME_SIZE, 32768));

    let mut recorder = Recorder::new();
    decoder()
        .feed(&raw_frame(frame_type::SETTINGS, 0, 0, &payload), &mut recorder)
        .unwrap();

    assert_eq!(
        recorder.events,
        vec![Event::Settings(vec![
            Setting::new(settings_id::MAX_CONCURRENT_STREAMS, 100),
            Setting::new(settings_id::INITIAL_WINDOW_SIZE, 1 << 20),
            Setting::new(settings_id::MAX_FRAME_SIZE, 32768),
        ])]
    );
}

#[test]
fn test_unknown_setting_ignored() {
    let mut payload = setting_bytes(0x99, 7);
    payload.extend(setting_bytes(settings_id::ENABLE_PUSH, 0));

    let mut recorder = Recorder::new();
    decoder()
        .feed(&raw_frame(frame_type::SETTINGS, 0, 0, &payload), &mut recorder)
        .unwrap();

    assert_eq!(
        recorder.events,
        vec![Event::Settings(vec![Setting::new(settings_id::ENABLE_PUSH, 0)])]
    );
}

#[test]
fn test_settings_ack() {
    let mut recorder = Recorder::new();
    decoder()
        .feed(&raw_frame(frame_type::SETTINGS, flags::ACK, 0, &[]), &mut recorder)
        .unwrap();
    assert_eq!(recorder.frames, vec![Frame::SettingsAck]);
}

#[test]
fn test_settings_ack_with_payload_is_frame_size_error() {
    let mut recorder = Recorder::new();
    let err = decoder()
        .feed(
            &raw_frame(frame_type::SETTINGS, flags::ACK, 0, &setting_bytes(settings_id::ENABLE_PUSH, 0)),
            &mut recorder,
        )
        .unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::FRAME_SIZE_ERROR);
    assert!(recorder.events.is_empty());
}

#[test]
fn test_settings_length_not_multiple_of_six() {
    let mut recorder = Recorder::new();
    let err = decoder()
        .feed(&raw_frame(frame_type::SETTINGS, 0, 0, &[0, 1, 0, 0, 0]), &mut recorder)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FRAME_SIZE_ERROR);
}

#[test]
fn test_settings_on_stream_is_connection_error() {
    let mut recorder = Recorder::new();
    let err = decoder()
        .feed(&raw_frame(frame_type::SETTINGS, 0, 1, &[]), &mut recorder)
        .unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::PROTOCOL_ERROR);
}

#[test]
fn test_invalid_setting_values() {
    let cases = [
        (settings_id::ENABLE_PUSH, 2, ErrorCode::PROTOCOL_ERROR),
        (settings_id::INITIAL_WINDOW_SIZE, 1 << 31, ErrorCode::FLOW_CONTROL_ERROR),
        (settings_id::MAX_FRAME_SIZE, 16383, ErrorCode::PROTOCOL_ERROR),
        (settings_id::MAX_FRAME_SIZE, 1 << 24, ErrorCode::PROTOCOL_ERROR),
    ];

    for (id, value, code) in cases {
        let mut recorder = Recorder::new();
        let err = decoder()
            .feed(&raw_frame(frame_type::SETTINGS, 0, 0, &setting_bytes(id, value)), &mut recorder)
            .unwrap_err();
        assert!(err.is_connection_error(), "setting {} = {}", id, value);
        assert_eq!(err.code(), code, "setting {} = {}", id, value);
    }
}

#[test]
fn test_ping_and_ping_ack() {
    let mut wire = raw_frame(frame_type::PING, 0, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
    wire.extend(raw_frame(frame_type::PING, flags::ACK, 0, &[8, 7, 6, 5, 4, 3, 2, 1]));

    let mut recorder = Recorder::new();
    decoder().feed(&wire, &mut recorder).unwrap();

    assert_eq!(
        recorder.events,
        vec![
            Event::Ping([1, 2, 3, 4, 5, 6, 7, 8]),
            Event::PingAck([8, 7, 6, 5, 4, 3, 2, 1]),
        ]
    );
}

#[test]
fn test_goaway_debug_data_split() {
    let mut payload = vec![0, 0, 0, 5];
    payload.extend_from_slice(&ErrorCode::ENHANCE_YOUR_CALM.0.to_be_bytes());
    payload.extend_from_slice(b"slow down!");
    let wire = raw_frame(frame_type::GOAWAY, 0, 0, &payload);

    let mut codec = decoder();
    let mut recorder = Recorder::new();
    // Header, fixed fields and 6 bytes of debug data, then the last 4
    codec.feed(&wire[..23], &mut recorder).unwrap();
    codec.feed(&wire[23..], &mut recorder).unwrap();

    assert_eq!(
        recorder.events,
        vec![
            Event::GoAwayBegin(5, ErrorCode::ENHANCE_YOUR_CALM, 10),
            Event::GoAwayItem(b"slow d".to_vec()),
            Event::GoAwayItem(b"own!".to_vec()),
            Event::GoAwayEnd,
        ]
    );
    match &recorder.frames[..] {
        [Frame::GoAway { last_stream_id, debug_data, .. }] => {
            assert_eq!(*last_stream_id, 5);
            assert_eq!(&debug_data[..], b"slow down!");
        }
        other => panic!("unexpected frames {:?}", other),
    }
}

#[test]
fn test_goaway_without_debug_data() {
    let mut payload = vec![0x80, 0, 0, 3];
    payload.extend_from_slice(&[0, 0, 0, 0]);

    let mut recorder = Recorder::new();
    decoder()
        .feed(&raw_frame(frame_type::GOAWAY, 0, 0, &payload), &mut recorder)
        .unwrap();

    // Reserved bit masked off
    assert_eq!(
        recorder.events,
        vec![Event::GoAwayBegin(3, ErrorCode::NO_ERROR, 0), Event::GoAwayEnd]
    );
}

#[test]
fn test_window_update_zero_on_connection() {
    let mut recorder = Recorder::new();
    let err = decoder()
        .feed(&raw_frame(frame_type::WINDOW_UPDATE, 0, 0, &[0, 0, 0, 0]), &mut recorder)
        .unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.code(), ErrorCode::PROTOCOL_ERROR);
}

#[test]
fn test_window_update_zero_on_stream() {
    let mut codec = decoder();
    let mut recorder = Recorder::new();
    let err = codec
        .feed(&raw_frame(frame_type::WINDOW_UPDATE, 0, 3, &[0, 0, 0, 0]), &mut recorder)
        .unwrap_err();
    assert!(!err.is_connection_error());
    assert_eq!(err.stream_id(), Some(3));
    assert!(!codec.is_failed());

    codec
        .feed(&raw_frame(frame_type::WINDOW_UPDATE, 0, 3, &[0, 0, 1, 0]), &mut recorder)
        .unwrap();
    assert_eq!(recorder.events, vec![Event::WindowUpdate(3, 256)]);
}

#[test]
fn test_rst_stream() {
    let mut recorder = Recorder::new();
    decoder()
        .feed(&raw_frame(frame_type::RST_STREAM, 0, 7, &[0, 0, 0, 8]), &mut recorder)
        .unwrap();
    assert_eq!(recorder.events, vec![Event::RstStream(7, ErrorCode::CANCEL)]);
}

#[test]
fn test_fixed_length_violations() {
    let cases = [
        raw_frame(frame_type::RST_STREAM, 0, 1, &[0, 0]),
        raw_frame(frame_type::PING, 0, 0, &[0; 4]),
        raw_frame(frame_type::GOAWAY, 0, 0, &[0; 4]),
        raw_frame(frame_type::WINDOW_UPDATE, 0, 0, &[0, 0]),
    ];

    for wire in cases {
        let mut recorder = Recorder::new();
        let err = decoder().feed(&wire, &mut recorder).unwrap_err();
        assert!(err.is_connection_error(), "frame type {}", wire[3]);
        assert_eq!(err.code(), ErrorCode::FRAME_SIZE_ERROR, "frame type {}", wire[3]);
    }
}

#[test]
fn test_priority_frame() {
    let mut recorder = Recorder::new();
    // Exclusive dependency on stream 1, weight 200
    decoder()
        .feed(&raw_frame(frame_type::PRIORITY, 0, 3, &[0x80, 0, 0, 1, 200]), &mut recorder)
        .unwrap();
    assert_eq!(
        recorder.events,
        vec![Event::Priority(
            3,
            Priority {
                exclusive: true,
                dependency: 1,
                weight: 200,
            }
        )]
    );
}

#[test]
fn test_priority_on_itself_is_stream_error() {
    let mut codec = decoder();
    let mut recorder = Recorder::new();
    let err = codec
        .feed(&raw_frame(frame_type::PRIORITY, 0, 3, &[0, 0, 0, 3, 16]), &mut recorder)
        .unwrap_err();
    assert_eq!(err.stream_id(), Some(3));
    assert_eq!(err.code(), ErrorCode::PROTOCOL_ERROR);
    assert!(!codec.is_failed());
}

#[test]
fn test_priority_wrong_length_is_stream_error() {
    let mut codec = decoder();
    let mut recorder = Recorder::new();

    let mut wire = raw_frame(frame_type::PRIORITY, 0, 3, &[0, 0, 0, 0, 16, 0]);
    wire.extend(raw_frame(frame_type::PING, 0, 0, &[0; 8]));
    let mut cursor = &wire[..];

    let err = codec.decode(&mut cursor, &mut recorder).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FRAME_SIZE_ERROR);
    assert_eq!(err.stream_id(), Some(3));

    codec.decode(&mut cursor, &mut recorder).unwrap();
    assert_eq!(recorder.events, vec![Event::Ping([0; 8])]);
}
