//! Frames survive encoding and decoding, however the bytes are cut

use bytes::Bytes;
use h2_framing::{
    settings_id, ErrorCode, Frame, FrameEncoder, H2Header, OutputBuffer, Priority, Setting,
};

use crate::support::{decode_chunked, encode_all, request_headers};

fn conversation() -> Vec<Frame> {
    vec![
        Frame::Settings {
            settings: vec![
                Setting::new(settings_id::MAX_CONCURRENT_STREAMS, 50),
                Setting::new(settings_id::INITIAL_WINDOW_SIZE, 1 << 20),
            ],
        },
        Frame::SettingsAck,
        Frame::Headers {
            stream_id: 1,
            headers: request_headers(),
            end_stream: false,
        },
        Frame::Priority {
            stream_id: 1,
            priority: Priority {
                exclusive: false,
                dependency: 0,
                weight: 41,
            },
        },
        Frame::Data {
            stream_id: 1,
            payload: Bytes::from_static(b"request body"),
            end_stream: true,
        },
        Frame::Headers {
            stream_id: 3,
            headers: request_headers(),
            end_stream: true,
        },
        Frame::WindowUpdate {
            stream_id: 0,
            increment: 1024,
        },
        Frame::Ping {
            ack: false,
            opaque_data: *b"pingpong",
        },
        Frame::RstStream {
            stream_id: 3,
            error_code: ErrorCode::CANCEL,
        },
        Frame::GoAway {
            last_stream_id: 0,
            error_code: ErrorCode::NO_ERROR,
            debug_data: Bytes::from_static(b"done"),
        },
    ]
}

#[test]
fn test_round_trip_whole() {
    let frames = conversation();
    let wire = encode_all(&mut FrameEncoder::new(), &frames);
    assert_eq!(decode_chunked(&wire, wire.len()).frames, frames);
}

#[test]
fn test_round_trip_any_chunking() {
    let frames = conversation();
    let wire = encode_all(&mut FrameEncoder::new(), &frames);
    for chunk in [1, 2, 3, 7, 9, 10, 64] {
        assert_eq!(decode_chunked(&wire, chunk).frames, frames, "chunk size {}", chunk);
    }
}

#[test]
fn test_round_trip_through_small_buffers() {
    let frames = vec![
        Frame::Headers {
            stream_id: 1,
            headers: request_headers(),
            end_stream: false,
        },
        Frame::Headers {
            stream_id: 1,
            headers: vec![H2Header::new("grpc-status", "0"), H2Header::new("grpc-message", "ok")],
            end_stream: true,
        },
    ];

    let mut encoder = FrameEncoder::new();
    let mut wire = Vec::new();
    for frame in &frames {
        loop {
            let mut out = OutputBuffer::with_capacity(17);
            let done = encoder.encode(frame, &mut out).unwrap();
            wire.extend_from_slice(out.as_slice());
            if done {
                break;
            }
        }
    }

    assert_eq!(decode_chunked(&wire, 5).frames, frames);
}

#[test]
fn test_dynamic_table_stays_in_sync() {
    let mut encoder = FrameEncoder::new();
    // Same custom headers repeatedly, so later blocks reference the dynamic table
    let frames: Vec<Frame> = (0..5)
        .map(|i| Frame::Headers {
            stream_id: 1 + 2 * i,
            headers: vec![
                H2Header::new(":method", "POST"),
                H2Header::new(":scheme", "https"),
                H2Header::new(":path", "/upload"),
                H2Header::new("x-trace-id", "4bf92f3577b34da6"),
            ],
            end_stream: true,
        })
        .collect();

    let wire = encode_all(&mut encoder, &frames);
    assert_eq!(decode_chunked(&wire, 11).frames, frames);
}
