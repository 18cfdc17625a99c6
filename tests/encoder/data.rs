//! Tests for streaming DATA through `encode_data`

use std::collections::VecDeque;
use std::io;

use bytes::Bytes;
use h2_framing::{BodySource, EncodeError, FrameEncoder, FrameKind, OutputBuffer, ReaderBody};

use crate::support::{decode_chunked, split_frames};

/// Hands out one queued chunk per read; `None` stands for "nothing yet".
struct Trickle {
    chunks: VecDeque<Option<Vec<u8>>>,
}

impl BodySource for Trickle {
    fn read_into(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        match self.chunks.front_mut() {
            Some(Some(chunk)) => {
                let n = chunk.len().min(dst.len());
                dst[..n].copy_from_slice(&chunk[..n]);
                chunk.drain(..n);
                if chunk.is_empty() {
                    self.chunks.pop_front();
                }
                Ok(n)
            }
            Some(None) => {
                self.chunks.pop_front();
                Ok(0)
            }
            None => Ok(0),
        }
    }

    fn is_end_of_stream(&self) -> bool {
        self.chunks.is_empty()
    }
}

struct Broken;

impl BodySource for Broken {
    fn read_into(&mut self, _dst: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "upstream went away"))
    }

    fn is_end_of_stream(&self) -> bool {
        false
    }
}

#[test]
fn test_body_split_at_max_frame_size() {
    let mut encoder = FrameEncoder::new();
    let mut body = Bytes::from(vec![b'x'; 40_000]);
    let mut out = OutputBuffer::with_capacity(64 * 1024);

    let progress = encoder.encode_data(1, &mut body, true, 1 << 20, &mut out).unwrap();
    assert_eq!(progress.bytes_written, 40_000);
    assert_eq!(progress.frames, 3);
    assert!(progress.body_complete);

    let frames = split_frames(out.as_slice());
    let lengths: Vec<u32> = frames.iter().map(|(h, _)| h.length).collect();
    assert_eq!(lengths, vec![16384, 16384, 7232]);
    assert!(frames.iter().all(|(h, _)| h.kind() == FrameKind::Data));
    assert!(!frames[0].0.is_end_stream());
    assert!(frames[2].0.is_end_stream());

    let recorder = decode_chunked(out.as_slice(), 1000);
    assert_eq!(recorder.data_for(1).len(), 40_000);
}

#[test]
fn test_body_resumes_when_window_opens() {
    let mut encoder = FrameEncoder::new();
    let mut body: &[u8] = b"0123456789abcdef";
    let mut wire = Vec::new();

    let mut out = OutputBuffer::with_capacity(1024);
    let progress = encoder.encode_data(3, &mut body, true, 10, &mut out).unwrap();
    assert_eq!(progress.bytes_written, 10);
    assert!(!progress.body_complete);
    wire.extend_from_slice(out.as_slice());

    // No credit: nothing is written
    let mut out = OutputBuffer::with_capacity(1024);
    let progress = encoder.encode_data(3, &mut body, true, 0, &mut out).unwrap();
    assert_eq!(progress.frames, 0);
    assert!(out.is_empty());

    let progress = encoder.encode_data(3, &mut body, true, 100, &mut out).unwrap();
    assert_eq!(progress.bytes_written, 6);
    assert!(progress.body_complete);
    wire.extend_from_slice(out.as_slice());

    let recorder = decode_chunked(&wire, 7);
    assert_eq!(recorder.data_for(3), b"0123456789abcdef");
}

#[test]
fn test_body_limited_by_output_room() {
    let mut encoder = FrameEncoder::new();
    let mut body: &[u8] = &[1u8; 100];

    let mut out = OutputBuffer::with_capacity(9 + 30);
    let progress = encoder.encode_data(1, &mut body, true, 1000, &mut out).unwrap();
    assert_eq!(progress.bytes_written, 30);
    assert_eq!(out.len(), 39);
    assert!(!progress.body_complete);

    // A buffer with room for only a frame header writes nothing
    let mut out = OutputBuffer::with_capacity(9);
    let progress = encoder.encode_data(1, &mut body, true, 1000, &mut out).unwrap();
    assert_eq!(progress.frames, 0);
    assert!(out.is_empty());
}

#[test]
fn test_body_without_end_stream() {
    let mut encoder = FrameEncoder::new();
    let mut body: &[u8] = b"partial";
    let mut out = OutputBuffer::with_capacity(1024);

    let progress = encoder.encode_data(5, &mut body, false, 1000, &mut out).unwrap();
    assert!(progress.body_complete);
    let frames = split_frames(out.as_slice());
    assert_eq!(frames.len(), 1);
    assert!(!frames[0].0.is_end_stream());
}

#[test]
fn test_body_not_ready_yet() {
    let mut encoder = FrameEncoder::new();
    let mut body = Trickle {
        chunks: VecDeque::from(vec![Some(b"abc".to_vec()), None, Some(b"def".to_vec())]),
    };
    let mut wire = Vec::new();

    let mut out = OutputBuffer::with_capacity(1024);
    let progress = encoder.encode_data(1, &mut body, true, 1000, &mut out).unwrap();
    assert_eq!(progress.bytes_written, 3);
    assert!(!progress.body_complete);
    wire.extend_from_slice(out.as_slice());

    let mut out = OutputBuffer::with_capacity(1024);
    let progress = encoder.encode_data(1, &mut body, true, 1000, &mut out).unwrap();
    assert_eq!(progress.bytes_written, 3);
    assert!(progress.body_complete);
    wire.extend_from_slice(out.as_slice());

    let frames = split_frames(&wire);
    assert_eq!(frames.len(), 2);
    assert!(frames[1].0.is_end_stream());
}

#[test]
fn test_reader_body_streams_until_eof() {
    let mut encoder = FrameEncoder::new();
    let content = vec![b'r'; 20_000];
    let mut body = ReaderBody::new(io::Cursor::new(content));
    let mut out = OutputBuffer::with_capacity(64 * 1024);

    let progress = encoder.encode_data(1, &mut body, true, 1 << 20, &mut out).unwrap();
    assert_eq!(progress.bytes_written, 20_000);
    assert!(progress.body_complete);
    assert!(body.is_end_of_stream());

    let frames = split_frames(out.as_slice());
    // EOF is only seen after the data, so the last frame is empty
    let last = frames.last().unwrap();
    assert_eq!(last.0.length, 0);
    assert!(last.0.is_end_stream());
}

#[test]
fn test_body_error_writes_nothing() {
    let mut encoder = FrameEncoder::new();
    let mut out = OutputBuffer::with_capacity(1024);

    let err = encoder.encode_data(1, &mut Broken, true, 1000, &mut out).unwrap_err();
    assert!(matches!(err, EncodeError::Body(_)));
    assert!(err.to_string().contains("upstream went away"));
    assert!(out.is_empty());
}

#[test]
fn test_data_on_stream_zero() {
    let mut encoder = FrameEncoder::new();
    let mut body: &[u8] = b"x";
    let mut out = OutputBuffer::with_capacity(1024);
    assert!(matches!(
        encoder.encode_data(0, &mut body, true, 1000, &mut out),
        Err(EncodeError::InvalidStreamId(0))
    ));
}
