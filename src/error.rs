//! Error types for decoding, encoding and stream state violations.
//!
//! The decoder and encoder only classify what they saw. Whether a failure
//! tears down one stream or the whole connection is decided by the caller
//! (see [`crate::Streams`]).

use std::io;

use crate::frame::ErrorCode;

/// Failure reported by the frame decoder or by a [`crate::DecoderHandler`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Fatal to the whole connection; the caller should send GOAWAY with
    /// `code` and close the transport.
    #[error("connection error ({code:?}): {reason}")]
    Connection { code: ErrorCode, reason: String },

    /// Fatal to one stream only; the caller should send RST_STREAM.
    /// The decoder stays usable and skips the rest of the offending frame.
    #[error("stream {stream_id} error ({code:?}): {reason}")]
    Stream {
        stream_id: u32,
        code: ErrorCode,
        reason: String,
    },
}

impl DecodeError {
    pub fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        DecodeError::Connection {
            code,
            reason: reason.into(),
        }
    }

    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        DecodeError::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            DecodeError::Connection { code, .. } | DecodeError::Stream { code, .. } => *code,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, DecodeError::Connection { .. })
    }

    /// The stream a stream-level error applies to.
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            DecodeError::Stream { stream_id, .. } => Some(*stream_id),
            DecodeError::Connection { .. } => None,
        }
    }
}

/// Failure while serializing frames.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("{kind} payload of {len} bytes exceeds max frame size {max}")]
    FrameTooLarge { kind: &'static str, len: usize, max: u32 },

    #[error("output buffer of {capacity} bytes cannot hold a {needed} byte frame")]
    OutputTooSmall { capacity: usize, needed: usize },

    #[error("invalid stream id {0} for this frame")]
    InvalidStreamId(u32),

    #[error("invalid WINDOW_UPDATE increment {0}")]
    InvalidWindowIncrement(u32),

    #[error("header block for stream {stream_id} is still being written")]
    HeaderBlockPending { stream_id: u32 },

    #[error("stream {stream_id} cannot send in state {state}")]
    IllegalState { stream_id: u32, state: &'static str },

    #[error("body source: {0}")]
    Body(#[from] io::Error),
}

/// A stream-level protocol violation detected by the stream state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream {stream_id} ({code:?}): {reason}")]
pub struct StreamError {
    pub stream_id: u32,
    pub code: ErrorCode,
    pub reason: String,
}

impl StreamError {
    pub fn new(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            stream_id,
            code,
            reason: reason.into(),
        }
    }
}

impl From<StreamError> for DecodeError {
    fn from(err: StreamError) -> Self {
        DecodeError::Stream {
            stream_id: err.stream_id,
            code: err.code,
            reason: err.reason,
        }
    }
}
