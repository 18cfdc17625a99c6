//! HTTP/2 wire format: the 9-byte frame header, protocol constants and the
//! logical `Frame` value shared by the decoder and the encoder.
//!
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+-------------------------------+
//! |R|                 Stream Identifier (31)                      |
//! +=+=============================================================+
//! |                   Frame Payload (0...)                      ...
//! +---------------------------------------------------------------+
//! ```
//!
//! Reference: RFC 7540 Section 4.1

use std::fmt;

use bytes::{BufMut, Bytes};

use crate::hpack::H2Header;

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Largest value the 24-bit length field can carry.
pub const MAX_FRAME_LENGTH: u32 = 0x00FF_FFFF;

/// Initial SETTINGS_MAX_FRAME_SIZE before any SETTINGS are exchanged.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Flow-control windows may never exceed 2^31-1.
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// Initial window size for streams and the connection.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Size of the PING opaque payload.
pub const PING_DATA_SIZE: usize = 8;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.len() >= CONNECTION_PREFACE.len() && &data[..CONNECTION_PREFACE.len()] == CONNECTION_PREFACE
}

/// HTTP/2 frame types (RFC 7540 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;

    /// Whether `id` is one of the identifiers defined by RFC 7540.
    pub fn is_known(id: u16) -> bool {
        (HEADER_TABLE_SIZE..=MAX_HEADER_LIST_SIZE).contains(&id)
    }
}

/// Frame type as a closed set, with `Unknown` for extension frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameKind {
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            frame_type::DATA => Self::Data,
            frame_type::HEADERS => Self::Headers,
            frame_type::PRIORITY => Self::Priority,
            frame_type::RST_STREAM => Self::RstStream,
            frame_type::SETTINGS => Self::Settings,
            frame_type::PUSH_PROMISE => Self::PushPromise,
            frame_type::PING => Self::Ping,
            frame_type::GOAWAY => Self::GoAway,
            frame_type::WINDOW_UPDATE => Self::WindowUpdate,
            frame_type::CONTINUATION => Self::Continuation,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Data => frame_type::DATA,
            Self::Headers => frame_type::HEADERS,
            Self::Priority => frame_type::PRIORITY,
            Self::RstStream => frame_type::RST_STREAM,
            Self::Settings => frame_type::SETTINGS,
            Self::PushPromise => frame_type::PUSH_PROMISE,
            Self::Ping => frame_type::PING,
            Self::GoAway => frame_type::GOAWAY,
            Self::WindowUpdate => frame_type::WINDOW_UPDATE,
            Self::Continuation => frame_type::CONTINUATION,
            Self::Unknown(other) => other,
        }
    }

    /// Connection-level frames must use stream 0, all other known
    /// types must use a non-zero stream id. WINDOW_UPDATE may use either.
    pub(crate) fn requires_stream_id(self) -> Option<bool> {
        match self {
            Self::Settings | Self::Ping | Self::GoAway => Some(false),
            Self::Data
            | Self::Headers
            | Self::Priority
            | Self::RstStream
            | Self::PushPromise
            | Self::Continuation => Some(true),
            Self::WindowUpdate | Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Data => "DATA",
            Self::Headers => "HEADERS",
            Self::Priority => "PRIORITY",
            Self::RstStream => "RST_STREAM",
            Self::Settings => "SETTINGS",
            Self::PushPromise => "PUSH_PROMISE",
            Self::Ping => "PING",
            Self::GoAway => "GOAWAY",
            Self::WindowUpdate => "WINDOW_UPDATE",
            Self::Continuation => "CONTINUATION",
            Self::Unknown(byte) => return write!(f, "UNKNOWN(0x{byte:02x})"),
        };
        f.write_str(name)
    }
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2FrameHeader {
    pub length: u32,      // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,   // 31 bits (high bit reserved)
}

impl H2FrameHeader {
    pub fn new(length: u32, kind: FrameKind, flags: u8, stream_id: u32) -> Self {
        Self {
            length,
            frame_type: kind.as_u8(),
            flags,
            stream_id,
        }
    }

    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        let bytes: &[u8; FRAME_HEADER_LEN] = data.get(..FRAME_HEADER_LEN)?.try_into().ok()?;
        Some(Self::from_bytes(bytes))
    }

    pub fn from_bytes(data: &[u8; FRAME_HEADER_LEN]) -> Self {
        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let frame_type = data[3];
        let flags = data[4];
        let stream_id = read_u31(&data[5..9]);

        Self {
            length,
            frame_type,
            flags,
            stream_id,
        }
    }

    /// Write the 9-byte header. The reserved bit is always sent as zero.
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        debug_assert!(self.length <= MAX_FRAME_LENGTH);
        dst.put_uint(u64::from(self.length), 3);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & MAX_WINDOW_SIZE);
    }

    pub fn kind(&self) -> FrameKind {
        FrameKind::from_u8(self.frame_type)
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Check if END_STREAM flag is set
    pub fn is_end_stream(&self) -> bool {
        self.has_flag(flags::END_STREAM)
    }

    /// Check if END_HEADERS flag is set
    pub fn is_end_headers(&self) -> bool {
        self.has_flag(flags::END_HEADERS)
    }

    pub fn is_ack(&self) -> bool {
        self.has_flag(flags::ACK)
    }
}

/// Read a big-endian 32-bit field, clearing the reserved top bit.
pub(crate) fn read_u31(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & MAX_WINDOW_SIZE
}

/// HTTP/2 error code (RFC 7540 Section 7).
///
/// Unknown codes are carried through unchanged; they must not trigger any
/// special behavior.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const NO_ERROR: ErrorCode = ErrorCode(0x0);
    pub const PROTOCOL_ERROR: ErrorCode = ErrorCode(0x1);
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(0x2);
    pub const FLOW_CONTROL_ERROR: ErrorCode = ErrorCode(0x3);
    pub const SETTINGS_TIMEOUT: ErrorCode = ErrorCode(0x4);
    pub const STREAM_CLOSED: ErrorCode = ErrorCode(0x5);
    pub const FRAME_SIZE_ERROR: ErrorCode = ErrorCode(0x6);
    pub const REFUSED_STREAM: ErrorCode = ErrorCode(0x7);
    pub const CANCEL: ErrorCode = ErrorCode(0x8);
    pub const COMPRESSION_ERROR: ErrorCode = ErrorCode(0x9);
    pub const CONNECT_ERROR: ErrorCode = ErrorCode(0xa);
    pub const ENHANCE_YOUR_CALM: ErrorCode = ErrorCode(0xb);
    pub const INADEQUATE_SECURITY: ErrorCode = ErrorCode(0xc);
    pub const HTTP_1_1_REQUIRED: ErrorCode = ErrorCode(0xd);

    pub fn description(&self) -> &'static str {
        match self.0 {
            0x0 => "not a result of an error",
            0x1 => "unspecific protocol error detected",
            0x2 => "unexpected internal error encountered",
            0x3 => "flow-control protocol violated",
            0x4 => "settings ACK not received in timely manner",
            0x5 => "received frame when stream half-closed",
            0x6 => "frame with invalid size",
            0x7 => "refused stream before processing any application logic",
            0x8 => "stream no longer needed",
            0x9 => "unable to maintain the header compression context",
            0xa => "connection established in response to a CONNECT request was reset or abnormally closed",
            0xb => "detected excessive load generating behavior",
            0xc => "security properties do not meet minimum requirements",
            0xd => "endpoint requires HTTP/1.1",
            _ => "unknown reason",
        }
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        ErrorCode(code)
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            0x0 => "NO_ERROR",
            0x1 => "PROTOCOL_ERROR",
            0x2 => "INTERNAL_ERROR",
            0x3 => "FLOW_CONTROL_ERROR",
            0x4 => "SETTINGS_TIMEOUT",
            0x5 => "STREAM_CLOSED",
            0x6 => "FRAME_SIZE_ERROR",
            0x7 => "REFUSED_STREAM",
            0x8 => "CANCEL",
            0x9 => "COMPRESSION_ERROR",
            0xa => "CONNECT_ERROR",
            0xb => "ENHANCE_YOUR_CALM",
            0xc => "INADEQUATE_SECURITY",
            0xd => "HTTP_1_1_REQUIRED",
            other => return write!(f, "ErrorCode(0x{other:x})"),
        };
        f.write_str(name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self, self.description())
    }
}

/// One SETTINGS entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub id: u16,
    pub value: u32,
}

impl Setting {
    pub const WIRE_LEN: usize = 6;

    pub fn new(id: u16, value: u32) -> Self {
        Self { id, value }
    }
}

/// Stream dependency and weight, carried by PRIORITY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

impl Priority {
    pub const WIRE_LEN: usize = 5;

    pub(crate) fn parse(bytes: &[u8]) -> Self {
        Self {
            exclusive: bytes[0] & 0x80 != 0,
            dependency: read_u31(&bytes[..4]),
            weight: bytes[4],
        }
    }

    pub(crate) fn encode<B: BufMut>(&self, dst: &mut B) {
        let mut dependency = self.dependency & MAX_WINDOW_SIZE;
        if self.exclusive {
            dependency |= 0x8000_0000;
        }
        dst.put_u32(dependency);
        dst.put_u8(self.weight);
    }
}

/// A logical HTTP/2 frame.
///
/// Header-bearing variants hold the decoded header list; how the block is
/// split into HEADERS/PUSH_PROMISE + CONTINUATION on the wire is decided by
/// the encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
    },
    Headers {
        stream_id: u32,
        headers: Vec<H2Header>,
        end_stream: bool,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        settings: Vec<Setting>,
    },
    SettingsAck,
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        headers: Vec<H2Header>,
    },
    Ping {
        ack: bool,
        opaque_data: [u8; PING_DATA_SIZE],
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Data { .. } => FrameKind::Data,
            Frame::Headers { .. } => FrameKind::Headers,
            Frame::Priority { .. } => FrameKind::Priority,
            Frame::RstStream { .. } => FrameKind::RstStream,
            Frame::Settings { .. } | Frame::SettingsAck => FrameKind::Settings,
            Frame::PushPromise { .. } => FrameKind::PushPromise,
            Frame::Ping { .. } => FrameKind::Ping,
            Frame::GoAway { .. } => FrameKind::GoAway,
            Frame::WindowUpdate { .. } => FrameKind::WindowUpdate,
        }
    }

    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::SettingsAck | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    /// Whether this frame closes the sending side of its stream.
    pub fn is_end_stream(&self) -> bool {
        match self {
            Frame::Data { end_stream, .. } | Frame::Headers { end_stream, .. } => *end_stream,
            _ => false,
        }
    }
}
