//! h2-framing: a sans-I/O HTTP/2 framing and stream-multiplexing core
//!
//! This crate turns a raw, arbitrarily fragmented HTTP/2 byte stream into
//! typed protocol events, turns frames back into bytes across bounded output
//! buffers, and tracks each stream's lifecycle and flow-control state.
//!
//! # Features
//!
//! - **Sans-I/O Design**: No async runtime; the caller moves the bytes
//! - **Resumable Decoder**: Accepts chunks of any size, even one byte at a time,
//!   and reports frames through the [`DecoderHandler`] callback trait
//! - **Bounded Encoder**: Writes whole frames into fixed-size [`OutputBuffer`]s,
//!   splitting header blocks into CONTINUATION frames as needed
//! - **HPACK Support**: Header compression via fluke-hpack
//! - **Stream State Machine**: RFC 7540 Section 5.1 states, flow-control windows
//!   and connection-level dispatch in [`Streams`]
//!
//! # Quick Start
//!
//! ```rust
//! use h2_framing::{DecodeError, DecoderConfig, DecoderHandler, FrameDecoder};
//!
//! struct Printer;
//!
//! impl DecoderHandler for Printer {
//!     fn on_data_item(&mut self, stream_id: u32, data: &[u8]) -> Result<(), DecodeError> {
//!         println!("Data on stream {}: {} bytes", stream_id, data.len());
//!         Ok(())
//!     }
//! }
//!
//! let mut decoder = FrameDecoder::new(DecoderConfig::default().with_skip_connection_preface(true));
//!
//! let frame_bytes = [0, 0, 5, 0, 1, 0, 0, 0, 1, b'h', b'e', b'l', b'l', b'o'];
//! decoder.feed(&frame_bytes, &mut Printer).unwrap();
//! ```
//!
//! # Architecture
//!
//! - [`FrameDecoder`]: bytes → callbacks
//! - [`FrameEncoder`]: frames → bytes
//! - [`H2Stream`]: one stream's state machine
//! - [`Streams`]: routes decoder callbacks to streams and drives the encoder
//!
//! It does NOT provide:
//! - TCP transport or TLS (you provide the bytes)
//! - A request/response API (build one on [`Streams`] events)

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod flow_control;
pub mod frame;
pub mod hpack;
pub mod settings;
pub mod stream;
pub mod streams;

pub use decoder::{DecoderConfig, DecoderHandler, FrameDecoder, Role, MAX_HEADER_BLOCK_SIZE};
pub use encoder::{BodySource, DataProgress, FrameEncoder, OutputBuffer, ReaderBody};
pub use error::{DecodeError, EncodeError, StreamError};
pub use flow_control::{FlowWindow, WindowOverflow};
pub use frame::{
    flags, frame_type, is_h2c_preface, settings_id, ErrorCode, Frame, FrameKind, H2FrameHeader, Priority, Setting,
    CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN, MAX_FRAME_LENGTH,
    MAX_WINDOW_SIZE,
};
pub use hpack::{classify_block, H2Header, HeaderBlock, HeaderName, HpackDecoder, HpackEncoder, HpackError};
pub use settings::Settings;
pub use stream::{H2Stream, OutgoingMessage, StreamState};
pub use streams::{ActivationHandle, StreamEvent, Streams};
