//! Incremental HTTP/2 frame decoder.
//!
//! The decoder is a resumable state machine: bytes may arrive in chunks of
//! any size, including chunks that split a frame header, a fixed-size field
//! or a payload. Frame payloads are never buffered as a whole. DATA and
//! GOAWAY debug data are handed to the [`DecoderHandler`] as they arrive; the
//! only thing accumulated is a header block, because the HPACK dynamic table
//! must see each block complete and in wire order.
//!
//! Anything that happens N times is reported as `_begin`, N `_item` calls
//! and `_end`, so the handler knows exactly when to switch state.

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::error::DecodeError;
use crate::frame::{
    flags, read_u31, ErrorCode, FrameKind, H2FrameHeader, Priority, Setting, CONNECTION_PREFACE,
    DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN, PING_DATA_SIZE,
};
use crate::hpack::{classify_block, H2Header, HeaderBlock, HeaderName, HpackDecoder};
use crate::settings::validate;

/// Maximum accumulated header block size (256 KB).
/// Prevents unbounded memory growth from malicious/buggy CONTINUATION floods.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Which end of the connection this decoder is reading for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Decoder configuration.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub role: Role,
    /// Do not expect the connection preface and accept any first frame.
    /// Only useful when testing the decoder in isolation.
    pub skip_connection_preface: bool,
    /// SETTINGS_MAX_FRAME_SIZE this endpoint advertised.
    pub max_frame_size: u32,
    /// SETTINGS_ENABLE_PUSH this endpoint advertised.
    pub enable_push: bool,
    pub max_header_block_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            skip_connection_preface: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            enable_push: true,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
        }
    }
}

impl DecoderConfig {
    pub fn client() -> Self {
        Self {
            role: Role::Client,
            enable_push: false,
            ..Default::default()
        }
    }

    pub fn server() -> Self {
        Self::default()
    }

    pub fn with_skip_connection_preface(mut self, skip: bool) -> Self {
        self.skip_connection_preface = skip;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_enable_push(mut self, enable_push: bool) -> Self {
        self.enable_push = enable_push;
        self
    }

    pub fn with_max_header_block_size(mut self, max: usize) -> Self {
        self.max_header_block_size = max;
        self
    }
}

/// Receives decoded protocol events.
///
/// Every callback is fallible: returning a stream-level [`DecodeError`]
/// makes the decoder drop the rest of that stream's current frame (a header
/// block is still decompressed to keep HPACK state intact, but no further
/// callbacks fire for it); returning a connection-level error stops decoding.
///
/// For a header block, `_begin`, zero or more `_item` and `_end` are called
/// with no other callback in between. `on_end_stream` always fires after the
/// frame (or header block) carrying END_STREAM has been fully dispatched.
#[allow(unused_variables)]
pub trait DecoderHandler {
    fn on_headers_begin(&mut self, stream_id: u32) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_headers_item(
        &mut self,
        stream_id: u32,
        header: &H2Header,
        name: HeaderName,
        block: HeaderBlock,
    ) -> Result<(), DecodeError> {
        Ok(())
    }

    /// `malformed` reports a structural problem local to this block; when
    /// set, no `_item` calls were made for it.
    fn on_headers_end(&mut self, stream_id: u32, malformed: bool, block: HeaderBlock) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_push_promise_begin(&mut self, stream_id: u32, promised_stream_id: u32) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_push_promise_item(&mut self, stream_id: u32, header: &H2Header, name: HeaderName) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_push_promise_end(&mut self, stream_id: u32, malformed: bool) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_priority(&mut self, stream_id: u32, priority: Priority) -> Result<(), DecodeError> {
        Ok(())
    }

    /// Start of a DATA frame. `frame_len` includes padding and is what flow
    /// control charges.
    fn on_data_begin(&mut self, stream_id: u32, frame_len: u32, end_stream: bool) -> Result<(), DecodeError> {
        Ok(())
    }

    /// May fire several times per DATA frame.
    fn on_data_item(&mut self, stream_id: u32, data: &[u8]) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_end_stream(&mut self, stream_id: u32) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_rst_stream(&mut self, stream_id: u32, error_code: ErrorCode) -> Result<(), DecodeError> {
        Ok(())
    }

    /// Known settings only, in wire order.
    fn on_settings(&mut self, settings: &[Setting]) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_settings_ack(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_ping(&mut self, opaque_data: [u8; PING_DATA_SIZE]) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_ping_ack(&mut self, opaque_data: [u8; PING_DATA_SIZE]) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_goaway_begin(&mut self, last_stream_id: u32, error_code: ErrorCode, debug_data_len: u32) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_goaway_item(&mut self, debug_data: &[u8]) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_goaway_end(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn on_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// Parse position. Fixed-size fields are gathered into `scratch` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preface,
    FrameHeader,
    PadLength,
    Priority,
    PromisedStreamId,
    HeaderBlockFragment,
    DataPayload,
    Padding,
    RstStream,
    SettingsEntry,
    Ping,
    GoAwayFields,
    GoAwayDebugData,
    WindowUpdate,
    Skip,
    Failed,
}

impl State {
    fn in_payload(self) -> bool {
        !matches!(self, State::Preface | State::FrameHeader | State::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Headers,
    PushPromise { promised_stream_id: u32 },
}

/// A header block spanning HEADERS/PUSH_PROMISE and CONTINUATION frames.
#[derive(Debug)]
struct PendingHeaderBlock {
    stream_id: u32,
    kind: BlockKind,
    end_stream: bool,
    malformed: bool,
    /// The handler rejected this block; decompress it but stay silent.
    suppressed: bool,
    fragments: BytesMut,
}

/// HTTP/2 frame decoder for one direction of one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    config: DecoderConfig,
    state: State,
    scratch: [u8; FRAME_HEADER_LEN],
    scratch_len: usize,
    preface_matched: usize,
    /// First frame after the preface must be a non-ACK SETTINGS.
    expect_settings: bool,
    /// Header of the frame currently being consumed.
    frame: H2FrameHeader,
    payload_remaining: u32,
    padding: u8,
    settings: Vec<Setting>,
    header_block: Option<PendingHeaderBlock>,
    hpack: HpackDecoder,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl FrameDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        let state = if config.role == Role::Server && !config.skip_connection_preface {
            State::Preface
        } else {
            State::FrameHeader
        };
        Self {
            expect_settings: !config.skip_connection_preface,
            config,
            state,
            scratch: [0; FRAME_HEADER_LEN],
            scratch_len: 0,
            preface_matched: 0,
            frame: H2FrameHeader::new(0, FrameKind::Data, 0, 0),
            payload_remaining: 0,
            padding: 0,
            settings: Vec::new(),
            header_block: None,
            hpack: HpackDecoder::new(),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Apply the SETTINGS_MAX_FRAME_SIZE this endpoint advertised.
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.config.max_frame_size = max_frame_size;
    }

    /// Apply the SETTINGS_ENABLE_PUSH this endpoint advertised.
    pub fn set_enable_push(&mut self, enable_push: bool) {
        self.config.enable_push = enable_push;
    }

    pub fn preface_received(&self) -> bool {
        self.state != State::Preface
    }

    /// True while a header block waits for CONTINUATION frames.
    pub fn is_header_block_in_progress(&self) -> bool {
        self.header_block.is_some()
    }

    /// True once a connection-level error has been reported.
    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    /// Start over for a new connection: fresh HPACK table and parse state,
    /// any failure cleared.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Decode everything in `data`, stopping at the first error.
    pub fn feed<H: DecoderHandler + ?Sized>(&mut self, data: &[u8], handler: &mut H) -> Result<(), DecodeError> {
        let mut cursor = data;
        self.decode(&mut cursor, handler)
    }

    /// Consume bytes from `src`, dispatching events to `handler`.
    ///
    /// Returns once `src` is exhausted. On a stream-level error `src` is left
    /// just past the bytes consumed so far and decoding may continue with the
    /// same buffer. After a connection-level error the decoder refuses all
    /// further input.
    pub fn decode<B, H>(&mut self, src: &mut B, handler: &mut H) -> Result<(), DecodeError>
    where
        B: Buf,
        H: DecoderHandler + ?Sized,
    {
        if self.state == State::Failed {
            return Err(DecodeError::connection(
                ErrorCode::INTERNAL_ERROR,
                "decoder already failed with a connection error",
            ));
        }
        self.decode_inner(src, handler).map_err(|err| self.recover(err))
    }

    fn recover(&mut self, err: DecodeError) -> DecodeError {
        if err.is_connection_error() {
            warn!(error = %err, "connection error while decoding");
            self.state = State::Failed;
            return err;
        }

        warn!(error = %err, "stream error while decoding");
        match self.header_block.as_mut() {
            Some(block) if Some(block.stream_id) == err.stream_id() => block.suppressed = true,
            _ => {
                if self.state.in_payload() {
                    self.state = if self.payload_remaining > 0 {
                        State::Skip
                    } else {
                        State::FrameHeader
                    };
                }
            }
        }
        err
    }

    fn decode_inner<B, H>(&mut self, src: &mut B, handler: &mut H) -> Result<(), DecodeError>
    where
        B: Buf,
        H: DecoderHandler + ?Sized,
    {
        loop {
            match self.state {
                State::Preface => {
                    while self.preface_matched < CONNECTION_PREFACE.len() {
                        if !src.has_remaining() {
                            return Ok(());
                        }
                        if src.get_u8() != CONNECTION_PREFACE[self.preface_matched] {
                            return Err(DecodeError::connection(
                                ErrorCode::PROTOCOL_ERROR,
                                "invalid connection preface",
                            ));
                        }
                        self.preface_matched += 1;
                    }
                    trace!("connection preface received");
                    self.state = State::FrameHeader;
                }
                State::FrameHeader => {
                    if !self.fill_scratch(src, FRAME_HEADER_LEN) {
                        return Ok(());
                    }
                    let bytes = self.take_scratch(FRAME_HEADER_LEN, false);
                    self.begin_frame(H2FrameHeader::from_bytes(&bytes), handler)?;
                }
                State::PadLength => {
                    if !self.fill_scratch(src, 1) {
                        return Ok(());
                    }
                    let pad_length = self.take_scratch(1, true)[0];
                    if u32::from(pad_length) > self.payload_remaining {
                        return Err(DecodeError::connection(
                            ErrorCode::PROTOCOL_ERROR,
                            format!(
                                "Invalid padding length in {} frame ({} > {})",
                                self.frame.kind(),
                                pad_length,
                                self.payload_remaining
                            ),
                        ));
                    }
                    self.padding = pad_length;
                    match self.frame.kind() {
                        FrameKind::Data => self.begin_data(handler)?,
                        FrameKind::Headers => self.begin_headers_fields(handler)?,
                        _ => self.begin_push_promise_fields()?,
                    }
                }
                State::Priority => {
                    if !self.fill_scratch(src, Priority::WIRE_LEN) {
                        return Ok(());
                    }
                    let priority = Priority::parse(&self.take_scratch(Priority::WIRE_LEN, true));
                    let stream_id = self.frame.stream_id;
                    if self.frame.kind() == FrameKind::Headers {
                        let malformed = priority.dependency == stream_id;
                        self.begin_header_block(BlockKind::Headers, malformed, handler)?;
                    } else {
                        self.state = State::FrameHeader;
                        if priority.dependency == stream_id {
                            return Err(DecodeError::stream(
                                stream_id,
                                ErrorCode::PROTOCOL_ERROR,
                                "stream cannot depend on itself",
                            ));
                        }
                        handler.on_priority(stream_id, priority)?;
                    }
                }
                State::PromisedStreamId => {
                    if !self.fill_scratch(src, 4) {
                        return Ok(());
                    }
                    let promised_stream_id = read_u31(&self.take_scratch(4, true));
                    if promised_stream_id == 0 || promised_stream_id % 2 != 0 {
                        return Err(DecodeError::connection(
                            ErrorCode::PROTOCOL_ERROR,
                            format!("invalid promised stream id {}", promised_stream_id),
                        ));
                    }
                    self.begin_header_block(BlockKind::PushPromise { promised_stream_id }, false, handler)?;
                }
                State::HeaderBlockFragment => {
                    let content_left = self.content_remaining();
                    if content_left == 0 {
                        self.state = State::Padding;
                        continue;
                    }
                    if !src.has_remaining() {
                        return Ok(());
                    }
                    let max_block = self.config.max_header_block_size;
                    let Some(block) = self.header_block.as_mut() else {
                        return Err(DecodeError::connection(
                            ErrorCode::INTERNAL_ERROR,
                            "header block fragment without a header block",
                        ));
                    };
                    let chunk = src.chunk();
                    let n = chunk.len().min(content_left as usize);
                    let new_size = block.fragments.len() + n;
                    if new_size > max_block {
                        return Err(DecodeError::connection(
                            ErrorCode::ENHANCE_YOUR_CALM,
                            format!("Header block too large ({} bytes, max {})", new_size, max_block),
                        ));
                    }
                    block.fragments.extend_from_slice(&chunk[..n]);
                    src.advance(n);
                    self.payload_remaining -= n as u32;
                }
                State::DataPayload => {
                    let content_left = self.content_remaining();
                    if content_left == 0 {
                        self.state = State::Padding;
                        continue;
                    }
                    if !src.has_remaining() {
                        return Ok(());
                    }
                    let chunk = src.chunk();
                    let n = chunk.len().min(content_left as usize);
                    let result = handler.on_data_item(self.frame.stream_id, &chunk[..n]);
                    src.advance(n);
                    self.payload_remaining -= n as u32;
                    result?;
                }
                State::Padding => {
                    if self.payload_remaining > 0 {
                        if !src.has_remaining() {
                            return Ok(());
                        }
                        let n = src.remaining().min(self.payload_remaining as usize);
                        src.advance(n);
                        self.payload_remaining -= n as u32;
                        continue;
                    }
                    self.finish_frame(handler)?;
                }
                State::RstStream => {
                    if !self.fill_scratch(src, 4) {
                        return Ok(());
                    }
                    let field = self.take_scratch(4, true);
                    let error_code = ErrorCode(u32::from_be_bytes([field[0], field[1], field[2], field[3]]));
                    self.state = State::FrameHeader;
                    handler.on_rst_stream(self.frame.stream_id, error_code)?;
                }
                State::SettingsEntry => {
                    if self.payload_remaining == 0 {
                        self.finish_frame(handler)?;
                        continue;
                    }
                    if !self.fill_scratch(src, Setting::WIRE_LEN) {
                        return Ok(());
                    }
                    let field = self.take_scratch(Setting::WIRE_LEN, true);
                    let setting = Setting::new(
                        u16::from_be_bytes([field[0], field[1]]),
                        u32::from_be_bytes([field[2], field[3], field[4], field[5]]),
                    );
                    validate(&setting)?;
                    if crate::frame::settings_id::is_known(setting.id) {
                        self.settings.push(setting);
                    } else {
                        trace!(id = setting.id, "ignoring unknown setting");
                    }
                }
                State::Ping => {
                    if !self.fill_scratch(src, PING_DATA_SIZE) {
                        return Ok(());
                    }
                    let mut opaque_data = [0u8; PING_DATA_SIZE];
                    opaque_data.copy_from_slice(&self.take_scratch(PING_DATA_SIZE, true)[..PING_DATA_SIZE]);
                    self.state = State::FrameHeader;
                    if self.frame.is_ack() {
                        handler.on_ping_ack(opaque_data)?;
                    } else {
                        handler.on_ping(opaque_data)?;
                    }
                }
                State::GoAwayFields => {
                    if !self.fill_scratch(src, 8) {
                        return Ok(());
                    }
                    let field = self.take_scratch(8, true);
                    let last_stream_id = read_u31(&field[..4]);
                    let error_code = ErrorCode(u32::from_be_bytes([field[4], field[5], field[6], field[7]]));
                    self.state = State::GoAwayDebugData;
                    handler.on_goaway_begin(last_stream_id, error_code, self.payload_remaining)?;
                }
                State::GoAwayDebugData => {
                    if self.payload_remaining == 0 {
                        self.finish_frame(handler)?;
                        continue;
                    }
                    if !src.has_remaining() {
                        return Ok(());
                    }
                    let chunk = src.chunk();
                    let n = chunk.len().min(self.payload_remaining as usize);
                    let result = handler.on_goaway_item(&chunk[..n]);
                    src.advance(n);
                    self.payload_remaining -= n as u32;
                    result?;
                }
                State::WindowUpdate => {
                    if !self.fill_scratch(src, 4) {
                        return Ok(());
                    }
                    let increment = read_u31(&self.take_scratch(4, true));
                    let stream_id = self.frame.stream_id;
                    self.state = State::FrameHeader;
                    if increment == 0 {
                        let reason = "WINDOW_UPDATE increment must not be 0";
                        return Err(if stream_id == 0 {
                            DecodeError::connection(ErrorCode::PROTOCOL_ERROR, reason)
                        } else {
                            DecodeError::stream(stream_id, ErrorCode::PROTOCOL_ERROR, reason)
                        });
                    }
                    handler.on_window_update(stream_id, increment)?;
                }
                State::Skip => {
                    if self.payload_remaining == 0 {
                        self.state = State::FrameHeader;
                        continue;
                    }
                    if !src.has_remaining() {
                        return Ok(());
                    }
                    let n = src.remaining().min(self.payload_remaining as usize);
                    src.advance(n);
                    self.payload_remaining -= n as u32;
                }
                State::Failed => {
                    return Err(DecodeError::connection(
                        ErrorCode::INTERNAL_ERROR,
                        "decoder already failed with a connection error",
                    ));
                }
            }
        }
    }

    /// Copy bytes into `scratch` until it holds `needed`. Returns false if
    /// `src` ran dry first.
    fn fill_scratch<B: Buf>(&mut self, src: &mut B, needed: usize) -> bool {
        let take = (needed - self.scratch_len).min(src.remaining());
        src.copy_to_slice(&mut self.scratch[self.scratch_len..self.scratch_len + take]);
        self.scratch_len += take;
        self.scratch_len == needed
    }

    fn take_scratch(&mut self, len: usize, from_payload: bool) -> [u8; FRAME_HEADER_LEN] {
        debug_assert_eq!(self.scratch_len, len);
        self.scratch_len = 0;
        if from_payload {
            self.payload_remaining -= len as u32;
        }
        self.scratch
    }

    /// Payload bytes left before trailing padding.
    fn content_remaining(&self) -> u32 {
        self.payload_remaining.saturating_sub(u32::from(self.padding))
    }

    fn begin_frame<H: DecoderHandler + ?Sized>(&mut self, header: H2FrameHeader, handler: &mut H) -> Result<(), DecodeError> {
        let kind = header.kind();
        trace!(
            kind = %kind,
            stream_id = header.stream_id,
            length = header.length,
            flags = header.flags,
            "decoding frame"
        );
        self.frame = header;
        self.payload_remaining = header.length;
        self.padding = 0;

        if header.length > self.config.max_frame_size {
            return Err(DecodeError::connection(
                ErrorCode::FRAME_SIZE_ERROR,
                format!(
                    "{} frame of {} bytes exceeds max frame size {}",
                    kind, header.length, self.config.max_frame_size
                ),
            ));
        }

        match &self.header_block {
            Some(block) if kind != FrameKind::Continuation || header.stream_id != block.stream_id => {
                return Err(DecodeError::connection(
                    ErrorCode::PROTOCOL_ERROR,
                    format!(
                        "{} for stream {} but pending headers on stream {}",
                        kind, header.stream_id, block.stream_id
                    ),
                ));
            }
            None if kind == FrameKind::Continuation => {
                return Err(DecodeError::connection(
                    ErrorCode::PROTOCOL_ERROR,
                    format!("Unexpected CONTINUATION frame for stream {}", header.stream_id),
                ));
            }
            _ => {}
        }

        if self.expect_settings {
            if kind != FrameKind::Settings || header.is_ack() {
                return Err(DecodeError::connection(
                    ErrorCode::PROTOCOL_ERROR,
                    format!("first frame must be SETTINGS, got {}", kind),
                ));
            }
            self.expect_settings = false;
        }

        match kind.requires_stream_id() {
            Some(true) if header.stream_id == 0 => {
                return Err(DecodeError::connection(
                    ErrorCode::PROTOCOL_ERROR,
                    format!("{} frame on stream 0", kind),
                ));
            }
            Some(false) if header.stream_id != 0 => {
                return Err(DecodeError::connection(
                    ErrorCode::PROTOCOL_ERROR,
                    format!("{} frame on stream {}", kind, header.stream_id),
                ));
            }
            _ => {}
        }

        let padded = header.has_flag(flags::PADDED);
        match kind {
            FrameKind::Data => {
                if padded {
                    self.state = State::PadLength;
                    return self.require_padding_byte();
                }
                self.begin_data(handler)
            }
            FrameKind::Headers => {
                if padded {
                    self.state = State::PadLength;
                    return self.require_padding_byte();
                }
                self.begin_headers_fields(handler)
            }
            FrameKind::Priority => {
                if header.length as usize != Priority::WIRE_LEN {
                    self.state = State::Skip;
                    return Err(DecodeError::stream(
                        header.stream_id,
                        ErrorCode::FRAME_SIZE_ERROR,
                        format!("PRIORITY frame length {} (expected 5)", header.length),
                    ));
                }
                self.state = State::Priority;
                Ok(())
            }
            FrameKind::RstStream => {
                self.require_length(4)?;
                self.state = State::RstStream;
                Ok(())
            }
            FrameKind::Settings => {
                if header.is_ack() {
                    if header.length != 0 {
                        return Err(DecodeError::connection(
                            ErrorCode::FRAME_SIZE_ERROR,
                            "SETTINGS ACK with non-empty payload",
                        ));
                    }
                    self.state = State::FrameHeader;
                    return handler.on_settings_ack();
                }
                if header.length as usize % Setting::WIRE_LEN != 0 {
                    return Err(DecodeError::connection(
                        ErrorCode::FRAME_SIZE_ERROR,
                        format!("SETTINGS frame length {} is not a multiple of 6", header.length),
                    ));
                }
                self.settings.clear();
                self.state = State::SettingsEntry;
                Ok(())
            }
            FrameKind::PushPromise => {
                if self.config.role == Role::Server || !self.config.enable_push {
                    return Err(DecodeError::connection(
                        ErrorCode::PROTOCOL_ERROR,
                        "PUSH_PROMISE received but push is not allowed",
                    ));
                }
                if padded {
                    self.state = State::PadLength;
                    return self.require_padding_byte();
                }
                self.begin_push_promise_fields()
            }
            FrameKind::Ping => {
                self.require_length(PING_DATA_SIZE as u32)?;
                self.state = State::Ping;
                Ok(())
            }
            FrameKind::GoAway => {
                if header.length < 8 {
                    return Err(DecodeError::connection(
                        ErrorCode::FRAME_SIZE_ERROR,
                        format!("GOAWAY frame too short ({} bytes)", header.length),
                    ));
                }
                self.state = State::GoAwayFields;
                Ok(())
            }
            FrameKind::WindowUpdate => {
                self.require_length(4)?;
                self.state = State::WindowUpdate;
                Ok(())
            }
            FrameKind::Continuation => {
                self.state = State::HeaderBlockFragment;
                Ok(())
            }
            FrameKind::Unknown(_) => {
                trace!(kind = %kind, "skipping unknown frame type");
                self.state = State::Skip;
                Ok(())
            }
        }
    }

    fn require_length(&self, expected: u32) -> Result<(), DecodeError> {
        if self.frame.length != expected {
            return Err(DecodeError::connection(
                ErrorCode::FRAME_SIZE_ERROR,
                format!(
                    "{} frame length {} (expected {})",
                    self.frame.kind(),
                    self.frame.length,
                    expected
                ),
            ));
        }
        Ok(())
    }

    fn require_padding_byte(&self) -> Result<(), DecodeError> {
        if self.frame.length == 0 {
            return Err(DecodeError::connection(
                ErrorCode::FRAME_SIZE_ERROR,
                format!("PADDED {} frame with no payload", self.frame.kind()),
            ));
        }
        Ok(())
    }

    fn begin_data<H: DecoderHandler + ?Sized>(&mut self, handler: &mut H) -> Result<(), DecodeError> {
        self.state = State::DataPayload;
        handler.on_data_begin(self.frame.stream_id, self.frame.length, self.frame.is_end_stream())
    }

    fn begin_headers_fields<H: DecoderHandler + ?Sized>(&mut self, handler: &mut H) -> Result<(), DecodeError> {
        if self.frame.has_flag(flags::PRIORITY) {
            if self.content_remaining() < Priority::WIRE_LEN as u32 {
                return Err(DecodeError::connection(
                    ErrorCode::FRAME_SIZE_ERROR,
                    "PRIORITY HEADERS frame with insufficient data",
                ));
            }
            self.state = State::Priority;
            return Ok(());
        }
        self.begin_header_block(BlockKind::Headers, false, handler)
    }

    fn begin_push_promise_fields(&mut self) -> Result<(), DecodeError> {
        if self.content_remaining() < 4 {
            return Err(DecodeError::connection(
                ErrorCode::FRAME_SIZE_ERROR,
                "PUSH_PROMISE frame too short for promised stream id",
            ));
        }
        self.state = State::PromisedStreamId;
        Ok(())
    }

    fn begin_header_block<H: DecoderHandler + ?Sized>(
        &mut self,
        kind: BlockKind,
        malformed: bool,
        handler: &mut H,
    ) -> Result<(), DecodeError> {
        let stream_id = self.frame.stream_id;
        self.header_block = Some(PendingHeaderBlock {
            stream_id,
            kind,
            end_stream: self.frame.is_end_stream() && kind == BlockKind::Headers,
            malformed,
            suppressed: false,
            fragments: BytesMut::new(),
        });
        self.state = State::HeaderBlockFragment;
        match kind {
            BlockKind::Headers => handler.on_headers_begin(stream_id),
            BlockKind::PushPromise { promised_stream_id } => handler.on_push_promise_begin(stream_id, promised_stream_id),
        }
    }

    /// Runs once the whole payload (padding included) has been consumed.
    fn finish_frame<H: DecoderHandler + ?Sized>(&mut self, handler: &mut H) -> Result<(), DecodeError> {
        self.state = State::FrameHeader;
        let stream_id = self.frame.stream_id;
        match self.frame.kind() {
            FrameKind::Data => {
                if self.frame.is_end_stream() {
                    handler.on_end_stream(stream_id)?;
                }
            }
            FrameKind::Headers | FrameKind::PushPromise | FrameKind::Continuation => {
                if self.frame.is_end_headers() {
                    self.finish_header_block(handler)?;
                }
            }
            FrameKind::Settings => {
                let settings = std::mem::take(&mut self.settings);
                handler.on_settings(&settings)?;
            }
            FrameKind::GoAway => handler.on_goaway_end()?,
            _ => {}
        }
        Ok(())
    }

    fn finish_header_block<H: DecoderHandler + ?Sized>(&mut self, handler: &mut H) -> Result<(), DecodeError> {
        let Some(block) = self.header_block.take() else {
            return Ok(());
        };

        let headers = self.hpack.decode(&block.fragments).map_err(|err| {
            DecodeError::connection(ErrorCode::COMPRESSION_ERROR, err.to_string())
        })?;

        if block.suppressed {
            trace!(stream_id = block.stream_id, "discarding header block for rejected stream");
            return Ok(());
        }

        let (mut block_type, structurally_malformed) = classify_block(&headers);
        let mut malformed = block.malformed || structurally_malformed;
        let stream_id = block.stream_id;

        match block.kind {
            BlockKind::Headers => {
                if !malformed {
                    for header in &headers {
                        handler.on_headers_item(stream_id, header, HeaderName::from_lowercase(&header.name), block_type)?;
                    }
                }
                handler.on_headers_end(stream_id, malformed, block_type)?;
                if block.end_stream {
                    handler.on_end_stream(stream_id)?;
                }
            }
            BlockKind::PushPromise { .. } => {
                if block_type != HeaderBlock::Main {
                    malformed = true;
                    block_type = HeaderBlock::Main;
                }
                if !malformed {
                    for header in &headers {
                        handler.on_push_promise_item(stream_id, header, HeaderName::from_lowercase(&header.name))?;
                    }
                }
                trace!(stream_id, ?block_type, "push promise header block complete");
                handler.on_push_promise_end(stream_id, malformed)?;
            }
        }
        Ok(())
    }
}
