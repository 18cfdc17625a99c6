//! Per-stream state machine (RFC 7540 Section 5.1).
//!
//! ```text
//!                          +--------+
//!                  send PP |        | recv PP
//!                 ,--------|  idle  |--------.
//!                /         |        |         \
//!               v          +--------+          v
//!        +----------+          |           +----------+
//!        |          |          | send H /  |          |
//! ,------| reserved |          | recv H    | reserved |------.
//! |      | (local)  |          |           | (remote) |      |
//! |      +----------+          v           +----------+      |
//! |          |             +--------+             |          |
//! |          |     recv ES |        | send ES     |          |
//! |   send H |     ,-------|  open  |-------.     | recv H   |
//! |          |    /        |        |        \    |          |
//! |          v   v         +--------+         v   v          |
//! |      +----------+          |           +----------+      |
//! |      |   half   |          |           |   half   |      |
//! |      |  closed  |          | send R /  |  closed  |      |
//! |      | (remote) |          | recv R    | (local)  |      |
//! |      +----------+          |           +----------+      |
//! |           |                |                 |           |
//! |           | send ES /      |       recv ES / |           |
//! |           | send R /       v        send R / |           |
//! |           | recv R     +--------+   recv R   |           |
//! | send R /  `----------->|        |<-----------'  send R / |
//! | recv R                 | closed |               recv R   |
//! `----------------------->|        |<----------------------'
//!                          +--------+
//! ```
//!
//! A stream is only ever touched from the connection's serialized context;
//! the owning [`crate::Streams`] looks streams up by id.

use std::fmt;

use tracing::debug;

use crate::encoder::{BodySource, FrameEncoder, OutputBuffer};
use crate::error::{EncodeError, StreamError};
use crate::flow_control::{FlowWindow, WindowOverflow};
use crate::frame::{ErrorCode, Frame};
use crate::hpack::{H2Header, HeaderBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::ReservedLocal => "reserved (local)",
            StreamState::ReservedRemote => "reserved (remote)",
            StreamState::Open => "open",
            StreamState::HalfClosedLocal => "half-closed (local)",
            StreamState::HalfClosedRemote => "half-closed (remote)",
            StreamState::Closed => "closed",
        }
    }

    /// The peer may still send DATA on this stream.
    pub fn can_recv_data(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// We may still send DATA on this stream.
    pub fn can_send_data(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request or response waiting to be sent.
pub struct OutgoingMessage {
    pub headers: Vec<H2Header>,
    pub body: Option<Box<dyn BodySource + Send>>,
}

impl OutgoingMessage {
    /// A header-only message; its HEADERS frame carries END_STREAM.
    pub fn new(headers: Vec<H2Header>) -> Self {
        Self { headers, body: None }
    }

    pub fn with_body<B: BodySource + Send + 'static>(mut self, body: B) -> Self {
        self.body = Some(Box::new(body));
        self
    }
}

impl fmt::Debug for OutgoingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingMessage")
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// One HTTP/2 stream.
pub struct H2Stream {
    id: u32,
    state: StreamState,
    /// Credit for outbound DATA.
    send_window: FlowWindow,
    /// Credit we granted the peer.
    recv_window: FlowWindow,
    recv_initial: u32,
    pending_headers: Option<Vec<H2Header>>,
    body: Option<Box<dyn BodySource + Send>>,
    received_main_headers: bool,
    incoming_headers: Vec<H2Header>,
    /// Set once RST_STREAM has been sent or received.
    reset: Option<ErrorCode>,
}

impl fmt::Debug for H2Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H2Stream")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("send_window", &self.send_window.size())
            .field("recv_window", &self.recv_window.size())
            .field("received_main_headers", &self.received_main_headers)
            .field("reset", &self.reset)
            .finish()
    }
}

impl H2Stream {
    pub fn new(id: u32, send_initial: u32, recv_initial: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window: FlowWindow::new(send_initial),
            recv_window: FlowWindow::new(recv_initial),
            recv_initial,
            pending_headers: None,
            body: None,
            received_main_headers: false,
            incoming_headers: Vec::new(),
            reset: None,
        }
    }

    /// A locally initiated stream that will send `message` once activated.
    pub fn new_request(id: u32, message: OutgoingMessage, send_initial: u32, recv_initial: u32) -> Self {
        let mut stream = Self::new(id, send_initial, recv_initial);
        stream.pending_headers = Some(message.headers);
        stream.body = message.body;
        stream
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    pub fn send_window(&self) -> &FlowWindow {
        &self.send_window
    }

    pub fn recv_window(&self) -> &FlowWindow {
        &self.recv_window
    }

    pub fn received_main_headers(&self) -> bool {
        self.received_main_headers
    }

    /// Error code of the RST_STREAM sent or received, if any.
    pub fn reset_code(&self) -> Option<ErrorCode> {
        self.reset
    }

    /// Whether HEADERS are waiting for [`H2Stream::activate`].
    pub fn is_pending_activation(&self) -> bool {
        self.pending_headers.is_some() && !self.is_closed()
    }

    pub fn has_outgoing_data(&self) -> bool {
        self.body.is_some() && self.state.can_send_data()
    }

    /// Whether [`H2Stream::encode_data`] could write anything given the
    /// connection window. A finished body still owes its END_STREAM frame.
    pub fn can_send_data_now(&self, connection_window: &FlowWindow) -> bool {
        if !self.state.can_send_data() {
            return false;
        }
        match &self.body {
            Some(body) if body.is_end_of_stream() => true,
            Some(_) => self.send_window.available().min(connection_window.available()) > 0,
            None => false,
        }
    }

    fn transition(&mut self, to: StreamState) {
        if self.state != to {
            debug!(stream_id = self.id, from = self.state.as_str(), to = to.as_str(), "stream state transition");
            self.state = to;
        }
    }

    /// Close the stream after a protocol violation and describe it.
    fn fail(&mut self, code: ErrorCode, reason: impl Into<String>) -> StreamError {
        self.transition(StreamState::Closed);
        self.pending_headers = None;
        self.body = None;
        StreamError::new(self.id, code, reason)
    }

    /// Promise this stream to the peer (server push) with `response` to follow.
    pub fn reserve_local(&mut self, response: OutgoingMessage) -> Result<(), StreamError> {
        if self.state != StreamState::Idle {
            return Err(self.fail(ErrorCode::PROTOCOL_ERROR, "only an idle stream can be reserved"));
        }
        self.pending_headers = Some(response.headers);
        self.body = response.body;
        self.transition(StreamState::ReservedLocal);
        Ok(())
    }

    /// The peer promised this stream in a PUSH_PROMISE.
    pub fn reserve_remote(&mut self) -> Result<(), StreamError> {
        if self.state != StreamState::Idle {
            return Err(self.fail(ErrorCode::PROTOCOL_ERROR, "promised stream is not idle"));
        }
        self.transition(StreamState::ReservedRemote);
        Ok(())
    }

    /// Queue a response on a stream the peer opened.
    pub fn set_response(&mut self, message: OutgoingMessage) -> Result<(), StreamError> {
        if !self.state.can_send_data() || self.pending_headers.is_some() {
            return Err(StreamError::new(
                self.id,
                ErrorCode::INTERNAL_ERROR,
                format!("cannot respond on stream in state {}", self.state),
            ));
        }
        self.pending_headers = Some(message.headers);
        self.body = message.body;
        Ok(())
    }

    /// Produce the stream's HEADERS frame. Called once, when the connection
    /// is ready to send it. The second value reports whether body data follows.
    pub fn activate(&mut self) -> Result<(Frame, bool), StreamError> {
        let Some(headers) = self.pending_headers.take() else {
            return Err(StreamError::new(self.id, ErrorCode::INTERNAL_ERROR, "stream has nothing to send"));
        };
        let end_stream = self.body.is_none();
        let next = match (self.state, end_stream) {
            (StreamState::Idle, false) => StreamState::Open,
            (StreamState::Idle, true) => StreamState::HalfClosedLocal,
            (StreamState::ReservedLocal, false) => StreamState::HalfClosedRemote,
            (StreamState::ReservedLocal, true) => StreamState::Closed,
            (StreamState::Open, false) => StreamState::Open,
            (StreamState::Open, true) => StreamState::HalfClosedLocal,
            (StreamState::HalfClosedRemote, false) => StreamState::HalfClosedRemote,
            (StreamState::HalfClosedRemote, true) => StreamState::Closed,
            (state, _) => {
                return Err(StreamError::new(
                    self.id,
                    ErrorCode::STREAM_CLOSED,
                    format!("cannot send HEADERS in state {}", state),
                ));
            }
        };
        self.transition(next);
        let frame = Frame::Headers {
            stream_id: self.id,
            headers,
            end_stream,
        };
        Ok((frame, !end_stream))
    }

    /// Write as much of the body as `out` and both windows allow.
    ///
    /// Returns true once the body is finished and END_STREAM has been sent.
    pub fn encode_data(
        &mut self,
        encoder: &mut FrameEncoder,
        connection_window: &mut FlowWindow,
        out: &mut OutputBuffer,
    ) -> Result<bool, EncodeError> {
        if !self.state.can_send_data() {
            return Err(EncodeError::IllegalState {
                stream_id: self.id,
                state: self.state.as_str(),
            });
        }
        let Some(body) = self.body.as_mut() else {
            return Ok(true);
        };

        let window = self.send_window.available().min(connection_window.available());
        let progress = encoder.encode_data(self.id, body.as_mut(), true, window, out)?;
        self.send_window.spend(progress.bytes_written);
        connection_window.spend(progress.bytes_written);

        if progress.body_complete {
            self.body = None;
            self.on_send_end_stream();
        }
        Ok(progress.body_complete)
    }

    /// END_STREAM went out on a frame for this stream.
    pub fn on_send_end_stream(&mut self) {
        match self.state {
            StreamState::Open => self.transition(StreamState::HalfClosedLocal),
            StreamState::HalfClosedRemote => self.transition(StreamState::Closed),
            _ => {}
        }
    }

    pub fn on_decoder_headers_begin(&mut self) -> Result<(), StreamError> {
        match self.state {
            StreamState::Idle => self.transition(StreamState::Open),
            StreamState::ReservedRemote => self.transition(StreamState::HalfClosedLocal),
            StreamState::Open | StreamState::HalfClosedLocal => {}
            state => {
                return Err(self.fail(ErrorCode::STREAM_CLOSED, format!("HEADERS received in state {}", state)));
            }
        }
        self.incoming_headers.clear();
        Ok(())
    }

    pub fn on_decoder_headers_item(&mut self, header: &H2Header) {
        self.incoming_headers.push(header.clone());
    }

    /// Finish a received header block. Blocks after the main one are
    /// trailers and must not carry pseudo-headers.
    pub fn on_decoder_headers_end(
        &mut self,
        malformed: bool,
        block: HeaderBlock,
    ) -> Result<(HeaderBlock, Vec<H2Header>), StreamError> {
        if malformed {
            return Err(self.fail(ErrorCode::PROTOCOL_ERROR, "malformed header block"));
        }
        let block = match (self.received_main_headers, block) {
            (false, HeaderBlock::Main) => {
                self.received_main_headers = true;
                HeaderBlock::Main
            }
            (false, HeaderBlock::Informational) => HeaderBlock::Informational,
            (false, HeaderBlock::Trailing) => {
                return Err(self.fail(ErrorCode::PROTOCOL_ERROR, "header block without pseudo-headers"));
            }
            (true, HeaderBlock::Trailing) => HeaderBlock::Trailing,
            (true, _) => {
                return Err(self.fail(ErrorCode::PROTOCOL_ERROR, "pseudo-headers in trailers"));
            }
        };
        Ok((block, std::mem::take(&mut self.incoming_headers)))
    }

    /// Charge a DATA frame (padding included) against the receive window.
    pub fn on_decoder_data(&mut self, frame_len: u32) -> Result<(), StreamError> {
        if !self.state.can_recv_data() {
            let state = self.state;
            return Err(self.fail(ErrorCode::STREAM_CLOSED, format!("DATA received in state {}", state)));
        }
        if !self.received_main_headers {
            return Err(self.fail(ErrorCode::PROTOCOL_ERROR, "DATA before HEADERS"));
        }
        if self.recv_window.consume(frame_len).is_err() {
            return Err(self.fail(ErrorCode::FLOW_CONTROL_ERROR, "DATA exceeds stream window"));
        }
        Ok(())
    }

    pub fn on_decoder_end_stream(&mut self) -> Result<(), StreamError> {
        match self.state {
            StreamState::Open => self.transition(StreamState::HalfClosedRemote),
            StreamState::HalfClosedLocal => self.transition(StreamState::Closed),
            state => {
                return Err(self.fail(ErrorCode::STREAM_CLOSED, format!("END_STREAM received in state {}", state)));
            }
        }
        Ok(())
    }

    pub fn on_decoder_rst_stream(&mut self, error_code: ErrorCode) {
        self.reset = Some(error_code);
        self.pending_headers = None;
        self.body = None;
        self.transition(StreamState::Closed);
    }

    /// Close the stream locally. Returns the RST_STREAM to send, unless one
    /// was already sent or received, or the peer never saw the stream.
    pub fn reset(&mut self, error_code: ErrorCode) -> Option<Frame> {
        if self.reset.is_some() {
            return None;
        }
        let was_idle = self.state == StreamState::Idle;
        self.reset = Some(error_code);
        self.pending_headers = None;
        self.body = None;
        self.transition(StreamState::Closed);
        if was_idle {
            return None;
        }
        Some(Frame::RstStream {
            stream_id: self.id,
            error_code,
        })
    }

    pub fn on_window_update(&mut self, increment: u32) -> Result<(), StreamError> {
        if self.send_window.increase(increment).is_err() {
            return Err(self.fail(ErrorCode::FLOW_CONTROL_ERROR, "stream window exceeds 2^31-1"));
        }
        Ok(())
    }

    /// Apply a SETTINGS_INITIAL_WINDOW_SIZE change to the send window.
    pub fn apply_initial_window_delta(&mut self, delta: i64) -> Result<(), WindowOverflow> {
        self.send_window.adjust(delta)
    }

    /// Credit to hand back to the peer once half the receive window is used.
    pub fn take_window_update(&mut self) -> Option<u32> {
        if !self.state.can_recv_data() {
            return None;
        }
        let consumed = i64::from(self.recv_initial) - self.recv_window.size();
        if consumed <= 0 || consumed < i64::from(self.recv_initial / 2) {
            return None;
        }
        let increment = consumed as u32;
        self.recv_window.increase(increment).ok()?;
        Some(increment)
    }
}
