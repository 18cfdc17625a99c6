//! Connection-level stream dispatch.
//!
//! [`Streams`] sits between a [`FrameDecoder`] and a [`FrameEncoder`]: it is
//! the [`DecoderHandler`] that routes every decoded event to the stream
//! owning its id, answers SETTINGS and PING, keeps the connection-level flow
//! control windows, and decides the scope of every error. Stream errors are
//! swallowed here and turned into RST_STREAM; connection errors are returned
//! to the caller, which should send [`Streams::goaway_frame`] and close.
//!
//! Everything here runs on the connection's serialized context. The only
//! cross-thread entry point is [`ActivationHandle`], which just enqueues a
//! stream id for the next [`Streams::poll_write`] or [`Streams::recv`].

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::decoder::{DecoderConfig, DecoderHandler, FrameDecoder, Role};
use crate::encoder::{FrameEncoder, OutputBuffer};
use crate::error::{DecodeError, EncodeError, StreamError};
use crate::flow_control::FlowWindow;
use crate::frame::{
    ErrorCode, Frame, Priority, Setting, DEFAULT_INITIAL_WINDOW_SIZE, FRAME_HEADER_LEN, MAX_WINDOW_SIZE, PING_DATA_SIZE,
};
use crate::hpack::{H2Header, HeaderBlock, HeaderName};
use crate::settings::Settings;
use crate::stream::{H2Stream, OutgoingMessage, StreamState};

/// Something the application should know about.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Headers {
        stream_id: u32,
        block: HeaderBlock,
        headers: Vec<H2Header>,
    },
    Data {
        stream_id: u32,
        data: Bytes,
    },
    /// The peer finished its side of the stream.
    EndStream { stream_id: u32 },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        headers: Vec<H2Header>,
    },
    /// The stream was reset; `remote` tells who sent the RST_STREAM.
    Reset {
        stream_id: u32,
        error_code: ErrorCode,
        remote: bool,
    },
    /// Both sides finished and the stream was dropped.
    Closed { stream_id: u32 },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    PingAck { opaque_data: [u8; PING_DATA_SIZE] },
}

/// Requests stream activation from any thread.
#[derive(Debug, Clone)]
pub struct ActivationHandle {
    tx: Sender<u32>,
}

impl ActivationHandle {
    /// Ask the connection to start sending `stream_id`. Returns false if the
    /// connection is gone.
    pub fn activate(&self, stream_id: u32) -> bool {
        self.tx.send(stream_id).is_ok()
    }
}

/// All streams of one connection.
#[derive(Debug)]
pub struct Streams {
    role: Role,
    streams: HashMap<u32, H2Stream>,
    next_stream_id: u32,
    /// Highest local stream id whose HEADERS went out.
    last_local_opened: u32,
    /// Highest peer stream id seen; everything above is idle.
    highest_peer_stream_id: u32,
    /// Highest peer stream id accepted for processing, reported in GOAWAY.
    last_peer_stream_id: u32,
    local_settings: Settings,
    peer_settings: Settings,
    /// Connection-level credit for outbound DATA.
    send_window: FlowWindow,
    /// Connection-level credit granted to the peer.
    recv_window: FlowWindow,
    preface_pending: bool,
    /// Frames to write before any stream data, in order.
    control: VecDeque<Frame>,
    /// Activated streams whose HEADERS have not been produced yet.
    ready: VecDeque<u32>,
    /// Streams with body data left to send.
    sending: VecDeque<u32>,
    events: VecDeque<StreamEvent>,
    activation_tx: Sender<u32>,
    activation_rx: Receiver<u32>,
    goaway_received: Option<u32>,
    goaway_sent: bool,
    goaway_in_progress: Option<(u32, ErrorCode, BytesMut)>,
    push_in_progress: Option<(u32, Vec<H2Header>)>,
}

impl Streams {
    /// Our SETTINGS frame is queued immediately, after the preface for clients.
    pub fn new(role: Role, local_settings: Settings) -> Self {
        let (activation_tx, activation_rx) = unbounded();
        let mut control = VecDeque::new();
        control.push_back(Frame::Settings {
            settings: local_settings.to_setting_list(),
        });
        Self {
            role,
            streams: HashMap::new(),
            next_stream_id: if role == Role::Client { 1 } else { 2 },
            last_local_opened: 0,
            highest_peer_stream_id: 0,
            last_peer_stream_id: 0,
            local_settings,
            peer_settings: Settings::default(),
            send_window: FlowWindow::default(),
            recv_window: FlowWindow::default(),
            preface_pending: role == Role::Client,
            control,
            ready: VecDeque::new(),
            sending: VecDeque::new(),
            events: VecDeque::new(),
            activation_tx,
            activation_rx,
            goaway_received: None,
            goaway_sent: false,
            goaway_in_progress: None,
            push_in_progress: None,
        }
    }

    pub fn client() -> Self {
        Self::new(Role::Client, Settings::client_default())
    }

    pub fn server() -> Self {
        Self::new(Role::Server, Settings::default())
    }

    /// Decoder configuration matching our advertised settings.
    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            role: self.role,
            max_frame_size: self.local_settings.max_frame_size,
            enable_push: self.local_settings.enable_push,
            ..DecoderConfig::default()
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    pub fn peer_settings(&self) -> &Settings {
        &self.peer_settings
    }

    pub fn send_window(&self) -> &FlowWindow {
        &self.send_window
    }

    pub fn recv_window(&self) -> &FlowWindow {
        &self.recv_window
    }

    pub fn stream(&self, stream_id: u32) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.streams.get(&stream_id).map(H2Stream::state)
    }

    pub fn num_active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Last stream id the peer announced it will process, once GOAWAY arrived.
    pub fn goaway_received(&self) -> Option<u32> {
        self.goaway_received
    }

    pub fn activation_handle(&self) -> ActivationHandle {
        ActivationHandle {
            tx: self.activation_tx.clone(),
        }
    }

    pub fn poll_event(&mut self) -> Option<StreamEvent> {
        self.events.pop_front()
    }

    /// Whether anything is waiting to be written. Streams stalled on a
    /// flow-control window do not count until a WINDOW_UPDATE arrives.
    pub fn wants_write(&self) -> bool {
        self.preface_pending
            || !self.control.is_empty()
            || !self.ready.is_empty()
            || self.sending.iter().any(|stream_id| {
                self.streams
                    .get(stream_id)
                    .map_or(false, |stream| stream.can_send_data_now(&self.send_window))
            })
    }

    fn is_peer_initiated(&self, stream_id: u32) -> bool {
        match self.role {
            Role::Server => stream_id % 2 == 1,
            Role::Client => stream_id % 2 == 0,
        }
    }

    /// Never opened by either side.
    fn is_idle(&self, stream_id: u32) -> bool {
        if self.is_peer_initiated(stream_id) {
            stream_id > self.highest_peer_stream_id
        } else {
            stream_id >= self.next_stream_id
        }
    }

    fn count_streams(&self, peer_initiated: bool) -> u32 {
        self.streams
            .iter()
            .filter(|(id, stream)| self.is_peer_initiated(**id) == peer_initiated && !stream.is_closed())
            .count() as u32
    }

    fn allocate_stream_id(&mut self) -> Result<u32, StreamError> {
        let stream_id = self.next_stream_id;
        if stream_id > MAX_WINDOW_SIZE {
            return Err(StreamError::new(stream_id, ErrorCode::REFUSED_STREAM, "stream ids exhausted"));
        }
        self.next_stream_id += 2;
        Ok(stream_id)
    }

    /// Create a client stream for `message`. Nothing is sent until the
    /// stream is activated.
    pub fn new_request(&mut self, message: OutgoingMessage) -> Result<u32, StreamError> {
        if self.role != Role::Client {
            return Err(StreamError::new(0, ErrorCode::PROTOCOL_ERROR, "only clients send requests"));
        }
        if self.goaway_received.is_some() || self.goaway_sent {
            return Err(StreamError::new(0, ErrorCode::REFUSED_STREAM, "connection is going away"));
        }
        if let Some(max) = self.peer_settings.max_concurrent_streams {
            if self.count_streams(false) >= max {
                return Err(StreamError::new(0, ErrorCode::REFUSED_STREAM, "peer concurrency limit reached"));
            }
        }
        let stream_id = self.allocate_stream_id()?;
        let stream = H2Stream::new_request(
            stream_id,
            message,
            self.peer_settings.initial_window_size,
            self.local_settings.initial_window_size,
        );
        self.streams.insert(stream_id, stream);
        debug!(stream_id, "new request stream");
        Ok(stream_id)
    }

    /// Mark a stream ready to send its HEADERS on the next write.
    pub fn activate(&mut self, stream_id: u32) {
        let pending = self
            .streams
            .get(&stream_id)
            .map_or(false, H2Stream::is_pending_activation);
        if pending && !self.ready.contains(&stream_id) {
            trace!(stream_id, "stream activated");
            self.ready.push_back(stream_id);
        }
    }

    fn drain_activations(&mut self) {
        while let Ok(stream_id) = self.activation_rx.try_recv() {
            self.activate(stream_id);
        }
    }

    /// Queue a response on a stream the peer opened and activate it.
    pub fn send_response(&mut self, stream_id: u32, message: OutgoingMessage) -> Result<(), StreamError> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Err(StreamError::new(stream_id, ErrorCode::STREAM_CLOSED, "no such stream"));
        };
        stream.set_response(message)?;
        self.activate(stream_id);
        Ok(())
    }

    /// Promise a pushed response on `associated_stream_id`.
    pub fn push_promise(
        &mut self,
        associated_stream_id: u32,
        request_headers: Vec<H2Header>,
        response: OutgoingMessage,
    ) -> Result<u32, StreamError> {
        if self.role != Role::Server || !self.peer_settings.enable_push {
            return Err(StreamError::new(
                associated_stream_id,
                ErrorCode::PROTOCOL_ERROR,
                "push is disabled",
            ));
        }
        let associated_open = self
            .streams
            .get(&associated_stream_id)
            .map_or(false, |stream| stream.state().can_send_data());
        if !associated_open {
            return Err(StreamError::new(
                associated_stream_id,
                ErrorCode::STREAM_CLOSED,
                "associated stream is not open",
            ));
        }

        let promised_stream_id = self.allocate_stream_id()?;
        let mut stream = H2Stream::new(
            promised_stream_id,
            self.peer_settings.initial_window_size,
            self.local_settings.initial_window_size,
        );
        stream.reserve_local(response)?;
        self.streams.insert(promised_stream_id, stream);
        self.control.push_back(Frame::PushPromise {
            stream_id: associated_stream_id,
            promised_stream_id,
            headers: request_headers,
        });
        self.ready.push_back(promised_stream_id);
        Ok(promised_stream_id)
    }

    /// Reset a stream locally and queue the RST_STREAM.
    pub fn reset_stream(&mut self, stream_id: u32, error_code: ErrorCode) {
        let frame = match self.streams.remove(&stream_id) {
            Some(mut stream) => stream.reset(error_code),
            None => Some(Frame::RstStream { stream_id, error_code }),
        };
        if let Some(frame) = frame {
            warn!(stream_id, ?error_code, "resetting stream");
            self.control.push_back(frame);
        }
        self.events.push_back(StreamEvent::Reset {
            stream_id,
            error_code,
            remote: false,
        });
    }

    pub fn ping(&mut self, opaque_data: [u8; PING_DATA_SIZE]) {
        self.control.push_back(Frame::Ping {
            ack: false,
            opaque_data,
        });
    }

    /// Build the GOAWAY for shutting down, naming the last peer stream we processed.
    pub fn goaway_frame(&mut self, error_code: ErrorCode, debug_data: impl Into<Bytes>) -> Frame {
        self.goaway_sent = true;
        Frame::GoAway {
            last_stream_id: self.last_peer_stream_id,
            error_code,
            debug_data: debug_data.into(),
        }
    }

    /// Queue a GOAWAY behind the pending control frames.
    pub fn go_away(&mut self, error_code: ErrorCode) {
        let frame = self.goaway_frame(error_code, Bytes::new());
        self.control.push_back(frame);
    }

    /// Feed received bytes through `decoder`.
    ///
    /// Stream errors reset the offending stream and decoding carries on;
    /// a connection error is returned as is.
    pub fn recv(&mut self, decoder: &mut FrameDecoder, data: &[u8]) -> Result<(), DecodeError> {
        self.drain_activations();
        let mut cursor = data;
        loop {
            match decoder.decode(&mut cursor, self) {
                Ok(()) => return Ok(()),
                Err(DecodeError::Stream {
                    stream_id,
                    code,
                    reason,
                }) => {
                    debug!(stream_id, ?code, %reason, "stream error");
                    self.reset_stream(stream_id, code);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Write pending work into `out`: the preface, control frames, HEADERS
    /// of activated streams, then DATA within the flow-control windows.
    ///
    /// Returns true if `out` filled up before everything writable was written.
    pub fn poll_write(&mut self, encoder: &mut FrameEncoder, out: &mut OutputBuffer) -> Result<bool, EncodeError> {
        self.drain_activations();
        encoder.set_max_frame_size(self.peer_settings.max_frame_size);

        if self.preface_pending {
            if !encoder.encode_preface(out)? {
                return Ok(true);
            }
            self.preface_pending = false;
        }

        // Requests open new streams, which must reach the wire in id order.
        if self.role == Role::Client {
            self.ready.make_contiguous().sort_unstable();
        }
        loop {
            while let Some(frame) = self.control.front() {
                if !encoder.encode(frame, out)? {
                    return Ok(true);
                }
                self.control.pop_front();
            }

            let Some(stream_id) = self.ready.pop_front() else {
                break;
            };
            let Some(state) = self
                .streams
                .get(&stream_id)
                .filter(|stream| stream.is_pending_activation())
                .map(H2Stream::state)
            else {
                continue;
            };
            if state == StreamState::Idle {
                // The peer implicitly closed every idle id below one it has seen.
                if stream_id < self.last_local_opened {
                    self.reset_stream(stream_id, ErrorCode::REFUSED_STREAM);
                    continue;
                }
                self.last_local_opened = stream_id;
            }
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                continue;
            };
            match stream.activate() {
                Ok((frame, has_body)) => {
                    self.control.push_back(frame);
                    if has_body {
                        self.sending.push_back(stream_id);
                    } else {
                        self.remove_if_closed(stream_id);
                    }
                }
                Err(err) => warn!(stream_id, error = %err, "activation failed"),
            }
        }

        let mut blocked = VecDeque::new();
        let mut full = false;
        while let Some(stream_id) = self.sending.pop_front() {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                continue;
            };
            if !stream.has_outgoing_data() {
                continue;
            }
            match stream.encode_data(encoder, &mut self.send_window, out) {
                Ok(true) => self.remove_if_closed(stream_id),
                Ok(false) if out.remaining() <= FRAME_HEADER_LEN => {
                    self.sending.push_front(stream_id);
                    full = true;
                    break;
                }
                // Out of window or the body has nothing ready yet.
                Ok(false) => blocked.push_back(stream_id),
                Err(EncodeError::Body(err)) => {
                    warn!(stream_id, error = %err, "body source failed");
                    self.reset_stream(stream_id, ErrorCode::INTERNAL_ERROR);
                }
                Err(err) => {
                    self.sending.push_front(stream_id);
                    self.sending.append(&mut blocked);
                    return Err(err);
                }
            }
        }
        self.sending.append(&mut blocked);

        // RST_STREAM for bodies that failed above.
        while let Some(frame) = self.control.front() {
            if !encoder.encode(frame, out)? {
                return Ok(true);
            }
            self.control.pop_front();
        }
        Ok(full)
    }

    fn remove_if_closed(&mut self, stream_id: u32) {
        if self.streams.get(&stream_id).map_or(false, H2Stream::is_closed) {
            self.streams.remove(&stream_id);
            debug!(stream_id, "stream closed");
            self.events.push_back(StreamEvent::Closed { stream_id });
        }
    }

    fn replenish_connection_window(&mut self) {
        let consumed = i64::from(DEFAULT_INITIAL_WINDOW_SIZE) - self.recv_window.size();
        if consumed >= i64::from(DEFAULT_INITIAL_WINDOW_SIZE / 2) {
            let increment = consumed as u32;
            if self.recv_window.increase(increment).is_ok() {
                self.control.push_back(Frame::WindowUpdate { stream_id: 0, increment });
            }
        }
    }

    fn unknown_stream(&self, stream_id: u32, what: &str) -> DecodeError {
        if self.is_idle(stream_id) {
            DecodeError::connection(
                ErrorCode::PROTOCOL_ERROR,
                format!("{} on idle stream {}", what, stream_id),
            )
        } else {
            DecodeError::stream(stream_id, ErrorCode::STREAM_CLOSED, format!("{} on closed stream", what))
        }
    }
}

impl DecoderHandler for Streams {
    fn on_headers_begin(&mut self, stream_id: u32) -> Result<(), DecodeError> {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if stream.state() == StreamState::Idle {
                return Err(DecodeError::connection(
                    ErrorCode::PROTOCOL_ERROR,
                    format!("HEADERS on stream {} before we opened it", stream_id),
                ));
            }
            return stream.on_decoder_headers_begin().map_err(Into::into);
        }

        if !self.is_peer_initiated(stream_id) || stream_id <= self.highest_peer_stream_id {
            return Err(self.unknown_stream(stream_id, "HEADERS"));
        }
        if self.role == Role::Client {
            return Err(DecodeError::connection(
                ErrorCode::PROTOCOL_ERROR,
                format!("server opened stream {} without PUSH_PROMISE", stream_id),
            ));
        }
        // Refused or not, the id is no longer idle.
        self.highest_peer_stream_id = stream_id;
        if self.goaway_sent {
            return Err(DecodeError::stream(stream_id, ErrorCode::REFUSED_STREAM, "connection is going away"));
        }
        if let Some(max) = self.local_settings.max_concurrent_streams {
            if self.count_streams(true) >= max {
                return Err(DecodeError::stream(
                    stream_id,
                    ErrorCode::REFUSED_STREAM,
                    "concurrency limit reached",
                ));
            }
        }
        self.last_peer_stream_id = stream_id;

        let mut stream = H2Stream::new(
            stream_id,
            self.peer_settings.initial_window_size,
            self.local_settings.initial_window_size,
        );
        stream.on_decoder_headers_begin()?;
        debug!(stream_id, "peer opened stream");
        self.streams.insert(stream_id, stream);
        Ok(())
    }

    fn on_headers_item(
        &mut self,
        stream_id: u32,
        header: &H2Header,
        _name: HeaderName,
        _block: HeaderBlock,
    ) -> Result<(), DecodeError> {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.on_decoder_headers_item(header);
        }
        Ok(())
    }

    fn on_headers_end(&mut self, stream_id: u32, malformed: bool, block: HeaderBlock) -> Result<(), DecodeError> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        let (block, headers) = stream.on_decoder_headers_end(malformed, block)?;
        self.events.push_back(StreamEvent::Headers {
            stream_id,
            block,
            headers,
        });
        Ok(())
    }

    fn on_push_promise_begin(&mut self, stream_id: u32, promised_stream_id: u32) -> Result<(), DecodeError> {
        let associated_open = self
            .streams
            .get(&stream_id)
            .map_or(false, |stream| stream.state().can_recv_data());
        if !associated_open {
            return Err(DecodeError::connection(
                ErrorCode::PROTOCOL_ERROR,
                format!("PUSH_PROMISE on stream {} which is not open", stream_id),
            ));
        }
        if promised_stream_id <= self.highest_peer_stream_id {
            return Err(DecodeError::connection(
                ErrorCode::PROTOCOL_ERROR,
                format!("promised stream {} is not idle", promised_stream_id),
            ));
        }
        self.highest_peer_stream_id = promised_stream_id;
        self.last_peer_stream_id = promised_stream_id;

        let mut promised = H2Stream::new(
            promised_stream_id,
            self.peer_settings.initial_window_size,
            self.local_settings.initial_window_size,
        );
        promised.reserve_remote()?;
        self.streams.insert(promised_stream_id, promised);
        self.push_in_progress = Some((promised_stream_id, Vec::new()));
        Ok(())
    }

    fn on_push_promise_item(&mut self, _stream_id: u32, header: &H2Header, _name: HeaderName) -> Result<(), DecodeError> {
        if let Some((_, headers)) = self.push_in_progress.as_mut() {
            headers.push(header.clone());
        }
        Ok(())
    }

    fn on_push_promise_end(&mut self, stream_id: u32, malformed: bool) -> Result<(), DecodeError> {
        let Some((promised_stream_id, headers)) = self.push_in_progress.take() else {
            return Ok(());
        };
        if malformed {
            self.reset_stream(promised_stream_id, ErrorCode::PROTOCOL_ERROR);
            return Ok(());
        }
        self.events.push_back(StreamEvent::PushPromise {
            stream_id,
            promised_stream_id,
            headers,
        });
        Ok(())
    }

    fn on_priority(&mut self, stream_id: u32, priority: Priority) -> Result<(), DecodeError> {
        trace!(stream_id, ?priority, "ignoring PRIORITY");
        Ok(())
    }

    fn on_data_begin(&mut self, stream_id: u32, frame_len: u32, end_stream: bool) -> Result<(), DecodeError> {
        if self.recv_window.consume(frame_len).is_err() {
            return Err(DecodeError::connection(
                ErrorCode::FLOW_CONTROL_ERROR,
                "DATA exceeds connection window",
            ));
        }
        self.replenish_connection_window();

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Err(self.unknown_stream(stream_id, "DATA"));
        };
        stream.on_decoder_data(frame_len)?;
        if !end_stream {
            if let Some(increment) = stream.take_window_update() {
                self.control.push_back(Frame::WindowUpdate { stream_id, increment });
            }
        }
        Ok(())
    }

    fn on_data_item(&mut self, stream_id: u32, data: &[u8]) -> Result<(), DecodeError> {
        if self.streams.contains_key(&stream_id) {
            self.events.push_back(StreamEvent::Data {
                stream_id,
                data: Bytes::copy_from_slice(data),
            });
        }
        Ok(())
    }

    fn on_end_stream(&mut self, stream_id: u32) -> Result<(), DecodeError> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        stream.on_decoder_end_stream()?;
        self.events.push_back(StreamEvent::EndStream { stream_id });
        self.remove_if_closed(stream_id);
        Ok(())
    }

    fn on_rst_stream(&mut self, stream_id: u32, error_code: ErrorCode) -> Result<(), DecodeError> {
        if self.is_idle(stream_id) {
            return Err(DecodeError::connection(
                ErrorCode::PROTOCOL_ERROR,
                format!("RST_STREAM on idle stream {}", stream_id),
            ));
        }
        if let Some(mut stream) = self.streams.remove(&stream_id) {
            stream.on_decoder_rst_stream(error_code);
            debug!(stream_id, ?error_code, "stream reset by peer");
            self.events.push_back(StreamEvent::Reset {
                stream_id,
                error_code,
                remote: true,
            });
        }
        Ok(())
    }

    fn on_settings(&mut self, settings: &[Setting]) -> Result<(), DecodeError> {
        let old_window = self.peer_settings.initial_window_size;
        self.peer_settings.apply(settings)?;
        let delta = i64::from(self.peer_settings.initial_window_size) - i64::from(old_window);
        if delta != 0 {
            for stream in self.streams.values_mut() {
                if stream.apply_initial_window_delta(delta).is_err() {
                    return Err(DecodeError::connection(
                        ErrorCode::FLOW_CONTROL_ERROR,
                        format!("INITIAL_WINDOW_SIZE change overflows stream {}", stream.id()),
                    ));
                }
            }
        }
        debug!(?settings, "applied peer settings");
        self.control.push_back(Frame::SettingsAck);
        Ok(())
    }

    fn on_settings_ack(&mut self) -> Result<(), DecodeError> {
        debug!("received settings ack");
        Ok(())
    }

    fn on_ping(&mut self, opaque_data: [u8; PING_DATA_SIZE]) -> Result<(), DecodeError> {
        self.control.push_back(Frame::Ping { ack: true, opaque_data });
        Ok(())
    }

    fn on_ping_ack(&mut self, opaque_data: [u8; PING_DATA_SIZE]) -> Result<(), DecodeError> {
        self.events.push_back(StreamEvent::PingAck { opaque_data });
        Ok(())
    }

    fn on_goaway_begin(&mut self, last_stream_id: u32, error_code: ErrorCode, debug_data_len: u32) -> Result<(), DecodeError> {
        trace!(last_stream_id, ?error_code, debug_data_len, "GOAWAY received");
        self.goaway_in_progress = Some((last_stream_id, error_code, BytesMut::new()));
        Ok(())
    }

    fn on_goaway_item(&mut self, debug_data: &[u8]) -> Result<(), DecodeError> {
        if let Some((_, _, buf)) = self.goaway_in_progress.as_mut() {
            buf.extend_from_slice(debug_data);
        }
        Ok(())
    }

    fn on_goaway_end(&mut self) -> Result<(), DecodeError> {
        let Some((last_stream_id, error_code, debug_data)) = self.goaway_in_progress.take() else {
            return Ok(());
        };
        self.goaway_received = Some(last_stream_id);

        // Our streams above the last id were never processed by the peer.
        let mut refused: Vec<u32> = self
            .streams
            .keys()
            .copied()
            .filter(|id| !self.is_peer_initiated(*id) && *id > last_stream_id)
            .collect();
        refused.sort_unstable();
        for stream_id in refused {
            if let Some(mut stream) = self.streams.remove(&stream_id) {
                stream.on_decoder_rst_stream(ErrorCode::REFUSED_STREAM);
            }
            self.events.push_back(StreamEvent::Reset {
                stream_id,
                error_code: ErrorCode::REFUSED_STREAM,
                remote: true,
            });
        }

        self.events.push_back(StreamEvent::GoAway {
            last_stream_id,
            error_code,
            debug_data: debug_data.freeze(),
        });
        Ok(())
    }

    fn on_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), DecodeError> {
        if stream_id == 0 {
            if self.send_window.increase(increment).is_err() {
                return Err(DecodeError::connection(
                    ErrorCode::FLOW_CONTROL_ERROR,
                    "connection window exceeds 2^31-1",
                ));
            }
            return Ok(());
        }
        let idle = self.is_idle(stream_id);
        match self.streams.get_mut(&stream_id) {
            Some(stream) => stream.on_window_update(increment).map_err(Into::into),
            None if idle => Err(DecodeError::connection(
                ErrorCode::PROTOCOL_ERROR,
                format!("WINDOW_UPDATE on idle stream {}", stream_id),
            )),
            None => Ok(()),
        }
    }
}
