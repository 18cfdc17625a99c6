//! HTTP/2 frame encoder.
//!
//! Frames are written into caller-provided [`OutputBuffer`]s of bounded size.
//! A wire frame is never split across buffers: if the next frame does not
//! fit, `encode` returns `Ok(false)` and the caller retries with a fresh
//! buffer. Header blocks are the exception to "one logical frame, one wire
//! frame": the compressed block is cut into HEADERS (or PUSH_PROMISE) plus
//! CONTINUATION frames sized to whatever room the current buffer has left.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::EncodeError;
use crate::frame::{
    flags, Frame, FrameKind, H2FrameHeader, Priority, Setting, CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE,
    FRAME_HEADER_LEN, MAX_FRAME_LENGTH, MAX_WINDOW_SIZE, PING_DATA_SIZE,
};
use crate::hpack::{H2Header, HpackEncoder};

/// A bounded output buffer.
///
/// `capacity` is a hard limit; the encoder never writes past it.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    buf: BytesMut,
    limit: usize,
}

impl OutputBuffer {
    pub fn with_capacity(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit),
            limit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.limit
    }

    /// Space left before the limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Take the bytes written so far, leaving the buffer empty with the same limit.
    pub fn split(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl AsRef<[u8]> for OutputBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

/// A streaming DATA body, pulled by [`FrameEncoder::encode_data`].
pub trait BodySource {
    /// Copy up to `dst.len()` bytes into `dst` and return how many were
    /// written. Returning 0 while not at end of stream means no data is
    /// available right now.
    fn read_into(&mut self, dst: &mut [u8]) -> io::Result<usize>;

    /// True once every byte has been handed out.
    fn is_end_of_stream(&self) -> bool;
}

impl<B: bytes::Buf> BodySource for B {
    fn read_into(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let n = dst.len().min(self.remaining());
        self.copy_to_slice(&mut dst[..n]);
        Ok(n)
    }

    fn is_end_of_stream(&self) -> bool {
        !self.has_remaining()
    }
}

/// Adapts any [`io::Read`] into a [`BodySource`]. End of stream is the
/// first `read` returning 0.
#[derive(Debug)]
pub struct ReaderBody<R> {
    reader: R,
    eof: bool,
}

impl<R: io::Read> ReaderBody<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, eof: false }
    }
}

impl<R: io::Read> BodySource for ReaderBody<R> {
    fn read_into(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if self.eof || dst.is_empty() {
            return Ok(0);
        }
        let n = self.reader.read(dst)?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    fn is_end_of_stream(&self) -> bool {
        self.eof
    }
}

/// Result of one [`FrameEncoder::encode_data`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataProgress {
    /// DATA payload bytes written (what flow control is charged).
    pub bytes_written: usize,
    pub frames: usize,
    /// The body is exhausted and the final frame has been written.
    pub body_complete: bool,
}

/// A compressed header block partially written to the wire.
#[derive(Debug)]
struct PendingHeaderBlock {
    stream_id: u32,
    kind: FrameKind,
    block: Bytes,
    offset: usize,
    first_frame_sent: bool,
}

/// HTTP/2 frame encoder for one direction of one connection.
///
/// Owns the HPACK encoder, so every header-bearing frame must go through
/// the same instance in the order it is put on the wire.
#[derive(Debug)]
pub struct FrameEncoder {
    hpack: HpackEncoder,
    max_frame_size: u32,
    pending: Option<PendingHeaderBlock>,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            hpack: HpackEncoder::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pending: None,
        }
    }

    /// Apply the peer's SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size.clamp(DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_LENGTH);
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// True while a header block is only partly written.
    pub fn is_header_block_in_progress(&self) -> bool {
        self.pending.is_some()
    }

    /// Nothing but the rest of the open header block may go on the wire.
    fn check_no_pending(&self) -> Result<(), EncodeError> {
        match &self.pending {
            Some(pending) => Err(EncodeError::HeaderBlockPending {
                stream_id: pending.stream_id,
            }),
            None => Ok(()),
        }
    }

    /// Write the client connection preface.
    pub fn encode_preface(&mut self, out: &mut OutputBuffer) -> Result<bool, EncodeError> {
        self.check_no_pending()?;
        if !reserve(out, CONNECTION_PREFACE.len())? {
            return Ok(false);
        }
        out.buf.extend_from_slice(CONNECTION_PREFACE);
        Ok(true)
    }

    /// Serialize `frame` into `out`.
    ///
    /// Returns `Ok(true)` once the frame is completely written. `Ok(false)`
    /// means `out` filled up; call again with the same frame and a buffer
    /// with more room. Header blocks are compressed once, on the first call,
    /// and until the block is finished only that same frame is accepted.
    pub fn encode(&mut self, frame: &Frame, out: &mut OutputBuffer) -> Result<bool, EncodeError> {
        if let Some(pending) = &self.pending {
            let resumes = match frame {
                Frame::Headers { stream_id, .. } => pending.kind == FrameKind::Headers && pending.stream_id == *stream_id,
                Frame::PushPromise { stream_id, .. } => {
                    pending.kind == FrameKind::PushPromise && pending.stream_id == *stream_id
                }
                _ => false,
            };
            if !resumes {
                return Err(EncodeError::HeaderBlockPending {
                    stream_id: pending.stream_id,
                });
            }
        }
        match frame {
            Frame::Headers {
                stream_id,
                headers,
                end_stream,
            } => {
                let first_flags = if *end_stream { flags::END_STREAM } else { 0 };
                self.encode_header_block(*stream_id, FrameKind::Headers, first_flags, None, headers, out)
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                headers,
            } => {
                check_stream_id(*promised_stream_id)?;
                self.encode_header_block(
                    *stream_id,
                    FrameKind::PushPromise,
                    0,
                    Some(*promised_stream_id),
                    headers,
                    out,
                )
            }
            _ => self.encode_fixed(frame, out),
        }
    }

    fn encode_header_block(
        &mut self,
        stream_id: u32,
        kind: FrameKind,
        first_flags: u8,
        promised_stream_id: Option<u32>,
        headers: &[H2Header],
        out: &mut OutputBuffer,
    ) -> Result<bool, EncodeError> {
        check_stream_id(stream_id)?;
        if self.pending.is_none() {
            // Fail before compressing so the HPACK table only sees blocks that go out.
            let prefix = if promised_stream_id.is_some() { 4 } else { 0 };
            reserve(out, FRAME_HEADER_LEN + prefix + 1)?;
            let block = Bytes::from(self.hpack.encode(headers));
            trace!(stream_id, kind = %kind, block_len = block.len(), "compressed header block");
            self.pending = Some(PendingHeaderBlock {
                stream_id,
                kind,
                block,
                offset: 0,
                first_frame_sent: false,
            });
        }
        let max_frame_size = self.max_frame_size as usize;

        loop {
            let Some(pending) = self.pending.as_mut() else {
                return Ok(true);
            };

            let first = !pending.first_frame_sent;
            let prefix = match promised_stream_id {
                Some(_) if first => 4,
                _ => 0,
            };
            let left = pending.block.len() - pending.offset;
            // A fragment must carry at least one byte unless the block is done.
            let min_needed = FRAME_HEADER_LEN + prefix + usize::from(left > 0);
            match reserve(out, min_needed) {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(err) => {
                    warn!(stream_id, "dropping unfinished header block");
                    self.pending = None;
                    return Err(err);
                }
            }

            let fragment_len = left
                .min(max_frame_size - prefix)
                .min(out.remaining() - FRAME_HEADER_LEN - prefix);
            let last = fragment_len == left;

            let mut frame_flags = if last { flags::END_HEADERS } else { 0 };
            let frame_kind = if first {
                frame_flags |= first_flags;
                kind
            } else {
                FrameKind::Continuation
            };
            let length = (prefix + fragment_len) as u32;
            trace!(stream_id, kind = %frame_kind, length, "encoding frame");
            H2FrameHeader::new(length, frame_kind, frame_flags, stream_id).encode(&mut out.buf);
            if let (true, Some(promised)) = (first, promised_stream_id) {
                out.buf.put_u32(promised & MAX_WINDOW_SIZE);
            }
            out.buf
                .extend_from_slice(&pending.block[pending.offset..pending.offset + fragment_len]);
            pending.offset += fragment_len;
            pending.first_frame_sent = true;

            if last {
                self.pending = None;
                return Ok(true);
            }
        }
    }

    fn encode_fixed(&mut self, frame: &Frame, out: &mut OutputBuffer) -> Result<bool, EncodeError> {
        let max = self.max_frame_size;
        let kind = frame.kind();
        let stream_id = frame.stream_id();

        let (payload_len, frame_flags) = match frame {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
            } => {
                check_stream_id(*stream_id)?;
                if payload.len() > max as usize {
                    return Err(EncodeError::FrameTooLarge {
                        kind: "DATA",
                        len: payload.len(),
                        max,
                    });
                }
                (payload.len(), if *end_stream { flags::END_STREAM } else { 0 })
            }
            Frame::Priority { stream_id, .. } => {
                check_stream_id(*stream_id)?;
                (Priority::WIRE_LEN, 0)
            }
            Frame::RstStream { stream_id, .. } => {
                check_stream_id(*stream_id)?;
                (4, 0)
            }
            Frame::Settings { settings } => {
                let len = settings.len() * Setting::WIRE_LEN;
                if len > max as usize {
                    return Err(EncodeError::FrameTooLarge {
                        kind: "SETTINGS",
                        len,
                        max,
                    });
                }
                (len, 0)
            }
            Frame::SettingsAck => (0, flags::ACK),
            Frame::Ping { ack, .. } => (PING_DATA_SIZE, if *ack { flags::ACK } else { 0 }),
            Frame::GoAway { debug_data, .. } => {
                let room = max as usize - 8;
                if debug_data.len() > room {
                    warn!(len = debug_data.len(), max = room, "truncating GOAWAY debug data");
                }
                (8 + debug_data.len().min(room), 0)
            }
            Frame::WindowUpdate { stream_id, increment } => {
                if *stream_id > MAX_WINDOW_SIZE {
                    return Err(EncodeError::InvalidStreamId(*stream_id));
                }
                if *increment == 0 || *increment > MAX_WINDOW_SIZE {
                    return Err(EncodeError::InvalidWindowIncrement(*increment));
                }
                (4, 0)
            }
            Frame::Headers { .. } | Frame::PushPromise { .. } => return self.encode(frame, out),
        };

        if !reserve(out, FRAME_HEADER_LEN + payload_len)? {
            return Ok(false);
        }

        trace!(stream_id, kind = %kind, length = payload_len, "encoding frame");
        H2FrameHeader::new(payload_len as u32, kind, frame_flags, stream_id).encode(&mut out.buf);
        let dst = &mut out.buf;
        match frame {
            Frame::Data { payload, .. } => dst.extend_from_slice(payload),
            Frame::Priority { priority, .. } => priority.encode(dst),
            Frame::RstStream { error_code, .. } => dst.put_u32(error_code.0),
            Frame::Settings { settings } => {
                for setting in settings {
                    dst.put_u16(setting.id);
                    dst.put_u32(setting.value);
                }
            }
            Frame::Ping { opaque_data, .. } => dst.extend_from_slice(opaque_data),
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                dst.put_u32(last_stream_id & MAX_WINDOW_SIZE);
                dst.put_u32(error_code.0);
                dst.extend_from_slice(&debug_data[..payload_len - 8]);
            }
            Frame::WindowUpdate { increment, .. } => dst.put_u32(*increment),
            _ => {}
        }
        Ok(true)
    }

    /// Write DATA frames for `stream_id`, pulling from `body`.
    ///
    /// Emits as many frames as `out` and `window` (the flow-control credit
    /// the caller is willing to spend) allow. When the body reaches its end
    /// and `end_stream` is set, the final frame carries END_STREAM; an empty
    /// final frame is written if needed. Check
    /// [`DataProgress::body_complete`] to know whether to call again.
    pub fn encode_data<S: BodySource + ?Sized>(
        &mut self,
        stream_id: u32,
        body: &mut S,
        end_stream: bool,
        window: usize,
        out: &mut OutputBuffer,
    ) -> Result<DataProgress, EncodeError> {
        self.check_no_pending()?;
        check_stream_id(stream_id)?;
        let mut progress = DataProgress::default();
        let mut budget = window;

        loop {
            if !reserve(out, FRAME_HEADER_LEN)? {
                break;
            }
            let room = (out.remaining() - FRAME_HEADER_LEN)
                .min(self.max_frame_size as usize)
                .min(budget);
            if room == 0 && !body.is_end_of_stream() {
                break;
            }

            let start = out.buf.len();
            let payload_start = start + FRAME_HEADER_LEN;
            out.buf.resize(payload_start + room, 0);
            let n = match body.read_into(&mut out.buf[payload_start..payload_start + room]) {
                Ok(n) => n.min(room),
                Err(err) => {
                    out.buf.truncate(start);
                    return Err(err.into());
                }
            };
            let eos = body.is_end_of_stream();
            if n == 0 && (!eos || !end_stream) {
                out.buf.truncate(start);
                progress.body_complete = eos;
                break;
            }
            out.buf.truncate(payload_start + n);

            let frame_flags = if eos && end_stream { flags::END_STREAM } else { 0 };
            trace!(stream_id, length = n, end_stream = eos && end_stream, "encoding DATA frame");
            let mut slot = &mut out.buf[start..payload_start];
            H2FrameHeader::new(n as u32, FrameKind::Data, frame_flags, stream_id).encode(&mut slot);

            progress.bytes_written += n;
            progress.frames += 1;
            budget -= n;
            if eos {
                progress.body_complete = true;
                break;
            }
        }
        Ok(progress)
    }
}

/// Frames that belong to a stream cannot use stream 0 or set the reserved bit.
fn check_stream_id(stream_id: u32) -> Result<(), EncodeError> {
    if stream_id == 0 || stream_id > MAX_WINDOW_SIZE {
        return Err(EncodeError::InvalidStreamId(stream_id));
    }
    Ok(())
}

/// Whether `needed` bytes fit now; an error if they can never fit in `out`.
fn reserve(out: &OutputBuffer, needed: usize) -> Result<bool, EncodeError> {
    if needed > out.capacity() {
        return Err(EncodeError::OutputTooSmall {
            capacity: out.capacity(),
            needed,
        });
    }
    Ok(needed <= out.remaining())
}
