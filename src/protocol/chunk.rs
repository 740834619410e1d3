//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks for multiplexing. Each chunk has a
//! basic header naming the chunk stream (cid) and a message header whose
//! size depends on the fmt field.
//!
//! ```text
//! Chunk Format:
//! +-------------+-----------------+-------------------+
//! | Basic Header| Message Header  | Chunk Data        |
//! | (1-3 bytes) | (0,3,7,11 bytes)| (variable)        |
//! +-------------+-----------------+-------------------+
//!
//! Basic Header formats:
//! - 1 byte:  fmt(2) + cid(6)         for cid 2-63
//! - 2 bytes: fmt(2) + 0 + cid(8)     for cid 64-319
//! - 3 bytes: fmt(2) + 1 + cid(16)    for cid 64-65599
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4, LE)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  inherit everything
//! ```
//!
//! The extended timestamp (4 bytes) follows the message header when the
//! 24-bit field saturates at 0xFFFFFF. A fmt=3 chunk after an extended
//! timestamp may or may not repeat it; the decoder peeks and only consumes
//! the four bytes when they match the inherited value.
//!
//! Protocol-control messages (Set Chunk Size, Ack, Window Ack Size, Set Peer
//! Bandwidth, Abort) are absorbed here and never surface to the message
//! layer. User Control (type 4) passes through.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete RTMP message, reassembled from chunks
#[derive(Debug, Clone)]
pub struct RtmpMessage {
    /// Chunk stream ID it arrived on (or will be sent on)
    pub cid: u32,
    /// Absolute message timestamp (milliseconds)
    pub timestamp: u32,
    /// Message type ID
    pub message_type: u8,
    /// Message stream ID
    pub stream_id: u32,
    /// Message payload
    pub payload: Bytes,
}

impl RtmpMessage {
    pub fn new(cid: u32, timestamp: u32, message_type: u8, stream_id: u32, payload: Bytes) -> Self {
        Self {
            cid,
            timestamp,
            message_type,
            stream_id,
            payload,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.message_type == MSG_AUDIO
    }

    pub fn is_video(&self) -> bool {
        self.message_type == MSG_VIDEO
    }

    pub fn is_script(&self) -> bool {
        self.message_type == MSG_DATA_AMF0
    }

    pub fn is_command(&self) -> bool {
        self.message_type == MSG_COMMAND_AMF0
    }
}

/// Per-cid decoder state, created on first sight of the cid and kept for
/// the connection lifetime
#[derive(Debug, Default)]
struct ChunkStream {
    fmt: u8,
    /// Absolute timestamp of the current/last message
    timestamp: u32,
    timestamp_delta: u32,
    payload_length: u32,
    message_type: u8,
    stream_id: u32,
    /// Whether the last header on this cid used the extended timestamp
    extended_timestamp: bool,
    /// Partial payload accumulating toward `payload_length`
    partial: BytesMut,
    has_received_first_header: bool,
}

/// Chunk stream decoder: demultiplexes chunks and reassembles messages
pub struct ChunkDecoder {
    in_chunk_size: u32,
    streams: HashMap<u32, ChunkStream>,
    window_ack_size: u32,
    bytes_received: u64,
    bytes_since_ack: u64,
    /// Peer's Set Chunk Size value observed, surfaced for logging
    peer_chunk_size: Option<u32>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            in_chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            bytes_received: 0,
            bytes_since_ack: 0,
            peer_chunk_size: None,
        }
    }

    pub fn in_chunk_size(&self) -> u32 {
        self.in_chunk_size
    }

    pub fn peer_chunk_size(&self) -> Option<u32> {
        self.peer_chunk_size
    }

    /// Account transport bytes toward the acknowledgement window.
    pub fn add_bytes_received(&mut self, n: usize) {
        self.bytes_received += n as u64;
        self.bytes_since_ack += n as u64;
    }

    /// When an Acknowledgement is owed, returns the sequence number to send
    /// and resets the window counter.
    pub fn take_ack_due(&mut self) -> Option<u32> {
        if self.window_ack_size > 0 && self.bytes_since_ack >= u64::from(self.window_ack_size) {
            self.bytes_since_ack = 0;
            Some(self.bytes_received as u32)
        } else {
            None
        }
    }

    /// Decode the next complete message from `buf`.
    ///
    /// Protocol-control messages are consumed internally; the loop continues
    /// until a message for the upper layer completes or data runs out.
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpMessage>> {
        loop {
            let message = match self.decode_one(buf)? {
                Some(m) => m,
                None => return Ok(None),
            };

            if message.cid == CSID_PROTOCOL_CONTROL && self.absorb_protocol_control(&message)? {
                continue;
            }

            return Ok(Some(message));
        }
    }

    /// Handle a protocol-control message locally. Returns true when absorbed.
    fn absorb_protocol_control(&mut self, message: &RtmpMessage) -> Result<bool> {
        let mut payload = message.payload.clone();
        match message.message_type {
            MSG_SET_CHUNK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let size = payload.get_u32() & 0x7FFF_FFFF;
                tracing::debug!(chunk_size = size, "peer set chunk size");
                self.in_chunk_size = size.max(1);
                self.peer_chunk_size = Some(size);
                Ok(true)
            }
            MSG_ABORT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let cid = payload.get_u32();
                if let Some(state) = self.streams.get_mut(&cid) {
                    state.partial.clear();
                }
                Ok(true)
            }
            MSG_ACKNOWLEDGEMENT => Ok(true),
            MSG_WINDOW_ACK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                self.window_ack_size = payload.get_u32();
                Ok(true)
            }
            MSG_SET_PEER_BANDWIDTH => Ok(true),
            _ => Ok(false),
        }
    }

    /// Decode exactly one chunk; returns a message when it completes one.
    fn decode_one(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpMessage>> {
        let (fmt, cid, basic_len) = match parse_basic_header(buf)? {
            Some(v) => v,
            None => return Ok(None),
        };

        let fresh = !self.streams.contains_key(&cid);
        if fresh && fmt != 0 && !(cid == CSID_PROTOCOL_CONTROL && fmt == 1) {
            return Err(ProtocolError::ChunkFormat(format!(
                "fresh cid {} opened with fmt {}",
                cid, fmt
            ))
            .into());
        }

        let msg_header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < basic_len + msg_header_len {
            return Ok(None);
        }

        // Read the message header out of a peek slice first: nothing is
        // consumed until the whole chunk (header + payload piece) is present.
        let header = &buf[basic_len..basic_len + msg_header_len];
        let state = self.streams.entry(cid).or_default();

        let mut ts_field = state.timestamp_delta;
        let mut payload_length = state.payload_length;
        let mut message_type = state.message_type;
        let mut stream_id = state.stream_id;

        match fmt {
            0 => {
                ts_field = read_u24(&header[0..3]);
                payload_length = read_u24(&header[3..6]);
                message_type = header[6];
                stream_id = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
            }
            1 => {
                ts_field = read_u24(&header[0..3]);
                payload_length = read_u24(&header[3..6]);
                message_type = header[6];
            }
            2 => {
                ts_field = read_u24(&header[0..3]);
            }
            _ => {}
        }

        // Extended timestamp handling. For fmt 0..=2 its presence is decided
        // by the 24-bit field; for fmt=3 it is inherited, and the peer may or
        // may not resend it, so peek before consuming.
        let mut extended_len = 0usize;
        let has_extended;
        let mut timestamp_value = ts_field;
        if fmt < 3 {
            has_extended = ts_field >= EXTENDED_TIMESTAMP_THRESHOLD;
            if has_extended {
                extended_len = 4;
                if buf.len() < basic_len + msg_header_len + 4 {
                    return Ok(None);
                }
                let at = basic_len + msg_header_len;
                timestamp_value =
                    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
            }
        } else {
            has_extended = state.extended_timestamp;
            if has_extended {
                if buf.len() < basic_len + 4 {
                    return Ok(None);
                }
                let at = basic_len;
                let peeked = u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
                let expected = if state.partial.is_empty() {
                    // new message inherits the previous delta
                    state.timestamp.wrapping_add(state.timestamp_delta)
                } else {
                    state.timestamp
                };
                if peeked == expected {
                    extended_len = 4;
                }
            }
        }

        let continuing = !state.partial.is_empty();
        if continuing && fmt != 3 {
            // a continuation may repeat the header, but not change it
            let ts_changed = match fmt {
                0 => timestamp_value != state.timestamp,
                _ => ts_field != state.timestamp_delta,
            };
            if payload_length != state.payload_length
                || message_type != state.message_type
                || ts_changed
            {
                return Err(ProtocolError::ChunkFormat(format!(
                    "cid {} header changed mid-message",
                    cid
                ))
                .into());
            }
        }

        if payload_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload_length,
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        // How much of the payload this chunk carries
        let already = state.partial.len() as u32;
        let remaining = payload_length.saturating_sub(already);
        let piece = remaining.min(self.in_chunk_size) as usize;

        let total = basic_len + msg_header_len + extended_len + piece;
        if buf.len() < total {
            return Ok(None);
        }

        // Commit: consume the chunk and update state.
        buf.advance(basic_len + msg_header_len + extended_len);

        if !continuing {
            // starting a new message on this cid
            match fmt {
                0 => {
                    state.timestamp = timestamp_value;
                    state.timestamp_delta = 0;
                }
                1 | 2 => {
                    state.timestamp_delta = timestamp_value;
                    state.timestamp = state.timestamp.wrapping_add(timestamp_value);
                }
                _ => {
                    // fmt=3 starting a new message repeats the previous delta
                    if state.has_received_first_header {
                        state.timestamp = state.timestamp.wrapping_add(state.timestamp_delta);
                    }
                }
            }
            state.payload_length = payload_length;
            state.message_type = message_type;
            state.stream_id = stream_id;
            state.partial.reserve(payload_length as usize);
        }
        state.fmt = fmt;
        state.extended_timestamp = has_extended;
        state.has_received_first_header = true;

        state.partial.put_slice(&buf[..piece]);
        buf.advance(piece);

        if state.partial.len() as u32 >= state.payload_length {
            let payload = state.partial.split().freeze();
            return Ok(Some(RtmpMessage {
                cid,
                timestamp: state.timestamp,
                message_type: state.message_type,
                stream_id: state.stream_id,
                payload,
            }));
        }

        Ok(None)
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the basic header, returning (fmt, cid, header length) without
/// consuming. `Ok(None)` when more bytes are needed.
fn parse_basic_header(buf: &[u8]) -> Result<Option<(u8, u32, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let first = buf[0];
    let fmt = first >> 6;
    match first & 0x3F {
        0 => {
            if buf.len() < 2 {
                return Ok(None);
            }
            Ok(Some((fmt, 64 + u32::from(buf[1]), 2)))
        }
        1 => {
            if buf.len() < 3 {
                return Ok(None);
            }
            Ok(Some((fmt, 64 + u32::from(buf[1]) + u32::from(buf[2]) * 256, 3)))
        }
        cid => Ok(Some((fmt, u32::from(cid), 1))),
    }
}

fn read_u24(b: &[u8]) -> u32 {
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

/// Chunk stream encoder
///
/// Emits fmt=0 for the first chunk of every message and fmt=3 for its
/// continuations. Header compaction across messages buys little for a relay
/// and the decoder side of every mainstream client accepts this shape.
pub struct ChunkEncoder {
    out_chunk_size: u32,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            out_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the outgoing chunk size, clamped to the negotiable range.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.out_chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.out_chunk_size
    }

    /// Encode a message into `buf` as one or more chunks.
    pub fn encode(&self, message: &RtmpMessage, buf: &mut BytesMut) {
        let payload_len = message.payload.len();
        let extended = message.timestamp >= EXTENDED_TIMESTAMP_THRESHOLD;
        let ts_field = if extended {
            EXTENDED_TIMESTAMP_THRESHOLD
        } else {
            message.timestamp
        };

        let mut offset = 0;
        let mut first = true;
        loop {
            let piece = (payload_len - offset).min(self.out_chunk_size as usize);

            write_basic_header(buf, if first { 0 } else { 3 }, message.cid);
            if first {
                write_u24(buf, ts_field);
                write_u24(buf, payload_len as u32);
                buf.put_u8(message.message_type);
                buf.put_u32_le(message.stream_id);
            }
            if extended {
                // repeated before every continuation payload as well
                buf.put_u32(message.timestamp);
            }

            buf.put_slice(&message.payload[offset..offset + piece]);
            offset += piece;
            first = false;

            if offset >= payload_len {
                break;
            }
        }
    }

    /// Encode a message and return the bytes.
    pub fn encode_to_bytes(&self, message: &RtmpMessage) -> Bytes {
        let mut buf = BytesMut::with_capacity(message.payload.len() + 18);
        self.encode(message, &mut buf);
        buf.freeze()
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(buf: &mut BytesMut, fmt: u8, cid: u32) {
    if cid >= 64 + 256 {
        buf.put_u8((fmt << 6) | 1);
        let rest = cid - 64;
        buf.put_u8((rest & 0xFF) as u8);
        buf.put_u8((rest >> 8) as u8);
    } else if cid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((cid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | cid as u8);
    }
}

fn write_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_message(timestamp: u32, len: usize) -> RtmpMessage {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        RtmpMessage::new(CSID_VIDEO, timestamp, MSG_VIDEO, 1, Bytes::from(payload))
    }

    fn assert_same(a: &RtmpMessage, b: &RtmpMessage) {
        assert_eq!(a.cid, b.cid);
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.message_type, b.message_type);
        assert_eq!(a.stream_id, b.stream_id);
        assert_eq!(a.payload, b.payload);
    }

    #[test]
    fn test_basic_header_forms() {
        assert_eq!(parse_basic_header(&[0x03]).unwrap(), Some((0, 3, 1)));
        assert_eq!(parse_basic_header(&[0x00, 0x00]).unwrap(), Some((0, 64, 2)));
        assert_eq!(
            parse_basic_header(&[0x01, 0x00, 0x01]).unwrap(),
            Some((0, 320, 3))
        );
        assert_eq!(parse_basic_header(&[0xC3]).unwrap(), Some((3, 3, 1)));
        assert_eq!(parse_basic_header(&[]).unwrap(), None);
        assert_eq!(parse_basic_header(&[0x00]).unwrap(), None);
    }

    #[test]
    fn test_roundtrip_small() {
        let original = media_message(1000, 17);
        let encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();

        let mut wire = BytesMut::new();
        encoder.encode(&original, &mut wire);
        let decoded = decoder.decode(&mut wire).unwrap().unwrap();
        assert_same(&original, &decoded);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_roundtrip_fragmented_message() {
        // larger than default chunk size: one fmt=0 chunk + fmt=3 chunks
        let original = media_message(40, 500);
        let encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();

        let mut wire = BytesMut::new();
        encoder.encode(&original, &mut wire);
        assert!(wire.len() > 500);

        let decoded = decoder.decode(&mut wire).unwrap().unwrap();
        assert_same(&original, &decoded);
    }

    #[test]
    fn test_roundtrip_across_chunk_sizes() {
        for chunk_size in [128u32, 129, 1000, 4096, 65535] {
            let mut encoder = ChunkEncoder::new();
            encoder.set_chunk_size(chunk_size);

            let mut decoder = ChunkDecoder::new();
            // decoder must be told the new size the same way a peer would
            let mut wire = BytesMut::new();
            let mut set = BytesMut::new();
            set.put_u32(chunk_size);
            encoder_control(&mut wire, MSG_SET_CHUNK_SIZE, set.freeze());

            let original = media_message(123, 3000);
            encoder.encode(&original, &mut wire);

            let decoded = decoder.decode(&mut wire).unwrap().unwrap();
            assert_same(&original, &decoded);
            assert_eq!(decoder.in_chunk_size(), chunk_size);
        }
    }

    // encode a protocol control message with the default 128-byte chunking
    fn encoder_control(buf: &mut BytesMut, message_type: u8, payload: Bytes) {
        let encoder = ChunkEncoder::new();
        encoder.encode(
            &RtmpMessage::new(CSID_PROTOCOL_CONTROL, 0, message_type, 0, payload),
            buf,
        );
    }

    #[test]
    fn test_byte_at_a_time_reassembly() {
        let encoder = ChunkEncoder::new();
        let messages: Vec<RtmpMessage> = (0..5).map(|i| media_message(i * 40, 300)).collect();

        let mut wire = BytesMut::new();
        for m in &messages {
            encoder.encode(m, &mut wire);
        }

        // whole-buffer decode
        let mut whole_decoder = ChunkDecoder::new();
        let mut whole_buf = wire.clone();
        let mut whole = Vec::new();
        while let Some(m) = whole_decoder.decode(&mut whole_buf).unwrap() {
            whole.push(m);
        }

        // one byte at a time
        let mut drip_decoder = ChunkDecoder::new();
        let mut drip_buf = BytesMut::new();
        let mut dripped = Vec::new();
        for byte in wire.iter() {
            drip_buf.put_u8(*byte);
            while let Some(m) = drip_decoder.decode(&mut drip_buf).unwrap() {
                dripped.push(m);
            }
        }

        assert_eq!(whole.len(), messages.len());
        assert_eq!(dripped.len(), messages.len());
        for (a, b) in whole.iter().zip(dripped.iter()) {
            assert_same(a, b);
        }
    }

    #[test]
    fn test_set_chunk_size_mid_stream() {
        // ten messages at 128, then Set Chunk Size 4096, then more messages
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();

        let mut sent = Vec::new();
        for i in 0..10 {
            let m = media_message(i * 40, 600);
            encoder.encode(&m, &mut wire);
            sent.push(m);
        }

        let mut payload = BytesMut::new();
        payload.put_u32(4096);
        encoder_control(&mut wire, MSG_SET_CHUNK_SIZE, payload.freeze());
        encoder.set_chunk_size(4096);

        for i in 10..20 {
            let m = media_message(i * 40, 600);
            encoder.encode(&m, &mut wire);
            sent.push(m);
        }

        let mut received = Vec::new();
        while let Some(m) = decoder.decode(&mut wire).unwrap() {
            received.push(m);
        }

        assert_eq!(received.len(), sent.len());
        for (a, b) in sent.iter().zip(received.iter()) {
            assert_same(a, b);
        }
        assert_eq!(decoder.in_chunk_size(), 4096);
    }

    #[test]
    fn test_extended_timestamp_roundtrip() {
        let original = media_message(0x0100_0000, 400);
        let encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();

        let mut wire = BytesMut::new();
        encoder.encode(&original, &mut wire);
        let decoded = decoder.decode(&mut wire).unwrap().unwrap();
        assert_same(&original, &decoded);
    }

    #[test]
    fn test_fresh_cid_must_use_fmt0() {
        // fmt=3 on a cid the decoder has never seen
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();
        wire.put_u8(0xC6); // fmt=3, cid=6
        let err = decoder.decode(&mut wire).unwrap_err();
        assert!(err.to_string().contains("fresh cid"));
    }

    #[test]
    fn test_fmt1_tolerated_on_protocol_control_cid() {
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();
        // fmt=1 on cid=2 carrying a window ack size message
        wire.put_u8(0x42);
        wire.put_slice(&[0, 0, 0]); // delta
        wire.put_slice(&[0, 0, 4]); // length
        wire.put_u8(MSG_WINDOW_ACK_SIZE);
        wire.put_u32(250_000);
        // absorbed internally, nothing surfaced, no error
        assert!(decoder.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn test_continuation_header_change_rejected() {
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();

        // fmt=0, cid=6, 300-byte message: first chunk carries 128 bytes
        wire.put_u8(0x06);
        wire.put_slice(&[0, 0, 0]); // timestamp
        wire.put_slice(&[0, 1, 44]); // length 300
        wire.put_u8(MSG_VIDEO);
        wire.put_u32_le(1);
        wire.put_slice(&vec![0u8; 128]);
        assert!(decoder.decode(&mut wire).unwrap().is_none());

        // continuation claims a different length
        wire.put_u8(0x46); // fmt=1, cid=6
        wire.put_slice(&[0, 0, 0]);
        wire.put_slice(&[0, 1, 45]); // length 301: violation
        wire.put_u8(MSG_VIDEO);
        wire.put_slice(&vec![0u8; 128]);
        let err = decoder.decode(&mut wire).unwrap_err();
        assert!(err.to_string().contains("mid-message"));
    }

    #[test]
    fn test_delta_timestamps_accumulate() {
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();

        // fmt=0 at t=1000
        wire.put_u8(0x06);
        wire.put_slice(&[0x00, 0x03, 0xE8]);
        wire.put_slice(&[0, 0, 2]);
        wire.put_u8(MSG_VIDEO);
        wire.put_u32_le(1);
        wire.put_slice(&[1, 2]);

        // fmt=2 delta 40
        wire.put_u8(0x86);
        wire.put_slice(&[0x00, 0x00, 0x28]);
        wire.put_slice(&[3, 4]);

        // fmt=3 inherits delta 40
        wire.put_u8(0xC6);
        wire.put_slice(&[5, 6]);

        let m1 = decoder.decode(&mut wire).unwrap().unwrap();
        let m2 = decoder.decode(&mut wire).unwrap().unwrap();
        let m3 = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(m1.timestamp, 1000);
        assert_eq!(m2.timestamp, 1040);
        assert_eq!(m3.timestamp, 1080);
    }

    #[test]
    fn test_ack_accounting() {
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();

        // shrink the window via a peer Window Ack Size message
        let encoder = ChunkEncoder::new();
        let mut payload = BytesMut::new();
        payload.put_u32(1000);
        encoder.encode(
            &RtmpMessage::new(CSID_PROTOCOL_CONTROL, 0, MSG_WINDOW_ACK_SIZE, 0, payload.freeze()),
            &mut wire,
        );
        assert!(decoder.decode(&mut wire).unwrap().is_none());
        assert!(decoder.take_ack_due().is_none());

        decoder.add_bytes_received(999);
        assert!(decoder.take_ack_due().is_none());
        decoder.add_bytes_received(1);
        assert_eq!(decoder.take_ack_due(), Some(1000));
        // counter reset
        assert!(decoder.take_ack_due().is_none());
    }

    #[test]
    fn test_encoder_chunk_size_clamped() {
        let mut encoder = ChunkEncoder::new();
        encoder.set_chunk_size(1);
        assert_eq!(encoder.chunk_size(), MIN_CHUNK_SIZE);
        encoder.set_chunk_size(1_000_000);
        assert_eq!(encoder.chunk_size(), MAX_CHUNK_SIZE);
    }
}
