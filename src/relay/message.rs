//! The unit of traffic between relay agents
//!
//! A [`StreamMessage`] is built exactly once, when an assembled RTMP message
//! crosses from the chunk codec into the relay; its classification bits are
//! computed there and never change. Copies share the payload buffer (the
//! payload is immutable once assembled) but carry their own timestamp, which
//! is what cached-header replay and jitter correction retouch.

use bytes::Bytes;

use crate::amf::amf0;
use crate::protocol::chunk::RtmpMessage;
use crate::protocol::constants::*;

/// Container format the message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Muxer {
    Rtmp,
    Flv,
    H264,
    Rtsp,
    Ts,
    Aac,
    Mp3,
}

/// Payload classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Audio,
    Video,
    /// Script data (onMetaData and friends)
    Script,
    ProtocolControl,
    UserControl,
    Command,
}

/// A relay message: media, metadata, or command traffic between agents
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub muxer: Muxer,
    pub kind: PayloadKind,
    /// Milliseconds; widened from the 32-bit wire field so jitter math can
    /// use signed deltas without wrapping
    pub timestamp: u64,
    pub stream_id: u32,
    pub payload: Bytes,
    /// H.264 AVC configuration record (codec=AVC, packet type 0)
    pub is_video_sequence_header: bool,
    /// AAC AudioSpecificConfig (codec=AAC, packet type 0)
    pub is_audio_sequence_header: bool,
    /// Script data opening with "onMetaData" or "@setDataFrame"
    pub is_metadata: bool,
}

/// FLV audio format nibble for AAC
const AUDIO_FORMAT_AAC: u8 = 10;
/// FLV video codec nibble for AVC
const VIDEO_CODEC_AVC: u8 = 7;

impl StreamMessage {
    /// Build from an assembled wire message, computing the classification
    /// bits. This is the only constructor used on the receive path.
    pub fn from_wire(message: &RtmpMessage) -> Self {
        let payload = &message.payload;
        let kind = match message.message_type {
            MSG_AUDIO => PayloadKind::Audio,
            MSG_VIDEO => PayloadKind::Video,
            MSG_DATA_AMF0 => PayloadKind::Script,
            MSG_USER_CONTROL => PayloadKind::UserControl,
            MSG_COMMAND_AMF0 => PayloadKind::Command,
            _ => PayloadKind::ProtocolControl,
        };

        let is_video_sequence_header = kind == PayloadKind::Video
            && payload.len() >= 2
            && payload[0] & 0x0F == VIDEO_CODEC_AVC
            && payload[1] == 0;

        let is_audio_sequence_header = kind == PayloadKind::Audio
            && payload.len() >= 2
            && payload[0] >> 4 == AUDIO_FORMAT_AAC
            && payload[1] == 0;

        let is_metadata = kind == PayloadKind::Script && is_metadata_payload(payload);

        Self {
            muxer: Muxer::Rtmp,
            kind,
            timestamp: u64::from(message.timestamp),
            stream_id: message.stream_id,
            payload: payload.clone(),
            is_video_sequence_header,
            is_audio_sequence_header,
            is_metadata,
        }
    }

    /// A copy with the timestamp replaced; classification is preserved.
    pub fn with_timestamp(&self, timestamp: u64) -> Self {
        let mut copy = self.clone();
        copy.timestamp = timestamp;
        copy
    }

    /// Whether this message is one of the cached decoder-priming kinds.
    pub fn is_sequence_header(&self) -> bool {
        self.is_video_sequence_header || self.is_audio_sequence_header || self.is_metadata
    }

    /// Lower this message back onto the wire representation.
    pub fn to_wire(&self) -> RtmpMessage {
        let (cid, message_type) = match self.kind {
            PayloadKind::Audio => (CSID_AUDIO, MSG_AUDIO),
            PayloadKind::Video => (CSID_VIDEO, MSG_VIDEO),
            PayloadKind::Script => (CSID_SCRIPT, MSG_DATA_AMF0),
            PayloadKind::UserControl => (CSID_PROTOCOL_CONTROL, MSG_USER_CONTROL),
            PayloadKind::Command => (CSID_COMMAND, MSG_COMMAND_AMF0),
            PayloadKind::ProtocolControl => (CSID_PROTOCOL_CONTROL, MSG_SET_CHUNK_SIZE),
        };

        RtmpMessage::new(
            cid,
            self.timestamp as u32,
            message_type,
            self.stream_id,
            self.payload.clone(),
        )
    }
}

/// Script payloads are metadata when the first AMF0 value is the string
/// "onMetaData" or "@setDataFrame".
fn is_metadata_payload(payload: &Bytes) -> bool {
    match amf0::decode(payload) {
        Ok((value, _)) => matches!(
            value.as_str(),
            Some(CMD_ON_METADATA) | Some(CMD_SET_DATA_FRAME)
        ),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::{Amf0Object, Amf0Value};

    fn wire(message_type: u8, payload: &[u8]) -> RtmpMessage {
        RtmpMessage::new(6, 0, message_type, 1, Bytes::copy_from_slice(payload))
    }

    #[test]
    fn test_video_sequence_header_detected() {
        // keyframe + AVC, packet type 0
        let m = StreamMessage::from_wire(&wire(MSG_VIDEO, &[0x17, 0x00, 0, 0, 0, 1, 2]));
        assert!(m.is_video_sequence_header);
        assert!(!m.is_audio_sequence_header);
        assert!(!m.is_metadata);
        assert!(m.is_sequence_header());

        // AVC NALU (packet type 1) is not a sequence header
        let m = StreamMessage::from_wire(&wire(MSG_VIDEO, &[0x17, 0x01, 0, 0, 0]));
        assert!(!m.is_video_sequence_header);

        // H.263 is never a sequence header
        let m = StreamMessage::from_wire(&wire(MSG_VIDEO, &[0x12, 0x00]));
        assert!(!m.is_video_sequence_header);
    }

    #[test]
    fn test_audio_sequence_header_detected() {
        // AAC, packet type 0 (AudioSpecificConfig follows)
        let m = StreamMessage::from_wire(&wire(MSG_AUDIO, &[0xAF, 0x00, 0x12, 0x10]));
        assert!(m.is_audio_sequence_header);

        // AAC raw frame
        let m = StreamMessage::from_wire(&wire(MSG_AUDIO, &[0xAF, 0x01, 0xFF]));
        assert!(!m.is_audio_sequence_header);

        // MP3 never has one
        let m = StreamMessage::from_wire(&wire(MSG_AUDIO, &[0x2F, 0x00]));
        assert!(!m.is_audio_sequence_header);
    }

    #[test]
    fn test_metadata_detected() {
        for name in [CMD_ON_METADATA, CMD_SET_DATA_FRAME] {
            let mut obj = Amf0Object::new();
            obj.set("width", 640.0.into());
            let payload =
                amf0::encode_all(&[name.into(), Amf0Value::EcmaArray(obj)]);
            let m = StreamMessage::from_wire(&wire(MSG_DATA_AMF0, &payload));
            assert!(m.is_metadata, "{} should classify as metadata", name);
        }

        let payload = amf0::encode_all(&["somethingElse".into()]);
        let m = StreamMessage::from_wire(&wire(MSG_DATA_AMF0, &payload));
        assert!(!m.is_metadata);
    }

    #[test]
    fn test_copy_preserves_classification() {
        let m = StreamMessage::from_wire(&wire(MSG_VIDEO, &[0x17, 0x00, 0, 0, 0]));
        let copy = m.with_timestamp(9999);
        assert_eq!(copy.timestamp, 9999);
        assert!(copy.is_video_sequence_header);
        assert_eq!(copy.payload, m.payload);
    }

    #[test]
    fn test_wire_roundtrip_keeps_fields() {
        let m = StreamMessage::from_wire(&wire(MSG_AUDIO, &[0xAF, 0x01, 0x55]));
        let w = m.to_wire();
        assert_eq!(w.message_type, MSG_AUDIO);
        assert_eq!(w.cid, CSID_AUDIO);
        assert_eq!(w.stream_id, 1);
        assert_eq!(&w.payload[..], &[0xAF, 0x01, 0x55]);
    }

    #[test]
    fn test_truncated_payloads_do_not_classify() {
        let m = StreamMessage::from_wire(&wire(MSG_VIDEO, &[0x17]));
        assert!(!m.is_video_sequence_header);
        let m = StreamMessage::from_wire(&wire(MSG_AUDIO, &[]));
        assert!(!m.is_audio_sequence_header);
        let m = StreamMessage::from_wire(&wire(MSG_DATA_AMF0, &[]));
        assert!(!m.is_metadata);
    }
}
