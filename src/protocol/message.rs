//! RTMP message parsing and building
//!
//! Sits between the chunk codec and the session state machine: raw
//! [`RtmpMessage`]s whose type is a command, data, or user-control message
//! are parsed into [`RtmpPacket`]s here; responses the server sends are
//! built back into raw messages ready for the chunk encoder.
//!
//! Media messages (audio/video) never pass through this module; they cross
//! into the relay as stream messages with their payload untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{amf0, Amf0Object, Amf0Value};
use crate::error::{ProtocolError, Result};
use crate::protocol::chunk::RtmpMessage;
use crate::protocol::constants::*;

/// Parsed non-media message
#[derive(Debug, Clone)]
pub enum RtmpPacket {
    /// User Control Message (type 4)
    UserControl(UserControlEvent),
    /// AMF0 command (type 20): connect, createStream, publish, play, ...
    Command(Command),
    /// AMF0 data message (type 18): @setDataFrame, onMetaData
    Data(DataMessage),
}

/// User Control event
#[derive(Debug, Clone)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16 },
}

/// RTMP command (connect, publish, play, etc.)
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Command object; Null for most post-connect commands
    pub command_object: Amf0Value,
    /// Positional arguments after the command object
    pub arguments: Vec<Amf0Value>,
    /// Message stream ID the command arrived on
    pub stream_id: u32,
}

impl Command {
    /// First string argument, where commands carry the stream name
    pub fn stream_name(&self) -> Option<&str> {
        self.arguments.first().and_then(|v| v.as_str())
    }
}

/// Data message (@setDataFrame, onMetaData)
#[derive(Debug, Clone)]
pub struct DataMessage {
    pub name: String,
    pub values: Vec<Amf0Value>,
    pub stream_id: u32,
}

/// Connect command parameters pulled out of the command object
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub app: String,
    pub tc_url: Option<String>,
    pub flash_ver: Option<String>,
    pub object_encoding: f64,
}

impl ConnectParams {
    pub fn from_amf(obj: &Amf0Value) -> Self {
        let mut params = ConnectParams::default();
        if let Some(map) = obj.as_object() {
            if let Some(s) = map.get("app").and_then(|v| v.as_str()) {
                params.app = s.to_string();
            }
            params.tc_url = map.get("tcUrl").and_then(|v| v.as_str()).map(String::from);
            params.flash_ver = map
                .get("flashVer")
                .and_then(|v| v.as_str())
                .map(String::from);
            params.object_encoding = map
                .get("objectEncoding")
                .and_then(|v| v.as_number())
                .unwrap_or(0.0);
        }
        params
    }
}

/// Parse a raw message into a packet. Only call for message types this
/// module owns (command, data, user control).
pub fn parse(message: &RtmpMessage) -> Result<RtmpPacket> {
    match message.message_type {
        MSG_USER_CONTROL => parse_user_control(message),
        MSG_COMMAND_AMF0 => parse_command(message),
        MSG_DATA_AMF0 => parse_data(message),
        other => Err(ProtocolError::UnknownMessageType(other).into()),
    }
}

fn parse_user_control(message: &RtmpMessage) -> Result<RtmpPacket> {
    let mut payload = message.payload.clone();
    if payload.len() < 2 {
        return Err(ProtocolError::InvalidChunkHeader.into());
    }
    let event_type = payload.get_u16();

    let need = |payload: &Bytes, n: usize| -> Result<()> {
        if payload.len() < n {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }
        Ok(())
    };

    let event = match event_type {
        UC_STREAM_BEGIN => {
            need(&payload, 4)?;
            UserControlEvent::StreamBegin(payload.get_u32())
        }
        UC_STREAM_EOF => {
            need(&payload, 4)?;
            UserControlEvent::StreamEof(payload.get_u32())
        }
        UC_STREAM_DRY => {
            need(&payload, 4)?;
            UserControlEvent::StreamDry(payload.get_u32())
        }
        UC_SET_BUFFER_LENGTH => {
            need(&payload, 8)?;
            UserControlEvent::SetBufferLength {
                stream_id: payload.get_u32(),
                buffer_ms: payload.get_u32(),
            }
        }
        UC_STREAM_IS_RECORDED => {
            need(&payload, 4)?;
            UserControlEvent::StreamIsRecorded(payload.get_u32())
        }
        UC_PING_REQUEST => {
            need(&payload, 4)?;
            UserControlEvent::PingRequest(payload.get_u32())
        }
        UC_PING_RESPONSE => {
            need(&payload, 4)?;
            UserControlEvent::PingResponse(payload.get_u32())
        }
        other => UserControlEvent::Unknown { event_type: other },
    };

    Ok(RtmpPacket::UserControl(event))
}

fn parse_command(message: &RtmpMessage) -> Result<RtmpPacket> {
    let values = amf0::decode_all(&message.payload)?;
    let mut iter = values.into_iter();

    let name = match iter.next() {
        Some(Amf0Value::String(s)) => s,
        _ => {
            return Err(ProtocolError::InvalidCommand("missing command name".into()).into());
        }
    };
    let transaction_id = match iter.next() {
        Some(Amf0Value::Number(n)) => n,
        _ => {
            return Err(
                ProtocolError::InvalidCommand(format!("{}: missing transaction id", name)).into(),
            );
        }
    };
    let command_object = iter.next().unwrap_or(Amf0Value::Null);
    let arguments: Vec<Amf0Value> = iter.collect();

    Ok(RtmpPacket::Command(Command {
        name,
        transaction_id,
        command_object,
        arguments,
        stream_id: message.stream_id,
    }))
}

fn parse_data(message: &RtmpMessage) -> Result<RtmpPacket> {
    let values = amf0::decode_all(&message.payload)?;
    let mut iter = values.into_iter();

    let name = match iter.next() {
        Some(Amf0Value::String(s)) => s,
        _ => {
            return Err(ProtocolError::InvalidCommand("missing data handler name".into()).into());
        }
    };

    Ok(RtmpPacket::Data(DataMessage {
        name,
        values: iter.collect(),
        stream_id: message.stream_id,
    }))
}

// ============================================================================
// Response builders
// ============================================================================

fn control(message_type: u8, payload: Bytes) -> RtmpMessage {
    RtmpMessage::new(CSID_PROTOCOL_CONTROL, 0, message_type, 0, payload)
}

fn command_message(stream_id: u32, values: &[Amf0Value]) -> RtmpMessage {
    RtmpMessage::new(
        CSID_COMMAND,
        0,
        MSG_COMMAND_AMF0,
        stream_id,
        amf0::encode_all(values),
    )
}

/// Set Chunk Size (type 1)
pub fn set_chunk_size(size: u32) -> RtmpMessage {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(size);
    control(MSG_SET_CHUNK_SIZE, buf.freeze())
}

/// Acknowledgement (type 3)
pub fn acknowledgement(sequence: u32) -> RtmpMessage {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(sequence);
    control(MSG_ACKNOWLEDGEMENT, buf.freeze())
}

/// Window Acknowledgement Size (type 5)
pub fn window_ack_size(size: u32) -> RtmpMessage {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(size);
    control(MSG_WINDOW_ACK_SIZE, buf.freeze())
}

/// Set Peer Bandwidth (type 6)
pub fn set_peer_bandwidth(size: u32, limit_type: u8) -> RtmpMessage {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u32(size);
    buf.put_u8(limit_type);
    control(MSG_SET_PEER_BANDWIDTH, buf.freeze())
}

/// User Control: Stream Begin
pub fn stream_begin(stream_id: u32) -> RtmpMessage {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u16(UC_STREAM_BEGIN);
    buf.put_u32(stream_id);
    control(MSG_USER_CONTROL, buf.freeze())
}

/// User Control: Stream EOF
pub fn stream_eof(stream_id: u32) -> RtmpMessage {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u16(UC_STREAM_EOF);
    buf.put_u32(stream_id);
    control(MSG_USER_CONTROL, buf.freeze())
}

/// `_result` for connect, with the FMS-compatible props and info objects.
/// Field order matters to FMLE; the objects are built in the order the
/// classic servers emit them.
pub fn connect_result(transaction_id: f64, object_encoding: f64) -> RtmpMessage {
    let mut props = Amf0Object::new();
    props.set("fmsVer", format!("FMS/{}", SIG_FMS_VERSION).into());
    props.set("capabilities", 127.0.into());
    props.set("mode", 1.0.into());

    let mut info = Amf0Object::new();
    info.set(STATUS_LEVEL, STATUS_LEVEL_STATUS.into());
    info.set(STATUS_CODE, NC_CONNECT_SUCCESS.into());
    info.set(STATUS_DESCRIPTION, "Connection succeeded".into());
    info.set("objectEncoding", object_encoding.into());

    command_message(
        0,
        &[
            CMD_RESULT.into(),
            transaction_id.into(),
            Amf0Value::Object(props),
            Amf0Value::Object(info),
        ],
    )
}

/// `onBWDone`, sent right after the connect response
pub fn on_bw_done() -> RtmpMessage {
    command_message(0, &[CMD_ON_BW_DONE.into(), 0.0.into(), Amf0Value::Null])
}

/// `_result` for createStream carrying the allocated stream id
pub fn create_stream_result(transaction_id: f64, stream_id: u32) -> RtmpMessage {
    command_message(
        0,
        &[
            CMD_RESULT.into(),
            transaction_id.into(),
            Amf0Value::Null,
            f64::from(stream_id).into(),
        ],
    )
}

/// Plain `_result(null)` used for releaseStream/FCPublish/call
pub fn simple_result(transaction_id: f64) -> RtmpMessage {
    command_message(
        0,
        &[
            CMD_RESULT.into(),
            transaction_id.into(),
            Amf0Value::Null,
            Amf0Value::Undefined,
        ],
    )
}

fn status_object(level: &str, code: &str, description: &str) -> Amf0Object {
    let mut data = Amf0Object::new();
    data.set(STATUS_LEVEL, level.into());
    data.set(STATUS_CODE, code.into());
    data.set(STATUS_DESCRIPTION, description.into());
    data.set(STATUS_CLIENT_ID, SIG_CLIENT_ID.into());
    data
}

/// `onStatus` call on a stream
pub fn on_status(stream_id: u32, level: &str, code: &str, description: &str) -> RtmpMessage {
    command_message(
        stream_id,
        &[
            CMD_ON_STATUS.into(),
            0.0.into(),
            Amf0Value::Null,
            Amf0Value::Object(status_object(level, code, description)),
        ],
    )
}

/// `onStatus` with the stream details field, used in the play start sequence
pub fn on_status_with_details(
    stream_id: u32,
    code: &str,
    description: &str,
) -> RtmpMessage {
    let mut data = Amf0Object::new();
    data.set(STATUS_LEVEL, STATUS_LEVEL_STATUS.into());
    data.set(STATUS_CODE, code.into());
    data.set(STATUS_DESCRIPTION, description.into());
    data.set(STATUS_DETAILS, "stream".into());
    data.set(STATUS_CLIENT_ID, SIG_CLIENT_ID.into());

    command_message(
        stream_id,
        &[
            CMD_ON_STATUS.into(),
            0.0.into(),
            Amf0Value::Null,
            Amf0Value::Object(data),
        ],
    )
}

/// `onFCPublish` notification for FMLE
pub fn on_fc_publish(stream_id: u32) -> RtmpMessage {
    let mut data = Amf0Object::new();
    data.set(STATUS_CODE, NS_PUBLISH_START.into());
    data.set(STATUS_DESCRIPTION, "Started publishing stream.".into());

    command_message(
        stream_id,
        &[
            CMD_ON_FC_PUBLISH.into(),
            0.0.into(),
            Amf0Value::Null,
            Amf0Value::Object(data),
        ],
    )
}

/// `onFCUnpublish` notification for FMLE
pub fn on_fc_unpublish(stream_id: u32) -> RtmpMessage {
    let mut data = Amf0Object::new();
    data.set(STATUS_CODE, NS_UNPUBLISH_SUCCESS.into());
    data.set(STATUS_DESCRIPTION, "Stop publishing stream.".into());

    command_message(
        stream_id,
        &[
            CMD_ON_FC_UNPUBLISH.into(),
            0.0.into(),
            Amf0Value::Null,
            Amf0Value::Object(data),
        ],
    )
}

/// `|RtmpSampleAccess` data message allowing client-side sample access
pub fn sample_access(stream_id: u32) -> RtmpMessage {
    RtmpMessage::new(
        CSID_SCRIPT,
        0,
        MSG_DATA_AMF0,
        stream_id,
        amf0::encode_all(&[CMD_SAMPLE_ACCESS.into(), true.into(), true.into()]),
    )
}

/// `onStatus(NetStream.Data.Start)` data message
pub fn data_start(stream_id: u32) -> RtmpMessage {
    let mut data = Amf0Object::new();
    data.set(STATUS_CODE, NS_DATA_START.into());

    RtmpMessage::new(
        CSID_SCRIPT,
        0,
        MSG_DATA_AMF0,
        stream_id,
        amf0::encode_all(&[CMD_ON_STATUS.into(), Amf0Value::Object(data)]),
    )
}
