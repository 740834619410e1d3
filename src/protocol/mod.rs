//! RTMP wire protocol: handshake, chunk framing, messages, requests

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;
pub mod request;

pub use chunk::{ChunkDecoder, ChunkEncoder, RtmpMessage};
pub use message::{Command, ConnectParams, DataMessage, RtmpPacket, UserControlEvent};
pub use request::{ConnType, Request};
