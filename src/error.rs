//! Unified error types for rtmp-relay

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Session phase used to label timeout errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    ConnectApp,
    Identify,
    PublishRecv,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Handshake => write!(f, "handshake"),
            Phase::ConnectApp => write!(f, "connect-app"),
            Phase::Identify => write!(f, "identify"),
            Phase::PublishRecv => write!(f, "publish-recv"),
        }
    }
}

/// Unified error type for all relay operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF0 encoding/decoding error
    Amf(AmfError),
    /// Peer offered a handshake we refuse (version byte given)
    UnsupportedHandshake(u8),
    /// Command we refuse in the current session state
    UnsupportedCommand(String),
    /// tcUrl/stream did not resolve to a usable vhost/app/stream key
    InvalidStreamKey(String),
    /// A second publisher arrived for an already-published stream key
    AgentBusy,
    /// Operation not supported by this agent kind
    AgentNotSupported,
    /// FMLE republish: tear down the publish agent and re-identify
    AgentControlRepublish,
    /// Per-phase deadline expired
    Timeout(Phase),
    /// Bounded per-sink queue overflowed; the sink was evicted
    SlowSinkEvicted,
    /// Peer closed or network error ended the session
    TransportClosed,
    /// Invalid configuration
    Config(String),
    /// Container quit signal observed
    Quit,
}

impl Error {
    /// Whether this error is an expected way for a session or task to end,
    /// rather than a fault worth logging loudly.
    pub fn is_normal_quit(&self) -> bool {
        matches!(
            self,
            Error::TransportClosed | Error::Quit | Error::Timeout(_)
        ) || matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }

    /// Whether the session loop should recover by re-identifying the client.
    pub fn is_republish(&self) -> bool {
        matches!(self, Error::AgentControlRepublish)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::UnsupportedHandshake(v) => {
                write!(f, "Unsupported handshake, version {}", v)
            }
            Error::UnsupportedCommand(cmd) => write!(f, "Unsupported command: {}", cmd),
            Error::InvalidStreamKey(s) => write!(f, "Invalid stream key: {}", s),
            Error::AgentBusy => write!(f, "Stream is already being published"),
            Error::AgentNotSupported => write!(f, "Operation not supported by agent"),
            Error::AgentControlRepublish => write!(f, "Publisher requested republish"),
            Error::Timeout(phase) => write!(f, "Timed out during {}", phase),
            Error::SlowSinkEvicted => write!(f, "Sink evicted: queue overflow"),
            Error::TransportClosed => write!(f, "Transport closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Quit => write!(f, "Quit signal"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Amf(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Error::TransportClosed;
        }
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    /// Continuation chunk changed length/type/delta, or a fresh cid opened
    /// with an inheriting fmt
    ChunkFormat(String),
    UnknownMessageType(u8),
    MessageTooLarge { size: u32, max: u32 },
    UnexpectedMessage(String),
    MissingField(String),
    InvalidCommand(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::ChunkFormat(msg) => write!(f, "Chunk format violation: {}", msg),
            ProtocolError::UnknownMessageType(t) => write!(f, "Unknown message type: {}", t),
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::UnexpectedMessage(msg) => write!(f, "Unexpected message: {}", msg),
            ProtocolError::MissingField(field) => write!(f, "Missing required field: {}", field),
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF0 encoding/decoding errors
#[derive(Debug, PartialEq, Eq)]
pub enum AmfError {
    TruncatedInput,
    UnknownMarker(u8),
    InvalidUtf8,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::TruncatedInput => write!(f, "Truncated AMF0 data"),
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF0 marker: 0x{:02x}", m),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF0 string"),
        }
    }
}

impl std::error::Error for AmfError {}
