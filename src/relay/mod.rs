//! The relay core: per-stream fan-out from one publisher to many players

pub mod jitter;
pub mod manager;
pub mod message;
pub mod play;
pub mod publish;
pub mod source;

pub use jitter::{Algorithm, Jitter};
pub use manager::AgentManager;
pub use message::{Muxer, PayloadKind, StreamMessage};
pub use play::PlayAgent;
pub use publish::PublishAgent;
pub use source::Source;
