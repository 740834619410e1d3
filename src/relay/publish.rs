//! Publish agent: normalizes publisher traffic into the source
//!
//! The publisher's session read loop hands every assembled media/metadata
//! message to [`PublishAgent::on_message`], which computes the relay
//! message (classification bits included) and writes it into the source.
//! The agent is a message source, never a sink.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::chunk::RtmpMessage;
use crate::relay::message::StreamMessage;
use crate::relay::source::Source;

/// Publish agent for one publisher session
pub struct PublishAgent {
    session_id: u64,
    source: Arc<Source>,
}

impl PublishAgent {
    pub(crate) fn new(session_id: u64, source: Arc<Source>) -> Self {
        Self { session_id, source }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn stream_key(&self) -> &str {
        self.source.key()
    }

    /// Normalize one wire message and fan it out.
    pub async fn on_message(&self, message: &RtmpMessage) {
        let stream_message = StreamMessage::from_wire(message);
        self.source.write(stream_message).await;
    }

    /// Publishers produce messages; pushing one at them is a caller bug.
    pub fn write(&self, _message: StreamMessage) -> Result<()> {
        Err(Error::AgentNotSupported)
    }

    /// Untie from the source, dropping the cached sequence headers so the
    /// next publisher starts clean. Sinks survive for a republish.
    pub async fn close(&self) {
        self.source.untie(self.session_id).await;
    }

    /// Free the source for a republish without dropping the cached headers;
    /// sinks keep their decoder config across the reconnect.
    pub async fn detach(&self) {
        self.source.release(self.session_id).await;
    }
}
