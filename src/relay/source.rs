//! Per-stream-key fan-out node
//!
//! One publisher in, any number of players out. The source caches the three
//! decoder-priming messages (metadata, video sequence header, audio sequence
//! header) and replays them into every late-joining sink so the player can
//! decode from its first live frame.
//!
//! A sink entry is a routing relation, not ownership: it holds the play
//! agent's queue sender and nothing else, so dropping the entry is exactly
//! the eviction signal the play side observes.

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::relay::message::StreamMessage;

/// A registered play sink: identity plus its bounded queue
#[derive(Debug)]
struct PlaySink {
    id: u64,
    tx: mpsc::Sender<StreamMessage>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Session id of the tied publisher, when one is live
    upstream: Option<u64>,
    /// Ordered sinks; delivery order follows registration order
    sinks: Vec<PlaySink>,
    /// Cached metadata, replayed first
    msh: Option<StreamMessage>,
    /// Cached video sequence header, replayed second
    vsh: Option<StreamMessage>,
    /// Cached audio sequence header, replayed third
    ash: Option<StreamMessage>,
    /// Timestamp of the most recent message through `write`; cached-header
    /// replays are stamped with it
    last_timestamp: u64,
}

/// Fan-out node for one stream key
#[derive(Debug)]
pub struct Source {
    key: String,
    inner: Mutex<Inner>,
}

impl Source {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Tie a publisher to this source. Rejected when one is already live;
    /// the manager checks first, this is defense in depth.
    pub async fn tie(&self, publisher_id: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.upstream.is_some() {
            return Err(Error::AgentBusy);
        }
        inner.upstream = Some(publisher_id);
        tracing::info!(stream = %self.key, publisher_id, "publisher tied");
        Ok(())
    }

    /// Untie the publisher and drop the cached sequence headers; the next
    /// publisher starts the cache fresh. Sinks stay registered.
    pub async fn untie(&self, publisher_id: u64) {
        let mut inner = self.inner.lock().await;
        if inner.upstream != Some(publisher_id) {
            return;
        }
        inner.upstream = None;
        inner.msh = None;
        inner.vsh = None;
        inner.ash = None;
        tracing::info!(stream = %self.key, publisher_id, "publisher untied");
    }

    /// Free the upstream slot but keep the cached headers: the republish
    /// recovery path, where the same encoder re-ties within the session and
    /// late joiners must stay decodable in the gap.
    pub async fn release(&self, publisher_id: u64) {
        let mut inner = self.inner.lock().await;
        if inner.upstream != Some(publisher_id) {
            return;
        }
        inner.upstream = None;
        tracing::info!(stream = %self.key, publisher_id, "publisher released for republish");
    }

    pub async fn has_upstream(&self) -> bool {
        self.inner.lock().await.upstream.is_some()
    }

    /// Register a play sink and prime it with the cached headers, each a
    /// copy stamped with the source's last timestamp, in cache insertion
    /// order: metadata, video, audio.
    pub async fn flow(&self, sink_id: u64, tx: mpsc::Sender<StreamMessage>) {
        let mut inner = self.inner.lock().await;

        let last_timestamp = inner.last_timestamp;
        let cached = [&inner.msh, &inner.vsh, &inner.ash];
        for message in cached.into_iter().flatten() {
            // a fresh queue always has room for the three priming messages
            let _ = tx.try_send(message.with_timestamp(last_timestamp));
        }

        inner.sinks.push(PlaySink { id: sink_id, tx });
        tracing::info!(
            stream = %self.key,
            sink_id,
            sinks = inner.sinks.len(),
            "sink registered"
        );
    }

    /// Remove a sink by identity. Removing twice is a no-op.
    pub async fn unflow(&self, sink_id: u64) {
        let mut inner = self.inner.lock().await;
        let before = inner.sinks.len();
        inner.sinks.retain(|s| s.id != sink_id);
        if inner.sinks.len() != before {
            tracing::debug!(
                stream = %self.key,
                sink_id,
                sinks = inner.sinks.len(),
                "sink removed"
            );
        }
    }

    pub async fn sink_count(&self) -> usize {
        self.inner.lock().await.sinks.len()
    }

    /// Accept one message from the publisher: refresh the header cache and
    /// copy it to every sink in order.
    ///
    /// A sink whose queue is full is evicted on the spot: blocking here
    /// would stall every other player of the stream. Eviction drops the
    /// sender, which the play side observes as queue closure.
    pub async fn write(&self, message: StreamMessage) {
        let mut inner = self.inner.lock().await;

        inner.last_timestamp = message.timestamp;

        if message.is_metadata {
            tracing::debug!(stream = %self.key, "cache metadata sh");
            inner.msh = Some(message.clone());
        } else if message.is_video_sequence_header {
            tracing::debug!(stream = %self.key, "cache video sh");
            inner.vsh = Some(message.clone());
        } else if message.is_audio_sequence_header {
            tracing::debug!(stream = %self.key, "cache audio sh");
            inner.ash = Some(message.clone());
        }

        let key = &self.key;
        inner.sinks.retain(|sink| {
            match sink.tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        stream = %key,
                        sink_id = sink.id,
                        "slow sink evicted: queue overflow"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Drop every sink and the publisher tie; queue closure tells each play
    /// agent to finish.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.sinks.clear();
        inner.upstream = None;
        inner.msh = None;
        inner.vsh = None;
        inner.ash = None;
    }
}
