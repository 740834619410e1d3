//! Agent manager: the process registry of stream keys
//!
//! Maps `vhost/app/stream` to its [`Source`] and wires new publish/play
//! agents to it. The lock only covers the map lookup; source operations run
//! on the source's own mutex.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::relay::play::PlayAgent;
use crate::relay::publish::PublishAgent;
use crate::relay::source::Source;

/// Process-wide registry, held by handle from program entry down
#[derive(Debug, Default)]
pub struct AgentManager {
    sources: Mutex<HashMap<String, Arc<Source>>>,
}

impl AgentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create the source for a stream key.
    async fn source_for(&self, key: &str) -> Arc<Source> {
        let mut sources = self.sources.lock().await;
        if let Some(source) = sources.get(key) {
            return Arc::clone(source);
        }
        let source = Arc::new(Source::new(key));
        sources.insert(key.to_string(), Arc::clone(&source));
        tracing::debug!(stream = %key, "source created");
        source
    }

    /// Existing source for a key, if any.
    pub async fn source(&self, key: &str) -> Option<Arc<Source>> {
        self.sources.lock().await.get(key).map(Arc::clone)
    }

    /// Attach a publisher. Fails with `AgentBusy` when the stream key
    /// already has one; the first publisher is unaffected.
    pub async fn new_publish(&self, session_id: u64, key: &str) -> Result<PublishAgent> {
        let source = self.source_for(key).await;
        source.tie(session_id).await?;
        Ok(PublishAgent::new(session_id, source))
    }

    /// Attach a player. No exclusivity: any number may play one key.
    /// Registration primes the new sink with the cached sequence headers.
    pub async fn new_play(
        &self,
        session_id: u64,
        key: &str,
        mw_latency: u64,
        batching: bool,
    ) -> Result<PlayAgent> {
        let source = self.source_for(key).await;
        let (agent, tx) = PlayAgent::new(session_id, Arc::clone(&source), mw_latency, batching);
        source.flow(session_id, tx).await;
        Ok(agent)
    }

    /// Close every source; play queues close and their sessions finish.
    pub async fn close(&self) {
        let sources = self.sources.lock().await;
        for source in sources.values() {
            source.close().await;
        }
    }

    pub async fn source_count(&self) -> usize {
        self.sources.lock().await.len()
    }
}
