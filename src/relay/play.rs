//! Play agent: drains a source's queue into one player transport
//!
//! The agent is write-driven: the source pushes copies of every published
//! message into the agent's bounded queue, and the drain loop batches them
//! onto the transport. Reads from the player (pause, acks) are handled by
//! the session's read loop, not here.
//!
//! Merged writes: one RTMP audio or video message covers roughly 14 ms of
//! stream time, so a latency budget of `mw_latency` milliseconds allows
//! batching up to `mw_latency / 14` messages per syscall. Sequence headers
//! and metadata flush immediately so a fresh player is never left waiting
//! for its decoder config.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::chunk::ChunkEncoder;
use crate::relay::jitter::{Algorithm, Jitter};
use crate::relay::message::StreamMessage;
use crate::relay::source::Source;

/// Approximate stream milliseconds covered by one audio or video message
const MS_PER_MESSAGE: u64 = 14;

/// Queue depth for a sink: scaled to the batching window with a hard floor
pub fn queue_depth(mw_latency: u64) -> usize {
    ((mw_latency / MS_PER_MESSAGE) as usize * 4).max(16)
}

/// Play agent state for one subscriber
pub struct PlayAgent {
    session_id: u64,
    source: Arc<Source>,
    rx: mpsc::Receiver<StreamMessage>,
    jitter: Jitter,
    algorithm: Algorithm,
    /// Messages per batch; 1 disables batching
    group_size: usize,
    /// Flush tick for half-filled batches
    mw_latency: Duration,
}

impl PlayAgent {
    /// Create the agent and the sender half the source will feed.
    pub fn new(
        session_id: u64,
        source: Arc<Source>,
        mw_latency: u64,
        batching: bool,
    ) -> (Self, mpsc::Sender<StreamMessage>) {
        let (tx, rx) = mpsc::channel(queue_depth(mw_latency));

        let group_size = if batching && mw_latency > 0 {
            ((mw_latency / MS_PER_MESSAGE) as usize).max(1)
        } else {
            1
        };

        let agent = Self {
            session_id,
            source,
            rx,
            jitter: Jitter::new(),
            algorithm: Algorithm::Full,
            group_size,
            mw_latency: Duration::from_millis(mw_latency.max(MS_PER_MESSAGE)),
        };
        (agent, tx)
    }

    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        self.algorithm = algorithm;
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Drain the queue into `writer` until the queue closes or the write
    /// side fails.
    ///
    /// Queue closure means the source evicted this sink (overflow) or shut
    /// down; either way the player session is over.
    pub async fn pump<W>(
        &mut self,
        writer: &mut W,
        encoder: &ChunkEncoder,
        stream_id: u32,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut batch: Vec<StreamMessage> = Vec::with_capacity(self.group_size);

        loop {
            let received = tokio::time::timeout(self.mw_latency, self.rx.recv()).await;
            match received {
                Ok(Some(mut message)) => {
                    message.timestamp = self.jitter.correct(message.timestamp, self.algorithm);
                    let urgent = message.is_sequence_header();
                    batch.push(message);

                    if urgent || batch.len() >= self.group_size {
                        self.flush(writer, encoder, stream_id, &mut batch).await?;
                    }
                }
                Ok(None) => {
                    // deliver what we have before reporting the eviction
                    self.flush(writer, encoder, stream_id, &mut batch).await?;
                    return Err(Error::SlowSinkEvicted);
                }
                Err(_) => {
                    // latency budget elapsed with a partial batch
                    self.flush(writer, encoder, stream_id, &mut batch).await?;
                }
            }
        }
    }

    /// Encode the batch into one buffer and write it with a single syscall.
    async fn flush<W>(
        &self,
        writer: &mut W,
        encoder: &ChunkEncoder,
        stream_id: u32,
        batch: &mut Vec<StreamMessage>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if batch.is_empty() {
            return Ok(());
        }

        let mut buf = BytesMut::with_capacity(batch.iter().map(|m| m.payload.len() + 18).sum());
        for message in batch.drain(..) {
            let mut wire = message.to_wire();
            wire.stream_id = stream_id;
            encoder.encode(&wire, &mut buf);
        }

        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Deregister from the source. Safe to call more than once.
    pub async fn close(&self) {
        self.source.unflow(self.session_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chunk::{ChunkDecoder, RtmpMessage};
    use crate::protocol::constants::MSG_VIDEO;
    use bytes::{Bytes, BytesMut};

    fn video(timestamp: u64) -> StreamMessage {
        StreamMessage::from_wire(&RtmpMessage::new(
            6,
            timestamp as u32,
            MSG_VIDEO,
            1,
            Bytes::from_static(&[0x17, 0x01, 0, 0, 0, 0xAA]),
        ))
    }

    fn video_sh() -> StreamMessage {
        StreamMessage::from_wire(&RtmpMessage::new(
            6,
            0,
            MSG_VIDEO,
            1,
            Bytes::from_static(&[0x17, 0x00, 0, 0, 0]),
        ))
    }

    #[test]
    fn test_queue_depth_floor_and_scaling() {
        assert_eq!(queue_depth(0), 16);
        assert_eq!(queue_depth(14), 16);
        assert_eq!(queue_depth(350), 100);
        assert_eq!(queue_depth(1400), 400);
    }

    #[tokio::test]
    async fn test_pump_writes_messages_in_order() {
        let source = Arc::new(Source::new("/live/test"));
        let (mut agent, tx) = PlayAgent::new(1, source, 0, false);

        for i in 0..5u64 {
            tx.send(video(i * 40)).await.unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        let encoder = ChunkEncoder::new();
        let err = agent.pump(&mut out, &encoder, 1).await.unwrap_err();
        assert!(matches!(err, Error::SlowSinkEvicted));

        // decode what the player would receive
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&out[..]);
        let mut timestamps = Vec::new();
        while let Some(m) = decoder.decode(&mut buf).unwrap() {
            timestamps.push(m.timestamp);
        }
        // jitter Full: starts at zero, 40ms cadence preserved
        assert_eq!(timestamps, vec![0, 40, 80, 120, 160]);
    }

    #[tokio::test]
    async fn test_sequence_header_flushes_immediately() {
        let source = Arc::new(Source::new("/live/test"));
        // large budget: a 10-message batch would otherwise hold messages back
        let (mut agent, tx) = PlayAgent::new(1, source, 350, true);

        tx.send(video_sh()).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        let encoder = ChunkEncoder::new();
        let _ = agent.pump(&mut out, &encoder, 1).await;

        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&out[..]);
        let m = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(m.payload[1], 0x00);
    }

    #[tokio::test]
    async fn test_batching_coalesces_messages() {
        let source = Arc::new(Source::new("/live/test"));
        let (mut agent, tx) = PlayAgent::new(1, source, 350, true);
        assert_eq!(agent.group_size, 25);

        for i in 0..30u64 {
            tx.send(video(i * 40)).await.unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        let encoder = ChunkEncoder::new();
        let _ = agent.pump(&mut out, &encoder, 1).await;

        // everything arrives despite batching
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&out[..]);
        let mut count = 0;
        while decoder.decode(&mut buf).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 30);
    }

    #[tokio::test]
    async fn test_stream_id_rewritten_for_subscriber() {
        let source = Arc::new(Source::new("/live/test"));
        let (mut agent, tx) = PlayAgent::new(1, source, 0, false);

        tx.send(video(0)).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        let encoder = ChunkEncoder::new();
        let _ = agent.pump(&mut out, &encoder, 7).await;

        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&out[..]);
        let m = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(m.stream_id, 7);
    }
}
