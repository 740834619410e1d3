//! Per-connection RTMP session
//!
//! Drives one accepted transport through the session state machine:
//!
//! ```text
//! Handshaking -> ConnectApp -> Identified(Publish|Play) -> Streaming -> Closed
//! ```
//!
//! A publisher session reads in a single loop, feeding the relay source.
//! A player session splits: the main loop becomes the queue-drain writer
//! while a small reader task consumes whatever the player sends (pause,
//! acks) until the peer goes away.
//!
//! FMLE republish is recovered here: when a streaming publisher sends
//! FCUnpublish/releaseStream, the publish agent is torn down and the
//! session re-enters identification without closing the transport.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::config::Config;
use crate::error::{Error, Phase, Result};
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, RtmpMessage};
use crate::protocol::constants::*;
use crate::protocol::handshake;
use crate::protocol::message::{self, ConnectParams, RtmpPacket};
use crate::protocol::request::{ConnType, Request};
use crate::relay::manager::AgentManager;
use crate::relay::publish::PublishAgent;
use crate::worker::WorkerContainer;

/// Handshake must complete inside this window
const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(2100);
/// connect() must arrive inside this window
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Each identify-phase command read gets this window
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(5);
/// Publisher idle limit; resets on every received message
const PUBLISH_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// One accepted RTMP session
pub struct Session<S> {
    id: u64,
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    read_buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    request: Request,
    /// NetStream id allocated by createStream
    sid: u32,
    saw_fc_publish: bool,
    config: Arc<Config>,
    manager: Arc<AgentManager>,
    wc: Arc<WorkerContainer>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(
        id: u64,
        stream: S,
        config: Arc<Config>,
        manager: Arc<AgentManager>,
        wc: Arc<WorkerContainer>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            id,
            reader: BufReader::with_capacity(64 * 1024, read_half),
            writer: BufWriter::with_capacity(64 * 1024, write_half),
            read_buf: BytesMut::with_capacity(64 * 1024),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            request: Request::new(),
            sid: 0,
            saw_fc_publish: false,
            config,
            manager,
            wc,
        }
    }

    /// Run the session to completion.
    pub async fn run(mut self) -> Result<()> {
        timeout(
            HANDSHAKE_TIMEOUT,
            handshake::serve(&mut self.reader, &mut self.writer),
        )
        .await
        .map_err(|_| Error::Timeout(Phase::Handshake))??;
        tracing::debug!(session_id = self.id, "handshake ok");

        self.connect_app().await?;
        tracing::debug!(
            session_id = self.id,
            tc_url = %self.request.tc_url,
            "connect app ok"
        );

        loop {
            self.identify().await?;
            self.request.reparse()?;
            tracing::info!(
                session_id = self.id,
                conn_type = %self.request.conn_type,
                stream = %self.request.key(),
                "client identified"
            );

            if self.request.conn_type.is_play() {
                return self.serve_play().await;
            }

            match self.serve_publish().await {
                Err(e) if e.is_republish() => {
                    tracing::info!(session_id = self.id, "republish: re-identifying");
                    self.saw_fc_publish = false;
                    continue;
                }
                result => return result,
            }
        }
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// Read one assembled message, refilling from the transport as needed.
    async fn read_message(&mut self) -> Result<RtmpMessage> {
        loop {
            if let Some(message) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(message);
            }
            let n = self.reader.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::TransportClosed);
            }
            self.decoder.add_bytes_received(n);
        }
    }

    async fn send(&mut self, message: &RtmpMessage) -> Result<()> {
        let mut buf = BytesMut::with_capacity(message.payload.len() + 18);
        self.encoder.encode(message, &mut buf);
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send the Acknowledgement when the peer's window is used up.
    async fn maybe_ack(&mut self) -> Result<()> {
        if let Some(sequence) = self.decoder.take_ack_due() {
            self.send(&message::acknowledgement(sequence)).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // ConnectApp
    // ------------------------------------------------------------------

    async fn connect_app(&mut self) -> Result<()> {
        let command = loop {
            let wire = timeout(CONNECT_TIMEOUT, self.read_message())
                .await
                .map_err(|_| Error::Timeout(Phase::ConnectApp))??;
            if !wire.is_command() {
                continue;
            }
            if let RtmpPacket::Command(command) = message::parse(&wire)? {
                break command;
            }
        };

        if command.name != CMD_CONNECT {
            return Err(Error::UnsupportedCommand(command.name));
        }

        let params = ConnectParams::from_amf(&command.command_object);
        self.request.tc_url = params
            .tc_url
            .clone()
            .unwrap_or_else(|| format!("rtmp://{}/{}", DEFAULT_VHOST, params.app));
        self.request.object_encoding = params.object_encoding;

        self.send(&message::window_ack_size(DEFAULT_WINDOW_ACK_SIZE))
            .await?;
        self.send(&message::set_peer_bandwidth(
            DEFAULT_PEER_BANDWIDTH,
            BANDWIDTH_LIMIT_DYNAMIC,
        ))
        .await?;

        // negotiate our output chunk size before any larger response
        let chunk_size = self.config.chunk_size;
        self.send(&message::set_chunk_size(chunk_size)).await?;
        self.encoder.set_chunk_size(chunk_size);

        self.send(&message::connect_result(
            command.transaction_id,
            params.object_encoding,
        ))
        .await?;
        self.send(&message::on_bw_done()).await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Identify
    // ------------------------------------------------------------------

    async fn identify(&mut self) -> Result<()> {
        loop {
            let wire = timeout(IDENTIFY_TIMEOUT, self.read_message())
                .await
                .map_err(|_| Error::Timeout(Phase::Identify))??;
            if !wire.is_command() {
                continue;
            }
            let command = match message::parse(&wire)? {
                RtmpPacket::Command(c) => c,
                _ => continue,
            };

            match command.name.as_str() {
                CMD_CREATE_STREAM => {
                    self.sid += 1;
                    self.send(&message::create_stream_result(
                        command.transaction_id,
                        self.sid,
                    ))
                    .await?;
                }
                CMD_RELEASE_STREAM => {
                    self.send(&message::simple_result(command.transaction_id))
                        .await?;
                }
                CMD_FC_PUBLISH => {
                    self.saw_fc_publish = true;
                    self.send(&message::simple_result(command.transaction_id))
                        .await?;
                }
                CMD_PUBLISH => {
                    let stream = command
                        .stream_name()
                        .ok_or_else(|| Error::InvalidStreamKey("publish without name".into()))?;
                    self.request.stream = stream.to_string();
                    self.request.conn_type = if self.saw_fc_publish {
                        ConnType::FmlePublish
                    } else {
                        ConnType::FlashPublish
                    };
                    return Ok(());
                }
                CMD_PLAY => {
                    let stream = command
                        .stream_name()
                        .ok_or_else(|| Error::InvalidStreamKey("play without name".into()))?;
                    self.request.stream = stream.to_string();
                    self.request.duration = command
                        .arguments
                        .get(2)
                        .and_then(|v| v.as_number())
                        .unwrap_or(-1.0);
                    self.request.conn_type = ConnType::Play;
                    return Ok(());
                }
                // respond null to other calls so clients keep going
                _ => {
                    self.send(&message::simple_result(command.transaction_id))
                        .await?;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    async fn serve_publish(&mut self) -> Result<()> {
        let key = self.request.key();
        let agent = match self.manager.new_publish(self.id, &key).await {
            Ok(agent) => agent,
            Err(Error::AgentBusy) => {
                self.send(&message::on_status(
                    self.sid,
                    STATUS_LEVEL_ERROR,
                    NS_PUBLISH_BAD_NAME,
                    "Stream is already being published.",
                ))
                .await?;
                return Err(Error::AgentBusy);
            }
            Err(e) => return Err(e),
        };

        // start-publish responses
        if self.request.conn_type == ConnType::FmlePublish {
            self.send(&message::on_fc_publish(self.sid)).await?;
        }
        self.send(&message::on_status(
            self.sid,
            STATUS_LEVEL_STATUS,
            NS_PUBLISH_START,
            "Started publishing stream.",
        ))
        .await?;

        let result = self.publish_loop(&agent).await;
        if matches!(result, Err(Error::AgentControlRepublish)) {
            agent.detach().await;
        } else {
            agent.close().await;
        }

        match &result {
            Err(e) if e.is_normal_quit() => {
                tracing::info!(session_id = self.id, stream = %key, "publisher closed");
            }
            Err(e) if e.is_republish() => {}
            Err(e) => {
                tracing::warn!(session_id = self.id, stream = %key, error = %e, "publisher failed");
            }
            Ok(()) => {}
        }
        result
    }

    async fn publish_loop(&mut self, agent: &PublishAgent) -> Result<()> {
        let mut quit = self.wc.quit_chan();
        loop {
            let wire = tokio::select! {
                read = timeout(PUBLISH_RECV_TIMEOUT, self.read_message()) => {
                    read.map_err(|_| Error::Timeout(Phase::PublishRecv))??
                }
                _ = quit.changed() => return Err(Error::Quit),
            };
            self.maybe_ack().await?;

            match wire.message_type {
                MSG_AUDIO | MSG_VIDEO => agent.on_message(&wire).await,
                MSG_DATA_AMF0 => agent.on_message(&wire).await,
                MSG_COMMAND_AMF0 => {
                    let command = match message::parse(&wire)? {
                        RtmpPacket::Command(c) => c,
                        _ => continue,
                    };
                    match command.name.as_str() {
                        CMD_FC_UNPUBLISH | CMD_RELEASE_STREAM => {
                            // FMLE republish: answer the unpublish sequence,
                            // then let the session loop rebuild the agent
                            self.send(&message::on_fc_unpublish(self.sid)).await?;
                            self.send(&message::simple_result(command.transaction_id))
                                .await?;
                            self.send(&message::on_status(
                                self.sid,
                                STATUS_LEVEL_STATUS,
                                NS_UNPUBLISH_SUCCESS,
                                "Stream is now unpublished",
                            ))
                            .await?;
                            return Err(Error::AgentControlRepublish);
                        }
                        CMD_DELETE_STREAM => return Err(Error::TransportClosed),
                        _ => {
                            self.send(&message::simple_result(command.transaction_id))
                                .await?;
                        }
                    }
                }
                MSG_USER_CONTROL => {}
                other => {
                    tracing::debug!(
                        session_id = self.id,
                        message_type = other,
                        "dropping unexpected message from publisher"
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Play
    // ------------------------------------------------------------------

    async fn serve_play(mut self) -> Result<()> {
        let key = self.request.key();
        let (mw_latency, batching) = self.config.merged_write(&self.request.vhost);

        // register the sink first: cached headers land in the queue now and
        // reach the wire only after the start sequence below
        let mut agent = self
            .manager
            .new_play(self.id, &key, mw_latency, batching)
            .await?;

        // play start sequence
        let sid = if self.sid == 0 { 1 } else { self.sid };
        self.send(&message::stream_begin(sid)).await?;
        self.send(&message::on_status_with_details(
            sid,
            NS_PLAY_RESET,
            "Playing and resetting stream.",
        ))
        .await?;
        self.send(&message::on_status_with_details(
            sid,
            NS_PLAY_START,
            "Started playing stream.",
        ))
        .await?;
        self.send(&message::sample_access(sid)).await?;
        self.send(&message::data_start(sid)).await?;

        // the reader task drains player control traffic; its exit means the
        // peer went away
        let Session {
            id,
            mut reader,
            mut writer,
            mut read_buf,
            mut decoder,
            encoder,
            wc,
            ..
        } = self;

        let (done_tx, done_rx) = oneshot::channel::<()>();
        wc.spawn("play-read", async move {
            let result = async {
                loop {
                    while decoder.decode(&mut read_buf)?.is_some() {
                        // pause/seek are not supported; commands are drained
                    }
                    let n = reader.read_buf(&mut read_buf).await?;
                    if n == 0 {
                        return Err(Error::TransportClosed);
                    }
                }
            }
            .await;
            let _ = done_tx.send(());
            result
        });

        let mut quit = wc.quit_chan();
        let result = tokio::select! {
            pumped = agent.pump(&mut writer, &encoder, sid) => pumped,
            _ = done_rx => Ok(()),
            _ = quit.changed() => Err(Error::Quit),
        };

        agent.close().await;

        match result {
            Err(Error::SlowSinkEvicted) => {
                // queue closed under us: evicted, or the stream shut down.
                // Best effort goodbye before the transport drops.
                let mut buf = BytesMut::new();
                encoder.encode(&message::stream_eof(sid), &mut buf);
                encoder.encode(
                    &message::on_status_with_details(sid, NS_PLAY_STOP, "Stopped playing stream."),
                    &mut buf,
                );
                let _ = writer.write_all(&buf).await;
                let _ = writer.flush().await;

                tracing::warn!(session_id = id, stream = %key, "player queue closed");
                Ok(())
            }
            Err(e) if e.is_normal_quit() => {
                tracing::info!(session_id = id, stream = %key, "player closed");
                Ok(())
            }
            other => other,
        }
    }
}
