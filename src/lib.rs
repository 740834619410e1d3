//! rtmp-relay: a live-stream relay over RTMP
//!
//! One publisher per stream key, any number of players, with sequence-header
//! caching for late joiners and per-stream timestamp jitter correction.
//!
//! - Server mode for receiving streams from OBS, FMLE, ffmpeg and fanning
//!   them out to RTMP players of the same stream name
//! - Plain RTMP handshake, AMF0 command layer, chunk stream codec
//! - Merged writes on the play path to trade a small latency budget for
//!   fewer syscalls
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtmp_relay::{Config, RelayServer, WorkerContainer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let wc = Arc::new(WorkerContainer::new());
//!     let server = RelayServer::new(config, Arc::clone(&wc));
//!     server.run().await?;
//!     wc.close().await;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use relay::{AgentManager, PlayAgent, PublishAgent, Source, StreamMessage};
pub use server::{RelayServer, Session};
pub use worker::WorkerContainer;
