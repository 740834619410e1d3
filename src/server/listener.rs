//! RTMP listener: accept loop and session spawning

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::relay::manager::AgentManager;
use crate::server::connection::Session;
use crate::worker::WorkerContainer;

/// RTMP relay server
pub struct RelayServer {
    config: Arc<Config>,
    manager: Arc<AgentManager>,
    wc: Arc<WorkerContainer>,
    next_session_id: AtomicU64,
}

impl RelayServer {
    pub fn new(config: Arc<Config>, wc: Arc<WorkerContainer>) -> Self {
        Self {
            config,
            manager: Arc::new(AgentManager::new()),
            wc,
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn manager(&self) -> &Arc<AgentManager> {
        &self.manager
    }

    /// Bind the configured port and accept until the container quits.
    pub async fn run(&self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.listen);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("listen at {}: {}", addr, e)))?;
        tracing::info!(addr = %addr, "rtmp listening");
        self.serve_on(listener).await
    }

    /// Accept sessions from an already-bound listener until the container
    /// quits.
    pub async fn serve_on(&self, listener: TcpListener) -> Result<()> {
        let mut quit = self.wc.quit_chan();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer_addr)) => {
                            let _ = socket.set_nodelay(true);
                            let session_id =
                                self.next_session_id.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(session_id, peer = %peer_addr, "rtmp accept");
                            self.spawn_session(session_id, socket);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
                _ = quit.changed() => {
                    tracing::info!("listener quitting");
                    self.manager.close().await;
                    return Ok(());
                }
            }
        }
    }

    fn spawn_session(&self, session_id: u64, socket: tokio::net::TcpStream) {
        let session = Session::new(
            session_id,
            socket,
            Arc::clone(&self.config),
            Arc::clone(&self.manager),
            Arc::clone(&self.wc),
        );

        self.wc.spawn("rtmp-session", async move {
            match session.run().await {
                // a busy stream key is an expected rejection, not a fault
                Err(Error::AgentBusy) => {
                    tracing::info!(session_id, "publish rejected: stream busy");
                    Ok(())
                }
                result => result,
            }
        });
    }
}
