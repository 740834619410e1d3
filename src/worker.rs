//! Supervised task container
//!
//! Structured concurrency for the server: tasks are spawned through the
//! container so shutdown can be multicast and joined. Every task gets a
//! recovery boundary that separates the normal ways a task ends (peer went
//! away, quit signal, idle timeout during shutdown) from real faults, which
//! are logged with their error chain.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Container for all worker tasks of one server
pub struct WorkerContainer {
    quit_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicUsize>,
}

impl WorkerContainer {
    pub fn new() -> Self {
        let (quit_tx, _) = watch::channel(false);
        Self {
            quit_tx,
            handles: Mutex::new(Vec::new()),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A receiver that resolves when [`quit`](Self::quit) is called.
    /// Tasks select on this alongside their own I/O.
    pub fn quit_chan(&self) -> watch::Receiver<bool> {
        self.quit_tx.subscribe()
    }

    /// Multicast the shutdown signal. Idempotent: repeat calls are no-ops.
    pub fn quit(&self) {
        quit_once(&self.quit_tx);
    }

    /// Whether quit has been signaled.
    pub fn is_quitting(&self) -> bool {
        *self.quit_tx.borrow()
    }

    /// Spawn a named task under this container.
    ///
    /// The recovery boundary logs faults and swallows normal-quit errors;
    /// the task counter always decrements when the task ends.
    pub fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.running.fetch_add(1, Ordering::SeqCst);
        let name = name.to_string();
        let quit_tx = self.quit_tx.clone();
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            match future.await {
                Ok(()) => {
                    tracing::debug!(task = %name, "task finished");
                }
                Err(e) if e.is_normal_quit() => {
                    tracing::debug!(task = %name, reason = %e, "task quit");
                }
                Err(e) => {
                    tracing::error!(task = %name, error = %e, "task failed");
                    if matches!(e, Error::Config(_)) {
                        // unrecoverable at task level: bring the container down
                        quit_once(&quit_tx);
                    }
                }
            }
            running.fetch_sub(1, Ordering::SeqCst);
        });

        self.handles.lock().unwrap().push(handle);
    }

    /// Number of spawned tasks still running.
    pub fn task_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal quit and join every spawned task.
    pub async fn close(&self) {
        self.quit();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "task panicked");
                }
            }
        }
    }
}

fn quit_once(quit_tx: &watch::Sender<bool>) {
    quit_tx.send_if_modified(|quitting| {
        if *quitting {
            false
        } else {
            *quitting = true;
            true
        }
    });
}

impl Default for WorkerContainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_and_join() {
        let wc = WorkerContainer::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        wc.spawn("unit", async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        wc.close().await;
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(wc.task_count(), 0);
    }

    #[tokio::test]
    async fn test_quit_signal_reaches_tasks() {
        let wc = WorkerContainer::new();
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);
        let mut quit = wc.quit_chan();

        wc.spawn("waiter", async move {
            quit.changed().await.ok();
            flag.store(true, Ordering::SeqCst);
            Err(Error::Quit)
        });

        wc.quit();
        wc.close().await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_quit_is_idempotent() {
        let wc = WorkerContainer::new();
        wc.quit();
        wc.quit();
        wc.quit();
        assert!(wc.is_quitting());
        wc.close().await;
    }

    #[tokio::test]
    async fn test_fault_does_not_kill_siblings() {
        let wc = WorkerContainer::new();
        let sibling_done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&sibling_done);

        wc.spawn("faulty", async move { Err(Error::AgentBusy) });
        wc.spawn("sibling", async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        // give the fault time to (not) propagate
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!wc.is_quitting());

        wc.close().await;
        assert!(sibling_done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_config_fault_triggers_quit() {
        let wc = WorkerContainer::new();
        let mut quit = wc.quit_chan();

        wc.spawn("fatal", async move { Err(Error::Config("broken".into())) });

        tokio::time::timeout(Duration::from_secs(1), quit.changed())
            .await
            .expect("quit should be signaled")
            .unwrap();
        wc.close().await;
    }
}
