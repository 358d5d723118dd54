//! Process lifecycle
//!
//! [`Daemon`] owns the cancellation token observed by every background task
//! and the stack of their join handles. Shutdown cancels the token, then
//! joins the tasks in reverse start order within the configured timeout.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A named background task
struct Task {
    name: String,
    handle: JoinHandle<()>,
}

pub struct Daemon {
    shutdown: CancellationToken,
    tasks: Vec<Task>,
    shutdown_timeout: Duration,
}

impl Daemon {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            shutdown_timeout,
        }
    }

    /// Token cancelled when shutdown starts
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register a background task; tasks are stopped in reverse order
    pub fn push(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.push(Task {
            name: name.into(),
            handle,
        });
    }

    /// Block until SIGINT or SIGTERM, then shut down
    pub async fn run_until_signal(self) -> Result<()> {
        tokio::select! {
            res = wait_for_signal() => res?,
            _ = self.shutdown.cancelled() => info!("Shutdown requested"),
        }
        self.shutdown().await
    }

    /// Cancel every task and wait for them to finish
    ///
    /// Fails when the tasks did not stop within the shutdown timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down");
        self.shutdown.cancel();

        let timeout = self.shutdown_timeout;
        let join_all = async {
            while let Some(task) = self.tasks.pop() {
                match task.handle.await {
                    Ok(()) => info!("Stopped {}", task.name),
                    Err(e) => error!("Task {} failed: {}", task.name, e),
                }
            }
        };

        if tokio::time::timeout(timeout, join_all).await.is_err() {
            warn!("Shutdown did not complete within {}s", timeout.as_secs());
            anyhow::bail!("Shutdown timed out after {}s", timeout.as_secs());
        }

        info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to register Ctrl+C handler")?;
    info!("Received Ctrl+C");
    Ok(())
}
