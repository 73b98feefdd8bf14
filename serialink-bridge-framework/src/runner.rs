//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::backoff::BackoffConfig;
use crate::error::Result;

/// A worker that ran at least this long before failing gets a fresh backoff.
const HEALTHY_RUN: Duration = Duration::from_secs(60);

/// Extra time a worker gets after cancellation when it missed its join deadline.
const STOP_GRACE: Duration = Duration::from_secs(2);

struct Worker {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Bridge runner that manages the lifecycle of a bridge's workers.
///
/// Handles:
/// - Spawning named workers that are restarted with backoff when they fail or panic
/// - Waiting for Ctrl+C, SIGTERM or a programmatic shutdown request
/// - Stopping workers one by one, in the order the caller chooses
///
/// # Example
///
/// ```ignore
/// use serialink_bridge_framework::{BackoffConfig, BridgeRunner};
///
/// let mut runner = BridgeRunner::new("mybridge");
/// runner.spawn_supervised("reader", BackoffConfig::default(), |token| async move {
///     // Worker logic here, returning when `token` is cancelled
///     Ok(())
/// });
///
/// runner.wait_for_shutdown().await;
/// runner.stop_all(Duration::from_secs(5)).await;
/// ```
pub struct BridgeRunner {
    /// Bridge name for logging.
    name: String,
    /// Bridge version.
    version: String,
    /// Programmatic shutdown trigger.
    shutdown: CancellationToken,
    /// Spawned workers, in spawn order.
    workers: Vec<Worker>,
}

impl BridgeRunner {
    /// Create a new bridge runner.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            shutdown: CancellationToken::new(),
            workers: Vec::new(),
        }
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Token that, when cancelled, makes [`wait_for_shutdown`](Self::wait_for_shutdown) return.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Names of workers that have not been stopped yet.
    pub fn workers(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name.as_str()).collect()
    }

    /// Spawn a supervised worker.
    ///
    /// `factory` builds a fresh worker future from the worker's cancellation
    /// token. A worker returning `Ok(())` is finished. A worker returning an
    /// error or panicking is logged and rebuilt after a backoff delay.
    pub fn spawn_supervised<F, Fut>(
        &mut self,
        name: impl Into<String>,
        backoff: BackoffConfig,
        factory: F,
    ) where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let handle = tokio::spawn(supervise(name.clone(), token.clone(), backoff, factory));

        tracing::debug!(bridge = %self.name, worker = %name, "Worker spawned");

        self.workers.push(Worker {
            name,
            token,
            handle,
        });
    }

    /// Wait until Ctrl+C, SIGTERM, or the shutdown token fires.
    pub async fn wait_for_shutdown(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!(bridge = %self.name, "Received Ctrl+C"),
            _ = terminate => tracing::info!(bridge = %self.name, "Received SIGTERM"),
            _ = self.shutdown.cancelled() => tracing::info!(bridge = %self.name, "Shutdown requested"),
        }
    }

    /// Cancel a worker and wait up to `timeout` for it to finish, aborting it
    /// otherwise. Returns true when it finished in time.
    pub async fn stop(&mut self, name: &str, timeout: Duration) -> bool {
        let Some(worker) = self.take(name) else {
            return false;
        };
        worker.token.cancel();
        finish(worker, timeout).await
    }

    /// Wait up to `timeout` for a worker to finish by itself; past that it is
    /// cancelled like [`stop`](Self::stop). Returns true when it finished by itself.
    pub async fn join(&mut self, name: &str, timeout: Duration) -> bool {
        let Some(mut worker) = self.take(name) else {
            return false;
        };

        match tokio::time::timeout(timeout, &mut worker.handle).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(worker = %worker.name, "Worker did not finish in time, cancelling");
                worker.token.cancel();
                finish(worker, STOP_GRACE).await;
                false
            }
        }
    }

    /// Stop every remaining worker in spawn order.
    pub async fn stop_all(&mut self, timeout: Duration) {
        while let Some(worker) = self.workers.first() {
            let name = worker.name.clone();
            self.stop(&name, timeout).await;
        }
    }

    fn take(&mut self, name: &str) -> Option<Worker> {
        let idx = self.workers.iter().position(|w| w.name == name)?;
        Some(self.workers.remove(idx))
    }
}

async fn finish(mut worker: Worker, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, &mut worker.handle).await {
        Ok(_) => {
            tracing::debug!(worker = %worker.name, "Worker stopped");
            true
        }
        Err(_) => {
            tracing::warn!(worker = %worker.name, "Worker did not stop in time, aborting");
            worker.handle.abort();
            false
        }
    }
}

async fn supervise<F, Fut>(
    name: String,
    token: CancellationToken,
    backoff: BackoffConfig,
    mut factory: F,
) where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut backoff = backoff.start();

    while !token.is_cancelled() {
        let started = Instant::now();
        let run = AbortOnDropHandle::new(tokio::spawn(factory(token.clone())));

        match run.await {
            Ok(Ok(())) => break,
            Ok(Err(e)) => {
                tracing::error!(worker = %name, error = %e, "Worker failed");
            }
            Err(e) if e.is_panic() => {
                tracing::error!(worker = %name, "Worker panicked");
            }
            Err(_) => break,
        }

        if started.elapsed() >= HEALTHY_RUN {
            backoff.reset();
        }

        let delay = backoff.next_delay();
        tracing::warn!(
            worker = %name,
            delay_ms = delay.as_millis() as u64,
            "Restarting worker"
        );

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
