//! Concurrent service runner with graceful shutdown.
//!
//! Orchestrates the long-running processes of a service: all processes run
//! concurrently until one fails or a shutdown signal arrives, then every
//! process is cancelled and the registered closers run under a bounded
//! timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A long-running process: receives a cancellation token and runs until
/// cancelled or failed
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxFuture + Send>;

/// A cleanup step executed after every process has stopped
pub type Closer = Box<dyn FnOnce() -> BoxFuture + Send>;

pub struct Runner {
    app_processes: Vec<AppProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            token: CancellationToken::new(),
        }
    }

    /// Register a process. A process returning an error cancels every
    /// other process.
    pub fn with_app_process<F, Fut>(mut self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.app_processes
            .push(Box::new(|token| Box::pin(process(token))));
        self
    }

    /// Register a cleanup step. Closers run after all processes stop,
    /// whatever the reason they stopped.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    /// Bound on the total time all closers may take. Default 10 seconds.
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally controlled cancellation token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Run until every process has stopped, then run the closers. Returns
    /// the first process error, if any.
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.token;
        let mut processes = JoinSet::new();

        for process in self.app_processes {
            let process_token = token.clone();
            processes.spawn(process(process_token));
        }

        spawn_signal_listener(token.clone());

        let mut first_error = None;
        while let Some(joined) = processes.join_next().await {
            match joined {
                Ok(Ok(())) => debug!("app process finished"),
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        error!(error = %format!("{e:#}"), "app process failed");
                        first_error = Some(e);
                    }
                    token.cancel();
                }
                Err(e) => {
                    error!(error = %e, "app process panicked");
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("app process panicked: {e}"));
                    }
                    token.cancel();
                }
            }
        }

        if !self.closers.is_empty() {
            info!(timeout_secs = self.closer_timeout.as_secs(), "running closers");
            match tokio::time::timeout(self.closer_timeout, run_closers(self.closers)).await {
                Ok(()) => info!("all closers finished"),
                Err(_) => error!("closers exceeded timeout, abandoning cleanup"),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        token.cancel();
    });
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Run closers in registration order; a failing closer never blocks the
/// ones after it.
async fn run_closers(closers: Vec<Closer>) {
    for closer in closers {
        if let Err(e) = closer().await {
            error!(error = %format!("{e:#}"), "closer failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancellation_stops_processes_and_runs_closers() {
        let closed = Arc::new(AtomicUsize::new(0));
        let closed_clone = closed.clone();
        let token = CancellationToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = Runner::new()
            .with_cancellation_token(token)
            .with_app_process(|ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .with_closer(move || {
                let closed = closed_clone.clone();
                async move {
                    closed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .run()
            .await;

        assert!(result.is_ok());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_process_cancels_the_rest() {
        let result = Runner::new()
            .with_app_process(|_ctx| async move { anyhow::bail!("boom") })
            .with_app_process(|ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .run()
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_closers_run_in_order_despite_failure() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();

        let result = Runner::new()
            .with_closer(move || {
                let order = first.clone();
                async move {
                    order.lock().unwrap().push("first");
                    anyhow::bail!("cleanup failed")
                }
            })
            .with_closer(move || {
                let order = second.clone();
                async move {
                    order.lock().unwrap().push("second");
                    Ok(())
                }
            })
            .run()
            .await;

        // Closer failures are logged, not propagated
        assert!(result.is_ok());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
