use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;

use super::ExclusivityLock;

/// Resolve on the first SIGINT (Ctrl+C) or SIGTERM; returns its name.
pub async fn wait_for_shutdown_signal() -> &'static str {
    tokio::select! {
        _ = signal::ctrl_c() => "SIGINT",
        _ = wait_for_sigterm() => "SIGTERM",
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot install SIGTERM handler");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}

/// Watch for a shutdown signal and ask the run to stop through `cancel`.
///
/// The lock stays held while the run winds down: the runner persists its
/// failure checkpoint and releases the lock itself. Only when it has not
/// returned within `grace` is the lock released here, after which `expired`
/// runs (typically exits the process).
pub fn release_on_signal<C, E>(
    lock: Arc<ExclusivityLock>,
    grace: Duration,
    cancel: C,
    expired: E,
) -> JoinHandle<()>
where
    C: FnOnce(&'static str) + Send + 'static,
    E: FnOnce(&'static str) + Send + 'static,
{
    tokio::spawn(async move {
        let name = wait_for_shutdown_signal().await;
        stop_within(lock, name, grace, cancel, expired).await;
    })
}

async fn stop_within<C, E>(
    lock: Arc<ExclusivityLock>,
    signal: &'static str,
    grace: Duration,
    cancel: C,
    expired: E,
) where
    C: FnOnce(&'static str),
    E: FnOnce(&'static str),
{
    tracing::warn!(signal, "shutdown signal received; cancelling run");
    cancel(signal);
    tokio::time::sleep(grace).await;
    tracing::error!(signal, "run did not stop in time; releasing lock");
    if let Err(e) = lock.release() {
        tracing::error!(error = %e, "failed to release lock on shutdown");
    }
    expired(signal);
}
