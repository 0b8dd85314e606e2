//! Deadline and shutdown orchestration for a bounded run.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::engine::supervisor::{ConnectionSupervisor, ShutdownOutcome};
use crate::engine::transport::TransportFactory;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Total run duration; the shutdown deadline is armed one second early
    /// so the grace period fits inside it.
    pub duration: Duration,
    /// How long sessions get to close before force-termination.
    pub grace: Duration,
}

/// Starts the supervisor, blocks until the deadline fires or the external
/// interrupt resolves, then drives shutdown fully and reports the outcome.
/// This is the only place in the system that truly blocks on anything.
pub async fn run<F, I>(
    mut supervisor: ConnectionSupervisor<F>,
    opts: RunOptions,
    interrupt: I,
) -> ShutdownOutcome
where
    F: TransportFactory + 'static,
    I: Future<Output = ()>,
{
    supervisor.start();
    let deadline = opts.duration.saturating_sub(Duration::from_secs(1));
    tokio::select! {
        _ = sleep(deadline) => {
            info!(after_secs = deadline.as_secs(), "run deadline reached, shutting down");
        }
        _ = interrupt => {
            info!("interrupt received, shutting down");
        }
    }
    supervisor.shutdown(opts.grace).await
}
