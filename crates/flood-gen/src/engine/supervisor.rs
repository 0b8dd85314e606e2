//! Keeps the live-connection count at the configured target under churn.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::session::{CloseReason, ConnectionSession};
use crate::engine::transport::{TargetEndpoint, TransportFactory};
use crate::metrics::MetricsSink;

/// How a shutdown request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every session closed within the grace period (or had already closed).
    Drained,
    /// The grace period elapsed; residual session work was force-terminated.
    ForceTerminated { aborted: usize },
}

struct SupervisorShared<F> {
    endpoint: TargetEndpoint,
    payload: Bytes,
    factory: F,
    metrics: Arc<MetricsSink>,
    cancel: CancellationToken,
    next_session_id: AtomicU64,
}

impl<F: TransportFactory> SupervisorShared<F> {
    /// Replacement policy: every closure triggers exactly one new connect
    /// attempt, unless the run is shutting down. The flag check is the only
    /// synchronization; the decision is idempotent either way.
    fn on_session_closed(&self, reason: &CloseReason) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        debug!(?reason, "scheduling replacement connection");
        true
    }
}

/// Supervises the fleet of connection sessions. Holds no per-session
/// registry: the only invariant is on counts, and sessions reach back in
/// through the shared replacement decision rather than an owning pointer.
pub struct ConnectionSupervisor<F: TransportFactory> {
    shared: Arc<SupervisorShared<F>>,
    target_count: usize,
    drivers: JoinSet<()>,
}

impl<F: TransportFactory + 'static> ConnectionSupervisor<F> {
    pub fn new(
        endpoint: TargetEndpoint,
        payload: Bytes,
        target_count: usize,
        factory: F,
        metrics: Arc<MetricsSink>,
    ) -> Self {
        Self {
            shared: Arc::new(SupervisorShared {
                endpoint,
                payload,
                factory,
                metrics,
                cancel: CancellationToken::new(),
                next_session_id: AtomicU64::new(0),
            }),
            target_count,
            drivers: JoinSet::new(),
        }
    }

    /// The shutting-down flag. Cancelling it is observed by every session
    /// before it would next decide to reconnect.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Issues the initial connect attempts, one driver per target
    /// connection. Each driver owns its succession of sessions for the whole
    /// run.
    pub fn start(&mut self) {
        info!(
            connections = self.target_count,
            endpoint = %self.shared.endpoint,
            "starting load generation"
        );
        for _ in 0..self.target_count {
            let shared = Arc::clone(&self.shared);
            self.drivers.spawn(drive_connection(shared));
        }
    }

    /// Requests every session to close and waits up to `grace` for graceful
    /// quiescence, force-terminating whatever remains. Idempotent: repeated
    /// calls find the token already cancelled and the driver set empty.
    pub async fn shutdown(&mut self, grace: Duration) -> ShutdownOutcome {
        self.shared.cancel.cancel();
        let drained = timeout(grace, async {
            while self.drivers.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if drained {
            debug!("all sessions drained");
            ShutdownOutcome::Drained
        } else {
            let aborted = self.drivers.len();
            warn!(
                grace_ms = grace.as_millis() as u64,
                aborted, "grace period exceeded; force-terminating remaining sessions"
            );
            self.drivers.abort_all();
            while self.drivers.join_next().await.is_some() {}
            ShutdownOutcome::ForceTerminated { aborted }
        }
    }
}

/// One execution context driving a succession of sessions: each closure is
/// followed by exactly one replacement attempt until shutdown. Reconnects
/// are immediate, with no backoff; a refusing peer therefore produces a
/// tight connect loop. That matches the intended saturation behavior.
async fn drive_connection<F: TransportFactory>(shared: Arc<SupervisorShared<F>>) {
    loop {
        if shared.cancel.is_cancelled() {
            return;
        }
        let id = shared.next_session_id.fetch_add(1, Ordering::Relaxed);
        shared.metrics.connect_attempts.inc();
        let session = ConnectionSession::new(
            id,
            shared.payload.clone(),
            Arc::clone(&shared.metrics),
            shared.cancel.clone(),
        );
        let reason = session.run(&shared.factory, &shared.endpoint).await;
        if !shared.on_session_closed(&reason) {
            return;
        }
    }
}
