//! Per-connection state machine and the backpressure-driven write loop.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::engine::transport::{TargetEndpoint, Transport, TransportFactory};
use crate::metrics::MetricsSink;

/// Scratch buffer inbound bytes are discarded through.
const DISCARD_BUF_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// Why a session reached `Closed`. A closed session is discarded, never
/// reused; a new connection means a new session.
#[derive(Debug)]
pub enum CloseReason {
    /// Peer closed the connection in an orderly way.
    Clean,
    /// Peer forcibly reset the connection. Expected churn under load; kept
    /// out of the exceptions counter and out of the logs.
    PeerReset,
    /// Any other transport error while active.
    Failed(io::Error),
    /// The connect attempt itself failed. Never counted as an exception.
    ConnectFailed(io::Error),
    /// The run is shutting down and the session was told to close.
    Shutdown,
}

enum IoEvent {
    Cancelled,
    Readable(io::Result<()>),
    Writable(io::Result<()>),
}

/// One logical connection attempt plus its active lifetime. Owns its
/// transport for that whole span and runs on a single execution context, so
/// none of its fields need locking.
pub struct ConnectionSession {
    id: u64,
    state: SessionState,
    payload: Bytes,
    metrics: Arc<MetricsSink>,
    cancel: CancellationToken,
}

impl ConnectionSession {
    pub fn new(
        id: u64,
        payload: Bytes,
        metrics: Arc<MetricsSink>,
        cancel: CancellationToken,
    ) -> Self {
        debug_assert!(!payload.is_empty());
        Self {
            id,
            state: SessionState::Connecting,
            payload,
            metrics,
            cancel,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session from the connect attempt to `Closed` and reports
    /// the reason. Every lifecycle event is recorded in the metrics sink on
    /// the way through.
    pub async fn run<F: TransportFactory>(
        mut self,
        factory: &F,
        endpoint: &TargetEndpoint,
    ) -> CloseReason {
        match self.connect(factory, endpoint).await {
            Ok(mut transport) => {
                let reason = self.drive(&mut transport).await;
                let _ = transport.close().await;
                self.close_with(reason)
            }
            Err(reason) => self.close_with(reason),
        }
    }

    async fn connect<F: TransportFactory>(
        &mut self,
        factory: &F,
        endpoint: &TargetEndpoint,
    ) -> Result<F::Conn, CloseReason> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CloseReason::Shutdown),
            res = factory.connect(endpoint) => match res {
                Ok(conn) => {
                    self.on_established();
                    Ok(conn)
                }
                Err(err) => {
                    warn!(session = self.id, error = %err, "connect attempt failed");
                    Err(CloseReason::ConnectFailed(err))
                }
            }
        }
    }

    /// CONNECTING -> ACTIVE.
    fn on_established(&mut self) {
        self.state = SessionState::Active;
        self.metrics.established.inc();
        debug!(session = self.id, "connection established");
    }

    /// The write loop. Re-entered on entering ACTIVE, on every
    /// writability-changed notification, and on completion of the previous
    /// send; at most one payload send is in flight at any time and nothing
    /// here polls or busy-waits.
    async fn drive<T: Transport>(&mut self, transport: &mut T) -> CloseReason {
        let mut scratch = [0u8; DISCARD_BUF_LEN];
        let mut cursor = 0usize;
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => IoEvent::Cancelled,
                res = transport.readable() => IoEvent::Readable(res),
                res = transport.writable() => IoEvent::Writable(res),
            };
            let outcome = match event {
                IoEvent::Cancelled => Some(CloseReason::Shutdown),
                IoEvent::Readable(Ok(())) => self.on_readable(transport, &mut scratch),
                IoEvent::Writable(Ok(())) => self.on_writable(transport, &mut cursor),
                IoEvent::Readable(Err(err)) | IoEvent::Writable(Err(err)) => {
                    Some(classify_error(err))
                }
            };
            if let Some(reason) = outcome {
                return reason;
            }
        }
    }

    /// Inbound data is discarded unread; the scratch buffer is reused and
    /// its contents dropped on every path.
    fn on_readable<T: Transport>(
        &mut self,
        transport: &T,
        scratch: &mut [u8],
    ) -> Option<CloseReason> {
        match transport.try_read(scratch) {
            Ok(0) => Some(CloseReason::Clean),
            Ok(_) => None,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(err) => Some(classify_error(err)),
        }
    }

    /// One turn of the write cycle: advance the in-flight send while the
    /// transport reports capacity. A new send begins only after the previous
    /// payload has been fully handed off.
    fn on_writable<T: Transport>(&mut self, transport: &T, cursor: &mut usize) -> Option<CloseReason> {
        match transport.try_write(&self.payload[*cursor..]) {
            Ok(n) => {
                *cursor += n;
                if *cursor == self.payload.len() {
                    *cursor = 0;
                    self.metrics.mark_request();
                }
                None
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(err) => Some(classify_error(err)),
        }
    }

    /// Terminal transition. `closed` counts ACTIVE -> CLOSED only; a failed
    /// connect never reached ACTIVE and is not a closure.
    fn close_with(&mut self, reason: CloseReason) -> CloseReason {
        if self.state == SessionState::Active {
            self.metrics.closed.inc();
        }
        self.state = SessionState::Closed;
        match &reason {
            CloseReason::Failed(err) => {
                self.metrics.exceptions.inc();
                error!(session = self.id, error = %err, "transport error while sending payload");
            }
            CloseReason::Clean => {
                debug!(session = self.id, "peer closed connection");
            }
            CloseReason::Shutdown => {
                debug!(session = self.id, "session closed for shutdown");
            }
            CloseReason::PeerReset | CloseReason::ConnectFailed(_) => {}
        }
        reason
    }
}

fn classify_error(err: io::Error) -> CloseReason {
    if err.kind() == io::ErrorKind::ConnectionReset {
        CloseReason::PeerReset
    } else {
        CloseReason::Failed(err)
    }
}
