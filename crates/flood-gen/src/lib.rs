pub mod engine;
pub mod metrics;

pub use engine::session::{CloseReason, ConnectionSession, SessionState};
pub use engine::supervisor::{ConnectionSupervisor, ShutdownOutcome};
pub use engine::transport::{TargetEndpoint, TcpConnector, Transport, TransportFactory};
pub use metrics::{MetricsSink, MetricsSnapshot};
