//! Throughput and lifecycle counters for external reporting.
//!
//! One `MetricsSink` is constructed at startup and handed by `Arc` to the
//! supervisor and every session. All increments are atomic; no caller-side
//! locking is required. The requests meter derives its rates at snapshot
//! time, off the send path.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

pub struct MetricsSink {
    registry: Registry,
    pub connect_attempts: IntCounter,
    pub established: IntCounter,
    pub closed: IntCounter,
    pub exceptions: IntCounter,
    requests_sent: IntCounter,
    meter: Mutex<MeterWindow>,
}

struct MeterWindow {
    started: Instant,
    last_at: Instant,
    last_count: u64,
}

/// Point-in-time view of every counter plus the derived send rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub connect_attempts: u64,
    pub established: u64,
    pub closed: u64,
    pub exceptions: u64,
    pub requests_sent: u64,
    /// Sends per second since startup.
    pub mean_rate: f64,
    /// Sends per second since the previous snapshot.
    pub interval_rate: f64,
}

impl MetricsSink {
    pub fn new() -> Self {
        let registry = Registry::new();
        let connect_attempts = IntCounter::new(
            "floodgen_connect_attempts_total",
            "Connect attempts issued, initial and replacement",
        )
        .expect("metric can be created");
        let established = IntCounter::new(
            "floodgen_established_total",
            "Connections that reached the active state",
        )
        .expect("metric can be created");
        let closed = IntCounter::new(
            "floodgen_closed_total",
            "Active connections that closed, for any reason",
        )
        .expect("metric can be created");
        let exceptions = IntCounter::new(
            "floodgen_exceptions_total",
            "Unexpected transport errors (peer resets excluded)",
        )
        .expect("metric can be created");
        let requests_sent = IntCounter::new(
            "floodgen_requests_total",
            "Payload sends fully handed to the transport",
        )
        .expect("metric can be created");

        let _ = registry.register(Box::new(connect_attempts.clone()));
        let _ = registry.register(Box::new(established.clone()));
        let _ = registry.register(Box::new(closed.clone()));
        let _ = registry.register(Box::new(exceptions.clone()));
        let _ = registry.register(Box::new(requests_sent.clone()));

        let now = Instant::now();
        Self {
            registry,
            connect_attempts,
            established,
            closed,
            exceptions,
            requests_sent,
            meter: Mutex::new(MeterWindow {
                started: now,
                last_at: now,
                last_count: 0,
            }),
        }
    }

    /// Marks one completed payload send.
    pub fn mark_request(&self) {
        self.requests_sent.inc();
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.get()
    }

    /// Reads every counter and advances the meter window. Intended for a
    /// single periodic reporter; concurrent snapshots are safe but share the
    /// interval window.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests_sent.get();
        let mut meter = match self.meter.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let mean_rate = rate(requests, now.duration_since(meter.started));
        let interval_rate = rate(
            requests.saturating_sub(meter.last_count),
            now.duration_since(meter.last_at),
        );
        meter.last_at = now;
        meter.last_count = requests;
        MetricsSnapshot {
            connect_attempts: self.connect_attempts.get(),
            established: self.established.get(),
            closed: self.closed.get(),
            exceptions: self.exceptions.get(),
            requests_sent: requests,
            mean_rate,
            interval_rate,
        }
    }

    /// Prometheus text exposition of the whole registry.
    pub fn render(&self) -> String {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}", e);
        }

        String::from_utf8(buffer).unwrap_or_else(|_| "# Error: Invalid UTF8".to_string())
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
