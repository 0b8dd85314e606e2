use std::convert::Infallible;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use flood_common::Config;
use flood_gen::engine::orchestrator::{self, RunOptions};
use flood_gen::engine::supervisor::ConnectionSupervisor;
use flood_gen::engine::transport::{TargetEndpoint, TcpConnector};
use flood_gen::metrics::MetricsSink;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// TCP saturation load generator: holds a fixed number of connections to a
/// target and sends the payload file on each as fast as flow control allows.
#[derive(Parser, Debug)]
#[command(name = "flood-gen")]
struct Options {
    /// Hostname or IP of the host to benchmark
    #[arg(short = 'H', long)]
    host: String,

    /// Port to connect to
    #[arg(short, long, default_value_t = 80)]
    port: u16,

    /// Duration of the benchmark in seconds
    #[arg(short, long, default_value_t = 120)]
    duration: u64,

    /// Number of parallel connections
    #[arg(short, long, default_value_t = 8)]
    connections: usize,

    /// Number of IO threads (0 = let the runtime decide)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Shutdown grace period in seconds
    #[arg(short, long, default_value_t = 1)]
    grace: u64,

    /// Optional YAML file with observability and transport settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input file with the payload sent on every request
    payload: PathBuf,
}

fn init_production_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true))
        .init();
}

async fn metrics_handler(
    req: Request<Body>,
    sink: Arc<MetricsSink>,
) -> Result<Response<Body>, Infallible> {
    match req.uri().path() {
        "/health" => Ok(Response::new(Body::from("OK"))),
        "/metrics" => Ok(Response::new(Body::from(sink.render()))),
        _ => {
            let mut not_found = Response::new(Body::from("Not Found"));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

async fn run_metrics_server(port: u16, sink: Arc<MetricsSink>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let make_svc = make_service_fn(move |_conn| {
        let sink = Arc::clone(&sink);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                metrics_handler(req, Arc::clone(&sink))
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);

    info!(port = port, "Observability server online");

    if let Err(e) = server.await {
        error!(error = %e, "Observability server failed");
    }
}

/// Periodic structured throughput report, cancelled with the run.
fn spawn_console_reporter(sink: Arc<MetricsSink>, interval_secs: u64, token: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let snap = sink.snapshot();
                    info!(
                        connect_attempts = snap.connect_attempts,
                        established = snap.established,
                        closed = snap.closed,
                        exceptions = snap.exceptions,
                        requests_sent = snap.requests_sent,
                        rate_per_sec = snap.interval_rate,
                        mean_rate_per_sec = snap.mean_rate,
                        "throughput report"
                    );
                }
                _ = token.cancelled() => break,
            }
        }
    });
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = Options::parse();
    init_production_logging();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if options.threads > 0 {
        builder.worker_threads(options.threads);
    }
    let runtime = builder.build()?;
    runtime.block_on(run(options))
}

async fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = match &options.config {
        Some(path) => serde_yaml::from_str(&fs::read_to_string(path)?)?,
        None => Config::default(),
    };

    if options.connections == 0 {
        return Err("connection count must be positive".into());
    }

    // Fatal startup path: no payload or no resolvable target means the run
    // never begins and no connection is attempted.
    let payload = Bytes::from(fs::read(&options.payload)?);
    if payload.is_empty() {
        return Err("payload file is empty".into());
    }
    let payload_len = payload.len();
    let endpoint = TargetEndpoint::resolve(&options.host, options.port).await?;

    let metrics = Arc::new(MetricsSink::new());

    if config.metrics.enabled {
        let sink = Arc::clone(&metrics);
        let port = config.metrics.port;
        tokio::spawn(async move {
            run_metrics_server(port, sink).await;
        });
    }

    let connector = TcpConnector::new(Duration::from_secs(config.transport.connect_timeout_secs));
    let supervisor = ConnectionSupervisor::new(
        endpoint,
        payload,
        options.connections,
        connector,
        Arc::clone(&metrics),
    );

    spawn_console_reporter(
        Arc::clone(&metrics),
        config.metrics.report_interval_secs,
        supervisor.cancellation_token(),
    );

    info!(
        connections = options.connections,
        duration_secs = options.duration,
        payload_bytes = payload_len,
        "loadgen running"
    );

    let outcome = orchestrator::run(
        supervisor,
        RunOptions {
            duration: Duration::from_secs(options.duration),
            grace: Duration::from_secs(options.grace),
        },
        async {
            let _ = tokio::signal::ctrl_c().await;
        },
    )
    .await;

    let snap = metrics.snapshot();
    info!(
        outcome = ?outcome,
        requests_sent = snap.requests_sent,
        mean_rate_per_sec = snap.mean_rate,
        "run complete"
    );
    Ok(())
}
