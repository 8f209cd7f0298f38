//! Storage Capability Controller
//!
//! Watches StorageClasses, VolumeSnapshotClasses and StorageClassCapabilities
//! and keeps one capability object per StorageClass, derived by probing the
//! CSI driver that provisions it.

use clap::Parser;
use hyper::{Body, Request, Response, StatusCode};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_capability_controller::{
    CapabilityController, ConnectSettings, ControllerConfig, CsiProber, Error,
    KubeCapabilityStore, Metrics, ProberConfig, RateLimiterConfig, Result, SocketDirResolver,
    Sources,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Capability Controller - derives StorageClassCapability objects from CSI drivers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of concurrent reconcile workers
    #[arg(long, env = "WORKERS", default_value = "5")]
    workers: usize,

    /// Directory holding one subdirectory per CSI driver
    #[arg(long, env = "PLUGIN_DIR", default_value = "/var/lib/kubelet/plugins")]
    plugin_dir: String,

    /// Socket file name inside each driver directory
    #[arg(long, env = "SOCKET_NAME", default_value = "csi.sock")]
    socket_name: String,

    /// Driver connect timeout in seconds
    #[arg(long, env = "CONNECT_TIMEOUT", default_value = "5")]
    connect_timeout_secs: u64,

    /// Per-probe RPC timeout in seconds
    #[arg(long, env = "RPC_TIMEOUT", default_value = "10")]
    rpc_timeout_secs: u64,

    /// Requeue delay after the first failure, in milliseconds
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "5")]
    retry_base_delay_ms: u64,

    /// Upper bound on the requeue delay, in seconds
    #[arg(long, env = "RETRY_MAX_DELAY", default_value = "1000")]
    retry_max_delay_secs: u64,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn controller_config(&self) -> Result<ControllerConfig> {
        if self.workers == 0 {
            return Err(Error::Configuration("workers must be at least 1".into()));
        }
        Ok(ControllerConfig {
            workers: self.workers,
            rate_limiter: RateLimiterConfig {
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_secs(self.retry_max_delay_secs),
            },
        })
    }

    fn prober_config(&self) -> ProberConfig {
        ProberConfig {
            connect: ConnectSettings {
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                ..Default::default()
            },
            rpc_timeout: Duration::from_secs(self.rpc_timeout_secs),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting Storage Capability Controller");
    info!("  Version: {}", storage_capability_controller::VERSION);
    info!("  Workers: {}", args.workers);
    info!("  Plugin dir: {}", args.plugin_dir);
    info!("  Metrics: {}", args.metrics_addr);

    let config = args.controller_config()?;
    let metrics_addr: SocketAddr = args.metrics_addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    let registry = Registry::new();
    let metrics = Metrics::new(&registry)?;

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let stop = CancellationToken::new();
    let sources = Sources::new();
    let resolver = Arc::new(SocketDirResolver::new(&args.plugin_dir, &args.socket_name));
    let controller = CapabilityController::new(
        config,
        sources.clone(),
        Arc::new(KubeCapabilityStore::new(client.clone())),
        Arc::new(CsiProber::new(args.prober_config())),
        resolver,
        metrics,
    );

    // Handlers are registered, so nothing is missed once the watches start
    let watches = sources.watch(client, &stop);

    let server = tokio::spawn(run_metrics_server(
        metrics_addr,
        registry,
        controller.clone(),
        stop.clone(),
    ));
    tokio::spawn(shutdown_on_signal(stop.clone()));

    let result = controller.run(stop.clone()).await;
    stop.cancel();

    for watch in watches {
        if let Err(e) = watch.await {
            error!("Watch task failed: {}", e);
        }
    }
    match server.await {
        Ok(Err(e)) => error!("Metrics server error: {}", e),
        Err(e) => error!("Metrics server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    result?;
    info!("Controller shutdown complete");
    Ok(())
}

// =============================================================================
// Signals
// =============================================================================

async fn shutdown_on_signal(stop: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
        _ = stop.cancelled() => return,
    }
    stop.cancel();
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |d: &str| {
        d.parse::<Directive>()
            .map_err(|e| Error::Configuration(format!("Invalid log directive {}: {}", d, e)))
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("kube=info")?)
        .add_directive(directive("tower=warn")?)
        .add_directive(directive("h2=warn")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Metrics & Health Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    registry: Registry,
    controller: Arc<CapabilityController>,
    stop: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::Server;

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        let controller = controller.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let response = route(&req, &registry, &controller);
                async move { Ok::<_, std::convert::Infallible>(response) }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Metrics server bind error: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(stop.cancelled_owned())
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

fn route(
    req: &Request<Body>,
    registry: &Registry,
    controller: &CapabilityController,
) -> Response<Body> {
    match req.uri().path() {
        "/healthz" | "/livez" => text(StatusCode::OK, "ok"),
        "/readyz" if controller.is_ready() => text(StatusCode::OK, "ok"),
        "/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, "caches not synced"),
        "/metrics" => {
            use prometheus::{Encoder, TextEncoder};

            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
                error!("Failed to encode metrics: {}", e);
                return text(StatusCode::INTERNAL_SERVER_ERROR, "encode error");
            }
            let mut response = Response::new(Body::from(buffer));
            if let Ok(content_type) = encoder.format_type().parse() {
                response
                    .headers_mut()
                    .insert(hyper::header::CONTENT_TYPE, content_type);
            }
            response
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}
