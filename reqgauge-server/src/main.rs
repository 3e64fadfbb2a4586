//! ReqGauge demo server.
//!
//! Serves a small instrumented application on the app port and the admin
//! server (`/health`, `/metrics`) on the admin port.

use std::path::PathBuf;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{BoxError, Router};
use clap::Parser;
use reqgauge_core::config::{MetricsSettings, load_settings};
use reqgauge_core::registry::MetricRegistry;
use reqgauge_server::admin::{AdminServer, AdminServerConfig};
use reqgauge_server::error::{ServerError, ServerResult};
use reqgauge_server::middleware::MetricsLayer;
use reqgauge_server::ports::{admin_port, app_port};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower::timeout::TimeoutLayer;
use tracing::{error, info};

/// Requests running longer than this are aborted and counted as timeouts.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Config {
    /// Bind address (default: 0.0.0.0)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Path to YAML metrics settings. Adapter defaults apply when omitted.
    #[arg(long, env = "REQGAUGE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The guard must live until exit so buffered logs are flushed.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli_config = Config::parse();

    if let Err(e) = run(cli_config).await {
        error!(error = %e, "Server failed");
        return Err(e.into());
    }
    Ok(())
}

async fn run(cli_config: Config) -> ServerResult<()> {
    let settings = match &cli_config.config {
        Some(path) => load_settings(path)?,
        None => MetricsSettings::default(),
    };

    let registry = MetricRegistry::new();
    let metrics = settings.into_config(registry.clone()).build()?;
    info!(
        metrics = ?metrics.names(),
        "Metrics adapter registered"
    );

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let admin = AdminServer::with_config(
        registry,
        AdminServerConfig {
            port: admin_port(),
            bind_addr: cli_config.bind.clone(),
        },
    );
    let admin_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = admin.run(admin_shutdown).await {
            error!(error = %e, "Admin server error");
        }
    });

    let layer = MetricsLayer::new(metrics.ops()).with_classifier(|parts| {
        parts
            .uri
            .path()
            .strip_prefix("/status/")
            .map(|_| "status".to_string())
    });
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/slow", get(slow))
        .route("/status/{code}", get(status))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_error))
                .layer(layer)
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        );

    let addr = format!("{}:{}", cli_config.bind, app_port());
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(addr = %addr, "App server listening");

    let app_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { app_shutdown.cancelled().await })
        .await?;

    // Unregisters the instruments before exit.
    metrics.release();
    info!("Shutdown complete");
    Ok(())
}

async fn slow() -> &'static str {
    tokio::time::sleep(REQUEST_TIMEOUT * 2).await;
    "finally"
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn handle_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                shutdown_sigint.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating graceful shutdown");
                    shutdown.cancel();
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                }
            }
        });
    }

    #[cfg(not(unix))]
    let _ = shutdown;
}
