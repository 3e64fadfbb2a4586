//! Admin server for health checks and metrics.
//!
//! Runs on its own port (default 9464) so scrapes never compete with
//! application traffic:
//!
//! - `GET /health`: liveness
//! - `GET /metrics`: registry scrape, OpenMetrics or Prometheus text
//!   depending on `Accept`

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use reqgauge_core::registry::MetricRegistry;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ServerError;
use crate::ports::admin_port;

/// OpenMetrics 1.0 exposition content type.
pub const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Prometheus text exposition content type.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Admin server configuration.
#[derive(Debug, Clone)]
pub struct AdminServerConfig {
    /// Port to listen on (default: 9464)
    pub port: u16,
    /// Bind address (default: 127.0.0.1)
    pub bind_addr: String,
}

impl Default for AdminServerConfig {
    fn default() -> Self {
        Self {
            port: admin_port(),
            bind_addr: "127.0.0.1".to_string(),
        }
    }
}

impl AdminServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Get the full bind address string.
    pub fn bind_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Shared state for the admin server.
#[derive(Debug, Clone)]
pub struct AdminState {
    pub registry: MetricRegistry,
}

/// Admin server for health checks and metrics.
pub struct AdminServer {
    config: AdminServerConfig,
    state: AdminState,
}

impl AdminServer {
    /// Create a new admin server on the default port.
    ///
    /// ```rust
    /// use reqgauge_core::MetricRegistry;
    /// use reqgauge_server::admin::AdminServer;
    ///
    /// let admin = AdminServer::new(MetricRegistry::new());
    /// let _router = admin.router();
    /// ```
    pub fn new(registry: MetricRegistry) -> Self {
        Self::with_config(registry, AdminServerConfig::default())
    }

    pub fn with_config(registry: MetricRegistry, config: AdminServerConfig) -> Self {
        Self {
            config,
            state: AdminState { registry },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or serve.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let bind_addr = self.config.bind_string();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;

        info!(addr = %bind_addr, "Admin server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Admin server shutting down");
            })
            .await?;

        Ok(())
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Whether the scraper asked for OpenMetrics.
fn wants_openmetrics(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("application/openmetrics-text"))
}

async fn metrics_handler(State(state): State<AdminState>, headers: HeaderMap) -> impl IntoResponse {
    let snapshot = match state.registry.scrape() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
                .into_response();
        }
    };

    if wants_openmetrics(&headers) {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
            snapshot.as_openmetrics().to_string(),
        )
            .into_response()
    } else {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
            snapshot.to_text_format(),
        )
            .into_response()
    }
}
