//! Error types for the instrumented server.

use reqgauge_core::config::ConfigError;
use reqgauge_core::error::MetricsError;
use thiserror::Error;

/// Errors that stop the server from starting or serving.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Settings file could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metrics adapter could not be built.
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Serving failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
