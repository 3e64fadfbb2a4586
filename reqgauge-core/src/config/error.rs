//! Settings loading errors.

use thiserror::Error;

/// Errors reading or parsing a settings file.
///
/// Validation of the settings themselves happens when the resulting
/// [`PrometheusConfig`](crate::prometheus::PrometheusConfig) is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// I/O error reading the settings file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Empty settings file.
    #[error("configuration file is empty")]
    EmptyConfigFile,
}
