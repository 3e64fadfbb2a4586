//! Error types for the metrics facade and its Prometheus adapter.
//!
//! Configuration errors surface from [`PrometheusConfig::build`] before any
//! instrument is registered. Recording errors only come from a caller-supplied
//! exemplar sampler and are handed back to the hook caller untouched.
//!
//! [`PrometheusConfig::build`]: crate::prometheus::PrometheusConfig::build

use thiserror::Error;

/// Boxed error used for caller-supplied collaborators (exemplar samplers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while building, recording into, or scraping metrics.
#[derive(Debug, Error)]
pub enum MetricsError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors (build time)
    // ─────────────────────────────────────────────────────────────────────────
    /// Custom label names and values differ in length.
    #[error("custom label arity mismatch: {names} names but {values} values")]
    LabelArity { names: usize, values: usize },

    /// A custom label name is not a valid Prometheus label name.
    #[error("invalid label name '{name}'")]
    InvalidLabelName { name: String },

    /// A custom label name shadows one of the fixed label names.
    #[error("label name '{name}' is reserved")]
    ReservedLabelName { name: String },

    /// The same custom label name was declared twice.
    #[error("duplicate label name '{name}'")]
    DuplicateLabelName { name: String },

    /// Prefix plus suffix does not form a valid metric name.
    #[error("invalid metric name '{name}'")]
    InvalidMetricName { name: String },

    /// Histogram bucket boundaries are unusable.
    #[error("invalid histogram buckets: {reason}")]
    InvalidBuckets { reason: String },

    /// An instrument with this name is already registered.
    #[error("metric '{name}' is already registered")]
    DuplicateMetric { name: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Recording errors (steady state)
    // ─────────────────────────────────────────────────────────────────────────
    /// The exemplar sampler failed.
    #[error("exemplar sampler failed: {0}")]
    Sampler(#[source] BoxError),

    // ─────────────────────────────────────────────────────────────────────────
    // Scrape errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Encoding the registry into the exposition format failed.
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] std::fmt::Error),
}

impl MetricsError {
    /// Whether this error was detected while validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            MetricsError::LabelArity { .. }
                | MetricsError::InvalidLabelName { .. }
                | MetricsError::ReservedLabelName { .. }
                | MetricsError::DuplicateLabelName { .. }
                | MetricsError::InvalidMetricName { .. }
                | MetricsError::InvalidBuckets { .. }
                | MetricsError::DuplicateMetric { .. }
        )
    }
}

/// Result alias for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;
