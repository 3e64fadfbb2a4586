//! ReqGauge Core: request-level HTTP metrics.
//!
//! This library provides the backend-neutral recording facade ([`ops`]), the
//! instrument registry ([`registry`]), the Prometheus adapter
//! ([`prometheus`]), exemplar samplers ([`exemplar`]) and file-based adapter
//! settings ([`config`]) used by the middleware in `reqgauge-server`.

pub mod config;
pub mod error;
pub mod exemplar;
pub mod ops;
pub mod prometheus;
pub mod registry;

pub use error::{BoxError, MetricsError, MetricsResult};
pub use ops::{Cause, MetricsOps, NoopOps, TerminationKind};
pub use prometheus::{PrometheusConfig, PrometheusMetrics, PrometheusOps};
pub use registry::{MetricRegistry, MetricsSnapshot};
