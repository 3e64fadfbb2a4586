//! Prometheus backend for the metrics facade.
//!
//! [`PrometheusConfig`] describes an adapter instance, [`PrometheusConfig::build`]
//! registers its instruments and yields a [`PrometheusMetrics`] resource, and
//! [`PrometheusMetrics::ops`] hands out the [`PrometheusOps`] recorder.

mod config;
pub mod instruments;
mod recorder;

pub use config::PrometheusConfig;
pub use instruments::{
    DEFAULT_PREFIX, DEFAULT_RESPONSE_DURATION_BUCKETS, InstrumentNames, Phase,
};
pub use recorder::{PrometheusMetrics, PrometheusOps};
