//! ReqGauge HTTP server integration.
//!
//! This crate contains the tower middleware that drives the metrics facade,
//! the response body wrapper that finishes each request's metrics, and the
//! admin server exposing `/metrics` and `/health`.

pub mod admin;
pub mod body;
pub mod error;
pub mod middleware;
pub mod ports;

pub use body::MetricsBody;
pub use middleware::{MetricsLayer, MetricsService};
