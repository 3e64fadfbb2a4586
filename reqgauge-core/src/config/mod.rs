//! File-based adapter settings.
//!
//! ```yaml
//! prefix: org_http_server
//! buckets: [0.01, 0.1, 1.0]
//! custom_labels:
//!   - name: service
//!     value: checkout
//! exemplars: trace_context
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{load_settings, parse_settings};
pub use schema::{CustomLabel, ExemplarMode, MetricsSettings};
