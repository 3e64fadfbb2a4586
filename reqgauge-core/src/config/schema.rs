//! Settings schema.

use serde::Deserialize;

use crate::exemplar::{NoExemplar, TraceContextSampler};
use crate::prometheus::{DEFAULT_PREFIX, PrometheusConfig};
use crate::registry::MetricRegistry;

/// Adapter settings as read from YAML. Omitted fields keep adapter defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSettings {
    #[serde(default)]
    pub prefix: Option<String>,

    /// Histogram bucket boundaries in seconds.
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,

    #[serde(default)]
    pub custom_labels: Vec<CustomLabel>,

    #[serde(default)]
    pub exemplars: ExemplarMode,
}

/// One static label appended to every series.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomLabel {
    pub name: String,
    pub value: String,
}

/// Which exemplar sampler to install.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemplarMode {
    #[default]
    None,
    /// Trace id of the current OpenTelemetry span.
    TraceContext,
}

impl MetricsSettings {
    /// Effective prefix.
    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX)
    }

    /// Adapter configuration registering into `registry`.
    ///
    /// Nothing is validated here; [`PrometheusConfig::build`] does that.
    pub fn into_config(self, registry: MetricRegistry) -> PrometheusConfig {
        let mut config = PrometheusConfig::new(registry).with_prefix(self.prefix());
        if let Some(buckets) = self.buckets {
            config = config.with_response_duration_buckets(buckets);
        }
        for label in self.custom_labels {
            config = config.with_custom_label(label.name, label.value);
        }
        match self.exemplars {
            ExemplarMode::None => config.with_exemplar_sampler(NoExemplar),
            ExemplarMode::TraceContext => config.with_exemplar_sampler(TraceContextSampler),
        }
    }
}
