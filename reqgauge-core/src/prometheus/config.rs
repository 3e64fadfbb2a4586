//! Copy-on-write builder for the Prometheus adapter.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::instruments::{
    DEFAULT_PREFIX, DEFAULT_RESPONSE_DURATION_BUCKETS, InstrumentNames, InstrumentSet,
    RESERVED_LABEL_NAMES,
};
use super::recorder::PrometheusMetrics;
use crate::error::{MetricsError, MetricsResult};
use crate::exemplar::{ExemplarSampler, NoExemplar};
use crate::registry::MetricRegistry;

/// Configuration of one Prometheus adapter instance.
///
/// Every `with_*` method consumes the value and returns the updated one, so a
/// base configuration can be cloned and specialised freely. Nothing touches
/// the registry until [`build`](Self::build).
///
/// ```rust
/// use reqgauge_core::prometheus::PrometheusConfig;
/// use reqgauge_core::registry::MetricRegistry;
///
/// let registry = MetricRegistry::new();
/// let metrics = PrometheusConfig::new(registry.clone())
///     .with_prefix("org_http_server")
///     .with_custom_label("service", "checkout")
///     .build()
///     .unwrap();
///
/// assert!(registry.contains("org_http_server_request_count"));
/// drop(metrics);
/// assert!(registry.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    prefix: String,
    registry: MetricRegistry,
    custom_label_names: Vec<String>,
    custom_label_values: Vec<String>,
    sampler: Arc<dyn ExemplarSampler>,
    response_duration_buckets: Vec<f64>,
}

impl PrometheusConfig {
    /// Default configuration registering into `registry`.
    pub fn new(registry: MetricRegistry) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            registry,
            custom_label_names: Vec::new(),
            custom_label_values: Vec::new(),
            sampler: Arc::new(NoExemplar),
            response_duration_buckets: DEFAULT_RESPONSE_DURATION_BUCKETS.to_vec(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_registry(mut self, registry: MetricRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the custom labels.
    ///
    /// Names and values pair up positionally; a length mismatch is reported
    /// by [`build`](Self::build).
    pub fn with_custom_labels<N, V>(
        mut self,
        names: impl IntoIterator<Item = N>,
        values: impl IntoIterator<Item = V>,
    ) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.custom_label_names = names.into_iter().map(Into::into).collect();
        self.custom_label_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Append one custom label.
    pub fn with_custom_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_label_names.push(name.into());
        self.custom_label_values.push(value.into());
        self
    }

    pub fn with_exemplar_sampler(self, sampler: impl ExemplarSampler + 'static) -> Self {
        self.with_shared_exemplar_sampler(Arc::new(sampler))
    }

    pub fn with_shared_exemplar_sampler(mut self, sampler: Arc<dyn ExemplarSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Record without exemplars (the default).
    pub fn without_exemplars(self) -> Self {
        self.with_exemplar_sampler(NoExemplar)
    }

    /// Bucket boundaries, in seconds, for both histograms.
    pub fn with_response_duration_buckets(mut self, buckets: impl IntoIterator<Item = f64>) -> Self {
        self.response_duration_buckets = buckets.into_iter().collect();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn custom_label_names(&self) -> &[String] {
        &self.custom_label_names
    }

    pub fn custom_label_values(&self) -> &[String] {
        &self.custom_label_values
    }

    pub fn response_duration_buckets(&self) -> &[f64] {
        &self.response_duration_buckets
    }

    /// Instrument names this configuration would register.
    pub fn instrument_names(&self) -> InstrumentNames {
        InstrumentNames::with_prefix(&self.prefix)
    }

    /// Check everything [`build`](Self::build) checks, without registering.
    pub fn validate(&self) -> MetricsResult<()> {
        if self.custom_label_names.len() != self.custom_label_values.len() {
            return Err(MetricsError::LabelArity {
                names: self.custom_label_names.len(),
                values: self.custom_label_values.len(),
            });
        }

        let mut seen = HashSet::new();
        for name in &self.custom_label_names {
            if !is_valid_label_name(name) {
                return Err(MetricsError::InvalidLabelName { name: name.clone() });
            }
            if RESERVED_LABEL_NAMES.contains(&name.as_str()) {
                return Err(MetricsError::ReservedLabelName { name: name.clone() });
            }
            if !seen.insert(name.as_str()) {
                return Err(MetricsError::DuplicateLabelName { name: name.clone() });
            }
        }

        validate_buckets(&self.response_duration_buckets)?;

        for name in self.instrument_names().iter() {
            if !is_valid_metric_name(name) {
                return Err(MetricsError::InvalidMetricName {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validate, then register the four instruments.
    ///
    /// Either all four are registered or none is. The returned resource
    /// unregisters them again when released or dropped.
    ///
    /// # Errors
    ///
    /// Any configuration error from [`validate`](Self::validate), or
    /// [`MetricsError::DuplicateMetric`] if an instrument name is taken.
    pub fn build(&self) -> MetricsResult<PrometheusMetrics> {
        self.validate()?;

        let names = self.instrument_names();
        let custom_labels = self
            .custom_label_names
            .iter()
            .cloned()
            .zip(self.custom_label_values.iter().cloned())
            .collect();
        let instruments = InstrumentSet::new(&self.response_duration_buckets, custom_labels);
        instruments.register(&self.registry, &names)?;

        debug!(
            prefix = %self.prefix,
            custom_labels = self.custom_label_names.len(),
            buckets = self.response_duration_buckets.len(),
            "Built Prometheus metrics adapter"
        );

        Ok(PrometheusMetrics::new(
            self.registry.clone(),
            names,
            instruments,
            self.sampler.clone(),
        ))
    }
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`, minus the `__` prefix reserved for internal use.
fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn validate_buckets(buckets: &[f64]) -> MetricsResult<()> {
    let invalid = |reason: &str| MetricsError::InvalidBuckets {
        reason: reason.to_string(),
    };
    if buckets.is_empty() {
        return Err(invalid("at least one bucket is required"));
    }
    if buckets.iter().any(|b| !b.is_finite() || *b <= 0.0) {
        return Err(invalid("boundaries must be positive and finite"));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid("boundaries must be strictly ascending"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PrometheusConfig {
        PrometheusConfig::new(MetricRegistry::new())
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.prefix(), "http_server");
        assert!(config.custom_label_names().is_empty());
        assert_eq!(
            config.response_duration_buckets(),
            [
                0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0
            ]
        );
        assert_eq!(
            config.response_duration_buckets(),
            DEFAULT_RESPONSE_DURATION_BUCKETS
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_methods_leave_original_untouched() {
        let base = config();
        let derived = base.clone().with_prefix("other").with_custom_label("a", "1");
        assert_eq!(base.prefix(), "http_server");
        assert!(base.custom_label_names().is_empty());
        assert_eq!(derived.prefix(), "other");
        assert_eq!(derived.custom_label_names(), ["a".to_string()]);
    }

    #[test]
    fn test_arity_mismatch() {
        let err = config()
            .with_custom_labels(["a", "b"], ["1", "2", "3"])
            .validate()
            .unwrap_err();
        assert!(matches!(err, MetricsError::LabelArity { names: 2, values: 3 }));
    }

    #[test]
    fn test_label_name_rules() {
        for bad in ["", "1abc", "has-dash", "__internal", "sp ace"] {
            let err = config().with_custom_label(bad, "v").validate().unwrap_err();
            assert!(
                matches!(err, MetricsError::InvalidLabelName { .. }),
                "{bad:?} accepted"
            );
        }
        assert!(config().with_custom_label("_ok9", "v").validate().is_ok());
    }

    #[test]
    fn test_reserved_and_duplicate_label_names() {
        let err = config().with_custom_label("method", "x").validate().unwrap_err();
        assert!(matches!(err, MetricsError::ReservedLabelName { .. }));

        let err = config().with_custom_label("le", "x").validate().unwrap_err();
        assert!(matches!(err, MetricsError::ReservedLabelName { .. }));

        let err = config()
            .with_custom_labels(["zone", "zone"], ["a", "b"])
            .validate()
            .unwrap_err();
        assert!(matches!(err, MetricsError::DuplicateLabelName { .. }));
    }

    #[test]
    fn test_bucket_rules() {
        for bad in [
            vec![],
            vec![0.0, 1.0],
            vec![-1.0],
            vec![0.5, 0.5],
            vec![2.0, 1.0],
            vec![1.0, f64::INFINITY],
            vec![f64::NAN],
        ] {
            let err = config()
                .with_response_duration_buckets(bad.clone())
                .validate()
                .unwrap_err();
            assert!(
                matches!(err, MetricsError::InvalidBuckets { .. }),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_metric_name_rules() {
        let err = config().with_prefix("my-app").validate().unwrap_err();
        assert!(matches!(err, MetricsError::InvalidMetricName { .. }));

        assert!(config().with_prefix("ns:app").validate().is_ok());
        assert!(config().with_prefix("").validate().is_ok());
    }

    #[test]
    fn test_invalid_config_registers_nothing() {
        let registry = MetricRegistry::new();
        let result = PrometheusConfig::new(registry.clone())
            .with_custom_labels(["a"], Vec::<String>::new())
            .build();
        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
