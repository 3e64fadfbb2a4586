//! [`MetricsOps`] backed by the Prometheus instrument set.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use tracing::debug;

use super::instruments::{InstrumentNames, InstrumentSet, Phase};
use crate::error::{MetricsError, MetricsResult};
use crate::exemplar::{ExemplarLabelSet, ExemplarSampler, flatten};
use crate::ops::{MetricsOps, TerminationKind, method_label, nanos_to_seconds, status_class};
use crate::registry::MetricRegistry;

struct Inner {
    instruments: InstrumentSet,
    sampler: Arc<dyn ExemplarSampler>,
}

/// Recorder handed to middleware. Cheap to clone.
///
/// A recorder that outlives its [`PrometheusMetrics`] keeps accepting writes,
/// but they are no longer exposed by the registry.
#[derive(Clone)]
pub struct PrometheusOps {
    inner: Arc<Inner>,
}

impl PrometheusOps {
    /// Sample once for the write about to happen. An empty map counts as none.
    async fn exemplar(&self) -> MetricsResult<Option<ExemplarLabelSet>> {
        let labels = self
            .inner
            .sampler
            .sample()
            .await
            .map_err(MetricsError::Sampler)?;
        Ok(labels.filter(|l| !l.is_empty()).map(flatten))
    }
}

impl fmt::Debug for PrometheusOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusOps")
            .field("sampler", &self.inner.sampler)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MetricsOps for PrometheusOps {
    async fn increase_active_requests(&self, classifier: Option<&str>) -> MetricsResult<()> {
        let set = &self.inner.instruments;
        set.active_requests
            .get_or_create(&set.active_labels(classifier.unwrap_or_default()))
            .inc();
        Ok(())
    }

    async fn decrease_active_requests(&self, classifier: Option<&str>) -> MetricsResult<()> {
        let set = &self.inner.instruments;
        set.active_requests
            .get_or_create(&set.active_labels(classifier.unwrap_or_default()))
            .dec();
        Ok(())
    }

    async fn record_headers_time(
        &self,
        method: &Method,
        elapsed_nanos: u64,
        classifier: Option<&str>,
    ) -> MetricsResult<()> {
        let exemplar = self.exemplar().await?;
        let set = &self.inner.instruments;
        let labels = set.duration_labels(
            classifier.unwrap_or_default(),
            method_label(method),
            Phase::Headers,
        );
        set.response_duration
            .get_or_create(&labels)
            .observe(nanos_to_seconds(elapsed_nanos), exemplar);
        Ok(())
    }

    async fn record_total_time(
        &self,
        method: &Method,
        status: StatusCode,
        elapsed_nanos: u64,
        classifier: Option<&str>,
    ) -> MetricsResult<()> {
        let exemplar = self.exemplar().await?;
        let set = &self.inner.instruments;
        let classifier = classifier.unwrap_or_default();
        let method = method_label(method);

        set.response_duration
            .get_or_create(&set.duration_labels(classifier, method, Phase::Body))
            .observe(nanos_to_seconds(elapsed_nanos), exemplar.clone());

        let status = status_class(status.as_u16());
        set.request_count
            .get_or_create(&set.count_labels(classifier, method, status.as_str()))
            .inc_by(1, exemplar);
        Ok(())
    }

    async fn record_abnormal_termination(
        &self,
        elapsed_nanos: u64,
        kind: TerminationKind,
        classifier: Option<&str>,
    ) -> MetricsResult<()> {
        let exemplar = self.exemplar().await?;
        let set = &self.inner.instruments;
        let labels = set.termination_labels(
            classifier.unwrap_or_default(),
            kind.label(),
            kind.cause(),
        );
        set.abnormal_terminations
            .get_or_create(&labels)
            .observe(nanos_to_seconds(elapsed_nanos), exemplar);
        Ok(())
    }
}

/// Registered adapter instance.
///
/// Owns the registration of its four instruments and unregisters them when
/// released or dropped. Produced by
/// [`PrometheusConfig::build`](super::PrometheusConfig::build).
pub struct PrometheusMetrics {
    ops: PrometheusOps,
    registry: MetricRegistry,
    names: InstrumentNames,
    released: bool,
}

impl PrometheusMetrics {
    pub(crate) fn new(
        registry: MetricRegistry,
        names: InstrumentNames,
        instruments: InstrumentSet,
        sampler: Arc<dyn ExemplarSampler>,
    ) -> Self {
        Self {
            ops: PrometheusOps {
                inner: Arc::new(Inner {
                    instruments,
                    sampler,
                }),
            },
            registry,
            names,
            released: false,
        }
    }

    /// Recorder for this instance.
    pub fn ops(&self) -> PrometheusOps {
        self.ops.clone()
    }

    pub fn names(&self) -> &InstrumentNames {
        &self.names
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Unregister all four instruments now.
    pub fn release(mut self) {
        self.unregister_all();
    }

    fn unregister_all(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for name in self.names.iter() {
            self.registry.unregister(name);
        }
        debug!(metric = %self.names.request_count, "Released Prometheus metrics adapter");
    }
}

impl Drop for PrometheusMetrics {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

impl fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusMetrics")
            .field("names", &self.names)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::exemplar::{ExemplarLabels, sampler_fn};
    use crate::ops::Cause;
    use crate::prometheus::PrometheusConfig;

    fn build(registry: &MetricRegistry) -> PrometheusMetrics {
        PrometheusConfig::new(registry.clone())
            .with_prefix("t")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_active_requests_gauge() {
        let registry = MetricRegistry::new();
        let metrics = build(&registry);
        let ops = metrics.ops();

        ops.increase_active_requests(None).await.unwrap();
        ops.increase_active_requests(None).await.unwrap();
        ops.increase_active_requests(Some("api")).await.unwrap();
        ops.decrease_active_requests(None).await.unwrap();

        let snapshot = registry.scrape().unwrap();
        assert_eq!(
            snapshot.value(r#"t_active_request_count{classifier=""}"#),
            Some(1.0)
        );
        assert_eq!(
            snapshot.value(r#"t_active_request_count{classifier="api"}"#),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_headers_time_observes_headers_phase() {
        let registry = MetricRegistry::new();
        let metrics = build(&registry);

        metrics
            .ops()
            .record_headers_time(&Method::POST, 250_000_000, Some("upload"))
            .await
            .unwrap();

        let snapshot = registry.scrape().unwrap();
        assert_eq!(
            snapshot.value(
                r#"t_response_duration_seconds_sum{classifier="upload",method="post",phase="headers"}"#
            ),
            Some(0.25)
        );
        assert_eq!(
            snapshot.value(
                r#"t_response_duration_seconds_count{classifier="upload",method="post",phase="headers"}"#
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_total_time_counts_status_class() {
        let registry = MetricRegistry::new();
        let metrics = build(&registry);
        let ops = metrics.ops();

        ops.record_total_time(&Method::GET, StatusCode::NOT_FOUND, 1_000, None)
            .await
            .unwrap();
        ops.record_total_time(&Method::GET, StatusCode::GONE, 1_000, None)
            .await
            .unwrap();

        let snapshot = registry.scrape().unwrap();
        assert_eq!(
            snapshot.value(r#"t_request_count_total{classifier="",method="get",status="4xx"}"#),
            Some(2.0)
        );
        assert_eq!(
            snapshot.value(
                r#"t_response_duration_seconds_count{classifier="",method="get",phase="body"}"#
            ),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn test_abnormal_termination_labels() {
        let registry = MetricRegistry::new();
        let metrics = build(&registry);
        let ops = metrics.ops();

        ops.record_abnormal_termination(10, TerminationKind::Timeout, None)
            .await
            .unwrap();
        ops.record_abnormal_termination(
            10,
            TerminationKind::Error(Some(Cause::named("app::Failure"))),
            None,
        )
        .await
        .unwrap();

        let snapshot = registry.scrape().unwrap();
        assert_eq!(
            snapshot.value(
                r#"t_abnormal_terminations_count{classifier="",termination_type="timeout",cause=""}"#
            ),
            Some(1.0)
        );
        assert_eq!(
            snapshot.value(
                r#"t_abnormal_terminations_count{classifier="",termination_type="error",cause="app::Failure"}"#
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_custom_labels_on_every_instrument() {
        let registry = MetricRegistry::new();
        let metrics = PrometheusConfig::new(registry.clone())
            .with_prefix("c")
            .with_custom_labels(["service"], ["api"])
            .build()
            .unwrap();
        let ops = metrics.ops();

        ops.increase_active_requests(None).await.unwrap();
        ops.record_total_time(&Method::PUT, StatusCode::CREATED, 5, None)
            .await
            .unwrap();

        let snapshot = registry.scrape().unwrap();
        assert_eq!(
            snapshot.value(r#"c_active_request_count{classifier="",service="api"}"#),
            Some(1.0)
        );
        assert_eq!(
            snapshot.value(
                r#"c_request_count_total{classifier="",method="put",status="2xx",service="api"}"#
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_gauge_hooks_skip_sampler() {
        let registry = MetricRegistry::new();
        let metrics = PrometheusConfig::new(registry.clone())
            .with_exemplar_sampler(sampler_fn(|| async {
                Err::<Option<ExemplarLabels>, BoxError>("sampler must not run".into())
            }))
            .build()
            .unwrap();
        let ops = metrics.ops();

        ops.increase_active_requests(None).await.unwrap();
        ops.decrease_active_requests(None).await.unwrap();
        assert!(matches!(
            ops.record_headers_time(&Method::GET, 1, None).await,
            Err(MetricsError::Sampler(_))
        ));
    }

    #[tokio::test]
    async fn test_release_unregisters() {
        let registry = MetricRegistry::new();
        let metrics = build(&registry);
        assert_eq!(registry.len(), 4);

        let ops = metrics.ops();
        metrics.release();
        assert!(registry.is_empty());

        // Writes after release are accepted but not exposed.
        ops.increase_active_requests(None).await.unwrap();
        assert!(!registry.scrape().unwrap().to_string().contains("t_active"));
    }
}
