//! Exemplar samplers.
//!
//! A sampler is consulted once per counter or histogram write and may return
//! a small label map (typically a trace id) that is attached to the recorded
//! point. Sampling is async so a sampler can await request-scoped state.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use opentelemetry::Context;
use opentelemetry::trace::TraceContextExt;

use crate::error::BoxError;

/// Label map attached to a recorded point.
pub type ExemplarLabels = BTreeMap<String, String>;

/// Flattened exemplar label set, in key order.
pub(crate) type ExemplarLabelSet = Vec<(String, String)>;

/// Produces the exemplar for the observation being recorded.
#[async_trait]
pub trait ExemplarSampler: Send + Sync + fmt::Debug {
    /// Sample the current exemplar, or `None` to record without one.
    async fn sample(&self) -> Result<Option<ExemplarLabels>, BoxError>;
}

/// Sampler that never produces an exemplar.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExemplar;

#[async_trait]
impl ExemplarSampler for NoExemplar {
    async fn sample(&self) -> Result<Option<ExemplarLabels>, BoxError> {
        Ok(None)
    }
}

/// Sampler backed by an async closure. Build with [`sampler_fn`].
#[derive(Clone)]
pub struct SampleFn<F> {
    f: F,
}

/// Wrap an async closure as an [`ExemplarSampler`].
///
/// ```rust
/// use reqgauge_core::exemplar::{ExemplarLabels, sampler_fn};
///
/// let sampler = sampler_fn(|| async {
///     let labels = ExemplarLabels::from([("trace_id".to_string(), "123".to_string())]);
///     Ok(Some(labels))
/// });
/// # let _ = sampler;
/// ```
pub fn sampler_fn<F, Fut>(f: F) -> SampleFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<ExemplarLabels>, BoxError>> + Send + 'static,
{
    SampleFn { f }
}

impl<F> fmt::Debug for SampleFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> ExemplarSampler for SampleFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<ExemplarLabels>, BoxError>> + Send + 'static,
{
    async fn sample(&self) -> Result<Option<ExemplarLabels>, BoxError> {
        (self.f)().await
    }
}

/// Samples the trace id of the current OpenTelemetry span context.
///
/// Produces `{"trace_id": "<32 hex chars>"}` when the current context carries
/// a valid, sampled span; `None` otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceContextSampler;

impl TraceContextSampler {
    pub const TRACE_ID_LABEL: &'static str = "trace_id";

    fn labels_for(cx: &Context) -> Option<ExemplarLabels> {
        let span = cx.span();
        let span_context = span.span_context();
        if !span_context.is_valid() || !span_context.is_sampled() {
            return None;
        }
        Some(ExemplarLabels::from([(
            Self::TRACE_ID_LABEL.to_string(),
            span_context.trace_id().to_string(),
        )]))
    }
}

#[async_trait]
impl ExemplarSampler for TraceContextSampler {
    async fn sample(&self) -> Result<Option<ExemplarLabels>, BoxError> {
        Ok(Self::labels_for(&Context::current()))
    }
}

/// Flatten a sampled map into the ordered pairs the exemplar encoder expects.
pub(crate) fn flatten(labels: ExemplarLabels) -> ExemplarLabelSet {
    labels.into_iter().collect()
}
