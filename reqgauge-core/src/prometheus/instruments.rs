//! The four instruments backing one adapter instance.
//!
//! | Suffix | Type | Labels |
//! |--------|------|--------|
//! | `response_duration_seconds` | Histogram | classifier, method, phase |
//! | `active_request_count` | Gauge | classifier |
//! | `request_count` | Counter | classifier, method, status |
//! | `abnormal_terminations` | Histogram | classifier, termination_type, cause |
//!
//! Custom label names follow the fixed ones, in declared order, on every
//! instrument. Counters and histograms carry exemplars; the gauge does not.

use std::sync::Arc;

use prometheus_client::metrics::exemplar::{CounterWithExemplar, HistogramWithExemplars};
use prometheus_client::metrics::family::{Family, MetricConstructor};
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Metric;

use crate::error::MetricsResult;
use crate::exemplar::ExemplarLabelSet;
use crate::registry::MetricRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// Names and defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "http_server";

/// Default bucket boundaries in seconds.
pub const DEFAULT_RESPONSE_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

pub const RESPONSE_DURATION_SUFFIX: &str = "response_duration_seconds";
pub const ACTIVE_REQUEST_COUNT_SUFFIX: &str = "active_request_count";
pub const REQUEST_COUNT_SUFFIX: &str = "request_count";
pub const ABNORMAL_TERMINATIONS_SUFFIX: &str = "abnormal_terminations";

pub(crate) const CLASSIFIER: &str = "classifier";
pub(crate) const METHOD: &str = "method";
pub(crate) const PHASE: &str = "phase";
pub(crate) const STATUS: &str = "status";
pub(crate) const TERMINATION_TYPE: &str = "termination_type";
pub(crate) const CAUSE: &str = "cause";

/// Label names custom labels may not reuse. `le` and `quantile` are claimed
/// by the exposition format itself.
pub(crate) const RESERVED_LABEL_NAMES: &[&str] = &[
    CLASSIFIER,
    METHOD,
    PHASE,
    STATUS,
    TERMINATION_TYPE,
    CAUSE,
    "le",
    "quantile",
];

/// Duration phase of a `response_duration_seconds` observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Headers,
    Body,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Headers => "headers",
            Phase::Body => "body",
        }
    }
}

/// Fully prefixed names of the four instruments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentNames {
    pub response_duration: String,
    pub active_request_count: String,
    pub request_count: String,
    pub abnormal_terminations: String,
}

impl InstrumentNames {
    pub fn with_prefix(prefix: &str) -> Self {
        let name = |suffix: &str| {
            if prefix.is_empty() {
                suffix.to_string()
            } else {
                format!("{prefix}_{suffix}")
            }
        };
        Self {
            response_duration: name(RESPONSE_DURATION_SUFFIX),
            active_request_count: name(ACTIVE_REQUEST_COUNT_SUFFIX),
            request_count: name(REQUEST_COUNT_SUFFIX),
            abnormal_terminations: name(ABNORMAL_TERMINATIONS_SUFFIX),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [
            self.response_duration.as_str(),
            self.active_request_count.as_str(),
            self.request_count.as_str(),
            self.abnormal_terminations.as_str(),
        ]
        .into_iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Families
// ─────────────────────────────────────────────────────────────────────────────

/// Label set of one series: fixed labels followed by custom labels.
pub(crate) type LabelSet = Vec<(String, String)>;

/// Builds histograms with the configured bucket boundaries.
#[derive(Debug, Clone)]
pub(crate) struct BucketedHistogram {
    buckets: Arc<[f64]>,
}

impl MetricConstructor<HistogramWithExemplars<ExemplarLabelSet>> for BucketedHistogram {
    fn new_metric(&self) -> HistogramWithExemplars<ExemplarLabelSet> {
        HistogramWithExemplars::new(self.buckets.iter().copied())
    }
}

pub(crate) type HistogramFamily =
    Family<LabelSet, HistogramWithExemplars<ExemplarLabelSet>, BucketedHistogram>;
pub(crate) type GaugeFamily = Family<LabelSet, Gauge>;
pub(crate) type CounterFamily = Family<LabelSet, CounterWithExemplar<ExemplarLabelSet>>;

/// Instruments of one adapter plus the custom labels appended to every series.
#[derive(Debug)]
pub(crate) struct InstrumentSet {
    pub(crate) response_duration: HistogramFamily,
    pub(crate) active_requests: GaugeFamily,
    pub(crate) request_count: CounterFamily,
    pub(crate) abnormal_terminations: HistogramFamily,
    custom_labels: Vec<(String, String)>,
}

impl InstrumentSet {
    pub(crate) fn new(buckets: &[f64], custom_labels: Vec<(String, String)>) -> Self {
        let constructor = BucketedHistogram {
            buckets: Arc::from(buckets),
        };
        Self {
            response_duration: Family::new_with_constructor(constructor.clone()),
            active_requests: Family::default(),
            request_count: Family::default(),
            abnormal_terminations: Family::new_with_constructor(constructor),
            custom_labels,
        }
    }

    /// Register all four instruments, or none of them.
    ///
    /// On the first failure every instrument registered so far is removed
    /// again and the error is returned.
    pub(crate) fn register(
        &self,
        registry: &MetricRegistry,
        names: &InstrumentNames,
    ) -> MetricsResult<()> {
        let instruments: [(&str, &str, Arc<dyn Metric>); 4] = [
            (
                names.response_duration.as_str(),
                "Response duration in seconds by phase",
                Arc::new(self.response_duration.clone()),
            ),
            (
                names.active_request_count.as_str(),
                "Number of requests currently being served",
                Arc::new(self.active_requests.clone()),
            ),
            (
                names.request_count.as_str(),
                "Completed requests by method and status class",
                Arc::new(self.request_count.clone()),
            ),
            (
                names.abnormal_terminations.as_str(),
                "Duration of requests that ended abnormally, by termination type and cause",
                Arc::new(self.abnormal_terminations.clone()),
            ),
        ];

        let mut registered = Vec::with_capacity(instruments.len());
        for (name, help, metric) in instruments {
            if let Err(err) = registry.register_shared(name, help, metric) {
                for name in registered {
                    registry.unregister(name);
                }
                return Err(err);
            }
            registered.push(name);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Label sets
    // ─────────────────────────────────────────────────────────────────────────

    fn label_set<const N: usize>(&self, fixed: [(&str, &str); N]) -> LabelSet {
        let mut labels = Vec::with_capacity(N + self.custom_labels.len());
        labels.extend(
            fixed
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        );
        labels.extend(self.custom_labels.iter().cloned());
        labels
    }

    pub(crate) fn duration_labels(&self, classifier: &str, method: &str, phase: Phase) -> LabelSet {
        self.label_set([
            (CLASSIFIER, classifier),
            (METHOD, method),
            (PHASE, phase.as_str()),
        ])
    }

    pub(crate) fn active_labels(&self, classifier: &str) -> LabelSet {
        self.label_set([(CLASSIFIER, classifier)])
    }

    pub(crate) fn count_labels(&self, classifier: &str, method: &str, status: &str) -> LabelSet {
        self.label_set([(CLASSIFIER, classifier), (METHOD, method), (STATUS, status)])
    }

    pub(crate) fn termination_labels(
        &self,
        classifier: &str,
        termination_type: &str,
        cause: &str,
    ) -> LabelSet {
        self.label_set([
            (CLASSIFIER, classifier),
            (TERMINATION_TYPE, termination_type),
            (CAUSE, cause),
        ])
    }
}
