//! Process-wide registry of named instruments.
//!
//! `prometheus_client::registry::Registry` is append-only, so instruments are
//! kept here by name instead. Every `prometheus-client` metric is a cheap
//! handle over shared state, which lets [`MetricRegistry::scrape`] assemble a
//! throwaway `prometheus_client` registry per scrape and hand it to the text
//! encoder.
//!
//! # Operations
//!
//! - [`register`](MetricRegistry::register) fails with
//!   [`MetricsError::DuplicateMetric`] when the name is taken
//! - [`unregister`](MetricRegistry::unregister) removes an instrument
//! - [`scrape`](MetricRegistry::scrape) produces an immutable [`MetricsSnapshot`]

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeMetric, MetricEncoder};
use prometheus_client::metrics::MetricType;
use prometheus_client::registry::{Metric, Registry};
use tracing::debug;

use crate::error::{MetricsError, MetricsResult};

struct Entry {
    help: String,
    metric: Arc<dyn Metric>,
}

/// Shared, thread-safe collection of named instruments.
///
/// Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct MetricRegistry {
    entries: Arc<RwLock<BTreeMap<String, Entry>>>,
}

impl MetricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `metric` under `name`.
    ///
    /// # Errors
    ///
    /// [`MetricsError::DuplicateMetric`] if the name is already registered.
    pub fn register(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
        metric: impl Metric,
    ) -> MetricsResult<()> {
        self.register_shared(name, help, Arc::new(metric))
    }

    /// Register an instrument the caller already holds behind an `Arc`.
    pub fn register_shared(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
        metric: Arc<dyn Metric>,
    ) -> MetricsResult<()> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(MetricsError::DuplicateMetric { name });
        }
        debug!(metric = %name, "Registered metric");
        entries.insert(
            name,
            Entry {
                help: help.into(),
                metric,
            },
        );
        Ok(())
    }

    /// Remove the instrument registered under `name`.
    ///
    /// Returns `false` if nothing was registered under that name.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.entries.write().remove(name).is_some();
        if removed {
            debug!(metric = %name, "Unregistered metric");
        }
        removed
    }

    /// Whether an instrument is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Registered names in lexical order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Read every instrument's current state.
    ///
    /// The registration table is only locked while the encoder registry is
    /// assembled; instrument values are read afterwards, each atomically.
    pub fn scrape(&self) -> MetricsResult<MetricsSnapshot> {
        let mut registry = Registry::default();
        {
            let entries = self.entries.read();
            for (name, entry) in entries.iter() {
                registry.register(
                    name.clone(),
                    entry.help.clone(),
                    SharedMetric(entry.metric.clone()),
                );
            }
        }

        let mut text = String::new();
        prometheus_client::encoding::text::encode(&mut text, &registry)?;
        Ok(MetricsSnapshot { text })
    }
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Registry-owned handle re-registered into each scrape registry.
#[derive(Debug)]
struct SharedMetric(Arc<dyn Metric>);

impl EncodeMetric for SharedMetric {
    fn encode(&self, encoder: MetricEncoder) -> Result<(), fmt::Error> {
        self.0.encode(encoder)
    }

    fn metric_type(&self) -> MetricType {
        self.0.metric_type()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable point-in-time read of a [`MetricRegistry`], in OpenMetrics text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    text: String,
}

impl MetricsSnapshot {
    /// OpenMetrics 1.0 exposition, including exemplars and `# EOF`.
    pub fn as_openmetrics(&self) -> &str {
        &self.text
    }

    /// Prometheus text exposition (format 0.0.4).
    ///
    /// Drops `# EOF`, `# UNIT` and exemplars, and names counter families with
    /// their `_total` sample name.
    pub fn to_text_format(&self) -> String {
        let counters: HashSet<&str> = self
            .text
            .lines()
            .filter_map(|line| line.strip_prefix("# TYPE "))
            .filter_map(|rest| rest.strip_suffix(" counter"))
            .collect();

        let mut out = String::with_capacity(self.text.len());
        for line in self.text.lines() {
            if line == "# EOF" || line.starts_with("# UNIT ") {
                continue;
            }
            if let Some(rewritten) = rename_counter_descriptor(line, &counters) {
                out.push_str(&rewritten);
            } else if line.starts_with('#') {
                out.push_str(line);
            } else {
                out.push_str(strip_exemplar(line));
            }
            out.push('\n');
        }
        out
    }

    /// Value of the sample whose series (name plus label set, exactly as
    /// exposed) is `series`.
    pub fn value(&self, series: &str) -> Option<f64> {
        let rest = self.sample_rest(series)?;
        rest.split_whitespace().next()?.parse().ok()
    }

    /// Exemplar label set (`{...}`) attached to the sample `series`, if any.
    pub fn exemplar(&self, series: &str) -> Option<&str> {
        let rest = self.sample_rest(series)?;
        let (_, exemplar) = rest.split_once(" # ")?;
        let end = exemplar.find('}')?;
        Some(&exemplar[..=end])
    }

    fn sample_rest(&self, series: &str) -> Option<&str> {
        self.text
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| line.strip_prefix(series)?.strip_prefix(' '))
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn rename_counter_descriptor(line: &str, counters: &HashSet<&str>) -> Option<String> {
    for kind in ["# HELP ", "# TYPE "] {
        if let Some(rest) = line.strip_prefix(kind) {
            let (name, tail) = rest.split_once(' ').unwrap_or((rest, ""));
            if counters.contains(name) {
                return Some(format!("{kind}{name}_total {tail}").trim_end().to_string());
            }
        }
    }
    None
}

/// Cut an OpenMetrics sample line at its exemplar marker.
///
/// The first `#` outside a quoted label value starts the exemplar.
fn strip_exemplar(line: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        if in_quotes {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            '#' => return line[..idx].trim_end(),
            _ => {}
        }
    }
    line
}
