//! # callstate-stats: incremental call statistics
//!
//! Metrics consume session events one at a time and keep only the running
//! aggregate, so they can be fed from the notification pool without holding
//! any history:
//!
//! - `*asr` - answer-seizure ratio, percent of calls that were answered
//! - `*acd` - average call duration
//!
//! Metric kinds form a closed set ([`Metric`]) behind the [`StatsMetric`]
//! capability trait. A [`MetricRegistry`] maps metric ids to constructors; new
//! kinds are added by extending the table.

use std::collections::BTreeMap;

use callstate_types::CgrEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod metrics;

pub use metrics::{Acd, Asr, Metric};

/// Metric id for the answer-seizure ratio.
pub const META_ASR: &str = "*asr";

/// Metric id for the average call duration.
pub const META_ACD: &str = "*acd";

/// Value reported by a metric that has not seen any events.
pub const STATS_NA: f64 = -1.0;

/// String value reported by a metric that has not seen any events.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Error, PartialEq)]
pub enum StatsError {
    #[error("unsupported metric: {0}")]
    UnsupportedMetric(String),

    #[error("metric {0} has no events to remove")]
    NoEvents(&'static str),

    #[error("invalid event: {0}")]
    InvalidEvent(#[from] callstate_types::TypesError),
}

pub type Result<T> = std::result::Result<T, StatsError>;

/// Capability shared by every metric kind.
pub trait StatsMetric {
    /// Metric id (`*asr`, `*acd`, ...).
    fn id(&self) -> &'static str;

    /// Folds an event into the aggregate.
    fn add_event(&mut self, event: &CgrEvent) -> Result<()>;

    /// Removes a previously added event from the aggregate.
    fn remove_event(&mut self, event: &CgrEvent) -> Result<()>;

    /// Current value, or [`STATS_NA`] when no events were added.
    fn value(&self) -> f64;

    /// Human-readable value, or [`NOT_AVAILABLE`] when no events were added.
    fn string_value(&self) -> String;
}

/// Options passed to metric constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricOptions {
    /// Decimal places kept when a metric rounds its value.
    pub rounding_decimals: u32,
}

impl Default for MetricOptions {
    fn default() -> Self {
        Self {
            rounding_decimals: 2,
        }
    }
}

type Constructor = fn(&MetricOptions) -> Metric;

/// Registration table from metric id to constructor.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    constructors: BTreeMap<&'static str, Constructor>,
    options: MetricOptions,
}

impl MetricRegistry {
    /// Creates a registry with no metric kinds.
    pub fn empty(options: MetricOptions) -> Self {
        Self {
            constructors: BTreeMap::new(),
            options,
        }
    }

    /// Creates a registry with the built-in metric kinds.
    pub fn new(options: MetricOptions) -> Self {
        Self::empty(options)
            .with_metric(META_ASR, |opts| Metric::Asr(Asr::new(opts.rounding_decimals)))
            .with_metric(META_ACD, |_| Metric::Acd(Acd::default()))
    }

    /// Registers a constructor under `id`, replacing any previous one.
    pub fn with_metric(mut self, id: &'static str, constructor: Constructor) -> Self {
        self.constructors.insert(id, constructor);
        self
    }

    /// Builds a fresh metric for `id`.
    pub fn build(&self, id: &str) -> Result<Metric> {
        self.constructors
            .get(id)
            .map(|constructor| constructor(&self.options))
            .ok_or_else(|| StatsError::UnsupportedMetric(id.to_string()))
    }

    /// Registered metric ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new(MetricOptions::default())
    }
}

/// A group of metrics fed from the same event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricSet {
    metrics: BTreeMap<String, Metric>,
}

impl MetricSet {
    /// Builds one metric per id; fails on the first unknown id.
    pub fn from_ids<I, S>(registry: &MetricRegistry, ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut metrics = BTreeMap::new();
        for id in ids {
            let id = id.as_ref();
            metrics.insert(id.to_string(), registry.build(id)?);
        }
        Ok(Self { metrics })
    }

    pub fn add_event(&mut self, event: &CgrEvent) -> Result<()> {
        for metric in self.metrics.values_mut() {
            metric.add_event(event)?;
        }
        Ok(())
    }

    pub fn remove_event(&mut self, event: &CgrEvent) -> Result<()> {
        for metric in self.metrics.values_mut() {
            metric.remove_event(event)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Metric> {
        self.metrics.get(id)
    }

    /// Current value of every metric, keyed by id.
    pub fn values(&self) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .map(|(id, metric)| (id.clone(), metric.value()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_knows_builtin_metrics() {
        let registry = MetricRegistry::default();
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![META_ACD, META_ASR]);
        assert_eq!(registry.build(META_ASR).unwrap().id(), META_ASR);
        assert_eq!(registry.build(META_ACD).unwrap().id(), META_ACD);
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let registry = MetricRegistry::default();
        assert_eq!(
            registry.build("*tcc").unwrap_err(),
            StatsError::UnsupportedMetric("*tcc".to_string())
        );
        assert!(MetricSet::from_ids(&registry, ["*asr", "*tcc"]).is_err());
    }

    #[test]
    fn registry_can_be_extended() {
        let registry = MetricRegistry::empty(MetricOptions::default())
            .with_metric("*asr_whole", |_| Metric::Asr(Asr::new(0)));
        assert!(registry.build(META_ASR).is_err());
        assert_eq!(registry.build("*asr_whole").unwrap().id(), META_ASR);
    }

    #[test]
    fn empty_set_reports_nothing() {
        let set = MetricSet::from_ids(&MetricRegistry::default(), Vec::<String>::new()).unwrap();
        assert!(set.is_empty());
        assert!(set.values().is_empty());
    }
}
