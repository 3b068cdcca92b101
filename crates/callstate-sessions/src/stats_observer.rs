//! Feeds terminated sessions into call statistics.

use std::collections::BTreeMap;
use std::sync::Mutex;

use callstate_stats::{MetricRegistry, MetricSet, StatsMetric};
use tracing::warn;

use crate::error::{SessionError, SessionResult};
use crate::notify::{SessionEvent, SessionObserver};

pub struct StatsObserver {
    metrics: Mutex<MetricSet>,
}

impl StatsObserver {
    /// Builds an observer tracking `metric_ids`; unknown ids are rejected.
    pub fn new<I, S>(registry: &MetricRegistry, metric_ids: I) -> SessionResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let metrics = MetricSet::from_ids(registry, metric_ids)
            .map_err(|e| SessionError::InvalidArgument(e.to_string()))?;
        Ok(Self {
            metrics: Mutex::new(metrics),
        })
    }

    /// Current value of every metric.
    pub fn values(&self) -> BTreeMap<String, f64> {
        self.metrics
            .lock()
            .map(|metrics| metrics.values())
            .unwrap_or_default()
    }

    pub fn string_value(&self, metric_id: &str) -> Option<String> {
        let metrics = self.metrics.lock().ok()?;
        metrics.get(metric_id).map(StatsMetric::string_value)
    }
}

impl SessionObserver for StatsObserver {
    fn name(&self) -> &str {
        "stats"
    }

    fn on_event(&self, event: &SessionEvent) {
        let SessionEvent::Terminated(session) = event else {
            return;
        };
        let Ok(mut metrics) = self.metrics.lock() else {
            warn!("stats lock poisoned, dropping event");
            return;
        };
        if let Err(e) = metrics.add_event(&session.event) {
            warn!(key = %session.key, error = %e, "stats rejected session event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use callstate_stats::{META_ACD, META_ASR, NOT_AVAILABLE};
    use callstate_types::{CgrEvent, Timestamp, fields};
    use std::time::Duration;

    fn terminated(origin_id: &str, answered: bool, usage_secs: u64) -> SessionEvent {
        let mut event = CgrEvent::new("cgrates.org", "ev").with_field(fields::ORIGIN_ID, origin_id);
        if answered {
            event = event.with_field(fields::ANSWER_TIME, "2018-01-07T17:00:10Z");
        }
        let key = crate::identity::derive_key(&event).unwrap();
        let mut session = Session::new(key, &event, Timestamp::EPOCH);
        session.set_usage(Duration::from_secs(usage_secs));
        SessionEvent::Terminated(session)
    }

    #[test]
    fn only_terminations_are_counted() {
        let observer = StatsObserver::new(&MetricRegistry::default(), [META_ASR, META_ACD]).unwrap();
        assert_eq!(observer.string_value(META_ASR).as_deref(), Some(NOT_AVAILABLE));

        let SessionEvent::Terminated(session) = terminated("0", true, 10) else {
            unreachable!()
        };
        observer.on_event(&SessionEvent::Initiated(session));
        assert_eq!(observer.string_value(META_ASR).as_deref(), Some(NOT_AVAILABLE));

        observer.on_event(&terminated("1", true, 60));
        observer.on_event(&terminated("2", false, 0));

        let values = observer.values();
        assert!((values[META_ASR] - 50.0).abs() < f64::EPSILON);
        assert!((values[META_ACD] - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_metric_is_rejected() {
        assert!(matches!(
            StatsObserver::new(&MetricRegistry::default(), ["*pdd"]),
            Err(SessionError::InvalidArgument(_))
        ));
    }
}
