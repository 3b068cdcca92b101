//! Built-in metric kinds.

use std::time::Duration;

use callstate_types::{CgrEvent, checked_duration_add, fields};
use serde::{Deserialize, Serialize};

use crate::{META_ACD, META_ASR, NOT_AVAILABLE, Result, STATS_NA, StatsError, StatsMetric};

/// Answer-seizure ratio: answered calls over all calls, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asr {
    answered: u64,
    count: u64,
    rounding_decimals: u32,
}

impl Asr {
    pub fn new(rounding_decimals: u32) -> Self {
        Self {
            answered: 0,
            count: 0,
            rounding_decimals,
        }
    }

    fn is_answered(event: &CgrEvent) -> Result<bool> {
        Ok(event.time_field(fields::ANSWER_TIME)?.is_some())
    }
}

impl StatsMetric for Asr {
    fn id(&self) -> &'static str {
        META_ASR
    }

    fn add_event(&mut self, event: &CgrEvent) -> Result<()> {
        if Self::is_answered(event)? {
            self.answered += 1;
        }
        self.count += 1;
        Ok(())
    }

    fn remove_event(&mut self, event: &CgrEvent) -> Result<()> {
        if self.count == 0 {
            return Err(StatsError::NoEvents(META_ASR));
        }
        if Self::is_answered(event)? {
            self.answered = self.answered.saturating_sub(1);
        }
        self.count -= 1;
        Ok(())
    }

    fn value(&self) -> f64 {
        if self.count == 0 {
            return STATS_NA;
        }
        round_half_away(
            self.answered as f64 / self.count as f64 * 100.0,
            self.rounding_decimals,
        )
    }

    fn string_value(&self) -> String {
        if self.count == 0 {
            return NOT_AVAILABLE.to_string();
        }
        format!("{}%", self.value())
    }
}

/// Average call duration; an event without usage counts as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acd {
    #[serde(with = "callstate_types::serde_nanos")]
    sum: Duration,
    count: u64,
}

impl Acd {
    /// Average duration, or `None` when no events were added.
    pub fn average(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum / u32::try_from(self.count).unwrap_or(u32::MAX))
    }
}

impl StatsMetric for Acd {
    fn id(&self) -> &'static str {
        META_ACD
    }

    fn add_event(&mut self, event: &CgrEvent) -> Result<()> {
        let usage = event.duration_field(fields::USAGE)?.unwrap_or_default();
        self.sum = checked_duration_add(self.sum, usage)?;
        self.count += 1;
        Ok(())
    }

    fn remove_event(&mut self, event: &CgrEvent) -> Result<()> {
        if self.count == 0 {
            return Err(StatsError::NoEvents(META_ACD));
        }
        let usage = event.duration_field(fields::USAGE)?.unwrap_or_default();
        self.sum = self.sum.saturating_sub(usage);
        self.count -= 1;
        Ok(())
    }

    /// Average duration in seconds.
    fn value(&self) -> f64 {
        self.average().map_or(STATS_NA, |avg| avg.as_secs_f64())
    }

    fn string_value(&self) -> String {
        self.average()
            .map_or_else(|| NOT_AVAILABLE.to_string(), |avg| format!("{avg:?}"))
    }
}

/// The closed set of metric kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Metric {
    Asr(Asr),
    Acd(Acd),
}

impl StatsMetric for Metric {
    fn id(&self) -> &'static str {
        match self {
            Self::Asr(m) => m.id(),
            Self::Acd(m) => m.id(),
        }
    }

    fn add_event(&mut self, event: &CgrEvent) -> Result<()> {
        match self {
            Self::Asr(m) => m.add_event(event),
            Self::Acd(m) => m.add_event(event),
        }
    }

    fn remove_event(&mut self, event: &CgrEvent) -> Result<()> {
        match self {
            Self::Asr(m) => m.remove_event(event),
            Self::Acd(m) => m.remove_event(event),
        }
    }

    fn value(&self) -> f64 {
        match self {
            Self::Asr(m) => m.value(),
            Self::Acd(m) => m.value(),
        }
    }

    fn string_value(&self) -> String {
        match self {
            Self::Asr(m) => m.string_value(),
            Self::Acd(m) => m.string_value(),
        }
    }
}

fn round_half_away(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use test_case::test_case;

    fn answered(usage_secs: u64) -> CgrEvent {
        CgrEvent::new("cgrates.org", "ev")
            .with_field(
                fields::ANSWER_TIME,
                Utc.with_ymd_and_hms(2018, 1, 7, 17, 0, 10).unwrap(),
            )
            .with_field(fields::USAGE, Duration::from_secs(usage_secs))
    }

    fn unanswered() -> CgrEvent {
        CgrEvent::new("cgrates.org", "ev")
    }

    #[test]
    fn asr_not_available_without_events() {
        let asr = Asr::new(2);
        assert_eq!(asr.value(), STATS_NA);
        assert_eq!(asr.string_value(), NOT_AVAILABLE);
    }

    #[test_case(1, 1, 100.0 ; "all answered")]
    #[test_case(1, 2, 50.0 ; "half answered")]
    #[test_case(1, 3, 33.33 ; "rounded to two decimals")]
    #[test_case(2, 3, 66.67 ; "rounded half away from zero")]
    fn asr_ratio(answered_calls: usize, total: usize, expected: f64) {
        let mut asr = Asr::new(2);
        for i in 0..total {
            let event = if i < answered_calls {
                answered(60)
            } else {
                unanswered()
            };
            asr.add_event(&event).unwrap();
        }
        assert!((asr.value() - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn asr_remove_event_reverses_add() {
        let mut asr = Asr::new(2);
        asr.add_event(&answered(10)).unwrap();
        asr.add_event(&unanswered()).unwrap();
        asr.remove_event(&unanswered()).unwrap();
        assert_eq!(asr.string_value(), "100%");

        asr.remove_event(&answered(10)).unwrap();
        assert_eq!(
            asr.remove_event(&answered(10)),
            Err(StatsError::NoEvents(META_ASR))
        );
    }

    #[test]
    fn acd_averages_usage() {
        let mut acd = Acd::default();
        assert_eq!(acd.value(), STATS_NA);

        acd.add_event(&answered(60)).unwrap();
        acd.add_event(&answered(120)).unwrap();
        assert_eq!(acd.average(), Some(Duration::from_secs(90)));
        assert!((acd.value() - 90.0).abs() < f64::EPSILON);

        acd.remove_event(&answered(120)).unwrap();
        assert_eq!(acd.average(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn acd_rejects_sum_past_wire_range() {
        let mut acd = Acd::default();
        let huge = answered(0).with_field(fields::USAGE, i64::MAX);
        acd.add_event(&huge).unwrap();
        acd.add_event(&huge).unwrap();

        assert!(matches!(
            acd.add_event(&huge),
            Err(StatsError::InvalidEvent(_))
        ));
        assert_eq!(acd.count, 2);
    }

    #[test]
    fn metric_enum_serializes_with_kind_tag() {
        let mut metric = Metric::Acd(Acd::default());
        metric.add_event(&answered(30)).unwrap();

        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["kind"], "acd");
        assert_eq!(json["sum"], 30_000_000_000u64);

        let restored: Metric = serde_json::from_value(json).unwrap();
        assert_eq!(restored, metric);
    }
}
