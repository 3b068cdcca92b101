//! Inbound call events.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TypesError, duration_from_secs_f64, parse_duration};

/// Well-known event field names.
pub mod fields {
    pub const TENANT: &str = "Tenant";
    pub const ORIGIN_ID: &str = "OriginID";
    pub const ORIGIN_HOST: &str = "OriginHost";
    pub const TOR: &str = "ToR";
    pub const REQUEST_TYPE: &str = "RequestType";
    pub const ACCOUNT: &str = "Account";
    pub const SUBJECT: &str = "Subject";
    pub const DESTINATION: &str = "Destination";
    pub const CATEGORY: &str = "Category";
    pub const SETUP_TIME: &str = "SetupTime";
    pub const ANSWER_TIME: &str = "AnswerTime";
    pub const USAGE: &str = "Usage";
    pub const RUN_IDS: &str = "RunIDs";
    pub const EVENT_NAME: &str = "EventName";
}

/// A single event attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Display for EventValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for EventValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EventValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for EventValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for EventValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for EventValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Durations travel as integer nanoseconds.
impl From<Duration> for EventValue {
    fn from(value: Duration) -> Self {
        Self::Int(i64::try_from(value.as_nanos()).unwrap_or(i64::MAX))
    }
}

/// Times travel as RFC 3339 text.
impl From<DateTime<Utc>> for EventValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Text(value.to_rfc3339())
    }
}

/// An event as delivered by a switch or gateway.
///
/// The envelope tenant takes precedence over a `Tenant` attribute. The core
/// never mutates an event; builders return a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CgrEvent {
    #[serde(default)]
    pub tenant: String,

    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub event: BTreeMap<String, EventValue>,
}

impl CgrEvent {
    pub fn new(tenant: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            id: id.into(),
            time: None,
            event: BTreeMap::new(),
        }
    }

    /// Returns a copy of this event with `name` set to `value`.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<EventValue>) -> Self {
        self.event.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&EventValue> {
        self.event.get(name)
    }

    /// Returns the field rendered as text, treating empty strings as absent.
    pub fn string_field(&self, name: &str) -> Option<String> {
        let value = self.field(name)?.to_string();
        if value.is_empty() { None } else { Some(value) }
    }

    /// Returns the tenant, from the envelope or the `Tenant` attribute.
    pub fn tenant(&self) -> Option<String> {
        if self.tenant.is_empty() {
            self.string_field(fields::TENANT)
        } else {
            Some(self.tenant.clone())
        }
    }

    /// Reads a duration field (integer nanoseconds or duration text).
    pub fn duration_field(&self, name: &str) -> Result<Option<Duration>, TypesError> {
        match self.field(name) {
            None => Ok(None),
            Some(EventValue::Int(nanos)) => u64::try_from(*nanos)
                .map(|n| Some(Duration::from_nanos(n)))
                .map_err(|_| TypesError::InvalidDuration(nanos.to_string())),
            Some(EventValue::Float(secs)) => duration_from_secs_f64(*secs).map(Some),
            Some(EventValue::Text(text)) if text.is_empty() => Ok(None),
            Some(EventValue::Text(text)) => parse_duration(text).map(Some),
            Some(other) => Err(TypesError::InvalidDuration(other.to_string())),
        }
    }

    /// Reads a time field (RFC 3339 text or integer Unix seconds).
    pub fn time_field(&self, name: &str) -> Result<Option<DateTime<Utc>>, TypesError> {
        let invalid = |value: String| TypesError::InvalidTime {
            field: name.to_string(),
            value,
        };

        match self.field(name) {
            None => Ok(None),
            Some(EventValue::Text(text)) if text.is_empty() => Ok(None),
            Some(EventValue::Text(text)) => DateTime::parse_from_rfc3339(text)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|_| invalid(text.clone())),
            Some(EventValue::Int(secs)) => DateTime::from_timestamp(*secs, 0)
                .map(Some)
                .ok_or_else(|| invalid(secs.to_string())),
            Some(other) => Err(invalid(other.to_string())),
        }
    }

    /// Extra charging runs requested by the event (comma separated `RunIDs`).
    pub fn run_ids(&self) -> Vec<String> {
        self.string_field(fields::RUN_IDS)
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> CgrEvent {
        CgrEvent::new("cgrates.org", "TestInit")
            .with_field(fields::ORIGIN_ID, "123451")
            .with_field(fields::USAGE, Duration::from_secs(90))
            .with_field(
                fields::ANSWER_TIME,
                Utc.with_ymd_and_hms(2018, 1, 7, 17, 0, 10).unwrap(),
            )
    }

    #[test]
    fn envelope_tenant_wins() {
        let event = sample().with_field(fields::TENANT, "other.org");
        assert_eq!(event.tenant().as_deref(), Some("cgrates.org"));

        let mut bare = event.clone();
        bare.tenant.clear();
        assert_eq!(bare.tenant().as_deref(), Some("other.org"));
    }

    #[test]
    fn duration_from_nanos_and_text() {
        let event = sample();
        assert_eq!(
            event.duration_field(fields::USAGE).unwrap(),
            Some(Duration::from_secs(90))
        );

        let text = event.with_field(fields::USAGE, "1m");
        assert_eq!(
            text.duration_field(fields::USAGE).unwrap(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn negative_duration_is_rejected() {
        let event = sample().with_field(fields::USAGE, -5i64);
        assert!(event.duration_field(fields::USAGE).is_err());
    }

    #[test]
    fn float_seconds_outside_wire_range_are_rejected() {
        let event = sample().with_field(fields::USAGE, 2.5f64);
        assert_eq!(
            event.duration_field(fields::USAGE).unwrap(),
            Some(Duration::from_millis(2500))
        );

        for secs in [1e30, 1e11, -1.0] {
            let event = sample().with_field(fields::USAGE, secs);
            assert!(matches!(
                event.duration_field(fields::USAGE),
                Err(TypesError::InvalidDuration(_))
            ));
        }
    }

    #[test]
    fn time_field_parses_rfc3339_and_epoch() {
        let event = sample().with_field(fields::SETUP_TIME, 1_515_344_400i64);
        let answer = event.time_field(fields::ANSWER_TIME).unwrap().unwrap();
        assert_eq!(answer, Utc.with_ymd_and_hms(2018, 1, 7, 17, 0, 10).unwrap());

        let setup = event.time_field(fields::SETUP_TIME).unwrap().unwrap();
        assert_eq!(setup.timestamp(), 1_515_344_400);
    }

    #[test]
    fn run_ids_are_split_and_trimmed() {
        let event = sample().with_field(fields::RUN_IDS, "retail, wholesale,,");
        assert_eq!(event.run_ids(), vec!["retail", "wholesale"]);
        assert!(sample().run_ids().is_empty());
    }

    #[test]
    fn json_values_keep_their_kind() {
        let event: CgrEvent = serde_json::from_str(
            r#"{"tenant":"t","id":"x","event":{"OriginID":"1","Usage":90000000000,"Answered":true}}"#,
        )
        .unwrap();
        assert_eq!(event.field("Usage"), Some(&EventValue::Int(90_000_000_000)));
        assert_eq!(event.field("Answered"), Some(&EventValue::Bool(true)));
        assert_eq!(event.string_field("OriginID").as_deref(), Some("1"));
    }
}
