//! # callstate-types: Core types for `callstate`
//!
//! This crate contains shared types used across the `callstate` system:
//! - Session identity ([`SessionKey`])
//! - Temporal types ([`Timestamp`], [`parse_duration`], [`serde_nanos`])
//! - Inbound call events ([`CgrEvent`], [`EventValue`], [`fields`])
//! - Peer topology ([`ReplicationTarget`], [`TransportKind`])
//! - Queue overflow policy ([`OverflowPolicy`])

use std::{
    fmt::{Debug, Display},
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

mod event;

pub use event::{CgrEvent, EventValue, fields};

/// Errors produced while interpreting event values and identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("invalid time in field {field}: {value:?}")]
    InvalidTime { field: String, value: String },

    #[error("invalid session key: {0:?}")]
    InvalidSessionKey(String),
}

// ============================================================================
// SessionKey - Copy (fixed 32-byte digest)
// ============================================================================

/// Length of a session key digest in bytes (SHA-256).
pub const SESSION_KEY_LENGTH: usize = 32;

/// Deterministic fingerprint identifying one call across nodes.
///
/// Every node that sees the same logical call computes the same key from the
/// identifying event fields, so the key itself never has to travel with the
/// call. On the wire it is rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey([u8; SESSION_KEY_LENGTH]);

impl SessionKey {
    /// Creates a key from a raw digest.
    pub fn from_digest(bytes: [u8; SESSION_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the digest bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LENGTH] {
        &self.0
    }
}

impl Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 6 bytes are enough to tell keys apart in logs
        write!(
            f,
            "SessionKey({:02x}{:02x}{:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for SessionKey {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypesError::InvalidSessionKey(s.to_string());

        if s.len() != SESSION_KEY_LENGTH * 2 || !s.is_ascii() {
            return Err(invalid());
        }

        let mut bytes = [0u8; SESSION_KEY_LENGTH];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for SessionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<[u8; SESSION_KEY_LENGTH]> for SessionKey {
    fn from(bytes: [u8; SESSION_KEY_LENGTH]) -> Self {
        Self(bytes)
    }
}

// ============================================================================
// Timestamp - Copy (8-byte value with monotonic guarantee)
// ============================================================================

/// Wall-clock timestamp with monotonic guarantee within a session.
///
/// Replicated snapshots carry their last-update timestamp so a receiver can
/// discard a push older than the mirror it already holds.
///
/// Stored as nanoseconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from nanoseconds since Unix epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the timestamp as nanoseconds since Unix epoch.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns the timestamp as seconds since Unix epoch (truncates nanoseconds).
    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Creates a timestamp for the current time.
    ///
    /// A clock set before the Unix epoch reads as [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        Self(nanos)
    }

    /// Creates a timestamp ensuring monotonicity: `max(now, last + 1ns)`.
    pub fn now_monotonic(last: Option<Timestamp>) -> Self {
        let now = Self::now();
        match last {
            Some(prev) if now.0 <= prev.0 => Timestamp(prev.0.saturating_add(1)),
            _ => now,
        }
    }

    /// Returns the time elapsed between `earlier` and `self`, or zero.
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0 / 1_000_000_000;
        let nanos = self.0 % 1_000_000_000;
        write!(f, "{secs}.{nanos:09}")
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Self(nanos)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================================================
// Durations
// ============================================================================

/// Largest duration the nanosecond wire encoding can carry.
pub const MAX_DURATION: Duration = Duration::from_nanos(u64::MAX);

/// Adds two durations, rejecting totals beyond [`MAX_DURATION`].
pub fn checked_duration_add(a: Duration, b: Duration) -> Result<Duration, TypesError> {
    a.checked_add(b)
        .filter(|total| *total <= MAX_DURATION)
        .ok_or_else(|| TypesError::InvalidDuration(format!("{a:?} + {b:?}")))
}

/// Converts fractional seconds, rejecting negative, non-finite and
/// unrepresentable values.
pub fn duration_from_secs_f64(secs: f64) -> Result<Duration, TypesError> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| *d <= MAX_DURATION)
        .ok_or_else(|| TypesError::InvalidDuration(secs.to_string()))
}

/// Parses a usage duration.
///
/// Accepts a bare integer (nanoseconds) or a sequence of decimal numbers with
/// unit suffixes: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h` (e.g. `"1m30s"`,
/// `"1.5s"`, `"250ms"`).
pub fn parse_duration(input: &str) -> Result<Duration, TypesError> {
    let invalid = || TypesError::InvalidDuration(input.to_string());
    let s = input.trim();

    if s.is_empty() {
        return Err(invalid());
    }
    if let Ok(nanos) = s.parse::<u64>() {
        return Ok(Duration::from_nanos(nanos));
    }

    let mut total_nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_end == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_end].parse().map_err(|_| invalid())?;

        let after = &rest[number_end..];
        let unit_end = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let scale = match &after[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };

        total_nanos += value * scale;
        rest = &after[unit_end..];
    }

    let total_nanos = total_nanos.round();
    // 2^64, the first value past u64::MAX.
    if total_nanos >= 18_446_744_073_709_551_616.0 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total_nanos as u64))
}

/// Serde adapter that encodes a [`Duration`] as integer nanoseconds.
///
/// ```
/// # use std::time::Duration;
/// #[derive(serde::Serialize)]
/// struct Usage {
///     #[serde(with = "callstate_types::serde_nanos")]
///     usage: Duration,
/// }
/// ```
pub mod serde_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos()).map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}

// ============================================================================
// Replication topology
// ============================================================================

/// How a peer is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransportKind {
    /// Newline-delimited JSON over TCP.
    #[default]
    #[serde(rename = "*json")]
    Json,
    /// Another service instance inside the same process.
    #[serde(rename = "*internal")]
    Internal,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "*json"),
            Self::Internal => write!(f, "*internal"),
        }
    }
}

/// A peer that receives passive copies of this node's sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicationTarget {
    /// Peer address (`host:port` for `*json`, a node name for `*internal`).
    pub address: String,

    #[serde(default)]
    pub transport: TransportKind,

    /// When set, the triggering call waits for the peer to acknowledge.
    #[serde(default)]
    pub synchronous: bool,
}

impl ReplicationTarget {
    pub fn new(address: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            address: address.into(),
            transport,
            synchronous: false,
        }
    }

    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }
}

impl Display for ReplicationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.transport, self.address)
    }
}

/// What a bounded queue does with an item that arrives while it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Reject the incoming item.
    #[default]
    DropNewest,
    /// Evict the oldest queued item to make room.
    DropOldest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("90s", Duration::from_secs(90) ; "seconds")]
    #[test_case("1m30s", Duration::from_secs(90) ; "minutes and seconds")]
    #[test_case("1h", Duration::from_secs(3600) ; "hours")]
    #[test_case("250ms", Duration::from_millis(250) ; "milliseconds")]
    #[test_case("1.5s", Duration::from_millis(1500) ; "fractional")]
    #[test_case("2us", Duration::from_micros(2) ; "micros")]
    #[test_case("1000", Duration::from_nanos(1000) ; "bare nanoseconds")]
    fn parse_duration_accepts(input: &str, expected: Duration) {
        assert_eq!(parse_duration(input).unwrap(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("s" ; "unit only")]
    #[test_case("10x" ; "unknown unit")]
    #[test_case("1.5" ; "fraction without unit")]
    #[test_case("-5s" ; "negative")]
    fn parse_duration_rejects(input: &str) {
        assert!(matches!(
            parse_duration(input),
            Err(TypesError::InvalidDuration(_))
        ));
    }

    #[test]
    fn parse_duration_rejects_past_wire_range() {
        assert!(parse_duration("6000000000h").is_err());
        assert_eq!(
            parse_duration("18446744073709551615").unwrap(),
            MAX_DURATION
        );
    }

    #[test]
    fn duration_from_secs_f64_bounds() {
        assert_eq!(
            duration_from_secs_f64(1.5).unwrap(),
            Duration::from_millis(1500)
        );
        for secs in [1e30, 1e11, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                duration_from_secs_f64(secs),
                Err(TypesError::InvalidDuration(_))
            ));
        }
    }

    #[test]
    fn checked_duration_add_stops_at_wire_range() {
        assert_eq!(
            checked_duration_add(Duration::from_secs(90), Duration::from_secs(60)).unwrap(),
            Duration::from_secs(150)
        );
        assert!(checked_duration_add(MAX_DURATION, Duration::from_nanos(1)).is_err());
    }

    #[test]
    fn serde_nanos_refuses_to_truncate() {
        #[derive(serde::Serialize)]
        struct Usage {
            #[serde(with = "serde_nanos")]
            usage: Duration,
        }

        let ok = serde_json::to_value(Usage {
            usage: MAX_DURATION,
        })
        .unwrap();
        assert_eq!(ok["usage"], serde_json::json!(u64::MAX));

        let too_long = Usage {
            usage: MAX_DURATION + Duration::from_secs(1),
        };
        assert!(serde_json::to_value(too_long).is_err());
    }

    #[test]
    fn session_key_hex_roundtrip() {
        let key = SessionKey::from_digest([0xab; SESSION_KEY_LENGTH]);
        let text = key.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<SessionKey>().unwrap(), key);
    }

    #[test]
    fn session_key_rejects_bad_hex() {
        assert!("zz".parse::<SessionKey>().is_err());
        assert!("g".repeat(64).parse::<SessionKey>().is_err());
    }

    #[test]
    fn session_key_serializes_as_string() {
        let key = SessionKey::from_digest([1; SESSION_KEY_LENGTH]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
    }

    #[test]
    fn timestamp_monotonic_never_goes_back() {
        let future = Timestamp::from_nanos(u64::MAX - 10);
        let next = Timestamp::now_monotonic(Some(future));
        assert!(next > future);
    }

    #[test]
    fn replication_target_transport_names() {
        let target: ReplicationTarget =
            serde_json::from_str(r#"{"address":"10.0.0.2:2012","transport":"*json","synchronous":true}"#)
                .unwrap();
        assert_eq!(target.transport, TransportKind::Json);
        assert!(target.synchronous);

        let defaulted: ReplicationTarget =
            serde_json::from_str(r#"{"address":"node-b"}"#).unwrap();
        assert_eq!(defaulted.transport, TransportKind::Json);
        assert!(!defaulted.synchronous);
    }

    #[test]
    fn overflow_policy_is_kebab_case() {
        let policy: OverflowPolicy = serde_json::from_str("\"drop-oldest\"").unwrap();
        assert_eq!(policy, OverflowPolicy::DropOldest);
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::DropNewest);
    }

    proptest! {
        /// Whole-second durations survive formatting as `<n>s`.
        #[test]
        fn prop_whole_seconds_parse(secs in 0u64..1_000_000) {
            prop_assert_eq!(parse_duration(&format!("{secs}s")).unwrap(), Duration::from_secs(secs));
        }

        #[test]
        fn prop_session_key_display_parses_back(bytes in proptest::array::uniform32(any::<u8>())) {
            let key = SessionKey::from_digest(bytes);
            prop_assert_eq!(key.to_string().parse::<SessionKey>().unwrap(), key);
        }
    }
}
