//! Session model and lifecycle.

use std::fmt::Display;
use std::time::Duration;

use callstate_types::{CgrEvent, EventValue, SessionKey, Timestamp, fields};
use serde::{Deserialize, Serialize};

use crate::billing::UsageRequest;
use crate::error::{SessionError, SessionResult};

/// Run id every session is charged under.
pub const DEFAULT_RUN_ID: &str = "*default";

/// Lifecycle of a session on the node that owns it.
///
/// ```text
/// Initiated ──► Active ──► Terminated
///                │  ▲
///                └──┘ update
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initiated,
    Active,
    Terminated,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Initiated, Self::Active)
                | (Self::Active, Self::Active)
                | (Self::Active, Self::Terminated)
        )
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiated => write!(f, "initiated"),
            Self::Active => write!(f, "active"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// One charging run of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRun {
    pub run_id: String,
    pub account: String,
    pub subject: String,
    pub destination: String,
    /// Ceiling granted to this run by the last authorization.
    #[serde(with = "callstate_types::serde_nanos")]
    pub max_usage: Duration,
}

impl SessionRun {
    fn from_event(run_id: &str, event: &CgrEvent) -> Self {
        let account = event.string_field(fields::ACCOUNT).unwrap_or_default();
        let subject = event
            .string_field(fields::SUBJECT)
            .unwrap_or_else(|| account.clone());
        Self {
            run_id: run_id.to_string(),
            account,
            subject,
            destination: event.string_field(fields::DESTINATION).unwrap_or_default(),
            max_usage: Duration::ZERO,
        }
    }
}

/// A tracked call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub tenant: String,
    pub origin_id: String,
    #[serde(default)]
    pub origin_host: String,
    #[serde(default)]
    pub request_type: String,
    pub runs: Vec<SessionRun>,
    /// Usage accumulated so far.
    #[serde(with = "callstate_types::serde_nanos")]
    pub usage: Duration,
    /// Ceiling returned by the last authorization.
    #[serde(with = "callstate_types::serde_nanos")]
    pub max_usage: Duration,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Originating event, with later update fields merged in.
    pub event: CgrEvent,
    pub state: SessionState,
}

impl Session {
    /// Builds a session in `Initiated` state from its first event.
    pub fn new(key: SessionKey, event: &CgrEvent, now: Timestamp) -> Self {
        let mut runs = vec![SessionRun::from_event(DEFAULT_RUN_ID, event)];
        for run_id in event.run_ids() {
            if run_id != DEFAULT_RUN_ID && !runs.iter().any(|r| r.run_id == run_id) {
                runs.push(SessionRun::from_event(&run_id, event));
            }
        }

        Self {
            key,
            tenant: event.tenant().unwrap_or_default(),
            origin_id: event.string_field(fields::ORIGIN_ID).unwrap_or_default(),
            origin_host: event.string_field(fields::ORIGIN_HOST).unwrap_or_default(),
            request_type: event.string_field(fields::REQUEST_TYPE).unwrap_or_default(),
            runs,
            usage: Duration::ZERO,
            max_usage: Duration::ZERO,
            created_at: now,
            updated_at: now,
            event: event.clone(),
            state: SessionState::Initiated,
        }
    }

    /// Moves the session to `next`, refreshing `updated_at`.
    pub fn transition(&mut self, next: SessionState) -> SessionResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Timestamp::now_monotonic(Some(self.updated_at));
        Ok(())
    }

    /// Billing request for `run` covering `usage`.
    pub fn usage_request(&self, run: &SessionRun, usage: Duration) -> UsageRequest {
        UsageRequest {
            tenant: self.tenant.clone(),
            account: run.account.clone(),
            subject: run.subject.clone(),
            destination: run.destination.clone(),
            run_id: run.run_id.clone(),
            usage,
        }
    }

    /// Folds the attributes of a later event into the stored event.
    pub fn merge_event(&mut self, event: &CgrEvent) {
        for (name, value) in &event.event {
            self.event.event.insert(name.clone(), value.clone());
        }
    }

    /// Records the accumulated usage on the stored event as well.
    pub(crate) fn set_usage(&mut self, usage: Duration) {
        self.usage = usage;
        self.event
            .event
            .insert(fields::USAGE.to_string(), EventValue::from(usage));
    }

    pub fn account(&self) -> &str {
        self.runs.first().map_or("", |run| run.account.as_str())
    }
}
