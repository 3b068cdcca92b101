//! Session query filters.

use callstate_types::SessionKey;
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Selects sessions for `GetActiveSessions` / `GetPassiveSessions`.
///
/// Unset fields match everything. Results are ordered by creation time, then
/// key, before `limit` is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFilter {
    pub tenant: Option<String>,
    pub origin_id: Option<String>,
    pub origin_host: Option<String>,
    pub account: Option<String>,
    pub keys: Option<Vec<SessionKey>>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn origin_id(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = Some(origin_id.into());
        self
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn keys(mut self, keys: Vec<SessionKey>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, session: &Session) -> bool {
        fn field_matches(wanted: Option<&String>, actual: &str) -> bool {
            wanted.is_none_or(|w| w == actual)
        }

        field_matches(self.tenant.as_ref(), &session.tenant)
            && field_matches(self.origin_id.as_ref(), &session.origin_id)
            && field_matches(self.origin_host.as_ref(), &session.origin_host)
            && self
                .account
                .as_ref()
                .is_none_or(|a| session.runs.iter().any(|run| &run.account == a))
            && self
                .keys
                .as_ref()
                .is_none_or(|keys| keys.contains(&session.key))
    }

    /// Applies the filter to an unordered snapshot.
    pub(crate) fn apply<'a>(&self, sessions: impl Iterator<Item = &'a Session>) -> Vec<Session> {
        let mut selected: Vec<Session> = sessions.filter(|s| self.matches(s)).cloned().collect();
        selected.sort_by_key(|s| (s.created_at, s.key));
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}
