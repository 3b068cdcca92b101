//! Active and passive session tables.
//!
//! `active` holds sessions this node owns; `passive` holds read-only mirrors
//! pushed by a peer. A key lives in at most one of them. Locks are taken in
//! the order active, passive, tombstones, and are never held across network
//! I/O.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use callstate_types::{SessionKey, Timestamp};
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::filter::SessionFilter;
use crate::session::{Session, SessionState};

/// How long a passive removal keeps rejecting late pushes for its key.
const TOMBSTONE_RETENTION: Duration = Duration::from_secs(300);

/// Outcome of a passive install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveInstall {
    Installed,
    /// The key is active on this node.
    LocallyActive,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: RwLock<HashMap<SessionKey, Session>>,
    passive: RwLock<HashMap<SessionKey, Session>>,
    /// Passive removals by key, with the termination time they carried.
    tombstones: RwLock<HashMap<SessionKey, Timestamp>>,
}

macro_rules! read_lock {
    ($lock:expr) => {
        $lock.read().map_err(|_| SessionError::lock_poisoned())?
    };
}

macro_rules! write_lock {
    ($lock:expr) => {
        $lock.write().map_err(|_| SessionError::lock_poisoned())?
    };
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_active(&self, key: &SessionKey) -> SessionResult<Option<Session>> {
        Ok(read_lock!(self.active).get(key).cloned())
    }

    pub fn get_passive(&self, key: &SessionKey) -> SessionResult<Option<Session>> {
        Ok(read_lock!(self.passive).get(key).cloned())
    }

    /// Snapshot of matching active sessions; `NotFound` when empty.
    pub fn list_active(&self, filter: &SessionFilter) -> SessionResult<Vec<Session>> {
        let selected = filter.apply(read_lock!(self.active).values());
        if selected.is_empty() {
            return Err(SessionError::NotFound);
        }
        Ok(selected)
    }

    /// Snapshot of matching passive sessions; `NotFound` when empty.
    pub fn list_passive(&self, filter: &SessionFilter) -> SessionResult<Vec<Session>> {
        let selected = filter.apply(read_lock!(self.passive).values());
        if selected.is_empty() {
            return Err(SessionError::NotFound);
        }
        Ok(selected)
    }

    pub fn active_len(&self) -> SessionResult<usize> {
        Ok(read_lock!(self.active).len())
    }

    pub fn passive_len(&self) -> SessionResult<usize> {
        Ok(read_lock!(self.passive).len())
    }

    /// Inserts or replaces an owned session, dropping any passive mirror.
    ///
    /// The caller must hold the key's mutation right.
    pub fn put_active(&self, session: Session) -> SessionResult<()> {
        let mut active = write_lock!(self.active);
        let mut passive = write_lock!(self.passive);
        passive.remove(&session.key);
        active.insert(session.key, session);
        Ok(())
    }

    pub fn remove_active(&self, key: &SessionKey) -> SessionResult<Option<Session>> {
        Ok(write_lock!(self.active).remove(key))
    }

    /// Installs a mirror, replacing any held one, unless the key is locally
    /// active. Ordering between pushes is left to the caller.
    pub fn put_passive(&self, session: Session) -> SessionResult<PassiveInstall> {
        let active = read_lock!(self.active);
        if active.contains_key(&session.key) {
            return Ok(PassiveInstall::LocallyActive);
        }
        write_lock!(self.passive).insert(session.key, session);
        Ok(PassiveInstall::Installed)
    }

    /// Installs every mirror, skipping locally active keys. Returns the number
    /// installed.
    pub fn put_passive_bulk(&self, sessions: Vec<Session>) -> SessionResult<usize> {
        let active = read_lock!(self.active);
        let mut passive = write_lock!(self.passive);
        let mut tombstones = write_lock!(self.tombstones);

        let mut installed = 0;
        for session in sessions {
            if active.contains_key(&session.key) {
                continue;
            }
            tombstones.remove(&session.key);
            passive.insert(session.key, session);
            installed += 1;
        }
        Ok(installed)
    }

    pub fn remove_passive(&self, key: &SessionKey) -> SessionResult<Option<Session>> {
        Ok(write_lock!(self.passive).remove(key))
    }

    /// Whether a snapshot last updated at `updated_at` is older than what this
    /// node knows about `key`: a later mirror, or a removal at or after it.
    pub fn is_stale_push(&self, key: &SessionKey, updated_at: Timestamp) -> SessionResult<bool> {
        let passive = read_lock!(self.passive);
        let tombstones = read_lock!(self.tombstones);

        let held = passive.get(key).is_some_and(|s| s.updated_at > updated_at);
        let removed = tombstones.get(key).is_some_and(|at| *at >= updated_at);
        if held || removed {
            debug!(?key, %updated_at, "push older than held state");
        }
        Ok(held || removed)
    }

    /// Remembers a passive removal so later pushes carrying an older update
    /// time are recognized as stale. Entries expire after five minutes.
    pub fn record_removal(&self, key: &SessionKey, terminated_at: Timestamp) -> SessionResult<()> {
        let mut tombstones = write_lock!(self.tombstones);

        let now = Timestamp::now();
        tombstones.retain(|_, at| now.saturating_since(*at) < TOMBSTONE_RETENTION);
        let entry = tombstones.entry(*key).or_insert(terminated_at);
        *entry = (*entry).max(terminated_at);
        Ok(())
    }

    /// Moves passive mirrors into the active table.
    ///
    /// With `keys` unset every mirror is promoted. Keys that are already
    /// active or have no mirror are skipped.
    pub fn promote(&self, keys: Option<&[SessionKey]>) -> SessionResult<Vec<Session>> {
        let mut active = write_lock!(self.active);
        let mut passive = write_lock!(self.passive);

        let candidates: Vec<SessionKey> = match keys {
            Some(keys) => keys.to_vec(),
            None => passive.keys().copied().collect(),
        };

        let mut promoted = Vec::new();
        for key in candidates {
            if active.contains_key(&key) {
                continue;
            }
            let Some(mut session) = passive.remove(&key) else {
                continue;
            };
            session.state = SessionState::Active;
            session.updated_at = Timestamp::now_monotonic(Some(session.updated_at));
            active.insert(key, session.clone());
            promoted.push(session);
        }
        promoted.sort_by_key(|s| (s.created_at, s.key));
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstate_types::{CgrEvent, fields};

    fn session(origin_id: &str, updated_at: u64) -> Session {
        let event = CgrEvent::new("cgrates.org", "ev").with_field(fields::ORIGIN_ID, origin_id);
        let key = crate::identity::derive_key(&event).unwrap();
        let mut session = Session::new(key, &event, Timestamp::from_nanos(updated_at));
        session.state = SessionState::Active;
        session
    }

    #[test]
    fn empty_lists_are_not_found() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.list_active(&SessionFilter::default()),
            Err(SessionError::NotFound)
        ));
        assert!(matches!(
            registry.list_passive(&SessionFilter::default()),
            Err(SessionError::NotFound)
        ));
    }

    #[test]
    fn put_active_drops_passive_mirror() {
        let registry = SessionRegistry::new();
        let s = session("1", 10);
        registry.put_passive(s.clone()).unwrap();
        registry.put_active(s.clone()).unwrap();

        assert!(registry.get_passive(&s.key).unwrap().is_none());
        assert!(registry.get_active(&s.key).unwrap().is_some());
    }

    #[test]
    fn passive_installs_skip_active_keys() {
        let registry = SessionRegistry::new();
        let s = session("1", 10);
        registry.put_active(s.clone()).unwrap();

        assert_eq!(
            registry.put_passive(s.clone()).unwrap(),
            PassiveInstall::LocallyActive
        );
        assert_eq!(registry.put_passive_bulk(vec![s, session("2", 10)]).unwrap(), 1);
        assert_eq!(registry.passive_len().unwrap(), 1);
    }

    #[test]
    fn put_passive_replaces_regardless_of_age() {
        let registry = SessionRegistry::new();
        let newer = session("1", 20);
        let older = session("1", 10);

        registry.put_passive(newer.clone()).unwrap();
        assert!(registry.is_stale_push(&older.key, older.updated_at).unwrap());

        registry.put_passive(older.clone()).unwrap();
        assert_eq!(registry.get_passive(&newer.key).unwrap(), Some(older));
    }

    #[test]
    fn removal_marks_older_pushes_stale() {
        let registry = SessionRegistry::new();
        let s = session("1", 10);
        registry.put_passive(s.clone()).unwrap();

        registry
            .record_removal(&s.key, Timestamp::from_nanos(15))
            .unwrap();
        assert_eq!(registry.remove_passive(&s.key).unwrap(), Some(s.clone()));
        assert!(registry.is_stale_push(&s.key, Timestamp::from_nanos(12)).unwrap());
        assert!(registry.is_stale_push(&s.key, Timestamp::from_nanos(15)).unwrap());
        assert!(!registry.is_stale_push(&s.key, Timestamp::from_nanos(30)).unwrap());
    }

    #[test]
    fn removal_keeps_latest_termination_time() {
        let registry = SessionRegistry::new();
        let key = session("1", 0).key;
        registry.record_removal(&key, Timestamp::from_nanos(40)).unwrap();
        registry.record_removal(&key, Timestamp::from_nanos(20)).unwrap();
        assert!(registry.is_stale_push(&key, Timestamp::from_nanos(30)).unwrap());
    }

    #[test]
    fn promote_moves_selected_mirrors() {
        let registry = SessionRegistry::new();
        let a = session("a", 10);
        let b = session("b", 20);
        registry.put_passive_bulk(vec![a.clone(), b.clone()]).unwrap();

        let promoted = registry.promote(Some(&[a.key])).unwrap();
        assert_eq!(promoted.len(), 1);
        assert!(registry.get_active(&a.key).unwrap().is_some());
        assert!(registry.get_passive(&b.key).unwrap().is_some());

        assert!(registry.promote(Some(&[a.key])).unwrap().is_empty());
        assert_eq!(registry.promote(None).unwrap().len(), 1);
        assert_eq!(registry.passive_len().unwrap(), 0);
    }
}
