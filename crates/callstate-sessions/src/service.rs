//! The session RPC surface.
//!
//! `SessionService` owns one node's registry and drives the
//! Initiate / Update / Terminate state machine against it. Each transition
//! runs under the key's mutation right; replication and notification happen
//! after the right is released.

use std::sync::Arc;
use std::time::Duration;

use callstate_types::{
    CgrEvent, ReplicationTarget, SessionKey, Timestamp, checked_duration_add, fields,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::billing::BillingEngine;
use crate::error::{SessionError, SessionResult};
use crate::filter::SessionFilter;
use crate::identity::derive_key;
use crate::locks::KeyLocks;
use crate::notify::{Notifier, NotifierConfig, SessionEvent, SessionObserver};
use crate::registry::{PassiveInstall, SessionRegistry};
use crate::replication::{
    PeerHandler, PeerRequest, PeerTransport, ReplicationConfig, ReplicationCoordinator,
    ReplicationReport,
};
use crate::session::{Session, SessionState};

#[derive(Debug, Clone)]
pub struct SessionServiceConfig {
    pub node_id: String,
    /// Ceiling requested when an initiating event carries no usage.
    pub max_call_duration: Duration,
    pub replication: ReplicationConfig,
    pub notify: NotifierConfig,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            node_id: "callstate-1".to_string(),
            max_call_duration: Duration::from_secs(3 * 3600),
            replication: ReplicationConfig::default(),
            notify: NotifierConfig::default(),
        }
    }
}

/// Reply to `InitiateSession` and `UpdateSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UsageReply {
    #[serde(with = "callstate_types::serde_nanos")]
    pub max_usage: Duration,
    /// Synchronous replication targets that did not acknowledge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

/// Reply to `TerminateSession`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TerminateReply {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateSessionsArgs {
    #[serde(alias = "Connections")]
    pub targets: Vec<ReplicationTarget>,
    /// Push the passive table instead of the active one.
    #[serde(default, alias = "Passive")]
    pub passive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivateSessionsArgs {
    /// Keys to promote; all passive sessions when absent.
    pub keys: Option<Vec<SessionKey>>,
}

pub struct SessionService {
    node_id: String,
    max_call_duration: Duration,
    registry: SessionRegistry,
    locks: KeyLocks,
    billing: Arc<dyn BillingEngine>,
    replication: ReplicationCoordinator,
    notifier: Notifier,
}

impl SessionService {
    pub fn new(
        config: SessionServiceConfig,
        billing: Arc<dyn BillingEngine>,
        transport: Arc<dyn PeerTransport>,
        observers: Vec<Arc<dyn SessionObserver>>,
    ) -> SessionResult<Self> {
        let replication = ReplicationCoordinator::new(config.replication, transport)?;
        let notifier = Notifier::new(&config.notify, observers)?;

        info!(
            node = %config.node_id,
            targets = replication.targets().len(),
            "session service ready"
        );

        Ok(Self {
            node_id: config.node_id,
            max_call_duration: config.max_call_duration,
            registry: SessionRegistry::new(),
            locks: KeyLocks::new(),
            billing,
            replication,
            notifier,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Waits for asynchronous replication and notifications to drain.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.replication.flush(timeout) && self.notifier.flush(timeout)
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// Starts tracking a call and returns the authorized ceiling.
    ///
    /// Initiating a session that is already active returns its current
    /// ceiling without re-authorizing. A zero ceiling means billing denied
    /// the call; the session is still tracked.
    #[instrument(skip_all, fields(node = %self.node_id, key))]
    pub fn initiate_session(&self, event: &CgrEvent) -> SessionResult<UsageReply> {
        let key = derive_key(event)?;
        tracing::Span::current().record("key", tracing::field::display(key));
        let usage = event.duration_field(fields::USAGE)?;
        let requested = usage.unwrap_or(self.max_call_duration);

        let guard = self.locks.lock(key)?;
        if let Some(existing) = self.registry.get_active(&key)? {
            debug!("session already active");
            return Ok(UsageReply {
                max_usage: existing.max_usage,
                degraded: Vec::new(),
            });
        }

        let mut session = Session::new(key, event, Timestamp::now());
        self.authorize(&mut session, requested)?;
        session.set_usage(usage.unwrap_or_default());
        session.transition(SessionState::Active)?;
        self.registry.put_active(session.clone())?;
        drop(guard);

        let degraded = self
            .replication
            .replicate(PeerRequest::SetPassiveSession(session.clone()));
        info!(account = session.account(), max_usage = ?session.max_usage, "session initiated");

        let max_usage = session.max_usage;
        self.notifier.notify(SessionEvent::Initiated(session));
        Ok(UsageReply {
            max_usage,
            degraded,
        })
    }

    /// Adds the event's usage to the session and re-authorizes the total.
    #[instrument(skip_all, fields(node = %self.node_id, key))]
    pub fn update_session(&self, event: &CgrEvent) -> SessionResult<UsageReply> {
        let key = derive_key(event)?;
        tracing::Span::current().record("key", tracing::field::display(key));
        let delta = event.duration_field(fields::USAGE)?.unwrap_or_default();

        let guard = self.locks.lock(key)?;
        let mut session = self
            .registry
            .get_active(&key)?
            .ok_or(SessionError::SessionNotFound(key))?;

        let total = checked_duration_add(session.usage, delta)?;
        session.merge_event(event);
        self.authorize(&mut session, total)?;
        session.set_usage(total);
        session.transition(SessionState::Active)?;
        self.registry.put_active(session.clone())?;
        drop(guard);

        let degraded = self
            .replication
            .replicate(PeerRequest::SetPassiveSession(session.clone()));
        info!(usage = ?session.usage, max_usage = ?session.max_usage, "session updated");

        let max_usage = session.max_usage;
        self.notifier.notify(SessionEvent::Updated(session));
        Ok(UsageReply {
            max_usage,
            degraded,
        })
    }

    /// Debits final usage and stops tracking the call everywhere.
    ///
    /// Final usage is the event's usage when present, otherwise the usage
    /// accumulated so far.
    #[instrument(skip_all, fields(node = %self.node_id, key))]
    pub fn terminate_session(&self, event: &CgrEvent) -> SessionResult<TerminateReply> {
        let key = derive_key(event)?;
        tracing::Span::current().record("key", tracing::field::display(key));
        let final_usage = event.duration_field(fields::USAGE)?;

        let guard = self.locks.lock(key)?;
        let mut session = self
            .registry
            .get_active(&key)?
            .ok_or(SessionError::SessionNotFound(key))?;

        let usage = final_usage.unwrap_or(session.usage);
        for run in &session.runs {
            self.billing.debit(&session.usage_request(run, usage))?;
        }
        session.merge_event(event);
        session.set_usage(usage);
        session.transition(SessionState::Terminated)?;
        self.registry.remove_active(&key)?;
        drop(guard);

        let degraded = self.replication.replicate(PeerRequest::RemovePassiveSession {
            key,
            terminated_at: session.updated_at,
        });
        info!(usage = ?usage, "session terminated");

        self.notifier.notify(SessionEvent::Terminated(session));
        Ok(TerminateReply { degraded })
    }

    /// Authorizes `usage` on every run; the session ceiling is the smallest
    /// grant.
    fn authorize(&self, session: &mut Session, usage: Duration) -> SessionResult<()> {
        let grants = session
            .runs
            .iter()
            .map(|run| self.billing.authorize_usage(&session.usage_request(run, usage)))
            .collect::<Result<Vec<_>, _>>()?;

        for (run, granted) in session.runs.iter_mut().zip(&grants) {
            run.max_usage = *granted;
        }
        session.max_usage = grants.iter().copied().min().unwrap_or_default();
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_active_sessions(&self, filter: &SessionFilter) -> SessionResult<Vec<Session>> {
        self.registry.list_active(filter)
    }

    pub fn get_passive_sessions(&self, filter: &SessionFilter) -> SessionResult<Vec<Session>> {
        self.registry.list_passive(filter)
    }

    // ========================================================================
    // Operator actions
    // ========================================================================

    /// Pushes the whole active (or passive) table to `args.targets`.
    ///
    /// Receivers install the sessions as passive; nothing is promoted.
    #[instrument(skip_all, fields(node = %self.node_id, passive = args.passive))]
    pub fn replicate_sessions(
        &self,
        args: &ReplicateSessionsArgs,
    ) -> SessionResult<ReplicationReport> {
        if args.targets.is_empty() {
            return Err(SessionError::InvalidArgument(
                "no replication targets".to_string(),
            ));
        }

        let all = SessionFilter::default();
        let selected = if args.passive {
            self.registry.list_passive(&all)
        } else {
            self.registry.list_active(&all)
        };
        let sessions = match selected {
            Ok(sessions) => sessions,
            Err(SessionError::NotFound) => Vec::new(),
            Err(e) => return Err(e),
        };

        let report = self.replication.replicate_bulk(&args.targets, sessions)?;
        info!(
            sessions = report.sessions,
            targets = report.succeeded.len(),
            "sessions replicated"
        );
        Ok(report)
    }

    /// Promotes passive mirrors to active on this node.
    ///
    /// Never called automatically. `NotFound` when nothing was promoted.
    #[instrument(skip_all, fields(node = %self.node_id))]
    pub fn activate_sessions(&self, args: &ActivateSessionsArgs) -> SessionResult<Vec<SessionKey>> {
        let promoted = self.registry.promote(args.keys.as_deref())?;
        if promoted.is_empty() {
            return Err(SessionError::NotFound);
        }

        let keys: Vec<SessionKey> = promoted.iter().map(|s| s.key).collect();
        info!(count = keys.len(), "passive sessions activated");
        Ok(keys)
    }

    // ========================================================================
    // Peer surface
    // ========================================================================

    /// Installs a pushed snapshot unless a newer one is held.
    /// Installs a pushed snapshot unless this node holds something at least
    /// as recent for the key (last writer wins on `updated_at`).
    pub fn set_passive_session(&self, session: Session) -> SessionResult<()> {
        verify_key(&session)?;
        let key = session.key;

        let _guard = self.locks.lock(key)?;
        if self.registry.is_stale_push(&key, session.updated_at)? {
            debug!(node = %self.node_id, %key, "stale push ignored");
            return Ok(());
        }
        match self.registry.put_passive(session)? {
            PassiveInstall::Installed => debug!(node = %self.node_id, %key, "passive session set"),
            PassiveInstall::LocallyActive => {
                debug!(node = %self.node_id, %key, "push for locally active session ignored");
            }
        }
        Ok(())
    }

    /// Drops the mirror for `key` unless it was updated after
    /// `terminated_at`. The removal is remembered so late pushes are
    /// discarded.
    pub fn remove_passive_session(
        &self,
        key: SessionKey,
        terminated_at: Timestamp,
    ) -> SessionResult<()> {
        let _guard = self.locks.lock(key)?;
        self.registry.record_removal(&key, terminated_at)?;
        let removed = match self.registry.get_passive(&key)? {
            Some(held) if held.updated_at > terminated_at => false,
            Some(_) => self.registry.remove_passive(&key)?.is_some(),
            None => false,
        };
        debug!(node = %self.node_id, %key, removed, "passive session removal");
        Ok(())
    }

    pub fn set_passive_sessions(&self, sessions: Vec<Session>) -> SessionResult<()> {
        for session in &sessions {
            verify_key(session)?;
        }
        let received = sessions.len();
        let installed = self.registry.put_passive_bulk(sessions)?;
        info!(node = %self.node_id, received, installed, "passive sessions installed");
        Ok(())
    }
}

impl PeerHandler for SessionService {
    fn handle_peer(&self, request: PeerRequest) -> SessionResult<()> {
        match request {
            PeerRequest::SetPassiveSession(session) => self.set_passive_session(session),
            PeerRequest::RemovePassiveSession { key, terminated_at } => {
                self.remove_passive_session(key, terminated_at)
            }
            PeerRequest::SetPassiveSessions(sessions) => self.set_passive_sessions(sessions),
        }
    }
}

/// A snapshot's key must be the one its own event derives.
fn verify_key(session: &Session) -> SessionResult<()> {
    let derived = derive_key(&session.event)?;
    if derived != session.key {
        return Err(SessionError::InvalidArgument(format!(
            "session key {} does not match its event",
            session.key
        )));
    }
    Ok(())
}
