//! Session replication to peer nodes.
//!
//! Every active-session change is pushed to the configured targets as a
//! passive snapshot (or a removal notice). Synchronous targets are called on
//! the caller's thread after all session locks are released; their failures
//! are reported back as degraded targets. Asynchronous targets are served by a
//! bounded worker pool, one FIFO per target, and their failures are only
//! logged. Nothing is retried and nothing is rolled back.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use callstate_types::{OverflowPolicy, ReplicationTarget, SessionKey, Timestamp, TransportKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::bounded_queue::PushResult;
use crate::error::{SessionError, SessionResult};
use crate::runtime::{PoolConfig, WorkerPool};
use crate::session::Session;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("peer timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with an error.
    #[error("peer error {code}: {message}")]
    Remote { code: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Calls one node makes on another's replication surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum PeerRequest {
    /// Install one snapshot unless a newer one is held.
    SetPassiveSession(Session),
    /// Drop a mirror unless it was updated after `terminated_at`.
    RemovePassiveSession {
        key: SessionKey,
        terminated_at: Timestamp,
    },
    /// Install many snapshots unconditionally.
    SetPassiveSessions(Vec<Session>),
}

impl PeerRequest {
    pub fn method(&self) -> &'static str {
        match self {
            Self::SetPassiveSession(_) => "SetPassiveSession",
            Self::RemovePassiveSession { .. } => "RemovePassiveSession",
            Self::SetPassiveSessions(_) => "SetPassiveSessions",
        }
    }
}

/// Delivers peer requests. Implementations must give up after `timeout`.
pub trait PeerTransport: Send + Sync {
    fn call(
        &self,
        target: &ReplicationTarget,
        request: &PeerRequest,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}

/// The receiving side of [`PeerRequest`].
pub trait PeerHandler: Send + Sync {
    fn handle_peer(&self, request: PeerRequest) -> SessionResult<()>;
}

/// Routes `*internal` targets to services in the same process by node name.
///
/// Handlers are held weakly; a dropped or deregistered node is unreachable.
/// Calls run on the caller's thread, so `timeout` is not enforced.
#[derive(Default)]
pub struct InProcessTransport {
    peers: RwLock<HashMap<String, Weak<dyn PeerHandler>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: PeerHandler + 'static>(&self, name: impl Into<String>, handler: &Arc<H>) {
        let handler: Arc<dyn PeerHandler> = handler.clone();
        if let Ok(mut peers) = self.peers.write() {
            peers.insert(name.into(), Arc::downgrade(&handler));
        }
    }

    /// Makes `name` unreachable, as if the node had crashed.
    pub fn deregister(&self, name: &str) {
        if let Ok(mut peers) = self.peers.write() {
            peers.remove(name);
        }
    }
}

impl PeerTransport for InProcessTransport {
    fn call(
        &self,
        target: &ReplicationTarget,
        request: &PeerRequest,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        let handler = self
            .peers
            .read()
            .map_err(|_| TransportError::Unreachable(target.address.clone()))?
            .get(&target.address)
            .and_then(Weak::upgrade)
            .ok_or_else(|| TransportError::Unreachable(target.address.clone()))?;

        handler
            .handle_peer(request.clone())
            .map_err(|e| TransportError::Remote {
                code: e.code().to_string(),
                message: e.to_string(),
            })
    }
}

/// Dispatches to a transport by the target's [`TransportKind`].
#[derive(Default, Clone)]
pub struct TransportRouter {
    transports: HashMap<TransportKind, Arc<dyn PeerTransport>>,
}

impl TransportRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: TransportKind, transport: Arc<dyn PeerTransport>) -> Self {
        self.transports.insert(kind, transport);
        self
    }
}

impl PeerTransport for TransportRouter {
    fn call(
        &self,
        target: &ReplicationTarget,
        request: &PeerRequest,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.transports
            .get(&target.transport)
            .ok_or_else(|| TransportError::Unreachable(format!("no transport for {target}")))?
            .call(target, request, timeout)
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub targets: Vec<ReplicationTarget>,
    pub timeout: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            timeout: Duration::from_secs(2),
            workers: 2,
            queue_capacity: 1024,
        }
    }
}

/// Result of a successful bulk replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationReport {
    pub sessions: usize,
    pub succeeded: Vec<String>,
}

struct AsyncPush {
    target: ReplicationTarget,
    request: Arc<PeerRequest>,
}

pub struct ReplicationCoordinator {
    targets: Vec<ReplicationTarget>,
    transport: Arc<dyn PeerTransport>,
    timeout: Duration,
    /// Present when at least one target is asynchronous.
    pool: Option<WorkerPool<AsyncPush>>,
}

impl ReplicationCoordinator {
    pub fn new(
        config: ReplicationConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> SessionResult<Self> {
        let pool = if config.targets.iter().any(|t| !t.synchronous) {
            let pool_config = PoolConfig {
                name: "cst-replicate".to_string(),
                workers: config.workers,
                queue_capacity: config.queue_capacity,
                overflow: OverflowPolicy::DropNewest,
            };
            let worker_transport = Arc::clone(&transport);
            let timeout = config.timeout;
            Some(WorkerPool::start(&pool_config, move |push: AsyncPush| {
                if let Err(e) = worker_transport.call(&push.target, &push.request, timeout) {
                    warn!(
                        peer = %push.target,
                        method = push.request.method(),
                        error = %e,
                        "async replication failed"
                    );
                }
            })?)
        } else {
            None
        };

        Ok(Self {
            targets: config.targets,
            transport,
            timeout: config.timeout,
            pool,
        })
    }

    pub fn targets(&self) -> &[ReplicationTarget] {
        &self.targets
    }

    /// Pushes `request` to every configured target.
    ///
    /// Returns the synchronous targets that could not be reached. Must not be
    /// called while holding a session lock.
    pub fn replicate(&self, request: PeerRequest) -> Vec<String> {
        if self.targets.is_empty() {
            return Vec::new();
        }

        let request = Arc::new(request);
        let mut degraded = Vec::new();
        for target in &self.targets {
            if target.synchronous {
                match self.transport.call(target, &request, self.timeout) {
                    Ok(()) => debug!(peer = %target, method = request.method(), "replicated"),
                    Err(e) => {
                        warn!(
                            peer = %target,
                            method = request.method(),
                            error = %e,
                            "sync replication failed"
                        );
                        degraded.push(target.to_string());
                    }
                }
                continue;
            }

            let Some(pool) = &self.pool else {
                continue;
            };
            let push = AsyncPush {
                target: target.clone(),
                request: Arc::clone(&request),
            };
            if let PushResult::Rejected(lost) | PushResult::Evicted(lost) =
                pool.submit(target_route(target), push)
            {
                warn!(
                    peer = %lost.target,
                    method = lost.request.method(),
                    "replication queue full, push dropped"
                );
            }
        }
        degraded
    }

    /// Pushes `sessions` to `targets` and waits for every answer.
    ///
    /// Any failing target turns the result into
    /// [`SessionError::PartialReplication`].
    pub fn replicate_bulk(
        &self,
        targets: &[ReplicationTarget],
        sessions: Vec<Session>,
    ) -> SessionResult<ReplicationReport> {
        let count = sessions.len();
        let request = PeerRequest::SetPassiveSessions(sessions);

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for target in targets {
            match self.transport.call(target, &request, self.timeout) {
                Ok(()) => succeeded.push(target.to_string()),
                Err(e) => {
                    warn!(peer = %target, error = %e, "bulk replication failed");
                    failed.push(format!("{target}: {e}"));
                }
            }
        }

        if !failed.is_empty() {
            return Err(SessionError::PartialReplication { succeeded, failed });
        }
        Ok(ReplicationReport {
            sessions: count,
            succeeded,
        })
    }

    /// Waits for queued asynchronous pushes.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.pool.as_ref().is_none_or(|pool| pool.flush(timeout))
    }
}

fn target_route(target: &ReplicationTarget) -> u64 {
    let mut hasher = DefaultHasher::new();
    target.hash(&mut hasher);
    hasher.finish()
}
