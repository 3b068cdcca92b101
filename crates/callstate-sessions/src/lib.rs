//! # callstate-sessions: charging session registry
//!
//! Tracks in-progress calls on one node, authorizes and debits their usage
//! against a [`BillingEngine`], and mirrors every change to peer nodes so a
//! standby can take over.
//!
//! # Architecture
//!
//! ```text
//!  InitiateSession / UpdateSession / TerminateSession
//!                        │
//!                        ▼
//!                 ┌──────────────┐   per-key lock   ┌──────────────┐
//!                 │SessionService│ ───────────────► │SessionRegistry│
//!                 └──────┬───────┘                  │ active       │
//!          after unlock  │                          │ passive      │
//!        ┌───────────────┴───────────────┐          └──────────────┘
//!        ▼                               ▼
//!  ReplicationCoordinator             Notifier
//!   sync: inline call                 WorkerPool ──► SessionObserver
//!   async: WorkerPool ──► PeerTransport
//! ```
//!
//! Sessions are keyed by [`derive_key`]: a digest of tenant, origin id and
//! origin host. A node holds a session either *active* (it owns the state
//! machine) or *passive* (a mirror pushed by a peer). Passive sessions are
//! only promoted by an explicit [`SessionService::activate_sessions`] call.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use callstate_sessions::{InMemoryBilling, InProcessTransport, SessionService, SessionServiceConfig};
//! use callstate_types::{CgrEvent, fields};
//!
//! let service = SessionService::new(
//!     SessionServiceConfig::default(),
//!     Arc::new(InMemoryBilling::new(Duration::from_secs(3600))),
//!     Arc::new(InProcessTransport::new()),
//!     Vec::new(),
//! )
//! .unwrap();
//!
//! let event = CgrEvent::new("cgrates.org", "call")
//!     .with_field(fields::ORIGIN_ID, "abc")
//!     .with_field(fields::ACCOUNT, "1001")
//!     .with_field(fields::USAGE, Duration::from_secs(90));
//!
//! let reply = service.initiate_session(&event).unwrap();
//! assert_eq!(reply.max_usage, Duration::from_secs(90));
//! ```

mod billing;
mod bounded_queue;
mod error;
mod filter;
mod identity;
mod locks;
mod notify;
mod registry;
mod replication;
mod runtime;
mod service;
mod session;
mod stats_observer;

pub use billing::{BillingEngine, BillingError, InMemoryBilling, UsageRequest};
pub use bounded_queue::{BoundedQueue, PushResult};
pub use error::{SessionError, SessionResult};
pub use filter::SessionFilter;
pub use identity::derive_key;
pub use locks::{KeyGuard, KeyLocks};
pub use notify::{Notifier, NotifierConfig, SessionEvent, SessionObserver};
pub use registry::{PassiveInstall, SessionRegistry};
pub use replication::{
    InProcessTransport, PeerHandler, PeerRequest, PeerTransport, ReplicationConfig,
    ReplicationCoordinator, ReplicationReport, TransportError, TransportRouter,
};
pub use runtime::{PoolConfig, PoolRouter, WorkerPool};
pub use service::{
    ActivateSessionsArgs, ReplicateSessionsArgs, SessionService, SessionServiceConfig,
    TerminateReply, UsageReply,
};
pub use session::{DEFAULT_RUN_ID, Session, SessionRun, SessionState};
pub use stats_observer::StatsObserver;
