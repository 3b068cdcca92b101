//! Assembles a session service from configuration.

use std::sync::Arc;
use std::time::Duration;

use callstate_config::CallstateConfig;
use callstate_sessions::{
    InMemoryBilling, InProcessTransport, NotifierConfig, ReplicationConfig, SessionObserver,
    SessionResult, SessionService, SessionServiceConfig, StatsObserver, TransportRouter,
};
use callstate_stats::{MetricOptions, MetricRegistry};
use callstate_types::TransportKind;

use crate::transport::TcpTransport;

/// A configured node: the service plus the collaborators it was built with.
pub struct Node {
    pub service: Arc<SessionService>,
    pub stats: Option<Arc<StatsObserver>>,
}

impl Node {
    pub fn from_config(config: &CallstateConfig) -> SessionResult<Self> {
        Self::with_internal(config, Arc::new(InProcessTransport::new()))
    }

    /// Builds a node whose `*internal` targets resolve through `internal`.
    ///
    /// The node registers itself there under its id, so several nodes sharing
    /// one transport can replicate to each other in-process.
    pub fn with_internal(
        config: &CallstateConfig,
        internal: Arc<InProcessTransport>,
    ) -> SessionResult<Self> {
        let sessions = &config.sessions;

        let mut billing =
            InMemoryBilling::new(Duration::from_secs(config.billing.default_ceiling_secs));
        for allowance in &config.billing.accounts {
            billing = billing.with_balance(
                allowance.tenant.clone(),
                allowance.account.clone(),
                Duration::from_secs(allowance.balance_secs),
            );
        }

        let stats = if config.stats.metrics.is_empty() {
            None
        } else {
            let registry = MetricRegistry::new(MetricOptions {
                rounding_decimals: config.stats.rounding_decimals,
            });
            Some(Arc::new(StatsObserver::new(&registry, &config.stats.metrics)?))
        };
        let observers: Vec<Arc<dyn SessionObserver>> = stats
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn SessionObserver>)
            .collect();

        let transport = TransportRouter::new()
            .with(TransportKind::Json, Arc::new(TcpTransport::new()))
            .with(TransportKind::Internal, internal.clone());

        let service_config = SessionServiceConfig {
            node_id: config.node.id.clone(),
            max_call_duration: sessions.max_call_duration(),
            replication: ReplicationConfig {
                targets: sessions.replication_targets.clone(),
                timeout: sessions.replication_timeout(),
                workers: sessions.replication_workers,
                queue_capacity: sessions.replication_queue_capacity,
            },
            notify: NotifierConfig {
                workers: sessions.notify_workers,
                queue_capacity: sessions.notify_queue_capacity,
                overflow: sessions.notify_overflow,
            },
        };

        let service = Arc::new(SessionService::new(
            service_config,
            Arc::new(billing),
            Arc::new(transport),
            observers,
        )?);
        internal.register(config.node.id.clone(), &service);

        Ok(Self { service, stats })
    }
}
