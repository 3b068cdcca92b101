//! Out-of-band collaborator notifications.
//!
//! Lifecycle events are handed to a bounded worker pool and fanned out to
//! every registered [`SessionObserver`]. Notification is fire-and-forget: the
//! state machine never waits for observers and never sees their failures.
//! Events for one session reach observers in order.

use std::sync::Arc;
use std::time::Duration;

use callstate_types::{OverflowPolicy, SessionKey};
use tracing::{debug, warn};

use crate::bounded_queue::PushResult;
use crate::error::SessionResult;
use crate::runtime::{PoolConfig, WorkerPool};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Initiated(Session),
    Updated(Session),
    Terminated(Session),
}

impl SessionEvent {
    pub fn session(&self) -> &Session {
        match self {
            Self::Initiated(s) | Self::Updated(s) | Self::Terminated(s) => s,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initiated(_) => "initiated",
            Self::Updated(_) => "updated",
            Self::Terminated(_) => "terminated",
        }
    }
}

/// A threshold, stats or other collaborator interested in session changes.
pub trait SessionObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &SessionEvent);
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1024,
            overflow: OverflowPolicy::DropNewest,
        }
    }
}

pub struct Notifier {
    /// Absent when there are no observers.
    pool: Option<WorkerPool<SessionEvent>>,
}

impl Notifier {
    pub fn new(
        config: &NotifierConfig,
        observers: Vec<Arc<dyn SessionObserver>>,
    ) -> SessionResult<Self> {
        if observers.is_empty() {
            return Ok(Self { pool: None });
        }

        let names: Vec<String> = observers.iter().map(|o| o.name().to_string()).collect();
        debug!(observers = ?names, workers = config.workers, "starting notifier");

        let pool_config = PoolConfig {
            name: "cst-notify".to_string(),
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            overflow: config.overflow,
        };
        let pool = WorkerPool::start(&pool_config, move |event: SessionEvent| {
            for observer in &observers {
                observer.on_event(&event);
            }
        })?;

        Ok(Self { pool: Some(pool) })
    }

    pub fn notify(&self, event: SessionEvent) {
        let Some(pool) = &self.pool else {
            return;
        };
        let route = route_key(&event.session().key);
        match pool.submit(route, event) {
            PushResult::Ok => {}
            PushResult::Rejected(lost) | PushResult::Evicted(lost) => {
                warn!(
                    kind = lost.kind(),
                    key = %lost.session().key,
                    "notification queue full, event dropped"
                );
            }
        }
    }

    /// Waits for queued notifications to be delivered.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.pool.as_ref().is_none_or(|pool| pool.flush(timeout))
    }

    /// Notifications lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.pool.as_ref().map_or(0, WorkerPool::dropped)
    }
}

pub(crate) fn route_key(key: &SessionKey) -> u64 {
    let bytes = key.as_bytes();
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstate_types::{CgrEvent, Timestamp, fields};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(&'static str, String)>>,
    }

    impl SessionObserver for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_event(&self, event: &SessionEvent) {
            self.seen
                .lock()
                .unwrap()
                .push((event.kind(), event.session().origin_id.clone()));
        }
    }

    fn session(origin_id: &str) -> Session {
        let event = CgrEvent::new("cgrates.org", "ev").with_field(fields::ORIGIN_ID, origin_id);
        let key = crate::identity::derive_key(&event).unwrap();
        Session::new(key, &event, Timestamp::EPOCH)
    }

    #[test]
    fn events_reach_every_observer_in_order() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let notifier = Notifier::new(
            &NotifierConfig::default(),
            vec![a.clone() as Arc<dyn SessionObserver>, b.clone() as Arc<dyn SessionObserver>],
        )
        .unwrap();

        let s = session("1");
        notifier.notify(SessionEvent::Initiated(s.clone()));
        notifier.notify(SessionEvent::Updated(s.clone()));
        notifier.notify(SessionEvent::Terminated(s));
        assert!(notifier.flush(Duration::from_secs(5)));

        let expected = vec![
            ("initiated", "1".to_string()),
            ("updated", "1".to_string()),
            ("terminated", "1".to_string()),
        ];
        assert_eq!(*a.seen.lock().unwrap(), expected);
        assert_eq!(*b.seen.lock().unwrap(), expected);
        assert_eq!(notifier.dropped(), 0);
    }

    #[test]
    fn no_observers_is_a_no_op() {
        let notifier = Notifier::new(&NotifierConfig::default(), Vec::new()).unwrap();
        notifier.notify(SessionEvent::Initiated(session("1")));
        assert!(notifier.flush(Duration::from_millis(10)));
    }
}
