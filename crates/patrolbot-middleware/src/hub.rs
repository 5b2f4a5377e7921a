//! Operator session hub: destination-based fan-out to connected sessions.
//!
//! Each operator connection registers a session and receives a bounded
//! [`mpsc`] outbox.  Sessions subscribe to destinations (e.g.
//! `/sub/robot/status`) under a client-chosen subscription id.  Publishing
//! walks the registry under a read lock and `try_send`s one [`Delivery`] per
//! matching subscription, so a slow operator can never stall the publisher.
//!
//! Deregistering a session removes all of its subscriptions in one step.  A
//! delivery already enqueued for a session that then disconnects is simply
//! dropped with its outbox.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use patrolbot_types::PatrolError;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::BroadcastAdapter;

/// Default per-session outbox capacity.
const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Identifier of one operator session.
pub type SessionId = Uuid;

/// A message queued for one subscription of one session.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub destination: String,
    pub subscription_id: String,
    pub body: Arc<str>,
}

struct SessionEntry {
    outbox: mpsc::Sender<Delivery>,
    /// subscription id → destination
    subscriptions: HashMap<String, String>,
}

/// Registry of live operator sessions and their subscriptions.
pub struct SessionHub {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    outbox_capacity: usize,
}

impl SessionHub {
    /// Create a hub whose sessions buffer up to `outbox_capacity` deliveries.
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            outbox_capacity: outbox_capacity.max(1),
        }
    }

    /// Register a new session and hand back its outbox receiver.
    pub fn register(&self) -> (SessionId, mpsc::Receiver<Delivery>) {
        let id = Uuid::new_v4();
        let (outbox, rx) = mpsc::channel(self.outbox_capacity);
        self.sessions.write().insert(
            id,
            SessionEntry {
                outbox,
                subscriptions: HashMap::new(),
            },
        );
        debug!(session = %id, "session registered");
        (id, rx)
    }

    /// Subscribe `session` to `destination` under `subscription_id`.
    ///
    /// Re-using a subscription id replaces its destination.
    pub fn subscribe(
        &self,
        session: SessionId,
        subscription_id: &str,
        destination: &str,
    ) -> Result<(), PatrolError> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(&session)
            .ok_or_else(|| PatrolError::Channel(format!("unknown session {session}")))?;
        entry
            .subscriptions
            .insert(subscription_id.to_string(), destination.to_string());
        debug!(session = %session, subscription = subscription_id, destination, "subscribed");
        Ok(())
    }

    /// Drop one subscription.  Returns `false` if it did not exist.
    pub fn unsubscribe(&self, session: SessionId, subscription_id: &str) -> bool {
        self.sessions
            .write()
            .get_mut(&session)
            .and_then(|entry| entry.subscriptions.remove(subscription_id))
            .is_some()
    }

    /// Remove `session` and every one of its subscriptions atomically.
    pub fn deregister(&self, session: SessionId) -> bool {
        let removed = self.sessions.write().remove(&session).is_some();
        if removed {
            debug!(session = %session, "session deregistered");
        }
        removed
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Number of subscriptions currently bound to `destination`.
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.sessions
            .read()
            .values()
            .flat_map(|entry| entry.subscriptions.values())
            .filter(|d| d.as_str() == destination)
            .count()
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl BroadcastAdapter for SessionHub {
    fn publish(&self, destination: &str, message: &str) -> Result<usize, PatrolError> {
        let body: Arc<str> = Arc::from(message);
        let sessions = self.sessions.read();
        let mut delivered = 0;

        for (id, entry) in sessions.iter() {
            for (subscription_id, dest) in &entry.subscriptions {
                if dest != destination {
                    continue;
                }
                let delivery = Delivery {
                    destination: destination.to_string(),
                    subscription_id: subscription_id.clone(),
                    body: Arc::clone(&body),
                };
                match entry.outbox.try_send(delivery) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(session = %id, destination, "session outbox full; delivery dropped");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(session = %id, destination, "session closing; delivery dropped");
                    }
                }
            }
        }

        Ok(delivered)
    }
}
