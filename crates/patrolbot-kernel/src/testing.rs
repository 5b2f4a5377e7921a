//! Test doubles shared by the kernel's unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use patrolbot_middleware::{DeliveryGuarantee, PubSubAdapter};
use patrolbot_types::PatrolError;

/// In-memory robot link that records every publish and subscribe.
#[derive(Default)]
pub struct RecordingPubSub {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    subscribed: Mutex<Vec<(String, DeliveryGuarantee)>>,
    failing: Mutex<bool>,
}

impl RecordingPubSub {
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }

    pub fn subscribed(&self) -> Vec<(String, DeliveryGuarantee)> {
        self.subscribed.lock().clone()
    }

    /// Make every subsequent publish fail as if the broker were gone.
    pub fn fail_publishes(&self, fail: bool) {
        *self.failing.lock() = fail;
    }
}

#[async_trait]
impl PubSubAdapter for RecordingPubSub {
    async fn subscribe(&self, topic: &str, guarantee: DeliveryGuarantee) -> Result<(), PatrolError> {
        self.subscribed.lock().push((topic.to_string(), guarantee));
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PatrolError> {
        if *self.failing.lock() {
            return Err(PatrolError::TransportUnavailable("broker offline".into()));
        }
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }
}
