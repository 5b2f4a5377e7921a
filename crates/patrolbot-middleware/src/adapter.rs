//! Transport seams.
//!
//! The bridge core never speaks MQTT or WebSocket directly.  It talks to two
//! adapters:
//!
//! - [`PubSubAdapter`] – the robot-side link (subscribe/publish with a
//!   configurable [`DeliveryGuarantee`]).  Implemented by
//!   [`MqttAdapter`][crate::mqtt_adapter::MqttAdapter].
//! - [`BroadcastAdapter`] – the operator-side fan-out.  Implemented by
//!   [`SessionHub`][crate::hub::SessionHub].

use async_trait::async_trait;
use patrolbot_types::PatrolError;
use serde::{Deserialize, Serialize};

/// Delivery guarantee requested from the robot link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

/// One message received from the robot link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Robot-side publish/subscribe transport.
///
/// # Contract
///
/// * `subscribe` – registers interest in `topic`; inbound messages are
///   delivered serially per connection on the stream handed out when the
///   adapter was constructed, so per-robot order is preserved.
///
/// * `publish` – fire-and-forget.  Returns as soon as the message is queued;
///   an `Err` means the transport could not even accept it.
#[async_trait]
pub trait PubSubAdapter: Send + Sync {
    async fn subscribe(&self, topic: &str, guarantee: DeliveryGuarantee) -> Result<(), PatrolError>;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PatrolError>;
}

/// Operator-side multi-subscriber fan-out.
///
/// `publish` delivers `message` to every session subscribed to `destination`
/// at call time and returns how many deliveries were enqueued.  It never
/// blocks beyond the time needed to enqueue.
pub trait BroadcastAdapter: Send + Sync {
    fn publish(&self, destination: &str, message: &str) -> Result<usize, PatrolError>;
}
