//! MQTT adapter for the physical robot link.
//!
//! [`MqttAdapter`] owns the broker connection lifecycle:
//!
//! * **Connect** – built from an explicit [`MqttLinkConfig`]
//!   (`{broker address, client id, delivery guarantee}`); the `rumqttc`
//!   event loop runs on its own Tokio task.
//!
//! * **Inbound** – every `PUBLISH` received is forwarded, in arrival order, to
//!   the [`InboundStream`] handed out by [`MqttAdapter::connect`].
//!
//! * **Reconnect** – connection errors are logged and retried after
//!   [`RECONNECT_DELAY`]; registered subscriptions are re-issued on every
//!   reconnect because sessions are clean.
//!
//! * **Outbound** – [`PubSubAdapter::publish`] queues without waiting for the
//!   broker (`try_publish`), so callers are never stalled by the link.  While
//!   the broker is unreachable it fails immediately instead of buffering
//!   commands for a later reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use patrolbot_types::PatrolError;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::{DeliveryGuarantee, InboundMessage, PubSubAdapter};

/// Pause between reconnect attempts after a connection error.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Largest MQTT packet accepted or sent.  SDP offers routinely exceed the
/// `rumqttc` default of 10 KiB.
pub const MAX_PACKET_BYTES: usize = 512 * 1024;

/// Buffered inbound messages between the event loop and the consumer.
const INBOUND_CAPACITY: usize = 256;

/// Stream of messages received from the robot link.
pub type InboundStream = BoxStream<'static, InboundMessage>;

impl From<DeliveryGuarantee> for QoS {
    fn from(value: DeliveryGuarantee) -> Self {
        match value {
            DeliveryGuarantee::AtMostOnce => QoS::AtMostOnce,
            DeliveryGuarantee::AtLeastOnce => QoS::AtLeastOnce,
            DeliveryGuarantee::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Connection parameters for the robot-side broker.
#[derive(Debug, Clone)]
pub struct MqttLinkConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Guarantee used for outbound publishes.
    pub delivery: DeliveryGuarantee,
    pub keep_alive: Duration,
    /// Capacity of the client → event-loop request queue.
    pub request_capacity: usize,
}

impl Default for MqttLinkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "patrolbot-bridge".to_string(),
            delivery: DeliveryGuarantee::AtLeastOnce,
            keep_alive: Duration::from_secs(15),
            request_capacity: 64,
        }
    }
}

type SubscriptionList = Arc<Mutex<Vec<(String, QoS)>>>;

/// `rumqttc`-backed [`PubSubAdapter`].
pub struct MqttAdapter {
    client: AsyncClient,
    delivery: DeliveryGuarantee,
    subscriptions: SubscriptionList,
    /// Set on `CONNACK`, cleared on connection errors and disconnect.
    connected: Arc<AtomicBool>,
}

impl MqttAdapter {
    /// Create the client and spawn its event loop.
    ///
    /// Must be called from within a Tokio runtime.  The returned stream ends
    /// once the adapter has been [disconnected][Self::disconnect].
    pub fn connect(config: &MqttLinkConfig) -> (Self, InboundStream) {
        let mut opts = MqttOptions::new(&config.client_id, &config.host, config.port);
        opts.set_keep_alive(config.keep_alive);
        opts.set_clean_session(true);
        opts.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);

        let (client, eventloop) = AsyncClient::new(opts, config.request_capacity);
        let subscriptions: SubscriptionList = Arc::new(Mutex::new(Vec::new()));
        let connected = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

        info!(
            broker = %format!("{}:{}", config.host, config.port),
            client_id = %config.client_id,
            "connecting to robot broker"
        );
        tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            Arc::clone(&subscriptions),
            Arc::clone(&connected),
            tx,
        ));

        let inbound = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        })
        .boxed();

        (
            Self {
                client,
                delivery: config.delivery,
                subscriptions,
                connected,
            },
            inbound,
        )
    }

    /// Whether the broker has acknowledged the current connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Topics currently registered for (re)subscription.
    #[cfg(test)]
    fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Send `DISCONNECT` and let the event loop wind down.
    pub async fn disconnect(&self) -> Result<(), PatrolError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| PatrolError::TransportUnavailable(e.to_string()))
    }
}

#[async_trait]
impl PubSubAdapter for MqttAdapter {
    async fn subscribe(&self, topic: &str, guarantee: DeliveryGuarantee) -> Result<(), PatrolError> {
        let qos = QoS::from(guarantee);
        {
            let mut subs = self.subscriptions.lock();
            match subs.iter_mut().find(|(t, _)| t == topic) {
                Some(entry) => entry.1 = qos,
                None => subs.push((topic.to_string(), qos)),
            }
        }
        self.client
            .subscribe(topic, qos)
            .await
            .map_err(|e| PatrolError::TransportUnavailable(e.to_string()))
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PatrolError> {
        if !self.is_connected() {
            return Err(PatrolError::TransportUnavailable(format!(
                "robot broker not connected; '{topic}' not sent"
            )));
        }
        self.client
            .try_publish(topic, QoS::from(self.delivery), false, payload)
            .map_err(|e| PatrolError::TransportUnavailable(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event loop
// ─────────────────────────────────────────────────────────────────────────────

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: SubscriptionList,
    connected: Arc<AtomicBool>,
    inbound: mpsc::Sender<InboundMessage>,
) {
    let mut connected_once = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                if connected_once {
                    resubscribe(&client, &subscriptions);
                } else {
                    connected_once = true;
                }
                connected.store(true, Ordering::Release);
                info!("robot broker connected");
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                let msg = InboundMessage {
                    topic: p.topic,
                    payload: p.payload.to_vec(),
                };
                // Awaiting here keeps delivery serial and in order.
                if inbound.send(msg).await.is_err() {
                    debug!("inbound consumer dropped; stopping event loop");
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::Release);
                info!("robot broker disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::Release);
                warn!(error = %e, "robot broker connection error; retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Re-issue every registered subscription without blocking the event loop.
fn resubscribe(client: &AsyncClient, subscriptions: &SubscriptionList) {
    for (topic, qos) in subscriptions.lock().iter() {
        if let Err(e) = client.try_subscribe(topic.as_str(), *qos) {
            warn!(topic = %topic, error = %e, "resubscribe failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_guarantee_maps_to_qos() {
        assert_eq!(QoS::from(DeliveryGuarantee::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(QoS::from(DeliveryGuarantee::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::from(DeliveryGuarantee::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn default_link_is_at_least_once_on_localhost() {
        let cfg = MqttLinkConfig::default();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 1883);
        assert_eq!(cfg.delivery, DeliveryGuarantee::AtLeastOnce);
    }

    #[tokio::test]
    async fn subscribe_registers_topic_once() {
        // Port 1 is never a broker; the event loop just keeps retrying.
        let cfg = MqttLinkConfig {
            port: 1,
            ..MqttLinkConfig::default()
        };
        let (adapter, _inbound) = MqttAdapter::connect(&cfg);

        adapter
            .subscribe("/robot/status", DeliveryGuarantee::AtLeastOnce)
            .await
            .unwrap();
        adapter
            .subscribe("/robot/status", DeliveryGuarantee::ExactlyOnce)
            .await
            .unwrap();
        adapter
            .subscribe("/robot/pose", DeliveryGuarantee::AtLeastOnce)
            .await
            .unwrap();

        assert_eq!(
            adapter.subscribed_topics(),
            vec!["/robot/status".to_string(), "/robot/pose".to_string()]
        );
    }

    #[tokio::test]
    async fn publish_fails_fast_while_broker_unreachable() {
        let cfg = MqttLinkConfig {
            port: 1,
            ..MqttLinkConfig::default()
        };
        let (adapter, _inbound) = MqttAdapter::connect(&cfg);
        assert!(!adapter.is_connected());

        // More moves than the request queue holds: none may be buffered.
        for _ in 0..cfg.request_capacity + 1 {
            let result = adapter.publish(
                "/robot/control",
                br#"{"type":"MOVE","linear":1.0,"angular":0.0}"#.to_vec(),
            );
            assert!(matches!(result, Err(PatrolError::TransportUnavailable(_))));
        }

        let stop = adapter.publish("/robot/control", br#"{"type":"STOP"}"#.to_vec());
        assert!(matches!(stop, Err(PatrolError::TransportUnavailable(_))));
    }

    #[tokio::test]
    async fn publish_queues_once_connected() {
        // No event loop task: the flag stays where the test puts it.
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("t", "localhost", 1), 4);
        let adapter = MqttAdapter {
            client,
            delivery: DeliveryGuarantee::AtLeastOnce,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(true)),
        };

        let result = adapter.publish("/robot/control", br#"{"type":"STOP"}"#.to_vec());
        assert!(result.is_ok());
    }
}
