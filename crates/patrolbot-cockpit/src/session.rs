//! One operator's STOMP session.
//!
//! [`StompSession`] turns inbound frames into hub subscriptions and bridge
//! calls, and returns the frames to write back.  It owns no socket, so the
//! whole protocol can be driven from tests.
//!
//! | inbound                         | effect                                   |
//! |---------------------------------|------------------------------------------|
//! | `CONNECT` / `STOMP`             | `CONNECTED`                              |
//! | `SUBSCRIBE` (`/sub/...`)        | hub subscription under the client `id`   |
//! | `UNSUBSCRIBE`                   | drop that subscription                   |
//! | `SEND /pub/robot/control`       | [`Bridge::dispatch_command`]             |
//! | `SEND /pub/robot/producer`      | [`Bridge::set_producer_mode`]            |
//! | `SEND /pub/peer/{offer,answer,candidate}` | [`Bridge::relay_signal`] from `Web` |
//! | `DISCONNECT`                    | close after the receipt                  |
//!
//! A failed `SEND` produces an `ERROR` frame with a `message` header; the
//! session stays open.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use patrolbot_kernel::Bridge;
use patrolbot_middleware::{Delivery, SessionHub, SessionId};
use patrolbot_types::wire::{decode_command, decode_producer_switch};
use patrolbot_types::{PatrolError, PeerRole, SignalKind, SignalingMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::stomp::{Command, Frame};

/// Largest frame accepted from an operator.  SDP offers can be sizeable.
pub const MAX_FRAME_BYTES: usize = 512 * 1024;

const SERVER_NAME: &str = concat!("patrolbotd/", env!("CARGO_PKG_VERSION"));

/// Application destinations operators may `SEND` to.
pub mod app {
    pub const CONTROL: &str = "/pub/robot/control";
    pub const PRODUCER: &str = "/pub/robot/producer";
    pub const OFFER: &str = "/pub/peer/offer";
    pub const ANSWER: &str = "/pub/peer/answer";
    pub const CANDIDATE: &str = "/pub/peer/candidate";
}

/// Prefix every subscribable destination must carry.
pub const BROKER_PREFIX: &str = "/sub/";

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// What the transport should do after handling a frame.
#[derive(Debug, Default, PartialEq)]
pub struct Reply {
    pub frames: Vec<Frame>,
    pub close: bool,
}

impl Reply {
    fn frame(frame: Frame) -> Self {
        Self {
            frames: vec![frame],
            close: false,
        }
    }
}

pub struct StompSession {
    id: SessionId,
    hub: Arc<SessionHub>,
    bridge: Arc<Bridge>,
    connected: bool,
}

impl StompSession {
    /// Register a new session with the hub.  The receiver yields every
    /// delivery for this session's subscriptions.
    pub fn open(hub: Arc<SessionHub>, bridge: Arc<Bridge>) -> (Self, mpsc::Receiver<Delivery>) {
        let (id, outbox) = hub.register();
        (
            Self {
                id,
                hub,
                bridge,
                connected: false,
            },
            outbox,
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Handle one raw text message from the socket.
    pub async fn handle_text(&mut self, text: &str) -> Reply {
        if text.len() > MAX_FRAME_BYTES {
            warn!(session = %self.id, bytes = text.len(), "oversized frame rejected");
            return Reply::frame(error_frame(&format!(
                "frame exceeds {MAX_FRAME_BYTES} bytes"
            )));
        }
        match Frame::parse(text) {
            Ok(Some(frame)) => self.handle_frame(frame).await,
            Ok(None) => Reply::default(),
            Err(e) => {
                debug!(session = %self.id, error = %e, "unparseable frame");
                Reply::frame(error_frame(&e.to_string()))
            }
        }
    }

    pub async fn handle_frame(&mut self, frame: Frame) -> Reply {
        let receipt = frame.get("receipt").map(str::to_string);

        let mut reply = match frame.command {
            Command::Connect | Command::Stomp => {
                self.connected = true;
                info!(session = %self.id, "operator connected");
                Reply::frame(
                    Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", "0,0")
                        .header("server", SERVER_NAME)
                        .header("session", self.id.to_string()),
                )
            }
            _ if !self.connected => Reply::frame(error_frame("CONNECT required first")),
            Command::Subscribe => self.subscribe(&frame),
            Command::Unsubscribe => match frame.get("id") {
                Some(sub_id) => {
                    self.hub.unsubscribe(self.id, sub_id);
                    Reply::default()
                }
                None => Reply::frame(error_frame("UNSUBSCRIBE requires an id header")),
            },
            Command::Send => match self.send(&frame).await {
                Ok(()) => Reply::default(),
                Err(e) => {
                    warn!(session = %self.id, error = %e, "operator SEND rejected");
                    Reply::frame(error_frame(&e.to_string()))
                }
            },
            Command::Disconnect => Reply {
                frames: Vec::new(),
                close: true,
            },
            other => Reply::frame(error_frame(&format!("{other} is a server frame"))),
        };

        let failed = reply.frames.iter().any(|f| f.command == Command::Error);
        if let Some(id) = receipt
            && !failed
        {
            reply
                .frames
                .push(Frame::new(Command::Receipt).header("receipt-id", id));
        }
        reply
    }

    fn subscribe(&self, frame: &Frame) -> Reply {
        let (Some(sub_id), Some(destination)) = (frame.get("id"), frame.get("destination")) else {
            return Reply::frame(error_frame("SUBSCRIBE requires id and destination headers"));
        };
        if !destination.starts_with(BROKER_PREFIX) {
            return Reply::frame(error_frame(&format!(
                "cannot subscribe to '{destination}'"
            )));
        }
        match self.hub.subscribe(self.id, sub_id, destination) {
            Ok(()) => Reply::default(),
            Err(e) => Reply::frame(error_frame(&e.to_string())),
        }
    }

    async fn send(&self, frame: &Frame) -> Result<(), PatrolError> {
        let destination = frame
            .get("destination")
            .ok_or_else(|| PatrolError::InvalidCommand("SEND requires a destination".into()))?;
        let body = frame.body.as_str();

        match destination {
            app::CONTROL => {
                let cmd = decode_command(destination, body.as_bytes())?;
                self.bridge.dispatch_command(cmd)
            }
            app::PRODUCER => {
                let mode = decode_producer_switch(destination, body.as_bytes())?;
                self.bridge.set_producer_mode(mode).await;
                Ok(())
            }
            app::OFFER => self.relay(SignalKind::Offer, body),
            app::ANSWER => self.relay(SignalKind::Answer, body),
            app::CANDIDATE => self.relay(SignalKind::Candidate, body),
            other => Err(PatrolError::Channel(format!("no handler for '{other}'"))),
        }
    }

    fn relay(&self, kind: SignalKind, body: &str) -> Result<(), PatrolError> {
        self.bridge
            .relay_signal(SignalingMessage::new(kind, body, PeerRole::Web))
            .map(|_| ())
    }

    /// Deregister from the hub, dropping every subscription at once.
    pub fn close(&self) {
        self.hub.deregister(self.id);
        info!(session = %self.id, "operator disconnected");
    }
}

/// Build the `MESSAGE` frame for one hub delivery.
pub fn message_frame(delivery: &Delivery) -> Frame {
    let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed);
    Frame::new(Command::Message)
        .header("destination", delivery.destination.as_str())
        .header("subscription", delivery.subscription_id.as_str())
        .header("message-id", seq.to_string())
        .header("content-type", "application/json")
        .header("content-length", delivery.body.len().to_string())
        .body(&*delivery.body)
}

fn error_frame(message: &str) -> Frame {
    Frame::new(Command::Error)
        .header("message", message)
        .header("content-type", "text/plain")
        .body(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use patrolbot_kernel::BridgeConfig;
    use patrolbot_memory::{PersistQueue, SqliteHistory};
    use patrolbot_middleware::{DeliveryGuarantee, PubSubAdapter};
    use patrolbot_types::{CanonicalState, ProducerMode, Velocity};

    #[derive(Default)]
    struct Link {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl PubSubAdapter for Link {
        async fn subscribe(&self, _: &str, _: DeliveryGuarantee) -> Result<(), PatrolError> {
            Ok(())
        }

        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PatrolError> {
            self.sent.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    struct Harness {
        hub: Arc<SessionHub>,
        bridge: Arc<Bridge>,
        link: Arc<Link>,
    }

    fn harness() -> Harness {
        let hub = Arc::new(SessionHub::default());
        let link = Arc::new(Link::default());
        let history = Arc::new(
            PersistQueue::spawn(Box::new(SqliteHistory::open_in_memory().unwrap()), 16).unwrap(),
        );
        let bridge = Bridge::new(
            BridgeConfig::default(),
            CanonicalState::default(),
            link.clone(),
            hub.clone(),
            history,
        );
        Harness { hub, bridge, link }
    }

    async fn connected(h: &Harness) -> (StompSession, mpsc::Receiver<Delivery>) {
        let (mut s, rx) = StompSession::open(h.hub.clone(), h.bridge.clone());
        let reply = s.handle_text("CONNECT\naccept-version:1.2\nhost:bot\n\n\0").await;
        assert_eq!(reply.frames[0].command, Command::Connected);
        (s, rx)
    }

    fn send(destination: &str, body: &str) -> String {
        Frame::new(Command::Send)
            .header("destination", destination)
            .body(body)
            .encode()
    }

    #[tokio::test]
    async fn frames_before_connect_are_rejected() {
        let h = harness();
        let (mut s, _rx) = StompSession::open(h.hub.clone(), h.bridge.clone());
        let reply = s.handle_text(&send(app::CONTROL, r#"{"type":"STOP"}"#)).await;
        assert_eq!(reply.frames[0].command, Command::Error);
        assert!(h.link.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn control_send_dispatches_command() {
        let h = harness();
        let (mut s, _rx) = connected(&h).await;
        let reply = s
            .handle_text(&send(app::CONTROL, r#"{"type":"MOVE","linear":0.5,"angular":0.1}"#))
            .await;
        assert!(reply.frames.is_empty());
        assert_eq!(
            h.bridge.state().velocity,
            Velocity {
                linear: 0.5,
                angular: 0.1
            }
        );
        assert_eq!(h.link.sent.lock()[0].0, "/robot/control");
    }

    #[tokio::test]
    async fn malformed_command_yields_error_and_session_survives() {
        let h = harness();
        let (mut s, _rx) = connected(&h).await;

        let reply = s.handle_text(&send(app::CONTROL, r#"{"type":"JUMP"}"#)).await;
        let err = &reply.frames[0];
        assert_eq!(err.command, Command::Error);
        assert!(err.get("message").unwrap().contains("JUMP"));
        assert!(!reply.close);

        let reply = s.handle_text(&send(app::CONTROL, r#"{"type":"STOP"}"#)).await;
        assert!(reply.frames.is_empty());
    }

    #[tokio::test]
    async fn subscription_receives_status_broadcasts() {
        let h = harness();
        let (mut s, mut rx) = connected(&h).await;
        let reply = s
            .handle_text("SUBSCRIBE\nid:sub-0\ndestination:/sub/robot/status\nreceipt:r1\n\n\0")
            .await;
        assert_eq!(reply.frames[0].command, Command::Receipt);
        assert_eq!(reply.frames[0].get("receipt-id"), Some("r1"));

        h.bridge
            .ingest_telemetry(
                "/robot/status",
                br#"{"batteryLevel":64,"temperature":36.5,"isCharging":false}"#,
            )
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        let frame = message_frame(&delivery);
        assert_eq!(frame.get("subscription"), Some("sub-0"));
        assert_eq!(frame.get("destination"), Some("/sub/robot/status"));
        let json: serde_json::Value = serde_json::from_str(&frame.body).unwrap();
        assert_eq!(json["batteryLevel"], 64);
    }

    #[tokio::test]
    async fn only_broker_destinations_can_be_subscribed() {
        let h = harness();
        let (mut s, _rx) = connected(&h).await;
        let reply = s
            .handle_text("SUBSCRIBE\nid:x\ndestination:/pub/robot/control\n\n\0")
            .await;
        assert_eq!(reply.frames[0].command, Command::Error);
        assert_eq!(h.hub.subscriber_count("/pub/robot/control"), 0);
    }

    #[tokio::test]
    async fn web_answer_reaches_robot_verbatim() {
        let h = harness();
        let (mut s, _rx) = connected(&h).await;
        let answer = r#"{"type":"answer","sdp":"v=0\r\na=fingerprint:sha-256 AB:CD"}"#;
        s.handle_text(&send(app::ANSWER, answer)).await;

        let sent = h.link.sent.lock();
        assert_eq!(sent[0].0, "/robot/peer/answer");
        assert_eq!(sent[0].1, answer.as_bytes());
    }

    #[tokio::test]
    async fn web_candidate_echoes_to_sender() {
        let h = harness();
        let (mut s, mut rx) = connected(&h).await;
        s.handle_text("SUBSCRIBE\nid:c\ndestination:/sub/peer/candidate\n\n\0")
            .await;
        s.handle_text(&send(app::CANDIDATE, r#"{"candidate":"a"}"#)).await;

        let echoed = rx.recv().await.unwrap();
        assert_eq!(&*echoed.body, r#"{"candidate":"a"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn producer_switch_over_stomp() {
        let h = harness();
        let (mut s, _rx) = connected(&h).await;
        s.handle_text(&send(app::PRODUCER, r#"{"mode":"simulated"}"#)).await;
        assert_eq!(h.bridge.producer_mode(), ProducerMode::Simulated);

        s.handle_text(&send(app::PRODUCER, r#"{"mode":"live"}"#)).await;
        assert_eq!(h.bridge.producer_mode(), ProducerMode::Live);

        let reply = s.handle_text(&send(app::PRODUCER, r#"{"mode":"turbo"}"#)).await;
        assert_eq!(reply.frames[0].command, Command::Error);
    }

    #[tokio::test]
    async fn disconnect_and_close_remove_subscriptions() {
        let h = harness();
        let (mut s, _rx) = connected(&h).await;
        s.handle_text("SUBSCRIBE\nid:1\ndestination:/sub/peer/offer\n\n\0")
            .await;
        assert_eq!(h.hub.subscriber_count("/sub/peer/offer"), 1);

        let reply = s.handle_text("DISCONNECT\nreceipt:bye\n\n\0").await;
        assert!(reply.close);
        assert_eq!(reply.frames[0].get("receipt-id"), Some("bye"));

        s.close();
        assert_eq!(h.hub.subscriber_count("/sub/peer/offer"), 0);
        assert_eq!(h.hub.session_count(), 0);
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let h = harness();
        let (mut s, _rx) = connected(&h).await;
        let huge = "x".repeat(MAX_FRAME_BYTES + 1);
        let reply = s.handle_text(&send(app::OFFER, &huge)).await;
        assert_eq!(reply.frames[0].command, Command::Error);
    }
}
