//! [`SignalingRelay`] – stateless pass-through of WebRTC negotiation messages.
//!
//! Payloads are forwarded byte-for-byte; nothing here parses them.
//!
//! | kind      | from  | to                                                     |
//! |-----------|-------|--------------------------------------------------------|
//! | Offer     | Robot | every session on `/sub/peer/offer`                     |
//! | Offer     | Web   | every session on `/sub/peer/offer`                     |
//! | Answer    | Web   | robot answer topic (all answers forwarded)             |
//! | Candidate | Robot | every session on `/sub/peer/candidate`                 |
//! | Candidate | Web   | every session on `/sub/peer/candidate` (sender too) and the robot candidate downlink |
//!
//! Robot candidates are never echoed back onto the robot link: the uplink and
//! downlink use different topics.

use std::sync::Arc;

use patrolbot_middleware::{BroadcastAdapter, PubSubAdapter};
use patrolbot_types::{
    PatrolError, PeerRole, SignalKind, SignalingMessage, TopicMap, destinations,
};
use tracing::{debug, instrument};

/// Relays signaling messages between the robot link and operator sessions.
#[derive(Clone)]
pub struct SignalingRelay {
    broadcast: Arc<dyn BroadcastAdapter>,
    pubsub: Arc<dyn PubSubAdapter>,
    answer_topic: String,
    candidate_downlink: String,
}

impl SignalingRelay {
    pub fn new(
        broadcast: Arc<dyn BroadcastAdapter>,
        pubsub: Arc<dyn PubSubAdapter>,
        topics: &TopicMap,
    ) -> Self {
        Self {
            broadcast,
            pubsub,
            answer_topic: topics.answer.clone(),
            candidate_downlink: topics.candidate_downlink.clone(),
        }
    }

    /// Relay one message.  Returns how many operator deliveries were enqueued.
    #[instrument(skip(self, msg), fields(kind = ?msg.kind, source = ?msg.source))]
    pub fn relay(&self, msg: SignalingMessage) -> Result<usize, PatrolError> {
        match (msg.kind, msg.source) {
            (SignalKind::Offer, _) => self.broadcast.publish(destinations::PEER_OFFER, &msg.payload),
            (SignalKind::Answer, PeerRole::Web) => {
                self.pubsub
                    .publish(&self.answer_topic, msg.payload.into_bytes())?;
                Ok(0)
            }
            (SignalKind::Answer, PeerRole::Robot) => Err(PatrolError::Channel(
                "answers are only relayed from web peers to the robot".to_string(),
            )),
            (SignalKind::Candidate, PeerRole::Robot) => self
                .broadcast
                .publish(destinations::PEER_CANDIDATE, &msg.payload),
            (SignalKind::Candidate, PeerRole::Web) => {
                let delivered = self
                    .broadcast
                    .publish(destinations::PEER_CANDIDATE, &msg.payload)?;
                self.pubsub
                    .publish(&self.candidate_downlink, msg.payload.into_bytes())?;
                debug!(delivered, "web candidate relayed");
                Ok(delivered)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPubSub;
    use patrolbot_middleware::SessionHub;

    fn relay() -> (SignalingRelay, Arc<SessionHub>, Arc<RecordingPubSub>) {
        let hub = Arc::new(SessionHub::default());
        let link = Arc::new(RecordingPubSub::default());
        let relay = SignalingRelay::new(hub.clone(), link.clone(), &TopicMap::default());
        (relay, hub, link)
    }

    #[tokio::test]
    async fn robot_offer_reaches_current_subscribers_only() -> Result<(), Box<dyn std::error::Error>> {
        let (relay, hub, _) = relay();
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        let (c, mut rx_c) = hub.register();
        hub.subscribe(a, "o", destinations::PEER_OFFER)?;
        hub.subscribe(b, "o", destinations::PEER_OFFER)?;
        hub.subscribe(c, "o", destinations::PEER_OFFER)?;
        hub.unsubscribe(c, "o");

        let sdp = r#"{"type":"offer","sdp":"v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\n"}"#;
        let n = relay.relay(SignalingMessage::new(SignalKind::Offer, sdp, PeerRole::Robot))?;
        assert_eq!(n, 2);

        assert_eq!(&*rx_a.recv().await.ok_or("a")?.body, sdp);
        assert_eq!(&*rx_b.recv().await.ok_or("b")?.body, sdp);
        assert!(rx_c.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn web_answer_goes_to_robot_verbatim() {
        let (relay, _, link) = relay();
        let body = r#"{"type":"answer","sdp":"v=0"}"#;
        relay
            .relay(SignalingMessage::new(SignalKind::Answer, body, PeerRole::Web))
            .unwrap();
        relay
            .relay(SignalingMessage::new(SignalKind::Answer, body, PeerRole::Web))
            .unwrap();

        let sent = link.published();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "/robot/peer/answer");
        assert_eq!(sent[0].1, body.as_bytes());
    }

    #[test]
    fn robot_answer_is_rejected() {
        let (relay, _, link) = relay();
        let result = relay.relay(SignalingMessage::new(SignalKind::Answer, "{}", PeerRole::Robot));
        assert!(matches!(result, Err(PatrolError::Channel(_))));
        assert!(link.published().is_empty());
    }

    #[tokio::test]
    async fn web_candidate_echoes_to_sender_and_robot() -> Result<(), Box<dyn std::error::Error>> {
        let (relay, hub, link) = relay();
        let (sender, mut rx) = hub.register();
        hub.subscribe(sender, "c", destinations::PEER_CANDIDATE)?;

        let cand = r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 5000 typ host"}"#;
        relay.relay(SignalingMessage::new(SignalKind::Candidate, cand, PeerRole::Web))?;

        assert_eq!(&*rx.recv().await.ok_or("no echo")?.body, cand);
        assert_eq!(
            link.published(),
            vec![("/robot/peer/candidate/remote".to_string(), cand.as_bytes().to_vec())]
        );
        Ok(())
    }

    #[test]
    fn robot_candidate_stays_off_the_robot_link() {
        let (relay, _, link) = relay();
        relay
            .relay(SignalingMessage::new(SignalKind::Candidate, "{}", PeerRole::Robot))
            .unwrap();
        assert!(link.published().is_empty());
    }

    #[test]
    fn answer_publish_failure_is_surfaced() {
        let (relay, _, link) = relay();
        link.fail_publishes(true);
        let result = relay.relay(SignalingMessage::new(SignalKind::Answer, "{}", PeerRole::Web));
        assert!(matches!(result, Err(PatrolError::TransportUnavailable(_))));
    }
}
