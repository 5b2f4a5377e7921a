//! [`TelemetryIngest`] – the one code path for "telemetry became available".
//!
//! Live messages from the robot link and synthetic reports from the simulator
//! both end up in [`TelemetryIngest::accept`], which:
//!
//! 1. applies the report to the [`RobotStateStore`] (clamping, producer
//!    check),
//! 2. enqueues the resulting snapshot for persistence without blocking,
//! 3. fans it out to `/sub/robot/status`.
//!
//! Offer and candidate topics skip all of that and go straight to the
//! [`SignalingRelay`].  Each message is handled on its own: a malformed one is
//! logged and dropped, never retried, and never affects the next.

use std::sync::Arc;

use chrono::Utc;
use patrolbot_memory::PersistQueue;
use patrolbot_middleware::BroadcastAdapter;
use patrolbot_types::wire::{StatusReport, decode_pose, decode_status, encode_snapshot};
use patrolbot_types::{
    PatrolError, PeerRole, ProducerMode, RobotStatusSnapshot, SignalKind, SignalingMessage,
    TopicMap, destinations,
};
use tracing::{debug, instrument, warn};

use crate::signaling::SignalingRelay;
use crate::state_store::RobotStateStore;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Telemetry was applied; this is the resulting snapshot.
    Applied(RobotStatusSnapshot),
    /// Signaling was relayed to this many operator subscriptions.
    Relayed(usize),
    /// No route for the topic.
    Unrouted,
}

pub struct TelemetryIngest {
    topics: TopicMap,
    store: Arc<RobotStateStore>,
    history: Arc<PersistQueue>,
    broadcast: Arc<dyn BroadcastAdapter>,
    relay: SignalingRelay,
}

impl TelemetryIngest {
    pub fn new(
        topics: TopicMap,
        store: Arc<RobotStateStore>,
        history: Arc<PersistQueue>,
        broadcast: Arc<dyn BroadcastAdapter>,
        relay: SignalingRelay,
    ) -> Self {
        Self {
            topics,
            store,
            history,
            broadcast,
            relay,
        }
    }

    /// Route one message received from the robot link.
    #[instrument(skip(self, raw), fields(bytes = raw.len()))]
    pub fn ingest(&self, topic: &str, raw: &[u8]) -> Result<IngestOutcome, PatrolError> {
        let result = self.route(topic, raw);
        match &result {
            Err(e @ PatrolError::MalformedPayload { .. }) => {
                warn!(topic, error = %e, "dropping malformed message");
            }
            Err(PatrolError::ProducerInactive(_)) => {
                debug!(topic, "live telemetry ignored while simulating");
            }
            Err(e) => warn!(topic, error = %e, "inbound message not handled"),
            Ok(_) => {}
        }
        result
    }

    fn route(&self, topic: &str, raw: &[u8]) -> Result<IngestOutcome, PatrolError> {
        if topic == self.topics.status {
            let report = decode_status(topic, raw)?;
            self.accept(ProducerMode::Live, &report).map(IngestOutcome::Applied)
        } else if topic == self.topics.pose {
            let pose = decode_pose(topic, raw)?;
            let snapshot = self
                .store
                .apply_pose(ProducerMode::Live, &pose, Utc::now())?;
            self.publish(&snapshot);
            Ok(IngestOutcome::Applied(snapshot))
        } else if topic == self.topics.offer {
            self.relay_from_robot(SignalKind::Offer, topic, raw)
        } else if topic == self.topics.candidate {
            self.relay_from_robot(SignalKind::Candidate, topic, raw)
        } else {
            debug!(topic, "no route for topic");
            Ok(IngestOutcome::Unrouted)
        }
    }

    /// Apply a decoded status report from `origin`, then persist and
    /// broadcast the snapshot.
    pub fn accept(
        &self,
        origin: ProducerMode,
        report: &StatusReport,
    ) -> Result<RobotStatusSnapshot, PatrolError> {
        let snapshot = self.store.apply_status(origin, report, Utc::now())?;
        self.publish(&snapshot);
        Ok(snapshot)
    }

    fn publish(&self, snapshot: &RobotStatusSnapshot) {
        self.history.enqueue(snapshot.clone());

        let fanout = encode_snapshot(snapshot)
            .and_then(|body| self.broadcast.publish(destinations::STATUS, &body));
        if let Err(e) = fanout {
            // The next tick or message re-broadcasts current state anyway.
            warn!(error = %e, "status fan-out failed");
        }
    }

    fn relay_from_robot(
        &self,
        kind: SignalKind,
        topic: &str,
        raw: &[u8],
    ) -> Result<IngestOutcome, PatrolError> {
        let payload = std::str::from_utf8(raw).map_err(|e| PatrolError::MalformedPayload {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        let delivered = self
            .relay
            .relay(SignalingMessage::new(kind, payload, PeerRole::Robot))?;
        Ok(IngestOutcome::Relayed(delivered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPubSub;
    use patrolbot_memory::SqliteHistory;
    use patrolbot_middleware::SessionHub;
    use patrolbot_types::{CanonicalState, Position};

    struct Fixture {
        ingest: TelemetryIngest,
        store: Arc<RobotStateStore>,
        hub: Arc<SessionHub>,
        history: Arc<PersistQueue>,
    }

    fn fixture(producer: ProducerMode) -> Fixture {
        let topics = TopicMap::default();
        let store = Arc::new(RobotStateStore::new(CanonicalState::default(), producer));
        let hub = Arc::new(SessionHub::default());
        let link = Arc::new(RecordingPubSub::default());
        let history = Arc::new(
            PersistQueue::spawn(Box::new(SqliteHistory::open_in_memory().unwrap()), 16).unwrap(),
        );
        let relay = SignalingRelay::new(hub.clone(), link, &topics);
        let ingest = TelemetryIngest::new(topics, store.clone(), history.clone(), hub.clone(), relay);
        Fixture {
            ingest,
            store,
            hub,
            history,
        }
    }

    #[tokio::test]
    async fn status_is_applied_persisted_and_broadcast() -> Result<(), Box<dyn std::error::Error>> {
        let f = fixture(ProducerMode::Live);
        let (s, mut rx) = f.hub.register();
        f.hub.subscribe(s, "st", destinations::STATUS)?;

        let outcome = f.ingest.ingest(
            "/robot/status",
            br#"{"batteryLevel":80,"temperature":37.0,"isCharging":false,"x":150,"y":20,"mode":"auto"}"#,
        )?;
        let IngestOutcome::Applied(snap) = outcome else {
            return Err("expected applied".into());
        };
        assert_eq!(snap.position, Position { x: 100.0, y: 20.0 });

        let delivery = rx.recv().await.ok_or("no broadcast")?;
        let json: serde_json::Value = serde_json::from_str(&delivery.body)?;
        assert_eq!(json["batteryLevel"], 80);
        assert_eq!(json["x"], 100.0);

        let sink = f.history.shutdown().ok_or("no sink")?;
        let latest = sink.find_latest()?.ok_or("nothing persisted")?;
        assert_eq!(latest.mode, "auto");
        Ok(())
    }

    #[test]
    fn malformed_status_leaves_state_untouched() {
        let f = fixture(ProducerMode::Live);
        let before = f.store.read();

        let result = f.ingest.ingest("/robot/status", br#"{"batteryLevel":"oops"}"#);
        assert!(matches!(result, Err(PatrolError::MalformedPayload { .. })));
        assert_eq!(f.store.read(), before);

        // The next good message is unaffected.
        let ok = f.ingest.ingest(
            "/robot/status",
            br#"{"batteryLevel":50,"temperature":36.5,"isCharging":false}"#,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn arrival_order_decides_canonical_state() {
        let f = fixture(ProducerMode::Live);
        f.ingest
            .ingest(
                "/robot/status",
                br#"{"batteryLevel":90,"temperature":36.5,"isCharging":false,"x":1,"y":1}"#,
            )
            .unwrap();
        let b = f
            .ingest
            .ingest(
                "/robot/status",
                br#"{"batteryLevel":85,"temperature":36.6,"isCharging":false,"x":2,"y":2}"#,
            )
            .unwrap();
        assert_eq!(IngestOutcome::Applied(f.store.read().status), b);
    }

    #[test]
    fn battery_non_increasing_without_charging() {
        let f = fixture(ProducerMode::Live);
        let levels = [90, 95, 70, 80, 60];
        let mut last = u8::MAX;
        for level in levels {
            let body = format!(r#"{{"batteryLevel":{level},"temperature":36.5,"isCharging":false}}"#);
            let IngestOutcome::Applied(snap) = f.ingest.ingest("/robot/status", body.as_bytes()).unwrap()
            else {
                panic!("expected applied");
            };
            assert!(snap.battery_level <= last);
            last = snap.battery_level;
        }
        assert_eq!(last, 60);
    }

    #[test]
    fn pose_merges_into_state() {
        let f = fixture(ProducerMode::Live);
        f.ingest
            .ingest("/robot/pose", br#"{"x":-4,"y":33.5}"#)
            .unwrap();
        let state = f.store.read();
        assert_eq!(state.status.position, Position { x: 0.0, y: 33.5 });
        assert_eq!(state.status.battery_level, 100);
    }

    #[test]
    fn live_telemetry_ignored_in_simulated_mode() {
        let f = fixture(ProducerMode::Simulated);
        let before = f.store.read();
        let result = f.ingest.ingest(
            "/robot/status",
            br#"{"batteryLevel":10,"temperature":36.5,"isCharging":false}"#,
        );
        assert_eq!(result, Err(PatrolError::ProducerInactive(ProducerMode::Live)));
        assert_eq!(f.store.read(), before);
    }

    #[tokio::test]
    async fn robot_offer_bypasses_telemetry() -> Result<(), Box<dyn std::error::Error>> {
        let f = fixture(ProducerMode::Simulated);
        let (s, mut rx) = f.hub.register();
        f.hub.subscribe(s, "o", destinations::PEER_OFFER)?;
        let before = f.store.read();

        let sdp = br#"{"type":"offer","sdp":"v=0"}"#;
        assert_eq!(f.ingest.ingest("/robot/peer/offer", sdp)?, IngestOutcome::Relayed(1));
        assert_eq!(rx.recv().await.ok_or("no offer")?.body.as_bytes(), sdp);
        assert_eq!(f.store.read(), before);
        Ok(())
    }

    #[test]
    fn unknown_topic_is_unrouted() {
        let f = fixture(ProducerMode::Live);
        assert_eq!(
            f.ingest.ingest("/robot/unknown", b"{}").unwrap(),
            IngestOutcome::Unrouted
        );
    }
}
