//! [`Bridge`] – the facade the outer surfaces talk to.
//!
//! It wires the [`RobotStateStore`], [`TelemetryIngest`],
//! [`CommandDispatcher`], [`SignalingRelay`] and the simulator together and
//! exposes the four core operations plus producer-mode switching:
//!
//! | operation                        | effect                                      |
//! |----------------------------------|---------------------------------------------|
//! | [`Bridge::ingest_telemetry`]     | route one robot-link message                |
//! | [`Bridge::dispatch_command`]     | apply and forward an operator command       |
//! | [`Bridge::relay_signal`]         | relay an offer/answer/candidate             |
//! | [`Bridge::tick`]                 | advance the simulator by one step           |
//! | [`Bridge::set_producer_mode`]    | switch between live and simulated telemetry |
//!
//! # Producer switching
//!
//! Going live stops the simulation timer (and waits for any in-flight tick)
//! before the store accepts live telemetry.  Going back to simulation flips
//! the store first and only then starts the timer.  Switches are serialized.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use patrolbot_memory::PersistQueue;
use patrolbot_middleware::{BroadcastAdapter, DeliveryGuarantee, InboundStream, PubSubAdapter};
use patrolbot_types::{
    CanonicalState, PatrolError, ProducerMode, RobotCommand, RobotStatusSnapshot,
    SignalingMessage, TopicMap,
};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::dispatcher::CommandDispatcher;
use crate::ingest::{IngestOutcome, TelemetryIngest};
use crate::signaling::SignalingRelay;
use crate::simulation::{SimulationConfig, SimulationLoop, Simulator};
use crate::state_store::RobotStateStore;

/// Static wiring for a [`Bridge`].
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub topics: TopicMap,
    pub delivery: DeliveryGuarantee,
    pub simulation: SimulationConfig,
}

pub struct Bridge {
    topics: TopicMap,
    delivery: DeliveryGuarantee,
    store: Arc<RobotStateStore>,
    ingest: TelemetryIngest,
    dispatcher: CommandDispatcher,
    relay: SignalingRelay,
    pubsub: Arc<dyn PubSubAdapter>,
    history: Arc<PersistQueue>,
    simulator: Mutex<Simulator>,
    sim_loop: tokio::sync::Mutex<Option<SimulationLoop>>,
}

impl Bridge {
    /// Build a bridge over `initial` state.
    ///
    /// The bridge starts with the live producer selected and no timer
    /// running; call [`Bridge::set_producer_mode`] to pick the configured
    /// producer.
    pub fn new(
        config: BridgeConfig,
        initial: CanonicalState,
        pubsub: Arc<dyn PubSubAdapter>,
        broadcast: Arc<dyn BroadcastAdapter>,
        history: Arc<PersistQueue>,
    ) -> Arc<Self> {
        let store = Arc::new(RobotStateStore::new(initial, ProducerMode::Live));
        let relay = SignalingRelay::new(broadcast.clone(), pubsub.clone(), &config.topics);
        let ingest = TelemetryIngest::new(
            config.topics.clone(),
            store.clone(),
            history.clone(),
            broadcast,
            relay.clone(),
        );
        let dispatcher =
            CommandDispatcher::new(store.clone(), pubsub.clone(), config.topics.control.clone());

        Arc::new(Self {
            topics: config.topics,
            delivery: config.delivery,
            store,
            ingest,
            dispatcher,
            relay,
            pubsub,
            history,
            simulator: Mutex::new(Simulator::new(config.simulation)),
            sim_loop: tokio::sync::Mutex::new(None),
        })
    }

    /// Copy of the canonical state.
    pub fn state(&self) -> CanonicalState {
        self.store.read()
    }

    pub fn producer_mode(&self) -> ProducerMode {
        self.store.producer()
    }

    pub fn ingest_telemetry(&self, topic: &str, raw: &[u8]) -> Result<IngestOutcome, PatrolError> {
        self.ingest.ingest(topic, raw)
    }

    pub fn dispatch_command(&self, cmd: RobotCommand) -> Result<(), PatrolError> {
        self.dispatcher.dispatch(cmd)
    }

    pub fn relay_signal(&self, msg: SignalingMessage) -> Result<usize, PatrolError> {
        self.relay.relay(msg)
    }

    /// One simulator step.  A no-op returning `Ok(None)` unless the
    /// simulator is the active producer.
    #[instrument(level = "trace", skip(self))]
    pub fn tick(&self) -> Result<Option<RobotStatusSnapshot>, PatrolError> {
        if self.store.producer() != ProducerMode::Simulated {
            return Ok(None);
        }
        let report = {
            let mut sim = self.simulator.lock();
            let elapsed = sim.elapsed_since_last(tokio::time::Instant::now());
            sim.step(&self.store.read(), elapsed)
        };
        match self.ingest.accept(ProducerMode::Simulated, &report) {
            Ok(snapshot) => Ok(Some(snapshot)),
            // Lost a race with a switch to live; nothing to do.
            Err(PatrolError::ProducerInactive(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Make `mode` the single active telemetry producer.
    pub async fn set_producer_mode(self: &Arc<Self>, mode: ProducerMode) {
        let mut sim_loop = self.sim_loop.lock().await;
        match mode {
            ProducerMode::Live => {
                if let Some(running) = sim_loop.take() {
                    running.stop().await;
                }
                self.store.set_producer(ProducerMode::Live);
            }
            ProducerMode::Simulated => {
                if sim_loop.is_some() {
                    return;
                }
                self.simulator.lock().reset();
                self.store.set_producer(ProducerMode::Simulated);
                let period = self.simulator.lock().config().period;
                *sim_loop = Some(SimulationLoop::spawn(Arc::downgrade(self), period));
            }
        }
        info!(mode = %mode, "telemetry producer selected");
    }

    /// Subscribe to every inbound robot topic.
    pub async fn subscribe_inbound(&self) -> Result<(), PatrolError> {
        for topic in self.topics.inbound() {
            self.pubsub.subscribe(&topic, self.delivery).await?;
        }
        Ok(())
    }

    /// Feed every message from `inbound` through ingest, in arrival order.
    pub fn spawn_pump(self: &Arc<Self>, mut inbound: InboundStream) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(msg) = inbound.next().await {
                // Failures are already logged by ingest; each message stands alone.
                let _ = bridge.ingest_telemetry(&msg.topic, &msg.payload);
            }
            info!("robot link closed");
        })
    }

    /// Stop the simulator and flush pending history.
    pub async fn shutdown(&self) {
        if let Some(running) = self.sim_loop.lock().await.take() {
            running.stop().await;
        }
        let history = self.history.clone();
        if tokio::task::spawn_blocking(move || history.shutdown())
            .await
            .is_err()
        {
            warn!("history flush did not complete");
        }
    }
}
