//! `patrolbot-kernel` – the telemetry/command bridge.
//!
//! Owns the canonical robot state and every path that touches it.
//!
//! # Modules
//!
//! - [`state_store`] – [`RobotStateStore`][state_store::RobotStateStore]:
//!   the single lock around [`CanonicalState`][patrolbot_types::CanonicalState]
//!   and the active producer mode.
//! - [`ingest`] – [`TelemetryIngest`][ingest::TelemetryIngest]: decodes robot
//!   telemetry, applies it, queues it for persistence and fans it out.
//! - [`dispatcher`] – [`CommandDispatcher`][dispatcher::CommandDispatcher]:
//!   validates operator commands and forwards them to the robot.
//! - [`simulation`] – [`Simulator`][simulation::Simulator] and the
//!   [`SimulationLoop`][simulation::SimulationLoop] timer task.
//! - [`signaling`] – [`SignalingRelay`][signaling::SignalingRelay]: verbatim
//!   offer/answer/candidate relay.
//! - [`bridge`] – [`Bridge`]: the facade used by the operator surface and the
//!   daemon.

pub mod bridge;
pub mod dispatcher;
pub mod ingest;
pub mod signaling;
pub mod simulation;
pub mod state_store;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeConfig};
pub use dispatcher::CommandDispatcher;
pub use ingest::{IngestOutcome, TelemetryIngest};
pub use signaling::SignalingRelay;
pub use simulation::{SimulationConfig, SimulationLoop, Simulator};
pub use state_store::RobotStateStore;
