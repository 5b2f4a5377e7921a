//! `patrolbot-types` – shared data model for the patrol-robot bridge.
//!
//! Every crate in the workspace speaks in terms of the types defined here:
//!
//! - [`RobotStatusSnapshot`] – one immutable telemetry record.
//! - [`CanonicalState`] – the single authoritative projection of the latest
//!   snapshot plus the simulated velocity.
//! - [`RobotCommand`] – an operator motion/mode command.
//! - [`SignalingMessage`] – an opaque WebRTC negotiation message in transit.
//! - [`PatrolError`] – the workspace error type.
//!
//! The [`wire`] module holds the typed decode/encode step for the JSON payloads
//! exchanged with the robot firmware and the operator dashboard.

pub mod wire;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lower bound of both map axes.
pub const POSITION_MIN: f64 = 0.0;
/// Upper bound of both map axes.
pub const POSITION_MAX: f64 = 100.0;
/// Highest reportable battery level (percent).
pub const BATTERY_MAX: u8 = 100;

/// Broadcast destinations operators subscribe to.
pub mod destinations {
    /// Every accepted telemetry snapshot.
    pub const STATUS: &str = "/sub/robot/status";
    /// WebRTC offers from the robot.
    pub const PEER_OFFER: &str = "/sub/peer/offer";
    /// ICE candidates from either side.
    pub const PEER_CANDIDATE: &str = "/sub/peer/candidate";
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry
// ─────────────────────────────────────────────────────────────────────────────

/// Clamp a single map coordinate into `[POSITION_MIN, POSITION_MAX]`.
pub fn clamp_axis(value: f64) -> f64 {
    value.clamp(POSITION_MIN, POSITION_MAX)
}

/// Position of the robot on the patrol map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Build a position with both axes clamped independently into range.
    pub fn clamped(x: f64, y: f64) -> Self {
        Self {
            x: clamp_axis(x),
            y: clamp_axis(y),
        }
    }
}

/// Immutable telemetry record captured at one instant.
///
/// Serialises flat (`x`/`y` at the top level) so the JSON matches what the
/// dashboard has always consumed on `/sub/robot/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotStatusSnapshot {
    pub battery_level: u8,
    pub temperature: f64,
    pub is_charging: bool,
    #[serde(flatten)]
    pub position: Position,
    pub mode: String,
    /// Arrival time at the bridge. Ordering is by arrival, never by this field.
    pub observed_at: DateTime<Utc>,
}

impl Default for RobotStatusSnapshot {
    fn default() -> Self {
        Self {
            battery_level: BATTERY_MAX,
            temperature: 36.5,
            is_charging: false,
            position: Position { x: 50.0, y: 50.0 },
            mode: "manual".to_string(),
            observed_at: Utc::now(),
        }
    }
}

/// Simulated differential-drive velocity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub linear: f64,
    pub angular: f64,
}

impl Velocity {
    pub const ZERO: Velocity = Velocity {
        linear: 0.0,
        angular: 0.0,
    };

    pub fn is_zero(&self) -> bool {
        self.linear == 0.0 && self.angular == 0.0
    }
}

/// The single authoritative in-memory record of current robot telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalState {
    pub status: RobotStatusSnapshot,
    pub velocity: Velocity,
}

impl CanonicalState {
    /// Seed the canonical state from a recovered snapshot, idle velocity.
    pub fn from_snapshot(status: RobotStatusSnapshot) -> Self {
        Self {
            status,
            velocity: Velocity::ZERO,
        }
    }
}

/// Which producer currently feeds the canonical state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerMode {
    /// Telemetry arrives from the physical robot over the pub/sub link.
    Live,
    /// Telemetry is synthesised by the local kinematic simulator.
    #[default]
    Simulated,
}

impl fmt::Display for ProducerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProducerMode::Live => write!(f, "live"),
            ProducerMode::Simulated => write!(f, "simulated"),
        }
    }
}

impl FromStr for ProducerMode {
    type Err = PatrolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(ProducerMode::Live),
            "simulated" | "sim" => Ok(ProducerMode::Simulated),
            other => Err(PatrolError::InvalidCommand(format!(
                "unknown producer mode '{other}'"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// The three command variants accepted from operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    #[serde(rename = "MOVE")]
    Move,
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "MODE")]
    SetMode,
}

/// Ephemeral operator command; created per inbound message and discarded
/// after dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotCommand {
    pub kind: CommandKind,
    pub linear: f64,
    pub angular: f64,
    pub mode_value: Option<String>,
}

impl RobotCommand {
    pub fn drive(linear: f64, angular: f64) -> Self {
        Self {
            kind: CommandKind::Move,
            linear,
            angular,
            mode_value: None,
        }
    }

    pub fn stop() -> Self {
        Self {
            kind: CommandKind::Stop,
            linear: 0.0,
            angular: 0.0,
            mode_value: None,
        }
    }

    /// Mode change; surrounding whitespace is not part of the mode.
    pub fn set_mode(value: impl AsRef<str>) -> Self {
        Self {
            kind: CommandKind::SetMode,
            linear: 0.0,
            angular: 0.0,
            mode_value: Some(value.as_ref().trim().to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Signaling
// ─────────────────────────────────────────────────────────────────────────────

/// WebRTC session-negotiation message kinds. The kind is derived from the
/// topic or destination, never from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

/// Which side of the link produced a signaling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerRole {
    Robot,
    Web,
}

/// A signaling message in transit. The payload is opaque and relayed
/// byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingMessage {
    pub kind: SignalKind,
    pub payload: String,
    pub source: PeerRole,
}

impl SignalingMessage {
    pub fn new(kind: SignalKind, payload: impl Into<String>, source: PeerRole) -> Self {
        Self {
            kind,
            payload: payload.into(),
            source,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Robot-side topic map
// ─────────────────────────────────────────────────────────────────────────────

/// Pub/sub topics used on the robot link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicMap {
    /// Robot → bridge status reports.
    pub status: String,
    /// Robot → bridge pose reports.
    pub pose: String,
    /// Robot → bridge WebRTC offers.
    pub offer: String,
    /// Bridge → robot WebRTC answers.
    pub answer: String,
    /// Robot → bridge ICE candidates.
    pub candidate: String,
    /// Bridge → robot ICE candidates gathered by web peers.
    pub candidate_downlink: String,
    /// Bridge → robot motion and mode commands.
    pub control: String,
}

impl Default for TopicMap {
    fn default() -> Self {
        Self {
            status: "/robot/status".to_string(),
            pose: "/robot/pose".to_string(),
            offer: "/robot/peer/offer".to_string(),
            answer: "/robot/peer/answer".to_string(),
            candidate: "/robot/peer/candidate".to_string(),
            candidate_downlink: "/robot/peer/candidate/remote".to_string(),
            control: "/robot/control".to_string(),
        }
    }
}

impl TopicMap {
    /// Topics the bridge subscribes to on the robot link.
    pub fn inbound(&self) -> Vec<String> {
        vec![
            self.status.clone(),
            self.pose.clone(),
            self.offer.clone(),
            self.candidate.clone(),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Workspace error type. None of these conditions is fatal to the bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatrolError {
    #[error("Malformed payload on '{topic}': {reason}")]
    MalformedPayload { topic: String, reason: String },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Transport unavailable, delivery not guaranteed: {0}")]
    TransportUnavailable(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Producer '{0}' is not the active telemetry producer")]
    ProducerInactive(ProducerMode),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
