//! Typed decode/encode step for the JSON payloads crossing the bridge.
//!
//! Nothing untyped leaves this module: inbound bytes become a
//! [`StatusReport`], [`PoseReport`], [`RobotCommand`] or [`ProducerMode`], or a
//! [`PatrolError`] describing exactly what was wrong.
//!
//! Wire schemas (compatible with the existing firmware and dashboard):
//!
//! ```text
//! status:  { batteryLevel:int, temperature:float, isCharging:bool, x?:float, y?:float, mode?:string }
//! pose:    { x:float, y:float }
//! command: { type:"MOVE"|"STOP"|"MODE", linear:float, angular:float, value?:string }
//! ```

use serde::{Deserialize, Serialize};

use crate::{CommandKind, PatrolError, ProducerMode, RobotCommand, RobotStatusSnapshot};

/// Decoded `status` payload. Optional fields retain their prior value when
/// absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub battery_level: i64,
    pub temperature: f64,
    pub is_charging: bool,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// Decoded `pose` payload.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PoseReport {
    pub x: f64,
    pub y: f64,
}

fn malformed(topic: &str, e: impl std::fmt::Display) -> PatrolError {
    PatrolError::MalformedPayload {
        topic: topic.to_string(),
        reason: e.to_string(),
    }
}

/// Decode a `status` payload received on `topic`.
pub fn decode_status(topic: &str, raw: &[u8]) -> Result<StatusReport, PatrolError> {
    serde_json::from_slice(raw).map_err(|e| malformed(topic, e))
}

/// Decode a `pose` payload received on `topic`.
pub fn decode_pose(topic: &str, raw: &[u8]) -> Result<PoseReport, PatrolError> {
    serde_json::from_slice(raw).map_err(|e| malformed(topic, e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CommandFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    linear: Option<f64>,
    #[serde(default)]
    angular: Option<f64>,
    #[serde(default)]
    value: Option<String>,
}

/// Decode and validate an operator command.
///
/// * `MOVE` requires numeric `linear` and `angular`.
/// * `MODE` requires a non-empty `value`.
/// * `STOP` ignores every other field.
pub fn decode_command(source: &str, raw: &[u8]) -> Result<RobotCommand, PatrolError> {
    let frame: CommandFrame = serde_json::from_slice(raw).map_err(|e| malformed(source, e))?;

    match frame.kind.as_str() {
        "MOVE" => match (frame.linear, frame.angular) {
            (Some(linear), Some(angular)) if linear.is_finite() && angular.is_finite() => {
                Ok(RobotCommand::drive(linear, angular))
            }
            _ => Err(PatrolError::InvalidCommand(
                "MOVE requires numeric 'linear' and 'angular'".to_string(),
            )),
        },
        "STOP" => Ok(RobotCommand::stop()),
        "MODE" => match frame.value {
            Some(v) if !v.trim().is_empty() => Ok(RobotCommand::set_mode(v)),
            _ => Err(PatrolError::InvalidCommand(
                "MODE requires a non-empty 'value'".to_string(),
            )),
        },
        other => Err(PatrolError::InvalidCommand(format!(
            "unknown command type '{other}'"
        ))),
    }
}

#[derive(Serialize)]
struct CommandOut<'a> {
    #[serde(rename = "type")]
    kind: CommandKind,
    linear: f64,
    angular: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

/// Serialise a validated command for the robot's control topic.
pub fn encode_command(cmd: &RobotCommand) -> Result<Vec<u8>, PatrolError> {
    let (linear, angular) = match cmd.kind {
        CommandKind::Move => (cmd.linear, cmd.angular),
        CommandKind::Stop | CommandKind::SetMode => (0.0, 0.0),
    };
    let out = CommandOut {
        kind: cmd.kind,
        linear,
        angular,
        value: cmd.mode_value.as_deref(),
    };
    serde_json::to_vec(&out).map_err(|e| PatrolError::Serialization(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshots and producer switching
// ─────────────────────────────────────────────────────────────────────────────

/// Serialise a snapshot for the operator status channel.
pub fn encode_snapshot(snapshot: &RobotStatusSnapshot) -> Result<String, PatrolError> {
    serde_json::to_string(snapshot).map_err(|e| PatrolError::Serialization(e.to_string()))
}

#[derive(Deserialize)]
struct ProducerSwitch {
    mode: String,
}

/// Decode a `{"mode": "live" | "simulated"}` producer switch request.
pub fn decode_producer_switch(source: &str, raw: &[u8]) -> Result<ProducerMode, PatrolError> {
    let req: ProducerSwitch = serde_json::from_slice(raw).map_err(|e| malformed(source, e))?;
    req.mode.parse()
}
