//! [`CommandDispatcher`] – validates operator commands, applies their effect
//! to the canonical state, and forwards them to the robot.
//!
//! Every effect sets an absolute target (a velocity, a mode), so a command
//! delivered twice leaves the same state as a command delivered once.
//!
//! The state effect is applied before forwarding.  Forwarding is
//! fire-and-forget: a transport failure is returned to the caller as
//! [`PatrolError::TransportUnavailable`] and the applied effect stays.

use std::sync::Arc;

use patrolbot_middleware::PubSubAdapter;
use patrolbot_types::wire::encode_command;
use patrolbot_types::{CommandKind, PatrolError, RobotCommand, Velocity};
use tracing::{debug, instrument};

use crate::state_store::RobotStateStore;

pub struct CommandDispatcher {
    store: Arc<RobotStateStore>,
    pubsub: Arc<dyn PubSubAdapter>,
    control_topic: String,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<RobotStateStore>,
        pubsub: Arc<dyn PubSubAdapter>,
        control_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            pubsub,
            control_topic: control_topic.into(),
        }
    }

    #[instrument(skip(self), fields(kind = ?cmd.kind))]
    pub fn dispatch(&self, cmd: RobotCommand) -> Result<(), PatrolError> {
        validate(&cmd)?;

        match cmd.kind {
            CommandKind::Move => self.store.set_velocity(Velocity {
                linear: cmd.linear,
                angular: cmd.angular,
            }),
            CommandKind::Stop => self.store.set_velocity(Velocity::ZERO),
            CommandKind::SetMode => {
                if let Some(mode) = cmd.mode_value.as_deref() {
                    self.store.set_mode(mode);
                }
            }
        }

        let payload = encode_command(&cmd)?;
        self.pubsub.publish(&self.control_topic, payload)?;
        debug!(topic = %self.control_topic, "command forwarded");
        Ok(())
    }
}

fn validate(cmd: &RobotCommand) -> Result<(), PatrolError> {
    match cmd.kind {
        CommandKind::Move if !(cmd.linear.is_finite() && cmd.angular.is_finite()) => Err(
            PatrolError::InvalidCommand("MOVE requires numeric linear and angular".into()),
        ),
        CommandKind::SetMode
            if cmd
                .mode_value
                .as_deref()
                .is_none_or(|v| v.trim().is_empty()) =>
        {
            Err(PatrolError::InvalidCommand("MODE requires a non-empty value".into()))
        }
        _ => Ok(()),
    }
}
