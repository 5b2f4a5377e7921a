//! [`RobotStateStore`] – sole owner of the canonical robot state.
//!
//! Every writer (live telemetry, the simulator, operator commands) goes
//! through one [`Mutex`].  The active [`ProducerMode`] lives under the same
//! lock, so "is this producer allowed to write?" and the write itself form a
//! single atomic step: a tick and a live message can never both land on the
//! state once a mode switch has completed.
//!
//! Reads hand out a copy taken under the lock, never a reference.
//!
//! # Example
//!
//! ```
//! use patrolbot_kernel::state_store::RobotStateStore;
//! use patrolbot_types::{CanonicalState, ProducerMode};
//! use patrolbot_types::wire::PoseReport;
//!
//! let store = RobotStateStore::new(CanonicalState::default(), ProducerMode::Live);
//! let snap = store
//!     .apply_pose(ProducerMode::Live, &PoseReport { x: 150.0, y: 20.0 }, chrono::Utc::now())
//!     .unwrap();
//! assert_eq!(snap.position.x, 100.0);
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use patrolbot_types::wire::{PoseReport, StatusReport};
use patrolbot_types::{
    BATTERY_MAX, CanonicalState, PatrolError, Position, ProducerMode, RobotStatusSnapshot,
    Velocity,
};

struct StoreInner {
    state: CanonicalState,
    producer: ProducerMode,
}

/// Single serialization point for [`CanonicalState`].
pub struct RobotStateStore {
    inner: Mutex<StoreInner>,
}

impl RobotStateStore {
    pub fn new(initial: CanonicalState, producer: ProducerMode) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                state: initial,
                producer,
            }),
        }
    }

    /// Copy of the current canonical state.
    pub fn read(&self) -> CanonicalState {
        self.inner.lock().state.clone()
    }

    /// Currently active telemetry producer.
    pub fn producer(&self) -> ProducerMode {
        self.inner.lock().producer
    }

    /// Flip the active producer.  Callers are responsible for stopping the
    /// outgoing producer first.
    pub fn set_producer(&self, producer: ProducerMode) {
        self.inner.lock().producer = producer;
    }

    /// Apply a decoded status report from `origin`.
    ///
    /// Position and battery are clamped; absent `x`/`y`/`mode` keep their
    /// prior values.  Unless the report says the robot is charging, the
    /// stored battery level never rises.
    pub fn apply_status(
        &self,
        origin: ProducerMode,
        report: &StatusReport,
        observed_at: DateTime<Utc>,
    ) -> Result<RobotStatusSnapshot, PatrolError> {
        let mut inner = self.inner.lock();
        if inner.producer != origin {
            return Err(PatrolError::ProducerInactive(origin));
        }

        let prev = &inner.state.status;
        let reported = report.battery_level.clamp(0, i64::from(BATTERY_MAX)) as u8;
        let battery_level = if report.is_charging {
            reported
        } else {
            reported.min(prev.battery_level)
        };

        let snapshot = RobotStatusSnapshot {
            battery_level,
            temperature: report.temperature,
            is_charging: report.is_charging,
            position: Position::clamped(
                report.x.unwrap_or(prev.position.x),
                report.y.unwrap_or(prev.position.y),
            ),
            mode: report.mode.clone().unwrap_or_else(|| prev.mode.clone()),
            observed_at,
        };
        inner.state.status = snapshot.clone();
        Ok(snapshot)
    }

    /// Merge a pose report into the current status.  Every other field is
    /// left untouched.
    pub fn apply_pose(
        &self,
        origin: ProducerMode,
        pose: &PoseReport,
        observed_at: DateTime<Utc>,
    ) -> Result<RobotStatusSnapshot, PatrolError> {
        let mut inner = self.inner.lock();
        if inner.producer != origin {
            return Err(PatrolError::ProducerInactive(origin));
        }
        let status = &mut inner.state.status;
        status.position = Position::clamped(pose.x, pose.y);
        status.observed_at = observed_at;
        Ok(status.clone())
    }

    /// Set the simulated velocity to an absolute target.
    pub fn set_velocity(&self, velocity: Velocity) {
        self.inner.lock().state.velocity = velocity;
    }

    /// Set the operating mode label.
    pub fn set_mode(&self, mode: &str) {
        self.inner.lock().state.status.mode = mode.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn report(battery: i64, charging: bool) -> StatusReport {
        StatusReport {
            battery_level: battery,
            temperature: 36.5,
            is_charging: charging,
            x: None,
            y: None,
            mode: None,
        }
    }

    fn live_store() -> RobotStateStore {
        RobotStateStore::new(CanonicalState::default(), ProducerMode::Live)
    }

    #[test]
    fn out_of_range_position_is_clamped() {
        let store = live_store();
        let r = StatusReport {
            x: Some(150.0),
            y: Some(-20.0),
            ..report(80, false)
        };
        let snap = store.apply_status(ProducerMode::Live, &r, Utc::now()).unwrap();
        assert_eq!(snap.position, Position { x: 100.0, y: 0.0 });
        assert_eq!(store.read().status.position, Position { x: 100.0, y: 0.0 });
    }

    #[test]
    fn battery_is_clamped_and_never_negative() {
        let store = live_store();
        let snap = store
            .apply_status(ProducerMode::Live, &report(-5, false), Utc::now())
            .unwrap();
        assert_eq!(snap.battery_level, 0);

        let snap = store
            .apply_status(ProducerMode::Live, &report(250, true), Utc::now())
            .unwrap();
        assert_eq!(snap.battery_level, 100);
    }

    #[test]
    fn battery_only_rises_while_charging() {
        let store = live_store();
        store
            .apply_status(ProducerMode::Live, &report(60, false), Utc::now())
            .unwrap();

        let snap = store
            .apply_status(ProducerMode::Live, &report(75, false), Utc::now())
            .unwrap();
        assert_eq!(snap.battery_level, 60);

        let snap = store
            .apply_status(ProducerMode::Live, &report(75, true), Utc::now())
            .unwrap();
        assert_eq!(snap.battery_level, 75);
    }

    #[test]
    fn missing_optional_fields_keep_prior_values() {
        let store = live_store();
        let first = StatusReport {
            x: Some(12.0),
            y: Some(34.0),
            mode: Some("patrol".into()),
            ..report(90, false)
        };
        store.apply_status(ProducerMode::Live, &first, Utc::now()).unwrap();

        let snap = store
            .apply_status(ProducerMode::Live, &report(89, false), Utc::now())
            .unwrap();
        assert_eq!(snap.position, Position { x: 12.0, y: 34.0 });
        assert_eq!(snap.mode, "patrol");
    }

    #[test]
    fn later_arrival_wins_regardless_of_timestamp() {
        let store = live_store();
        let now = Utc::now();
        let a = StatusReport {
            x: Some(1.0),
            ..report(90, false)
        };
        let b = StatusReport {
            x: Some(2.0),
            ..report(80, false)
        };
        store.apply_status(ProducerMode::Live, &a, now).unwrap();
        let b_snap = store
            .apply_status(ProducerMode::Live, &b, now - Duration::hours(1))
            .unwrap();

        assert_eq!(store.read().status, b_snap);
    }

    #[test]
    fn pose_merges_only_position() {
        let store = live_store();
        let before = store.read();
        let snap = store
            .apply_pose(ProducerMode::Live, &PoseReport { x: 10.0, y: 200.0 }, Utc::now())
            .unwrap();
        assert_eq!(snap.position, Position { x: 10.0, y: 100.0 });
        assert_eq!(snap.battery_level, before.status.battery_level);
        assert_eq!(snap.mode, before.status.mode);
    }

    #[test]
    fn inactive_producer_cannot_write() {
        let store = RobotStateStore::new(CanonicalState::default(), ProducerMode::Simulated);
        let before = store.read();

        let err = store
            .apply_status(ProducerMode::Live, &report(10, false), Utc::now())
            .unwrap_err();
        assert_eq!(err, PatrolError::ProducerInactive(ProducerMode::Live));
        assert!(store
            .apply_pose(ProducerMode::Live, &PoseReport { x: 1.0, y: 1.0 }, Utc::now())
            .is_err());
        assert_eq!(store.read(), before);
    }

    #[test]
    fn velocity_and_mode_are_absolute() {
        let store = live_store();
        store.set_velocity(Velocity {
            linear: 1.0,
            angular: -0.5,
        });
        store.set_mode("auto");
        store.set_mode("auto");

        let state = store.read();
        assert_eq!(state.velocity.linear, 1.0);
        assert_eq!(state.status.mode, "auto");
    }
}
