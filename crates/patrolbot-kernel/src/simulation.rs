//! Kinematic simulator used when no physical robot is live.
//!
//! [`Simulator`] turns the current canonical state into the next synthetic
//! [`StatusReport`]:
//!
//! ```text
//! x -= angular · gain · dt
//! y -= linear  · gain · dt
//! ```
//!
//! with both axes clamped to `[0, 100]` and the battery drained by a fixed
//! amount per tick while the velocity is non-zero.  The battery is tracked as
//! a fractional charge; the reported level is its floor.
//!
//! [`SimulationLoop`] drives [`Bridge::tick`][crate::Bridge::tick] from a
//! Tokio interval.  A tick runs to completion before the next can fire, and
//! [`SimulationLoop::stop`] only returns once the task has exited.

use std::sync::Weak;
use std::time::Duration;

use patrolbot_types::wire::StatusReport;
use patrolbot_types::{CanonicalState, Position};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bridge::Bridge;

/// Simulator tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    /// Tick period `P`.
    pub period: Duration,
    /// Position gain `g`, in map units per velocity unit per second.
    pub gain: f64,
    /// Battery percent drained per tick while moving.
    pub drain_per_tick: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
            gain: 0.5,
            drain_per_tick: 0.05,
        }
    }
}

pub struct Simulator {
    config: SimulationConfig,
    charge: Option<f64>,
    last_tick: Option<Instant>,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            charge: None,
            last_tick: None,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Forget the previous tick time and battery charge.  Called whenever
    /// the simulator becomes the active producer again.
    pub fn reset(&mut self) {
        self.charge = None;
        self.last_tick = None;
    }

    /// Time elapsed since the previous tick.  The first tick after a reset
    /// counts as exactly one period.
    pub fn elapsed_since_last(&mut self, now: Instant) -> Duration {
        let elapsed = match self.last_tick {
            Some(prev) => now.saturating_duration_since(prev),
            None => self.config.period,
        };
        self.last_tick = Some(now);
        elapsed
    }

    /// Advance the kinematics by `elapsed` starting from `state`.
    pub fn step(&mut self, state: &CanonicalState, elapsed: Duration) -> StatusReport {
        let status = &state.status;
        let velocity = state.velocity;

        // Re-seed from the store if something else moved the battery.
        let stored = f64::from(status.battery_level);
        let mut charge = match self.charge {
            Some(c) if c.floor() == stored => c,
            _ => stored,
        };

        let mut position = status.position;
        if !velocity.is_zero() {
            let dt = elapsed.as_secs_f64();
            position = Position::clamped(
                position.x - velocity.angular * self.config.gain * dt,
                position.y - velocity.linear * self.config.gain * dt,
            );
            charge = (charge - self.config.drain_per_tick).max(0.0);
        }
        self.charge = Some(charge);

        StatusReport {
            battery_level: charge.floor() as i64,
            temperature: status.temperature,
            is_charging: false,
            x: Some(position.x),
            y: Some(position.y),
            // Mode is owned by operator commands; keep whatever is stored.
            mode: None,
        }
    }
}

/// Handle to the running simulation timer task.
pub struct SimulationLoop {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SimulationLoop {
    /// Spawn the timer task.  It holds only a weak reference so dropping the
    /// bridge also ends the loop.
    pub fn spawn(bridge: Weak<Bridge>, period: Duration) -> Self {
        let (cancel, mut cancelled) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_ms = period.as_millis() as u64, "simulation loop started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.changed() => break,
                    _ = interval.tick() => {
                        let Some(bridge) = bridge.upgrade() else { break };
                        if let Err(e) = bridge.tick() {
                            warn!(error = %e, "simulation tick failed");
                        }
                    }
                }
            }
            debug!("simulation loop stopped");
        });
        Self { cancel, handle }
    }

    /// Cancel the timer and wait until no tick can still be running.
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "simulation loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patrolbot_types::Velocity;

    fn state_at(x: f64, y: f64, linear: f64, angular: f64) -> CanonicalState {
        let mut state = CanonicalState::default();
        state.status.position = Position { x, y };
        state.velocity = Velocity { linear, angular };
        state
    }

    fn apply(state: &mut CanonicalState, report: &StatusReport) {
        state.status.position = Position {
            x: report.x.unwrap(),
            y: report.y.unwrap(),
        };
        state.status.battery_level = report.battery_level as u8;
    }

    #[test]
    fn one_tick_moves_forward_by_gain_times_dt() {
        let mut sim = Simulator::new(SimulationConfig::default());
        let state = state_at(50.0, 50.0, 1.0, 0.0);
        let report = sim.step(&state, Duration::from_millis(100));
        assert_eq!(report.x, Some(50.0));
        assert!((report.y.unwrap() - 49.95).abs() < 1e-9);
    }

    #[test]
    fn position_clamps_at_zero() {
        let mut sim = Simulator::new(SimulationConfig::default());
        let mut state = state_at(50.0, 50.0, 1.0, 0.0);
        for _ in 0..1_100 {
            let report = sim.step(&state, Duration::from_millis(100));
            apply(&mut state, &report);
        }
        assert_eq!(state.status.position.y, 0.0);

        let report = sim.step(&state, Duration::from_millis(100));
        assert_eq!(report.y, Some(0.0));
    }

    #[test]
    fn idle_robot_neither_moves_nor_drains() {
        let mut sim = Simulator::new(SimulationConfig::default());
        let state = state_at(20.0, 30.0, 0.0, 0.0);
        let report = sim.step(&state, Duration::from_secs(5));
        assert_eq!((report.x, report.y), (Some(20.0), Some(30.0)));
        assert_eq!(report.battery_level, 100);
    }

    #[test]
    fn battery_drains_fractionally_while_moving() {
        let mut sim = Simulator::new(SimulationConfig::default());
        let mut state = state_at(50.0, 50.0, 0.1, 0.0);

        // 0.05 per tick: the first tick already drops below 100.
        let report = sim.step(&state, Duration::from_millis(100));
        assert_eq!(report.battery_level, 99);
        apply(&mut state, &report);

        // Twenty ticks drain exactly one more percent.
        for _ in 0..20 {
            let report = sim.step(&state, Duration::from_millis(100));
            apply(&mut state, &report);
        }
        assert_eq!(state.status.battery_level, 98);
    }

    #[test]
    fn first_tick_counts_as_one_period() {
        let mut sim = Simulator::new(SimulationConfig::default());
        let t0 = Instant::now();
        assert_eq!(sim.elapsed_since_last(t0), Duration::from_millis(100));
        assert_eq!(
            sim.elapsed_since_last(t0 + Duration::from_millis(250)),
            Duration::from_millis(250)
        );
        sim.reset();
        assert_eq!(sim.elapsed_since_last(t0), Duration::from_millis(100));
    }
}
