//! `patrolbotd` – patrol robot telemetry and command bridge.
//!
//! Wires the robot-side MQTT link, the telemetry core, the SQLite history
//! and the operator WebSocket server together, then runs until Ctrl-C.
//!
//! Startup:
//!
//! 1. Load `~/.patrolbot/config.toml` (or `$PATROLBOT_CONFIG`); defaults if absent.
//! 2. Seed the canonical state from the newest stored snapshot.
//! 3. Start the history writer, the MQTT link and the bridge.
//! 4. Bind the operator port.  This is the only fatal step.
//! 5. Subscribe to robot topics and select the configured producer.

mod config;
mod telemetry;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tracing::{error, info, warn};

use patrolbot_cockpit::CockpitServer;
use patrolbot_kernel::Bridge;
use patrolbot_memory::{PersistQueue, SqliteHistory, TelemetrySink};
use patrolbot_middleware::{MqttAdapter, PubSubAdapter, SessionHub};
use patrolbot_types::{CanonicalState, PatrolError};

use crate::config::Config;

/// How long to wait for the robot link to drain after disconnecting.
const LINK_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    let otel = telemetry::init_tracing("patrolbotd");
    if otel.exporting() {
        info!("exporting spans over OTLP");
    }

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            error!(error = %e, "configuration could not be loaded");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("patrolbot-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => {
            println!("{}", "  ✓ patrolbotd stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            error!(error = %e, "patrolbotd exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config) -> Result<(), PatrolError> {
    let (sink, initial) = open_history(&cfg.history.db_path);
    let history = Arc::new(PersistQueue::spawn(sink, cfg.history.queue_capacity.max(1))?);

    let hub = Arc::new(SessionHub::default());
    let (mqtt, inbound) = MqttAdapter::connect(&cfg.mqtt_link());
    let mqtt = Arc::new(mqtt);
    let pubsub: Arc<dyn PubSubAdapter> = mqtt.clone();

    let bridge = Bridge::new(cfg.bridge_config(), initial, pubsub, hub.clone(), history);

    let server = CockpitServer::new(bridge.clone(), hub).with_port(cfg.webui_port);
    let listener = server.bind().await?;

    if let Err(e) = bridge.subscribe_inbound().await {
        warn!(error = %e, "robot topic subscription failed; the link retries on reconnect");
    }
    bridge.set_producer_mode(cfg.producer_mode).await;
    let pump = bridge.spawn_pump(inbound);

    info!(
        port = cfg.webui_port,
        broker = %format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        producer = %cfg.producer_mode,
        "patrolbotd ready"
    );

    tokio::select! {
        _ = server.serve(listener) => {}
        _ = wait_for_ctrl_c() => {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        }
    }

    if let Err(e) = mqtt.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    if tokio::time::timeout(LINK_DRAIN_TIMEOUT, pump).await.is_err() {
        warn!("robot link did not drain in time");
    }
    bridge.shutdown().await;
    Ok(())
}

/// Open the history database and read the newest snapshot for a cold start.
///
/// A database that cannot be opened is replaced by an in-memory one so the
/// live path keeps running.
fn open_history(db_path: &str) -> (Box<dyn TelemetrySink>, CanonicalState) {
    let opened = prepare_parent_dir(db_path).and_then(|()| {
        SqliteHistory::open(db_path).map_err(|e| e.to_string())
    });
    let history = match opened {
        Ok(history) => history,
        Err(e) => {
            error!(path = db_path, error = %e, "history database unavailable; using in-memory history");
            match SqliteHistory::open_in_memory() {
                Ok(history) => history,
                Err(e) => {
                    error!(error = %e, "in-memory history unavailable; telemetry will not be stored");
                    return (Box::new(NullSink), CanonicalState::default());
                }
            }
        }
    };

    let initial = match history.find_latest() {
        Ok(Some(snapshot)) => {
            info!(battery = snapshot.battery_level, mode = %snapshot.mode, "restored last robot status");
            CanonicalState::from_snapshot(snapshot)
        }
        Ok(None) => CanonicalState::default(),
        Err(e) => {
            warn!(error = %e, "could not read the last robot status; starting from defaults");
            CanonicalState::default()
        }
    };
    (Box::new(history), initial)
}

fn prepare_parent_dir(db_path: &str) -> Result<(), String> {
    if db_path == ":memory:" {
        return Ok(());
    }
    match Path::new(db_path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .map_err(|e| format!("cannot create {}: {}", dir.display(), e)),
        _ => Ok(()),
    }
}

/// Discards everything; used only when no SQLite database can be opened.
struct NullSink;

impl TelemetrySink for NullSink {
    fn append(
        &mut self,
        _: &patrolbot_types::RobotStatusSnapshot,
    ) -> Result<(), patrolbot_memory::HistoryError> {
        Ok(())
    }

    fn find_latest(
        &self,
    ) -> Result<Option<patrolbot_types::RobotStatusSnapshot>, patrolbot_memory::HistoryError> {
        Ok(None)
    }
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C; stop the process externally");
        std::future::pending::<()>().await;
    }
}

fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}", "  ╔═══════════════════════════════════════╗".cyan());
    println!(
        "{}",
        format!("  ║        patrolbotd  v{:<18}║", version).cyan()
    );
    println!("{}", "  ║   patrol robot telemetry bridge       ║".cyan());
    println!("{}", "  ╚═══════════════════════════════════════╝".cyan());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_restores_newest_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("telemetry.db");
        let path = path.to_string_lossy().into_owned();

        {
            prepare_parent_dir(&path)?;
            let mut seed = SqliteHistory::open(&path)?;
            let mut snap = patrolbot_types::RobotStatusSnapshot::default();
            snap.battery_level = 42;
            snap.mode = "patrol".to_string();
            seed.append(&snap)?;
        }

        let (_sink, state) = open_history(&path);
        assert_eq!(state.status.battery_level, 42);
        assert_eq!(state.status.mode, "patrol");
        assert!(state.velocity.is_zero());
        Ok(())
    }

    #[test]
    fn empty_history_starts_from_defaults() {
        let (_sink, state) = open_history(":memory:");
        assert_eq!(state.status.battery_level, 100);
        assert_eq!(state.status.mode, "manual");
        assert_eq!(state.status.position.x, 50.0);
    }

    #[test]
    fn unopenable_database_falls_back_to_memory() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        // A directory cannot be opened as a database file.
        let (sink, state) = open_history(&dir.path().to_string_lossy());
        assert_eq!(state.status.battery_level, 100);
        assert_eq!(sink.find_latest()?, None);
        Ok(())
    }
}
