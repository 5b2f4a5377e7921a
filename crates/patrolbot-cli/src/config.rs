//! Daemon configuration – reads `~/.patrolbot/config.toml`.
//!
//! Every field has a default, so a missing file (or a partial one) is fine.
//! `PATROLBOT_*` environment variables are applied on top.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use patrolbot_kernel::{BridgeConfig, SimulationConfig};
use patrolbot_middleware::{DeliveryGuarantee, MqttLinkConfig};
use patrolbot_types::{ProducerMode, TopicMap};

/// Robot-side broker connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttSection {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub delivery: DeliveryGuarantee,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

/// Kinematic simulator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSection {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    #[serde(default = "default_gain")]
    pub gain: f64,

    #[serde(default = "default_drain_per_tick")]
    pub drain_per_tick: f64,
}

/// Telemetry history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySection {
    /// SQLite file, or `":memory:"`.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Port for the operator WebSocket/HTTP server.
    #[serde(default = "default_webui_port")]
    pub webui_port: u16,

    /// Which producer feeds the canonical state at startup.
    #[serde(default)]
    pub producer_mode: ProducerMode,

    #[serde(default)]
    pub mqtt: MqttSection,

    #[serde(default)]
    pub topics: TopicMap,

    #[serde(default)]
    pub simulation: SimulationSection,

    #[serde(default)]
    pub history: HistorySection,
}

fn default_webui_port() -> u16 {
    8080
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "patrolbot-bridge".to_string()
}
fn default_keep_alive_secs() -> u64 {
    15
}
fn default_period_ms() -> u64 {
    100
}
fn default_gain() -> f64 {
    0.5
}
fn default_drain_per_tick() -> f64 {
    0.05
}
fn default_db_path() -> String {
    "./data/telemetry.db".to_string()
}
fn default_queue_capacity() -> usize {
    patrolbot_memory::DEFAULT_QUEUE_CAPACITY
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            delivery: DeliveryGuarantee::default(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            gain: default_gain(),
            drain_per_tick: default_drain_per_tick(),
        }
    }
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webui_port: default_webui_port(),
            producer_mode: ProducerMode::default(),
            mqtt: MqttSection::default(),
            topics: TopicMap::default(),
            simulation: SimulationSection::default(),
            history: HistorySection::default(),
        }
    }
}

impl Config {
    /// Connection parameters for the MQTT adapter.
    pub fn mqtt_link(&self) -> MqttLinkConfig {
        MqttLinkConfig {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            delivery: self.mqtt.delivery,
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs.max(5)),
            ..MqttLinkConfig::default()
        }
    }

    /// Static wiring for the bridge.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            topics: self.topics.clone(),
            delivery: self.mqtt.delivery,
            simulation: SimulationConfig {
                period: Duration::from_millis(self.simulation.period_ms.max(1)),
                gain: self.simulation.gain,
                drain_per_tick: self.simulation.drain_per_tick.max(0.0),
            },
        }
    }
}

/// Return the config path: `$PATROLBOT_CONFIG`, else `~/.patrolbot/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("PATROLBOT_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".patrolbot").join("config.toml")
}

/// Load the config from [`config_path`].  A missing file yields defaults.
pub fn load() -> Result<Config, String> {
    load_from(&config_path())
}

/// Load the config from a specific path and apply env overrides.
pub(crate) fn load_from(path: &Path) -> Result<Config, String> {
    let mut cfg = if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `PATROLBOT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PATROLBOT_WEBUI_PORT` | `webui_port` |
/// | `PATROLBOT_MQTT_HOST` | `mqtt.host` |
/// | `PATROLBOT_MQTT_PORT` | `mqtt.port` |
/// | `PATROLBOT_PRODUCER_MODE` | `producer_mode` |
/// | `PATROLBOT_HISTORY_DB` | `history.db_path` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("PATROLBOT_WEBUI_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.webui_port = port;
    }
    if let Ok(v) = std::env::var("PATROLBOT_MQTT_HOST")
        && !v.trim().is_empty()
    {
        cfg.mqtt.host = v;
    }
    if let Ok(v) = std::env::var("PATROLBOT_MQTT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.mqtt.port = port;
    }
    if let Ok(v) = std::env::var("PATROLBOT_PRODUCER_MODE")
        && let Ok(mode) = v.parse::<ProducerMode>()
    {
        cfg.producer_mode = mode;
    }
    if let Ok(v) = std::env::var("PATROLBOT_HISTORY_DB")
        && !v.trim().is_empty()
    {
        cfg.history.db_path = v;
    }
}
