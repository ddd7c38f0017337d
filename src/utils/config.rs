use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Configuration for the analytics daemon.
///
/// Defaults match the most recent self-consistent values observed in the
/// field; the thresholds that drifted between deployments are surfaced here
/// instead of being buried in the engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub storage: StorageConfig,
    pub tracker: TrackerConfig,
    pub energy: EnergyConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Explicit data directory; overrides the `$IOBROKER_DATA` resolution.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub num_particles: usize,
    /// Minimum seconds between tracker snapshots.
    pub persist_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyConfig {
    /// Gradient below which a temperature drop raises a ventilation alert (°C/h).
    pub ventilation_gradient_alert: f64,
    /// Valve opening (%) separating cooling from heating phases.
    pub valve_heating_threshold: f64,
    /// Training gradients at or below this are window-open artifacts (°C/h).
    pub gradient_cap_low: f64,
    /// Training gradients at or above this are rebound artifacts (°C/h).
    pub gradient_cap_high: f64,
    /// Warm-up target when neither the request nor the room has one (°C).
    pub default_target_temp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Anomaly threshold before any training has produced a dynamic one.
    pub default_threshold: f64,
    /// Capacity of the learning-mode whitelist ring.
    pub whitelist_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig { data_dir: None },
            tracker: TrackerConfig {
                num_particles: 1000,
                persist_interval_secs: 60,
            },
            energy: EnergyConfig {
                ventilation_gradient_alert: -5.0,
                valve_heating_threshold: 5.0,
                gradient_cap_low: -2.5,
                gradient_cap_high: 8.0,
                default_target_temp: 21.0,
            },
            security: SecurityConfig {
                default_threshold: 0.05,
                whitelist_capacity: 50,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl DaemonConfig {
    /// Defaults overridden by environment variables.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("COGNI_DATA_DIR") {
            if !dir.is_empty() {
                config.storage.data_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(n) = env_parse::<usize>("COGNI_NUM_PARTICLES") {
            if n > 0 {
                config.tracker.num_particles = n;
            }
        }
        if let Some(v) = env_parse::<f64>("COGNI_VENTILATION_ALERT") {
            config.energy.ventilation_gradient_alert = v;
        }
        if let Some(v) = env_parse::<f64>("COGNI_VALVE_THRESHOLD") {
            config.energy.valve_heating_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("COGNI_DEFAULT_TARGET") {
            config.energy.default_target_temp = v;
        }
        if let Ok(level) = env::var("COGNI_LOG") {
            if !level.is_empty() {
                config.logging.level = level;
            }
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
