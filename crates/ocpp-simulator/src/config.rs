//! # Simulator Configuration
//!
//! Which templates to instantiate and how many times, the worker strategy,
//! OCPP timeouts, the operator channel and logging.

use crate::error::{SimulatorError, SimulatorResult};
use crate::worker::WorkerStrategy;
use ocpp_cp::StationOptions;
use ocpp_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Station templates and instance counts
    #[serde(default)]
    pub stations: Vec<StationTemplateRef>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub ocpp: OcppConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub ui_server: UiServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationTemplateRef {
    /// Path to the station template JSON file
    pub file: String,
    pub number_of_stations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStrategyKind {
    /// Fixed-size pool pulling start tasks from a shared queue
    Pool,
    /// One unit per station
    Dedicated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub strategy: WorkerStrategyKind,
    pub pool_size: usize,
    /// Milliseconds a pool unit waits for work before it is reclaimed
    pub max_inactive_time_ms: u64,
    /// Milliseconds between two dedicated unit startups
    pub element_start_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcppConfig {
    /// Seconds before an unanswered Call times out
    pub request_timeout_secs: u64,
    pub connection_timeout_secs: u64,
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiServerConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            stations: vec![StationTemplateRef {
                file: "templates/station.json".to_string(),
                number_of_stations: 1,
            }],
            worker: WorkerConfig::default(),
            ocpp: OcppConfig::default(),
            statistics: StatisticsConfig::default(),
            ui_server: UiServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            strategy: WorkerStrategyKind::Pool,
            pool_size: 16,
            max_inactive_time_ms: 60_000,
            element_start_delay_ms: 0,
        }
    }
}

impl Default for OcppConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            connection_timeout_secs: 30,
            max_message_size: 65536,
        }
    }
}

impl Default for UiServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a `.toml` or `.json` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> SimulatorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Err(SimulatorError::configuration(
                "Unsupported configuration file format. Use .toml or .json",
            )),
        }
    }

    /// Save configuration to a `.toml` or `.json` file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> SimulatorResult<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::to_string_pretty(self)?,
            Some("json") => serde_json::to_string_pretty(self)?,
            _ => {
                return Err(SimulatorError::configuration(
                    "Unsupported configuration file format. Use .toml or .json",
                ))
            }
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.stations.is_empty() {
            return Err("At least one station template is required".to_string());
        }
        if let Some(entry) = self.stations.iter().find(|s| s.file.is_empty()) {
            return Err(format!(
                "Station template file cannot be empty ({} stations)",
                entry.number_of_stations
            ));
        }
        if self.worker.strategy == WorkerStrategyKind::Pool && self.worker.pool_size == 0 {
            return Err("Worker pool size must be greater than 0".to_string());
        }
        if self.ocpp.request_timeout_secs == 0 {
            return Err("OCPP request timeout must be greater than 0".to_string());
        }
        if self.ui_server.enabled && self.ui_server.port == 0 {
            return Err("UI server port must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn total_stations(&self) -> usize {
        self.stations.iter().map(|s| s.number_of_stations).sum()
    }

    pub fn worker_strategy(&self) -> WorkerStrategy {
        match self.worker.strategy {
            WorkerStrategyKind::Pool => WorkerStrategy::Pool {
                pool_size: self.worker.pool_size,
                max_inactive_time: Duration::from_millis(self.worker.max_inactive_time_ms),
            },
            WorkerStrategyKind::Dedicated => WorkerStrategy::Dedicated {
                element_start_delay: Duration::from_millis(self.worker.element_start_delay_ms),
            },
        }
    }

    pub fn station_options(&self) -> StationOptions {
        StationOptions {
            request_timeout: Duration::from_secs(self.ocpp.request_timeout_secs),
            transport: TransportConfig {
                max_message_size: self.ocpp.max_message_size,
                connection_timeout: Duration::from_secs(self.ocpp.connection_timeout_secs),
                ..TransportConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimulatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.total_stations(), 1);
        assert_eq!(
            config.station_options().request_timeout,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = SimulatorConfig::default();

        config.worker.pool_size = 0;
        assert!(config.validate().is_err());

        // Pool size is irrelevant to dedicated units
        config.worker.strategy = WorkerStrategyKind::Dedicated;
        assert!(config.validate().is_ok());

        config.stations.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minimal_toml() {
        let config: SimulatorConfig = toml::from_str(
            r#"
            [[stations]]
            file = "ac.json"
            number_of_stations = 3

            [worker]
            strategy = "dedicated"
            pool_size = 4
            max_inactive_time_ms = 1000
            element_start_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.total_stations(), 3);
        assert_eq!(
            config.worker_strategy(),
            WorkerStrategy::Dedicated {
                element_start_delay: Duration::from_millis(250)
            }
        );
        assert!(config.ui_server.enabled);
    }

    #[test]
    fn test_config_file_round() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("simulator-{}.toml", uuid::Uuid::new_v4()));

        let mut config = SimulatorConfig::default();
        config.logging.format = LogFormat::Json;
        config.to_file(&path).unwrap();
        let loaded = SimulatorConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, config);
        assert!(SimulatorConfig::from_file(dir.join("simulator.yaml")).is_err());
    }
}
