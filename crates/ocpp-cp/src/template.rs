//! Station templates
//!
//! A template describes a family of identical stations. Each simulated
//! station is instantiated from a template file and an index.

use crate::error::{StationError, StationResult};
use ocpp_messages::{IncomingRequestCommand, RequestCommand};
use ocpp_types::OcppVersion;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Per-command enable flags, keyed by OCPP action name. Commands that are
/// not listed are enabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsSupport {
    #[serde(default)]
    pub incoming_commands: HashMap<String, bool>,
    #[serde(default)]
    pub outgoing_commands: HashMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationTemplate {
    pub base_name: String,
    #[serde(default = "default_vendor")]
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub ocpp_version: OcppVersion,
    /// Central system URLs, assigned to stations round-robin by index
    pub supervision_urls: Vec<String>,
    #[serde(default = "default_connectors")]
    pub number_of_connectors: u32,
    #[serde(default)]
    pub ocpp_strict_compliance: bool,
    /// Seconds, until the central system sets its own
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    #[serde(default)]
    pub authorization_file: Option<String>,
    #[serde(default)]
    pub commands_support: CommandsSupport,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// `None` retries forever
    #[serde(default)]
    pub auto_reconnect_max_retries: Option<u32>,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
    /// Seconds between MeterValues during a transaction, 0 disables them
    #[serde(default)]
    pub meter_values_interval: u64,
    /// Watts
    #[serde(default = "default_max_power")]
    pub max_power: u32,
}

fn default_vendor() -> String {
    "ocpp-rs".to_string()
}

fn default_connectors() -> u32 {
    1
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_max_power() -> u32 {
    22_000
}

impl StationTemplate {
    /// Load a template from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> StationResult<Self> {
        let path = path.as_ref();
        let file = path.display().to_string();
        let content =
            std::fs::read_to_string(path).map_err(|e| StationError::template(&file, e.to_string()))?;
        let template: StationTemplate =
            serde_json::from_str(&content).map_err(|e| StationError::template(&file, e.to_string()))?;
        template
            .validate()
            .map_err(|message| StationError::template(&file, message))?;
        Ok(template)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_name.is_empty() {
            return Err("baseName cannot be empty".to_string());
        }
        if self.supervision_urls.is_empty() {
            return Err("at least one supervision URL is required".to_string());
        }
        if self.number_of_connectors == 0 {
            return Err("numberOfConnectors must be greater than 0".to_string());
        }
        if self.heartbeat_interval == 0 {
            return Err("heartbeatInterval must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Charge box identity of the station at `index`
    pub fn station_name(&self, index: usize) -> String {
        format!("{}-{:05}", self.base_name, index)
    }

    /// Stable identifier of the station built from `template_file` at `index`
    pub fn hash_id(template_file: &str, index: usize) -> String {
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{}#{}", template_file, index).as_bytes(),
        )
        .simple()
        .to_string()
    }

    /// Connection URL of the station at `index`
    pub fn supervision_url(&self, index: usize) -> Option<String> {
        if self.supervision_urls.is_empty() {
            return None;
        }
        let base = &self.supervision_urls[index % self.supervision_urls.len()];
        Some(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            self.station_name(index)
        ))
    }

    pub fn is_incoming_command_enabled(&self, command: IncomingRequestCommand) -> bool {
        self.commands_support
            .incoming_commands
            .get(command.as_str())
            .copied()
            .unwrap_or(true)
    }

    pub fn is_outgoing_command_enabled(&self, command: RequestCommand) -> bool {
        self.commands_support
            .outgoing_commands
            .get(command.as_str())
            .copied()
            .unwrap_or(true)
    }
}

#[cfg(test)]
pub(crate) fn test_template() -> StationTemplate {
    StationTemplate {
        base_name: "CS-TEST".to_string(),
        charge_point_vendor: default_vendor(),
        charge_point_model: "Sim".to_string(),
        firmware_version: None,
        ocpp_version: OcppVersion::V16J,
        supervision_urls: vec!["ws://localhost:8180/steve/websocket/CentralSystemService".to_string()],
        number_of_connectors: 2,
        ocpp_strict_compliance: false,
        heartbeat_interval: 60,
        authorization_file: None,
        commands_support: CommandsSupport::default(),
        auto_reconnect: true,
        auto_reconnect_max_retries: None,
        reconnect_delay: 5,
        meter_values_interval: 0,
        max_power: default_max_power(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_template_defaults() {
        let template: StationTemplate = serde_json::from_value(json!({
            "baseName": "CS",
            "chargePointModel": "Model",
            "supervisionUrls": ["ws://csms"]
        }))
        .unwrap();

        assert_eq!(template.number_of_connectors, 1);
        assert_eq!(template.ocpp_version, OcppVersion::V16J);
        assert!(!template.ocpp_strict_compliance);
        assert!(template.auto_reconnect);
        assert!(template.validate().is_ok());
    }

    #[test]
    fn test_station_naming() {
        let template = test_template();
        assert_eq!(template.station_name(7), "CS-TEST-00007");
        assert_eq!(
            template.supervision_url(7).unwrap(),
            "ws://localhost:8180/steve/websocket/CentralSystemService/CS-TEST-00007"
        );
    }

    #[test]
    fn test_hash_id_is_stable_per_index() {
        let a = StationTemplate::hash_id("ac.json", 1);
        assert_eq!(a, StationTemplate::hash_id("ac.json", 1));
        assert_ne!(a, StationTemplate::hash_id("ac.json", 2));
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_command_support_flags() {
        let mut template = test_template();
        template
            .commands_support
            .incoming_commands
            .insert("Reset".to_string(), false);

        assert!(!template.is_incoming_command_enabled(IncomingRequestCommand::Reset));
        assert!(template.is_incoming_command_enabled(IncomingRequestCommand::ClearCache));
        assert!(template.is_outgoing_command_enabled(RequestCommand::Heartbeat));
    }

    #[test]
    fn test_validation() {
        let mut template = test_template();
        template.supervision_urls.clear();
        assert!(template.validate().is_err());
    }
}
