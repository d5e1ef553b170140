//! Station configuration keys exposed through Get/ChangeConfiguration

use crate::template::StationTemplate;
use ocpp_messages::v16j::{ConfigurationStatus, KeyValue};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct ConfigurationStore {
    keys: BTreeMap<String, String>,
    readonly_keys: HashSet<String>,
}

pub const HEARTBEAT_INTERVAL: &str = "HeartbeatInterval";
pub const METER_VALUE_SAMPLE_INTERVAL: &str = "MeterValueSampleInterval";
pub const AUTHORIZE_REMOTE_TX_REQUESTS: &str = "AuthorizeRemoteTxRequests";
pub const NUMBER_OF_CONNECTORS: &str = "NumberOfConnectors";
pub const SUPPORTED_FEATURE_PROFILES: &str = "SupportedFeatureProfiles";

impl ConfigurationStore {
    pub fn from_template(template: &StationTemplate) -> Self {
        let mut store = Self::default();
        store.insert(HEARTBEAT_INTERVAL, template.heartbeat_interval.to_string(), false);
        store.insert(
            METER_VALUE_SAMPLE_INTERVAL,
            template.meter_values_interval.to_string(),
            false,
        );
        store.insert(AUTHORIZE_REMOTE_TX_REQUESTS, "false", false);
        store.insert(
            NUMBER_OF_CONNECTORS,
            template.number_of_connectors.to_string(),
            true,
        );
        store.insert(SUPPORTED_FEATURE_PROFILES, "Core", true);
        store
    }

    fn insert(&mut self, key: &str, value: impl Into<String>, readonly: bool) {
        self.keys.insert(key.to_string(), value.into());
        if readonly {
            self.readonly_keys.insert(key.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    /// Numeric value of a key, if present and parseable
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Overwrite a key on behalf of the station itself, read-only or not
    pub fn set_internal(&mut self, key: &str, value: impl Into<String>) {
        self.keys.insert(key.to_string(), value.into());
    }

    /// Apply a ChangeConfiguration request
    pub fn change(&mut self, key: &str, value: &str) -> ConfigurationStatus {
        match self.keys.get_mut(key) {
            None => ConfigurationStatus::NotSupported,
            Some(_) if self.readonly_keys.contains(key) => ConfigurationStatus::Rejected,
            Some(_) if is_interval_key(key) && value.parse::<u64>().is_err() => {
                ConfigurationStatus::Rejected
            }
            Some(current) => {
                *current = value.to_string();
                ConfigurationStatus::Accepted
            }
        }
    }

    /// Answer a GetConfiguration request. An empty key list returns all keys.
    pub fn lookup(&self, keys: &[String]) -> (Vec<KeyValue>, Vec<String>) {
        let key_value = |key: &str, value: &str| KeyValue {
            key: key.to_string(),
            readonly: self.readonly_keys.contains(key),
            value: Some(value.to_string()),
        };

        if keys.is_empty() {
            return (
                self.keys.iter().map(|(k, v)| key_value(k, v)).collect(),
                Vec::new(),
            );
        }

        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for key in keys {
            match self.keys.get(key) {
                Some(value) => known.push(key_value(key, value)),
                None => unknown.push(key.clone()),
            }
        }
        (known, unknown)
    }
}

fn is_interval_key(key: &str) -> bool {
    key == HEARTBEAT_INTERVAL || key == METER_VALUE_SAMPLE_INTERVAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::test_template;

    #[test]
    fn test_change_rules() {
        let mut store = ConfigurationStore::from_template(&test_template());

        assert_eq!(store.change(HEARTBEAT_INTERVAL, "120"), ConfigurationStatus::Accepted);
        assert_eq!(store.get_u64(HEARTBEAT_INTERVAL), Some(120));
        assert_eq!(store.change(HEARTBEAT_INTERVAL, "soon"), ConfigurationStatus::Rejected);
        assert_eq!(store.change(NUMBER_OF_CONNECTORS, "4"), ConfigurationStatus::Rejected);
        assert_eq!(store.change("Foo", "bar"), ConfigurationStatus::NotSupported);
    }

    #[test]
    fn test_lookup() {
        let store = ConfigurationStore::from_template(&test_template());

        let (all, unknown) = store.lookup(&[]);
        assert_eq!(all.len(), 5);
        assert!(unknown.is_empty());

        let (known, unknown) =
            store.lookup(&[NUMBER_OF_CONNECTORS.to_string(), "Nope".to_string()]);
        assert_eq!(known.len(), 1);
        assert!(known[0].readonly);
        assert_eq!(known[0].value.as_deref(), Some("2"));
        assert_eq!(unknown, vec!["Nope".to_string()]);
    }
}
