//! # Simulator Error Handling
//!
//! Errors of the fleet host: configuration, station bring-up, the worker pool
//! and the operator channel.

use ocpp_cp::StationError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SimulatorError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Station error: {0}")]
    StationError(#[from] StationError),

    /// A station start task failed or panicked
    #[error("Station {index} from {template_file} failed: {message}")]
    StationStartError {
        index: usize,
        template_file: String,
        message: String,
    },

    #[error("Worker error: {0}")]
    WorkerError(String),

    #[error("UI server error: {0}")]
    UiServerError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl SimulatorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError(message.into())
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::WorkerError(message.into())
    }

    /// Whether the whole simulator has to stop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SimulatorError::ConfigurationError(_) | SimulatorError::UiServerError(_)
        )
    }
}

impl From<std::io::Error> for SimulatorError {
    fn from(err: std::io::Error) -> Self {
        SimulatorError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SimulatorError {
    fn from(err: serde_json::Error) -> Self {
        SimulatorError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for SimulatorError {
    fn from(err: toml::de::Error) -> Self {
        SimulatorError::ConfigurationError(err.to_string())
    }
}

impl From<toml::ser::Error> for SimulatorError {
    fn from(err: toml::ser::Error) -> Self {
        SimulatorError::SerializationError(err.to_string())
    }
}

pub type SimulatorResult<T> = Result<T, SimulatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(SimulatorError::configuration("no stations").is_fatal());
        assert!(!SimulatorError::worker("queue closed").is_fatal());
        assert!(!SimulatorError::StationStartError {
            index: 3,
            template_file: "ac.json".to_string(),
            message: "boom".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn test_conversions() {
        let io: SimulatorError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(io, SimulatorError::IoError(_)));

        let station: SimulatorError = StationError::UnknownConnector(4).into();
        assert_eq!(station.to_string(), "Station error: Connector 4 does not exist");
    }
}
