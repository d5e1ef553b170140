//! Command catalogue
//!
//! Outbound commands are the ones a station issues towards the central system;
//! incoming commands are server-initiated Calls the station has to answer.

use ocpp_types::{OcppError, OcppResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Commands a station sends to the central system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestCommand {
    Authorize,
    BootNotification,
    Heartbeat,
    MeterValues,
    StartTransaction,
    StatusNotification,
    StopTransaction,
}

impl RequestCommand {
    pub const ALL: [RequestCommand; 7] = [
        RequestCommand::Authorize,
        RequestCommand::BootNotification,
        RequestCommand::Heartbeat,
        RequestCommand::MeterValues,
        RequestCommand::StartTransaction,
        RequestCommand::StatusNotification,
        RequestCommand::StopTransaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestCommand::Authorize => "Authorize",
            RequestCommand::BootNotification => "BootNotification",
            RequestCommand::Heartbeat => "Heartbeat",
            RequestCommand::MeterValues => "MeterValues",
            RequestCommand::StartTransaction => "StartTransaction",
            RequestCommand::StatusNotification => "StatusNotification",
            RequestCommand::StopTransaction => "StopTransaction",
        }
    }
}

impl std::fmt::Display for RequestCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestCommand {
    type Err = OcppError;

    fn from_str(s: &str) -> OcppResult<Self> {
        RequestCommand::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| OcppError::protocol_violation(format!("unknown request command {}", s)))
    }
}

/// Server-initiated commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncomingRequestCommand {
    ChangeConfiguration,
    ClearCache,
    GetConfiguration,
    RemoteStartTransaction,
    RemoteStopTransaction,
    Reset,
}

impl IncomingRequestCommand {
    pub const ALL: [IncomingRequestCommand; 6] = [
        IncomingRequestCommand::ChangeConfiguration,
        IncomingRequestCommand::ClearCache,
        IncomingRequestCommand::GetConfiguration,
        IncomingRequestCommand::RemoteStartTransaction,
        IncomingRequestCommand::RemoteStopTransaction,
        IncomingRequestCommand::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncomingRequestCommand::ChangeConfiguration => "ChangeConfiguration",
            IncomingRequestCommand::ClearCache => "ClearCache",
            IncomingRequestCommand::GetConfiguration => "GetConfiguration",
            IncomingRequestCommand::RemoteStartTransaction => "RemoteStartTransaction",
            IncomingRequestCommand::RemoteStopTransaction => "RemoteStopTransaction",
            IncomingRequestCommand::Reset => "Reset",
        }
    }
}

impl std::fmt::Display for IncomingRequestCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncomingRequestCommand {
    type Err = OcppError;

    fn from_str(s: &str) -> OcppResult<Self> {
        IncomingRequestCommand::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| OcppError::protocol_violation(format!("unknown incoming command {}", s)))
    }
}
