//! # OCPP Messages
//!
//! Command catalogue, typed payloads for OCPP 1.6J and 2.0.1, the incoming
//! request schemas and the operator control-channel frames.

pub mod commands;
pub mod ui;
pub mod v16j;
pub mod v201;
pub mod validation;

pub use commands::{IncomingRequestCommand, RequestCommand};
pub use ui::{
    ConnectorSummary, ProcedureAck, ProcedureName, ResponseStatus, StartTransactionPayload,
    StationSummary, StopTransactionPayload, UiRequest, UiResponse, UI_PROTOCOL,
};
pub use ocpp_types::{CallErrorMessage, CallMessage, CallResultMessage, Message, MessageType};
pub use validation::{validate, PayloadSchema, SchemaViolation};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Action trait for OCPP request payloads
pub trait OcppAction: Serialize + DeserializeOwned + Send + Sync {
    /// Action name on the wire
    const ACTION_NAME: &'static str;
    /// The corresponding response type
    type Response: Serialize + DeserializeOwned + Send;
}
