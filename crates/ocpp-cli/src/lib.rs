//! # OCPP CLI Library
//!
//! Operator client for the simulator control channel.

pub mod error;
pub mod ui_client;

pub use error::{UiClientError, UiClientResult};
pub use ui_client::{UiClient, UI_REQUEST_TIMEOUT};
