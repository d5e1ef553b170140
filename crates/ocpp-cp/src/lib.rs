//! # OCPP Charging Station Runtime
//!
//! Everything one simulated station needs to talk to a central system:
//! - [`RequestService`]: outbound frames, Call correlation, buffering and timeouts
//! - [`ResponseService`]: side effects of CallResults per OCPP version
//! - [`IncomingRequestService`]: admission control and server-initiated commands
//! - [`ChargingStation`]: connection, registration and connector state

pub mod auth_cache;
pub mod configuration;
pub mod connector;
pub mod error;
pub mod incoming_request_service;
pub mod pending;
pub mod request_service;
pub mod response_service;
pub mod station;
pub mod statistics;
pub mod template;

pub use auth_cache::AuthorizedTagsCache;
pub use error::{RequestError, RequestResult, StationError, StationResult};
pub use incoming_request_service::{incoming_request_service_for, IncomingRequestService};
pub use pending::{PendingRequest, PendingRequestTable};
pub use request_service::{RequestService, DEFAULT_REQUEST_TIMEOUT};
pub use response_service::{response_service_for, ResponseService};
pub use station::{
    ChargingStation, RegistrationState, StationCommand, StationControlMessage, StationOptions,
};
pub use statistics::{PrometheusStatistics, StatisticsPhase, StatisticsSink};
pub use template::StationTemplate;
