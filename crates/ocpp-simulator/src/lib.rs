//! # OCPP Fleet Simulator
//!
//! Hosts a fleet of simulated charging stations:
//!
//! - Station templates instantiated N times each
//! - Pool or dedicated worker strategies for station bring-up
//! - A WebSocket control channel (`ui0.0.1`) for operators
//! - Optional Prometheus statistics

pub mod config;
pub mod error;
pub mod simulator;
pub mod ui_server;
pub mod ui_service;
pub mod worker;

pub use config::SimulatorConfig;
pub use error::{SimulatorError, SimulatorResult};
pub use simulator::{FleetStarter, Simulator, StationRegistry};
pub use ui_server::UiServer;
pub use ui_service::UiService;
pub use worker::{
    run_dedicated_unit, StationStarter, StationWorker, WorkerData, WorkerEvent, WorkerMessage,
    WorkerStrategy, START_WORKER_ELEMENT,
};
