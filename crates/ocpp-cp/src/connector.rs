//! Connector state
//!
//! Only the fields the protocol engine reads to build messages are kept:
//! status, the running transaction and the energy register.

use chrono::{DateTime, Utc};
use ocpp_messages::ui::ConnectorSummary;
use ocpp_messages::v16j::ChargePointStatus;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorState {
    pub status: ChargePointStatus,
    pub transaction_id: Option<i32>,
    pub id_tag: Option<String>,
    pub authorized: bool,
    pub transaction_started_at: Option<DateTime<Utc>>,
    /// Energy.Active.Import.Register in Wh
    pub energy_register: i64,
}

impl Default for ConnectorState {
    fn default() -> Self {
        Self {
            status: ChargePointStatus::Available,
            transaction_id: None,
            id_tag: None,
            authorized: false,
            transaction_started_at: None,
            energy_register: 0,
        }
    }
}

impl ConnectorState {
    pub fn has_transaction(&self) -> bool {
        self.transaction_id.is_some()
    }

    pub fn begin_transaction(&mut self, transaction_id: i32, id_tag: String) {
        self.transaction_id = Some(transaction_id);
        self.id_tag = Some(id_tag);
        self.transaction_started_at = Some(Utc::now());
        self.status = ChargePointStatus::Charging;
    }

    pub fn end_transaction(&mut self) {
        self.transaction_id = None;
        self.id_tag = None;
        self.authorized = false;
        self.transaction_started_at = None;
        self.status = ChargePointStatus::Available;
    }

    /// Advance the energy register by `interval` at `power_w` and return the
    /// new reading
    pub fn add_energy(&mut self, power_w: u32, interval: Duration) -> i64 {
        let wh = (power_w as f64 * interval.as_secs_f64() / 3600.0).round() as i64;
        self.energy_register += wh;
        self.energy_register
    }

    pub fn summary(&self, connector_id: u32) -> ConnectorSummary {
        ConnectorSummary {
            connector_id,
            status: format!("{:?}", self.status),
            transaction_id: self.transaction_id,
            id_tag: self.id_tag.clone(),
        }
    }
}
