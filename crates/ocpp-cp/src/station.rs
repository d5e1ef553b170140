//! # Charging Station Runtime
//!
//! One simulated station: its connection to the central system, registration
//! state, connectors and the background tasks driving them.
//!
//! Four tasks run while a station is started:
//! - the connection loop (connect, register, wait for close, reconnect)
//! - the event loop feeding received frames to [`ChargingStation::on_message`]
//! - the heartbeat loop
//! - the control loop executing [`StationCommand`]s posted by command
//!   handlers or the operator channel

use crate::auth_cache::AuthorizedTagsCache;
use crate::configuration::{
    ConfigurationStore, AUTHORIZE_REMOTE_TX_REQUESTS, HEARTBEAT_INTERVAL,
    METER_VALUE_SAMPLE_INTERVAL,
};
use crate::connector::ConnectorState;
use crate::error::{RequestError, StationError, StationResult};
use crate::incoming_request_service::{incoming_request_service_for, IncomingRequestService};
use crate::pending::PendingRequestTable;
use crate::request_service::{RequestService, DEFAULT_REQUEST_TIMEOUT};
use crate::response_service::response_service_for;
use crate::statistics::StatisticsSink;
use crate::template::StationTemplate;
use ocpp_messages::ui::StationSummary;
use ocpp_messages::v16j::{
    AuthorizationStatus, ChargePointStatus, Reason, RegistrationStatus, ResetType,
};
use ocpp_transport::{Transport, TransportConfig, TransportEvent, WebSocketTransport};
use ocpp_types::{Message, OcppError, OcppVersion};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Admission state toward the central system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegistrationState {
    #[default]
    Unknown,
    Pending,
    Registered,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::Unknown => "Unknown",
            RegistrationState::Pending => "Pending",
            RegistrationState::Registered => "Registered",
        }
    }
}

impl From<RegistrationStatus> for RegistrationState {
    fn from(status: RegistrationStatus) -> Self {
        match status {
            RegistrationStatus::Accepted => RegistrationState::Registered,
            RegistrationStatus::Pending => RegistrationState::Pending,
            RegistrationStatus::Rejected => RegistrationState::Unknown,
        }
    }
}

/// Work for the station control loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationCommand {
    StartTransaction { connector_id: u32, id_tag: String },
    StopTransaction { connector_id: u32 },
    Reset { reset_type: ResetType },
}

/// A command addressed to one station over a shared control channel
#[derive(Debug, Clone)]
pub struct StationControlMessage {
    pub hash_id: String,
    pub command: StationCommand,
}

#[derive(Debug, Clone)]
pub struct StationOptions {
    pub request_timeout: Duration,
    pub transport: TransportConfig,
}

impl Default for StationOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transport: TransportConfig::default(),
        }
    }
}

pub struct ChargingStation {
    index: usize,
    hash_id: String,
    station_name: String,
    template_file: String,
    template: StationTemplate,
    log_prefix: String,
    options: StationOptions,
    registration: RwLock<RegistrationState>,
    connection: RwLock<Option<Arc<dyn Transport>>>,
    /// Frames waiting for the connection to reopen. The lock also serializes writes.
    outbound: Mutex<VecDeque<String>>,
    requests: PendingRequestTable,
    connectors: RwLock<BTreeMap<u32, ConnectorState>>,
    configuration: RwLock<ConfigurationStore>,
    auth_cache: Arc<AuthorizedTagsCache>,
    statistics: Option<Arc<dyn StatisticsSink>>,
    request_service: RequestService,
    incoming: Arc<dyn IncomingRequestService>,
    commands: mpsc::UnboundedSender<StationCommand>,
    command_queue: Mutex<mpsc::UnboundedReceiver<StationCommand>>,
    started: AtomicBool,
    disconnected: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    meter_tasks: Mutex<HashMap<u32, JoinHandle<()>>>,
}

impl ChargingStation {
    pub fn new(
        index: usize,
        template_file: impl Into<String>,
        template: StationTemplate,
        options: StationOptions,
        auth_cache: Arc<AuthorizedTagsCache>,
        statistics: Option<Arc<dyn StatisticsSink>>,
    ) -> Arc<Self> {
        let template_file = template_file.into();
        let version = template.ocpp_version;
        let station_name = template.station_name(index);
        let connectors = (1..=template.number_of_connectors)
            .map(|id| (id, ConnectorState::default()))
            .collect();
        let (commands, command_queue) = mpsc::unbounded_channel();

        Arc::new(Self {
            index,
            hash_id: StationTemplate::hash_id(&template_file, index),
            log_prefix: format!("{} |", station_name),
            station_name,
            configuration: RwLock::new(ConfigurationStore::from_template(&template)),
            request_service: RequestService::new(
                version,
                response_service_for(version),
                options.request_timeout,
            ),
            incoming: incoming_request_service_for(version),
            template_file,
            template,
            options,
            registration: RwLock::new(RegistrationState::Unknown),
            connection: RwLock::new(None),
            outbound: Mutex::new(VecDeque::new()),
            requests: PendingRequestTable::new(),
            connectors: RwLock::new(connectors),
            auth_cache,
            statistics,
            commands,
            command_queue: Mutex::new(command_queue),
            started: AtomicBool::new(false),
            disconnected: Notify::new(),
            tasks: Mutex::new(Vec::new()),
            meter_tasks: Mutex::new(HashMap::new()),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn hash_id(&self) -> &str {
        &self.hash_id
    }

    pub fn station_name(&self) -> &str {
        &self.station_name
    }

    pub fn template_file(&self) -> &str {
        &self.template_file
    }

    pub fn template(&self) -> &StationTemplate {
        &self.template
    }

    pub fn log_prefix(&self) -> &str {
        &self.log_prefix
    }

    pub fn ocpp_version(&self) -> OcppVersion {
        self.template.ocpp_version
    }

    pub fn is_strict_compliance(&self) -> bool {
        self.template.ocpp_strict_compliance
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn request_service(&self) -> &RequestService {
        &self.request_service
    }

    pub fn requests(&self) -> &PendingRequestTable {
        &self.requests
    }

    pub(crate) fn outbound_buffer(&self) -> &Mutex<VecDeque<String>> {
        &self.outbound
    }

    pub fn statistics(&self) -> Option<&Arc<dyn StatisticsSink>> {
        self.statistics.as_ref()
    }

    pub fn auth_cache(&self) -> &AuthorizedTagsCache {
        &self.auth_cache
    }

    pub fn configuration(&self) -> &RwLock<ConfigurationStore> {
        &self.configuration
    }

    pub async fn registration_state(&self) -> RegistrationState {
        *self.registration.read().await
    }

    pub async fn set_registration_state(&self, state: RegistrationState) {
        *self.registration.write().await = state;
    }

    pub async fn heartbeat_interval(&self) -> Duration {
        let seconds = self
            .configuration
            .read()
            .await
            .get_u64(HEARTBEAT_INTERVAL)
            .unwrap_or(self.template.heartbeat_interval);
        Duration::from_secs(seconds.max(1))
    }

    pub async fn set_heartbeat_interval(&self, seconds: u64) {
        self.configuration
            .write()
            .await
            .set_internal(HEARTBEAT_INTERVAL, seconds.to_string());
    }

    pub async fn connection(&self) -> Option<Arc<dyn Transport>> {
        self.connection.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .read()
            .await
            .as_ref()
            .map_or(false, |c| c.is_open())
    }

    /// Install a freshly opened transport and send whatever was buffered
    /// while there was none.
    pub async fn attach_transport(&self, transport: Arc<dyn Transport>) {
        *self.connection.write().await = Some(transport);
        self.request_service.flush_message_buffer(self).await;
    }

    async fn detach_transport(&self) {
        if let Some(transport) = self.connection.write().await.take() {
            let _ = transport.close().await;
        }
    }

    pub async fn connector(&self, connector_id: u32) -> Option<ConnectorState> {
        self.connectors.read().await.get(&connector_id).cloned()
    }

    /// Mutate a connector in place. `None` if it does not exist.
    pub async fn update_connector<R>(
        &self,
        connector_id: u32,
        update: impl FnOnce(&mut ConnectorState) -> R,
    ) -> Option<R> {
        self.connectors
            .write()
            .await
            .get_mut(&connector_id)
            .map(update)
    }

    pub async fn connector_with_transaction(&self, transaction_id: i32) -> Option<u32> {
        self.connectors
            .read()
            .await
            .iter()
            .find(|(_, c)| c.transaction_id == Some(transaction_id))
            .map(|(id, _)| *id)
    }

    pub async fn find_available_connector(&self) -> Option<u32> {
        self.connectors
            .read()
            .await
            .iter()
            .find(|(_, c)| !c.has_transaction() && c.status == ChargePointStatus::Available)
            .map(|(id, _)| *id)
    }

    /// Queue a command for the control loop
    pub fn post_command(&self, command: StationCommand) -> StationResult<()> {
        self.commands
            .send(command)
            .map_err(|_| StationError::NotStarted(self.hash_id.clone()))
    }

    pub async fn summary(&self) -> StationSummary {
        let connectors = self
            .connectors
            .read()
            .await
            .iter()
            .map(|(id, c)| c.summary(*id))
            .collect();
        StationSummary {
            hash_id: self.hash_id.clone(),
            index: self.index,
            template: self.template_file.clone(),
            ocpp_version: self.template.ocpp_version,
            registration: self.registration_state().await.as_str().to_string(),
            started: self.is_started(),
            connected: self.is_connected().await,
            connectors,
        }
    }

    /// Route a received frame: Calls to the incoming request service,
    /// responses to the pending request table.
    pub async fn on_message(&self, text: &str) {
        let message = match Message::parse(text) {
            Ok(message) => message,
            Err(e) => {
                self.reject_malformed(text, e).await;
                return;
            }
        };

        match message {
            Message::Call(call) => {
                let outcome = self
                    .incoming
                    .incoming_request_handler(self, &call.unique_id, &call.action, call.payload)
                    .await;
                if let Err(fault @ RequestError::HandlerFault { .. }) = outcome {
                    let _ = self
                        .request_service
                        .send_error(self, &call.unique_id, &fault, &call.action)
                        .await;
                }
            }
            response => {
                if let Err(e) = self.request_service.handle_response(self, response).await {
                    error!("{} Protocol error: {}", self.log_prefix, e);
                }
            }
        }
    }

    async fn reject_malformed(&self, text: &str, error: OcppError) {
        error!(
            "{} Malformed message {}: {}",
            self.log_prefix, text, error
        );
        // A Call whose id is still readable gets a CallError
        let Ok(Value::Array(elements)) = serde_json::from_str::<Value>(text) else {
            return;
        };
        if elements.first().and_then(Value::as_u64) != Some(2) {
            return;
        }
        if let Some(message_id) = elements.get(1).and_then(Value::as_str) {
            let command = elements.get(2).and_then(Value::as_str).unwrap_or_default();
            let rejection = RequestError::Protocol {
                code: self.incoming.formation_violation(),
                description: error.to_string(),
                details: json!({}),
            };
            let _ = self
                .request_service
                .send_error(self, message_id, &rejection, command)
                .await;
        }
    }

    /// Spawn the station tasks. `control` delivers operator commands; those
    /// addressed to other stations are ignored.
    pub async fn start(
        self: &Arc<Self>,
        control: Option<broadcast::Receiver<StationControlMessage>>,
    ) -> StationResult<()> {
        let url = self.template.supervision_url(self.index).ok_or_else(|| {
            StationError::configuration(format!("{} has no supervision URL", self.station_name))
        })?;
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("{} Already started", self.log_prefix);
            return Ok(());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(Arc::clone(self).event_loop(events_rx)));
        tasks.push(tokio::spawn(Arc::clone(self).connection_loop(url, events_tx)));
        tasks.push(tokio::spawn(Arc::clone(self).heartbeat_loop()));
        tasks.push(tokio::spawn(Arc::clone(self).control_loop(control)));

        info!(
            "{} Started {} connector(s), OCPP {}",
            self.log_prefix, self.template.number_of_connectors, self.template.ocpp_version
        );
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        for (_, task) in self.meter_tasks.lock().await.drain() {
            task.abort();
        }
        self.detach_transport().await;
        self.requests.cancel_all();
        self.set_registration_state(RegistrationState::Unknown).await;
        info!("{} Stopped", self.log_prefix);
    }

    async fn event_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Opened { connection_id } => {
                    debug!("{} Connection {} opened", self.log_prefix, connection_id)
                }
                TransportEvent::Message { text, .. } => self.on_message(&text).await,
                TransportEvent::Closed {
                    connection_id,
                    reason,
                } => {
                    info!(
                        "{} Connection {} closed: {}",
                        self.log_prefix, connection_id, reason
                    );
                    self.disconnected.notify_one();
                }
            }
        }
    }

    async fn connection_loop(
        self: Arc<Self>,
        url: String,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let mut config = self.options.transport.clone();
        config.sub_protocols = vec![self.template.ocpp_version.subprotocol().to_string()];
        let reconnect_delay = Duration::from_secs(self.template.reconnect_delay);
        let mut failures = 0u32;

        while self.is_started() {
            match WebSocketTransport::connect(&url, config.clone(), events.clone()).await {
                Ok(transport) => {
                    failures = 0;
                    info!("{} Connected to {}", self.log_prefix, url);
                    self.attach_transport(transport.clone()).await;
                    if let Err(e) = self.register().await {
                        warn!("{} Registration interrupted: {}", self.log_prefix, e);
                    }
                    while transport.is_open() && self.is_started() {
                        self.disconnected.notified().await;
                    }
                    self.detach_transport().await;
                    if !self.is_started() || !self.template.auto_reconnect {
                        break;
                    }
                    warn!("{} Connection to {} lost", self.log_prefix, url);
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "{} Connection attempt {} to {} failed: {}",
                        self.log_prefix, failures, url, e
                    );
                    if !self.template.auto_reconnect {
                        break;
                    }
                    if let Some(max) = self.template.auto_reconnect_max_retries {
                        if failures > max {
                            error!(
                                "{} Giving up after {} reconnection attempts",
                                self.log_prefix, max
                            );
                            break;
                        }
                    }
                }
            }
            tokio::time::sleep(reconnect_delay).await;
        }
    }

    /// Send BootNotification until the central system accepts it
    async fn register(&self) -> StationResult<()> {
        while self.is_started() && self.is_connected().await {
            match self.request_service.send_boot_notification(self).await {
                Ok(RegistrationStatus::Accepted) => {
                    info!("{} Registered", self.log_prefix);
                    for connector_id in 1..=self.template.number_of_connectors {
                        let status = self
                            .connector(connector_id)
                            .await
                            .map(|c| c.status)
                            .unwrap_or(ChargePointStatus::Available);
                        let _ = self
                            .request_service
                            .send_status_notification(self, connector_id, status, None)
                            .await;
                    }
                    return Ok(());
                }
                Ok(status) => {
                    let retry = self.heartbeat_interval().await;
                    info!(
                        "{} Boot notification {:?}, retrying in {}s",
                        self.log_prefix,
                        status,
                        retry.as_secs()
                    );
                    tokio::time::sleep(retry).await;
                }
                Err(e @ RequestError::TransportClosed { .. })
                | Err(e @ RequestError::NotImplemented(_)) => return Err(e.into()),
                Err(_) => {
                    tokio::time::sleep(Duration::from_secs(self.template.reconnect_delay)).await
                }
            }
        }
        Ok(())
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.heartbeat_interval().await).await;
            if self.registration_state().await != RegistrationState::Registered
                || !self.is_connected().await
            {
                continue;
            }
            if let Err(e) = self.request_service.send_heartbeat(&self).await {
                debug!("{} Heartbeat failed: {}", self.log_prefix, e);
            }
        }
    }

    async fn control_loop(
        self: Arc<Self>,
        mut control: Option<broadcast::Receiver<StationControlMessage>>,
    ) {
        let mut queue = self.command_queue.lock().await;
        loop {
            let command = tokio::select! {
                command = queue.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                message = next_control_message(&mut control) => match message {
                    Some(message) if message.hash_id == self.hash_id => message.command,
                    Some(_) => continue,
                    None => {
                        control = None;
                        continue;
                    }
                },
            };
            if let Err(e) = self.execute(command.clone()).await {
                warn!("{} {:?} failed: {}", self.log_prefix, command, e);
            }
        }
    }

    async fn execute(self: &Arc<Self>, command: StationCommand) -> StationResult<()> {
        match command {
            StationCommand::StartTransaction {
                connector_id,
                id_tag,
            } => self.start_transaction(connector_id, id_tag).await,
            StationCommand::StopTransaction { connector_id } => {
                self.stop_transaction(connector_id, Reason::Remote).await
            }
            StationCommand::Reset { reset_type } => {
                self.reset(reset_type).await;
                Ok(())
            }
        }
    }

    async fn notify_status(&self, connector_id: u32, status: ChargePointStatus) {
        self.update_connector(connector_id, |c| c.status = status).await;
        let _ = self
            .request_service
            .send_status_notification(self, connector_id, status, None)
            .await;
    }

    async fn authorize(&self, connector_id: u32, id_tag: &str) -> StationResult<()> {
        let remote_tx_auth = self
            .configuration
            .read()
            .await
            .get(AUTHORIZE_REMOTE_TX_REQUESTS)
            .map_or(false, |v| v.eq_ignore_ascii_case("true"));
        if !remote_tx_auth {
            return Ok(());
        }

        if let Some(file) = &self.template.authorization_file {
            if self.auth_cache.get_authorized_tags(file)?.iter().any(|t| t == id_tag) {
                self.update_connector(connector_id, |c| c.authorized = true).await;
                return Ok(());
            }
        }
        match self
            .request_service
            .send_authorize(self, connector_id, id_tag)
            .await?
        {
            AuthorizationStatus::Accepted => Ok(()),
            _ => Err(StationError::Unauthorized(id_tag.to_string())),
        }
    }

    pub async fn start_transaction(
        self: &Arc<Self>,
        connector_id: u32,
        id_tag: String,
    ) -> StationResult<()> {
        let connector = self
            .connector(connector_id)
            .await
            .ok_or(StationError::UnknownConnector(connector_id))?;
        if connector.has_transaction() {
            return Err(StationError::TransactionInProgress(connector_id));
        }

        self.authorize(connector_id, &id_tag).await?;
        self.notify_status(connector_id, ChargePointStatus::Preparing)
            .await;

        let response = match self
            .request_service
            .send_start_transaction(self, connector_id, &id_tag)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.notify_status(connector_id, ChargePointStatus::Available)
                    .await;
                return Err(e.into());
            }
        };
        if response.id_tag_info.status != AuthorizationStatus::Accepted {
            self.notify_status(connector_id, ChargePointStatus::Available)
                .await;
            return Err(StationError::Unauthorized(id_tag));
        }

        self.notify_status(connector_id, ChargePointStatus::Charging)
            .await;
        self.start_meter_values(connector_id, response.transaction_id)
            .await;
        Ok(())
    }

    pub async fn stop_transaction(&self, connector_id: u32, reason: Reason) -> StationResult<()> {
        let connector = self
            .connector(connector_id)
            .await
            .ok_or(StationError::UnknownConnector(connector_id))?;
        let transaction_id = connector
            .transaction_id
            .ok_or(StationError::NoTransaction(connector_id))?;

        if let Some(task) = self.meter_tasks.lock().await.remove(&connector_id) {
            task.abort();
        }
        self.notify_status(connector_id, ChargePointStatus::Finishing)
            .await;
        self.request_service
            .send_stop_transaction(
                self,
                transaction_id,
                connector.energy_register,
                connector.id_tag.clone(),
                Some(reason),
            )
            .await?;
        self.notify_status(connector_id, ChargePointStatus::Available)
            .await;
        Ok(())
    }

    async fn start_meter_values(self: &Arc<Self>, connector_id: u32, transaction_id: i32) {
        let seconds = self
            .configuration
            .read()
            .await
            .get_u64(METER_VALUE_SAMPLE_INTERVAL)
            .unwrap_or(self.template.meter_values_interval);
        if seconds == 0 {
            return;
        }
        let interval = Duration::from_secs(seconds);
        let station = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = station
                    .request_service
                    .send_meter_values(&station, connector_id, transaction_id, interval)
                    .await
                {
                    debug!("{} MeterValues failed: {}", station.log_prefix, e);
                }
            }
        });
        if let Some(previous) = self.meter_tasks.lock().await.insert(connector_id, task) {
            previous.abort();
        }
    }

    /// Stop running transactions and drop the connection. The connection
    /// loop reconnects and boots again.
    async fn reset(&self, reset_type: ResetType) {
        info!("{} {:?} reset", self.log_prefix, reset_type);
        let reason = match reset_type {
            ResetType::Hard => Reason::HardReset,
            ResetType::Soft => Reason::SoftReset,
        };
        let busy: Vec<u32> = self
            .connectors
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.has_transaction())
            .map(|(id, _)| *id)
            .collect();
        for connector_id in busy {
            if let Err(e) = self.stop_transaction(connector_id, reason).await {
                warn!(
                    "{} Stopping transaction on connector {} failed: {}",
                    self.log_prefix, connector_id, e
                );
            }
        }
        self.set_registration_state(RegistrationState::Unknown).await;
        if let Some(transport) = self.connection().await {
            let _ = transport.close().await;
        }
        self.disconnected.notify_one();
    }

    /// Wake the connection loop after the transport failed underneath it
    pub(crate) fn notify_disconnected(&self) {
        self.disconnected.notify_one();
    }

    #[cfg(test)]
    pub(crate) async fn disconnect_notified(&self) {
        self.disconnected.notified().await;
    }

    #[cfg(test)]
    pub(crate) async fn close_command_queue(&self) {
        self.command_queue.lock().await.close();
    }
}

async fn next_control_message(
    control: &mut Option<broadcast::Receiver<StationControlMessage>>,
) -> Option<StationControlMessage> {
    let Some(receiver) = control else {
        return std::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(message) => return Some(message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Control channel lagged, {} message(s) skipped", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::template::test_template;
    use ocpp_transport::ChannelTransport;

    pub fn station_with(customize: impl FnOnce(&mut StationTemplate)) -> Arc<ChargingStation> {
        let mut template = test_template();
        customize(&mut template);
        ChargingStation::new(
            1,
            "test-template.json",
            template,
            StationOptions::default(),
            Arc::new(AuthorizedTagsCache::new()),
            None,
        )
    }

    pub fn test_station() -> Arc<ChargingStation> {
        station_with(|_| {})
    }

    /// Station attached to an open in-memory transport and the peer end of it
    pub async fn open_station() -> (
        Arc<ChargingStation>,
        Arc<ChannelTransport>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let station = test_station();
        let (transport, peer) = ChannelTransport::new();
        station.attach_transport(transport.clone()).await;
        (station, transport, peer)
    }

    /// Next frame the station wrote, decoded
    pub async fn peer_frame(peer: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), peer.recv())
            .await
            .expect("no frame written")
            .expect("transport dropped");
        serde_json::from_str(&text).expect("frame is not JSON")
    }
}
