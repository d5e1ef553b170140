//! # Fleet Host
//!
//! [`Simulator`] wires the configuration to a [`StationWorker`], keeps every
//! started station in a [`StationRegistry`] and serves the operator channel.

use crate::{
    config::SimulatorConfig,
    error::{SimulatorError, SimulatorResult},
    ui_server::UiServer,
    ui_service::UiService,
    worker::{StationStarter, StationWorker, WorkerData, WorkerEvent},
};
use async_trait::async_trait;
use dashmap::DashMap;
use ocpp_cp::{
    AuthorizedTagsCache, ChargingStation, PrometheusStatistics, StationControlMessage,
    StationOptions, StationTemplate, StatisticsSink,
};
use ocpp_messages::StationSummary;
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Capacity of the operator command broadcast
const CONTROL_CHANNEL_CAPACITY: usize = 256;

/// Started stations by hash id
#[derive(Default)]
pub struct StationRegistry {
    stations: DashMap<String, Arc<ChargingStation>>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, station: Arc<ChargingStation>) {
        if let Some(previous) = self
            .stations
            .insert(station.hash_id().to_string(), station)
        {
            warn!("{} Replaced in station registry", previous.log_prefix());
        }
    }

    pub fn get(&self, hash_id: &str) -> Option<Arc<ChargingStation>> {
        self.stations.get(hash_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, hash_id: &str) -> bool {
        self.stations.contains_key(hash_id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Stations ordered by template file then index
    pub fn stations(&self) -> Vec<Arc<ChargingStation>> {
        let mut stations: Vec<_> = self.stations.iter().map(|e| e.value().clone()).collect();
        stations.sort_by(|a, b| {
            a.template_file()
                .cmp(b.template_file())
                .then(a.index().cmp(&b.index()))
        });
        stations
    }

    pub async fn summaries(&self) -> Vec<StationSummary> {
        let mut summaries = Vec::with_capacity(self.len());
        for station in self.stations() {
            summaries.push(station.summary().await);
        }
        summaries
    }
}

/// Builds stations from template files and starts them
pub struct FleetStarter {
    options: StationOptions,
    templates: DashMap<String, Arc<StationTemplate>>,
    auth_cache: Arc<AuthorizedTagsCache>,
    registry: Arc<StationRegistry>,
    control: broadcast::Sender<StationControlMessage>,
    metrics: Option<Registry>,
}

impl FleetStarter {
    pub fn new(
        options: StationOptions,
        registry: Arc<StationRegistry>,
        control: broadcast::Sender<StationControlMessage>,
        metrics: Option<Registry>,
    ) -> Self {
        Self {
            options,
            templates: DashMap::new(),
            auth_cache: Arc::new(AuthorizedTagsCache::new()),
            registry,
            control,
            metrics,
        }
    }

    /// Parse each template file once
    fn template(&self, file: &str) -> SimulatorResult<Arc<StationTemplate>> {
        if let Some(template) = self.templates.get(file) {
            return Ok(template.clone());
        }
        let template = Arc::new(StationTemplate::from_file(file)?);
        self.templates.insert(file.to_string(), template.clone());
        Ok(template)
    }

    /// Collectors labelled with the station hash id, unique across templates
    /// even when they share a base name
    fn statistics(&self, hash_id: &str) -> SimulatorResult<Option<Arc<dyn StatisticsSink>>> {
        let Some(registry) = &self.metrics else {
            return Ok(None);
        };
        let statistics = PrometheusStatistics::new(registry, hash_id)
            .map_err(|e| SimulatorError::configuration(format!("metrics: {}", e)))?;
        Ok(Some(Arc::new(statistics)))
    }
}

#[async_trait]
impl StationStarter for FleetStarter {
    async fn start_station(&self, data: &WorkerData) -> SimulatorResult<String> {
        let template = self.template(&data.template_file)?;
        let statistics =
            self.statistics(&StationTemplate::hash_id(&data.template_file, data.index))?;
        let station = ChargingStation::new(
            data.index,
            data.template_file.clone(),
            template.as_ref().clone(),
            self.options.clone(),
            self.auth_cache.clone(),
            statistics,
        );
        station.start(Some(self.control.subscribe())).await?;
        let hash_id = station.hash_id().to_string();
        self.registry.register(station);
        Ok(hash_id)
    }
}

/// Fleet simulator
pub struct Simulator {
    config: SimulatorConfig,
    registry: Arc<StationRegistry>,
    control: broadcast::Sender<StationControlMessage>,
    metrics: Option<Registry>,
    worker: StationWorker,
    events: Option<mpsc::UnboundedReceiver<WorkerEvent>>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> SimulatorResult<Self> {
        config.validate().map_err(SimulatorError::ConfigurationError)?;

        let registry = Arc::new(StationRegistry::new());
        let (control, _) = broadcast::channel(CONTROL_CHANNEL_CAPACITY);
        let metrics = config.statistics.enabled.then(Registry::new);
        let starter = Arc::new(FleetStarter::new(
            config.station_options(),
            registry.clone(),
            control.clone(),
            metrics.clone(),
        ));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let worker = StationWorker::new(config.worker_strategy(), starter, events_tx);

        Ok(Self {
            config,
            registry,
            control,
            metrics,
            worker,
            events: Some(events_rx),
        })
    }

    pub fn registry(&self) -> &Arc<StationRegistry> {
        &self.registry
    }

    pub fn ui_service(&self) -> Arc<UiService> {
        Arc::new(UiService::new(self.registry.clone(), self.control.clone()))
    }

    /// Startup descriptors of every configured station, indexes from 1
    pub fn descriptors(&self) -> Vec<WorkerData> {
        self.config
            .stations
            .iter()
            .flat_map(|entry| {
                (1..=entry.number_of_stations).map(move |index| WorkerData {
                    index,
                    template_file: entry.file.clone(),
                })
            })
            .collect()
    }

    /// Bring up the operator channel and every station, then run until
    /// ctrl-c.
    pub async fn run(mut self) -> SimulatorResult<()> {
        info!(
            "Starting simulator with {} station(s)",
            self.config.total_stations()
        );

        let server = if self.config.ui_server.enabled {
            let server = UiServer::new(
                self.config.ui_server.clone(),
                self.ui_service(),
                self.metrics.clone(),
            );
            let listener = server.bind().await?;
            Some(tokio::spawn(async move {
                if let Err(e) = server.serve(listener).await {
                    error!("UI server stopped: {}", e);
                }
            }))
        } else {
            None
        };

        let reporter = self.events.take().map(|events| tokio::spawn(report(events)));
        self.worker.start_all(self.descriptors()).await?;

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");

        if let Some(server) = server {
            server.abort();
        }
        if let Some(reporter) = reporter {
            reporter.abort();
        }
        self.stop().await;
        Ok(())
    }

    pub async fn stop(&self) {
        for station in self.registry.stations() {
            station.stop().await;
        }
    }
}

async fn report(mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    let (mut started, mut failed) = (0usize, 0usize);
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::StationStarted { .. } => started += 1,
            WorkerEvent::StationFailed {
                index,
                template_file,
                error: message,
            } => {
                failed += 1;
                error!("Station {} ({}) is down: {}", index, template_file, message);
            }
        }
        info!("{} station(s) started, {} failed", started, failed);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::write_template;
    use super::*;
    use crate::config::StationTemplateRef;

    #[tokio::test]
    async fn test_starter_registers_station() {
        let path = write_template(2);
        let file = path.display().to_string();
        let registry = Arc::new(StationRegistry::new());
        let (control, _) = broadcast::channel(16);
        let starter = FleetStarter::new(
            StationOptions::default(),
            registry.clone(),
            control,
            Some(Registry::new()),
        );

        let hash_id = starter
            .start_station(&WorkerData {
                index: 1,
                template_file: file.clone(),
            })
            .await
            .unwrap();
        starter
            .start_station(&WorkerData {
                index: 2,
                template_file: file.clone(),
            })
            .await
            .unwrap();

        assert_eq!(hash_id, StationTemplate::hash_id(&file, 1));
        assert_eq!(registry.len(), 2);
        let summaries = registry.summaries().await;
        assert_eq!(summaries[0].index, 1);
        assert_eq!(summaries[1].connectors.len(), 2);

        for station in registry.stations() {
            station.stop().await;
        }
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_same_base_name_across_templates_shares_metrics() {
        let first = write_template(1);
        let second = write_template(1);
        let registry = Arc::new(StationRegistry::new());
        let (control, _) = broadcast::channel(16);
        let starter = FleetStarter::new(
            StationOptions::default(),
            registry.clone(),
            control,
            Some(Registry::new()),
        );

        for path in [&first, &second] {
            starter
                .start_station(&WorkerData {
                    index: 1,
                    template_file: path.display().to_string(),
                })
                .await
                .unwrap();
        }

        assert_eq!(registry.len(), 2);
        for station in registry.stations() {
            station.stop().await;
        }
        std::fs::remove_file(first).unwrap();
        std::fs::remove_file(second).unwrap();
    }

    #[tokio::test]
    async fn test_missing_template_fails() {
        let (control, _) = broadcast::channel(16);
        let starter = FleetStarter::new(
            StationOptions::default(),
            Arc::new(StationRegistry::new()),
            control,
            None,
        );
        let error = starter
            .start_station(&WorkerData {
                index: 1,
                template_file: "/nonexistent/station.json".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, SimulatorError::StationError(_)));
    }

    #[test]
    fn test_descriptors() {
        let config = SimulatorConfig {
            stations: vec![
                StationTemplateRef {
                    file: "ac.json".to_string(),
                    number_of_stations: 2,
                },
                StationTemplateRef {
                    file: "dc.json".to_string(),
                    number_of_stations: 1,
                },
            ],
            ..SimulatorConfig::default()
        };
        let simulator = Simulator::new(config).unwrap();
        let descriptors = simulator.descriptors();

        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[1].index, 2);
        assert_eq!(descriptors[2].template_file, "dc.json");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SimulatorConfig {
            stations: Vec::new(),
            ..SimulatorConfig::default()
        };
        assert!(matches!(
            Simulator::new(config),
            Err(SimulatorError::ConfigurationError(_))
        ));
    }
}
