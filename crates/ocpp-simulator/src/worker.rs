//! # Station Worker
//!
//! Brings stations up under one of two strategies:
//! - [`WorkerStrategy::Pool`]: a bounded set of units pulling start tasks from
//!   a shared queue. Idle units exit after `max_inactive_time` and are
//!   respawned when work arrives.
//! - [`WorkerStrategy::Dedicated`]: one unit per station, started by a
//!   serialized [`WorkerMessage`] on its own inbound channel.
//!
//! A failing or panicking start is reported as [`WorkerEvent::StationFailed`]
//! and never affects other stations.

use crate::error::{SimulatorError, SimulatorResult};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Message id that starts a station on a dedicated unit
pub const START_WORKER_ELEMENT: &str = "startWorkerElement";

/// Startup descriptor of one station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerData {
    pub index: usize,
    pub template_file: String,
}

/// Control message understood by a dedicated unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub id: String,
    #[serde(default)]
    pub data: Value,
}

impl WorkerMessage {
    pub fn start(data: &WorkerData) -> SimulatorResult<Self> {
        Ok(Self {
            id: START_WORKER_ELEMENT.to_string(),
            data: serde_json::to_value(data)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStrategy {
    Pool {
        pool_size: usize,
        max_inactive_time: Duration,
    },
    Dedicated {
        element_start_delay: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    StationStarted {
        index: usize,
        template_file: String,
        hash_id: String,
    },
    StationFailed {
        index: usize,
        template_file: String,
        error: String,
    },
}

/// Builds and starts one station
#[async_trait]
pub trait StationStarter: Send + Sync {
    /// Returns the hash id of the started station
    async fn start_station(&self, data: &WorkerData) -> SimulatorResult<String>;
}

/// Start one station, turning errors and panics into an event
async fn start_isolated(
    starter: &dyn StationStarter,
    data: WorkerData,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) {
    let outcome = AssertUnwindSafe(starter.start_station(&data))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(SimulatorError::StationStartError {
                index: data.index,
                template_file: data.template_file.clone(),
                message: panic_message(panic.as_ref()),
            })
        });

    let event = match outcome {
        Ok(hash_id) => {
            info!(
                "Station {} from {} started ({})",
                data.index, data.template_file, hash_id
            );
            WorkerEvent::StationStarted {
                index: data.index,
                template_file: data.template_file,
                hash_id,
            }
        }
        Err(e) => {
            error!(
                "Station {} from {} failed to start: {}",
                data.index, data.template_file, e
            );
            WorkerEvent::StationFailed {
                index: data.index,
                template_file: data.template_file,
                error: e.to_string(),
            }
        }
    };
    // Nobody listening is fine
    let _ = events.send(event);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

/// Serve one dedicated unit: `initial` is the startup payload it was launched
/// with, `inbound` carries JSON [`WorkerMessage`]s.
pub async fn run_dedicated_unit(
    starter: Arc<dyn StationStarter>,
    initial: Option<WorkerData>,
    mut inbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    if let Some(data) = initial {
        start_isolated(starter.as_ref(), data, &events).await;
    }
    while let Some(text) = inbound.recv().await {
        debug!("Worker unit received {}", text);
        let message: WorkerMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed worker message: {}", e);
                continue;
            }
        };
        if message.id != START_WORKER_ELEMENT {
            debug!("Ignoring worker message {}", message.id);
            continue;
        }
        match serde_json::from_value::<WorkerData>(message.data) {
            Ok(data) => start_isolated(starter.as_ref(), data, &events).await,
            Err(e) => warn!("Invalid {} payload: {}", START_WORKER_ELEMENT, e),
        }
    }
}

struct Pool {
    queue_tx: mpsc::UnboundedSender<WorkerData>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkerData>>>,
    active: Arc<AtomicUsize>,
    pool_size: usize,
    max_inactive_time: Duration,
}

pub struct StationWorker {
    strategy: WorkerStrategy,
    starter: Arc<dyn StationStarter>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    pool: Option<Pool>,
    units: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl StationWorker {
    pub fn new(
        strategy: WorkerStrategy,
        starter: Arc<dyn StationStarter>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let pool = match strategy {
            WorkerStrategy::Pool {
                pool_size,
                max_inactive_time,
            } => {
                let (queue_tx, queue_rx) = mpsc::unbounded_channel();
                Some(Pool {
                    queue_tx,
                    queue_rx: Arc::new(Mutex::new(queue_rx)),
                    active: Arc::new(AtomicUsize::new(0)),
                    pool_size: pool_size.max(1),
                    max_inactive_time,
                })
            }
            WorkerStrategy::Dedicated { .. } => None,
        };
        Self {
            strategy,
            starter,
            events,
            pool,
            units: Mutex::new(Vec::new()),
        }
    }

    pub fn strategy(&self) -> &WorkerStrategy {
        &self.strategy
    }

    /// Number of pool units alive, 0 for dedicated workers
    pub fn active_units(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(0, |pool| pool.active.load(Ordering::SeqCst))
    }

    /// Schedule the start of every station in `descriptors`, in order
    pub async fn start_all(&self, descriptors: Vec<WorkerData>) -> SimulatorResult<()> {
        info!(
            "Starting {} station(s) with {:?}",
            descriptors.len(),
            self.strategy
        );
        for data in descriptors {
            self.submit(data).await?;
        }
        Ok(())
    }

    /// Schedule the start of one station
    pub async fn submit(&self, data: WorkerData) -> SimulatorResult<()> {
        match (&self.strategy, &self.pool) {
            (WorkerStrategy::Pool { .. }, Some(pool)) => {
                pool.queue_tx
                    .send(data)
                    .map_err(|_| SimulatorError::worker("pool queue closed"))?;
                self.grow_pool(pool);
                Ok(())
            }
            (WorkerStrategy::Dedicated { element_start_delay }, _) => {
                let message = serde_json::to_string(&WorkerMessage::start(&data)?)?;
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                inbound_tx
                    .send(message)
                    .map_err(|_| SimulatorError::worker("unit channel closed"))?;
                tokio::spawn(run_dedicated_unit(
                    self.starter.clone(),
                    None,
                    inbound_rx,
                    self.events.clone(),
                ));
                self.units.lock().await.push(inbound_tx);
                if !element_start_delay.is_zero() {
                    tokio::time::sleep(*element_start_delay).await;
                }
                Ok(())
            }
            (WorkerStrategy::Pool { .. }, None) => {
                Err(SimulatorError::worker("pool is not initialized"))
            }
        }
    }

    /// Send a raw control message to the dedicated unit at `unit`
    pub async fn post(&self, unit: usize, message: &WorkerMessage) -> SimulatorResult<()> {
        let units = self.units.lock().await;
        let sender = units
            .get(unit)
            .ok_or_else(|| SimulatorError::worker(format!("no worker unit {}", unit)))?;
        sender
            .send(serde_json::to_string(message)?)
            .map_err(|_| SimulatorError::worker(format!("worker unit {} is gone", unit)))
    }

    fn grow_pool(&self, pool: &Pool) {
        let reserved = pool
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < pool.pool_size).then_some(active + 1)
            })
            .is_ok();
        if !reserved {
            return;
        }

        let queue = pool.queue_rx.clone();
        let active = pool.active.clone();
        let max_inactive_time = pool.max_inactive_time;
        let pool_size = pool.pool_size;
        let starter = self.starter.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::time::timeout(max_inactive_time, async {
                    queue.lock().await.recv().await
                })
                .await;
                match next {
                    Ok(Some(data)) => start_isolated(starter.as_ref(), data, &events).await,
                    Ok(None) => {
                        active.fetch_sub(1, Ordering::SeqCst);
                        break;
                    }
                    Err(_) => {
                        if release_slot(&queue, &active, pool_size).await {
                            debug!("Work queued while pool unit was retiring, staying up");
                            continue;
                        }
                        debug!("Pool unit idle for {:?}, exiting", max_inactive_time);
                        break;
                    }
                }
            }
        });
    }
}

/// Give back an idle unit's slot. A start submitted while the slot was
/// still held saw a full pool and spawned nothing, so when work is waiting
/// the slot is taken back and `true` returned.
async fn release_slot(
    queue: &Mutex<mpsc::UnboundedReceiver<WorkerData>>,
    active: &AtomicUsize,
    pool_size: usize,
) -> bool {
    active.fetch_sub(1, Ordering::SeqCst);
    // A unit holding the queue is waiting in recv and will take the work
    let Ok(queue) = queue.try_lock() else {
        return false;
    };
    if queue.is_empty() {
        return false;
    }
    active
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
            (active < pool_size).then_some(active + 1)
        })
        .is_ok()
}
