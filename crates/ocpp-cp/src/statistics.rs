//! Request statistics
//!
//! The request service reports every exchange to a [`StatisticsSink`].
//! Recording never fails and never blocks the caller.

use ocpp_types::MessageType;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Point in an exchange where a sample is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatisticsPhase {
    Sent,
    Received,
    Error,
    Timeout,
}

impl StatisticsPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatisticsPhase::Sent => "sent",
            StatisticsPhase::Received => "received",
            StatisticsPhase::Error => "error",
            StatisticsPhase::Timeout => "timeout",
        }
    }
}

pub trait StatisticsSink: Send + Sync {
    fn record_sample(&self, command: &str, message_type: MessageType, phase: StatisticsPhase);

    /// Duration of a transport write
    fn record_latency(&self, command: &str, elapsed: Duration);
}

const LATENCY_BUCKETS: [f64; 9] = [0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0];

/// Prometheus backed sink, one per station
pub struct PrometheusStatistics {
    samples: IntCounterVec,
    write_latency: HistogramVec,
}

impl PrometheusStatistics {
    /// Create the station collectors and register them. Collectors of all
    /// stations may share one registry, they differ by the `station` label,
    /// which must be unique per registry (the station hash id).
    pub fn new(registry: &Registry, station: &str) -> prometheus::Result<Self> {
        let samples = IntCounterVec::new(
            Opts::new("ocpp_messages_total", "OCPP messages by command, type and phase")
                .const_label("station", station),
            &["command", "message_type", "phase"],
        )?;
        let write_latency = HistogramVec::new(
            HistogramOpts::new(
                "ocpp_write_duration_seconds",
                "Duration of OCPP frame writes",
            )
            .const_label("station", station)
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["command"],
        )?;

        registry.register(Box::new(samples.clone()))?;
        registry.register(Box::new(write_latency.clone()))?;

        Ok(Self {
            samples,
            write_latency,
        })
    }

    pub fn count(&self, command: &str, message_type: MessageType, phase: StatisticsPhase) -> u64 {
        self.samples
            .with_label_values(&[command, message_type.as_str(), phase.as_str()])
            .get()
    }
}

impl StatisticsSink for PrometheusStatistics {
    fn record_sample(&self, command: &str, message_type: MessageType, phase: StatisticsPhase) {
        self.samples
            .with_label_values(&[command, message_type.as_str(), phase.as_str()])
            .inc();
    }

    fn record_latency(&self, command: &str, elapsed: Duration) {
        self.write_latency
            .with_label_values(&[command])
            .observe(elapsed.as_secs_f64());
    }
}
