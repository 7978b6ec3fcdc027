//! Adaptive monitoring (C6): per-entity sampling, a fixed-rate snapshot
//! aggregator, and the telemetry types C7 consumes.

pub mod probe;
pub mod sampler;
pub mod state;

pub use probe::{NodeProbe, ServiceSample, SyntheticProbe};
pub use sampler::{Monitor, MonitorTuning};
pub use state::{ChainMetrics, MonitoringData, NodeMetrics, ServiceMetrics};

impl From<&crate::config::Config> for MonitorTuning {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            epsilon_resource: config.epsilon_resource,
            epsilon_latency: config.epsilon_latency,
            base_sampling_interval: config.base_sampling_interval,
            min_sampling_interval: config.min_sampling_interval,
            window_size: config.window_size,
            history_size: config.history_size,
        }
    }
}
