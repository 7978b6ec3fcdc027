//! Static configuration surface (ambient). Every name in SPEC_FULL.md §6's
//! Configuration list lives here, alongside the initial Global Parameter
//! Vector from §3. Nothing else in the core reads environment variables
//! directly — `logger::init` is the sole exception (`RUST_LOG`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::params::GlobalParameterVector;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub base_learning_rate: f64,
    pub adaptivity_factor: f64,
    pub quantity_threshold: u64,
    pub quality_threshold: f64,
    pub epsilon_resource: f64,
    pub epsilon_latency: f64,
    pub utilization_threshold: f64,
    pub base_sampling_interval: Duration,
    pub min_sampling_interval: Duration,
    pub history_size: usize,
    pub window_size: usize,
    pub max_refinement_iterations: usize,
    pub convergence_threshold: f64,
    pub local_blend_ratio: f64,
    pub migration_improvement_ratio: f64,
    pub initial_parameters: GlobalParameterVector,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_learning_rate: 1e-3,
            adaptivity_factor: 0.5,
            quantity_threshold: 3,
            quality_threshold: 0.7,
            epsilon_resource: 0.1,
            epsilon_latency: 0.05,
            utilization_threshold: 0.8,
            base_sampling_interval: Duration::from_secs(1),
            min_sampling_interval: Duration::from_millis(100),
            history_size: 100,
            window_size: 20,
            max_refinement_iterations: 10,
            convergence_threshold: 0.01,
            local_blend_ratio: 0.2,
            migration_improvement_ratio: 0.8,
            initial_parameters: GlobalParameterVector::default(),
        }
    }
}

impl Config {
    /// Rejects configurations that could never produce a sane run: a zero
    /// quantity gate, an out-of-range threshold, or a sampling floor above
    /// its own ceiling.
    pub fn validate(&self) -> Result<()> {
        if self.quantity_threshold == 0 {
            return Err(Error::InvalidParameter("quantityThreshold must be >= 1".to_string()));
        }
        for (name, value) in [
            ("qualityThreshold", self.quality_threshold),
            ("utilizationThreshold", self.utilization_threshold),
            ("convergenceThreshold", self.convergence_threshold),
            ("localBlendRatio", self.local_blend_ratio),
            ("migrationImprovementRatio", self.migration_improvement_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidParameter(format!("{name} must be within [0,1], got {value}")));
            }
        }
        if self.min_sampling_interval > self.base_sampling_interval {
            return Err(Error::InvalidParameter(
                "minSamplingInterval must not exceed baseSamplingInterval".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_quantity_threshold_is_rejected() {
        let mut cfg = Config::default();
        cfg.quantity_threshold = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn inverted_sampling_bounds_are_rejected() {
        let mut cfg = Config::default();
        cfg.min_sampling_interval = Duration::from_secs(2);
        assert!(matches!(cfg.validate(), Err(Error::InvalidParameter(_))));
    }
}
