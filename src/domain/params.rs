//! The global, named hyper-parameter vector shared by the analyzer, deployer
//! and aggregator.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalParameterVector {
    pub temporal_weight: f64,
    pub resource_weight: f64,
    pub dependency_weight: f64,
    pub critical_path_threshold: f64,
    pub utilization_threshold: f64,
    pub resource_scaling_factor: f64,
    pub adaptation_factor: f64,
}

impl Default for GlobalParameterVector {
    fn default() -> Self {
        Self {
            temporal_weight: 0.40,
            resource_weight: 0.35,
            dependency_weight: 0.25,
            critical_path_threshold: 0.70,
            utilization_threshold: 0.80,
            resource_scaling_factor: 0.30,
            adaptation_factor: 0.50,
        }
    }
}

impl GlobalParameterVector {
    /// Named (name, value) pairs in the fixed order §6 specifies for
    /// persistence.
    pub fn as_named_pairs(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("temporalWeight", self.temporal_weight),
            ("resourceWeight", self.resource_weight),
            ("dependencyWeight", self.dependency_weight),
            ("criticalPathThreshold", self.critical_path_threshold),
            ("utilizationThreshold", self.utilization_threshold),
            ("resourceScalingFactor", self.resource_scaling_factor),
            ("adaptationFactor", self.adaptation_factor),
        ]
    }

    pub fn set_named(&mut self, name: &str, value: f64) {
        match name {
            "temporalWeight" => self.temporal_weight = value,
            "resourceWeight" => self.resource_weight = value,
            "dependencyWeight" => self.dependency_weight = value,
            "criticalPathThreshold" => self.critical_path_threshold = value,
            "utilizationThreshold" => self.utilization_threshold = value,
            "resourceScalingFactor" => self.resource_scaling_factor = value,
            "adaptationFactor" => self.adaptation_factor = value,
            _ => {}
        }
    }

    pub fn get_named(&self, name: &str) -> Option<f64> {
        self.as_named_pairs().into_iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// L2 norm of the elementwise delta against `other`, used by Phase D's
    /// convergence check.
    pub fn l2_delta(&self, other: &GlobalParameterVector) -> f64 {
        let d = [
            self.temporal_weight - other.temporal_weight,
            self.resource_weight - other.resource_weight,
            self.dependency_weight - other.dependency_weight,
            self.critical_path_threshold - other.critical_path_threshold,
            self.utilization_threshold - other.utilization_threshold,
            self.resource_scaling_factor - other.resource_scaling_factor,
            self.adaptation_factor - other.adaptation_factor,
        ];
        d.iter().map(|x| x * x).sum::<f64>().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let p = GlobalParameterVector::default();
        assert!((p.temporal_weight + p.resource_weight + p.dependency_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identical_vectors_have_zero_delta() {
        let p = GlobalParameterVector::default();
        assert_eq!(p.l2_delta(&p), 0.0);
    }
}
