//! Multi-dimensional critical-path analyzer (C4).

use std::cmp::Ordering;

use crate::domain::graph::DependencyGraph;
use crate::domain::node::NodeRegistry;
use crate::domain::params::GlobalParameterVector;
use crate::error::Result;

const ZSCORE_STDEV_EPSILON: f64 = 1e-9;
/// See SPEC_FULL.md §9(c): a guard on the renormalization sum that the
/// inherited stdev guard alone did not cover.
const RENORMALIZATION_SUM_EPSILON: f64 = 1e-6;
const DEFAULT_TEMPORAL_WEIGHT: f64 = 0.40;
const DEFAULT_RESOURCE_WEIGHT: f64 = 0.35;
const DEFAULT_DEPENDENCY_WEIGHT: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPath {
    pub path: Vec<String>,
    pub temporal: f64,
    pub resource: f64,
    pub dependency: f64,
    pub composite: f64,
    pub critical: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub temporal: f64,
    pub resource: f64,
    pub dependency: f64,
}

/// Computes temporal/resource/dependency criticality per path, min-max
/// normalizes each dimension across one call's path set, and ranks the
/// composite score against a threshold.
#[derive(Debug, Clone)]
pub struct CriticalPathAnalyzer {
    weights: Weights,
    threshold: f64,
}

impl CriticalPathAnalyzer {
    pub fn new(params: &GlobalParameterVector) -> Self {
        Self {
            weights: Weights {
                temporal: params.temporal_weight,
                resource: params.resource_weight,
                dependency: params.dependency_weight,
            },
            threshold: params.critical_path_threshold,
        }
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Replaces τ outright — no clamping, per contract.
    pub fn set_threshold(&mut self, tau: f64) {
        self.threshold = tau;
    }

    /// Z-score the three proposals to detect a degenerate (no-dispersion)
    /// signal, then renormalize the *proposals themselves* so they sum to 1.
    /// Snaps to the documented defaults when either guard fires.
    pub fn update_weights(&mut self, alpha: f64, beta: f64, gamma: f64) {
        let vals = [alpha, beta, gamma];
        let mean = vals.iter().sum::<f64>() / 3.0;
        let variance = vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 3.0;
        let stdev = variance.sqrt();

        if stdev <= ZSCORE_STDEV_EPSILON {
            self.snap_to_defaults();
            return;
        }

        let sum = alpha + beta + gamma;
        if sum.abs() <= RENORMALIZATION_SUM_EPSILON {
            self.snap_to_defaults();
            return;
        }

        self.weights = Weights { temporal: alpha / sum, resource: beta / sum, dependency: gamma / sum };
    }

    fn snap_to_defaults(&mut self) {
        self.weights = Weights {
            temporal: DEFAULT_TEMPORAL_WEIGHT,
            resource: DEFAULT_RESOURCE_WEIGHT,
            dependency: DEFAULT_DEPENDENCY_WEIGHT,
        };
    }

    fn temporal_criticality(&self, graph: &DependencyGraph, path: &[String]) -> Result<f64> {
        graph.sequential_latency(path)
    }

    fn resource_criticality(&self, graph: &DependencyGraph, registry: &NodeRegistry, path: &[String]) -> Result<f64> {
        let mut total = 0.0;
        for id in path {
            let service = graph.service(id)?;
            let Some(node_id) = &service.node_id else { continue };
            let node = match registry.get(node_id) {
                Ok(n) => n,
                Err(_) => continue,
            };
            let cap = node.capacity;
            let req = service.base_requirements;
            let pressure = 0.5 * (req.cpu / cap.total_cpu.max(f64::EPSILON))
                + 0.3 * (req.mem / cap.total_mem.max(f64::EPSILON))
                + 0.2 * (req.bw / cap.total_bw.max(f64::EPSILON));
            total += pressure * cap.cpu_utilization();
        }
        Ok(total)
    }

    fn dependency_criticality(&self, graph: &DependencyGraph, path: &[String]) -> f64 {
        let mut total = 0.0;
        for id in path {
            let deps = graph.dependencies_of(id);
            let n = deps.len();
            if n == 0 {
                continue;
            }
            let sum_freq_data: f64 = deps.iter().map(|(_, e)| e.frequency * e.data_volume).sum();
            total += (n as f64) * (sum_freq_data / n as f64);
        }
        total
    }

    /// Ranked list of every simple path `src -> dst`, scored and normalized
    /// against this call's own path set.
    pub fn identify_critical_paths(
        &self,
        graph: &DependencyGraph,
        registry: &NodeRegistry,
        src: &str,
        dst: &str,
    ) -> Result<Vec<ScoredPath>> {
        let paths = graph.get_all_paths(src, dst)?;
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut raw: Vec<(Vec<String>, f64, f64, f64)> = Vec::with_capacity(paths.len());
        for path in paths {
            let t = self.temporal_criticality(graph, &path)?;
            let r = self.resource_criticality(graph, registry, &path)?;
            let d = self.dependency_criticality(graph, &path);
            raw.push((path, t, r, d));
        }

        let t_hat = normalize(raw.iter().map(|(_, t, _, _)| *t));
        let r_hat = normalize(raw.iter().map(|(_, _, r, _)| *r));
        let d_hat = normalize(raw.iter().map(|(_, _, _, d)| *d));

        let mut scored: Vec<ScoredPath> = raw
            .into_iter()
            .enumerate()
            .map(|(i, (path, t, r, d))| {
                let composite =
                    self.weights.temporal * t_hat[i] + self.weights.resource * r_hat[i] + self.weights.dependency * d_hat[i];
                ScoredPath { path, temporal: t, resource: r, dependency: d, composite, critical: composite > self.threshold }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.path.len().cmp(&b.path.len()))
                .then_with(|| a.path.cmp(&b.path))
        });

        Ok(scored)
    }
}

/// Min-max normalize into [0,1]; 0.5 everywhere when min == max (including
/// the single-path case).
fn normalize(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let values: Vec<f64> = values.collect();
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return values.iter().map(|_| 0.5).collect();
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::{Node, NodeClass, NodeRegistry};
    use crate::domain::resource::ResourceRequirements;
    use crate::domain::service::Microservice;

    fn linear_graph() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.add_service(Microservice::new("A", ResourceRequirements::new(0.8, 800.0, 15.0), 10.0));
        g.add_service(Microservice::new("B", ResourceRequirements::new(0.3, 1500.0, 40.0), 15.0));
        g.add_dependency("A", "B", 50.0, 0.8).unwrap();
        g
    }

    #[test]
    fn single_path_normalizes_to_half_and_composite_in_unit_interval() {
        let graph = linear_graph();
        let registry = NodeRegistry::new();
        registry.add_node(Node::new("cloud", NodeClass::Cloud));
        let analyzer = CriticalPathAnalyzer::new(&GlobalParameterVector::default());
        let scored = analyzer.identify_critical_paths(&graph, &registry, "A", "B").unwrap();
        assert_eq!(scored.len(), 1);
        assert!(scored[0].composite >= 0.0 && scored[0].composite <= 1.0);
    }

    #[test]
    fn update_weights_is_a_fixed_point_at_defaults() {
        let mut analyzer = CriticalPathAnalyzer::new(&GlobalParameterVector::default());
        analyzer.update_weights(0.40, 0.35, 0.25);
        let w = analyzer.weights();
        assert!((w.temporal - 0.40).abs() < 1e-9);
        assert!((w.resource - 0.35).abs() < 1e-9);
        assert!((w.dependency - 0.25).abs() < 1e-9);
    }

    #[test]
    fn update_weights_renormalizes_and_keeps_dominant_proposal_on_top() {
        let mut analyzer = CriticalPathAnalyzer::new(&GlobalParameterVector::default());
        analyzer.update_weights(0.8, 0.1, 0.1);
        let w = analyzer.weights();
        assert!((w.temporal + w.resource + w.dependency - 1.0).abs() < 1e-9);
        assert!(w.temporal > w.resource);
        assert!((w.resource - w.dependency).abs() < 1e-12);
        assert!(w.temporal > 0.5);
    }

    #[test]
    fn update_weights_snaps_to_defaults_when_proposals_are_degenerate() {
        let mut analyzer = CriticalPathAnalyzer::new(&GlobalParameterVector::default());
        analyzer.update_weights(0.33, 0.33, 0.33);
        let w = analyzer.weights();
        assert!((w.temporal - 0.40).abs() < 1e-9);
        assert!((w.resource - 0.35).abs() < 1e-9);
        assert!((w.dependency - 0.25).abs() < 1e-9);
    }

    #[test]
    fn update_weights_snaps_to_defaults_when_sum_is_near_zero() {
        let mut analyzer = CriticalPathAnalyzer::new(&GlobalParameterVector::default());
        analyzer.update_weights(1.0, -0.5, -0.5);
        let w = analyzer.weights();
        assert!((w.temporal - 0.40).abs() < 1e-9);
        assert!((w.resource - 0.35).abs() < 1e-9);
        assert!((w.dependency - 0.25).abs() < 1e-9);
    }
}
