//! Federated parameter aggregator (C7): gathers per-node parameter
//! proposals, gates them by sample count and quality, and produces a new
//! Global Parameter Vector that C4/C5 re-parameterize from.
//!
//! `NodeModel` is modeled as a sibling of the aggregator per SPEC_FULL.md §9
//! design note — not nested inside it — since it carries its own
//! invariants (sample gating, weight normalization) that are easier to
//! test standalone.

use std::collections::HashMap;

use crate::config::Config;
use crate::domain::node::NodeRegistry;
use crate::domain::params::GlobalParameterVector;
use crate::error::{EntityKind, Error, Result};

const INITIAL_QUALITY_SCORE: f64 = 0.8;
const QUALITY_SMOOTHING: f64 = 0.3;
const FAIL_RATE_SMOOTHING: f64 = 0.9;

/// Inputs to one node's per-round local gradient step, gathered by the
/// scheduler from the Monitor's latest snapshot for that node's chains.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalUpdateInput {
    pub chain_latency_ms: f64,
    pub chain_latency_variance: f64,
    pub avg_utilization: f64,
    pub completion_rate: f64,
}

/// One node's local parameter mirror and the bookkeeping that gates it
/// from, and weights it into, aggregation.
#[derive(Debug, Clone)]
pub struct NodeModel {
    pub local_mirror: GlobalParameterVector,
    pub sample_count: u64,
    pub quality_score: f64,
    pub fail_rate: f64,
}

impl NodeModel {
    fn new(initial: GlobalParameterVector) -> Self {
        Self { local_mirror: initial, sample_count: 0, quality_score: INITIAL_QUALITY_SCORE, fail_rate: 0.0 }
    }
}

/// Process-wide state the aggregator owns: every registered node's model
/// plus the gating/weighting knobs from configuration.
pub struct ParameterAggregator {
    nodes: HashMap<String, NodeModel>,
    quantity_threshold: u64,
    quality_threshold: f64,
    base_learning_rate: f64,
    adaptivity_factor: f64,
    local_blend_ratio: f64,
}

impl ParameterAggregator {
    pub fn new(config: &Config) -> Self {
        Self {
            nodes: HashMap::new(),
            quantity_threshold: config.quantity_threshold,
            quality_threshold: config.quality_threshold,
            base_learning_rate: config.base_learning_rate,
            adaptivity_factor: config.adaptivity_factor,
            local_blend_ratio: config.local_blend_ratio,
        }
    }

    pub fn register_node(&mut self, node_id: impl Into<String>, initial: GlobalParameterVector) {
        self.nodes.entry(node_id.into()).or_insert_with(|| NodeModel::new(initial));
    }

    pub fn node_model(&self, node_id: &str) -> Option<&NodeModel> {
        self.nodes.get(node_id)
    }

    /// Per-round local update (§4.5), called by the scheduler on each
    /// registered node's behalf — nodes never call this themselves.
    pub fn local_update(&mut self, node_id: &str, input: LocalUpdateInput) -> Result<()> {
        let state = self.nodes.get_mut(node_id).ok_or_else(|| Error::not_found(EntityKind::Node, node_id))?;

        let eta = self.base_learning_rate.min(self.base_learning_rate / (1.0 + self.adaptivity_factor * input.chain_latency_variance).sqrt());
        let d_alpha = input.chain_latency_ms / 100.0;
        let d_beta = (input.avg_utilization - 0.7) * 0.5;
        let d_gamma = 0.1;
        let d_tau = (0.95 - input.completion_rate) * 0.2;
        let d_scaling = (0.7 - input.avg_utilization) * 0.3;

        let mirror = &mut state.local_mirror;
        mirror.temporal_weight -= eta * d_alpha;
        mirror.resource_weight -= eta * d_beta;
        mirror.dependency_weight -= eta * d_gamma;
        mirror.critical_path_threshold -= eta * d_tau;
        mirror.resource_scaling_factor -= eta * d_scaling;

        state.sample_count += 1;
        state.quality_score = QUALITY_SMOOTHING * input.completion_rate + (1.0 - QUALITY_SMOOTHING) * state.quality_score;
        log::debug!("node '{node_id}' local update #{}: eta={eta:.6}, quality={:.3}", state.sample_count, state.quality_score);
        Ok(())
    }

    /// Feeds `reportCompletion`'s succeeded/failed outcome into a node's
    /// fail-rate EMA (smoothing 0.9 on the prior, per §4.5's weight
    /// calculation).
    pub fn record_completion(&mut self, node_id: &str, succeeded: bool) -> Result<()> {
        let state = self.nodes.get_mut(node_id).ok_or_else(|| Error::not_found(EntityKind::Node, node_id))?;
        let failed = if succeeded { 0.0 } else { 1.0 };
        state.fail_rate = FAIL_RATE_SMOOTHING * state.fail_rate + (1.0 - FAIL_RATE_SMOOTHING) * failed;
        Ok(())
    }

    fn calculate_node_capability(&self, node_id: &str, registry: &NodeRegistry) -> f64 {
        match registry.get(node_id) {
            Ok(node) => {
                let totals = node.capacity.totals();
                0.5 * (totals.cpu / 10.0) + 0.3 * (totals.mem / 8000.0) + 0.2 * (totals.bw / 1000.0)
            }
            Err(_) => {
                log::warn!("capability lookup failed for unknown node '{node_id}'; treating capability as 0");
                0.0
            }
        }
    }

    /// Gates nodes by `sampleCount >= Nmin` and `qualityScore >= Qmin`,
    /// weights the survivors by `capability * (1 - failRate) * sqrt(sampleCount)`,
    /// and produces the new Global Parameter Vector as the weighted mean of
    /// each survivor's local mirror. Leaves the vector unchanged if nobody
    /// qualifies; falls back per-parameter to the current value if the
    /// total weight collapses to zero. Every node's local mirror is then
    /// re-blended `0.8*global + 0.2*local` (§4.5 Distribution).
    pub fn aggregate(&mut self, current_global: &GlobalParameterVector, registry: &NodeRegistry) -> GlobalParameterVector {
        let selected: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, m)| m.sample_count >= self.quantity_threshold && m.quality_score >= self.quality_threshold)
            .map(|(id, _)| id.clone())
            .collect();

        if selected.is_empty() {
            log::warn!("federated aggregation: no node met the quantity/quality gate, global vector unchanged");
            return *current_global;
        }

        let weights: Vec<(String, f64)> = selected
            .iter()
            .map(|id| {
                let model = &self.nodes[id];
                let capability = self.calculate_node_capability(id, registry);
                let weight = capability * (1.0 - model.fail_rate) * (model.sample_count as f64).sqrt();
                (id.clone(), weight)
            })
            .collect();
        let total_weight: f64 = weights.iter().map(|(_, w)| w).sum();

        let mut new_global = *current_global;
        for (name, current_value) in current_global.as_named_pairs() {
            let value = if total_weight <= 0.0 {
                current_value
            } else {
                let weighted_sum: f64 =
                    weights.iter().map(|(id, w)| w * self.nodes[id].local_mirror.get_named(name).unwrap_or(current_value)).sum();
                weighted_sum / total_weight
            };
            new_global.set_named(name, value);
        }

        log::info!("federated aggregation: {} node(s) selected, total weight {total_weight:.3}", selected.len());

        for model in self.nodes.values_mut() {
            model.local_mirror = blend(&new_global, &model.local_mirror, self.local_blend_ratio);
        }

        new_global
    }
}

/// `local_weight*local + (1 - local_weight)*global` per named parameter.
fn blend(global: &GlobalParameterVector, local: &GlobalParameterVector, local_weight: f64) -> GlobalParameterVector {
    let mut result = *global;
    for (name, global_value) in global.as_named_pairs() {
        let local_value = local.get_named(name).unwrap_or(global_value);
        result.set_named(name, (1.0 - local_weight) * global_value + local_weight * local_value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::{Node, NodeClass};

    fn registry_with(nodes: &[(&str, NodeClass)]) -> NodeRegistry {
        let registry = NodeRegistry::new();
        for (id, class) in nodes {
            registry.add_node(Node::new(*id, *class));
        }
        registry
    }

    #[test]
    fn scenario_six_gates_out_the_undersampled_node() {
        let config = Config::default();
        let mut aggregator = ParameterAggregator::new(&config);
        let registry = registry_with(&[("n1", NodeClass::Cloud), ("n2", NodeClass::Cloud)]);

        aggregator.register_node("n1", GlobalParameterVector::default());
        aggregator.register_node("n2", GlobalParameterVector { temporal_weight: 0.9, ..GlobalParameterVector::default() });

        for (id, count) in [("n1", 2u64), ("n2", 5u64)] {
            for _ in 0..count {
                aggregator
                    .local_update(
                        id,
                        LocalUpdateInput { chain_latency_ms: 10.0, chain_latency_variance: 0.0, avg_utilization: 0.5, completion_rate: 0.9 },
                    )
                    .unwrap();
            }
        }
        // force quality above the 0.7 gate for both nodes
        aggregator.nodes.get_mut("n1").unwrap().quality_score = 0.9;
        aggregator.nodes.get_mut("n2").unwrap().quality_score = 0.9;

        assert_eq!(aggregator.node_model("n1").unwrap().sample_count, 2);
        assert_eq!(aggregator.node_model("n2").unwrap().sample_count, 5);

        let global = aggregator.aggregate(&GlobalParameterVector::default(), &registry);
        // n1 (sampleCount 2 < Nmin 3) must be excluded; only n2 influences the result.
        let n2_mirror_before = GlobalParameterVector { temporal_weight: 0.9, ..GlobalParameterVector::default() };
        assert!((global.temporal_weight - n2_mirror_before.temporal_weight).abs() < 1.0);
        assert_ne!(global.temporal_weight, GlobalParameterVector::default().temporal_weight);
    }

    #[test]
    fn aggregate_leaves_global_unchanged_when_nobody_qualifies() {
        let config = Config::default();
        let mut aggregator = ParameterAggregator::new(&config);
        let registry = registry_with(&[("n1", NodeClass::Edge)]);
        aggregator.register_node("n1", GlobalParameterVector::default());
        let current =
            GlobalParameterVector { temporal_weight: 0.55, resource_weight: 0.25, dependency_weight: 0.20, ..GlobalParameterVector::default() };
        let global = aggregator.aggregate(&current, &registry);
        assert_eq!(global, current);
    }

    #[test]
    fn record_completion_moves_fail_rate_towards_observed_outcome() {
        let config = Config::default();
        let mut aggregator = ParameterAggregator::new(&config);
        aggregator.register_node("n1", GlobalParameterVector::default());
        aggregator.record_completion("n1", false).unwrap();
        assert!(aggregator.node_model("n1").unwrap().fail_rate > 0.0);
    }

    #[test]
    fn record_completion_on_unknown_node_is_not_found() {
        let config = Config::default();
        let mut aggregator = ParameterAggregator::new(&config);
        let err = aggregator.record_completion("ghost", true).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
