//! Per-entity monitoring state: bounded metric windows, the adaptive
//! sampling-interval formula, derived chain metrics, and interference.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::node::NodeRegistry;
use crate::domain::placement::Placement;
use crate::error::EntityKind;

/// SLA-derived ceiling each entity kind's sampling interval must respect
/// (`Lsla/10` from §4.4), in milliseconds.
const SERVICE_LSLA_MS: f64 = 100.0;
const CHAIN_LSLA_MS: f64 = 500.0;
const NODE_LSLA_MS: f64 = 1000.0;
const VARIANCE_FLOOR: f64 = 1e-3;
/// 1 ms if colocated, otherwise the source node's recorded delay — a
/// different default (30 ms) than `Node::delay_to`'s 100 ms, because §4.4
/// specifies it separately from the placement-cost formula in §4.3.
const DEFAULT_CROSS_NODE_DELAY_MS: f64 = 30.0;
const COLOCATED_DELAY_MS: f64 = 1.0;

fn lsla_ms(kind: EntityKind) -> f64 {
    match kind {
        EntityKind::Service => SERVICE_LSLA_MS,
        EntityKind::Chain => CHAIN_LSLA_MS,
        EntityKind::Node => NODE_LSLA_MS,
    }
}

/// Bounded sliding window of an entity's primary scalar (latency for
/// services/chains, CPU utilization for nodes), capped at `capacity`
/// samples — an append-with-cap ring, not a general deque.
#[derive(Debug, Clone)]
pub struct Window {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn as_slice(&self) -> &VecDeque<f64> {
        &self.samples
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn population_variance(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        self.samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.samples.len() as f64
    }

    /// Coefficient-of-variation, squared, which is the `v` term §4.4's
    /// formula actually consumes for latency-bearing entities: 0 when the
    /// window is empty or its mean collapses to 0 (never NaN, per §7).
    pub fn squared_coefficient_of_variation(&self) -> f64 {
        let mean = self.mean();
        if mean.abs() < f64::EPSILON {
            return 0.0;
        }
        let variance = self.population_variance();
        (variance.sqrt() / mean).powi(2)
    }
}

/// `v` per §4.4: squared CoV for latency-bearing entities (service/chain),
/// plain variance for node CPU.
pub fn variance_estimate(kind: EntityKind, window: &Window) -> f64 {
    match kind {
        EntityKind::Node => window.population_variance(),
        EntityKind::Service | EntityKind::Chain => window.squared_coefficient_of_variation(),
    }
}

/// `tnew = Tbase * min(1, sqrt(eps / max(v, 1e-3)))`, clamped to
/// `[Tmin, Lsla/10]`. When `Tmin` exceeds `Lsla/10` (true for services and
/// chains under the documented defaults — Tmin=100ms outruns their 10ms
/// and 50ms ceilings) the lower bound collapses to the ceiling itself
/// rather than producing an inverted, panicking range; the interval then
/// pins to that ceiling, which is exactly what scenario 4 demonstrates.
pub fn adaptive_interval(
    kind: EntityKind,
    window: &Window,
    epsilon_resource: f64,
    epsilon_latency: f64,
    base_interval: Duration,
    min_interval: Duration,
) -> Duration {
    let v = variance_estimate(kind, window);
    let epsilon = match kind {
        EntityKind::Node => epsilon_resource,
        EntityKind::Service | EntityKind::Chain => epsilon_latency,
    };
    let base_secs = base_interval.as_secs_f64();
    let tnew = base_secs * (epsilon / v.max(VARIANCE_FLOOR)).sqrt().min(1.0);

    let upper = lsla_ms(kind) / 10.0 / 1000.0;
    let lower = min_interval.as_secs_f64().min(upper);
    Duration::from_secs_f64(tnew.clamp(lower, upper))
}

/// Per-service telemetry snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub latency_ms: f64,
    pub queue_length: f64,
    pub request_rate: f64,
    pub cpu_utilization: f64,
    pub mem_utilization: f64,
    pub bw_utilization: f64,
}

/// Per-node telemetry snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub cpu_utilization: f64,
    pub mem_utilization: f64,
    pub bw_utilization: f64,
}

/// Per-chain telemetry, derived rather than sampled directly (§4.4).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChainMetrics {
    pub end_to_end_latency_ms: f64,
    pub completion_rate: f64,
    pub max_service_latency_ms: f64,
    pub min_service_latency_ms: f64,
    /// Fraction of `reportCompletion` calls for this chain that reported
    /// success, since the chain was registered — the "chain-completion-rate
    /// statistics" `reportCompletion` drives per §6. Distinct from
    /// `completion_rate`, which is the sampled request-rate bottleneck.
    pub reported_completion_rate: f64,
}

/// One fixed-cadence aggregator tick's worth of every entity's current
/// metrics, the record retained in the Monitor's 100-deep ring buffer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringData {
    pub services: HashMap<String, ServiceMetrics>,
    pub nodes: HashMap<String, NodeMetrics>,
    pub chains: HashMap<String, ChainMetrics>,
}

/// End-to-end chain latency: Σ service latencies + Σ inter-service
/// communication latency (1 ms colocated, else the source node's recorded
/// delay to the target, default 30 ms).
pub fn chain_end_to_end_latency(path: &[String], service_metrics: &HashMap<String, ServiceMetrics>, placement: &Placement, registry: &NodeRegistry) -> f64 {
    let mut total: f64 = path.iter().filter_map(|id| service_metrics.get(id)).map(|m| m.latency_ms).sum();
    for window in path.windows(2) {
        let (a, b) = (&window[0], &window[1]);
        let (Some(node_a), Some(node_b)) = (placement.get(a), placement.get(b)) else { continue };
        if node_a == node_b {
            total += COLOCATED_DELAY_MS;
            continue;
        }
        let delay = registry.get(node_a).ok().and_then(|n| n.delays.get(node_b).copied()).unwrap_or(DEFAULT_CROSS_NODE_DELAY_MS);
        total += delay;
    }
    total
}

/// Bottleneck completion rate: the minimum request rate across every
/// member of the chain.
pub fn chain_completion_rate(path: &[String], service_metrics: &HashMap<String, ServiceMetrics>) -> f64 {
    path.iter().filter_map(|id| service_metrics.get(id)).map(|m| m.request_rate).fold(f64::INFINITY, f64::min).clamp_to_zero()
}

/// Max/min per-service latency across the chain, tracked separately from
/// end-to-end latency.
pub fn chain_latency_bounds(path: &[String], service_metrics: &HashMap<String, ServiceMetrics>) -> (f64, f64) {
    let latencies: Vec<f64> = path.iter().filter_map(|id| service_metrics.get(id)).map(|m| m.latency_ms).collect();
    if latencies.is_empty() {
        return (0.0, 0.0);
    }
    (latencies.iter().cloned().fold(f64::NEG_INFINITY, f64::max), latencies.iter().cloned().fold(f64::INFINITY, f64::min))
}

trait ClampToZero {
    fn clamp_to_zero(self) -> f64;
}

impl ClampToZero for f64 {
    /// `fold` over an empty iterator leaves `f64::INFINITY`; treat an
    /// empty chain as a rate of 0 rather than surfacing infinity.
    fn clamp_to_zero(self) -> f64 {
        if self.is_finite() { self } else { 0.0 }
    }
}

/// Pearson correlation of two colocated services' `(cpu, mem, bw)`
/// utilization triples — `0` when either stdev vanishes, never `NaN`.
pub fn interference(a: (f64, f64, f64), b: (f64, f64, f64)) -> f64 {
    let av = [a.0, a.1, a.2];
    let bv = [b.0, b.1, b.2];
    let mean_a = av.iter().sum::<f64>() / 3.0;
    let mean_b = bv.iter().sum::<f64>() / 3.0;
    let cov: f64 = av.iter().zip(bv.iter()).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum::<f64>() / 3.0;
    let var_a: f64 = av.iter().map(|x| (x - mean_a).powi(2)).sum::<f64>() / 3.0;
    let var_b: f64 = bv.iter().map(|x| (x - mean_b).powi(2)).sum::<f64>() / 3.0;
    let sd_a = var_a.sqrt();
    let sd_b = var_b.sqrt();
    if sd_a < f64::EPSILON || sd_b < f64::EPSILON { 0.0 } else { cov / (sd_a * sd_b) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_four_interval_downshift_clamps_to_service_ceiling() {
        let mut window = Window::new(20);
        // mean 100, stdev 30 -> CoV 0.3 -> squared 0.09
        for v in [70.0, 130.0, 70.0, 130.0, 70.0, 130.0, 70.0, 130.0] {
            window.push(v);
        }
        let v = variance_estimate(EntityKind::Service, &window);
        assert!((v - 0.09).abs() < 1e-9);

        let interval = adaptive_interval(EntityKind::Service, &window, 0.1, 0.05, Duration::from_secs(1), Duration::from_millis(100));
        assert!((interval.as_secs_f64() - 0.010).abs() < 1e-9);
    }

    #[test]
    fn node_interval_respects_the_full_range() {
        let mut window = Window::new(20);
        for _ in 0..20 {
            window.push(0.5);
        }
        // zero variance -> tnew = base (clamped to 1s ceiling for node Lsla/10)
        let interval = adaptive_interval(EntityKind::Node, &window, 0.1, 0.05, Duration::from_secs(1), Duration::from_millis(100));
        assert!(interval.as_secs_f64() <= 1.0 + 1e-9);
        assert!(interval.as_secs_f64() >= 0.1 - 1e-9);
    }

    #[test]
    fn interference_is_one_for_identical_triples_with_variance() {
        let a = (0.9, 0.1, 0.5);
        assert!((interference(a, a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn interference_is_zero_when_either_triple_is_constant() {
        assert_eq!(interference((0.5, 0.5, 0.5), (0.1, 0.9, 0.3)), 0.0);
    }

    #[test]
    fn chain_completion_rate_is_the_bottleneck() {
        let mut metrics = HashMap::new();
        metrics.insert("A".to_string(), ServiceMetrics { request_rate: 10.0, ..Default::default() });
        metrics.insert("B".to_string(), ServiceMetrics { request_rate: 4.0, ..Default::default() });
        let rate = chain_completion_rate(&["A".to_string(), "B".to_string()], &metrics);
        assert_eq!(rate, 4.0);
    }
}
