//! Abstract node telemetry source (§6). A live deployment would implement
//! `NodeProbe` against a real per-node agent; the core ships the
//! documented synthetic generator as the default so other implementations
//! can mirror the exact formulas in their own tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::Timelike;
use rand::Rng;

/// Per-service telemetry a probe produces for one sampling tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceSample {
    pub latency_ms: f64,
    pub queue_length: f64,
    pub request_rate: f64,
}

/// Abstract source of per-service telemetry. `node_cpu_utilization` is the
/// node's current CPU utilization in `[0,1]` — the Monitor reads that from
/// the authoritative `ResourceCapacity` it already holds via the node
/// registry and passes it in, rather than asking the probe to re-derive
/// ground truth the core already owns.
pub trait NodeProbe: Send + Sync {
    fn sample_service(&self, service_id: &str, node_cpu_utilization: f64) -> ServiceSample;
}

/// The documented default generator (§6). Deterministic except for its
/// uniform-noise and time-of-day terms.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticProbe;

impl SyntheticProbe {
    fn base_latency_ms(service_id: &str) -> f64 {
        let mut hasher = DefaultHasher::new();
        service_id.hash(&mut hasher);
        let h = hasher.finish() as i64;
        ((h.unsigned_abs() % 10) as f64 + 5.0) * 5.0
    }

    fn overload_multiplier(u: f64) -> f64 {
        if u > 0.7 { 1.0 + ((u - 0.7) / 0.3).powi(2) * 5.0 } else { 1.0 }
    }

    fn queue_amplifier(u: f64) -> f64 {
        if u > 0.6 { ((u - 0.6) * 5.0).exp() } else { 1.0 }
    }

    fn daily_request_rate() -> f64 {
        let hour = chrono::Local::now().hour() as f64;
        0.7 + 0.6 * (std::f64::consts::PI * (hour - 6.0) / 12.0).sin()
    }
}

impl NodeProbe for SyntheticProbe {
    fn sample_service(&self, service_id: &str, node_cpu_utilization: f64) -> ServiceSample {
        let noise = rand::rng().random_range(0.9..=1.1);
        let latency_ms = Self::base_latency_ms(service_id) * Self::overload_multiplier(node_cpu_utilization) * noise;
        let queue_length = Self::queue_amplifier(node_cpu_utilization);
        let request_rate = Self::daily_request_rate();
        ServiceSample { latency_ms, queue_length, request_rate }
    }
}
