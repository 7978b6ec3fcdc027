//! Resource requirements and per-node capacity accounting (C1).

use serde::{Deserialize, Serialize};

/// The three resource axes every service and node is measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Cpu,
    Memory,
    Bandwidth,
}

/// Immutable `(cpu, mem, bw)` triple: cores, megabytes, megabits/second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu: f64,
    pub mem: f64,
    pub bw: f64,
}

impl ResourceRequirements {
    pub fn new(cpu: f64, mem: f64, bw: f64) -> Self {
        Self { cpu, mem, bw }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Does `self` fit within the given capacity's current availables?
    pub fn fits(&self, capacity: &ResourceCapacity) -> bool {
        self.cpu <= capacity.available_cpu
            && self.mem <= capacity.available_mem
            && self.bw <= capacity.available_bw
    }

    pub fn add(&self, other: &ResourceRequirements) -> ResourceRequirements {
        ResourceRequirements::new(self.cpu + other.cpu, self.mem + other.mem, self.bw + other.bw)
    }

    /// Pointwise subtract, clamped at 0 per axis.
    pub fn sub(&self, other: &ResourceRequirements) -> ResourceRequirements {
        ResourceRequirements::new(
            (self.cpu - other.cpu).max(0.0),
            (self.mem - other.mem).max(0.0),
            (self.bw - other.bw).max(0.0),
        )
    }

    pub fn scale(&self, factor: f64) -> ResourceRequirements {
        ResourceRequirements::new(self.cpu * factor, self.mem * factor, self.bw * factor)
    }
}

/// Per-node resource totals and current availability, with the 0 ≤ A ≤ T
/// invariant enforced by every mutator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceCapacity {
    pub total_cpu: f64,
    pub total_mem: f64,
    pub total_bw: f64,
    pub available_cpu: f64,
    pub available_mem: f64,
    pub available_bw: f64,
}

impl ResourceCapacity {
    pub fn new(total_cpu: f64, total_mem: f64, total_bw: f64) -> Self {
        Self {
            total_cpu,
            total_mem,
            total_bw,
            available_cpu: total_cpu,
            available_mem: total_mem,
            available_bw: total_bw,
        }
    }

    pub fn totals(&self) -> ResourceRequirements {
        ResourceRequirements::new(self.total_cpu, self.total_mem, self.total_bw)
    }

    pub fn availables(&self) -> ResourceRequirements {
        ResourceRequirements::new(self.available_cpu, self.available_mem, self.available_bw)
    }

    /// Deduct `req` from availables iff it fits. Returns whether it was applied;
    /// state is left unchanged on failure (non-fatal per the error design).
    pub fn allocate(&mut self, req: &ResourceRequirements) -> bool {
        if !req.fits(self) {
            return false;
        }
        self.available_cpu -= req.cpu;
        self.available_mem -= req.mem;
        self.available_bw -= req.bw;
        true
    }

    /// Return `req` to availables, clamped to totals.
    pub fn release(&mut self, req: &ResourceRequirements) {
        self.available_cpu = (self.available_cpu + req.cpu).min(self.total_cpu);
        self.available_mem = (self.available_mem + req.mem).min(self.total_mem);
        self.available_bw = (self.available_bw + req.bw).min(self.total_bw);
    }

    pub fn utilization(&self, kind: ResourceKind) -> f64 {
        let (t, a) = match kind {
            ResourceKind::Cpu => (self.total_cpu, self.available_cpu),
            ResourceKind::Memory => (self.total_mem, self.available_mem),
            ResourceKind::Bandwidth => (self.total_bw, self.available_bw),
        };
        if t <= 0.0 {
            0.0
        } else {
            (t - a) / t
        }
    }

    pub fn cpu_utilization(&self) -> f64 {
        self.utilization(ResourceKind::Cpu)
    }

    pub fn mem_utilization(&self) -> f64 {
        self.utilization(ResourceKind::Memory)
    }

    pub fn bw_utilization(&self) -> f64 {
        self.utilization(ResourceKind::Bandwidth)
    }

    /// Overloaded at threshold θ iff any axis utilization exceeds θ.
    pub fn is_overloaded(&self, threshold: f64) -> bool {
        self.cpu_utilization() > threshold
            || self.mem_utilization() > threshold
            || self.bw_utilization() > threshold
    }
}
