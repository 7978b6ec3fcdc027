//! Service (`Microservice`) identity, base requirements, and current
//! assignment.

use std::collections::HashMap;

use crate::domain::resource::{ResourceKind, ResourceRequirements};

/// A single microservice in the dependency graph. Its node assignment is
/// mutated only by the Deployer, never by the service itself — ownership of
/// "who lives where" is the `NodeRegistry`/`Placement` pair, not a pointer
/// held here.
#[derive(Debug, Clone)]
pub struct Microservice {
    pub id: String,
    pub base_requirements: ResourceRequirements,
    /// Execution time in milliseconds.
    pub execution_time_ms: f64,
    pub node_id: Option<String>,
    pub utilization: HashMap<ResourceKind, f64>,
}

impl Microservice {
    pub fn new(id: impl Into<String>, base_requirements: ResourceRequirements, execution_time_ms: f64) -> Self {
        Self {
            id: id.into(),
            base_requirements,
            execution_time_ms,
            node_id: None,
            utilization: HashMap::new(),
        }
    }

    /// Service rate µ = 1 / execution_time.
    pub fn service_rate(&self) -> f64 {
        if self.execution_time_ms <= 0.0 {
            0.0
        } else {
            1.0 / self.execution_time_ms
        }
    }

    pub fn utilization_of(&self, kind: ResourceKind) -> f64 {
        self.utilization.get(&kind).copied().unwrap_or(0.0)
    }

    pub fn set_utilization(&mut self, kind: ResourceKind, value: f64) {
        self.utilization.insert(kind, value.clamp(0.0, 1.0));
    }
}
