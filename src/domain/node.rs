//! Node registry: fleet membership, per-node capacity, and pairwise network
//! delay (C3).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};

use crate::domain::resource::{ResourceCapacity, ResourceRequirements};
use crate::error::{EntityKind, Error, Result};

new_key_type! {
    pub struct NodeKey;
}

const EDGE_DEFAULT_CAPACITY: (f64, f64, f64) = (4.0, 8000.0, 100.0);
const CLOUD_DEFAULT_CAPACITY: (f64, f64, f64) = (16.0, 32000.0, 1000.0);
const DEFAULT_DELAY_MS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeClass {
    Edge,
    Cloud,
}

impl NodeClass {
    fn default_capacity(self) -> ResourceCapacity {
        let (cpu, mem, bw) = match self {
            NodeClass::Edge => EDGE_DEFAULT_CAPACITY,
            NodeClass::Cloud => CLOUD_DEFAULT_CAPACITY,
        };
        ResourceCapacity::new(cpu, mem, bw)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub class: NodeClass,
    pub capacity: ResourceCapacity,
    /// Outgoing one-way delay to other node ids, ms. Missing entries default
    /// to `DEFAULT_DELAY_MS`.
    pub delays: HashMap<String, f64>,
    /// Service ids currently hosted here. Disjoint across nodes by
    /// construction — only `NodeRegistry::host`/`release` mutate it.
    pub hosted: HashSet<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, class: NodeClass) -> Self {
        Self {
            id: id.into(),
            class,
            capacity: class.default_capacity(),
            delays: HashMap::new(),
            hosted: HashSet::new(),
        }
    }

    pub fn with_capacity(id: impl Into<String>, class: NodeClass, capacity: ResourceCapacity) -> Self {
        Self {
            id: id.into(),
            class,
            capacity,
            delays: HashMap::new(),
            hosted: HashSet::new(),
        }
    }

    pub fn delay_to(&self, other_node_id: &str) -> f64 {
        if other_node_id == self.id {
            0.0
        } else {
            *self.delays.get(other_node_id).unwrap_or(&DEFAULT_DELAY_MS)
        }
    }
}

/// Set of nodes, their capacities, and pairwise delays. Guarded by a single
/// `RwLock` over a `SlotMap`: one lock per table, cheap clone-out reads.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: SlotMap<NodeKey, Node>,
    index: HashMap<String, NodeKey>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(Inner::default())) }
    }

    pub fn add_node(&self, node: Node) {
        let mut guard = self.inner.write().unwrap();
        let id = node.id.clone();
        let key = guard.nodes.insert(node);
        guard.index.insert(id, key);
    }

    pub fn set_delay(&self, from: &str, to: &str, delay_ms: f64) -> Result<()> {
        let mut guard = self.inner.write().unwrap();
        let key = *guard
            .index
            .get(from)
            .ok_or_else(|| Error::not_found(EntityKind::Node, from))?;
        guard
            .nodes
            .get_mut(key)
            .unwrap()
            .delays
            .insert(to.to_string(), delay_ms);
        Ok(())
    }

    pub fn node_ids(&self) -> Vec<String> {
        let guard = self.inner.read().unwrap();
        guard.index.keys().cloned().collect()
    }

    pub fn get(&self, node_id: &str) -> Result<Node> {
        let guard = self.inner.read().unwrap();
        let key = *guard
            .index
            .get(node_id)
            .ok_or_else(|| Error::not_found(EntityKind::Node, node_id))?;
        Ok(guard.nodes.get(key).unwrap().clone())
    }

    pub fn delay(&self, from: &str, to: &str) -> Result<f64> {
        Ok(self.get(from)?.delay_to(to))
    }

    /// Candidate nodes whose current availables satisfy `req`, in node-id
    /// ascending order (placement cost tie-break relies on this order being
    /// stable, not on this function breaking ties itself).
    pub fn candidates_for(&self, req: &ResourceRequirements) -> Vec<String> {
        let guard = self.inner.read().unwrap();
        let mut ids: Vec<String> = guard
            .index
            .iter()
            .filter(|(_, key)| req.fits(&guard.nodes.get(**key).unwrap().capacity))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Deduct `req` from `node_id`'s capacity and record `service_id` as
    /// hosted there. Fails (state unchanged) if it no longer fits.
    pub fn host(&self, node_id: &str, service_id: &str, req: &ResourceRequirements) -> Result<bool> {
        let mut guard = self.inner.write().unwrap();
        let key = *guard
            .index
            .get(node_id)
            .ok_or_else(|| Error::not_found(EntityKind::Node, node_id))?;
        let node = guard.nodes.get_mut(key).unwrap();
        if !node.capacity.allocate(req) {
            return Ok(false);
        }
        node.hosted.insert(service_id.to_string());
        Ok(true)
    }

    /// Release `service_id` from `node_id`, returning `req` to availables.
    pub fn release(&self, node_id: &str, service_id: &str, req: &ResourceRequirements) -> Result<()> {
        let mut guard = self.inner.write().unwrap();
        let key = *guard
            .index
            .get(node_id)
            .ok_or_else(|| Error::not_found(EntityKind::Node, node_id))?;
        let node = guard.nodes.get_mut(key).unwrap();
        node.hosted.remove(service_id);
        node.capacity.release(req);
        Ok(())
    }
}
