//! Service dependency DAG: structure, path enumeration, and sequential
//! latency arithmetic (C2).

use std::collections::{HashMap, HashSet};

use crate::domain::service::Microservice;
use crate::error::{EntityKind, Error, Result};

const LOCAL_COMM_DIVISOR: f64 = 1000.0;
const REMOTE_COMM_DIVISOR: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct DependencyEdge {
    pub data_volume: f64,
    pub frequency: f64,
}

#[derive(Debug, Clone)]
struct EdgeRecord {
    target: String,
    edge: DependencyEdge,
}

/// DAG of services. Acyclic by construction — `add_dependency` rejects any
/// edge that would close a cycle.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    services: HashMap<String, Microservice>,
    /// Insertion-ordered outgoing edges per service; `get_all_paths`'
    /// deterministic emission order depends on this being a `Vec`, not a set.
    outgoing: HashMap<String, Vec<EdgeRecord>>,
    /// Service-insertion order, used by the Deployer's residual placement
    /// phase to stay deterministic without relying on `HashMap` iteration.
    insertion_order: Vec<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&mut self, service: Microservice) {
        if !self.services.contains_key(&service.id) {
            self.insertion_order.push(service.id.clone());
        }
        self.outgoing.entry(service.id.clone()).or_default();
        self.services.insert(service.id.clone(), service);
    }

    /// Service ids in the order they were added to the graph.
    pub fn service_ids_in_order(&self) -> &[String] {
        &self.insertion_order
    }

    pub fn service(&self, id: &str) -> Result<&Microservice> {
        self.services.get(id).ok_or_else(|| Error::not_found(EntityKind::Service, id))
    }

    pub fn service_mut(&mut self, id: &str) -> Result<&mut Microservice> {
        self.services.get_mut(id).ok_or_else(|| Error::not_found(EntityKind::Service, id))
    }

    pub fn services(&self) -> impl Iterator<Item = &Microservice> {
        self.services.values()
    }

    pub fn has_service(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    /// Add `src -> dst`, rejecting unknown endpoints and any edge that would
    /// close a cycle (`dst` can already reach `src`).
    pub fn add_dependency(&mut self, src: &str, dst: &str, data_volume: f64, frequency: f64) -> Result<()> {
        if !self.has_service(src) {
            return Err(Error::not_found(EntityKind::Service, src));
        }
        if !self.has_service(dst) {
            return Err(Error::not_found(EntityKind::Service, dst));
        }
        if src == dst || self.can_reach(dst, src) {
            return Err(Error::InvariantViolation(format!(
                "adding edge {src} -> {dst} would create a cycle"
            )));
        }
        self.outgoing
            .entry(src.to_string())
            .or_default()
            .push(EdgeRecord { target: dst.to_string(), edge: DependencyEdge { data_volume, frequency } });
        Ok(())
    }

    fn can_reach(&self, from: &str, to: &str) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from.to_string()];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(edges) = self.outgoing.get(&current) {
                for e in edges {
                    stack.push(e.target.clone());
                }
            }
        }
        false
    }

    /// Outgoing dependency edges of `s`, in insertion order.
    pub fn dependencies_of(&self, s: &str) -> Vec<(String, DependencyEdge)> {
        self.outgoing
            .get(s)
            .map(|edges| edges.iter().map(|e| (e.target.clone(), e.edge)).collect())
            .unwrap_or_default()
    }

    fn edge(&self, src: &str, dst: &str) -> Option<DependencyEdge> {
        self.outgoing.get(src)?.iter().find(|e| e.target == dst).map(|e| e.edge)
    }

    pub fn sources(&self) -> Vec<String> {
        let mut has_incoming: HashSet<&str> = HashSet::new();
        for edges in self.outgoing.values() {
            for e in edges {
                has_incoming.insert(e.target.as_str());
            }
        }
        let mut ids: Vec<String> = self
            .services
            .keys()
            .filter(|id| !has_incoming.contains(id.as_str()))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn sinks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .services
            .keys()
            .filter(|id| self.outgoing.get(*id).map(|e| e.is_empty()).unwrap_or(true))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Every simple path `src -> dst`, depth-first with a visited-on-stack
    /// set, emitted in the order dictated by edge-insertion order. Eager —
    /// callers needing streaming must adapt.
    pub fn get_all_paths(&self, src: &str, dst: &str) -> Result<Vec<Vec<String>>> {
        if !self.has_service(src) {
            return Err(Error::not_found(EntityKind::Service, src));
        }
        if !self.has_service(dst) {
            return Err(Error::not_found(EntityKind::Service, dst));
        }
        let mut paths = Vec::new();
        let mut on_stack: HashSet<String> = HashSet::new();
        let mut current = vec![src.to_string()];
        on_stack.insert(src.to_string());
        self.dfs_paths(src, dst, &mut current, &mut on_stack, &mut paths);
        Ok(paths)
    }

    fn dfs_paths(
        &self,
        current_node: &str,
        dst: &str,
        current_path: &mut Vec<String>,
        on_stack: &mut HashSet<String>,
        paths: &mut Vec<Vec<String>>,
    ) {
        if current_node == dst {
            paths.push(current_path.clone());
            return;
        }
        let Some(edges) = self.outgoing.get(current_node) else { return };
        for e in edges {
            if on_stack.contains(&e.target) {
                continue;
            }
            current_path.push(e.target.clone());
            on_stack.insert(e.target.clone());
            self.dfs_paths(&e.target, dst, current_path, on_stack, paths);
            on_stack.remove(&e.target);
            current_path.pop();
        }
    }

    fn communication_time(&self, src: &str, dst: &str, edge: DependencyEdge) -> f64 {
        let colocated = match (self.services.get(src), self.services.get(dst)) {
            (Some(a), Some(b)) => match (&a.node_id, &b.node_id) {
                (Some(na), Some(nb)) => na == nb,
                _ => false,
            },
            _ => false,
        };
        if colocated {
            edge.data_volume / LOCAL_COMM_DIVISOR
        } else {
            edge.data_volume / REMOTE_COMM_DIVISOR
        }
    }

    /// Σ execution_time(s_i) + Σ communicationTime(edge(s_i, s_i+1)).
    pub fn sequential_latency(&self, path: &[String]) -> Result<f64> {
        let mut total = 0.0;
        for id in path {
            total += self.service(id)?.execution_time_ms;
        }
        for window in path.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            if let Some(edge) = self.edge(a, b) {
                total += self.communication_time(a, b, edge);
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resource::ResourceRequirements;

    fn svc(id: &str, exec_ms: f64) -> Microservice {
        Microservice::new(id, ResourceRequirements::new(1.0, 100.0, 10.0), exec_ms)
    }

    #[test]
    fn linear_chain_latency_matches_scenario_one() {
        let mut g = DependencyGraph::new();
        g.add_service(svc("A", 10.0));
        g.add_service(svc("B", 15.0));
        g.add_dependency("A", "B", 50.0, 0.8).unwrap();
        // both unplaced (remote) -> remote cost dataVolume/100
        let paths = g.get_all_paths("A", "B").unwrap();
        assert_eq!(paths, vec![vec!["A".to_string(), "B".to_string()]]);
        let lat = g.sequential_latency(&paths[0]).unwrap();
        assert!((lat - (10.0 + 15.0 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn colocated_services_use_local_cost() {
        let mut g = DependencyGraph::new();
        g.add_service(svc("A", 10.0));
        g.add_service(svc("B", 15.0));
        g.add_dependency("A", "B", 50.0, 0.8).unwrap();
        g.service_mut("A").unwrap().node_id = Some("cloud".to_string());
        g.service_mut("B").unwrap().node_id = Some("cloud".to_string());
        let lat = g.sequential_latency(&["A".to_string(), "B".to_string()]).unwrap();
        assert!((lat - (10.0 + 15.0 + 0.05)).abs() < 1e-9);
    }

    #[test]
    fn cyclic_insertion_is_rejected() {
        let mut g = DependencyGraph::new();
        g.add_service(svc("A", 1.0));
        g.add_service(svc("B", 1.0));
        g.add_dependency("A", "B", 1.0, 1.0).unwrap();
        let err = g.add_dependency("B", "A", 1.0, 1.0).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        let mut g = DependencyGraph::new();
        g.add_service(svc("A", 1.0));
        let err = g.add_dependency("A", "ghost", 1.0, 1.0).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn sources_and_sinks() {
        let mut g = DependencyGraph::new();
        g.add_service(svc("A", 1.0));
        g.add_service(svc("B", 1.0));
        g.add_service(svc("C", 1.0));
        g.add_dependency("A", "B", 1.0, 1.0).unwrap();
        g.add_dependency("B", "C", 1.0, 1.0).unwrap();
        assert_eq!(g.sources(), vec!["A".to_string()]);
        assert_eq!(g.sinks(), vec!["C".to_string()]);
    }

    #[test]
    fn enumerates_all_simple_paths_in_insertion_order() {
        let mut g = DependencyGraph::new();
        for id in ["A", "B", "C", "D"] {
            g.add_service(svc(id, 1.0));
        }
        g.add_dependency("A", "B", 1.0, 1.0).unwrap();
        g.add_dependency("A", "C", 1.0, 1.0).unwrap();
        g.add_dependency("B", "D", 1.0, 1.0).unwrap();
        g.add_dependency("C", "D", 1.0, 1.0).unwrap();
        let paths = g.get_all_paths("A", "D").unwrap();
        assert_eq!(
            paths,
            vec![
                vec!["A".to_string(), "B".to_string(), "D".to_string()],
                vec!["A".to_string(), "C".to_string(), "D".to_string()],
            ]
        );
    }
}
