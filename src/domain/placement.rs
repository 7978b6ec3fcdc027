//! The injective partial mapping service-id -> node-id the Deployer owns and
//! writes; read by the Monitor through a snapshot clone.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placement {
    map: HashMap<String, String>,
}

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, service_id: &str) -> Option<&str> {
        self.map.get(service_id).map(|s| s.as_str())
    }

    pub fn set(&mut self, service_id: impl Into<String>, node_id: impl Into<String>) {
        self.map.insert(service_id.into(), node_id.into());
    }

    pub fn remove(&mut self, service_id: &str) {
        self.map.remove(service_id);
    }

    pub fn is_placed(&self, service_id: &str) -> bool {
        self.map.contains_key(service_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(s, n)| (s.as_str(), n.as_str()))
    }

    pub fn as_map(&self) -> HashMap<String, String> {
        self.map.clone()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
