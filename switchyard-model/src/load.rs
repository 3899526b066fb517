use std::collections::BTreeMap;

use crate::error::ModelError;

/// Current and maximum load of a single host.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeLoad {
    pub host: String,
    pub current_load: f32,
    pub max_load: f32,
}

impl NodeLoad {
    pub fn new(host: impl Into<String>, current_load: f32, max_load: f32) -> Self {
        Self {
            host: host.into(),
            current_load,
            max_load,
        }
    }

    /// `current_load / max_load`. A host without capacity reports as fully
    /// loaded.
    pub fn load_factor(&self) -> f32 {
        if self.max_load <= 0.0 {
            return f32::INFINITY;
        }
        self.current_load / self.max_load
    }
}

/// Snapshot of node loads keyed by host base URL.
///
/// The dispatcher takes one snapshot per batch and bumps entries locally as it
/// hands out work, so later jobs in the same batch see the load it added.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemLoad {
    nodes: BTreeMap<String, NodeLoad>,
}

impl SystemLoad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node_load(&mut self, load: NodeLoad) {
        self.nodes.insert(load.host.clone(), load);
    }

    pub fn get(&self, host: &str) -> Option<&NodeLoad> {
        self.nodes.get(host)
    }

    pub fn contains_host(&self, host: &str) -> bool {
        self.nodes.contains_key(host)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeLoad> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds `delta` to the current load of `host`, clamping at zero.
    pub fn update_node_load(&mut self, host: &str, delta: f32) -> Result<f32, ModelError> {
        let node = self
            .nodes
            .get_mut(host)
            .ok_or_else(|| ModelError::UnknownHost(host.to_string()))?;
        node.current_load = (node.current_load + delta).max(0.0);
        Ok(node.current_load)
    }

    /// Highest `max_load` of any node in the snapshot.
    pub fn highest_max_load(&self) -> f32 {
        self.nodes.values().map(|n| n.max_load).fold(0.0, f32::max)
    }
}
