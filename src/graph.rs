use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::DiGraph;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::component::{ComponentDescriptor, ComponentRegistry};
use crate::error::PipelineError;

/// A directed connection from one node's output slot to another node's input
/// slot. The four-tuple is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Edge {
    pub source_node: String,
    pub source_slot: String,
    pub target_node: String,
    pub target_slot: String,
}

impl Edge {
    pub fn id(&self) -> String {
        format!(
            "{}:{}->{}:{}",
            self.source_node, self.source_slot, self.target_node, self.target_slot
        )
    }

    /// Name of the channel this edge consumes from.
    pub fn channel_name(&self) -> String {
        format!("{}.{}", self.source_node, self.source_slot)
    }
}

/// One placed component instance, as pure data. Execution state (status,
/// started_at, error) lives with the runtime, not here.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub component: String,
    pub init: Value,
}

/// The editable pipeline topology. Every mutation validates first and leaves
/// the graph untouched on failure.
pub struct PipelineGraph {
    registry: Arc<ComponentRegistry>,
    nodes: HashMap<String, GraphNode>,
    edges: Vec<Edge>,
}

impl PipelineGraph {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        PipelineGraph {
            registry,
            nodes: HashMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Snapshot of all nodes, ordered by id for stable listings.
    pub fn nodes(&self) -> Vec<GraphNode> {
        let mut all: Vec<GraphNode> = self.nodes.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.edges.clone()
    }

    pub fn descriptor_of(&self, node_id: &str) -> Option<&ComponentDescriptor> {
        let node = self.nodes.get(node_id)?;
        self.registry.descriptor(&node.component)
    }

    /// Add a node instance. With no explicit id the component name is used,
    /// uniquified when already taken.
    pub fn add_node(
        &mut self,
        component: &str,
        id: Option<String>,
        init: Value,
    ) -> Result<GraphNode, PipelineError> {
        if self.registry.descriptor(component).is_none() {
            return Err(PipelineError::ComponentNotFound(component.to_string()));
        }
        self.registry.validate_args(component, &init)?;

        let id = match id {
            Some(id) => {
                // Channel names are `<node_id>.<slot>`, so the separator is
                // reserved.
                if id.is_empty() || id.contains('.') {
                    return Err(PipelineError::InvalidArgs {
                        component: component.to_string(),
                        detail: format!("invalid node id `{id}`"),
                    });
                }
                if self.nodes.contains_key(&id) {
                    return Err(PipelineError::DuplicateId(id));
                }
                id
            }
            None => self.generate_id(component),
        };

        let node = GraphNode {
            id: id.clone(),
            component: component.to_string(),
            init,
        };
        self.nodes.insert(id, node.clone());
        Ok(node)
    }

    fn generate_id(&self, component: &str) -> String {
        if !self.nodes.contains_key(component) {
            return component.to_string();
        }
        loop {
            let candidate = format!("{component}-{}", &Uuid::new_v4().simple().to_string()[..8]);
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Remove a node and every incident edge. Returns the removed edges so
    /// the runtime can unsubscribe them.
    pub fn remove_node(&mut self, id: &str) -> Result<(GraphNode, Vec<Edge>), PipelineError> {
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| PipelineError::NodeNotFound(id.to_string()))?;
        let (incident, kept): (Vec<Edge>, Vec<Edge>) = self
            .edges
            .drain(..)
            .partition(|e| e.source_node == id || e.target_node == id);
        self.edges = kept;
        Ok((node, incident))
    }

    /// Validate and insert an edge: endpoints and slots must exist, element
    /// types must be string-equal, the four-tuple must be new, and the result
    /// must stay acyclic.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), PipelineError> {
        let output_type = self.slot_type(&edge.source_node, &edge.source_slot, true)?;
        let input_type = self.slot_type(&edge.target_node, &edge.target_slot, false)?;
        if output_type != input_type {
            return Err(PipelineError::TypeMismatch {
                source_endpoint: format!("{}.{}", edge.source_node, edge.source_slot),
                output_type,
                target: format!("{}.{}", edge.target_node, edge.target_slot),
                input_type,
            });
        }
        if self.edges.contains(&edge) {
            return Err(PipelineError::DuplicateEdge(edge.id()));
        }
        if self.would_cycle(&edge) {
            return Err(PipelineError::CycleDetected(edge.id()));
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, edge: &Edge) -> Result<(), PipelineError> {
        let before = self.edges.len();
        self.edges.retain(|e| e != edge);
        if self.edges.len() == before {
            return Err(PipelineError::EdgeNotFound(edge.id()));
        }
        Ok(())
    }

    fn slot_type(
        &self,
        node_id: &str,
        slot: &str,
        output: bool,
    ) -> Result<String, PipelineError> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| PipelineError::NodeNotFound(node_id.to_string()))?;
        let descriptor = self
            .registry
            .descriptor(&node.component)
            .ok_or_else(|| PipelineError::ComponentNotFound(node.component.clone()))?;
        let slots = if output {
            &descriptor.outputs
        } else {
            &descriptor.inputs
        };
        slots
            .get(slot)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownSlot {
                node: node_id.to_string(),
                slot: slot.to_string(),
            })
    }

    fn would_cycle(&self, proposed: &Edge) -> bool {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index_of = HashMap::new();
        for id in self.nodes.keys() {
            index_of.insert(id.as_str(), graph.add_node(id.as_str()));
        }
        for edge in self.edges.iter().chain(std::iter::once(proposed)) {
            if let (Some(&a), Some(&b)) = (
                index_of.get(edge.source_node.as_str()),
                index_of.get(edge.target_node.as_str()),
            ) {
                graph.add_edge(a, b, ());
            }
        }
        is_cyclic_directed(&graph)
    }

    /// Node ids sources-first. The graph is acyclic by construction, so this
    /// only falls back to insertion order if something managed to corrupt it.
    pub fn topo_order(&self) -> Vec<String> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut index_of = HashMap::new();
        for id in self.nodes.keys() {
            index_of.insert(id.clone(), graph.add_node(id.clone()));
        }
        for edge in &self.edges {
            if let (Some(&a), Some(&b)) = (
                index_of.get(&edge.source_node),
                index_of.get(&edge.target_node),
            ) {
                graph.add_edge(a, b, ());
            }
        }
        match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(|ix| graph[ix].clone()).collect(),
            Err(_) => {
                warn!("graph unexpectedly cyclic, using arbitrary start order");
                self.nodes.keys().cloned().collect()
            }
        }
    }
}
