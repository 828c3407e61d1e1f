use petgraph::prelude::StableDiGraph;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

pub const START_NODE_TYPE: &str = "start";

/// One step in a flow. `node_type` is an open string so a document carrying
/// a type this build does not know still deserializes; execution surfaces it
/// as an `UnknownNodeType` configuration failure instead.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Type-specific configuration, parsed by the node's handler.
    #[serde(default)]
    pub data: Value,
}

/// Directed connection between two nodes. `source_handle` selects among a
/// multi-branch node's outgoing edges ("true"/"false", a button id).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

/// An operator-authored flow document, as stored by the flow editor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub title: String,
    /// Case-insensitive substring triggers. Empty means any inbound message
    /// starts this flow.
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow `{flow_id}` has no start node")]
    MissingStartNode { flow_id: String },
    #[error("flow `{flow_id}` has duplicate node id `{node_id}`")]
    DuplicateNodeId { flow_id: String, node_id: String },
    #[error("flow `{flow_id}` has an edge referencing unknown node `{node_id}`")]
    DanglingEdge { flow_id: String, node_id: String },
    #[error("failed to read flow file: {0}")]
    Io(String),
    #[error("failed to parse flow document: {0}")]
    Parse(String),
}

/// Non-fatal findings from publish-time validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationWarning {
    UnreachableNode { node_id: String },
    DuplicateEdge { source: String, source_handle: Option<String> },
    ExtraStartNode { node_id: String },
    Cycle,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::UnreachableNode { node_id } => {
                write!(f, "node `{}` is unreachable from the start node", node_id)
            }
            ValidationWarning::DuplicateEdge { source, source_handle } => write!(
                f,
                "node `{}` has more than one edge for handle {:?}; the first-defined edge wins",
                source, source_handle
            ),
            ValidationWarning::ExtraStartNode { node_id } => {
                write!(f, "extra start node `{}` is ignored", node_id)
            }
            ValidationWarning::Cycle => {
                write!(f, "flow contains a cycle; the per-turn step limit applies")
            }
        }
    }
}

/// An immutable, validated flow: node index plus a `(source, handle)` edge
/// table. Sessions hold on to the compiled version they started with.
#[derive(Debug, Clone)]
pub struct CompiledFlow {
    def: FlowDefinition,
    nodes_by_id: HashMap<String, usize>,
    /// (source id, handle) -> target id. First-defined edge wins on
    /// duplicates, see `ValidationWarning::DuplicateEdge`.
    edge_index: HashMap<(String, Option<String>), String>,
    start_index: usize,
    warnings: Vec<ValidationWarning>,
}

impl FlowDefinition {
    /// Publish-time validation and indexing. Fatal: no start node, duplicate
    /// node ids, edges referencing missing nodes. Everything else is a
    /// warning on the compiled flow.
    pub fn compile(self) -> Result<CompiledFlow, FlowError> {
        let mut warnings = Vec::new();

        let mut nodes_by_id = HashMap::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            if nodes_by_id.insert(node.id.clone(), index).is_some() {
                return Err(FlowError::DuplicateNodeId {
                    flow_id: self.id,
                    node_id: node.id.clone(),
                });
            }
        }

        let mut starts = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.node_type == START_NODE_TYPE);
        let start_index = match starts.next() {
            Some((index, _)) => index,
            None => return Err(FlowError::MissingStartNode { flow_id: self.id }),
        };
        for (_, extra) in starts {
            warnings.push(ValidationWarning::ExtraStartNode {
                node_id: extra.id.clone(),
            });
        }

        let mut edge_index: HashMap<(String, Option<String>), String> = HashMap::new();
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !nodes_by_id.contains_key(endpoint) {
                    return Err(FlowError::DanglingEdge {
                        flow_id: self.id,
                        node_id: endpoint.clone(),
                    });
                }
            }
            let key = (edge.source.clone(), edge.source_handle.clone());
            if edge_index.contains_key(&key) {
                warnings.push(ValidationWarning::DuplicateEdge {
                    source: key.0,
                    source_handle: key.1,
                });
            } else {
                edge_index.insert(key, edge.target.clone());
            }
        }

        // reachability / cycle analysis over the deduplicated edge set
        let mut graph = StableDiGraph::<&str, ()>::new();
        let mut petgraph_index = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            petgraph_index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
        }
        for ((source, _), target) in &edge_index {
            graph.add_edge(
                petgraph_index[source.as_str()],
                petgraph_index[target.as_str()],
                (),
            );
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            warnings.push(ValidationWarning::Cycle);
        }

        let mut reachable = HashSet::new();
        let mut stack = vec![petgraph_index[self.nodes[start_index].id.as_str()]];
        while let Some(ix) = stack.pop() {
            if reachable.insert(ix) {
                for succ in graph.neighbors_directed(ix, petgraph::Direction::Outgoing) {
                    stack.push(succ);
                }
            }
        }
        for node in &self.nodes {
            if !reachable.contains(&petgraph_index[node.id.as_str()]) {
                warnings.push(ValidationWarning::UnreachableNode {
                    node_id: node.id.clone(),
                });
            }
        }

        Ok(CompiledFlow {
            def: self,
            nodes_by_id,
            edge_index,
            start_index,
            warnings,
        })
    }
}

impl CompiledFlow {
    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn version(&self) -> u32 {
        self.def.version
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.def
    }

    pub fn warnings(&self) -> &[ValidationWarning] {
        &self.warnings
    }

    pub fn start_node(&self) -> &Node {
        &self.def.nodes[self.start_index]
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes_by_id.get(id).map(|&i| &self.def.nodes[i])
    }

    /// Follows the outgoing edge of `from` for the given handle. A specific
    /// handle falls back to the node's un-handled default edge when no edge
    /// matches it; `None` means the traversal ends there.
    pub fn next_node(&self, from: &str, handle: Option<&str>) -> Option<&Node> {
        if let Some(h) = handle {
            if let Some(node) = self.edge_target(from, Some(h)) {
                return Some(node);
            }
        }
        self.edge_target(from, None)
    }

    fn edge_target(&self, from: &str, handle: Option<&str>) -> Option<&Node> {
        let key = (from.to_string(), handle.map(str::to_string));
        self.edge_index.get(&key).and_then(|target| self.node(target))
    }
}
