//! Persisted graph description.
//!
//! The document is a plain JSON value:
//!
//! ```json
//! {
//!   "nodegraph": [
//!     { "nodes": [ { "id": "…", "kind": "blur", "posx": 10, "posy": 20,
//!                    "properties": { "0": "4" },
//!                    "inputs": { "0": "<input connector id>" },
//!                    "customname": "" } ] },
//!     { "connections": [ { "src": "<node id>", "dst": "<input connector id>",
//!                          "dst-node": "<node id>" } ] }
//!   ],
//!   "cascade-version": "0.1.0"
//! }
//! ```
//!
//! Property keys are positional indices into the kind's control list; values
//! use the comma-joined encoding of [`PropertyValue::encode`]. Caches and
//! dirty flags are not persisted: a loaded graph is entirely dirty.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GraphError, GraphResult};
use crate::graph::GraphModel;
use crate::id::{ConnectorId, NodeId};
use crate::property::PropertyValue;
use crate::registry::NodeKindRegistry;

/// Version written into new documents.
pub const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    /// Node section followed by the connection section.
    pub nodegraph: Vec<GraphSection>,
    /// Writer version, `major.minor.build`.
    #[serde(rename = "cascade-version")]
    pub version: String,
}

/// One section of [`GraphDescription::nodegraph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphSection {
    /// Node entries.
    Nodes { nodes: Vec<NodeEntry> },
    /// Connection entries.
    Connections { connections: Vec<ConnectionEntry> },
}

/// Persisted node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Stable node id.
    pub id: NodeId,
    /// Kind id.
    pub kind: String,
    /// Editor position.
    #[serde(default)]
    pub posx: i32,
    #[serde(default)]
    pub posy: i32,
    /// Property index to encoded value.
    #[serde(default)]
    pub properties: BTreeMap<usize, String>,
    /// Input index to input connector id.
    #[serde(default)]
    pub inputs: BTreeMap<usize, ConnectorId>,
    /// Custom display name, empty for none.
    #[serde(default)]
    pub customname: String,
}

/// Persisted connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    /// Source node.
    pub src: NodeId,
    /// Target input connector.
    pub dst: ConnectorId,
    /// Target node.
    #[serde(rename = "dst-node")]
    pub dst_node: NodeId,
}

impl GraphDescription {
    /// All node entries across sections.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodegraph.iter().flat_map(|s| match s {
            GraphSection::Nodes { nodes } => nodes.as_slice(),
            GraphSection::Connections { .. } => &[][..],
        })
    }

    /// All connection entries across sections.
    pub fn connections(&self) -> impl Iterator<Item = &ConnectionEntry> {
        self.nodegraph.iter().flat_map(|s| match s {
            GraphSection::Connections { connections } => connections.as_slice(),
            GraphSection::Nodes { .. } => &[][..],
        })
    }

    /// Parses a JSON document.
    pub fn from_json(json: &str) -> GraphResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> GraphResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl GraphModel {
    /// Snapshot of the graph structure and property values.
    pub fn to_description(&self) -> GraphDescription {
        let nodes = self
            .nodes()
            .map(|node| NodeEntry {
                id: node.id(),
                kind: node.kind().to_string(),
                posx: node.position().0,
                posy: node.position().1,
                properties: node.properties().iter().map(PropertyValue::encode).enumerate().collect(),
                inputs: node.input_connectors().iter().copied().enumerate().collect(),
                customname: node.custom_name().unwrap_or_default().to_string(),
            })
            .collect();

        let connections = self
            .connections()
            .filter_map(|conn| {
                let dst = self.node(conn.target).ok()?.input_connectors().get(conn.input).copied()?;
                Some(ConnectionEntry { src: conn.source, dst, dst_node: conn.target })
            })
            .collect();

        GraphDescription {
            nodegraph: vec![GraphSection::Nodes { nodes }, GraphSection::Connections { connections }],
            version: FORMAT_VERSION.to_string(),
        }
    }

    /// Rebuilds a graph from a description.
    ///
    /// Unparseable or out-of-range property values are logged and replaced
    /// by the control's default. Unknown kinds, duplicate ids and dangling
    /// connections are errors. The returned graph has an empty event queue
    /// and every node dirty.
    pub fn from_description(
        registry: Arc<NodeKindRegistry>,
        description: &GraphDescription,
        reject_cycles: bool,
    ) -> GraphResult<Self> {
        let mut graph = GraphModel::new(registry.clone()).with_cycle_rejection(reject_cycles);
        let mut connectors: HashMap<ConnectorId, (NodeId, usize)> = HashMap::new();

        for entry in description.nodes() {
            let desc = registry.describe(&entry.kind)?;
            let mut properties = desc.default_properties();
            for (&index, raw) in &entry.properties {
                let Some(spec) = desc.properties.get(index) else {
                    warn!(node = %entry.id, index, "ignoring property beyond kind schema");
                    continue;
                };
                match spec.control.decode(raw) {
                    Ok(value) => properties[index] = value,
                    Err(reason) => {
                        warn!(node = %entry.id, index, %reason, "invalid stored property, using default");
                    }
                }
            }

            let input_ids: Vec<ConnectorId> = (0..desc.input_count())
                .map(|i| entry.inputs.get(&i).copied().unwrap_or_default())
                .collect();
            for (i, cid) in input_ids.iter().enumerate() {
                connectors.insert(*cid, (entry.id, i));
            }

            let custom_name = (!entry.customname.is_empty()).then(|| entry.customname.clone());
            graph.insert_node(entry.id, &entry.kind, custom_name, (entry.posx, entry.posy), properties, input_ids)?;
        }

        for entry in description.connections() {
            let Some(&(node, input)) = connectors.get(&entry.dst) else {
                return Err(GraphError::Document(format!("connection to unknown input connector {}", entry.dst)));
            };
            if node != entry.dst_node {
                return Err(GraphError::Document(format!(
                    "input connector {} belongs to node {node}, not {}",
                    entry.dst, entry.dst_node
                )));
            }
            graph.connect(entry.src, 0, node, input)?;
        }

        graph.take_events();
        debug!(nodes = graph.len(), version = %description.version, "graph loaded");
        Ok(graph)
    }

    /// Parses a JSON document into a graph.
    pub fn from_json(registry: Arc<NodeKindRegistry>, json: &str, reject_cycles: bool) -> GraphResult<Self> {
        let description = GraphDescription::from_json(json)?;
        Self::from_description(registry, &description, reject_cycles)
    }

    /// Serializes the graph to pretty JSON.
    pub fn to_json(&self) -> GraphResult<String> {
        self.to_description().to_json()
    }
}
