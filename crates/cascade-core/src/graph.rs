//! The node graph.
//!
//! [`GraphModel`] exclusively owns every [`Node`] and every [`Connection`].
//! Cross-references are ids, never pointers: a connection is stored on both
//! ends (in the target's input slot and the source's fan-out list) as a
//! plain value, so deleting a node only needs id lookups.
//!
//! ```text
//!   Read ──► Blur ──► Merge(back) ──► Write
//!                       ▲
//!   Solid ──────────────┘ (front)
//! ```
//!
//! Mutations that may change a node's output go through the
//! [`InvalidationTracker`], which marks the node and its downstream closure
//! dirty. Every observable change is also queued as a [`GraphEvent`] for the
//! caller to drain with [`GraphModel::take_events`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{GraphError, GraphResult};
use crate::id::{ConnectorId, NodeId};
use crate::image::{GpuImage, ImageHandle};
use crate::invalidation::InvalidationTracker;
use crate::kind::{InputSlot, KindId, NodeKindDescriptor, Readiness};
use crate::property::PropertyValue;
use crate::registry::NodeKindRegistry;

// ============================================================================
// Connection
// ============================================================================

/// Directed edge from a node's output to another node's input.
///
/// Value-equal by all four fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    /// Upstream node.
    pub source: NodeId,
    /// Output index on the source (always 0 for built-in kinds).
    pub output: usize,
    /// Downstream node.
    pub target: NodeId,
    /// Input index on the target (0 = Back, 1 = Front/Alpha).
    pub input: usize,
}

// ============================================================================
// Node
// ============================================================================

/// One processing node.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: KindId,
    custom_name: Option<String>,
    position: (i32, i32),
    properties: Vec<PropertyValue>,
    input_ids: Vec<ConnectorId>,
    inputs: Vec<Option<Connection>>,
    outputs: Vec<Connection>,
    dirty: bool,
    image: Option<ImageHandle>,
    frame: usize,
}

impl Node {
    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Kind id.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Custom display name, if any.
    pub fn custom_name(&self) -> Option<&str> {
        self.custom_name.as_deref()
    }

    /// Position in the editor.
    pub fn position(&self) -> (i32, i32) {
        self.position
    }

    /// Property values in declaration order.
    pub fn properties(&self) -> &[PropertyValue] {
        &self.properties
    }

    /// Property at `index`.
    pub fn property(&self, index: usize) -> Option<&PropertyValue> {
        self.properties.get(index)
    }

    /// Ids of the input connectors, one per declared input.
    pub fn input_connectors(&self) -> &[ConnectorId] {
        &self.input_ids
    }

    /// Connection on input `index`.
    pub fn input(&self, index: usize) -> Option<&Connection> {
        self.inputs.get(index).and_then(Option::as_ref)
    }

    /// Outgoing connections (fan-out).
    pub fn outputs(&self) -> &[Connection] {
        &self.outputs
    }

    /// Whether the cached output is stale or absent.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Cached output image, present only while clean.
    pub fn image(&self) -> Option<&dyn GpuImage> {
        self.image.as_deref()
    }

    /// Current frame of a sequence source.
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Name to show: the custom name, else the kind id.
    pub fn display_name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.kind)
    }

    /// File list stored in property `index`, empty if not a file list.
    pub fn files(&self, index: usize) -> &[String] {
        self.property(index).and_then(PropertyValue::as_files).unwrap_or(&[])
    }

    /// File for the current frame.
    pub fn current_file(&self, index: usize) -> Option<&str> {
        self.files(index).get(self.frame).map(String::as_str)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Observable change to the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// A node was created.
    NodeAdded { node: NodeId, kind: KindId },
    /// A node was deleted.
    NodeRemoved(NodeId),
    /// A connection was committed.
    Connected(Connection),
    /// A connection was removed.
    Disconnected(Connection),
    /// A property value changed.
    PropertyChanged { node: NodeId, index: usize },
    /// A node went from clean to dirty.
    NodeDirty(NodeId),
    /// A node received a freshly evaluated image.
    NodeClean(NodeId),
    /// A node was moved in the editor.
    NodeMoved { node: NodeId, x: i32, y: i32 },
}

// ============================================================================
// GraphModel
// ============================================================================

/// Owner of all nodes and connections.
#[derive(Debug)]
pub struct GraphModel {
    registry: Arc<NodeKindRegistry>,
    nodes: HashMap<NodeId, Node>,
    order: Vec<NodeId>,
    events: Vec<GraphEvent>,
    recycled: Vec<ImageHandle>,
    reject_cycles: bool,
}

impl GraphModel {
    /// Empty graph over `registry`. Cycle-forming connections are rejected.
    pub fn new(registry: Arc<NodeKindRegistry>) -> Self {
        Self {
            registry,
            nodes: HashMap::new(),
            order: Vec::new(),
            events: Vec::new(),
            recycled: Vec::new(),
            reject_cycles: true,
        }
    }

    /// Enables or disables cycle rejection in [`connect`](Self::connect).
    pub fn with_cycle_rejection(mut self, reject: bool) -> Self {
        self.reject_cycles = reject;
        self
    }

    /// Kind registry.
    pub fn registry(&self) -> &Arc<NodeKindRegistry> {
        &self.registry
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns `true` if the node exists.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Node by id.
    pub fn node(&self, id: NodeId) -> GraphResult<&Node> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// All connections, grouped by target in creation order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.nodes().flat_map(|n| n.inputs.iter().flatten())
    }

    /// Descriptor of a node's kind.
    pub fn descriptor_of(&self, id: NodeId) -> GraphResult<&NodeKindDescriptor> {
        let node = self.node(id)?;
        self.registry.describe(&node.kind)
    }

    /// First node whose custom name or kind id equals `name`.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes()
            .find(|n| n.custom_name.as_deref() == Some(name))
            .or_else(|| self.nodes().find(|n| n.kind == name))
            .map(|n| n.id)
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Creates a node of `kind` with default properties. The node starts dirty.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownKind`] if `kind` is not registered.
    pub fn add_node(&mut self, kind: &str, custom_name: Option<&str>) -> GraphResult<NodeId> {
        trace!(kind, ?custom_name, "GraphModel::add_node");
        let id = NodeId::new();
        let desc = self.registry.describe(kind)?;
        let inputs = (0..desc.input_count()).map(|_| ConnectorId::new()).collect();
        let properties = desc.default_properties();
        self.insert_node(id, kind, custom_name.map(String::from), (0, 0), properties, inputs)?;
        Ok(id)
    }

    /// Inserts a node with known ids and values (document load).
    pub(crate) fn insert_node(
        &mut self,
        id: NodeId,
        kind: &str,
        custom_name: Option<String>,
        position: (i32, i32),
        properties: Vec<PropertyValue>,
        input_ids: Vec<ConnectorId>,
    ) -> GraphResult<()> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        let desc = self.registry.describe(kind)?;
        debug_assert_eq!(input_ids.len(), desc.input_count());
        let node = Node {
            id,
            kind: kind.to_string(),
            custom_name,
            position,
            properties,
            inputs: vec![None; input_ids.len()],
            input_ids,
            outputs: Vec::new(),
            dirty: true,
            image: None,
            frame: 0,
        };
        self.nodes.insert(id, node);
        self.order.push(id);
        self.events.push(GraphEvent::NodeAdded { node: id, kind: kind.to_string() });
        debug!(node = %id, kind, "node added");
        Ok(())
    }

    /// Deletes a node and every connection touching it.
    ///
    /// Nodes that were downstream of it become dirty. Unknown ids are a
    /// no-op; returns whether a node was removed.
    pub fn delete_node(&mut self, id: NodeId) -> bool {
        trace!(node = %id, "GraphModel::delete_node");
        let Ok(downstream) = self.downstream_closure(id) else {
            debug!(node = %id, "delete of unknown node ignored");
            return false;
        };

        let (incoming, outgoing) = match self.nodes.get(&id) {
            Some(node) => (
                node.inputs.iter().flatten().copied().collect::<Vec<_>>(),
                node.outputs.clone(),
            ),
            None => return false,
        };
        for conn in incoming.iter().chain(outgoing.iter()) {
            self.unlink(conn);
            self.events.push(GraphEvent::Disconnected(*conn));
        }

        for n in downstream {
            self.invalidate(n);
        }

        if let Some(mut node) = self.nodes.remove(&id) {
            if let Some(image) = node.image.take() {
                self.recycled.push(image);
            }
        }
        self.order.retain(|n| *n != id);
        self.events.push(GraphEvent::NodeRemoved(id));
        debug!(node = %id, "node deleted");
        true
    }

    /// Connects `source`'s output to `target`'s input.
    ///
    /// On success `target` and its downstream closure become dirty.
    ///
    /// # Errors
    ///
    /// - [`GraphError::NodeNotFound`] for an unknown id
    /// - [`GraphError::SlotKindMismatch`] if an index exceeds the kind's arity
    /// - [`GraphError::InputOccupied`] if the input is already connected
    /// - [`GraphError::CycleDetected`] if the edge would close a cycle
    pub fn connect(&mut self, source: NodeId, output: usize, target: NodeId, input: usize) -> GraphResult<()> {
        trace!(%source, output, %target, input, "GraphModel::connect");
        let source_desc = self.descriptor_of(source)?;
        if !source_desc.has_output() || output != 0 {
            return Err(GraphError::SlotKindMismatch {
                node: source,
                kind: source_desc.id.clone(),
                detail: format!("output {output} does not exist"),
            });
        }
        let target_node = self.node(target)?;
        if input >= target_node.inputs.len() {
            return Err(GraphError::SlotKindMismatch {
                node: target,
                kind: target_node.kind.clone(),
                detail: format!("input {input} does not exist ({} declared)", target_node.inputs.len()),
            });
        }
        if target_node.inputs[input].is_some() {
            return Err(GraphError::InputOccupied { node: target, input });
        }
        if self.reject_cycles && (source == target || self.downstream_closure(target)?.contains(&source)) {
            return Err(GraphError::CycleDetected { source_node: source, target });
        }

        let conn = Connection { source, output, target, input };
        if let Some(node) = self.nodes.get_mut(&target) {
            node.inputs[input] = Some(conn);
        }
        if let Some(node) = self.nodes.get_mut(&source) {
            node.outputs.push(conn);
        }
        self.events.push(GraphEvent::Connected(conn));
        debug!(%source, %target, input, "connected");
        InvalidationTracker::mark_dirty_and_propagate(self, target)
    }

    /// Removes the connection on `target`'s input, if any.
    ///
    /// Returns the removed connection. When one was removed, `target` and its
    /// downstream closure become dirty.
    pub fn disconnect(&mut self, target: NodeId, input: usize) -> GraphResult<Option<Connection>> {
        trace!(%target, input, "GraphModel::disconnect");
        let node = self.node(target)?;
        if input >= node.inputs.len() {
            return Err(GraphError::SlotKindMismatch {
                node: target,
                kind: node.kind.clone(),
                detail: format!("input {input} does not exist ({} declared)", node.inputs.len()),
            });
        }
        let Some(conn) = node.inputs[input] else {
            return Ok(None);
        };
        self.unlink(&conn);
        self.events.push(GraphEvent::Disconnected(conn));
        debug!(source = %conn.source, %target, input, "disconnected");
        InvalidationTracker::mark_dirty_and_propagate(self, target)?;
        Ok(Some(conn))
    }

    /// Replaces property `index` of a node.
    ///
    /// The value is validated against the kind's control. Setting an equal
    /// value is a no-op; otherwise the node and its downstream closure
    /// become dirty.
    pub fn set_property(&mut self, id: NodeId, index: usize, value: PropertyValue) -> GraphResult<()> {
        trace!(node = %id, index, %value, "GraphModel::set_property");
        let desc = self.descriptor_of(id)?;
        let spec = desc.properties.get(index).ok_or_else(|| GraphError::InvalidProperty {
            node: id,
            index,
            reason: format!("kind '{}' has {} properties", desc.id, desc.properties.len()),
        })?;
        spec.control
            .validate(&value)
            .map_err(|reason| GraphError::InvalidProperty { node: id, index, reason })?;

        let Some(node) = self.nodes.get_mut(&id) else {
            return Err(GraphError::NodeNotFound(id));
        };
        if node.properties[index] == value {
            return Ok(());
        }
        node.properties[index] = value;
        self.events.push(GraphEvent::PropertyChanged { node: id, index });
        InvalidationTracker::mark_dirty_and_propagate(self, id)
    }

    /// Parses and sets a property from its persisted string form.
    pub fn set_property_str(&mut self, id: NodeId, index: usize, raw: &str) -> GraphResult<()> {
        let desc = self.descriptor_of(id)?;
        let spec = desc.properties.get(index).ok_or_else(|| GraphError::InvalidProperty {
            node: id,
            index,
            reason: format!("kind '{}' has {} properties", desc.id, desc.properties.len()),
        })?;
        let value = spec
            .control
            .decode(raw)
            .map_err(|reason| GraphError::InvalidProperty { node: id, index, reason })?;
        self.set_property(id, index, value)
    }

    /// Switches a sequence source to frame `frame`.
    ///
    /// Always dirties the node and its downstream closure.
    pub fn set_frame(&mut self, id: NodeId, frame: usize) -> GraphResult<()> {
        trace!(node = %id, frame, "GraphModel::set_frame");
        let Some(node) = self.nodes.get_mut(&id) else {
            return Err(GraphError::NodeNotFound(id));
        };
        node.frame = frame;
        InvalidationTracker::mark_dirty_and_propagate(self, id)
    }

    /// Moves a node in the editor. Does not dirty anything.
    pub fn move_node(&mut self, id: NodeId, x: i32, y: i32) -> GraphResult<()> {
        let Some(node) = self.nodes.get_mut(&id) else {
            return Err(GraphError::NodeNotFound(id));
        };
        node.position = (x, y);
        self.events.push(GraphEvent::NodeMoved { node: id, x, y });
        Ok(())
    }

    /// Sets or clears the custom display name.
    pub fn set_custom_name(&mut self, id: NodeId, name: Option<&str>) -> GraphResult<()> {
        let Some(node) = self.nodes.get_mut(&id) else {
            return Err(GraphError::NodeNotFound(id));
        };
        node.custom_name = name.map(String::from);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Structural queries
    // ------------------------------------------------------------------------

    /// Node connected to `slot` of `id`.
    pub fn upstream(&self, id: NodeId, slot: InputSlot) -> GraphResult<Option<NodeId>> {
        Ok(self.node(id)?.input(slot.index()).map(|c| c.source))
    }

    /// Every node strictly downstream of `id`, in depth-first discovery order.
    ///
    /// Fan-out edges are followed in the order they were connected; each node
    /// appears once, at its first discovery.
    pub fn downstream_closure(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        let start = self.node(id)?;
        let mut seen = HashSet::from([id]);
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = start.outputs.iter().rev().map(|c| c.target).collect();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.outputs.iter().rev().map(|c| c.target));
            }
        }
        Ok(out)
    }

    /// Dependency order of `id`: every node reachable backwards over
    /// Back-then-Front edges, upstream first, ending with `id`.
    pub fn upstream_closure(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        self.node(id)?;
        let mut visited = HashSet::from([id]);
        let mut out = Vec::new();
        // (node, next input to visit)
        let mut stack = vec![(id, 0usize)];
        while let Some(top) = stack.len().checked_sub(1) {
            let (current, slot) = stack[top];
            let inputs = self.nodes.get(&current).map(|n| n.inputs.as_slice()).unwrap_or(&[]);
            match inputs.get(slot) {
                Some(entry) => {
                    stack[top].1 += 1;
                    if let Some(conn) = entry {
                        if visited.insert(conn.source) {
                            stack.push((conn.source, 0));
                        }
                    }
                }
                None => {
                    stack.pop();
                    out.push(current);
                }
            }
        }
        Ok(out)
    }

    /// Kind-specific readiness of a single node, ignoring its upstream.
    ///
    /// Required inputs must be connected and file-backed kinds need a file
    /// for the current frame.
    pub fn is_ready(&self, id: NodeId) -> GraphResult<bool> {
        let node = self.node(id)?;
        let desc = self.registry.describe(&node.kind)?;
        for slot in InputSlot::ALL {
            if desc.requires(slot) && node.input(slot.index()).is_none() {
                return Ok(false);
            }
        }
        Ok(match desc.readiness {
            Readiness::ConnectedInputs => true,
            Readiness::NeedsFiles { index } => node.current_file(index).is_some_and(|f| !f.is_empty()),
        })
    }

    /// Whether the node is dirty. Unknown ids count as dirty.
    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_none_or(|n| n.dirty)
    }

    /// Cached image of a node.
    pub fn image(&self, id: NodeId) -> Option<&dyn GpuImage> {
        self.nodes.get(&id).and_then(|n| n.image.as_deref())
    }

    // ------------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------------

    /// Drains queued events.
    pub fn take_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drains images released by invalidation or deletion.
    pub fn take_recycled(&mut self) -> Vec<ImageHandle> {
        std::mem::take(&mut self.recycled)
    }

    // ------------------------------------------------------------------------
    // Internal, used by the invalidation tracker
    // ------------------------------------------------------------------------

    /// Discards the node's image and sets its dirty flag.
    pub(crate) fn invalidate(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            warn!(node = %id, "invalidate on missing node");
            return;
        };
        if let Some(image) = node.image.take() {
            self.recycled.push(image);
        }
        if !node.dirty {
            node.dirty = true;
            self.events.push(GraphEvent::NodeDirty(id));
        }
    }

    /// Stores a fresh image and clears the dirty flag.
    pub(crate) fn store_clean(&mut self, id: NodeId, image: ImageHandle) -> GraphResult<()> {
        let Some(node) = self.nodes.get_mut(&id) else {
            return Err(GraphError::NodeNotFound(id));
        };
        if let Some(old) = node.image.replace(image) {
            self.recycled.push(old);
        }
        node.dirty = false;
        self.events.push(GraphEvent::NodeClean(id));
        Ok(())
    }

    /// Removes a connection from both of its ends without dirtying.
    fn unlink(&mut self, conn: &Connection) {
        if let Some(target) = self.nodes.get_mut(&conn.target) {
            if target.inputs.get(conn.input).copied().flatten() == Some(*conn) {
                target.inputs[conn.input] = None;
            }
        }
        if let Some(source) = self.nodes.get_mut(&conn.source) {
            source.outputs.retain(|c| c != conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> GraphModel {
        GraphModel::new(Arc::new(NodeKindRegistry::builtin()))
    }

    #[test]
    fn test_add_node_defaults() {
        let mut g = graph();
        let id = g.add_node("blur", None).unwrap();
        let node = g.node(id).unwrap();
        assert!(node.is_dirty());
        assert!(node.image().is_none());
        assert_eq!(node.input_connectors().len(), 1);
        assert_eq!(node.properties(), &[PropertyValue::Int(4)]);
        assert!(matches!(g.add_node("glow", None), Err(GraphError::UnknownKind(_))));
    }

    #[test]
    fn test_connect_arity() {
        let mut g = graph();
        let a = g.add_node("solid", None).unwrap();
        let b = g.add_node("blur", None).unwrap();
        let w = g.add_node("write", None).unwrap();
        assert!(matches!(g.connect(a, 0, b, 1), Err(GraphError::SlotKindMismatch { .. })));
        assert!(matches!(g.connect(a, 1, b, 0), Err(GraphError::SlotKindMismatch { .. })));
        assert!(matches!(g.connect(w, 0, b, 0), Err(GraphError::SlotKindMismatch { .. })));
        g.connect(a, 0, b, 0).unwrap();
        assert_eq!(g.upstream(b, InputSlot::Back).unwrap(), Some(a));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut g = graph();
        let a = g.add_node("blur", None).unwrap();
        let b = g.add_node("blur", None).unwrap();
        g.connect(a, 0, b, 0).unwrap();
        assert!(matches!(g.connect(b, 0, a, 0), Err(GraphError::CycleDetected { .. })));
        assert!(matches!(g.connect(a, 0, a, 0), Err(GraphError::CycleDetected { .. })));
    }

    #[test]
    fn test_cycle_allowed_when_disabled() {
        let mut g = graph().with_cycle_rejection(false);
        let a = g.add_node("blur", None).unwrap();
        let b = g.add_node("blur", None).unwrap();
        g.connect(a, 0, b, 0).unwrap();
        g.connect(b, 0, a, 0).unwrap();
        // Traversals still terminate.
        assert_eq!(g.downstream_closure(a).unwrap(), vec![b]);
        assert_eq!(g.upstream_closure(a).unwrap(), vec![b, a]);
    }

    #[test]
    fn test_downstream_discovery_order() {
        let mut g = graph();
        let a = g.add_node("solid", None).unwrap();
        let b = g.add_node("blur", None).unwrap();
        let c = g.add_node("blur", None).unwrap();
        let d = g.add_node("merge", None).unwrap();
        g.connect(a, 0, b, 0).unwrap();
        g.connect(a, 0, c, 0).unwrap();
        g.connect(b, 0, d, 0).unwrap();
        g.connect(c, 0, d, 1).unwrap();
        assert_eq!(g.downstream_closure(a).unwrap(), vec![b, d, c]);
        assert_eq!(g.upstream_closure(d).unwrap(), vec![a, b, c, d]);
    }

    #[test]
    fn test_disconnect_missing_is_noop() {
        let mut g = graph();
        let b = g.add_node("blur", None).unwrap();
        g.take_events();
        assert_eq!(g.disconnect(b, 0).unwrap(), None);
        assert!(g.take_events().is_empty());
        assert!(g.disconnect(b, 3).is_err());
    }

    #[test]
    fn test_set_property_validates() {
        let mut g = graph();
        let b = g.add_node("blur", None).unwrap();
        assert!(matches!(
            g.set_property(b, 0, PropertyValue::Float(1.0)),
            Err(GraphError::InvalidProperty { .. })
        ));
        assert!(g.set_property(b, 5, PropertyValue::Int(1)).is_err());
        g.set_property_str(b, 0, "8").unwrap();
        assert_eq!(g.node(b).unwrap().property(0), Some(&PropertyValue::Int(8)));
    }

    #[test]
    fn test_read_readiness() {
        let mut g = graph();
        let r = g.add_node("read", None).unwrap();
        assert!(!g.is_ready(r).unwrap());
        g.set_property_str(r, 0, "a.png,b.png").unwrap();
        assert!(g.is_ready(r).unwrap());
        g.set_frame(r, 1).unwrap();
        assert_eq!(g.node(r).unwrap().current_file(0), Some("b.png"));
        g.set_frame(r, 2).unwrap();
        assert!(!g.is_ready(r).unwrap());
    }

    #[test]
    fn test_find_by_name() {
        let mut g = graph();
        let a = g.add_node("blur", Some("soft")).unwrap();
        let b = g.add_node("sharpen", None).unwrap();
        assert_eq!(g.find_by_name("soft"), Some(a));
        assert_eq!(g.find_by_name("sharpen"), Some(b));
        assert_eq!(g.find_by_name("nothing"), None);
    }
}
