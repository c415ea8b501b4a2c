//! Error types for graph operations.
//!
//! Every failure that a caller can cause against the graph's invariants is
//! a [`GraphError`]. These are structural errors: they are recoverable where
//! they are detected, logged, and reported to the UI layer as a no-op with a
//! warning. Nothing in this crate panics on a bad id or a bad connection.
//!
//! # Categories
//!
//! - **Lookup errors**: [`NodeNotFound`](GraphError::NodeNotFound), [`UnknownKind`](GraphError::UnknownKind)
//! - **Connection errors**: [`InputOccupied`](GraphError::InputOccupied),
//!   [`SlotKindMismatch`](GraphError::SlotKindMismatch), [`CycleDetected`](GraphError::CycleDetected)
//! - **Property errors**: [`InvalidProperty`](GraphError::InvalidProperty)
//! - **Catalogue errors**: [`DuplicateKind`](GraphError::DuplicateKind),
//!   [`InvalidDescriptor`](GraphError::InvalidDescriptor)
//! - **Document errors**: [`Document`](GraphError::Document), [`DuplicateNode`](GraphError::DuplicateNode)

use thiserror::Error;

use crate::id::NodeId;

/// Result type alias using [`GraphError`] as the error type.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Errors raised by the node graph, the kind registry and the document codec.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    /// No node with this id exists in the graph.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// The kind id is not registered.
    #[error("unknown node kind '{0}'")]
    UnknownKind(String),

    /// A kind with this id is already registered.
    #[error("node kind '{0}' is already registered")]
    DuplicateKind(String),

    /// A descriptor violates the catalogue's invariants.
    #[error("invalid descriptor for kind '{kind}': {reason}")]
    InvalidDescriptor {
        /// Offending kind id
        kind: String,
        /// What is wrong with it
        reason: String,
    },

    /// The target input already holds a connection.
    ///
    /// Inputs are single-assignment; the existing connection has to be
    /// removed with `disconnect` first.
    #[error("input {input} of node {node} is already connected")]
    InputOccupied {
        /// Target node
        node: NodeId,
        /// Input index on the target
        input: usize,
    },

    /// An output or input index exceeds the kind's declared arity.
    #[error("slot mismatch on node {node} ({kind}): {detail}")]
    SlotKindMismatch {
        /// Node whose slot was addressed
        node: NodeId,
        /// Kind of that node
        kind: String,
        /// Which index was out of range
        detail: String,
    },

    /// The connection would close a cycle.
    #[error("connecting {source_node} -> {target} would create a cycle")]
    CycleDetected {
        /// Upstream end of the rejected connection
        source_node: NodeId,
        /// Downstream end of the rejected connection
        target: NodeId,
    },

    /// A property index or value does not fit the kind's control schema.
    #[error("invalid property {index} on node {node}: {reason}")]
    InvalidProperty {
        /// Node the property belongs to
        node: NodeId,
        /// Positional property index
        index: usize,
        /// Why the value was rejected
        reason: String,
    },

    /// A node id occurs twice in a loaded document.
    #[error("duplicate node id {0} in document")]
    DuplicateNode(NodeId),

    /// A persisted graph description could not be interpreted.
    #[error("document error: {0}")]
    Document(String),
}

impl GraphError {
    /// Returns `true` for errors caused by a connection gesture.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::InputOccupied { .. } | Self::SlotKindMismatch { .. } | Self::CycleDetected { .. }
        )
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Document(err.to_string())
    }
}
