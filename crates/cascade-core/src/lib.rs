//! # cascade-core
//!
//! Node graph model for the cascade compositor.
//!
//! - [`NodeKindRegistry`] - read-only catalogue of node kinds
//! - [`GraphModel`] - nodes, connections and structural queries
//! - [`InvalidationTracker`] - dirty flags and cached-image lifetime
//! - [`GraphDescription`] - the persisted document shape
//!
//! This crate knows nothing about devices. Cached outputs are opaque
//! [`ImageHandle`]s produced by whatever backend `cascade-compute` provides.
//!
//! ```text
//! cascade-core (this crate)
//!    ^
//!    +-- cascade-compute (devices, executor)
//!    +-- cascade-engine  (scheduler, export)
//!    +-- cascade-cli
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cascade_core::{GraphModel, NodeKindRegistry, InputSlot};
//!
//! let mut graph = GraphModel::new(Arc::new(NodeKindRegistry::builtin()));
//! let solid = graph.add_node("solid", None).unwrap();
//! let blur = graph.add_node("blur", None).unwrap();
//! graph.connect(solid, 0, blur, InputSlot::Back.index()).unwrap();
//! assert_eq!(graph.upstream_closure(blur).unwrap(), vec![solid, blur]);
//! ```

pub mod builtin;
pub mod document;
pub mod error;
pub mod graph;
pub mod id;
pub mod image;
pub mod invalidation;
pub mod kind;
pub mod property;
pub mod registry;

pub use document::{ConnectionEntry, GraphDescription, GraphSection, NodeEntry, FORMAT_VERSION};
pub use error::{GraphError, GraphResult};
pub use graph::{Connection, GraphEvent, GraphModel, Node};
pub use id::{ConnectorId, NodeId};
pub use image::{AsAny, GpuImage, ImageHandle, ImageId, ImageLayout, ImageSize, LayoutCell};
pub use invalidation::InvalidationTracker;
pub use kind::{
    Category, ClearingTrait, EvalPath, InputSlot, InputSpec, KindId, NodeKindDescriptor, OutputSlot,
    OutputTrait, ProgramRef, Readiness, SizeRule, SlotKind,
};
pub use property::{flatten_settings, slot_offset, Control, PropertySpec, PropertyValue};
pub use registry::{NodeKindRegistry, RegistryBuilder};
