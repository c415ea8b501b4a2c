//! Cache invalidation.
//!
//! Each node holds a dirty flag and, while clean, its cached output image.
//! When a node's output may have changed, the node and every node in its
//! downstream closure lose their images and become dirty, walking the
//! closure nearest first. The scheduler is the only caller of
//! [`InvalidationTracker::mark_clean`], right after evaluating a node.
//!
//! Discarded images are not dropped on the spot: they go to the graph's
//! recycle queue so the executor can reuse the device memory.

use tracing::trace;

use crate::error::GraphResult;
use crate::graph::GraphModel;
use crate::id::NodeId;
use crate::image::ImageHandle;

/// Dirty-flag and cached-image bookkeeping over a [`GraphModel`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidationTracker;

impl InvalidationTracker {
    /// Marks `id` and its downstream closure dirty, discarding their images.
    ///
    /// Idempotent: repeating the call changes nothing and emits no events.
    pub fn mark_dirty_and_propagate(graph: &mut GraphModel, id: NodeId) -> GraphResult<()> {
        trace!(node = %id, "InvalidationTracker::mark_dirty_and_propagate");
        let closure = graph.downstream_closure(id)?;
        graph.invalidate(id);
        for n in closure {
            graph.invalidate(n);
        }
        Ok(())
    }

    /// Stores `image` as the node's cached output and clears its dirty flag.
    pub fn mark_clean(graph: &mut GraphModel, id: NodeId, image: ImageHandle) -> GraphResult<()> {
        trace!(node = %id, image = %image.id(), "InvalidationTracker::mark_clean");
        graph.store_clean(id, image)
    }
}
