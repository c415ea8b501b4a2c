//! Pull-based evaluation of the node graph.
//!
//! Requesting a node first resolves the node whose image is actually shown
//! (the effective target), then walks its upstream closure and evaluates
//! every dirty node in dependency order:
//!
//! ```text
//! request(N)
//!   -> effective target T   (sinks and unmerged merges show their Back upstream)
//!   -> every node in upstream_closure(T) ready?    else NotRenderable
//!   -> for n in upstream_closure(T) where n dirty:
//!          Read    -> decode file into a device image
//!          Compute -> GpuNodeExecutor::evaluate(back, front, target size)
//!          unmerged merge -> copy of its Back image
//!          mark_clean(n, image)
//!   -> cached image of T
//! ```
//!
//! Clean nodes keep their cached image and are skipped, so a node runs at
//! most once per dirty state. A device failure aborts the pass; nodes that
//! were already evaluated stay clean.

use std::path::Path;
use std::sync::Arc;

use cascade_compute::{ColorSpace, DeviceContext, GpuNodeExecutor, NodeEvaluation};
use cascade_core::builtin::read_props;
use cascade_core::{
    EvalPath, GpuImage, GraphModel, ImageHandle, ImageId, ImageSize, InputSlot, InvalidationTracker, Node, NodeId,
    NodeKindDescriptor, OutputTrait, PropertyValue, Readiness, SizeRule,
};
use tracing::{debug, error, info, trace, warn};

use crate::error::{EvalError, EvalResult};

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendered {
    /// Node that was requested.
    pub requested: NodeId,
    /// Node whose cached image is shown.
    pub node: NodeId,
    /// Identity of that image.
    pub image: ImageId,
    /// Its dimensions.
    pub size: ImageSize,
    /// Nodes evaluated by this pass (0 when everything was cached).
    pub evaluated: usize,
}

/// Evaluates dirty nodes on one executor.
pub struct EvaluationScheduler {
    executor: GpuNodeExecutor,
    default_size: ImageSize,
}

impl EvaluationScheduler {
    /// Scheduler over `executor`. Generators with no Back input and no size
    /// property fall back to `default_size`.
    pub fn new(executor: GpuNodeExecutor, default_size: ImageSize) -> Self {
        Self { executor, default_size }
    }

    pub fn executor(&self) -> &GpuNodeExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut GpuNodeExecutor {
        &mut self.executor
    }

    pub fn device(&self) -> &Arc<dyn DeviceContext> {
        self.executor.device()
    }

    pub fn default_size(&self) -> ImageSize {
        self.default_size
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Node whose image is displayed when `id` is requested.
    ///
    /// Sinks and kinds without an output show their Back upstream. Kinds
    /// with [`OutputTrait::RenderUpstreamIfFrontDisconnected`] do the same
    /// while their Front input is unconnected. The substitution repeats
    /// until a node shows itself.
    pub fn effective_target(graph: &GraphModel, id: NodeId) -> EvalResult<NodeId> {
        let mut current = id;
        for _ in 0..=graph.len() {
            let node = graph.node(current)?;
            let desc = graph.descriptor_of(current)?;
            let passthrough = desc.eval == EvalPath::Sink || !desc.has_output() || front_disconnected(desc, node);
            if !passthrough {
                return Ok(current);
            }
            match node.input(InputSlot::Back.index()) {
                Some(conn) => {
                    trace!(from = %current, to = %conn.source, "display substitutes Back upstream");
                    current = conn.source;
                }
                None => return Err(EvalError::NotRenderable(id)),
            }
        }
        Err(EvalError::NotRenderable(id))
    }

    /// Whether `id` can be rendered: its effective target and every node
    /// that target depends on are ready.
    pub fn can_be_rendered(graph: &GraphModel, id: NodeId) -> EvalResult<bool> {
        let target = match Self::effective_target(graph, id) {
            Ok(target) => target,
            Err(EvalError::NotRenderable(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        for n in graph.upstream_closure(target)? {
            if !graph.is_ready(n)? {
                debug!(requested = %id, blocking = %n, "node not ready");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Output size of a compute node given its current inputs.
    pub fn target_size(&self, graph: &GraphModel, id: NodeId) -> EvalResult<ImageSize> {
        let node = graph.node(id)?;
        let desc = graph.descriptor_of(id)?;
        let back = input_image(graph, node, InputSlot::Back).map(|image| image.size());
        let size_property =
            |index: usize| node.property(index).and_then(PropertyValue::as_size).map(|[w, h]| ImageSize::new(w, h));

        let size = match desc.size_rule {
            SizeRule::SameAsBack => back.unwrap_or(self.default_size),
            SizeRule::FromSource => node.image().map(|image| image.size()).unwrap_or(self.default_size),
            SizeRule::CropMargins { first } => {
                let base = back.unwrap_or(self.default_size);
                let margin = |i: usize| {
                    node.property(first + i).and_then(PropertyValue::as_i32).unwrap_or(0).max(0) as u32
                };
                ImageSize::new(
                    base.width.saturating_sub(margin(0).saturating_add(margin(2))).max(1),
                    base.height.saturating_sub(margin(1).saturating_add(margin(3))).max(1),
                )
            }
            SizeRule::FromProperty { index } => size_property(index).unwrap_or(self.default_size),
            SizeRule::BackOrProperty { index } => back.or_else(|| size_property(index)).unwrap_or(self.default_size),
        };
        Ok(size)
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Brings `target`'s displayed image up to date and describes it.
    ///
    /// # Errors
    ///
    /// - [`EvalError::NotRenderable`] when the node or its dependencies are
    ///   not ready; the caller clears its viewer
    /// - [`EvalError::DeviceFailure`] when the device is lost or out of
    ///   memory; nodes evaluated before the failure stay clean
    /// - [`EvalError::Io`], [`EvalError::Gpu`] for failures local to one node
    pub fn evaluate(&mut self, graph: &mut GraphModel, target: NodeId) -> EvalResult<Rendered> {
        trace!(node = %target, "EvaluationScheduler::evaluate");
        self.reclaim(graph);

        let effective = match Self::effective_target(graph, target) {
            Ok(node) => node,
            Err(EvalError::NotRenderable(_)) => {
                debug!(node = %target, "nothing to display");
                return Err(EvalError::NotRenderable(target));
            }
            Err(err) => return Err(err),
        };

        let chain = graph.upstream_closure(effective)?;
        for &n in &chain {
            if !graph.is_ready(n)? {
                debug!(requested = %target, blocking = %n, "node not ready");
                return Err(EvalError::NotRenderable(target));
            }
        }

        let dirty: Vec<NodeId> =
            chain.into_iter().filter(|&n| graph.is_dirty(n) || graph.image(n).is_none()).collect();
        let mut evaluated = 0;
        for n in dirty {
            match self.evaluate_node(graph, n) {
                Ok(image) => {
                    InvalidationTracker::mark_clean(graph, n, image)?;
                    evaluated += 1;
                    self.reclaim(graph);
                }
                Err(err) if err.is_fatal() => {
                    error!(node = %n, evaluated, "device failure, evaluation aborted: {err}");
                    self.executor.clear_pool();
                    return Err(err);
                }
                Err(err) => {
                    warn!(node = %n, "evaluation failed: {err}");
                    return Err(err);
                }
            }
        }

        let image = graph.image(effective).ok_or(EvalError::NotRenderable(target))?;
        let rendered = Rendered { requested: target, node: effective, image: image.id(), size: image.size(), evaluated };
        if evaluated > 0 {
            info!(node = %target, shown = %effective, evaluated, size = %rendered.size, "evaluation pass complete");
        }
        Ok(rendered)
    }

    /// Encodes the cached image of `id` into `path`.
    pub fn save(&self, graph: &GraphModel, id: NodeId, path: &Path, color_space: ColorSpace) -> EvalResult<()> {
        let image = graph.image(id).ok_or(EvalError::NotRenderable(id))?;
        self.executor.save(image, path, color_space).map_err(|err| EvalError::from_compute(id, err))?;
        debug!(node = %id, path = %path.display(), "image saved");
        Ok(())
    }

    /// Hands images released by the graph to the executor's pool.
    pub fn reclaim(&mut self, graph: &mut GraphModel) {
        let released = graph.take_recycled();
        if !released.is_empty() {
            trace!(count = released.len(), "reclaiming released images");
            self.executor.recycle(released);
        }
    }

    fn evaluate_node(&mut self, graph: &GraphModel, id: NodeId) -> EvalResult<ImageHandle> {
        let node = graph.node(id)?;
        let desc = graph.descriptor_of(id)?;
        match desc.eval {
            EvalPath::LoadImage => {
                let files = match desc.readiness {
                    Readiness::NeedsFiles { index } => index,
                    Readiness::ConnectedInputs => read_props::FILES,
                };
                let path = node.current_file(files).filter(|p| !p.is_empty()).ok_or(EvalError::NotRenderable(id))?;
                let color_space = node
                    .property(read_props::COLORSPACE)
                    .and_then(PropertyValue::as_choice)
                    .map(ColorSpace::from_choice)
                    .unwrap_or_default();
                debug!(node = %id, path, frame = node.frame(), %color_space, "loading source");
                self.executor.load(Path::new(path), color_space).map_err(|err| EvalError::from_compute(id, err))
            }
            EvalPath::Compute if front_disconnected(desc, node) => {
                let back = input_image(graph, node, InputSlot::Back).ok_or_else(|| EvalError::MissingInput {
                    node: id,
                    detail: format!("back input of {id}"),
                })?;
                debug!(node = %id, kind = %desc.id, "front disconnected, passing back through");
                self.executor.passthrough(id, back).map_err(|err| EvalError::from_compute(id, err))
            }
            EvalPath::Compute => {
                let target_size = self.target_size(graph, id)?;
                debug!(node = %id, kind = %desc.id, size = %target_size, "evaluating node");
                let eval = NodeEvaluation {
                    node: id,
                    descriptor: desc,
                    properties: node.properties(),
                    back: input_image(graph, node, InputSlot::Back),
                    front: input_image(graph, node, InputSlot::Front),
                    target_size,
                };
                self.executor.evaluate(&eval).map_err(|err| EvalError::from_compute(id, err))
            }
            EvalPath::Sink => Err(EvalError::NotRenderable(id)),
        }
    }
}

/// Kinds that show their Back upstream while Front is unconnected, and
/// hand it downstream unchanged.
fn front_disconnected(desc: &NodeKindDescriptor, node: &Node) -> bool {
    desc.output_trait == OutputTrait::RenderUpstreamIfFrontDisconnected
        && node.input(InputSlot::Front.index()).is_none()
}

/// Cached image of the node feeding `slot`.
fn input_image<'g>(graph: &'g GraphModel, node: &Node, slot: InputSlot) -> Option<&'g dyn GpuImage> {
    node.input(slot.index()).and_then(|conn| graph.image(conn.source))
}
