//! The engine facade: one graph, one device, one event queue.
//!
//! Every call the UI makes goes through [`Engine`]. Each call runs to
//! completion on the calling thread, and what it changed is queued as
//! [`EngineEvent`]s for the caller to drain with [`Engine::take_events`].
//!
//! ```ignore
//! let mut engine = Engine::new(EngineConfig::default())?;
//! let solid = engine.add_node("solid", None)?;
//! let blur = engine.add_node("blur", None)?;
//! engine.connect(solid, blur, 0)?;
//! engine.request_display(blur)?;
//! for event in engine.take_events() { /* update widgets */ }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cascade_compute::{ColorSpace, DeviceContext, GpuNodeExecutor, ShaderCatalog, create_device};
use cascade_core::builtin::{self, read_props, write_props};
use cascade_core::{
    Connection, GpuImage, GraphEvent, GraphModel, ImageId, ImageSize, NodeId, NodeKindRegistry, PropertyValue,
    SizeRule,
};
use tracing::{info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{EvalError, EvalResult};
use crate::export::{self, CancelToken, ExportReport, ExportRequest};
use crate::scheduler::{EvaluationScheduler, Rendered};

/// Change reported to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A node's cached image was discarded.
    NodeDirty(NodeId),
    /// A node received a freshly evaluated image.
    NodeClean(NodeId),
    /// The requested node's image is ready to show.
    DisplayReady { requested: NodeId, node: NodeId, image: ImageId, size: ImageSize },
    /// The requested node cannot be rendered; the viewer shows nothing.
    DisplayCleared(NodeId),
    /// Evaluation failed. `fatal` means the device must be recreated.
    EvaluationFailed { node: NodeId, reason: String, fatal: bool },
    /// One export frame was written.
    FrameExported { node: NodeId, frame: usize, path: PathBuf },
    /// Any other graph change (nodes, connections, properties, moves).
    Graph(GraphEvent),
}

impl From<GraphEvent> for EngineEvent {
    fn from(event: GraphEvent) -> Self {
        match event {
            GraphEvent::NodeDirty(id) => Self::NodeDirty(id),
            GraphEvent::NodeClean(id) => Self::NodeClean(id),
            other => Self::Graph(other),
        }
    }
}

/// Graph, scheduler and event queue behind the UI-facing calls.
pub struct Engine {
    config: EngineConfig,
    graph: GraphModel,
    scheduler: EvaluationScheduler,
    events: Vec<EngineEvent>,
    displayed: Option<NodeId>,
}

impl Engine {
    /// Engine with the built-in kinds on the device chosen by `config.backend`.
    pub fn new(config: EngineConfig) -> EvalResult<Self> {
        let device = create_device(config.backend, Arc::new(ShaderCatalog::builtin()))
            .map_err(EvalError::DeviceUnavailable)?;
        Ok(Self::with_device(config, Arc::new(NodeKindRegistry::builtin()), device))
    }

    /// Engine over an existing registry and device.
    pub fn with_device(
        config: EngineConfig,
        registry: Arc<NodeKindRegistry>,
        device: Arc<dyn DeviceContext>,
    ) -> Self {
        let executor = GpuNodeExecutor::new(device, config.pool_budget_bytes());
        let scheduler = EvaluationScheduler::new(executor, config.default_size);
        let graph = GraphModel::new(registry).with_cycle_rejection(config.reject_cycles);
        info!(backend = %scheduler.device().backend(), device = scheduler.device().name(), "engine ready");
        Self { config, graph, scheduler, events: Vec::new(), displayed: None }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    pub fn scheduler(&self) -> &EvaluationScheduler {
        &self.scheduler
    }

    pub fn device(&self) -> &Arc<dyn DeviceContext> {
        self.scheduler.device()
    }

    /// Node last requested for display.
    pub fn displayed(&self) -> Option<NodeId> {
        self.displayed
    }

    /// Cached image of a node.
    pub fn image(&self, id: NodeId) -> Option<&dyn GpuImage> {
        self.graph.image(id)
    }

    /// Drains queued events, oldest first.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        self.pump();
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// Replaces the graph with a parsed JSON document. Every node starts dirty.
    pub fn load_json(&mut self, json: &str) -> EvalResult<()> {
        let graph = GraphModel::from_json(self.graph.registry().clone(), json, self.config.reject_cycles)?;
        self.graph = graph;
        self.scheduler.executor_mut().clear_pool();
        self.displayed = None;
        info!(nodes = self.graph.len(), "document loaded");
        Ok(())
    }

    /// Serializes the graph to JSON.
    pub fn to_json(&self) -> EvalResult<String> {
        Ok(self.graph.to_json()?)
    }

    // ------------------------------------------------------------------------
    // Graph edits
    // ------------------------------------------------------------------------

    /// Creates a node.
    ///
    /// Read and Write nodes start with the configured color spaces and
    /// generators with the configured default size.
    pub fn add_node(&mut self, kind: &str, custom_name: Option<&str>) -> EvalResult<NodeId> {
        let id = self.graph.add_node(kind, custom_name).inspect_err(|err| warn!("add_node: {err}"))?;
        self.apply_presets(id)?;
        self.pump();
        Ok(id)
    }

    /// Deletes a node. Unknown ids are a no-op.
    pub fn delete_node(&mut self, id: NodeId) -> bool {
        let removed = self.graph.delete_node(id);
        self.scheduler.reclaim(&mut self.graph);
        self.pump();
        if removed && self.displayed == Some(id) {
            self.displayed = None;
            self.events.push(EngineEvent::DisplayCleared(id));
        }
        removed
    }

    /// Connects `source`'s output to input `input` of `target`.
    pub fn connect(&mut self, source: NodeId, target: NodeId, input: usize) -> EvalResult<()> {
        let result = self.graph.connect(source, 0, target, input);
        self.pump();
        result.inspect_err(|err| warn!("connect: {err}")).map_err(EvalError::from)
    }

    /// Disconnects input `input` of `target`.
    pub fn disconnect(&mut self, target: NodeId, input: usize) -> EvalResult<Option<Connection>> {
        let result = self.graph.disconnect(target, input);
        self.pump();
        result.inspect_err(|err| warn!("disconnect: {err}")).map_err(EvalError::from)
    }

    /// Sets a property value.
    pub fn set_property(&mut self, id: NodeId, index: usize, value: PropertyValue) -> EvalResult<()> {
        let result = self.graph.set_property(id, index, value);
        self.pump();
        result.inspect_err(|err| warn!("set_property: {err}")).map_err(EvalError::from)
    }

    /// Sets a property from its persisted string form.
    pub fn set_property_str(&mut self, id: NodeId, index: usize, raw: &str) -> EvalResult<()> {
        let result = self.graph.set_property_str(id, index, raw);
        self.pump();
        result.inspect_err(|err| warn!("set_property_str: {err}")).map_err(EvalError::from)
    }

    /// Switches a Read node to `frame`.
    pub fn set_frame(&mut self, id: NodeId, frame: usize) -> EvalResult<()> {
        let result = self.graph.set_frame(id, frame);
        self.pump();
        result.map_err(EvalError::from)
    }

    /// Moves a node in the editor.
    pub fn move_node(&mut self, id: NodeId, x: i32, y: i32) -> EvalResult<()> {
        let result = self.graph.move_node(id, x, y);
        self.pump();
        result.map_err(EvalError::from)
    }

    /// Renames a node.
    pub fn set_custom_name(&mut self, id: NodeId, name: Option<&str>) -> EvalResult<()> {
        Ok(self.graph.set_custom_name(id, name)?)
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Brings a node's displayed image up to date without touching the display.
    pub fn evaluate(&mut self, id: NodeId) -> EvalResult<Rendered> {
        let result = self.scheduler.evaluate(&mut self.graph, id);
        self.pump();
        result
    }

    /// Evaluates `id` and makes it the displayed node.
    ///
    /// Queues `DisplayReady` on success, `DisplayCleared` when the node is
    /// not renderable and `EvaluationFailed` otherwise.
    pub fn request_display(&mut self, id: NodeId) -> EvalResult<Rendered> {
        trace!(node = %id, "Engine::request_display");
        self.displayed = Some(id);
        let result = self.scheduler.evaluate(&mut self.graph, id);
        self.pump();
        match &result {
            Ok(r) => self.events.push(EngineEvent::DisplayReady {
                requested: r.requested,
                node: r.node,
                image: r.image,
                size: r.size,
            }),
            Err(EvalError::NotRenderable(_)) => self.events.push(EngineEvent::DisplayCleared(id)),
            Err(err) => self.events.push(EngineEvent::EvaluationFailed {
                node: id,
                reason: err.to_string(),
                fatal: err.is_fatal(),
            }),
        }
        result
    }

    /// Re-displays the displayed node if anything it shows went dirty.
    pub fn refresh_display(&mut self) -> Option<EvalResult<Rendered>> {
        let id = self.displayed?;
        let target = EvaluationScheduler::effective_target(&self.graph, id).ok();
        let stale = target.is_none_or(|t| self.graph.is_dirty(t));
        stale.then(|| self.request_display(id))
    }

    /// Evaluates `id` at the current frames and writes what it displays.
    ///
    /// Uses the configured write color space unless one is given.
    pub fn render_to(&mut self, id: NodeId, path: &Path, color_space: Option<ColorSpace>) -> EvalResult<Rendered> {
        let rendered = self.evaluate(id)?;
        let color_space = color_space.unwrap_or(self.config.write_color_space);
        self.scheduler.save(&self.graph, rendered.node, path, color_space)?;
        info!(node = %id, path = %path.display(), size = %rendered.size, "rendered");
        Ok(rendered)
    }

    /// Saves a node's image to disk, for one frame or a sequence.
    ///
    /// Frames already written stay on disk when the export is cancelled or
    /// fails.
    pub fn export(&mut self, request: &ExportRequest, cancel: &CancelToken) -> EvalResult<ExportReport> {
        trace!(node = %request.node, "Engine::export");
        let mut written = Vec::new();
        let result = export::export(
            &mut self.scheduler,
            &mut self.graph,
            request,
            self.config.write_color_space,
            cancel,
            |frame| written.push(frame.clone()),
        );
        self.pump();
        for frame in written {
            self.events.push(EngineEvent::FrameExported { node: request.node, frame: frame.frame, path: frame.path });
        }
        if let Err(err) = &result {
            self.events.push(EngineEvent::EvaluationFailed {
                node: request.node,
                reason: err.to_string(),
                fatal: err.is_fatal(),
            });
        }
        result
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn pump(&mut self) {
        self.events.extend(self.graph.take_events().into_iter().map(EngineEvent::from));
    }

    fn apply_presets(&mut self, id: NodeId) -> EvalResult<()> {
        let desc = self.graph.descriptor_of(id)?;
        let mut presets = Vec::new();
        if desc.id == builtin::READ {
            presets.push((read_props::COLORSPACE, PropertyValue::Choice(color_space_choice(self.config.read_color_space))));
        } else if desc.id == builtin::WRITE {
            presets.push((write_props::COLORSPACE, PropertyValue::Choice(color_space_choice(self.config.write_color_space))));
        }
        if let SizeRule::BackOrProperty { index } = desc.size_rule {
            let size = self.config.default_size;
            presets.push((index, PropertyValue::Size([size.width, size.height])));
        }
        for (index, value) in presets {
            if let Err(err) = self.graph.set_property(id, index, value) {
                warn!(node = %id, index, "preset not applied: {err}");
            }
        }
        Ok(())
    }
}

/// Choice index of a color space in the Read/Write `colorspace` control.
fn color_space_choice(color_space: ColorSpace) -> usize {
    match color_space {
        ColorSpace::Linear => 0,
        ColorSpace::Srgb => 1,
    }
}
