//! Node evaluation on a compute device.
//!
//! [`GpuNodeExecutor::evaluate`] turns one node evaluation into a single
//! command list:
//!
//! ```text
//! upload settings
//! for pass in 0..pass_count:
//!     target: Undefined -> General
//!     dispatch(program_for_pass(pass), src, front, target)
//!     target: General -> ShaderRead
//!     src = target
//! ```
//!
//! Multi-pass kinds ping-pong between the output and one scratch image, with
//! the parity chosen so the last pass always writes the output. The caller
//! submits nothing else; the list is executed and waited on before
//! `evaluate` returns.

use std::path::Path;
use std::sync::Arc;

use cascade_core::{
    EvalPath, GpuImage, ImageHandle, ImageLayout, ImageSize, InputSlot, NodeId, NodeKindDescriptor, ProgramRef,
    PropertyValue,
};
use tracing::{debug, trace};

use crate::backend::{BufferHandle, CommandList, DeviceContext, Dispatch};
use crate::io::ColorSpace;
use crate::pool::ImagePool;
use crate::settings::{SETTINGS_SLOTS, SettingsBlock};
use crate::{ComputeError, ComputeResult};

/// Program that writes its Back input unchanged.
pub const COPY_PROGRAM: ProgramRef = ProgramRef::builtin("copy");

/// Inputs of one compute-node evaluation.
#[derive(Debug, Clone, Copy)]
pub struct NodeEvaluation<'a> {
    /// Node being evaluated, for labels and errors.
    pub node: NodeId,
    /// Kind of the node.
    pub descriptor: &'a NodeKindDescriptor,
    /// Current property values.
    pub properties: &'a [PropertyValue],
    /// Image of the Back upstream, if connected.
    pub back: Option<&'a dyn GpuImage>,
    /// Image of the Front (or Alpha) upstream, if connected.
    pub front: Option<&'a dyn GpuImage>,
    /// Output dimensions.
    pub target_size: ImageSize,
}

/// Evaluates compute nodes on one device.
pub struct GpuNodeExecutor {
    device: Arc<dyn DeviceContext>,
    pool: ImagePool,
    /// 1x1 transparent image bound to unconnected inputs.
    blank: Option<ImageHandle>,
    params: Option<BufferHandle>,
}

impl GpuNodeExecutor {
    /// Executor with an image pool of `pool_budget` bytes.
    pub fn new(device: Arc<dyn DeviceContext>, pool_budget: u64) -> Self {
        Self { device, pool: ImagePool::with_budget(pool_budget), blank: None, params: None }
    }

    pub fn device(&self) -> &Arc<dyn DeviceContext> {
        &self.device
    }

    pub fn pool(&self) -> &ImagePool {
        &self.pool
    }

    /// Returns released images to the pool.
    pub fn recycle(&mut self, images: impl IntoIterator<Item = ImageHandle>) {
        for image in images {
            self.pool.put(image);
        }
    }

    /// Drops pooled images, e.g. after a device failure.
    pub fn clear_pool(&mut self) {
        self.pool.clear();
    }

    /// Decodes a file into a new device image in `ShaderRead`.
    pub fn load(&mut self, path: &Path, color_space: ColorSpace) -> ComputeResult<ImageHandle> {
        let image = self.device.load_image_from_disk(path, color_space)?;
        debug!(path = %path.display(), size = %image.size(), "loaded image");
        Ok(image)
    }

    /// Encodes a device image into a file.
    pub fn save(&self, image: &dyn GpuImage, path: &Path, color_space: ColorSpace) -> ComputeResult<()> {
        self.device.save_image_to_disk(image, path, color_space)
    }

    fn ensure_resources(&mut self) -> ComputeResult<()> {
        if self.blank.is_none() {
            let blank = self.device.allocate_image(ImageSize::new(1, 1))?;
            self.device.upload(blank.as_ref(), &[0.0; 4])?;
            self.blank = Some(blank);
        }
        if self.params.is_none() {
            self.params = Some(self.device.allocate_param_buffer(SETTINGS_SLOTS)?);
        }
        Ok(())
    }

    fn acquire(&mut self, size: ImageSize) -> ComputeResult<ImageHandle> {
        match self.pool.take(size) {
            Some(image) => Ok(image),
            None => self.device.allocate_image(size),
        }
    }

    /// Runs every pass of a compute node and returns its output image, left
    /// in `ShaderRead`.
    pub fn evaluate(&mut self, eval: &NodeEvaluation<'_>) -> ComputeResult<ImageHandle> {
        let descriptor = eval.descriptor;
        if descriptor.eval != EvalPath::Compute {
            return Err(ComputeError::OperationFailed(format!(
                "kind '{}' is not evaluated by compute dispatch",
                descriptor.id
            )));
        }
        for slot in InputSlot::ALL {
            let connected = match slot {
                InputSlot::Back => eval.back.is_some(),
                InputSlot::Front => eval.front.is_some(),
            };
            if descriptor.requires(slot) && !connected {
                return Err(ComputeError::MissingInput(format!("{slot} input of {}", eval.node)));
            }
        }
        self.device.limits().check(eval.target_size)?;
        let settings = SettingsBlock::from_properties(eval.properties)?;

        self.ensure_resources()?;
        let output = self.acquire(eval.target_size)?;
        let scratch = if descriptor.pass_count > 1 {
            Some(self.acquire(eval.target_size)?)
        } else {
            None
        };

        let result = self.record_and_submit(eval, settings, output.as_ref(), scratch.as_deref());

        if let Some(scratch) = scratch {
            self.pool.put(scratch);
        }
        self.finish(output, result)
    }

    /// Copies `source` into a new output image with one dispatch of
    /// [`COPY_PROGRAM`]. Used for nodes that pass their Back input through.
    pub fn passthrough(&mut self, node: NodeId, source: &dyn GpuImage) -> ComputeResult<ImageHandle> {
        self.ensure_resources()?;
        let output = self.acquire(source.size())?;
        let result = self.record_copy(node, source, output.as_ref());
        self.finish(output, result)
    }

    /// Output on success; on a local failure the output goes back to the pool.
    fn finish(&mut self, output: ImageHandle, result: ComputeResult<()>) -> ComputeResult<ImageHandle> {
        match result {
            Ok(()) => Ok(output),
            Err(err) => {
                if !err.is_device_failure() {
                    self.pool.put(output);
                }
                Err(err)
            }
        }
    }

    fn record_copy(&self, node: NodeId, source: &dyn GpuImage, output: &dyn GpuImage) -> ComputeResult<()> {
        let (Some(blank), Some(params)) = (self.blank.as_deref(), self.params.as_deref()) else {
            return Err(ComputeError::OperationFailed("executor resources not initialized".into()));
        };
        let mut list = CommandList::new(format!("passthrough ({node})"));
        if source.layout() != ImageLayout::ShaderRead {
            list.transition(source, source.layout(), ImageLayout::ShaderRead);
        }
        let copy_program = COPY_PROGRAM;
        list.transition(output, ImageLayout::Undefined, ImageLayout::General)
            .dispatch(Dispatch {
                program: &copy_program,
                back: source,
                front: blank,
                output,
                params,
                workgroups: Dispatch::grid_for(source.size()),
            })
            .transition(output, ImageLayout::General, ImageLayout::ShaderRead);

        trace!(%node, size = %source.size(), "submitting passthrough");
        self.device.submit_and_wait(list)
    }

    fn record_and_submit(
        &self,
        eval: &NodeEvaluation<'_>,
        settings: SettingsBlock,
        output: &dyn GpuImage,
        scratch: Option<&dyn GpuImage>,
    ) -> ComputeResult<()> {
        let descriptor = eval.descriptor;
        let (Some(blank), Some(params)) = (self.blank.as_deref(), self.params.as_deref()) else {
            return Err(ComputeError::OperationFailed("executor resources not initialized".into()));
        };

        let back = eval.back.unwrap_or(blank);
        let front = eval.front.unwrap_or(blank);
        let passes = descriptor.pass_count;
        let grid = Dispatch::grid_for(eval.target_size);

        let mut list = CommandList::new(format!("{} ({})", descriptor.id, eval.node));
        list.upload_params(params, settings.into_vec());
        if back.layout() != ImageLayout::ShaderRead {
            list.transition(back, back.layout(), ImageLayout::ShaderRead);
        }
        // Back and Front may be fed by the same upstream.
        if front.id() != back.id() && front.layout() != ImageLayout::ShaderRead {
            list.transition(front, front.layout(), ImageLayout::ShaderRead);
        }

        let mut src = back;
        for pass in 0..passes {
            let program = descriptor
                .program_for_pass(pass)
                .ok_or_else(|| ComputeError::UnknownProgram(format!("{} pass {pass}", descriptor.id)))?;
            // The last pass always lands in `output`.
            let target = match scratch {
                Some(scratch) if (passes - 1 - pass) % 2 == 1 => scratch,
                _ => output,
            };
            list.transition(target, ImageLayout::Undefined, ImageLayout::General)
                .dispatch(Dispatch { program, back: src, front, output: target, params, workgroups: grid })
                .transition(target, ImageLayout::General, ImageLayout::ShaderRead);
            src = target;
        }

        trace!(node = %eval.node, kind = %descriptor.id, passes, size = %eval.target_size, "submitting node");
        self.device.submit_and_wait(list)
    }
}
