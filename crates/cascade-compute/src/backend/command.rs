//! Recorded device commands.
//!
//! A [`CommandList`] is built for one node evaluation and handed to
//! [`DeviceContext::submit_and_wait`](super::DeviceContext::submit_and_wait).
//! It borrows every image and buffer it mentions, so nothing it refers to can
//! be dropped or handed to another node before the device has finished.
//!
//! Layout rules enforced at execution time:
//!
//! - a `Transition { from, to }` requires the image to be in `from`,
//!   except that `from == Undefined` accepts any current layout (contents
//!   are discarded)
//! - a `Dispatch` requires `back` and `front` in `ShaderRead` and `output`
//!   in `General`, and `output` must not be one of its inputs
//!
//! A list that fails partway leaves every image it transitions in the layout
//! it had before submission (see [`LayoutSnapshot`]).

use cascade_core::{GpuImage, ImageLayout, ImageSize, ProgramRef};

use super::GpuBuffer;
use crate::shaders::WORKGROUP_SIZE;
use crate::{ComputeError, ComputeResult};

/// One compute dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Dispatch<'a> {
    /// Program to run.
    pub program: &'a ProgramRef,
    /// Image bound as `back_tex`.
    pub back: &'a dyn GpuImage,
    /// Image bound as `front_tex`.
    pub front: &'a dyn GpuImage,
    /// Image bound as `out_tex`.
    pub output: &'a dyn GpuImage,
    /// Settings uniform.
    pub params: &'a dyn GpuBuffer,
    /// Workgroup grid (x, y).
    pub workgroups: [u32; 2],
}

impl Dispatch<'_> {
    /// Workgroup grid covering `size`.
    pub fn grid_for(size: ImageSize) -> [u32; 2] {
        [size.width.div_ceil(WORKGROUP_SIZE), size.height.div_ceil(WORKGROUP_SIZE)]
    }

    /// Checks bindings and layouts against the current image state.
    pub fn validate(&self) -> ComputeResult<()> {
        for input in [self.back, self.front] {
            if input.id() == self.output.id() {
                return Err(ComputeError::Aliasing(input.id()));
            }
            expect_layout(input, ImageLayout::ShaderRead)?;
        }
        expect_layout(self.output, ImageLayout::General)?;

        let size = self.output.size();
        let covered_w = self.workgroups[0] as u64 * WORKGROUP_SIZE as u64;
        let covered_h = self.workgroups[1] as u64 * WORKGROUP_SIZE as u64;
        if covered_w < size.width as u64 || covered_h < size.height as u64 {
            return Err(ComputeError::OperationFailed(format!(
                "workgroup grid {}x{} does not cover {size}",
                self.workgroups[0], self.workgroups[1]
            )));
        }
        Ok(())
    }
}

/// A device command.
#[derive(Debug)]
pub enum Command<'a> {
    /// Copy host floats into a settings buffer.
    UploadParams { buffer: &'a dyn GpuBuffer, data: Vec<f32> },
    /// Change an image's access layout.
    Transition { image: &'a dyn GpuImage, from: ImageLayout, to: ImageLayout },
    /// Run a compute program.
    Dispatch(Dispatch<'a>),
}

/// Ordered commands for one submission.
#[derive(Debug, Default)]
pub struct CommandList<'a> {
    label: String,
    commands: Vec<Command<'a>>,
}

impl<'a> CommandList<'a> {
    /// Empty list with a debug label.
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), commands: Vec::new() }
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Records a settings upload.
    pub fn upload_params(&mut self, buffer: &'a dyn GpuBuffer, data: Vec<f32>) -> &mut Self {
        self.commands.push(Command::UploadParams { buffer, data });
        self
    }

    /// Records a layout transition.
    pub fn transition(&mut self, image: &'a dyn GpuImage, from: ImageLayout, to: ImageLayout) -> &mut Self {
        self.commands.push(Command::Transition { image, from, to });
        self
    }

    /// Records a dispatch.
    pub fn dispatch(&mut self, dispatch: Dispatch<'a>) -> &mut Self {
        self.commands.push(Command::Dispatch(dispatch));
        self
    }

    /// Recorded commands.
    pub fn commands(&self) -> &[Command<'a>] {
        &self.commands
    }

    /// Current layout of every image the list transitions.
    pub fn snapshot_layouts(&self) -> LayoutSnapshot<'a> {
        let mut entries: Vec<(&'a dyn GpuImage, ImageLayout)> = Vec::new();
        for command in &self.commands {
            if let Command::Transition { image, .. } = command {
                if !entries.iter().any(|(seen, _)| seen.id() == image.id()) {
                    entries.push((*image, image.layout()));
                }
            }
        }
        LayoutSnapshot { entries }
    }

    /// Number of dispatches.
    pub fn dispatch_count(&self) -> usize {
        self.commands.iter().filter(|c| matches!(c, Command::Dispatch(_))).count()
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Layouts taken before a submission, put back when it fails.
#[derive(Debug)]
pub struct LayoutSnapshot<'a> {
    entries: Vec<(&'a dyn GpuImage, ImageLayout)>,
}

impl LayoutSnapshot<'_> {
    /// Resets every captured image to its captured layout.
    pub fn restore(self) {
        for (image, layout) in self.entries {
            image.set_layout(layout);
        }
    }
}

/// Applies a transition to the image's tracked layout.
pub fn apply_transition(image: &dyn GpuImage, from: ImageLayout, to: ImageLayout) -> ComputeResult<()> {
    if from != ImageLayout::Undefined {
        expect_layout(image, from)?;
    }
    image.set_layout(to);
    Ok(())
}

fn expect_layout(image: &dyn GpuImage, expected: ImageLayout) -> ComputeResult<()> {
    let actual = image.layout();
    if actual != expected {
        return Err(ComputeError::LayoutViolation { image: image.id(), expected, actual });
    }
    Ok(())
}
