//! CPU device using rayon for parallelization.
//!
//! Executes the same command lists as the GPU device, including layout
//! validation, so tests run the full evaluation path without an adapter.

use std::collections::HashMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cascade_core::{AsAny, GpuImage, ImageHandle, ImageId, ImageLayout, ImageSize, LayoutCell};
use tracing::trace;

use super::command::{Command, CommandList, Dispatch, apply_transition};
use super::kernels::{self, CpuKernel, PixelContext, View};
use super::{Backend, BufferHandle, DeviceContext, DeviceLimits, DeviceStats, GpuBuffer, StatCounters};
use crate::{ComputeError, ComputeResult};

/// CPU image - data stored in RAM.
pub struct CpuImage {
    id: ImageId,
    size: ImageSize,
    layout: LayoutCell,
    data: RwLock<Vec<f32>>,
}

impl CpuImage {
    fn new(size: ImageSize) -> Self {
        Self {
            id: ImageId::next(),
            size,
            layout: LayoutCell::default(),
            data: RwLock::new(vec![0.0; size.pixel_count() * 4]),
        }
    }

    fn read(&self) -> ComputeResult<RwLockReadGuard<'_, Vec<f32>>> {
        self.data.read().map_err(|_| ComputeError::OperationFailed(format!("{} lock poisoned", self.id)))
    }

    fn write(&self) -> ComputeResult<RwLockWriteGuard<'_, Vec<f32>>> {
        self.data.write().map_err(|_| ComputeError::OperationFailed(format!("{} lock poisoned", self.id)))
    }
}

impl fmt::Debug for CpuImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuImage")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("layout", &self.layout.get())
            .finish()
    }
}

impl AsAny for CpuImage {
    fn as_any(&self) -> &dyn std::any::Any { self }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
}

impl GpuImage for CpuImage {
    fn id(&self) -> ImageId {
        self.id
    }

    fn size(&self) -> ImageSize {
        self.size
    }

    fn layout(&self) -> ImageLayout {
        self.layout.get()
    }

    fn set_layout(&self, layout: ImageLayout) {
        self.layout.set(layout);
    }
}

/// CPU settings buffer.
#[derive(Debug)]
pub struct CpuBuffer {
    data: RwLock<Vec<f32>>,
    len: usize,
}

impl AsAny for CpuBuffer {
    fn as_any(&self) -> &dyn std::any::Any { self }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
}

impl GpuBuffer for CpuBuffer {
    fn len(&self) -> usize {
        self.len
    }
}

/// CPU reference device.
pub struct CpuDevice {
    limits: DeviceLimits,
    counters: StatCounters,
    custom: RwLock<HashMap<String, CpuKernel>>,
}

impl CpuDevice {
    pub fn new() -> Self {
        // Get system RAM (fallback to 4GB if detection fails)
        let available = sys_info::mem_info()
            .map(|m| m.avail * 1024)
            .unwrap_or(4 * 1024 * 1024 * 1024);

        Self {
            limits: DeviceLimits {
                max_image_dim: 16384,
                max_buffer_bytes: u64::MAX,
                available_memory: available,
            },
            counters: StatCounters::default(),
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the limits, e.g. to simulate a small device.
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Registers a kernel for an externally defined program.
    ///
    /// Built-in program names cannot be shadowed.
    pub fn register_kernel(&self, program: impl Into<String>, kernel: CpuKernel) -> ComputeResult<()> {
        let program = program.into();
        if kernels::builtin(&program).is_some() {
            return Err(ComputeError::OperationFailed(format!("'{program}' is a built-in program")));
        }
        self.custom
            .write()
            .map_err(|_| ComputeError::OperationFailed("kernel table lock poisoned".into()))?
            .insert(program, kernel);
        Ok(())
    }

    fn image<'a>(&self, image: &'a dyn GpuImage) -> ComputeResult<&'a CpuImage> {
        image
            .as_any()
            .downcast_ref::<CpuImage>()
            .ok_or_else(|| ComputeError::InvalidHandle(format!("{} is not a CPU image", image.id())))
    }

    fn buffer<'a>(&self, buffer: &'a dyn GpuBuffer) -> ComputeResult<&'a CpuBuffer> {
        buffer
            .as_any()
            .downcast_ref::<CpuBuffer>()
            .ok_or_else(|| ComputeError::InvalidHandle("Invalid handle type".into()))
    }

    fn execute(&self, commands: &CommandList<'_>) -> ComputeResult<()> {
        for command in commands.commands() {
            match command {
                Command::UploadParams { buffer, data } => {
                    let buffer = self.buffer(*buffer)?;
                    if data.len() > buffer.len {
                        return Err(ComputeError::BufferSizeMismatch { expected: buffer.len, actual: data.len() });
                    }
                    let mut slots = buffer
                        .data
                        .write()
                        .map_err(|_| ComputeError::OperationFailed("settings lock poisoned".into()))?;
                    slots[..data.len()].copy_from_slice(data);
                    slots[data.len()..].fill(0.0);
                }
                Command::Transition { image, from, to } => apply_transition(*image, *from, *to)?,
                Command::Dispatch(dispatch) => self.dispatch(dispatch)?,
            }
        }
        Ok(())
    }

    fn dispatch(&self, dispatch: &Dispatch<'_>) -> ComputeResult<()> {
        dispatch.validate()?;

        let back = self.image(dispatch.back)?;
        let front = self.image(dispatch.front)?;
        let output = self.image(dispatch.output)?;
        let params = self.buffer(dispatch.params)?;

        let back_data = back.read()?;
        let front_data = front.read()?;
        let settings = params
            .data
            .read()
            .map_err(|_| ComputeError::OperationFailed("settings lock poisoned".into()))?;
        let mut out = output.write()?;

        let ctx = PixelContext {
            back: View::new(&back_data, back.size),
            front: View::new(&front_data, front.size),
            settings: &settings,
            out_size: output.size,
        };

        let program = dispatch.program.name();
        if let Some(kernel) = kernels::builtin(program) {
            kernels::run(&kernel, &ctx, &mut out);
        } else {
            let kernel = self
                .custom
                .read()
                .map_err(|_| ComputeError::OperationFailed("kernel table lock poisoned".into()))?
                .get(program)
                .cloned()
                .ok_or_else(|| ComputeError::UnknownProgram(program.to_string()))?;
            kernels::run(kernel.as_ref(), &ctx, &mut out);
        }

        StatCounters::bump(&self.counters.dispatches);
        trace!(program, output = %output.id, "cpu dispatch");
        Ok(())
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceContext for CpuDevice {
    fn name(&self) -> &str {
        "CPU"
    }

    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn allocate_image(&self, size: ImageSize) -> ComputeResult<ImageHandle> {
        self.limits.check(size)?;
        StatCounters::bump(&self.counters.allocations);
        Ok(Box::new(CpuImage::new(size)))
    }

    fn allocate_param_buffer(&self, len: usize) -> ComputeResult<BufferHandle> {
        Ok(Box::new(CpuBuffer { data: RwLock::new(vec![0.0; len]), len }))
    }

    fn submit_and_wait(&self, commands: CommandList<'_>) -> ComputeResult<()> {
        StatCounters::bump(&self.counters.submissions);
        trace!(label = commands.label(), commands = commands.len(), "cpu submit");

        let snapshot = commands.snapshot_layouts();
        let result = self.execute(&commands);
        if result.is_err() {
            snapshot.restore();
        }
        result
    }

    fn upload(&self, image: &dyn GpuImage, pixels: &[f32]) -> ComputeResult<()> {
        let cpu = self.image(image)?;
        let mut data = cpu.write()?;
        if pixels.len() != data.len() {
            return Err(ComputeError::BufferSizeMismatch { expected: data.len(), actual: pixels.len() });
        }
        data.copy_from_slice(pixels);
        cpu.layout.set(ImageLayout::ShaderRead);
        StatCounters::bump(&self.counters.uploads);
        Ok(())
    }

    fn download(&self, image: &dyn GpuImage) -> ComputeResult<Vec<f32>> {
        let cpu = self.image(image)?;
        StatCounters::bump(&self.counters.downloads);
        Ok(cpu.read()?.clone())
    }

    fn stats(&self) -> DeviceStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::ProgramRef;
    use std::sync::Arc;

    fn uploaded(device: &CpuDevice, size: ImageSize, rgba: [f32; 4]) -> ImageHandle {
        let image = device.allocate_image(size).unwrap();
        let pixels: Vec<f32> = (0..size.pixel_count()).flat_map(|_| rgba).collect();
        device.upload(image.as_ref(), &pixels).unwrap();
        image
    }

    #[test]
    fn test_upload_download() {
        let device = CpuDevice::new();
        let image = uploaded(&device, ImageSize::new(2, 2), [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(image.layout(), ImageLayout::ShaderRead);
        let data = device.download(image.as_ref()).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(&data[4..8], &[0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn test_dispatch_requires_general_output() {
        let device = CpuDevice::new();
        let size = ImageSize::new(4, 4);
        let back = uploaded(&device, size, [1.0; 4]);
        let output = device.allocate_image(size).unwrap();
        let params = device.allocate_param_buffer(64).unwrap();
        let program = ProgramRef::builtin("invert");

        let mut list = CommandList::new("test");
        list.dispatch(Dispatch {
            program: &program,
            back: back.as_ref(),
            front: back.as_ref(),
            output: output.as_ref(),
            params: params.as_ref(),
            workgroups: Dispatch::grid_for(size),
        });
        let err = device.submit_and_wait(list).unwrap_err();
        assert!(matches!(err, ComputeError::LayoutViolation { actual: ImageLayout::Undefined, .. }));
    }

    #[test]
    fn test_failed_list_restores_layouts() {
        let device = CpuDevice::new();
        let size = ImageSize::new(4, 4);
        let back = uploaded(&device, size, [1.0; 4]);
        let stale = device.allocate_image(size).unwrap();
        let output = device.allocate_image(size).unwrap();
        let params = device.allocate_param_buffer(64).unwrap();
        let program = ProgramRef::builtin("invert");
        let output_before = output.layout();

        let mut list = CommandList::new("fails at dispatch");
        list.transition(back.as_ref(), ImageLayout::ShaderRead, ImageLayout::General)
            .transition(back.as_ref(), ImageLayout::General, ImageLayout::ShaderRead)
            .transition(output.as_ref(), ImageLayout::Undefined, ImageLayout::General)
            .dispatch(Dispatch {
                program: &program,
                back: back.as_ref(),
                front: stale.as_ref(),
                output: output.as_ref(),
                params: params.as_ref(),
                workgroups: Dispatch::grid_for(size),
            });
        assert!(matches!(device.submit_and_wait(list), Err(ComputeError::LayoutViolation { .. })));
        assert_eq!(output.layout(), output_before);
        assert_eq!(back.layout(), ImageLayout::ShaderRead);
        assert_eq!(device.stats().dispatches, 0);
    }

    #[test]
    fn test_custom_kernel() {
        let device = CpuDevice::new();
        let kernel: CpuKernel = Arc::new(|ctx: &PixelContext<'_>, _x: i32, _y: i32| [ctx.setting(0), 0.0, 0.0, 1.0]);
        device.register_kernel("red", kernel).unwrap();
        assert!(device.register_kernel("solid", Arc::new(|_: &PixelContext<'_>, _: i32, _: i32| [0.0; 4])).is_err());

        let size = ImageSize::new(3, 2);
        let back = uploaded(&device, size, [0.0; 4]);
        let output = device.allocate_image(size).unwrap();
        let params = device.allocate_param_buffer(64).unwrap();
        let program = ProgramRef::custom("red");

        let mut list = CommandList::new("custom");
        list.upload_params(params.as_ref(), vec![0.75])
            .transition(output.as_ref(), ImageLayout::Undefined, ImageLayout::General)
            .dispatch(Dispatch {
                program: &program,
                back: back.as_ref(),
                front: back.as_ref(),
                output: output.as_ref(),
                params: params.as_ref(),
                workgroups: Dispatch::grid_for(size),
            });
        device.submit_and_wait(list).unwrap();

        let data = device.download(output.as_ref()).unwrap();
        assert!(data.chunks(4).all(|px| px == [0.75, 0.0, 0.0, 1.0]));
        assert_eq!(device.stats().dispatches, 1);
    }

    #[test]
    fn test_allocation_respects_limits() {
        let device = CpuDevice::new().with_limits(DeviceLimits {
            max_image_dim: 8,
            max_buffer_bytes: u64::MAX,
            available_memory: u64::MAX,
        });
        assert!(device.allocate_image(ImageSize::new(8, 8)).is_ok());
        assert!(matches!(device.allocate_image(ImageSize::new(9, 1)), Err(ComputeError::InvalidDimensions(9, 1))));
    }
}
