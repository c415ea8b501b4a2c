//! wgpu backend implementation.
//!
//! GPU-accelerated node evaluation using WGSL compute shaders. Images are
//! `Rgba32Float` storage textures; every program uses one shared bind-group
//! layout (see [`crate::shaders`]). Pipelines are compiled on first use.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cascade_core::{AsAny, GpuImage, ImageHandle, ImageId, ImageLayout, ImageSize, LayoutCell};
use tracing::{debug, error, trace};

use super::command::{Command, CommandList, Dispatch, apply_transition};
use super::{Backend, BufferHandle, DeviceContext, DeviceLimits, DeviceStats, GpuBuffer, StatCounters};
use crate::shaders::ShaderCatalog;
use crate::{ComputeError, ComputeResult};

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const BYTES_PER_PIXEL: u32 = 16;

// =============================================================================
// Handles
// =============================================================================

/// GPU texture handle.
pub struct WgpuImage {
    id: ImageId,
    size: ImageSize,
    layout: LayoutCell,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl fmt::Debug for WgpuImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuImage")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("layout", &self.layout.get())
            .finish()
    }
}

impl AsAny for WgpuImage {
    fn as_any(&self) -> &dyn std::any::Any { self }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
}

impl GpuImage for WgpuImage {
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

/// Settings uniform buffer.
#[derive(Debug)]
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    len: usize,
}

impl AsAny for WgpuBuffer {
    fn as_any(&self) -> &dyn std::any::Any { self }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
}

impl GpuBuffer for WgpuBuffer {
    fn len(&self) -> usize {
        self.len
    }
}

// =============================================================================
// WgpuDevice
// =============================================================================

/// wgpu compute device.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    limits: DeviceLimits,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    catalog: Arc<ShaderCatalog>,
    pipelines: Mutex<HashMap<String, Arc<wgpu::ComputePipeline>>>,
    lost: Arc<AtomicBool>,
    counters: StatCounters,
}

impl WgpuDevice {
    /// Check if wgpu is available.
    pub fn is_available() -> bool {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .is_some()
        })
    }

    /// Create a device on the best adapter.
    pub fn new(catalog: Arc<ShaderCatalog>) -> ComputeResult<Self> {
        pollster::block_on(Self::new_async(catalog))
    }

    async fn new_async(catalog: Arc<ShaderCatalog>) -> ComputeResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(ComputeError::NoAdapter)?;

        let adapter_limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("cascade_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter_limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| ComputeError::DeviceCreation(e.to_string()))?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            error!(?reason, %message, "wgpu device lost");
            flag.store(true, Ordering::Release);
        });

        let info = adapter.get_info();
        let limits = DeviceLimits {
            max_image_dim: adapter_limits.max_texture_dimension_2d,
            max_buffer_bytes: adapter_limits.max_buffer_size,
            available_memory: estimate_vram(&info, adapter_limits.max_buffer_size),
        };

        let layout = create_bind_group_layout(&device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("cascade_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        debug!(adapter = %info.name, backend = ?info.backend, "wgpu device ready");

        Ok(Self {
            device,
            queue,
            adapter_name: info.name,
            limits,
            layout,
            pipeline_layout,
            catalog,
            pipelines: Mutex::new(HashMap::new()),
            lost,
            counters: StatCounters::default(),
        })
    }

    fn check_alive(&self) -> ComputeResult<()> {
        if self.lost.load(Ordering::Acquire) {
            return Err(ComputeError::DeviceLost(self.adapter_name.clone()));
        }
        Ok(())
    }

    fn image<'a>(&self, image: &'a dyn GpuImage) -> ComputeResult<&'a WgpuImage> {
        image
            .as_any()
            .downcast_ref::<WgpuImage>()
            .ok_or_else(|| ComputeError::InvalidHandle(format!("{} is not a wgpu image", image.id())))
    }

    fn buffer<'a>(&self, buffer: &'a dyn GpuBuffer) -> ComputeResult<&'a WgpuBuffer> {
        buffer
            .as_any()
            .downcast_ref::<WgpuBuffer>()
            .ok_or_else(|| ComputeError::InvalidHandle("Invalid handle type".into()))
    }

    /// Compiled pipeline for `program`, compiling it on first use.
    fn pipeline(&self, program: &str) -> ComputeResult<Arc<wgpu::ComputePipeline>> {
        let mut cache = self
            .pipelines
            .lock()
            .map_err(|_| ComputeError::OperationFailed("pipeline cache lock poisoned".into()))?;
        if let Some(pipeline) = cache.get(program) {
            return Ok(Arc::clone(pipeline));
        }

        let source = self.catalog.source(program)?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(program),
            layout: Some(&self.pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ComputeError::ShaderCompilation { program: program.to_string(), reason: err.to_string() });
        }

        debug!(program, "compiled compute pipeline");
        let pipeline = Arc::new(pipeline);
        cache.insert(program.to_string(), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    fn record_dispatch(&self, encoder: &mut wgpu::CommandEncoder, dispatch: &Dispatch<'_>) -> ComputeResult<()> {
        dispatch.validate()?;
        let pipeline = self.pipeline(dispatch.program.name())?;
        let back = self.image(dispatch.back)?;
        let front = self.image(dispatch.front)?;
        let output = self.image(dispatch.output)?;
        let params = self.buffer(dispatch.params)?;

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(dispatch.program.name()),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&back.view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&front.view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&output.view) },
                wgpu::BindGroupEntry { binding: 3, resource: params.buffer.as_entire_binding() },
            ],
        });

        // One pass per dispatch; wgpu inserts the barriers between passes.
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(dispatch.program.name()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(dispatch.workgroups[0], dispatch.workgroups[1], 1);
        drop(pass);

        StatCounters::bump(&self.counters.dispatches);
        trace!(program = dispatch.program.name(), output = %output.id, "recorded dispatch");
        Ok(())
    }

    /// Submits `encoder`, waits for idle and maps scoped errors.
    fn finish(&self, encoder: wgpu::CommandEncoder) -> ComputeResult<()> {
        self.queue.submit(std::iter::once(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);

        let oom = pollster::block_on(self.device.pop_error_scope());
        let validation = pollster::block_on(self.device.pop_error_scope());
        self.check_alive()?;
        if let Some(err) = oom {
            return Err(ComputeError::OutOfMemory(err.to_string()));
        }
        if let Some(err) = validation {
            return Err(ComputeError::OperationFailed(err.to_string()));
        }
        Ok(())
    }
}

impl DeviceContext for WgpuDevice {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn backend(&self) -> Backend {
        Backend::Wgpu
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn allocate_image(&self, size: ImageSize) -> ComputeResult<ImageHandle> {
        self.check_alive()?;
        self.limits.check(size)?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("cascade_image"),
            size: wgpu::Extent3d { width: size.width, height: size.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ComputeError::OutOfMemory(err.to_string()));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        StatCounters::bump(&self.counters.allocations);
        Ok(Box::new(WgpuImage { id: ImageId::next(), size, layout: LayoutCell::default(), texture, view }))
    }

    fn allocate_param_buffer(&self, len: usize) -> ComputeResult<BufferHandle> {
        self.check_alive()?;
        // uniform blocks are vec4-aligned
        let bytes = (len.div_ceil(4).max(1) * 16) as u64;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cascade_settings"),
            size: bytes,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(Box::new(WgpuBuffer { buffer, len }))
    }

    /// Records all commands into one encoder and submits once.
    ///
    /// Settings uploads are queue writes, so they land before any dispatch
    /// of the same list.
    fn submit_and_wait(&self, commands: CommandList<'_>) -> ComputeResult<()> {
        self.check_alive()?;
        StatCounters::bump(&self.counters.submissions);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(commands.label()) });

        let snapshot = commands.snapshot_layouts();
        let mut recorded = Ok(());
        for command in commands.commands() {
            recorded = match command {
                Command::UploadParams { buffer, data } => self.buffer(*buffer).and_then(|buffer| {
                    if data.len() > buffer.len {
                        return Err(ComputeError::BufferSizeMismatch { expected: buffer.len, actual: data.len() });
                    }
                    self.queue.write_buffer(&buffer.buffer, 0, bytemuck::cast_slice(data.as_slice()));
                    Ok(())
                }),
                Command::Transition { image, from, to } => apply_transition(*image, *from, *to),
                Command::Dispatch(dispatch) => self.record_dispatch(&mut encoder, dispatch),
            };
            if recorded.is_err() {
                break;
            }
        }

        // Scopes must be popped even when recording failed.
        let submitted = self.finish(encoder);
        let result = recorded.and(submitted);
        if result.is_err() {
            snapshot.restore();
        }
        result
    }

    fn upload(&self, image: &dyn GpuImage, pixels: &[f32]) -> ComputeResult<()> {
        self.check_alive()?;
        let gpu = self.image(image)?;
        let expected = gpu.size.pixel_count() * 4;
        if pixels.len() != expected {
            return Err(ComputeError::BufferSizeMismatch { expected, actual: pixels.len() });
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(pixels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(gpu.size.width * BYTES_PER_PIXEL),
                rows_per_image: Some(gpu.size.height),
            },
            wgpu::Extent3d { width: gpu.size.width, height: gpu.size.height, depth_or_array_layers: 1 },
        );
        self.queue.submit(std::iter::empty());
        self.device.poll(wgpu::Maintain::Wait);
        self.check_alive()?;

        gpu.layout.set(ImageLayout::ShaderRead);
        StatCounters::bump(&self.counters.uploads);
        Ok(())
    }

    fn download(&self, image: &dyn GpuImage) -> ComputeResult<Vec<f32>> {
        self.check_alive()?;
        let gpu = self.image(image)?;
        let ImageSize { width, height } = gpu.size;

        let row_bytes = width * BYTES_PER_PIXEL;
        let padded_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        // Create staging buffer
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_buffer"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        // Copy to staging
        let mut encoder = self.device.create_command_encoder(&Default::default());
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        // Map and read
        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);
        self.check_alive()?;

        rx.recv()
            .map_err(|_| ComputeError::OperationFailed("Map channel closed".into()))?
            .map_err(|e| ComputeError::OperationFailed(format!("Map failed: {e}")))?;

        let data = slice.get_mapped_range();
        let mut result = Vec::with_capacity(gpu.size.pixel_count() * 4);
        for row in data.chunks_exact(padded_row as usize) {
            result.extend_from_slice(bytemuck::cast_slice::<u8, f32>(&row[..row_bytes as usize]));
        }
        drop(data);
        staging.unmap();

        StatCounters::bump(&self.counters.downloads);
        Ok(result)
    }

    fn stats(&self) -> DeviceStats {
        self.counters.snapshot()
    }
}

fn create_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let sampled = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("cascade_bind_group_layout"),
        entries: &[
            sampled(0),
            sampled(1),
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: FORMAT,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

/// Estimate usable VRAM in bytes.
fn estimate_vram(info: &wgpu::AdapterInfo, max_buffer_bytes: u64) -> u64 {
    // Check env override
    if let Ok(mb) = std::env::var("CASCADE_GPU_MEMORY_MB") {
        if let Ok(mb) = mb.parse::<u64>() {
            return mb.saturating_mul(1024 * 1024);
        }
    }

    let from_buffer = max_buffer_bytes.saturating_mul(2);

    let estimated = match info.device_type {
        wgpu::DeviceType::DiscreteGpu => from_buffer.clamp(2u64 << 30, 24u64 << 30),
        wgpu::DeviceType::IntegratedGpu => from_buffer.clamp(512u64 << 20, 4u64 << 30),
        wgpu::DeviceType::VirtualGpu => from_buffer.clamp(1u64 << 30, 8u64 << 30),
        _ => from_buffer.clamp(256u64 << 20, 2u64 << 30),
    };

    // 80% safe margin
    estimated.saturating_mul(80) / 100
}
