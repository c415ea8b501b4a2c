//! Compute devices.
//!
//! Provides a CPU (rayon) device and a wgpu device with automatic selection.
//!
//! # Architecture
//!
//! ```text
//! DeviceContext (allocate, upload/download, submit_and_wait)
//!     +-- CpuDevice  (rayon kernels, layout validation)
//!     +-- WgpuDevice (Vulkan/Metal/DX12 compute shaders)
//! ```
//!
//! A device is a single shared resource. Only the control thread submits to
//! it, and every submission blocks until the device is idle again.

mod command;
mod cpu_backend;
mod detect;
mod kernels;

#[cfg(feature = "wgpu")]
mod wgpu_backend;

pub use command::{Command, CommandList, Dispatch, LayoutSnapshot, apply_transition};
pub use cpu_backend::{CpuBuffer, CpuDevice, CpuImage};
pub use detect::{BACKEND_ENV, BackendInfo, describe_backends, detect_backends, select_best_backend};
pub use kernels::{CpuKernel, PixelContext, View};

#[cfg(feature = "wgpu")]
pub use wgpu_backend::{WgpuBuffer, WgpuDevice, WgpuImage};

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cascade_core::{AsAny, GpuImage, ImageHandle, ImageSize};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::io::{self, ColorSpace, HostImage};
use crate::shaders::ShaderCatalog;
use crate::{ComputeError, ComputeResult};

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Auto-select best available (wgpu > CPU).
    #[default]
    Auto,
    /// CPU backend using rayon for parallelization.
    Cpu,
    /// wgpu backend (Vulkan/Metal/DX12).
    Wgpu,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto => true,
            Self::Cpu => true,
            #[cfg(feature = "wgpu")]
            Self::Wgpu => WgpuDevice::is_available(),
            #[cfg(not(feature = "wgpu"))]
            Self::Wgpu => false,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Wgpu => "wgpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "wgpu" | "gpu" => Ok(Self::Wgpu),
            other => Err(ComputeError::BackendNotAvailable(format!("unknown backend '{other}'"))),
        }
    }
}

/// Device limits relevant to image allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest width or height of one image.
    pub max_image_dim: u32,
    /// Largest single buffer in bytes.
    pub max_buffer_bytes: u64,
    /// Memory available for images, in bytes.
    pub available_memory: u64,
}

impl DeviceLimits {
    /// Checks that an image of `size` can be allocated.
    pub fn check(&self, size: ImageSize) -> ComputeResult<()> {
        if size.is_empty() || size.width > self.max_image_dim || size.height > self.max_image_dim {
            return Err(ComputeError::InvalidDimensions(size.width, size.height));
        }
        let bytes = size.pixel_count() as u64 * 16;
        if bytes > self.max_buffer_bytes || bytes > self.available_memory {
            return Err(ComputeError::OutOfMemory(format!(
                "{size} image needs {bytes} bytes, {} available",
                self.available_memory.min(self.max_buffer_bytes)
            )));
        }
        Ok(())
    }
}

/// Counters of device work, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Images allocated.
    pub allocations: u64,
    /// Command lists submitted.
    pub submissions: u64,
    /// Compute dispatches executed.
    pub dispatches: u64,
    /// Host-to-device image uploads.
    pub uploads: u64,
    /// Device-to-host image downloads.
    pub downloads: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub(crate) allocations: AtomicU64,
    pub(crate) submissions: AtomicU64,
    pub(crate) dispatches: AtomicU64,
    pub(crate) uploads: AtomicU64,
    pub(crate) downloads: AtomicU64,
}

impl StatCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DeviceStats {
        DeviceStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
        }
    }
}

/// A uniform buffer resident on a device.
pub trait GpuBuffer: Send + Sync + AsAny + fmt::Debug {
    /// Capacity in f32 slots.
    fn len(&self) -> usize;

    /// Returns `true` for a zero-capacity buffer.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusively owned device buffer.
pub type BufferHandle = Box<dyn GpuBuffer>;

/// Compute-capable device context.
///
/// Images are RGBA f32. A freshly allocated image is `Undefined`; an upload
/// leaves it in `ShaderRead`.
pub trait DeviceContext: Send + Sync {
    /// Device name, e.g. the adapter name.
    fn name(&self) -> &str;

    /// Backend kind.
    fn backend(&self) -> Backend;

    /// Allocation limits.
    fn limits(&self) -> &DeviceLimits;

    /// Allocates an image. Contents are undefined.
    fn allocate_image(&self, size: ImageSize) -> ComputeResult<ImageHandle>;

    /// Allocates a uniform buffer of `len` f32 slots.
    fn allocate_param_buffer(&self, len: usize) -> ComputeResult<BufferHandle>;

    /// Executes `commands` in order and blocks until the device is idle.
    fn submit_and_wait(&self, commands: CommandList<'_>) -> ComputeResult<()>;

    /// Writes RGBA f32 pixels into an image and leaves it in `ShaderRead`.
    fn upload(&self, image: &dyn GpuImage, pixels: &[f32]) -> ComputeResult<()>;

    /// Reads back RGBA f32 pixels.
    fn download(&self, image: &dyn GpuImage) -> ComputeResult<Vec<f32>>;

    /// Work counters.
    fn stats(&self) -> DeviceStats;

    /// Decodes an image file into a new device image.
    fn load_image_from_disk(&self, path: &Path, color_space: ColorSpace) -> ComputeResult<ImageHandle> {
        let host = io::read_image(path, color_space)?;
        let image = self.allocate_image(host.size())?;
        self.upload(image.as_ref(), host.pixels())?;
        Ok(image)
    }

    /// Encodes a device image into a file.
    fn save_image_to_disk(&self, image: &dyn GpuImage, path: &Path, color_space: ColorSpace) -> ComputeResult<()> {
        let pixels = self.download(image)?;
        let host = HostImage::new(image.size(), pixels)?;
        io::write_image(path, &host, color_space)
    }
}

/// Creates a device for `backend`.
///
/// `Auto` picks the best available backend. The catalogue supplies WGSL for
/// the GPU device; the CPU device runs its own kernels.
pub fn create_device(backend: Backend, catalog: Arc<ShaderCatalog>) -> ComputeResult<Arc<dyn DeviceContext>> {
    let backend = match backend {
        Backend::Auto => select_best_backend(),
        other => other,
    };
    let device: Arc<dyn DeviceContext> = match backend {
        Backend::Auto | Backend::Cpu => Arc::new(CpuDevice::new()),
        #[cfg(feature = "wgpu")]
        Backend::Wgpu => Arc::new(WgpuDevice::new(catalog)?),
        #[cfg(not(feature = "wgpu"))]
        Backend::Wgpu => {
            drop(catalog);
            return Err(ComputeError::BackendNotAvailable("built without the `wgpu` feature".into()));
        }
    };
    info!(backend = %device.backend(), device = device.name(), "compute device created");
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("CPU".parse::<Backend>().unwrap(), Backend::Cpu);
        assert_eq!("gpu".parse::<Backend>().unwrap(), Backend::Wgpu);
        assert!("cuda".parse::<Backend>().is_err());
    }

    #[test]
    fn test_limits_check() {
        let limits = DeviceLimits { max_image_dim: 64, max_buffer_bytes: 1 << 20, available_memory: 1 << 20 };
        assert!(limits.check(ImageSize::new(64, 64)).is_ok());
        assert!(matches!(limits.check(ImageSize::new(65, 1)), Err(ComputeError::InvalidDimensions(65, 1))));
        assert!(matches!(limits.check(ImageSize::new(0, 1)), Err(ComputeError::InvalidDimensions(..))));
        let tight = DeviceLimits { available_memory: 100, ..limits };
        assert!(matches!(tight.check(ImageSize::new(8, 8)), Err(ComputeError::OutOfMemory(_))));
    }
}
