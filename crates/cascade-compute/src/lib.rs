//! Compute devices and node execution for the cascade compositor.
//!
//! Provides a CPU (rayon) reference device and a GPU (wgpu) device behind one
//! [`DeviceContext`] capability, and the [`GpuNodeExecutor`] that turns one
//! node evaluation into a recorded command list.
//!
//! # Architecture
//!
//! ```text
//! GpuNodeExecutor
//!     ├── ImagePool        (reuse of released images)
//!     ├── SettingsBlock    (property values -> uniform slots)
//!     └── DeviceContext trait
//!             ├── CpuDevice  (rayon kernels, layout validation)
//!             └── WgpuDevice (WGSL compute shaders)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cascade_compute::{Backend, ShaderCatalog, create_device, GpuNodeExecutor};
//!
//! let device = create_device(Backend::Auto, Arc::new(ShaderCatalog::builtin()))?;
//! let mut executor = GpuNodeExecutor::new(device, 64 << 20);
//! let image = executor.evaluate(&request)?;
//! ```

pub mod backend;
pub mod executor;
pub mod io;
pub mod pool;
pub mod settings;
pub mod shaders;

pub use backend::{
    BACKEND_ENV, Backend, BackendInfo, BufferHandle, Command, CommandList, CpuDevice, CpuImage, CpuKernel, DeviceContext,
    DeviceLimits, DeviceStats, Dispatch, GpuBuffer, PixelContext, create_device, describe_backends,
    detect_backends, select_best_backend,
};
#[cfg(feature = "wgpu")]
pub use backend::{WgpuDevice, WgpuImage};
pub use executor::{GpuNodeExecutor, NodeEvaluation};
pub use io::{ColorSpace, HostImage};
pub use pool::ImagePool;
pub use settings::{SETTINGS_SLOTS, SettingsBlock};
pub use shaders::{ShaderCatalog, WORKGROUP_SIZE};

use std::path::PathBuf;

use cascade_core::{ImageId, ImageLayout};
use thiserror::Error;

/// Device and execution errors.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Failed to create device: {0}")]
    DeviceCreation(String),

    #[error("Device lost: {0}")]
    DeviceLost(String),

    #[error("Out of device memory: {0}")]
    OutOfMemory(String),

    #[error("Failed to compile shader '{program}': {reason}")]
    ShaderCompilation { program: String, reason: String },

    #[error("Unknown shader program '{0}'")]
    UnknownProgram(String),

    #[error("Layout violation on {image}: expected {expected:?}, found {actual:?}")]
    LayoutViolation { image: ImageId, expected: ImageLayout, actual: ImageLayout },

    #[error("Image {0} bound as both input and output of one dispatch")]
    Aliasing(ImageId),

    #[error("Invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("Settings need {needed} slots, uniform block holds {capacity}")]
    SettingsOverflow { needed: usize, capacity: usize },

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Invalid handle type: {0}")]
    InvalidHandle(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Failed to decode {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Failed to encode {}: {reason}", .path.display())]
    Encode { path: PathBuf, reason: String },

    #[error("GPU operation failed: {0}")]
    OperationFailed(String),
}

impl ComputeError {
    /// Returns `true` if the device can no longer be used.
    ///
    /// Device failures abort the whole evaluation pass; everything else is
    /// local to the node or file that caused it.
    pub fn is_device_failure(&self) -> bool {
        matches!(self, Self::DeviceLost(_) | Self::OutOfMemory(_))
    }

    /// Returns `true` for file read/write problems.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Decode { .. } | Self::Encode { .. })
    }
}

pub type ComputeResult<T> = Result<T, ComputeError>;
