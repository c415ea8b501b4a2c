//! Opaque GPU image handles.
//!
//! The graph stores each node's cached output as an [`ImageHandle`], a boxed
//! [`GpuImage`] produced by whatever device backend evaluated the node. The
//! graph never looks inside: it only needs the size, a stable id for identity
//! checks, and the current layout so the executor can record transitions.
//!
//! Ownership is exclusive. Dropping a handle releases the device resource;
//! other nodes only ever see `&dyn GpuImage`.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ImageSize {
    /// Creates a size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Returns `true` if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Process-unique identity of a device image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

impl ImageId {
    /// Allocates the next id. Backends call this once per allocated image.
    pub fn next() -> Self {
        Self(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for labels and logging.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "img#{}", self.0)
    }
}

/// Access layout an image is in.
///
/// Inputs must be in `ShaderRead` before a dispatch reads them, outputs in
/// `General` before a dispatch writes them. A freshly allocated image is
/// `Undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ImageLayout {
    /// Contents unspecified; the image has never been written.
    #[default]
    Undefined = 0,
    /// Writable by compute shaders.
    General = 1,
    /// Readable by compute shaders.
    ShaderRead = 2,
}

impl ImageLayout {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::General,
            2 => Self::ShaderRead,
            _ => Self::Undefined,
        }
    }
}

/// Interior-mutable layout state for image implementations.
///
/// Layout changes happen while an image is only shared-borrowed by a command
/// list, so implementors keep the state in one of these.
#[derive(Debug, Default)]
pub struct LayoutCell(AtomicU8);

impl LayoutCell {
    /// Creates a cell in the given layout.
    pub fn new(layout: ImageLayout) -> Self {
        Self(AtomicU8::new(layout as u8))
    }

    /// Current layout.
    pub fn get(&self) -> ImageLayout {
        ImageLayout::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Replaces the layout.
    pub fn set(&self, layout: ImageLayout) {
        self.0.store(layout as u8, Ordering::Release);
    }
}

/// Helper trait for downcasting.
pub trait AsAny: 'static {
    /// Upcast to `Any`.
    fn as_any(&self) -> &dyn std::any::Any;
    /// Upcast to mutable `Any`.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// An image resident on a compute device.
pub trait GpuImage: Send + Sync + AsAny + fmt::Debug {
    /// Identity of the underlying resource.
    fn id(&self) -> ImageId;

    /// Dimensions.
    fn size(&self) -> ImageSize;

    /// Current layout.
    fn layout(&self) -> ImageLayout;

    /// Records a layout change. Only devices call this, while executing a
    /// transition command.
    fn set_layout(&self, layout: ImageLayout);

    /// Width.
    fn width(&self) -> u32 {
        self.size().width
    }

    /// Height.
    fn height(&self) -> u32 {
        self.size().height
    }

    /// Size in bytes of device memory used (RGBA f32).
    fn size_bytes(&self) -> u64 {
        self.size().pixel_count() as u64 * 16
    }
}

/// Exclusively owned image. Dropping it frees the device resource.
pub type ImageHandle = Box<dyn GpuImage>;
