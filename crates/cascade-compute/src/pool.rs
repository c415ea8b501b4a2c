//! LRU pool of released device images.
//!
//! Invalidated node outputs and multi-pass scratch images are returned here
//! instead of being freed, and the executor takes same-sized images back out
//! before allocating. Useful for:
//! - property scrubbing (every frame re-renders the same sizes)
//! - blur/erode/dilate scratch targets
//! - export loops over same-sized frames

use std::collections::VecDeque;

use cascade_core::{ImageHandle, ImageSize};
use tracing::trace;

/// Budget-bounded image pool.
#[derive(Debug)]
pub struct ImagePool {
    /// Pooled images (front = oldest).
    images: VecDeque<ImageHandle>,
    /// Total pooled bytes.
    total_bytes: u64,
    /// Maximum pooled bytes.
    max_bytes: u64,
    /// Pool hits counter.
    hits: u64,
    /// Pool misses counter.
    misses: u64,
}

impl ImagePool {
    /// Create pool with a byte budget. Zero disables pooling.
    pub fn with_budget(max_bytes: u64) -> Self {
        Self {
            images: VecDeque::new(),
            total_bytes: 0,
            max_bytes,
            hits: 0,
            misses: 0,
        }
    }

    /// Returns an image to the pool.
    ///
    /// Evicts the oldest images to stay within budget; an image larger than
    /// the whole budget is dropped.
    pub fn put(&mut self, image: ImageHandle) {
        let bytes = image.size_bytes();
        if bytes > self.max_bytes {
            return;
        }
        while self.total_bytes + bytes > self.max_bytes {
            if self.evict_lru().is_none() {
                break;
            }
        }
        self.total_bytes += bytes;
        self.images.push_back(image);
    }

    /// Takes the most recently pooled image of exactly `size`.
    pub fn take(&mut self, size: ImageSize) -> Option<ImageHandle> {
        match self.images.iter().rposition(|img| img.size() == size) {
            Some(pos) => {
                self.hits += 1;
                let image = self.images.remove(pos)?;
                self.total_bytes = self.total_bytes.saturating_sub(image.size_bytes());
                trace!(image = %image.id(), %size, "pool hit");
                Some(image)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Evict least recently pooled image.
    pub fn evict_lru(&mut self) -> Option<ImageHandle> {
        let image = self.images.pop_front()?;
        self.total_bytes = self.total_bytes.saturating_sub(image.size_bytes());
        Some(image)
    }

    /// Drops every pooled image.
    pub fn clear(&mut self) {
        self.images.clear();
        self.total_bytes = 0;
    }

    /// Number of pooled images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Pooled bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Get hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CpuDevice, DeviceContext};

    #[test]
    fn test_take_matches_size() {
        let device = CpuDevice::new();
        let mut pool = ImagePool::with_budget(1 << 20);
        let a = device.allocate_image(ImageSize::new(4, 4)).unwrap();
        let a_id = a.id();
        pool.put(a);
        pool.put(device.allocate_image(ImageSize::new(8, 8)).unwrap());

        assert!(pool.take(ImageSize::new(2, 2)).is_none());
        let hit = pool.take(ImageSize::new(4, 4)).unwrap();
        assert_eq!(hit.id(), a_id);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.total_bytes(), 8 * 8 * 16);
        assert!((pool.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_budget_evicts_oldest() {
        let device = CpuDevice::new();
        // room for two 4x4 images
        let mut pool = ImagePool::with_budget(2 * 4 * 4 * 16);
        let first = device.allocate_image(ImageSize::new(4, 4)).unwrap();
        let first_id = first.id();
        pool.put(first);
        pool.put(device.allocate_image(ImageSize::new(4, 4)).unwrap());
        pool.put(device.allocate_image(ImageSize::new(4, 4)).unwrap());
        assert_eq!(pool.len(), 2);
        while let Some(img) = pool.take(ImageSize::new(4, 4)) {
            assert_ne!(img.id(), first_id);
        }

        pool.put(device.allocate_image(ImageSize::new(64, 64)).unwrap());
        assert!(pool.is_empty());
    }
}
