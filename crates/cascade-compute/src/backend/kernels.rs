//! CPU reference kernels.
//!
//! One function per built-in program, computing a single output pixel. They
//! mirror the WGSL in [`crate::shaders`] term for term, so the CPU device is
//! a drop-in stand-in for the GPU in tests and headless runs.

use std::sync::Arc;

use cascade_core::ImageSize;
use rayon::prelude::*;

const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// Read-only RGBA f32 image view.
#[derive(Debug, Clone, Copy)]
pub struct View<'a> {
    data: &'a [f32],
    size: ImageSize,
}

impl<'a> View<'a> {
    /// Wraps `data` (RGBA, row-major) of `size`.
    pub fn new(data: &'a [f32], size: ImageSize) -> Self {
        Self { data, size }
    }

    /// Dimensions.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Pixel at (x, y), transparent black outside the image.
    pub fn at(&self, x: i32, y: i32) -> [f32; 4] {
        if x < 0 || y < 0 || x >= self.size.width as i32 || y >= self.size.height as i32 {
            return [0.0; 4];
        }
        let i = (y as usize * self.size.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Pixel at (x, y) with coordinates clamped to the edge.
    pub fn clamped(&self, x: i32, y: i32) -> [f32; 4] {
        let x = x.clamp(0, self.size.width as i32 - 1);
        let y = y.clamp(0, self.size.height as i32 - 1);
        self.at(x, y)
    }
}

/// Inputs of one pixel evaluation.
#[derive(Debug, Clone, Copy)]
pub struct PixelContext<'a> {
    /// Image bound to the Back slot (cleared 1x1 when absent).
    pub back: View<'a>,
    /// Image bound to the Front slot (cleared 1x1 when absent).
    pub front: View<'a>,
    /// Settings slots.
    pub settings: &'a [f32],
    /// Output dimensions.
    pub out_size: ImageSize,
}

impl PixelContext<'_> {
    /// Settings slot `i`, 0.0 past the end.
    pub fn setting(&self, i: usize) -> f32 {
        self.settings.get(i).copied().unwrap_or(0.0)
    }

    fn index(&self, i: usize) -> i32 {
        (self.setting(i) + 0.5).floor() as i32
    }

    fn flag(&self, i: usize) -> bool {
        self.setting(i) > 0.5
    }
}

/// A per-pixel CPU kernel for an externally defined program.
pub type CpuKernel = Arc<dyn Fn(&PixelContext<'_>, i32, i32) -> [f32; 4] + Send + Sync>;

pub(crate) type BuiltinKernel = fn(&PixelContext<'_>, i32, i32) -> [f32; 4];

/// Looks up the CPU implementation of a built-in program.
pub(crate) fn builtin(program: &str) -> Option<BuiltinKernel> {
    let kernel: BuiltinKernel = match program {
        "solid" => solid,
        "color_correct" => color_correct,
        "exposure" => exposure,
        "levels" => levels,
        "monochrome" => monochrome,
        "invert" => invert,
        "blur_h" => blur_h,
        "blur_v" => blur_v,
        "sharpen" => sharpen,
        "erode_h" => erode_h,
        "erode_v" => erode_v,
        "dilate_h" => dilate_h,
        "dilate_v" => dilate_v,
        "crop" => crop,
        "resize" => resize,
        "flip" => flip,
        "merge" => merge,
        "difference" => difference,
        "channel_copy" => channel_copy,
        "copy" => copy,
        "premultiply" => premultiply,
        "unpremultiply" => unpremultiply,
        _ => return None,
    };
    Some(kernel)
}

/// Runs `kernel` over every output pixel, one rayon task per row.
pub(crate) fn run<K>(kernel: &K, ctx: &PixelContext<'_>, out: &mut [f32])
where
    K: Fn(&PixelContext<'_>, i32, i32) -> [f32; 4] + Sync + ?Sized,
{
    let row_len = ctx.out_size.width as usize * 4;
    out.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            px.copy_from_slice(&kernel(ctx, x as i32, y as i32));
        }
    });
}

// ============================================================================
// Generators and color
// ============================================================================

fn solid(ctx: &PixelContext<'_>, _x: i32, _y: i32) -> [f32; 4] {
    [ctx.setting(0), ctx.setting(1), ctx.setting(2), ctx.setting(3)]
}

fn luma(c: &[f32; 4]) -> f32 {
    LUMA[0] * c[0] + LUMA[1] * c[1] + LUMA[2] * c[2]
}

fn color_correct(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let c = ctx.back.at(x, y);
    let gamma = ctx.setting(4);
    let offset = ctx.setting(5);
    let saturation = ctx.setting(6);
    let contrast = ctx.setting(7);

    let mut out = [0.0; 4];
    for ch in 0..3 {
        let v = c[ch] * ctx.setting(ch) + offset;
        out[ch] = v.max(0.0).powf(1.0 / gamma);
    }
    let l = luma(&out);
    for v in out.iter_mut().take(3) {
        *v = l + (*v - l) * saturation;
        *v = (*v - 0.5) * contrast + 0.5;
    }
    out[3] = c[3] * ctx.setting(3);
    out
}

fn exposure(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let c = ctx.back.at(x, y);
    let k = ctx.setting(0).exp2();
    [c[0] * k, c[1] * k, c[2] * k, c[3]]
}

fn levels(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let c = ctx.back.at(x, y);
    let (in_black, in_white, gamma) = (ctx.setting(0), ctx.setting(1), ctx.setting(2));
    let (out_black, out_white) = (ctx.setting(3), ctx.setting(4));
    let range = (in_white - in_black).max(1e-6);

    let mut out = c;
    for v in out.iter_mut().take(3) {
        let t = ((*v - in_black) / range).clamp(0.0, 1.0).powf(1.0 / gamma);
        *v = out_black + (out_white - out_black) * t;
    }
    out
}

fn monochrome(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let c = ctx.back.at(x, y);
    let v = match ctx.index(0) {
        1 => (c[0] + c[1] + c[2]) / 3.0,
        2 => (c[0].max(c[1]).max(c[2]) + c[0].min(c[1]).min(c[2])) * 0.5,
        _ => luma(&c),
    };
    [v, v, v, c[3]]
}

fn invert(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let c = ctx.back.at(x, y);
    let a = if ctx.flag(0) { 1.0 - c[3] } else { c[3] };
    [1.0 - c[0], 1.0 - c[1], 1.0 - c[2], a]
}

// ============================================================================
// Filters
// ============================================================================

fn radius(ctx: &PixelContext<'_>) -> i32 {
    ctx.index(0).max(0)
}

fn box_blur(ctx: &PixelContext<'_>, x: i32, y: i32, dx: i32, dy: i32) -> [f32; 4] {
    let r = radius(ctx);
    let mut sum = [0.0f32; 4];
    for i in -r..=r {
        let c = ctx.back.clamped(x + i * dx, y + i * dy);
        for ch in 0..4 {
            sum[ch] += c[ch];
        }
    }
    let n = (2 * r + 1) as f32;
    sum.map(|v| v / n)
}

fn blur_h(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    box_blur(ctx, x, y, 1, 0)
}

fn blur_v(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    box_blur(ctx, x, y, 0, 1)
}

fn sharpen(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let c = ctx.back.clamped(x, y);
    let amount = ctx.setting(0);
    let mut blur = [0.0f32; 4];
    for j in -1..=1 {
        for i in -1..=1 {
            let s = ctx.back.clamped(x + i, y + j);
            for ch in 0..3 {
                blur[ch] += s[ch] / 9.0;
            }
        }
    }
    let mut out = c;
    for ch in 0..3 {
        out[ch] = c[ch] + amount * (c[ch] - blur[ch]);
    }
    out
}

fn morph(ctx: &PixelContext<'_>, x: i32, y: i32, dx: i32, dy: i32, take_max: bool) -> [f32; 4] {
    let r = radius(ctx);
    let mut acc = ctx.back.clamped(x, y);
    for i in -r..=r {
        let c = ctx.back.clamped(x + i * dx, y + i * dy);
        for ch in 0..4 {
            acc[ch] = if take_max { acc[ch].max(c[ch]) } else { acc[ch].min(c[ch]) };
        }
    }
    acc
}

fn erode_h(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    morph(ctx, x, y, 1, 0, false)
}

fn erode_v(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    morph(ctx, x, y, 0, 1, false)
}

fn dilate_h(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    morph(ctx, x, y, 1, 0, true)
}

fn dilate_v(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    morph(ctx, x, y, 0, 1, true)
}

// ============================================================================
// Transforms
// ============================================================================

fn crop(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    ctx.back.at(x + ctx.index(0), y + ctx.index(1))
}

fn resize(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let src = ctx.back.size();
    let sx = (x as f32 + 0.5) * src.width as f32 / ctx.out_size.width as f32 - 0.5;
    let sy = (y as f32 + 0.5) * src.height as f32 / ctx.out_size.height as f32 - 0.5;
    if ctx.index(2) == 0 {
        return ctx.back.clamped((sx + 0.5).floor() as i32, (sy + 0.5).floor() as i32);
    }
    let (x0, y0) = (sx.floor(), sy.floor());
    let (fx, fy) = (sx - x0, sy - y0);
    let (x0, y0) = (x0 as i32, y0 as i32);
    let c00 = ctx.back.clamped(x0, y0);
    let c10 = ctx.back.clamped(x0 + 1, y0);
    let c01 = ctx.back.clamped(x0, y0 + 1);
    let c11 = ctx.back.clamped(x0 + 1, y0 + 1);
    let mut out = [0.0; 4];
    for ch in 0..4 {
        let top = c00[ch] + (c10[ch] - c00[ch]) * fx;
        let bottom = c01[ch] + (c11[ch] - c01[ch]) * fx;
        out[ch] = top + (bottom - top) * fy;
    }
    out
}

fn flip(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let src = ctx.back.size();
    let sx = if ctx.flag(0) { src.width as i32 - 1 - x } else { x };
    let sy = if ctx.flag(1) { src.height as i32 - 1 - y } else { y };
    ctx.back.at(sx, sy)
}

// ============================================================================
// Merge and channels
// ============================================================================

fn merge(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let b = ctx.back.at(x, y);
    let f = ctx.front.at(x, y);
    let opacity = ctx.setting(1);

    let mut result = [0.0; 4];
    for ch in 0..3 {
        result[ch] = match ctx.index(0) {
            1 => b[ch] + f[ch],
            2 => b[ch] * f[ch],
            3 => b[ch] + f[ch] - b[ch] * f[ch],
            4 => b[ch] - f[ch],
            _ => f[ch] + b[ch] * (1.0 - f[3]),
        };
    }
    result[3] = f[3] + b[3] * (1.0 - f[3]);

    let mut out = [0.0; 4];
    for ch in 0..4 {
        out[ch] = b[ch] + (result[ch] - b[ch]) * opacity;
    }
    out
}

fn difference(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let b = ctx.back.at(x, y);
    let f = ctx.front.at(x, y);
    let gain = ctx.setting(0);
    [
        (b[0] - f[0]).abs() * gain,
        (b[1] - f[1]).abs() * gain,
        (b[2] - f[2]).abs() * gain,
        b[3].max(f[3]),
    ]
}

fn channel_copy(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let b = ctx.back.at(x, y);
    let f = ctx.front.at(x, y);
    let sources = [b[0], b[1], b[2], b[3], f[0], f[1], f[2], f[3]];
    std::array::from_fn(|ch| sources[ctx.index(ch).clamp(0, 7) as usize])
}

fn copy(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    ctx.back.at(x, y)
}

fn premultiply(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let c = ctx.back.at(x, y);
    [c[0] * c[3], c[1] * c[3], c[2] * c[3], c[3]]
}

fn unpremultiply(ctx: &PixelContext<'_>, x: i32, y: i32) -> [f32; 4] {
    let c = ctx.back.at(x, y);
    if c[3] > 0.0 {
        [c[0] / c[3], c[1] / c[3], c[2] / c[3], c[3]]
    } else {
        [0.0, 0.0, 0.0, c[3]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ctx<'a>(back: &'a [f32], size: ImageSize, settings: &'a [f32]) -> PixelContext<'a> {
        PixelContext {
            back: View::new(back, size),
            front: View::new(&[0.0; 4], ImageSize::new(1, 1)),
            settings,
            out_size: size,
        }
    }

    #[test]
    fn test_view_bounds() {
        let data = [1.0, 2.0, 3.0, 4.0];
        let view = View::new(&data, ImageSize::new(1, 1));
        assert_eq!(view.at(0, 0), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(view.at(1, 0), [0.0; 4]);
        assert_eq!(view.clamped(5, -3), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_box_blur_averages() {
        // 3x1: 0, 3, 6 in red
        let back = [0.0, 0.0, 0.0, 1.0, 3.0, 0.0, 0.0, 1.0, 6.0, 0.0, 0.0, 1.0];
        let settings = [1.0];
        let c = ctx(&back, ImageSize::new(3, 1), &settings);
        assert_relative_eq!(blur_h(&c, 1, 0)[0], 3.0);
        // edge clamps: (0 + 0 + 3) / 3
        assert_relative_eq!(blur_h(&c, 0, 0)[0], 1.0);
    }

    #[test]
    fn test_merge_over() {
        let back = [0.0, 0.0, 1.0, 1.0];
        let settings = [0.0, 1.0];
        let mut c = ctx(&back, ImageSize::new(1, 1), &settings);
        let front = [0.5, 0.0, 0.0, 0.5];
        c.front = View::new(&front, ImageSize::new(1, 1));
        let out = merge(&c, 0, 0);
        assert_relative_eq!(out[0], 0.5);
        assert_relative_eq!(out[2], 0.5);
        assert_relative_eq!(out[3], 1.0);
    }

    #[test]
    fn test_run_covers_every_pixel() {
        let size = ImageSize::new(5, 3);
        let back = vec![0.0; size.pixel_count() * 4];
        let settings = [0.25, 0.5, 0.75, 1.0];
        let c = ctx(&back, size, &settings);
        let mut out = vec![-1.0; size.pixel_count() * 4];
        run(&solid, &c, &mut out);
        assert!(out.chunks(4).all(|px| px == [0.25, 0.5, 0.75, 1.0]));
    }

    #[test]
    fn test_every_builtin_program_has_a_kernel() {
        for kind in cascade_core::builtin::builtin_kinds() {
            for program in &kind.programs {
                assert!(builtin(program.name()).is_some(), "no kernel for {program}");
            }
        }
    }
}
