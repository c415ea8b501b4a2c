//! WGSL shader sources for GPU compute pipelines.
//!
//! Every program shares one binding layout:
//!
//! ```text
//! @binding(0) back_tex  texture_2d<f32>                     (ShaderRead)
//! @binding(1) front_tex texture_2d<f32>                     (ShaderRead)
//! @binding(2) out_tex   texture_storage_2d<rgba32float, write> (General)
//! @binding(3) settings  uniform array<vec4<f32>, 16>        (64 f32 slots)
//! ```
//!
//! A program body only defines `fn shade(p: vec2<i32>) -> vec4<f32>`; the
//! prelude and the bounds-checked `main` entry are added by
//! [`ShaderCatalog::source`].

#![cfg_attr(not(feature = "wgpu"), allow(dead_code))]

use std::borrow::Cow;
use std::collections::HashMap;

use cascade_core::NodeKindDescriptor;

use crate::{ComputeError, ComputeResult};

/// Workgroup edge length; dispatch grids are `ceil(size / WORKGROUP_SIZE)`.
pub const WORKGROUP_SIZE: u32 = 16;

/// Bindings and helpers shared by every program.
pub const PRELUDE: &str = r#"
@group(0) @binding(0) var back_tex: texture_2d<f32>;
@group(0) @binding(1) var front_tex: texture_2d<f32>;
@group(0) @binding(2) var out_tex: texture_storage_2d<rgba32float, write>;
@group(0) @binding(3) var<uniform> settings: array<vec4<f32>, 16>;

const LUMA = vec3<f32>(0.2126, 0.7152, 0.0722);

fn setting(i: u32) -> f32 {
    return settings[i / 4u][i % 4u];
}

fn idx(i: u32) -> i32 {
    return i32(floor(setting(i) + 0.5));
}

fn flag(i: u32) -> bool {
    return setting(i) > 0.5;
}

fn back_size() -> vec2<i32> {
    return vec2<i32>(textureDimensions(back_tex));
}

fn front_size() -> vec2<i32> {
    return vec2<i32>(textureDimensions(front_tex));
}

fn out_size() -> vec2<i32> {
    return vec2<i32>(textureDimensions(out_tex));
}

fn back_at(p: vec2<i32>) -> vec4<f32> {
    if (any(p < vec2<i32>(0)) || any(p >= back_size())) {
        return vec4<f32>(0.0);
    }
    return textureLoad(back_tex, p, 0);
}

fn back_clamped(p: vec2<i32>) -> vec4<f32> {
    return textureLoad(back_tex, clamp(p, vec2<i32>(0), back_size() - vec2<i32>(1)), 0);
}

fn front_at(p: vec2<i32>) -> vec4<f32> {
    if (any(p < vec2<i32>(0)) || any(p >= front_size())) {
        return vec4<f32>(0.0);
    }
    return textureLoad(front_tex, p, 0);
}
"#;

/// Entry point; skips invocations outside the output.
pub const MAIN: &str = r#"
@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let p = vec2<i32>(id.xy);
    if (any(p >= out_size())) {
        return;
    }
    textureStore(out_tex, p, shade(p));
}
"#;

// ============================================================================
// Generators and color
// ============================================================================

/// Fills with the color in slots 0..4.
pub const SOLID: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    return vec4<f32>(setting(0u), setting(1u), setting(2u), setting(3u));
}
"#;

/// Gain, gamma, offset, saturation, contrast.
pub const COLOR_CORRECT: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let c = back_at(p);
    let gain = vec4<f32>(setting(0u), setting(1u), setting(2u), setting(3u));
    var rgb = c.rgb * gain.rgb + vec3<f32>(setting(5u));
    rgb = pow(max(rgb, vec3<f32>(0.0)), vec3<f32>(1.0 / setting(4u)));
    let l = dot(rgb, LUMA);
    rgb = vec3<f32>(l) + (rgb - vec3<f32>(l)) * setting(6u);
    rgb = (rgb - vec3<f32>(0.5)) * setting(7u) + vec3<f32>(0.5);
    return vec4<f32>(rgb, c.a * gain.a);
}
"#;

/// Exposure in stops.
pub const EXPOSURE: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let c = back_at(p);
    return vec4<f32>(c.rgb * exp2(setting(0u)), c.a);
}
"#;

/// Input/output levels with gamma.
pub const LEVELS: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let c = back_at(p);
    let in_black = setting(0u);
    let range = max(setting(1u) - in_black, 1e-6);
    let out_black = setting(3u);
    let out_white = setting(4u);
    var t = clamp((c.rgb - vec3<f32>(in_black)) / range, vec3<f32>(0.0), vec3<f32>(1.0));
    t = pow(t, vec3<f32>(1.0 / setting(2u)));
    return vec4<f32>(vec3<f32>(out_black) + (out_white - out_black) * t, c.a);
}
"#;

/// Grayscale by Rec.709 luma, average or lightness.
pub const MONOCHROME: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let c = back_at(p);
    var v = dot(c.rgb, LUMA);
    let method = idx(0u);
    if (method == 1) {
        v = (c.r + c.g + c.b) / 3.0;
    } else if (method == 2) {
        v = (max(max(c.r, c.g), c.b) + min(min(c.r, c.g), c.b)) * 0.5;
    }
    return vec4<f32>(vec3<f32>(v), c.a);
}
"#;

/// Inverts color, optionally alpha.
pub const INVERT: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let c = back_at(p);
    var a = c.a;
    if (flag(0u)) {
        a = 1.0 - c.a;
    }
    return vec4<f32>(vec3<f32>(1.0) - c.rgb, a);
}
"#;

// ============================================================================
// Filters
// ============================================================================

const BOX_BLUR: &str = r#"
fn box_blur(p: vec2<i32>, d: vec2<i32>) -> vec4<f32> {
    let r = max(idx(0u), 0);
    var sum = vec4<f32>(0.0);
    for (var i = -r; i <= r; i = i + 1) {
        sum = sum + back_clamped(p + d * i);
    }
    return sum / f32(2 * r + 1);
}
"#;

const MORPH: &str = r#"
fn morph(p: vec2<i32>, d: vec2<i32>, take_max: bool) -> vec4<f32> {
    let r = max(idx(0u), 0);
    var acc = back_clamped(p);
    for (var i = -r; i <= r; i = i + 1) {
        let c = back_clamped(p + d * i);
        if (take_max) {
            acc = max(acc, c);
        } else {
            acc = min(acc, c);
        }
    }
    return acc;
}
"#;

/// Unsharp mask against a 3x3 box.
pub const SHARPEN: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let c = back_clamped(p);
    var blur = vec3<f32>(0.0);
    for (var j = -1; j <= 1; j = j + 1) {
        for (var i = -1; i <= 1; i = i + 1) {
            blur = blur + back_clamped(p + vec2<i32>(i, j)).rgb / 9.0;
        }
    }
    return vec4<f32>(c.rgb + setting(0u) * (c.rgb - blur), c.a);
}
"#;

// ============================================================================
// Transforms
// ============================================================================

/// Offsets by the left/top margins.
pub const CROP: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    return back_at(p + vec2<i32>(idx(0u), idx(1u)));
}
"#;

/// Nearest or bilinear resample to the output size.
pub const RESIZE: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let src = vec2<f32>(back_size());
    let dst = vec2<f32>(out_size());
    let s = (vec2<f32>(p) + vec2<f32>(0.5)) * src / dst - vec2<f32>(0.5);
    if (idx(2u) == 0) {
        return back_clamped(vec2<i32>(floor(s + vec2<f32>(0.5))));
    }
    let base = floor(s);
    let f = s - base;
    let b = vec2<i32>(base);
    let top = mix(back_clamped(b), back_clamped(b + vec2<i32>(1, 0)), f.x);
    let bottom = mix(back_clamped(b + vec2<i32>(0, 1)), back_clamped(b + vec2<i32>(1, 1)), f.x);
    return mix(top, bottom, f.y);
}
"#;

/// Mirrors horizontally and/or vertically.
pub const FLIP: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let size = back_size();
    var s = p;
    if (flag(0u)) {
        s.x = size.x - 1 - p.x;
    }
    if (flag(1u)) {
        s.y = size.y - 1 - p.y;
    }
    return back_at(s);
}
"#;

// ============================================================================
// Merge and channels
// ============================================================================

/// Composites Front over Back with a blend mode and opacity.
pub const MERGE: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let b = back_at(p);
    let f = front_at(p);
    var rgb = f.rgb + b.rgb * (1.0 - f.a);
    let mode = idx(0u);
    if (mode == 1) {
        rgb = b.rgb + f.rgb;
    } else if (mode == 2) {
        rgb = b.rgb * f.rgb;
    } else if (mode == 3) {
        rgb = b.rgb + f.rgb - b.rgb * f.rgb;
    } else if (mode == 4) {
        rgb = b.rgb - f.rgb;
    }
    let result = vec4<f32>(rgb, f.a + b.a * (1.0 - f.a));
    return b + (result - b) * setting(1u);
}
"#;

/// Absolute difference of Back and Front.
pub const DIFFERENCE: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let b = back_at(p);
    let f = front_at(p);
    return vec4<f32>(abs(b.rgb - f.rgb) * setting(0u), max(b.a, f.a));
}
"#;

/// Picks each output channel from the eight Back/Alpha-input channels.
pub const CHANNEL_COPY: &str = r#"
fn pick(b: vec4<f32>, f: vec4<f32>, slot: u32) -> f32 {
    let i = clamp(idx(slot), 0, 7);
    if (i < 4) {
        return b[i];
    }
    return f[i - 4];
}

fn shade(p: vec2<i32>) -> vec4<f32> {
    let b = back_at(p);
    let f = front_at(p);
    return vec4<f32>(pick(b, f, 0u), pick(b, f, 1u), pick(b, f, 2u), pick(b, f, 3u));
}
"#;

/// Back unchanged; stands in for kinds that pass their Back through.
pub const COPY: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    return back_at(p);
}
"#;

pub const PREMULTIPLY: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let c = back_at(p);
    return vec4<f32>(c.rgb * c.a, c.a);
}
"#;

pub const UNPREMULTIPLY: &str = r#"
fn shade(p: vec2<i32>) -> vec4<f32> {
    let c = back_at(p);
    if (c.a > 0.0) {
        return vec4<f32>(c.rgb / c.a, c.a);
    }
    return vec4<f32>(0.0, 0.0, 0.0, c.a);
}
"#;

fn builtin_bodies() -> Vec<(&'static str, String)> {
    let blur = |axis: &str| format!("{BOX_BLUR}\nfn shade(p: vec2<i32>) -> vec4<f32> {{\n    return box_blur(p, {axis});\n}}\n");
    let morph = |axis: &str, take_max: bool| {
        format!("{MORPH}\nfn shade(p: vec2<i32>) -> vec4<f32> {{\n    return morph(p, {axis}, {take_max});\n}}\n")
    };
    const H: &str = "vec2<i32>(1, 0)";
    const V: &str = "vec2<i32>(0, 1)";

    vec![
        ("solid", SOLID.to_string()),
        ("color_correct", COLOR_CORRECT.to_string()),
        ("exposure", EXPOSURE.to_string()),
        ("levels", LEVELS.to_string()),
        ("monochrome", MONOCHROME.to_string()),
        ("invert", INVERT.to_string()),
        ("blur_h", blur(H)),
        ("blur_v", blur(V)),
        ("sharpen", SHARPEN.to_string()),
        ("erode_h", morph(H, false)),
        ("erode_v", morph(V, false)),
        ("dilate_h", morph(H, true)),
        ("dilate_v", morph(V, true)),
        ("crop", CROP.to_string()),
        ("resize", RESIZE.to_string()),
        ("flip", FLIP.to_string()),
        ("merge", MERGE.to_string()),
        ("difference", DIFFERENCE.to_string()),
        ("channel_copy", CHANNEL_COPY.to_string()),
        ("copy", COPY.to_string()),
        ("premultiply", PREMULTIPLY.to_string()),
        ("unpremultiply", UNPREMULTIPLY.to_string()),
    ]
}

/// Program name to WGSL body.
#[derive(Debug, Clone, Default)]
pub struct ShaderCatalog {
    bodies: HashMap<String, Cow<'static, str>>,
}

impl ShaderCatalog {
    /// Empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalogue holding every built-in program.
    pub fn builtin() -> Self {
        let bodies = builtin_bodies()
            .into_iter()
            .map(|(name, body)| (name.to_string(), Cow::Owned(body)))
            .collect();
        Self { bodies }
    }

    /// Adds an externally defined program.
    ///
    /// The body must define `fn shade(p: vec2<i32>) -> vec4<f32>` and may use
    /// the prelude helpers. Existing names cannot be replaced.
    pub fn register(&mut self, name: impl Into<String>, body: impl Into<Cow<'static, str>>) -> ComputeResult<()> {
        let name = name.into();
        let body = body.into();
        if self.bodies.contains_key(&name) {
            return Err(ComputeError::ShaderCompilation { program: name, reason: "program already defined".into() });
        }
        if !body.contains("fn shade(") {
            return Err(ComputeError::ShaderCompilation { program: name, reason: "missing `fn shade`".into() });
        }
        self.bodies.insert(name, body);
        Ok(())
    }

    /// Returns `true` if `name` is known.
    pub fn contains(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }

    /// Number of programs.
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Returns `true` if the catalogue is empty.
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Complete WGSL module for `name`.
    pub fn source(&self, name: &str) -> ComputeResult<String> {
        let body = self.bodies.get(name).ok_or_else(|| ComputeError::UnknownProgram(name.to_string()))?;
        Ok(format!("{PRELUDE}\n{body}\n{MAIN}"))
    }

    /// Checks that every program of a compute kind is present.
    pub fn check_kind(&self, descriptor: &NodeKindDescriptor) -> ComputeResult<()> {
        match descriptor.programs.iter().find(|p| !self.contains(p.name())) {
            Some(missing) => Err(ComputeError::UnknownProgram(missing.to_string())),
            None => Ok(()),
        }
    }
}
