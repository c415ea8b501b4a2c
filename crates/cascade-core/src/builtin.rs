//! Built-in node kinds.
//!
//! The table below is the bounded set of kinds every registry starts with.
//! Property order in each kind is the settings-buffer order its shader
//! reads; see [`crate::property`].
//!
//! | Kind | Inputs | Passes | Size |
//! |------|--------|--------|------|
//! | `read` | - | load | file |
//! | `write` | back | sink | back |
//! | `solid` | (back) | 1 | back or `size` |
//! | `color-correct`, `exposure`, `levels`, `monochrome`, `invert` | back | 1 | back |
//! | `blur`, `erode`, `dilate` | back | 2 | back |
//! | `sharpen`, `flip`, `premultiply`, `unpremultiply` | back | 1 | back |
//! | `crop` | back | 1 | back minus margins |
//! | `resize` | back | 1 | `size` |
//! | `merge`, `difference` | back, (front) | 1 | back |
//! | `channel-copy` | back, (alpha) | 1 | back |

use crate::kind::{
    Category, EvalPath, InputSpec, NodeKindDescriptor, OutputSlot, OutputTrait, ProgramRef, Readiness,
    SizeRule,
};
use crate::property::{Control, PropertySpec};

/// Kind id of the file-backed source.
pub const READ: &str = "read";
/// Kind id of the file sink.
pub const WRITE: &str = "write";

/// Color spaces understood by the Read and Write kinds, in choice order.
pub const COLOR_SPACES: [&str; 2] = ["linear", "srgb"];

/// Merge modes in choice order. The `merge` shader switches on the index.
pub const MERGE_MODES: [&str; 5] = ["over", "add", "multiply", "screen", "subtract"];

/// Channel sources for `channel-copy`, in choice order.
pub const CHANNEL_SOURCES: [&str; 8] = [
    "back.r", "back.g", "back.b", "back.a", "alpha.r", "alpha.g", "alpha.b", "alpha.a",
];

const MAX_DIM: u32 = 16384;

fn float(name: &str, default: f32, min: f32, max: f32) -> PropertySpec {
    PropertySpec::new(name, Control::Float { default, min, max })
}

fn int(name: &str, default: i32, min: i32, max: i32) -> PropertySpec {
    PropertySpec::new(name, Control::Int { default, min, max })
}

fn flag(name: &str, default: bool) -> PropertySpec {
    PropertySpec::new(name, Control::Bool { default })
}

fn choice(name: &str, default: usize, options: &[&str]) -> PropertySpec {
    PropertySpec::new(name, Control::choice(default, options))
}

fn text(name: &str, default: &str) -> PropertySpec {
    PropertySpec::new(name, Control::Text { default: default.to_string() })
}

/// All built-in kinds in menu order.
pub fn builtin_kinds() -> Vec<NodeKindDescriptor> {
    vec![
        read(),
        write(),
        solid(),
        // Color
        NodeKindDescriptor::filter("color-correct", "Color Correct", Category::Color, "color_correct")
            .with_properties(vec![
                PropertySpec::new("gain", Control::Color { default: [1.0; 4] }),
                float("gamma", 1.0, 0.1, 4.0),
                float("offset", 0.0, -1.0, 1.0),
                float("saturation", 1.0, 0.0, 4.0),
                float("contrast", 1.0, 0.0, 4.0),
            ]),
        NodeKindDescriptor::filter("exposure", "Exposure", Category::Color, "exposure")
            .with_properties(vec![float("stops", 0.0, -10.0, 10.0)]),
        NodeKindDescriptor::filter("levels", "Levels", Category::Color, "levels").with_properties(vec![
            float("in black", 0.0, 0.0, 1.0),
            float("in white", 1.0, 0.0, 1.0),
            float("gamma", 1.0, 0.1, 10.0),
            float("out black", 0.0, 0.0, 1.0),
            float("out white", 1.0, 0.0, 1.0),
        ]),
        NodeKindDescriptor::filter("monochrome", "Monochrome", Category::Color, "monochrome")
            .with_properties(vec![choice("method", 0, &["rec709", "average", "lightness"])]),
        NodeKindDescriptor::filter("invert", "Invert", Category::Color, "invert")
            .with_properties(vec![flag("invert alpha", false)]),
        // Filter
        NodeKindDescriptor::filter("blur", "Blur", Category::Filter, "blur_h")
            .with_passes(&["blur_h", "blur_v"], 2)
            .with_properties(vec![int("radius", 4, 0, 64)]),
        NodeKindDescriptor::filter("sharpen", "Sharpen", Category::Filter, "sharpen")
            .with_properties(vec![float("amount", 0.5, 0.0, 10.0)]),
        NodeKindDescriptor::filter("erode", "Erode", Category::Filter, "erode_h")
            .with_passes(&["erode_h", "erode_v"], 2)
            .with_properties(vec![int("radius", 1, 0, 32)]),
        NodeKindDescriptor::filter("dilate", "Dilate", Category::Filter, "dilate_h")
            .with_passes(&["dilate_h", "dilate_v"], 2)
            .with_properties(vec![int("radius", 1, 0, 32)]),
        // Transform
        NodeKindDescriptor::filter("crop", "Crop", Category::Transform, "crop")
            .with_properties(vec![
                int("left", 0, 0, MAX_DIM as i32),
                int("top", 0, 0, MAX_DIM as i32),
                int("right", 0, 0, MAX_DIM as i32),
                int("bottom", 0, 0, MAX_DIM as i32),
            ])
            .with_size_rule(SizeRule::CropMargins { first: 0 }),
        NodeKindDescriptor::filter("resize", "Resize", Category::Transform, "resize")
            .with_properties(vec![
                PropertySpec::new("size", Control::Size { default: [1920, 1080] }),
                choice("filter", 1, &["nearest", "bilinear"]),
            ])
            .with_size_rule(SizeRule::FromProperty { index: 0 }),
        NodeKindDescriptor::filter("flip", "Flip", Category::Transform, "flip")
            .with_properties(vec![flag("horizontal", true), flag("vertical", false)]),
        // Merge
        NodeKindDescriptor::filter("merge", "Merge", Category::Merge, "merge")
            .with_inputs(vec![InputSpec::back(), InputSpec::front()])
            .with_output_trait(OutputTrait::RenderUpstreamIfFrontDisconnected)
            .with_properties(vec![choice("mode", 0, &MERGE_MODES), float("opacity", 1.0, 0.0, 1.0)]),
        NodeKindDescriptor::filter("difference", "Difference", Category::Merge, "difference")
            .with_inputs(vec![InputSpec::back(), InputSpec::front()])
            .with_output_trait(OutputTrait::RenderUpstreamIfFrontDisconnected)
            .with_properties(vec![float("gain", 1.0, 0.0, 100.0)]),
        // Channel
        NodeKindDescriptor::filter("channel-copy", "Channel Copy", Category::Channel, "channel_copy")
            .with_inputs(vec![InputSpec::back(), InputSpec::alpha()])
            .with_output_trait(OutputTrait::RenderUpstreamIfFrontDisconnected)
            .with_properties(vec![
                choice("red", 0, &CHANNEL_SOURCES),
                choice("green", 1, &CHANNEL_SOURCES),
                choice("blue", 2, &CHANNEL_SOURCES),
                choice("alpha", 7, &CHANNEL_SOURCES),
            ]),
        NodeKindDescriptor::filter("premultiply", "Premultiply", Category::Channel, "premultiply"),
        NodeKindDescriptor::filter("unpremultiply", "Unpremultiply", Category::Channel, "unpremultiply"),
    ]
}

fn read() -> NodeKindDescriptor {
    NodeKindDescriptor {
        id: READ.to_string(),
        title: "Read".to_string(),
        category: Category::Io,
        inputs: Vec::new(),
        output: OutputSlot::Rgb,
        output_trait: OutputTrait::RenderUpstreamOrClear,
        programs: Vec::new(),
        pass_count: 1,
        properties: vec![
            PropertySpec::new("files", Control::Files),
            choice("colorspace", 1, &COLOR_SPACES),
        ],
        eval: EvalPath::LoadImage,
        readiness: Readiness::NeedsFiles { index: 0 },
        size_rule: SizeRule::FromSource,
    }
}

fn write() -> NodeKindDescriptor {
    NodeKindDescriptor {
        id: WRITE.to_string(),
        title: "Write".to_string(),
        category: Category::Io,
        inputs: vec![InputSpec::back()],
        output: OutputSlot::None,
        output_trait: OutputTrait::RenderUpstreamOrClear,
        programs: Vec::new(),
        pass_count: 1,
        properties: vec![
            text("folder", "."),
            text("filename", "output"),
            choice("format", 0, &["png"]),
            choice("colorspace", 1, &COLOR_SPACES),
        ],
        eval: EvalPath::Sink,
        readiness: Readiness::ConnectedInputs,
        size_rule: SizeRule::SameAsBack,
    }
}

fn solid() -> NodeKindDescriptor {
    NodeKindDescriptor {
        id: "solid".to_string(),
        title: "Solid".to_string(),
        category: Category::Generate,
        inputs: vec![InputSpec::optional_back()],
        output: OutputSlot::Rgb,
        output_trait: OutputTrait::RenderUpstreamOrClear,
        programs: vec![ProgramRef::builtin("solid")],
        pass_count: 1,
        properties: vec![
            PropertySpec::new("color", Control::Color { default: [0.0, 0.0, 0.0, 1.0] }),
            PropertySpec::new("size", Control::Size { default: [1920, 1080] }),
        ],
        eval: EvalPath::Compute,
        readiness: Readiness::ConnectedInputs,
        size_rule: SizeRule::BackOrProperty { index: 1 },
    }
}

/// Property indices of the Write kind.
pub mod write_props {
    /// Output folder.
    pub const FOLDER: usize = 0;
    /// File name without extension.
    pub const FILENAME: usize = 1;
    /// Format choice.
    pub const FORMAT: usize = 2;
    /// Color space choice.
    pub const COLORSPACE: usize = 3;
}

/// Property indices of the Read kind.
pub mod read_props {
    /// Frame list.
    pub const FILES: usize = 0;
    /// Color space choice.
    pub const COLORSPACE: usize = 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtins_are_consistent() {
        let kinds = builtin_kinds();
        let mut seen = HashSet::new();
        for kind in &kinds {
            assert!(seen.insert(kind.id.clone()), "duplicate kind {}", kind.id);
            kind.check().unwrap_or_else(|e| panic!("{}: {e}", kind.id));
        }
        assert_eq!(kinds.len(), 20);
    }

    #[test]
    fn test_multipass_kinds() {
        let kinds = builtin_kinds();
        for id in ["blur", "erode", "dilate"] {
            let kind = kinds.iter().find(|k| k.id == id).unwrap();
            assert_eq!(kind.pass_count, 2);
            assert_ne!(kind.program_for_pass(0), kind.program_for_pass(1));
        }
    }

    #[test]
    fn test_color_correct_slot_layout() {
        let kinds = builtin_kinds();
        let cc = kinds.iter().find(|k| k.id == "color-correct").unwrap();
        assert_eq!(cc.settings_len(), 8);
        assert_eq!(crate::property::slot_offset(&cc.properties, 1), 4);
    }
}
