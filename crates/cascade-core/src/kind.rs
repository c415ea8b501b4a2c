//! Node kind descriptors.
//!
//! A [`NodeKindDescriptor`] is the immutable capability record for one kind
//! of node: its slots and their traits, its shader programs and pass count,
//! its UI-control schema, and the small per-kind rules (readiness, output
//! size, evaluation path) that replace per-kind virtual overrides.

use std::borrow::Cow;
use std::fmt;

use crate::property::{PropertySpec, PropertyValue};

/// Identifier of a node kind, e.g. `"blur"`.
pub type KindId = String;

/// Logical kind of an input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Primary RGB input (connector "Back").
    BackRgb,
    /// Secondary RGB input (connector "Front").
    FrontRgb,
    /// Alpha/mask input; shares the Front connector.
    Alpha,
}

/// Physical input connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputSlot {
    /// Input index 0.
    Back,
    /// Input index 1.
    Front,
}

impl InputSlot {
    /// Both slots in traversal order.
    pub const ALL: [InputSlot; 2] = [InputSlot::Back, InputSlot::Front];

    /// Positional index of the connector.
    pub fn index(self) -> usize {
        match self {
            Self::Back => 0,
            Self::Front => 1,
        }
    }

    /// Slot for a positional index.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Back),
            1 => Some(Self::Front),
            _ => None,
        }
    }
}

impl fmt::Display for InputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Back => f.write_str("back"),
            Self::Front => f.write_str("front"),
        }
    }
}

impl SlotKind {
    /// Connector this logical kind is attached to.
    pub fn connector(self) -> InputSlot {
        match self {
            Self::BackRgb => InputSlot::Back,
            Self::FrontRgb | Self::Alpha => InputSlot::Front,
        }
    }
}

/// What an input slot needs when the node is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClearingTrait {
    /// Optional: when unconnected, a cleared (transparent black) image is
    /// bound in its place.
    AlwaysClear,
    /// Required: the node cannot be rendered while this slot is unconnected.
    RenderUpstreamOrClear,
}

/// How the node's output is produced when it is the display target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputTrait {
    /// The node renders itself (or the viewer clears if it cannot).
    RenderUpstreamOrClear,
    /// With the Front input unconnected the node shows its Back upstream
    /// unchanged instead of being evaluated.
    RenderUpstreamIfFrontDisconnected,
}

/// Output connector kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSlot {
    /// One RGBA output.
    Rgb,
    /// Sink node without output.
    None,
}

/// Category shown in the "add node" menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Read/Write.
    Io,
    /// Generators.
    Generate,
    /// Color operations.
    Color,
    /// Spatial filters.
    Filter,
    /// Geometry changes.
    Transform,
    /// Two-input operations.
    Merge,
    /// Channel operations.
    Channel,
    /// Externally defined effects.
    Custom,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Io => "io",
            Self::Generate => "generate",
            Self::Color => "color",
            Self::Filter => "filter",
            Self::Transform => "transform",
            Self::Merge => "merge",
            Self::Channel => "channel",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Name of a shader program in the shader catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramRef(Cow<'static, str>);

impl ProgramRef {
    /// Reference to a built-in program.
    pub const fn builtin(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Reference to a dynamically registered program.
    pub fn custom(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Program name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgramRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a node of this kind produces its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalPath {
    /// Compute dispatch of the kind's programs.
    Compute,
    /// Decode a file from disk into a device image.
    LoadImage,
    /// No image of its own; shows its Back upstream.
    Sink,
}

/// When a node is ready to render, beyond its connected inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Readiness {
    /// Required inputs connected (and renderable).
    ConnectedInputs,
    /// Property `index` must hold a non-empty file list.
    NeedsFiles { index: usize },
}

/// How the output size is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeRule {
    /// Same as the Back input image.
    SameAsBack,
    /// Determined by the decoded file.
    FromSource,
    /// Back size minus the margins stored in properties
    /// `left, top, right, bottom` starting at `first`.
    CropMargins { first: usize },
    /// Size property at `index`.
    FromProperty { index: usize },
    /// Back size when connected, else the size property at `index`.
    BackOrProperty { index: usize },
}

/// Immutable, process-wide description of a node kind.
#[derive(Debug, Clone)]
pub struct NodeKindDescriptor {
    /// Kind id, e.g. `"blur"`.
    pub id: KindId,
    /// Display title.
    pub title: String,
    /// Menu category.
    pub category: Category,
    /// Input slots in connector order (Back first).
    pub inputs: Vec<InputSpec>,
    /// Output connector.
    pub output: OutputSlot,
    /// Display behaviour of the output.
    pub output_trait: OutputTrait,
    /// Programs, used round-robin across passes.
    pub programs: Vec<ProgramRef>,
    /// Number of dispatches per evaluation (>= 1).
    pub pass_count: u32,
    /// UI-control schema in declaration order.
    pub properties: Vec<PropertySpec>,
    /// Evaluation path.
    pub eval: EvalPath,
    /// Extra readiness condition.
    pub readiness: Readiness,
    /// Output size rule.
    pub size_rule: SizeRule,
}

/// One declared input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSpec {
    /// Logical kind.
    pub kind: SlotKind,
    /// Requirement when unconnected.
    pub clearing: ClearingTrait,
}

impl InputSpec {
    /// Required Back input.
    pub const fn back() -> Self {
        Self { kind: SlotKind::BackRgb, clearing: ClearingTrait::RenderUpstreamOrClear }
    }

    /// Optional Back input (generators).
    pub const fn optional_back() -> Self {
        Self { kind: SlotKind::BackRgb, clearing: ClearingTrait::AlwaysClear }
    }

    /// Optional Front input.
    pub const fn front() -> Self {
        Self { kind: SlotKind::FrontRgb, clearing: ClearingTrait::AlwaysClear }
    }

    /// Optional Alpha input on the Front connector.
    pub const fn alpha() -> Self {
        Self { kind: SlotKind::Alpha, clearing: ClearingTrait::AlwaysClear }
    }
}

impl NodeKindDescriptor {
    /// Starts a compute kind with one required Back input and one RGB output.
    pub fn filter(id: &str, title: &str, category: Category, program: &'static str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            category,
            inputs: vec![InputSpec::back()],
            output: OutputSlot::Rgb,
            output_trait: OutputTrait::RenderUpstreamOrClear,
            programs: vec![ProgramRef::builtin(program)],
            pass_count: 1,
            properties: Vec::new(),
            eval: EvalPath::Compute,
            readiness: Readiness::ConnectedInputs,
            size_rule: SizeRule::SameAsBack,
        }
    }

    /// Kind backed by an externally defined shader effect.
    pub fn custom(id: impl Into<String>, title: impl Into<String>, program: ProgramRef, properties: Vec<PropertySpec>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            category: Category::Custom,
            inputs: vec![InputSpec::back(), InputSpec::front()],
            output: OutputSlot::Rgb,
            output_trait: OutputTrait::RenderUpstreamOrClear,
            programs: vec![program],
            pass_count: 1,
            properties,
            eval: EvalPath::Compute,
            readiness: Readiness::ConnectedInputs,
            size_rule: SizeRule::SameAsBack,
        }
    }

    /// Replaces the input slots.
    pub fn with_inputs(mut self, inputs: Vec<InputSpec>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Replaces the UI-control schema.
    pub fn with_properties(mut self, properties: Vec<PropertySpec>) -> Self {
        self.properties = properties;
        self
    }

    /// Uses several programs over `pass_count` passes.
    pub fn with_passes(mut self, programs: &[&'static str], pass_count: u32) -> Self {
        self.programs = programs.iter().map(|p| ProgramRef::builtin(p)).collect();
        self.pass_count = pass_count;
        self
    }

    /// Sets the output trait.
    pub fn with_output_trait(mut self, output_trait: OutputTrait) -> Self {
        self.output_trait = output_trait;
        self
    }

    /// Sets the size rule.
    pub fn with_size_rule(mut self, size_rule: SizeRule) -> Self {
        self.size_rule = size_rule;
        self
    }

    /// Number of input connectors a node of this kind gets.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Whether the kind has an output connector.
    pub fn has_output(&self) -> bool {
        self.output == OutputSlot::Rgb
    }

    /// Declared input on `slot`, if any.
    pub fn input(&self, slot: InputSlot) -> Option<&InputSpec> {
        self.inputs.get(slot.index())
    }

    /// Whether `slot` must be connected for the node to render.
    pub fn requires(&self, slot: InputSlot) -> bool {
        self.input(slot)
            .is_some_and(|spec| spec.clearing == ClearingTrait::RenderUpstreamOrClear)
    }

    /// Program for pass `pass` (round-robin over `programs`).
    pub fn program_for_pass(&self, pass: u32) -> Option<&ProgramRef> {
        if self.programs.is_empty() {
            return None;
        }
        self.programs.get(pass as usize % self.programs.len())
    }

    /// Default property values in declaration order.
    pub fn default_properties(&self) -> Vec<PropertyValue> {
        self.properties.iter().map(|p| p.control.default_value()).collect()
    }

    /// Total settings slots of this kind's properties.
    pub fn settings_len(&self) -> usize {
        self.properties.iter().map(|p| p.control.slot_count()).sum()
    }

    /// Checks the descriptor's internal consistency.
    pub fn check(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("empty kind id".into());
        }
        if self.inputs.len() > 2 {
            return Err(format!("{} inputs declared, at most 2 connectors exist", self.inputs.len()));
        }
        for (index, input) in self.inputs.iter().enumerate() {
            if input.kind.connector().index() != index {
                return Err(format!("{:?} input declared at connector {index}", input.kind));
            }
        }
        if self.pass_count == 0 {
            return Err("pass count must be at least 1".into());
        }
        match self.eval {
            EvalPath::Compute if self.programs.is_empty() => {
                return Err("compute kind without programs".into());
            }
            EvalPath::Compute | EvalPath::LoadImage if !self.has_output() => {
                return Err("kind producing an image must have an output".into());
            }
            EvalPath::Sink if self.input(InputSlot::Back).is_none() => {
                return Err("sink kind needs a Back input to display".into());
            }
            _ => {}
        }
        if self.output_trait == OutputTrait::RenderUpstreamIfFrontDisconnected
            && (self.input(InputSlot::Back).is_none() || self.input(InputSlot::Front).is_none())
        {
            return Err("front-disconnected passthrough needs both Back and Front inputs".into());
        }
        let property_index_ok = |index: usize| index < self.properties.len();
        let rule_ok = match self.size_rule {
            SizeRule::CropMargins { first } => first + 3 < self.properties.len(),
            SizeRule::FromProperty { index } | SizeRule::BackOrProperty { index } => property_index_ok(index),
            SizeRule::SameAsBack => self.input(InputSlot::Back).is_some(),
            SizeRule::FromSource => self.eval == EvalPath::LoadImage,
        };
        if !rule_ok {
            return Err(format!("size rule {:?} does not fit the declared properties/inputs", self.size_rule));
        }
        if let Readiness::NeedsFiles { index } = self.readiness {
            if !property_index_ok(index) {
                return Err(format!("readiness refers to missing property {index}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Control;

    #[test]
    fn test_program_round_robin() {
        let desc = NodeKindDescriptor::filter("blur", "Blur", Category::Filter, "blur_h")
            .with_passes(&["blur_h", "blur_v"], 2);
        assert_eq!(desc.program_for_pass(0).unwrap().name(), "blur_h");
        assert_eq!(desc.program_for_pass(1).unwrap().name(), "blur_v");
        assert_eq!(desc.program_for_pass(2).unwrap().name(), "blur_h");
    }

    #[test]
    fn test_check_rejects_bad_layout() {
        let desc = NodeKindDescriptor::filter("x", "X", Category::Filter, "x")
            .with_inputs(vec![InputSpec::front()]);
        assert!(desc.check().is_err());

        let mut desc = NodeKindDescriptor::filter("x", "X", Category::Filter, "x");
        desc.pass_count = 0;
        assert!(desc.check().is_err());

        let desc = NodeKindDescriptor::filter("x", "X", Category::Filter, "x")
            .with_output_trait(OutputTrait::RenderUpstreamIfFrontDisconnected);
        assert!(desc.check().is_err());
    }

    #[test]
    fn test_settings_len() {
        let desc = NodeKindDescriptor::filter("cc", "CC", Category::Color, "cc").with_properties(vec![
            PropertySpec::new("gain", Control::Color { default: [1.0; 4] }),
            PropertySpec::new("gamma", Control::Float { default: 1.0, min: 0.1, max: 4.0 }),
        ]);
        assert_eq!(desc.settings_len(), 5);
        assert!(desc.requires(InputSlot::Back));
        assert!(!desc.requires(InputSlot::Front));
    }
}
