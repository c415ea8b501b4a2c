//! Node properties: the UI-control schema and typed values.
//!
//! A kind declares an ordered list of [`PropertySpec`]s. A node stores one
//! [`PropertyValue`] per spec, in the same order. That order is load-bearing
//! twice over:
//!
//! - the persisted document keys properties by position, and
//! - the settings buffer uploaded to the shader is the concatenation of each
//!   value's float slots in declaration order. Reordering controls without
//!   touching the shader breaks parameter binding silently.
//!
//! # Slot layout
//!
//! | Control | Slots |
//! |---------|-------|
//! | `Float`, `Int`, `Choice`, `Bool` | 1 |
//! | `Size` | 2 (width, height) |
//! | `Color` | 4 (R, G, B, A) |
//! | `Files`, `Text` | 0 |

use std::fmt;

/// One UI control of a node kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    /// Display label.
    pub name: String,
    /// Control type, range and default.
    pub control: Control,
}

impl PropertySpec {
    /// Creates a spec.
    pub fn new(name: impl Into<String>, control: Control) -> Self {
        Self { name: name.into(), control }
    }
}

/// Control type with its default and range.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    /// Slider over a float range.
    Float { default: f32, min: f32, max: f32 },
    /// Slider over an integer range.
    Int { default: i32, min: i32, max: i32 },
    /// Checkbox.
    Bool { default: bool },
    /// Drop-down; the value is an index into `options`.
    Choice { default: usize, options: Vec<String> },
    /// RGBA color picker.
    Color { default: [f32; 4] },
    /// Width/height pair.
    Size { default: [u32; 2] },
    /// Ordered list of file paths (one per frame).
    Files,
    /// Free text (folder, file name).
    Text { default: String },
}

impl Control {
    /// Builds a choice control from string literals.
    pub fn choice(default: usize, options: &[&str]) -> Self {
        Self::Choice {
            default,
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Default value of this control.
    pub fn default_value(&self) -> PropertyValue {
        match self {
            Self::Float { default, .. } => PropertyValue::Float(*default),
            Self::Int { default, .. } => PropertyValue::Int(*default),
            Self::Bool { default } => PropertyValue::Bool(*default),
            Self::Choice { default, .. } => PropertyValue::Choice(*default),
            Self::Color { default } => PropertyValue::Color(*default),
            Self::Size { default } => PropertyValue::Size(*default),
            Self::Files => PropertyValue::Files(Vec::new()),
            Self::Text { default } => PropertyValue::Text(default.clone()),
        }
    }

    /// Number of settings-buffer slots a value of this control occupies.
    pub fn slot_count(&self) -> usize {
        match self {
            Self::Float { .. } | Self::Int { .. } | Self::Bool { .. } | Self::Choice { .. } => 1,
            Self::Size { .. } => 2,
            Self::Color { .. } => 4,
            Self::Files | Self::Text { .. } => 0,
        }
    }

    /// Checks that `value` has the right variant and lies within range.
    pub fn validate(&self, value: &PropertyValue) -> Result<(), String> {
        match (self, value) {
            (Self::Float { min, max, .. }, PropertyValue::Float(v)) => {
                if !v.is_finite() {
                    Err(format!("{v} is not finite"))
                } else if v < min || v > max {
                    Err(format!("{v} outside [{min}, {max}]"))
                } else {
                    Ok(())
                }
            }
            (Self::Int { min, max, .. }, PropertyValue::Int(v)) => {
                if v < min || v > max {
                    Err(format!("{v} outside [{min}, {max}]"))
                } else {
                    Ok(())
                }
            }
            (Self::Bool { .. }, PropertyValue::Bool(_)) => Ok(()),
            (Self::Choice { options, .. }, PropertyValue::Choice(i)) => {
                if *i < options.len() {
                    Ok(())
                } else {
                    Err(format!("choice {i} out of {} options", options.len()))
                }
            }
            (Self::Color { .. }, PropertyValue::Color(c)) => {
                if c.iter().all(|v| v.is_finite()) {
                    Ok(())
                } else {
                    Err("color has non-finite component".into())
                }
            }
            (Self::Size { .. }, PropertyValue::Size(s)) => {
                if s[0] == 0 || s[1] == 0 {
                    Err(format!("size {}x{} is empty", s[0], s[1]))
                } else {
                    Ok(())
                }
            }
            (Self::Files, PropertyValue::Files(_)) => Ok(()),
            (Self::Text { .. }, PropertyValue::Text(_)) => Ok(()),
            (control, value) => Err(format!("{} value given to {} control", value.type_name(), control.type_name())),
        }
    }

    /// Parses the persisted string form of a value of this control.
    pub fn decode(&self, s: &str) -> Result<PropertyValue, String> {
        let value = match self {
            Self::Float { .. } => PropertyValue::Float(parse_f32(s)?),
            Self::Int { .. } => PropertyValue::Int(s.trim().parse().map_err(|e| format!("'{s}': {e}"))?),
            Self::Bool { .. } => PropertyValue::Bool(match s.trim() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => return Err(format!("'{other}' is not a bool")),
            }),
            Self::Choice { .. } => PropertyValue::Choice(s.trim().parse().map_err(|e| format!("'{s}': {e}"))?),
            Self::Color { .. } => {
                let parts = split_floats(s)?;
                match parts.as_slice() {
                    [r, g, b] => PropertyValue::Color([*r, *g, *b, 1.0]),
                    [r, g, b, a] => PropertyValue::Color([*r, *g, *b, *a]),
                    _ => return Err(format!("'{s}' is not a color")),
                }
            }
            Self::Size { .. } => {
                let parts: Vec<&str> = s.split(',').collect();
                match parts.as_slice() {
                    [w, h] => PropertyValue::Size([
                        w.trim().parse().map_err(|e| format!("'{s}': {e}"))?,
                        h.trim().parse().map_err(|e| format!("'{s}': {e}"))?,
                    ]),
                    _ => return Err(format!("'{s}' is not a size")),
                }
            }
            Self::Files => PropertyValue::Files(
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            Self::Text { .. } => PropertyValue::Text(s.to_string()),
        };
        self.validate(&value)?;
        Ok(value)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Float { .. } => "float",
            Self::Int { .. } => "int",
            Self::Bool { .. } => "bool",
            Self::Choice { .. } => "choice",
            Self::Color { .. } => "color",
            Self::Size { .. } => "size",
            Self::Files => "files",
            Self::Text { .. } => "text",
        }
    }
}

/// Current value of one control.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Float slider value.
    Float(f32),
    /// Integer slider value.
    Int(i32),
    /// Checkbox state.
    Bool(bool),
    /// Index of the selected option.
    Choice(usize),
    /// RGBA color.
    Color([f32; 4]),
    /// Width and height.
    Size([u32; 2]),
    /// File paths, one per frame.
    Files(Vec<String>),
    /// Free text.
    Text(String),
}

impl PropertyValue {
    /// Comma-joined string form used by the persisted document.
    ///
    /// File lists are joined with commas as well, so paths containing a
    /// comma do not survive a round trip.
    pub fn encode(&self) -> String {
        match self {
            Self::Float(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Bool(v) => if *v { "1".into() } else { "0".into() },
            Self::Choice(v) => v.to_string(),
            Self::Color(c) => c.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","),
            Self::Size([w, h]) => format!("{w},{h}"),
            Self::Files(files) => files.join(","),
            Self::Text(t) => t.clone(),
        }
    }

    /// Appends this value's settings-buffer slots.
    pub fn write_slots(&self, out: &mut Vec<f32>) {
        match self {
            Self::Float(v) => out.push(*v),
            Self::Int(v) => out.push(*v as f32),
            Self::Bool(v) => out.push(if *v { 1.0 } else { 0.0 }),
            Self::Choice(v) => out.push(*v as f32),
            Self::Color(c) => out.extend_from_slice(c),
            Self::Size([w, h]) => {
                out.push(*w as f32);
                out.push(*h as f32);
            }
            Self::Files(_) | Self::Text(_) => {}
        }
    }

    /// Float value, converting integer-like variants.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f32),
            Self::Choice(v) => Some(*v as f32),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Integer value.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Choice(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Size value.
    pub fn as_size(&self) -> Option<[u32; 2]> {
        match self {
            Self::Size(s) => Some(*s),
            _ => None,
        }
    }

    /// File list.
    pub fn as_files(&self) -> Option<&[String]> {
        match self {
            Self::Files(f) => Some(f),
            _ => None,
        }
    }

    /// Text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Selected choice index.
    pub fn as_choice(&self) -> Option<usize> {
        match self {
            Self::Choice(i) => Some(*i),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Choice(_) => "choice",
            Self::Color(_) => "color",
            Self::Size(_) => "size",
            Self::Files(_) => "files",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Concatenates the settings slots of `values` in declaration order.
pub fn flatten_settings(values: &[PropertyValue]) -> Vec<f32> {
    let mut out = Vec::with_capacity(values.len() * 2);
    for value in values {
        value.write_slots(&mut out);
    }
    out
}

/// Slot offset of property `index` within the flattened settings.
pub fn slot_offset(specs: &[PropertySpec], index: usize) -> usize {
    specs.iter().take(index).map(|s| s.control.slot_count()).sum()
}

fn parse_f32(s: &str) -> Result<f32, String> {
    s.trim().parse::<f32>().map_err(|e| format!("'{s}': {e}"))
}

fn split_floats(s: &str) -> Result<Vec<f32>, String> {
    s.split(',').map(parse_f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_slot_layout() {
        let values = vec![
            PropertyValue::Color([0.1, 0.2, 0.3, 0.4]),
            PropertyValue::Files(vec!["a.png".into()]),
            PropertyValue::Float(2.5),
            PropertyValue::Size([640, 480]),
            PropertyValue::Bool(true),
        ];
        let slots = flatten_settings(&values);
        assert_eq!(slots, vec![0.1, 0.2, 0.3, 0.4, 2.5, 640.0, 480.0, 1.0]);
    }

    #[test]
    fn test_slot_offset() {
        let specs = vec![
            PropertySpec::new("gain", Control::Color { default: [1.0; 4] }),
            PropertySpec::new("path", Control::Files),
            PropertySpec::new("gamma", Control::Float { default: 1.0, min: 0.1, max: 4.0 }),
        ];
        assert_eq!(slot_offset(&specs, 0), 0);
        assert_eq!(slot_offset(&specs, 2), 4);
    }

    #[test]
    fn test_decode_encode() {
        let color = Control::Color { default: [0.0; 4] };
        let v = color.decode("0.5,0.25,1").unwrap();
        assert_eq!(v, PropertyValue::Color([0.5, 0.25, 1.0, 1.0]));
        assert_eq!(color.decode(&v.encode()).unwrap(), v);

        let files = Control::Files;
        let v = files.decode("a.png, b.png,").unwrap();
        assert_eq!(v, PropertyValue::Files(vec!["a.png".into(), "b.png".into()]));

        let float = Control::Float { default: 0.0, min: -1.0, max: 1.0 };
        assert_relative_eq!(float.decode("0.75").unwrap().as_f32().unwrap(), 0.75);
    }

    #[test]
    fn test_validate_range() {
        let float = Control::Float { default: 0.0, min: 0.0, max: 1.0 };
        assert!(float.validate(&PropertyValue::Float(2.0)).is_err());
        assert!(float.validate(&PropertyValue::Float(f32::NAN)).is_err());
        assert!(float.validate(&PropertyValue::Int(0)).is_err());

        let choice = Control::choice(0, &["a", "b"]);
        assert!(choice.validate(&PropertyValue::Choice(1)).is_ok());
        assert!(choice.validate(&PropertyValue::Choice(2)).is_err());

        let size = Control::Size { default: [1, 1] };
        assert!(size.decode("0,10").is_err());
    }
}
