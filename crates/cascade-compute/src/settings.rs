//! Settings uniform block.
//!
//! Property values are flattened into consecutive f32 slots in declaration
//! order and padded to the fixed block the shaders declare.

use cascade_core::{PropertyValue, flatten_settings};

use crate::{ComputeError, ComputeResult};

/// Capacity of the settings uniform, in f32 slots (16 x vec4).
pub const SETTINGS_SLOTS: usize = 64;

/// Padded settings for one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsBlock(Vec<f32>);

impl SettingsBlock {
    /// Flattens `values` into a block.
    pub fn from_properties(values: &[PropertyValue]) -> ComputeResult<Self> {
        let mut slots = flatten_settings(values);
        if slots.len() > SETTINGS_SLOTS {
            return Err(ComputeError::SettingsOverflow { needed: slots.len(), capacity: SETTINGS_SLOTS });
        }
        slots.resize(SETTINGS_SLOTS, 0.0);
        Ok(Self(slots))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::NodeKindRegistry;

    #[test]
    fn test_color_correct_layout() {
        let registry = NodeKindRegistry::builtin();
        let kind = registry.describe("color-correct").unwrap();
        let block = SettingsBlock::from_properties(&kind.default_properties()).unwrap();
        let slots = block.as_slice();
        assert_eq!(slots.len(), SETTINGS_SLOTS);
        // gain (4) then gamma
        assert_eq!(&slots[..5], &[1.0, 1.0, 1.0, 1.0, 1.0]);
        assert!(slots[kind.settings_len()..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_overflow() {
        let values = vec![PropertyValue::Color([0.0; 4]); 17];
        assert!(matches!(
            SettingsBlock::from_properties(&values),
            Err(ComputeError::SettingsOverflow { needed: 68, capacity: 64 })
        ));
    }
}
