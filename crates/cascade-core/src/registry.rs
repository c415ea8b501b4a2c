//! Node kind registry.
//!
//! The registry is built once at startup from the built-in table plus any
//! dynamically discovered kinds, then frozen. It is shared by `Arc` between
//! the graph and the engine; nothing mutates it afterwards.
//!
//! ```text
//! RegistryBuilder::new()
//!     .with_builtins()          built-in table
//!     .register(custom_desc)?   externally defined effects
//!     .build()                  -> NodeKindRegistry (read-only)
//! ```

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::builtin::builtin_kinds;
use crate::error::{GraphError, GraphResult};
use crate::kind::NodeKindDescriptor;

/// Read-only catalogue of node kinds.
#[derive(Debug, Clone)]
pub struct NodeKindRegistry {
    kinds: Vec<NodeKindDescriptor>,
    index: HashMap<String, usize>,
}

impl NodeKindRegistry {
    /// Registry holding only the built-in kinds.
    pub fn builtin() -> Self {
        RegistryBuilder::new().with_builtins().build()
    }

    /// Looks up a kind.
    pub fn describe(&self, kind: &str) -> GraphResult<&NodeKindDescriptor> {
        self.index
            .get(kind)
            .map(|&i| &self.kinds[i])
            .ok_or_else(|| GraphError::UnknownKind(kind.to_string()))
    }

    /// Returns `true` if `kind` is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.index.contains_key(kind)
    }

    /// All kinds in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeKindDescriptor> {
        self.kinds.iter()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Returns `true` if no kind is registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for NodeKindRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Collects descriptors before the registry is frozen.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    kinds: Vec<NodeKindDescriptor>,
    index: HashMap<String, usize>,
}

impl RegistryBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the built-in table.
    pub fn with_builtins(mut self) -> Self {
        for kind in builtin_kinds() {
            self.insert_unchecked(kind);
        }
        self
    }

    /// Registers one more kind.
    ///
    /// # Errors
    ///
    /// - [`GraphError::DuplicateKind`] if the id is taken
    /// - [`GraphError::InvalidDescriptor`] if the descriptor is inconsistent
    pub fn register(mut self, kind: NodeKindDescriptor) -> GraphResult<Self> {
        trace!(kind = %kind.id, "RegistryBuilder::register");
        if self.index.contains_key(&kind.id) {
            return Err(GraphError::DuplicateKind(kind.id));
        }
        kind.check().map_err(|reason| GraphError::InvalidDescriptor {
            kind: kind.id.clone(),
            reason,
        })?;
        self.insert_unchecked(kind);
        Ok(self)
    }

    /// Freezes the catalogue.
    pub fn build(self) -> NodeKindRegistry {
        debug!(kinds = self.kinds.len(), "node kind registry built");
        NodeKindRegistry { kinds: self.kinds, index: self.index }
    }

    fn insert_unchecked(&mut self, kind: NodeKindDescriptor) {
        if let Some(&i) = self.index.get(&kind.id) {
            self.kinds[i] = kind;
        } else {
            self.index.insert(kind.id.clone(), self.kinds.len());
            self.kinds.push(kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::ProgramRef;
    use crate::property::{Control, PropertySpec};

    #[test]
    fn test_describe_builtin() {
        let registry = NodeKindRegistry::builtin();
        let blur = registry.describe("blur").unwrap();
        assert_eq!(blur.pass_count, 2);
        assert!(matches!(registry.describe("glow"), Err(GraphError::UnknownKind(k)) if k == "glow"));
    }

    #[test]
    fn test_register_custom() {
        let glow = NodeKindDescriptor::custom(
            "isf-glow",
            "Glow",
            ProgramRef::custom("isf_glow"),
            vec![PropertySpec::new("intensity", Control::Float { default: 1.0, min: 0.0, max: 4.0 })],
        );
        let registry = RegistryBuilder::new().with_builtins().register(glow).unwrap().build();
        assert!(registry.contains("isf-glow"));
        assert_eq!(registry.len(), NodeKindRegistry::builtin().len() + 1);
    }

    #[test]
    fn test_register_duplicate() {
        let dup = NodeKindDescriptor::custom("blur", "Blur", ProgramRef::custom("x"), Vec::new());
        let err = RegistryBuilder::new().with_builtins().register(dup).unwrap_err();
        assert_eq!(err, GraphError::DuplicateKind("blur".into()));
    }
}
