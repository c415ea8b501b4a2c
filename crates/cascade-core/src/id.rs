//! Stable identifiers for nodes and connectors.
//!
//! Ids are UUIDs generated once at creation and carried unchanged through
//! save/load, so a reloaded document addresses the same nodes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GraphError;

/// Unique id of a node in a [`GraphModel`](crate::GraphModel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_uuid(s).map(Self)
    }
}

/// Unique id of an input connector.
///
/// The persisted document refers to inputs by connector id rather than by
/// index, so every input connector gets its own UUID when its node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorId(Uuid);

impl ConnectorId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectorId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_uuid(s).map(Self)
    }
}

/// Accepts both the plain hyphenated form and the braced form `{...}`.
fn parse_uuid(s: &str) -> Result<Uuid, GraphError> {
    let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
    Uuid::parse_str(trimmed).map_err(|e| GraphError::Document(format!("invalid id '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_braced_and_plain() {
        let id = NodeId::new();
        let plain: NodeId = id.to_string().parse().unwrap();
        let braced: NodeId = format!("{{{id}}}").parse().unwrap();
        assert_eq!(plain, id);
        assert_eq!(braced, id);
    }

    #[test]
    fn test_parse_garbage() {
        assert!("not-a-uuid".parse::<NodeId>().is_err());
        assert!("".parse::<ConnectorId>().is_err());
    }
}
