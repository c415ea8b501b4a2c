//! Error types for evaluation and export.

use std::path::PathBuf;

use cascade_compute::ComputeError;
use cascade_core::{GraphError, NodeId};
use thiserror::Error;

/// Result alias for scheduler and engine operations.
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors of one evaluation pass.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The node (or something it depends on) is not ready to render.
    #[error("Node {0} cannot be rendered")]
    NotRenderable(NodeId),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("No usable compute device: {0}")]
    DeviceUnavailable(#[source] ComputeError),

    /// The device is gone; nothing renders until it is recreated.
    #[error("Device failure: {0}")]
    DeviceFailure(#[source] ComputeError),

    #[error("Evaluation of node {node} failed: {source}")]
    Gpu {
        node: NodeId,
        #[source]
        source: ComputeError,
    },

    #[error("I/O error on node {node}: {source}")]
    Io {
        node: NodeId,
        #[source]
        source: ComputeError,
    },

    #[error("Missing input on node {node}: {detail}")]
    MissingInput { node: NodeId, detail: String },

    #[error("Export of node {node} is not possible: {reason}")]
    Export { node: NodeId, reason: String },
}

impl EvalError {
    /// Sorts a device error raised while evaluating `node`.
    pub fn from_compute(node: NodeId, err: ComputeError) -> Self {
        if err.is_device_failure() {
            Self::DeviceFailure(err)
        } else if err.is_io() {
            Self::Io { node, source: err }
        } else if let ComputeError::MissingInput(detail) = err {
            Self::MissingInput { node, detail }
        } else {
            Self::Gpu { node, source: err }
        }
    }

    /// Returns `true` when the device must be recreated before rendering again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceFailure(_))
    }

    /// Returns `true` for the expected "nothing to show" outcome.
    pub fn is_not_renderable(&self) -> bool {
        matches!(self, Self::NotRenderable(_))
    }
}

/// Errors loading an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let node = NodeId::new();
        assert!(EvalError::from_compute(node, ComputeError::DeviceLost("reset".into())).is_fatal());
        assert!(EvalError::from_compute(node, ComputeError::OutOfMemory("vram".into())).is_fatal());

        let io = EvalError::from_compute(
            node,
            ComputeError::Decode { path: "a.png".into(), reason: "truncated".into() },
        );
        assert!(matches!(io, EvalError::Io { .. }));
        assert!(!io.is_fatal());

        let missing = EvalError::from_compute(node, ComputeError::MissingInput("back".into()));
        assert!(matches!(missing, EvalError::MissingInput { .. }));

        let other = EvalError::from_compute(node, ComputeError::UnknownProgram("x".into()));
        assert!(matches!(other, EvalError::Gpu { .. }));
        assert!(EvalError::NotRenderable(node).is_not_renderable());
    }
}
