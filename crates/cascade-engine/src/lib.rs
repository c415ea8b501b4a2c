//! Evaluation and export for the cascade compositor.
//!
//! - [`EvaluationScheduler`] - pulls a node's image up to date, evaluating
//!   dirty nodes upstream-first on a [`GpuNodeExecutor`](cascade_compute::GpuNodeExecutor)
//! - [`export`] - single-frame and batch export with cancellation
//! - [`Engine`] - the UI-facing facade with an event queue
//! - [`EngineConfig`] - backend, pool budget, defaults
//!
//! # Example
//!
//! ```ignore
//! use cascade_engine::{Engine, EngineConfig, ExportRequest, CancelToken};
//!
//! let mut engine = Engine::new(EngineConfig::load(None)?)?;
//! engine.load_json(&std::fs::read_to_string("comp.json")?)?;
//! let write = engine.graph().find_by_name("write").unwrap();
//! let report = engine.export(&ExportRequest::new(write), &CancelToken::new())?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod scheduler;

pub use config::EngineConfig;
pub use engine::{Engine, EngineEvent};
pub use error::{ConfigError, EvalError, EvalResult};
pub use export::{CancelToken, ExportReport, ExportRequest, ExportedFrame, FrameFailure, frame_path, write_node_path};
pub use scheduler::{EvaluationScheduler, Rendered};
