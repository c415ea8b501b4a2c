//! CLI command implementations

pub mod backends;
pub mod export;
pub mod info;
pub mod kinds;
pub mod new;
pub mod render;

use anyhow::{Context, Result, bail};
use cascade_compute::{Backend, ColorSpace};
use cascade_core::{GraphModel, NodeId};
use cascade_engine::{Engine, EngineConfig};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Global options that shape the engine.
pub struct EngineOptions {
    pub config: Option<PathBuf>,
    pub backend: Option<String>,
}

impl EngineOptions {
    /// Config file (if any), then `CASCADE_BACKEND`, then `--backend`.
    pub fn load_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::load(self.config.as_deref()).context("Failed to load engine config")?;
        if let Some(name) = &self.backend {
            config.backend = name.parse::<Backend>()?;
        }
        Ok(config)
    }

    /// Engine with `project` loaded.
    pub fn open(&self, project: &Path) -> Result<Engine> {
        let mut engine = Engine::new(self.load_config()?)?;
        let json = std::fs::read_to_string(project)
            .with_context(|| format!("Failed to read: {}", project.display()))?;
        engine
            .load_json(&json)
            .with_context(|| format!("Failed to load project: {}", project.display()))?;
        Ok(engine)
    }
}

/// Finds a node by id, custom name or kind.
pub fn resolve_node(graph: &GraphModel, key: &str) -> Result<NodeId> {
    if let Ok(id) = key.parse::<NodeId>() {
        if graph.contains(id) {
            return Ok(id);
        }
    }
    match graph.find_by_name(key) {
        Some(id) => Ok(id),
        None => bail!("No node named '{key}'"),
    }
}

/// Parses `a..b` (exclusive) or a single frame `a`.
pub fn parse_frames(s: &str) -> Result<Range<usize>, String> {
    let parse = |v: &str| v.trim().parse::<usize>().map_err(|e| format!("bad frame '{v}': {e}"));
    let range = match s.split_once("..") {
        Some((a, b)) => parse(a)?..parse(b)?,
        None => {
            let frame = parse(s)?;
            let end = frame.checked_add(1).ok_or_else(|| format!("frame '{s}' out of range"))?;
            frame..end
        }
    };
    if range.is_empty() {
        return Err(format!("empty frame range '{s}'"));
    }
    Ok(range)
}

/// Parses `--color-space`.
pub fn parse_color_space(s: Option<&str>) -> Result<Option<ColorSpace>> {
    s.map(|s| s.parse::<ColorSpace>().map_err(anyhow::Error::msg)).transpose()
}
