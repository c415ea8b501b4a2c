//! Engine configuration.
//!
//! Loaded from an optional YAML file:
//!
//! ```yaml
//! backend: wgpu
//! default_size: { width: 1920, height: 1080 }
//! image_pool_mb: 256
//! read_color_space: srgb
//! write_color_space: srgb
//! reject_cycles: true
//! ```
//!
//! Missing fields take their defaults. `CASCADE_BACKEND` in the environment
//! overrides `backend`.

use std::path::Path;

use cascade_compute::{BACKEND_ENV, Backend, ColorSpace};
use cascade_core::ImageSize;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Settings shared by the scheduler, executor and graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Compute backend.
    pub backend: Backend,
    /// Output size of generators with nothing on their Back input.
    pub default_size: ImageSize,
    /// Budget of the stale-image pool in MiB.
    pub image_pool_mb: u64,
    /// Color space preset on new Read nodes.
    pub read_color_space: ColorSpace,
    /// Color space preset on new Write nodes and used for direct renders.
    pub write_color_space: ColorSpace,
    /// Refuse connections that would close a cycle.
    pub reject_cycles: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Auto,
            default_size: ImageSize::new(1920, 1080),
            image_pool_mb: 256,
            read_color_space: ColorSpace::Srgb,
            write_color_space: ColorSpace::Srgb,
            reject_cycles: true,
        }
    }
}

impl EngineConfig {
    /// Parses YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        debug!(path = %path.display(), "loading engine config");
        Self::from_yaml(&content)
    }

    /// File config when `path` is given, else defaults; then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Serializes to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Applies `CASCADE_BACKEND` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(BACKEND_ENV) {
            match raw.parse::<Backend>() {
                Ok(backend) => {
                    debug!(%backend, "backend overridden by {BACKEND_ENV}");
                    self.backend = backend;
                }
                Err(err) => warn!(value = %raw, "ignoring {BACKEND_ENV}: {err}"),
            }
        }
    }

    /// Pool budget in bytes.
    pub fn pool_budget_bytes(&self) -> u64 {
        self.image_pool_mb.saturating_mul(1024 * 1024)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_size.is_empty() {
            return Err(ConfigError::Invalid(format!("default_size {} is empty", self.default_size)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = EngineConfig::from_yaml("backend: cpu\nimage_pool_mb: 8\n").unwrap();
        assert_eq!(config.backend, Backend::Cpu);
        assert_eq!(config.image_pool_mb, 8);
        assert_eq!(config.default_size, ImageSize::new(1920, 1080));
        assert!(config.reject_cycles);
        assert_eq!(config.pool_budget_bytes(), 8 << 20);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = EngineConfig {
            backend: Backend::Wgpu,
            default_size: ImageSize::new(64, 32),
            read_color_space: ColorSpace::Linear,
            reject_cycles: false,
            ..Default::default()
        };
        let back = EngineConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_rejects_empty_default_size() {
        let err = EngineConfig::from_yaml("default_size: { width: 0, height: 10 }").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_env_override() {
        let mut config = EngineConfig::default();
        config.apply_overrides(|key| (key == BACKEND_ENV).then(|| "cpu".to_string()));
        assert_eq!(config.backend, Backend::Cpu);

        // Unparseable values are ignored.
        config.apply_overrides(|_| Some("cuda".to_string()));
        assert_eq!(config.backend, Backend::Cpu);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cascade.yaml");
        std::fs::write(&path, "write_color_space: linear\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.write_color_space, ColorSpace::Linear);

        let missing = EngineConfig::from_file(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
