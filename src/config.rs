//! Engine configuration
//!
//! Defaults reproduce the stock demo: a 600x600 window showing the Cornell
//! room with the built-in kernel. Any field can be overridden from a TOML
//! file; missing fields keep their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::gpu::{ContextOptions, PowerMode, DEFAULT_KERNEL_NAME};
use crate::renderer::frame_driver::DriverOptions;
use crate::scene::SceneKind;

/// Looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "raytrace.toml";

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,
    /// Program source files, compiled in order. Empty selects the built-in kernel.
    pub kernel_sources: Vec<PathBuf>,
    /// Extra directories searched by `#include`
    pub include_dirs: Vec<PathBuf>,
    pub entry_point: String,
    pub scene: SceneKind,
    pub power: PowerMode,
    pub vsync: bool,
    /// Fixed session seed for reproducible noise
    pub seed: Option<u64>,
    pub max_consecutive_failures: u32,
    pub stats_interval_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_title: "Ray Tracer Demo".to_string(),
            window_width: 600,
            window_height: 600,
            kernel_sources: Vec::new(),
            include_dirs: Vec::new(),
            entry_point: DEFAULT_KERNEL_NAME.to_string(),
            scene: SceneKind::Cornell,
            power: PowerMode::HighPerformance,
            vsync: true,
            seed: None,
            max_consecutive_failures: 3,
            stats_interval_secs: 5.0,
        }
    }
}

impl EngineConfig {
    /// Read and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&raw)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        log::info!("[EngineConfig::load] Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Use `explicit` if given, else `raytrace.toml` in the working
    /// directory if present, else the defaults
    pub fn discover(explicit: Option<&Path>) -> EngineResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            return Self::load(fallback);
        }
        log::info!("[EngineConfig::discover] No configuration file, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(EngineError::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window_width, self.window_height
            )));
        }
        if self.entry_point.trim().is_empty() {
            return Err(EngineError::Config("entry_point must not be empty".to_string()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(EngineError::Config(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        self.stats_interval()?;
        Ok(())
    }

    /// Throughput log interval; must be positive and fit a `Duration`
    fn stats_interval(&self) -> EngineResult<Duration> {
        match Duration::try_from_secs_f64(self.stats_interval_secs) {
            Ok(interval) if !interval.is_zero() => Ok(interval),
            _ => Err(EngineError::Config(format!(
                "stats_interval_secs must be a positive number of seconds, got {}",
                self.stats_interval_secs
            ))),
        }
    }

    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            power: self.power,
            vsync: self.vsync,
            ..ContextOptions::default()
        }
    }

    pub fn driver_options(&self) -> DriverOptions {
        let defaults = DriverOptions::default();
        DriverOptions {
            max_consecutive_failures: self.max_consecutive_failures,
            stats_interval: self.stats_interval().unwrap_or(defaults.stats_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_demo() {
        let config = EngineConfig::default();
        assert_eq!(config.window_title, "Ray Tracer Demo");
        assert_eq!((config.window_width, config.window_height), (600, 600));
        assert_eq!(config.entry_point, "kernel_main");
        assert!(config.kernel_sources.is_empty());
        assert_eq!(config.max_consecutive_failures, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            window_width = 800
            scene = "spheres"
            power = "low-power"
            seed = 42
            kernel_sources = ["shaders/a.wgsl", "shaders/b.wgsl"]
            "#,
        )
        .expect("valid config");
        assert_eq!(config.window_width, 800);
        assert_eq!(config.window_height, 600);
        assert_eq!(config.scene, SceneKind::Spheres);
        assert_eq!(config.power, PowerMode::LowPower);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.kernel_sources.len(), 2);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for raw in [
            "window_width = 0",
            "entry_point = \"  \"",
            "max_consecutive_failures = 0",
            "stats_interval_secs = -1.0",
            "stats_interval_secs = 0.0",
            "stats_interval_secs = 1e30",
            "stats_interval_secs = nan",
            "scene = \"teapot\"",
        ] {
            let err = EngineConfig::from_toml(raw).expect_err(raw);
            assert_eq!(err.exit_code(), 5, "{}", raw);
        }
    }

    #[test]
    fn test_unvalidated_interval_does_not_panic() {
        // Fields are public, so options can be asked for without validation
        let config = EngineConfig {
            stats_interval_secs: 1e30,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.driver_options().stats_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "window_title = \"Test\"\nvsync = false").expect("write");
        let config = EngineConfig::load(file.path()).expect("load");
        assert_eq!(config.window_title, "Test");
        assert!(!config.vsync);
        assert!(!config.context_options().vsync);
    }

    #[test]
    fn test_missing_explicit_file_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = EngineConfig::discover(Some(&dir.path().join("absent.toml"))).expect_err("missing");
        assert!(matches!(err, EngineError::Io { .. }));
        assert_eq!(err.exit_code(), 2);
    }
}
