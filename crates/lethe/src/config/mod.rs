use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::dream::DreamConfig;
use crate::error::{LetheError, Result};
use crate::lifecycle::{ArchivalConfig, ReforgeConfig};
use crate::memory::DecayConfig;

/// Main configuration structure for Lethe
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Where the record store lives
    #[serde(default)]
    pub storage: StorageConfig,
    /// Decay curve
    #[serde(default)]
    pub decay: DecayConfig,
    /// Decay pass thresholds and batching
    #[serde(default)]
    pub archival: ArchivalConfig,
    /// Clustering and reforge
    #[serde(default)]
    pub reforge: ReforgeConfig,
    /// Dream analysis and manifestations
    #[serde(default)]
    pub dream: DreamConfig,
    /// Background pass intervals
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration from `path`, or from the first default location
    /// that exists, falling back to built-in defaults.
    ///
    /// Default locations: `~/.lethe/config.toml`,
    /// `<config dir>/lethe/config.toml`, `./config.toml`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".lethe").join("config.toml")),
            dirs::config_dir().map(|c| c.join("lethe").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LetheError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LetheError::Config(format!("Failed to parse config: {e}")))
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all storage data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// LanceDB database directory inside `data_dir`
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("lethe.lance")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".lethe"))
        .unwrap_or_else(|| PathBuf::from(".lethe"))
}

/// Background scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between maintenance passes: decay, auto-reforge, expiry (default: 3600)
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    /// Seconds between scheduled dream sessions (default: 21600)
    #[serde(default = "default_dream_interval_secs")]
    pub dream_interval_secs: u64,
    /// Run both passes immediately on startup (default: true)
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
    /// Run auto-reforge during maintenance (default: true)
    #[serde(default = "default_auto_reforge")]
    pub auto_reforge: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            maintenance_interval_secs: default_maintenance_interval_secs(),
            dream_interval_secs: default_dream_interval_secs(),
            run_on_start: default_run_on_start(),
            auto_reforge: default_auto_reforge(),
        }
    }
}

fn default_maintenance_interval_secs() -> u64 {
    3600
}

fn default_dream_interval_secs() -> u64 {
    21600
}

fn default_run_on_start() -> bool {
    true
}

fn default_auto_reforge() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.decay.half_life_hours, 72.0);
        assert_eq!(config.archival.archive_threshold, 0.15);
        assert_eq!(config.reforge.min_sources, 5);
        assert_eq!(config.dream.manifest_ttl_hours, 72);
        assert_eq!(config.scheduler.maintenance_interval_secs, 3600);
        assert!(config.scheduler.run_on_start);
        assert!(config.storage.data_dir.ends_with(".lethe"));
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [storage]
            data_dir = "/var/lib/lethe"

            [decay]
            half_life_hours = 48.0

            [reforge]
            auto_max_per_run = 5

            [dream]
            infrastructure_agents = ["cron"]

            [scheduler]
            run_on_start = false
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/lethe"));
        assert_eq!(
            config.storage.database_path(),
            PathBuf::from("/var/lib/lethe/lethe.lance")
        );
        assert_eq!(config.decay.half_life_hours, 48.0);
        assert_eq!(config.decay.anchor_floor, 0.3);
        assert_eq!(config.reforge.auto_max_per_run, 5);
        assert_eq!(config.reforge.auto_min_members, 8);
        assert_eq!(config.dream.infrastructure_agents, vec!["cron".to_string()]);
        assert_eq!(config.dream.auto_execute_min_confidence, 0.8);
        assert!(!config.scheduler.run_on_start);
        assert_eq!(config.scheduler.dream_interval_secs, 21600);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml("[decay\nhalf_life_hours = ").unwrap_err();
        assert!(matches!(err, LetheError::Config(_)));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lethe.toml");
        std::fs::write(&path, "[archival]\nwrite_chunk_size = 10\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.archival.write_chunk_size, 10);
        assert_eq!(config.archival.scan_limit, 2000);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, LetheError::Config(_)));
    }
}
