use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use archmend_engine::{CorruptionConfig, RankingConfig};
use archmend_loader::DedupConfig;
use archmend_store::ReplayConfig;

/// Resolve the workspace data directory path based on priority:
/// 1. Explicit path (with tilde expansion)
/// 2. ARCHMEND_PATH environment variable (with tilde expansion)
/// 3. XDG data directory (recommended default)
/// 4. ~/.archmend (fallback for systems without XDG)
pub fn resolve_workspace_path(explicit_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(expand_tilde(path));
    }

    if let Ok(env_path) = std::env::var("ARCHMEND_PATH") {
        return Ok(expand_tilde(&env_path));
    }

    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("archmend"));
    }

    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".archmend"));
    }

    Err(Error::Config(
        "Could not determine workspace path: no HOME directory or XDG data directory found"
            .to_string(),
    ))
}

/// Expand tilde (~) in paths to the user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// Backup, state, and event-store locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backup_root: PathBuf,
    pub state_root: PathBuf,
    pub event_store_dsn: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = resolve_workspace_path(None).unwrap_or_else(|_| PathBuf::from(".archmend"));
        Self {
            backup_root: base.join("backups"),
            state_root: base.join("state"),
            event_store_dsn: base.join("events.db"),
        }
    }
}

/// Full core configuration. Defaults are defined in code; a TOML file
/// overrides them. No process-wide mutable state: the value is passed into
/// the repair manager, and components receive typed slices of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub ranking: RankingConfig,
    pub corruption: CorruptionConfig,
    pub dedup: DedupConfig,
    pub storage: StorageConfig,
    pub replay: ReplayConfig,
}

const WEIGHT_EPSILON: f64 = 1e-6;

impl CoreConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config(e.to_string()))?;
        let config: CoreConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Config(e.to_string()))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| Error::Config(e.to_string()))?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(resolve_workspace_path(None)?.join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        let ranking_sum =
            self.ranking.weight_content + self.ranking.weight_temporal + self.ranking.weight_role;
        if (ranking_sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(Error::Config(format!(
                "ranking weights must sum to 1.0, got {}",
                ranking_sum
            )));
        }
        if self.ranking.temporal_window_seconds <= 0 {
            return Err(Error::Config(
                "ranking.temporal_window_seconds must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ranking.min_score_floor) {
            return Err(Error::Config(
                "ranking.min_score_floor must be within [0, 1]".to_string(),
            ));
        }
        if self.ranking.max_candidates == 0 {
            return Err(Error::Config(
                "ranking.max_candidates must be at least 1".to_string(),
            ));
        }
        if self.dedup.max_duplicate_blocks == 0 {
            return Err(Error::Config(
                "dedup.max_duplicate_blocks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoreConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ranking.max_candidates, 5);
        assert_eq!(config.ranking.temporal_window_seconds, 300);
        assert!((config.corruption.weight_missing_parent - 0.4).abs() < 1e-9);
        assert_eq!(config.dedup.max_duplicate_blocks, 10_000);
        assert_eq!(config.replay.cache_ttl_seconds, 300);
        assert!(!config.replay.degraded_fail_fast);
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut config = CoreConfig::default();
        config.ranking.weight_content = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() -> Result<()> {
        let temp_dir = TempDir::new().map_err(|e| Error::Config(e.to_string()))?;
        let path = temp_dir.path().join("config.toml");

        let mut config = CoreConfig::default();
        config.ranking.max_candidates = 8;
        config.corruption.markers = vec!["resume failed".to_string()];
        config.save_to(&path)?;

        let loaded = CoreConfig::load_from(&path)?;
        assert_eq!(loaded.ranking.max_candidates, 8);
        assert_eq!(loaded.corruption.markers, vec!["resume failed".to_string()]);
        Ok(())
    }

    #[test]
    fn test_missing_file_yields_defaults() -> Result<()> {
        let temp_dir = TempDir::new().map_err(|e| Error::Config(e.to_string()))?;
        let path = temp_dir.path().join("nope.toml");
        let config = CoreConfig::load_from(&path)?;
        assert_eq!(config.ranking.max_candidates, 5);
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() -> Result<()> {
        let temp_dir = TempDir::new().map_err(|e| Error::Config(e.to_string()))?;
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[ranking]\nmax_candidates = 3\n")
            .map_err(|e| Error::Config(e.to_string()))?;

        let config = CoreConfig::load_from(&path)?;
        assert_eq!(config.ranking.max_candidates, 3);
        assert_eq!(config.replay.cache_ttl_seconds, 300);
        Ok(())
    }
}
