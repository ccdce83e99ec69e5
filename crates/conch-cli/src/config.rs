use anyhow::{Context, Result};
use conch_ingest::ingestor::IngestConfig;
use conch_storage::StoreConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConchConfig {
    pub database: Option<PathBuf>,
    pub log_level: Option<String>,
    pub batch_size: Option<usize>,
    pub detail_cache_capacity: Option<usize>,
    pub import_read_size: Option<usize>,
    pub grizzco_weapons: Option<Vec<String>>,
}

impl ConchConfig {
    pub fn store_config(&self) -> StoreConfig {
        let defaults = StoreConfig::default();
        StoreConfig {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            detail_cache_capacity: self
                .detail_cache_capacity
                .unwrap_or(defaults.detail_cache_capacity),
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        let defaults = IngestConfig::default();
        IngestConfig {
            import_read_size: self.import_read_size.unwrap_or(defaults.import_read_size),
            grizzco_weapons: self.grizzco_weapons.clone().unwrap_or_default(),
            ..defaults
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| home_dir().join(".local/share"))
                .join("conch/conch.db")
        })
    }
}

/// A missing file yields the defaults; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<ConchConfig> {
    if !path.exists() {
        return Ok(ConchConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse config {}", path.display()))
}

pub fn config_path() -> PathBuf {
    config_path_with(|key| std::env::var(key).ok())
}

fn config_path_with(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = lookup("CONCH_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let config_dir = match lookup("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => home_dir().join(".config"),
    };
    config_dir.join("conch/config.toml")
}

/// `--debug` only applies when no explicit level is in the environment.
pub fn resolve_log_level(debug: bool, env_level: Option<String>, configured: Option<&str>) -> String {
    if let Some(level) = env_level.filter(|level| !level.trim().is_empty()) {
        return level;
    }
    if debug {
        return "debug".to_string();
    }
    configured.unwrap_or("info").to_string()
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_prefers_explicit_then_xdg() {
        let explicit = config_path_with(|key| match key {
            "CONCH_CONFIG_PATH" => Some("/tmp/custom.toml".to_string()),
            "XDG_CONFIG_HOME" => Some("/xdg".to_string()),
            _ => None,
        });
        assert_eq!(explicit, PathBuf::from("/tmp/custom.toml"));

        let xdg = config_path_with(|key| (key == "XDG_CONFIG_HOME").then(|| "/xdg".to_string()));
        assert_eq!(xdg, PathBuf::from("/xdg/conch/config.toml"));

        let fallback = config_path_with(|_| None);
        assert!(fallback.ends_with(".config/conch/config.toml"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config, ConchConfig::default());
        assert_eq!(config.store_config().batch_size, 500);
        assert_eq!(config.ingest_config().import_read_size, 4 * 1024 * 1024);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "database = \"/data/results.db\"\nlog_level = \"warn\"\nbatch_size = 50\nimport_read_size = 1024\ngrizzco_weapons = [\"Blaster_Bear_Coop\"]\n",
        )
        .expect("write config");

        let config = load_config(&path).expect("load");
        assert_eq!(config.database_path(), PathBuf::from("/data/results.db"));
        assert_eq!(config.store_config().batch_size, 50);
        assert_eq!(config.store_config().detail_cache_capacity, 64);
        assert_eq!(config.ingest_config().import_read_size, 1024);
        assert_eq!(config.ingest_config().progress_every, 100);
        assert_eq!(
            config.ingest_config().grizzco_weapons,
            vec!["Blaster_Bear_Coop".to_string()]
        );

        fs::write(&path, "batch_size = \"many\"").expect("write config");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn log_level_precedence() {
        assert_eq!(resolve_log_level(true, Some("trace".into()), Some("warn")), "trace");
        assert_eq!(resolve_log_level(true, None, Some("warn")), "debug");
        assert_eq!(resolve_log_level(false, Some("  ".into()), Some("warn")), "warn");
        assert_eq!(resolve_log_level(false, None, None), "info");
    }
}
