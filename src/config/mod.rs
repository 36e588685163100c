//! Configuration management for Rock

pub mod schema;

pub use schema::{Config, ProviderKind};

use crate::error::{RockError, RockResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// File name of the project-local configuration
pub const LOCAL_CONFIG_FILE: &str = "rock.toml";

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "ROCK_CACHE_DIR";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rock")
            .join("config.toml")
    }

    /// Resolve the local build cache root.
    ///
    /// `ROCK_CACHE_DIR` wins over `[cache] root`, which wins over the
    /// platform cache directory.
    pub fn cache_root(config: &Config) -> PathBuf {
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        if let Some(ref root) = config.cache.root {
            return root.clone();
        }
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".rock").join("cache"))
            .join("rock")
    }

    /// Walk up from `start` looking for a project-local `rock.toml`
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration, creating default if not exists
    pub async fn load(&self) -> RockResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> RockResult<Config> {
        let value = read_toml_value(path).await?;
        value.try_into().map_err(|e: toml::de::Error| RockError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load the global config and overlay a project-local one on top of it
    pub async fn load_merged(&self, local: Option<&Path>) -> RockResult<Config> {
        let Some(local) = local else {
            return self.load().await;
        };

        let mut merged = if self.config_path.exists() {
            read_toml_value(&self.config_path).await?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };
        merge_toml(&mut merged, read_toml_value(local).await?);

        merged.try_into().map_err(|e: toml::de::Error| RockError::ConfigInvalid {
            path: local.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> RockResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            RockError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> RockResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RockError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_toml_value(path: &Path) -> RockResult<toml::Value> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| RockError::io(format!("reading config from {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| RockError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Deep-merge `overlay` into `base`. Tables merge key by key, everything
/// else is replaced.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.remote_cache.provider, ProviderKind::None);
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.fingerprint.env = vec!["RCT_NEW_ARCH_ENABLED".to_string()];

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.fingerprint.env, vec!["RCT_NEW_ARCH_ENABLED"]);
    }

    #[tokio::test]
    async fn local_overrides_global() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("config.toml");
        std::fs::write(
            &global,
            r#"
            [remote_cache]
            provider = "github"
            [remote_cache.github]
            owner = "acme"
            repository = "app"
            "#,
        )
        .unwrap();
        let local = temp.path().join(LOCAL_CONFIG_FILE);
        std::fs::write(
            &local,
            r#"
            [remote_cache.github]
            repository = "mobile"
            "#,
        )
        .unwrap();

        let config = ConfigManager::with_path(global)
            .load_merged(Some(&local))
            .await
            .unwrap();

        assert_eq!(config.remote_cache.provider, ProviderKind::Github);
        assert_eq!(config.remote_cache.github.owner.as_deref(), Some("acme"));
        assert_eq!(
            config.remote_cache.github.repository.as_deref(),
            Some("mobile")
        );
    }

    #[tokio::test]
    async fn invalid_local_config_reports_path() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join(LOCAL_CONFIG_FILE);
        std::fs::write(&local, "[remote_cache]\nprovider = 42\n").unwrap();

        let err = ConfigManager::with_path(temp.path().join("missing.toml"))
            .load_merged(Some(&local))
            .await
            .unwrap_err();

        assert!(matches!(err, RockError::ConfigInvalid { ref path, .. } if path == &local));
    }

    #[test]
    fn find_local_config_walks_up() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("apps").join("mobile");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join(LOCAL_CONFIG_FILE), "").unwrap();

        let found = ConfigManager::find_local_config(&nested).unwrap();
        assert_eq!(found, temp.path().join(LOCAL_CONFIG_FILE));
    }

    #[test]
    #[serial_test::serial]
    fn cache_root_prefers_env() {
        let mut config = Config::default();
        config.cache.root = Some(PathBuf::from("/from/config"));

        std::env::set_var(CACHE_DIR_ENV, "/from/env");
        assert_eq!(ConfigManager::cache_root(&config), PathBuf::from("/from/env"));

        std::env::remove_var(CACHE_DIR_ENV);
        assert_eq!(
            ConfigManager::cache_root(&config),
            PathBuf::from("/from/config")
        );
    }
}
