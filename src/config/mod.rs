use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{PagetweakError, Result};

/// Dotted keys accepted by `get` / `set`.
pub const CONFIG_KEYS: &[&str] = &[
    "execution.cleanup_delay_ms",
    "execution.allow_eval",
    "storage.path",
];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Escalation chain configuration
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Snippet storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Delay before an injected script element is removed again
    #[serde(default = "default_cleanup_delay_ms")]
    pub cleanup_delay_ms: u64,

    /// Append string evaluation as the last tier of the chain
    #[serde(default)]
    pub allow_eval: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            cleanup_delay_ms: default_cleanup_delay_ms(),
            allow_eval: false,
        }
    }
}

impl ExecutionConfig {
    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }
}

fn default_cleanup_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage file path (overrides the platform data directory)
    pub path: Option<String>,
}

impl Config {
    /// Load configuration from all sources (file, env, defaults)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &std::path::Path) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            // PAGETWEAK_EXECUTION_ALLOW_EVAL -> execution.allow_eval
            .merge(Env::prefixed("PAGETWEAK_").map(|key| {
                key.as_str()
                    .to_ascii_lowercase()
                    .replacen("execution_", "execution.", 1)
                    .replacen("storage_", "storage.", 1)
                    .into()
            }))
            .extract()
            .map_err(|e| PagetweakError::ConfigError(e.to_string()))?;

        Ok(config)
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PAGETWEAK_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pagetweak")
            .join("config.toml")
    }

    /// Resolved snippet storage file
    pub fn storage_path(&self) -> PathBuf {
        match self.storage.path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pagetweak")
                .join("storage.json"),
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PagetweakError::ConfigError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match key {
            "execution.cleanup_delay_ms" => Ok(Some(self.execution.cleanup_delay_ms.to_string())),
            "execution.allow_eval" => Ok(Some(self.execution.allow_eval.to_string())),
            "storage.path" => Ok(self.storage.path.clone()),
            _ => Err(PagetweakError::ConfigError(format!(
                "Unknown config key: {}",
                key
            ))),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "execution.cleanup_delay_ms" => {
                self.execution.cleanup_delay_ms = value.parse().map_err(|_| {
                    PagetweakError::ConfigError(
                        "cleanup_delay_ms must be a number of milliseconds".to_string(),
                    )
                })?
            }
            "execution.allow_eval" => {
                self.execution.allow_eval = value.parse().map_err(|_| {
                    PagetweakError::ConfigError("allow_eval must be true or false".to_string())
                })?
            }
            "storage.path" => self.storage.path = Some(value.to_string()),
            _ => {
                return Err(PagetweakError::ConfigError(format!(
                    "Unknown config key: {}",
                    key
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_keeps_two_tier_chain() {
        let config = Config::default();

        assert_eq!(config.execution.cleanup_delay_ms, 100);
        assert!(!config.execution.allow_eval);
        assert_eq!(config.execution.cleanup_delay(), Duration::from_millis(100));
    }

    #[test]
    fn set_and_get_round_through_dotted_keys() {
        let mut config = Config::default();
        config.set("execution.allow_eval", "true").unwrap();
        config.set("execution.cleanup_delay_ms", "250").unwrap();
        config.set("storage.path", "/tmp/snippets.json").unwrap();

        assert_eq!(config.get("execution.allow_eval").unwrap().as_deref(), Some("true"));
        assert_eq!(
            config.get("execution.cleanup_delay_ms").unwrap().as_deref(),
            Some("250")
        );
        assert_eq!(config.storage_path(), PathBuf::from("/tmp/snippets.json"));
    }

    #[test]
    fn set_rejects_bad_values_and_unknown_keys() {
        let mut config = Config::default();

        assert!(matches!(
            config.set("execution.allow_eval", "maybe"),
            Err(PagetweakError::ConfigError(_))
        ));
        assert!(matches!(
            config.set("browser.headless", "true"),
            Err(PagetweakError::ConfigError(msg)) if msg.contains("browser.headless")
        ));
    }

    #[test]
    fn blank_storage_path_falls_back_to_data_dir() {
        let mut config = Config::default();
        config.storage.path = Some("   ".to_string());

        assert!(config.storage_path().ends_with("pagetweak/storage.json"));
    }

    #[test]
    fn save_then_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.execution.cleanup_delay_ms = 40;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.execution.cleanup_delay_ms, 40);
    }
}
