//! Host configuration, loaded from YAML

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default config file location
pub const CONFIG_FILE: &str = "config/case_ledger.yaml";
/// Environment variable overriding [`CONFIG_FILE`]
pub const CONFIG_ENV: &str = "CASE_LEDGER_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Moderation log channel of a guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: u64,
    pub log_channel_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between expiry sweeps
    pub sweep_interval_secs: u64,
    /// YAML file holding the cases
    pub store_path: PathBuf,
    pub log_dir: PathBuf,
    pub guilds: Vec<GuildConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            store_path: PathBuf::from("data/cases.yaml"),
            log_dir: PathBuf::from(crate::logging::LOG_DIR),
            guilds: Vec::new(),
        }
    }
}

impl Config {
    /// Config file path, honouring `CASE_LEDGER_CONFIG`
    #[must_use]
    pub fn path() -> PathBuf {
        std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from)
    }

    /// Load the config at `path`; a missing file gives the defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or fails
    /// validation.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::from_yaml(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a config document; an empty document gives the defaults.
    ///
    /// # Errors
    /// Returns an error if the YAML is malformed.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// # Errors
    /// Returns an error for a zero sweep interval or a guild listed twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be greater than 0".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.guilds.iter().find(|g| !seen.insert(g.guild_id)) {
            return Err(ConfigError::Invalid(format!(
                "guild {} is configured more than once",
                dup.guild_id
            )));
        }
        Ok(())
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// `(guild_id, log_channel_id)` pairs
    pub fn log_channels(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.guilds.iter().map(|g| (g.guild_id, g.log_channel_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.store_path, PathBuf::from("data/cases.yaml"));
    }

    #[test]
    fn test_partial_document() {
        let yaml = concat!(
            "sweep_interval_secs: 30\n",
            "guilds:\n",
            "  - guild_id: 67890\n",
            "    log_channel_id: 555\n",
        );
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.sweep_interval_secs, 30);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.log_channels().collect::<Vec<_>>(), vec![(67890, 555)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let zero = Config {
            sweep_interval_secs: 0,
            ..Config::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));

        let guild = GuildConfig {
            guild_id: 1,
            log_channel_id: 2,
        };
        let dup = Config {
            guilds: vec![guild.clone(), guild],
            ..Config::default()
        };
        assert!(matches!(dup.validate(), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            Config::from_yaml("sweep_interval_secs: [1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let name = format!("case-ledger-missing-{}.yaml", rand::random::<u64>());
        let path = std::env::temp_dir().join(name);
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config, Config::default());
    }
}
