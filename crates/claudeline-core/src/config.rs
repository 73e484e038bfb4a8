//! Configuration management for claudeline
//!
//! Handles loading and saving the TOML config file, plus the environment
//! overrides applied on top of it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent::DEFAULT_CANDIDATES;
use crate::error::{Error, Result};
use crate::session::PermissionMode;

/// Environment variable overriding `agent.command`
pub const ENV_COMMAND: &str = "CLAUDE_COMMAND";

/// Environment variable overriding `agent.work_dir`
pub const ENV_WORK_DIR: &str = "CLAUDE_WORK_DIR";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub general: GeneralConfig,
}

/// How to find and run the agent program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Program name or path
    pub command: String,
    /// Directory the agent works in; the process cwd when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    /// Install locations tried when `command` is not on `PATH`
    pub candidates: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            work_dir: None,
            candidates: DEFAULT_CANDIDATES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub initial_mode: PermissionMode,
}

/// General application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level used when RUST_LOG is unset
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Working directory to run the agent in
    pub fn work_dir(&self) -> Result<PathBuf> {
        match &self.agent.work_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Apply `CLAUDE_COMMAND` / `CLAUDE_WORK_DIR` from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; empty values are ignored
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(command) = lookup(ENV_COMMAND).filter(|v| !v.is_empty()) {
            self.agent.command = command;
        }
        if let Some(dir) = lookup(ENV_WORK_DIR).filter(|v| !v.is_empty()) {
            self.agent.work_dir = Some(PathBuf::from(dir));
        }
    }
}

/// Configuration manager for loading and saving config
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a config manager with a specific path; a missing file means defaults
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Config::default()
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("claudeline").join("config.toml"))
    }

    fn load_from_path(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the manager, keeping only the loaded configuration
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&self.config_path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.agent.candidates.len(), DEFAULT_CANDIDATES.len());
        assert_eq!(config.session.initial_mode, PermissionMode::Supervised);
        assert_eq!(config.general.log_level, "warn");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("absent.toml")).unwrap();
        assert_eq!(manager.config(), &Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[agent]\ncommand = \"/opt/claude\"\n\n[session]\ninitial_mode = \"plan\"\n",
        )
        .unwrap();

        let config = ConfigManager::with_path(path).unwrap().into_config();
        assert_eq!(config.agent.command, "/opt/claude");
        assert_eq!(config.agent.candidates.len(), DEFAULT_CANDIDATES.len());
        assert_eq!(config.session.initial_mode, PermissionMode::Plan);
        assert_eq!(config.general.log_level, "warn");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent\ncommand = ").unwrap();

        match ConfigManager::with_path(path) {
            Err(Error::Config(msg)) => assert!(msg.contains("Failed to parse config")),
            Err(e) => panic!("Expected Config error, got {:?}", e),
            Ok(_) => panic!("Expected Config error, got Ok"),
        }
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut manager = ConfigManager::with_path(path.clone()).unwrap();
        manager.config_mut().agent.work_dir = Some(PathBuf::from("/srv/project"));
        manager.config_mut().session.initial_mode = PermissionMode::Unsupervised;
        manager.save().unwrap();

        let reloaded = ConfigManager::with_path(path).unwrap();
        assert_eq!(reloaded.config(), manager.config());
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            (ENV_COMMAND, "/usr/bin/claude-beta".to_string()),
            (ENV_WORK_DIR, String::new()),
        ]);
        let mut config = Config::default();
        config.agent.work_dir = Some(PathBuf::from("/from/file"));
        config.apply_env_overrides_from(|key| env.get(key).cloned());

        assert_eq!(config.agent.command, "/usr/bin/claude-beta");
        // Empty values do not clobber the file setting
        assert_eq!(config.agent.work_dir, Some(PathBuf::from("/from/file")));
        assert_eq!(config.work_dir().unwrap(), PathBuf::from("/from/file"));
    }
}
