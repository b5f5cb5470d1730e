//! Configuration management for the Manager.
//!
//! This module handles loading, validation, and command-line overrides of
//! the Manager's configuration from a `manager.toml` file.

use anyhow::{Context, Result};
use shared::config::ManagerConfig;
use std::path::PathBuf;
use tracing::{debug, info};

/// The expected name of the configuration file when a directory is given.
const MANAGER_CONFIG_FILE: &str = "manager.toml";

/// Owns the Manager's configuration lifecycle: initial load, validation, and
/// CLI-flag overrides applied before the server starts serving traffic.
pub struct ConfigManager {
    /// The full path to the configuration file.
    pub config_path: PathBuf,
    /// The loaded and validated configuration. Always `Some` once `new()`
    /// returns successfully.
    pub manager_config: Option<ManagerConfig>,
}

impl ConfigManager {
    /// Creates a new `ConfigManager` and immediately loads the configuration.
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config_path = if config_path.is_dir() {
            config_path.join(MANAGER_CONFIG_FILE)
        } else {
            config_path
        };

        if !config_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                config_path.display()
            ));
        }

        let mut manager = Self {
            config_path,
            manager_config: None,
        };

        manager.load_config()?;

        Ok(manager)
    }

    /// Loads the configuration file from disk, parses, and validates it.
    /// `production` gates the `default-manager-token` startup rejection.
    pub fn load_config(&mut self) -> Result<()> {
        info!(
            "Loading Manager configuration from {}",
            self.config_path.display()
        );

        let config_content = std::fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;

        let manager_config: ManagerConfig = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse {}", self.config_path.display()))?;

        manager_config.validate(true).with_context(|| {
            format!(
                "Invalid Manager configuration in {}",
                self.config_path.display()
            )
        })?;

        manager_config.log_debug();

        self.manager_config = Some(manager_config);

        info!(
            port = self.manager_config.as_ref().unwrap().manager_port,
            "Manager configuration loaded successfully"
        );

        Ok(())
    }

    /// Applies CLI overrides, validates, and persists the result back to the
    /// configuration file if anything actually changed.
    pub fn override_and_persist_config(
        &mut self,
        port: Option<u16>,
        public_base_url: Option<String>,
    ) -> Result<bool> {
        let mut config = self
            .manager_config
            .clone()
            .context("Manager configuration must be loaded before overrides are applied")?;

        let mut changed = false;

        if let Some(port) = port {
            if config.manager_port != port {
                info!(
                    "Overriding manager_port: {} -> {}",
                    config.manager_port, port
                );
                config.manager_port = port;
                changed = true;
            }
        }

        if let Some(url) = public_base_url {
            if config.public_base_url.as_deref() != Some(url.as_str()) {
                info!("Overriding public_base_url via command line");
                config.public_base_url = Some(url);
                changed = true;
            }
        }

        if changed {
            config
                .validate(true)
                .context("Invalid configuration after applying command-line overrides")?;

            let serialized = toml::to_string_pretty(&config)
                .context("Failed to serialize Manager configuration")?;
            std::fs::write(&self.config_path, serialized)
                .with_context(|| format!("Failed to write {}", self.config_path.display()))?;

            self.manager_config = Some(config);
            info!("Manager configuration updated and persisted to disk");
        } else {
            debug!("Command-line values match existing config, no changes needed");
        }

        Ok(changed)
    }

    pub fn is_loaded(&self) -> bool {
        self.manager_config.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(extra: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"authorized_tokens = ["test-token"]"#).unwrap();
        writeln!(file, "{}", extra).unwrap();
        file
    }

    #[test]
    fn test_load_applies_defaults() {
        let file = write_config("");
        let manager = ConfigManager::new(file.path().to_path_buf()).unwrap();
        let config = manager.manager_config.unwrap();
        assert_eq!(config.manager_port, 8080);
        assert_eq!(config.heartbeat_dead_after, 180);
    }

    #[test]
    fn test_load_rejects_default_token_literal() {
        let file = write_config(r#"authorized_tokens = ["default-manager-token"]"#);
        let result = ConfigManager::new(file.path().to_path_buf());
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_errors() {
        let result = ConfigManager::new(PathBuf::from("/nonexistent/manager.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_override_port_persists() {
        let file = write_config("");
        let mut manager = ConfigManager::new(file.path().to_path_buf()).unwrap();
        let changed = manager.override_and_persist_config(Some(9999), None).unwrap();
        assert!(changed);
        assert_eq!(manager.manager_config.as_ref().unwrap().manager_port, 9999);

        // Reload from disk to confirm the override was persisted.
        let reloaded = ConfigManager::new(file.path().to_path_buf()).unwrap();
        assert_eq!(reloaded.manager_config.unwrap().manager_port, 9999);
    }

    #[test]
    fn test_override_noop_when_unchanged() {
        let file = write_config("manager_port = 9000");
        let mut manager = ConfigManager::new(file.path().to_path_buf()).unwrap();
        let changed = manager.override_and_persist_config(Some(9000), None).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_authorized_tokens_preserved_across_reload() {
        let file = write_config("");
        let manager = ConfigManager::new(file.path().to_path_buf()).unwrap();
        let tokens: HashSet<String> = manager.manager_config.unwrap().authorized_tokens;
        assert!(tokens.contains("test-token"));
    }
}
