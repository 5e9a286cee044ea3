//! Configuration management for the warden control plane.
//!
//! This module handles loading, validation, and defaulting of configuration
//! from TOML files and command-line arguments.

use control_plane::supervisor::LogicalServerConfig;
use control_plane::update::UpdateSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Application configuration loaded from TOML file.
///
/// Encompasses the control endpoint, the supervised logical servers, log
/// persistence, update orchestration, and backups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Control endpoint settings
    #[serde(default)]
    pub control: ControlSettings,
    /// Supervised logical servers
    #[serde(default, rename = "servers")]
    pub servers: Vec<LogicalServerConfig>,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Update orchestration settings
    #[serde(default)]
    pub update: UpdateSettings,
    /// Backup storage settings
    #[serde(default)]
    pub backups: BackupSettings,
}

/// Control endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Address the HTTP control endpoint binds to
    pub bind_address: String,
    /// Directory holding persisted per-server log files
    pub log_dir: PathBuf,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8081".to_string(),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Backup storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Directory where game-state snapshots are written
    pub directory: PathBuf,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("backups"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            control: ControlSettings::default(),
            servers: Vec::new(),
            logging: LoggingSettings::default(),
            update: UpdateSettings::default(),
            backups: BackupSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// Checks the bind address, logical server definitions, and log level.
    pub fn validate(&self) -> Result<(), String> {
        // Validate bind address
        if self
            .control
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(format!(
                "Invalid bind address: {}",
                &self.control.bind_address
            ));
        }

        // Validate logical servers
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.id.is_empty() {
                return Err("Server id cannot be empty".to_string());
            }
            if server.id == "system" {
                return Err("Server id 'system' is reserved".to_string());
            }
            if server.command.is_empty() {
                return Err(format!("Server '{}' has no launch command", server.id));
            }
            if !seen.insert(&server.id) {
                return Err(format!("Duplicate server id: '{}'", server.id));
            }
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.control.bind_address, "127.0.0.1:8081");
        assert_eq!(config.control.log_dir, PathBuf::from("logs"));
        assert!(config.servers.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert_eq!(config.backups.directory, PathBuf::from("backups"));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_creates_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.control.bind_address, "127.0.0.1:8081");

        // Should create the file
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[control]
bind_address = "0.0.0.0:9000"
log_dir = "/var/log/warden"

[[servers]]
id = "pvp"
name = "PvP Arena"
command = "./game-server"
args = ["--mode", "pvp"]
port = 7777
ipc_port = 7778
ready_marker = "Server listening"

[[servers]]
id = "pve"
name = "PvE World"
command = "./game-server"
port = 7779
ipc_port = 7780

[logging]
level = "debug"
json_format = true

[update]
repo_dir = "/srv/game"
install_command = ["npm", "install"]
server_source_dirs = ["src/server"]
entry_point = "src/control/main.js"

[backups]
directory = "/srv/backups"
"#;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.control.bind_address, "0.0.0.0:9000");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].id, "pvp");
        assert_eq!(config.servers[0].args, vec!["--mode", "pvp"]);
        assert_eq!(config.servers[1].ipc_port, 7780);
        // Missing ready_marker falls back to its default
        assert_eq!(config.servers[1].ready_marker, "Server listening");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert_eq!(config.update.repo_dir, PathBuf::from("/srv/game"));
        assert_eq!(config.update.remote, "origin");
        assert_eq!(config.backups.directory, PathBuf::from("/srv/backups"));
    }

    #[test]
    fn test_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.control.bind_address = "invalid_address".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Invalid bind address"));
    }

    #[test]
    fn test_validation_duplicate_server_ids() {
        let toml_content = r#"
[[servers]]
id = "pvp"
name = "one"
command = "./game"
port = 1
ipc_port = 2

[[servers]]
id = "pvp"
name = "two"
command = "./game"
port = 3
ipc_port = 4
"#;
        let config: AppConfig = toml::from_str(toml_content).unwrap();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Duplicate server id"));
    }

    #[test]
    fn test_validation_reserved_system_id() {
        let toml_content = r#"
[[servers]]
id = "system"
name = "nope"
command = "./game"
port = 1
ipc_port = 2
"#;
        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Invalid log level"));
    }
}
