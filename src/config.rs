//! Configuration module for Filedock.

use serde::Deserialize;
use std::path::Path;

use crate::storage::validate_segment;
use crate::{DockError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage root directory. Every user file lives under it.
    #[serde(default = "default_root")]
    pub root: String,
    /// Name of the staging subdirectory for in-flight uploads.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    /// Maximum size of a single uploaded file in megabytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_mb: u64,
    /// Maximum number of files per upload request.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_root() -> String {
    "data/uploads".to_string()
}

fn default_temp_dir() -> String {
    ".tmp".to_string()
}

fn default_max_file_size() -> u64 {
    100
}

fn default_max_files() -> usize {
    10
}

impl StorageConfig {
    /// Maximum size of a single uploaded file in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            temp_dir: default_temp_dir(),
            max_file_size_mb: default_max_file_size(),
            max_files: default_max_files(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/filedock.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Web configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebConfig {
    /// CORS allowed origins. Empty means any origin without credentials.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Web configuration.
    #[serde(default)]
    pub web: WebConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(DockError::FileSystem)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| DockError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FILEDOCK_UPLOAD_DIR`: storage root
    /// - `FILEDOCK_PORT`: listen port
    /// - `FILEDOCK_CORS_ORIGIN`: single allowed CORS origin
    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = non_empty_env("FILEDOCK_UPLOAD_DIR") {
            self.storage.root = root;
        }

        if let Some(port) = non_empty_env("FILEDOCK_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => eprintln!("Ignoring invalid FILEDOCK_PORT value: {port}"),
            }
        }

        if let Some(origin) = non_empty_env("FILEDOCK_CORS_ORIGIN") {
            self.web.cors_origins = vec![origin];
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.storage.root.trim().is_empty() {
            return Err(DockError::Config("storage.root must not be empty".to_string()));
        }

        let temp = &self.storage.temp_dir;
        if validate_segment(temp).is_err() || temp.contains(['/', '\\']) || temp == "." {
            return Err(DockError::Config(format!(
                "storage.temp_dir must be a single directory name, got {temp:?}"
            )));
        }

        if self.storage.max_files == 0 {
            return Err(DockError::Config(
                "storage.max_files must be at least 1".to_string(),
            ));
        }

        if self.storage.max_file_size_mb == 0 {
            return Err(DockError::Config(
                "storage.max_file_size_mb must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3001);

        assert_eq!(config.storage.root, "data/uploads");
        assert_eq!(config.storage.temp_dir, ".tmp");
        assert_eq!(config.storage.max_file_size_mb, 100);
        assert_eq!(config.storage.max_file_size_bytes(), 104_857_600);
        assert_eq!(config.storage.max_files, 10);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/filedock.log");

        assert!(config.web.cors_origins.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 8080

[storage]
root = "/srv/drop"
temp_dir = ".staging"
max_file_size_mb = 20
max_files = 50

[logging]
level = "debug"
file = "custom/logs/app.log"

[web]
cors_origins = ["http://localhost:3000", "http://localhost:5173"]
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);

        assert_eq!(config.storage.root, "/srv/drop");
        assert_eq!(config.storage.temp_dir, ".staging");
        assert_eq!(config.storage.max_file_size_mb, 20);
        assert_eq!(config.storage.max_files, 50);

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file, "custom/logs/app.log");

        assert_eq!(config.web.cors_origins.len(), 2);
        assert_eq!(config.web.cors_origins[1], "http://localhost:5173");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[storage]
root = "files"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.storage.root, "files");
        assert_eq!(config.storage.temp_dir, ".tmp");
        assert_eq!(config.server.port, 3001);
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.storage.root, "data/uploads");
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");

        if let Err(DockError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(DockError::FileSystem(_))));
    }

    #[test]
    fn test_apply_env_overrides() {
        let original_dir = std::env::var("FILEDOCK_UPLOAD_DIR").ok();
        let original_port = std::env::var("FILEDOCK_PORT").ok();

        std::env::set_var("FILEDOCK_UPLOAD_DIR", "/tmp/filedock-env");
        std::env::set_var("FILEDOCK_PORT", "not-a-port");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.storage.root, "/tmp/filedock-env");
        // Invalid port is ignored
        assert_eq!(config.server.port, 3001);

        match original_dir {
            Some(val) => std::env::set_var("FILEDOCK_UPLOAD_DIR", val),
            None => std::env::remove_var("FILEDOCK_UPLOAD_DIR"),
        }
        match original_port {
            Some(val) => std::env::set_var("FILEDOCK_PORT", val),
            None => std::env::remove_var("FILEDOCK_PORT"),
        }
    }

    #[test]
    fn test_validate_default() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_temp_dir() {
        for bad in ["", "..", "a/b", "a\\b", ".", "x\0"] {
            let mut config = Config::default();
            config.storage.temp_dir = bad.to_string();
            assert!(
                matches!(config.validate(), Err(DockError::Config(_))),
                "temp_dir {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_limits() {
        let mut config = Config::default();
        config.storage.max_files = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.max_file_size_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_file_size_bytes_saturates() {
        let mut config = Config::default();
        config.storage.max_file_size_mb = u64::MAX / 2;
        assert_eq!(config.storage.max_file_size_bytes(), u64::MAX);
    }
}
