//! Configuration management for the Saurus relay.
//!
//! This module handles loading, validation, and conversion of relay configuration
//! from TOML files and command-line arguments.

use multisocket::ListenOptions;
use saurus_server::HandlerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

fn default_bind_address() -> String {
    "127.0.0.1:8443".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_code_timeout_ms() -> u64 {
    60_000
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub pairing: PairingSettings,
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
    #[serde(default)]
    pub requests: RequestSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener settings.
///
/// TLS is enabled when both `cert_file` and `key_file` are non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the relay to (e.g., "0.0.0.0:8443")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// PEM certificate chain
    #[serde(default)]
    pub cert_file: String,
    /// PEM private key (PKCS#8 or RSA)
    #[serde(default)]
    pub key_file: String,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingSettings {
    /// How long an app's pairing code stays valid
    #[serde(default = "default_code_timeout_ms")]
    pub code_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    /// Delay between pings to a game server
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// How long a game server may take to answer a ping
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSettings {
    /// Deadline for requests sent to game servers
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cert_file: String::new(),
            key_file: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            code_timeout_ms: default_code_timeout_ms(),
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl ServerSettings {
    pub fn tls_enabled(&self) -> bool {
        !self.cert_file.is_empty() && !self.key_file.is_empty()
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Listener options for [`multisocket::Listener::bind`].
    pub fn to_listen_options(&self) -> Result<ListenOptions, Box<dyn std::error::Error>> {
        let (cert_file, key_file) = if self.server.tls_enabled() {
            (
                Some(PathBuf::from(&self.server.cert_file)),
                Some(PathBuf::from(&self.server.key_file)),
            )
        } else {
            (None, None)
        };

        Ok(ListenOptions {
            bind_address: self.server.bind_address.parse()?,
            cert_file,
            key_file,
            max_connections: self.server.max_connections,
        })
    }

    pub fn to_handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            code_timeout: Duration::from_millis(self.pairing.code_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            request_timeout: Duration::from_millis(self.requests.timeout_ms),
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        if self.server.cert_file.is_empty() != self.server.key_file.is_empty() {
            return Err("TLS needs both server.cert_file and server.key_file".to_string());
        }

        if self.server.max_connections == 0 {
            return Err("server.max_connections must be greater than 0".to_string());
        }

        let timeouts = [
            ("pairing.code_timeout_ms", self.pairing.code_timeout_ms),
            ("heartbeat.interval_ms", self.heartbeat.interval_ms),
            ("heartbeat.timeout_ms", self.heartbeat.timeout_ms),
            ("requests.timeout_ms", self.requests.timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(format!("{name} must be greater than 0"));
        }

        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LEVELS:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_address, "127.0.0.1:8443");
        assert_eq!(config.server.max_connections, 1000);
        assert!(!config.server.tls_enabled());
        assert_eq!(config.pairing.code_timeout_ms, 60_000);
        assert_eq!(config.heartbeat.interval_ms, 1000);
        assert_eq!(config.heartbeat.timeout_ms, 5000);
        assert_eq!(config.requests.timeout_ms, 1000);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_handler_defaults() {
        assert_eq!(AppConfig::default().to_handler_config(), HandlerConfig::default());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saurus.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // The written file loads back to the same configuration.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
bind_address = "0.0.0.0:443"
cert_file = "/etc/saurus/fullchain.pem"
key_file = "/etc/saurus/privkey.pem"

[pairing]
code_timeout_ms = 30000

[logging]
level = "debug"
json_format = true
"#;
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:443");
        assert!(config.server.tls_enabled());
        // Omitted keys and sections fall back to defaults.
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.heartbeat, HeartbeatSettings::default());
        assert_eq!(config.pairing.code_timeout_ms, 30_000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());

        let options = config.to_listen_options().unwrap();
        assert!(options.tls_enabled());
        assert_eq!(options.bind_address.port(), 443);
        assert_eq!(
            config.to_handler_config().code_timeout,
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_toml() {
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), "[server\nbind_address = ").await.unwrap();
        assert!(AppConfig::load_from_file(file.path()).await.is_err());
    }

    #[test]
    fn test_plain_listen_options() {
        let options = AppConfig::default().to_listen_options().unwrap();
        assert!(!options.tls_enabled());
        assert_eq!(options.cert_file, None);
        assert_eq!(options.max_connections, 1000);
    }

    #[test]
    fn test_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "localhost".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid bind address"));
    }

    #[test]
    fn test_validation_half_configured_tls() {
        let mut config = AppConfig::default();
        config.server.cert_file = "fullchain.pem".to_string();
        assert!(config.validate().is_err());

        config.server.key_file = "privkey.pem".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_timeouts() {
        let mut config = AppConfig::default();
        config.heartbeat.timeout_ms = 0;
        assert_eq!(
            config.validate().unwrap_err(),
            "heartbeat.timeout_ms must be greater than 0"
        );

        let mut config = AppConfig::default();
        config.pairing.code_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_log_levels() {
        let mut config = AppConfig::default();
        for level in VALID_LEVELS {
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "{level}");
        }
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }
}
