//! Broker configuration
//!
//! Holds the connection form consumed by [`MqttClient`](crate::MqttClient):
//! host, port, optional plain credentials, TLS flag and keep-alive interval.
//! Loadable from a TOML file or built from an `mqtt://` / `mqtts://` URL.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Connection form for a single MQTT broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    /// Broker hostname or IP address
    pub host: String,
    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Plain username, if the broker requires authentication
    pub username: Option<String>,
    /// Plain password, if the broker requires authentication
    pub password: Option<String>,
    /// Open the session over TLS (default: true)
    #[serde(default = "default_tls")]
    pub tls: bool,
    /// Keep-alive interval in seconds (default: 200)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_port() -> u16 {
    8883
}

fn default_tls() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    200
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BrokerConfig {
    /// Build a config for `host:port` with the defaults above.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            tls: default_tls(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }

    /// Attach plain username/password credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Parse an `mqtt://host:port` or `mqtts://host:port` URL.
    ///
    /// The scheme decides the TLS flag; a missing port falls back to the
    /// conventional 1883/8883 split.
    pub fn from_url(broker_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

        let tls = match url.scheme() {
            "mqtt" => false,
            "mqtts" => true,
            _ => return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?
            .to_string();
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        let mut config = Self::new(host, port);
        config.tls = tls;
        if !url.username().is_empty() {
            config.username = Some(url.username().to_string());
            config.password = url.password().map(str::to_string);
        }
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BrokerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker host must not be empty".to_string(),
            ));
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::InvalidConfig(
                "password set without a username".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml() {
        let toml_content = r#"
host = "broker.example.com"
"#;
        let config: BrokerConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.host, "broker.example.com");
        assert_eq!(config.port, 8883);
        assert!(config.tls);
        assert_eq!(config.keep_alive_secs, 200);
        assert_eq!(config.username, None);
    }

    #[test]
    fn test_full_toml() {
        let toml_content = r#"
host = "10.0.0.7"
port = 1883
username = "u"
password = "p"
tls = false
keep_alive_secs = 60
"#;
        let config: BrokerConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.port, 1883);
        assert!(!config.tls);
        assert_eq!(config.username.as_deref(), Some("u"));
        assert_eq!(config.password.as_deref(), Some("p"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_url_plain() {
        let config = BrokerConfig::from_url("mqtt://localhost:1883").unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert!(!config.tls);
    }

    #[test]
    fn test_from_url_tls_default_port() {
        let config = BrokerConfig::from_url("mqtts://broker.example.com").unwrap();
        assert_eq!(config.port, 8883);
        assert!(config.tls);
    }

    #[test]
    fn test_from_url_with_userinfo() {
        let config = BrokerConfig::from_url("mqtts://u:p@broker.example.com:8884").unwrap();
        assert_eq!(config.port, 8884);
        assert_eq!(config.username.as_deref(), Some("u"));
        assert_eq!(config.password.as_deref(), Some("p"));
    }

    #[test]
    fn test_from_url_rejects_other_schemes() {
        assert!(matches!(
            BrokerConfig::from_url("http://localhost:1883"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            BrokerConfig::from_url("not a url"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let config = BrokerConfig::new("", 1883);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_password_without_username() {
        let mut config = BrokerConfig::new("localhost", 1883);
        config.password = Some("p".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_credentials() {
        let config = BrokerConfig::new("localhost", 1883).with_credentials("user", "pass");
        assert_eq!(config.username.as_deref(), Some("user"));
        assert!(config.validate().is_ok());
    }
}
