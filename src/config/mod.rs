//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`MODRELAY_*` overrides)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::protocol::DEFAULT_PORT;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Player identity used during login brokering
    #[serde(default)]
    pub profile: ProfileConfig,

    /// Session-join backend configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Proxied servers, in display order
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file: {e}")))?;

        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// The default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("modrelay").join("config.toml"))
    }

    /// Apply environment-variable overrides
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("MODRELAY_ACCESS_TOKEN") {
            self.profile.access_token = token;
        }
        if let Ok(endpoint) = std::env::var("MODRELAY_SESSION_ENDPOINT") {
            self.auth.session_endpoint = endpoint;
        }
    }

    /// Look up a server entry by id
    pub fn server(&self, id: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|s| s.id == id)
    }
}

/// Player identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Access token presented to the session backend
    #[serde(default)]
    pub access_token: String,

    /// The player's profile id
    #[serde(default = "Uuid::nil")]
    pub profile_id: Uuid,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            profile_id: Uuid::nil(),
        }
    }
}

/// Session-join backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Join endpoint URL
    pub session_endpoint: String,

    /// Skip the join call entirely (offline servers)
    pub offline: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_endpoint: crate::auth::SESSION_JOIN_ENDPOINT.to_string(),
            offline: false,
        }
    }
}

/// One proxied server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Stable id, referenced from the CLI
    pub id: String,

    /// User-facing name
    #[serde(default)]
    pub name: String,

    /// Remote address in the form `host` or `host:port`
    pub address: String,

    /// Local port to listen on
    #[serde(default = "default_local_port")]
    pub local_port: u16,
}

fn default_local_port() -> u16 {
    DEFAULT_PORT
}

impl ServerEntry {
    /// Split the address into host and port, defaulting the port
    pub fn remote_addr(&self) -> Result<(String, u16)> {
        let mut parts = self.address.split(':');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RelayError::Config(format!("invalid address: {}", self.address)))?;

        let port = match parts.next() {
            None => DEFAULT_PORT,
            Some(p) => p
                .parse()
                .map_err(|_| RelayError::Config(format!("invalid port in: {}", self.address)))?,
        };

        if parts.next().is_some() {
            return Err(RelayError::Config(format!(
                "invalid address: {}",
                self.address
            )));
        }

        Ok((host.to_string(), port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert!(config.servers.is_empty());
        assert_eq!(config.profile.profile_id, Uuid::nil());
        assert!(!config.auth.offline);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [profile]
            access_token = "token-123"
            profile_id = "f81d4fae-7dec-11d0-a765-00a0c91e6bf6"

            [[servers]]
            id = "hub"
            name = "Main Hub"
            address = "play.example.net"
            local_port = 25565

            [[servers]]
            id = "dev"
            address = "127.0.0.1:25570"
        "#;

        let config: RelayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.profile.access_token, "token-123");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.server("hub").unwrap().name, "Main Hub");
        assert_eq!(config.server("dev").unwrap().local_port, DEFAULT_PORT);
    }

    #[test]
    fn test_remote_addr_parsing() {
        let entry = |address: &str| ServerEntry {
            id: "x".to_string(),
            name: String::new(),
            address: address.to_string(),
            local_port: DEFAULT_PORT,
        };

        assert_eq!(
            entry("play.example.net").remote_addr().unwrap(),
            ("play.example.net".to_string(), DEFAULT_PORT)
        );
        assert_eq!(
            entry("127.0.0.1:25570").remote_addr().unwrap(),
            ("127.0.0.1".to_string(), 25570)
        );
        assert!(entry("a:b:c").remote_addr().is_err());
        assert!(entry("host:notaport").remote_addr().is_err());
        assert!(entry("").remote_addr().is_err());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let config = RelayConfig {
            profile: ProfileConfig {
                access_token: "t".to_string(),
                profile_id: Uuid::nil(),
            },
            auth: AuthConfig::default(),
            servers: vec![ServerEntry {
                id: "hub".to_string(),
                name: "Hub".to_string(),
                address: "example.net:1234".to_string(),
                local_port: 25566,
            }],
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        let loaded = RelayConfig::from_file(&path).unwrap();
        assert_eq!(loaded.servers[0].local_port, 25566);
        assert_eq!(
            loaded.servers[0].remote_addr().unwrap(),
            ("example.net".to_string(), 1234)
        );
    }
}
