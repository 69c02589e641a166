//! Configuration management for trapfwd
//!
//! The configuration file mirrors the Sensu settings layout: listener and
//! descriptor options under `snmp`, the client socket under `client.socket`.
//! Every key has a default, so an empty `{}` is a valid configuration.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CLIENT_SOCKET_PORT: u16 = 3030;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub snmp: SnmpConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnmpConfig {
    pub bind: String,
    pub port: u16,
    pub community: String,
    /// Handler set on events whose template does not name one.
    pub handler: String,
    /// Seconds between trap statistics log lines.
    pub send_interval: u64,
    pub trapdefs_dir: String,
    pub mibs_dir: String,
    /// Falls back to `client.socket.bind`.
    pub client_socket_bind: Option<String>,
    /// Falls back to `client.socket.port`, then 3030.
    pub client_socket_port: Option<u16>,
    pub client_socket_timeout_ms: u64,
    pub hostname_timeout_ms: u64,
    pub max_packet_size: usize,
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 1062,
            community: "public".to_string(),
            handler: "default".to_string(),
            send_interval: 60,
            trapdefs_dir: "/etc/sensu/traps.d".to_string(),
            mibs_dir: "/etc/sensu/mibs".to_string(),
            client_socket_bind: None,
            client_socket_port: None,
            client_socket_timeout_ms: 2000,
            hostname_timeout_ms: 500,
            max_packet_size: 65535,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub socket: ClientSocketConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSocketConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub console_output: bool,
    pub file_output: Option<String>,
    /// `daily`, `hourly` or `never`.
    pub rotation_strategy: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: None,
            rotation_strategy: "daily".to_string(),
        }
    }
}

/// Resolved address of the local client socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSocket {
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Configuration written by `--generate-config`: the defaults plus the
    /// standard Sensu client socket.
    pub fn sample() -> Self {
        let mut config = Self::default();
        config.client.socket = ClientSocketConfig {
            bind: Some("127.0.0.1".to_string()),
            port: Some(DEFAULT_CLIENT_SOCKET_PORT),
        };
        config
    }

    /// Load configuration from a JSON file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .context("Failed to read configuration file")?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse configuration JSON")
    }

    /// Save configuration to a JSON file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialise configuration")?;

        tokio::fs::write(path.as_ref(), content)
            .await
            .context("Failed to write configuration file")?;

        Ok(())
    }

    /// `bind:port` for the UDP listener.
    pub fn listen_address(&self) -> String {
        match self.snmp.bind.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{}]:{}", self.snmp.bind, self.snmp.port),
            _ => format!("{}:{}", self.snmp.bind, self.snmp.port),
        }
    }

    /// Where events are forwarded, if anywhere.
    pub fn client_socket(&self) -> Option<ClientSocket> {
        let host = self
            .snmp
            .client_socket_bind
            .clone()
            .or_else(|| self.client.socket.bind.clone())
            .filter(|h| !h.trim().is_empty())?;
        let port = self
            .snmp
            .client_socket_port
            .or(self.client.socket.port)
            .unwrap_or(DEFAULT_CLIENT_SOCKET_PORT);
        Some(ClientSocket { host, port })
    }

    pub fn hostname_timeout(&self) -> Duration {
        Duration::from_millis(self.snmp.hostname_timeout_ms)
    }

    pub fn client_socket_timeout(&self) -> Duration {
        Duration::from_millis(self.snmp.client_socket_timeout_ms)
    }

    /// Validate the configuration.
    ///
    /// Hard errors stop startup; the returned list holds non-fatal problems
    /// the caller should log.
    pub fn validate(&self) -> Result<Vec<ConfigError>, ConfigError> {
        if self.snmp.port == 0 {
            return Err(ConfigError::InvalidPort(self.snmp.port));
        }
        if self.snmp.bind.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(self.snmp.bind.clone()));
        }
        if self.snmp.community.is_empty() {
            return Err(ConfigError::EmptyCommunity);
        }
        if self.snmp.send_interval == 0 {
            return Err(ConfigError::InvalidSendInterval);
        }
        if self.snmp.client_socket_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("client_socket_timeout_ms"));
        }

        let mut warnings = Vec::new();
        if self.snmp.hostname_timeout_ms == 0 {
            warnings.push(ConfigError::HostnameLookupDisabled);
        }
        match self.client_socket() {
            None => warnings.push(ConfigError::MissingClientSocket),
            Some(socket) if socket.port == 0 => {
                warnings.push(ConfigError::InvalidPort(socket.port))
            }
            Some(_) => {}
        }
        Ok(warnings)
    }
}
