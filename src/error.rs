//! Error types for trapfwd
//!
//! Each failure mode of the trap pipeline has its own enum so callers can
//! decide locally whether it is fatal. None of these abort trap processing:
//! the processor logs them and moves on to the next trap.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration problems found at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No client socket bind address in `snmp` or `client.socket`.
    /// Non-fatal: the service runs without forwarding.
    #[error("client socket bind address is not configured - events will not be forwarded")]
    MissingClientSocket,

    #[error("invalid port number: {0}")]
    InvalidPort(u16),

    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("community string cannot be empty")]
    EmptyCommunity,

    #[error("send_interval must be greater than zero")]
    InvalidSendInterval,

    #[error("{0} must be greater than zero")]
    InvalidTimeout(&'static str),

    /// Non-fatal: every event gets the source address as its hostname.
    #[error("hostname_timeout_ms is zero - reverse DNS lookups are disabled")]
    HostnameLookupDisabled,
}

/// A descriptor file that could not be read or parsed.
#[derive(Debug, Error)]
pub enum DescriptorLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("entry #{index} in {path} is not a valid trap definition: {message}")]
    InvalidEntry {
        path: PathBuf,
        index: usize,
        message: String,
    },

    #[error("invalid trap_oid '{value}' in {path}")]
    InvalidTrapOid { path: PathBuf, value: String },

    #[error("field '{label}' in {path} must be a string identifier")]
    InvalidField { path: PathBuf, label: String },
}

/// A symbolic identifier could not be turned into a numeric OID.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no symbol definitions are loaded, cannot resolve '{0}'")]
    NoDefinitions(String),

    #[error("unknown symbolic name '{0}'")]
    UnknownName(String),
}

/// Raw datagram could not be turned into a trap.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed SNMP message: {0}")]
    Malformed(String),

    #[error("unsupported SNMP message: {0}")]
    Unsupported(String),

    #[error("community string '{received}' rejected")]
    Community { received: String },

    #[error("SNMPv2 trap carries no snmpTrapOID.0 binding")]
    MissingTrapOid,
}

/// The finished event could not be handed to the local agent socket.
#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write event to {endpoint}: {source}")]
    Write {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out talking to {endpoint}")]
    Timeout { endpoint: String },

    #[error("failed to serialise event: {0}")]
    Serialize(#[from] serde_json::Error),
}
