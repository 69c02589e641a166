//! Event publishing to the local Sensu client socket
//!
//! Each event is written as one line of JSON over a fresh TCP connection,
//! which is closed straight after. Failures are returned to the caller, who
//! logs and drops the event; nothing is retried or queued.

use crate::error::ForwardingError;
use crate::templater::OutputEvent;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutputEvent) -> Result<(), ForwardingError>;

    /// Human readable destination, for logs.
    fn endpoint(&self) -> String;
}

/// Publisher for the Sensu client socket input.
#[derive(Debug, Clone)]
pub struct SocketPublisher {
    host: String,
    port: u16,
    timeout: Duration,
}

impl SocketPublisher {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Newline terminated compact JSON.
    pub fn format_payload(event: &OutputEvent) -> Result<String, ForwardingError> {
        let mut payload = event.to_json()?;
        payload.push('\n');
        Ok(payload)
    }

    async fn send(&self, payload: &[u8]) -> Result<(), ForwardingError> {
        let endpoint = self.endpoint();
        debug!("opening connection to {}", endpoint);
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| ForwardingError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        stream
            .write_all(payload)
            .await
            .map_err(|source| ForwardingError::Write {
                endpoint: endpoint.clone(),
                source,
            })?;
        stream
            .shutdown()
            .await
            .map_err(|source| ForwardingError::Write { endpoint, source })?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for SocketPublisher {
    async fn publish(&self, event: &OutputEvent) -> Result<(), ForwardingError> {
        let payload = Self::format_payload(event)?;
        debug!("sending SNMP check event: {}", payload.trim_end());

        tokio::time::timeout(self.timeout, self.send(payload.as_bytes()))
            .await
            .map_err(|_| ForwardingError::Timeout {
                endpoint: self.endpoint(),
            })?
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
