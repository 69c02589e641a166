//! SNMP trap listener
//!
//! Receives datagrams on the configured UDP port, decodes them and passes
//! the notifications on, in arrival order, to the trap processor.

use crate::config::Config;
use crate::decoder::decode_packet;
use crate::trap::Notification;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_address: String,
    pub community: String,
    pub max_packet_size: usize,
}

impl From<&Config> for ListenerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_address: config.listen_address(),
            community: config.snmp.community.clone(),
            max_packet_size: config.snmp.max_packet_size.max(484),
        }
    }
}

pub struct SnmpListener {
    config: ListenerConfig,
    trap_sender: mpsc::UnboundedSender<Notification>,
}

impl SnmpListener {
    pub fn new(config: ListenerConfig, trap_sender: mpsc::UnboundedSender<Notification>) -> Self {
        Self {
            config,
            trap_sender,
        }
    }

    pub async fn bind(&self) -> Result<UdpSocket> {
        UdpSocket::bind(&self.config.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", self.config.bind_address))
    }

    /// Bind and listen until the processor goes away.
    pub async fn start(self) -> Result<()> {
        let socket = self.bind().await?;
        self.serve(socket).await
    }

    /// Listen on an already bound socket.
    pub async fn serve(self, socket: UdpSocket) -> Result<()> {
        info!(
            "SNMP trap listener has started on {}",
            socket.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| self.config.bind_address.clone())
        );

        let mut buffer = vec![0u8; self.config.max_packet_size];
        let mut packet_count = 0u64;

        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, src_addr)) => {
                    packet_count += 1;
                    if packet_count % 1000 == 0 {
                        info!("Processed {} UDP packets on {}", packet_count, self.config.bind_address);
                    }

                    let Some(notification) = self.process_datagram(&buffer[..len], src_addr) else {
                        continue;
                    };
                    if self.trap_sender.send(notification).is_err() {
                        info!("trap processor has stopped, closing listener");
                        return Ok(());
                    }
                }
                Err(e) => {
                    // Continue listening despite errors
                    error!("Failed to receive UDP packet: {}", e);
                }
            }
        }
    }

    fn process_datagram(&self, data: &[u8], src_addr: SocketAddr) -> Option<Notification> {
        debug!("Processing SNMP packet from {} ({} bytes)", src_addr, data.len());

        match decode_packet(data, src_addr.ip(), &self.config.community) {
            Ok(notification) => {
                debug!("Decoded SNMP {} notification from {}", notification.version(), src_addr);
                Some(notification)
            }
            Err(e) => {
                warn!("Failed to parse SNMP trap from {}: {}", src_addr, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::encode;
    use crate::oid::{well_known, Oid};
    use crate::trap::Value;
    use std::time::Duration;

    fn config() -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            community: "public".into(),
            max_packet_size: 65535,
        }
    }

    #[tokio::test]
    async fn test_forwards_decoded_traps_in_order_and_drops_garbage() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = SnmpListener::new(config(), tx);
        let socket = listener.bind().await.unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = tokio::spawn(listener.serve(socket));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for (i, community) in ["public", "wrong", "public"].iter().enumerate() {
            let packet = encode::v2c_trap(
                community,
                &[(
                    Oid::from_slice(well_known::SNMP_TRAP_OID),
                    Value::ObjectId(format!("1.3.6.1.4.1.99.{i}").parse().unwrap()),
                )],
            );
            sender.send_to(&packet, addr).await.unwrap();
        }
        sender.send_to(b"garbage", addr).await.unwrap();

        let mut identifiers = Vec::new();
        for _ in 0..2 {
            let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let Notification::V2c(trap) = notification else {
                panic!("expected v2c");
            };
            assert_eq!(trap.source_address, sender.local_addr().unwrap().ip());
            identifiers.push(trap.identifier.to_string());
        }
        assert_eq!(identifiers, vec!["1.3.6.1.4.1.99.0", "1.3.6.1.4.1.99.2"]);

        // closing the processor side stops the listener on the next packet
        drop(rx);
        let packet = encode::v2c_trap(
            "public",
            &[(
                Oid::from_slice(well_known::SNMP_TRAP_OID),
                Value::ObjectId("1.3.6.1.4.1.99.9".parse().unwrap()),
            )],
        );
        sender.send_to(&packet, addr).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_listener_config_from_config() {
        let config = Config::from_json(r#"{"snmp": {"bind": "127.0.0.1", "port": 1162, "community": "s3cret"}}"#)
            .unwrap();
        let listener = ListenerConfig::from(&config);
        assert_eq!(listener.bind_address, "127.0.0.1:1162");
        assert_eq!(listener.community, "s3cret");
        assert_eq!(listener.max_packet_size, 65535);
    }
}
