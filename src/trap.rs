//! Decoded SNMP notification types
//!
//! These are what the decoder hands to the trap processor. They are built
//! once per received datagram and never mutated afterwards.

use crate::oid::{well_known, Oid};
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpVersion::V1 => f.write_str("v1"),
            SnmpVersion::V2c => f.write_str("v2c"),
        }
    }
}

/// Native value of a variable binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress(Ipv4Addr),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    /// Short SMI type name, used in debug logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::OctetString(_) => "OCTET STRING",
            Value::Null => "NULL",
            Value::ObjectId(_) => "OBJECT IDENTIFIER",
            Value::IpAddress(_) => "IpAddress",
            Value::Counter32(_) => "Counter32",
            Value::Gauge32(_) => "Gauge32",
            Value::TimeTicks(_) => "TimeTicks",
            Value::Opaque(_) => "Opaque",
            Value::Counter64(_) => "Counter64",
            Value::NoSuchObject => "noSuchObject",
            Value::NoSuchInstance => "noSuchInstance",
            Value::EndOfMibView => "endOfMibView",
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::OctetString(s.into_bytes())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::OctetString(s.as_bytes().to_vec())
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            f.write_str(":")?;
        }
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::OctetString(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => f.write_str(s),
                Err(_) => write_hex(f, bytes),
            },
            Value::Null => f.write_str("Null"),
            Value::ObjectId(oid) => write!(f, "{oid}"),
            Value::IpAddress(addr) => write!(f, "{addr}"),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => write!(f, "{v}"),
            Value::Opaque(bytes) => write_hex(f, bytes),
            Value::Counter64(v) => write!(f, "{v}"),
            Value::NoSuchObject
            | Value::NoSuchInstance
            | Value::EndOfMibView => f.write_str(self.type_name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }
}

/// An SNMPv2c notification, the only kind matched against descriptors.
#[derive(Debug, Clone)]
pub struct IncomingTrap {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub source_address: IpAddr,
    pub community: String,
    /// Value of `snmpTrapOID.0`.
    pub identifier: Oid,
    pub uptime: Option<u32>,
    pub variable_bindings: Vec<VarBind>,
}

impl IncomingTrap {
    /// Build a trap from its bindings, taking the identifier and uptime from
    /// the standard `snmpTrapOID.0` and `sysUpTime.0` entries.
    pub fn from_bindings(
        source_address: IpAddr,
        community: String,
        variable_bindings: Vec<VarBind>,
    ) -> Option<Self> {
        let identifier = variable_bindings.iter().find_map(|vb| match &vb.value {
            Value::ObjectId(oid) if vb.oid.arcs() == well_known::SNMP_TRAP_OID => {
                Some(oid.clone())
            }
            _ => None,
        })?;
        let uptime = variable_bindings.iter().find_map(|vb| match vb.value {
            Value::TimeTicks(t) if vb.oid.arcs() == well_known::SYS_UPTIME => Some(t),
            _ => None,
        });

        Some(Self {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            source_address,
            community,
            identifier,
            uptime,
            variable_bindings,
        })
    }

    /// First binding whose OID equals `oid`.
    pub fn binding(&self, oid: &Oid) -> Option<&Value> {
        self.variable_bindings
            .iter()
            .find(|vb| &vb.oid == oid)
            .map(|vb| &vb.value)
    }
}

/// An SNMPv1 Trap-PDU. Logged, never dispatched.
#[derive(Debug, Clone)]
pub struct V1Trap {
    pub source_address: IpAddr,
    pub community: String,
    pub enterprise: Oid,
    pub agent_address: Ipv4Addr,
    pub generic_trap: i64,
    pub specific_trap: i64,
    pub timestamp: u32,
    pub variable_bindings: Vec<VarBind>,
}

impl fmt::Display for V1Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v1 trap from {} enterprise={} agent={} generic={} specific={} uptime={} bindings=[",
            self.source_address,
            self.enterprise,
            self.agent_address,
            self.generic_trap,
            self.specific_trap,
            self.timestamp
        )?;
        for (i, vb) in self.variable_bindings.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", vb.oid, vb.value)?;
        }
        f.write_str("]")
    }
}

/// Anything the decoder can produce from a valid datagram.
#[derive(Debug, Clone)]
pub enum Notification {
    V1(V1Trap),
    V2c(IncomingTrap),
}

impl Notification {
    pub fn version(&self) -> SnmpVersion {
        match self {
            Notification::V1(_) => SnmpVersion::V1,
            Notification::V2c(_) => SnmpVersion::V2c,
        }
    }

    pub fn source_address(&self) -> IpAddr {
        match self {
            Notification::V1(t) => t.source_address,
            Notification::V2c(t) => t.source_address,
        }
    }
}
