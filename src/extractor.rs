//! Field extraction
//!
//! Pulls the values named by a descriptor's `trap` map out of a matched trap,
//! plus the two fields every event can use: `source` and `hostname`.

use crate::descriptor::{FieldTarget, TrapDescriptor};
use crate::oid::Oid;
use crate::resolver::IdentifierResolver;
use crate::trap::{IncomingTrap, Value};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const SOURCE_FIELD: &str = "source";
pub const HOSTNAME_FIELD: &str = "hostname";

/// Reverse name lookup for trap sources.
#[async_trait]
pub trait ReverseLookup: Send + Sync {
    async fn lookup(&self, addr: IpAddr) -> std::io::Result<String>;
}

/// System resolver (`getnameinfo`) run on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsReverseLookup;

#[async_trait]
impl ReverseLookup for DnsReverseLookup {
    async fn lookup(&self, addr: IpAddr) -> std::io::Result<String> {
        tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr))
            .await
            .map_err(std::io::Error::other)?
    }
}

/// Label -> value map in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    entries: Vec<(String, Value)>,
}

impl ExtractedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; a replaced label keeps its original position.
    pub fn insert(&mut self, label: impl Into<String>, value: Value) {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((label, value)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, v)| v)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct FieldExtractor {
    resolver: IdentifierResolver,
    reverse: Arc<dyn ReverseLookup>,
    hostname_timeout: Duration,
}

impl FieldExtractor {
    pub fn new(
        resolver: IdentifierResolver,
        reverse: Arc<dyn ReverseLookup>,
        hostname_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            reverse,
            hostname_timeout,
        }
    }

    /// Hostname of `addr`, or the address itself when the lookup fails or
    /// does not finish within the configured timeout.
    pub async fn hostname(&self, addr: IpAddr) -> String {
        match tokio::time::timeout(self.hostname_timeout, self.reverse.lookup(addr)).await {
            Ok(Ok(name)) if !name.is_empty() => name,
            Ok(Ok(_)) => addr.to_string(),
            Ok(Err(e)) => {
                debug!("unable to resolve name for {}: {}", addr, e);
                addr.to_string()
            }
            Err(_) => {
                debug!(
                    "reverse lookup for {} timed out after {:?}",
                    addr, self.hostname_timeout
                );
                addr.to_string()
            }
        }
    }

    fn resolve_target(&self, target: &FieldTarget) -> Option<Oid> {
        match target {
            FieldTarget::Literal(oid) => Some(oid.clone()),
            FieldTarget::Symbolic(name) => self.resolver.resolve(name).ok(),
        }
    }

    pub async fn extract(&self, trap: &IncomingTrap, descriptor: &TrapDescriptor) -> ExtractedFields {
        let mut fields = ExtractedFields::new();
        fields.insert(SOURCE_FIELD, Value::from(trap.source_address.to_string()));
        fields.insert(HOSTNAME_FIELD, Value::from(self.hostname(trap.source_address).await));

        debug!("checking trap definition {} for key/value template pairs", descriptor.origin);
        for spec in &descriptor.fields {
            let Some(oid) = self.resolve_target(&spec.target) else {
                warn!(
                    "trap.{} refers to '{}' which cannot be resolved to an OID - check your configuration",
                    spec.label, spec.target
                );
                continue;
            };

            match trap.binding(&oid) {
                Some(value) => {
                    debug!("discovered value of {} is '{}' ({})", spec.label, value, value.type_name());
                    fields.insert(spec.label.clone(), value.clone());
                }
                None => warn!(
                    "trap.{} has OID({}) that was not found in incoming trap - check your configuration",
                    spec.label, oid
                ),
            }
        }

        debug!("template fields are: {:?}", fields);
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldSpec, Trigger};
    use crate::resolver::YamlDefinitions;
    use crate::trap::VarBind;
    use serde_json::Map;
    use std::collections::HashMap;

    struct FixedLookup(Option<&'static str>);

    #[async_trait]
    impl ReverseLookup for FixedLookup {
        async fn lookup(&self, _addr: IpAddr) -> std::io::Result<String> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no PTR record"))
        }
    }

    struct HangingLookup;

    #[async_trait]
    impl ReverseLookup for HangingLookup {
        async fn lookup(&self, _addr: IpAddr) -> std::io::Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too-late.example.net".into())
        }
    }

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn trap() -> IncomingTrap {
        IncomingTrap::from_bindings(
            "192.0.2.44".parse().unwrap(),
            "public".into(),
            vec![
                VarBind::new(
                    oid("1.3.6.1.6.3.1.1.4.1.0"),
                    Value::ObjectId(oid("1.3.6.1.4.1.8072.2.3.0.1")),
                ),
                VarBind::new(oid("1.3.6.1.4.1.8072.2.3.2.1.0"), Value::Integer(123456)),
                VarBind::new(oid("1.3.6.1.4.1.8072.2.3.2.2.0"), Value::from("first")),
                VarBind::new(oid("1.3.6.1.4.1.8072.2.3.2.2.0"), Value::from("second")),
            ],
        )
        .unwrap()
    }

    fn descriptor(fields: &[(&str, &str)]) -> TrapDescriptor {
        TrapDescriptor {
            trigger: Trigger::Literal(oid("1.3.6.1.4.1.8072.2.3.0.1")),
            fields: fields
                .iter()
                .map(|(label, target)| FieldSpec {
                    label: label.to_string(),
                    target: FieldTarget::parse(target),
                })
                .collect(),
            event_template: Map::new(),
            origin: "test#0".into(),
        }
    }

    fn extractor(lookup: Arc<dyn ReverseLookup>) -> FieldExtractor {
        let mut defs = HashMap::new();
        defs.insert("netSnmpExampleHeartbeatRate".to_string(), oid("1.3.6.1.4.1.8072.2.3.2.1"));
        let resolver = IdentifierResolver::new(Arc::new(YamlDefinitions::from_modules(vec![(
            "NET-SNMP-EXAMPLES-MIB".into(),
            defs,
        )])));
        FieldExtractor::new(resolver, lookup, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_reserved_fields_seeded_first() {
        let fields = extractor(Arc::new(FixedLookup(Some("router1.example.net"))))
            .extract(&trap(), &descriptor(&[]))
            .await;
        let labels: Vec<&str> = fields.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["source", "hostname"]);
        assert_eq!(fields.get("source").unwrap().to_string(), "192.0.2.44");
        assert_eq!(fields.get("hostname").unwrap().to_string(), "router1.example.net");
    }

    #[tokio::test]
    async fn test_hostname_falls_back_on_error() {
        let fields = extractor(Arc::new(FixedLookup(None)))
            .extract(&trap(), &descriptor(&[]))
            .await;
        assert_eq!(fields.get("hostname").unwrap().to_string(), "192.0.2.44");
    }

    #[tokio::test]
    async fn test_hostname_falls_back_on_timeout() {
        let fields = extractor(Arc::new(HangingLookup))
            .extract(&trap(), &descriptor(&[]))
            .await;
        assert_eq!(fields.get("hostname").unwrap().to_string(), "192.0.2.44");
    }

    #[tokio::test]
    async fn test_present_fields_keep_native_type() {
        let fields = extractor(Arc::new(FixedLookup(None)))
            .extract(
                &trap(),
                &descriptor(&[
                    ("heartbeatrate", "1.3.6.1.4.1.8072.2.3.2.1.0"),
                    ("message", ".1.3.6.1.4.1.8072.2.3.2.2.0"),
                ]),
            )
            .await;
        assert_eq!(fields.get("heartbeatrate"), Some(&Value::Integer(123456)));
        // first binding with the OID wins
        assert_eq!(fields.get("message"), Some(&Value::from("first")));
    }

    #[tokio::test]
    async fn test_symbolic_field() {
        let fields = extractor(Arc::new(FixedLookup(None)))
            .extract(&trap(), &descriptor(&[("rate", "netSnmpExampleHeartbeatRate.0")]))
            .await;
        assert_eq!(fields.get("rate"), Some(&Value::Integer(123456)));
    }

    #[tokio::test]
    async fn test_missing_and_unresolvable_fields_are_omitted() {
        let fields = extractor(Arc::new(FixedLookup(None)))
            .extract(
                &trap(),
                &descriptor(&[
                    ("absent", "1.3.6.1.4.1.8072.2.3.2.9.0"),
                    ("unknown", "NO-SUCH-MIB::nothing"),
                    ("heartbeatrate", "1.3.6.1.4.1.8072.2.3.2.1.0"),
                ]),
            )
            .await;
        assert!(!fields.contains("absent"));
        assert!(!fields.contains("unknown"));
        assert!(fields.contains("heartbeatrate"));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut fields = ExtractedFields::new();
        fields.insert("source", Value::from("a"));
        fields.insert("hostname", Value::from("b"));
        fields.insert("source", Value::Integer(1));
        let collected: Vec<(&str, String)> = fields.iter().map(|(l, v)| (l, v.to_string())).collect();
        assert_eq!(collected, vec![("source", "1".to_string()), ("hostname", "b".to_string())]);
    }
}
