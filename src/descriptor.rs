//! Trap descriptors and the descriptor store
//!
//! Descriptor files are read once at startup from the trap definitions
//! directory. Each file holds an array of objects like:
//!
//! ```json
//! [{
//!   "trap_oid": "1.3.6.1.4.1.8072.2.3.0.1",
//!   "trap": { "heartbeatrate": "1.3.6.1.4.1.8072.2.3.2.1.0" },
//!   "event": { "name": "heartbeat-{hostname}", "output": "Heartbeat Rate {heartbeatrate}" }
//! }]
//! ```
//!
//! Raw JSON/YAML is validated into [`TrapDescriptor`] here so the matcher and
//! extractor never deal with loosely typed data.

use crate::error::DescriptorLoadError;
use crate::oid::Oid;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a descriptor is triggered by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// `trap_oid` given as a dotted OID.
    Literal(Oid),
    /// `trap_name`, resolved through the MIB definitions at match time.
    Symbolic(String),
    /// Neither key present; never matches.
    Unmatchable,
}

/// Where a field's value is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldTarget {
    Literal(Oid),
    Symbolic(String),
}

impl FieldTarget {
    /// Literal if the text parses as a dotted OID, symbolic otherwise.
    pub fn parse(text: &str) -> Self {
        match Oid::from_dotted(text) {
            Some(oid) => FieldTarget::Literal(oid),
            None => FieldTarget::Symbolic(text.trim().to_string()),
        }
    }
}

impl fmt::Display for FieldTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldTarget::Literal(oid) => write!(f, "{oid}"),
            FieldTarget::Symbolic(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub label: String,
    pub target: FieldTarget,
}

/// One configured trap rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapDescriptor {
    pub trigger: Trigger,
    /// In declaration order.
    pub fields: Vec<FieldSpec>,
    pub event_template: Map<String, JsonValue>,
    /// `file#index`, for log messages.
    pub origin: String,
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    trap_oid: Option<String>,
    trap_name: Option<String>,
    #[serde(default)]
    trap: Map<String, JsonValue>,
    #[serde(default)]
    event: Map<String, JsonValue>,
}

impl TrapDescriptor {
    fn from_raw(raw: RawDescriptor, path: &Path, index: usize) -> Result<Self, DescriptorLoadError> {
        let trigger = match (raw.trap_oid, raw.trap_name) {
            (Some(oid), _) => Trigger::Literal(Oid::from_dotted(&oid).ok_or_else(|| {
                DescriptorLoadError::InvalidTrapOid {
                    path: path.to_path_buf(),
                    value: oid.clone(),
                }
            })?),
            (None, Some(name)) => Trigger::Symbolic(name),
            (None, None) => Trigger::Unmatchable,
        };

        let mut fields = Vec::with_capacity(raw.trap.len());
        for (label, target) in raw.trap {
            let JsonValue::String(target) = target else {
                return Err(DescriptorLoadError::InvalidField {
                    path: path.to_path_buf(),
                    label,
                });
            };
            fields.push(FieldSpec {
                label,
                target: FieldTarget::parse(&target),
            });
        }

        Ok(Self {
            trigger,
            fields,
            event_template: raw.event,
            origin: format!("{}#{}", path.display(), index),
        })
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "an object",
    }
}

/// Ordered, immutable collection of descriptors. Order is match priority.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    descriptors: Arc<[TrapDescriptor]>,
}

impl Default for DescriptorStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl DescriptorStore {
    pub fn new(descriptors: Vec<TrapDescriptor>) -> Self {
        Self {
            descriptors: descriptors.into(),
        }
    }

    /// Load every `*.json`, `*.yaml` and `*.yml` file in `dir`, sorted by path.
    /// Files that fail to load are logged and skipped.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        debug!("loading SNMP trap definitions from {}", dir.display());

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("trap definitions directory {} is not readable: {}", dir.display(), e);
                return Self::default();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| matches!(e, "json" | "yaml" | "yml"))
            })
            .collect();
        files.sort();

        let mut descriptors = Vec::new();
        for file in &files {
            debug!("reading {}...", file.display());
            match Self::load_file(file) {
                Ok(loaded) => descriptors.extend(loaded),
                Err(e) => warn!("skipping trap definition file: {}", e),
            }
        }

        info!(
            "loaded {} trap definition(s) from {} file(s) in {}",
            descriptors.len(),
            files.len(),
            dir.display()
        );
        Self::new(descriptors)
    }

    /// Load one file. Individual invalid descriptors are skipped with a
    /// warning; an unreadable or unparseable file is an error.
    pub fn load_file(path: &Path) -> Result<Vec<TrapDescriptor>, DescriptorLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| DescriptorLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        let parse_error = |message: String| DescriptorLoadError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let parsed: JsonValue = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
        } else {
            serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?
        };

        let entries = match parsed {
            JsonValue::Array(list) => list,
            single @ JsonValue::Object(_) => vec![single],
            other => {
                return Err(parse_error(format!(
                    "expected an object or a list of objects, found {}",
                    json_kind(&other)
                )))
            }
        };

        // Entries are converted one at a time; a bad entry is skipped alone.
        let mut descriptors = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let loaded = serde_json::from_value::<RawDescriptor>(entry)
                .map_err(|e| DescriptorLoadError::InvalidEntry {
                    path: path.to_path_buf(),
                    index,
                    message: e.to_string(),
                })
                .and_then(|raw| TrapDescriptor::from_raw(raw, path, index));
            match loaded {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => warn!("skipping trap definition: {}", e),
            }
        }
        Ok(descriptors)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrapDescriptor> {
        self.descriptors.iter()
    }

    pub fn as_slice(&self) -> &[TrapDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HEARTBEAT: &str = r#"[{
        "trap_oid": "1.3.6.1.4.1.8072.2.3.0.1",
        "trap": {
            "heartbeatrate": "1.3.6.1.4.1.8072.2.3.2.1.0",
            "name": "NET-SNMP-EXAMPLES-MIB::netSnmpExampleHeartbeatName"
        },
        "event": { "name": "heartbeat-{hostname}", "output": "Heartbeat Rate {heartbeatrate}", "status": 1 }
    }]"#;

    #[test]
    fn test_load_file_validates_into_typed_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");
        fs::write(&path, HEARTBEAT).unwrap();

        let loaded = DescriptorStore::load_file(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        let d = &loaded[0];
        assert_eq!(
            d.trigger,
            Trigger::Literal("1.3.6.1.4.1.8072.2.3.0.1".parse().unwrap())
        );
        let labels: Vec<&str> = d.fields.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, vec!["heartbeatrate", "name"]);
        assert!(matches!(d.fields[0].target, FieldTarget::Literal(_)));
        assert_eq!(
            d.fields[1].target,
            FieldTarget::Symbolic("NET-SNMP-EXAMPLES-MIB::netSnmpExampleHeartbeatName".into())
        );
        let keys: Vec<&String> = d.event_template.keys().collect();
        assert_eq!(keys, vec!["name", "output", "status"]);
        assert!(d.origin.ends_with("heartbeat.json#0"));
    }

    #[test]
    fn test_trigger_variants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triggers.json");
        fs::write(
            &path,
            r#"[
                {"trap_name": "netSnmpExampleHeartbeatNotification", "event": {}},
                {"event": {"output": "never"}},
                {"trap_oid": "not.an.oid", "event": {}},
                {"trap_oid": "1.3.6.1.4.1.1", "trap": {"bad": 5}, "event": {}}
            ]"#,
        )
        .unwrap();

        let loaded = DescriptorStore::load_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded[0].trigger,
            Trigger::Symbolic("netSnmpExampleHeartbeatNotification".into())
        );
        assert_eq!(loaded[1].trigger, Trigger::Unmatchable);
    }

    #[test]
    fn test_single_object_and_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("a.json");
        fs::write(&json, r#"{"trap_oid": "1.3.6.1.4.1.1", "event": {"output": "x"}}"#).unwrap();
        let yaml = dir.path().join("b.yaml");
        fs::write(
            &yaml,
            "- trap_oid: 1.3.6.1.4.1.6876.4.3.0.203\n  trap:\n    message: 1.3.6.1.4.1.6876.4.3.306.0\n  event:\n    output: \"{message}\"\n    status: 1\n",
        )
        .unwrap();

        assert_eq!(DescriptorStore::load_file(&json).unwrap().len(), 1);
        let from_yaml = DescriptorStore::load_file(&yaml).unwrap();
        assert_eq!(
            from_yaml[0].trigger,
            Trigger::Literal("1.3.6.1.4.1.6876.4.3.0.203".parse().unwrap())
        );
        assert_eq!(from_yaml[0].event_template["status"], serde_json::json!(1));
    }

    #[test]
    fn test_load_dir_orders_by_file_then_position_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("20-second.json"),
            r#"[{"trap_oid": "1.3.6.1.4.1.2", "event": {}}]"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("10-first.json"),
            r#"[{"trap_oid": "1.3.6.1.4.1.1", "event": {}}, {"trap_oid": "1.3.6.1.4.1.3", "event": {}}]"#,
        )
        .unwrap();
        fs::write(dir.path().join("15-broken.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = DescriptorStore::load_dir(dir.path());
        let order: Vec<String> = store
            .iter()
            .map(|d| match &d.trigger {
                Trigger::Literal(oid) => oid.to_string(),
                other => panic!("unexpected trigger {:?}", other),
            })
            .collect();
        assert_eq!(order, vec!["1.3.6.1.4.1.1", "1.3.6.1.4.1.3", "1.3.6.1.4.1.2"]);
    }

    #[test]
    fn test_load_dir_missing_directory_is_empty() {
        let store = DescriptorStore::load_dir("/nonexistent/trapfwd/traps.d");
        assert!(store.is_empty());
    }

    #[test]
    fn test_badly_shaped_entry_does_not_drop_its_siblings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("mixed.json"),
            r#"[
                {"trap_oid": "1.3.6.1.4.1.1", "event": {"output": "good"}},
                {"trap_oid": "1.3.6.1.4.1.2", "trap": "not-a-map", "event": {}},
                {"trap_oid": "1.3.6.1.4.1.3", "event": []},
                {"trap_oid": 5, "event": {}},
                {"trap_oid": "1.3.6.1.4.1.4", "event": {"output": "also good"}}
            ]"#,
        )
        .unwrap();

        let store = DescriptorStore::load_dir(dir.path());
        assert_eq!(store.len(), 2);
        assert_eq!(store.as_slice()[0].event_template["output"], "good");
        assert_eq!(store.as_slice()[1].event_template["output"], "also good");
        assert!(store.as_slice()[1].origin.ends_with("mixed.json#4"));
    }

    #[test]
    fn test_badly_shaped_yaml_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.yaml");
        fs::write(
            &path,
            "- trap_oid: 1.3.6.1.4.1.1\n  event:\n    output: good\n- trap_oid: 1.3.6.1.4.1.2\n  trap: [a, b]\n",
        )
        .unwrap();

        let loaded = DescriptorStore::load_file(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].event_template["output"], "good");
    }

    #[test]
    fn test_scalar_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalar.json");
        fs::write(&path, "42").unwrap();
        assert!(matches!(
            DescriptorStore::load_file(&path),
            Err(DescriptorLoadError::Parse { .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "[{]").unwrap();
        assert!(matches!(
            DescriptorStore::load_file(&path),
            Err(DescriptorLoadError::Parse { .. })
        ));
    }
}
