//! Identifier resolution
//!
//! Turns the identifiers written in descriptor files into numeric OIDs.
//! Dotted literals are parsed directly; anything else is looked up in a
//! [`DefinitionSet`], which is loaded from the MIB directory at startup.

use crate::error::ResolutionError;
use crate::oid::Oid;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of symbolic name -> OID definitions.
pub trait DefinitionSet: Send + Sync {
    /// Look `name` up, restricted to `module` when one is given.
    fn lookup(&self, module: Option<&str>, name: &str) -> Option<Oid>;

    /// Number of definitions available, for startup logging.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Catalogue of MIB modules found in the MIB directory (base names only).
#[derive(Debug, Clone, Default)]
pub struct MibCatalog {
    modules: Vec<(String, PathBuf)>,
}

impl MibCatalog {
    /// Record every `*.yaml` file in `dir` by its base name. A missing
    /// directory yields an empty catalogue.
    pub fn scan<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("MIB directory {} is not readable ({}) - symbolic names will not resolve", dir.display(), e);
                return Self::default();
            }
        };

        let mut modules: Vec<(String, PathBuf)> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == "yaml"))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_string();
                Some((stem, path))
            })
            .collect();
        modules.sort_by(|a, b| a.1.cmp(&b.1));

        for (name, _) in &modules {
            debug!("reading MIB configuration from {}", name);
        }
        Self { modules }
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Definitions read from the catalogued YAML files, each a flat
/// `name: dotted-oid` mapping.
#[derive(Debug, Default)]
pub struct YamlDefinitions {
    modules: Vec<(String, HashMap<String, Oid>)>,
}

impl YamlDefinitions {
    /// Parse every catalogued module. Files or entries that cannot be
    /// understood are skipped with a warning.
    pub fn load(catalog: &MibCatalog) -> Self {
        let mut modules = Vec::with_capacity(catalog.len());
        for (module, path) in &catalog.modules {
            match Self::load_module(path) {
                Ok(defs) => {
                    debug!("loaded {} definitions from MIB module {}", defs.len(), module);
                    modules.push((module.clone(), defs));
                }
                Err(e) => warn!("skipping MIB module {}: {}", module, e),
            }
        }
        Self { modules }
    }

    fn load_module(path: &Path) -> anyhow::Result<HashMap<String, Oid>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse_module(&content, &path.display().to_string())?)
    }

    /// Parse one module body. `origin` is only used in log messages.
    pub fn parse_module(content: &str, origin: &str) -> Result<HashMap<String, Oid>, serde_yaml::Error> {
        let raw: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(content)?;
        let mut defs = HashMap::with_capacity(raw.len());
        for (name, value) in raw {
            let text = match value {
                serde_yaml::Value::String(s) => s,
                // An unquoted `1.30` is read as a float and would come back as `1.3`
                serde_yaml::Value::Number(n) => {
                    warn!(
                        "{}: definition '{}' is the number {}, quote the OID to use it",
                        origin, name, n
                    );
                    continue;
                }
                other => {
                    warn!("{}: definition '{}' is not an OID string ({:?})", origin, name, other);
                    continue;
                }
            };
            match Oid::from_dotted(&text) {
                Some(oid) => {
                    defs.insert(name, oid);
                }
                None => warn!("{}: definition '{}' has invalid OID '{}'", origin, name, text),
            }
        }
        Ok(defs)
    }

    /// Build directly from `(module, definitions)` pairs.
    pub fn from_modules(modules: Vec<(String, HashMap<String, Oid>)>) -> Self {
        Self { modules }
    }
}

impl DefinitionSet for YamlDefinitions {
    fn lookup(&self, module: Option<&str>, name: &str) -> Option<Oid> {
        self.modules
            .iter()
            .filter(|(m, _)| module.map_or(true, |wanted| wanted == m))
            .find_map(|(_, defs)| defs.get(name).cloned())
    }

    fn len(&self) -> usize {
        self.modules.iter().map(|(_, defs)| defs.len()).sum()
    }
}

/// Resolves descriptor identifiers to numeric OIDs.
///
/// Safe to call with no definitions loaded: symbolic names then fail with
/// [`ResolutionError::NoDefinitions`].
#[derive(Clone, Default)]
pub struct IdentifierResolver {
    definitions: Option<Arc<dyn DefinitionSet>>,
}

impl IdentifierResolver {
    pub fn new(definitions: Arc<dyn DefinitionSet>) -> Self {
        Self {
            definitions: Some(definitions),
        }
    }

    /// Resolver that only understands dotted literals.
    pub fn literal_only() -> Self {
        Self { definitions: None }
    }

    pub fn has_definitions(&self) -> bool {
        self.definitions.as_ref().is_some_and(|d| !d.is_empty())
    }

    pub fn resolve(&self, name: &str) -> Result<Oid, ResolutionError> {
        if let Some(oid) = Oid::from_dotted(name) {
            return Ok(oid);
        }

        let name = name.trim();
        let definitions = self
            .definitions
            .as_ref()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| ResolutionError::NoDefinitions(name.to_string()))?;

        let (module, symbol) = match name.split_once("::") {
            Some((module, symbol)) => (Some(module), symbol),
            None => (None, name),
        };

        lookup_symbol(definitions.as_ref(), module, symbol)
            // A qualified name whose module is not catalogued may still be
            // defined elsewhere.
            .or_else(|| module.and_then(|_| lookup_symbol(definitions.as_ref(), None, symbol)))
            .ok_or_else(|| ResolutionError::UnknownName(name.to_string()))
    }
}

/// Look up `symbol`, also trying it as `base.N.M` with a numeric instance suffix.
fn lookup_symbol(definitions: &dyn DefinitionSet, module: Option<&str>, symbol: &str) -> Option<Oid> {
    if let Some(oid) = definitions.lookup(module, symbol) {
        return Some(oid);
    }

    let (base, suffix) = symbol.split_once('.')?;
    let suffix = Oid::from_dotted(suffix)?;
    definitions
        .lookup(module, base)
        .map(|oid| oid.extend(suffix.arcs()))
}

impl std::fmt::Debug for IdentifierResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierResolver")
            .field("definitions", &self.definitions.as_ref().map(|d| d.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn definitions() -> Arc<dyn DefinitionSet> {
        let net_snmp = YamlDefinitions::parse_module(
            "netSnmpExampleHeartbeatNotification: 1.3.6.1.4.1.8072.2.3.0.1\n\
             netSnmpExampleHeartbeatRate: 1.3.6.1.4.1.8072.2.3.2.1\n",
            "test",
        )
        .unwrap();
        let snmpv2 = YamlDefinitions::parse_module("sysUpTime: \"1.3.6.1.2.1.1.3\"\n", "test").unwrap();
        Arc::new(YamlDefinitions::from_modules(vec![
            ("NET-SNMP-EXAMPLES-MIB".into(), net_snmp),
            ("SNMPv2-MIB".into(), snmpv2),
        ]))
    }

    #[test]
    fn test_literal_needs_no_definitions() {
        let resolver = IdentifierResolver::literal_only();
        assert_eq!(
            resolver.resolve("1.3.6.1.4.1.8072.2.3.0.1").unwrap().to_string(),
            "1.3.6.1.4.1.8072.2.3.0.1"
        );
    }

    #[test]
    fn test_symbol_without_definitions_fails() {
        let resolver = IdentifierResolver::literal_only();
        assert_eq!(
            resolver.resolve("sysUpTime").unwrap_err(),
            ResolutionError::NoDefinitions("sysUpTime".into())
        );

        let empty = IdentifierResolver::new(Arc::new(YamlDefinitions::default()));
        assert!(matches!(
            empty.resolve("sysUpTime"),
            Err(ResolutionError::NoDefinitions(_))
        ));
    }

    #[test]
    fn test_symbol_lookup() {
        let resolver = IdentifierResolver::new(definitions());
        assert_eq!(
            resolver.resolve("netSnmpExampleHeartbeatNotification").unwrap().to_string(),
            "1.3.6.1.4.1.8072.2.3.0.1"
        );
        assert_eq!(
            resolver.resolve("unknownThing").unwrap_err(),
            ResolutionError::UnknownName("unknownThing".into())
        );
    }

    #[test]
    fn test_qualified_and_instance_names() {
        let resolver = IdentifierResolver::new(definitions());
        assert_eq!(
            resolver
                .resolve("NET-SNMP-EXAMPLES-MIB::netSnmpExampleHeartbeatRate.0")
                .unwrap()
                .to_string(),
            "1.3.6.1.4.1.8072.2.3.2.1.0"
        );
        // module given but wrong - falls back to a global search
        assert_eq!(
            resolver.resolve("OTHER-MIB::sysUpTime.0").unwrap().to_string(),
            "1.3.6.1.2.1.1.3.0"
        );
        assert!(resolver.resolve("sysUpTime.x").is_err());
    }

    #[test]
    fn test_catalog_and_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("SNMPv2-MIB.yaml"), "sysUpTime: 1.3.6.1.2.1.1.3\nbad: nope\n").unwrap();
        fs::write(dir.path().join("BROKEN.yaml"), "- [unclosed").unwrap();
        fs::write(dir.path().join("README.txt"), "ignored").unwrap();

        let catalog = MibCatalog::scan(dir.path());
        let names: Vec<&str> = catalog.module_names().collect();
        assert_eq!(names, vec!["BROKEN", "SNMPv2-MIB"]);

        let defs = YamlDefinitions::load(&catalog);
        assert_eq!(defs.len(), 1);
        assert_eq!(
            defs.lookup(Some("SNMPv2-MIB"), "sysUpTime").unwrap().to_string(),
            "1.3.6.1.2.1.1.3"
        );
        assert!(defs.lookup(Some("BROKEN"), "sysUpTime").is_none());
    }

    #[test]
    fn test_numeric_definitions_are_rejected() {
        let defs = YamlDefinitions::parse_module(
            "internet: 1.30\nmgmt: \"1.30\"\nenterprises: 1.3.6.1.4.1\n",
            "test",
        )
        .unwrap();
        assert!(!defs.contains_key("internet"));
        assert_eq!(defs["mgmt"].to_string(), "1.30");
        assert_eq!(defs["enterprises"].to_string(), "1.3.6.1.4.1");
    }

    #[test]
    fn test_catalog_missing_directory() {
        let catalog = MibCatalog::scan("/nonexistent/trapfwd/mibs");
        assert!(catalog.is_empty());
    }
}
