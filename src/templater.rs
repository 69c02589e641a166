//! Event templating
//!
//! Substitutes `{label}` placeholders in a descriptor's `event` template with
//! extracted field values.

use crate::extractor::ExtractedFields;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// The finished event document handed to the publisher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OutputEvent(Map<String, JsonValue>);

impl OutputEvent {
    pub fn new(entries: Map<String, JsonValue>) -> Self {
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// String value of `key`, if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(JsonValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) {
        self.0.insert(key.into(), value);
    }

    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, JsonValue> {
        self.0
    }

    /// Compact JSON, no trailing newline.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

/// Stringify a value for substitution; `/` becomes `-`.
pub fn sanitize(value: &str) -> String {
    value.replace('/', "-")
}

/// Render a copy of `template` with every field substituted.
///
/// Fields are applied one after another in insertion order, each across the
/// whole template. Non-string template values are carried over unchanged and
/// placeholders with no matching field are left as written.
pub fn render(fields: &ExtractedFields, template: &Map<String, JsonValue>) -> OutputEvent {
    let mut event = template.clone();

    for (label, value) in fields.iter() {
        let placeholder = format!("{{{label}}}");
        let replacement = sanitize(&value.to_string());
        for entry in event.values_mut() {
            if let JsonValue::String(text) = entry {
                if text.contains(&placeholder) {
                    *text = text.replace(&placeholder, &replacement);
                }
            }
        }
    }

    OutputEvent(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trap::Value;
    use serde_json::json;

    fn template(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("template must be an object"),
        }
    }

    fn fields(pairs: &[(&str, Value)]) -> ExtractedFields {
        let mut fields = ExtractedFields::new();
        for (label, value) in pairs {
            fields.insert(*label, value.clone());
        }
        fields
    }

    #[test]
    fn test_substitutes_fields() {
        let tpl = template(json!({
            "name": "VMWARE-EVENT::alarm-{hostname}",
            "output": "Heartbeat Rate {heartbeatrate}",
        }));
        let event = render(
            &fields(&[
                ("hostname", Value::from("esx01")),
                ("heartbeatrate", Value::Integer(123456)),
            ]),
            &tpl,
        );
        assert_eq!(event.get_str("name"), Some("VMWARE-EVENT::alarm-esx01"));
        assert_eq!(event.get_str("output"), Some("Heartbeat Rate 123456"));
    }

    #[test]
    fn test_template_without_placeholders_is_unchanged() {
        let tpl = template(json!({"name": "static", "output": "nothing here", "status": 2}));
        let event = render(&fields(&[("source", Value::from("10.0.0.1"))]), &tpl);
        assert_eq!(event.as_map(), &tpl);
    }

    #[test]
    fn test_sanitizes_slashes() {
        let tpl = template(json!({"name": "if-{ifname}-down", "output": "{ifname} went down"}));
        let event = render(&fields(&[("ifname", Value::from("GigabitEthernet0/1/2"))]), &tpl);
        assert_eq!(event.get_str("name"), Some("if-GigabitEthernet0-1-2-down"));
        assert_eq!(event.get_str("output"), Some("GigabitEthernet0-1-2 went down"));
        assert!(!event.to_json().unwrap().contains("0/1/2"));
    }

    #[test]
    fn test_multiple_and_repeated_placeholders() {
        let tpl = template(json!({"output": "{a}+{a} from {b}"}));
        let event = render(&fields(&[("a", Value::Integer(1)), ("b", Value::from("x"))]), &tpl);
        assert_eq!(event.get_str("output"), Some("1+1 from x"));
    }

    #[test]
    fn test_unknown_placeholder_left_as_written() {
        let tpl = template(json!({"output": "value {missing} from {source}"}));
        let event = render(&fields(&[("source", Value::from("10.0.0.1"))]), &tpl);
        assert_eq!(event.get_str("output"), Some("value {missing} from 10.0.0.1"));
    }

    #[test]
    fn test_non_string_values_unchanged() {
        let tpl = template(json!({"status": 1, "tags": ["{source}"], "output": "{source}"}));
        let event = render(&fields(&[("source", Value::from("10.0.0.1"))]), &tpl);
        assert_eq!(event.get("status"), Some(&json!(1)));
        assert_eq!(event.get("tags"), Some(&json!(["{source}"])));
        assert_eq!(event.get_str("output"), Some("10.0.0.1"));
    }

    #[test]
    fn test_template_is_not_mutated_and_order_kept() {
        let tpl = template(json!({"z": "{source}", "a": "{source}"}));
        let event = render(&fields(&[("source", Value::from("h"))]), &tpl);
        assert_eq!(tpl["z"], json!("{source}"));
        let keys: Vec<&String> = event.as_map().keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert_eq!(event.to_json().unwrap(), r#"{"z":"h","a":"h"}"#);
    }
}
