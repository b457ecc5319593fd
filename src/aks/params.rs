//! Raw flag values for one command invocation.
//!
//! Every typed read records the key so callers can tell which flags the
//! decorator consumed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::AzCliError;

#[derive(Debug, Default)]
pub struct RawParameters {
    values: Map<String, Value>,
    accessed: Mutex<BTreeSet<String>>,
}

impl RawParameters {
    pub fn new(values: Map<String, Value>) -> Self {
        RawParameters {
            values,
            accessed: Mutex::new(BTreeSet::new()),
        }
    }

    /// Build from any argument struct that serializes to a JSON object.
    pub fn from_args<T: Serialize>(args: &T) -> crate::Result<Self> {
        match serde_json::to_value(args) {
            Ok(Value::Object(map)) => Ok(Self::new(map)),
            Ok(other) => Err(AzCliError::Internal(format!(
                "raw parameters must be an object, got {}",
                other
            ))),
            Err(e) => Err(AzCliError::Internal(e.to_string())),
        }
    }

    fn touch(&self, key: &str) {
        if let Ok(mut accessed) = self.accessed.lock() {
            accessed.insert(key.to_string());
        }
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.touch(key);
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get_value(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Absent flags read as `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.get_value(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get_value(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_str_map(&self, key: &str) -> Option<BTreeMap<String, String>> {
        let obj = self.get_value(key)?.as_object()?;
        Some(
            obj.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect(),
        )
    }

    /// Comma separated string or JSON array, blanks dropped.
    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        let items: Vec<String> = match self.get_value(key)? {
            Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
            Value::Array(values) => values
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                .collect(),
            _ => return None,
        };
        Some(items.into_iter().filter(|s| !s.is_empty()).collect())
    }

    /// Truthiness: null, false, 0, "", [] and {} count as unset.
    pub fn is_set(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(is_truthy)
    }

    /// Keys with a truthy value, minus `excluded`. Does not mark access.
    pub fn iter_set_except<'a>(
        &'a self,
        excluded: &'a [&'a str],
    ) -> impl Iterator<Item = (&'a String, &'a Value)> + 'a {
        self.values
            .iter()
            .filter(move |(k, v)| !excluded.contains(&k.as_str()) && is_truthy(v))
    }

    pub fn accessed(&self) -> BTreeSet<String> {
        self.accessed.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn unaccessed(&self) -> BTreeSet<String> {
        let accessed = self.accessed();
        self.values
            .keys()
            .filter(|k| !accessed.contains(*k))
            .cloned()
            .collect()
    }

    /// Replace a value; used when a prompt fills in a missing flag.
    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(v: Value) -> RawParameters {
        match v {
            Value::Object(map) => RawParameters::new(map),
            _ => panic!("object expected"),
        }
    }

    #[test]
    fn test_typed_reads_record_access() {
        let raw = params(json!({"name": "c1", "node_count": 3, "enable_aad": true, "tags": null}));
        assert_eq!(raw.get_str("name").as_deref(), Some("c1"));
        assert_eq!(raw.get_i64("node_count"), Some(3));
        assert!(raw.get_bool("enable_aad"));
        assert!(!raw.get_bool("missing"));

        let accessed = raw.accessed();
        assert!(accessed.contains("name") && accessed.contains("missing"));
        assert_eq!(raw.unaccessed().into_iter().collect::<Vec<_>>(), vec!["tags"]);
    }

    #[test]
    fn test_truthiness() {
        let raw = params(json!({
            "a": 0, "b": "", "c": [], "d": {}, "e": false, "f": null, "g": "x", "h": 1
        }));
        for key in ["a", "b", "c", "d", "e", "f", "missing"] {
            assert!(!raw.is_set(key), "{} should be unset", key);
        }
        assert!(raw.is_set("g") && raw.is_set("h"));
    }

    #[test]
    fn test_str_list_accepts_csv_and_array() {
        let raw = params(json!({"ips": "a, b,,c", "zones": ["1", "2"]}));
        assert_eq!(raw.get_str_list("ips").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(raw.get_str_list("zones").unwrap(), vec!["1", "2"]);
        assert_eq!(raw.get_str_list("missing"), None);
    }

    #[test]
    fn test_iter_set_except() {
        let raw = params(json!({"resource_group_name": "rg", "name": "c", "tags": {"a": "b"}}));
        let keys: Vec<_> = raw
            .iter_set_except(&["resource_group_name", "name"])
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(keys, vec!["tags"]);
    }

    #[test]
    fn test_from_args() {
        #[derive(Serialize)]
        struct Args {
            name: String,
            node_count: Option<i64>,
        }
        let raw = RawParameters::from_args(&Args {
            name: "c".into(),
            node_count: None,
        })
        .unwrap();
        assert_eq!(raw.get_i64("node_count"), None);
        assert_eq!(raw.get_str("name").as_deref(), Some("c"));
    }
}
