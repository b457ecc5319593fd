//! Key-value wire model and shared constants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const FEATURE_FLAG_PREFIX: &str = ".appconfig.featureflag/";
pub const FEATURE_FLAG_CONTENT_TYPE: &str =
    "application/vnd.microsoft.appconfig.ff+json;charset=utf-8";
pub const KEYVAULT_CONTENT_TYPE: &str =
    "application/vnd.microsoft.appconfig.keyvaultref+json;charset=utf-8";

pub const ANY_KEY: &str = "*";
pub const ANY_LABEL: &str = "*";
/// Label filter matching key-values without a label.
pub const NULL_LABEL: &str = "\0";

pub const APPSVC_SLOT_SETTING_TAG: &str = "AppService:SlotSetting";

pub type Tags = BTreeMap<String, String>;

/// A configuration setting as the data plane returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> Result<Tags, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Tags>::deserialize(deserializer)?.unwrap_or_default())
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue {
            key: key.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: Option<&str>) -> Self {
        self.label = normalize_label(label).map(str::to_string);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// `(key, label)` with an absent label spelled as `""`.
    pub fn identity(&self) -> (String, String) {
        (self.key.clone(), self.label.clone().unwrap_or_default())
    }

    pub fn value_str(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }

    pub fn is_feature_flag(&self) -> bool {
        self.key.starts_with(FEATURE_FLAG_PREFIX)
            && self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.eq_ignore_ascii_case(FEATURE_FLAG_CONTENT_TYPE))
    }

    pub fn is_key_vault_ref(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.eq_ignore_ascii_case(KEYVAULT_CONTENT_TYPE))
    }
}

/// Labels `""` and `\0` both mean "no label".
pub fn normalize_label(label: Option<&str>) -> Option<&str> {
    label.filter(|l| !l.is_empty() && *l != NULL_LABEL)
}

/// Label filter for list queries: `None` and `""` select the null label.
pub fn label_filter(label: Option<&str>) -> String {
    match label {
        Some(l) if !l.is_empty() => l.to_string(),
        _ => NULL_LABEL.to_string(),
    }
}

/// `application/json` or any `application/<subtype>+json`, parameters ignored.
pub fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let Some((kind, subtype)) = mime.split_once('/') else {
        return false;
    };
    kind == "application"
        && (subtype == "json" || (subtype.ends_with("+json") && subtype.len() > "+json".len()))
}

/// Fields selectable with `--fields`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryField {
    Key,
    Label,
    Value,
    ContentType,
    Etag,
    Tags,
    Locked,
    LastModified,
}

impl QueryField {
    pub const ALL: [QueryField; 8] = [
        QueryField::Key,
        QueryField::Label,
        QueryField::Value,
        QueryField::ContentType,
        QueryField::Etag,
        QueryField::Tags,
        QueryField::Locked,
        QueryField::LastModified,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            QueryField::Key => "key",
            QueryField::Label => "label",
            QueryField::Value => "value",
            QueryField::ContentType => "content_type",
            QueryField::Etag => "etag",
            QueryField::Tags => "tags",
            QueryField::Locked => "locked",
            QueryField::LastModified => "last_modified",
        }
    }

    /// Case-insensitive match on the wire name; unknown names are dropped.
    pub fn parse_list(names: &[String]) -> Vec<QueryField> {
        names
            .iter()
            .filter_map(|n| {
                let n = n.replace('-', "_");
                QueryField::ALL
                    .into_iter()
                    .find(|f| f.wire_name().eq_ignore_ascii_case(&n))
            })
            .collect()
    }
}

/// Keep only `fields` of a serialized object. An empty selection keeps all.
pub fn project_fields(value: Value, fields: &[&str]) -> Value {
    if fields.is_empty() {
        return value;
    }
    match value {
        Value::Object(obj) => {
            let mut out = Map::new();
            for field in fields {
                out.insert(
                    (*field).to_string(),
                    obj.get(*field).cloned().unwrap_or(Value::Null),
                );
            }
            Value::Object(out)
        }
        other => other,
    }
}

pub fn project_key_value(kv: &KeyValue, fields: &[QueryField]) -> Value {
    let value = serde_json::to_value(kv).unwrap_or(Value::Null);
    let names: Vec<&str> = fields.iter().map(|f| f.wire_name()).collect();
    project_fields(value, &names)
}
