//! Argument and import-item validation.
//!
//! `validate_import_*` functions never fail: an invalid item is logged and
//! skipped. The remaining functions reject bad arguments before any request.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::appconfig::models::{
    KeyValue, Tags, FEATURE_FLAG_CONTENT_TYPE, FEATURE_FLAG_PREFIX, KEYVAULT_CONTENT_TYPE,
};
use crate::error::AzCliError;

pub const VALID_SEPARATORS: [&str; 8] = [".", ",", ";", "-", "_", "__", "/", ":"];

/// Properties a feature flag value may carry.
pub const FEATURE_FLAG_PROPERTIES: [&str; 8] = [
    "id",
    "description",
    "enabled",
    "conditions",
    "allocation",
    "variants",
    "display_name",
    "telemetry",
];

/// Command-line key check.
pub fn validate_key(key: &str) -> crate::Result<()> {
    if key.trim().is_empty() {
        return Err(AzCliError::RequiredArgumentMissing("Key cannot be empty.".to_string()));
    }
    if key == "." || key == ".." || key.contains('%') {
        return Err(AzCliError::InvalidArgumentValue(
            "Key is invalid. Key cannot be a '.' or '..', or contain the '%' character."
                .to_string(),
        ));
    }
    Ok(())
}

pub fn validate_import_key(key: &str) -> bool {
    if key.is_empty() {
        tracing::warn!("Ignoring invalid key ''. Key cannot be empty.");
        return false;
    }
    if key == "." || key == ".." || key.contains('%') {
        tracing::warn!(
            key,
            "Ignoring invalid key. Key cannot be a '.' or '..', or contain the '%' character."
        );
        return false;
    }
    if key.starts_with(FEATURE_FLAG_PREFIX) {
        tracing::warn!(
            key,
            "Ignoring invalid key. Key cannot start with the reserved prefix for feature flags."
        );
        return false;
    }
    true
}

pub fn validate_feature_flag_name(name: &str) -> crate::Result<()> {
    if name.trim().is_empty() {
        return Err(AzCliError::InvalidArgumentValue(
            "Feature flag name cannot be empty.".to_string(),
        ));
    }
    if name.contains('%') || name.contains(':') {
        return Err(AzCliError::InvalidArgumentValue(
            "Feature flag name cannot contain the ':' or '%' characters.".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_feature_flag_key(key: &str) -> crate::Result<()> {
    let Some(name) = key.strip_prefix(FEATURE_FLAG_PREFIX) else {
        return Err(AzCliError::InvalidArgumentValue(format!(
            "Feature flag key must start with the reserved prefix '{}'.",
            FEATURE_FLAG_PREFIX
        )));
    };
    if name.is_empty() {
        return Err(AzCliError::InvalidArgumentValue(
            "Feature flag key must contain more characters after the reserved prefix."
                .to_string(),
        ));
    }
    if key.contains('%') {
        return Err(AzCliError::InvalidArgumentValue(
            "Feature flag key cannot contain the '%' character.".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_import_feature(name: &str) -> bool {
    match validate_feature_flag_name(name) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(feature = name, "Ignoring invalid feature. {}", e);
            false
        }
    }
}

pub fn validate_import_feature_key(key: &str) -> bool {
    match validate_feature_flag_key(key) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(key, "Ignoring invalid feature with key. {}", e);
            false
        }
    }
}

/// Vault, secret name and optional version of a Key Vault secret identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretIdentifier {
    pub vault_url: String,
    pub name: String,
    pub version: Option<String>,
}

/// Parse `https://<vault>/secrets/<name>[/<version>]`.
pub fn parse_secret_identifier(uri: &str) -> crate::Result<SecretIdentifier> {
    let invalid = |reason: &str| {
        AzCliError::InvalidArgumentValue(format!(
            "Invalid Key Vault secret identifier '{}': {}",
            uri, reason
        ))
    };
    let url = url::Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
    let host = url.host_str().ok_or_else(|| invalid("missing vault host"))?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        ["secrets", name] => Ok(SecretIdentifier {
            vault_url: format!("{}://{}", url.scheme(), host),
            name: (*name).to_string(),
            version: None,
        }),
        ["secrets", name, version] => Ok(SecretIdentifier {
            vault_url: format!("{}://{}", url.scheme(), host),
            name: (*name).to_string(),
            version: Some((*version).to_string()),
        }),
        _ => Err(invalid("expected /secrets/<name>[/<version>]")),
    }
}

pub fn validate_import_keyvault_ref(kv: &KeyValue) -> bool {
    if !validate_import_key(&kv.key) {
        return false;
    }
    let value: Value = match serde_json::from_str(kv.value_str()) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                key = %kv.key,
                error = %e,
                "The keyvault reference is not in a valid JSON format. It will not be imported."
            );
            return false;
        }
    };
    let valid = value
        .get("uri")
        .and_then(Value::as_str)
        .is_some_and(|uri| parse_secret_identifier(uri).is_ok());
    if !valid {
        tracing::warn!(
            key = %kv.key,
            "Keyvault reference is not a valid keyvault reference. It will not be imported."
        );
    }
    valid
}

pub fn validate_import_feature_flag(kv: &KeyValue) -> bool {
    if !validate_import_feature_key(&kv.key) {
        return false;
    }
    let value: Value = match serde_json::from_str(kv.value_str()) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                key = %kv.key,
                error = %e,
                "The feature flag is not in a valid JSON format. It will not be imported."
            );
            return false;
        }
    };
    let Some(obj) = value.as_object() else {
        tracing::warn!(key = %kv.key, "The feature flag is not a valid feature flag. It will not be imported.");
        return false;
    };
    if obj.keys().any(|k| !FEATURE_FLAG_PROPERTIES.contains(&k.as_str())) {
        tracing::warn!(key = %kv.key, "The feature flag is not a valid feature flag. It will not be imported.");
        return false;
    }
    match obj.get("id").and_then(Value::as_str) {
        Some(id) => validate_import_feature(id),
        None => {
            tracing::warn!(key = %kv.key, "The feature flag is not a valid feature flag. It will not be imported.");
            false
        }
    }
}

/// Turn one `items` entry of a kvset file into a key-value, or skip it.
///
/// Non-string fields and non-string tag values are rejected.
pub fn validate_import_config_setting(item: &Value) -> Option<KeyValue> {
    let key = match item.get("key") {
        Some(Value::String(k)) => k.clone(),
        Some(other) => {
            tracing::warn!(key = %other, "Ignoring invalid key. Key must be a string.");
            return None;
        }
        None => String::new(),
    };

    let mut kv = KeyValue {
        key,
        ..Default::default()
    };
    for (field, slot) in [
        ("value", &mut kv.value),
        ("content_type", &mut kv.content_type),
        ("label", &mut kv.label),
    ] {
        match item.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => *slot = Some(s.clone()),
            Some(_) => {
                tracing::warn!(
                    key = %kv.key,
                    field,
                    "The field is not a string. This key-value will not be imported."
                );
                return None;
            }
        }
    }
    kv.tags = match item.get("tags") {
        None | Some(Value::Null) => Tags::new(),
        Some(Value::Object(map)) => {
            let mut tags = BTreeMap::new();
            for (name, value) in map {
                let Some(value) = value.as_str() else {
                    tracing::warn!(
                        key = %kv.key,
                        tag = %name,
                        "The value for the tag is not in a valid format. This key-value will not be imported."
                    );
                    return None;
                };
                tags.insert(name.clone(), value.to_string());
            }
            tags
        }
        Some(_) => {
            tracing::warn!(
                key = %kv.key,
                "The format of 'tags' is not valid. This key-value will not be imported."
            );
            return None;
        }
    };

    let content_type = kv.content_type.as_deref().unwrap_or("");
    let valid = if content_type.eq_ignore_ascii_case(KEYVAULT_CONTENT_TYPE) {
        validate_import_keyvault_ref(&kv)
    } else if kv.key.starts_with(FEATURE_FLAG_PREFIX)
        && content_type.eq_ignore_ascii_case(FEATURE_FLAG_CONTENT_TYPE)
    {
        validate_import_feature_flag(&kv)
    } else {
        validate_import_key(&kv.key)
    };
    valid.then_some(kv)
}

/// Accepts `YYYY-MM-DDThh:mm:ss` with an optional `Z` or `±hh:mm` suffix.
///
/// Returns the instant as UTC; a missing offset is read as UTC.
pub fn parse_datetime(value: &str) -> crate::Result<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Some(naive) = trimmed
        .strip_suffix(['Z', 'z'])
        .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
    {
        return Ok(naive.and_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%:z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    Err(AzCliError::InvalidArgumentValue(
        "The input datetime is invalid. Correct format should be YYYY-MM-DDThh:mm:ss[\"Z\"/±hh:mm]."
            .to_string(),
    ))
}

/// Validated datetime rendered for the `Accept-Datetime` header.
pub fn accept_datetime(value: Option<&str>) -> crate::Result<Option<String>> {
    value
        .map(|v| parse_datetime(v).map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()))
        .transpose()
}

pub fn validate_separator(separator: Option<&str>, is_properties: bool) -> crate::Result<()> {
    let Some(separator) = separator else {
        return Ok(());
    };
    if is_properties {
        return Err(AzCliError::InvalidArgumentValue(
            "Separator is not needed for properties file.".to_string(),
        ));
    }
    if !VALID_SEPARATORS.contains(&separator) {
        return Err(AzCliError::InvalidArgumentValue(
            "Unsupported separator, allowed values: '.', ',', ';', '-', '_', '__', '/', ':'."
                .to_string(),
        ));
    }
    Ok(())
}

pub fn validate_import_depth(depth: Option<i64>) -> crate::Result<()> {
    match depth {
        Some(d) if d < 1 => Err(AzCliError::InvalidArgumentValue(
            "Depth should be at least 1.".to_string(),
        )),
        _ => Ok(()),
    }
}

pub fn validate_dry_run(dry_run: bool, yes: bool) -> crate::Result<()> {
    if dry_run && yes {
        return Err(AzCliError::MutuallyExclusiveArgument(
            "The '--dry-run' and '--yes' options cannot be specified together.".to_string(),
        ));
    }
    Ok(())
}

/// Parse `name[=json]` filter parameters into a map.
///
/// `name=` stores an empty string; duplicate names are rejected.
pub fn parse_filter_parameters(items: &[String]) -> crate::Result<serde_json::Map<String, Value>> {
    let mut params = serde_json::Map::new();
    for item in items {
        if item.is_empty() {
            continue;
        }
        let (name, value) = match item.split_once('=') {
            Some(("", _)) => {
                return Err(AzCliError::InvalidArgumentValue(format!(
                    "Invalid filter parameter \"{}\". Parameter name cannot be empty.",
                    item
                )));
            }
            Some((name, "")) => (name, Value::String(String::new())),
            Some((name, raw)) => {
                let value = serde_json::from_str(raw).map_err(|_| {
                    AzCliError::InvalidArgumentValue(format!(
                        "Filter parameter value must be a JSON escaped string. \"{}\" is not a valid JSON object.",
                        raw
                    ))
                })?;
                (name, value)
            }
            None => (item.as_str(), Value::String(String::new())),
        };
        if params.contains_key(name) {
            return Err(AzCliError::InvalidArgumentValue(format!(
                "Filter parameter name \"{}\" cannot be duplicated.",
                name
            )));
        }
        params.insert(name.to_string(), value);
    }
    Ok(params)
}

/// Parse `name=value` tag arguments. A bare name gets an empty value.
pub fn parse_tags(items: &[String]) -> Tags {
    items
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| match t.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (t.clone(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_validate_import_key() {
        assert!(validate_import_key("app/setting"));
        assert!(!validate_import_key(""));
        assert!(!validate_import_key("."));
        assert!(!validate_import_key(".."));
        assert!(!validate_import_key("50%"));
        assert!(!validate_import_key(".appconfig.featureflag/beta"));
    }

    #[test]
    fn test_validate_key_argument() {
        assert!(matches!(validate_key("  "), Err(AzCliError::RequiredArgumentMissing(_))));
        assert!(matches!(validate_key(".."), Err(AzCliError::InvalidArgumentValue(_))));
        assert!(validate_key("color").is_ok());
    }

    #[test]
    fn test_secret_identifier() {
        let id = parse_secret_identifier("https://vault.vault.azure.net/secrets/db/abc123").unwrap();
        assert_eq!(id.vault_url, "https://vault.vault.azure.net");
        assert_eq!(id.name, "db");
        assert_eq!(id.version.as_deref(), Some("abc123"));
        assert!(parse_secret_identifier("https://vault.vault.azure.net/keys/db").is_err());
        assert!(parse_secret_identifier("not a url").is_err());
    }

    #[test]
    fn test_kvset_item_validation() {
        let ok = validate_import_config_setting(&json!({
            "key": "a", "value": "1", "label": "dev", "content_type": null, "tags": {"t": "v"}
        }))
        .unwrap();
        assert_eq!(ok.label.as_deref(), Some("dev"));
        assert_eq!(ok.tags.get("t").map(String::as_str), Some("v"));

        assert!(validate_import_config_setting(&json!({"key": "a", "value": 1})).is_none());
        assert!(validate_import_config_setting(&json!({"key": "a", "tags": {"t": 1}})).is_none());
        assert!(validate_import_config_setting(&json!({"key": "a", "tags": ["t"]})).is_none());
        assert!(validate_import_config_setting(&json!({"key": 5})).is_none());
        assert!(validate_import_config_setting(&json!({"value": "no key"})).is_none());
    }

    #[test]
    fn test_kvset_keyvault_and_feature_items() {
        let good_ref = json!({
            "key": "secret",
            "value": "{\"uri\":\"https://v.vault.azure.net/secrets/s\"}",
            "content_type": KEYVAULT_CONTENT_TYPE,
        });
        assert!(validate_import_config_setting(&good_ref).is_some());
        let bad_ref = json!({"key": "secret", "value": "{\"uri\":\"nope\"}", "content_type": KEYVAULT_CONTENT_TYPE});
        assert!(validate_import_config_setting(&bad_ref).is_none());

        let flag = json!({
            "key": ".appconfig.featureflag/beta",
            "value": "{\"id\":\"beta\",\"enabled\":true,\"conditions\":{\"client_filters\":[]}}",
            "content_type": FEATURE_FLAG_CONTENT_TYPE,
        });
        assert!(validate_import_config_setting(&flag).is_some());
        let extra = json!({
            "key": ".appconfig.featureflag/beta",
            "value": "{\"id\":\"beta\",\"color\":\"red\"}",
            "content_type": FEATURE_FLAG_CONTENT_TYPE,
        });
        assert!(validate_import_config_setting(&extra).is_none());
    }

    #[test]
    fn test_parse_datetime_formats() {
        let plain = parse_datetime("2024-03-01T10:00:00").unwrap();
        let zulu = parse_datetime("2024-03-01T10:00:00Z").unwrap();
        let offset = parse_datetime("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(plain, zulu);
        assert_eq!(zulu, offset);
        assert!(matches!(
            parse_datetime("yesterday"),
            Err(AzCliError::InvalidArgumentValue(_))
        ));
        assert_eq!(
            accept_datetime(Some("2024-03-01T10:00:00Z")).unwrap().as_deref(),
            Some("Fri, 01 Mar 2024 10:00:00 GMT")
        );
    }

    #[test]
    fn test_separator_rules() {
        assert!(validate_separator(Some("__"), false).is_ok());
        assert!(validate_separator(Some("|"), false).is_err());
        assert!(validate_separator(Some("."), true).is_err());
        assert!(validate_separator(None, true).is_ok());
    }

    #[test]
    fn test_filter_parameters() {
        let params = parse_filter_parameters(&[
            "Value=50".to_string(),
            "Audience={\"Users\":[\"a\"]}".to_string(),
            "Empty=".to_string(),
            "Bare".to_string(),
        ])
        .unwrap();
        assert_eq!(params["Value"], json!(50));
        assert_eq!(params["Audience"], json!({"Users": ["a"]}));
        assert_eq!(params["Empty"], json!(""));
        assert_eq!(params["Bare"], json!(""));

        assert!(parse_filter_parameters(&["=1".to_string()]).is_err());
        assert!(parse_filter_parameters(&["a=not json".to_string()]).is_err());
        assert!(parse_filter_parameters(&["a=1".to_string(), "a=2".to_string()]).is_err());
    }

    #[test]
    fn test_dry_run_and_yes_exclusive() {
        assert!(matches!(
            validate_dry_run(true, true),
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));
        assert!(validate_dry_run(true, false).is_ok());
    }

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags(&["env=prod".to_string(), "team".to_string()]);
        assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(tags.get("team").map(String::as_str), Some(""));
    }
}
