//! Reading and writing key-values and feature flags as json, yaml or
//! properties files.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::appconfig::feature::{
    feature_key_value, FeatureFlag, FeatureFlagValue, FeatureState, DOTNET_CAMEL, DOTNET_HYPHEN,
    DOTNET_PASCAL, DOTNET_UNDERSCORE,
};
use crate::appconfig::models::{is_json_content_type, KeyValue};
use crate::appconfig::validation::{validate_import_config_setting, validate_import_key};
use crate::error::AzCliError;

pub const FEATURE_FLAGS_KEY: &str = "feature_flags";
pub const KVSET_ROOT: &str = "items";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
    Properties,
}

impl FromStr for FileFormat {
    type Err = AzCliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(FileFormat::Json),
            "yaml" | "yml" => Ok(FileFormat::Yaml),
            "properties" => Ok(FileFormat::Properties),
            other => Err(AzCliError::InvalidArgumentValue(format!(
                "Unsupported file format '{}'. Allowed values: json, yaml, properties.",
                other
            ))),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileFormat::Json => "json",
            FileFormat::Yaml => "yaml",
            FileFormat::Properties => "properties",
        };
        f.write_str(s)
    }
}

fn separator_required() -> AzCliError {
    AzCliError::RequiredArgumentMissing(
        "A non-empty separator is required for importing hierarchical configurations.".to_string(),
    )
}

fn dump(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flatten `value` under `key`, descending while `depth` allows.
///
/// `depth` of `None` descends all the way. Leaves that are not strings are
/// stored as their JSON text.
pub fn flatten_key_value(
    key: &str,
    value: &Value,
    out: &mut BTreeMap<String, String>,
    depth: Option<usize>,
    separator: Option<&str>,
) -> crate::Result<()> {
    let descend = depth.is_none_or(|d| d > 1);
    let next = depth.map(|d| d - 1);
    match value {
        Value::Array(items) if descend => {
            let sep = separator.filter(|s| !s.is_empty()).ok_or_else(separator_required)?;
            for (index, item) in items.iter().enumerate() {
                flatten_key_value(&format!("{}{}{}", key, sep, index), item, out, next, separator)?;
            }
        }
        Value::Object(obj) if descend => {
            let sep = separator.filter(|s| !s.is_empty()).ok_or_else(separator_required)?;
            for (nested, item) in obj {
                flatten_key_value(&format!("{}{}{}", key, sep, nested), item, out, next, separator)?;
            }
        }
        leaf => {
            if out.insert(key.to_string(), dump(leaf)).is_some() {
                tracing::debug!(key, "The key already exists, value has been overwritten.");
            }
        }
    }
    Ok(())
}

/// Flatten for JSON content types: only objects are descended and every
/// value, strings included, is stored as JSON text.
pub fn flatten_json_key_value(
    key: &str,
    value: &Value,
    out: &mut BTreeMap<String, String>,
    depth: Option<usize>,
    separator: Option<&str>,
) -> crate::Result<()> {
    let descend = depth.is_none_or(|d| d > 1);
    match value {
        Value::Object(obj) if descend => {
            let sep = separator.filter(|s| !s.is_empty()).ok_or_else(separator_required)?;
            for (nested, item) in obj {
                flatten_json_key_value(
                    &format!("{}{}{}", key, sep, nested),
                    item,
                    out,
                    depth.map(|d| d - 1),
                    separator,
                )?;
            }
        }
        leaf => {
            out.insert(key.to_string(), leaf.to_string());
        }
    }
    Ok(())
}

/// Parse a Java-style properties file.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }
        let mut logical = trimmed.to_string();
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let chars: Vec<char> = logical.chars().collect();
        let mut split = chars.len();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '\\' => i += 2,
                '=' | ':' | ' ' | '\t' | '\x0c' => {
                    split = i;
                    break;
                }
                _ => i += 1,
            }
        }
        let key: String = chars[..split.min(chars.len())].iter().collect();
        let mut rest = chars.get(split..).unwrap_or(&[]);
        while let Some((c, tail)) = rest.split_first() {
            if matches!(c, ' ' | '\t' | '\x0c') {
                rest = tail;
            } else {
                break;
            }
        }
        if let Some((_, tail)) = rest.split_first().filter(|(c, _)| matches!(c, '=' | ':')) {
            rest = tail;
            while let Some((c, tail)) = rest.split_first() {
                if matches!(c, ' ' | '\t' | '\x0c') {
                    rest = tail;
                } else {
                    break;
                }
            }
        }
        let value: String = rest.iter().collect();
        out.insert(unescape_properties(&key), unescape_properties(&value));
    }
    out
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn unescape_properties(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape_properties(s: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' if is_key => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out
}

fn read_text(path: &Path) -> crate::Result<String> {
    let bytes = std::fs::read(path).map_err(|e| {
        AzCliError::FileOperation(format!("File is not available. {}: {}", path.display(), e))
    })?;
    let text = String::from_utf8(bytes).map_err(|e| {
        AzCliError::FileOperation(format!(
            "The input is not a valid UTF-8 file. {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text))
}

/// Load a file into one JSON document. Multi-document yaml is merged.
pub fn read_document(path: &Path, format: FileFormat) -> crate::Result<Value> {
    let text = read_text(path)?;
    let malformed = |e: &dyn fmt::Display| {
        AzCliError::FileOperation(format!(
            "The input is not a well formatted {} file.\nException: {}",
            format, e
        ))
    };
    match format {
        FileFormat::Json => {
            let value: Value = serde_json::from_str(&text).map_err(|e| malformed(&e))?;
            match value {
                Value::Object(_) | Value::Array(_) => Ok(value),
                other => Err(malformed(&format!(
                    "Json object required but type '{}' was given.",
                    json_kind(&other)
                ))),
            }
        }
        FileFormat::Yaml => {
            let mut merged = Map::new();
            for document in serde_yaml::Deserializer::from_str(&text) {
                match Value::deserialize(document).map_err(|e| malformed(&e))? {
                    Value::Object(obj) => merged.extend(obj),
                    Value::Null => {}
                    other => {
                        return Err(malformed(&format!(
                            "Yaml mapping required but type '{}' was given.",
                            json_kind(&other)
                        )));
                    }
                }
            }
            Ok(Value::Object(merged))
        }
        FileFormat::Properties => Ok(Value::Object(
            parse_properties(&text)
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileReadOptions {
    pub separator: Option<String>,
    pub prefix: String,
    pub depth: Option<usize>,
    pub content_type: Option<String>,
}

const FEATURE_SECTIONS: [&str; 4] = [
    DOTNET_PASCAL.feature_management,
    DOTNET_CAMEL.feature_management,
    DOTNET_HYPHEN.feature_management,
    DOTNET_UNDERSCORE.feature_management,
];

/// Flattened key-values of a file, feature management sections excluded.
pub fn read_kv_from_file(
    path: &Path,
    format: FileFormat,
    opts: &FileReadOptions,
) -> crate::Result<Vec<KeyValue>> {
    let mut document = read_document(path, format)?;
    if let (true, Value::Object(obj)) = (format != FileFormat::Properties, &mut document) {
        for section in FEATURE_SECTIONS {
            obj.remove(section);
        }
    }

    let separator = opts.separator.as_deref();
    let json_typed = format == FileFormat::Json
        && opts.content_type.as_deref().is_some_and(is_json_content_type);
    let mut flattened = BTreeMap::new();
    match &document {
        Value::Object(obj) => {
            for (key, value) in obj {
                let key = format!("{}{}", opts.prefix, key);
                if json_typed {
                    flatten_json_key_value(&key, value, &mut flattened, opts.depth, separator)?;
                } else {
                    flatten_key_value(&key, value, &mut flattened, opts.depth, separator)?;
                }
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                let key = format!("{}{}", opts.prefix, index);
                if json_typed {
                    flatten_json_key_value(&key, value, &mut flattened, opts.depth, separator)?;
                } else {
                    flatten_key_value(&key, value, &mut flattened, opts.depth, separator)?;
                }
            }
        }
        _ => {}
    }

    Ok(flattened
        .into_iter()
        .filter(|(key, _)| validate_import_key(key))
        .map(|(key, value)| {
            let kv = KeyValue::new(key, value);
            match &opts.content_type {
                Some(ct) => kv.with_content_type(ct.clone()),
                None => kv,
            }
        })
        .collect())
}

/// Feature flags declared in a json or yaml file, as key-values.
pub fn read_features_from_file(path: &Path, format: FileFormat) -> crate::Result<Vec<KeyValue>> {
    if format == FileFormat::Properties {
        tracing::warn!(
            "Importing feature flags from a properties file is not supported. If properties file \
             contains feature flags, they will be imported as regular key-values."
        );
        return Ok(Vec::new());
    }
    let document = read_document(path, format)?;
    let Value::Object(obj) = document else {
        return Ok(Vec::new());
    };

    let mut dotnet: Option<(&'static str, Map<String, Value>)> = None;
    for keywords in [DOTNET_PASCAL, DOTNET_CAMEL, DOTNET_HYPHEN] {
        if let Some(section) = obj.get(keywords.feature_management) {
            if dotnet.is_some() {
                return Err(AzCliError::FileOperation(
                    "Unable to proceed because file contains multiple sections corresponding to \"Feature Management\"."
                        .to_string(),
                ));
            }
            dotnet = Some((keywords.feature_management, section_map(section)?));
        }
    }

    let mut ms_flags: Option<Vec<Value>> = None;
    if let Some(section) = obj.get(DOTNET_UNDERSCORE.feature_management) {
        let mut section = section_map(section)?;
        let flags = section.remove(FEATURE_FLAGS_KEY);
        if !section.is_empty() {
            if let Some((keyword, _)) = &dotnet {
                return Err(AzCliError::FileOperation(format!(
                    "Data contains an already defined section with the key {}.",
                    keyword
                )));
            }
            dotnet = Some((DOTNET_UNDERSCORE.feature_management, section));
        }
        if let Some(flags) = flags {
            match flags {
                Value::Array(items) => ms_flags = Some(items),
                _ => return Err(invalid_features("Feature flags must be a list.")),
            }
        }
    }

    let mut flags: Vec<FeatureFlagValue> = Vec::new();
    if let Some((keyword, section)) = &dotnet {
        let keywords = [DOTNET_PASCAL, DOTNET_CAMEL, DOTNET_HYPHEN, DOTNET_UNDERSCORE]
            .into_iter()
            .find(|k| k.feature_management == *keyword)
            .unwrap_or(DOTNET_PASCAL);
        for (name, value) in section {
            if !crate::appconfig::validation::validate_import_feature(name) {
                continue;
            }
            let flag = FeatureFlagValue::from_dotnet_schema(name, value, &keywords)
                .map_err(|e| invalid_features(&e.to_string()))?;
            flags.push(flag);
        }
    }
    for entry in ms_flags.iter().flatten() {
        let Some(flag) =
            FeatureFlagValue::from_ms_schema(entry).map_err(|e| invalid_features(&e.to_string()))?
        else {
            continue;
        };
        match flags.iter_mut().find(|f| f.id == flag.id) {
            Some(existing) => *existing = flag,
            None => flags.push(flag),
        }
    }

    flags.iter().map(feature_key_value).collect()
}

fn section_map(section: &Value) -> crate::Result<Map<String, Value>> {
    match section {
        Value::Object(obj) => Ok(obj.clone()),
        Value::Null => Ok(Map::new()),
        _ => Err(invalid_features("Feature management section must be a dictionary.")),
    }
}

fn invalid_features(detail: &str) -> AzCliError {
    AzCliError::Cli(format!("File contains feature flags in invalid format. {}", detail))
}

/// Tree under construction while unflattening. Lists are sparse and keyed
/// by index, so a large index costs one entry.
#[derive(Debug, Clone)]
enum Node {
    Leaf(Value),
    List(BTreeMap<usize, Node>),
    Map(BTreeMap<String, Node>),
}

impl Node {
    fn container_for(next_segment: &str) -> Node {
        if is_index(next_segment) {
            Node::List(BTreeMap::new())
        } else {
            Node::Map(BTreeMap::new())
        }
    }

    /// Closes the gaps between list indices.
    fn compact(self) -> Value {
        match self {
            Node::Leaf(v) => v,
            Node::List(items) => Value::Array(items.into_values().map(Node::compact).collect()),
            Node::Map(entries) => {
                Value::Object(entries.into_iter().map(|(k, v)| (k, v.compact())).collect())
            }
        }
    }
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

fn insert_segments(node: &mut Node, segments: &[&str], value: Value, key: &str) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    match node {
        Node::List(items) => {
            let Ok(index) = first.parse::<usize>() else {
                tracing::debug!(key, "A key has been dropped as it can not be exported to a valid file!");
                return;
            };
            if rest.is_empty() {
                items.insert(index, Node::Leaf(value));
            } else {
                let child = items
                    .entry(index)
                    .or_insert_with(|| Node::container_for(rest[0]));
                insert_segments(child, rest, value, key);
            }
        }
        Node::Map(entries) => {
            if is_index(first) {
                tracing::debug!(key, "A key has been dropped as it can not be exported to a valid file!");
                return;
            }
            if rest.is_empty() {
                entries.insert(first.to_string(), Node::Leaf(value));
            } else {
                let child = entries
                    .entry(first.to_string())
                    .or_insert_with(|| Node::container_for(rest[0]));
                insert_segments(child, rest, value, key);
            }
        }
        Node::Leaf(_) => {
            tracing::debug!(key, "A key has been dropped as it can not be exported to a valid file!");
        }
    }
}

/// Value written for `kv`: JSON-typed values are embedded as JSON in
/// structured formats.
fn export_value(kv: &KeyValue, format: FileFormat) -> Value {
    let text = kv.value_str();
    let json_typed = format != FileFormat::Properties
        && kv.content_type.as_deref().is_some_and(is_json_content_type);
    if json_typed {
        if let Ok(parsed) = serde_json::from_str::<Value>(text) {
            return parsed;
        }
    }
    Value::String(text.to_string())
}

/// Rebuild the file document from flat key-values.
///
/// Two labels of one key must agree on the value. Without a separator, or
/// for properties, keys stay flat.
pub fn export_key_values(
    key_values: &[KeyValue],
    format: FileFormat,
    separator: Option<&str>,
) -> crate::Result<Value> {
    let separator = separator.filter(|s| !s.is_empty());
    let mut seen: BTreeMap<&str, &KeyValue> = BTreeMap::new();
    let mut flat = Map::new();
    let mut as_map = Node::Map(BTreeMap::new());
    let mut as_list = Node::List(BTreeMap::new());
    let mut list_used = false;

    for kv in key_values {
        if let Some(previous) = seen.get(kv.key.as_str()) {
            if previous.value != kv.value {
                return Err(AzCliError::Cli(format!(
                    "The key {} has two labels {} and {}, which conflicts with each other.",
                    kv.key,
                    previous.label.as_deref().unwrap_or("null"),
                    kv.label.as_deref().unwrap_or("null")
                )));
            }
            continue;
        }
        seen.insert(&kv.key, kv);
        let value = export_value(kv, format);

        let Some(sep) = separator.filter(|_| format != FileFormat::Properties) else {
            flat.insert(kv.key.clone(), value);
            continue;
        };
        let segments: Vec<&str> = kv.key.split(sep).collect();
        if is_index(segments[0]) {
            list_used = true;
            insert_segments(&mut as_list, &segments, value, &kv.key);
        } else {
            insert_segments(&mut as_map, &segments, value, &kv.key);
        }
    }

    if separator.is_none() || format == FileFormat::Properties {
        return Ok(Value::Object(flat));
    }
    let map_value = as_map.compact();
    if list_used {
        if map_value.as_object().is_some_and(|m| !m.is_empty()) {
            tracing::error!(
                dropped = %map_value,
                "Can not export to a valid file! Some keys have been dropped."
            );
        }
        return Ok(as_list.compact());
    }
    Ok(map_value)
}

/// `FeatureManagement` section in the .NET schema; json only.
pub fn export_features(features: &[FeatureFlag], format: FileFormat) -> Option<Value> {
    if format != FileFormat::Json {
        tracing::warn!(
            "Exporting feature flags to a yaml or properties file is not supported yet. \
             Ignoring all feature flags."
        );
        return None;
    }
    let mut section = Map::new();
    for feature in features {
        let state = match feature.state {
            FeatureState::On => Value::Bool(true),
            FeatureState::Off => Value::Bool(false),
            FeatureState::Conditional => {
                let enabled_for: Vec<Value> = feature
                    .conditions
                    .client_filters
                    .iter()
                    .map(|f| {
                        let mut entry = Map::new();
                        entry.insert("Name".into(), json!(f.name));
                        if !f.parameters.is_empty() {
                            entry.insert("Parameters".into(), Value::Object(f.parameters.clone()));
                        }
                        Value::Object(entry)
                    })
                    .collect();
                json!({ "EnabledFor": enabled_for })
            }
        };
        section.insert(feature.name.clone(), state);
    }
    Some(json!({ DOTNET_PASCAL.feature_management: section }))
}

/// Write key-values, and feature flags when given, to `path`.
pub fn write_kv_and_features_to_file(
    path: &Path,
    key_values: &[KeyValue],
    features: &[FeatureFlag],
    format: FileFormat,
    separator: Option<&str>,
) -> crate::Result<()> {
    let mut document = export_key_values(key_values, format, separator)?;
    let section = if features.is_empty() {
        None
    } else {
        export_features(features, format)
    };
    if let Some(Value::Object(section)) = section {
        match &mut document {
            Value::Object(obj) => obj.extend(section),
            _ => {
                return Err(AzCliError::Cli(
                    "Failed to export key-values to file. Feature flags cannot be combined with a list root."
                        .to_string(),
                ));
            }
        }
    }

    let text = match format {
        FileFormat::Json => serde_json::to_string_pretty(&document)
            .map_err(|e| AzCliError::Cli(format!("Failed to export key-values to file. {}", e)))?,
        FileFormat::Yaml => serde_yaml::to_string(&document)
            .map_err(|e| AzCliError::Cli(format!("Failed to export key-values to file. {}", e)))?,
        FileFormat::Properties => {
            let mut out = String::new();
            if let Value::Object(obj) = &document {
                for (key, value) in obj {
                    out.push_str(&escape_properties(key, true));
                    out.push('=');
                    out.push_str(&escape_properties(&dump(value), false));
                    out.push('\n');
                }
            }
            out
        }
    };
    std::fs::write(path, text).map_err(|e| {
        AzCliError::FileOperation(format!("Failed to export key-values to file. {}", e))
    })
}

/// Items of an `appconfig/kvset` file; invalid items are skipped with a warning.
pub fn read_kvset_from_file(path: &Path) -> crate::Result<Vec<KeyValue>> {
    let document = read_document(path, FileFormat::Json)?;
    let Some(items) = document.get(KVSET_ROOT).and_then(Value::as_array) else {
        return Err(AzCliError::FileOperation(format!(
            "file '{}' is not in a valid 'appconfig/kvset' format.",
            path.display()
        )));
    };
    Ok(items.iter().filter_map(validate_import_config_setting).collect())
}

pub fn write_kvset_to_file(path: &Path, key_values: &[KeyValue]) -> crate::Result<()> {
    let items: Vec<Value> = key_values
        .iter()
        .map(|kv| {
            json!({
                "key": kv.key,
                "value": kv.value,
                "label": kv.label,
                "content_type": kv.content_type,
                "tags": kv.tags,
            })
        })
        .collect();
    let text = serde_json::to_string_pretty(&json!({ KVSET_ROOT: items }))
        .map_err(|e| AzCliError::Cli(format!("Failed to export key-values to file. {}", e)))?;
    std::fs::write(path, text).map_err(|e| {
        AzCliError::FileOperation(format!("Failed to export key-values to file. {}", e))
    })
}
