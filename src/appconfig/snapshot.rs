//! Snapshots: immutable, named sets of key-values selected by filters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::appconfig::client::KvQuery;
use crate::appconfig::models::{
    null_as_empty, project_fields, project_key_value, QueryField, Tags,
};
use crate::appconfig::validation::parse_tags;
use crate::appconfig::StoreContext;
use crate::error::AzCliError;

pub const MIN_RETENTION_SECS: i64 = 3600;
pub const MAX_FILTERS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFilter {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Provisioning,
    Ready,
    Archived,
    Failed,
}

impl SnapshotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotStatus::Provisioning => "provisioning",
            SnapshotStatus::Ready => "ready",
            SnapshotStatus::Archived => "archived",
            SnapshotStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> crate::Result<SnapshotStatus> {
        match value.to_ascii_lowercase().as_str() {
            "provisioning" => Ok(SnapshotStatus::Provisioning),
            "ready" => Ok(SnapshotStatus::Ready),
            "archived" => Ok(SnapshotStatus::Archived),
            "failed" => Ok(SnapshotStatus::Failed),
            other => Err(AzCliError::InvalidArgumentValue(format!(
                "Invalid snapshot status '{}'. Allowed values: provisioning, ready, archived, failed.",
                other
            ))),
        }
    }
}

/// How entries matched by several filters collapse into one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionType {
    /// One entry per key; later filters win.
    Key,
    /// One entry per key and label.
    KeyLabel,
}

impl CompositionType {
    pub fn parse(value: &str) -> crate::Result<CompositionType> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "key" => Ok(CompositionType::Key),
            "key_label" => Ok(CompositionType::KeyLabel),
            _ => Err(AzCliError::InvalidArgumentValue(format!(
                "Invalid composition type '{}'. Allowed values: key, key_label.",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    #[serde(default)]
    pub status: Option<SnapshotStatus>,
    #[serde(default)]
    pub filters: Vec<SnapshotFilter>,
    #[serde(default)]
    pub composition_type: Option<CompositionType>,
    /// Seconds an archived snapshot is kept.
    #[serde(default)]
    pub retention_period: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Tags,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub items_count: Option<i64>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub etag: Option<String>,
}

/// Body of a snapshot create request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRequest {
    #[serde(skip)]
    pub name: String,
    pub filters: Vec<SnapshotFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composition_type: Option<CompositionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_period: Option<i64>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

/// Parse `--filters`, each an escaped JSON object `{"key", "label"?, "tags"?}`.
pub fn parse_snapshot_filters(filters: &[String]) -> crate::Result<Vec<SnapshotFilter>> {
    if filters.is_empty() {
        return Err(AzCliError::RequiredArgumentMissing(
            "A list of at least one filter is required.".to_string(),
        ));
    }
    if filters.len() > MAX_FILTERS {
        return Err(AzCliError::InvalidArgumentValue(
            "Too many filters supplied. A maximum of 3 filters allowed.".to_string(),
        ));
    }

    filters
        .iter()
        .map(|raw| {
            let parsed: Value = serde_json::from_str(raw).map_err(|_| {
                AzCliError::InvalidArgumentValue(format!(
                    "Parameter must be an escaped JSON object. {} is not a valid JSON object.",
                    raw
                ))
            })?;
            let obj = match parsed {
                Value::Object(obj) => obj,
                other => {
                    return Err(AzCliError::InvalidArgumentValue(format!(
                        "Parameter must be an escaped JSON object. Value of type {} was supplied.",
                        json_type_name(&other)
                    )));
                }
            };

            let key = match obj.get("key") {
                None | Some(Value::Null) => {
                    return Err(AzCliError::InvalidArgumentValue(
                        "Key filter value required.".to_string(),
                    ));
                }
                Some(Value::String(k)) if !k.is_empty() => k.clone(),
                Some(Value::String(_)) => {
                    return Err(AzCliError::InvalidArgumentValue(
                        "Key filter value required.".to_string(),
                    ));
                }
                Some(_) => {
                    return Err(AzCliError::InvalidArgumentValue(
                        "Invalid key filter value. Value must be a non-empty string.".to_string(),
                    ));
                }
            };
            let label = match obj.get("label") {
                None | Some(Value::Null) => None,
                Some(Value::String(l)) => Some(l.clone()),
                Some(_) => {
                    return Err(AzCliError::InvalidArgumentValue(
                        "Label filter must be a string if specified.".to_string(),
                    ));
                }
            };
            let tags = match obj.get("tags") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|t| t.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(tags_error)?,
                Some(_) => return Err(tags_error()),
            };
            Ok(SnapshotFilter { key, label, tags })
        })
        .collect()
}

fn tags_error() -> AzCliError {
    AzCliError::InvalidArgumentValue(
        "Tags filter must be a list of strings if specified.".to_string(),
    )
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn validate_snapshot_name(name: &str) -> crate::Result<()> {
    if name.trim().is_empty() {
        return Err(AzCliError::RequiredArgumentMissing(
            "Snapshot name cannot be empty.".to_string(),
        ));
    }
    if name.contains(['*', ',']) {
        return Err(AzCliError::InvalidArgumentValue(format!(
            "Snapshot name '{}' cannot contain '*' or ','.",
            name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct CreateSnapshotArgs {
    pub name: String,
    pub filters: Vec<String>,
    pub composition_type: Option<String>,
    pub retention_period: Option<i64>,
    pub tags: Vec<String>,
}

pub async fn create_snapshot(ctx: &StoreContext<'_>, args: &CreateSnapshotArgs) -> crate::Result<Snapshot> {
    validate_snapshot_name(&args.name)?;
    let filters = parse_snapshot_filters(&args.filters)?;
    let composition_type = args
        .composition_type
        .as_deref()
        .map(CompositionType::parse)
        .transpose()?;
    if args.retention_period.is_some_and(|r| r < MIN_RETENTION_SECS) {
        return Err(AzCliError::InvalidArgumentValue(format!(
            "Retention period must be at least {} seconds.",
            MIN_RETENTION_SECS
        )));
    }

    let request = SnapshotRequest {
        name: args.name.clone(),
        filters,
        composition_type,
        retention_period: args.retention_period,
        tags: parse_tags(&args.tags),
    };
    tracing::info!(name = %request.name, filters = request.filters.len(), "creating snapshot");
    ctx.client.create_snapshot(&request).await
}

fn project_snapshot(snapshot: &Snapshot, fields: &[String]) -> Value {
    let value = serde_json::to_value(snapshot).unwrap_or(Value::Null);
    let names: Vec<String> = fields
        .iter()
        .map(|f| f.to_ascii_lowercase().replace('-', "_"))
        .collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    project_fields(value, &names)
}

async fn require_snapshot(ctx: &StoreContext<'_>, name: &str) -> crate::Result<Snapshot> {
    ctx.client
        .get_snapshot(name)
        .await?
        .ok_or_else(|| AzCliError::Cli(format!("Snapshot '{}' does not exist.", name)))
}

pub async fn show_snapshot(ctx: &StoreContext<'_>, name: &str, fields: &[String]) -> crate::Result<Value> {
    let snapshot = require_snapshot(ctx, name).await?;
    Ok(project_snapshot(&snapshot, fields))
}

#[derive(Debug, Clone, Default)]
pub struct ListSnapshotArgs {
    pub name: Option<String>,
    pub status: Vec<String>,
    pub fields: Vec<String>,
    pub top: Option<usize>,
    pub all: bool,
}

pub async fn list_snapshots(ctx: &StoreContext<'_>, args: &ListSnapshotArgs) -> crate::Result<Vec<Value>> {
    let status = args
        .status
        .iter()
        .map(|s| SnapshotStatus::parse(s))
        .collect::<crate::Result<Vec<_>>>()?;
    let snapshots = ctx
        .client
        .list_snapshots(args.name.as_deref(), &status, ctx.limit(args.top, args.all))
        .await?;
    Ok(snapshots
        .iter()
        .map(|s| project_snapshot(s, &args.fields))
        .collect())
}

async fn set_status(ctx: &StoreContext<'_>, name: &str, status: SnapshotStatus) -> crate::Result<Snapshot> {
    let current = require_snapshot(ctx, name).await?;
    if current.status == Some(status) {
        tracing::info!(name, status = status.as_str(), "snapshot already in requested state");
        return Ok(current);
    }
    ctx.client
        .update_snapshot_status(name, status, current.etag.as_deref())
        .await
}

/// Archived snapshots expire after their retention period.
pub async fn archive_snapshot(ctx: &StoreContext<'_>, name: &str) -> crate::Result<Snapshot> {
    set_status(ctx, name, SnapshotStatus::Archived).await
}

pub async fn recover_snapshot(ctx: &StoreContext<'_>, name: &str) -> crate::Result<Snapshot> {
    set_status(ctx, name, SnapshotStatus::Ready).await
}

pub async fn list_snapshot_key_values(
    ctx: &StoreContext<'_>,
    name: &str,
    fields: &[String],
    top: Option<usize>,
    all: bool,
) -> crate::Result<Vec<Value>> {
    let query = KvQuery::default().with_snapshot(Some(name.to_string()));
    let entries = ctx.client.list_key_values(&query, ctx.limit(top, all)).await?;
    let fields = QueryField::parse_list(fields);
    Ok(entries.iter().map(|kv| project_key_value(kv, &fields)).collect())
}
