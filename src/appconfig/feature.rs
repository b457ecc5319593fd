//! Feature flags stored as key-values under `.appconfig.featureflag/`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::appconfig::bulk::BulkOutcome;
use crate::appconfig::client::KvQuery;
use crate::appconfig::models::{
    label_filter, normalize_label, project_fields, KeyValue, FEATURE_FLAG_CONTENT_TYPE,
    FEATURE_FLAG_PREFIX,
};
use crate::appconfig::validation::{
    validate_feature_flag_key, validate_feature_flag_name, validate_import_feature,
};
use crate::appconfig::StoreContext;
use crate::error::AzCliError;
use crate::prompt::user_confirmation;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFilter {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Parameters", skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl FeatureFilter {
    /// Build from an object whose keys may use any casing (`Name`, `name`, ...).
    pub fn from_loose(value: &Value) -> Option<FeatureFilter> {
        let obj = value.as_object()?;
        let mut name = None;
        let mut parameters = Map::new();
        for (k, v) in obj {
            match k.to_ascii_lowercase().as_str() {
                "name" => name = v.as_str().map(str::to_string),
                "parameters" => {
                    if let Some(p) = v.as_object() {
                        parameters = p.clone();
                    }
                }
                _ => {}
            }
        }
        name.filter(|n| !n.is_empty())
            .map(|name| FeatureFilter { name, parameters })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequirementType {
    Any,
    All,
}

impl RequirementType {
    pub fn parse(value: &str) -> Option<RequirementType> {
        if value.eq_ignore_ascii_case("any") {
            Some(RequirementType::Any)
        } else if value.eq_ignore_ascii_case("all") {
            Some(RequirementType::All)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureConditions {
    #[serde(default)]
    pub client_filters: Vec<FeatureFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_type: Option<RequirementType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAllocation {
    pub variant: String,
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAllocation {
    pub variant: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileAllocation {
    pub variant: String,
    pub from: f64,
    pub to: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureAllocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_when_enabled: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_when_disabled: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Vec<UserAllocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Vec<GroupAllocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentile: Option<Vec<PercentileAllocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVariant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_override: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTelemetry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// JSON stored as the value of a feature flag key-value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlagValue {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: FeatureConditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<FeatureAllocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<FeatureVariant>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<FeatureTelemetry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// `true`/`false` booleans or their case-insensitive string forms.
fn loose_bool(value: &Value, feature: &str) -> crate::Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(AzCliError::Validation(format!(
            "Invalid value '{}' for the 'enabled' property of feature '{}'. Expected a boolean.",
            other, feature
        ))),
    }
}

impl FeatureFlagValue {
    pub fn new(id: impl Into<String>) -> Self {
        FeatureFlagValue {
            id: id.into(),
            ..Default::default()
        }
    }

    /// One entry of a `feature_management.feature_flags` list.
    ///
    /// Returns `None` for an entry with an invalid id; filters without a
    /// name are dropped with a warning.
    pub fn from_ms_schema(entry: &Value) -> crate::Result<Option<FeatureFlagValue>> {
        let id = match entry.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => {
                return Err(AzCliError::Validation(
                    "Feature flag entries must have an 'id'.".to_string(),
                ));
            }
        };
        if !validate_import_feature(&id) {
            return Ok(None);
        }

        let mut flag = FeatureFlagValue::new(id.clone());
        flag.enabled = match entry.get("enabled") {
            Some(v) => loose_bool(v, &id)?,
            None => false,
        };
        flag.description = entry
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        flag.display_name = entry
            .get("display_name")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(conditions) = entry.get("conditions").filter(|c| !c.is_null()) {
            for filter in conditions
                .get("client_filters")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                match FeatureFilter::from_loose(filter) {
                    Some(f) => flag.conditions.client_filters.push(f),
                    None => tracing::warn!(
                        feature = %id,
                        filter = %filter,
                        "Ignoring this filter without the name attribute"
                    ),
                }
            }
            if let Some(requirement) = conditions.get("requirement_type").and_then(Value::as_str) {
                flag.conditions.requirement_type =
                    Some(RequirementType::parse(requirement).ok_or_else(|| {
                        AzCliError::Validation(format!(
                            "Feature '{}' must have an Any/All requirement type.",
                            id
                        ))
                    })?);
            }
        }

        let typed = |field: &str| entry.get(field).filter(|v| !v.is_null()).cloned();
        let invalid = |field: &str, e: serde_json::Error| {
            AzCliError::Validation(format!("Feature '{}' has an invalid '{}': {}", id, field, e))
        };
        if let Some(allocation) = typed("allocation") {
            flag.allocation =
                Some(serde_json::from_value(allocation).map_err(|e| invalid("allocation", e))?);
        }
        if let Some(variants) = typed("variants") {
            let variants: Vec<Option<FeatureVariant>> =
                serde_json::from_value(variants).map_err(|e| invalid("variants", e))?;
            flag.variants = Some(variants.into_iter().flatten().collect());
        }
        if let Some(telemetry) = typed("telemetry") {
            flag.telemetry =
                Some(serde_json::from_value(telemetry).map_err(|e| invalid("telemetry", e))?);
        }
        Ok(Some(flag))
    }

    /// One `"Name": true | {"EnabledFor": [...]}` entry of a .NET section.
    ///
    /// `keywords` selects the casing of `EnabledFor`/`RequirementType`.
    pub fn from_dotnet_schema(
        id: &str,
        value: &Value,
        keywords: &DotnetKeywords,
    ) -> crate::Result<FeatureFlagValue> {
        let mut flag = FeatureFlagValue::new(id);
        match value {
            Value::Bool(enabled) => flag.enabled = *enabled,
            Value::Object(obj) => {
                let Some(enabled_for) = obj.get(keywords.enabled_for) else {
                    return Err(AzCliError::Validation(format!(
                        "Feature '{}' must contain '{}' definition or have a true/false value.",
                        id, keywords.enabled_for
                    )));
                };
                if let Some(requirement) = obj
                    .get(keywords.requirement_type)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                {
                    flag.conditions.requirement_type =
                        Some(RequirementType::parse(requirement).ok_or_else(|| {
                            AzCliError::Validation(format!(
                                "Feature '{}' must have an Any/All requirement type.",
                                id
                            ))
                        })?);
                }
                let filters = enabled_for.as_array().cloned().unwrap_or_default();
                flag.enabled = !filters.is_empty();
                for filter in &filters {
                    let Some(filter) = FeatureFilter::from_loose(filter) else {
                        return Err(AzCliError::Validation(format!(
                            "Feature filter for feature '{}' must contain a 'Name' attribute.",
                            id
                        )));
                    };
                    if filter.name.eq_ignore_ascii_case("alwayson") {
                        flag.conditions = FeatureConditions::default();
                        break;
                    }
                    flag.conditions.client_filters.push(filter);
                }
            }
            other => {
                return Err(AzCliError::Validation(format!(
                    "The type of '{}' should be either boolean or dictionary.",
                    other
                )));
            }
        }
        Ok(flag)
    }
}

/// Section and property names of one .NET feature management casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DotnetKeywords {
    pub feature_management: &'static str,
    pub enabled_for: &'static str,
    pub requirement_type: &'static str,
}

pub const DOTNET_PASCAL: DotnetKeywords = DotnetKeywords {
    feature_management: "FeatureManagement",
    enabled_for: "EnabledFor",
    requirement_type: "RequirementType",
};
pub const DOTNET_CAMEL: DotnetKeywords = DotnetKeywords {
    feature_management: "featureManagement",
    enabled_for: "enabledFor",
    requirement_type: "requirementType",
};
pub const DOTNET_HYPHEN: DotnetKeywords = DotnetKeywords {
    feature_management: "feature-management",
    enabled_for: "enabled-for",
    requirement_type: "requirement-type",
};
pub const DOTNET_UNDERSCORE: DotnetKeywords = DotnetKeywords {
    feature_management: "feature_management",
    enabled_for: "enabled_for",
    requirement_type: "requirement_type",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureState {
    On,
    Off,
    Conditional,
}

impl fmt::Display for FeatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureState::On => "on",
            FeatureState::Off => "off",
            FeatureState::Conditional => "conditional",
        };
        f.write_str(s)
    }
}

/// A feature flag as the commands present it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureFlag {
    pub name: String,
    pub key: String,
    pub label: Option<String>,
    pub state: FeatureState,
    pub locked: bool,
    pub description: Option<String>,
    pub last_modified: Option<String>,
    pub conditions: FeatureConditions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation: Option<FeatureAllocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<FeatureVariant>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<FeatureTelemetry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip)]
    pub etag: Option<String>,
}

impl FeatureFlag {
    pub fn from_key_value(kv: &KeyValue) -> crate::Result<FeatureFlag> {
        let value: FeatureFlagValue = serde_json::from_str(kv.value_str()).map_err(|e| {
            AzCliError::Validation(format!(
                "Invalid value for feature flag '{}'. Unable to decode the JSON value: {}",
                kv.key, e
            ))
        })?;
        let state = match (value.enabled, value.conditions.client_filters.is_empty()) {
            (false, _) => FeatureState::Off,
            (true, true) => FeatureState::On,
            (true, false) => FeatureState::Conditional,
        };
        Ok(FeatureFlag {
            name: value.id,
            key: kv.key.clone(),
            label: kv.label.clone(),
            state,
            locked: kv.locked,
            description: value.description,
            last_modified: kv.last_modified.clone(),
            conditions: value.conditions,
            allocation: value.allocation,
            variants: value.variants,
            telemetry: value.telemetry,
            display_name: value.display_name,
            etag: kv.etag.clone(),
        })
    }

    pub fn value(&self) -> FeatureFlagValue {
        FeatureFlagValue {
            id: self.name.clone(),
            description: self.description.clone(),
            enabled: self.state != FeatureState::Off,
            conditions: self.conditions.clone(),
            allocation: self.allocation.clone(),
            variants: self.variants.clone(),
            telemetry: self.telemetry.clone(),
            display_name: self.display_name.clone(),
        }
    }

    pub fn to_key_value(&self) -> crate::Result<KeyValue> {
        Ok(KeyValue {
            key: self.key.clone(),
            label: self.label.clone(),
            value: Some(serialize_value(&self.value())?),
            content_type: Some(FEATURE_FLAG_CONTENT_TYPE.to_string()),
            etag: self.etag.clone(),
            locked: self.locked,
            last_modified: self.last_modified.clone(),
            ..Default::default()
        })
    }
}

fn serialize_value(value: &FeatureFlagValue) -> crate::Result<String> {
    serde_json::to_string(value)
        .map_err(|e| AzCliError::Internal(format!("cannot serialize feature flag: {}", e)))
}

/// Key-value holding `value` under the reserved prefix.
pub fn feature_key_value(value: &FeatureFlagValue) -> crate::Result<KeyValue> {
    Ok(KeyValue::new(
        format!("{}{}", FEATURE_FLAG_PREFIX, value.id),
        serialize_value(value)?,
    )
    .with_content_type(FEATURE_FLAG_CONTENT_TYPE))
}

/// Resolve `--feature` / `--key` into `(key, name)`.
pub fn resolve_feature_key(
    feature: Option<&str>,
    key: Option<&str>,
) -> crate::Result<(String, String)> {
    match (feature, key) {
        (None, None) => Err(AzCliError::RequiredArgumentMissing(
            "Please provide either `--feature` or `--key` value.".to_string(),
        )),
        (feature, Some(key)) => {
            validate_feature_flag_key(key)?;
            let name = feature.unwrap_or(&key[FEATURE_FLAG_PREFIX.len()..]);
            validate_feature_flag_name(name)?;
            Ok((key.to_string(), name.to_string()))
        }
        (Some(feature), None) => {
            validate_feature_flag_name(feature)?;
            Ok((format!("{}{}", FEATURE_FLAG_PREFIX, feature), feature.to_string()))
        }
    }
}

fn not_found(key: &str, label: Option<&str>) -> AzCliError {
    AzCliError::Cli(format!(
        "Feature flag '{}' with label '{}' does not exist.",
        key,
        label.unwrap_or("")
    ))
}

async fn get_feature(
    ctx: &StoreContext<'_>,
    key: &str,
    label: Option<&str>,
) -> crate::Result<FeatureFlag> {
    let kv = ctx
        .client
        .get_key_value(key, label, None)
        .await?
        .ok_or_else(|| not_found(key, label))?;
    FeatureFlag::from_key_value(&kv)
}

/// Read-modify-write of one flag, retried on etag conflicts.
async fn update_feature<T, F>(
    ctx: &StoreContext<'_>,
    key: &str,
    label: Option<&str>,
    confirmation: Option<&str>,
    yes: bool,
    operation: &str,
    mut mutate: F,
) -> crate::Result<(FeatureFlag, T)>
where
    F: FnMut(&mut FeatureFlag) -> crate::Result<T>,
{
    for attempt in 1..=ctx.attempts() {
        let mut flag = get_feature(ctx, key, label).await?;
        let out = mutate(&mut flag)?;
        if let Some(message) = confirmation {
            user_confirmation(ctx.prompter, message, yes)?;
        }
        let kv = flag.to_key_value()?;
        match ctx.client.set_key_value(&kv, flag.etag.as_deref()).await {
            Ok(written) => return Ok((FeatureFlag::from_key_value(&written)?, out)),
            Err(e) => ctx.back_off_on_conflict(e, attempt, operation).await?,
        }
    }
    Err(AzCliError::Cli(format!(
        "Failed to {} the feature flag '{}' due to a conflicting operation.",
        operation, key
    )))
}

#[derive(Debug, Clone, Default)]
pub struct SetFeatureArgs {
    pub feature: Option<String>,
    pub key: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub yes: bool,
}

/// Create a flag, or update the description of an existing one.
pub async fn set_feature(ctx: &StoreContext<'_>, args: &SetFeatureArgs) -> crate::Result<FeatureFlag> {
    let (key, name) = resolve_feature_key(args.feature.as_deref(), args.key.as_deref())?;
    let label = normalize_label(args.label.as_deref());

    for attempt in 1..=ctx.attempts() {
        let existing = ctx.client.get_key_value(&key, label, None).await?;
        let (mut kv, etag) = match existing {
            Some(kv) => {
                let mut flag = FeatureFlag::from_key_value(&kv)?;
                if args.description.is_some() {
                    flag.description = args.description.clone();
                }
                (flag.to_key_value()?, kv.etag.clone())
            }
            None => {
                let mut value = FeatureFlagValue::new(name.clone());
                value.description = Some(args.description.clone().unwrap_or_default());
                let mut kv = feature_key_value(&value)?;
                kv.key = key.clone();
                (kv, None)
            }
        };
        kv.label = label.map(str::to_string);

        let entry = serde_json::json!({
            "key": kv.key,
            "label": kv.label,
            "content_type": kv.content_type,
            "value": serde_json::from_str::<Value>(kv.value_str()).unwrap_or(Value::Null),
        });
        let pretty = serde_json::to_string_pretty(&entry).unwrap_or_default();
        user_confirmation(
            ctx.prompter,
            &format!("Are you sure you want to set the feature flag: \n{}\n", pretty),
            args.yes,
        )?;

        let written = match &etag {
            Some(etag) => ctx.client.set_key_value(&kv, Some(etag)).await,
            None => ctx.client.add_key_value(&kv).await,
        };
        match written {
            Ok(written) => return FeatureFlag::from_key_value(&written),
            Err(e) => ctx.back_off_on_conflict(e, attempt, "set").await?,
        }
        kv.etag = None;
    }
    Err(AzCliError::Cli(format!(
        "Failed to set the feature flag '{}' due to a conflicting operation.",
        key
    )))
}

/// Delete every flag matching the key filter and label.
pub async fn delete_feature(
    ctx: &StoreContext<'_>,
    feature: Option<&str>,
    key: Option<&str>,
    label: Option<&str>,
    yes: bool,
) -> crate::Result<Vec<FeatureFlag>> {
    let key = match (feature, key) {
        (None, None) => {
            return Err(AzCliError::RequiredArgumentMissing(
                "Please provide either `--feature` or `--key` value.".to_string(),
            ));
        }
        (_, Some(key)) => key.to_string(),
        (Some(feature), None) => format!("{}{}", FEATURE_FLAG_PREFIX, feature),
    };
    user_confirmation(
        ctx.prompter,
        &format!("Are you sure you want to delete the feature flag '{}'", key),
        yes,
    )?;

    let query = KvQuery::default()
        .with_key(&key)
        .with_label(&label_filter(label));
    let entries = ctx.client.list_key_values(&query, None).await?;

    let mut outcome = BulkOutcome::new();
    for kv in entries.iter().filter(|kv| kv.is_feature_flag()) {
        let flag = match FeatureFlag::from_key_value(kv) {
            Ok(flag) => flag,
            Err(e) => {
                outcome.failure(kv.key.clone(), e);
                continue;
            }
        };
        match ctx
            .client
            .delete_key_value(&kv.key, kv.label.as_deref(), kv.etag.as_deref())
            .await
        {
            Ok(_) => outcome.success(flag),
            Err(e) => outcome.failure(kv.key.clone(), e),
        }
    }
    outcome.finish("Delete")
}

pub async fn show_feature(
    ctx: &StoreContext<'_>,
    feature: Option<&str>,
    key: Option<&str>,
    label: Option<&str>,
    fields: &[String],
) -> crate::Result<Value> {
    let (key, _) = resolve_feature_key(feature, key)?;
    let flag = get_feature(ctx, &key, normalize_label(label)).await?;
    Ok(project_feature(&flag, fields))
}

fn project_feature(flag: &FeatureFlag, fields: &[String]) -> Value {
    let value = serde_json::to_value(flag).unwrap_or(Value::Null);
    let names: Vec<String> = fields.iter().map(|f| f.to_ascii_lowercase().replace('-', "_")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    project_fields(value, &names)
}

#[derive(Debug, Clone, Default)]
pub struct ListFeatureArgs {
    /// Name filter, `*` wildcards allowed.
    pub feature: Option<String>,
    pub key: Option<String>,
    pub label: Option<String>,
    pub fields: Vec<String>,
    pub top: Option<usize>,
    pub all: bool,
}

pub async fn list_features(ctx: &StoreContext<'_>, args: &ListFeatureArgs) -> crate::Result<Vec<Value>> {
    let key = match (&args.key, &args.feature) {
        (Some(key), _) => key.clone(),
        (None, Some(feature)) => format!("{}{}", FEATURE_FLAG_PREFIX, feature),
        (None, None) => format!("{}*", FEATURE_FLAG_PREFIX),
    };
    let mut query = KvQuery::default().with_key(&key);
    if let Some(label) = &args.label {
        query = query.with_label(&label_filter(Some(label)));
    }
    let limit = ctx.limit(args.top, args.all);
    let entries = ctx.client.list_key_values(&query, None).await?;

    let mut out = Vec::new();
    for kv in entries.iter().filter(|kv| kv.is_feature_flag()) {
        match FeatureFlag::from_key_value(kv) {
            Ok(flag) => out.push(project_feature(&flag, &args.fields)),
            Err(e) => tracing::warn!(key = %kv.key, error = %e, "Skipping invalid feature flag"),
        }
        if limit.is_some_and(|l| out.len() >= l) {
            break;
        }
    }
    Ok(out)
}

/// Turn a flag on or off, keeping its filters.
pub async fn set_feature_state(
    ctx: &StoreContext<'_>,
    feature: Option<&str>,
    key: Option<&str>,
    label: Option<&str>,
    enabled: bool,
    yes: bool,
) -> crate::Result<FeatureFlag> {
    let (key, name) = resolve_feature_key(feature, key)?;
    let verb = if enabled { "enable" } else { "disable" };
    let message = format!("Are you sure you want to {} this feature '{}'?", verb, name);
    let (flag, ()) = update_feature(
        ctx,
        &key,
        normalize_label(label),
        Some(&message),
        yes,
        verb,
        |flag| {
            flag.state = match (enabled, flag.conditions.client_filters.is_empty()) {
                (false, _) => FeatureState::Off,
                (true, true) => FeatureState::On,
                (true, false) => FeatureState::Conditional,
            };
            Ok(())
        },
    )
    .await?;
    Ok(flag)
}

#[derive(Debug, Clone, Default)]
pub struct AddFilterArgs {
    pub feature: Option<String>,
    pub key: Option<String>,
    pub label: Option<String>,
    pub filter_name: String,
    pub parameters: Map<String, Value>,
    pub index: Option<i64>,
    pub requirement_type: Option<String>,
    pub yes: bool,
}

/// Insert a filter at `index`, appending when the index is past the end.
pub async fn add_filter(ctx: &StoreContext<'_>, args: &AddFilterArgs) -> crate::Result<FeatureFilter> {
    let (key, name) = resolve_feature_key(args.feature.as_deref(), args.key.as_deref())?;
    if args.index.is_some_and(|i| i < 0) {
        return Err(AzCliError::InvalidArgumentValue(
            "Index cannot be negative.".to_string(),
        ));
    }
    let requirement = args
        .requirement_type
        .as_deref()
        .map(|r| {
            RequirementType::parse(r).ok_or_else(|| {
                AzCliError::InvalidArgumentValue(
                    "Requirement type must be either 'All' or 'Any'.".to_string(),
                )
            })
        })
        .transpose()?;
    let filter = FeatureFilter {
        name: args.filter_name.clone(),
        parameters: args.parameters.clone(),
    };
    let message = format!(
        "Are you sure you want to add this filter to feature '{}'?\n{}",
        name,
        serde_json::to_string_pretty(&filter).unwrap_or_default()
    );

    let (_, added) = update_feature(
        ctx,
        &key,
        normalize_label(args.label.as_deref()),
        Some(&message),
        args.yes,
        "add filter to",
        |flag| {
            let filters = &mut flag.conditions.client_filters;
            let index = args.index.map(|i| i as usize).unwrap_or(filters.len());
            if index > filters.len() {
                tracing::warn!(index, "Index is out of range; the filter is appended instead.");
                filters.push(filter.clone());
            } else {
                filters.insert(index, filter.clone());
            }
            if requirement.is_some() {
                flag.conditions.requirement_type = requirement;
            }
            if flag.state == FeatureState::On {
                flag.state = FeatureState::Conditional;
            }
            Ok(filter.clone())
        },
    )
    .await?;
    Ok(added)
}

#[derive(Debug, Clone, Default)]
pub struct DeleteFilterArgs {
    pub feature: Option<String>,
    pub key: Option<String>,
    pub label: Option<String>,
    pub filter_name: Option<String>,
    pub index: Option<i64>,
    pub all: bool,
    pub yes: bool,
}

/// Remove one filter by name (and index when the name repeats) or all of them.
pub async fn delete_filter(
    ctx: &StoreContext<'_>,
    args: &DeleteFilterArgs,
) -> crate::Result<Vec<FeatureFilter>> {
    let (key, name) = resolve_feature_key(args.feature.as_deref(), args.key.as_deref())?;
    if args.all && (args.filter_name.is_some() || args.index.is_some()) {
        return Err(AzCliError::MutuallyExclusiveArgument(
            "Cannot specify filter name or index when deleting all filters.".to_string(),
        ));
    }
    if !args.all && args.filter_name.is_none() {
        return Err(AzCliError::RequiredArgumentMissing(
            "Please provide the name of the filter to delete, or `--all`.".to_string(),
        ));
    }
    let message = if args.all {
        format!("Are you sure you want to delete all filters for feature '{}'?", name)
    } else {
        format!(
            "Are you sure you want to delete the filter '{}' from feature '{}'?",
            args.filter_name.as_deref().unwrap_or(""),
            name
        )
    };

    let (_, removed) = update_feature(
        ctx,
        &key,
        normalize_label(args.label.as_deref()),
        Some(&message),
        args.yes,
        "delete filter from",
        |flag| {
            let filters = &mut flag.conditions.client_filters;
            let removed = if args.all {
                std::mem::take(filters)
            } else {
                let filter_name = args.filter_name.as_deref().unwrap_or("");
                let matches: Vec<usize> = filters
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.name == filter_name)
                    .map(|(i, _)| i)
                    .collect();
                let position = match (args.index, matches.as_slice()) {
                    (_, []) => {
                        return Err(AzCliError::Cli(format!(
                            "No filter named '{}' was found for feature '{}'.",
                            filter_name, name
                        )));
                    }
                    (Some(index), _) => {
                        let index = index as usize;
                        if !matches.contains(&index) {
                            return Err(AzCliError::InvalidArgumentValue(format!(
                                "The filter at index {} is not named '{}'.",
                                index, filter_name
                            )));
                        }
                        index
                    }
                    (None, [only]) => *only,
                    (None, _) => {
                        return Err(AzCliError::Cli(format!(
                            "Feature '{}' contains multiple instances of filter '{}'. \
                             Specify the index of the filter to delete.",
                            name, filter_name
                        )));
                    }
                };
                vec![filters.remove(position)]
            };
            if filters.is_empty() && flag.state == FeatureState::Conditional {
                flag.state = FeatureState::On;
            }
            Ok(removed)
        },
    )
    .await?;
    Ok(removed)
}

pub async fn list_filters(
    ctx: &StoreContext<'_>,
    feature: Option<&str>,
    key: Option<&str>,
    label: Option<&str>,
    top: Option<usize>,
    all: bool,
) -> crate::Result<Vec<FeatureFilter>> {
    let (key, _) = resolve_feature_key(feature, key)?;
    let flag = get_feature(ctx, &key, normalize_label(label)).await?;
    let mut filters = flag.conditions.client_filters;
    if let Some(limit) = ctx.limit(top, all) {
        filters.truncate(limit);
    }
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::appconfig::client::fake::InMemoryStore;
    use crate::appconfig::testing::store_context;
    use crate::prompt::scripted::ScriptedPrompter;

    fn seed_flag(store: &InMemoryStore, value: serde_json::Value, label: Option<&str>) {
        let id = value["id"].as_str().unwrap_or_default().to_string();
        store.seed(
            KeyValue::new(format!("{}{}", FEATURE_FLAG_PREFIX, id), value.to_string())
                .with_label(label)
                .with_content_type(FEATURE_FLAG_CONTENT_TYPE),
        );
    }

    #[test]
    fn test_state_from_value() {
        let kv = KeyValue::new(
            ".appconfig.featureflag/beta",
            r#"{"id":"beta","enabled":true,"conditions":{"client_filters":[{"name":"Percentage","parameters":{"Value":50}}]}}"#,
        )
        .with_content_type(FEATURE_FLAG_CONTENT_TYPE);
        let flag = FeatureFlag::from_key_value(&kv).unwrap();
        assert_eq!(flag.state, FeatureState::Conditional);
        assert_eq!(flag.name, "beta");
        assert_eq!(flag.conditions.client_filters[0].parameters["Value"], json!(50));

        let round = flag.to_key_value().unwrap();
        let reparsed: Value = serde_json::from_str(round.value_str()).unwrap();
        assert_eq!(reparsed["enabled"], json!(true));
        assert_eq!(reparsed["conditions"]["client_filters"][0]["name"], json!("Percentage"));
    }

    #[test]
    fn test_dotnet_schema_values() {
        let on = FeatureFlagValue::from_dotnet_schema("a", &json!(true), &DOTNET_PASCAL).unwrap();
        assert!(on.enabled);
        assert!(on.conditions.client_filters.is_empty());

        let always = FeatureFlagValue::from_dotnet_schema(
            "b",
            &json!({"EnabledFor": [{"Name": "AlwaysOn"}]}),
            &DOTNET_PASCAL,
        )
        .unwrap();
        assert!(always.enabled);
        assert!(always.conditions.client_filters.is_empty());

        let conditional = FeatureFlagValue::from_dotnet_schema(
            "c",
            &json!({"enabledFor": [{"name": "Targeting", "parameters": {"x": 1}}], "requirementType": "all"}),
            &DOTNET_CAMEL,
        )
        .unwrap();
        assert_eq!(conditional.conditions.client_filters[0].name, "Targeting");
        assert_eq!(conditional.conditions.requirement_type, Some(RequirementType::All));

        let missing = FeatureFlagValue::from_dotnet_schema("d", &json!({"Other": 1}), &DOTNET_PASCAL);
        assert!(matches!(missing, Err(AzCliError::Validation(_))));
        let bad_type = FeatureFlagValue::from_dotnet_schema("e", &json!("yes"), &DOTNET_PASCAL);
        assert!(bad_type.is_err());
    }

    #[test]
    fn test_ms_schema_entry() {
        let entry = json!({
            "id": "beta",
            "enabled": "TRUE",
            "conditions": {"client_filters": [{"name": "A"}, {"parameters": {}}], "requirement_type": "Any"},
            "variants": [{"name": "big"}, null],
            "telemetry": {"enabled": true}
        });
        let flag = FeatureFlagValue::from_ms_schema(&entry).unwrap().unwrap();
        assert!(flag.enabled);
        assert_eq!(flag.conditions.client_filters.len(), 1);
        assert_eq!(flag.variants.as_ref().map(Vec::len), Some(1));
        assert!(flag.telemetry.as_ref().is_some_and(|t| t.enabled));

        assert!(FeatureFlagValue::from_ms_schema(&json!({"id": "bad:id"})).unwrap().is_none());
        let bad_requirement = json!({"id": "x", "conditions": {"requirement_type": "Some"}});
        assert!(FeatureFlagValue::from_ms_schema(&bad_requirement).is_err());
    }

    #[test]
    fn test_resolve_feature_key() {
        let (key, name) = resolve_feature_key(Some("beta"), None).unwrap();
        assert_eq!(key, ".appconfig.featureflag/beta");
        assert_eq!(name, "beta");
        let (_, name) = resolve_feature_key(None, Some(".appconfig.featureflag/gamma")).unwrap();
        assert_eq!(name, "gamma");
        assert!(matches!(
            resolve_feature_key(None, None),
            Err(AzCliError::RequiredArgumentMissing(_))
        ));
        assert!(resolve_feature_key(None, Some("plain-key")).is_err());
    }

    #[tokio::test]
    async fn test_set_creates_disabled_flag() {
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&["y"]);
        let ctx = store_context(&store, &prompter);
        let flag = set_feature(
            &ctx,
            &SetFeatureArgs {
                feature: Some("beta".into()),
                description: Some("new ui".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(flag.state, FeatureState::Off);
        assert_eq!(flag.description.as_deref(), Some("new ui"));
        assert!(prompter.asked()[0].starts_with("Are you sure you want to set the feature flag"));
        let stored = store.get(".appconfig.featureflag/beta", None).unwrap();
        assert!(stored.is_feature_flag());
    }

    #[tokio::test]
    async fn test_enable_and_disable() {
        let store = InMemoryStore::default();
        seed_flag(&store, json!({"id": "beta", "enabled": false, "conditions": {"client_filters": []}}), None);
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let flag = set_feature_state(&ctx, Some("beta"), None, None, true, true).await.unwrap();
        assert_eq!(flag.state, FeatureState::On);
        let flag = set_feature_state(&ctx, Some("beta"), None, None, false, true).await.unwrap();
        assert_eq!(flag.state, FeatureState::Off);

        let missing = set_feature_state(&ctx, Some("nope"), None, None, true, true).await;
        assert!(matches!(missing, Err(AzCliError::Cli(m)) if m.contains("does not exist")));
    }

    #[tokio::test]
    async fn test_enable_retries_on_conflict() {
        let store = InMemoryStore::default();
        seed_flag(&store, json!({"id": "beta", "enabled": false}), None);
        store.fail_next_writes(2);
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);
        let flag = set_feature_state(&ctx, Some("beta"), None, None, true, true).await.unwrap();
        assert_eq!(flag.state, FeatureState::On);

        store.fail_next_writes(3);
        let exhausted = set_feature_state(&ctx, Some("beta"), None, None, false, true).await;
        assert!(matches!(exhausted, Err(AzCliError::Cli(m)) if m.contains("conflicting operation")));
    }

    #[tokio::test]
    async fn test_filter_add_list_delete() {
        let store = InMemoryStore::default();
        seed_flag(&store, json!({"id": "beta", "enabled": true}), Some("prod"));
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let mut parameters = Map::new();
        parameters.insert("Value".into(), json!(25));
        let add = |name: &str, index: Option<i64>| AddFilterArgs {
            feature: Some("beta".into()),
            label: Some("prod".into()),
            filter_name: name.into(),
            parameters: parameters.clone(),
            index,
            yes: true,
            ..Default::default()
        };
        add_filter(&ctx, &add("Percentage", None)).await.unwrap();
        add_filter(&ctx, &add("Targeting", Some(0))).await.unwrap();
        add_filter(&ctx, &add("Percentage", Some(99))).await.unwrap();

        let filters = list_filters(&ctx, Some("beta"), None, Some("prod"), None, true).await.unwrap();
        let names: Vec<&str> = filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Targeting", "Percentage", "Percentage"]);
        let flag = get_feature(&ctx, ".appconfig.featureflag/beta", Some("prod")).await.unwrap();
        assert_eq!(flag.state, FeatureState::Conditional);

        let ambiguous = delete_filter(
            &ctx,
            &DeleteFilterArgs {
                feature: Some("beta".into()),
                label: Some("prod".into()),
                filter_name: Some("Percentage".into()),
                yes: true,
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(ambiguous, Err(AzCliError::Cli(m)) if m.contains("multiple instances")));

        let removed = delete_filter(
            &ctx,
            &DeleteFilterArgs {
                feature: Some("beta".into()),
                label: Some("prod".into()),
                filter_name: Some("Percentage".into()),
                index: Some(2),
                yes: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(removed.len(), 1);

        let removed = delete_filter(
            &ctx,
            &DeleteFilterArgs {
                feature: Some("beta".into()),
                label: Some("prod".into()),
                all: true,
                yes: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(removed.len(), 2);
        let flag = get_feature(&ctx, ".appconfig.featureflag/beta", Some("prod")).await.unwrap();
        assert_eq!(flag.state, FeatureState::On);
    }

    #[tokio::test]
    async fn test_negative_filter_index_rejected() {
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);
        let result = add_filter(
            &ctx,
            &AddFilterArgs {
                feature: Some("beta".into()),
                filter_name: "x".into(),
                index: Some(-1),
                yes: true,
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(AzCliError::InvalidArgumentValue(_))));
    }

    #[tokio::test]
    async fn test_list_and_delete_by_wildcard() {
        let store = InMemoryStore::default();
        seed_flag(&store, json!({"id": "beta"}), None);
        seed_flag(&store, json!({"id": "beta2"}), None);
        seed_flag(&store, json!({"id": "gamma"}), None);
        store.seed(KeyValue::new("plain", "1"));
        let prompter = ScriptedPrompter::new(&["y"]);
        let ctx = store_context(&store, &prompter);

        let listed = list_features(&ctx, &ListFeatureArgs { all: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(listed.len(), 3);

        let projected = list_features(
            &ctx,
            &ListFeatureArgs {
                feature: Some("beta*".into()),
                fields: vec!["name".into(), "state".into()],
                all: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(projected, vec![json!({"name": "beta", "state": "off"}), json!({"name": "beta2", "state": "off"})]);

        let deleted = delete_feature(&ctx, Some("beta*"), None, None, false).await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(store.get(".appconfig.featureflag/gamma", None).is_some());
        assert!(store.get("plain", None).is_some());
    }
}
