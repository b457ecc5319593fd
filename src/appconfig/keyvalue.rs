//! Key-value commands: point operations, listing, restore and import/export.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::appconfig::appservice::{
    appconfig_reference, read_kv_from_app_service, write_kv_to_app_service, AppServiceAccount,
    AppServiceBackend,
};
use crate::appconfig::bulk::BulkOutcome;
use crate::appconfig::client::{ConfigStoreClient, KvQuery};
use crate::appconfig::diff::{print_preview, CompareLevel, KvComparer, KvDiff};
use crate::appconfig::feature::FeatureFlag;
use crate::appconfig::file_io::{
    read_features_from_file, read_kv_from_file, read_kvset_from_file,
    write_kv_and_features_to_file, write_kvset_to_file, FileFormat, FileReadOptions,
};
use crate::appconfig::models::{
    is_json_content_type, label_filter, normalize_label, project_key_value, KeyValue, QueryField,
    Tags, ANY_KEY, APPSVC_SLOT_SETTING_TAG, FEATURE_FLAG_PREFIX,
};
use crate::appconfig::validation::{
    accept_datetime, validate_dry_run, validate_import_depth, validate_key, validate_separator,
};
use crate::appconfig::StoreContext;
use crate::error::{map_azure_error, AzCliError};
use crate::prompt::user_confirmation;

const KVSET_PROFILE: &str = "appconfig/kvset";

#[derive(Debug, Clone, Default)]
pub struct SetKeyArgs {
    pub key: String,
    pub label: Option<String>,
    /// `None` keeps the current value of an existing key.
    pub value: Option<String>,
    pub content_type: Option<String>,
    pub tags: Option<Tags>,
    pub yes: bool,
}

/// Create or update one key-value, merging unspecified fields from the
/// existing entry.
pub async fn set_key(ctx: &StoreContext<'_>, args: &SetKeyArgs) -> crate::Result<KeyValue> {
    validate_key(&args.key)?;
    let label = normalize_label(args.label.as_deref());

    for attempt in 1..=ctx.attempts() {
        let existing = ctx
            .client
            .get_key_value(&args.key, label, None)
            .await
            .map_err(map_azure_error)?;

        let mut kv = KeyValue {
            key: args.key.clone(),
            label: label.map(str::to_string),
            ..Default::default()
        };
        let etag = match &existing {
            Some(current) => {
                kv.value = args.value.clone().or_else(|| current.value.clone());
                kv.content_type = args.content_type.clone().or_else(|| current.content_type.clone());
                kv.tags = args.tags.clone().unwrap_or_else(|| current.tags.clone());
                current.etag.clone()
            }
            None => {
                kv.value = Some(args.value.clone().unwrap_or_default());
                kv.content_type = args.content_type.clone();
                kv.tags = args.tags.clone().unwrap_or_default();
                None
            }
        };

        if let Some(ct) = kv.content_type.as_deref().filter(|ct| is_json_content_type(ct)) {
            if serde_json::from_str::<Value>(kv.value_str()).is_err() {
                return Err(AzCliError::InvalidArgumentValue(format!(
                    "Value \"{}\" is not a valid JSON object, which conflicts with the content type \"{}\".",
                    kv.value_str(),
                    ct
                )));
            }
        }

        let entry = serde_json::json!({
            "key": kv.key,
            "label": kv.label,
            "content_type": kv.content_type,
            "value": kv.value,
            "tags": kv.tags,
        });
        let pretty = serde_json::to_string_pretty(&entry).unwrap_or_default();
        user_confirmation(
            ctx.prompter,
            &format!("Are you sure you want to set the key: \n{}\n", pretty),
            args.yes,
        )?;

        let written = match &etag {
            Some(etag) => ctx.client.set_key_value(&kv, Some(etag)).await,
            None => ctx.client.add_key_value(&kv).await,
        };
        match written {
            Ok(written) => return Ok(written),
            Err(e) => ctx.back_off_on_conflict(e, attempt, "set").await?,
        }
    }
    Err(AzCliError::Cli(format!(
        "Failed to set the key '{}' due to a conflicting operation.",
        args.key
    )))
}

/// Delete every key-value matching `key` under `label`.
pub async fn delete_key(
    ctx: &StoreContext<'_>,
    key: &str,
    label: Option<&str>,
    yes: bool,
) -> crate::Result<Vec<KeyValue>> {
    user_confirmation(
        ctx.prompter,
        &format!("Are you sure you want to delete the key '{}'", key),
        yes,
    )?;

    let query = KvQuery::default().with_key(key).with_label(&label_filter(label));
    let entries = ctx
        .client
        .list_key_values(&query, None)
        .await
        .map_err(|e| AzCliError::Cli(format!("Delete operation failed. {}", map_azure_error(e))))?;

    let mut outcome = BulkOutcome::new();
    for kv in entries {
        match ctx
            .client
            .delete_key_value(&kv.key, kv.label.as_deref(), kv.etag.as_deref())
            .await
        {
            Ok(Some(deleted)) => outcome.success(deleted),
            Ok(None) => outcome.success(kv),
            Err(e) => outcome.failure(describe(&kv), map_azure_error(e)),
        }
    }
    outcome.finish("Delete")
}

fn describe(kv: &KeyValue) -> String {
    format!("key '{}' with label '{}'", kv.key, kv.label.as_deref().unwrap_or(""))
}

pub async fn lock_key(
    ctx: &StoreContext<'_>,
    key: &str,
    label: Option<&str>,
    yes: bool,
) -> crate::Result<KeyValue> {
    set_read_only(ctx, key, label, true, yes).await
}

pub async fn unlock_key(
    ctx: &StoreContext<'_>,
    key: &str,
    label: Option<&str>,
    yes: bool,
) -> crate::Result<KeyValue> {
    set_read_only(ctx, key, label, false, yes).await
}

async fn set_read_only(
    ctx: &StoreContext<'_>,
    key: &str,
    label: Option<&str>,
    read_only: bool,
    yes: bool,
) -> crate::Result<KeyValue> {
    let verb = if read_only { "lock" } else { "unlock" };
    let label = normalize_label(label);

    for attempt in 1..=ctx.attempts() {
        let current = ctx
            .client
            .get_key_value(key, label, None)
            .await
            .map_err(map_azure_error)?
            .ok_or_else(|| {
                AzCliError::Cli(format!("The key you are trying to {} does not exist.", verb))
            })?;

        user_confirmation(
            ctx.prompter,
            &format!("Are you sure you want to {} the key '{}'", verb, key),
            yes,
        )?;

        match ctx
            .client
            .set_read_only(key, label, read_only, current.etag.as_deref())
            .await
        {
            Ok(kv) => return Ok(kv),
            Err(e) => ctx.back_off_on_conflict(e, attempt, verb).await?,
        }
    }
    Err(AzCliError::Cli(format!(
        "Failed to {} the key '{}' due to a conflicting operation.",
        verb, key
    )))
}

pub async fn show_key(
    ctx: &StoreContext<'_>,
    key: &str,
    label: Option<&str>,
    datetime: Option<&str>,
) -> crate::Result<KeyValue> {
    let datetime = accept_datetime(datetime)?;
    ctx.client
        .get_key_value(key, normalize_label(label), datetime.as_deref())
        .await
        .map_err(map_azure_error)?
        .ok_or_else(|| AzCliError::Cli("The key-value does not exist.".to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct ListKeyArgs {
    pub key: Option<String>,
    /// `Some("")` selects key-values without a label.
    pub label: Option<String>,
    pub datetime: Option<String>,
    pub snapshot: Option<String>,
    /// `name=value` or bare `name` tag filters.
    pub tags: Vec<String>,
    pub fields: Vec<String>,
    pub top: Option<usize>,
    pub all: bool,
}

impl ListKeyArgs {
    fn query(&self) -> crate::Result<KvQuery> {
        if self.snapshot.is_some()
            && (self.key.is_some() || self.label.is_some() || self.datetime.is_some())
        {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "Cannot specify key, label or datetime filters when listing snapshot key-values."
                    .to_string(),
            ));
        }
        let mut query = KvQuery::default()
            .with_datetime(accept_datetime(self.datetime.as_deref())?)
            .with_snapshot(self.snapshot.clone())
            .with_tags(self.tags.clone());
        if let Some(key) = &self.key {
            query = query.with_key(key);
        }
        if let Some(label) = &self.label {
            query = query.with_label(&label_filter(Some(label)));
        }
        Ok(query)
    }
}

pub async fn list_key(ctx: &StoreContext<'_>, args: &ListKeyArgs) -> crate::Result<Vec<Value>> {
    let query = args.query()?;
    let fields = QueryField::parse_list(&args.fields);
    let entries = ctx
        .client
        .list_key_values(&query, ctx.limit(args.top, args.all))
        .await
        .map_err(map_azure_error)?;
    Ok(entries.iter().map(|kv| project_key_value(kv, &fields)).collect())
}

pub async fn list_revision(ctx: &StoreContext<'_>, args: &ListKeyArgs) -> crate::Result<Vec<Value>> {
    if args.snapshot.is_some() {
        return Err(AzCliError::InvalidArgumentValue(
            "Revisions cannot be listed for a snapshot.".to_string(),
        ));
    }
    let query = args.query()?;
    let fields = QueryField::parse_list(&args.fields);
    let revisions = ctx
        .client
        .list_revisions(&query, ctx.limit(args.top, args.all))
        .await
        .map_err(map_azure_error)?;
    Ok(revisions.iter().map(|kv| project_key_value(kv, &fields)).collect())
}

/// Counts of what an import, export or restore wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Writes rejected by read-only or etag conflicts.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreArgs {
    pub datetime: String,
    pub key: Option<String>,
    pub label: Option<String>,
    pub yes: bool,
}

/// Bring key-values back to their state at `datetime`.
///
/// Entries created since are deleted. The first failed write stops the
/// restore.
pub async fn restore_key(ctx: &StoreContext<'_>, args: &RestoreArgs) -> crate::Result<SyncSummary> {
    let datetime = accept_datetime(Some(&args.datetime))?;
    let mut now = KvQuery::default();
    if let Some(key) = &args.key {
        now = now.with_key(key);
    }
    if let Some(label) = &args.label {
        now = now.with_label(&label_filter(Some(label)));
    }
    let then = now.clone().with_datetime(datetime);

    let restore = ctx.client.list_key_values(&then, None).await.map_err(map_azure_error)?;
    let current = ctx.client.list_key_values(&now, None).await.map_err(map_azure_error)?;
    let diff = KvComparer::new(restore, CompareLevel::Restore).compare(&current, true, true);

    if diff.is_empty() {
        tracing::warn!("No records matching found to be restored. No changes will be made.");
        return Ok(SyncSummary::default());
    }
    if !args.yes {
        print_preview(&diff, false, CompareLevel::Restore, true, "Restore");
        if let Err(e) = user_confirmation(ctx.prompter, "Do you want to continue? \n", false) {
            tracing::debug!("Canceling the restore operation based on user selection.");
            return Err(e);
        }
    }

    let total = diff.add.len() + diff.update.len() + diff.delete.len();
    let mut summary = SyncSummary::default();
    let mut restored = 0;
    for kv in diff.writes() {
        let mut kv = kv.clone();
        kv.etag = None;
        if let Err(e) = ctx.client.set_key_value(&kv, None).await {
            tracing::error!(key = %kv.key, label = ?kv.label, "Error while setting the key-value");
            tracing::error!("Failed after restoring {} out of {} keys", restored, total);
            return Err(map_azure_error(e));
        }
        restored += 1;
    }
    for kv in &diff.delete {
        if let Err(e) = ctx
            .client
            .delete_key_value(&kv.key, kv.label.as_deref(), kv.etag.as_deref())
            .await
        {
            tracing::error!(key = %kv.key, label = ?kv.label, "Error while deleting the key-value");
            tracing::error!("Failed after restoring {} out of {} keys", restored, total);
            return Err(map_azure_error(e));
        }
        restored += 1;
    }
    tracing::debug!("Successfully restored {} out of {} keys", restored, total);

    summary.added = diff.add.len();
    summary.updated = diff.update.len();
    summary.deleted = diff.delete.len();
    Ok(summary)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImportMode {
    /// Skip source entries identical to the destination.
    #[default]
    IgnoreMatch,
    /// Write every source entry.
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Profile {
    /// Flattened configuration documents.
    #[default]
    Default,
    /// `{"items": [...]}` with one record per key-value.
    KvSet,
}

/// Where an import reads from.
pub enum ImportSource<'a> {
    File {
        path: PathBuf,
        format: FileFormat,
        separator: Option<String>,
        depth: Option<i64>,
    },
    AppConfig {
        client: &'a dyn ConfigStoreClient,
        key: Option<String>,
        label: Option<String>,
        snapshot: Option<String>,
        /// Keep source labels instead of applying the import label.
        preserve_labels: bool,
    },
    AppService {
        backend: &'a dyn AppServiceBackend,
        account: AppServiceAccount,
    },
}

impl ImportSource<'_> {
    fn level(&self) -> CompareLevel {
        match self {
            ImportSource::File { .. } => CompareLevel::File,
            ImportSource::AppConfig { .. } => CompareLevel::AppConfig,
            ImportSource::AppService { .. } => CompareLevel::AppService,
        }
    }
}

pub struct ImportArgs<'a> {
    pub source: ImportSource<'a>,
    /// Label applied to every imported key-value.
    pub label: Option<String>,
    /// Prepended to imported keys; feature flags keep their keys.
    pub prefix: String,
    pub content_type: Option<String>,
    /// Replaces the tags of imported key-values.
    pub tags: Option<Tags>,
    pub profile: Profile,
    pub skip_features: bool,
    /// Also delete destination entries missing from the source.
    pub strict: bool,
    pub import_mode: ImportMode,
    pub dry_run: bool,
    pub yes: bool,
}

impl Default for ImportArgs<'_> {
    fn default() -> Self {
        ImportArgs {
            source: ImportSource::File {
                path: PathBuf::new(),
                format: FileFormat::Json,
                separator: None,
                depth: None,
            },
            label: None,
            prefix: String::new(),
            content_type: None,
            tags: None,
            profile: Profile::Default,
            skip_features: false,
            strict: false,
            import_mode: ImportMode::IgnoreMatch,
            dry_run: false,
            yes: false,
        }
    }
}

fn kvset_unsupported(option: &str, exporting: bool) -> AzCliError {
    AzCliError::InvalidArgumentValue(format!(
        "The option '{}' is not supported when {} using '{}' profile",
        option,
        if exporting { "exporting" } else { "importing" },
        KVSET_PROFILE
    ))
}

fn validate_import(args: &ImportArgs<'_>) -> crate::Result<()> {
    validate_dry_run(args.dry_run, args.yes)?;
    if args.strict {
        if args.skip_features {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "The option '--skip-features' cannot be used with the '--strict' option.".to_string(),
            ));
        }
        if !matches!(args.source, ImportSource::File { .. }) {
            return Err(AzCliError::InvalidArgumentValue(
                "The option '--strict' can only be used when importing from a file.".to_string(),
            ));
        }
    }
    if let ImportSource::File { format, separator, depth, .. } = &args.source {
        validate_separator(separator.as_deref(), *format == FileFormat::Properties)?;
        validate_import_depth(*depth)?;
    }

    if args.profile == Profile::KvSet {
        let ImportSource::File { format, separator, depth, .. } = &args.source else {
            return Err(AzCliError::InvalidArgumentValue(format!(
                "Import profile '{}' can only be used when importing from a JSON file.",
                KVSET_PROFILE
            )));
        };
        if *format != FileFormat::Json {
            return Err(AzCliError::InvalidArgumentValue(format!(
                "Import profile '{}' can only be used when importing from a JSON format.",
                KVSET_PROFILE
            )));
        }
        let unsupported = [
            ("content-type", args.content_type.is_some()),
            ("label", args.label.is_some()),
            ("separator", separator.is_some()),
            ("depth", depth.is_some()),
            ("prefix", !args.prefix.is_empty()),
            ("skip-features", args.skip_features),
            ("tags", args.tags.is_some()),
        ];
        if let Some((option, _)) = unsupported.iter().find(|(_, set)| *set) {
            return Err(kvset_unsupported(option, false));
        }
    }
    Ok(())
}

/// Key-values and feature flags selected from a store.
struct StoreSelection<'s> {
    key: Option<&'s str>,
    label: Option<&'s str>,
    datetime: Option<String>,
    snapshot: Option<&'s str>,
}

/// Read `(key-values, feature flags)` from a store.
///
/// A missing label selects key-values without a label.
async fn read_from_store(
    client: &dyn ConfigStoreClient,
    selection: &StoreSelection<'_>,
    include_features: bool,
) -> crate::Result<(Vec<KeyValue>, Vec<KeyValue>)> {
    if let Some(snapshot) = selection.snapshot {
        let query = KvQuery::default().with_snapshot(Some(snapshot.to_string()));
        let entries = client.list_key_values(&query, None).await.map_err(map_azure_error)?;
        let (features, kvs): (Vec<KeyValue>, Vec<KeyValue>) =
            entries.into_iter().partition(KeyValue::is_feature_flag);
        return Ok((kvs, if include_features { features } else { Vec::new() }));
    }

    let label = label_filter(selection.label);
    let query = KvQuery::default()
        .with_key(selection.key.unwrap_or(ANY_KEY))
        .with_label(&label)
        .with_datetime(selection.datetime.clone());
    let kvs = client
        .list_key_values(&query, None)
        .await
        .map_err(map_azure_error)?
        .into_iter()
        .filter(|kv| !kv.is_feature_flag())
        .collect();

    let features = if include_features {
        let query = KvQuery::default()
            .with_key(&format!("{}*", FEATURE_FLAG_PREFIX))
            .with_label(&label)
            .with_datetime(selection.datetime.clone());
        client
            .list_key_values(&query, None)
            .await
            .map_err(map_azure_error)?
            .into_iter()
            .filter(KeyValue::is_feature_flag)
            .collect()
    } else {
        Vec::new()
    };
    Ok((kvs, features))
}

/// Store-only fields are dropped before comparing and writing elsewhere.
fn detach(mut kv: KeyValue) -> KeyValue {
    kv.etag = None;
    kv.locked = false;
    kv.last_modified = None;
    kv
}

/// Import key-values from a file, another store or an App Service.
pub async fn import_config(ctx: &StoreContext<'_>, args: &ImportArgs<'_>) -> crate::Result<SyncSummary> {
    validate_import(args)?;
    let label = normalize_label(args.label.as_deref());

    if args.profile == Profile::KvSet {
        let ImportSource::File { path, .. } = &args.source else {
            return Err(kvset_unsupported("source", false));
        };
        let source = read_kvset_from_file(path)?;
        let existing = ctx
            .client
            .list_key_values(&KvQuery::default().with_key(ANY_KEY).with_label(ANY_KEY), None)
            .await
            .map_err(map_azure_error)?;
        return apply_to_store(ctx.client, ctx, source, &existing, CompareLevel::KvSet, args, "KVSet").await;
    }

    let (mut kvs, features) = match &args.source {
        ImportSource::File { path, format, separator, depth } => {
            let opts = FileReadOptions {
                separator: separator.clone(),
                prefix: args.prefix.clone(),
                depth: depth.map(|d| d.max(1) as usize),
                content_type: args.content_type.clone(),
            };
            let kvs = read_kv_from_file(path, *format, &opts)?;
            let features = if args.skip_features {
                Vec::new()
            } else {
                read_features_from_file(path, *format)?
            };
            (kvs, features)
        }
        ImportSource::AppConfig { client, key, label: src_label, snapshot, .. } => {
            if snapshot.is_some() && (key.is_some() || src_label.is_some()) {
                return Err(AzCliError::MutuallyExclusiveArgument(
                    "Cannot specify source key or label filters when importing from a snapshot."
                        .to_string(),
                ));
            }
            let selection = StoreSelection {
                key: key.as_deref(),
                label: src_label.as_deref(),
                datetime: None,
                snapshot: snapshot.as_deref(),
            };
            let (kvs, features) = read_from_store(*client, &selection, !args.skip_features).await?;
            let kvs = kvs
                .into_iter()
                .map(|kv| KeyValue {
                    key: format!("{}{}", args.prefix, kv.key),
                    ..detach(kv)
                })
                .collect();
            (kvs, features.into_iter().map(detach).collect())
        }
        ImportSource::AppService { backend, account } => {
            let kvs = read_kv_from_app_service(
                *backend,
                account,
                &args.prefix,
                args.content_type.as_deref(),
            )
            .await?;
            (kvs, Vec::new())
        }
    };

    let preserve = matches!(args.source, ImportSource::AppConfig { preserve_labels: true, .. });
    for kv in &mut kvs {
        if !preserve {
            kv.label = label.map(str::to_string);
        }
        if let Some(tags) = &args.tags {
            kv.tags = tags.clone();
        }
    }
    let features: Vec<KeyValue> = features
        .into_iter()
        .map(|mut kv| {
            if !preserve {
                kv.label = label.map(str::to_string);
            }
            kv
        })
        .collect();
    let include_features = !args.skip_features;
    let source: Vec<KeyValue> = kvs.into_iter().chain(features).collect();

    let existing_query = KvQuery::default()
        .with_key(ANY_KEY)
        .with_label(&if preserve { ANY_KEY.to_string() } else { label_filter(label) });
    let existing: Vec<KeyValue> = ctx
        .client
        .list_key_values(&existing_query, None)
        .await
        .map_err(map_azure_error)?
        .into_iter()
        .filter(|kv| {
            if kv.is_feature_flag() {
                include_features
            } else {
                kv.key.starts_with(&args.prefix)
            }
        })
        .collect();

    apply_to_store(ctx.client, ctx, source, &existing, args.source.level(), args, "Import").await
}

/// Diff, preview, confirm and replay onto `dest`.
async fn apply_to_store(
    dest: &dyn ConfigStoreClient,
    ctx: &StoreContext<'_>,
    source: Vec<KeyValue>,
    existing: &[KeyValue],
    level: CompareLevel,
    args: &ImportArgs<'_>,
    title: &str,
) -> crate::Result<SyncSummary> {
    let source_empty = source.is_empty();
    let comparer = KvComparer::new(source, level);
    let diff = comparer.compare(existing, args.strict, args.import_mode == ImportMode::IgnoreMatch);

    let changes = print_preview(&diff, source_empty, level, args.strict, title);
    if !changes || args.dry_run {
        return Ok(SyncSummary::default());
    }
    if !args.yes {
        user_confirmation(ctx.prompter, "Do you want to continue?\n", false)?;
    }
    write_diff(dest, &diff).await
}

/// Replay a diff. Read-only and etag conflicts are logged and skipped.
async fn write_diff(dest: &dyn ConfigStoreClient, diff: &KvDiff) -> crate::Result<SyncSummary> {
    let mut summary = SyncSummary::default();
    for kv in &diff.delete {
        match dest.delete_key_value(&kv.key, kv.label.as_deref(), None).await {
            Ok(_) => summary.deleted += 1,
            Err(e) => match e.http() {
                Some(http) if http.is_read_only() => {
                    tracing::warn!(
                        "Failed to delete read only key-value with key '{}' and label '{}'. Unlock the key-value before deleting it.",
                        kv.key,
                        kv.label.as_deref().unwrap_or("")
                    );
                    summary.skipped += 1;
                }
                Some(http) => {
                    tracing::warn!(
                        "Failed to delete key-value with key '{}' and label '{}'. {}",
                        kv.key,
                        kv.label.as_deref().unwrap_or(""),
                        http
                    );
                    summary.skipped += 1;
                }
                None => return Err(AzCliError::Internal(e.to_string())),
            },
        }
    }

    let updates = diff.update.len();
    for (index, kv) in diff.writes().enumerate() {
        let kv = detach(kv.clone());
        match dest.set_key_value(&kv, None).await {
            Ok(_) if index < diff.add.len() => summary.added += 1,
            Ok(_) => summary.updated += 1,
            Err(e) => match e.http() {
                Some(http) if http.is_read_only() || http.is_precondition_failed() => {
                    tracing::warn!(
                        "Failed to set key-value with key '{}' and label '{}'. {}",
                        kv.key,
                        kv.label.as_deref().unwrap_or(""),
                        http
                    );
                    summary.skipped += 1;
                }
                _ => return Err(map_azure_error(e)),
            },
        }
    }
    tracing::debug!(
        added = summary.added,
        updated = summary.updated,
        planned_updates = updates,
        deleted = summary.deleted,
        skipped = summary.skipped,
        "applied key-value changes"
    );
    Ok(summary)
}

/// Where an export writes to.
pub enum ExportDestination<'a> {
    File {
        path: PathBuf,
        format: FileFormat,
        separator: Option<String>,
    },
    AppConfig {
        client: &'a dyn ConfigStoreClient,
        label: Option<String>,
        preserve_labels: bool,
    },
    AppService {
        backend: &'a dyn AppServiceBackend,
        account: AppServiceAccount,
        /// Write App Configuration references instead of values.
        export_as_reference: bool,
    },
}

pub struct ExportArgs<'a> {
    pub destination: ExportDestination<'a>,
    pub key: Option<String>,
    pub label: Option<String>,
    pub datetime: Option<String>,
    pub snapshot: Option<String>,
    /// Stripped from exported keys; keys without it are not exported.
    pub prefix: String,
    pub profile: Profile,
    pub skip_features: bool,
    pub dry_run: bool,
    pub yes: bool,
}

impl<'a> ExportArgs<'a> {
    pub fn new(destination: ExportDestination<'a>) -> Self {
        ExportArgs {
            destination,
            key: None,
            label: None,
            datetime: None,
            snapshot: None,
            prefix: String::new(),
            profile: Profile::Default,
            skip_features: false,
            dry_run: false,
            yes: false,
        }
    }
}

fn validate_export(args: &ExportArgs<'_>) -> crate::Result<()> {
    validate_dry_run(args.dry_run, args.yes)?;
    if args.snapshot.is_some()
        && (args.key.is_some() || args.label.is_some() || args.datetime.is_some())
    {
        return Err(AzCliError::MutuallyExclusiveArgument(
            "Cannot specify key, label or datetime filters when exporting from a snapshot."
                .to_string(),
        ));
    }
    match &args.destination {
        ExportDestination::File { format, separator, .. } => {
            validate_separator(separator.as_deref(), *format == FileFormat::Properties)?;
        }
        ExportDestination::AppService { export_as_reference: true, .. } if args.snapshot.is_some() => {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "Cannot export snapshot key-values as references to App Service.".to_string(),
            ));
        }
        _ => {}
    }

    if args.profile == Profile::KvSet {
        let ExportDestination::File { format, separator, .. } = &args.destination else {
            return Err(AzCliError::InvalidArgumentValue(format!(
                "The profile '{}' only supports exporting to a file.",
                KVSET_PROFILE
            )));
        };
        if *format != FileFormat::Json {
            return Err(AzCliError::InvalidArgumentValue(format!(
                "The profile '{}' only supports exporting in the JSON format",
                KVSET_PROFILE
            )));
        }
        if !args.prefix.is_empty() {
            return Err(kvset_unsupported("prefix", true));
        }
        if separator.is_some() {
            return Err(kvset_unsupported("separator", true));
        }
    }
    Ok(())
}

/// Export key-values, and feature flags where the destination takes them.
pub async fn export_config(ctx: &StoreContext<'_>, args: &ExportArgs<'_>) -> crate::Result<SyncSummary> {
    validate_export(args)?;

    let include_features = !args.skip_features
        && !matches!(args.destination, ExportDestination::AppService { .. });
    let selection = StoreSelection {
        key: args.key.as_deref(),
        label: args.label.as_deref(),
        datetime: accept_datetime(args.datetime.as_deref())?,
        snapshot: args.snapshot.as_deref(),
    };
    let (kvs, features) = read_from_store(ctx.client, &selection, include_features).await?;

    if args.profile == Profile::KvSet {
        let ExportDestination::File { path, .. } = &args.destination else {
            return Err(kvset_unsupported("destination", true));
        };
        let items: Vec<KeyValue> = kvs.into_iter().chain(features).map(detach).collect();
        let diff = KvComparer::new(items.clone(), CompareLevel::KvSet).compare(&[], false, true);
        if !confirm_export(ctx, args, &diff, items.is_empty(), CompareLevel::KvSet)? {
            return Ok(SyncSummary::default());
        }
        write_kvset_to_file(path, &items)?;
        return Ok(SyncSummary {
            added: items.len(),
            ..Default::default()
        });
    }

    let references: Vec<(KeyValue, String)> = kvs
        .into_iter()
        .filter_map(|kv| {
            let stripped = kv.key.strip_prefix(&args.prefix)?.to_string();
            let original = kv.clone();
            Some((KeyValue { key: stripped, ..detach(kv) }, original.key))
        })
        .collect();

    match &args.destination {
        ExportDestination::File { path, format, separator } => {
            let kvs: Vec<KeyValue> = references.into_iter().map(|(kv, _)| kv).collect();
            let diff = KvComparer::new(kvs.clone(), CompareLevel::File).compare(&[], false, true);
            if !confirm_export(ctx, args, &diff, kvs.is_empty() && features.is_empty(), CompareLevel::File)? {
                return Ok(SyncSummary::default());
            }
            let flags = features
                .iter()
                .filter_map(|kv| match FeatureFlag::from_key_value(kv) {
                    Ok(flag) => Some(flag),
                    Err(e) => {
                        tracing::warn!(key = %kv.key, error = %e, "Skipping invalid feature flag");
                        None
                    }
                })
                .collect::<Vec<_>>();
            write_kv_and_features_to_file(path, &kvs, &flags, *format, separator.as_deref())?;
            Ok(SyncSummary {
                added: kvs.len() + flags.len(),
                ..Default::default()
            })
        }
        ExportDestination::AppConfig { client, label, preserve_labels } => {
            let dest_label = normalize_label(label.as_deref());
            let source: Vec<KeyValue> = references
                .into_iter()
                .map(|(kv, _)| kv)
                .chain(features.into_iter().map(detach))
                .map(|mut kv| {
                    if !preserve_labels {
                        kv.label = dest_label.map(str::to_string);
                    }
                    kv
                })
                .collect();
            let existing_label = if *preserve_labels {
                ANY_KEY.to_string()
            } else {
                label_filter(dest_label)
            };
            let existing = client
                .list_key_values(
                    &KvQuery::default().with_key(ANY_KEY).with_label(&existing_label),
                    None,
                )
                .await
                .map_err(map_azure_error)?;
            let source_empty = source.is_empty();
            let diff = KvComparer::new(source, CompareLevel::AppConfig).compare(&existing, false, true);
            if !confirm_export(ctx, args, &diff, source_empty, CompareLevel::AppConfig)? {
                return Ok(SyncSummary::default());
            }
            write_diff(*client, &diff).await
        }
        ExportDestination::AppService { backend, account, export_as_reference } => {
            let source: Vec<KeyValue> = if *export_as_reference {
                let endpoint = ctx.settings.endpoint.as_deref().ok_or_else(|| {
                    AzCliError::RequiredArgumentMissing(
                        "The store endpoint is required to export key-values as references."
                            .to_string(),
                    )
                })?;
                references
                    .into_iter()
                    .map(|(kv, original_key)| {
                        let target = KeyValue {
                            key: original_key,
                            ..kv.clone()
                        };
                        let mut reference = KeyValue::new(kv.key, appconfig_reference(endpoint, &target));
                        reference.tags = kv.tags;
                        reference
                    })
                    .collect()
            } else {
                references.into_iter().map(|(kv, _)| kv).collect()
            };
            let existing = read_kv_from_app_service(*backend, account, "", None).await?;
            let source_empty = source.is_empty();
            let diff = KvComparer::new(source, CompareLevel::AppService).compare(&existing, false, true);
            if !confirm_export(ctx, args, &diff, source_empty, CompareLevel::AppService)? {
                return Ok(SyncSummary::default());
            }
            let writes: Vec<KeyValue> = diff
                .writes()
                .cloned()
                .map(|mut kv| {
                    kv.tags
                        .entry(APPSVC_SLOT_SETTING_TAG.to_string())
                        .or_insert_with(|| "false".to_string());
                    kv
                })
                .collect();
            write_kv_to_app_service(*backend, account, &writes).await?;
            Ok(SyncSummary {
                added: diff.add.len(),
                updated: diff.update.len(),
                ..Default::default()
            })
        }
    }
}

/// Preview the export; `false` when there is nothing to do.
fn confirm_export(
    ctx: &StoreContext<'_>,
    args: &ExportArgs<'_>,
    diff: &KvDiff,
    source_empty: bool,
    level: CompareLevel,
) -> crate::Result<bool> {
    let changes = print_preview(diff, source_empty, level, false, "Export");
    if !changes || args.dry_run {
        return Ok(false);
    }
    if !args.yes {
        user_confirmation(ctx.prompter, "Do you want to continue?\n", false)?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::appconfig::appservice::fake::FakeAppService;
    use crate::appconfig::appservice::AppSetting;
    use crate::appconfig::client::fake::InMemoryStore;
    use crate::appconfig::models::FEATURE_FLAG_CONTENT_TYPE;
    use crate::appconfig::testing::store_context;
    use crate::prompt::scripted::ScriptedPrompter;

    fn set_args(key: &str, value: Option<&str>) -> SetKeyArgs {
        SetKeyArgs {
            key: key.into(),
            value: value.map(str::to_string),
            yes: true,
            ..Default::default()
        }
    }

    fn json_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn file_source(path: &std::path::Path) -> ImportSource<'static> {
        ImportSource::File {
            path: path.to_path_buf(),
            format: FileFormat::Json,
            separator: Some(":".into()),
            depth: None,
        }
    }

    #[tokio::test]
    async fn test_set_key_merges_existing_fields() {
        let store = InMemoryStore::default();
        store.seed(KeyValue::new("color", "red").with_content_type("text/plain"));
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let mut args = set_args("color", None);
        args.tags = Some(Tags::from([("team".to_string(), "web".to_string())]));
        let kv = set_key(&ctx, &args).await.unwrap();

        assert_eq!(kv.value.as_deref(), Some("red"));
        assert_eq!(kv.content_type.as_deref(), Some("text/plain"));
        assert_eq!(kv.tags.get("team").map(String::as_str), Some("web"));
    }

    #[tokio::test]
    async fn test_set_key_retries_on_conflict() {
        let store = InMemoryStore::default();
        store.fail_next_writes(2);
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let kv = set_key(&ctx, &set_args("color", Some("blue"))).await.unwrap();
        assert_eq!(kv.value.as_deref(), Some("blue"));
        assert_eq!(store.calls().iter().filter(|c| c.starts_with("add:")).count(), 3);
    }

    #[tokio::test]
    async fn test_set_key_gives_up_after_conflicts() {
        let store = InMemoryStore::default();
        store.fail_next_writes(5);
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let err = set_key(&ctx, &set_args("color", Some("blue"))).await.unwrap_err();
        assert!(err.to_string().contains("due to a conflicting operation"));
    }

    #[tokio::test]
    async fn test_set_key_rejects_invalid_json_value() {
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let mut args = set_args("settings", Some("{not json"));
        args.content_type = Some("application/json".into());
        assert!(matches!(
            set_key(&ctx, &args).await,
            Err(AzCliError::InvalidArgumentValue(_))
        ));
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn test_set_key_declined() {
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&["n"]);
        let ctx = store_context(&store, &prompter);

        let mut args = set_args("color", Some("blue"));
        args.yes = false;
        let err = set_key(&ctx, &args).await.unwrap_err();
        assert!(err.is_early_exit());
        assert!(prompter.asked()[0].starts_with("Are you sure you want to set the key"));
        assert!(store.get("color", None).is_none());
    }

    #[tokio::test]
    async fn test_delete_key_partial_failure_returns_deleted() {
        let store = InMemoryStore::default();
        store.seed(KeyValue::new("app:a", "1"));
        let mut locked = KeyValue::new("app:b", "2");
        locked.locked = true;
        store.seed(locked);
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let deleted = delete_key(&ctx, "app:*", None, true).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].key, "app:a");
        assert!(store.get("app:b", None).is_some());
    }

    #[tokio::test]
    async fn test_delete_key_all_failed() {
        let store = InMemoryStore::default();
        let mut locked = KeyValue::new("app:b", "2");
        locked.locked = true;
        store.seed(locked);
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let err = delete_key(&ctx, "app:b", None, true).await.unwrap_err();
        assert!(err.to_string().starts_with("Delete operation failed."));
    }

    #[tokio::test]
    async fn test_lock_and_unlock() {
        let store = InMemoryStore::default();
        store.seed(KeyValue::new("color", "red").with_label(Some("prod")));
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let kv = lock_key(&ctx, "color", Some("prod"), true).await.unwrap();
        assert!(kv.locked);
        let kv = unlock_key(&ctx, "color", Some("prod"), true).await.unwrap();
        assert!(!kv.locked);

        let err = lock_key(&ctx, "missing", None, true).await.unwrap_err();
        assert_eq!(err.to_string(), "The key you are trying to lock does not exist.");
    }

    #[tokio::test]
    async fn test_show_key_missing() {
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);
        let err = show_key(&ctx, "color", None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "The key-value does not exist.");
    }

    #[tokio::test]
    async fn test_list_key_top_and_fields() {
        let store = InMemoryStore::default();
        for i in 0..5 {
            store.seed(KeyValue::new(format!("k{}", i), i.to_string()));
        }
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let args = ListKeyArgs {
            fields: vec!["key".into(), "value".into()],
            top: Some(2),
            ..Default::default()
        };
        let listed = list_key(&ctx, &args).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], serde_json::json!({"key": "k0", "value": "0"}));

        let all = list_key(&ctx, &ListKeyArgs { all: true, ..Default::default() }).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_list_key_snapshot_excludes_filters() {
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);
        let args = ListKeyArgs {
            snapshot: Some("snap".into()),
            key: Some("a".into()),
            ..Default::default()
        };
        assert!(matches!(
            list_key(&ctx, &args).await,
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_key() {
        let store = InMemoryStore::default();
        store.seed(KeyValue::new("a", "changed"));
        store.seed(KeyValue::new("new", "1"));
        store.set_past(vec![KeyValue::new("a", "original"), KeyValue::new("gone", "2")]);
        let prompter = ScriptedPrompter::new(&["y"]);
        let ctx = store_context(&store, &prompter);

        let args = RestoreArgs {
            datetime: "2024-01-01T00:00:00Z".into(),
            ..Default::default()
        };
        let summary = restore_key(&ctx, &args).await.unwrap();
        assert_eq!(
            summary,
            SyncSummary {
                added: 1,
                updated: 1,
                deleted: 1,
                skipped: 0
            }
        );
        assert_eq!(store.get("a", None).and_then(|kv| kv.value).as_deref(), Some("original"));
        assert!(store.get("gone", None).is_some());
        assert!(store.get("new", None).is_none());
    }

    #[tokio::test]
    async fn test_restore_stops_on_first_failure() {
        let store = InMemoryStore::default();
        let mut locked = KeyValue::new("a", "changed");
        locked.locked = true;
        store.seed(locked);
        store.set_past(vec![KeyValue::new("a", "original")]);
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let args = RestoreArgs {
            datetime: "2024-01-01T00:00:00Z".into(),
            yes: true,
            ..Default::default()
        };
        assert!(restore_key(&ctx, &args).await.is_err());
    }

    #[tokio::test]
    async fn test_import_file_with_features() {
        let file = json_file(
            r#"{
                "db": {"host": "localhost", "port": 5432},
                "FeatureManagement": {"Beta": true}
            }"#,
        );
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let args = ImportArgs {
            source: file_source(file.path()),
            label: Some("dev".into()),
            prefix: "app:".into(),
            yes: true,
            ..Default::default()
        };
        let summary = import_config(&ctx, &args).await.unwrap();
        assert_eq!(summary.added, 3);
        assert_eq!(
            store.get("app:db:port", Some("dev")).and_then(|kv| kv.value).as_deref(),
            Some("5432")
        );
        let flag = store.get(".appconfig.featureflag/Beta", Some("dev")).unwrap();
        assert_eq!(flag.content_type.as_deref(), Some(FEATURE_FLAG_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_import_strict_deletes_missing_keys() {
        let file = json_file(r#"{"a": "1"}"#);
        let store = InMemoryStore::default();
        store.seed(KeyValue::new("a", "1"));
        store.seed(KeyValue::new("stale", "x"));
        store.seed(KeyValue::new("other", "y").with_label(Some("prod")));
        let prompter = ScriptedPrompter::new(&["y"]);
        let ctx = store_context(&store, &prompter);

        let args = ImportArgs {
            source: file_source(file.path()),
            strict: true,
            ..Default::default()
        };
        let summary = import_config(&ctx, &args).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.added + summary.updated, 0);
        assert!(store.get("stale", None).is_none());
        assert!(store.get("other", Some("prod")).is_some());
        assert_eq!(prompter.asked(), vec!["Do you want to continue?\n".to_string()]);
    }

    #[tokio::test]
    async fn test_import_mode_all_rewrites_matching() {
        let file = json_file(r#"{"a": "1"}"#);
        let store = InMemoryStore::default();
        store.seed(KeyValue::new("a", "1"));
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let mut args = ImportArgs {
            source: file_source(file.path()),
            yes: true,
            ..Default::default()
        };
        assert_eq!(import_config(&ctx, &args).await.unwrap(), SyncSummary::default());

        args.import_mode = ImportMode::All;
        assert_eq!(import_config(&ctx, &args).await.unwrap().updated, 1);
    }

    #[tokio::test]
    async fn test_import_dry_run_writes_nothing() {
        let file = json_file(r#"{"a": "1"}"#);
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let args = ImportArgs {
            source: file_source(file.path()),
            dry_run: true,
            ..Default::default()
        };
        import_config(&ctx, &args).await.unwrap();
        assert!(store.all().is_empty());
        assert!(prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn test_import_strict_requires_file_source() {
        let src = InMemoryStore::default();
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let args = ImportArgs {
            source: ImportSource::AppConfig {
                client: &src,
                key: None,
                label: None,
                snapshot: None,
                preserve_labels: false,
            },
            strict: true,
            yes: true,
            ..Default::default()
        };
        assert!(matches!(
            import_config(&ctx, &args).await,
            Err(AzCliError::InvalidArgumentValue(_))
        ));
    }

    #[tokio::test]
    async fn test_import_kvset_rejects_label() {
        let file = json_file(r#"{"items": []}"#);
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let args = ImportArgs {
            source: ImportSource::File {
                path: file.path().to_path_buf(),
                format: FileFormat::Json,
                separator: None,
                depth: None,
            },
            profile: Profile::KvSet,
            label: Some("dev".into()),
            yes: true,
            ..Default::default()
        };
        let err = import_config(&ctx, &args).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "The option 'label' is not supported when importing using 'appconfig/kvset' profile"
        );
    }

    #[tokio::test]
    async fn test_kvset_export_then_import_round_trip() {
        let source = InMemoryStore::default();
        source.seed(KeyValue::new("a", "1").with_label(Some("prod")));
        source.seed(
            KeyValue::new("b", r#"{"x": 1}"#)
                .with_content_type("application/json")
                .with_tags(Tags::from([("t".to_string(), "v".to_string())])),
        );
        let prompter = ScriptedPrompter::new(&[]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvset.json");

        let ctx = store_context(&source, &prompter);
        let mut export = ExportArgs::new(ExportDestination::File {
            path: path.clone(),
            format: FileFormat::Json,
            separator: None,
        });
        export.label = Some("*".into());
        export.profile = Profile::KvSet;
        export.yes = true;
        export_config(&ctx, &export).await.unwrap();

        let target = InMemoryStore::default();
        let ctx = store_context(&target, &prompter);
        let import = ImportArgs {
            source: ImportSource::File {
                path,
                format: FileFormat::Json,
                separator: None,
                depth: None,
            },
            profile: Profile::KvSet,
            yes: true,
            ..Default::default()
        };
        import_config(&ctx, &import).await.unwrap();

        let tuples = |store: &InMemoryStore| {
            let mut all: Vec<_> = store
                .all()
                .into_iter()
                .map(|kv| (kv.key, kv.label, kv.value, kv.content_type, kv.tags))
                .collect();
            all.sort();
            all
        };
        assert_eq!(tuples(&source), tuples(&target));
    }

    #[tokio::test]
    async fn test_import_from_store_applies_label_and_prefix() {
        let src = InMemoryStore::default();
        src.seed(KeyValue::new("color", "red").with_label(Some("v1")));
        src.seed(KeyValue::new("size", "xl"));
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let args = ImportArgs {
            source: ImportSource::AppConfig {
                client: &src,
                key: None,
                label: Some("v1".into()),
                snapshot: None,
                preserve_labels: false,
            },
            label: Some("copied".into()),
            prefix: "app/".into(),
            yes: true,
            ..Default::default()
        };
        import_config(&ctx, &args).await.unwrap();
        assert!(store.get("app/color", Some("copied")).is_some());
        assert!(store.get("app/size", Some("copied")).is_none());
    }

    #[tokio::test]
    async fn test_import_from_app_service() {
        let backend = FakeAppService::with_settings(vec![AppSetting {
            name: "Greeting".into(),
            value: "hello".into(),
            slot_setting: true,
        }]);
        let store = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let args = ImportArgs {
            source: ImportSource::AppService {
                backend: &backend,
                account: AppServiceAccount::new("rg", "web", None),
            },
            yes: true,
            ..Default::default()
        };
        import_config(&ctx, &args).await.unwrap();
        let kv = store.get("Greeting", None).unwrap();
        assert_eq!(kv.tags.get(APPSVC_SLOT_SETTING_TAG).map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_export_to_file_strips_prefix() {
        let store = InMemoryStore::default();
        store.seed(KeyValue::new("app:db:host", "localhost"));
        store.seed(KeyValue::new("other", "x"));
        let prompter = ScriptedPrompter::new(&["y"]);
        let ctx = store_context(&store, &prompter);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");

        let mut args = ExportArgs::new(ExportDestination::File {
            path: path.clone(),
            format: FileFormat::Json,
            separator: Some(":".into()),
        });
        args.prefix = "app:".into();
        args.skip_features = true;
        export_config(&ctx, &args).await.unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, serde_json::json!({"db": {"host": "localhost"}}));
    }

    #[tokio::test]
    async fn test_export_to_store_relabels() {
        let store = InMemoryStore::default();
        store.seed(KeyValue::new("a", "1"));
        let dest = InMemoryStore::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let mut args = ExportArgs::new(ExportDestination::AppConfig {
            client: &dest,
            label: Some("copy".into()),
            preserve_labels: false,
        });
        args.yes = true;
        let summary = export_config(&ctx, &args).await.unwrap();
        assert_eq!(summary.added, 1);
        assert!(dest.get("a", Some("copy")).is_some());
    }

    #[tokio::test]
    async fn test_export_to_app_service_defaults_slot_tag() {
        let store = InMemoryStore::default();
        store.seed(KeyValue::new("Greeting", "hello"));
        let backend = FakeAppService::default();
        let prompter = ScriptedPrompter::new(&[]);
        let ctx = store_context(&store, &prompter);

        let mut args = ExportArgs::new(ExportDestination::AppService {
            backend: &backend,
            account: AppServiceAccount::new("rg", "web", None),
            export_as_reference: false,
        });
        args.yes = true;
        export_config(&ctx, &args).await.unwrap();
        let updates = backend.updates();
        assert_eq!(updates[0][0].name, "Greeting");
        assert!(!updates[0][0].slot_setting);
    }

    #[tokio::test]
    async fn test_export_as_reference_needs_endpoint() {
        let store = InMemoryStore::default();
        store.seed(KeyValue::new("Greeting", "hello"));
        let backend = FakeAppService::default();
        let prompter = ScriptedPrompter::new(&[]);
        let mut ctx = store_context(&store, &prompter);

        let mut args = ExportArgs::new(ExportDestination::AppService {
            backend: &backend,
            account: AppServiceAccount::new("rg", "web", None),
            export_as_reference: true,
        });
        args.yes = true;
        assert!(matches!(
            export_config(&ctx, &args).await,
            Err(AzCliError::RequiredArgumentMissing(_))
        ));

        ctx.settings.endpoint = Some("https://s.azconfig.io".into());
        export_config(&ctx, &args).await.unwrap();
        assert_eq!(
            backend.updates()[0][0].value,
            "@Microsoft.AppConfiguration(Endpoint=https://s.azconfig.io; Key=Greeting)"
        );
    }
}
