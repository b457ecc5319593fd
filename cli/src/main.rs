//! azcli: AKS cluster create/update and App Configuration commands.
//!
//! Results print as pretty JSON on stdout; logs and prompts go to stderr.

mod args;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nimbus_azcli::appconfig::appservice::{AppServiceAccount, ArmAppServiceBackend};
use nimbus_azcli::appconfig::feature::{
    self, AddFilterArgs, DeleteFilterArgs, ListFeatureArgs, SetFeatureArgs,
};
use nimbus_azcli::appconfig::file_io::FileFormat;
use nimbus_azcli::appconfig::keyvalue::{
    self, ExportArgs, ExportDestination, ImportArgs, ImportMode, ImportSource, ListKeyArgs,
    Profile, RestoreArgs, SetKeyArgs,
};
use nimbus_azcli::appconfig::snapshot::{self, CreateSnapshotArgs, ListSnapshotArgs};
use nimbus_azcli::appconfig::validation::{parse_filter_parameters, parse_tags};
use nimbus_azcli::{
    aks_create, aks_update, resolve_env_ref, AksContext, ArmAksBackend, AzCliConfig, AzCliError,
    ConsolePrompter, DecoratorMode, RawParameters, RestClient, RestConfigStoreClient,
    StoreContext,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use args::{
    AksCommand, AppConfigCommand, AppServiceTarget, Cli, Commands, Endpoint, ExportCliArgs,
    FeatureCommand, FileTarget, FilterCommand, ImportCliArgs, ImportModeArg, KvCommand,
    ProfileArg, SnapshotCommand,
};

const STORE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let fallback = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Err(e)
            if e
                .downcast_ref::<AzCliError>()
                .is_some_and(AzCliError::is_early_exit) =>
        {
            tracing::debug!("{}", e);
            Ok(())
        }
        other => other,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match resolve_config(cli.config) {
        Some(path) => load_config(&path).await?,
        None => {
            tracing::debug!("no azcli.toml found, using defaults");
            AzCliConfig::default()
        }
    };
    if cli.subscription.is_some() {
        config.arm.subscription_id = cli.subscription;
    }

    match cli.command {
        Commands::Aks { command } => {
            config.validate()?;
            run_aks(&config, command).await
        }
        Commands::Appconfig { endpoint, command } => {
            if endpoint.is_some() {
                config.appconfig.endpoint = endpoint;
            }
            config.validate()?;
            run_appconfig(&config, command).await
        }
    }
}

/// Find the config file: explicit path, then ./azcli.toml, then the user
/// config directory.
fn resolve_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }

    let local = Path::new("azcli.toml");
    if local.exists() {
        return Some(local.to_path_buf());
    }

    dirs::config_dir()
        .map(|dir| dir.join("azcli").join("azcli.toml"))
        .filter(|path| path.exists())
}

/// Load and parse an azcli.toml config file.
async fn load_config(config_path: &Path) -> Result<AzCliConfig> {
    let content = tokio::fs::read_to_string(config_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", config_path, e))?;
    let config: AzCliConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {:?}: {}", config_path, e))?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn arm_client(config: &AzCliConfig) -> Result<(RestClient, String)> {
    let token = resolve_env_ref(&config.arm.access_token).with_context(|| {
        format!(
            "No ARM access token: set the variable referenced by arm.access_token ({})",
            config.arm.access_token
        )
    })?;
    let subscription = config
        .arm
        .subscription_id
        .clone()
        .context("No subscription: set arm.subscription_id or pass --subscription")?;
    Ok((RestClient::new(token, config.arm.request_timeout_secs)?, subscription))
}

async fn run_aks(config: &AzCliConfig, command: AksCommand) -> Result<()> {
    let (rest, subscription) = arm_client(config)?;
    let backend = ArmAksBackend::new(
        rest,
        &config.arm.endpoint,
        &subscription,
        &config.aks.api_version,
        Duration::from_secs(config.aks.poll_interval_secs),
    );
    let prompter = ConsolePrompter;

    let response = match command {
        AksCommand::Create(args) => {
            let raw = RawParameters::from_args(&args)?;
            let ctx = AksContext::new(
                raw,
                &config.aks,
                &config.arm,
                &backend,
                &prompter,
                DecoratorMode::Create,
                subscription,
            )?;
            aks_create(ctx).await?
        }
        AksCommand::Update(args) => {
            let raw = RawParameters::from_args(&args)?;
            let ctx = AksContext::new(
                raw,
                &config.aks,
                &config.arm,
                &backend,
                &prompter,
                DecoratorMode::Update,
                subscription,
            )?;
            aks_update(ctx).await?
        }
    };
    print_json(&response.to_json()?)
}

fn store_client(config: &AzCliConfig, endpoint: Option<&str>) -> Result<RestConfigStoreClient> {
    let endpoint = endpoint
        .or(config.appconfig.endpoint.as_deref())
        .context("No App Configuration endpoint: set appconfig.endpoint or pass --endpoint")?;
    let token = resolve_env_ref(&config.appconfig.access_token).with_context(|| {
        format!(
            "No App Configuration access token: set the variable referenced by appconfig.access_token ({})",
            config.appconfig.access_token
        )
    })?;
    let rest = RestClient::new(token, config.arm.request_timeout_secs)?;
    Ok(RestConfigStoreClient::new(
        rest,
        endpoint,
        &config.appconfig.api_version,
        STORE_POLL_INTERVAL,
    )?)
}

fn app_service_backend(config: &AzCliConfig) -> Result<ArmAppServiceBackend> {
    let (rest, subscription) = arm_client(config)?;
    Ok(ArmAppServiceBackend::new(rest, &config.arm.endpoint, subscription))
}

fn app_service_account(target: &AppServiceTarget) -> Result<AppServiceAccount> {
    let name = target
        .appservice_account
        .as_deref()
        .context("--appservice-account is required for App Service import and export")?;
    let mut account = if name.starts_with('/') {
        AppServiceAccount::from_id(name)?
    } else {
        let group = target
            .appservice_resource_group
            .as_deref()
            .context("--appservice-resource-group is required when --appservice-account is a name")?;
        AppServiceAccount::new(group, name, None)
    };
    if target.appservice_slot.is_some() {
        account.slot = target.appservice_slot.clone();
    }
    Ok(account)
}

fn file_target(file: &FileTarget) -> Result<(PathBuf, FileFormat, Option<String>)> {
    let path = file.path.clone().context("--path is required for file import and export")?;
    let format = file
        .format
        .as_deref()
        .context("--format is required for file import and export")?
        .parse::<FileFormat>()?;
    Ok((path, format, file.separator.clone()))
}

fn profile(arg: ProfileArg) -> Profile {
    match arg {
        ProfileArg::Default => Profile::Default,
        ProfileArg::Kvset => Profile::KvSet,
    }
}

async fn run_appconfig(config: &AzCliConfig, command: AppConfigCommand) -> Result<()> {
    let client = store_client(config, None)?;
    let prompter = ConsolePrompter;
    let ctx = StoreContext::new(&client, &prompter, config.appconfig.clone());

    match command {
        AppConfigCommand::Kv { command } => run_kv(config, &ctx, command).await,
        AppConfigCommand::Feature { command } => run_feature(&ctx, command).await,
        AppConfigCommand::Snapshot { command } => run_snapshot(&ctx, command).await,
    }
}

async fn run_kv(config: &AzCliConfig, ctx: &StoreContext<'_>, command: KvCommand) -> Result<()> {
    match command {
        KvCommand::Set {
            target,
            value,
            content_type,
            tags,
            yes,
        } => {
            let args = SetKeyArgs {
                key: target.key,
                label: target.label,
                value,
                content_type,
                tags: tags.as_deref().map(parse_tags),
                yes,
            };
            print_json(&keyvalue::set_key(ctx, &args).await?)
        }
        KvCommand::Delete { target, yes } => print_json(
            &keyvalue::delete_key(ctx, &target.key, target.label.as_deref(), yes).await?,
        ),
        KvCommand::Show { target, datetime } => print_json(
            &keyvalue::show_key(ctx, &target.key, target.label.as_deref(), datetime.as_deref())
                .await?,
        ),
        KvCommand::List {
            key,
            label,
            datetime,
            snapshot,
            tags,
            paging,
        } => {
            let args = ListKeyArgs {
                key,
                label,
                datetime,
                snapshot,
                tags,
                fields: paging.fields,
                top: paging.top,
                all: paging.all,
            };
            print_json(&keyvalue::list_key(ctx, &args).await?)
        }
        KvCommand::ListRevision {
            key,
            label,
            datetime,
            tags,
            paging,
        } => {
            let args = ListKeyArgs {
                key,
                label,
                datetime,
                snapshot: None,
                tags,
                fields: paging.fields,
                top: paging.top,
                all: paging.all,
            };
            print_json(&keyvalue::list_revision(ctx, &args).await?)
        }
        KvCommand::Lock { target, yes } => print_json(
            &keyvalue::lock_key(ctx, &target.key, target.label.as_deref(), yes).await?,
        ),
        KvCommand::Unlock { target, yes } => print_json(
            &keyvalue::unlock_key(ctx, &target.key, target.label.as_deref(), yes).await?,
        ),
        KvCommand::Restore {
            datetime,
            key,
            label,
            yes,
        } => {
            let args = RestoreArgs {
                datetime,
                key,
                label,
                yes,
            };
            print_json(&keyvalue::restore_key(ctx, &args).await?)
        }
        KvCommand::Import(args) => run_import(config, ctx, *args).await,
        KvCommand::Export(args) => run_export(config, ctx, *args).await,
    }
}

async fn run_import(config: &AzCliConfig, ctx: &StoreContext<'_>, cli: ImportCliArgs) -> Result<()> {
    let src_client;
    let backend;
    let source = match cli.source {
        Endpoint::File => {
            let (path, format, separator) = file_target(&cli.file)?;
            ImportSource::File {
                path,
                format,
                separator,
                depth: cli.depth,
            }
        }
        Endpoint::Appconfig => {
            src_client = store_client(config, cli.src_endpoint.as_deref())?;
            ImportSource::AppConfig {
                client: &src_client,
                key: cli.src_key,
                label: cli.src_label,
                snapshot: cli.src_snapshot,
                preserve_labels: cli.preserve_labels,
            }
        }
        Endpoint::Appservice => {
            backend = app_service_backend(config)?;
            ImportSource::AppService {
                backend: &backend,
                account: app_service_account(&cli.appservice)?,
            }
        }
    };

    let args = ImportArgs {
        source,
        label: cli.label,
        prefix: cli.prefix,
        content_type: cli.content_type,
        tags: cli.tags.as_deref().map(parse_tags),
        profile: profile(cli.profile),
        skip_features: cli.skip_features,
        strict: cli.strict,
        import_mode: match cli.import_mode {
            ImportModeArg::IgnoreMatch => ImportMode::IgnoreMatch,
            ImportModeArg::All => ImportMode::All,
        },
        dry_run: cli.dry_run,
        yes: cli.yes,
    };
    print_json(&keyvalue::import_config(ctx, &args).await?)
}

async fn run_export(config: &AzCliConfig, ctx: &StoreContext<'_>, cli: ExportCliArgs) -> Result<()> {
    let dest_client;
    let backend;
    let destination = match cli.destination {
        Endpoint::File => {
            let (path, format, separator) = file_target(&cli.file)?;
            ExportDestination::File {
                path,
                format,
                separator,
            }
        }
        Endpoint::Appconfig => {
            dest_client = store_client(config, cli.dest_endpoint.as_deref())?;
            ExportDestination::AppConfig {
                client: &dest_client,
                label: cli.dest_label,
                preserve_labels: cli.preserve_labels,
            }
        }
        Endpoint::Appservice => {
            backend = app_service_backend(config)?;
            ExportDestination::AppService {
                backend: &backend,
                account: app_service_account(&cli.appservice)?,
                export_as_reference: cli.export_as_reference,
            }
        }
    };

    let mut args = ExportArgs::new(destination);
    args.key = cli.key;
    args.label = cli.label;
    args.datetime = cli.datetime;
    args.snapshot = cli.snapshot;
    args.prefix = cli.prefix;
    args.profile = profile(cli.profile);
    args.skip_features = cli.skip_features;
    args.dry_run = cli.dry_run;
    args.yes = cli.yes;
    print_json(&keyvalue::export_config(ctx, &args).await?)
}

async fn run_feature(ctx: &StoreContext<'_>, command: FeatureCommand) -> Result<()> {
    match command {
        FeatureCommand::Set {
            target,
            description,
            yes,
        } => {
            let args = SetFeatureArgs {
                feature: target.feature,
                key: target.key,
                label: target.label,
                description,
                yes,
            };
            print_json(&feature::set_feature(ctx, &args).await?)
        }
        FeatureCommand::Delete { target, yes } => print_json(
            &feature::delete_feature(
                ctx,
                target.feature.as_deref(),
                target.key.as_deref(),
                target.label.as_deref(),
                yes,
            )
            .await?,
        ),
        FeatureCommand::Show { target, fields } => print_json(
            &feature::show_feature(
                ctx,
                target.feature.as_deref(),
                target.key.as_deref(),
                target.label.as_deref(),
                &fields,
            )
            .await?,
        ),
        FeatureCommand::List { target, paging } => {
            let args = ListFeatureArgs {
                feature: target.feature,
                key: target.key,
                label: target.label,
                fields: paging.fields,
                top: paging.top,
                all: paging.all,
            };
            print_json(&feature::list_features(ctx, &args).await?)
        }
        FeatureCommand::Enable { target, yes } => print_json(
            &feature::set_feature_state(
                ctx,
                target.feature.as_deref(),
                target.key.as_deref(),
                target.label.as_deref(),
                true,
                yes,
            )
            .await?,
        ),
        FeatureCommand::Disable { target, yes } => print_json(
            &feature::set_feature_state(
                ctx,
                target.feature.as_deref(),
                target.key.as_deref(),
                target.label.as_deref(),
                false,
                yes,
            )
            .await?,
        ),
        FeatureCommand::Filter { command } => run_filter(ctx, command).await,
    }
}

async fn run_filter(ctx: &StoreContext<'_>, command: FilterCommand) -> Result<()> {
    match command {
        FilterCommand::Add {
            target,
            filter_name,
            filter_parameters,
            index,
            requirement_type,
            yes,
        } => {
            let args = AddFilterArgs {
                feature: target.feature,
                key: target.key,
                label: target.label,
                filter_name,
                parameters: parse_filter_parameters(&filter_parameters)?,
                index,
                requirement_type,
                yes,
            };
            print_json(&feature::add_filter(ctx, &args).await?)
        }
        FilterCommand::Delete {
            target,
            filter_name,
            index,
            all,
            yes,
        } => {
            let args = DeleteFilterArgs {
                feature: target.feature,
                key: target.key,
                label: target.label,
                filter_name,
                index,
                all,
                yes,
            };
            print_json(&feature::delete_filter(ctx, &args).await?)
        }
        FilterCommand::List { target, top, all } => print_json(
            &feature::list_filters(
                ctx,
                target.feature.as_deref(),
                target.key.as_deref(),
                target.label.as_deref(),
                top,
                all,
            )
            .await?,
        ),
    }
}

async fn run_snapshot(ctx: &StoreContext<'_>, command: SnapshotCommand) -> Result<()> {
    match command {
        SnapshotCommand::Create {
            name,
            filters,
            composition_type,
            retention_period,
            tags,
        } => {
            let args = CreateSnapshotArgs {
                name,
                filters,
                composition_type,
                retention_period,
                tags,
            };
            print_json(&snapshot::create_snapshot(ctx, &args).await?)
        }
        SnapshotCommand::Show { name, fields } => {
            print_json(&snapshot::show_snapshot(ctx, &name, &fields).await?)
        }
        SnapshotCommand::List {
            name,
            status,
            paging,
        } => {
            let args = ListSnapshotArgs {
                name,
                status,
                fields: paging.fields,
                top: paging.top,
                all: paging.all,
            };
            print_json(&snapshot::list_snapshots(ctx, &args).await?)
        }
        SnapshotCommand::Archive { name } => {
            print_json(&snapshot::archive_snapshot(ctx, &name).await?)
        }
        SnapshotCommand::Recover { name } => {
            print_json(&snapshot::recover_snapshot(ctx, &name).await?)
        }
        SnapshotCommand::ListKv { name, paging } => print_json(
            &snapshot::list_snapshot_key_values(ctx, &name, &paging.fields, paging.top, paging.all)
                .await?,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_config_prefers_explicit_path() {
        let path = PathBuf::from("/tmp/custom-azcli.toml");
        assert_eq!(resolve_config(Some(path.clone())), Some(path));
    }

    #[tokio::test]
    async fn test_load_config_reads_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("azcli.toml");
        std::fs::write(
            &path,
            "[arm]\nsubscription_id = \"sub-1\"\n\n[appconfig]\nendpoint = \"https://store.azconfig.io\"\n",
        )
        .unwrap();

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.arm.subscription_id.as_deref(), Some("sub-1"));
        assert_eq!(
            config.appconfig.endpoint.as_deref(),
            Some("https://store.azconfig.io")
        );
    }

    #[tokio::test]
    async fn test_load_config_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("azcli.toml");
        std::fs::write(&path, "[arm\n").unwrap();

        let err = load_config(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_app_service_account_by_name_needs_group() {
        let target = AppServiceTarget {
            appservice_account: Some("web".to_string()),
            appservice_resource_group: None,
            appservice_slot: None,
        };
        assert!(app_service_account(&target).is_err());

        let target = AppServiceTarget {
            appservice_resource_group: Some("rg".to_string()),
            appservice_slot: Some("staging".to_string()),
            ..target
        };
        let account = app_service_account(&target).unwrap();
        assert_eq!(account.resource_group, "rg");
        assert_eq!(account.slot.as_deref(), Some("staging"));
    }
}
