//! Command-line surface. AKS flags serialize straight into the raw
//! parameter map, so field names are the parameter names.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use serde::{Serialize, Serializer};

#[derive(Parser)]
#[command(
    name = "azcli",
    version,
    about = "AKS cluster create/update and App Configuration key-value tooling"
)]
pub struct Cli {
    /// Path to azcli.toml [default: ./azcli.toml or ~/.config/azcli/azcli.toml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subscription for ARM calls, overriding the config file
    #[arg(long, global = true)]
    pub subscription: Option<String>,

    /// Log at debug level
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage Azure Kubernetes Service clusters
    Aks {
        #[command(subcommand)]
        command: AksCommand,
    },
    /// Manage App Configuration stores
    Appconfig {
        /// Store endpoint, overriding the config file
        #[arg(long, global = true)]
        endpoint: Option<String>,
        #[command(subcommand)]
        command: AppConfigCommand,
    },
}

#[derive(Subcommand)]
pub enum AksCommand {
    /// Create a managed cluster
    Create(AksCreateArgs),
    /// Update a managed cluster
    Update(AksUpdateArgs),
}

/// `key=value` items as a JSON object. An empty item clears the map.
fn pairs_as_map<S: Serializer>(items: &Option<Vec<String>>, s: S) -> Result<S::Ok, S::Error> {
    match items {
        None => s.serialize_none(),
        Some(items) => {
            let map: BTreeMap<&str, &str> = items
                .iter()
                .filter(|item| !item.is_empty())
                .map(|item| item.split_once('=').unwrap_or((item.as_str(), "")))
                .collect();
            map.serialize(s)
        }
    }
}

#[derive(Args, Serialize)]
pub struct AksCreateArgs {
    #[command(flatten)]
    #[serde(flatten)]
    pub common: AksCommonArgs,

    /// Use a system-assigned managed identity unless a service principal is given
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub enable_managed_identity: bool,
}

#[derive(Args, Serialize)]
pub struct AksUpdateArgs {
    #[command(flatten)]
    #[serde(flatten)]
    pub common: AksCommonArgs,

    /// Move a service principal cluster to managed identity
    #[arg(long)]
    pub enable_managed_identity: bool,
}

#[derive(Args, Serialize)]
pub struct AksCommonArgs {
    #[arg(short = 'g', long = "resource-group")]
    pub resource_group_name: String,
    #[arg(short = 'n', long)]
    pub name: String,
    #[arg(short, long)]
    pub location: Option<String>,
    #[arg(long)]
    pub yes: bool,
    #[arg(long)]
    pub no_wait: bool,
    /// Space separated `key=value` tags
    #[arg(long, num_args = 0..)]
    #[serde(serialize_with = "pairs_as_map")]
    pub tags: Option<Vec<String>>,

    #[arg(short = 'k', long)]
    pub kubernetes_version: Option<String>,
    #[arg(long)]
    pub dns_name_prefix: Option<String>,
    #[arg(long)]
    pub fqdn_subdomain: Option<String>,
    #[arg(long)]
    pub node_resource_group: Option<String>,
    #[arg(long)]
    pub tier: Option<String>,
    #[arg(long)]
    pub k8s_support_plan: Option<String>,
    #[arg(long)]
    pub edge_zone: Option<String>,
    #[arg(long)]
    pub auto_upgrade_channel: Option<String>,
    #[arg(long)]
    pub node_os_upgrade_channel: Option<String>,
    #[arg(long)]
    pub uptime_sla: bool,
    #[arg(long)]
    pub no_uptime_sla: bool,

    // Default node pool
    #[arg(long)]
    pub nodepool_name: Option<String>,
    #[arg(long)]
    pub node_count: Option<i64>,
    #[arg(short = 's', long)]
    pub node_vm_size: Option<String>,
    #[arg(long)]
    pub vm_set_type: Option<String>,
    #[arg(long)]
    pub node_osdisk_size: Option<i64>,
    #[arg(long)]
    pub node_osdisk_diskencryptionset_id: Option<String>,
    #[arg(long)]
    pub max_pods: Option<i64>,
    #[arg(short = 'z', long, num_args = 1..)]
    pub zones: Option<Vec<String>>,
    #[arg(long, num_args = 0..)]
    #[serde(serialize_with = "pairs_as_map")]
    pub nodepool_tags: Option<Vec<String>>,
    #[arg(long, num_args = 0..)]
    #[serde(serialize_with = "pairs_as_map")]
    pub nodepool_labels: Option<Vec<String>>,
    /// Comma separated taints, e.g. `key=value:NoSchedule`
    #[arg(long)]
    pub nodepool_taints: Option<String>,
    #[arg(long)]
    pub enable_node_public_ip: bool,
    #[arg(long)]
    pub enable_encryption_at_host: bool,

    // Autoscaler
    #[arg(long)]
    pub enable_cluster_autoscaler: bool,
    #[arg(long)]
    pub disable_cluster_autoscaler: bool,
    #[arg(long)]
    pub update_cluster_autoscaler: bool,
    #[arg(long)]
    pub min_count: Option<i64>,
    #[arg(long)]
    pub max_count: Option<i64>,
    /// Space separated `key=value` autoscaler settings
    #[arg(long, num_args = 0..)]
    pub cluster_autoscaler_profile: Option<Vec<String>>,

    // Linux and Windows profiles
    #[arg(short = 'u', long)]
    pub admin_username: Option<String>,
    /// Public key text or path to a public key file
    #[arg(long)]
    pub ssh_key_value: Option<String>,
    #[arg(long)]
    pub generate_ssh_keys: bool,
    #[arg(long)]
    pub no_ssh_key: bool,
    #[arg(long)]
    pub windows_admin_username: Option<String>,
    #[arg(long)]
    pub windows_admin_password: Option<String>,
    #[arg(long)]
    pub enable_ahub: bool,
    #[arg(long)]
    pub disable_ahub: bool,
    #[arg(long)]
    pub enable_windows_gmsa: bool,
    #[arg(long)]
    pub gmsa_dns_server: Option<String>,
    #[arg(long)]
    pub gmsa_root_domain_name: Option<String>,

    // Identity
    #[arg(long)]
    pub service_principal: Option<String>,
    #[arg(long)]
    pub client_secret: Option<String>,
    #[arg(long)]
    pub assign_identity: Option<String>,
    #[arg(long)]
    pub assign_kubelet_identity: Option<String>,
    #[arg(long)]
    pub attach_acr: Option<String>,
    #[arg(long)]
    pub detach_acr: Option<String>,
    #[arg(long)]
    pub skip_subnet_role_assignment: bool,

    // Network
    #[arg(long)]
    pub network_plugin: Option<String>,
    #[arg(long)]
    pub network_plugin_mode: Option<String>,
    #[arg(long)]
    pub network_policy: Option<String>,
    #[arg(long)]
    pub pod_cidr: Option<String>,
    #[arg(long)]
    pub service_cidr: Option<String>,
    #[arg(long)]
    pub dns_service_ip: Option<String>,
    #[arg(long)]
    pub vnet_subnet_id: Option<String>,
    #[arg(long)]
    pub pod_subnet_id: Option<String>,
    #[arg(long)]
    pub outbound_type: Option<String>,
    #[arg(long)]
    pub load_balancer_sku: Option<String>,
    #[arg(long)]
    pub load_balancer_managed_outbound_ip_count: Option<i64>,
    #[arg(long)]
    pub load_balancer_outbound_ips: Option<String>,
    #[arg(long)]
    pub load_balancer_outbound_ip_prefixes: Option<String>,
    #[arg(long)]
    pub load_balancer_outbound_ports: Option<i64>,
    #[arg(long)]
    pub load_balancer_idle_timeout: Option<i64>,
    #[arg(long)]
    pub nat_gateway_managed_outbound_ip_count: Option<i64>,
    #[arg(long)]
    pub nat_gateway_idle_timeout: Option<i64>,
    /// Path to a JSON HTTP proxy configuration file
    #[arg(long)]
    pub http_proxy_config: Option<String>,

    // API server access
    #[arg(long)]
    pub api_server_authorized_ip_ranges: Option<String>,
    #[arg(long)]
    pub enable_private_cluster: bool,
    #[arg(long)]
    pub private_dns_zone: Option<String>,
    #[arg(long)]
    pub enable_public_fqdn: bool,
    #[arg(long)]
    pub disable_public_fqdn: bool,

    // AAD and RBAC
    #[arg(long)]
    pub enable_aad: bool,
    #[arg(long)]
    pub aad_client_app_id: Option<String>,
    #[arg(long)]
    pub aad_server_app_id: Option<String>,
    #[arg(long)]
    pub aad_server_app_secret: Option<String>,
    #[arg(long)]
    pub aad_tenant_id: Option<String>,
    #[arg(long)]
    pub aad_admin_group_object_ids: Option<String>,
    #[arg(long)]
    pub enable_azure_rbac: bool,
    #[arg(long)]
    pub disable_azure_rbac: bool,
    #[arg(long)]
    pub enable_rbac: bool,
    #[arg(long)]
    pub disable_rbac: bool,
    #[arg(long)]
    pub enable_local_accounts: bool,
    #[arg(long)]
    pub disable_local_accounts: bool,

    // Addons
    /// Comma separated addon names
    #[arg(short = 'a', long)]
    pub enable_addons: Option<String>,
    #[arg(long)]
    pub workspace_resource_id: Option<String>,
    #[arg(long)]
    pub enable_msi_auth_for_monitoring: bool,
    #[arg(long)]
    pub aci_subnet_name: Option<String>,
    #[arg(long)]
    pub appgw_name: Option<String>,
    #[arg(long)]
    pub appgw_subnet_cidr: Option<String>,
    #[arg(long)]
    pub appgw_id: Option<String>,
    #[arg(long)]
    pub appgw_subnet_id: Option<String>,
    #[arg(long)]
    pub appgw_watch_namespace: Option<String>,
    #[arg(long)]
    pub enable_sgxquotehelper: bool,
    #[arg(long)]
    pub enable_secret_rotation: bool,
    #[arg(long)]
    pub disable_secret_rotation: bool,
    #[arg(long)]
    pub rotation_poll_interval: Option<String>,
    #[arg(long)]
    pub enable_app_routing: bool,
    #[arg(long)]
    pub dns_zone_resource_ids: Option<String>,

    // Cluster features
    #[arg(long)]
    pub enable_oidc_issuer: bool,
    #[arg(long)]
    pub enable_workload_identity: bool,
    #[arg(long)]
    pub disable_workload_identity: bool,
    #[arg(long)]
    pub enable_image_cleaner: bool,
    #[arg(long)]
    pub disable_image_cleaner: bool,
    #[arg(long)]
    pub image_cleaner_interval_hours: Option<i64>,
    #[arg(long)]
    pub enable_keda: bool,
    #[arg(long)]
    pub disable_keda: bool,
    #[arg(long)]
    pub enable_vpa: bool,
    #[arg(long)]
    pub disable_vpa: bool,
    #[arg(long)]
    pub enable_defender: bool,
    #[arg(long)]
    pub disable_defender: bool,
    /// Path to a JSON Defender configuration file
    #[arg(long)]
    pub defender_config: Option<String>,
    #[arg(long)]
    pub enable_azure_keyvault_kms: bool,
    #[arg(long)]
    pub disable_azure_keyvault_kms: bool,
    #[arg(long)]
    pub azure_keyvault_kms_key_id: Option<String>,
    #[arg(long)]
    pub azure_keyvault_kms_key_vault_network_access: Option<String>,
    #[arg(long)]
    pub azure_keyvault_kms_key_vault_resource_id: Option<String>,
    #[arg(long)]
    pub enable_disk_driver: bool,
    #[arg(long)]
    pub disable_disk_driver: bool,
    #[arg(long)]
    pub enable_file_driver: bool,
    #[arg(long)]
    pub disable_file_driver: bool,
    #[arg(long)]
    pub enable_blob_driver: bool,
    #[arg(long)]
    pub disable_blob_driver: bool,
    #[arg(long)]
    pub enable_snapshot_controller: bool,
    #[arg(long)]
    pub disable_snapshot_controller: bool,
    #[arg(long)]
    pub enable_azure_monitor_metrics: bool,
    #[arg(long)]
    pub disable_azure_monitor_metrics: bool,
    #[arg(long)]
    pub ksm_metric_labels_allow_list: Option<String>,
    #[arg(long)]
    pub ksm_metric_annotations_allow_list: Option<String>,
    #[arg(long)]
    pub enable_azure_service_mesh: bool,
    #[arg(long)]
    pub disable_azure_service_mesh: bool,
    #[arg(long)]
    pub enable_cost_analysis: bool,
    #[arg(long)]
    pub disable_cost_analysis: bool,
    #[arg(long)]
    pub enable_azure_container_storage: bool,
    #[arg(long)]
    pub disable_azure_container_storage: bool,
    #[arg(long)]
    pub container_storage_pool_type: Option<String>,
}

#[derive(Subcommand)]
pub enum AppConfigCommand {
    /// Manage key-values
    Kv {
        #[command(subcommand)]
        command: KvCommand,
    },
    /// Manage feature flags
    Feature {
        #[command(subcommand)]
        command: FeatureCommand,
    },
    /// Manage snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
}

#[derive(Args, Clone)]
pub struct KeyLabel {
    #[arg(long)]
    pub key: String,
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Args, Clone)]
pub struct Paging {
    #[arg(long)]
    pub top: Option<usize>,
    #[arg(long)]
    pub all: bool,
    /// Space separated fields to keep in the output
    #[arg(long, num_args = 1..)]
    pub fields: Vec<String>,
}

#[derive(Subcommand)]
pub enum KvCommand {
    /// Create or update a key-value
    Set {
        #[command(flatten)]
        target: KeyLabel,
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long, num_args = 0..)]
        tags: Option<Vec<String>>,
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete key-values
    Delete {
        #[command(flatten)]
        target: KeyLabel,
        #[arg(short, long)]
        yes: bool,
    },
    /// Show one key-value
    Show {
        #[command(flatten)]
        target: KeyLabel,
        #[arg(long)]
        datetime: Option<String>,
    },
    /// List key-values
    List {
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        datetime: Option<String>,
        #[arg(long)]
        snapshot: Option<String>,
        #[arg(long, num_args = 1..)]
        tags: Vec<String>,
        #[command(flatten)]
        paging: Paging,
    },
    /// Make a key-value read-only
    Lock {
        #[command(flatten)]
        target: KeyLabel,
        #[arg(short, long)]
        yes: bool,
    },
    /// Make a key-value writable
    Unlock {
        #[command(flatten)]
        target: KeyLabel,
        #[arg(short, long)]
        yes: bool,
    },
    /// Restore key-values to a point in time
    Restore {
        #[arg(long)]
        datetime: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(short, long)]
        yes: bool,
    },
    /// List revision history of key-values
    ListRevision {
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        datetime: Option<String>,
        #[arg(long, num_args = 1..)]
        tags: Vec<String>,
        #[command(flatten)]
        paging: Paging,
    },
    /// Import key-values into the store
    Import(Box<ImportCliArgs>),
    /// Export key-values from the store
    Export(Box<ExportCliArgs>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Endpoint {
    File,
    Appconfig,
    Appservice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProfileArg {
    Default,
    #[value(name = "appconfig/kvset")]
    Kvset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ImportModeArg {
    IgnoreMatch,
    All,
}

#[derive(Args, Clone)]
pub struct AppServiceTarget {
    /// App Service name or ARM resource id
    #[arg(long)]
    pub appservice_account: Option<String>,
    /// Resource group of the App Service when given by name
    #[arg(long)]
    pub appservice_resource_group: Option<String>,
    #[arg(long)]
    pub appservice_slot: Option<String>,
}

#[derive(Args, Clone)]
pub struct FileTarget {
    #[arg(long)]
    pub path: Option<PathBuf>,
    #[arg(long)]
    pub format: Option<String>,
    #[arg(long)]
    pub separator: Option<String>,
}

#[derive(Args)]
pub struct ImportCliArgs {
    #[arg(short, long, value_enum)]
    pub source: Endpoint,
    #[command(flatten)]
    pub file: FileTarget,
    #[arg(long)]
    pub depth: Option<i64>,
    #[arg(long)]
    pub label: Option<String>,
    #[arg(long, default_value = "")]
    pub prefix: String,
    #[arg(long)]
    pub content_type: Option<String>,
    #[arg(long, num_args = 0..)]
    pub tags: Option<Vec<String>>,
    #[arg(long, value_enum, default_value = "default")]
    pub profile: ProfileArg,
    #[arg(long)]
    pub skip_features: bool,
    #[arg(long)]
    pub strict: bool,
    #[arg(long, value_enum, default_value = "ignore-match")]
    pub import_mode: ImportModeArg,
    #[arg(long)]
    pub dry_run: bool,
    #[arg(short, long)]
    pub yes: bool,
    #[arg(long)]
    pub src_endpoint: Option<String>,
    #[arg(long)]
    pub src_key: Option<String>,
    #[arg(long)]
    pub src_label: Option<String>,
    #[arg(long)]
    pub src_snapshot: Option<String>,
    #[arg(long)]
    pub preserve_labels: bool,
    #[command(flatten)]
    pub appservice: AppServiceTarget,
}

#[derive(Args)]
pub struct ExportCliArgs {
    #[arg(short, long, value_enum)]
    pub destination: Endpoint,
    #[command(flatten)]
    pub file: FileTarget,
    #[arg(long)]
    pub key: Option<String>,
    #[arg(long)]
    pub label: Option<String>,
    #[arg(long)]
    pub datetime: Option<String>,
    #[arg(long)]
    pub snapshot: Option<String>,
    #[arg(long, default_value = "")]
    pub prefix: String,
    #[arg(long, value_enum, default_value = "default")]
    pub profile: ProfileArg,
    #[arg(long)]
    pub skip_features: bool,
    #[arg(long)]
    pub dry_run: bool,
    #[arg(short, long)]
    pub yes: bool,
    #[arg(long)]
    pub dest_endpoint: Option<String>,
    #[arg(long)]
    pub dest_label: Option<String>,
    #[arg(long)]
    pub preserve_labels: bool,
    #[command(flatten)]
    pub appservice: AppServiceTarget,
    #[arg(long)]
    pub export_as_reference: bool,
}

#[derive(Args, Clone)]
pub struct FeatureTarget {
    #[arg(long)]
    pub feature: Option<String>,
    #[arg(long)]
    pub key: Option<String>,
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Subcommand)]
pub enum FeatureCommand {
    /// Create a feature flag or update its description
    Set {
        #[command(flatten)]
        target: FeatureTarget,
        #[arg(long)]
        description: Option<String>,
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete feature flags
    Delete {
        #[command(flatten)]
        target: FeatureTarget,
        #[arg(short, long)]
        yes: bool,
    },
    /// Show one feature flag
    Show {
        #[command(flatten)]
        target: FeatureTarget,
        #[arg(long, num_args = 1..)]
        fields: Vec<String>,
    },
    /// List feature flags
    List {
        #[command(flatten)]
        target: FeatureTarget,
        #[command(flatten)]
        paging: Paging,
    },
    /// Turn a feature flag on
    Enable {
        #[command(flatten)]
        target: FeatureTarget,
        #[arg(short, long)]
        yes: bool,
    },
    /// Turn a feature flag off
    Disable {
        #[command(flatten)]
        target: FeatureTarget,
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage feature flag filters
    Filter {
        #[command(subcommand)]
        command: FilterCommand,
    },
}

#[derive(Subcommand)]
pub enum FilterCommand {
    /// Add a filter to a feature flag
    Add {
        #[command(flatten)]
        target: FeatureTarget,
        #[arg(long)]
        filter_name: String,
        /// Space separated `name=value` parameters; values may be JSON
        #[arg(long, num_args = 0..)]
        filter_parameters: Vec<String>,
        #[arg(long, allow_negative_numbers = true)]
        index: Option<i64>,
        #[arg(long)]
        requirement_type: Option<String>,
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete filters from a feature flag
    Delete {
        #[command(flatten)]
        target: FeatureTarget,
        #[arg(long)]
        filter_name: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        index: Option<i64>,
        #[arg(long)]
        all: bool,
        #[arg(short, long)]
        yes: bool,
    },
    /// List the filters of a feature flag
    List {
        #[command(flatten)]
        target: FeatureTarget,
        #[arg(long)]
        top: Option<usize>,
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
pub enum SnapshotCommand {
    /// Create a snapshot
    Create {
        #[arg(long)]
        name: String,
        /// JSON filter objects, e.g. '{"key": "app/*", "label": "prod"}'
        #[arg(long, num_args = 1..)]
        filters: Vec<String>,
        #[arg(long)]
        composition_type: Option<String>,
        #[arg(long)]
        retention_period: Option<i64>,
        #[arg(long, num_args = 0..)]
        tags: Vec<String>,
    },
    /// Show one snapshot
    Show {
        #[arg(long)]
        name: String,
        #[arg(long, num_args = 1..)]
        fields: Vec<String>,
    },
    /// List snapshots
    List {
        #[arg(long)]
        name: Option<String>,
        #[arg(long, num_args = 1..)]
        status: Vec<String>,
        #[command(flatten)]
        paging: Paging,
    },
    /// Archive a ready snapshot
    Archive {
        #[arg(long)]
        name: String,
    },
    /// Recover an archived snapshot
    Recover {
        #[arg(long)]
        name: String,
    },
    /// List the key-values of a snapshot
    ListKv {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        paging: Paging,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_aks_args_serialize_to_raw_names() {
        let cli = Cli::parse_from([
            "azcli", "aks", "create", "-g", "rg", "-n", "c1", "--tags", "env=prod", "team=web",
            "--node-count", "2",
        ]);
        let Commands::Aks { command: AksCommand::Create(args) } = cli.command else {
            panic!("expected aks create");
        };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["resource_group_name"], "rg");
        assert_eq!(value["node_count"], 2);
        assert_eq!(value["enable_managed_identity"], true);
        assert_eq!(value["tags"], serde_json::json!({"env": "prod", "team": "web"}));
        assert!(value["nodepool_tags"].is_null());
    }
}
