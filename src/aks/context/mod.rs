//! Per-command parameter resolution for managed cluster create and update.
//!
//! [`AksContext`] wraps the raw flags, the cluster being assembled and (on
//! update) the cluster as fetched from the service. Each logical field has a
//! `get_*` accessor that validates and a `*_value` accessor that does not, so
//! paired flags can consult each other without recursing into validation.
//!
//! Create mode prefers values already present on the attached cluster; update
//! mode prefers raw input and falls back to the fetched cluster.

mod access;
mod addons;
mod agentpool;
mod cluster;
mod features;
mod network;
mod validate;

use std::fmt::Debug;

use regex::Regex;

use crate::aks::backend::AksBackend;
use crate::aks::models::{ManagedCluster, StringMap};
use crate::aks::params::RawParameters;
use crate::aks::schema::{ApiVersion, SchemaCapabilities};
use crate::config::{ArmSettings, AksSettings};
use crate::error::AzCliError;
use crate::prompt::Prompter;

pub use addons::{AddonSettings, virtual_node_addon_key};
pub use agentpool::AutoscalerChange;
pub use features::{ContainerStorageChange, StorageDrivers};
pub use network::{update_load_balancer_profile, update_nat_gateway_profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorMode {
    Create,
    Update,
}

/// A fact computed by one build step and consumed by a later step or by
/// post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct Intermediate<T> {
    name: &'static str,
    value: Option<T>,
}

impl<T: Clone + PartialEq + Debug> Intermediate<T> {
    pub fn new(name: &'static str) -> Self {
        Intermediate { name, value: None }
    }

    /// Store `value`. A conflicting value is kept unless `overwrite_exists`.
    pub fn set(&mut self, value: T, overwrite_exists: bool) {
        match &self.value {
            Some(existing) if *existing != value && !overwrite_exists => {
                tracing::warn!(
                    intermediate = self.name,
                    existing = ?existing,
                    new = ?value,
                    "intermediate already set, keeping the existing value"
                );
            }
            _ => self.value = Some(value),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn get_or(&self, default: T) -> T {
        self.value.clone().unwrap_or(default)
    }

    pub fn clear(&mut self) {
        self.value = None;
    }
}

/// Facts passed between build steps and post-processing.
#[derive(Debug, Clone, PartialEq)]
pub struct Intermediates {
    pub location: Intermediate<String>,
    pub workspace_resource_id: Intermediate<String>,
    pub monitoring_addon_enabled: Intermediate<bool>,
    pub ingress_appgw_addon_enabled: Intermediate<bool>,
    pub virtual_node_addon_enabled: Intermediate<bool>,
    pub need_post_creation_vnet_permission_granting: Intermediate<bool>,
    pub azure_container_storage_enabled: Intermediate<bool>,
    pub container_storage_pool_type: Intermediate<String>,
}

impl Default for Intermediates {
    fn default() -> Self {
        Intermediates {
            location: Intermediate::new("location"),
            workspace_resource_id: Intermediate::new("workspace_resource_id"),
            monitoring_addon_enabled: Intermediate::new("monitoring_addon_enabled"),
            ingress_appgw_addon_enabled: Intermediate::new("ingress_appgw_addon_enabled"),
            virtual_node_addon_enabled: Intermediate::new("virtual_node_addon_enabled"),
            need_post_creation_vnet_permission_granting: Intermediate::new(
                "need_post_creation_vnet_permission_granting",
            ),
            azure_container_storage_enabled: Intermediate::new("azure_container_storage_enabled"),
            container_storage_pool_type: Intermediate::new("container_storage_pool_type"),
        }
    }
}

pub struct AksContext<'a> {
    pub raw: RawParameters,
    pub settings: &'a AksSettings,
    pub arm: &'a ArmSettings,
    pub backend: &'a dyn AksBackend,
    pub prompter: &'a dyn Prompter,
    pub mode: DecoratorMode,
    pub caps: SchemaCapabilities,
    pub intermediates: Intermediates,
    subscription_id: String,
    mc: Option<ManagedCluster>,
    existing_mc: Option<ManagedCluster>,
}

impl<'a> AksContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        raw: RawParameters,
        settings: &'a AksSettings,
        arm: &'a ArmSettings,
        backend: &'a dyn AksBackend,
        prompter: &'a dyn Prompter,
        mode: DecoratorMode,
        subscription_id: impl Into<String>,
    ) -> crate::Result<Self> {
        let caps = settings.schema()?.capabilities();
        Ok(AksContext {
            raw,
            settings,
            arm,
            backend,
            prompter,
            mode,
            caps,
            intermediates: Intermediates::default(),
            subscription_id: subscription_id.into(),
            mc: None,
            existing_mc: None,
        })
    }

    /// Attach the cluster being assembled. Update mode also keeps an
    /// untouched copy for comparisons.
    pub fn attach_mc(&mut self, mc: ManagedCluster) -> crate::Result<()> {
        if self.mc.is_some() {
            return Err(AzCliError::Internal(
                "the same instance of mc cannot be attached more than once".to_string(),
            ));
        }
        if self.mode == DecoratorMode::Update {
            self.existing_mc = Some(mc.clone());
        }
        self.mc = Some(mc);
        Ok(())
    }

    pub fn mc(&self) -> Option<&ManagedCluster> {
        self.mc.as_ref()
    }

    pub fn mc_mut(&mut self) -> crate::Result<&mut ManagedCluster> {
        self.mc
            .as_mut()
            .ok_or_else(|| AzCliError::Internal("no managed cluster attached".to_string()))
    }

    pub fn take_mc(&mut self) -> crate::Result<ManagedCluster> {
        self.mc
            .take()
            .ok_or_else(|| AzCliError::Internal("no managed cluster attached".to_string()))
    }

    pub fn existing_mc(&self) -> Option<&ManagedCluster> {
        self.existing_mc.as_ref()
    }

    /// Value from the attached cluster, consulted in create mode only.
    fn from_mc<T>(&self, f: impl FnOnce(&ManagedCluster) -> Option<T>) -> Option<T> {
        match self.mode {
            DecoratorMode::Create => self.mc.as_ref().and_then(f),
            DecoratorMode::Update => None,
        }
    }

    pub fn require(&self, supported: bool, flag: &str, since: ApiVersion) -> crate::Result<()> {
        self.caps.require(supported, flag, since)
    }

    /// Both halves of an enable/disable pair may not be set together.
    fn exclusive_pair(&self, enable: &str, disable: &str) -> crate::Result<(bool, bool)> {
        let on = self.raw.get_bool(enable);
        let off = self.raw.get_bool(disable);
        if on && off {
            return Err(AzCliError::MutuallyExclusiveArgument(format!(
                "Cannot specify \"--{}\" and \"--{}\" at the same time.",
                enable.replace('_', "-"),
                disable.replace('_', "-")
            )));
        }
        Ok((on, off))
    }

    pub fn get_subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn get_resource_group_name(&self) -> String {
        self.raw.get_str("resource_group_name").unwrap_or_default()
    }

    pub fn get_name(&self) -> String {
        self.raw.get_str("name").unwrap_or_default()
    }

    /// ARM id of the cluster this command targets.
    pub fn cluster_resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerService/managedClusters/{}",
            self.subscription_id,
            self.get_resource_group_name(),
            self.get_name()
        )
    }

    pub fn location_value(&self) -> Option<String> {
        self.mc
            .as_ref()
            .and_then(|mc| mc.location.clone())
            .or_else(|| self.raw.get_str("location"))
            .or_else(|| self.intermediates.location.get().cloned())
    }

    /// Location, falling back to the resource group's location.
    pub async fn get_location(&mut self) -> crate::Result<String> {
        if let Some(location) = self.location_value() {
            return Ok(location);
        }
        let location = self
            .backend
            .resource_group_location(&self.get_resource_group_name())
            .await?;
        self.intermediates.location.set(location.clone(), true);
        Ok(location)
    }

    pub fn get_tags(&self) -> Option<StringMap> {
        self.from_mc(|mc| mc.tags.clone())
            .or_else(|| self.raw.get_str_map("tags"))
    }

    pub fn get_kubernetes_version(&self) -> Option<String> {
        self.from_mc(|mc| mc.properties.kubernetes_version.clone())
            .or_else(|| self.raw.get_str("kubernetes_version"))
            .filter(|v| !v.is_empty())
    }

    pub fn dns_name_prefix_value(&self) -> Option<String> {
        self.mc
            .as_ref()
            .and_then(|mc| mc.properties.dns_prefix.clone())
            .or_else(|| self.raw.get_str("dns_name_prefix"))
    }

    /// DNS prefix, derived from name, resource group and subscription when
    /// neither it nor `--fqdn-subdomain` was supplied.
    pub fn get_dns_name_prefix(&self) -> crate::Result<Option<String>> {
        let read_from_mc = self
            .mc
            .as_ref()
            .is_some_and(|mc| mc.properties.dns_prefix.is_some());
        let mut prefix = self.dns_name_prefix_value().filter(|p| !p.is_empty());
        let fqdn_subdomain = self.fqdn_subdomain_value();

        if prefix.is_none() && fqdn_subdomain.is_none() && !read_from_mc {
            prefix = Some(derive_dns_name_prefix(
                &self.get_name(),
                &self.get_resource_group_name(),
                &self.subscription_id,
            ));
        }

        if prefix.is_some() && fqdn_subdomain.is_some() {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "--dns-name-prefix and --fqdn-subdomain cannot be used at same time".to_string(),
            ));
        }
        Ok(prefix)
    }

    pub fn get_node_osdisk_diskencryptionset_id(&self) -> Option<String> {
        self.from_mc(|mc| mc.properties.disk_encryption_set_id.clone())
            .or_else(|| self.raw.get_str("node_osdisk_diskencryptionset_id"))
    }

    pub fn get_edge_zone(&self) -> Option<String> {
        self.from_mc(|mc| mc.extended_location.as_ref().map(|e| e.name.clone()))
            .or_else(|| self.raw.get_str("edge_zone"))
    }

    pub fn get_node_resource_group(&self) -> Option<String> {
        self.from_mc(|mc| mc.properties.node_resource_group.clone())
            .or_else(|| self.raw.get_str("node_resource_group"))
    }

    pub fn get_yes(&self) -> bool {
        self.raw.get_bool("yes")
    }

    pub fn get_no_wait(&self) -> bool {
        self.raw.get_bool("no_wait")
    }
}

/// `<name[..10]>-<rg[..16]>-<sub[..6]>`, letters, digits and hyphens only,
/// always starting with a letter.
pub fn derive_dns_name_prefix(name: &str, resource_group: &str, subscription_id: &str) -> String {
    let strip = |s: &str| -> String {
        match Regex::new("[^A-Za-z0-9-]") {
            Ok(re) => re.replace_all(s, "").into_owned(),
            Err(_) => s.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect(),
        }
    };
    let take = |s: &str, n: usize| -> String { s.chars().take(n).collect() };

    let mut name_part = take(&strip(name), 10);
    if !name_part.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        name_part = take(&format!("a{}", name_part), 10);
    }
    let rg_part = take(&strip(resource_group), 16);
    format!("{}-{}-{}", name_part, rg_part, take(subscription_id, 6))
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::Value;

    use super::*;
    use crate::aks::backend::fake::FakeBackend;
    use crate::prompt::scripted::ScriptedPrompter;

    /// Owned pieces an [`AksContext`] borrows from.
    pub struct Fixture {
        pub settings: AksSettings,
        pub arm: ArmSettings,
        pub backend: FakeBackend,
        pub prompter: ScriptedPrompter,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::with_answers(&[])
        }

        pub fn with_answers(answers: &[&str]) -> Self {
            Fixture {
                settings: AksSettings::default(),
                arm: ArmSettings::default(),
                backend: FakeBackend::default(),
                prompter: ScriptedPrompter::new(answers),
            }
        }

        pub fn context(&self, mode: DecoratorMode, params: Value) -> AksContext<'_> {
            let raw = match params {
                Value::Object(map) => RawParameters::new(map),
                _ => RawParameters::default(),
            };
            AksContext::new(
                raw,
                &self.settings,
                &self.arm,
                &self.backend,
                &self.prompter,
                mode,
                "abcdef01-2345-6789-abcd-ef0123456789",
            )
            .expect("valid settings")
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::Fixture;
    use super::*;

    #[test]
    fn test_attach_mc_twice_is_internal_error() {
        let fx = Fixture::new();
        let mut ctx = fx.context(DecoratorMode::Create, json!({}));
        ctx.attach_mc(ManagedCluster::default()).unwrap();
        let result = ctx.attach_mc(ManagedCluster::default());
        assert!(matches!(result, Err(AzCliError::Internal(_))));
    }

    #[test]
    fn test_update_mode_keeps_existing_copy() {
        let fx = Fixture::new();
        let mut ctx = fx.context(DecoratorMode::Update, json!({}));
        ctx.attach_mc(ManagedCluster::new(Some("eastus".into()))).unwrap();
        ctx.mc_mut().unwrap().location = Some("westus".into());
        assert_eq!(
            ctx.existing_mc().and_then(|mc| mc.location.as_deref()),
            Some("eastus")
        );
    }

    #[test]
    fn test_intermediate_keeps_value_without_overwrite() {
        let mut slot: Intermediate<String> = Intermediate::new("location");
        slot.set("eastus".into(), false);
        slot.set("westus".into(), false);
        assert_eq!(slot.get().map(String::as_str), Some("eastus"));
        slot.set("westus".into(), true);
        assert_eq!(slot.get_or(String::new()), "westus");
    }

    #[test]
    fn test_derive_dns_name_prefix() {
        let prefix = derive_dns_name_prefix("myCluster!", "rg_1", "abcdef01-2345");
        assert_eq!(prefix, "myCluster-rg1-abcdef");

        let numeric = derive_dns_name_prefix("1234567890123", "rg", "abcdef01");
        assert_eq!(numeric, "a123456789-rg-abcdef");
        assert!(numeric.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn test_dns_prefix_completion_and_conflict() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"name": "myCluster!", "resource_group_name": "rg_1"}),
        );
        assert_eq!(
            ctx.get_dns_name_prefix().unwrap().as_deref(),
            Some("myCluster-rg1-abcdef")
        );

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"name": "c", "dns_name_prefix": "p", "fqdn_subdomain": "f"}),
        );
        assert!(matches!(
            ctx.get_dns_name_prefix(),
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));

        // fqdn_subdomain alone suppresses completion
        let ctx = fx.context(DecoratorMode::Create, json!({"name": "c", "fqdn_subdomain": "f"}));
        assert_eq!(ctx.get_dns_name_prefix().unwrap(), None);
    }

    #[tokio::test]
    async fn test_location_completes_from_resource_group() {
        let fx = Fixture::new();
        let mut ctx = fx.context(DecoratorMode::Create, json!({"resource_group_name": "rg"}));
        assert_eq!(ctx.get_location().await.unwrap(), "eastus");
        assert_eq!(
            ctx.intermediates.location.get().map(String::as_str),
            Some("eastus")
        );

        let mut ctx = fx.context(DecoratorMode::Create, json!({"location": "westeurope"}));
        assert_eq!(ctx.get_location().await.unwrap(), "westeurope");
    }

    #[test]
    fn test_create_mode_prefers_mc_tags() {
        let fx = Fixture::new();
        let mut ctx = fx.context(DecoratorMode::Create, json!({"tags": {"a": "raw"}}));
        assert_eq!(ctx.get_tags().and_then(|t| t.get("a").cloned()).as_deref(), Some("raw"));

        let mut mc = ManagedCluster::default();
        mc.tags = Some(StringMap::from([("a".to_string(), "mc".to_string())]));
        ctx.attach_mc(mc).unwrap();
        assert_eq!(ctx.get_tags().and_then(|t| t.get("a").cloned()).as_deref(), Some("mc"));
    }
}
