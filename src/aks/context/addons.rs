//! `--enable-addons` and the per-addon options.

use std::collections::{BTreeMap, BTreeSet};

use super::{AksContext, DecoratorMode};
use crate::aks::consts::{
    ACC_SGX_QUOTE_HELPER_ENABLED, ADDONS, AZURE_KEYVAULT_SECRETS_PROVIDER_ADDON_NAME,
    CONFCOM_ADDON_NAME, INGRESS_APPGW_ADDON_NAME, INGRESS_APPGW_APPLICATION_GATEWAY_ID,
    INGRESS_APPGW_APPLICATION_GATEWAY_NAME, INGRESS_APPGW_SUBNET_CIDR, INGRESS_APPGW_SUBNET_ID,
    INGRESS_APPGW_WATCH_NAMESPACE, MONITORING_ADDON_NAME,
    MONITORING_LOG_ANALYTICS_WORKSPACE_RESOURCE_ID, MONITORING_USING_AAD_MSI_AUTH,
    ROTATION_POLL_INTERVAL, SECRET_ROTATION_ENABLED, VIRTUAL_NODE_ADDON_NAME,
    VIRTUAL_NODE_SUBNET_NAME, addon_key,
};
use crate::aks::models::{AddonProfile, StringMap};
use crate::error::AzCliError;

const DEFAULT_ROTATION_POLL_INTERVAL: &str = "2m";

/// Virtual node addons are keyed by OS; only Linux is offered.
pub fn virtual_node_addon_key() -> String {
    format!("{}Linux", VIRTUAL_NODE_ADDON_NAME)
}

/// Everything the addon step needs, resolved and validated up front.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddonSettings {
    pub addons: Vec<String>,
    pub workspace_resource_id: Option<String>,
    pub enable_msi_auth_for_monitoring: bool,
    pub aci_subnet_name: Option<String>,
    pub appgw_config: StringMap,
    pub enable_sgxquotehelper: bool,
    pub enable_secret_rotation: bool,
    pub rotation_poll_interval: Option<String>,
}

impl AddonSettings {
    pub fn contains(&self, short_name: &str) -> bool {
        self.addons.iter().any(|a| a == short_name)
    }

    /// `addonProfiles` for a new cluster.
    pub fn build_profiles(&self) -> BTreeMap<String, AddonProfile> {
        let mut profiles = BTreeMap::new();
        for short_name in &self.addons {
            let Some(key) = addon_key(short_name) else {
                continue;
            };
            let (key, config) = match key {
                MONITORING_ADDON_NAME => {
                    let mut config = StringMap::new();
                    if let Some(id) = &self.workspace_resource_id {
                        config.insert(MONITORING_LOG_ANALYTICS_WORKSPACE_RESOURCE_ID.to_string(), id.clone());
                    }
                    let msi = if self.enable_msi_auth_for_monitoring { "True" } else { "False" };
                    config.insert(MONITORING_USING_AAD_MSI_AUTH.to_string(), msi.to_string());
                    (key.to_string(), config)
                }
                VIRTUAL_NODE_ADDON_NAME => {
                    let mut config = StringMap::new();
                    if let Some(subnet) = &self.aci_subnet_name {
                        config.insert(VIRTUAL_NODE_SUBNET_NAME.to_string(), subnet.clone());
                    }
                    (virtual_node_addon_key(), config)
                }
                INGRESS_APPGW_ADDON_NAME => (key.to_string(), self.appgw_config.clone()),
                CONFCOM_ADDON_NAME => {
                    let enabled = if self.enable_sgxquotehelper { "true" } else { "false" };
                    (
                        key.to_string(),
                        StringMap::from([(ACC_SGX_QUOTE_HELPER_ENABLED.to_string(), enabled.to_string())]),
                    )
                }
                AZURE_KEYVAULT_SECRETS_PROVIDER_ADDON_NAME => {
                    let rotation = if self.enable_secret_rotation { "true" } else { "false" };
                    let interval = self
                        .rotation_poll_interval
                        .clone()
                        .unwrap_or_else(|| DEFAULT_ROTATION_POLL_INTERVAL.to_string());
                    (
                        key.to_string(),
                        StringMap::from([
                            (SECRET_ROTATION_ENABLED.to_string(), rotation.to_string()),
                            (ROTATION_POLL_INTERVAL.to_string(), interval),
                        ]),
                    )
                }
                _ => (key.to_string(), StringMap::new()),
            };
            let profile = if config.is_empty() && key != INGRESS_APPGW_ADDON_NAME {
                AddonProfile {
                    enabled: true,
                    config: None,
                    identity: None,
                }
            } else {
                AddonProfile::enabled(config)
            };
            profiles.insert(key, profile);
        }
        profiles
    }
}

impl AksContext<'_> {
    fn addon_config(&self, addon: &str, config_key: &str) -> Option<String> {
        self.mc()
            .and_then(|mc| mc.addon(addon))
            .and_then(|p| p.config_value(config_key))
            .map(str::to_string)
    }

    fn keyvault_secrets_provider_enabled(&self) -> bool {
        self.mc()
            .is_some_and(|mc| mc.is_addon_enabled(AZURE_KEYVAULT_SECRETS_PROVIDER_ADDON_NAME))
    }

    pub fn enable_addons_value(&self) -> Vec<String> {
        self.raw
            .get_str("enable_addons")
            .filter(|s| !s.is_empty())
            .map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn get_enable_addons(&self) -> crate::Result<Vec<String>> {
        let addons = self.enable_addons_value();

        let mut seen = BTreeSet::new();
        let duplicates: BTreeSet<&str> = addons
            .iter()
            .filter(|a| !seen.insert(a.as_str()))
            .map(String::as_str)
            .collect();
        if !duplicates.is_empty() {
            return Err(AzCliError::InvalidArgumentValue(format!(
                "Duplicate addon{} '{}' found in option --enable-addons.",
                if duplicates.len() > 1 { "s" } else { "" },
                duplicates.into_iter().collect::<Vec<_>>().join(",")
            )));
        }

        let invalid: Vec<&str> = addons
            .iter()
            .map(String::as_str)
            .filter(|a| !ADDONS.iter().any(|(name, _)| name == a))
            .collect();
        if !invalid.is_empty() {
            return Err(AzCliError::InvalidArgumentValue(format!(
                "'{}' {} not recognized by the --enable-addons argument.",
                invalid.join(","),
                if invalid.len() > 1 { "are" } else { "is" }
            )));
        }

        let has = |name: &str| addons.iter().any(|a| a == name);
        if !has("monitoring") && self.workspace_resource_id_value().is_some() {
            return Err(AzCliError::RequiredArgumentMissing(
                "\"--workspace-resource-id\" requires \"--enable-addons monitoring\".".to_string(),
            ));
        }
        if has("virtual-node")
            && (self.get_aci_subnet_name().is_none() || self.get_vnet_subnet_id().is_none())
        {
            return Err(AzCliError::RequiredArgumentMissing(
                "\"--enable-addons virtual-node\" requires \"--aci-subnet-name\" and \"--vnet-subnet-id\"."
                    .to_string(),
            ));
        }
        Ok(addons)
    }

    pub fn workspace_resource_id_value(&self) -> Option<String> {
        self.addon_config(MONITORING_ADDON_NAME, MONITORING_LOG_ANALYTICS_WORKSPACE_RESOURCE_ID)
            .or_else(|| self.raw_str("workspace_resource_id"))
    }

    /// Log Analytics workspace for monitoring, falling back to the
    /// subscription's default workspace in the cluster's region.
    pub async fn get_workspace_resource_id(&mut self) -> crate::Result<String> {
        let from_mc =
            self.addon_config(MONITORING_ADDON_NAME, MONITORING_LOG_ANALYTICS_WORKSPACE_RESOURCE_ID);
        let workspace = match from_mc {
            Some(id) => id,
            None => {
                let id = match self.raw_str("workspace_resource_id") {
                    Some(id) => id,
                    None => {
                        let location = self.get_location().await?;
                        self.backend.default_log_analytics_workspace(&location).await?
                    }
                };
                format!("/{}", id.trim_matches(|c| c == ' ' || c == '/'))
            }
        };
        if !self.enable_addons_value().iter().any(|a| a == "monitoring") {
            return Err(AzCliError::RequiredArgumentMissing(
                "\"--workspace-resource-id\" requires \"--enable-addons monitoring\".".to_string(),
            ));
        }
        self.intermediates
            .workspace_resource_id
            .set(workspace.clone(), true);
        Ok(workspace)
    }

    pub fn get_enable_msi_auth_for_monitoring(&self) -> bool {
        self.addon_config(MONITORING_ADDON_NAME, MONITORING_USING_AAD_MSI_AUTH)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or_else(|| self.raw.get_bool("enable_msi_auth_for_monitoring"))
    }

    pub fn get_aci_subnet_name(&self) -> Option<String> {
        self.addon_config(&virtual_node_addon_key(), VIRTUAL_NODE_SUBNET_NAME)
            .or_else(|| self.raw_str("aci_subnet_name"))
    }

    /// Application gateway ingress options, as addon config entries.
    pub fn get_appgw_config(&self) -> StringMap {
        [
            ("appgw_name", INGRESS_APPGW_APPLICATION_GATEWAY_NAME),
            ("appgw_subnet_cidr", INGRESS_APPGW_SUBNET_CIDR),
            ("appgw_id", INGRESS_APPGW_APPLICATION_GATEWAY_ID),
            ("appgw_subnet_id", INGRESS_APPGW_SUBNET_ID),
            ("appgw_watch_namespace", INGRESS_APPGW_WATCH_NAMESPACE),
        ]
        .into_iter()
        .filter_map(|(flag, key)| {
            self.addon_config(INGRESS_APPGW_ADDON_NAME, key)
                .or_else(|| self.raw_str(flag))
                .map(|v| (key.to_string(), v))
        })
        .collect()
    }

    pub fn get_enable_sgxquotehelper(&self) -> bool {
        self.addon_config(CONFCOM_ADDON_NAME, ACC_SGX_QUOTE_HELPER_ENABLED)
            .map(|v| v == "true")
            .unwrap_or_else(|| self.raw.get_bool("enable_sgxquotehelper"))
    }

    fn require_keyvault_secrets_provider(&self, flag: &str) -> crate::Result<()> {
        if self.mode == DecoratorMode::Update && !self.keyvault_secrets_provider_enabled() {
            return Err(AzCliError::InvalidArgumentValue(format!(
                "{} can only be specified when azure-keyvault-secrets-provider is enabled",
                flag
            )));
        }
        Ok(())
    }

    pub fn get_enable_secret_rotation(&self) -> crate::Result<bool> {
        let enabled = self
            .from_mc(|mc| {
                mc.addon(AZURE_KEYVAULT_SECRETS_PROVIDER_ADDON_NAME)
                    .and_then(|p| p.config_value(SECRET_ROTATION_ENABLED))
                    .map(|v| v == "true")
            })
            .unwrap_or_else(|| self.raw.get_bool("enable_secret_rotation"));
        if enabled {
            self.require_keyvault_secrets_provider("--enable-secret-rotation")?;
        }
        Ok(enabled)
    }

    pub fn get_disable_secret_rotation(&self) -> crate::Result<bool> {
        let disabled = self.raw.get_bool("disable_secret_rotation");
        if disabled {
            self.require_keyvault_secrets_provider("--disable-secret-rotation")?;
        }
        Ok(disabled)
    }

    pub fn get_rotation_poll_interval(&self) -> crate::Result<Option<String>> {
        let interval = self
            .from_mc(|mc| {
                mc.addon(AZURE_KEYVAULT_SECRETS_PROVIDER_ADDON_NAME)
                    .and_then(|p| p.config_value(ROTATION_POLL_INTERVAL))
                    .map(str::to_string)
            })
            .or_else(|| self.raw_str("rotation_poll_interval"));
        if interval.is_some() {
            self.require_keyvault_secrets_provider("--rotation-poll-interval")?;
        }
        Ok(interval)
    }

    /// Resolve every addon option. The monitoring workspace is looked up
    /// only when monitoring is requested.
    pub async fn get_addon_settings(&mut self) -> crate::Result<AddonSettings> {
        let addons = self.get_enable_addons()?;
        let monitoring = addons.iter().any(|a| a == "monitoring");
        let workspace_resource_id = if monitoring {
            Some(self.get_workspace_resource_id().await?)
        } else {
            None
        };
        Ok(AddonSettings {
            workspace_resource_id,
            enable_msi_auth_for_monitoring: self.get_enable_msi_auth_for_monitoring(),
            aci_subnet_name: self.get_aci_subnet_name(),
            appgw_config: self.get_appgw_config(),
            enable_sgxquotehelper: self.get_enable_sgxquotehelper(),
            enable_secret_rotation: self.get_enable_secret_rotation()?,
            rotation_poll_interval: self.get_rotation_poll_interval()?,
            addons,
        })
    }
}
