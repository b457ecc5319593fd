//! AAD, RBAC, API server access, SKU tier and upgrade settings.

use regex::Regex;

use super::{AksContext, DecoratorMode};
use crate::aks::consts::{
    AUTOSCALER_PROFILE_KEYS, LOAD_BALANCER_SKU_BASIC, PRIVATE_DNS_ZONE_NONE,
    PRIVATE_DNS_ZONE_SYSTEM, SKU_TIER_FREE, SKU_TIER_PAID, SKU_TIER_PREMIUM, SKU_TIER_STANDARD,
};
use crate::aks::models::{AadProfile, StringMap};
use crate::aks::schema::ApiVersion;
use crate::error::AzCliError;

const AAD_APP_CONFLICT: &str = "--enable-aad cannot be used together with --aad-client-app-id, \
                                --aad-server-app-id or --aad-server-app-secret";
const PRIVATE_CLUSTER_RANGES: &str =
    "--api-server-authorized-ip-ranges is not supported for private cluster";
pub(super) const LOCAL_ACCOUNTS_CONFLICT: &str =
    "Cannot specify --disable-local-accounts and --enable-local-accounts at the same time.";
pub(super) const AZURE_RBAC_CONFLICT: &str =
    "Cannot specify \"--enable-azure-rbac\" and \"--disable-azure-rbac\" at the same time";
pub(super) const PUBLIC_FQDN_CONFLICT: &str =
    "Cannot specify '--enable-public-fqdn' and '--disable-public-fqdn' at the same time";

/// `/subscriptions/<id>/resourceGroups/<rg>/providers/<ns>/<type>/<name>...`
pub fn is_valid_resource_id(id: &str) -> bool {
    Regex::new(r"(?i)^/subscriptions/[^/]+/resourcegroups/[^/]+/providers/[^/]+/[^/]+/[^/]+")
        .map(|re| re.is_match(id))
        .unwrap_or(false)
}

fn split_csv(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(',').map(|s| s.trim().to_string()).collect()
}

/// Normalise `free|standard|premium` (any case) to the wire spelling.
fn normalize_tier(tier: &str) -> crate::Result<String> {
    [SKU_TIER_FREE, SKU_TIER_STANDARD, SKU_TIER_PREMIUM]
        .iter()
        .find(|t| t.eq_ignore_ascii_case(tier))
        .map(|t| t.to_string())
        .ok_or_else(|| {
            AzCliError::InvalidArgumentValue(format!(
                "Invalid tier '{}', expected one of free, standard, premium",
                tier
            ))
        })
}

impl AksContext<'_> {
    fn aad_profile_value(&self) -> Option<&AadProfile> {
        self.mc().and_then(|mc| mc.properties.aad_profile.as_ref())
    }

    fn existing_managed_aad(&self) -> bool {
        self.aad_profile_value()
            .and_then(|p| p.managed)
            .unwrap_or(false)
    }

    pub fn enable_aad_value(&self) -> bool {
        self.from_mc(|mc| mc.properties.aad_profile.as_ref().and_then(|p| p.managed))
            .unwrap_or_else(|| self.raw.get_bool("enable_aad"))
    }

    pub fn get_enable_aad(&self) -> crate::Result<bool> {
        let enable_aad = self.enable_aad_value();
        match self.mode {
            DecoratorMode::Create => {
                let (client, server, secret) = self.aad_app_values();
                if enable_aad && (client.is_some() || server.is_some() || secret.is_some()) {
                    return Err(AzCliError::MutuallyExclusiveArgument(
                        AAD_APP_CONFLICT.to_string(),
                    ));
                }
                if !enable_aad && self.enable_azure_rbac_value() {
                    return Err(AzCliError::RequiredArgumentMissing(
                        "--enable-azure-rbac can only be used together with --enable-aad".to_string(),
                    ));
                }
            }
            DecoratorMode::Update => {
                if enable_aad && self.existing_managed_aad() {
                    return Err(AzCliError::InvalidArgumentValue(
                        "Cannot specify \"--enable-aad\" if managed AAD is already enabled".to_string(),
                    ));
                }
            }
        }
        Ok(enable_aad)
    }

    fn aad_app_values(&self) -> (Option<String>, Option<String>, Option<String>) {
        let profile = self.aad_profile_value();
        (
            profile
                .and_then(|p| p.client_app_id.clone())
                .or_else(|| self.raw_str("aad_client_app_id")),
            profile
                .and_then(|p| p.server_app_id.clone())
                .or_else(|| self.raw_str("aad_server_app_id")),
            profile
                .and_then(|p| p.server_app_secret.clone())
                .or_else(|| self.raw_str("aad_server_app_secret")),
        )
    }

    /// Legacy AAD integration app ids.
    pub fn get_aad_client_app_id_and_aad_server_app_id_and_aad_server_app_secret(
        &self,
    ) -> crate::Result<(Option<String>, Option<String>, Option<String>)> {
        let apps = self.aad_app_values();
        if self.enable_aad_value() && (apps.0.is_some() || apps.1.is_some() || apps.2.is_some()) {
            return Err(AzCliError::MutuallyExclusiveArgument(
                AAD_APP_CONFLICT.to_string(),
            ));
        }
        Ok(apps)
    }

    /// Tenant id; legacy AAD apps without one use the login tenant.
    pub fn get_aad_tenant_id(&self) -> crate::Result<Option<String>> {
        let from_mc = self.from_mc(|mc| {
            mc.properties
                .aad_profile
                .as_ref()
                .and_then(|p| p.tenant_id.clone())
        });
        let read_from_mc = from_mc.is_some();
        let mut tenant_id = from_mc.or_else(|| self.raw_str("aad_tenant_id"));

        if self.mode == DecoratorMode::Create && !read_from_mc && !self.enable_aad_value() {
            let (client, server, secret) = self.aad_app_values();
            if tenant_id.is_none() && (client.is_some() || server.is_some() || secret.is_some()) {
                tenant_id = self.arm.tenant_id.clone().filter(|t| !t.is_empty());
            }
        }

        if tenant_id.is_some() && self.mode == DecoratorMode::Update && !self.existing_managed_aad()
        {
            return Err(AzCliError::InvalidArgumentValue(
                "Cannot specify \"--aad-tenant-id\" if managed AAD is not enabled".to_string(),
            ));
        }
        Ok(tenant_id)
    }

    pub fn get_aad_admin_group_object_ids(&self) -> crate::Result<Option<Vec<String>>> {
        let ids = self
            .from_mc(|mc| {
                mc.properties
                    .aad_profile
                    .as_ref()
                    .and_then(|p| p.admin_group_object_ids.clone())
            })
            .or_else(|| {
                self.raw
                    .get_str("aad_admin_group_object_ids")
                    .map(|v| split_csv(&v))
            });
        if ids.as_ref().is_some_and(|v| !v.is_empty())
            && self.mode == DecoratorMode::Update
            && !self.existing_managed_aad()
        {
            return Err(AzCliError::InvalidArgumentValue(
                "Cannot specify \"--aad-admin-group-object-ids\" if managed AAD is not enabled"
                    .to_string(),
            ));
        }
        Ok(ids)
    }

    fn disable_rbac_value(&self) -> bool {
        self.mc()
            .and_then(|mc| mc.properties.enable_rbac)
            .map(|enabled| !enabled)
            .unwrap_or_else(|| self.raw.get_bool("disable_rbac"))
    }

    fn enable_rbac_value(&self) -> bool {
        self.mc()
            .and_then(|mc| mc.properties.enable_rbac)
            .unwrap_or_else(|| self.raw.get_bool("enable_rbac"))
    }

    pub fn get_disable_rbac(&self) -> crate::Result<bool> {
        let disable = self.disable_rbac_value();
        if disable && self.enable_azure_rbac_value() {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "--enable-azure-rbac cannot be used together with --disable-rbac".to_string(),
            ));
        }
        if disable && self.enable_rbac_value() {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "specify either '--disable-rbac' or '--enable-rbac', not both.".to_string(),
            ));
        }
        Ok(disable)
    }

    pub fn get_enable_rbac(&self) -> crate::Result<bool> {
        let enable = self.enable_rbac_value();
        if enable && self.disable_rbac_value() {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "specify either '--disable-rbac' or '--enable-rbac', not both.".to_string(),
            ));
        }
        Ok(enable)
    }

    fn enable_azure_rbac_value(&self) -> bool {
        self.from_mc(|mc| {
            mc.properties
                .aad_profile
                .as_ref()
                .and_then(|p| p.enable_azure_rbac)
        })
        .unwrap_or_else(|| self.raw.get_bool("enable_azure_rbac"))
    }

    pub fn get_enable_azure_rbac(&self) -> crate::Result<bool> {
        let enable = self.enable_azure_rbac_value();
        if !enable {
            return Ok(false);
        }
        match self.mode {
            DecoratorMode::Create => {
                if !self.enable_aad_value() {
                    return Err(AzCliError::RequiredArgumentMissing(
                        "--enable-azure-rbac can only be used together with --enable-aad".to_string(),
                    ));
                }
                if self.disable_rbac_value() {
                    return Err(AzCliError::MutuallyExclusiveArgument(
                        "--enable-azure-rbac cannot be used together with --disable-rbac".to_string(),
                    ));
                }
            }
            DecoratorMode::Update => {
                if !self.existing_managed_aad() {
                    return Err(AzCliError::InvalidArgumentValue(
                        "Cannot specify \"--enable-azure-rbac\" if managed AAD is not enabled"
                            .to_string(),
                    ));
                }
                if self.raw.get_bool("disable_azure_rbac") {
                    return Err(AzCliError::MutuallyExclusiveArgument(AZURE_RBAC_CONFLICT.to_string()));
                }
            }
        }
        Ok(true)
    }

    pub fn get_disable_azure_rbac(&self) -> crate::Result<bool> {
        let disable = self.raw.get_bool("disable_azure_rbac");
        if disable && self.mode == DecoratorMode::Update {
            if !self.existing_managed_aad() {
                return Err(AzCliError::InvalidArgumentValue(
                    "Cannot specify \"--disable-azure-rbac\" if managed AAD is not enabled".to_string(),
                ));
            }
            if self.enable_azure_rbac_value() {
                return Err(AzCliError::MutuallyExclusiveArgument(AZURE_RBAC_CONFLICT.to_string()));
            }
        }
        Ok(disable)
    }

    /// Authorized ranges. Create mode always yields a list; update mode
    /// yields `None` when the flag was not given and `Some([])` to clear.
    pub fn api_server_authorized_ip_ranges_value(&self) -> Option<Vec<String>> {
        let raw = self.raw.get_str("api_server_authorized_ip_ranges");
        match self.mode {
            DecoratorMode::Create => Some(
                self.from_mc(|mc| {
                    mc.properties
                        .api_server_access_profile
                        .as_ref()
                        .and_then(|p| p.authorized_ip_ranges.clone())
                })
                .unwrap_or_else(|| raw.map(|r| split_csv(&r)).unwrap_or_default()),
            ),
            DecoratorMode::Update => raw.map(|r| split_csv(&r)),
        }
    }

    pub fn get_api_server_authorized_ip_ranges(&self) -> crate::Result<Option<Vec<String>>> {
        let ranges = self.api_server_authorized_ip_ranges_value();
        if ranges.as_ref().is_some_and(|r| !r.is_empty()) {
            match self.mode {
                DecoratorMode::Create => {
                    if self.load_balancer_sku_value() == LOAD_BALANCER_SKU_BASIC {
                        return Err(AzCliError::InvalidArgumentValue(
                            "--api-server-authorized-ip-ranges can only be used with standard load balancer"
                                .to_string(),
                        ));
                    }
                    if self.enable_private_cluster_value() {
                        return Err(AzCliError::MutuallyExclusiveArgument(
                            PRIVATE_CLUSTER_RANGES.to_string(),
                        ));
                    }
                }
                DecoratorMode::Update => {
                    if self.mc().is_some_and(|mc| mc.is_private_cluster()) {
                        return Err(AzCliError::MutuallyExclusiveArgument(
                            PRIVATE_CLUSTER_RANGES.to_string(),
                        ));
                    }
                }
            }
        }
        Ok(ranges)
    }

    pub fn fqdn_subdomain_value(&self) -> Option<String> {
        self.mc()
            .and_then(|mc| mc.properties.fqdn_subdomain.clone())
            .or_else(|| self.raw_str("fqdn_subdomain"))
    }

    pub fn get_fqdn_subdomain(&self) -> crate::Result<Option<String>> {
        let subdomain = self.fqdn_subdomain_value();
        if subdomain.is_some() {
            if self.dns_name_prefix_value().is_some_and(|p| !p.is_empty()) {
                return Err(AzCliError::MutuallyExclusiveArgument(
                    "--dns-name-prefix and --fqdn-subdomain cannot be used at same time".to_string(),
                ));
            }
            if let Some(zone) = self.private_dns_zone_value() {
                if zone.eq_ignore_ascii_case(PRIVATE_DNS_ZONE_SYSTEM) {
                    return Err(AzCliError::InvalidArgumentValue(
                        "--fqdn-subdomain should only be used for private cluster with custom private dns zone"
                            .to_string(),
                    ));
                }
                if !is_valid_resource_id(&zone) {
                    return Err(AzCliError::InvalidArgumentValue(format!(
                        "{} is not a valid Azure resource ID.",
                        zone
                    )));
                }
            }
        }
        Ok(subdomain)
    }

    pub fn enable_private_cluster_value(&self) -> bool {
        self.from_mc(|mc| {
            mc.properties
                .api_server_access_profile
                .as_ref()
                .and_then(|p| p.enable_private_cluster)
        })
        .unwrap_or_else(|| self.raw.get_bool("enable_private_cluster"))
    }

    pub fn get_enable_private_cluster(&self) -> crate::Result<bool> {
        let enabled = self.enable_private_cluster_value();
        let has_ranges = self
            .api_server_authorized_ip_ranges_value()
            .is_some_and(|r| !r.is_empty());
        match self.mode {
            DecoratorMode::Create => {
                if enabled {
                    if self.load_balancer_sku_value() == LOAD_BALANCER_SKU_BASIC {
                        return Err(AzCliError::InvalidArgumentValue(
                            "Please use standard load balancer for private cluster".to_string(),
                        ));
                    }
                    if has_ranges {
                        return Err(AzCliError::MutuallyExclusiveArgument(
                            PRIVATE_CLUSTER_RANGES.to_string(),
                        ));
                    }
                } else {
                    if self.disable_public_fqdn_value() {
                        return Err(AzCliError::InvalidArgumentValue(
                            "--disable-public-fqdn should only be used with --enable-private-cluster"
                                .to_string(),
                        ));
                    }
                    if self.private_dns_zone_value().is_some() {
                        return Err(AzCliError::InvalidArgumentValue(
                            "Invalid private dns zone for public cluster. It should always be empty for public cluster"
                                .to_string(),
                        ));
                    }
                }
            }
            DecoratorMode::Update => {
                if self.mc().is_some_and(|mc| mc.is_private_cluster()) {
                    if has_ranges {
                        return Err(AzCliError::MutuallyExclusiveArgument(
                            PRIVATE_CLUSTER_RANGES.to_string(),
                        ));
                    }
                } else {
                    if self.disable_public_fqdn_value() {
                        return Err(AzCliError::InvalidArgumentValue(
                            "--disable-public-fqdn can only be used for private cluster".to_string(),
                        ));
                    }
                    if self.raw.get_bool("enable_public_fqdn") {
                        return Err(AzCliError::InvalidArgumentValue(
                            "--enable-public-fqdn can only be used for private cluster".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(enabled)
    }

    pub fn disable_public_fqdn_value(&self) -> bool {
        self.from_mc(|mc| {
            mc.properties
                .api_server_access_profile
                .as_ref()
                .and_then(|p| p.enable_private_cluster_public_fqdn)
                .map(|public| !public)
        })
        .unwrap_or_else(|| self.raw.get_bool("disable_public_fqdn"))
    }

    pub fn get_disable_public_fqdn(&self) -> crate::Result<bool> {
        let disable = self.disable_public_fqdn_value();
        if !disable {
            return Ok(false);
        }
        match self.mode {
            DecoratorMode::Create => {
                if !self.enable_private_cluster_value() {
                    return Err(AzCliError::InvalidArgumentValue(
                        "--disable-public-fqdn should only be used with --enable-private-cluster"
                            .to_string(),
                    ));
                }
            }
            DecoratorMode::Update => {
                if self.raw.get_bool("enable_public_fqdn") {
                    return Err(AzCliError::MutuallyExclusiveArgument(PUBLIC_FQDN_CONFLICT.to_string()));
                }
                if self
                    .private_dns_zone_value()
                    .is_some_and(|z| z.eq_ignore_ascii_case(PRIVATE_DNS_ZONE_NONE))
                {
                    return Err(AzCliError::InvalidArgumentValue(
                        "--disable-public-fqdn cannot be applied for none mode private dns zone cluster"
                            .to_string(),
                    ));
                }
                if !self.mc().is_some_and(|mc| mc.is_private_cluster()) {
                    return Err(AzCliError::InvalidArgumentValue(
                        "--disable-public-fqdn can only be used for private cluster".to_string(),
                    ));
                }
            }
        }
        Ok(true)
    }

    pub fn get_enable_public_fqdn(&self) -> crate::Result<bool> {
        let enable = self.raw.get_bool("enable_public_fqdn");
        if enable && self.mode == DecoratorMode::Update {
            if self.disable_public_fqdn_value() {
                return Err(AzCliError::MutuallyExclusiveArgument(PUBLIC_FQDN_CONFLICT.to_string()));
            }
            if !self.mc().is_some_and(|mc| mc.is_private_cluster()) {
                return Err(AzCliError::InvalidArgumentValue(
                    "--enable-public-fqdn can only be used for private cluster".to_string(),
                ));
            }
        }
        Ok(enable)
    }

    pub fn private_dns_zone_value(&self) -> Option<String> {
        self.mc()
            .and_then(|mc| mc.properties.api_server_access_profile.as_ref())
            .and_then(|p| p.private_dns_zone.clone())
            .or_else(|| self.raw_str("private_dns_zone"))
    }

    pub fn get_private_dns_zone(&self) -> crate::Result<Option<String>> {
        let zone = self.private_dns_zone_value();
        match self.mode {
            DecoratorMode::Create => {
                if let Some(zone) = &zone {
                    if !self.enable_private_cluster_value() {
                        return Err(AzCliError::InvalidArgumentValue(
                            "Invalid private dns zone for public cluster. It should always be empty for public cluster"
                                .to_string(),
                        ));
                    }
                    let lower = zone.to_lowercase();
                    if lower != PRIVATE_DNS_ZONE_SYSTEM && lower != PRIVATE_DNS_ZONE_NONE {
                        if !is_valid_resource_id(zone) {
                            return Err(AzCliError::InvalidArgumentValue(format!(
                                "{} is not a valid Azure resource ID.",
                                zone
                            )));
                        }
                    } else if self.fqdn_subdomain_value().is_some() {
                        return Err(AzCliError::InvalidArgumentValue(
                            "--fqdn-subdomain should only be used for private cluster with custom private dns zone"
                                .to_string(),
                        ));
                    }
                }
            }
            DecoratorMode::Update => {
                if zone.as_deref() == Some(PRIVATE_DNS_ZONE_NONE) && self.disable_public_fqdn_value() {
                    return Err(AzCliError::InvalidArgumentValue(
                        "--disable-public-fqdn cannot be applied for none mode private dns zone cluster"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(zone)
    }

    pub fn get_auto_upgrade_channel(&self) -> Option<String> {
        self.from_mc(|mc| {
            mc.properties
                .auto_upgrade_profile
                .as_ref()
                .and_then(|p| p.upgrade_channel.clone())
        })
        .or_else(|| self.raw_str("auto_upgrade_channel"))
    }

    pub fn get_node_os_upgrade_channel(&self) -> crate::Result<Option<String>> {
        let channel = self
            .from_mc(|mc| {
                mc.properties
                    .auto_upgrade_profile
                    .as_ref()
                    .and_then(|p| p.node_os_upgrade_channel.clone())
            })
            .or_else(|| self.raw_str("node_os_upgrade_channel"));
        if channel.is_some() {
            self.require(
                self.caps.node_os_upgrade_channel,
                "--node-os-upgrade-channel",
                ApiVersion::V2023_08_01,
            )?;
        }
        Ok(channel)
    }

    /// Parse `--cluster-autoscaler-profile`, given either as a map or as
    /// `key=value` items (each possibly comma separated).
    fn parse_cluster_autoscaler_profile(&self) -> crate::Result<Option<StringMap>> {
        let Some(value) = self.raw.get_value("cluster_autoscaler_profile") else {
            return Ok(None);
        };
        let profile: StringMap = match value {
            serde_json::Value::Object(_) => self
                .raw
                .get_str_map("cluster_autoscaler_profile")
                .unwrap_or_default(),
            serde_json::Value::Array(items) => {
                let mut profile = StringMap::new();
                for item in items.iter().filter_map(|v| v.as_str()) {
                    for pair in item.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                        profile.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
                profile
            }
            other => {
                return Err(AzCliError::InvalidArgumentValue(format!(
                    "Unexpected input cluster-autoscaler-profile, value: '{}'.",
                    other
                )));
            }
        };
        for key in profile.keys() {
            if key.is_empty() {
                return Err(AzCliError::InvalidArgumentValue(
                    "Empty key specified for cluster-autoscaler-profile".to_string(),
                ));
            }
            if !AUTOSCALER_PROFILE_KEYS.contains(&key.as_str()) {
                return Err(AzCliError::InvalidArgumentValue(format!(
                    "'{}' is an invalid key for cluster-autoscaler-profile. Valid keys are {}.",
                    key,
                    AUTOSCALER_PROFILE_KEYS.join(", ")
                )));
            }
        }
        Ok(Some(profile))
    }

    /// Autoscaler profile. On update, given keys are merged over the
    /// cluster's current profile.
    pub fn get_cluster_autoscaler_profile(&self) -> crate::Result<Option<StringMap>> {
        let parsed = self.parse_cluster_autoscaler_profile()?;
        match self.mode {
            DecoratorMode::Create => Ok(self
                .from_mc(|mc| mc.properties.auto_scaler_profile.clone())
                .or(parsed)),
            DecoratorMode::Update => {
                let existing = self.mc().and_then(|mc| mc.properties.auto_scaler_profile.clone());
                match (parsed, existing) {
                    (Some(new), Some(mut merged)) if !new.is_empty() => {
                        merged.extend(new);
                        Ok(Some(merged))
                    }
                    (parsed, _) => Ok(parsed),
                }
            }
        }
    }

    fn uptime_sla_value(&self) -> bool {
        self.from_mc(|mc| {
            mc.sku_tier()
                .map(|t| t == SKU_TIER_PAID || t == SKU_TIER_STANDARD)
        })
        .unwrap_or_else(|| self.raw.get_bool("uptime_sla"))
    }

    pub fn get_uptime_sla(&self) -> crate::Result<bool> {
        let uptime = self.uptime_sla_value();
        if uptime && self.raw.get_bool("no_uptime_sla") {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "Cannot specify \"--uptime-sla\" and \"--no-uptime-sla\" at the same time.".to_string(),
            ));
        }
        Ok(uptime)
    }

    pub fn get_no_uptime_sla(&self) -> crate::Result<bool> {
        let no_uptime = self.raw.get_bool("no_uptime_sla");
        if no_uptime && self.uptime_sla_value() {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "Cannot specify \"--uptime-sla\" and \"--no-uptime-sla\" at the same time.".to_string(),
            ));
        }
        Ok(no_uptime)
    }

    /// Requested SKU tier in the negotiated version's spelling, `None` when
    /// nothing asks for a change.
    pub fn get_tier(&self) -> crate::Result<Option<String>> {
        if let Some(tier) = self.from_mc(|mc| mc.sku_tier().map(str::to_string)) {
            return Ok(Some(tier));
        }
        let uptime = self.get_uptime_sla()?;
        let no_uptime = self.get_no_uptime_sla()?;
        let raw_tier = self.raw_str("tier").map(|t| normalize_tier(&t)).transpose()?;
        if raw_tier.is_some() && (uptime || no_uptime) {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "--tier cannot be used together with --uptime-sla or --no-uptime-sla".to_string(),
            ));
        }
        let tier = raw_tier.or_else(|| {
            if uptime {
                Some(SKU_TIER_STANDARD.to_string())
            } else if no_uptime {
                Some(SKU_TIER_FREE.to_string())
            } else {
                None
            }
        });

        match tier.as_deref() {
            Some(SKU_TIER_PREMIUM) => {
                self.require(self.caps.support_plan, "--tier premium", ApiVersion::V2023_08_01)?;
                Ok(tier)
            }
            Some(SKU_TIER_STANDARD) if self.caps.legacy_sku => Ok(Some(SKU_TIER_PAID.to_string())),
            _ => Ok(tier),
        }
    }

    fn disable_local_accounts_value(&self) -> bool {
        self.from_mc(|mc| mc.properties.disable_local_accounts)
            .unwrap_or_else(|| self.raw.get_bool("disable_local_accounts"))
    }

    pub fn get_disable_local_accounts(&self) -> crate::Result<bool> {
        let disable = self.disable_local_accounts_value();
        if disable && self.mode == DecoratorMode::Update && self.raw.get_bool("enable_local_accounts")
        {
            return Err(AzCliError::MutuallyExclusiveArgument(
                LOCAL_ACCOUNTS_CONFLICT.to_string(),
            ));
        }
        Ok(disable)
    }

    pub fn get_enable_local_accounts(&self) -> crate::Result<bool> {
        let enable = self.raw.get_bool("enable_local_accounts");
        if enable && self.disable_local_accounts_value() {
            return Err(AzCliError::MutuallyExclusiveArgument(
                LOCAL_ACCOUNTS_CONFLICT.to_string(),
            ));
        }
        Ok(enable)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::Fixture;
    use super::super::DecoratorMode;
    use super::*;
    use crate::aks::models::{ApiServerAccessProfile, ManagedCluster};

    fn managed_aad_cluster() -> ManagedCluster {
        let mut mc = ManagedCluster::default();
        mc.properties.aad_profile = Some(AadProfile {
            managed: Some(true),
            ..AadProfile::default()
        });
        mc
    }

    #[test]
    fn test_valid_resource_id() {
        assert!(is_valid_resource_id(
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/privateDnsZones/zone"
        ));
        assert!(!is_valid_resource_id("privatelink.eastus.azmk8s.io"));
    }

    #[test]
    fn test_enable_aad_conflicts_with_legacy_apps() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_aad": true, "aad_client_app_id": "client"}),
        );
        assert!(matches!(
            ctx.get_enable_aad(),
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));

        let ctx = fx.context(DecoratorMode::Create, json!({"enable_azure_rbac": true}));
        assert!(matches!(
            ctx.get_enable_aad(),
            Err(AzCliError::RequiredArgumentMissing(msg)) if msg.contains("--enable-azure-rbac")
        ));
    }

    #[test]
    fn test_update_aad_requires_managed_aad() {
        let fx = Fixture::new();
        let mut ctx = fx.context(DecoratorMode::Update, json!({"enable_aad": true}));
        ctx.attach_mc(managed_aad_cluster()).unwrap();
        assert!(matches!(
            ctx.get_enable_aad(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg.contains("already enabled")
        ));

        let mut ctx = fx.context(DecoratorMode::Update, json!({"aad_tenant_id": "t"}));
        ctx.attach_mc(ManagedCluster::default()).unwrap();
        assert!(matches!(
            ctx.get_aad_tenant_id(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg.contains("--aad-tenant-id")
        ));

        let mut ctx = fx.context(
            DecoratorMode::Update,
            json!({"enable_azure_rbac": true, "disable_azure_rbac": true}),
        );
        ctx.attach_mc(managed_aad_cluster()).unwrap();
        assert!(matches!(
            ctx.get_enable_azure_rbac(),
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));
    }

    #[test]
    fn test_rbac_pair() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_rbac": true, "disable_rbac": true}),
        );
        assert!(matches!(
            ctx.get_enable_rbac(),
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));
    }

    #[test]
    fn test_authorized_ranges_and_private_cluster() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"api_server_authorized_ip_ranges": "1.2.3.4/32, 5.6.7.8/32", "enable_private_cluster": true}),
        );
        assert!(matches!(
            ctx.get_api_server_authorized_ip_ranges(),
            Err(AzCliError::MutuallyExclusiveArgument(msg)) if msg == PRIVATE_CLUSTER_RANGES
        ));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"api_server_authorized_ip_ranges": "1.2.3.4/32, 5.6.7.8/32"}),
        );
        assert_eq!(
            ctx.get_api_server_authorized_ip_ranges().unwrap().unwrap(),
            vec!["1.2.3.4/32", "5.6.7.8/32"]
        );

        // empty string clears on update
        let ctx = fx.context(DecoratorMode::Update, json!({"api_server_authorized_ip_ranges": ""}));
        assert_eq!(ctx.get_api_server_authorized_ip_ranges().unwrap(), Some(vec![]));
    }

    #[test]
    fn test_public_cluster_rejects_private_options() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, json!({"private_dns_zone": "system"}));
        assert!(matches!(
            ctx.get_enable_private_cluster(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg.starts_with("Invalid private dns zone")
        ));

        let ctx = fx.context(DecoratorMode::Create, json!({"disable_public_fqdn": true}));
        assert!(matches!(
            ctx.get_disable_public_fqdn(),
            Err(AzCliError::InvalidArgumentValue(_))
        ));

        let mut ctx = fx.context(DecoratorMode::Update, json!({"enable_public_fqdn": true}));
        ctx.attach_mc(ManagedCluster::default()).unwrap();
        assert!(matches!(
            ctx.get_enable_public_fqdn(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg.contains("only be used for private cluster")
        ));
    }

    #[test]
    fn test_private_dns_zone_validation() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_private_cluster": true, "private_dns_zone": "not-an-id"}),
        );
        assert!(matches!(
            ctx.get_private_dns_zone(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg == "not-an-id is not a valid Azure resource ID."
        ));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_private_cluster": true, "private_dns_zone": "system", "fqdn_subdomain": "sub"}),
        );
        assert!(matches!(
            ctx.get_fqdn_subdomain(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg.contains("custom private dns zone")
        ));

        let mut ctx = fx.context(DecoratorMode::Update, json!({"disable_public_fqdn": true}));
        let mut mc = ManagedCluster::default();
        mc.properties.api_server_access_profile = Some(ApiServerAccessProfile {
            enable_private_cluster: Some(true),
            private_dns_zone: Some("none".into()),
            ..ApiServerAccessProfile::default()
        });
        ctx.attach_mc(mc).unwrap();
        assert!(matches!(
            ctx.get_disable_public_fqdn(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg.contains("none mode")
        ));
    }

    #[test]
    fn test_cluster_autoscaler_profile_parsing() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"cluster_autoscaler_profile": ["scan-interval=30s", "expander=random,max-empty-bulk-delete=5"]}),
        );
        let profile = ctx.get_cluster_autoscaler_profile().unwrap().unwrap();
        assert_eq!(profile.get("scan-interval").map(String::as_str), Some("30s"));
        assert_eq!(profile.len(), 3);

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"cluster_autoscaler_profile": ["bogus-key=1"]}),
        );
        assert!(matches!(
            ctx.get_cluster_autoscaler_profile(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg.starts_with("'bogus-key' is an invalid key")
        ));
    }

    #[test]
    fn test_cluster_autoscaler_profile_merges_on_update() {
        let fx = Fixture::new();
        let mut ctx = fx.context(
            DecoratorMode::Update,
            json!({"cluster_autoscaler_profile": ["scan-interval=20s"]}),
        );
        let mut mc = ManagedCluster::default();
        mc.properties.auto_scaler_profile = Some(StringMap::from([
            ("scan-interval".to_string(), "10s".to_string()),
            ("expander".to_string(), "random".to_string()),
        ]));
        ctx.attach_mc(mc).unwrap();
        let merged = ctx.get_cluster_autoscaler_profile().unwrap().unwrap();
        assert_eq!(merged.get("scan-interval").map(String::as_str), Some("20s"));
        assert_eq!(merged.get("expander").map(String::as_str), Some("random"));
    }

    #[test]
    fn test_tier_resolution() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, json!({"uptime_sla": true}));
        assert_eq!(ctx.get_tier().unwrap().as_deref(), Some("Standard"));

        let ctx = fx.context(DecoratorMode::Create, json!({"tier": "premium"}));
        assert_eq!(ctx.get_tier().unwrap().as_deref(), Some("Premium"));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"uptime_sla": true, "no_uptime_sla": true}),
        );
        assert!(matches!(
            ctx.get_tier(),
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));

        let ctx = fx.context(DecoratorMode::Create, json!({"tier": "gold"}));
        assert!(matches!(ctx.get_tier(), Err(AzCliError::InvalidArgumentValue(_))));
    }

    #[test]
    fn test_local_accounts_pair() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Update,
            json!({"disable_local_accounts": true, "enable_local_accounts": true}),
        );
        assert!(matches!(
            ctx.get_disable_local_accounts(),
            Err(AzCliError::MutuallyExclusiveArgument(msg)) if msg == LOCAL_ACCOUNTS_CONFLICT
        ));
    }
}
