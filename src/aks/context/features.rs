//! Security, storage and platform feature toggles.
//!
//! Each getter returns `None` when the command does not touch the feature,
//! so the same value drives both create and update.

use std::path::Path;

use super::{AksContext, DecoratorMode};
use crate::aks::consts::{
    IMAGE_CLEANER_MAX_INTERVAL_HOURS, IMAGE_CLEANER_MIN_INTERVAL_HOURS, KMS_NETWORK_ACCESS_PRIVATE,
    KMS_NETWORK_ACCESS_PUBLIC, SERVICE_MESH_MODE_DISABLED, SERVICE_MESH_MODE_ISTIO,
    SKU_TIER_PAID, SKU_TIER_PREMIUM, SKU_TIER_STANDARD, SUPPORT_PLAN_KUBERNETES_OFFICIAL,
    SUPPORT_PLAN_LTS,
};
use crate::aks::models::{
    AzureKeyVaultKms, AzureMonitorMetrics, DefenderProfile, EnabledFlag, HttpProxyConfig,
    ImageCleanerProfile, IstioServiceMesh, KubeStateMetrics, ServiceMeshProfile, WebAppRouting,
};
use crate::aks::schema::ApiVersion;
use crate::error::AzCliError;

const CONTAINER_STORAGE_POOL_TYPES: &[&str] = &["azureDisk", "ephemeralDisk", "elasticSan"];

/// Requested CSI driver states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageDrivers {
    pub disk: Option<bool>,
    pub file: Option<bool>,
    pub blob: Option<bool>,
    pub snapshot_controller: Option<bool>,
}

impl StorageDrivers {
    pub fn any(&self) -> bool {
        self.disk.is_some() || self.file.is_some() || self.blob.is_some() || self.snapshot_controller.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStorageChange {
    Enable { pool_type: String },
    Disable,
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &str, what: &str) -> crate::Result<T> {
    let text = std::fs::read_to_string(Path::new(path))
        .map_err(|e| AzCliError::FileOperation(format!("{} file not found: {}: {}", what, path, e)))?;
    serde_json::from_str(&text).map_err(|e| {
        AzCliError::InvalidArgumentValue(format!("{} file {} is not valid JSON: {}", what, path, e))
    })
}

impl AksContext<'_> {
    /// Enable/disable pair gated on a capability. `Some(true)` enables,
    /// `Some(false)` disables.
    fn feature_toggle(
        &self,
        enable: &str,
        disable: &str,
        supported: bool,
        since: ApiVersion,
    ) -> crate::Result<Option<bool>> {
        let (on, off) = self.exclusive_pair(enable, disable)?;
        if on {
            self.require(supported, &format!("--{}", enable.replace('_', "-")), since)?;
            return Ok(Some(true));
        }
        if off {
            self.require(supported, &format!("--{}", disable.replace('_', "-")), since)?;
            return Ok(Some(false));
        }
        Ok(None)
    }

    /// Tier the cluster will have once this command is applied.
    fn effective_tier(&self) -> crate::Result<Option<String>> {
        let requested = self.get_tier()?;
        Ok(match self.mode {
            DecoratorMode::Create => requested,
            DecoratorMode::Update => {
                requested.or_else(|| self.mc().and_then(|mc| mc.sku_tier().map(str::to_string)))
            }
        })
    }

    /// Defender profile, reading `--defender-config` or falling back to
    /// the default workspace.
    pub async fn get_defender_profile(&mut self) -> crate::Result<Option<DefenderProfile>> {
        let Some(enable) = self.feature_toggle(
            "enable_defender",
            "disable_defender",
            self.caps.defender,
            ApiVersion::V2023_08_01,
        )?
        else {
            if self.raw_str("defender_config").is_some() {
                return Err(AzCliError::RequiredArgumentMissing(
                    "--defender-config can only be used together with --enable-defender".to_string(),
                ));
            }
            return Ok(None);
        };

        if !enable {
            return Ok(Some(DefenderProfile {
                log_analytics_workspace_resource_id: None,
                security_monitoring: Some(EnabledFlag::new(false)),
            }));
        }

        let mut profile = match self.raw_str("defender_config") {
            Some(path) => read_json_file::<DefenderProfile>(&path, "defender config")?,
            None => DefenderProfile::default(),
        };
        if profile.log_analytics_workspace_resource_id.is_none() {
            let location = self.get_location().await?;
            let workspace = self.backend.default_log_analytics_workspace(&location).await?;
            profile.log_analytics_workspace_resource_id = Some(workspace);
        }
        profile.security_monitoring = Some(EnabledFlag::new(true));
        Ok(Some(profile))
    }

    pub fn get_enable_oidc_issuer(&self) -> crate::Result<bool> {
        let enabled = self
            .from_mc(|mc| mc.properties.oidc_issuer_profile.as_ref().map(|p| p.enabled))
            .unwrap_or_else(|| self.raw.get_bool("enable_oidc_issuer"));
        if enabled {
            self.require(self.caps.oidc_issuer, "--enable-oidc-issuer", ApiVersion::V2022_04_01)?;
        }
        Ok(enabled)
    }

    pub fn get_workload_identity(&self) -> crate::Result<Option<bool>> {
        let toggle = self.feature_toggle(
            "enable_workload_identity",
            "disable_workload_identity",
            self.caps.workload_identity,
            ApiVersion::V2023_08_01,
        )?;
        if toggle == Some(true) {
            let oidc_on_cluster = self.mode == DecoratorMode::Update
                && self
                    .mc()
                    .and_then(|mc| mc.properties.oidc_issuer_profile.as_ref())
                    .is_some_and(|p| p.enabled);
            if !oidc_on_cluster && !self.get_enable_oidc_issuer()? {
                return Err(AzCliError::RequiredArgumentMissing(
                    "Enabling workload identity requires enabling OIDC issuer (--enable-oidc-issuer)."
                        .to_string(),
                ));
            }
        }
        Ok(toggle)
    }

    pub fn get_azure_keyvault_kms(&self) -> crate::Result<Option<AzureKeyVaultKms>> {
        let toggle = self.feature_toggle(
            "enable_azure_keyvault_kms",
            "disable_azure_keyvault_kms",
            self.caps.kms,
            ApiVersion::V2023_08_01,
        )?;
        let key_id = self.raw_str("azure_keyvault_kms_key_id");
        let network_access = self.raw_str("azure_keyvault_kms_key_vault_network_access");
        let vault_id = self.raw_str("azure_keyvault_kms_key_vault_resource_id");

        match toggle {
            None => {
                if key_id.is_some() || network_access.is_some() || vault_id.is_some() {
                    return Err(AzCliError::RequiredArgumentMissing(
                        "--azure-keyvault-kms-key-id, --azure-keyvault-kms-key-vault-network-access and \
                         --azure-keyvault-kms-key-vault-resource-id can only be used with --enable-azure-keyvault-kms"
                            .to_string(),
                    ));
                }
                Ok(None)
            }
            Some(false) => Ok(Some(AzureKeyVaultKms::default())),
            Some(true) => {
                let Some(key_id) = key_id else {
                    return Err(AzCliError::RequiredArgumentMissing(
                        "--azure-keyvault-kms-key-id is required when --enable-azure-keyvault-kms is set"
                            .to_string(),
                    ));
                };
                let access = match network_access.as_deref() {
                    None => KMS_NETWORK_ACCESS_PUBLIC.to_string(),
                    Some(a) if a.eq_ignore_ascii_case(KMS_NETWORK_ACCESS_PUBLIC) => {
                        KMS_NETWORK_ACCESS_PUBLIC.to_string()
                    }
                    Some(a) if a.eq_ignore_ascii_case(KMS_NETWORK_ACCESS_PRIVATE) => {
                        KMS_NETWORK_ACCESS_PRIVATE.to_string()
                    }
                    Some(other) => {
                        return Err(AzCliError::InvalidArgumentValue(format!(
                            "Invalid --azure-keyvault-kms-key-vault-network-access '{}', expected Public or Private",
                            other
                        )));
                    }
                };
                if access == KMS_NETWORK_ACCESS_PRIVATE && vault_id.is_none() {
                    return Err(AzCliError::RequiredArgumentMissing(
                        "--azure-keyvault-kms-key-vault-resource-id is required when \
                         --azure-keyvault-kms-key-vault-network-access is Private"
                            .to_string(),
                    ));
                }
                if access == KMS_NETWORK_ACCESS_PUBLIC && vault_id.is_some() {
                    return Err(AzCliError::InvalidArgumentValue(
                        "--azure-keyvault-kms-key-vault-resource-id can only be set when \
                         --azure-keyvault-kms-key-vault-network-access is Private"
                            .to_string(),
                    ));
                }
                Ok(Some(AzureKeyVaultKms {
                    enabled: true,
                    key_id: Some(key_id),
                    key_vault_network_access: Some(access),
                    key_vault_resource_id: vault_id,
                }))
            }
        }
    }

    pub fn get_image_cleaner(&self) -> crate::Result<Option<ImageCleanerProfile>> {
        let toggle = self.feature_toggle(
            "enable_image_cleaner",
            "disable_image_cleaner",
            self.caps.image_cleaner,
            ApiVersion::V2023_08_01,
        )?;
        let interval = self.raw.get_i64("image_cleaner_interval_hours");
        if let Some(hours) = interval {
            if !(IMAGE_CLEANER_MIN_INTERVAL_HOURS..=IMAGE_CLEANER_MAX_INTERVAL_HOURS).contains(&hours) {
                return Err(AzCliError::InvalidArgumentValue(format!(
                    "--image-cleaner-interval-hours must be between {} and {}",
                    IMAGE_CLEANER_MIN_INTERVAL_HOURS, IMAGE_CLEANER_MAX_INTERVAL_HOURS
                )));
            }
        }

        let existing = self
            .mc()
            .and_then(|mc| mc.properties.security_profile.as_ref())
            .and_then(|s| s.image_cleaner.clone());
        match (toggle, interval) {
            (Some(true), _) => Ok(Some(ImageCleanerProfile {
                enabled: true,
                interval_hours: interval.or_else(|| existing.and_then(|e| e.interval_hours)),
            })),
            (Some(false), Some(_)) => Err(AzCliError::MutuallyExclusiveArgument(
                "--image-cleaner-interval-hours cannot be used together with --disable-image-cleaner"
                    .to_string(),
            )),
            (Some(false), None) => Ok(Some(ImageCleanerProfile {
                enabled: false,
                interval_hours: None,
            })),
            (None, Some(hours)) => match existing {
                Some(e) if self.mode == DecoratorMode::Update && e.enabled => {
                    Ok(Some(ImageCleanerProfile {
                        enabled: true,
                        interval_hours: Some(hours),
                    }))
                }
                _ => Err(AzCliError::RequiredArgumentMissing(
                    "--image-cleaner-interval-hours can only be used when image cleaner is enabled"
                        .to_string(),
                )),
            },
            (None, None) => Ok(None),
        }
    }

    pub fn get_storage_drivers(&self) -> crate::Result<StorageDrivers> {
        let drivers = StorageDrivers {
            disk: self.feature_toggle(
                "enable_disk_driver",
                "disable_disk_driver",
                self.caps.storage_profile,
                ApiVersion::V2022_04_01,
            )?,
            file: self.feature_toggle(
                "enable_file_driver",
                "disable_file_driver",
                self.caps.storage_profile,
                ApiVersion::V2022_04_01,
            )?,
            blob: self.feature_toggle(
                "enable_blob_driver",
                "disable_blob_driver",
                self.caps.blob_csi_driver,
                ApiVersion::V2023_08_01,
            )?,
            snapshot_controller: self.feature_toggle(
                "enable_snapshot_controller",
                "disable_snapshot_controller",
                self.caps.storage_profile,
                ApiVersion::V2022_04_01,
            )?,
        };
        Ok(drivers)
    }

    /// `--http-proxy-config` points at a JSON file in the wire shape.
    pub fn get_http_proxy_config(&self) -> crate::Result<Option<HttpProxyConfig>> {
        let Some(path) = self.raw_str("http_proxy_config") else {
            return Ok(None);
        };
        self.require(self.caps.http_proxy, "--http-proxy-config", ApiVersion::V2022_04_01)?;
        read_json_file(&path, "http proxy config").map(Some)
    }

    /// KEDA and vertical pod autoscaler toggles.
    pub fn get_workload_autoscalers(&self) -> crate::Result<(Option<bool>, Option<bool>)> {
        Ok((
            self.feature_toggle(
                "enable_keda",
                "disable_keda",
                self.caps.workload_autoscaler,
                ApiVersion::V2023_08_01,
            )?,
            self.feature_toggle(
                "enable_vpa",
                "disable_vpa",
                self.caps.workload_autoscaler,
                ApiVersion::V2023_08_01,
            )?,
        ))
    }

    pub fn get_app_routing(&self) -> crate::Result<Option<WebAppRouting>> {
        let enable = self.raw.get_bool("enable_app_routing");
        let zones = self.raw.get_str_list("dns_zone_resource_ids");
        if !enable && zones.is_none() {
            return Ok(None);
        }
        self.require(self.caps.app_routing, "--enable-app-routing", ApiVersion::V2023_08_01)?;
        let enabled_on_cluster = self.mode == DecoratorMode::Update
            && self
                .mc()
                .and_then(|mc| mc.properties.ingress_profile.as_ref())
                .and_then(|p| p.web_app_routing.as_ref())
                .is_some_and(|w| w.enabled);
        if !enable && !enabled_on_cluster {
            return Err(AzCliError::RequiredArgumentMissing(
                "--dns-zone-resource-ids can only be used when app routing is enabled".to_string(),
            ));
        }
        Ok(Some(WebAppRouting {
            enabled: true,
            dns_zone_resource_ids: zones,
        }))
    }

    pub fn get_k8s_support_plan(&self) -> crate::Result<Option<String>> {
        let Some(plan) = self
            .from_mc(|mc| mc.properties.support_plan.clone())
            .or_else(|| self.raw_str("k8s_support_plan"))
        else {
            return Ok(None);
        };
        self.require(self.caps.support_plan, "--k8s-support-plan", ApiVersion::V2023_08_01)?;
        let plan = [SUPPORT_PLAN_KUBERNETES_OFFICIAL, SUPPORT_PLAN_LTS]
            .iter()
            .find(|p| p.eq_ignore_ascii_case(&plan))
            .map(|p| p.to_string())
            .ok_or_else(|| {
                AzCliError::InvalidArgumentValue(format!(
                    "Invalid --k8s-support-plan '{}', expected {} or {}",
                    plan, SUPPORT_PLAN_KUBERNETES_OFFICIAL, SUPPORT_PLAN_LTS
                ))
            })?;
        if plan == SUPPORT_PLAN_LTS && self.effective_tier()?.as_deref() != Some(SKU_TIER_PREMIUM) {
            return Err(AzCliError::InvalidArgumentValue(
                "Long term support is only available for premium tier clusters.".to_string(),
            ));
        }
        Ok(Some(plan))
    }

    pub fn get_azure_monitor_metrics(&self) -> crate::Result<Option<AzureMonitorMetrics>> {
        let toggle = self.feature_toggle(
            "enable_azure_monitor_metrics",
            "disable_azure_monitor_metrics",
            self.caps.azure_monitor_metrics,
            ApiVersion::V2023_08_01,
        )?;
        let labels = self.raw_str("ksm_metric_labels_allow_list");
        let annotations = self.raw_str("ksm_metric_annotations_allow_list");
        match toggle {
            Some(true) => Ok(Some(AzureMonitorMetrics {
                enabled: true,
                kube_state_metrics: Some(KubeStateMetrics {
                    metric_labels_allowlist: labels,
                    metric_annotations_allow_list: annotations,
                }),
            })),
            Some(false) => Ok(Some(AzureMonitorMetrics {
                enabled: false,
                kube_state_metrics: None,
            })),
            None if labels.is_some() || annotations.is_some() => {
                Err(AzCliError::RequiredArgumentMissing(
                    "--ksm-metric-labels-allow-list and --ksm-metric-annotations-allow-list \
                     can only be used with --enable-azure-monitor-metrics"
                        .to_string(),
                ))
            }
            None => Ok(None),
        }
    }

    pub fn get_service_mesh(&self) -> crate::Result<Option<ServiceMeshProfile>> {
        let toggle = self.feature_toggle(
            "enable_azure_service_mesh",
            "disable_azure_service_mesh",
            self.caps.service_mesh,
            ApiVersion::V2023_08_01,
        )?;
        Ok(toggle.map(|enable| {
            if enable {
                ServiceMeshProfile {
                    mode: SERVICE_MESH_MODE_ISTIO.to_string(),
                    istio: Some(IstioServiceMesh::default()),
                }
            } else {
                ServiceMeshProfile {
                    mode: SERVICE_MESH_MODE_DISABLED.to_string(),
                    istio: None,
                }
            }
        }))
    }

    pub fn get_azure_container_storage(&self) -> crate::Result<Option<ContainerStorageChange>> {
        let toggle = self.feature_toggle(
            "enable_azure_container_storage",
            "disable_azure_container_storage",
            self.caps.container_storage,
            ApiVersion::V2024_05_01,
        )?;
        let pool_type = self.raw_str("container_storage_pool_type");
        match toggle {
            Some(true) => {
                let pool_type = pool_type.unwrap_or_else(|| CONTAINER_STORAGE_POOL_TYPES[0].to_string());
                if !CONTAINER_STORAGE_POOL_TYPES.contains(&pool_type.as_str()) {
                    return Err(AzCliError::InvalidArgumentValue(format!(
                        "Invalid --container-storage-pool-type '{}', expected one of {}",
                        pool_type,
                        CONTAINER_STORAGE_POOL_TYPES.join(", ")
                    )));
                }
                Ok(Some(ContainerStorageChange::Enable { pool_type }))
            }
            Some(false) => Ok(Some(ContainerStorageChange::Disable)),
            None if pool_type.is_some() => Err(AzCliError::RequiredArgumentMissing(
                "--container-storage-pool-type can only be used with --enable-azure-container-storage"
                    .to_string(),
            )),
            None => Ok(None),
        }
    }

    pub fn get_cost_analysis(&self) -> crate::Result<Option<bool>> {
        let toggle = self.feature_toggle(
            "enable_cost_analysis",
            "disable_cost_analysis",
            self.caps.cost_analysis,
            ApiVersion::V2024_05_01,
        )?;
        if toggle == Some(true) {
            let tier = self.effective_tier()?;
            let paid = matches!(
                tier.as_deref(),
                Some(SKU_TIER_STANDARD) | Some(SKU_TIER_PREMIUM) | Some(SKU_TIER_PAID)
            );
            if !paid {
                return Err(AzCliError::InvalidArgumentValue(
                    "Cost analysis can only be enabled on Standard or Premium tier clusters.".to_string(),
                ));
            }
        }
        Ok(toggle)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::Fixture;
    use super::*;
    use crate::aks::models::{ManagedCluster, ManagedClusterSku, OidcIssuerProfile};

    #[test]
    fn test_pairs_are_mutually_exclusive() {
        let fx = Fixture::new();
        for (on, off) in [
            ("enable_keda", "disable_keda"),
            ("enable_disk_driver", "disable_disk_driver"),
            ("enable_azure_service_mesh", "disable_azure_service_mesh"),
        ] {
            let ctx = fx.context(DecoratorMode::Update, json!({on: true, off: true}));
            let result = match on {
                "enable_keda" => ctx.get_workload_autoscalers().map(|_| ()),
                "enable_disk_driver" => ctx.get_storage_drivers().map(|_| ()),
                _ => ctx.get_service_mesh().map(|_| ()),
            };
            assert!(
                matches!(result, Err(AzCliError::MutuallyExclusiveArgument(_))),
                "{} / {}",
                on,
                off
            );
        }
    }

    #[test]
    fn test_capability_gate() {
        let mut fx = Fixture::new();
        fx.settings.api_version = "2022-04-01".to_string();
        let ctx = fx.context(DecoratorMode::Create, json!({"enable_keda": true}));
        assert!(matches!(
            ctx.get_workload_autoscalers(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg == "--enable-keda requires API version 2023-08-01 or later"
        ));
    }

    #[test]
    fn test_workload_identity_requires_oidc() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, json!({"enable_workload_identity": true}));
        assert!(matches!(
            ctx.get_workload_identity(),
            Err(AzCliError::RequiredArgumentMissing(_))
        ));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_workload_identity": true, "enable_oidc_issuer": true}),
        );
        assert_eq!(ctx.get_workload_identity().unwrap(), Some(true));

        let mut ctx = fx.context(DecoratorMode::Update, json!({"enable_workload_identity": true}));
        let mut mc = ManagedCluster::default();
        mc.properties.oidc_issuer_profile = Some(OidcIssuerProfile {
            enabled: true,
            issuer_url: None,
        });
        ctx.attach_mc(mc).unwrap();
        assert_eq!(ctx.get_workload_identity().unwrap(), Some(true));
    }

    #[test]
    fn test_kms_validation() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, json!({"enable_azure_keyvault_kms": true}));
        assert!(matches!(
            ctx.get_azure_keyvault_kms(),
            Err(AzCliError::RequiredArgumentMissing(msg)) if msg.starts_with("--azure-keyvault-kms-key-id")
        ));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({
                "enable_azure_keyvault_kms": true,
                "azure_keyvault_kms_key_id": "https://v.vault.azure.net/keys/k/1",
                "azure_keyvault_kms_key_vault_network_access": "private"
            }),
        );
        assert!(matches!(
            ctx.get_azure_keyvault_kms(),
            Err(AzCliError::RequiredArgumentMissing(msg)) if msg.contains("is Private")
        ));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({
                "enable_azure_keyvault_kms": true,
                "azure_keyvault_kms_key_id": "https://v.vault.azure.net/keys/k/1"
            }),
        );
        let kms = ctx.get_azure_keyvault_kms().unwrap().unwrap();
        assert_eq!(kms.key_vault_network_access.as_deref(), Some("Public"));
    }

    #[test]
    fn test_image_cleaner_interval_bounds() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_image_cleaner": true, "image_cleaner_interval_hours": 12}),
        );
        assert!(matches!(
            ctx.get_image_cleaner(),
            Err(AzCliError::InvalidArgumentValue(_))
        ));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_image_cleaner": true, "image_cleaner_interval_hours": 48}),
        );
        assert_eq!(
            ctx.get_image_cleaner().unwrap(),
            Some(ImageCleanerProfile {
                enabled: true,
                interval_hours: Some(48)
            })
        );

        let ctx = fx.context(DecoratorMode::Create, json!({"image_cleaner_interval_hours": 48}));
        assert!(matches!(
            ctx.get_image_cleaner(),
            Err(AzCliError::RequiredArgumentMissing(_))
        ));
    }

    #[test]
    fn test_support_plan_requires_premium() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, json!({"k8s_support_plan": "AKSLongTermSupport"}));
        assert!(matches!(
            ctx.get_k8s_support_plan(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg == "Long term support is only available for premium tier clusters."
        ));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"k8s_support_plan": "akslongtermsupport", "tier": "premium"}),
        );
        assert_eq!(
            ctx.get_k8s_support_plan().unwrap().as_deref(),
            Some("AKSLongTermSupport")
        );
    }

    #[test]
    fn test_cost_analysis_uses_existing_tier_on_update() {
        let fx = Fixture::new();
        let mut ctx = fx.context(DecoratorMode::Update, json!({"enable_cost_analysis": true}));
        let mut mc = ManagedCluster::default();
        mc.sku = Some(ManagedClusterSku {
            name: Some("Base".into()),
            tier: Some("Free".into()),
        });
        ctx.attach_mc(mc.clone()).unwrap();
        assert!(matches!(ctx.get_cost_analysis(), Err(AzCliError::InvalidArgumentValue(_))));

        let mut ctx = fx.context(DecoratorMode::Update, json!({"enable_cost_analysis": true}));
        mc.sku = Some(ManagedClusterSku {
            name: Some("Base".into()),
            tier: Some("Standard".into()),
        });
        ctx.attach_mc(mc).unwrap();
        assert_eq!(ctx.get_cost_analysis().unwrap(), Some(true));
    }

    #[test]
    fn test_http_proxy_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.json");
        std::fs::write(
            &path,
            r#"{"httpProxy": "http://proxy:80", "noProxy": ["localhost"], "trustedCa": "Q0E="}"#,
        )
        .unwrap();
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"http_proxy_config": path.to_str().unwrap()}),
        );
        let config = ctx.get_http_proxy_config().unwrap().unwrap();
        assert_eq!(config.http_proxy.as_deref(), Some("http://proxy:80"));
        assert_eq!(config.no_proxy, Some(vec!["localhost".to_string()]));
    }

    #[tokio::test]
    async fn test_defender_defaults_to_workspace() {
        let fx = Fixture::new();
        let mut ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_defender": true, "location": "westus2"}),
        );
        let profile = ctx.get_defender_profile().await.unwrap().unwrap();
        assert_eq!(
            profile.log_analytics_workspace_resource_id.as_deref(),
            Some("/workspaces/default-westus2")
        );
        assert_eq!(profile.security_monitoring, Some(EnabledFlag::new(true)));
    }
}
