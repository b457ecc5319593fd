//! ContainerService API versions and the model features each one carries.
//!
//! The version is resolved once from config; builders ask
//! [`SchemaCapabilities`] whether a profile exists instead of probing models.

use std::fmt;
use std::str::FromStr;

use crate::error::AzCliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApiVersion {
    V2022_04_01,
    V2023_08_01,
    V2024_05_01,
}

impl ApiVersion {
    pub const ALL: [ApiVersion; 3] = [
        ApiVersion::V2022_04_01,
        ApiVersion::V2023_08_01,
        ApiVersion::V2024_05_01,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V2022_04_01 => "2022-04-01",
            ApiVersion::V2023_08_01 => "2023-08-01",
            ApiVersion::V2024_05_01 => "2024-05-01",
        }
    }

    pub fn capabilities(&self) -> SchemaCapabilities {
        let v2023 = *self >= ApiVersion::V2023_08_01;
        let v2024 = *self >= ApiVersion::V2024_05_01;
        SchemaCapabilities {
            version: *self,
            windows_gmsa: true,
            oidc_issuer: true,
            http_proxy: true,
            storage_profile: true,
            docker_bridge_cidr: !v2023,
            legacy_sku: !v2023,
            node_os_upgrade_channel: v2023,
            workload_identity: v2023,
            image_cleaner: v2023,
            kms: v2023,
            workload_autoscaler: v2023,
            defender: v2023,
            blob_csi_driver: v2023,
            app_routing: v2023,
            support_plan: v2023,
            azure_monitor_metrics: v2023,
            service_mesh: v2023,
            cost_analysis: v2024,
            container_storage: v2024,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiVersion {
    type Err = AzCliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApiVersion::ALL
            .into_iter()
            .find(|v| v.as_str() == s.trim())
            .ok_or_else(|| {
                let known: Vec<&str> = ApiVersion::ALL.iter().map(|v| v.as_str()).collect();
                AzCliError::InvalidArgumentValue(format!(
                    "unsupported ContainerService API version '{}', expected one of {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// Model features available under a negotiated API version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaCapabilities {
    pub version: ApiVersion,
    pub windows_gmsa: bool,
    pub oidc_issuer: bool,
    pub http_proxy: bool,
    pub storage_profile: bool,
    pub docker_bridge_cidr: bool,
    /// SKU names `Basic`/`Paid` instead of `Base` with `Free|Standard|Premium`.
    pub legacy_sku: bool,
    pub node_os_upgrade_channel: bool,
    pub workload_identity: bool,
    pub image_cleaner: bool,
    pub kms: bool,
    pub workload_autoscaler: bool,
    pub defender: bool,
    pub blob_csi_driver: bool,
    pub app_routing: bool,
    pub support_plan: bool,
    pub azure_monitor_metrics: bool,
    pub service_mesh: bool,
    pub cost_analysis: bool,
    pub container_storage: bool,
}

impl SchemaCapabilities {
    /// Fail when `flag` needs a feature this version lacks.
    pub fn require(&self, supported: bool, flag: &str, since: ApiVersion) -> crate::Result<()> {
        if supported {
            Ok(())
        } else {
            Err(AzCliError::InvalidArgumentValue(format!(
                "{} requires API version {} or later",
                flag, since
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_versions() {
        assert_eq!("2023-08-01".parse::<ApiVersion>().unwrap(), ApiVersion::V2023_08_01);
        assert!("2020-01-01".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn test_capabilities_grow_with_version() {
        let old = ApiVersion::V2022_04_01.capabilities();
        assert!(!old.workload_identity);
        assert!(old.legacy_sku);
        assert!(old.docker_bridge_cidr);

        let mid = ApiVersion::V2023_08_01.capabilities();
        assert!(mid.workload_identity && mid.support_plan);
        assert!(!mid.cost_analysis);

        let new = ApiVersion::V2024_05_01.capabilities();
        assert!(new.cost_analysis && new.container_storage);
    }

    #[test]
    fn test_require_message() {
        let caps = ApiVersion::V2022_04_01.capabilities();
        let err = caps
            .require(caps.kms, "--enable-azure-keyvault-kms", ApiVersion::V2023_08_01)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "--enable-azure-keyvault-kms requires API version 2023-08-01 or later"
        );
    }
}
