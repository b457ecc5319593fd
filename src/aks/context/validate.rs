//! Argument checks that touch neither the backend nor the prompter.
//!
//! Both decorators run these before their first backend write, so a bad
//! flag combination never leaves a service principal or role assignment
//! behind.

use super::access::{AZURE_RBAC_CONFLICT, LOCAL_ACCOUNTS_CONFLICT, PUBLIC_FQDN_CONFLICT};
use super::agentpool::AUTOSCALER_FLAGS_CONFLICT;
use super::{AksContext, DecoratorMode};
use crate::error::AzCliError;

/// Enable/disable pairs resolved through `exclusive_pair`.
const TOGGLE_PAIRS: &[(&str, &str)] = &[
    ("enable_defender", "disable_defender"),
    ("enable_workload_identity", "disable_workload_identity"),
    ("enable_azure_keyvault_kms", "disable_azure_keyvault_kms"),
    ("enable_image_cleaner", "disable_image_cleaner"),
    ("enable_disk_driver", "disable_disk_driver"),
    ("enable_file_driver", "disable_file_driver"),
    ("enable_blob_driver", "disable_blob_driver"),
    ("enable_snapshot_controller", "disable_snapshot_controller"),
    ("enable_keda", "disable_keda"),
    ("enable_vpa", "disable_vpa"),
    ("enable_azure_monitor_metrics", "disable_azure_monitor_metrics"),
    ("enable_azure_service_mesh", "disable_azure_service_mesh"),
    ("enable_azure_container_storage", "disable_azure_container_storage"),
    ("enable_cost_analysis", "disable_cost_analysis"),
];

impl AksContext<'_> {
    /// Conflicts decided by the raw flags alone, valid before any cluster
    /// is attached.
    pub fn validate_flag_pairs(&self) -> crate::Result<()> {
        for (enable, disable) in TOGGLE_PAIRS {
            self.exclusive_pair(enable, disable)?;
        }
        self.get_disable_ahub()?;
        self.get_enable_rbac()?;
        self.get_disable_rbac()?;
        self.get_uptime_sla()?;
        self.get_no_uptime_sla()?;

        let both = |enable: &str, disable: &str| self.raw.get_bool(enable) && self.raw.get_bool(disable);
        if both("enable_local_accounts", "disable_local_accounts") {
            return Err(AzCliError::MutuallyExclusiveArgument(
                LOCAL_ACCOUNTS_CONFLICT.to_string(),
            ));
        }
        if both("enable_public_fqdn", "disable_public_fqdn") {
            return Err(AzCliError::MutuallyExclusiveArgument(
                PUBLIC_FQDN_CONFLICT.to_string(),
            ));
        }
        if both("enable_azure_rbac", "disable_azure_rbac") {
            return Err(AzCliError::MutuallyExclusiveArgument(
                AZURE_RBAC_CONFLICT.to_string(),
            ));
        }
        if self.mode == DecoratorMode::Update {
            let autoscaler_flags = [
                "enable_cluster_autoscaler",
                "disable_cluster_autoscaler",
                "update_cluster_autoscaler",
            ];
            if autoscaler_flags.iter().filter(|f| self.raw.get_bool(f)).count() > 1 {
                return Err(AzCliError::MutuallyExclusiveArgument(
                    AUTOSCALER_FLAGS_CONFLICT.to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Every check the build steps would make, without their side effects.
    ///
    /// Create runs this before the cluster is attached. Update runs it once
    /// the existing cluster is attached, since many update checks depend on
    /// the cluster's current state.
    pub fn validate_parameters(&self) -> crate::Result<()> {
        self.validate_flag_pairs()?;
        match self.mode {
            DecoratorMode::Create => self.validate_create_parameters(),
            DecoratorMode::Update => self.validate_update_parameters(),
        }
    }

    fn validate_create_parameters(&self) -> crate::Result<()> {
        self.build_default_agentpool_profile()?;
        self.get_dns_name_prefix()?;
        self.get_disable_local_accounts()?;
        self.get_enable_managed_identity()?;
        self.get_assign_identity()?;
        self.get_assign_kubelet_identity()?;
        self.get_attach_acr()?;

        let (sp, secret, from_mc) = self.service_principal_and_client_secret_value()?;
        if !from_mc && sp.is_some() && secret.is_none() {
            return Err(AzCliError::RequiredArgumentMissing(
                "--client-secret is required if --service-principal is specified".to_string(),
            ));
        }

        self.build_network_profile()?;
        self.get_enable_addons()?;
        self.get_enable_aad()?;
        self.get_aad_client_app_id_and_aad_server_app_id_and_aad_server_app_secret()?;
        self.get_aad_tenant_id()?;
        self.get_aad_admin_group_object_ids()?;
        self.get_enable_azure_rbac()?;
        self.get_api_server_authorized_ip_ranges()?;
        self.get_fqdn_subdomain()?;
        self.get_enable_private_cluster()?;
        self.get_disable_public_fqdn()?;
        self.get_private_dns_zone()?;
        self.get_node_os_upgrade_channel()?;
        self.get_cluster_autoscaler_profile()?;
        self.get_tier()?;
        self.validate_feature_parameters()
    }

    fn validate_update_parameters(&self) -> crate::Result<()> {
        self.get_autoscaler_change()?;
        self.get_cluster_autoscaler_profile()?;
        self.get_attach_acr()?;
        self.get_tier()?;
        self.get_disable_local_accounts()?;
        self.get_enable_local_accounts()?;
        self.get_api_server_authorized_ip_ranges()?;
        self.get_disable_public_fqdn()?;
        self.get_enable_public_fqdn()?;
        self.get_enable_ahub()?;
        self.get_enable_aad()?;
        self.get_aad_tenant_id()?;
        self.get_aad_admin_group_object_ids()?;
        self.get_enable_azure_rbac()?;
        self.get_disable_azure_rbac()?;
        self.get_node_os_upgrade_channel()?;
        self.get_assign_identity()?;
        self.get_enable_managed_identity()?;
        self.validate_feature_parameters()
    }

    fn validate_feature_parameters(&self) -> crate::Result<()> {
        self.get_enable_secret_rotation()?;
        self.get_disable_secret_rotation()?;
        self.get_rotation_poll_interval()?;
        self.get_enable_oidc_issuer()?;
        self.get_workload_identity()?;
        self.get_azure_keyvault_kms()?;
        self.get_image_cleaner()?;
        self.get_storage_drivers()?;
        self.get_http_proxy_config()?;
        self.get_workload_autoscalers()?;
        self.get_app_routing()?;
        self.get_k8s_support_plan()?;
        self.get_azure_monitor_metrics()?;
        self.get_service_mesh()?;
        self.get_azure_container_storage()?;
        self.get_cost_analysis()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::Fixture;
    use super::*;
    use crate::aks::models::ManagedCluster;

    #[test]
    fn test_flag_pairs_reject_toggle_conflict() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Update,
            json!({"enable_vpa": true, "disable_vpa": true}),
        );
        assert!(matches!(
            ctx.validate_flag_pairs(),
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));
    }

    #[test]
    fn test_flag_pairs_keep_specific_messages() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Update,
            json!({"enable_public_fqdn": true, "disable_public_fqdn": true}),
        );
        assert!(matches!(
            ctx.validate_flag_pairs(),
            Err(AzCliError::MutuallyExclusiveArgument(msg)) if msg == PUBLIC_FQDN_CONFLICT
        ));

        let ctx = fx.context(
            DecoratorMode::Update,
            json!({"enable_cluster_autoscaler": true, "update_cluster_autoscaler": true}),
        );
        assert!(matches!(
            ctx.validate_flag_pairs(),
            Err(AzCliError::MutuallyExclusiveArgument(msg)) if msg == AUTOSCALER_FLAGS_CONFLICT
        ));
    }

    #[test]
    fn test_create_validation_catches_private_cluster_on_basic_lb() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({
                "resource_group_name": "rg",
                "name": "c",
                "enable_private_cluster": true,
                "load_balancer_sku": "basic",
            }),
        );
        assert!(matches!(
            ctx.validate_parameters(),
            Err(AzCliError::InvalidArgumentValue(msg))
                if msg == "Please use standard load balancer for private cluster"
        ));
        assert!(fx.backend.calls().is_empty());
    }

    #[test]
    fn test_create_validation_requires_client_secret() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"resource_group_name": "rg", "name": "c", "service_principal": "sp-id"}),
        );
        assert!(matches!(
            ctx.validate_parameters(),
            Err(AzCliError::RequiredArgumentMissing(_))
        ));
    }

    #[test]
    fn test_create_validation_accepts_plain_cluster() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({
                "resource_group_name": "rg",
                "name": "c",
                "no_ssh_key": true,
                "enable_managed_identity": true,
            }),
        );
        ctx.validate_parameters().unwrap();
        assert!(fx.backend.calls().is_empty());
    }

    #[test]
    fn test_update_validation_reads_attached_cluster() {
        let fx = Fixture::new();
        let mut ctx = fx.context(
            DecoratorMode::Update,
            json!({"resource_group_name": "rg", "name": "c", "enable_public_fqdn": true}),
        );
        ctx.attach_mc(ManagedCluster::new(Some("eastus".into()))).unwrap();
        assert!(matches!(
            ctx.validate_parameters(),
            Err(AzCliError::InvalidArgumentValue(msg))
                if msg == "--enable-public-fqdn can only be used for private cluster"
        ));
    }
}
