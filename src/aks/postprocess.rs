//! Follow-up work that needs the cluster as the service returned it.
//!
//! Every step here is best effort: a failure is logged and the command
//! still reports the cluster.

use serde_json::Value;

use crate::aks::backend::{ensure_aks_acr, AksBackend, ContainerInsights};
use crate::aks::consts::{
    CONTAINER_STORAGE_EXTENSION_NAME, CONTAINER_STORAGE_EXTENSION_TYPE,
    INGRESS_APPGW_ADDON_NAME, INGRESS_APPGW_APPLICATION_GATEWAY_ID, INGRESS_APPGW_SUBNET_CIDR,
    INGRESS_APPGW_SUBNET_ID, MONITORING_ADDON_NAME, MONITORING_LOG_ANALYTICS_WORKSPACE_RESOURCE_ID,
    ROLE_CONTRIBUTOR,
    ROLE_MONITORING_METRICS_PUBLISHER, ROLE_NETWORK_CONTRIBUTOR,
};
use crate::aks::context::{virtual_node_addon_key, AksContext};
use crate::aks::models::{ManagedCluster, StringMap};
use crate::error::AzCliError;
use crate::rest::LongRunningOperation;

const ACR_ATTACH_FAILED: &str = "Your cluster is successfully created, but we failed to attach \
     acr to it, you can manually grant permission to the identity named <ClUSTER_NAME>-agentpool \
     in MC_ resource group to give it permission to pull from ACR.";

/// What a create or update hands back to the caller.
#[derive(Debug, Clone)]
pub enum ClusterResponse {
    /// The long-running operation finished.
    Completed(Box<ManagedCluster>),
    /// `--no-wait`: the service accepted the request.
    Accepted(LongRunningOperation),
}

impl ClusterResponse {
    pub fn cluster(&self) -> Option<&ManagedCluster> {
        match self {
            ClusterResponse::Completed(mc) => Some(mc),
            ClusterResponse::Accepted(_) => None,
        }
    }

    pub fn to_json(&self) -> crate::Result<Value> {
        let value = match self {
            ClusterResponse::Completed(mc) => serde_json::to_value(mc.as_ref()),
            ClusterResponse::Accepted(op) => serde_json::to_value(op),
        };
        value.map_err(|e| AzCliError::Internal(format!("cannot serialize cluster response: {}", e)))
    }
}

/// Create a role assignment, logging instead of failing.
pub(crate) async fn try_role_assignment(
    backend: &dyn AksBackend,
    role: &str,
    assignee: &str,
    scope: &str,
    failure: &str,
) -> bool {
    match backend.create_role_assignment(role, assignee, scope).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(role, scope, error = %e, "{}", failure);
            false
        }
    }
}

/// `/subscriptions/../virtualNetworks/<vnet>` for a subnet id.
fn vnet_of_subnet(subnet_id: &str) -> Option<&str> {
    let lower = subnet_id.to_ascii_lowercase();
    lower.find("/subnets/").map(|i| &subnet_id[..i])
}

/// `/subscriptions/<sub>/resourceGroups/<rg>` for any resource id.
fn resource_group_scope(resource_id: &str) -> Option<String> {
    let parts: Vec<&str> = resource_id.trim_start_matches('/').split('/').collect();
    if parts.len() >= 4
        && parts[0].eq_ignore_ascii_case("subscriptions")
        && parts[2].eq_ignore_ascii_case("resourceGroups")
    {
        Some(format!("/subscriptions/{}/resourceGroups/{}", parts[1], parts[3]))
    } else {
        None
    }
}

/// Principal used for an addon's role assignments: the addon's own
/// identity on MSI clusters, the service principal otherwise.
fn addon_principal(cluster: &ManagedCluster, addon: &str) -> Option<String> {
    if cluster.is_msi_cluster() {
        cluster
            .addon(addon)
            .and_then(|a| a.identity.as_ref())
            .and_then(|i| i.object_id.clone())
    } else {
        cluster
            .properties
            .service_principal_profile
            .as_ref()
            .map(|p| p.client_id.clone())
    }
}

fn node_subnet(ctx: &AksContext<'_>, cluster: &ManagedCluster) -> Option<String> {
    ctx.get_vnet_subnet_id().or_else(|| {
        cluster
            .properties
            .agent_pool_profiles
            .as_ref()
            .and_then(|pools| pools.first())
            .and_then(|p| p.vnet_subnet_id.clone())
    })
}

pub(crate) fn postprocessing_required(ctx: &AksContext<'_>, msi: bool, attach_acr: bool) -> bool {
    let i = &ctx.intermediates;
    i.monitoring_addon_enabled.get_or(false)
        || i.ingress_appgw_addon_enabled.get_or(false)
        || i.virtual_node_addon_enabled.get_or(false)
        || (msi && attach_acr)
        || i.need_post_creation_vnet_permission_granting.get_or(false)
        || i.azure_container_storage_enabled.get_or(false)
}

/// Role assignments, DCR association, registry access and extension
/// installs for a cluster that has just been written.
pub(crate) async fn postprocess_cluster(
    ctx: &AksContext<'_>,
    cluster: &ManagedCluster,
    attach_acr: Option<&str>,
) {
    let backend = ctx.backend;
    let cluster_id = ctx.cluster_resource_id();

    if ctx.intermediates.monitoring_addon_enabled.get_or(false) {
        if ctx.get_enable_msi_auth_for_monitoring() {
            let workspace = cluster
                .addon(MONITORING_ADDON_NAME)
                .and_then(|a| a.config_value(MONITORING_LOG_ANALYTICS_WORKSPACE_RESOURCE_ID))
                .map(str::to_string)
                .or_else(|| ctx.intermediates.workspace_resource_id.get().cloned())
                .unwrap_or_default();
            let request = ContainerInsights {
                workspace_resource_id: workspace,
                cluster_resource_id: cluster_id.clone(),
                cluster_location: ctx
                    .location_value()
                    .or_else(|| cluster.location.clone())
                    .unwrap_or_default(),
                create_dcr: false,
                create_dcra: true,
            };
            if let Err(e) = backend.ensure_container_insights(&request).await {
                tracing::warn!(error = %e, "Could not associate the data collection rule with the cluster.");
            }
        } else if ctx.arm.cloud_name.eq_ignore_ascii_case("azurecloud") {
            match addon_principal(cluster, MONITORING_ADDON_NAME) {
                Some(principal) => {
                    try_role_assignment(
                        backend,
                        ROLE_MONITORING_METRICS_PUBLISHER,
                        &principal,
                        &cluster_id,
                        "Could not create a role assignment for Monitoring addon. \
                         Are you an Owner on this subscription?",
                    )
                    .await;
                }
                None => tracing::warn!("monitoring addon identity missing from the cluster"),
            }
        }
    }

    if ctx.intermediates.ingress_appgw_addon_enabled.get_or(false) {
        add_ingress_appgw_role_assignments(ctx, cluster).await;
    }

    if ctx.intermediates.virtual_node_addon_enabled.get_or(false) {
        let principal = addon_principal(cluster, &virtual_node_addon_key());
        let vnet = node_subnet(ctx, cluster).and_then(|s| vnet_of_subnet(&s).map(str::to_string));
        match (principal, vnet) {
            (Some(principal), Some(vnet)) => {
                try_role_assignment(
                    backend,
                    ROLE_CONTRIBUTOR,
                    &principal,
                    &vnet,
                    "Could not create a role assignment for virtual node addon. \
                     Are you an Owner on this subscription?",
                )
                .await;
            }
            _ => tracing::warn!(
                "Could not create a role assignment for virtual node addon. \
                 Are you an Owner on this subscription?"
            ),
        }
    }

    if let Some(acr) = attach_acr.filter(|_| cluster.is_msi_cluster()) {
        match cluster.kubelet_identity().and_then(|k| k.object_id.clone()) {
            Some(object_id) => {
                if let Err(e) = ensure_aks_acr(backend, &object_id, acr, false).await {
                    tracing::warn!(acr, error = %e, "{}", ACR_ATTACH_FAILED);
                }
            }
            None => tracing::warn!("{}", ACR_ATTACH_FAILED),
        }
    }

    if ctx.intermediates.azure_container_storage_enabled.get_or(false) {
        let pool_type = ctx
            .intermediates
            .container_storage_pool_type
            .get_or("azureDisk".to_string());
        let settings = StringMap::from([
            ("global.cli.activeControl".to_string(), "true".to_string()),
            ("global.cli.storagePool.install.create".to_string(), "true".to_string()),
            ("global.cli.storagePool.install.type".to_string(), pool_type),
        ]);
        if let Err(e) = backend
            .install_extension(
                &cluster_id,
                CONTAINER_STORAGE_EXTENSION_NAME,
                CONTAINER_STORAGE_EXTENSION_TYPE,
                &settings,
            )
            .await
        {
            tracing::warn!(
                error = %e,
                "Failed to install the Azure Container Storage extension; enable it later with \
                 `az aks update --enable-azure-container-storage`."
            );
        }
    }
}

async fn add_ingress_appgw_role_assignments(ctx: &AksContext<'_>, cluster: &ManagedCluster) {
    let Some(principal) = addon_principal(cluster, INGRESS_APPGW_ADDON_NAME) else {
        tracing::warn!("application gateway addon identity missing from the cluster");
        return;
    };
    let Some(addon) = cluster.addon(INGRESS_APPGW_ADDON_NAME) else {
        return;
    };
    let backend = ctx.backend;

    if let Some(appgw_id) = addon.config_value(INGRESS_APPGW_APPLICATION_GATEWAY_ID) {
        if let Some(scope) = resource_group_scope(appgw_id) {
            try_role_assignment(
                backend,
                ROLE_CONTRIBUTOR,
                &principal,
                &scope,
                "Could not create a role assignment for the application gateway specified in the \
                 ingress-appgw addon. Are you an Owner on this subscription?",
            )
            .await;
        }
    }
    if let Some(subnet_id) = addon.config_value(INGRESS_APPGW_SUBNET_ID) {
        try_role_assignment(
            backend,
            ROLE_NETWORK_CONTRIBUTOR,
            &principal,
            subnet_id,
            "Could not create a role assignment for the subnet specified in the ingress-appgw addon. \
             Are you an Owner on this subscription?",
        )
        .await;
    }
    if addon.config_value(INGRESS_APPGW_SUBNET_CIDR).is_some() {
        if let Some(vnet) = node_subnet(ctx, cluster).and_then(|s| vnet_of_subnet(&s).map(str::to_string)) {
            try_role_assignment(
                backend,
                ROLE_CONTRIBUTOR,
                &principal,
                &vnet,
                "Could not create a role assignment for the cluster's virtual network used by the \
                 ingress-appgw addon. Are you an Owner on this subscription?",
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vnet_of_subnet() {
        let subnet = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/v/subnets/a";
        assert_eq!(
            vnet_of_subnet(subnet),
            Some("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/v")
        );
        assert_eq!(vnet_of_subnet("/no/subnet/here"), None);
    }

    #[test]
    fn test_resource_group_scope() {
        assert_eq!(
            resource_group_scope("/subscriptions/s/resourceGroups/rg/providers/x/y/z").as_deref(),
            Some("/subscriptions/s/resourceGroups/rg")
        );
        assert_eq!(resource_group_scope("not-an-id"), None);
    }
}
