//! `aks update`: fetch the cluster, apply the requested changes, send it back.

use crate::aks::backend::ensure_aks_acr;
use crate::aks::consts::{
    AZURE_KEYVAULT_SECRETS_PROVIDER_ADDON_NAME, CONTAINER_STORAGE_EXTENSION_NAME,
    CONTAINER_STORAGE_NODE_LABEL_KEY, CONTAINER_STORAGE_NODE_LABEL_VALUE,
    INGRESS_APPGW_ADDON_NAME, LICENSE_TYPE_NONE, LICENSE_TYPE_WINDOWS_SERVER,
    MONITORING_ADDON_NAME, ROTATION_POLL_INTERVAL, SECRET_ROTATION_ENABLED, SKU_NAME_BASE,
    SKU_NAME_BASIC,
};
use crate::aks::context::{
    update_load_balancer_profile, update_nat_gateway_profile, virtual_node_addon_key, AksContext,
    ContainerStorageChange, DecoratorMode,
};
use crate::aks::models::{
    AadProfile, ApiServerAccessProfile, AutoUpgradeProfile, AzureMonitorProfile, EnabledFlag,
    IngressProfile, ManagedCluster, ManagedClusterIdentity, ManagedClusterSku, MetricsProfile,
    OidcIssuerProfile, SecurityProfile, StorageProfile, UserAssignedIdentityRef,
    WindowsGmsaProfile, WorkloadAutoScalerProfile,
};
use crate::aks::plan::{BuildPlan, BuildStep, McField};
use crate::aks::postprocess::{postprocess_cluster, postprocessing_required, ClusterResponse};
use crate::error::{map_azure_error, AzCliError};

const RECONCILE_PROMPT: &str =
    "no argument specified to update would you like to reconcile to current settings?";

const NOTHING_TO_UPDATE: &str = "Please specify one or more of \"--enable-cluster-autoscaler\" or \
     \"--disable-cluster-autoscaler\" or \"--update-cluster-autoscaler\" or \
     \"--cluster-autoscaler-profile\" or \"--load-balancer-managed-outbound-ip-count\" or \
     \"--load-balancer-outbound-ips\" or \"--load-balancer-outbound-ip-prefixes\" or \
     \"--load-balancer-outbound-ports\" or \"--load-balancer-idle-timeout\" or \
     \"--nat-gateway-managed-outbound-ip-count\" or \"--nat-gateway-idle-timeout\" or \
     \"--auto-upgrade-channel\" or \"--attach-acr\" or \"--detach-acr\" or \"--uptime-sla\" or \
     \"--no-uptime-sla\" or \"--api-server-authorized-ip-ranges\" or \"--enable-aad\" or \
     \"--aad-tenant-id\" or \"--aad-admin-group-object-ids\" or \"--enable-ahub\" or \
     \"--disable-ahub\" or \"--windows-admin-password\" or \"--enable-managed-identity\" or \
     \"--assign-identity\" or \"--enable-azure-rbac\" or \"--disable-azure-rbac\" or \
     \"--enable-public-fqdn\" or \"--disable-public-fqdn\" or \"--tags\" or \
     \"--nodepool-labels\" or \"--enable-windows-gmsa\".";

const NO_WINDOWS_PROFILE: &str = "Encounter an unexpected error while getting windows profile \
     from the cluster in the process of update.";

/// One mutation of the update command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    AgentPool,
    AutoScalerProfile,
    Tags,
    AttachDetachAcr,
    Sku,
    LoadBalancer,
    NatGateway,
    LocalAccounts,
    ApiServerAccess,
    WindowsProfile,
    Aad,
    AutoUpgrade,
    Identity,
    Addons,
    Defender,
    WorkloadIdentity,
    Storage,
    Kms,
    ImageCleaner,
    HttpProxy,
    WorkloadAutoscaler,
    AppRouting,
    SupportPlan,
    AzureMonitor,
    ServiceMesh,
    ContainerStorage,
    CostAnalysis,
}

impl UpdateStep {
    pub const ALL: [UpdateStep; 27] = [
        UpdateStep::AgentPool,
        UpdateStep::AutoScalerProfile,
        UpdateStep::Tags,
        UpdateStep::AttachDetachAcr,
        UpdateStep::Sku,
        UpdateStep::LoadBalancer,
        UpdateStep::NatGateway,
        UpdateStep::LocalAccounts,
        UpdateStep::ApiServerAccess,
        UpdateStep::WindowsProfile,
        UpdateStep::Aad,
        UpdateStep::AutoUpgrade,
        UpdateStep::Identity,
        UpdateStep::Addons,
        UpdateStep::Defender,
        UpdateStep::WorkloadIdentity,
        UpdateStep::Storage,
        UpdateStep::Kms,
        UpdateStep::ImageCleaner,
        UpdateStep::HttpProxy,
        UpdateStep::WorkloadAutoscaler,
        UpdateStep::AppRouting,
        UpdateStep::SupportPlan,
        UpdateStep::AzureMonitor,
        UpdateStep::ServiceMesh,
        UpdateStep::ContainerStorage,
        UpdateStep::CostAnalysis,
    ];
}

impl BuildStep for UpdateStep {
    fn name(&self) -> &'static str {
        match self {
            UpdateStep::AgentPool => "agentpool",
            UpdateStep::AutoScalerProfile => "auto_scaler_profile",
            UpdateStep::Tags => "tags",
            UpdateStep::AttachDetachAcr => "attach_detach_acr",
            UpdateStep::Sku => "sku",
            UpdateStep::LoadBalancer => "load_balancer",
            UpdateStep::NatGateway => "nat_gateway",
            UpdateStep::LocalAccounts => "local_accounts",
            UpdateStep::ApiServerAccess => "api_server_access",
            UpdateStep::WindowsProfile => "windows_profile",
            UpdateStep::Aad => "aad",
            UpdateStep::AutoUpgrade => "auto_upgrade",
            UpdateStep::Identity => "identity",
            UpdateStep::Addons => "addons",
            UpdateStep::Defender => "defender",
            UpdateStep::WorkloadIdentity => "workload_identity",
            UpdateStep::Storage => "storage",
            UpdateStep::Kms => "kms",
            UpdateStep::ImageCleaner => "image_cleaner",
            UpdateStep::HttpProxy => "http_proxy",
            UpdateStep::WorkloadAutoscaler => "workload_autoscaler",
            UpdateStep::AppRouting => "app_routing",
            UpdateStep::SupportPlan => "support_plan",
            UpdateStep::AzureMonitor => "azure_monitor",
            UpdateStep::ServiceMesh => "service_mesh",
            UpdateStep::ContainerStorage => "container_storage",
            UpdateStep::CostAnalysis => "cost_analysis",
        }
    }

    fn reads(&self) -> &'static [McField] {
        use McField::*;
        match self {
            // acrpull goes to the identity the cluster has before this update
            UpdateStep::AttachDetachAcr => &[IdentityProfile, ServicePrincipalProfile],
            UpdateStep::NatGateway => &[NetworkProfile],
            UpdateStep::WorkloadIdentity => &[OidcIssuerProfile],
            UpdateStep::SupportPlan | UpdateStep::CostAnalysis => &[Sku],
            UpdateStep::ContainerStorage => &[AgentPoolProfiles],
            _ => &[],
        }
    }

    fn writes(&self) -> &'static [McField] {
        use McField::*;
        match self {
            UpdateStep::AgentPool => &[AgentPoolProfiles],
            UpdateStep::AutoScalerProfile => &[AutoScalerProfile],
            UpdateStep::Tags => &[Tags],
            UpdateStep::AttachDetachAcr => &[AcrAttach],
            UpdateStep::Sku => &[Sku],
            UpdateStep::LoadBalancer | UpdateStep::NatGateway => &[NetworkProfile],
            UpdateStep::LocalAccounts => &[DisableLocalAccounts],
            UpdateStep::ApiServerAccess => &[ApiServerAccessProfile],
            UpdateStep::WindowsProfile => &[WindowsProfile],
            UpdateStep::Aad => &[AadProfile],
            UpdateStep::AutoUpgrade => &[AutoUpgradeProfile],
            UpdateStep::Identity => &[Identity],
            UpdateStep::Addons => &[AddonProfiles],
            UpdateStep::Defender | UpdateStep::Kms | UpdateStep::ImageCleaner => &[SecurityProfile],
            UpdateStep::WorkloadIdentity => &[SecurityProfile, OidcIssuerProfile],
            UpdateStep::Storage => &[StorageProfile],
            UpdateStep::HttpProxy => &[HttpProxyConfig],
            UpdateStep::WorkloadAutoscaler => &[WorkloadAutoScalerProfile],
            UpdateStep::AppRouting => &[IngressProfile],
            UpdateStep::SupportPlan => &[SupportPlan],
            UpdateStep::AzureMonitor => &[AzureMonitorProfile],
            UpdateStep::ServiceMesh => &[ServiceMeshProfile],
            UpdateStep::ContainerStorage => &[ContainerStorage, AgentPoolProfiles],
            UpdateStep::CostAnalysis => &[MetricsProfile],
        }
    }
}

/// Applies flag changes to an existing cluster for `aks update`.
pub struct UpdateDecorator<'a> {
    ctx: AksContext<'a>,
}

impl<'a> UpdateDecorator<'a> {
    pub fn new(ctx: AksContext<'a>) -> crate::Result<Self> {
        if ctx.mode != DecoratorMode::Update {
            return Err(AzCliError::Internal(
                "the update decorator needs a context in update mode".to_string(),
            ));
        }
        Ok(UpdateDecorator { ctx })
    }

    pub fn context(&self) -> &AksContext<'a> {
        &self.ctx
    }

    pub fn plan() -> crate::Result<BuildPlan<UpdateStep>> {
        BuildPlan::sorted(&UpdateStep::ALL)
    }

    /// Refuse a no-op update unless the user asks to reconcile the cluster
    /// to its current settings.
    pub fn check_raw_parameters(&self) -> crate::Result<()> {
        let excluded = ["resource_group_name", "name"];
        let is_changed = self.ctx.raw.iter_set_except(&excluded).next().is_some();
        let is_default = self.ctx.get_cluster_autoscaler_profile()?.is_none()
            && self.ctx.get_api_server_authorized_ip_ranges()?.is_none()
            && self.ctx.get_nodepool_labels().is_none();
        if is_changed || !is_default {
            return Ok(());
        }
        if self.ctx.prompter.confirm(RECONCILE_PROMPT, false)? {
            return Ok(());
        }
        Err(AzCliError::RequiredArgumentMissing(NOTHING_TO_UPDATE.to_string()))
    }

    pub async fn fetch_mc(&mut self) -> crate::Result<()> {
        let mc = self
            .ctx
            .backend
            .get_cluster(&self.ctx.get_resource_group_name(), &self.ctx.get_name())
            .await
            .map_err(map_azure_error)?;
        self.ctx.attach_mc(mc)
    }

    /// Validate, fetch and apply every step; returns the cluster to send.
    pub async fn update_mc_profile_default(&mut self) -> crate::Result<ManagedCluster> {
        self.check_raw_parameters()?;
        self.ctx.validate_flag_pairs()?;
        self.fetch_mc().await?;
        self.ctx.validate_parameters()?;
        for step in Self::plan()? {
            tracing::debug!(step = step.name(), "running update step");
            self.run_step(step).await?;
        }
        self.ctx
            .mc()
            .cloned()
            .ok_or_else(|| AzCliError::Internal("no managed cluster attached".to_string()))
    }

    async fn run_step(&mut self, step: UpdateStep) -> crate::Result<()> {
        match step {
            UpdateStep::AgentPool => self.update_agentpool_profile(),
            UpdateStep::AutoScalerProfile => self.update_auto_scaler_profile(),
            UpdateStep::Tags => self.update_tags(),
            UpdateStep::AttachDetachAcr => self.process_attach_detach_acr().await,
            UpdateStep::Sku => self.update_sku(),
            UpdateStep::LoadBalancer => self.update_load_balancer_profile(),
            UpdateStep::NatGateway => self.update_nat_gateway_profile(),
            UpdateStep::LocalAccounts => self.update_disable_local_accounts(),
            UpdateStep::ApiServerAccess => self.update_api_server_access_profile(),
            UpdateStep::WindowsProfile => self.update_windows_profile(),
            UpdateStep::Aad => self.update_aad_profile(),
            UpdateStep::AutoUpgrade => self.update_auto_upgrade_profile(),
            UpdateStep::Identity => self.update_identity(),
            UpdateStep::Addons => self.update_addon_profiles(),
            UpdateStep::Defender => self.update_defender().await,
            UpdateStep::WorkloadIdentity => self.update_workload_identity(),
            UpdateStep::Storage => self.update_storage_profile(),
            UpdateStep::Kms => self.update_azure_keyvault_kms(),
            UpdateStep::ImageCleaner => self.update_image_cleaner(),
            UpdateStep::HttpProxy => self.update_http_proxy_config(),
            UpdateStep::WorkloadAutoscaler => self.update_workload_auto_scaler_profile(),
            UpdateStep::AppRouting => self.update_app_routing(),
            UpdateStep::SupportPlan => self.update_k8s_support_plan(),
            UpdateStep::AzureMonitor => self.update_azure_monitor_profile(),
            UpdateStep::ServiceMesh => self.update_service_mesh_profile(),
            UpdateStep::ContainerStorage => self.update_azure_container_storage().await,
            UpdateStep::CostAnalysis => self.update_metrics_profile(),
        }
    }

    fn security_profile(&mut self) -> crate::Result<&mut SecurityProfile> {
        Ok(self
            .ctx
            .mc_mut()?
            .properties
            .security_profile
            .get_or_insert_with(SecurityProfile::default))
    }

    fn update_agentpool_profile(&mut self) -> crate::Result<()> {
        let mut pools = self
            .ctx
            .mc()
            .and_then(|mc| mc.properties.agent_pool_profiles.clone())
            .unwrap_or_default();
        self.ctx.update_agentpool_profiles(&mut pools)?;
        self.ctx.mc_mut()?.properties.agent_pool_profiles = Some(pools);
        Ok(())
    }

    fn update_auto_scaler_profile(&mut self) -> crate::Result<()> {
        if let Some(profile) = self.ctx.get_cluster_autoscaler_profile()? {
            self.ctx.mc_mut()?.properties.auto_scaler_profile = Some(profile);
        }
        Ok(())
    }

    fn update_tags(&mut self) -> crate::Result<()> {
        if let Some(tags) = self.ctx.get_tags() {
            self.ctx.mc_mut()?.tags = Some(tags);
        }
        Ok(())
    }

    async fn process_attach_detach_acr(&mut self) -> crate::Result<()> {
        let attach = self.ctx.get_attach_acr()?;
        let detach = self.ctx.get_detach_acr();
        if attach.is_none() && detach.is_none() {
            return Ok(());
        }
        let (assignee, _) = self.ctx.get_assignee_from_identity_or_sp_profile()?;
        if let Some(acr) = attach {
            ensure_aks_acr(self.ctx.backend, &assignee, &acr, false).await?;
        }
        if let Some(acr) = detach {
            ensure_aks_acr(self.ctx.backend, &assignee, &acr, true).await?;
        }
        Ok(())
    }

    fn update_sku(&mut self) -> crate::Result<()> {
        let Some(tier) = self.ctx.get_tier()? else {
            return Ok(());
        };
        let name = if self.ctx.caps.legacy_sku { SKU_NAME_BASIC } else { SKU_NAME_BASE };
        self.ctx.mc_mut()?.sku = Some(ManagedClusterSku {
            name: Some(name.to_string()),
            tier: Some(tier),
        });
        Ok(())
    }

    fn update_load_balancer_profile(&mut self) -> crate::Result<()> {
        let args = self.ctx.get_load_balancer_args();
        let network = self
            .ctx
            .mc_mut()?
            .properties
            .network_profile
            .as_mut()
            .ok_or_else(|| {
                AzCliError::UnknownError(
                    "Encounter an unexpected error while getting network profile from the cluster \
                     in the process of updating its load balancer profile."
                        .to_string(),
                )
            })?;
        network.load_balancer_profile =
            update_load_balancer_profile(network.load_balancer_profile.take(), &args);
        Ok(())
    }

    fn update_nat_gateway_profile(&mut self) -> crate::Result<()> {
        let count = self.ctx.get_nat_gateway_managed_outbound_ip_count();
        let idle_timeout = self.ctx.get_nat_gateway_idle_timeout();
        if count.is_none() && idle_timeout.is_none() {
            return Ok(());
        }
        let network = self
            .ctx
            .mc_mut()?
            .properties
            .network_profile
            .as_mut()
            .ok_or_else(|| {
                AzCliError::UnknownError(
                    "Unexpectedly get an empty network profile in the process of updating nat \
                     gateway profile."
                        .to_string(),
                )
            })?;
        network.nat_gateway_profile =
            update_nat_gateway_profile(network.nat_gateway_profile.take(), count, idle_timeout);
        Ok(())
    }

    fn update_disable_local_accounts(&mut self) -> crate::Result<()> {
        let disable = self.ctx.get_disable_local_accounts()?;
        let enable = self.ctx.get_enable_local_accounts()?;
        let mc = self.ctx.mc_mut()?;
        if disable {
            mc.properties.disable_local_accounts = Some(true);
        }
        if enable {
            mc.properties.disable_local_accounts = Some(false);
        }
        Ok(())
    }

    /// An access profile emptied by this update is dropped altogether.
    fn update_api_server_access_profile(&mut self) -> crate::Result<()> {
        let ranges = self.ctx.get_api_server_authorized_ip_ranges()?;
        let disable_public_fqdn = self.ctx.get_disable_public_fqdn()?;
        let enable_public_fqdn = self.ctx.get_enable_public_fqdn()?;

        let mc = self.ctx.mc_mut()?;
        let original = mc.properties.api_server_access_profile.clone();
        let mut profile = original.clone().unwrap_or_default();
        if let Some(ranges) = ranges {
            profile.authorized_ip_ranges = Some(ranges);
        }
        if disable_public_fqdn {
            profile.enable_private_cluster_public_fqdn = Some(false);
        }
        if enable_public_fqdn {
            profile.enable_private_cluster_public_fqdn = Some(true);
        }

        let blank = ApiServerAccessProfile {
            authorized_ip_ranges: None,
            ..profile.clone()
        } == ApiServerAccessProfile::default()
            && profile.authorized_ip_ranges.as_ref().is_none_or(|r| r.is_empty());
        let emptied = blank && original.as_ref() != Some(&profile);
        mc.properties.api_server_access_profile = if emptied { None } else { Some(profile) };
        Ok(())
    }

    fn update_windows_profile(&mut self) -> crate::Result<()> {
        let enable_ahub = self.ctx.get_enable_ahub()?;
        let disable_ahub = self.ctx.get_disable_ahub()?;
        let password = self.ctx.get_windows_admin_password();
        let gmsa_requested = self.ctx.enable_windows_gmsa_value();
        if !(enable_ahub || disable_ahub || password.is_some() || gmsa_requested) {
            return Ok(());
        }
        if self.ctx.mc().is_none_or(|mc| mc.properties.windows_profile.is_none()) {
            return Err(AzCliError::UnknownError(NO_WINDOWS_PROFILE.to_string()));
        }
        let gmsa = if gmsa_requested {
            let (_, dns_server, root_domain_name) = self.ctx.get_windows_gmsa()?;
            Some(WindowsGmsaProfile {
                enabled: true,
                dns_server,
                root_domain_name,
            })
        } else {
            None
        };

        let profile = self
            .ctx
            .mc_mut()?
            .properties
            .windows_profile
            .as_mut()
            .ok_or_else(|| AzCliError::UnknownError(NO_WINDOWS_PROFILE.to_string()))?;
        if enable_ahub {
            profile.license_type = Some(LICENSE_TYPE_WINDOWS_SERVER.to_string());
        }
        if disable_ahub {
            profile.license_type = Some(LICENSE_TYPE_NONE.to_string());
        }
        if password.is_some() {
            profile.admin_password = password;
        }
        if gmsa.is_some() {
            profile.gmsa_profile = gmsa;
        }
        Ok(())
    }

    fn update_aad_profile(&mut self) -> crate::Result<()> {
        let enable_aad = self.ctx.get_enable_aad()?;
        let tenant_id = self.ctx.get_aad_tenant_id()?;
        let admin_groups = self.ctx.get_aad_admin_group_object_ids()?;
        let enable_azure_rbac = self.ctx.get_enable_azure_rbac()?;
        let disable_azure_rbac = self.ctx.get_disable_azure_rbac()?;

        let mc = self.ctx.mc_mut()?;
        if enable_aad {
            mc.properties.aad_profile = Some(AadProfile {
                managed: Some(true),
                ..AadProfile::default()
            });
        }
        let changes = tenant_id.is_some()
            || admin_groups.is_some()
            || enable_azure_rbac
            || disable_azure_rbac;
        if !changes {
            return Ok(());
        }
        let profile = mc.properties.aad_profile.get_or_insert_with(AadProfile::default);
        if tenant_id.is_some() {
            profile.tenant_id = tenant_id;
        }
        if admin_groups.is_some() {
            profile.admin_group_object_ids = admin_groups;
        }
        if enable_azure_rbac {
            profile.enable_azure_rbac = Some(true);
        }
        if disable_azure_rbac {
            profile.enable_azure_rbac = Some(false);
        }
        Ok(())
    }

    fn update_auto_upgrade_profile(&mut self) -> crate::Result<()> {
        let channel = self.ctx.get_auto_upgrade_channel();
        let node_os_channel = self.ctx.get_node_os_upgrade_channel()?;
        if channel.is_none() && node_os_channel.is_none() {
            return Ok(());
        }
        let profile = self
            .ctx
            .mc_mut()?
            .properties
            .auto_upgrade_profile
            .get_or_insert_with(AutoUpgradeProfile::default);
        if channel.is_some() {
            profile.upgrade_channel = channel;
        }
        if node_os_channel.is_some() {
            profile.node_os_upgrade_channel = node_os_channel;
        }
        Ok(())
    }

    /// Switch between service principal, system- and user-assigned identity,
    /// confirming first.
    fn update_identity(&mut self) -> crate::Result<()> {
        let current = self
            .ctx
            .mc()
            .and_then(|mc| mc.identity.as_ref())
            .map(|i| i.identity_type.to_ascii_lowercase())
            .unwrap_or_else(|| "spn".to_string());
        let assign_identity = self.ctx.get_assign_identity()?;
        let goal = if self.ctx.get_enable_managed_identity()? {
            let goal = if assign_identity.is_some() { "userassigned" } else { "systemassigned" };
            goal.to_string()
        } else {
            current.clone()
        };
        if current == goal {
            return Ok(());
        }

        let msg = if current == "spn" {
            format!(
                "Your cluster is using service principal, and you are going to update the cluster \
                 to use {} managed identity.\nAfter updating, your cluster's control plane and addon \
                 pods will switch to use managed identity, but kubelet will KEEP USING SERVICE \
                 PRINCIPAL until you upgrade your agentpool.\nAre you sure you want to perform this \
                 operation?",
                goal
            )
        } else {
            format!(
                "Your cluster is already using {} managed identity, and you are going to update \
                 the cluster to use {} managed identity.\nAre you sure you want to perform this \
                 operation?",
                current, goal
            )
        };
        if !self.ctx.get_yes() && !self.ctx.prompter.confirm(&msg, false)? {
            return Err(AzCliError::DecoratorEarlyExit);
        }

        let identity = match assign_identity {
            Some(id) if goal == "userassigned" => ManagedClusterIdentity {
                identity_type: "UserAssigned".to_string(),
                user_assigned_identities: Some(
                    [(id, UserAssignedIdentityRef::default())].into_iter().collect(),
                ),
                ..ManagedClusterIdentity::default()
            },
            _ => ManagedClusterIdentity {
                identity_type: "SystemAssigned".to_string(),
                ..ManagedClusterIdentity::default()
            },
        };
        self.ctx.mc_mut()?.identity = Some(identity);
        Ok(())
    }

    /// Record which addons need post-processing and apply secret rotation
    /// settings to the key vault secrets provider.
    fn update_addon_profiles(&mut self) -> crate::Result<()> {
        if let Some(mc) = self.ctx.mc().filter(|mc| mc.properties.addon_profiles.is_some()) {
            let monitoring = mc.is_addon_enabled(MONITORING_ADDON_NAME);
            let appgw = mc.is_addon_enabled(INGRESS_APPGW_ADDON_NAME);
            let virtual_node = mc.is_addon_enabled(&virtual_node_addon_key());
            let i = &mut self.ctx.intermediates;
            i.monitoring_addon_enabled.set(monitoring, true);
            i.ingress_appgw_addon_enabled.set(appgw, true);
            i.virtual_node_addon_enabled.set(virtual_node, true);
        }

        let enable_rotation = self.ctx.get_enable_secret_rotation()?;
        let disable_rotation = self.ctx.get_disable_secret_rotation()?;
        let interval = self.ctx.get_rotation_poll_interval()?;
        if !(enable_rotation || disable_rotation || interval.is_some()) {
            return Ok(());
        }
        let Some(addon) = self
            .ctx
            .mc_mut()?
            .properties
            .addon_profiles
            .as_mut()
            .and_then(|addons| addons.get_mut(AZURE_KEYVAULT_SECRETS_PROVIDER_ADDON_NAME))
        else {
            return Ok(());
        };
        let config = addon.config.get_or_insert_with(Default::default);
        if enable_rotation {
            config.insert(SECRET_ROTATION_ENABLED.to_string(), "true".to_string());
        }
        if disable_rotation {
            config.insert(SECRET_ROTATION_ENABLED.to_string(), "false".to_string());
        }
        if let Some(interval) = interval {
            config.insert(ROTATION_POLL_INTERVAL.to_string(), interval);
        }
        Ok(())
    }

    async fn update_defender(&mut self) -> crate::Result<()> {
        if let Some(profile) = self.ctx.get_defender_profile().await? {
            self.security_profile()?.defender = Some(profile);
        }
        Ok(())
    }

    fn update_workload_identity(&mut self) -> crate::Result<()> {
        let oidc = self.ctx.get_enable_oidc_issuer()?;
        let workload_identity = self.ctx.get_workload_identity()?;
        if oidc {
            let profile = self
                .ctx
                .mc_mut()?
                .properties
                .oidc_issuer_profile
                .get_or_insert_with(OidcIssuerProfile::default);
            profile.enabled = true;
        }
        if let Some(enabled) = workload_identity {
            self.security_profile()?.workload_identity = Some(EnabledFlag::new(enabled));
        }
        Ok(())
    }

    fn update_storage_profile(&mut self) -> crate::Result<()> {
        let drivers = self.ctx.get_storage_drivers()?;
        if !drivers.any() {
            return Ok(());
        }
        let profile = self
            .ctx
            .mc_mut()?
            .properties
            .storage_profile
            .get_or_insert_with(StorageProfile::default);
        let apply = |slot: &mut Option<EnabledFlag>, toggle: Option<bool>| {
            if let Some(enabled) = toggle {
                *slot = Some(EnabledFlag::new(enabled));
            }
        };
        apply(&mut profile.disk_csi_driver, drivers.disk);
        apply(&mut profile.file_csi_driver, drivers.file);
        apply(&mut profile.blob_csi_driver, drivers.blob);
        apply(&mut profile.snapshot_controller, drivers.snapshot_controller);
        Ok(())
    }

    fn update_azure_keyvault_kms(&mut self) -> crate::Result<()> {
        if let Some(kms) = self.ctx.get_azure_keyvault_kms()? {
            self.security_profile()?.azure_key_vault_kms = Some(kms);
        }
        Ok(())
    }

    fn update_image_cleaner(&mut self) -> crate::Result<()> {
        if let Some(cleaner) = self.ctx.get_image_cleaner()? {
            self.security_profile()?.image_cleaner = Some(cleaner);
        }
        Ok(())
    }

    fn update_http_proxy_config(&mut self) -> crate::Result<()> {
        if let Some(config) = self.ctx.get_http_proxy_config()? {
            self.ctx.mc_mut()?.properties.http_proxy_config = Some(config);
        }
        Ok(())
    }

    fn update_workload_auto_scaler_profile(&mut self) -> crate::Result<()> {
        let (keda, vpa) = self.ctx.get_workload_autoscalers()?;
        if keda.is_none() && vpa.is_none() {
            return Ok(());
        }
        let profile = self
            .ctx
            .mc_mut()?
            .properties
            .workload_auto_scaler_profile
            .get_or_insert_with(WorkloadAutoScalerProfile::default);
        if let Some(enabled) = keda {
            profile.keda = Some(EnabledFlag::new(enabled));
        }
        if let Some(enabled) = vpa {
            profile.vertical_pod_autoscaler = Some(EnabledFlag::new(enabled));
        }
        Ok(())
    }

    fn update_app_routing(&mut self) -> crate::Result<()> {
        if let Some(routing) = self.ctx.get_app_routing()? {
            let profile = self
                .ctx
                .mc_mut()?
                .properties
                .ingress_profile
                .get_or_insert_with(IngressProfile::default);
            let zones = routing.dns_zone_resource_ids.or_else(|| {
                profile
                    .web_app_routing
                    .as_ref()
                    .and_then(|w| w.dns_zone_resource_ids.clone())
            });
            profile.web_app_routing = Some(crate::aks::models::WebAppRouting {
                enabled: routing.enabled,
                dns_zone_resource_ids: zones,
            });
        }
        Ok(())
    }

    fn update_k8s_support_plan(&mut self) -> crate::Result<()> {
        if let Some(plan) = self.ctx.get_k8s_support_plan()? {
            self.ctx.mc_mut()?.properties.support_plan = Some(plan);
        }
        Ok(())
    }

    fn update_azure_monitor_profile(&mut self) -> crate::Result<()> {
        if let Some(metrics) = self.ctx.get_azure_monitor_metrics()? {
            self.ctx
                .mc_mut()?
                .properties
                .azure_monitor_profile
                .get_or_insert_with(AzureMonitorProfile::default)
                .metrics = Some(metrics);
        }
        Ok(())
    }

    fn update_service_mesh_profile(&mut self) -> crate::Result<()> {
        if let Some(profile) = self.ctx.get_service_mesh()? {
            self.ctx.mc_mut()?.properties.service_mesh_profile = Some(profile);
        }
        Ok(())
    }

    /// Enabling labels every pool and installs the extension after the PUT;
    /// disabling removes the extension first, then the labels.
    async fn update_azure_container_storage(&mut self) -> crate::Result<()> {
        match self.ctx.get_azure_container_storage()? {
            None => Ok(()),
            Some(ContainerStorageChange::Enable { pool_type }) => {
                if let Some(pools) = self.ctx.mc_mut()?.properties.agent_pool_profiles.as_mut() {
                    for pool in pools.iter_mut() {
                        pool.node_labels.get_or_insert_with(Default::default).insert(
                            CONTAINER_STORAGE_NODE_LABEL_KEY.to_string(),
                            CONTAINER_STORAGE_NODE_LABEL_VALUE.to_string(),
                        );
                    }
                }
                self.ctx.intermediates.azure_container_storage_enabled.set(true, true);
                self.ctx.intermediates.container_storage_pool_type.set(pool_type, true);
                Ok(())
            }
            Some(ContainerStorageChange::Disable) => {
                let msg = "Disabling Azure Container Storage will forcefully delete all the \
                           storage pools in the cluster and affect the applications using them. \
                           Are you sure you want to continue?";
                crate::prompt::user_confirmation(self.ctx.prompter, msg, self.ctx.get_yes())?;
                self.ctx
                    .backend
                    .uninstall_extension(&self.ctx.cluster_resource_id(), CONTAINER_STORAGE_EXTENSION_NAME)
                    .await?;
                if let Some(pools) = self.ctx.mc_mut()?.properties.agent_pool_profiles.as_mut() {
                    for pool in pools.iter_mut() {
                        if let Some(labels) = pool.node_labels.as_mut() {
                            labels.remove(CONTAINER_STORAGE_NODE_LABEL_KEY);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn update_metrics_profile(&mut self) -> crate::Result<()> {
        if let Some(enabled) = self.ctx.get_cost_analysis()? {
            self.ctx
                .mc_mut()?
                .properties
                .metrics_profile
                .get_or_insert_with(MetricsProfile::default)
                .cost_analysis = Some(EnabledFlag::new(enabled));
        }
        Ok(())
    }

    /// Registry access was already granted by the attach step, so only the
    /// addon and storage follow-ups count here.
    pub fn check_is_postprocessing_required(&self) -> bool {
        postprocessing_required(&self.ctx, false, false)
    }

    pub async fn update_mc(&self, mc: &ManagedCluster) -> crate::Result<ClusterResponse> {
        if self.ctx.mc() != Some(mc) {
            return Err(AzCliError::Internal(
                "Inconsistent state detected. The incoming `mc` is not the same as the `mc` in the context."
                    .to_string(),
            ));
        }
        let backend = self.ctx.backend;
        let resource_group = self.ctx.get_resource_group_name();
        let name = self.ctx.get_name();

        let op = backend
            .begin_create_or_update(&resource_group, &name, mc)
            .await
            .map_err(map_azure_error)?;
        if self.check_is_postprocessing_required() {
            let cluster = backend.wait_cluster(&op).await.map_err(map_azure_error)?;
            postprocess_cluster(&self.ctx, &cluster, None).await;
            return Ok(ClusterResponse::Completed(Box::new(cluster)));
        }
        if self.ctx.get_no_wait() {
            return Ok(ClusterResponse::Accepted(op));
        }
        let cluster = backend.wait_cluster(&op).await.map_err(map_azure_error)?;
        Ok(ClusterResponse::Completed(Box::new(cluster)))
    }
}

/// `aks update` end to end.
pub async fn aks_update(ctx: AksContext<'_>) -> crate::Result<ClusterResponse> {
    let mut decorator = UpdateDecorator::new(ctx)?;
    let mc = decorator.update_mc_profile_default().await?;
    decorator.update_mc(&mc).await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::aks::backend::fake::FakeBackend;
    use crate::aks::context::testing::Fixture;
    use crate::aks::models::{
        AddonProfile, AgentPoolProfile, LoadBalancerProfile, ManagedOutboundIps, NetworkProfile,
        UserAssignedIdentity, WindowsProfile, KUBELET_IDENTITY_KEY,
    };

    fn existing_cluster() -> ManagedCluster {
        let mut mc = ManagedCluster::new(Some("eastus".into()));
        mc.identity = Some(ManagedClusterIdentity {
            identity_type: "SystemAssigned".into(),
            principal_id: Some("cluster-principal".into()),
            ..Default::default()
        });
        mc.properties.agent_pool_profiles = Some(vec![AgentPoolProfile {
            name: "nodepool1".into(),
            count: Some(3),
            ..Default::default()
        }]);
        mc.properties.network_profile = Some(NetworkProfile {
            network_plugin: Some("kubenet".into()),
            load_balancer_sku: Some("standard".into()),
            load_balancer_profile: Some(LoadBalancerProfile {
                managed_outbound_ips: Some(ManagedOutboundIps { count: Some(1) }),
                ..Default::default()
            }),
            ..Default::default()
        });
        mc.properties.identity_profile = Some(BTreeMap::from([(
            KUBELET_IDENTITY_KEY.to_string(),
            UserAssignedIdentity {
                resource_id: Some("/kubelet".into()),
                client_id: Some("kubelet-client".into()),
                object_id: Some("kubelet-object".into()),
            },
        )]));
        mc
    }

    fn fixture(answers: &[&str], mc: ManagedCluster) -> Fixture {
        let mut fx = Fixture::with_answers(answers);
        fx.backend = FakeBackend::with_existing(mc);
        fx
    }

    fn params(extra: serde_json::Value) -> serde_json::Value {
        let mut base = json!({"resource_group_name": "rg", "name": "cluster"});
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        base
    }

    #[test]
    fn test_plan_respects_dependencies() {
        let plan = UpdateDecorator::plan().unwrap();
        assert_eq!(plan.steps().len(), UpdateStep::ALL.len());
        let pos = |n: &str| plan.position(n).unwrap();
        assert!(pos("load_balancer") < pos("nat_gateway"));
        assert!(pos("sku") < pos("support_plan"));
        assert!(pos("agentpool") < pos("container_storage"));
        assert!(pos("workload_identity") < pos("kms"));
    }

    #[tokio::test]
    async fn test_no_op_update_declined() {
        let fx = fixture(&["n"], existing_cluster());
        let ctx = fx.context(DecoratorMode::Update, params(json!({})));
        let result = aks_update(ctx).await;
        assert!(matches!(
            result,
            Err(AzCliError::RequiredArgumentMissing(msg)) if msg.starts_with("Please specify one or more of")
        ));
        assert_eq!(fx.prompter.asked(), vec![RECONCILE_PROMPT.to_string()]);
        assert!(fx.backend.calls_starting_with("get_cluster").is_empty());
        assert!(fx.backend.puts().is_empty());
    }

    #[tokio::test]
    async fn test_no_op_update_reconciles() {
        let fx = fixture(&["y"], existing_cluster());
        let ctx = fx.context(DecoratorMode::Update, params(json!({})));
        let response = aks_update(ctx).await.unwrap();
        assert!(response.cluster().is_some());
        assert_eq!(fx.backend.puts().len(), 1);
        assert_eq!(fx.backend.puts()[0].properties, existing_cluster().properties);
    }

    #[tokio::test]
    async fn test_update_tags_labels_and_load_balancer() {
        let fx = fixture(&[], existing_cluster());
        let ctx = fx.context(
            DecoratorMode::Update,
            params(json!({
                "tags": {"env": "prod"},
                "nodepool_labels": {"team": "a"},
                "load_balancer_outbound_ports": 1024,
                "nat_gateway_idle_timeout": 10,
            })),
        );
        aks_update(ctx).await.unwrap();
        let sent = &fx.backend.puts()[0];
        assert_eq!(sent.tags.as_ref().and_then(|t| t.get("env")).map(String::as_str), Some("prod"));
        let pool = &sent.properties.agent_pool_profiles.as_ref().unwrap()[0];
        assert_eq!(pool.node_labels.as_ref().and_then(|l| l.get("team")).map(String::as_str), Some("a"));
        let network = sent.properties.network_profile.as_ref().unwrap();
        let lb = network.load_balancer_profile.as_ref().unwrap();
        assert_eq!(lb.allocated_outbound_ports, Some(1024));
        assert_eq!(lb.managed_outbound_ips, Some(ManagedOutboundIps { count: Some(1) }));
        assert_eq!(
            network.nat_gateway_profile.as_ref().and_then(|n| n.idle_timeout_in_minutes),
            Some(10)
        );
    }

    #[tokio::test]
    async fn test_enable_autoscaler() {
        let fx = fixture(&[], existing_cluster());
        let ctx = fx.context(
            DecoratorMode::Update,
            params(json!({"enable_cluster_autoscaler": true, "min_count": 1, "max_count": 5})),
        );
        aks_update(ctx).await.unwrap();
        let pool = &fx.backend.puts()[0].properties.agent_pool_profiles.clone().unwrap()[0];
        assert_eq!(pool.enable_auto_scaling, Some(true));
        assert_eq!((pool.min_count, pool.max_count), (Some(1), Some(5)));
    }

    #[tokio::test]
    async fn test_attach_acr_grants_kubelet_identity() {
        let fx = fixture(&[], existing_cluster());
        let ctx = fx.context(DecoratorMode::Update, params(json!({"attach_acr": "myacr"})));
        aks_update(ctx).await.unwrap();
        assert_eq!(
            fx.backend.calls_starting_with("role_create"),
            vec!["role_create acrpull kubelet-object /registries/myacr".to_string()]
        );
    }

    #[tokio::test]
    async fn test_identity_change_prompts() {
        let mut spn_cluster = existing_cluster();
        spn_cluster.identity = None;
        let fx = fixture(&["y"], spn_cluster.clone());
        let ctx = fx.context(DecoratorMode::Update, params(json!({"enable_managed_identity": true})));
        aks_update(ctx).await.unwrap();
        assert!(fx.prompter.asked()[0].starts_with("Your cluster is using service principal"));
        assert_eq!(
            fx.backend.puts()[0].identity.as_ref().map(|i| i.identity_type.as_str()),
            Some("SystemAssigned")
        );

        let fx = fixture(&["n"], spn_cluster);
        let ctx = fx.context(DecoratorMode::Update, params(json!({"enable_managed_identity": true})));
        assert!(matches!(aks_update(ctx).await, Err(AzCliError::DecoratorEarlyExit)));
        assert!(fx.backend.puts().is_empty());
    }

    #[tokio::test]
    async fn test_clearing_authorized_ranges_drops_profile() {
        let mut mc = existing_cluster();
        mc.properties.api_server_access_profile = Some(ApiServerAccessProfile {
            authorized_ip_ranges: Some(vec!["1.2.3.4/32".into()]),
            ..Default::default()
        });
        let fx = fixture(&[], mc);
        let ctx = fx.context(
            DecoratorMode::Update,
            params(json!({"api_server_authorized_ip_ranges": ""})),
        );
        aks_update(ctx).await.unwrap();
        assert!(fx.prompter.asked().is_empty());
        assert_eq!(fx.backend.puts()[0].properties.api_server_access_profile, None);

        let fx = fixture(&[], existing_cluster());
        let ctx = fx.context(
            DecoratorMode::Update,
            params(json!({"api_server_authorized_ip_ranges": "10.0.0.0/8, 1.2.3.4/32"})),
        );
        aks_update(ctx).await.unwrap();
        assert_eq!(
            fx.backend.puts()[0]
                .properties
                .api_server_access_profile
                .as_ref()
                .and_then(|p| p.authorized_ip_ranges.clone()),
            Some(vec!["10.0.0.0/8".to_string(), "1.2.3.4/32".to_string()])
        );
    }

    #[tokio::test]
    async fn test_windows_profile_required_for_ahub() {
        let fx = fixture(&[], existing_cluster());
        let ctx = fx.context(DecoratorMode::Update, params(json!({"enable_ahub": true})));
        assert!(matches!(
            aks_update(ctx).await,
            Err(AzCliError::UnknownError(msg)) if msg == NO_WINDOWS_PROFILE
        ));

        let mut windows = existing_cluster();
        windows.properties.windows_profile = Some(WindowsProfile {
            admin_username: "azureuser".into(),
            ..Default::default()
        });
        let fx = fixture(&[], windows);
        let ctx = fx.context(DecoratorMode::Update, params(json!({"enable_ahub": true})));
        aks_update(ctx).await.unwrap();
        assert_eq!(
            fx.backend.puts()[0]
                .properties
                .windows_profile
                .as_ref()
                .and_then(|w| w.license_type.as_deref()),
            Some(LICENSE_TYPE_WINDOWS_SERVER)
        );
    }

    #[tokio::test]
    async fn test_monitoring_addon_triggers_postprocessing() {
        let mut mc = existing_cluster();
        mc.properties.addon_profiles = Some(BTreeMap::from([(
            MONITORING_ADDON_NAME.to_string(),
            AddonProfile {
                enabled: true,
                config: None,
                identity: Some(UserAssignedIdentity {
                    object_id: Some("oms-object".into()),
                    ..Default::default()
                }),
            },
        )]));
        let fx = fixture(&[], mc);
        let ctx = fx.context(
            DecoratorMode::Update,
            params(json!({"no_wait": true, "tags": {"a": "b"}})),
        );
        let response = aks_update(ctx).await.unwrap();
        // post-processing needs the finished cluster, so no-wait is ignored
        assert!(response.cluster().is_some());
        assert_eq!(
            fx.backend.calls_starting_with("role_create"),
            vec![format!(
                "role_create Monitoring Metrics Publisher oms-object \
                 /subscriptions/abcdef01-2345-6789-abcd-ef0123456789/resourceGroups/rg/providers/\
                 Microsoft.ContainerService/managedClusters/cluster"
            )]
        );
    }

    #[tokio::test]
    async fn test_no_wait_returns_accepted() {
        let fx = fixture(&[], existing_cluster());
        let ctx = fx.context(DecoratorMode::Update, params(json!({"no_wait": true, "tags": {"a": "b"}})));
        let response = aks_update(ctx).await.unwrap();
        assert!(matches!(response, ClusterResponse::Accepted(_)));
        assert!(fx.backend.calls_starting_with("wait").is_empty());
    }

    #[tokio::test]
    async fn test_container_storage_disable_uninstalls() {
        let mut mc = existing_cluster();
        if let Some(pools) = mc.properties.agent_pool_profiles.as_mut() {
            pools[0].node_labels = Some(BTreeMap::from([(
                CONTAINER_STORAGE_NODE_LABEL_KEY.to_string(),
                CONTAINER_STORAGE_NODE_LABEL_VALUE.to_string(),
            )]));
        }
        let fx = fixture(&[], mc);
        let ctx = fx.context(
            DecoratorMode::Update,
            params(json!({"disable_azure_container_storage": true, "yes": true})),
        );
        aks_update(ctx).await.unwrap();
        assert_eq!(
            fx.backend.calls_starting_with("uninstall_extension"),
            vec!["uninstall_extension azurecontainerstorage".to_string()]
        );
        let labels = fx.backend.puts()[0].properties.agent_pool_profiles.clone().unwrap()[0]
            .node_labels
            .clone()
            .unwrap();
        assert!(!labels.contains_key(CONTAINER_STORAGE_NODE_LABEL_KEY));
    }

    #[tokio::test]
    async fn test_flag_conflict_fails_before_fetch() {
        let fx = fixture(&[], existing_cluster());
        let ctx = fx.context(
            DecoratorMode::Update,
            params(json!({"attach_acr": "myacr", "enable_keda": true, "disable_keda": true})),
        );
        let result = aks_update(ctx).await;
        assert!(matches!(result, Err(AzCliError::MutuallyExclusiveArgument(_))));
        assert!(fx.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_update_skips_acr_role_assignment() {
        let fx = fixture(&[], existing_cluster());
        let ctx = fx.context(
            DecoratorMode::Update,
            params(json!({"attach_acr": "myacr", "enable_public_fqdn": true})),
        );
        let result = aks_update(ctx).await;
        assert!(matches!(
            result,
            Err(AzCliError::InvalidArgumentValue(msg))
                if msg == "--enable-public-fqdn can only be used for private cluster"
        ));
        assert_eq!(fx.backend.calls(), vec!["get_cluster rg/cluster".to_string()]);
    }

    #[tokio::test]
    async fn test_disable_azure_rbac_with_managed_aad() {
        let mut mc = existing_cluster();
        mc.properties.aad_profile = Some(AadProfile {
            managed: Some(true),
            enable_azure_rbac: Some(true),
            ..Default::default()
        });
        let fx = fixture(&[], mc);
        let ctx = fx.context(DecoratorMode::Update, params(json!({"disable_azure_rbac": true})));
        aks_update(ctx).await.unwrap();
        assert_eq!(
            fx.backend.puts()[0].properties.aad_profile.as_ref().and_then(|p| p.enable_azure_rbac),
            Some(false)
        );
    }
}
