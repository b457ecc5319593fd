//! `aks create`: assemble a managed cluster from flags and send it.
//!
//! The profile is built by [`CreateStep`]s run in [`BuildPlan`] order. Steps
//! that touch Azure (role assignments, registry access, workspace lookup)
//! run inline; anything that needs the created cluster is deferred to
//! post-processing.

use std::time::Duration;

use crate::aks::backend::{ensure_aks_acr, ContainerInsights};
use crate::aks::consts::{
    CONTAINER_STORAGE_NODE_LABEL_KEY, CONTAINER_STORAGE_NODE_LABEL_VALUE,
    EXTENDED_LOCATION_EDGE_ZONE, INGRESS_APPGW_ADDON_NAME, LICENSE_TYPE_WINDOWS_SERVER,
    MONITORING_ADDON_NAME, ROLE_MANAGED_IDENTITY_OPERATOR, ROLE_NETWORK_CONTRIBUTOR,
    SKU_NAME_BASE, SKU_NAME_BASIC,
};
use crate::aks::context::{
    virtual_node_addon_key, AksContext, ContainerStorageChange, DecoratorMode,
};
use crate::aks::models::{
    AadProfile, ApiServerAccessProfile, AutoUpgradeProfile, AzureMonitorProfile, EnabledFlag,
    ExtendedLocation, IngressProfile, LinuxProfile, ManagedCluster, ManagedClusterIdentity,
    ManagedClusterSku, MetricsProfile, OidcIssuerProfile, SecurityProfile, ServicePrincipalProfile,
    SshConfiguration, SshPublicKey, StorageProfile, UserAssignedIdentity, UserAssignedIdentityRef,
    WindowsGmsaProfile, WindowsProfile, WorkloadAutoScalerProfile, KUBELET_IDENTITY_KEY,
};
use crate::aks::plan::{BuildPlan, BuildStep, McField};
use crate::aks::postprocess::{
    postprocess_cluster, postprocessing_required, try_role_assignment, ClusterResponse,
};
use crate::error::{map_azure_error, AzCliError};
use crate::prompt::user_confirmation;

const SYSTEM_ASSIGNED_SUBNET_PROMPT: &str = "It is highly recommended to use USER assigned identity \
     (option --assign-identity) when you want to bring your own subnet, which will have no latency \
     for the role assignment to take effect. When using SYSTEM assigned identity, azure-cli will \
     grant Network Contributor role to the system assigned identity after the cluster is created, \
     and the role assignment will take some time to take effect, see \
     https://docs.microsoft.com/azure/aks/use-managed-identity, proceed to create cluster with \
     system assigned identity?";

const SUBNET_ROLE_FAILED: &str =
    "Could not create a role assignment for subnet. Are you an Owner on this subscription?";

/// One profile builder of the create command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    Init,
    AgentPool,
    McProperties,
    LinuxProfile,
    WindowsProfile,
    ServicePrincipal,
    VnetRoleAssignment,
    AttachAcr,
    Network,
    Addons,
    Aad,
    ApiServerAccess,
    Identity,
    IdentityProfile,
    AutoUpgrade,
    Autoscaler,
    Sku,
    ExtendedLocation,
    NodeResourceGroup,
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
    Metrics,
}

impl CreateStep {
    pub const ALL: [CreateStep; 32] = [
        CreateStep::Init,
        CreateStep::AgentPool,
        CreateStep::McProperties,
        CreateStep::LinuxProfile,
        CreateStep::WindowsProfile,
        CreateStep::ServicePrincipal,
        CreateStep::VnetRoleAssignment,
        CreateStep::AttachAcr,
        CreateStep::Network,
        CreateStep::Addons,
        CreateStep::Aad,
        CreateStep::ApiServerAccess,
        CreateStep::Identity,
        CreateStep::IdentityProfile,
        CreateStep::AutoUpgrade,
        CreateStep::Autoscaler,
        CreateStep::Sku,
        CreateStep::ExtendedLocation,
        CreateStep::NodeResourceGroup,
        CreateStep::Defender,
        CreateStep::WorkloadIdentity,
        CreateStep::Storage,
        CreateStep::Kms,
        CreateStep::ImageCleaner,
        CreateStep::HttpProxy,
        CreateStep::WorkloadAutoscaler,
        CreateStep::AppRouting,
        CreateStep::SupportPlan,
        CreateStep::AzureMonitor,
        CreateStep::ServiceMesh,
        CreateStep::ContainerStorage,
        CreateStep::Metrics,
    ];
}

impl BuildStep for CreateStep {
    fn name(&self) -> &'static str {
        match self {
            CreateStep::Init => "init",
            CreateStep::AgentPool => "agentpool",
            CreateStep::McProperties => "mc_properties",
            CreateStep::LinuxProfile => "linux_profile",
            CreateStep::WindowsProfile => "windows_profile",
            CreateStep::ServicePrincipal => "service_principal",
            CreateStep::VnetRoleAssignment => "vnet_role_assignment",
            CreateStep::AttachAcr => "attach_acr",
            CreateStep::Network => "network",
            CreateStep::Addons => "addons",
            CreateStep::Aad => "aad",
            CreateStep::ApiServerAccess => "api_server_access",
            CreateStep::Identity => "identity",
            CreateStep::IdentityProfile => "identity_profile",
            CreateStep::AutoUpgrade => "auto_upgrade",
            CreateStep::Autoscaler => "autoscaler",
            CreateStep::Sku => "sku",
            CreateStep::ExtendedLocation => "extended_location",
            CreateStep::NodeResourceGroup => "node_resource_group",
            CreateStep::Defender => "defender",
            CreateStep::WorkloadIdentity => "workload_identity",
            CreateStep::Storage => "storage",
            CreateStep::Kms => "kms",
            CreateStep::ImageCleaner => "image_cleaner",
            CreateStep::HttpProxy => "http_proxy",
            CreateStep::WorkloadAutoscaler => "workload_autoscaler",
            CreateStep::AppRouting => "app_routing",
            CreateStep::SupportPlan => "support_plan",
            CreateStep::AzureMonitor => "azure_monitor",
            CreateStep::ServiceMesh => "service_mesh",
            CreateStep::ContainerStorage => "container_storage",
            CreateStep::Metrics => "metrics",
        }
    }

    fn reads(&self) -> &'static [McField] {
        use McField::*;
        match self {
            CreateStep::Init => &[],
            CreateStep::AgentPool => &[Location],
            CreateStep::McProperties => &[Location],
            CreateStep::VnetRoleAssignment => &[AgentPoolProfiles, ServicePrincipalProfile],
            CreateStep::AttachAcr => &[ServicePrincipalProfile],
            CreateStep::Network => &[AgentPoolProfiles],
            CreateStep::Addons => &[Location],
            CreateStep::ApiServerAccess => &[DnsPrefix],
            CreateStep::Identity => &[ServicePrincipalProfile],
            CreateStep::IdentityProfile => &[Identity],
            CreateStep::Defender => &[Location],
            CreateStep::SupportPlan => &[Sku],
            CreateStep::ContainerStorage => &[AgentPoolProfiles],
            CreateStep::Metrics => &[Sku],
            _ => &[Location],
        }
    }

    fn writes(&self) -> &'static [McField] {
        use McField::*;
        match self {
            CreateStep::Init => &[Location],
            CreateStep::AgentPool => &[AgentPoolProfiles],
            CreateStep::McProperties => &[
                Tags,
                KubernetesVersion,
                DnsPrefix,
                DiskEncryptionSet,
                DisableLocalAccounts,
                EnableRbac,
            ],
            CreateStep::LinuxProfile => &[LinuxProfile],
            CreateStep::WindowsProfile => &[WindowsProfile],
            CreateStep::ServicePrincipal => &[ServicePrincipalProfile],
            CreateStep::VnetRoleAssignment => &[VnetPermission],
            CreateStep::AttachAcr => &[AcrAttach],
            CreateStep::Network => &[NetworkProfile],
            CreateStep::Addons => &[AddonProfiles],
            CreateStep::Aad => &[AadProfile],
            CreateStep::ApiServerAccess => &[ApiServerAccessProfile, FqdnSubdomain],
            CreateStep::Identity => &[Identity],
            CreateStep::IdentityProfile => &[IdentityProfile],
            CreateStep::AutoUpgrade => &[AutoUpgradeProfile],
            CreateStep::Autoscaler => &[AutoScalerProfile],
            CreateStep::Sku => &[Sku],
            CreateStep::ExtendedLocation => &[ExtendedLocation],
            CreateStep::NodeResourceGroup => &[NodeResourceGroup],
            CreateStep::Defender | CreateStep::Kms | CreateStep::ImageCleaner => &[SecurityProfile],
            CreateStep::WorkloadIdentity => &[SecurityProfile, OidcIssuerProfile],
            CreateStep::Storage => &[StorageProfile],
            CreateStep::HttpProxy => &[HttpProxyConfig],
            CreateStep::WorkloadAutoscaler => &[WorkloadAutoScalerProfile],
            CreateStep::AppRouting => &[IngressProfile],
            CreateStep::SupportPlan => &[SupportPlan],
            CreateStep::AzureMonitor => &[AzureMonitorProfile],
            CreateStep::ServiceMesh => &[ServiceMeshProfile],
            CreateStep::ContainerStorage => &[ContainerStorage, AgentPoolProfiles],
            CreateStep::Metrics => &[MetricsProfile],
        }
    }
}

/// Builds and sends the cluster for `aks create`.
pub struct CreateDecorator<'a> {
    ctx: AksContext<'a>,
}

impl<'a> CreateDecorator<'a> {
    pub fn new(ctx: AksContext<'a>) -> crate::Result<Self> {
        if ctx.mode != DecoratorMode::Create {
            return Err(AzCliError::Internal(
                "the create decorator needs a context in create mode".to_string(),
            ));
        }
        Ok(CreateDecorator { ctx })
    }

    pub fn context(&self) -> &AksContext<'a> {
        &self.ctx
    }

    pub fn plan() -> crate::Result<BuildPlan<CreateStep>> {
        BuildPlan::sorted(&CreateStep::ALL)
    }

    /// Run every step and return the assembled cluster.
    pub async fn construct_mc_profile_default(&mut self) -> crate::Result<ManagedCluster> {
        self.ctx.validate_parameters()?;
        for step in Self::plan()? {
            tracing::debug!(step = step.name(), "running create step");
            self.run_step(step).await?;
        }
        self.ctx
            .mc()
            .cloned()
            .ok_or_else(|| AzCliError::Internal("no managed cluster attached".to_string()))
    }

    async fn run_step(&mut self, step: CreateStep) -> crate::Result<()> {
        match step {
            CreateStep::Init => self.init_mc().await,
            CreateStep::AgentPool => self.set_up_agentpool_profile(),
            CreateStep::McProperties => self.set_up_mc_properties(),
            CreateStep::LinuxProfile => self.set_up_linux_profile(),
            CreateStep::WindowsProfile => self.set_up_windows_profile(),
            CreateStep::ServicePrincipal => self.set_up_service_principal_profile().await,
            CreateStep::VnetRoleAssignment => self.process_add_role_assignment_for_vnet_subnet().await,
            CreateStep::AttachAcr => self.process_attach_acr().await,
            CreateStep::Network => self.set_up_network_profile(),
            CreateStep::Addons => self.set_up_addon_profiles().await,
            CreateStep::Aad => self.set_up_aad_profile(),
            CreateStep::ApiServerAccess => self.set_up_api_server_access_profile(),
            CreateStep::Identity => self.set_up_identity(),
            CreateStep::IdentityProfile => self.set_up_identity_profile().await,
            CreateStep::AutoUpgrade => self.set_up_auto_upgrade_profile(),
            CreateStep::Autoscaler => self.set_up_auto_scaler_profile(),
            CreateStep::Sku => self.set_up_sku(),
            CreateStep::ExtendedLocation => self.set_up_extended_location(),
            CreateStep::NodeResourceGroup => self.set_up_node_resource_group(),
            CreateStep::Defender => self.set_up_defender().await,
            CreateStep::WorkloadIdentity => self.set_up_workload_identity(),
            CreateStep::Storage => self.set_up_storage_profile(),
            CreateStep::Kms => self.set_up_azure_keyvault_kms(),
            CreateStep::ImageCleaner => self.set_up_image_cleaner(),
            CreateStep::HttpProxy => self.set_up_http_proxy_config(),
            CreateStep::WorkloadAutoscaler => self.set_up_workload_auto_scaler_profile(),
            CreateStep::AppRouting => self.set_up_ingress_web_app_routing(),
            CreateStep::SupportPlan => self.set_up_k8s_support_plan(),
            CreateStep::AzureMonitor => self.set_up_azure_monitor_profile(),
            CreateStep::ServiceMesh => self.set_up_service_mesh_profile(),
            CreateStep::ContainerStorage => self.set_up_azure_container_storage(),
            CreateStep::Metrics => self.set_up_metrics_profile(),
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

    async fn init_mc(&mut self) -> crate::Result<()> {
        let location = self.ctx.get_location().await?;
        self.ctx.attach_mc(ManagedCluster::new(Some(location)))
    }

    fn set_up_agentpool_profile(&mut self) -> crate::Result<()> {
        let profile = self.ctx.build_default_agentpool_profile()?;
        self.ctx.mc_mut()?.properties.agent_pool_profiles = Some(vec![profile]);
        Ok(())
    }

    fn set_up_mc_properties(&mut self) -> crate::Result<()> {
        let tags = self.ctx.get_tags();
        let kubernetes_version = self.ctx.get_kubernetes_version();
        let dns_prefix = self.ctx.get_dns_name_prefix()?;
        let disk_encryption_set_id = self.ctx.get_node_osdisk_diskencryptionset_id();
        let disable_local_accounts = self.ctx.get_disable_local_accounts()?;
        let enable_rbac = !self.ctx.get_disable_rbac()?;

        let mc = self.ctx.mc_mut()?;
        mc.tags = tags;
        mc.properties.kubernetes_version = kubernetes_version;
        mc.properties.dns_prefix = dns_prefix;
        mc.properties.disk_encryption_set_id = disk_encryption_set_id;
        mc.properties.disable_local_accounts = Some(disable_local_accounts);
        mc.properties.enable_rbac = Some(enable_rbac);
        Ok(())
    }

    fn set_up_linux_profile(&mut self) -> crate::Result<()> {
        let (key, no_ssh_key) = self.ctx.get_ssh_key_value_and_no_ssh_key()?;
        if no_ssh_key {
            return Ok(());
        }
        let admin_username = self.ctx.get_admin_username();
        self.ctx.mc_mut()?.properties.linux_profile = Some(LinuxProfile {
            admin_username,
            ssh: SshConfiguration {
                public_keys: key.map(|key_data| SshPublicKey { key_data }).into_iter().collect(),
            },
        });
        Ok(())
    }

    fn set_up_windows_profile(&mut self) -> crate::Result<()> {
        let (username, password) = self.ctx.get_windows_admin_username_and_password()?;
        let Some(admin_username) = username.filter(|_| password.is_some()) else {
            return Ok(());
        };
        let license_type = self
            .ctx
            .get_enable_ahub()?
            .then(|| LICENSE_TYPE_WINDOWS_SERVER.to_string());
        let (gmsa, dns_server, root_domain_name) = self.ctx.get_windows_gmsa()?;
        let gmsa_profile = gmsa.then_some(WindowsGmsaProfile {
            enabled: true,
            dns_server,
            root_domain_name,
        });
        self.ctx.mc_mut()?.properties.windows_profile = Some(WindowsProfile {
            admin_username,
            admin_password: password,
            license_type,
            gmsa_profile,
        });
        Ok(())
    }

    async fn set_up_service_principal_profile(&mut self) -> crate::Result<()> {
        let (sp, secret) = self.ctx.get_service_principal_and_client_secret().await?;
        let msi = self.ctx.get_enable_managed_identity()?;
        if msi && sp.is_none() && secret.is_none() {
            return Ok(());
        }
        if let Some(client_id) = sp {
            self.ctx.mc_mut()?.properties.service_principal_profile =
                Some(ServicePrincipalProfile { client_id, secret });
        }
        Ok(())
    }

    /// Grant Network Contributor on a custom subnet now, or defer the grant
    /// until the system-assigned identity exists.
    async fn process_add_role_assignment_for_vnet_subnet(&mut self) -> crate::Result<()> {
        let mut need_post_creation_grant = false;
        if let Some(subnet) = self.ctx.get_vnet_subnet_id() {
            let skip = self.ctx.get_skip_subnet_role_assignment();
            let exists = !skip
                && self
                    .ctx
                    .backend
                    .role_assignment_exists(&subnet, ROLE_NETWORK_CONTRIBUTOR)
                    .await?;
            if !skip && !exists {
                let sp_client = self
                    .ctx
                    .mc()
                    .and_then(|mc| mc.properties.service_principal_profile.as_ref())
                    .map(|p| p.client_id.clone());
                let assign_identity = self.ctx.get_assign_identity()?;
                if sp_client.is_none() && assign_identity.is_none() {
                    user_confirmation(
                        self.ctx.prompter,
                        SYSTEM_ASSIGNED_SUBNET_PROMPT,
                        self.ctx.get_yes(),
                    )?;
                    need_post_creation_grant = true;
                } else {
                    let assignee = match assign_identity {
                        Some(_) => self.ctx.get_user_assigned_identity_client_id().await?,
                        None => sp_client.unwrap_or_default(),
                    };
                    try_role_assignment(
                        self.ctx.backend,
                        ROLE_NETWORK_CONTRIBUTOR,
                        &assignee,
                        &subnet,
                        SUBNET_ROLE_FAILED,
                    )
                    .await;
                }
            }
        }
        self.ctx
            .intermediates
            .need_post_creation_vnet_permission_granting
            .set(need_post_creation_grant, true);
        Ok(())
    }

    /// Service principal clusters get `acrpull` now; MSI clusters wait for
    /// the kubelet identity.
    async fn process_attach_acr(&mut self) -> crate::Result<()> {
        let Some(acr) = self.ctx.get_attach_acr()? else {
            return Ok(());
        };
        if self.ctx.get_enable_managed_identity()? {
            return Ok(());
        }
        let client_id = self
            .ctx
            .mc()
            .and_then(|mc| mc.properties.service_principal_profile.as_ref())
            .map(|p| p.client_id.clone())
            .ok_or_else(|| {
                AzCliError::RequiredArgumentMissing(
                    "No service principal provided to create the acrpull role assignment for acr."
                        .to_string(),
                )
            })?;
        ensure_aks_acr(self.ctx.backend, &client_id, &acr, false).await
    }

    fn set_up_network_profile(&mut self) -> crate::Result<()> {
        let profile = self.ctx.build_network_profile()?;
        self.ctx.mc_mut()?.properties.network_profile = profile;
        Ok(())
    }

    async fn set_up_addon_profiles(&mut self) -> crate::Result<()> {
        let settings = self.ctx.get_addon_settings().await?;
        let profiles = settings.build_profiles();

        if profiles.contains_key(MONITORING_ADDON_NAME) {
            let request = ContainerInsights {
                workspace_resource_id: settings.workspace_resource_id.clone().unwrap_or_default(),
                cluster_resource_id: self.ctx.cluster_resource_id(),
                cluster_location: self.ctx.get_location().await?,
                create_dcr: settings.enable_msi_auth_for_monitoring,
                create_dcra: false,
            };
            self.ctx.backend.ensure_container_insights(&request).await?;
            self.ctx.intermediates.monitoring_addon_enabled.set(true, true);
        }
        if profiles.contains_key(INGRESS_APPGW_ADDON_NAME) {
            self.ctx.intermediates.ingress_appgw_addon_enabled.set(true, true);
        }
        if profiles.contains_key(&virtual_node_addon_key()) {
            self.ctx.intermediates.virtual_node_addon_enabled.set(true, true);
        }
        self.ctx.mc_mut()?.properties.addon_profiles = Some(profiles);
        Ok(())
    }

    fn set_up_aad_profile(&mut self) -> crate::Result<()> {
        let profile = if self.ctx.get_enable_aad()? {
            Some(AadProfile {
                managed: Some(true),
                enable_azure_rbac: Some(self.ctx.get_enable_azure_rbac()?),
                admin_group_object_ids: self.ctx.get_aad_admin_group_object_ids()?,
                tenant_id: self.ctx.get_aad_tenant_id()?,
                ..AadProfile::default()
            })
        } else {
            let (client_app_id, server_app_id, server_app_secret) = self
                .ctx
                .get_aad_client_app_id_and_aad_server_app_id_and_aad_server_app_secret()?;
            let tenant_id = self.ctx.get_aad_tenant_id()?;
            let any = client_app_id.is_some()
                || server_app_id.is_some()
                || server_app_secret.is_some()
                || tenant_id.is_some();
            any.then_some(AadProfile {
                client_app_id,
                server_app_id,
                server_app_secret,
                tenant_id,
                ..AadProfile::default()
            })
        };
        self.ctx.mc_mut()?.properties.aad_profile = profile;
        Ok(())
    }

    fn set_up_api_server_access_profile(&mut self) -> crate::Result<()> {
        let ranges = self
            .ctx
            .get_api_server_authorized_ip_ranges()?
            .filter(|r| !r.is_empty());
        let private = self.ctx.get_enable_private_cluster()?;
        let disable_public_fqdn = self.ctx.get_disable_public_fqdn()?;
        let private_dns_zone = self.ctx.get_private_dns_zone()?;
        let fqdn_subdomain = self.ctx.get_fqdn_subdomain()?;

        let profile = (ranges.is_some() || private).then_some(ApiServerAccessProfile {
            authorized_ip_ranges: ranges,
            enable_private_cluster: private.then_some(true),
            enable_private_cluster_public_fqdn: disable_public_fqdn.then_some(false),
            private_dns_zone,
        });
        let mc = self.ctx.mc_mut()?;
        mc.properties.api_server_access_profile = profile;
        mc.properties.fqdn_subdomain = fqdn_subdomain;
        Ok(())
    }

    fn set_up_identity(&mut self) -> crate::Result<()> {
        let msi = self.ctx.get_enable_managed_identity()?;
        let assign_identity = self.ctx.get_assign_identity()?;
        let identity = match (msi, assign_identity) {
            (false, _) => None,
            (true, None) => Some(ManagedClusterIdentity {
                identity_type: "SystemAssigned".to_string(),
                ..ManagedClusterIdentity::default()
            }),
            (true, Some(id)) => Some(ManagedClusterIdentity {
                identity_type: "UserAssigned".to_string(),
                user_assigned_identities: Some(
                    [(id, UserAssignedIdentityRef::default())].into_iter().collect(),
                ),
                ..ManagedClusterIdentity::default()
            }),
        };
        self.ctx.mc_mut()?.identity = identity;
        Ok(())
    }

    /// Kubelet identity, plus the operator grant the control plane identity
    /// needs over it.
    async fn set_up_identity_profile(&mut self) -> crate::Result<()> {
        let Some(kubelet_id) = self.ctx.get_assign_kubelet_identity()? else {
            return Ok(());
        };
        let kubelet = self.ctx.get_identity_by_msi_client(&kubelet_id).await?;
        let cluster_object_id = self.ctx.get_user_assigned_identity_object_id().await?;

        let backend = self.ctx.backend;
        if !backend
            .role_assignment_exists(&kubelet_id, ROLE_MANAGED_IDENTITY_OPERATOR)
            .await?
        {
            backend
                .create_role_assignment(ROLE_MANAGED_IDENTITY_OPERATOR, &cluster_object_id, &kubelet_id)
                .await
                .map_err(|e| {
                    AzCliError::AzureResponse(format!(
                        "Could not grant Managed Identity Operator permission to cluster identity at scope {}: {}",
                        kubelet_id, e
                    ))
                })?;
        }

        self.ctx.mc_mut()?.properties.identity_profile = Some(
            [(
                KUBELET_IDENTITY_KEY.to_string(),
                UserAssignedIdentity {
                    resource_id: Some(kubelet_id),
                    client_id: Some(kubelet.client_id),
                    object_id: Some(kubelet.principal_id),
                },
            )]
            .into_iter()
            .collect(),
        );
        Ok(())
    }

    fn set_up_auto_upgrade_profile(&mut self) -> crate::Result<()> {
        let upgrade_channel = self.ctx.get_auto_upgrade_channel();
        let node_os_upgrade_channel = self.ctx.get_node_os_upgrade_channel()?;
        let profile = (upgrade_channel.is_some() || node_os_upgrade_channel.is_some()).then_some(
            AutoUpgradeProfile {
                upgrade_channel,
                node_os_upgrade_channel,
            },
        );
        self.ctx.mc_mut()?.properties.auto_upgrade_profile = profile;
        Ok(())
    }

    fn set_up_auto_scaler_profile(&mut self) -> crate::Result<()> {
        let profile = self.ctx.get_cluster_autoscaler_profile()?;
        self.ctx.mc_mut()?.properties.auto_scaler_profile = profile;
        Ok(())
    }

    fn set_up_sku(&mut self) -> crate::Result<()> {
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

    fn set_up_extended_location(&mut self) -> crate::Result<()> {
        if let Some(edge_zone) = self.ctx.get_edge_zone() {
            self.ctx.mc_mut()?.extended_location = Some(ExtendedLocation {
                name: edge_zone,
                location_type: EXTENDED_LOCATION_EDGE_ZONE.to_string(),
            });
        }
        Ok(())
    }

    fn set_up_node_resource_group(&mut self) -> crate::Result<()> {
        let node_resource_group = self.ctx.get_node_resource_group();
        self.ctx.mc_mut()?.properties.node_resource_group = node_resource_group;
        Ok(())
    }

    async fn set_up_defender(&mut self) -> crate::Result<()> {
        let profile = self
            .ctx
            .get_defender_profile()
            .await?
            .filter(|p| p.security_monitoring.is_some_and(|m| m.enabled));
        if let Some(profile) = profile {
            self.security_profile()?.defender = Some(profile);
        }
        Ok(())
    }

    fn set_up_workload_identity(&mut self) -> crate::Result<()> {
        let oidc = self.ctx.get_enable_oidc_issuer()?;
        let workload_identity = self.ctx.get_workload_identity()?;
        if oidc {
            self.ctx.mc_mut()?.properties.oidc_issuer_profile = Some(OidcIssuerProfile {
                enabled: true,
                issuer_url: None,
            });
        }
        if workload_identity == Some(true) {
            self.security_profile()?.workload_identity = Some(EnabledFlag::new(true));
        }
        Ok(())
    }

    fn set_up_storage_profile(&mut self) -> crate::Result<()> {
        let drivers = self.ctx.get_storage_drivers()?;
        if drivers.any() {
            self.ctx.mc_mut()?.properties.storage_profile = Some(StorageProfile {
                disk_csi_driver: drivers.disk.map(EnabledFlag::new),
                file_csi_driver: drivers.file.map(EnabledFlag::new),
                blob_csi_driver: drivers.blob.map(EnabledFlag::new),
                snapshot_controller: drivers.snapshot_controller.map(EnabledFlag::new),
            });
        }
        Ok(())
    }

    fn set_up_azure_keyvault_kms(&mut self) -> crate::Result<()> {
        if let Some(kms) = self.ctx.get_azure_keyvault_kms()?.filter(|k| k.enabled) {
            self.security_profile()?.azure_key_vault_kms = Some(kms);
        }
        Ok(())
    }

    fn set_up_image_cleaner(&mut self) -> crate::Result<()> {
        if let Some(cleaner) = self.ctx.get_image_cleaner()?.filter(|c| c.enabled) {
            self.security_profile()?.image_cleaner = Some(cleaner);
        }
        Ok(())
    }

    fn set_up_http_proxy_config(&mut self) -> crate::Result<()> {
        let config = self.ctx.get_http_proxy_config()?;
        self.ctx.mc_mut()?.properties.http_proxy_config = config;
        Ok(())
    }

    fn set_up_workload_auto_scaler_profile(&mut self) -> crate::Result<()> {
        let (keda, vpa) = self.ctx.get_workload_autoscalers()?;
        if keda == Some(true) || vpa == Some(true) {
            self.ctx.mc_mut()?.properties.workload_auto_scaler_profile =
                Some(WorkloadAutoScalerProfile {
                    keda: keda.filter(|k| *k).map(EnabledFlag::new),
                    vertical_pod_autoscaler: vpa.filter(|v| *v).map(EnabledFlag::new),
                });
        }
        Ok(())
    }

    fn set_up_ingress_web_app_routing(&mut self) -> crate::Result<()> {
        if let Some(routing) = self.ctx.get_app_routing()? {
            self.ctx.mc_mut()?.properties.ingress_profile = Some(IngressProfile {
                web_app_routing: Some(routing),
            });
        }
        Ok(())
    }

    fn set_up_k8s_support_plan(&mut self) -> crate::Result<()> {
        let plan = self.ctx.get_k8s_support_plan()?;
        self.ctx.mc_mut()?.properties.support_plan = plan;
        Ok(())
    }

    fn set_up_azure_monitor_profile(&mut self) -> crate::Result<()> {
        if let Some(metrics) = self.ctx.get_azure_monitor_metrics()?.filter(|m| m.enabled) {
            self.ctx.mc_mut()?.properties.azure_monitor_profile = Some(AzureMonitorProfile {
                metrics: Some(metrics),
            });
        }
        Ok(())
    }

    fn set_up_service_mesh_profile(&mut self) -> crate::Result<()> {
        let profile = self.ctx.get_service_mesh()?.filter(|p| p.istio.is_some());
        self.ctx.mc_mut()?.properties.service_mesh_profile = profile;
        Ok(())
    }

    /// Label the system pool for the storage engine; the extension itself is
    /// installed once the cluster exists.
    fn set_up_azure_container_storage(&mut self) -> crate::Result<()> {
        let Some(ContainerStorageChange::Enable { pool_type }) =
            self.ctx.get_azure_container_storage()?
        else {
            return Ok(());
        };
        if let Some(pool) = self
            .ctx
            .mc_mut()?
            .properties
            .agent_pool_profiles
            .as_mut()
            .and_then(|pools| pools.first_mut())
        {
            pool.node_labels.get_or_insert_with(Default::default).insert(
                CONTAINER_STORAGE_NODE_LABEL_KEY.to_string(),
                CONTAINER_STORAGE_NODE_LABEL_VALUE.to_string(),
            );
        }
        self.ctx.intermediates.azure_container_storage_enabled.set(true, true);
        self.ctx.intermediates.container_storage_pool_type.set(pool_type, true);
        Ok(())
    }

    fn set_up_metrics_profile(&mut self) -> crate::Result<()> {
        if self.ctx.get_cost_analysis()? == Some(true) {
            self.ctx.mc_mut()?.properties.metrics_profile = Some(MetricsProfile {
                cost_analysis: Some(EnabledFlag::new(true)),
            });
        }
        Ok(())
    }

    pub fn check_is_postprocessing_required(&self) -> crate::Result<bool> {
        let msi = self.ctx.get_enable_managed_identity()?;
        let attach_acr = self.ctx.get_attach_acr()?.is_some();
        Ok(postprocessing_required(&self.ctx, msi, attach_acr))
    }

    /// Grant the system-assigned identity access to the subnet as soon as
    /// the service has assigned it.
    async fn immediate_processing_after_request(&self) -> crate::Result<()> {
        if !self
            .ctx
            .intermediates
            .need_post_creation_vnet_permission_granting
            .get_or(false)
        {
            return Ok(());
        }
        let instant = self
            .ctx
            .backend
            .get_cluster(&self.ctx.get_resource_group_name(), &self.ctx.get_name())
            .await?;
        let principal = instant.identity.as_ref().and_then(|i| i.principal_id.clone());
        match (principal, self.ctx.get_vnet_subnet_id()) {
            (Some(principal), Some(subnet)) => {
                try_role_assignment(
                    self.ctx.backend,
                    ROLE_NETWORK_CONTRIBUTOR,
                    &principal,
                    &subnet,
                    SUBNET_ROLE_FAILED,
                )
                .await;
            }
            _ => tracing::warn!("{}", SUBNET_ROLE_FAILED),
        }
        Ok(())
    }

    pub async fn put_mc(&self, mc: &ManagedCluster) -> crate::Result<ClusterResponse> {
        let backend = self.ctx.backend;
        let resource_group = self.ctx.get_resource_group_name();
        let name = self.ctx.get_name();

        if self.check_is_postprocessing_required()? {
            let op = backend.begin_create_or_update(&resource_group, &name, mc).await?;
            self.immediate_processing_after_request().await?;
            let cluster = backend.wait_cluster(&op).await?;
            let attach_acr = self.ctx.get_attach_acr()?;
            postprocess_cluster(&self.ctx, &cluster, attach_acr.as_deref()).await;
            return Ok(ClusterResponse::Completed(Box::new(cluster)));
        }

        let op = backend.begin_create_or_update(&resource_group, &name, mc).await?;
        if self.ctx.get_no_wait() {
            return Ok(ClusterResponse::Accepted(op));
        }
        let cluster = backend.wait_cluster(&op).await?;
        Ok(ClusterResponse::Completed(Box::new(cluster)))
    }

    /// Send the cluster, retrying while a new service principal replicates.
    pub async fn create_mc(&self, mc: &ManagedCluster) -> crate::Result<ClusterResponse> {
        if self.ctx.mc() != Some(mc) {
            return Err(AzCliError::Internal(
                "Inconsistent state detected. The incoming `mc` is not the same as the `mc` in the context."
                    .to_string(),
            ));
        }
        let attempts = self.ctx.settings.spn_retry_attempts.max(1);
        let interval = Duration::from_secs(self.ctx.settings.spn_retry_interval_secs);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.put_mc(mc).await {
                Ok(response) => return Ok(response),
                Err(AzCliError::Http(e)) if e.is_service_principal_not_found() => {
                    tracing::debug!(attempt, attempts, error = %e, "service principal not replicated yet, retrying");
                    last_error = e.to_string();
                    tokio::time::sleep(interval).await;
                }
                Err(e) => return Err(map_azure_error(e)),
            }
        }
        Err(AzCliError::Cli(format!(
            "Maximum number of retries exceeded. {}",
            last_error
        )))
    }
}

/// `aks create` end to end.
pub async fn aks_create(ctx: AksContext<'_>) -> crate::Result<ClusterResponse> {
    let mut decorator = CreateDecorator::new(ctx)?;
    let mc = decorator.construct_mc_profile_default().await?;
    decorator.create_mc(&mc).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::aks::backend::fake::FakeBackend;
    use crate::aks::context::testing::Fixture;
    use crate::error::HttpError;

    const SUBNET: &str =
        "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/v/subnets/a";

    fn base_params() -> serde_json::Value {
        json!({
            "resource_group_name": "rg",
            "name": "cluster",
            "location": "westus2",
            "no_ssh_key": true,
            "enable_managed_identity": true,
        })
    }

    fn with(extra: serde_json::Value) -> serde_json::Value {
        let mut params = base_params();
        if let (Some(base), Some(extra)) = (params.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        params
    }

    #[test]
    fn test_plan_respects_dependencies() {
        let plan = CreateDecorator::plan().unwrap();
        assert_eq!(plan.steps().len(), CreateStep::ALL.len());
        assert_eq!(plan.names()[0], "init");
        let pos = |n: &str| plan.position(n).unwrap();
        assert!(pos("agentpool") < pos("network"));
        assert!(pos("service_principal") < pos("vnet_role_assignment"));
        assert!(pos("identity") < pos("identity_profile"));
        assert!(pos("sku") < pos("support_plan"));
        assert!(pos("sku") < pos("metrics"));
        assert!(pos("container_storage") < pos("network"));
    }

    #[tokio::test]
    async fn test_construct_minimal_msi_cluster() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, base_params());
        let mut decorator = CreateDecorator::new(ctx).unwrap();
        let mc = decorator.construct_mc_profile_default().await.unwrap();

        assert_eq!(mc.location.as_deref(), Some("westus2"));
        assert_eq!(mc.identity.as_ref().map(|i| i.identity_type.as_str()), Some("SystemAssigned"));
        assert!(mc.properties.service_principal_profile.is_none());
        assert_eq!(mc.properties.enable_rbac, Some(true));
        assert_eq!(
            mc.properties.dns_prefix.as_deref(),
            Some("cluster-rg-abcdef")
        );
        let network = mc.properties.network_profile.as_ref().unwrap();
        assert_eq!(network.network_plugin.as_deref(), Some("kubenet"));
        assert_eq!(network.load_balancer_sku.as_deref(), Some("standard"));
        assert!(mc.properties.linux_profile.is_none());
        assert!(!decorator.check_is_postprocessing_required().unwrap());
    }

    #[tokio::test]
    async fn test_create_with_no_wait_returns_accepted() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, with(json!({"no_wait": true})));
        let response = aks_create(ctx).await.unwrap();
        assert!(matches!(response, ClusterResponse::Accepted(_)));
        assert_eq!(fx.backend.calls_starting_with("wait").len(), 0);
        assert_eq!(fx.backend.puts().len(), 1);
    }

    #[tokio::test]
    async fn test_monitoring_addon_runs_postprocessing() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            with(json!({"enable_addons": "monitoring", "enable_msi_auth_for_monitoring": true})),
        );
        let response = aks_create(ctx).await.unwrap();
        let cluster = response.cluster().unwrap();
        assert!(cluster.is_addon_enabled(MONITORING_ADDON_NAME));
        assert_eq!(
            fx.backend.calls_starting_with("container_insights"),
            vec![
                "container_insights dcr=true dcra=false".to_string(),
                "container_insights dcr=false dcra=true".to_string(),
            ]
        );
        assert_eq!(fx.backend.calls_starting_with("default_workspace"), vec!["default_workspace westus2"]);
    }

    #[tokio::test]
    async fn test_spn_not_found_is_retried() {
        let mut fx = Fixture::new();
        fx.settings.spn_retry_interval_secs = 0;
        fx.backend.fail_next_puts(vec![
            AzCliError::Http(HttpError::new(400, Some("ServicePrincipalNotFound".into()), "sp missing")),
            AzCliError::Http(HttpError::new(400, Some("ServicePrincipalNotFound".into()), "sp missing")),
        ]);
        let ctx = fx.context(DecoratorMode::Create, base_params());
        let response = aks_create(ctx).await.unwrap();
        assert!(response.cluster().is_some());
        assert_eq!(fx.backend.calls_starting_with("put").len(), 3);
    }

    #[tokio::test]
    async fn test_spn_not_found_message_under_generic_code_is_retried() {
        let mut fx = Fixture::new();
        fx.settings.spn_retry_interval_secs = 0;
        fx.backend.fail_next_puts(vec![AzCliError::Http(HttpError::new(
            400,
            Some("BadRequest".into()),
            "Service principal clientID: abc not found in Active Directory tenant xyz",
        ))]);
        let ctx = fx.context(DecoratorMode::Create, base_params());
        aks_create(ctx).await.unwrap();
        assert_eq!(fx.backend.calls_starting_with("put").len(), 2);
    }

    #[tokio::test]
    async fn test_spn_retries_exhausted() {
        let mut fx = Fixture::new();
        fx.settings.spn_retry_interval_secs = 0;
        fx.settings.spn_retry_attempts = 2;
        fx.backend.fail_next_puts(vec![
            AzCliError::Http(HttpError::new(400, Some("ServicePrincipalNotFound".into()), "first")),
            AzCliError::Http(HttpError::new(400, Some("ServicePrincipalNotFound".into()), "second")),
        ]);
        let ctx = fx.context(DecoratorMode::Create, base_params());
        let result = aks_create(ctx).await;
        assert!(matches!(
            result,
            Err(AzCliError::Cli(msg)) if msg.starts_with("Maximum number of retries exceeded.") && msg.contains("second")
        ));
    }

    #[tokio::test]
    async fn test_other_put_errors_are_mapped() {
        let fx = Fixture::new();
        fx.backend
            .fail_next_puts(vec![AzCliError::Http(HttpError::new(400, Some("BadRequest".into()), "bad sku"))]);
        let ctx = fx.context(DecoratorMode::Create, base_params());
        let result = aks_create(ctx).await;
        assert!(matches!(result, Err(AzCliError::InvalidArgumentValue(msg)) if msg.contains("bad sku")));
        assert_eq!(fx.backend.calls_starting_with("put").len(), 1);
    }

    #[tokio::test]
    async fn test_system_identity_subnet_grant_after_put() {
        let existing = ManagedCluster {
            identity: Some(ManagedClusterIdentity {
                identity_type: "SystemAssigned".into(),
                principal_id: Some("cluster-principal".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut fx = Fixture::with_answers(&["y"]);
        fx.backend = FakeBackend::with_existing(existing);
        let ctx = fx.context(DecoratorMode::Create, with(json!({"vnet_subnet_id": SUBNET})));
        aks_create(ctx).await.unwrap();

        assert_eq!(fx.prompter.asked().len(), 1);
        assert_eq!(
            fx.backend.calls_starting_with("role_create"),
            vec![format!("role_create Network Contributor cluster-principal {}", SUBNET)]
        );
    }

    #[tokio::test]
    async fn test_declined_subnet_prompt_exits_early() {
        let fx = Fixture::with_answers(&["n"]);
        let ctx = fx.context(DecoratorMode::Create, with(json!({"vnet_subnet_id": SUBNET})));
        let result = aks_create(ctx).await;
        assert!(matches!(result, Err(AzCliError::DecoratorEarlyExit)));
        assert!(fx.backend.puts().is_empty());
    }

    #[tokio::test]
    async fn test_attach_acr_uses_kubelet_identity() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, with(json!({"attach_acr": "myacr"})));
        aks_create(ctx).await.unwrap();
        assert_eq!(
            fx.backend.calls_starting_with("role_create"),
            vec!["role_create acrpull kubelet-object /registries/myacr".to_string()]
        );
    }

    #[tokio::test]
    async fn test_service_principal_cluster() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            with(json!({
                "service_principal": "sp-client",
                "client_secret": "sp-secret",
                "attach_acr": "myacr",
            })),
        );
        let mut decorator = CreateDecorator::new(ctx).unwrap();
        let mc = decorator.construct_mc_profile_default().await.unwrap();
        assert!(mc.identity.is_none());
        assert_eq!(
            mc.properties.service_principal_profile.as_ref().map(|p| p.client_id.as_str()),
            Some("sp-client")
        );
        assert_eq!(
            fx.backend.calls_starting_with("role_create"),
            vec!["role_create acrpull sp-client /registries/myacr".to_string()]
        );
    }

    #[tokio::test]
    async fn test_feature_profiles() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            with(json!({
                "enable_oidc_issuer": true,
                "enable_workload_identity": true,
                "enable_keda": true,
                "disable_disk_driver": true,
                "tier": "standard",
                "enable_cost_analysis": true,
                "enable_azure_container_storage": true,
            })),
        );
        let mut decorator = CreateDecorator::new(ctx).unwrap();
        let mc = decorator.construct_mc_profile_default().await.unwrap();

        assert_eq!(mc.sku_tier(), Some("Standard"));
        assert_eq!(
            mc.properties.security_profile.as_ref().and_then(|s| s.workload_identity),
            Some(EnabledFlag::new(true))
        );
        assert!(mc.properties.oidc_issuer_profile.as_ref().is_some_and(|p| p.enabled));
        assert_eq!(
            mc.properties
                .storage_profile
                .as_ref()
                .and_then(|s| s.disk_csi_driver),
            Some(EnabledFlag::new(false))
        );
        assert_eq!(
            mc.properties
                .metrics_profile
                .as_ref()
                .and_then(|m| m.cost_analysis),
            Some(EnabledFlag::new(true))
        );
        let labels = mc.properties.agent_pool_profiles.as_ref().unwrap()[0]
            .node_labels
            .clone()
            .unwrap();
        assert_eq!(labels.get(CONTAINER_STORAGE_NODE_LABEL_KEY).map(String::as_str), Some("acstor"));
        assert!(decorator.check_is_postprocessing_required().unwrap());

        decorator.create_mc(&mc).await.unwrap();
        assert_eq!(
            fx.backend.calls_starting_with("install_extension"),
            vec!["install_extension azurecontainerstorage microsoft.azurecontainerstorage".to_string()]
        );
    }

    #[tokio::test]
    async fn test_conflicting_pair_fails_before_any_put() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            with(json!({"enable_keda": true, "disable_keda": true})),
        );
        let result = aks_create(ctx).await;
        assert!(matches!(result, Err(AzCliError::MutuallyExclusiveArgument(_))));
        assert!(fx.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_arguments_leave_no_side_effects() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({
                "resource_group_name": "rg",
                "name": "cluster",
                "no_ssh_key": true,
                "enable_managed_identity": false,
                "vnet_subnet_id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/v/subnets/default",
                "enable_private_cluster": true,
                "load_balancer_sku": "basic",
            }),
        );
        let result = aks_create(ctx).await;
        assert!(matches!(
            result,
            Err(AzCliError::InvalidArgumentValue(msg))
                if msg == "Please use standard load balancer for private cluster"
        ));
        assert!(fx.backend.calls().is_empty());

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({
                "resource_group_name": "rg",
                "name": "cluster",
                "no_ssh_key": true,
                "enable_managed_identity": false,
                "enable_keda": true,
                "disable_keda": true,
            }),
        );
        assert!(aks_create(ctx).await.is_err());
        assert!(fx.backend.calls().is_empty());
    }
}
