//! Azure calls the managed cluster decorators depend on.
//!
//! [`AksBackend`] is the seam between parameter resolution and the network;
//! [`ArmAksBackend`] talks to Azure Resource Manager through [`RestClient`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::aks::consts::ROLE_ACR_PULL;
use crate::aks::models::{ManagedCluster, StringMap};
use crate::error::AzCliError;
use crate::rest::{LongRunningOperation, RequestOptions, RestClient};

const RESOURCES_API_VERSION: &str = "2021-04-01";
const AUTHORIZATION_API_VERSION: &str = "2022-04-01";
const MSI_API_VERSION: &str = "2023-01-31";
const ACR_API_VERSION: &str = "2023-07-01";
const LOG_ANALYTICS_API_VERSION: &str = "2022-10-01";
const INSIGHTS_API_VERSION: &str = "2022-06-01";
const EXTENSIONS_API_VERSION: &str = "2023-05-01";

/// Client and principal ids of a user-assigned managed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityInfo {
    pub client_id: String,
    pub principal_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrincipalCredentials {
    pub client_id: String,
    pub secret: String,
}

/// Container insights wiring for the monitoring addon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInsights {
    pub workspace_resource_id: String,
    pub cluster_resource_id: String,
    pub cluster_location: String,
    /// Create the data collection rule.
    pub create_dcr: bool,
    /// Associate the rule with the cluster.
    pub create_dcra: bool,
}

#[async_trait]
pub trait AksBackend: Send + Sync {
    async fn get_cluster(&self, resource_group: &str, name: &str) -> crate::Result<ManagedCluster>;

    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        mc: &ManagedCluster,
    ) -> crate::Result<LongRunningOperation>;

    async fn wait_cluster(&self, op: &LongRunningOperation) -> crate::Result<ManagedCluster>;

    async fn resource_group_location(&self, resource_group: &str) -> crate::Result<String>;

    async fn role_assignment_exists(&self, scope: &str, role: &str) -> crate::Result<bool>;

    async fn create_role_assignment(
        &self,
        role: &str,
        assignee: &str,
        scope: &str,
    ) -> crate::Result<()>;

    async fn delete_role_assignments(
        &self,
        role: &str,
        assignee: &str,
        scope: &str,
    ) -> crate::Result<()>;

    async fn get_identity(&self, resource_id: &str) -> crate::Result<IdentityInfo>;

    /// Registry resource id for an ACR name or id.
    async fn resolve_acr(&self, acr: &str) -> crate::Result<String>;

    /// Id of the default Log Analytics workspace for `location`, created on demand.
    async fn default_log_analytics_workspace(&self, location: &str) -> crate::Result<String>;

    async fn ensure_container_insights(&self, request: &ContainerInsights) -> crate::Result<()>;

    async fn create_service_principal(
        &self,
        name: &str,
    ) -> crate::Result<ServicePrincipalCredentials>;

    async fn install_extension(
        &self,
        cluster_resource_id: &str,
        name: &str,
        extension_type: &str,
        settings: &StringMap,
    ) -> crate::Result<()>;

    async fn uninstall_extension(&self, cluster_resource_id: &str, name: &str) -> crate::Result<()>;
}

/// Grant or revoke `acrpull` for `assignee` on a registry.
pub async fn ensure_aks_acr(
    backend: &dyn AksBackend,
    assignee: &str,
    acr: &str,
    detach: bool,
) -> crate::Result<()> {
    let registry_id = backend.resolve_acr(acr).await?;
    if detach {
        backend
            .delete_role_assignments(ROLE_ACR_PULL, assignee, &registry_id)
            .await
            .map_err(|e| {
                AzCliError::AzureResponse(format!(
                    "Could not delete role assignments for ACR. Are you an Owner on this subscription? {}",
                    e
                ))
            })
    } else {
        backend
            .create_role_assignment(ROLE_ACR_PULL, assignee, &registry_id)
            .await
            .map_err(|e| {
                AzCliError::AzureResponse(format!(
                    "Could not create a role assignment for ACR. Are you an Owner on this subscription? {}",
                    e
                ))
            })
    }
}

pub struct ArmAksBackend {
    client: RestClient,
    endpoint: String,
    subscription_id: String,
    api_version: String,
    poll_interval: Duration,
}

impl ArmAksBackend {
    pub fn new(
        client: RestClient,
        endpoint: impl Into<String>,
        subscription_id: impl Into<String>,
        api_version: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        ArmAksBackend {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            subscription_id: subscription_id.into(),
            api_version: api_version.into(),
            poll_interval,
        }
    }

    fn arm_url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn cluster_url(&self, resource_group: &str, name: &str) -> String {
        self.arm_url(&format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerService/managedClusters/{}",
            self.subscription_id, resource_group, name
        ))
    }

    fn api(version: &str) -> Vec<(&'static str, String)> {
        vec![("api-version", version.to_string())]
    }

    async fn role_definition_id(&self, scope: &str, role: &str) -> crate::Result<String> {
        let url = self.arm_url(&format!(
            "{}/providers/Microsoft.Authorization/roleDefinitions",
            scope
        ));
        let mut query = Self::api(AUTHORIZATION_API_VERSION);
        query.push(("$filter", format!("roleName eq '{}'", role)));
        let defs = self
            .client
            .list_paged(&url, &query, "value", &RequestOptions::default(), None)
            .await?;
        defs.iter()
            .find_map(|d| d.get("id").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| AzCliError::AzureResponse(format!("Role '{}' doesn't exist.", role)))
    }

    async fn role_assignments(&self, scope: &str) -> crate::Result<Vec<Value>> {
        let url = self.arm_url(&format!(
            "{}/providers/Microsoft.Authorization/roleAssignments",
            scope
        ));
        let mut query = Self::api(AUTHORIZATION_API_VERSION);
        query.push(("$filter", "atScope()".to_string()));
        self.client
            .list_paged(&url, &query, "value", &RequestOptions::default(), None)
            .await
    }
}

/// Short region codes used to name the default monitoring workspace.
fn region_code(location: &str) -> String {
    let code = match location.to_ascii_lowercase().as_str() {
        "eastus" => "EUS",
        "eastus2" => "EUS2",
        "westus" => "WUS",
        "westus2" => "WUS2",
        "westus3" => "WUS3",
        "centralus" => "CUS",
        "northcentralus" => "NCUS",
        "southcentralus" => "SCUS",
        "westeurope" => "WEU",
        "northeurope" => "NEU",
        "uksouth" => "SUK",
        "ukwest" => "WUK",
        "southeastasia" => "SEA",
        "eastasia" => "EA",
        "australiaeast" => "EAU",
        "japaneast" => "EJP",
        "canadacentral" => "CCA",
        "centralindia" => "CIN",
        other => return other.to_ascii_uppercase(),
    };
    code.to_string()
}

#[async_trait]
impl AksBackend for ArmAksBackend {
    async fn get_cluster(&self, resource_group: &str, name: &str) -> crate::Result<ManagedCluster> {
        let body = self
            .client
            .get(&self.cluster_url(resource_group, name), &Self::api(&self.api_version))
            .await?;
        serde_json::from_value(body)
            .map_err(|e| AzCliError::UnknownError(format!("unexpected cluster payload: {}", e)))
    }

    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        mc: &ManagedCluster,
    ) -> crate::Result<LongRunningOperation> {
        let body = serde_json::to_value(mc).map_err(|e| AzCliError::Internal(e.to_string()))?;
        tracing::debug!(resource_group, name, "PUT managed cluster");
        self.client
            .begin_put(
                &self.cluster_url(resource_group, name),
                &Self::api(&self.api_version),
                &body,
            )
            .await
    }

    async fn wait_cluster(&self, op: &LongRunningOperation) -> crate::Result<ManagedCluster> {
        let body = self.client.wait(op, self.poll_interval).await?;
        serde_json::from_value(body)
            .map_err(|e| AzCliError::UnknownError(format!("unexpected cluster payload: {}", e)))
    }

    async fn resource_group_location(&self, resource_group: &str) -> crate::Result<String> {
        let url = self.arm_url(&format!(
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, resource_group
        ));
        let body = self.client.get(&url, &Self::api(RESOURCES_API_VERSION)).await?;
        body.get("location")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AzCliError::UnknownError(format!(
                    "resource group '{}' has no location",
                    resource_group
                ))
            })
    }

    async fn role_assignment_exists(&self, scope: &str, role: &str) -> crate::Result<bool> {
        let definition_id = self.role_definition_id(scope, role).await?;
        let assignments = self.role_assignments(scope).await?;
        Ok(assignments.iter().any(|a| {
            let props = &a["properties"];
            let same_role = props["roleDefinitionId"]
                .as_str()
                .is_some_and(|id| id.eq_ignore_ascii_case(&definition_id));
            let same_scope = props["scope"]
                .as_str()
                .is_some_and(|s| s.eq_ignore_ascii_case(scope));
            same_role && same_scope
        }))
    }

    async fn create_role_assignment(
        &self,
        role: &str,
        assignee: &str,
        scope: &str,
    ) -> crate::Result<()> {
        let definition_id = self.role_definition_id(scope, role).await?;
        let url = self.arm_url(&format!(
            "{}/providers/Microsoft.Authorization/roleAssignments/{}",
            scope,
            uuid::Uuid::new_v4()
        ));
        let body = json!({
            "properties": {
                "roleDefinitionId": definition_id,
                "principalId": assignee,
                "principalType": "ServicePrincipal",
            }
        });
        match self
            .client
            .put(&url, &Self::api(AUTHORIZATION_API_VERSION), &body, &RequestOptions::default())
            .await
        {
            Ok(_) => Ok(()),
            // an identical assignment already exists
            Err(AzCliError::Http(e)) if e.status == 409 => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_role_assignments(
        &self,
        role: &str,
        assignee: &str,
        scope: &str,
    ) -> crate::Result<()> {
        let definition_id = self.role_definition_id(scope, role).await?;
        for assignment in self.role_assignments(scope).await? {
            let props = &assignment["properties"];
            let matches = props["principalId"].as_str() == Some(assignee)
                && props["roleDefinitionId"]
                    .as_str()
                    .is_some_and(|id| id.eq_ignore_ascii_case(&definition_id));
            if let (true, Some(id)) = (matches, assignment["id"].as_str()) {
                self.client
                    .delete(
                        &self.arm_url(id),
                        &Self::api(AUTHORIZATION_API_VERSION),
                        &RequestOptions::default(),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn get_identity(&self, resource_id: &str) -> crate::Result<IdentityInfo> {
        let body = self
            .client
            .get(&self.arm_url(resource_id), &Self::api(MSI_API_VERSION))
            .await?;
        let field = |name: &str| {
            body["properties"][name]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    AzCliError::UnknownError(format!(
                        "identity '{}' has no {}",
                        resource_id, name
                    ))
                })
        };
        Ok(IdentityInfo {
            client_id: field("clientId")?,
            principal_id: field("principalId")?,
        })
    }

    async fn resolve_acr(&self, acr: &str) -> crate::Result<String> {
        if acr.starts_with("/subscriptions/") {
            return Ok(acr.to_string());
        }
        let url = self.arm_url(&format!(
            "/subscriptions/{}/providers/Microsoft.ContainerRegistry/registries",
            self.subscription_id
        ));
        let registries = self
            .client
            .list_paged(&url, &Self::api(ACR_API_VERSION), "value", &RequestOptions::default(), None)
            .await?;
        let name = acr.trim_end_matches(".azurecr.io");
        registries
            .iter()
            .find(|r| r["name"].as_str().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .and_then(|r| r["id"].as_str().map(str::to_string))
            .ok_or_else(|| {
                AzCliError::InvalidArgumentValue(format!(
                    "ACR {} not found. Have you provided the right ACR name?",
                    acr
                ))
            })
    }

    async fn default_log_analytics_workspace(&self, location: &str) -> crate::Result<String> {
        let code = region_code(location);
        let rg = format!("DefaultResourceGroup-{}", code);
        let workspace = format!("DefaultWorkspace-{}-{}", self.subscription_id, code);
        let rg_path = format!("/subscriptions/{}/resourceGroups/{}", self.subscription_id, rg);
        let ws_path = format!(
            "{}/providers/Microsoft.OperationalInsights/workspaces/{}",
            rg_path, workspace
        );

        let query = Self::api(LOG_ANALYTICS_API_VERSION);
        if let Some(existing) = self
            .client
            .get_optional(&self.arm_url(&ws_path), &query, &RequestOptions::default())
            .await?
        {
            if let Some(id) = existing["id"].as_str() {
                return Ok(id.to_string());
            }
        }

        tracing::info!(workspace = %workspace, location, "creating default Log Analytics workspace");
        self.client
            .put(
                &self.arm_url(&rg_path),
                &Self::api(RESOURCES_API_VERSION),
                &json!({ "location": location }),
                &RequestOptions::default(),
            )
            .await?;
        let op = self
            .client
            .begin_put(
                &self.arm_url(&ws_path),
                &query,
                &json!({ "location": location, "properties": { "sku": { "name": "standalone" } } }),
            )
            .await?;
        let created = self.client.wait(&op, self.poll_interval).await?;
        Ok(created["id"].as_str().map(str::to_string).unwrap_or(ws_path))
    }

    async fn ensure_container_insights(&self, request: &ContainerInsights) -> crate::Result<()> {
        let cluster_name = request
            .cluster_resource_id
            .rsplit('/')
            .next()
            .unwrap_or_default();
        let rg_path = request
            .cluster_resource_id
            .split("/providers/")
            .next()
            .unwrap_or_default();
        let dcr_id = format!(
            "{}/providers/Microsoft.Insights/dataCollectionRules/MSCI-{}-{}",
            rg_path, request.cluster_location, cluster_name
        );
        let query = Self::api(INSIGHTS_API_VERSION);

        if request.create_dcr {
            let streams = json!(["Microsoft-ContainerInsights-Group-Default"]);
            let body = json!({
                "location": request.cluster_location,
                "kind": "Linux",
                "properties": {
                    "dataSources": {
                        "extensions": [{
                            "name": "ContainerInsightsExtension",
                            "streams": streams,
                            "extensionName": "ContainerInsights",
                        }]
                    },
                    "destinations": {
                        "logAnalytics": [{
                            "workspaceResourceId": request.workspace_resource_id,
                            "name": "ciworkspace",
                        }]
                    },
                    "dataFlows": [{ "streams": streams, "destinations": ["ciworkspace"] }],
                }
            });
            self.client
                .put(&self.arm_url(&dcr_id), &query, &body, &RequestOptions::default())
                .await?;
        }

        if request.create_dcra {
            let url = self.arm_url(&format!(
                "{}/providers/Microsoft.Insights/dataCollectionRuleAssociations/ContainerInsightsExtension",
                request.cluster_resource_id
            ));
            let body = json!({
                "properties": {
                    "description": "Association of data collection rule. Deleting this association will break the data collection for this AKS Cluster.",
                    "dataCollectionRuleId": dcr_id,
                }
            });
            self.client
                .put(&url, &query, &body, &RequestOptions::default())
                .await?;
        }
        Ok(())
    }

    async fn create_service_principal(
        &self,
        name: &str,
    ) -> crate::Result<ServicePrincipalCredentials> {
        Err(AzCliError::RequiredArgumentMissing(format!(
            "cannot create a service principal for '{}'; pass --service-principal and \
             --client-secret, or use --enable-managed-identity",
            name
        )))
    }

    async fn install_extension(
        &self,
        cluster_resource_id: &str,
        name: &str,
        extension_type: &str,
        settings: &StringMap,
    ) -> crate::Result<()> {
        let url = self.arm_url(&format!(
            "{}/providers/Microsoft.KubernetesConfiguration/extensions/{}",
            cluster_resource_id, name
        ));
        let body = json!({
            "properties": {
                "extensionType": extension_type,
                "autoUpgradeMinorVersion": true,
                "configurationSettings": settings,
            }
        });
        let op = self
            .client
            .begin_put(&url, &Self::api(EXTENSIONS_API_VERSION), &body)
            .await?;
        self.client.wait(&op, self.poll_interval).await?;
        Ok(())
    }

    async fn uninstall_extension(&self, cluster_resource_id: &str, name: &str) -> crate::Result<()> {
        let url = self.arm_url(&format!(
            "{}/providers/Microsoft.KubernetesConfiguration/extensions/{}",
            cluster_resource_id, name
        ));
        let response = self
            .client
            .delete(&url, &Self::api(EXTENSIONS_API_VERSION), &RequestOptions::default())
            .await;
        match response {
            Ok(_) => Ok(()),
            Err(AzCliError::Http(e)) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
