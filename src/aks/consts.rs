//! Wire constants shared by the managed cluster builders.

// load balancer
pub const LOAD_BALANCER_SKU_BASIC: &str = "basic";
pub const LOAD_BALANCER_SKU_STANDARD: &str = "standard";

// outbound types
pub const OUTBOUND_TYPE_LOAD_BALANCER: &str = "loadBalancer";
pub const OUTBOUND_TYPE_USER_DEFINED_ROUTING: &str = "userDefinedRouting";
pub const OUTBOUND_TYPE_MANAGED_NAT_GATEWAY: &str = "managedNATGateway";
pub const OUTBOUND_TYPE_USER_ASSIGNED_NAT_GATEWAY: &str = "userAssignedNATGateway";

// private dns zone modes
pub const PRIVATE_DNS_ZONE_SYSTEM: &str = "system";
pub const PRIVATE_DNS_ZONE_NONE: &str = "none";

// addon keys as they appear in `addonProfiles`
pub const HTTP_APPLICATION_ROUTING_ADDON_NAME: &str = "httpApplicationRouting";
pub const KUBE_DASHBOARD_ADDON_NAME: &str = "kubeDashboard";
pub const MONITORING_ADDON_NAME: &str = "omsagent";
pub const AZURE_POLICY_ADDON_NAME: &str = "azurepolicy";
pub const VIRTUAL_NODE_ADDON_NAME: &str = "aciConnector";
pub const INGRESS_APPGW_ADDON_NAME: &str = "ingressApplicationGateway";
pub const CONFCOM_ADDON_NAME: &str = "ACCSGXDevicePlugin";
pub const OPEN_SERVICE_MESH_ADDON_NAME: &str = "openServiceMesh";
pub const AZURE_KEYVAULT_SECRETS_PROVIDER_ADDON_NAME: &str = "azureKeyvaultSecretsProvider";

// addon config keys
pub const MONITORING_LOG_ANALYTICS_WORKSPACE_RESOURCE_ID: &str = "logAnalyticsWorkspaceResourceID";
pub const MONITORING_USING_AAD_MSI_AUTH: &str = "useAADAuth";
pub const VIRTUAL_NODE_SUBNET_NAME: &str = "SubnetName";
pub const INGRESS_APPGW_APPLICATION_GATEWAY_NAME: &str = "applicationGatewayName";
pub const INGRESS_APPGW_APPLICATION_GATEWAY_ID: &str = "applicationGatewayId";
pub const INGRESS_APPGW_SUBNET_CIDR: &str = "subnetCIDR";
pub const INGRESS_APPGW_SUBNET_ID: &str = "subnetId";
pub const INGRESS_APPGW_WATCH_NAMESPACE: &str = "watchNamespace";
pub const ACC_SGX_QUOTE_HELPER_ENABLED: &str = "ACCSGXQuoteHelperEnabled";
pub const SECRET_ROTATION_ENABLED: &str = "enableSecretRotation";
pub const ROTATION_POLL_INTERVAL: &str = "rotationPollInterval";

/// `--enable-addons` short names mapped to their `addonProfiles` keys.
pub const ADDONS: &[(&str, &str)] = &[
    ("http_application_routing", HTTP_APPLICATION_ROUTING_ADDON_NAME),
    ("kube-dashboard", KUBE_DASHBOARD_ADDON_NAME),
    ("monitoring", MONITORING_ADDON_NAME),
    ("azure-policy", AZURE_POLICY_ADDON_NAME),
    ("virtual-node", VIRTUAL_NODE_ADDON_NAME),
    ("ingress-appgw", INGRESS_APPGW_ADDON_NAME),
    ("confcom", CONFCOM_ADDON_NAME),
    ("open-service-mesh", OPEN_SERVICE_MESH_ADDON_NAME),
    ("azure-keyvault-secrets-provider", AZURE_KEYVAULT_SECRETS_PROVIDER_ADDON_NAME),
];

pub fn addon_key(short_name: &str) -> Option<&'static str> {
    ADDONS
        .iter()
        .find(|(name, _)| *name == short_name)
        .map(|(_, key)| *key)
}

/// Keys accepted by `--cluster-autoscaler-profile`.
pub const AUTOSCALER_PROFILE_KEYS: &[&str] = &[
    "balance-similar-node-groups",
    "expander",
    "max-empty-bulk-delete",
    "max-graceful-termination-sec",
    "max-node-provision-time",
    "max-total-unready-percentage",
    "new-pod-scale-up-delay",
    "ok-total-unready-count",
    "scan-interval",
    "scale-down-delay-after-add",
    "scale-down-delay-after-delete",
    "scale-down-delay-after-failure",
    "scale-down-unneeded-time",
    "scale-down-unready-time",
    "scale-down-utilization-threshold",
    "skip-nodes-with-local-storage",
    "skip-nodes-with-system-pods",
];

// built-in role names
pub const ROLE_NETWORK_CONTRIBUTOR: &str = "Network Contributor";
pub const ROLE_ACR_PULL: &str = "acrpull";
pub const ROLE_MANAGED_IDENTITY_OPERATOR: &str = "Managed Identity Operator";
pub const ROLE_MONITORING_METRICS_PUBLISHER: &str = "Monitoring Metrics Publisher";
pub const ROLE_CONTRIBUTOR: &str = "Contributor";

// sku
pub const SKU_NAME_BASIC: &str = "Basic";
pub const SKU_NAME_BASE: &str = "Base";
pub const SKU_TIER_FREE: &str = "Free";
pub const SKU_TIER_PAID: &str = "Paid";
pub const SKU_TIER_STANDARD: &str = "Standard";
pub const SKU_TIER_PREMIUM: &str = "Premium";

// support plans
pub const SUPPORT_PLAN_KUBERNETES_OFFICIAL: &str = "KubernetesOfficial";
pub const SUPPORT_PLAN_LTS: &str = "AKSLongTermSupport";

// kms network access
pub const KMS_NETWORK_ACCESS_PUBLIC: &str = "Public";
pub const KMS_NETWORK_ACCESS_PRIVATE: &str = "Private";

// image cleaner interval bounds, in hours
pub const IMAGE_CLEANER_MIN_INTERVAL_HOURS: i64 = 24;
pub const IMAGE_CLEANER_MAX_INTERVAL_HOURS: i64 = 2160;

// azure container storage
pub const CONTAINER_STORAGE_EXTENSION_NAME: &str = "azurecontainerstorage";
pub const CONTAINER_STORAGE_EXTENSION_TYPE: &str = "microsoft.azurecontainerstorage";
pub const CONTAINER_STORAGE_NODE_LABEL_KEY: &str = "acstor.azure.com/io-engine";
pub const CONTAINER_STORAGE_NODE_LABEL_VALUE: &str = "acstor";

pub const EXTENDED_LOCATION_EDGE_ZONE: &str = "EdgeZone";
pub const LICENSE_TYPE_WINDOWS_SERVER: &str = "Windows_Server";
pub const LICENSE_TYPE_NONE: &str = "None";
pub const SERVICE_MESH_MODE_ISTIO: &str = "Istio";
pub const SERVICE_MESH_MODE_DISABLED: &str = "Disabled";
