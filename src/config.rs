//! azcli configuration: deserialization and validation.
//!
//! Loaded once at startup from `azcli.toml` and handed to the AKS and App
//! Configuration layers by reference.

use serde::Deserialize;

use crate::aks::schema::ApiVersion;
use crate::error::AzCliError;

/// Strip an env var reference to its variable name.
///
/// Accepts `${VAR_NAME}` syntax only. Returns `None` if the value is not a
/// valid env-var reference.
pub fn parse_env_ref(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Resolve a `${VAR}` reference to the variable's value.
///
/// Unknown variables resolve to `None` so callers can report a missing token.
pub fn resolve_env_ref(value: &str) -> Option<String> {
    parse_env_ref(value)
        .and_then(|name| std::env::var(name).ok())
        .filter(|v| !v.is_empty())
}

/// Top-level azcli configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AzCliConfig {
    #[serde(default)]
    pub arm: ArmSettings,
    #[serde(default)]
    pub aks: AksSettings,
    #[serde(default)]
    pub appconfig: AppConfigSettings,
}

/// Azure Resource Manager connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArmSettings {
    pub endpoint: String,
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    /// Env var reference (`${VAR}`) holding a bearer token.
    pub access_token: String,
    /// Monitoring metrics role assignments are only made in the public cloud.
    pub cloud_name: String,
    pub request_timeout_secs: u64,
}

impl Default for ArmSettings {
    fn default() -> Self {
        ArmSettings {
            endpoint: "https://management.azure.com".to_string(),
            subscription_id: None,
            tenant_id: None,
            access_token: "${AZURE_ACCESS_TOKEN}".to_string(),
            cloud_name: "AzureCloud".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Managed cluster defaults and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AksSettings {
    /// ContainerService API version; selects the model schema.
    pub api_version: String,
    /// PUT attempts while a new service principal replicates.
    pub spn_retry_attempts: u32,
    pub spn_retry_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub default_node_count: i64,
    pub default_node_vm_size: String,
    pub default_nodepool_name: String,
    pub default_admin_username: String,
}

impl Default for AksSettings {
    fn default() -> Self {
        AksSettings {
            api_version: "2024-05-01".to_string(),
            spn_retry_attempts: 30,
            spn_retry_interval_secs: 3,
            poll_interval_secs: 5,
            default_node_count: 3,
            default_node_vm_size: "Standard_DS2_v2".to_string(),
            default_nodepool_name: "nodepool1".to_string(),
            default_admin_username: "azureuser".to_string(),
        }
    }
}

impl AksSettings {
    /// Schema version negotiated from `api_version`.
    pub fn schema(&self) -> crate::Result<ApiVersion> {
        self.api_version.parse()
    }
}

/// App Configuration data-plane settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfigSettings {
    /// Store endpoint, e.g. `https://mystore.azconfig.io`.
    pub endpoint: Option<String>,
    /// Env var reference (`${VAR}`) holding a bearer token.
    pub access_token: String,
    pub api_version: String,
    /// Attempts for etag-guarded writes (set, lock, unlock).
    pub write_retry_attempts: u32,
    pub write_retry_interval_secs: u64,
    /// Page limit for list commands without `--all`.
    pub default_top: usize,
}

impl Default for AppConfigSettings {
    fn default() -> Self {
        AppConfigSettings {
            endpoint: None,
            access_token: "${AZURE_APPCONFIG_TOKEN}".to_string(),
            api_version: "2023-10-01".to_string(),
            write_retry_attempts: 3,
            write_retry_interval_secs: 1,
            default_top: 100,
        }
    }
}

impl AzCliConfig {
    /// Validate the config, failing fast before any request is sent.
    pub fn validate(&self) -> crate::Result<()> {
        // 1. Tokens are never stored inline
        for (key, value) in [
            ("arm.access_token", &self.arm.access_token),
            ("appconfig.access_token", &self.appconfig.access_token),
        ] {
            if parse_env_ref(value).is_none() {
                return Err(AzCliError::Config(
                    key.to_string(),
                    format!("must be a ${{VAR}} reference, got '{}'", value),
                ));
            }
        }

        // 2. Endpoints must be https URLs
        let mut endpoints = vec![("arm.endpoint", self.arm.endpoint.as_str())];
        if let Some(ep) = &self.appconfig.endpoint {
            endpoints.push(("appconfig.endpoint", ep.as_str()));
        }
        for (key, value) in endpoints {
            match url::Url::parse(value) {
                Ok(u) if u.scheme() == "https" => {}
                _ => {
                    return Err(AzCliError::Config(
                        key.to_string(),
                        format!("'{}' is not an https URL", value),
                    ));
                }
            }
        }

        // 3. Retry settings
        if self.aks.spn_retry_attempts == 0 {
            return Err(AzCliError::Config(
                "aks.spn_retry_attempts".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.appconfig.write_retry_attempts == 0 {
            return Err(AzCliError::Config(
                "appconfig.write_retry_attempts".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        // 4. Schema version must be known
        self.aks.schema().map_err(|e| {
            AzCliError::Config("aks.api_version".to_string(), e.to_string())
        })?;

        // 5. Node defaults
        if self.aks.default_node_count < 1 {
            return Err(AzCliError::Config(
                "aks.default_node_count".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
