//! App Service application settings as a key-value source and destination.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::appconfig::models::{
    is_json_content_type, KeyValue, Tags, APPSVC_SLOT_SETTING_TAG, KEYVAULT_CONTENT_TYPE,
};
use crate::appconfig::validation::{parse_secret_identifier, validate_import_key};
use crate::error::AzCliError;
use crate::rest::{RequestOptions, RestClient};

const WEB_API_VERSION: &str = "2022-03-01";
const APPCONFIG_REFERENCE_PREFIX: &str = "@Microsoft.AppConfiguration";
const KEYVAULT_REFERENCE_PREFIX: &str = "@Microsoft.KeyVault";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSetting {
    pub name: String,
    pub value: String,
    pub slot_setting: bool,
}

/// Web app, or one of its deployment slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppServiceAccount {
    pub subscription_id: Option<String>,
    pub resource_group: String,
    pub name: String,
    pub slot: Option<String>,
}

impl AppServiceAccount {
    pub fn new(resource_group: impl Into<String>, name: impl Into<String>, slot: Option<String>) -> Self {
        AppServiceAccount {
            subscription_id: None,
            resource_group: resource_group.into(),
            name: name.into(),
            slot,
        }
    }

    /// Parse `/subscriptions/{s}/resourceGroups/{rg}/providers/Microsoft.Web/sites/{name}[/slots/{slot}]`.
    pub fn from_id(id: &str) -> crate::Result<Self> {
        let invalid = || {
            AzCliError::InvalidArgumentValue(format!(
                "Invalid App Service resource id '{}'.",
                id
            ))
        };
        let parts: Vec<&str> = id.trim_matches('/').split('/').collect();
        let lower: Vec<String> = parts.iter().map(|p| p.to_ascii_lowercase()).collect();
        let lower: Vec<&str> = lower.iter().map(String::as_str).collect();
        match lower.as_slice() {
            ["subscriptions", _, "resourcegroups", _, "providers", "microsoft.web", "sites", _] => {
                Ok(AppServiceAccount {
                    subscription_id: Some(parts[1].to_string()),
                    resource_group: parts[3].to_string(),
                    name: parts[7].to_string(),
                    slot: None,
                })
            }
            ["subscriptions", _, "resourcegroups", _, "providers", "microsoft.web", "sites", _, "slots", _] => {
                Ok(AppServiceAccount {
                    subscription_id: Some(parts[1].to_string()),
                    resource_group: parts[3].to_string(),
                    name: parts[7].to_string(),
                    slot: Some(parts[9].to_string()),
                })
            }
            _ => Err(invalid()),
        }
    }
}

#[async_trait]
pub trait AppServiceBackend: Send + Sync {
    async fn list_app_settings(&self, account: &AppServiceAccount) -> crate::Result<Vec<AppSetting>>;

    /// Upsert `settings`, keeping settings not named, and sync slot setting names.
    async fn update_app_settings(
        &self,
        account: &AppServiceAccount,
        settings: &[AppSetting],
    ) -> crate::Result<()>;
}

pub struct ArmAppServiceBackend {
    client: RestClient,
    endpoint: String,
    subscription_id: String,
}

impl ArmAppServiceBackend {
    pub fn new(client: RestClient, endpoint: impl Into<String>, subscription_id: impl Into<String>) -> Self {
        ArmAppServiceBackend {
            client,
            endpoint: endpoint.into(),
            subscription_id: subscription_id.into(),
        }
    }

    fn site_url(&self, account: &AppServiceAccount) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Web/sites/{}",
            self.endpoint,
            account.subscription_id.as_deref().unwrap_or(&self.subscription_id),
            account.resource_group,
            account.name
        )
    }

    fn settings_url(&self, account: &AppServiceAccount) -> String {
        match &account.slot {
            Some(slot) => format!("{}/slots/{}", self.site_url(account), slot),
            None => self.site_url(account),
        }
    }

    fn api() -> Vec<(&'static str, String)> {
        vec![("api-version", WEB_API_VERSION.to_string())]
    }

    /// Slot setting names live on the production site.
    async fn slot_config_names(&self, account: &AppServiceAccount) -> crate::Result<Value> {
        let url = format!("{}/config/slotConfigNames", self.site_url(account));
        self.client.get(&url, &Self::api()).await
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl AppServiceBackend for ArmAppServiceBackend {
    async fn list_app_settings(&self, account: &AppServiceAccount) -> crate::Result<Vec<AppSetting>> {
        let url = format!("{}/config/appsettings/list", self.settings_url(account));
        let resp = self.client.post(&url, &Self::api(), None).await?;
        let body = resp.into_body();
        let slot_names = self.slot_config_names(account).await?;
        let sticky = string_list(slot_names.pointer("/properties/appSettingNames"));

        let properties = body
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(properties
            .into_iter()
            .map(|(name, value)| AppSetting {
                slot_setting: sticky.contains(&name),
                value: match value {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
                name,
            })
            .collect())
    }

    async fn update_app_settings(
        &self,
        account: &AppServiceAccount,
        settings: &[AppSetting],
    ) -> crate::Result<()> {
        let base = self.settings_url(account);
        let current = self
            .client
            .post(&format!("{}/config/appsettings/list", base), &Self::api(), None)
            .await?
            .into_body();
        let mut properties: Map<String, Value> = current
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        for setting in settings {
            properties.insert(setting.name.clone(), json!(setting.value));
        }
        self.client
            .put(
                &format!("{}/config/appsettings", base),
                &Self::api(),
                &json!({ "properties": properties }),
                &RequestOptions::default(),
            )
            .await?;

        let names = self.slot_config_names(account).await?;
        let mut sticky = string_list(names.pointer("/properties/appSettingNames"));
        let before = sticky.clone();
        for setting in settings {
            let present = sticky.contains(&setting.name);
            if setting.slot_setting && !present {
                sticky.push(setting.name.clone());
            } else if !setting.slot_setting && present {
                sticky.retain(|n| n != &setting.name);
            }
        }
        if sticky != before {
            let mut body = names.clone();
            body["properties"]["appSettingNames"] = json!(sticky);
            self.client
                .put(
                    &format!("{}/config/slotConfigNames", self.site_url(account)),
                    &Self::api(),
                    &body,
                    &RequestOptions::default(),
                )
                .await?;
        }
        tracing::info!(
            app = %account.name,
            slot = ?account.slot,
            count = settings.len(),
            "updated app settings"
        );
        Ok(())
    }
}

/// Secret URI of a `@Microsoft.KeyVault(...)` reference, either form.
fn keyvault_secret_uri(value: &str) -> Option<String> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let inner = compact
        .get(KEYVAULT_REFERENCE_PREFIX.len()..)?
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let parts: BTreeMap<String, String> = inner
        .split(';')
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect();
    if let Some(uri) = parts.get("secreturi") {
        return Some(uri.clone());
    }
    Some(format!(
        "https://{}.vault.azure.net/secrets/{}/{}",
        parts.get("vaultname")?,
        parts.get("secretname")?,
        parts.get("secretversion").map(String::as_str).unwrap_or("")
    ))
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .trim()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Read app settings as key-values.
///
/// App Configuration references are skipped. Key Vault references become
/// key-vault-reference key-values; slot settings carry the slot tag.
pub async fn read_kv_from_app_service(
    backend: &dyn AppServiceBackend,
    account: &AppServiceAccount,
    prefix: &str,
    content_type: Option<&str>,
) -> crate::Result<Vec<KeyValue>> {
    let settings = backend.list_app_settings(account).await.map_err(|e| {
        AzCliError::Cli(format!("Failed to read key-values from appservice.\n{}", e))
    })?;

    let mut out = Vec::new();
    for setting in settings {
        let key = format!("{}{}", prefix, setting.name);
        let value = setting.value;
        if starts_with_ignore_case(&value, APPCONFIG_REFERENCE_PREFIX) {
            tracing::warn!(key = %key, value = %value, "Ignoring app configuration reference");
            continue;
        }
        if !validate_import_key(&key) {
            continue;
        }
        let mut tags = Tags::new();
        if setting.slot_setting {
            tags.insert(APPSVC_SLOT_SETTING_TAG.to_string(), "true".to_string());
        }

        if starts_with_ignore_case(&value, KEYVAULT_REFERENCE_PREFIX) {
            match keyvault_secret_uri(&value).filter(|uri| parse_secret_identifier(uri).is_ok()) {
                Some(uri) => {
                    out.push(
                        KeyValue::new(key, json!({ "uri": uri }).to_string())
                            .with_tags(tags)
                            .with_content_type(KEYVAULT_CONTENT_TYPE),
                    );
                    continue;
                }
                None => tracing::debug!(
                    key = %key,
                    "Not a well-formatted KeyVault reference; treated as a regular key-value"
                ),
            }
        } else if let Some(ct) = content_type.filter(|ct| is_json_content_type(ct)) {
            if serde_json::from_str::<Value>(&value).is_err() {
                return Err(AzCliError::Validation(format!(
                    "Value \"{}\" for key \"{}\" is not a valid JSON object, which conflicts with the provided content type \"{}\".",
                    value, key, ct
                )));
            }
        }

        let mut kv = KeyValue::new(key, value).with_tags(tags);
        kv.content_type = content_type.map(str::to_string);
        out.push(kv);
    }
    Ok(out)
}

/// `@Microsoft.AppConfiguration(...)` reference to a store key-value.
pub fn appconfig_reference(endpoint: &str, kv: &KeyValue) -> String {
    let mut reference = format!(
        "{}(Endpoint={}; Key={}",
        APPCONFIG_REFERENCE_PREFIX, endpoint, kv.key
    );
    if let Some(label) = &kv.label {
        reference.push_str(&format!("; Label={}", label));
    }
    reference.push(')');
    reference
}

/// Convert key-values into app settings. Every key-value must carry the
/// slot setting tag.
pub fn to_app_settings(key_values: &[KeyValue]) -> crate::Result<Vec<AppSetting>> {
    key_values
        .iter()
        .map(|kv| {
            let Some(slot) = kv.tags.get(APPSVC_SLOT_SETTING_TAG) else {
                return Err(AzCliError::Validation(format!(
                    "key-values must contain '{}' tag in order to export to AppService correctly.",
                    APPSVC_SLOT_SETTING_TAG
                )));
            };
            let mut value = kv.value_str().to_string();
            if kv.is_key_vault_ref() {
                if let Some(uri) = serde_json::from_str::<Value>(&value)
                    .ok()
                    .and_then(|v| v.get("uri").and_then(Value::as_str).map(str::to_string))
                {
                    value = format!("{}(SecretUri={})", KEYVAULT_REFERENCE_PREFIX, uri);
                }
            }
            Ok(AppSetting {
                name: kv.key.clone(),
                value,
                slot_setting: slot.eq_ignore_ascii_case("true"),
            })
        })
        .collect()
}

pub async fn write_kv_to_app_service(
    backend: &dyn AppServiceBackend,
    account: &AppServiceAccount,
    key_values: &[KeyValue],
) -> crate::Result<()> {
    let settings = to_app_settings(key_values)?;
    backend
        .update_app_settings(account, &settings)
        .await
        .map_err(|e| AzCliError::Cli(format!("Failed to write key-values to appservice: {}", e)))
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeAppService {
        pub settings: Mutex<Vec<AppSetting>>,
        pub updates: Mutex<Vec<Vec<AppSetting>>>,
    }

    impl FakeAppService {
        pub fn with_settings(settings: Vec<AppSetting>) -> Self {
            FakeAppService {
                settings: Mutex::new(settings),
                updates: Mutex::new(Vec::new()),
            }
        }

        pub fn updates(&self) -> Vec<Vec<AppSetting>> {
            self.updates.lock().map(|u| u.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl AppServiceBackend for FakeAppService {
        async fn list_app_settings(&self, _account: &AppServiceAccount) -> crate::Result<Vec<AppSetting>> {
            Ok(self.settings.lock().map(|s| s.clone()).unwrap_or_default())
        }

        async fn update_app_settings(
            &self,
            _account: &AppServiceAccount,
            settings: &[AppSetting],
        ) -> crate::Result<()> {
            if let Ok(mut updates) = self.updates.lock() {
                updates.push(settings.to_vec());
            }
            if let Ok(mut current) = self.settings.lock() {
                for setting in settings {
                    match current.iter_mut().find(|s| s.name == setting.name) {
                        Some(existing) => *existing = setting.clone(),
                        None => current.push(setting.clone()),
                    }
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeAppService;
    use super::*;

    fn setting(name: &str, value: &str, slot_setting: bool) -> AppSetting {
        AppSetting {
            name: name.into(),
            value: value.into(),
            slot_setting,
        }
    }

    #[test]
    fn test_account_from_id() {
        let account = AppServiceAccount::from_id(
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Web/sites/web/slots/staging",
        )
        .unwrap();
        assert_eq!(account.resource_group, "rg");
        assert_eq!(account.name, "web");
        assert_eq!(account.slot.as_deref(), Some("staging"));
        assert!(AppServiceAccount::from_id("/subscriptions/sub/resourceGroups/rg").is_err());
    }

    #[test]
    fn test_keyvault_secret_uri_forms() {
        assert_eq!(
            keyvault_secret_uri("@Microsoft.KeyVault(SecretUri=https://v.vault.azure.net/secrets/s/1)").as_deref(),
            Some("https://v.vault.azure.net/secrets/s/1")
        );
        assert_eq!(
            keyvault_secret_uri("@Microsoft.KeyVault(VaultName=v; SecretName=s; SecretVersion=2)").as_deref(),
            Some("https://v.vault.azure.net/secrets/s/2")
        );
        assert_eq!(keyvault_secret_uri("@Microsoft.KeyVault(Junk)"), None);
    }

    #[tokio::test]
    async fn test_read_settings() {
        let backend = FakeAppService::with_settings(vec![
            setting("Color", "red", false),
            setting("Sticky", "1", true),
            setting("Ref", "@Microsoft.AppConfiguration(Endpoint=https://s.azconfig.io; Key=a)", false),
            setting("Secret", "@Microsoft.KeyVault(SecretUri=https://v.vault.azure.net/secrets/s)", false),
        ]);
        let account = AppServiceAccount::new("rg", "web", None);
        let kvs = read_kv_from_app_service(&backend, &account, "app:", None).await.unwrap();

        let keys: Vec<&str> = kvs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["app:Color", "app:Sticky", "app:Secret"]);
        assert_eq!(
            kvs[1].tags.get(APPSVC_SLOT_SETTING_TAG).map(String::as_str),
            Some("true")
        );
        assert!(kvs[2].is_key_vault_ref());
        assert_eq!(kvs[2].value_str(), r#"{"uri":"https://v.vault.azure.net/secrets/s"}"#);
    }

    #[tokio::test]
    async fn test_json_content_type_requires_json_values() {
        let backend = FakeAppService::with_settings(vec![setting("Plain", "not json", false)]);
        let account = AppServiceAccount::new("rg", "web", None);
        let result = read_kv_from_app_service(&backend, &account, "", Some("application/json")).await;
        assert!(matches!(result, Err(AzCliError::Validation(_))));
    }

    #[tokio::test]
    async fn test_write_requires_slot_tag() {
        let backend = FakeAppService::default();
        let account = AppServiceAccount::new("rg", "web", None);
        let result = write_kv_to_app_service(&backend, &account, &[KeyValue::new("a", "1")]).await;
        assert!(matches!(result, Err(AzCliError::Validation(m)) if m.contains("AppService:SlotSetting")));
        assert!(backend.updates().is_empty());
    }

    #[tokio::test]
    async fn test_write_converts_keyvault_refs() {
        let backend = FakeAppService::default();
        let account = AppServiceAccount::new("rg", "web", None);
        let mut tags = Tags::new();
        tags.insert(APPSVC_SLOT_SETTING_TAG.into(), "true".into());
        let kv = KeyValue::new("Secret", r#"{"uri":"https://v.vault.azure.net/secrets/s"}"#)
            .with_content_type(KEYVAULT_CONTENT_TYPE)
            .with_tags(tags);
        write_kv_to_app_service(&backend, &account, &[kv]).await.unwrap();
        let written = &backend.updates()[0][0];
        assert_eq!(written.value, "@Microsoft.KeyVault(SecretUri=https://v.vault.azure.net/secrets/s)");
        assert!(written.slot_setting);
    }

    #[test]
    fn test_appconfig_reference() {
        let kv = KeyValue::new("color", "red").with_label(Some("prod"));
        assert_eq!(
            appconfig_reference("https://s.azconfig.io", &kv),
            "@Microsoft.AppConfiguration(Endpoint=https://s.azconfig.io; Key=color; Label=prod)"
        );
    }
}
