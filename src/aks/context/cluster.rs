//! OS profiles, cluster identity and registry access.

use super::{AksContext, DecoratorMode};
use crate::aks::backend::IdentityInfo;
use crate::aks::consts::LICENSE_TYPE_WINDOWS_SERVER;
use crate::aks::ssh;
use crate::error::AzCliError;
use crate::prompt::user_confirmation;

impl AksContext<'_> {
    /// Non-empty string flag.
    pub(crate) fn raw_str(&self, key: &str) -> Option<String> {
        self.raw.get_str(key).filter(|s| !s.is_empty())
    }

    /// Public key text and whether `--no-ssh-key` was given.
    pub fn get_ssh_key_value_and_no_ssh_key(&self) -> crate::Result<(Option<String>, bool)> {
        let from_mc = self.mc().and_then(|mc| {
            mc.properties
                .linux_profile
                .as_ref()
                .and_then(|p| p.ssh.public_keys.first())
                .map(|k| k.key_data.clone())
        });
        let no_ssh_key = self.raw.get_bool("no_ssh_key");
        if from_mc.is_some() && no_ssh_key {
            return Err(AzCliError::Internal(
                "Inconsistent state detected, ssh_key_value is read from the `mc` object while no_ssh_key is enabled."
                    .to_string(),
            ));
        }
        if let Some(key) = from_mc {
            return Ok((Some(key), false));
        }
        if no_ssh_key {
            return Ok((None, true));
        }

        let value = self
            .raw_str("ssh_key_value")
            .unwrap_or_else(|| ssh::DEFAULT_SSH_KEY_PATH.to_string());
        let key = ssh::resolve_public_key(&value, self.raw.get_bool("generate_ssh_keys"))?;
        Ok((Some(key), false))
    }

    pub fn get_admin_username(&self) -> String {
        self.mc()
            .and_then(|mc| mc.properties.linux_profile.as_ref())
            .map(|p| p.admin_username.clone())
            .or_else(|| self.raw_str("admin_username"))
            .unwrap_or_else(|| self.settings.default_admin_username.clone())
    }

    pub fn windows_admin_username_and_password_value(
        &self,
    ) -> crate::Result<(Option<String>, Option<String>, bool)> {
        let profile = self.mc().and_then(|mc| mc.properties.windows_profile.as_ref());
        let username_from_mc = profile.map(|p| p.admin_username.clone());
        let password_from_mc = profile.and_then(|p| p.admin_password.clone());
        if username_from_mc.is_some() != password_from_mc.is_some() {
            return Err(AzCliError::Internal(
                "Inconsistent state detected, one of windows admin name and password is read from the `mc` object."
                    .to_string(),
            ));
        }
        if username_from_mc.is_some() {
            return Ok((username_from_mc, password_from_mc, true));
        }
        Ok((
            self.raw_str("windows_admin_username"),
            self.raw_str("windows_admin_password"),
            false,
        ))
    }

    /// Windows credentials, prompting for whichever half is missing.
    pub fn get_windows_admin_username_and_password(
        &self,
    ) -> crate::Result<(Option<String>, Option<String>)> {
        let (mut username, mut password, from_mc) =
            self.windows_admin_username_and_password_value()?;

        if !from_mc && username.is_none() && password.is_some() {
            username = Some(self.prompter.prompt("windows_admin_username: ").map_err(|_| {
                AzCliError::RequiredArgumentMissing(
                    "Please specify username for Windows in non-interactive mode.".to_string(),
                )
            })?);
        }
        if !from_mc && password.is_none() && username.is_some() {
            password = Some(
                self.prompter
                    .prompt_password("windows-admin-password: ")
                    .map_err(|_| {
                        AzCliError::RequiredArgumentMissing(
                            "Please specify both username and password in non-interactive mode."
                                .to_string(),
                        )
                    })?,
            );
        }

        if self.mode == DecoratorMode::Create && username.is_none() && password.is_none() {
            let (dns, root) = self.gmsa_dns_server_and_root_domain_name_value()?;
            if self.enable_windows_gmsa_value() || dns.is_some() || root.is_some() {
                return Err(AzCliError::RequiredArgumentMissing(
                    "Please set windows admin username and password before setting gmsa related configs."
                        .to_string(),
                ));
            }
        }
        Ok((username, password))
    }

    pub fn get_windows_admin_password(&self) -> Option<String> {
        self.raw_str("windows_admin_password")
    }

    pub fn get_enable_ahub(&self) -> crate::Result<bool> {
        let (mut enable, _) = self.exclusive_pair_ahub()?;
        if let Some(profile) = self.from_mc(|mc| mc.properties.windows_profile.clone()) {
            enable = profile.license_type.as_deref() == Some(LICENSE_TYPE_WINDOWS_SERVER);
        }
        Ok(enable)
    }

    pub fn get_disable_ahub(&self) -> crate::Result<bool> {
        self.exclusive_pair_ahub().map(|(_, off)| off)
    }

    fn exclusive_pair_ahub(&self) -> crate::Result<(bool, bool)> {
        let on = self.raw.get_bool("enable_ahub");
        let off = self.raw.get_bool("disable_ahub");
        if on && off {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "Cannot specify \"--enable-ahub\" and \"--disable-ahub\" at the same time"
                    .to_string(),
            ));
        }
        Ok((on, off))
    }

    pub fn enable_windows_gmsa_value(&self) -> bool {
        self.from_mc(|mc| {
            mc.properties
                .windows_profile
                .as_ref()
                .and_then(|p| p.gmsa_profile.as_ref())
                .map(|g| g.enabled)
        })
        .unwrap_or_else(|| self.raw.get_bool("enable_windows_gmsa"))
    }

    pub fn gmsa_dns_server_and_root_domain_name_value(
        &self,
    ) -> crate::Result<(Option<String>, Option<String>)> {
        let gmsa = self.from_mc(|mc| {
            mc.properties
                .windows_profile
                .as_ref()
                .and_then(|p| p.gmsa_profile.clone())
        });
        let dns_from_mc = gmsa.as_ref().and_then(|g| g.dns_server.clone());
        let root_from_mc = gmsa.as_ref().and_then(|g| g.root_domain_name.clone());
        if dns_from_mc.is_some() != root_from_mc.is_some() {
            return Err(AzCliError::Internal(
                "Inconsistent state detected, one of gmsa_dns_server and gmsa_root_domain_name is read from the `mc` object."
                    .to_string(),
            ));
        }
        Ok((
            dns_from_mc.or_else(|| self.raw_str("gmsa_dns_server")),
            root_from_mc.or_else(|| self.raw_str("gmsa_root_domain_name")),
        ))
    }

    /// gMSA switch and its DNS settings, validated together.
    pub fn get_windows_gmsa(&self) -> crate::Result<(bool, Option<String>, Option<String>)> {
        let enabled = self.enable_windows_gmsa_value();
        let (dns, root) = self.gmsa_dns_server_and_root_domain_name_value()?;
        if enabled {
            match (&dns, &root) {
                (None, None) => user_confirmation(
                    self.prompter,
                    "Please assure that you have set the DNS server in the vnet used by the cluster \
                     when not specifying --gmsa-dns-server and --gmsa-root-domain-name",
                    self.get_yes(),
                )?,
                (Some(_), Some(_)) => {}
                _ => {
                    return Err(AzCliError::RequiredArgumentMissing(
                        "You must set or not set --gmsa-dns-server and --gmsa-root-domain-name at the same time."
                            .to_string(),
                    ));
                }
            }
        } else if dns.is_some() || root.is_some() {
            return Err(AzCliError::RequiredArgumentMissing(
                "You only can set --gmsa-dns-server and --gmsa-root-domain-name when setting --enable-windows-gmsa."
                    .to_string(),
            ));
        }
        Ok((enabled, dns, root))
    }

    /// Service principal and secret without completion; the flag says
    /// whether both came from the attached cluster.
    pub fn service_principal_and_client_secret_value(
        &self,
    ) -> crate::Result<(Option<String>, Option<String>, bool)> {
        let profile = self
            .mc()
            .and_then(|mc| mc.properties.service_principal_profile.as_ref());
        let sp_from_mc = profile.map(|p| p.client_id.clone());
        let secret_from_mc = profile.and_then(|p| p.secret.clone());
        if sp_from_mc.is_some() != secret_from_mc.is_some() {
            return Err(AzCliError::Internal(
                "Inconsistent state detected, one of sp and secret is read from the `mc` object."
                    .to_string(),
            ));
        }
        if sp_from_mc.is_some() {
            return Ok((sp_from_mc, secret_from_mc, true));
        }
        Ok((
            self.raw_str("service_principal"),
            self.raw_str("client_secret"),
            false,
        ))
    }

    /// Service principal credentials, creating a principal when a cluster
    /// without managed identity gets none.
    pub async fn get_service_principal_and_client_secret(
        &self,
    ) -> crate::Result<(Option<String>, Option<String>)> {
        let (sp, secret, from_mc) = self.service_principal_and_client_secret_value()?;
        let msi = self.enable_managed_identity_value();
        let completion = !(msi && sp.is_none() && secret.is_none()) && !from_mc;
        if !completion {
            return Ok((sp, secret));
        }
        match (sp, secret) {
            (Some(sp), Some(secret)) => Ok((Some(sp), Some(secret))),
            (Some(_), None) => Err(AzCliError::RequiredArgumentMissing(
                "--client-secret is required if --service-principal is specified".to_string(),
            )),
            (None, _) => {
                let created = self.backend.create_service_principal(&self.get_name()).await?;
                Ok((Some(created.client_id), Some(created.secret)))
            }
        }
    }

    pub fn enable_managed_identity_value(&self) -> bool {
        self.from_mc(|mc| mc.identity.as_ref().map(|_| mc.is_msi_cluster()))
            .unwrap_or_else(|| self.raw.get_bool("enable_managed_identity"))
    }

    pub fn get_enable_managed_identity(&self) -> crate::Result<bool> {
        let read_from_mc = self.from_mc(|mc| mc.identity.as_ref().map(|_| ())).is_some();
        let mut enabled = self.enable_managed_identity_value();
        if self.mode == DecoratorMode::Create && !read_from_mc {
            let (sp, secret, _) = self.service_principal_and_client_secret_value()?;
            if sp.is_some() && secret.is_some() {
                enabled = false;
            }
        }
        if !enabled && self.assign_identity_value().is_some() {
            return Err(AzCliError::RequiredArgumentMissing(
                "--assign-identity can only be specified when --enable-managed-identity is specified"
                    .to_string(),
            ));
        }
        Ok(enabled)
    }

    pub fn get_skip_subnet_role_assignment(&self) -> bool {
        self.raw.get_bool("skip_subnet_role_assignment")
    }

    pub fn assign_identity_value(&self) -> Option<String> {
        self.from_mc(|mc| {
            mc.identity
                .as_ref()
                .and_then(|i| i.user_assigned_identities.as_ref())
                .and_then(|ids| ids.keys().next().cloned())
        })
        .or_else(|| self.raw_str("assign_identity"))
    }

    pub fn get_assign_identity(&self) -> crate::Result<Option<String>> {
        let assign_identity = self.assign_identity_value();
        if assign_identity.is_some() {
            // the effective managed identity switch, not the raw one
            let (sp, secret, _) = self.service_principal_and_client_secret_value()?;
            let msi = self.enable_managed_identity_value()
                && !(self.mode == DecoratorMode::Create && sp.is_some() && secret.is_some());
            if !msi {
                return Err(AzCliError::RequiredArgumentMissing(
                    "--assign-identity can only be specified when --enable-managed-identity is specified"
                        .to_string(),
                ));
            }
        } else if self.mode == DecoratorMode::Create && self.assign_kubelet_identity_value().is_some()
        {
            return Err(AzCliError::RequiredArgumentMissing(
                "--assign-kubelet-identity can only be specified when --assign-identity is specified"
                    .to_string(),
            ));
        }
        Ok(assign_identity)
    }

    pub fn assign_kubelet_identity_value(&self) -> Option<String> {
        self.mc()
            .and_then(|mc| mc.kubelet_identity())
            .and_then(|k| k.resource_id.clone())
            .or_else(|| self.raw_str("assign_kubelet_identity"))
    }

    pub fn get_assign_kubelet_identity(&self) -> crate::Result<Option<String>> {
        let kubelet = self.assign_kubelet_identity_value();
        if kubelet.is_some() && self.assign_identity_value().is_none() {
            return Err(AzCliError::RequiredArgumentMissing(
                "--assign-kubelet-identity can only be specified when --assign-identity is specified"
                    .to_string(),
            ));
        }
        Ok(kubelet)
    }

    pub async fn get_identity_by_msi_client(&self, resource_id: &str) -> crate::Result<IdentityInfo> {
        self.backend.get_identity(resource_id).await
    }

    async fn assigned_identity(&self) -> crate::Result<IdentityInfo> {
        match self.get_assign_identity()? {
            Some(id) => self.get_identity_by_msi_client(&id).await,
            None => Err(AzCliError::RequiredArgumentMissing(
                "No assigned identity provided.".to_string(),
            )),
        }
    }

    pub async fn get_user_assigned_identity_client_id(&self) -> crate::Result<String> {
        self.assigned_identity().await.map(|i| i.client_id)
    }

    pub async fn get_user_assigned_identity_object_id(&self) -> crate::Result<String> {
        self.assigned_identity().await.map(|i| i.principal_id)
    }

    pub fn get_attach_acr(&self) -> crate::Result<Option<String>> {
        let attach_acr = self.raw_str("attach_acr");
        if self.mode == DecoratorMode::Create && attach_acr.is_some() {
            if self.get_enable_managed_identity()? {
                if self.get_no_wait() {
                    return Err(AzCliError::MutuallyExclusiveArgument(
                        "When --attach-acr and --enable-managed-identity are both specified, \
                         --no-wait is not allowed, please wait until the whole operation succeeds."
                            .to_string(),
                    ));
                }
            } else {
                let (sp, _, _) = self.service_principal_and_client_secret_value()?;
                if sp.is_none() {
                    return Err(AzCliError::RequiredArgumentMissing(
                        "No service principal provided to create the acrpull role assignment for acr."
                            .to_string(),
                    ));
                }
            }
        }
        Ok(attach_acr)
    }

    pub fn get_detach_acr(&self) -> Option<String> {
        self.raw_str("detach_acr")
    }

    /// Principal granted `acrpull`: the kubelet identity on MSI clusters,
    /// the service principal otherwise.
    pub fn get_assignee_from_identity_or_sp_profile(&self) -> crate::Result<(String, bool)> {
        let mc = self
            .mc()
            .ok_or_else(|| AzCliError::Internal("no managed cluster attached".to_string()))?;
        let (assignee, is_service_principal) = if mc.is_msi_cluster() {
            let kubelet = mc.kubelet_identity().ok_or_else(|| {
                AzCliError::UnknownError(
                    "Unexpected error getting kubelet's identity for the cluster. \
                     Please do not set --attach-acr or --detach-acr. \
                     You can manually grant or revoke permission to the identity named \
                     <ClUSTER_NAME>-agentpool in MC_ resource group to access ACR."
                        .to_string(),
                )
            })?;
            (kubelet.object_id.clone(), false)
        } else {
            (
                mc.properties
                    .service_principal_profile
                    .as_ref()
                    .map(|p| p.client_id.clone()),
                true,
            )
        };
        match assignee.filter(|a| !a.is_empty()) {
            Some(a) => Ok((a, is_service_principal)),
            None => Err(AzCliError::UnknownError(
                "Cannot get the AKS cluster's service principal.".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::Fixture;
    use super::super::DecoratorMode;
    use crate::aks::models::{ManagedCluster, WindowsProfile};
    use crate::error::AzCliError;

    #[test]
    fn test_gmsa_requires_both_values() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_windows_gmsa": true, "gmsa_dns_server": "10.0.0.4"}),
        );
        assert!(matches!(
            ctx.get_windows_gmsa(),
            Err(AzCliError::RequiredArgumentMissing(msg)) if msg.contains("at the same time")
        ));

        let ctx = fx.context(DecoratorMode::Create, json!({"gmsa_root_domain_name": "corp"}));
        assert!(matches!(
            ctx.get_windows_gmsa(),
            Err(AzCliError::RequiredArgumentMissing(msg)) if msg.contains("--enable-windows-gmsa")
        ));
    }

    #[test]
    fn test_gmsa_without_dns_prompts() {
        let fx = Fixture::with_answers(&["n"]);
        let ctx = fx.context(DecoratorMode::Create, json!({"enable_windows_gmsa": true}));
        assert!(matches!(ctx.get_windows_gmsa(), Err(AzCliError::DecoratorEarlyExit)));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_windows_gmsa": true, "yes": true}),
        );
        assert_eq!(ctx.get_windows_gmsa().unwrap(), (true, None, None));
    }

    #[test]
    fn test_windows_password_prompted() {
        let fx = Fixture::with_answers(&["s3cret!"]);
        let ctx = fx.context(DecoratorMode::Create, json!({"windows_admin_username": "azure"}));
        let (user, pass) = ctx.get_windows_admin_username_and_password().unwrap();
        assert_eq!(user.as_deref(), Some("azure"));
        assert_eq!(pass.as_deref(), Some("s3cret!"));
        assert_eq!(fx.prompter.asked(), vec!["windows-admin-password: ".to_string()]);
    }

    #[test]
    fn test_ahub_pair_and_mc_license() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Update,
            json!({"enable_ahub": true, "disable_ahub": true}),
        );
        assert!(matches!(
            ctx.get_enable_ahub(),
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));

        let mut ctx = fx.context(DecoratorMode::Create, json!({}));
        let mut mc = ManagedCluster::default();
        mc.properties.windows_profile = Some(WindowsProfile {
            admin_username: "u".into(),
            admin_password: Some("p".into()),
            license_type: Some("Windows_Server".into()),
            gmsa_profile: None,
        });
        ctx.attach_mc(mc).unwrap();
        assert!(ctx.get_enable_ahub().unwrap());
    }

    #[test]
    fn test_service_principal_disables_managed_identity() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_managed_identity": true, "service_principal": "sp", "client_secret": "s"}),
        );
        assert!(!ctx.get_enable_managed_identity().unwrap());

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_managed_identity": false, "assign_identity": "/id"}),
        );
        assert!(matches!(
            ctx.get_assign_identity(),
            Err(AzCliError::RequiredArgumentMissing(_))
        ));
    }

    #[test]
    fn test_kubelet_identity_requires_assign_identity() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_managed_identity": true, "assign_kubelet_identity": "/kubelet"}),
        );
        assert!(matches!(
            ctx.get_assign_identity(),
            Err(AzCliError::RequiredArgumentMissing(msg)) if msg.contains("--assign-kubelet-identity")
        ));
    }

    #[tokio::test]
    async fn test_service_principal_completion() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, json!({"service_principal": "sp"}));
        assert!(matches!(
            ctx.get_service_principal_and_client_secret().await,
            Err(AzCliError::RequiredArgumentMissing(msg)) if msg.starts_with("--client-secret")
        ));

        // managed identity without credentials skips completion
        let ctx = fx.context(DecoratorMode::Create, json!({"enable_managed_identity": true}));
        assert_eq!(ctx.get_service_principal_and_client_secret().await.unwrap(), (None, None));

        let ctx = fx.context(DecoratorMode::Create, json!({"name": "c"}));
        let (sp, secret) = ctx.get_service_principal_and_client_secret().await.unwrap();
        assert_eq!(sp.as_deref(), Some("generated-client"));
        assert_eq!(secret.as_deref(), Some("generated-secret"));
    }

    #[test]
    fn test_attach_acr_with_msi_rejects_no_wait() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"attach_acr": "myacr", "enable_managed_identity": true, "no_wait": true}),
        );
        assert!(matches!(
            ctx.get_attach_acr(),
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));

        let ctx = fx.context(DecoratorMode::Create, json!({"attach_acr": "myacr"}));
        assert!(matches!(
            ctx.get_attach_acr(),
            Err(AzCliError::RequiredArgumentMissing(msg)) if msg.starts_with("No service principal")
        ));
    }
}
