//! The default (first) agent pool and its cluster autoscaler settings.

use super::{AksContext, DecoratorMode};
use crate::aks::models::{AgentPoolProfile, StringMap};
use crate::error::AzCliError;

const VM_SET_TYPE_VMSS: &str = "VirtualMachineScaleSets";
const VM_SET_TYPE_AVAILABILITY_SET: &str = "AvailabilitySet";
const NODEPOOL_NAME_MAX_LEN: usize = 12;
const TAINT_EFFECTS: &[&str] = &["NoSchedule", "PreferNoSchedule", "NoExecute"];

/// Requested change to the default pool's cluster autoscaler on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoscalerChange {
    Enable { min_count: i64, max_count: i64 },
    Update { min_count: i64, max_count: i64 },
    Disable,
}

pub(super) const AUTOSCALER_FLAGS_CONFLICT: &str =
    "Can only specify one of \"--enable-cluster-autoscaler\", \"--disable-cluster-autoscaler\" \
     and \"--update-cluster-autoscaler\"";

fn check_min_max(min_count: Option<i64>, max_count: Option<i64>, flags: &str) -> crate::Result<(i64, i64)> {
    let (Some(min), Some(max)) = (min_count, max_count) else {
        return Err(AzCliError::RequiredArgumentMissing(format!(
            "Please specify both min-count and max-count when {} enabled",
            flags
        )));
    };
    if min > max {
        return Err(AzCliError::InvalidArgumentValue(
            "Value of min-count should be less than or equal to value of max-count".to_string(),
        ));
    }
    Ok((min, max))
}

impl AksContext<'_> {
    fn from_first_pool<T>(&self, f: impl FnOnce(&AgentPoolProfile) -> Option<T>) -> Option<T> {
        self.from_mc(|mc| {
            mc.properties
                .agent_pool_profiles
                .as_ref()
                .and_then(|pools| pools.first())
                .and_then(f)
        })
    }

    pub fn get_nodepool_name(&self) -> String {
        let name = self
            .from_first_pool(|p| Some(p.name.clone()))
            .or_else(|| self.raw_str("nodepool_name"))
            .unwrap_or_else(|| self.settings.default_nodepool_name.clone());
        name.chars().take(NODEPOOL_NAME_MAX_LEN).collect()
    }

    pub fn get_node_count(&self) -> i64 {
        self.from_first_pool(|p| p.count)
            .or_else(|| self.raw.get_i64("node_count"))
            .unwrap_or(self.settings.default_node_count)
    }

    pub fn get_node_vm_size(&self) -> String {
        self.from_first_pool(|p| p.vm_size.clone())
            .or_else(|| self.raw_str("node_vm_size"))
            .unwrap_or_else(|| self.settings.default_node_vm_size.clone())
    }

    pub fn get_vm_set_type(&self) -> crate::Result<String> {
        let Some(requested) = self
            .from_first_pool(|p| p.pool_type.clone())
            .or_else(|| self.raw_str("vm_set_type"))
        else {
            return Ok(VM_SET_TYPE_VMSS.to_string());
        };
        [VM_SET_TYPE_VMSS, VM_SET_TYPE_AVAILABILITY_SET]
            .iter()
            .find(|t| t.eq_ignore_ascii_case(&requested))
            .map(|t| t.to_string())
            .ok_or_else(|| {
                AzCliError::InvalidArgumentValue(format!(
                    "--vm-set-type can only be {} or {}",
                    VM_SET_TYPE_VMSS, VM_SET_TYPE_AVAILABILITY_SET
                ))
            })
    }

    pub fn get_nodepool_labels(&self) -> Option<StringMap> {
        self.from_first_pool(|p| p.node_labels.clone())
            .or_else(|| self.raw.get_str_map("nodepool_labels"))
    }

    /// Taints in `key=value:Effect` form.
    pub fn get_nodepool_taints(&self) -> crate::Result<Option<Vec<String>>> {
        let Some(taints) = self
            .from_first_pool(|p| p.node_taints.clone())
            .or_else(|| self.raw.get_str_list("nodepool_taints"))
        else {
            return Ok(None);
        };
        for taint in &taints {
            let valid = taint.split_once(':').is_some_and(|(kv, effect)| {
                !kv.is_empty() && !kv.starts_with('=') && TAINT_EFFECTS.contains(&effect)
            });
            if !valid {
                return Err(AzCliError::InvalidArgumentValue(format!(
                    "Taint does not match allowed values: {}",
                    taint
                )));
            }
        }
        Ok(Some(taints))
    }

    /// Create-mode autoscaler settings, validated against `--node-count`.
    pub fn get_enable_cluster_autoscaler_and_min_count_and_max_count(
        &self,
    ) -> crate::Result<(bool, Option<i64>, Option<i64>)> {
        let enable = self
            .from_first_pool(|p| p.enable_auto_scaling)
            .unwrap_or_else(|| self.raw.get_bool("enable_cluster_autoscaler"));
        let min_count = self
            .from_first_pool(|p| p.min_count)
            .or_else(|| self.raw.get_i64("min_count"));
        let max_count = self
            .from_first_pool(|p| p.max_count)
            .or_else(|| self.raw.get_i64("max_count"));

        if enable {
            let (min, max) = check_min_max(min_count, max_count, "--enable-cluster-autoscaler")?;
            let node_count = self.get_node_count();
            if node_count < min || node_count > max {
                return Err(AzCliError::InvalidArgumentValue(
                    "node-count is not in the range of min-count and max-count".to_string(),
                ));
            }
        } else if min_count.is_some() || max_count.is_some() {
            return Err(AzCliError::RequiredArgumentMissing(
                "min-count and max-count are required for --enable-cluster-autoscaler, please use the flag"
                    .to_string(),
            ));
        }
        Ok((enable, min_count, max_count))
    }

    /// Update-mode autoscaler change for the single pool of the cluster.
    ///
    /// Asking for the state the pool is already in ends the command early.
    pub fn get_autoscaler_change(&self) -> crate::Result<Option<AutoscalerChange>> {
        let enable = self.raw.get_bool("enable_cluster_autoscaler");
        let disable = self.raw.get_bool("disable_cluster_autoscaler");
        let update = self.raw.get_bool("update_cluster_autoscaler");
        let min_count = self.raw.get_i64("min_count");
        let max_count = self.raw.get_i64("max_count");

        if [enable, disable, update].iter().filter(|f| **f).count() > 1 {
            return Err(AzCliError::MutuallyExclusiveArgument(
                AUTOSCALER_FLAGS_CONFLICT.to_string(),
            ));
        }
        if !(enable || disable || update) {
            if min_count.is_some() || max_count.is_some() {
                return Err(AzCliError::RequiredArgumentMissing(
                    "min-count and max-count are supplied but --enable-cluster-autoscaler or \
                     --update-cluster-autoscaler is not set, please use the corresponding flag."
                        .to_string(),
                ));
            }
            return Ok(None);
        }

        let pools = self
            .mc()
            .and_then(|mc| mc.properties.agent_pool_profiles.as_deref())
            .unwrap_or_default();
        if pools.len() > 1 {
            return Err(AzCliError::InvalidArgumentValue(
                "There are more than one node pool in the cluster. Please use \"az aks nodepool command\" \
                 to update per node pool auto scaler settings"
                    .to_string(),
            ));
        }
        let enabled_now = pools
            .first()
            .and_then(|p| p.enable_auto_scaling)
            .unwrap_or(false);

        if enable {
            let (min_count, max_count) = check_min_max(
                min_count,
                max_count,
                "--enable-cluster-autoscaler or --update-cluster-autoscaler",
            )?;
            if enabled_now {
                tracing::warn!(
                    "Cluster autoscaler is already enabled for this node pool. \
                     Use --update-cluster-autoscaler to update min-count or max-count."
                );
                return Err(AzCliError::DecoratorEarlyExit);
            }
            return Ok(Some(AutoscalerChange::Enable { min_count, max_count }));
        }
        if update {
            let (min_count, max_count) = check_min_max(
                min_count,
                max_count,
                "--enable-cluster-autoscaler or --update-cluster-autoscaler",
            )?;
            if !enabled_now {
                return Err(AzCliError::InvalidArgumentValue(
                    "Cluster autoscaler is not enabled for this node pool. \
                     Run \"az aks nodepool update --enable-cluster-autoscaler\" to enable cluster with \
                     min-count and max-count."
                        .to_string(),
                ));
            }
            return Ok(Some(AutoscalerChange::Update { min_count, max_count }));
        }

        if min_count.is_some() || max_count.is_some() {
            return Err(AzCliError::MutuallyExclusiveArgument(
                "min-count and max-count cannot be used together with --disable-cluster-autoscaler"
                    .to_string(),
            ));
        }
        if !enabled_now {
            tracing::warn!("Cluster autoscaler is already disabled for this node pool.");
            return Err(AzCliError::DecoratorEarlyExit);
        }
        Ok(Some(AutoscalerChange::Disable))
    }

    /// The single system pool a new cluster starts with.
    pub fn build_default_agentpool_profile(&self) -> crate::Result<AgentPoolProfile> {
        let (enable_auto_scaling, min_count, max_count) =
            self.get_enable_cluster_autoscaler_and_min_count_and_max_count()?;
        Ok(AgentPoolProfile {
            name: self.get_nodepool_name(),
            count: Some(self.get_node_count()),
            vm_size: Some(self.get_node_vm_size()),
            os_disk_size_gb: self
                .from_first_pool(|p| p.os_disk_size_gb)
                .or_else(|| self.raw.get_i64("node_osdisk_size"))
                .filter(|size| *size > 0),
            os_type: Some("Linux".to_string()),
            mode: Some("System".to_string()),
            pool_type: Some(self.get_vm_set_type()?),
            orchestrator_version: self.get_kubernetes_version(),
            vnet_subnet_id: self.get_vnet_subnet_id(),
            pod_subnet_id: self.get_pod_subnet_id(),
            max_pods: self
                .from_first_pool(|p| p.max_pods)
                .or_else(|| self.raw.get_i64("max_pods"))
                .filter(|pods| *pods > 0),
            enable_auto_scaling: enable_auto_scaling.then_some(true),
            min_count: enable_auto_scaling.then_some(min_count).flatten(),
            max_count: enable_auto_scaling.then_some(max_count).flatten(),
            node_labels: self.get_nodepool_labels(),
            node_taints: self.get_nodepool_taints()?,
            availability_zones: self
                .from_first_pool(|p| p.availability_zones.clone())
                .or_else(|| self.raw.get_str_list("zones")),
            enable_node_public_ip: self
                .raw
                .get_bool("enable_node_public_ip")
                .then_some(true),
            enable_encryption_at_host: self
                .raw
                .get_bool("enable_encryption_at_host")
                .then_some(true),
            tags: self
                .from_first_pool(|p| p.tags.clone())
                .or_else(|| self.raw.get_str_map("nodepool_tags")),
        })
    }

    /// Apply autoscaler changes to the first pool and labels to every pool.
    pub fn update_agentpool_profiles(&self, pools: &mut [AgentPoolProfile]) -> crate::Result<()> {
        if self.mode != DecoratorMode::Update {
            return Err(AzCliError::Internal(
                "agent pool profiles are only updated in update mode".to_string(),
            ));
        }
        let Some(first) = pools.first_mut() else {
            return Err(AzCliError::UnknownError(
                "Encounter an unexpected error while getting agent pool profiles from the cluster in \
                 the process of updating agentpool profile."
                    .to_string(),
            ));
        };
        match self.get_autoscaler_change()? {
            Some(AutoscalerChange::Enable { min_count, max_count })
            | Some(AutoscalerChange::Update { min_count, max_count }) => {
                first.enable_auto_scaling = Some(true);
                first.min_count = Some(min_count);
                first.max_count = Some(max_count);
            }
            Some(AutoscalerChange::Disable) => {
                first.enable_auto_scaling = Some(false);
                first.min_count = None;
                first.max_count = None;
            }
            None => {}
        }

        if let Some(labels) = self.raw.get_str_map("nodepool_labels") {
            for pool in pools.iter_mut() {
                pool.node_labels = Some(labels.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::Fixture;
    use super::*;
    use crate::aks::models::ManagedCluster;

    fn cluster_with_pools(pools: Vec<AgentPoolProfile>) -> ManagedCluster {
        let mut mc = ManagedCluster::default();
        mc.properties.agent_pool_profiles = Some(pools);
        mc
    }

    fn pool(name: &str, autoscaling: bool) -> AgentPoolProfile {
        AgentPoolProfile {
            name: name.to_string(),
            count: Some(3),
            enable_auto_scaling: Some(autoscaling),
            min_count: autoscaling.then_some(1),
            max_count: autoscaling.then_some(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_profile_uses_settings() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, json!({"kubernetes_version": "1.29.2"}));
        let profile = ctx.build_default_agentpool_profile().unwrap();
        assert_eq!(profile.name, "nodepool1");
        assert_eq!(profile.count, Some(3));
        assert_eq!(profile.vm_size.as_deref(), Some("Standard_DS2_v2"));
        assert_eq!(profile.pool_type.as_deref(), Some("VirtualMachineScaleSets"));
        assert_eq!(profile.mode.as_deref(), Some("System"));
        assert_eq!(profile.orchestrator_version.as_deref(), Some("1.29.2"));
        assert_eq!(profile.enable_auto_scaling, None);
    }

    #[test]
    fn test_nodepool_name_is_truncated() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Create, json!({"nodepool_name": "averyverylongpoolname"}));
        assert_eq!(ctx.get_nodepool_name(), "averyverylon");
    }

    #[test]
    fn test_create_autoscaler_validation() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_cluster_autoscaler": true, "min_count": 1}),
        );
        assert!(matches!(
            ctx.get_enable_cluster_autoscaler_and_min_count_and_max_count(),
            Err(AzCliError::RequiredArgumentMissing(msg))
                if msg == "Please specify both min-count and max-count when --enable-cluster-autoscaler enabled"
        ));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_cluster_autoscaler": true, "min_count": 5, "max_count": 1}),
        );
        assert!(matches!(
            ctx.get_enable_cluster_autoscaler_and_min_count_and_max_count(),
            Err(AzCliError::InvalidArgumentValue(msg))
                if msg == "Value of min-count should be less than or equal to value of max-count"
        ));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_cluster_autoscaler": true, "min_count": 4, "max_count": 6, "node_count": 3}),
        );
        assert!(matches!(
            ctx.get_enable_cluster_autoscaler_and_min_count_and_max_count(),
            Err(AzCliError::InvalidArgumentValue(msg))
                if msg == "node-count is not in the range of min-count and max-count"
        ));

        let ctx = fx.context(DecoratorMode::Create, json!({"max_count": 6}));
        assert!(matches!(
            ctx.get_enable_cluster_autoscaler_and_min_count_and_max_count(),
            Err(AzCliError::RequiredArgumentMissing(_))
        ));

        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"enable_cluster_autoscaler": true, "min_count": 1, "max_count": 5}),
        );
        let profile = ctx.build_default_agentpool_profile().unwrap();
        assert_eq!(profile.enable_auto_scaling, Some(true));
        assert_eq!((profile.min_count, profile.max_count), (Some(1), Some(5)));
    }

    #[test]
    fn test_invalid_taint_rejected() {
        let fx = Fixture::new();
        let ctx = fx.context(
            DecoratorMode::Create,
            json!({"nodepool_taints": "sku=gpu:NoSchedule,bad"}),
        );
        assert!(matches!(
            ctx.get_nodepool_taints(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg.ends_with("bad")
        ));
    }

    #[test]
    fn test_update_autoscaler_flags_are_exclusive() {
        let fx = Fixture::new();
        let mut ctx = fx.context(
            DecoratorMode::Update,
            json!({"enable_cluster_autoscaler": true, "disable_cluster_autoscaler": true}),
        );
        ctx.attach_mc(cluster_with_pools(vec![pool("np", false)])).unwrap();
        assert!(matches!(
            ctx.get_autoscaler_change(),
            Err(AzCliError::MutuallyExclusiveArgument(_))
        ));
    }

    #[test]
    fn test_update_autoscaler_rejects_multiple_pools() {
        let fx = Fixture::new();
        let mut ctx = fx.context(
            DecoratorMode::Update,
            json!({"enable_cluster_autoscaler": true, "min_count": 1, "max_count": 3}),
        );
        ctx.attach_mc(cluster_with_pools(vec![pool("a", false), pool("b", false)]))
            .unwrap();
        assert!(matches!(
            ctx.get_autoscaler_change(),
            Err(AzCliError::InvalidArgumentValue(msg)) if msg.contains("az aks nodepool command")
        ));
    }

    #[test]
    fn test_update_autoscaler_state_transitions() {
        let fx = Fixture::new();
        let mut ctx = fx.context(
            DecoratorMode::Update,
            json!({"enable_cluster_autoscaler": true, "min_count": 1, "max_count": 3}),
        );
        ctx.attach_mc(cluster_with_pools(vec![pool("np", true)])).unwrap();
        assert!(matches!(ctx.get_autoscaler_change(), Err(AzCliError::DecoratorEarlyExit)));

        let mut ctx = fx.context(
            DecoratorMode::Update,
            json!({"update_cluster_autoscaler": true, "min_count": 1, "max_count": 3}),
        );
        ctx.attach_mc(cluster_with_pools(vec![pool("np", false)])).unwrap();
        assert!(matches!(
            ctx.get_autoscaler_change(),
            Err(AzCliError::InvalidArgumentValue(_))
        ));

        let mut ctx = fx.context(DecoratorMode::Update, json!({"disable_cluster_autoscaler": true}));
        ctx.attach_mc(cluster_with_pools(vec![pool("np", true)])).unwrap();
        let mut pools = ctx.mc().and_then(|mc| mc.properties.agent_pool_profiles.clone()).unwrap();
        ctx.update_agentpool_profiles(&mut pools).unwrap();
        assert_eq!(pools[0].enable_auto_scaling, Some(false));
        assert_eq!(pools[0].min_count, None);
    }

    #[test]
    fn test_update_labels_apply_to_every_pool() {
        let fx = Fixture::new();
        let ctx = fx.context(DecoratorMode::Update, json!({"nodepool_labels": {"team": "infra"}}));
        let mut pools = vec![pool("a", false), pool("b", false)];
        ctx.update_agentpool_profiles(&mut pools).unwrap();
        assert!(pools
            .iter()
            .all(|p| p.node_labels.as_ref().and_then(|l| l.get("team")).map(String::as_str) == Some("infra")));
    }
}
