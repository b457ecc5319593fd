//! Explicit build plan for the managed cluster profile builders.
//!
//! Each step declares which parts of the cluster it reads and writes. The plan
//! orders steps so that every reader runs after the writers it depends on, and
//! two writers of the same field keep their declaration order.

use std::collections::{BTreeSet, VecDeque};

use crate::error::AzCliError;

/// A part of the managed cluster (or of the command's side effects) a step touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum McField {
    Location,
    AgentPoolProfiles,
    Tags,
    KubernetesVersion,
    DnsPrefix,
    FqdnSubdomain,
    DiskEncryptionSet,
    DisableLocalAccounts,
    EnableRbac,
    LinuxProfile,
    WindowsProfile,
    ServicePrincipalProfile,
    VnetPermission,
    AcrAttach,
    NetworkProfile,
    AddonProfiles,
    AadProfile,
    ApiServerAccessProfile,
    Identity,
    IdentityProfile,
    AutoUpgradeProfile,
    AutoScalerProfile,
    Sku,
    ExtendedLocation,
    NodeResourceGroup,
    SecurityProfile,
    OidcIssuerProfile,
    StorageProfile,
    HttpProxyConfig,
    WorkloadAutoScalerProfile,
    IngressProfile,
    SupportPlan,
    AzureMonitorProfile,
    ServiceMeshProfile,
    ContainerStorage,
    MetricsProfile,
}

/// A profile builder with declared data dependencies.
pub trait BuildStep: Copy {
    fn name(&self) -> &'static str;
    fn reads(&self) -> &'static [McField];
    fn writes(&self) -> &'static [McField];
}

#[derive(Debug, Clone)]
pub struct BuildPlan<S> {
    steps: Vec<S>,
}

impl<S: BuildStep> BuildPlan<S> {
    /// Topologically sort `steps` (Kahn's algorithm, ties by declaration order).
    pub fn sorted(steps: &[S]) -> crate::Result<Self> {
        let n = steps.len();
        let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        let mut indegree = vec![0usize; n];

        for (a, step_a) in steps.iter().enumerate() {
            for (b, step_b) in steps.iter().enumerate() {
                if a == b {
                    continue;
                }
                let feeds = step_b.reads().iter().any(|f| step_a.writes().contains(f));
                let shares_write =
                    a < b && step_b.writes().iter().any(|f| step_a.writes().contains(f));
                if (feeds || shares_write) && edges[a].insert(b) {
                    indegree[b] += 1;
                }
            }
        }

        // always take the earliest declared ready step
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_first() {
            order.push(steps[i]);
            for &j in &edges[i] {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.insert(j);
                }
            }
        }

        if order.len() != n {
            let stuck: Vec<&str> = (0..n)
                .filter(|&i| indegree[i] > 0)
                .map(|i| steps[i].name())
                .collect();
            return Err(AzCliError::Internal(format!(
                "cyclic dependency among build steps: {}",
                stuck.join(", ")
            )));
        }

        Ok(BuildPlan { steps: order })
    }

    pub fn steps(&self) -> &[S] {
        &self.steps
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(BuildStep::name).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == name)
    }
}

impl<S> IntoIterator for BuildPlan<S> {
    type Item = S;
    type IntoIter = std::vec::IntoIter<S>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum TestStep {
        Network,
        LoadBalancer,
        Identity,
        IdentityProfile,
        Tags,
        Loop,
    }

    impl BuildStep for TestStep {
        fn name(&self) -> &'static str {
            match self {
                TestStep::Network => "network",
                TestStep::LoadBalancer => "load_balancer",
                TestStep::Identity => "identity",
                TestStep::IdentityProfile => "identity_profile",
                TestStep::Tags => "tags",
                TestStep::Loop => "loop",
            }
        }

        fn reads(&self) -> &'static [McField] {
            match self {
                TestStep::LoadBalancer => &[McField::NetworkProfile],
                TestStep::IdentityProfile => &[McField::Identity],
                TestStep::Loop => &[McField::Sku],
                TestStep::Tags => &[McField::Sku],
                _ => &[],
            }
        }

        fn writes(&self) -> &'static [McField] {
            match self {
                TestStep::Network => &[McField::NetworkProfile],
                TestStep::LoadBalancer => &[McField::NetworkProfile],
                TestStep::Identity => &[McField::Identity],
                TestStep::IdentityProfile => &[McField::IdentityProfile],
                TestStep::Tags => &[McField::Tags],
                TestStep::Loop => &[McField::Tags, McField::Sku],
            }
        }
    }

    #[test]
    fn test_readers_follow_writers() {
        let plan = BuildPlan::sorted(&[
            TestStep::IdentityProfile,
            TestStep::LoadBalancer,
            TestStep::Identity,
            TestStep::Network,
        ])
        .unwrap();
        let names = plan.names();
        assert!(plan.position("identity") < plan.position("identity_profile"));
        assert!(plan.position("network") < plan.position("load_balancer"));
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_independent_steps_keep_declaration_order() {
        let plan =
            BuildPlan::sorted(&[TestStep::Identity, TestStep::Network, TestStep::IdentityProfile])
                .unwrap();
        assert_eq!(plan.names(), vec!["identity", "network", "identity_profile"]);
    }

    #[test]
    fn test_shared_writers_keep_declaration_order() {
        // both write NetworkProfile; LoadBalancer also reads it
        let plan = BuildPlan::sorted(&[TestStep::Network, TestStep::LoadBalancer]).unwrap();
        assert_eq!(plan.names(), vec!["network", "load_balancer"]);
    }

    #[test]
    fn test_cycle_is_internal_error() {
        // Tags reads Sku written by Loop, Loop is declared first and shares Tags
        let result = BuildPlan::sorted(&[TestStep::Loop, TestStep::Tags]);
        assert!(result.is_ok());

        let result = BuildPlan::sorted(&[TestStep::Tags, TestStep::Loop]);
        assert!(
            matches!(result, Err(AzCliError::Internal(msg)) if msg.contains("cyclic dependency"))
        );
    }
}
