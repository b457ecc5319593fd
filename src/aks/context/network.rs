//! Load balancer, NAT gateway and CNI settings.

use super::AksContext;
use crate::aks::consts::{
    LOAD_BALANCER_SKU_BASIC, LOAD_BALANCER_SKU_STANDARD, OUTBOUND_TYPE_LOAD_BALANCER,
    OUTBOUND_TYPE_MANAGED_NAT_GATEWAY, OUTBOUND_TYPE_USER_ASSIGNED_NAT_GATEWAY,
    OUTBOUND_TYPE_USER_DEFINED_ROUTING,
};
use crate::aks::models::{
    LoadBalancerProfile, ManagedOutboundIps, NatGatewayProfile, NetworkProfile, OutboundIpPrefixes,
    OutboundIps, ResourceReference,
};
use crate::error::AzCliError;

/// Address ranges and policy that only make sense with an explicit plugin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkAddressing {
    pub pod_cidr: Option<String>,
    pub service_cidr: Option<String>,
    pub dns_service_ip: Option<String>,
    pub docker_bridge_address: Option<String>,
    pub network_policy: Option<String>,
}

impl NetworkAddressing {
    pub fn any(&self) -> bool {
        self.pod_cidr.is_some()
            || self.service_cidr.is_some()
            || self.dns_service_ip.is_some()
            || self.docker_bridge_address.is_some()
            || self.network_policy.is_some()
    }
}

/// Load balancer settings as supplied on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadBalancerArgs {
    pub managed_outbound_ip_count: Option<i64>,
    pub outbound_ips: Option<Vec<String>>,
    pub outbound_ip_prefixes: Option<Vec<String>>,
    pub outbound_ports: Option<i64>,
    pub idle_timeout: Option<i64>,
}

impl LoadBalancerArgs {
    fn any(&self) -> bool {
        self.managed_outbound_ip_count.is_some()
            || self.outbound_ips.is_some()
            || self.outbound_ip_prefixes.is_some()
            || self.outbound_ports.is_some()
            || self.idle_timeout.is_some()
    }

    fn customizes_outbound_ips(&self) -> bool {
        self.managed_outbound_ip_count.is_some_and(|c| c != 0)
            || self.outbound_ips.as_ref().is_some_and(|v| !v.is_empty())
            || self.outbound_ip_prefixes.as_ref().is_some_and(|v| !v.is_empty())
    }
}

fn references(ids: &[String]) -> Vec<ResourceReference> {
    ids.iter()
        .map(|id| ResourceReference { id: id.clone() })
        .collect()
}

/// New load balancer profile, `None` when nothing was customised.
pub fn create_load_balancer_profile(args: &LoadBalancerArgs) -> Option<LoadBalancerProfile> {
    if !args.any() {
        return None;
    }
    let mut profile = LoadBalancerProfile::default();
    apply_load_balancer_args(&mut profile, args);
    Some(profile)
}

/// Apply `args` to an existing profile. Only one kind of outbound IP
/// configuration may be active, so setting one clears the others.
pub fn update_load_balancer_profile(
    existing: Option<LoadBalancerProfile>,
    args: &LoadBalancerArgs,
) -> Option<LoadBalancerProfile> {
    if !args.any() {
        return existing;
    }
    let mut profile = existing.unwrap_or_default();
    if args.managed_outbound_ip_count.is_some()
        || args.outbound_ips.is_some()
        || args.outbound_ip_prefixes.is_some()
    {
        profile.managed_outbound_ips = None;
        profile.outbound_ips = None;
        profile.outbound_ip_prefixes = None;
    }
    apply_load_balancer_args(&mut profile, args);
    Some(profile)
}

fn apply_load_balancer_args(profile: &mut LoadBalancerProfile, args: &LoadBalancerArgs) {
    if let Some(count) = args.managed_outbound_ip_count {
        profile.managed_outbound_ips = Some(ManagedOutboundIps { count: Some(count) });
    }
    if let Some(ips) = &args.outbound_ips {
        profile.outbound_ips = Some(OutboundIps {
            public_ips: references(ips),
        });
    }
    if let Some(prefixes) = &args.outbound_ip_prefixes {
        profile.outbound_ip_prefixes = Some(OutboundIpPrefixes {
            public_ip_prefixes: references(prefixes),
        });
    }
    if args.outbound_ports.is_some() {
        profile.allocated_outbound_ports = args.outbound_ports;
    }
    if args.idle_timeout.is_some() {
        profile.idle_timeout_in_minutes = args.idle_timeout;
    }
}

pub fn create_nat_gateway_profile(
    managed_outbound_ip_count: Option<i64>,
    idle_timeout: Option<i64>,
) -> Option<NatGatewayProfile> {
    update_nat_gateway_profile(None, managed_outbound_ip_count, idle_timeout)
}

pub fn update_nat_gateway_profile(
    existing: Option<NatGatewayProfile>,
    managed_outbound_ip_count: Option<i64>,
    idle_timeout: Option<i64>,
) -> Option<NatGatewayProfile> {
    if managed_outbound_ip_count.is_none() && idle_timeout.is_none() {
        return existing;
    }
    let mut profile = existing.unwrap_or_default();
    if let Some(count) = managed_outbound_ip_count {
        profile.managed_outbound_ip_profile = Some(ManagedOutboundIps { count: Some(count) });
    }
    if idle_timeout.is_some() {
        profile.idle_timeout_in_minutes = idle_timeout;
    }
    Some(profile)
}

impl AksContext<'_> {
    /// Network profile field from the attached cluster, in either mode.
    fn from_network_profile<T>(&self, f: impl FnOnce(&NetworkProfile) -> Option<T>) -> Option<T> {
        self.mc()
            .and_then(|mc| mc.properties.network_profile.as_ref())
            .and_then(f)
    }

    fn from_lb_profile<T>(&self, f: impl FnOnce(&LoadBalancerProfile) -> Option<T>) -> Option<T> {
        self.from_mc(|mc| {
            mc.properties
                .network_profile
                .as_ref()
                .and_then(|n| n.load_balancer_profile.as_ref())
                .and_then(f)
        })
    }

    fn from_nat_profile<T>(&self, f: impl FnOnce(&NatGatewayProfile) -> Option<T>) -> Option<T> {
        self.from_mc(|mc| {
            mc.properties
                .network_profile
                .as_ref()
                .and_then(|n| n.nat_gateway_profile.as_ref())
                .and_then(f)
        })
    }

    pub fn load_balancer_sku_value(&self) -> String {
        self.from_network_profile(|n| n.load_balancer_sku.clone())
            .or_else(|| self.raw_str("load_balancer_sku"))
            .unwrap_or_else(|| LOAD_BALANCER_SKU_STANDARD.to_string())
            .to_lowercase()
    }

    pub fn get_load_balancer_sku(&self) -> crate::Result<String> {
        let sku = self.load_balancer_sku_value();
        if sku == LOAD_BALANCER_SKU_BASIC {
            if self
                .api_server_authorized_ip_ranges_value()
                .is_some_and(|r| !r.is_empty())
            {
                return Err(AzCliError::InvalidArgumentValue(
                    "--api-server-authorized-ip-ranges can only be used with standard load balancer"
                        .to_string(),
                ));
            }
            if self.enable_private_cluster_value() {
                return Err(AzCliError::InvalidArgumentValue(
                    "Please use standard load balancer for private cluster".to_string(),
                ));
            }
        }
        Ok(sku)
    }

    pub fn get_load_balancer_managed_outbound_ip_count(&self) -> Option<i64> {
        self.from_lb_profile(|p| p.managed_outbound_ips.as_ref().and_then(|m| m.count))
            .or_else(|| self.raw.get_i64("load_balancer_managed_outbound_ip_count"))
    }

    pub fn get_load_balancer_outbound_ips(&self) -> Option<Vec<String>> {
        self.from_lb_profile(|p| {
            p.outbound_ips
                .as_ref()
                .map(|o| o.public_ips.iter().map(|r| r.id.clone()).collect())
        })
        .or_else(|| self.raw.get_str_list("load_balancer_outbound_ips"))
    }

    pub fn get_load_balancer_outbound_ip_prefixes(&self) -> Option<Vec<String>> {
        self.from_lb_profile(|p| {
            p.outbound_ip_prefixes
                .as_ref()
                .map(|o| o.public_ip_prefixes.iter().map(|r| r.id.clone()).collect())
        })
        .or_else(|| self.raw.get_str_list("load_balancer_outbound_ip_prefixes"))
    }

    pub fn get_load_balancer_outbound_ports(&self) -> Option<i64> {
        self.from_lb_profile(|p| p.allocated_outbound_ports)
            .or_else(|| self.raw.get_i64("load_balancer_outbound_ports"))
    }

    pub fn get_load_balancer_idle_timeout(&self) -> Option<i64> {
        self.from_lb_profile(|p| p.idle_timeout_in_minutes)
            .or_else(|| self.raw.get_i64("load_balancer_idle_timeout"))
    }

    pub fn get_load_balancer_args(&self) -> LoadBalancerArgs {
        LoadBalancerArgs {
            managed_outbound_ip_count: self.get_load_balancer_managed_outbound_ip_count(),
            outbound_ips: self.get_load_balancer_outbound_ips(),
            outbound_ip_prefixes: self.get_load_balancer_outbound_ip_prefixes(),
            outbound_ports: self.get_load_balancer_outbound_ports(),
            idle_timeout: self.get_load_balancer_idle_timeout(),
        }
    }

    pub fn get_nat_gateway_managed_outbound_ip_count(&self) -> Option<i64> {
        self.from_nat_profile(|p| p.managed_outbound_ip_profile.as_ref().and_then(|m| m.count))
            .or_else(|| self.raw.get_i64("nat_gateway_managed_outbound_ip_count"))
    }

    pub fn get_nat_gateway_idle_timeout(&self) -> Option<i64> {
        self.from_nat_profile(|p| p.idle_timeout_in_minutes)
            .or_else(|| self.raw.get_i64("nat_gateway_idle_timeout"))
    }

    /// Outbound type, defaulting to `loadBalancer`. `lb_profile` is the
    /// profile about to be written, when one has been built already.
    pub fn get_outbound_type(
        &self,
        lb_profile: Option<&LoadBalancerProfile>,
    ) -> crate::Result<String> {
        let from_mc = self.from_network_profile(|n| n.outbound_type.clone());
        let read_from_mc = from_mc.is_some();
        let mut outbound_type = from_mc
            .or_else(|| self.raw_str("outbound_type"))
            .unwrap_or_default();

        let special = [
            OUTBOUND_TYPE_USER_DEFINED_ROUTING,
            OUTBOUND_TYPE_MANAGED_NAT_GATEWAY,
            OUTBOUND_TYPE_USER_ASSIGNED_NAT_GATEWAY,
        ];
        if !read_from_mc && !special.contains(&outbound_type.as_str()) {
            outbound_type = OUTBOUND_TYPE_LOAD_BALANCER.to_string();
        }

        if special.contains(&outbound_type.as_str()) {
            if self.load_balancer_sku_value() == LOAD_BALANCER_SKU_BASIC {
                return Err(AzCliError::InvalidArgumentValue(
                    "userDefinedRouting doesn't support basic load balancer sku".to_string(),
                ));
            }
            if (outbound_type == OUTBOUND_TYPE_USER_DEFINED_ROUTING
                || outbound_type == OUTBOUND_TYPE_USER_ASSIGNED_NAT_GATEWAY)
                && self.get_vnet_subnet_id().is_none()
            {
                return Err(AzCliError::RequiredArgumentMissing(
                    "--vnet-subnet-id must be specified for userDefinedRouting and it must \
                     be pre-configured with a route table with egress rules"
                        .to_string(),
                ));
            }
            if outbound_type == OUTBOUND_TYPE_USER_DEFINED_ROUTING {
                let customized = match lb_profile {
                    Some(p) => {
                        p.managed_outbound_ips.is_some()
                            || p.outbound_ips.is_some()
                            || p.outbound_ip_prefixes.is_some()
                    }
                    None => self.get_load_balancer_args().customizes_outbound_ips(),
                };
                if customized {
                    return Err(AzCliError::MutuallyExclusiveArgument(
                        "userDefinedRouting doesn't support customizing a standard load balancer with IP addresses"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(outbound_type)
    }

    pub fn get_vnet_subnet_id(&self) -> Option<String> {
        self.from_mc(|mc| {
            mc.properties
                .agent_pool_profiles
                .as_ref()
                .and_then(|pools| pools.first())
                .and_then(|p| p.vnet_subnet_id.clone())
        })
        .or_else(|| self.raw_str("vnet_subnet_id"))
    }

    pub fn get_pod_subnet_id(&self) -> Option<String> {
        self.from_mc(|mc| {
            mc.properties
                .agent_pool_profiles
                .as_ref()
                .and_then(|pools| pools.first())
                .and_then(|p| p.pod_subnet_id.clone())
        })
        .or_else(|| self.raw_str("pod_subnet_id"))
    }

    pub fn network_plugin_value(&self) -> Option<String> {
        self.from_network_profile(|n| n.network_plugin.clone())
            .or_else(|| self.raw_str("network_plugin"))
    }

    pub fn get_network_plugin_mode(&self) -> Option<String> {
        self.from_network_profile(|n| n.network_plugin_mode.clone())
            .or_else(|| self.raw_str("network_plugin_mode"))
    }

    pub fn get_network_plugin(&self) -> crate::Result<Option<String>> {
        let plugin = self.network_plugin_value();
        let addressing = self.network_addressing_value();
        match &plugin {
            Some(p) => {
                let overlay = self
                    .get_network_plugin_mode()
                    .is_some_and(|m| m.eq_ignore_ascii_case("overlay"));
                if p == "azure" && addressing.pod_cidr.is_some() && !overlay {
                    return Err(AzCliError::InvalidArgumentValue(
                        "Please use kubenet as the network plugin type when pod_cidr is specified"
                            .to_string(),
                    ));
                }
            }
            None if addressing.any() => {
                return Err(AzCliError::RequiredArgumentMissing(
                    "Please explicitly specify the network plugin type".to_string(),
                ));
            }
            None => {}
        }
        Ok(plugin)
    }

    fn network_addressing_value(&self) -> NetworkAddressing {
        let pick = |mc: Option<String>, key: &str| mc.or_else(|| self.raw_str(key));
        NetworkAddressing {
            pod_cidr: pick(self.from_network_profile(|n| n.pod_cidr.clone()), "pod_cidr"),
            service_cidr: pick(
                self.from_network_profile(|n| n.service_cidr.clone()),
                "service_cidr",
            ),
            dns_service_ip: pick(
                self.from_network_profile(|n| n.dns_service_ip.clone()),
                "dns_service_ip",
            ),
            docker_bridge_address: pick(
                self.from_network_profile(|n| n.docker_bridge_cidr.clone()),
                "docker_bridge_address",
            ),
            network_policy: pick(
                self.from_network_profile(|n| n.network_policy.clone()),
                "network_policy",
            ),
        }
    }

    pub fn get_network_addressing(&self) -> crate::Result<NetworkAddressing> {
        let addressing = self.network_addressing_value();
        if addressing.docker_bridge_address.is_some() && !self.caps.docker_bridge_cidr {
            return Err(AzCliError::InvalidArgumentValue(format!(
                "--docker-bridge-address is not supported by API version {}",
                self.caps.version
            )));
        }
        if addressing.any() && self.network_plugin_value().is_none() {
            return Err(AzCliError::RequiredArgumentMissing(
                "Please explicitly specify the network plugin type".to_string(),
            ));
        }
        Ok(addressing)
    }

    /// Network profile for a new cluster, `None` when nothing asks for one.
    pub fn build_network_profile(&self) -> crate::Result<Option<NetworkProfile>> {
        let lb_profile = create_load_balancer_profile(&self.get_load_balancer_args());
        let outbound_type = self.get_outbound_type(lb_profile.as_ref())?;
        let sku = self.get_load_balancer_sku()?;
        let plugin = self.get_network_plugin()?;
        let addressing = self.get_network_addressing()?;

        let mut profile = if plugin.is_some() || addressing.any() {
            Some(NetworkProfile {
                network_plugin: plugin,
                network_plugin_mode: self.get_network_plugin_mode(),
                pod_cidr: addressing.pod_cidr,
                service_cidr: addressing.service_cidr,
                dns_service_ip: addressing.dns_service_ip,
                docker_bridge_cidr: addressing.docker_bridge_address,
                network_policy: addressing.network_policy,
                load_balancer_sku: Some(sku.clone()),
                load_balancer_profile: lb_profile,
                outbound_type: Some(outbound_type),
                nat_gateway_profile: None,
            })
        } else if sku == LOAD_BALANCER_SKU_BASIC {
            Some(NetworkProfile {
                load_balancer_sku: Some(sku.clone()),
                ..NetworkProfile::default()
            })
        } else if sku == LOAD_BALANCER_SKU_STANDARD || lb_profile.is_some() {
            Some(NetworkProfile {
                network_plugin: Some("kubenet".to_string()),
                load_balancer_sku: Some(sku.clone()),
                load_balancer_profile: lb_profile,
                outbound_type: Some(outbound_type),
                ..NetworkProfile::default()
            })
        } else {
            None
        };

        if sku != LOAD_BALANCER_SKU_BASIC {
            if let Some(p) = profile.as_mut() {
                p.nat_gateway_profile = create_nat_gateway_profile(
                    self.get_nat_gateway_managed_outbound_ip_count(),
                    self.get_nat_gateway_idle_timeout(),
                );
            }
        }
        Ok(profile)
    }
}
