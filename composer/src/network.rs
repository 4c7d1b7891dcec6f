//! Picks the VPC and subnets of the cluster, tags them for EKS discovery and chooses where
//! worker nodes run.

use crate::error::{self, Error, Result};
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::lookup::{CloudLookup, SubnetInfo};
use crate::resolver::ResolvedConfig;
use log::{debug, info, trace};
use snafu::ensure;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// The subnets a cluster uses, split by reachability from the internet.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct NetworkPlan {
    pub vpc_id: String,
    /// Every subnet of the control plane, in input order.
    pub subnet_ids: Vec<String>,
    pub public_subnet_ids: Vec<String>,
    pub private_subnet_ids: Vec<String>,
    /// Where the default node group runs.
    pub node_subnet_ids: Vec<String>,
    pub availability_zones: BTreeSet<String>,
    /// The tag nodes declared for the subnets.
    pub tag_nodes: Vec<String>,
}

/// Whether a route sends traffic for public destinations through a gateway. Any gateway counts,
/// not only internet gateways.
fn is_internet_route(route: &crate::lookup::RouteInfo) -> bool {
    if route.gateway_id.as_deref().map(str::is_empty).unwrap_or(true) {
        return false;
    }
    match (
        route.destination_cidr_block.as_deref(),
        &route.destination_ipv6_cidr_block,
    ) {
        (Some(cidr), _) => !is_private_cidr(cidr),
        (None, Some(_)) => true,
        (None, None) => false,
    }
}

/// RFC 1918 destinations never make a subnet public.
fn is_private_cidr(cidr: &str) -> bool {
    let address = cidr.split('/').next().unwrap_or(cidr);
    match address.parse::<Ipv4Addr>() {
        Ok(address) => address.is_private(),
        Err(_) => false,
    }
}

/// A subnet is public when its route table sends traffic for a non-RFC 1918 destination to a
/// gateway.
pub fn is_public(subnet: &SubnetInfo) -> bool {
    subnet.routes.iter().any(is_internet_route)
}

/// Resolves the VPC and subnets and declares the discovery tags.
pub async fn plan(
    resolved: &ResolvedConfig,
    lookup: &dyn CloudLookup,
    graph: &mut Graph,
) -> Result<NetworkPlan> {
    let config = &resolved.config;
    let user_partitioned =
        config.public_subnet_ids.is_some() || config.private_subnet_ids.is_some();

    let vpc_id = match &config.vpc_id {
        Some(vpc_id) => vpc_id.clone(),
        None => {
            info!("No VPC was given, using the default VPC");
            lookup
                .default_vpc()
                .await
                .map_err(|e| Error::upstream("vpcId", e))?
        }
    };

    let subnets = if let Some(subnet_ids) = &config.subnet_ids {
        describe(lookup, subnet_ids, "subnetIds").await?
    } else if user_partitioned {
        let mut ids = config.public_subnet_ids.clone().unwrap_or_default();
        ids.extend(config.private_subnet_ids.clone().unwrap_or_default());
        describe(lookup, &ids, "subnetIds").await?
    } else {
        debug!("Looking up the subnets of '{}'", vpc_id);
        lookup
            .vpc_subnets(&vpc_id)
            .await
            .map_err(|e| Error::upstream("subnetIds", e))?
    };

    let vpc_ids: BTreeSet<String> = subnets
        .iter()
        .map(|s| s.vpc_id.clone())
        .chain(std::iter::once(vpc_id.clone()))
        .collect();
    ensure!(
        vpc_ids.len() == 1,
        error::SubnetsInDifferentVpcSnafu {
            vpc_ids: vpc_ids.into_iter().collect::<Vec<_>>()
        }
    );

    let availability_zones: BTreeSet<String> = subnets
        .iter()
        .map(|s| s.availability_zone.clone())
        .collect();
    ensure!(
        availability_zones.len() >= 2,
        error::InsufficientAvailabilityZonesSnafu {
            zones: availability_zones.into_iter().collect::<Vec<_>>()
        }
    );

    let (public_subnet_ids, private_subnet_ids) = if user_partitioned {
        (
            config.public_subnet_ids.clone().unwrap_or_default(),
            config.private_subnet_ids.clone().unwrap_or_default(),
        )
    } else {
        let (public, private): (Vec<&SubnetInfo>, Vec<&SubnetInfo>) =
            subnets.iter().partition(|s| is_public(s));
        (
            public.into_iter().map(|s| s.subnet_id.clone()).collect(),
            private.into_iter().map(|s| s.subnet_id.clone()).collect(),
        )
    };

    let node_subnet_ids = match &resolved.default_node_group.node_subnet_ids {
        Some(ids) => ids.clone(),
        None if user_partitioned && config.private_subnet_ids.is_some() => {
            private_subnet_ids.clone()
        }
        None if user_partitioned => public_subnet_ids.clone(),
        None if !private_subnet_ids.is_empty() => private_subnet_ids.clone(),
        None => subnets.iter().map(|s| s.subnet_id.clone()).collect(),
    };

    let mut tag_nodes = Vec::new();
    for subnet in &subnets {
        let public = public_subnet_ids.contains(&subnet.subnet_id);
        let role_key = if public {
            "kubernetes.io/role/elb"
        } else {
            "kubernetes.io/role/internal-elb"
        };
        tag_nodes.push(tag(
            graph,
            &resolved.name,
            &subnet.subnet_id,
            "clusterTag",
            format!("kubernetes.io/cluster/{}", resolved.cluster_name),
            "shared",
        )?);
        tag_nodes.push(tag(
            graph,
            &resolved.name,
            &subnet.subnet_id,
            "roleTag",
            role_key.to_string(),
            "1",
        )?);
    }

    let plan = NetworkPlan {
        vpc_id,
        subnet_ids: subnets.iter().map(|s| s.subnet_id.clone()).collect(),
        public_subnet_ids,
        private_subnet_ids,
        node_subnet_ids,
        availability_zones,
        tag_nodes,
    };
    info!(
        "Using {} subnets of '{}' across {} availability zones, {} of them for nodes",
        plan.subnet_ids.len(),
        plan.vpc_id,
        plan.availability_zones.len(),
        plan.node_subnet_ids.len()
    );
    Ok(plan)
}

async fn describe(
    lookup: &dyn CloudLookup,
    subnet_ids: &[String],
    path: &str,
) -> Result<Vec<SubnetInfo>> {
    lookup
        .describe_subnets(subnet_ids)
        .await
        .map_err(|e| Error::upstream(path, e))
}

/// Tags are separate resources so that subnets owned by someone else are only ever added to.
fn tag(
    graph: &mut Graph,
    name: &str,
    subnet_id: &str,
    suffix: &str,
    key: String,
    value: &str,
) -> Result<String> {
    let node_name = format!("{}-{}-{}", name, subnet_id, suffix);
    trace!("Tagging '{}' with '{}={}'", subnet_id, key, value);
    graph.add(
        ResourceNode::new(&node_name, ResourceType::Tag)
            .property("resourceId", subnet_id)
            .property("key", key)
            .property("value", value),
    )?;
    Ok(node_name)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lookup::RouteInfo;

    fn route(destination: &str, gateway: &str) -> RouteInfo {
        RouteInfo {
            destination_cidr_block: Some(destination.to_string()),
            destination_ipv6_cidr_block: None,
            gateway_id: Some(gateway.to_string()),
        }
    }

    #[test]
    fn default_route_to_igw_is_public() {
        let subnet = SubnetInfo {
            routes: vec![route("10.0.0.0/16", "local"), route("0.0.0.0/0", "igw-123")],
            ..SubnetInfo::default()
        };
        assert!(is_public(&subnet));
    }

    #[test]
    fn nat_and_private_destinations_are_private() {
        let nat = SubnetInfo {
            routes: vec![
                route("10.0.0.0/16", "local"),
                RouteInfo {
                    destination_cidr_block: Some("0.0.0.0/0".to_string()),
                    destination_ipv6_cidr_block: None,
                    gateway_id: None,
                },
            ],
            ..SubnetInfo::default()
        };
        assert!(!is_public(&nat));

        let peered = SubnetInfo {
            routes: vec![route("192.168.0.0/16", "igw-123")],
            ..SubnetInfo::default()
        };
        assert!(!is_public(&peered));
    }

    #[test]
    fn default_route_to_a_virtual_private_gateway_is_public() {
        let subnet = SubnetInfo {
            routes: vec![route("172.31.0.0/16", "local"), route("0.0.0.0/0", "vgw-0a1b")],
            ..SubnetInfo::default()
        };
        assert!(is_public(&subnet));
    }

    #[test]
    fn any_gateway_to_a_public_range_is_public() {
        let subnet = SubnetInfo {
            routes: vec![route("10.0.0.0/16", "local"), route("52.94.0.0/22", "vgw-0a1b")],
            ..SubnetInfo::default()
        };
        assert!(is_public(&subnet));
    }

    #[test]
    fn ipv6_igw_route_is_public() {
        let subnet = SubnetInfo {
            routes: vec![RouteInfo {
                destination_cidr_block: None,
                destination_ipv6_cidr_block: Some("::/0".to_string()),
                gateway_id: Some("igw-abc".to_string()),
            }],
            ..SubnetInfo::default()
        };
        assert!(is_public(&subnet));
    }
}
