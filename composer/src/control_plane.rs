//! The EKS cluster resource and the attributes the rest of the composition reads from it.

use crate::deferred::Deferred;
use crate::error::Result;
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::iam::IamPlan;
use crate::network::NetworkPlan;
use crate::resolver::ResolvedConfig;
use eks_model::{ClusterNodePool, IpFamily, UpgradeSupportType};
use log::{debug, info};
use std::collections::BTreeMap;

/// Properties whose change replaces the cluster.
const IMMUTABLE_NETWORK_PATHS: [&str; 2] = [
    "kubernetesNetworkConfig.ipFamily",
    "kubernetesNetworkConfig.serviceIpv4Cidr",
];

/// The cluster node and the attributes it realizes.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPlane {
    pub node: String,
    pub name: Deferred,
    pub arn: Deferred,
    pub endpoint: Deferred,
    pub certificate_authority: Deferred,
    pub version: Deferred,
    /// The service account issuer URL, starting with `https://`.
    pub oidc_issuer_url: Deferred,
    /// The security group EKS creates for the cluster.
    pub cluster_security_group_id: Deferred,
    /// The service CIDR matching the cluster's IP family.
    pub service_cidr: Deferred,
}

impl ControlPlane {
    /// Attribute references of an existing cluster node.
    pub fn from_node<S: Into<String>>(node: S, ip_family: IpFamily) -> Self {
        let node = node.into();
        let service_cidr = match ip_family {
            IpFamily::Ipv6 => "kubernetesNetworkConfig.serviceIpv6Cidr",
            IpFamily::Ipv4 => "kubernetesNetworkConfig.serviceIpv4Cidr",
        };
        Self {
            name: Deferred::attr(&node, "name"),
            arn: Deferred::attr(&node, "arn"),
            endpoint: Deferred::attr(&node, "endpoint"),
            certificate_authority: Deferred::attr(&node, "certificateAuthority.data"),
            version: Deferred::attr(&node, "version"),
            oidc_issuer_url: Deferred::attr(&node, "identities.0.oidcs.0.issuer"),
            cluster_security_group_id: Deferred::attr(&node, "vpcConfig.clusterSecurityGroupId"),
            service_cidr: Deferred::attr(&node, service_cidr),
            node,
        }
    }
}

/// Declares the EKS cluster. `security_group_id` is the cluster security group of the
/// composition, absent when EKS manages the only one.
pub fn compose(
    graph: &mut Graph,
    resolved: &ResolvedConfig,
    network: &NetworkPlan,
    iam: &IamPlan,
    security_group_id: Option<&Deferred>,
    tags: &BTreeMap<String, String>,
) -> Result<ControlPlane> {
    let config = &resolved.config;
    let node_name = format!("{}-eksCluster", resolved.name);
    let auto_mode = config.auto_mode_enabled();

    let mut vpc_config = BTreeMap::new();
    vpc_config.insert(
        "subnetIds".to_string(),
        Deferred::from(network.subnet_ids.as_slice()),
    );
    vpc_config.insert(
        "endpointPrivateAccess".to_string(),
        Deferred::from(config.endpoint_private_access.unwrap_or(false)),
    );
    vpc_config.insert(
        "endpointPublicAccess".to_string(),
        Deferred::from(config.endpoint_public_access.unwrap_or(true)),
    );
    if let Some(cidrs) = &config.public_access_cidrs {
        vpc_config.insert("publicAccessCidrs".to_string(), Deferred::from(cidrs.as_slice()));
    }
    if let Some(id) = security_group_id {
        vpc_config.insert(
            "securityGroupIds".to_string(),
            Deferred::list(vec![id.clone()]),
        );
    }

    let mut network_config = BTreeMap::new();
    network_config.insert(
        "ipFamily".to_string(),
        Deferred::from(resolved.ip_family.to_string()),
    );
    if let Some(cidr) = &resolved.service_ipv4_cidr {
        network_config.insert("serviceIpv4Cidr".to_string(), Deferred::from(cidr));
    }
    if auto_mode {
        network_config.insert(
            "elasticLoadBalancing".to_string(),
            Deferred::object(vec![("enabled", Deferred::from(true))]),
        );
    }

    let mut cluster_tags = BTreeMap::new();
    cluster_tags.insert("Name".to_string(), node_name.clone());
    cluster_tags.extend(config.tags.clone().unwrap_or_default());
    cluster_tags.extend(config.cluster_tags.clone().unwrap_or_default());
    cluster_tags.extend(tags.clone());

    let support_type = config
        .upgrade_policy
        .as_ref()
        .and_then(|p| p.support_type)
        .unwrap_or(UpgradeSupportType::Extended);

    let mut node = ResourceNode::new(&node_name, ResourceType::Cluster)
        .property("name", &resolved.cluster_name)
        .optional_property("version", resolved.version.as_ref().map(|v| v.eks_version()))
        .property("roleArn", iam.service_role.arn.clone())
        .property("vpcConfig", vpc_config)
        .property("kubernetesNetworkConfig", network_config)
        .property(
            "accessConfig",
            Deferred::object(vec![
                ("authenticationMode", Deferred::from(resolved.auth_mode.to_string())),
                ("bootstrapClusterCreatorAdminPermissions", Deferred::from(!auto_mode)),
            ]),
        )
        .property(
            "upgradePolicy",
            Deferred::object(vec![("supportType", Deferred::from(support_type.to_string()))]),
        )
        .property("tags", cluster_tags)
        .optional_property(
            "enabledClusterLogTypes",
            config.enabled_cluster_log_types.clone(),
        )
        .depends_on_all(network.tag_nodes.iter().cloned())
        .replace_on_changes(IMMUTABLE_NETWORK_PATHS)
        .replace(resolved.replace_cluster);

    if let Some(key_arn) = &config.encryption_config_key_arn {
        node = node.property(
            "encryptionConfig",
            Deferred::object(vec![
                (
                    "provider",
                    Deferred::object(vec![("keyArn", Deferred::from(key_arn))]),
                ),
                ("resources", Deferred::from(vec!["secrets".to_string()])),
            ]),
        );
    }

    let bootstrap_addons = if auto_mode {
        Some(false)
    } else {
        config.bootstrap_self_managed_addons
    };
    node = node.optional_property("bootstrapSelfManagedAddons", bootstrap_addons);

    if let Some(auto) = config.auto_mode.as_ref().filter(|a| a.enabled) {
        let node_pools = auto
            .compute_config
            .as_ref()
            .and_then(|c| c.node_pools.clone())
            .unwrap_or_else(|| vec![ClusterNodePool::System, ClusterNodePool::GeneralPurpose]);
        let mut compute = vec![
            ("enabled", Deferred::from(true)),
            (
                "nodePools",
                Deferred::from(
                    node_pools
                        .iter()
                        .map(|p| p.to_string())
                        .collect::<Vec<_>>(),
                ),
            ),
        ];
        if let Some(role) = &iam.auto_mode_node_role {
            compute.push(("nodeRoleArn", role.arn.clone()));
        }
        node = node
            .property("computeConfig", Deferred::object(compute))
            .property(
                "storageConfig",
                Deferred::object(vec![(
                    "blockStorage",
                    Deferred::object(vec![("enabled", Deferred::from(true))]),
                )]),
            );
    }

    if let Some(role_node) = &iam.service_role.node {
        node = node.depends_on(role_node);
    }
    if resolved.replace_cluster {
        info!("'{}' will be replaced", node_name);
    }
    debug!("Declared the control plane '{}'", node_name);
    graph.add(node)?;
    Ok(ControlPlane::from_node(node_name, resolved.ip_family))
}

/// Declares the Kubernetes provider that reaches the cluster through its own kubeconfig.
pub fn compose_provider(graph: &mut Graph, name: &str, kubeconfig_json: Deferred) -> Result<String> {
    let node = format!("{}-eks-k8s", name);
    graph.add(
        ResourceNode::new(&node, ResourceType::KubernetesProvider)
            .property("kubeconfig", kubeconfig_json),
    )?;
    Ok(node)
}
