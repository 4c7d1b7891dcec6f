//! The cluster composite: turns a [`ClusterConfig`] into the desired-state graph of a working EKS
//! cluster and the [`CoreData`] that node groups attach to.

use crate::addon::{self, ClusterAddonContext};
use crate::auth::{self, ResolvedAccessEntry};
use crate::cni::{self, VpcCniContext};
use crate::control_plane::{self, ControlPlane};
use crate::core_data::CoreData;
use crate::deferred::Deferred;
use crate::error::{Error, Problems, Result};
use crate::fargate::{self, FargateContext};
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::iam;
use crate::kubeconfig::{self, KubeconfigSpec};
use crate::lookup::CloudLookup;
use crate::network;
use crate::nodegroup::NodeGroup;
use crate::resolver::{self, ResolvedConfig};
use crate::security_group::{
    self, NodeGroupSecurityGroup, NodeGroupSecurityGroupArgs, SecurityGroups,
};
use crate::storage;
use eks_model::{
    AccessEntryType, AccessPolicyAssociation, AccessScope, AccessScopeType, ClusterConfig,
    KubeconfigOptions, VpcCniOptions,
};
use log::{debug, info, trace};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const AUTO_NODE_POLICY: &str = "AmazonEKSAutoNodePolicy";

/// A composed cluster: the graph to reconcile and the handles other components build on.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub graph: Graph,
    pub core: CoreData,
    /// The AWS provider every AWS resource of the cluster is created through.
    pub aws_provider: String,
    pub default_node_group: Option<NodeGroup>,
    pub storage_classes: Vec<String>,
    pub coredns: Option<String>,
    pub kube_proxy: Option<String>,
}

/// The values a composed cluster exports, named as consumers of the composite know them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOutputs {
    pub kubeconfig: Deferred,
    pub kubeconfig_json: Deferred,
    pub eks_cluster: String,
    pub aws_provider: String,
    pub cluster_security_group: Option<String>,
    pub node_security_group: Option<String>,
    pub eks_cluster_ingress_rule: Option<String>,
    pub instance_roles: Vec<Deferred>,
    pub default_node_group: Option<String>,
    pub cluster_security_group_id: Deferred,
    pub node_security_group_id: Deferred,
    pub cluster_ingress_rule_id: Deferred,
    pub default_node_group_asg_name: Option<Deferred>,
    pub fargate_profile_id: Option<Deferred>,
    pub fargate_profile_status: Option<Deferred>,
    pub oidc_provider_arn: Option<Deferred>,
    pub oidc_provider_url: Option<Deferred>,
    pub oidc_issuer: Deferred,
    pub auto_mode_node_role_name: Option<Deferred>,
}

impl Cluster {
    /// Composes the cluster `name`. `previous` is the configuration of the last composition of
    /// the same cluster, used to reject and to flag changes that cannot be applied in place.
    pub async fn compose(
        name: &str,
        config: &ClusterConfig,
        previous: Option<&ClusterConfig>,
        lookup: &dyn CloudLookup,
    ) -> Result<Self> {
        let resolved = resolver::resolve(name, config, previous)?;
        info!("Composing cluster '{}' in mode {}", name, resolved.mode);
        let tags = config.tags.clone().unwrap_or_default();
        let mut graph = Graph::new();

        let region = match &config.region {
            Some(region) => region.clone(),
            None => lookup
                .region()
                .await
                .map_err(|e| Error::upstream("region", e))?,
        };
        let partition = iam::partition(&region);
        let aws_provider = format!("{}-provider", name);
        graph.add(
            ResourceNode::new(&aws_provider, ResourceType::AwsProvider).property("region", &region),
        )?;

        let network = network::plan(&resolved, lookup, &mut graph).await?;
        let iam = iam::compose(&mut graph, &resolved, partition, &tags)?;

        let cluster_security_group = if resolved.skip_default_security_groups {
            None
        } else {
            let mut group_tags = tags.clone();
            group_tags.extend(config.cluster_security_group_tags.clone().unwrap_or_default());
            Some(security_group::compose_cluster_security_group(
                &mut graph,
                name,
                &network.vpc_id,
                config.cluster_security_group.as_deref(),
                &group_tags,
            )?)
        };

        let cluster = control_plane::compose(
            &mut graph,
            &resolved,
            &network,
            &iam,
            cluster_security_group.as_ref().map(|(_, id)| id),
            &tags,
        )?;

        let security_groups = match cluster_security_group {
            Some((group, group_id)) => {
                let mut node_tags = tags.clone();
                node_tags.extend(config.node_security_group_tags.clone().unwrap_or_default());
                let nodes = NodeGroupSecurityGroup::compose(
                    &mut graph,
                    name,
                    &NodeGroupSecurityGroupArgs {
                        vpc_id: Deferred::from(&network.vpc_id),
                        cluster_security_group_id: group_id.clone(),
                        cluster_name: resolved.cluster_name.clone(),
                        tags: node_tags,
                    },
                )?;
                SecurityGroups {
                    cluster_security_group: group,
                    cluster_security_group_id: group_id,
                    node_security_group: Some(nodes.security_group),
                    node_security_group_id: nodes.security_group_id,
                    cluster_ingress_rule: Some(nodes.cluster_ingress_rule),
                    cluster_ingress_rule_id: nodes.cluster_ingress_rule_id,
                }
            }
            None => {
                debug!("Using the EKS managed security group of '{}'", cluster.node);
                SecurityGroups::eks_managed(&cluster.node)
            }
        };

        let kubeconfig_spec = KubeconfigSpec::new(&resolved.cluster_name, &region)
            .with_options(config.provider_credential_opts.as_ref());
        let kubeconfig =
            kubeconfig_spec.deferred(cluster.endpoint.clone(), cluster.certificate_authority.clone());
        let provider =
            control_plane::compose_provider(&mut graph, name, kubeconfig::to_json(kubeconfig.clone()))?;

        let oidc_provider = if resolved.create_oidc_provider {
            Some(iam::compose_oidc_provider(
                &mut graph,
                name,
                cluster.oidc_issuer_url.clone(),
                &tags,
            )?)
        } else {
            None
        };

        let fargate_profile = fargate::compose(
            &mut graph,
            &FargateContext {
                name,
                cluster_node: &cluster.node,
                cluster_name: cluster.name.clone(),
                private_subnet_ids: &network.private_subnet_ids,
                subnet_ids: &network.subnet_ids,
                partition,
                tags: &tags,
            },
            config.fargate.as_ref(),
        )?;

        let aws_auth = if resolved.auth_mode.uses_config_map() {
            let mut depends_on = BTreeSet::new();
            depends_on.insert(cluster.node.clone());
            let mut role_mappings = Vec::new();
            for role in &iam.instance_roles {
                depends_on.extend(role.node.clone());
                role_mappings.push(auth::instance_role_mapping(role.arn.clone()));
            }
            if let Some(profile) = &fargate_profile {
                depends_on.extend(profile.pod_execution_role.node.clone());
                role_mappings.push(auth::fargate_role_mapping(
                    profile.pod_execution_role.arn.clone(),
                ));
            }
            for mapping in config.role_mappings.iter().flatten() {
                role_mappings.push(Deferred::from_serialize("roleMappings", mapping)?);
            }
            let user_mappings = match &config.user_mappings {
                Some(mappings) => Some(
                    mappings
                        .iter()
                        .map(|m| Deferred::from_serialize("userMappings", m))
                        .collect::<Result<Vec<_>>>()?,
                ),
                None => None,
            };
            Some(auth::compose_aws_auth(
                &mut graph,
                name,
                &provider,
                role_mappings,
                user_mappings,
                depends_on,
            )?)
        } else {
            debug!(
                "Authentication mode {} has no aws-auth config map",
                resolved.auth_mode
            );
            None
        };

        let access_entries = if resolved.auth_mode.supports_access_entries() {
            let entries = access_entries(
                config,
                &iam.instance_roles,
                fargate_profile.as_ref().map(|p| &p.pod_execution_role),
                iam.auto_mode_node_role.as_ref(),
                partition,
            )?;
            auth::compose_access_entries(&mut graph, name, &cluster.name, &entries, &tags)?
        } else {
            Vec::new()
        };

        let vpc_cni = if config.auto_mode_enabled() || resolved.use_default_vpc_cni {
            None
        } else {
            let default_options = VpcCniOptions::default();
            Some(
                cni::compose(
                    &mut graph,
                    &VpcCniContext {
                        name,
                        cluster_node: &cluster.node,
                        cluster_name: cluster.name.clone(),
                        cluster_version: cluster.version.clone(),
                        version: resolved.version.as_ref(),
                        provider: &provider,
                        tags: &tags,
                    },
                    config.vpc_cni_options.as_ref().unwrap_or(&default_options),
                    lookup,
                )
                .await?,
            )
        };

        let core = core_data(CoreParts {
            resolved: &resolved,
            cluster,
            region,
            partition,
            network,
            security_groups,
            iam,
            aws_auth,
            vpc_cni,
            provider,
            kubeconfig,
            oidc_provider,
            fargate_profile,
            access_entries,
            tags,
        });

        let default_node_group = if resolved.skip_default_node_group {
            None
        } else {
            Some(NodeGroup::compose_default(&mut graph, &core, lookup).await?)
        };

        let mut compute: Vec<String> = default_node_group
            .iter()
            .map(|group| group.cfn_stack.clone())
            .collect();
        compute.extend(core.fargate_profile.iter().map(|p| p.node.clone()));
        let addon_context = ClusterAddonContext {
            name,
            cluster_node: &core.cluster.node,
            cluster_name: core.cluster.name.clone(),
            cluster_version: core.cluster.version.clone(),
            version: core.version.as_ref(),
            auto_mode: config.auto_mode_enabled(),
            compute,
            tags: &core.tags,
        };
        let coredns = addon::compose_coredns(
            &mut graph,
            &addon_context,
            config.coredns_addon_options.as_ref(),
            lookup,
        )
        .await?;
        let kube_proxy = addon::compose_kube_proxy(
            &mut graph,
            &addon_context,
            config.kube_proxy_addon_options.as_ref(),
            lookup,
        )
        .await?;

        let storage_classes = match &config.storage_classes {
            Some(classes) => storage::compose(
                &mut graph,
                name,
                classes,
                &core.provider,
                std::slice::from_ref(&core.cluster.node),
            )?,
            None => Vec::new(),
        };

        scope_to_provider(&mut graph, &aws_provider);
        info!(
            "Composed cluster '{}' as {} resources",
            name,
            graph.len()
        );

        Ok(Self {
            graph,
            core,
            aws_provider,
            default_node_group,
            storage_classes,
            coredns,
            kube_proxy,
        })
    }

    /// A kubeconfig for the cluster that authenticates with the given role and profile instead of
    /// the cluster's own credential options.
    pub fn get_kubeconfig(&self, role_arn: Option<&str>, profile_name: Option<&str>) -> Deferred {
        let options = KubeconfigOptions {
            role_arn: role_arn.map(str::to_string),
            profile_name: profile_name.map(str::to_string),
        };
        KubeconfigSpec::new(&self.core.cluster_name, &self.core.region)
            .with_options(Some(&options))
            .deferred(
                self.core.cluster.endpoint.clone(),
                self.core.cluster.certificate_authority.clone(),
            )
    }

    pub fn outputs(&self) -> ClusterOutputs {
        let core = &self.core;
        let groups = &core.security_groups;
        ClusterOutputs {
            kubeconfig: core.kubeconfig.clone(),
            kubeconfig_json: kubeconfig::to_json(core.kubeconfig.clone()),
            eks_cluster: core.cluster.node.clone(),
            aws_provider: self.aws_provider.clone(),
            cluster_security_group: groups.cluster_security_group.clone(),
            node_security_group: groups.node_security_group.clone(),
            eks_cluster_ingress_rule: groups.cluster_ingress_rule.clone(),
            instance_roles: core.instance_roles.iter().map(|r| r.arn.clone()).collect(),
            default_node_group: self.default_node_group.as_ref().map(|g| g.cfn_stack.clone()),
            cluster_security_group_id: groups.cluster_security_group_id.clone(),
            node_security_group_id: groups.node_security_group_id.clone(),
            cluster_ingress_rule_id: groups.cluster_ingress_rule_id.clone(),
            default_node_group_asg_name: self
                .default_node_group
                .as_ref()
                .map(|g| g.auto_scaling_group_name.clone()),
            fargate_profile_id: core.fargate_profile.as_ref().map(|p| p.id.clone()),
            fargate_profile_status: core.fargate_profile.as_ref().map(|p| p.status.clone()),
            oidc_provider_arn: core.oidc_provider.as_ref().map(|p| p.arn.clone()),
            oidc_provider_url: core.oidc_provider.as_ref().map(|p| p.url.clone()),
            oidc_issuer: iam::issuer_of(core.cluster.oidc_issuer_url.clone()),
            auto_mode_node_role_name: core.auto_mode_node_role.as_ref().map(|r| r.name.clone()),
        }
    }
}

crate::impl_display_as_json!(ClusterOutputs);

/// The caller's access entries plus one per role whose nodes or pods join the cluster.
fn access_entries(
    config: &ClusterConfig,
    instance_roles: &[iam::RoleRef],
    pod_execution_role: Option<&iam::RoleRef>,
    auto_mode_node_role: Option<&iam::RoleRef>,
    partition: &str,
) -> Result<BTreeMap<String, ResolvedAccessEntry>> {
    let mut entries = BTreeMap::new();
    for (index, role) in instance_roles.iter().enumerate() {
        entries.insert(
            format!("instanceRoleAccess{}", index),
            ResolvedAccessEntry::new(role.arn.clone(), AccessEntryType::Ec2Linux),
        );
    }
    if let Some(role) = pod_execution_role {
        entries.insert(
            "podExecutionRoleAccess".to_string(),
            ResolvedAccessEntry::new(role.arn.clone(), AccessEntryType::FargateLinux),
        );
    }
    if let Some(role) = auto_mode_node_role {
        let mut entry = ResolvedAccessEntry::new(role.arn.clone(), AccessEntryType::Ec2);
        entry.access_policies.insert(
            "autoNode".to_string(),
            AccessPolicyAssociation {
                policy_arn: format!(
                    "arn:{}:eks::aws:cluster-access-policy/{}",
                    partition, AUTO_NODE_POLICY
                ),
                access_scope: AccessScope {
                    scope_type: AccessScopeType::Cluster,
                    namespaces: None,
                },
            },
        );
        entries.insert("autoModeNodeRoleAccess".to_string(), entry);
    }

    let mut problems = Problems::new();
    for (key, entry) in config.access_entries.iter().flatten() {
        if entries.contains_key(key) {
            problems.push(
                format!("accessEntries.{}", key),
                format!(
                    "the access entry name '{}' is reserved for the cluster's own roles",
                    key
                ),
            );
            continue;
        }
        entries.insert(key.clone(), ResolvedAccessEntry::from(entry));
    }
    problems.into_result()?;
    Ok(entries)
}

struct CoreParts<'a> {
    resolved: &'a ResolvedConfig,
    cluster: ControlPlane,
    region: String,
    partition: &'a str,
    network: network::NetworkPlan,
    security_groups: SecurityGroups,
    iam: iam::IamPlan,
    aws_auth: Option<String>,
    vpc_cni: Option<String>,
    provider: String,
    kubeconfig: Deferred,
    oidc_provider: Option<iam::OidcProvider>,
    fargate_profile: Option<fargate::FargateProfile>,
    access_entries: Vec<String>,
    tags: BTreeMap<String, String>,
}

fn core_data(parts: CoreParts<'_>) -> CoreData {
    let resolved = parts.resolved;
    CoreData {
        name: resolved.name.clone(),
        cluster: parts.cluster,
        cluster_name: resolved.cluster_name.clone(),
        version: resolved.version.clone(),
        region: parts.region,
        partition: parts.partition.to_string(),
        auth_mode: resolved.auth_mode,
        ip_family: resolved.ip_family,
        vpc_id: parts.network.vpc_id,
        subnet_ids: parts.network.subnet_ids,
        public_subnet_ids: parts.network.public_subnet_ids,
        private_subnet_ids: parts.network.private_subnet_ids,
        node_subnet_ids: parts.network.node_subnet_ids,
        security_groups: parts.security_groups,
        node_security_group_tags: resolved
            .config
            .node_security_group_tags
            .clone()
            .unwrap_or_default(),
        instance_roles: parts.iam.instance_roles,
        instance_profiles: parts.iam.instance_profiles,
        default_instance_profile_name: parts.iam.default_instance_profile_name,
        auto_mode_node_role: parts.iam.auto_mode_node_role,
        aws_auth: parts.aws_auth,
        vpc_cni: parts.vpc_cni,
        provider: parts.provider,
        kubeconfig: parts.kubeconfig,
        oidc_provider: parts.oidc_provider,
        fargate_profile: parts.fargate_profile,
        access_entries: parts.access_entries,
        tags: parts.tags,
        node_group_options: resolved.default_node_group.clone(),
    }
}

/// Applies every AWS resource of the graph through `provider`.
fn scope_to_provider(graph: &mut Graph, provider: &str) {
    let names: Vec<String> = graph
        .nodes()
        .filter(|node| {
            node.provider.is_none()
                && !node.resource_type.is_kubernetes()
                && node.resource_type != ResourceType::AwsProvider
        })
        .map(|node| node.name.clone())
        .collect();
    for name in names {
        if let Some(node) = graph.get_mut(&name) {
            trace!("'{}' is created through '{}'", name, provider);
            node.provider = Some(provider.to_string());
        }
    }
}
