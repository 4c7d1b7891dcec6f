//! IAM roles and instance profiles of the cluster and its nodes, and the OIDC provider that lets
//! service accounts assume roles.

use crate::deferred::{Deferred, Func};
use crate::error::{self, Result};
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::resolver::ResolvedConfig;
use eks_model::constants::STS_AUDIENCE;
use eks_model::IamRoleRef;
use log::{debug, info};
use serde::Serialize;
use snafu::ResultExt;
use std::collections::BTreeMap;

const CLUSTER_POLICIES: [&str; 2] = ["AmazonEKSClusterPolicy", "AmazonEKSVPCResourceController"];
const AUTO_MODE_CLUSTER_POLICIES: [&str; 4] = [
    "AmazonEKSComputePolicy",
    "AmazonEKSBlockStoragePolicy",
    "AmazonEKSLoadBalancingPolicy",
    "AmazonEKSNetworkingPolicy",
];
const NODE_POLICIES: [&str; 3] = [
    "AmazonEKSWorkerNodePolicy",
    "AmazonEKS_CNI_Policy",
    "AmazonEC2ContainerRegistryReadOnly",
];
const AUTO_MODE_NODE_POLICIES: [&str; 2] = [
    "AmazonEKSWorkerNodeMinimalPolicy",
    "AmazonEC2ContainerRegistryPullOnly",
];
pub(crate) const FARGATE_POLICIES: [&str; 1] = ["AmazonEKSFargatePodExecutionRolePolicy"];

/// The AWS partition of a region.
pub fn partition(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else {
        "aws"
    }
}

pub fn managed_policy_arn(partition: &str, policy: &str) -> String {
    format!("arn:{}:iam::aws:policy/{}", partition, policy)
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyDocument<'a> {
    version: &'a str,
    statement: Vec<Statement<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Statement<'a> {
    effect: &'a str,
    principal: Principal<'a>,
    action: Vec<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Principal<'a> {
    service: &'a str,
}

/// The trust policy that lets an AWS service assume a role.
pub fn assume_role_policy(service: &str, actions: &[&str]) -> Result<String> {
    let document = PolicyDocument {
        version: "2012-10-17",
        statement: vec![Statement {
            effect: "Allow",
            principal: Principal { service },
            action: actions.to_vec(),
        }],
    };
    serde_json::to_string(&document).context(error::JsonSerializeSnafu {
        what: "assume role policy",
    })
}

/// A role, created by the composition or adopted from the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleRef {
    /// The role's node when the composition creates it.
    pub node: Option<String>,
    pub arn: Deferred,
    pub name: Deferred,
}

impl RoleRef {
    pub fn adopted(role: &IamRoleRef) -> Self {
        Self {
            node: None,
            arn: Deferred::from(&role.arn),
            name: Deferred::from(role.name()),
        }
    }

    pub fn adopted_arn(arn: &str) -> Self {
        Self::adopted(&IamRoleRef::new(arn))
    }

    fn created(node: &str) -> Self {
        Self {
            node: Some(node.to_string()),
            arn: Deferred::attr(node, "arn"),
            name: Deferred::attr(node, "name"),
        }
    }
}

/// Declares a role trusted by `service` with AWS managed policies attached.
#[allow(clippy::too_many_arguments)]
pub(crate) fn create_role(
    graph: &mut Graph,
    node_name: &str,
    service: &str,
    actions: &[&str],
    policies: &[&str],
    partition: &str,
    description: &str,
    tags: &BTreeMap<String, String>,
) -> Result<RoleRef> {
    graph.add(
        ResourceNode::new(node_name, ResourceType::Role)
            .property("assumeRolePolicy", assume_role_policy(service, actions)?)
            .property("description", description)
            .property("tags", tags),
    )?;
    for policy in policies {
        graph.add(
            ResourceNode::new(format!("{}-{}", node_name, policy), ResourceType::RolePolicyAttachment)
                .property("role", Deferred::attr(node_name, "name"))
                .property("policyArn", managed_policy_arn(partition, policy)),
        )?;
    }
    debug!(
        "Declared role '{}' for '{}' with {} managed policies",
        node_name,
        service,
        policies.len()
    );
    Ok(RoleRef::created(node_name))
}

/// The roles and instance profiles of a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct IamPlan {
    pub service_role: RoleRef,
    /// Node roles, mapped into the cluster's authentication.
    pub instance_roles: Vec<RoleRef>,
    /// Instance profile nodes, one per created or adopted instance role.
    pub instance_profiles: Vec<String>,
    /// The instance profile self-managed node groups use unless they name their own.
    pub default_instance_profile_name: Option<Deferred>,
    pub auto_mode_node_role: Option<RoleRef>,
}

/// Declares the service role, the node roles with their instance profiles and, in auto mode, the
/// role of auto mode nodes.
pub fn compose(
    graph: &mut Graph,
    resolved: &ResolvedConfig,
    partition: &str,
    tags: &BTreeMap<String, String>,
) -> Result<IamPlan> {
    let config = &resolved.config;
    let name = &resolved.name;
    let auto_mode = config.auto_mode_enabled();

    let service_role = match &config.service_role {
        Some(role) => RoleRef::adopted(role),
        None => {
            let mut policies = CLUSTER_POLICIES.to_vec();
            let mut actions = vec!["sts:AssumeRole"];
            if auto_mode {
                policies.extend(AUTO_MODE_CLUSTER_POLICIES);
                actions.push("sts:TagSession");
            }
            create_role(
                graph,
                &format!("{}-eksRole", name),
                "eks.amazonaws.com",
                &actions,
                &policies,
                partition,
                "Allows EKS to manage clusters on your behalf.",
                tags,
            )?
        }
    };

    let instance_roles: Vec<RoleRef> = if let Some(roles) = &config.instance_roles {
        roles.iter().map(RoleRef::adopted).collect()
    } else if let Some(role) = &config.instance_role {
        vec![RoleRef::adopted(role)]
    } else if resolved.create_instance_role {
        vec![create_role(
            graph,
            &format!("{}-instanceRole", name),
            "ec2.amazonaws.com",
            &["sts:AssumeRole"],
            &NODE_POLICIES,
            partition,
            "Allows EC2 worker nodes to join the cluster.",
            tags,
        )?]
    } else {
        Vec::new()
    };

    let given_profile = config
        .instance_profile_name
        .clone()
        .or_else(|| resolved.default_node_group.instance_profile_name.clone());
    let mut instance_profiles = Vec::new();
    let mut default_instance_profile_name = given_profile.as_ref().map(Deferred::from);
    let multiple = config.instance_roles.is_some();
    if given_profile.is_none() || multiple {
        for role in &instance_roles {
            let profile_name = match (&config.instance_roles, role.name.as_str()) {
                (Some(_), Some(role_name)) => format!("{}-instanceProfile-{}", name, role_name),
                _ => format!("{}-instanceProfile", name),
            };
            graph.add(
                ResourceNode::new(&profile_name, ResourceType::InstanceProfile)
                    .property("role", role.name.clone())
                    .property("tags", tags),
            )?;
            if default_instance_profile_name.is_none() {
                default_instance_profile_name = Some(Deferred::attr(&profile_name, "name"));
            }
            instance_profiles.push(profile_name);
        }
    }

    let auto_mode_node_role = match config.auto_mode.as_ref().filter(|a| a.enabled) {
        Some(auto) => {
            let given_arn = auto
                .compute_config
                .as_ref()
                .and_then(|c| c.node_role_arn.clone());
            match (auto.create_node_role.unwrap_or(given_arn.is_none()), given_arn) {
                (true, _) => Some(create_role(
                    graph,
                    &format!("{}-autoModeNodeRole", name),
                    "ec2.amazonaws.com",
                    &["sts:AssumeRole"],
                    &AUTO_MODE_NODE_POLICIES,
                    partition,
                    "Allows EKS auto mode nodes to join the cluster.",
                    tags,
                )?),
                (false, Some(arn)) => Some(RoleRef::adopted_arn(&arn)),
                (false, None) => None,
            }
        }
        None => None,
    };

    info!(
        "Composed IAM for '{}': {} instance roles, {} instance profiles",
        name,
        instance_roles.len(),
        instance_profiles.len()
    );
    Ok(IamPlan {
        service_role,
        instance_roles,
        instance_profiles,
        default_instance_profile_name,
        auto_mode_node_role,
    })
}

/// The OpenID Connect provider of a cluster and the values derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct OidcProvider {
    pub node: String,
    pub arn: Deferred,
    /// The issuer URL, starting with `https://`.
    pub url: Deferred,
    /// The issuer without its scheme, as IAM condition keys spell it.
    pub issuer: Deferred,
}

/// Strips the scheme from an OIDC issuer URL.
pub fn issuer_of(url: Deferred) -> Deferred {
    Deferred::apply(
        Func::StripPrefix {
            prefix: "https://".to_string(),
        },
        vec![url],
    )
}

/// Declares the OIDC provider of the cluster's service account issuer.
pub fn compose_oidc_provider(
    graph: &mut Graph,
    name: &str,
    issuer_url: Deferred,
    tags: &BTreeMap<String, String>,
) -> Result<OidcProvider> {
    let node = format!("{}-oidcProvider", name);
    graph.add(
        ResourceNode::new(&node, ResourceType::OpenIdConnectProvider)
            .property("clientIdLists", vec![STS_AUDIENCE.to_string()])
            .property("url", issuer_url.clone())
            .property(
                "thumbprintLists",
                Deferred::list(vec![Deferred::apply(
                    Func::IssuerThumbprint,
                    vec![issuer_url.clone()],
                )]),
            )
            .property("tags", tags),
    )?;
    Ok(OidcProvider {
        arn: Deferred::attr(&node, "arn"),
        issuer: issuer_of(issuer_url.clone()),
        url: issuer_url,
        node,
    })
}
