//! The parts of a composed cluster that node groups and other attachments build on.

use crate::control_plane::ControlPlane;
use crate::deferred::Deferred;
use crate::fargate::FargateProfile;
use crate::iam::{OidcProvider, RoleRef};
use crate::security_group::SecurityGroups;
use eks_model::{AuthenticationMode, IpFamily, K8sVersion, NodeGroupBaseOptions};
use std::collections::BTreeMap;

/// Everything about a cluster that is decided once it has been composed.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreData {
    pub name: String,
    pub cluster: ControlPlane,
    /// The physical name of the EKS cluster.
    pub cluster_name: String,
    pub version: Option<K8sVersion>,
    pub region: String,
    pub partition: String,
    pub auth_mode: AuthenticationMode,
    pub ip_family: IpFamily,
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
    pub public_subnet_ids: Vec<String>,
    pub private_subnet_ids: Vec<String>,
    /// The subnets self-managed workers join unless a node group names its own.
    pub node_subnet_ids: Vec<String>,
    pub security_groups: SecurityGroups,
    pub node_security_group_tags: BTreeMap<String, String>,
    pub instance_roles: Vec<RoleRef>,
    pub instance_profiles: Vec<String>,
    pub default_instance_profile_name: Option<Deferred>,
    pub auto_mode_node_role: Option<RoleRef>,
    /// The `aws-auth` config map node, in the modes that use it.
    pub aws_auth: Option<String>,
    pub vpc_cni: Option<String>,
    /// The Kubernetes provider scoped to this cluster.
    pub provider: String,
    pub kubeconfig: Deferred,
    pub oidc_provider: Option<OidcProvider>,
    pub fargate_profile: Option<FargateProfile>,
    pub access_entries: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub node_group_options: NodeGroupBaseOptions,
}

impl CoreData {
    /// Nodes every worker has to wait for before it can join.
    pub fn node_prerequisites(&self) -> Vec<String> {
        self.vpc_cni
            .iter()
            .chain(self.aws_auth.iter())
            .cloned()
            .collect()
    }

    /// Whether a role is one of the cluster's instance roles. Roles created by the composition
    /// are matched by node, adopted ones by ARN.
    pub fn has_instance_role(&self, role_arn: Option<&str>, role_node: Option<&str>) -> bool {
        self.instance_roles.iter().any(|role| {
            (role_node.is_some() && role.node.as_deref() == role_node)
                || (role_arn.is_some() && role.arn.as_str() == role_arn)
        })
    }
}
