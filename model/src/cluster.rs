use crate::access::{AccessEntry, AuthenticationMode, RoleMapping, UserMapping};
use crate::addon::{CoreDnsAddonOptions, KubeProxyAddonOptions, VpcCniOptions};
use crate::node_group::NodeGroupBaseOptions;
use crate::storage::StorageClasses;
use crate::Configuration;
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use std::collections::BTreeMap;

/// The user-facing options of the cluster composite. Every field is optional; an empty document
/// composes a working cluster in the account's default VPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Configuration, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// The physical name of the EKS cluster. Defaults to the composite's name.
    pub name: Option<String>,
    pub region: Option<String>,
    pub version: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
    pub cluster_tags: Option<BTreeMap<String, String>>,

    // Networking
    pub vpc_id: Option<String>,
    pub subnet_ids: Option<Vec<String>>,
    pub public_subnet_ids: Option<Vec<String>>,
    pub private_subnet_ids: Option<Vec<String>>,
    #[node_option]
    pub node_subnet_ids: Option<Vec<String>>,
    pub endpoint_public_access: Option<bool>,
    pub endpoint_private_access: Option<bool>,
    pub public_access_cidrs: Option<Vec<String>>,
    pub ip_family: Option<IpFamily>,
    pub kubernetes_service_ip_address_range: Option<String>,

    // Control plane
    pub enabled_cluster_log_types: Option<Vec<String>>,
    pub encryption_config_key_arn: Option<String>,
    pub authentication_mode: Option<AuthenticationMode>,
    pub bootstrap_self_managed_addons: Option<bool>,
    pub upgrade_policy: Option<UpgradePolicy>,
    pub auto_mode: Option<AutoModeOptions>,

    // Identity
    pub service_role: Option<IamRoleRef>,
    pub instance_role: Option<IamRoleRef>,
    pub instance_roles: Option<Vec<IamRoleRef>>,
    pub instance_profile_name: Option<String>,
    pub create_instance_role: Option<bool>,
    pub create_oidc_provider: Option<bool>,
    pub role_mappings: Option<Vec<RoleMapping>>,
    pub user_mappings: Option<Vec<UserMapping>>,
    pub access_entries: Option<BTreeMap<String, AccessEntry>>,
    pub creation_role_provider: Option<CreationRoleProviderArgs>,
    pub provider_credential_opts: Option<KubeconfigOptions>,

    // Security groups
    pub skip_default_security_groups: Option<bool>,
    /// The id of an existing security group to use for the control plane.
    pub cluster_security_group: Option<String>,
    pub cluster_security_group_tags: Option<BTreeMap<String, String>>,
    pub node_security_group_tags: Option<BTreeMap<String, String>>,

    // Compute
    pub skip_default_node_group: Option<bool>,
    pub fargate: Option<FargateConfig>,
    /// Options of the default node group. Exclusive with the singular node options below.
    pub node_group_options: Option<NodeGroupBaseOptions>,
    #[node_option]
    pub instance_type: Option<String>,
    #[node_option]
    pub gpu: Option<bool>,
    #[node_option]
    pub node_ami_id: Option<String>,
    #[node_option]
    pub node_public_key: Option<String>,
    #[node_option]
    pub node_root_volume_size: Option<i64>,
    #[node_option]
    pub node_root_volume_encrypted: Option<bool>,
    #[node_option]
    pub node_user_data: Option<String>,
    #[node_option]
    pub desired_capacity: Option<i64>,
    #[node_option]
    pub min_size: Option<i64>,
    #[node_option]
    pub max_size: Option<i64>,
    #[node_option]
    pub node_associate_public_ip_address: Option<bool>,

    // Addons
    pub vpc_cni_options: Option<VpcCniOptions>,
    pub use_default_vpc_cni: Option<bool>,
    pub coredns_addon_options: Option<CoreDnsAddonOptions>,
    pub kube_proxy_addon_options: Option<KubeProxyAddonOptions>,
    pub storage_classes: Option<StorageClasses>,
}

impl ClusterConfig {
    /// Whether any of the singular default node group options is set.
    pub fn has_singular_node_options(&self) -> bool {
        !self.node_options_set().is_empty()
    }

    pub fn auto_mode_enabled(&self) -> bool {
        self.auto_mode.as_ref().map(|a| a.enabled).unwrap_or(false)
    }

    pub fn fargate_enabled(&self) -> bool {
        match &self.fargate {
            Some(FargateConfig::Enabled(enabled)) => *enabled,
            Some(FargateConfig::Profile(_)) => true,
            None => false,
        }
    }
}

/// A reference to an IAM role that exists outside of the composition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct IamRoleRef {
    pub arn: String,
}

impl IamRoleRef {
    pub fn new<S: Into<String>>(arn: S) -> Self {
        Self { arn: arn.into() }
    }

    /// The role name is the last path segment of the ARN.
    pub fn name(&self) -> &str {
        self.arn.rsplit('/').next().unwrap_or(&self.arn)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    Ipv4,
    Ipv6,
}

derive_display_from_serialize!(IpFamily);
derive_fromstr_from_deserialize!(IpFamily);

impl Default for IpFamily {
    fn default() -> Self {
        Self::Ipv4
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeSupportType {
    Standard,
    Extended,
}

derive_display_from_serialize!(UpgradeSupportType);
derive_fromstr_from_deserialize!(UpgradeSupportType);

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePolicy {
    pub support_type: Option<UpgradeSupportType>,
}

/// The node pools EKS auto mode manages on behalf of the cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum ClusterNodePool {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "general-purpose")]
    GeneralPurpose,
}

derive_display_from_serialize!(ClusterNodePool);
derive_fromstr_from_deserialize!(ClusterNodePool);

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoModeOptions {
    #[serde(default)]
    pub enabled: bool,
    /// Defaults to true unless `computeConfig.nodeRoleArn` is given.
    pub create_node_role: Option<bool>,
    pub compute_config: Option<ComputeConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeConfig {
    pub node_pools: Option<Vec<ClusterNodePool>>,
    pub node_role_arn: Option<String>,
}

/// `fargate: true` or a profile description.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum FargateConfig {
    Enabled(bool),
    Profile(FargateProfileOptions),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FargateProfileOptions {
    pub pod_execution_role_arn: Option<String>,
    pub selectors: Option<Vec<FargateSelector>>,
    pub subnet_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FargateSelector {
    pub namespace: String,
    pub labels: Option<BTreeMap<String, String>>,
}

/// Scopes the credentials of the rendered kubeconfig.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigOptions {
    pub role_arn: Option<String>,
    pub profile_name: Option<String>,
}

/// A role and credential provider to create the cluster with. Only usable from the runtime that
/// owns the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreationRoleProviderArgs {
    pub role_arn: Option<String>,
    pub provider: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Configuration;

    #[test]
    fn empty_document_is_valid() {
        let config = ClusterConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ClusterConfig::default());
        assert!(!config.has_singular_node_options());
        assert!(!config.fargate_enabled());
        assert!(!config.auto_mode_enabled());
    }

    #[test]
    fn singular_node_options_are_listed_by_their_option_names() {
        let config = ClusterConfig::from_json_str(
            r#"{"instanceType": "t3.large", "nodeRootVolumeSize": 40, "vpcId": "vpc-1"}"#,
        )
        .unwrap();
        assert!(config.has_singular_node_options());
        assert_eq!(
            config.node_options_set(),
            vec!["instanceType", "nodeRootVolumeSize"]
        );
    }

    #[test]
    fn yaml_document() {
        let config: ClusterConfig = serde_yaml::from_str(
            r#"
vpcId: vpc-1
subnetIds: [subnet-a, subnet-b]
ipFamily: ipv6
authenticationMode: API
fargate: true
autoMode:
  enabled: true
  computeConfig:
    nodePools: [system, general-purpose]
instanceRoles:
  - arn: arn:aws:iam::123456789012:role/nodes/role-a
"#,
        )
        .unwrap();
        assert_eq!(config.ip_family, Some(IpFamily::Ipv6));
        assert_eq!(config.authentication_mode, Some(AuthenticationMode::Api));
        assert!(config.fargate_enabled());
        assert!(config.auto_mode_enabled());
        assert_eq!(
            config.auto_mode.unwrap().compute_config.unwrap().node_pools,
            Some(vec![ClusterNodePool::System, ClusterNodePool::GeneralPurpose])
        );
        assert_eq!(config.instance_roles.unwrap()[0].name(), "role-a");
    }

    #[test]
    fn fargate_profile_form() {
        let config = ClusterConfig::from_value(serde_json::json!({
            "fargate": { "selectors": [{ "namespace": "apps" }] }
        }))
        .unwrap();
        assert!(config.fargate_enabled());
        let config = ClusterConfig::from_value(serde_json::json!({ "fargate": false })).unwrap();
        assert!(!config.fargate_enabled());
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        assert!(ClusterConfig::from_value(serde_json::json!({ "ipFamily": "ipx" })).is_err());
    }
}
