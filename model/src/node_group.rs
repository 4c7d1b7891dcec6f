use crate::ami::OperatingSystem;
use crate::Configuration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use std::collections::BTreeMap;

/// The effect of a taint on self-managed nodes, as kubelet spells it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum TaintEffect {
    NoSchedule,
    NoExecute,
    PreferNoSchedule,
}

derive_display_from_serialize!(TaintEffect);
derive_fromstr_from_deserialize!(TaintEffect);

/// A taint of a self-managed node group, keyed by the taint key in [`NodeGroupBaseOptions::taints`].
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

/// The effect of a managed node group taint, as the EKS API spells it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagedTaintEffect {
    NoSchedule,
    NoExecute,
    PreferNoSchedule,
}

derive_display_from_serialize!(ManagedTaintEffect);
derive_fromstr_from_deserialize!(ManagedTaintEffect);

impl From<ManagedTaintEffect> for TaintEffect {
    fn from(effect: ManagedTaintEffect) -> Self {
        match effect {
            ManagedTaintEffect::NoSchedule => TaintEffect::NoSchedule,
            ManagedTaintEffect::NoExecute => TaintEffect::NoExecute,
            ManagedTaintEffect::PreferNoSchedule => TaintEffect::PreferNoSchedule,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedTaint {
    pub key: String,
    pub value: Option<String>,
    pub effect: ManagedTaintEffect,
}

/// An extra nodeadm document appended to AL2023 user data.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeadmOptions {
    pub content: String,
    pub content_type: String,
}

/// Options shared by every self-managed node group and by the cluster's default node group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Configuration, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupBaseOptions {
    pub node_subnet_ids: Option<Vec<String>>,
    pub instance_type: Option<String>,
    pub spot_price: Option<String>,
    /// Defaults to the cluster's node security group.
    pub node_security_group_id: Option<String>,
    /// Required together with `nodeSecurityGroupId`.
    pub cluster_ingress_rule_id: Option<String>,
    pub extra_node_security_group_ids: Option<Vec<String>>,
    pub node_public_key: Option<String>,
    pub key_name: Option<String>,
    pub node_root_volume_size: Option<i64>,
    pub node_root_volume_delete_on_termination: Option<bool>,
    pub node_root_volume_encrypted: Option<bool>,
    pub node_root_volume_iops: Option<i64>,
    pub node_root_volume_throughput: Option<i64>,
    pub node_root_volume_type: Option<String>,
    /// Appended to the generated user data.
    pub node_user_data: Option<String>,
    /// Replaces the generated user data entirely.
    pub node_user_data_override: Option<String>,
    pub desired_capacity: Option<i64>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    /// An EKS AMI type or one of its legacy aliases such as `amazon-linux-2-arm`.
    pub ami_type: Option<String>,
    pub ami_id: Option<String>,
    pub gpu: Option<bool>,
    pub labels: Option<BTreeMap<String, String>>,
    pub taints: Option<BTreeMap<String, Taint>>,
    pub kubelet_extra_args: Option<String>,
    pub bootstrap_extra_args: Option<String>,
    pub node_associate_public_ip_address: Option<bool>,
    pub version: Option<String>,
    pub instance_profile_name: Option<String>,
    pub auto_scaling_group_tags: Option<BTreeMap<String, String>>,
    pub cloud_formation_tags: Option<BTreeMap<String, String>>,
    pub enable_detailed_monitoring: Option<bool>,
    pub operating_system: Option<OperatingSystem>,
    /// Bottlerocket settings, deep merged over the generated ones.
    pub bottlerocket_settings: Option<Value>,
    pub nodeadm_extra_options: Option<Vec<NodeadmOptions>>,
}

/// A self-managed node group backed by a CloudFormation stack. Deprecated in favour of
/// [`NodeGroupV2Options`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, Configuration, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupOptions {
    #[serde(flatten)]
    pub base: NodeGroupBaseOptions,
}

/// A self-managed node group backed by a launch template and an auto scaling group with instance
/// refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Configuration, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupV2Options {
    #[serde(flatten)]
    pub base: NodeGroupBaseOptions,
    /// Percentage of the group that may be replaced at once during an instance refresh.
    pub min_refresh_percentage: Option<i64>,
    pub launch_template_tag_specifications: Option<Vec<Value>>,
    /// Passed to the launch template as its `metadataOptions`.
    pub metadata_options: Option<Value>,
    pub enable_imds_v2: Option<bool>,
    pub default_instance_warmup: Option<i64>,
    pub ignore_scaling_changes: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    pub desired_size: i64,
    pub min_size: i64,
    pub max_size: i64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            desired_size: 2,
            min_size: 1,
            max_size: 2,
        }
    }
}

/// A launch template supplied by the caller for a managed node group.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateRef {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version: String,
}

/// Options of an EKS managed node group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Configuration, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedNodeGroupOptions {
    pub node_group_name: Option<String>,
    pub node_group_name_prefix: Option<String>,
    pub node_role_arn: Option<String>,
    /// A role created by this composer, named by its logical name.
    pub node_role: Option<String>,
    pub subnet_ids: Option<Vec<String>>,
    pub scaling_config: Option<ScalingConfig>,
    pub ignore_scaling_changes: Option<bool>,
    pub instance_types: Option<Vec<String>>,
    pub capacity_type: Option<String>,
    pub disk_size: Option<i64>,
    pub labels: Option<BTreeMap<String, String>>,
    pub taints: Option<Vec<ManagedTaint>>,
    pub ami_type: Option<String>,
    pub ami_id: Option<String>,
    pub gpu: Option<bool>,
    pub operating_system: Option<OperatingSystem>,
    pub release_version: Option<String>,
    pub version: Option<String>,
    pub force_update_version: Option<bool>,
    pub launch_template: Option<LaunchTemplateRef>,
    pub kubelet_extra_args: Option<String>,
    pub bootstrap_extra_args: Option<String>,
    #[serde(rename = "enableIMDSv2")]
    pub enable_imds_v2: Option<bool>,
    pub user_data: Option<String>,
    pub bottlerocket_settings: Option<Value>,
    pub nodeadm_extra_options: Option<Vec<NodeadmOptions>>,
    pub enable_efa_support: Option<bool>,
    pub placement_group_availability_zone: Option<String>,
    pub remote_access: Option<Value>,
    pub update_config: Option<Value>,
    pub tags: Option<BTreeMap<String, String>>,
}

impl ManagedNodeGroupOptions {
    /// Whether any option requires a launch template generated by the composer.
    pub fn needs_custom_launch_template(&self) -> bool {
        self.kubelet_extra_args.is_some()
            || self.bootstrap_extra_args.is_some()
            || self.bottlerocket_settings.is_some()
            || self.nodeadm_extra_options.is_some()
            || self.enable_imds_v2.is_some()
            || self.user_data.is_some()
            || self.ami_id.is_some()
            || self.enable_efa_support.unwrap_or(false)
    }
}
