use crate::Configuration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveConflictsOnCreate {
    None,
    Overwrite,
}

derive_display_from_serialize!(ResolveConflictsOnCreate);
derive_fromstr_from_deserialize!(ResolveConflictsOnCreate);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveConflictsOnUpdate {
    None,
    Overwrite,
    Preserve,
}

derive_display_from_serialize!(ResolveConflictsOnUpdate);
derive_fromstr_from_deserialize!(ResolveConflictsOnUpdate);

/// Options for an arbitrary EKS managed addon.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Configuration, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddonOptions {
    pub addon_name: String,
    pub addon_version: Option<String>,
    pub service_account_role_arn: Option<String>,
    pub preserve: Option<bool>,
    pub resolve_conflicts_on_create: Option<ResolveConflictsOnCreate>,
    pub resolve_conflicts_on_update: Option<ResolveConflictsOnUpdate>,
    /// Serialized to JSON with sorted keys.
    pub configuration_values: Option<BTreeMap<String, Value>>,
    pub tags: Option<BTreeMap<String, String>>,
}

/// Options for the `coredns` managed addon of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoreDnsAddonOptions {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub version: Option<String>,
    pub resolve_conflicts_on_create: Option<ResolveConflictsOnCreate>,
    pub resolve_conflicts_on_update: Option<ResolveConflictsOnUpdate>,
    pub configuration_values: Option<BTreeMap<String, Value>>,
}

impl Default for CoreDnsAddonOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            version: None,
            resolve_conflicts_on_create: None,
            resolve_conflicts_on_update: None,
            configuration_values: None,
        }
    }
}

/// Options for the `kube-proxy` managed addon of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeProxyAddonOptions {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub version: Option<String>,
    pub resolve_conflicts_on_create: Option<ResolveConflictsOnCreate>,
    pub resolve_conflicts_on_update: Option<ResolveConflictsOnUpdate>,
    pub configuration_values: Option<BTreeMap<String, Value>>,
}

impl Default for KubeProxyAddonOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            version: None,
            resolve_conflicts_on_create: None,
            resolve_conflicts_on_update: None,
            configuration_values: None,
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

/// Options of the `vpc-cni` managed addon. Most fields are legacy flags that are folded into the
/// addon's configuration values as environment variables of the `aws-node` daemonset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Configuration, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VpcCniOptions {
    pub addon_version: Option<String>,
    pub service_account_role_arn: Option<String>,
    pub resolve_conflicts_on_create: Option<ResolveConflictsOnCreate>,
    pub resolve_conflicts_on_update: Option<ResolveConflictsOnUpdate>,
    /// Merged on top of the values derived from the flags below.
    pub configuration_values: Option<BTreeMap<String, Value>>,

    pub node_port_support: Option<bool>,
    pub custom_network_config: Option<bool>,
    pub external_snat: Option<bool>,
    pub warm_eni_target: Option<i64>,
    pub warm_ip_target: Option<i64>,
    pub warm_prefix_target: Option<i64>,
    pub enable_prefix_delegation: Option<bool>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub plugin_log_level: Option<String>,
    pub plugin_log_file: Option<String>,
    pub veth_prefix: Option<String>,
    pub eni_mtu: Option<i64>,
    pub eni_config_label_def: Option<String>,
    pub enable_pod_eni: Option<bool>,
    pub disable_tcp_early_demux: Option<bool>,
    pub cni_configure_rpfilter: Option<bool>,
    pub cni_custom_network_cfg: Option<bool>,
    pub cni_external_snat: Option<bool>,
    pub enable_ipv6: Option<bool>,
    pub enable_network_policy: Option<bool>,

    pub security_context_privileged: Option<bool>,
    pub image: Option<String>,
    pub init_image: Option<String>,
    pub node_agent_image: Option<String>,
}
