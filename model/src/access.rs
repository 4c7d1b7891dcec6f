use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use std::collections::BTreeMap;

/// How the cluster authenticates IAM principals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum AuthenticationMode {
    #[serde(rename = "CONFIG_MAP")]
    ConfigMap,
    #[serde(rename = "API")]
    Api,
    #[serde(rename = "API_AND_CONFIG_MAP")]
    ApiAndConfigMap,
}

derive_display_from_serialize!(AuthenticationMode);
derive_fromstr_from_deserialize!(AuthenticationMode);

impl Default for AuthenticationMode {
    fn default() -> Self {
        Self::ApiAndConfigMap
    }
}

impl AuthenticationMode {
    /// Whether the legacy `aws-auth` config map is read by the cluster in this mode.
    pub fn uses_config_map(&self) -> bool {
        matches!(self, Self::ConfigMap | Self::ApiAndConfigMap)
    }

    /// Whether EKS access entries are honored in this mode.
    pub fn supports_access_entries(&self) -> bool {
        matches!(self, Self::Api | Self::ApiAndConfigMap)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum AccessEntryType {
    #[serde(rename = "STANDARD")]
    Standard,
    #[serde(rename = "FARGATE_LINUX")]
    FargateLinux,
    #[serde(rename = "EC2_LINUX")]
    Ec2Linux,
    #[serde(rename = "EC2_WINDOWS")]
    Ec2Windows,
    #[serde(rename = "EC2")]
    Ec2,
}

derive_display_from_serialize!(AccessEntryType);
derive_fromstr_from_deserialize!(AccessEntryType);

impl Default for AccessEntryType {
    fn default() -> Self {
        Self::Standard
    }
}

impl AccessEntryType {
    /// Only `STANDARD` entries may carry a username and kubernetes groups.
    pub fn allows_custom_identity(&self) -> bool {
        matches!(self, Self::Standard)
    }
}

/// An entry of the `mapRoles` key of the `aws-auth` config map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleMapping {
    pub role_arn: String,
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// An entry of the `mapUsers` key of the `aws-auth` config map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserMapping {
    pub user_arn: String,
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Binds an IAM principal to the cluster through the EKS access entry API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    pub principal_arn: String,
    #[serde(rename = "type")]
    pub entry_type: Option<AccessEntryType>,
    pub username: Option<String>,
    pub kubernetes_groups: Option<Vec<String>>,
    /// Keyed by a caller-chosen name that becomes part of the association's logical name.
    #[serde(default)]
    pub access_policies: BTreeMap<String, AccessPolicyAssociation>,
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicyAssociation {
    pub policy_arn: String,
    pub access_scope: AccessScope,
}

/// Passed to EKS verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessScope {
    #[serde(rename = "type")]
    pub scope_type: AccessScopeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AccessScopeType {
    Cluster,
    Namespace,
}

impl Default for AccessScopeType {
    fn default() -> Self {
        Self::Cluster
    }
}

derive_display_from_serialize!(AccessScopeType);
derive_fromstr_from_deserialize!(AccessScopeType);
