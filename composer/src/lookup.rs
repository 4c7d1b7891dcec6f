//! Read-only questions the composer asks of the cloud while composing.

use crate::error::BoxError;
use serde::{Deserialize, Serialize};

pub type LookupResult<T> = std::result::Result<T, BoxError>;

/// A subnet as the network planner needs to see it.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetInfo {
    pub subnet_id: String,
    pub vpc_id: String,
    pub availability_zone: String,
    /// Routes of the route table associated with the subnet, or of the VPC's main route table.
    pub routes: Vec<RouteInfo>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub destination_cidr_block: Option<String>,
    pub destination_ipv6_cidr_block: Option<String>,
    pub gateway_id: Option<String>,
}

/// The parts of an EC2 instance type description used for EFA node groups.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTypeInfo {
    pub instance_type: String,
    pub efa_supported: bool,
    pub maximum_network_cards: i64,
    /// Availability zones that offer the instance type.
    pub availability_zones: Vec<String>,
}

/// The cloud reads the composer performs itself. Everything else is declared as a deferred value
/// and answered by the engine.
#[async_trait::async_trait]
pub trait CloudLookup: Send + Sync {
    /// The region the lookup is scoped to.
    async fn region(&self) -> LookupResult<String>;

    /// The id of the account's default VPC.
    async fn default_vpc(&self) -> LookupResult<String>;

    /// Every subnet of a VPC.
    async fn vpc_subnets(&self, vpc_id: &str) -> LookupResult<Vec<SubnetInfo>>;

    /// The given subnets, in the order requested.
    async fn describe_subnets(&self, subnet_ids: &[String]) -> LookupResult<Vec<SubnetInfo>>;

    /// The default version of an EKS addon for a Kubernetes version such as `1.30`.
    async fn default_addon_version(&self, addon: &str, k8s_version: &str)
        -> LookupResult<String>;

    /// The value of an SSM parameter.
    async fn ssm_parameter(&self, name: &str) -> LookupResult<String>;

    async fn instance_type_info(&self, instance_type: &str) -> LookupResult<InstanceTypeInfo>;
}
