/*!

This test module provides an in-memory [`CloudLookup`] so that clusters can be composed without an
AWS account.

The account has a default VPC with two public and two private subnets spread over two
availability zones, and remembers every question it was asked.

!*/

use eks_composer::{CloudLookup, InstanceTypeInfo, LookupResult, RouteInfo, SubnetInfo};
use std::collections::BTreeMap;
use std::sync::Mutex;

pub(crate) const DEFAULT_VPC: &str = "vpc-default";

pub(crate) struct MockLookup {
    pub(crate) default_vpc: Option<String>,
    pub(crate) subnets: Vec<SubnetInfo>,
    pub(crate) addon_versions: BTreeMap<String, String>,
    pub(crate) instance_types: BTreeMap<String, InstanceTypeInfo>,
    pub(crate) calls: Mutex<Vec<String>>,
}

impl Default for MockLookup {
    fn default() -> Self {
        Self {
            default_vpc: Some(DEFAULT_VPC.to_string()),
            subnets: vec![
                public_subnet("subnet-public-a", DEFAULT_VPC, "us-west-2a"),
                public_subnet("subnet-public-b", DEFAULT_VPC, "us-west-2b"),
                private_subnet("subnet-private-a", DEFAULT_VPC, "us-west-2a"),
                private_subnet("subnet-private-b", DEFAULT_VPC, "us-west-2b"),
            ],
            addon_versions: BTreeMap::new(),
            instance_types: BTreeMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockLookup {
    /// Every call made so far, as `method(arguments)`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

pub(crate) fn public_subnet(id: &str, vpc_id: &str, zone: &str) -> SubnetInfo {
    SubnetInfo {
        subnet_id: id.to_string(),
        vpc_id: vpc_id.to_string(),
        availability_zone: zone.to_string(),
        routes: vec![RouteInfo {
            destination_cidr_block: Some("0.0.0.0/0".to_string()),
            destination_ipv6_cidr_block: None,
            gateway_id: Some("igw-0123".to_string()),
        }],
    }
}

pub(crate) fn private_subnet(id: &str, vpc_id: &str, zone: &str) -> SubnetInfo {
    SubnetInfo {
        subnet_id: id.to_string(),
        vpc_id: vpc_id.to_string(),
        availability_zone: zone.to_string(),
        routes: vec![
            RouteInfo {
                destination_cidr_block: Some("172.31.0.0/16".to_string()),
                destination_ipv6_cidr_block: None,
                gateway_id: Some("local".to_string()),
            },
            // NAT routes carry a NAT gateway id, never a gateway id.
            RouteInfo {
                destination_cidr_block: Some("0.0.0.0/0".to_string()),
                destination_ipv6_cidr_block: None,
                gateway_id: None,
            },
        ],
    }
}

#[async_trait::async_trait]
impl CloudLookup for MockLookup {
    async fn region(&self) -> LookupResult<String> {
        self.record("region()".to_string());
        Ok("us-west-2".to_string())
    }

    async fn default_vpc(&self) -> LookupResult<String> {
        self.record("default_vpc()".to_string());
        self.default_vpc
            .clone()
            .ok_or_else(|| "No default VPC for this user".into())
    }

    async fn vpc_subnets(&self, vpc_id: &str) -> LookupResult<Vec<SubnetInfo>> {
        self.record(format!("vpc_subnets({})", vpc_id));
        Ok(self
            .subnets
            .iter()
            .filter(|s| s.vpc_id == vpc_id)
            .cloned()
            .collect())
    }

    async fn describe_subnets(&self, subnet_ids: &[String]) -> LookupResult<Vec<SubnetInfo>> {
        self.record(format!("describe_subnets({})", subnet_ids.join(",")));
        subnet_ids
            .iter()
            .map(|id| {
                self.subnets
                    .iter()
                    .find(|s| &s.subnet_id == id)
                    .cloned()
                    .ok_or_else(|| format!("The subnet ID '{}' does not exist", id).into())
            })
            .collect()
    }

    async fn default_addon_version(&self, addon: &str, k8s_version: &str) -> LookupResult<String> {
        self.record(format!("default_addon_version({}, {})", addon, k8s_version));
        self.addon_versions
            .get(addon)
            .cloned()
            .ok_or_else(|| format!("No default version of '{}' for {}", addon, k8s_version).into())
    }

    async fn ssm_parameter(&self, name: &str) -> LookupResult<String> {
        self.record(format!("ssm_parameter({})", name));
        Ok("ami-0123456789abcdef0".to_string())
    }

    async fn instance_type_info(&self, instance_type: &str) -> LookupResult<InstanceTypeInfo> {
        self.record(format!("instance_type_info({})", instance_type));
        self.instance_types
            .get(instance_type)
            .cloned()
            .ok_or_else(|| format!("Unknown instance type '{}'", instance_type).into())
    }
}
