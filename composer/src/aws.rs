//! A [`CloudLookup`] backed by the AWS SDK.

use crate::lookup::{CloudLookup, InstanceTypeInfo, LookupResult, RouteInfo, SubnetInfo};
use aws_config::default_provider::credentials::default_provider;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_config::sts::AssumeRoleProvider;
use aws_sdk_ec2::model::{Filter, InstanceType, LocationType, RouteTable, Subnet};
use aws_sdk_sts::Region;
use aws_smithy_types::retry::{RetryConfig, RetryMode};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_types::SdkConfig;
use eks_model::constants::DEFAULT_REGION;
use log::{debug, info};

/// Set up the config for aws calls with an optional named profile and an optional role to
/// assume on top of it.
pub async fn aws_config(
    region: Option<&str>,
    profile_name: Option<&str>,
    assume_role: Option<&str>,
) -> SdkConfig {
    let region = region.unwrap_or(DEFAULT_REGION).to_string();
    info!(
        "Creating a custom region provider for '{}' to be used in the aws config.",
        region
    );

    let config_loader = aws_config::from_env().retry_config(
        RetryConfig::standard()
            .with_retry_mode(RetryMode::Adaptive)
            .with_max_attempts(15),
    );
    let base_provider = match profile_name {
        Some(profile_name) => SharedCredentialsProvider::new(
            ProfileFileCredentialsProvider::builder()
                .profile_name(profile_name)
                .build(),
        ),
        None => SharedCredentialsProvider::new(default_provider().await),
    };

    let config_loader = match assume_role {
        Some(role_arn) => config_loader.credentials_provider(SharedCredentialsProvider::new(
            AssumeRoleProvider::builder(role_arn)
                .region(Region::new(region.clone()))
                .session_name("eks-composer")
                .build(base_provider),
        )),
        None => config_loader.credentials_provider(base_provider),
    };

    config_loader.region(Region::new(region)).load().await
}

#[derive(Debug, Clone)]
pub struct AwsLookup {
    region: String,
    ec2_client: aws_sdk_ec2::Client,
    eks_client: aws_sdk_eks::Client,
    ssm_client: aws_sdk_ssm::Client,
}

impl AwsLookup {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            region: config
                .region()
                .map(|r| r.to_string())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            ec2_client: aws_sdk_ec2::Client::new(config),
            eks_client: aws_sdk_eks::Client::new(config),
            ssm_client: aws_sdk_ssm::Client::new(config),
        }
    }

    /// The route table explicitly associated with the subnet, falling back to the main route
    /// table of its VPC.
    async fn routes(&self, subnet_id: &str, vpc_id: &str) -> LookupResult<Vec<RouteInfo>> {
        let associated = self
            .ec2_client
            .describe_route_tables()
            .filters(
                Filter::builder()
                    .name("association.subnet-id")
                    .values(subnet_id)
                    .build(),
            )
            .send()
            .await?;
        if let Some(table) = associated.route_tables().and_then(|t| t.first()) {
            return Ok(route_infos(table));
        }
        debug!(
            "Subnet '{}' has no explicit route table, using the main route table of '{}'",
            subnet_id, vpc_id
        );
        let main = self
            .ec2_client
            .describe_route_tables()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(
                Filter::builder()
                    .name("association.main")
                    .values("true")
                    .build(),
            )
            .send()
            .await?;
        Ok(main
            .route_tables()
            .and_then(|t| t.first())
            .map(route_infos)
            .unwrap_or_default())
    }

    async fn subnet_infos(&self, subnets: &[Subnet]) -> LookupResult<Vec<SubnetInfo>> {
        let mut infos = Vec::with_capacity(subnets.len());
        for subnet in subnets {
            let subnet_id = subnet
                .subnet_id()
                .ok_or("DescribeSubnets returned a subnet without an id")?
                .to_string();
            let vpc_id = subnet
                .vpc_id()
                .ok_or_else(|| format!("Subnet '{}' is missing its VPC id", subnet_id))?
                .to_string();
            let routes = self.routes(&subnet_id, &vpc_id).await?;
            infos.push(SubnetInfo {
                availability_zone: subnet.availability_zone().unwrap_or_default().to_string(),
                subnet_id,
                vpc_id,
                routes,
            });
        }
        Ok(infos)
    }
}

fn route_infos(table: &RouteTable) -> Vec<RouteInfo> {
    table
        .routes()
        .unwrap_or_default()
        .iter()
        .map(|route| RouteInfo {
            destination_cidr_block: route.destination_cidr_block().map(str::to_string),
            destination_ipv6_cidr_block: route.destination_ipv6_cidr_block().map(str::to_string),
            gateway_id: route.gateway_id().map(str::to_string),
        })
        .collect()
}

#[async_trait::async_trait]
impl CloudLookup for AwsLookup {
    async fn region(&self) -> LookupResult<String> {
        Ok(self.region.clone())
    }

    async fn default_vpc(&self) -> LookupResult<String> {
        info!("Looking up the default VPC");
        let output = self
            .ec2_client
            .describe_vpcs()
            .filters(Filter::builder().name("isDefault").values("true").build())
            .send()
            .await?;
        Ok(output
            .vpcs()
            .and_then(|vpcs| vpcs.first())
            .and_then(|vpc| vpc.vpc_id())
            .ok_or("No default VPC exists in this region")?
            .to_string())
    }

    async fn vpc_subnets(&self, vpc_id: &str) -> LookupResult<Vec<SubnetInfo>> {
        info!("Getting the subnets of VPC '{}'", vpc_id);
        let output = self
            .ec2_client
            .describe_subnets()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await?;
        self.subnet_infos(output.subnets().unwrap_or_default()).await
    }

    async fn describe_subnets(&self, subnet_ids: &[String]) -> LookupResult<Vec<SubnetInfo>> {
        info!("Describing subnets {:?}", subnet_ids);
        let output = self
            .ec2_client
            .describe_subnets()
            .set_subnet_ids(Some(subnet_ids.to_vec()))
            .send()
            .await?;
        let mut infos = self
            .subnet_infos(output.subnets().unwrap_or_default())
            .await?;
        infos.sort_by_key(|info| {
            subnet_ids
                .iter()
                .position(|id| id == &info.subnet_id)
                .unwrap_or(usize::MAX)
        });
        Ok(infos)
    }

    async fn default_addon_version(
        &self,
        addon: &str,
        k8s_version: &str,
    ) -> LookupResult<String> {
        info!(
            "Looking up the default version of addon '{}' for Kubernetes {}",
            addon, k8s_version
        );
        let output = self
            .eks_client
            .describe_addon_versions()
            .addon_name(addon)
            .kubernetes_version(k8s_version)
            .send()
            .await?;
        output
            .addons()
            .unwrap_or_default()
            .iter()
            .flat_map(|info| info.addon_versions().unwrap_or_default())
            .find(|version| {
                version
                    .compatibilities()
                    .unwrap_or_default()
                    .iter()
                    .any(|c| c.default_version() && c.cluster_version() == Some(k8s_version))
            })
            .and_then(|version| version.addon_version())
            .map(str::to_string)
            .ok_or_else(|| {
                format!(
                    "EKS reported no default version of '{}' for Kubernetes {}",
                    addon, k8s_version
                )
                .into()
            })
    }

    async fn ssm_parameter(&self, name: &str) -> LookupResult<String> {
        debug!("Reading SSM parameter '{}'", name);
        let output = self.ssm_client.get_parameter().name(name).send().await?;
        Ok(output
            .parameter()
            .and_then(|p| p.value())
            .ok_or_else(|| format!("SSM parameter '{}' has no value", name))?
            .to_string())
    }

    async fn instance_type_info(&self, instance_type: &str) -> LookupResult<InstanceTypeInfo> {
        let output = self
            .ec2_client
            .describe_instance_types()
            .instance_types(InstanceType::from(instance_type))
            .send()
            .await?;
        let network_info = output
            .instance_types()
            .and_then(|types| types.first())
            .and_then(|info| info.network_info())
            .ok_or_else(|| format!("Instance type '{}' was not found", instance_type))?;
        let efa_supported = network_info.efa_supported().unwrap_or(false);
        let maximum_network_cards = network_info.maximum_network_cards().unwrap_or(1) as i64;

        let offerings = self
            .ec2_client
            .describe_instance_type_offerings()
            .location_type(LocationType::AvailabilityZone)
            .filters(
                Filter::builder()
                    .name("instance-type")
                    .values(instance_type)
                    .build(),
            )
            .send()
            .await?;
        let mut availability_zones: Vec<String> = offerings
            .instance_type_offerings()
            .unwrap_or_default()
            .iter()
            .filter_map(|offering| offering.location().map(str::to_string))
            .collect();
        availability_zones.sort();

        Ok(InstanceTypeInfo {
            instance_type: instance_type.to_string(),
            efa_supported,
            maximum_network_cards,
            availability_zones,
        })
    }
}
