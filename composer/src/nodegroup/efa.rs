//! Elastic Fabric Adapter support for managed node groups: a cluster placement group pinned to
//! one availability zone and one EFA interface per network card.

use crate::deferred::Deferred;
use crate::error::{Error, InvalidField, Result};
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::lookup::{CloudLookup, InstanceTypeInfo};
use eks_model::constants::DEFAULT_INSTANCE_TYPE;
use log::debug;
use std::collections::BTreeMap;

/// What an EFA enabled node group is placed with.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct EfaPlacement {
    pub placement_group: String,
    pub placement_group_name: Deferred,
    /// The node group subnets inside the placement zone.
    pub subnet_ids: Vec<String>,
    pub network_interfaces: Deferred,
}

/// The instance type whose capabilities decide the EFA layout.
pub(super) fn efa_instance_type(instance_types: Option<&[String]>) -> String {
    instance_types
        .and_then(|types| types.first())
        .cloned()
        .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string())
}

/// Where an EFA node group asks to run.
#[derive(Debug, Clone)]
pub(super) struct EfaRequest<'a> {
    pub zone: &'a str,
    pub instance_types: Option<&'a [String]>,
    /// The node group subnets before they are narrowed to the zone.
    pub subnet_ids: &'a [String],
    /// The security group of every interface; the cluster security group.
    pub security_group_id: Deferred,
    pub tags: Option<&'a BTreeMap<String, String>>,
}

/// Declares the placement group and works out the subnets and interfaces of an EFA node group.
pub(super) async fn place(
    graph: &mut Graph,
    name: &str,
    request: &EfaRequest<'_>,
    lookup: &dyn CloudLookup,
) -> Result<EfaPlacement> {
    let zone = request.zone;
    let instance_type = efa_instance_type(request.instance_types);
    let info = lookup
        .instance_type_info(&instance_type)
        .await
        .map_err(|e| Error::upstream("instanceTypes", e))?;

    let supported = info.availability_zones.join(", ");
    if !info.availability_zones.iter().any(|z| z == zone) {
        return Err(InvalidField::new(
            "placementGroupAvailabilityZone",
            format!(
                "The provided availability zone ('{}') is not supported by the instance type. \
                 Supported AZs: [{}]",
                zone, supported
            ),
        )
        .into());
    }

    let subnets = lookup
        .describe_subnets(request.subnet_ids)
        .await
        .map_err(|e| Error::upstream("subnetIds", e))?;
    let subnet_ids: Vec<String> = subnets
        .into_iter()
        .filter(|s| s.availability_zone == zone)
        .map(|s| s.subnet_id)
        .collect();
    if subnet_ids.is_empty() {
        return Err(InvalidField::new(
            "placementGroupAvailabilityZone",
            format!(
                "None of the configured subnets are in the provided availability zone ('{}'). \
                 Choose a different availability zone or change the subnets. Supported AZs: [{}]",
                zone, supported
            ),
        )
        .into());
    }

    let network_interfaces = network_interfaces(&info, request.security_group_id.clone())?;

    let placement_group = format!("{}-placementGroup", name);
    graph.add(
        ResourceNode::new(&placement_group, ResourceType::PlacementGroup)
            .property("strategy", "cluster")
            .optional_property("tags", request.tags),
    )?;
    debug!(
        "EFA node group '{}' is placed in {} across subnets {:?}",
        name, zone, subnet_ids
    );

    Ok(EfaPlacement {
        placement_group_name: Deferred::attr(&placement_group, "name"),
        placement_group,
        subnet_ids,
        network_interfaces,
    })
}

/// One interface per network card. The primary interface is a regular EFA interface, the rest are
/// `efa-only` so they don't consume private IP addresses.
fn network_interfaces(info: &InstanceTypeInfo, security_group_id: Deferred) -> Result<Deferred> {
    if !info.efa_supported {
        return Err(InvalidField::new(
            "instanceTypes",
            format!(
                "The selected instance type '{}' does not support EFA.",
                info.instance_type
            ),
        )
        .into());
    }
    let cards = info.maximum_network_cards.max(1);
    Ok(Deferred::list((0..cards).map(|i| {
        Deferred::object(vec![
            ("deleteOnTermination", Deferred::from("true")),
            ("networkCardIndex", Deferred::from(i)),
            ("deviceIndex", Deferred::from(if i == 0 { 0_i64 } else { 1 })),
            (
                "interfaceType",
                Deferred::from(if i == 0 { "efa" } else { "efa-only" }),
            ),
            (
                "securityGroups",
                Deferred::list(vec![security_group_id.clone()]),
            ),
        ])
    })))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nodegroup::test_support::{subnet, TestLookup};
    use maplit::btreemap;

    fn lookup() -> TestLookup {
        TestLookup {
            subnets: vec![
                subnet("subnet-a", "us-west-2a"),
                subnet("subnet-b", "us-west-2b"),
                subnet("subnet-c", "us-west-2a"),
            ],
            instance_types: btreemap! {
                "p5.48xlarge".to_string() => InstanceTypeInfo {
                    instance_type: "p5.48xlarge".to_string(),
                    efa_supported: true,
                    maximum_network_cards: 32,
                    availability_zones: vec!["us-west-2a".to_string(), "us-west-2b".to_string()],
                },
                "t3.medium".to_string() => InstanceTypeInfo {
                    instance_type: "t3.medium".to_string(),
                    efa_supported: false,
                    maximum_network_cards: 1,
                    availability_zones: vec!["us-west-2a".to_string()],
                },
            },
        }
    }

    fn subnets() -> Vec<String> {
        vec!["subnet-a".to_string(), "subnet-b".to_string(), "subnet-c".to_string()]
    }

    #[tokio::test]
    async fn one_interface_per_card() {
        let mut graph = Graph::new();
        let types = vec!["p5.48xlarge".to_string()];
        let placement = place(
            &mut graph,
            "gpu",
            &EfaRequest {
                zone: "us-west-2a",
                instance_types: Some(types.as_slice()),
                subnet_ids: &subnets(),
                security_group_id: Deferred::attr(
                    "c-eksCluster",
                    "vpcConfig.clusterSecurityGroupId",
                ),
                tags: None,
            },
            &lookup(),
        )
        .await
        .unwrap();
        assert_eq!(placement.subnet_ids, vec!["subnet-a", "subnet-c"]);
        assert!(graph.contains("gpu-placementGroup"));
        match &placement.network_interfaces {
            Deferred::List(interfaces) => {
                assert_eq!(interfaces.len(), 32);
                assert!(interfaces[1].as_known().is_none());
                if let Deferred::Object(fields) = &interfaces[1] {
                    assert_eq!(fields["interfaceType"], Deferred::from("efa-only"));
                    assert_eq!(fields["deviceIndex"], Deferred::from(1_i64));
                }
            }
            other => panic!("expected a list, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unsupported_zone_lists_the_supported_ones() {
        let types = vec!["p5.48xlarge".to_string()];
        let err = place(
            &mut Graph::new(),
            "gpu",
            &EfaRequest {
                zone: "us-west-2d",
                instance_types: Some(types.as_slice()),
                subnet_ids: &subnets(),
                security_group_id: Deferred::from("sg-1"),
                tags: None,
            },
            &lookup(),
        )
        .await
        .unwrap_err();
        let field = &err.invalid_fields()[0];
        assert_eq!(field.path, "placementGroupAvailabilityZone");
        assert!(field.reason.ends_with("Supported AZs: [us-west-2a, us-west-2b]"));
    }

    #[tokio::test]
    async fn default_instance_type_lacks_efa() {
        let err = place(
            &mut Graph::new(),
            "gpu",
            &EfaRequest {
                zone: "us-west-2a",
                instance_types: None,
                subnet_ids: &subnets(),
                security_group_id: Deferred::from("sg-1"),
                tags: None,
            },
            &lookup(),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.invalid_fields()[0].reason,
            "The selected instance type 't3.medium' does not support EFA."
        );
    }
}
