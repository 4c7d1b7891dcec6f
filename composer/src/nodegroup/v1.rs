//! The deprecated self-managed node group: a launch configuration and an auto scaling group
//! declared in a CloudFormation stack. New node groups should use [`super::NodeGroupV2`]; this
//! path remains for existing stacks and for the cluster's default node group.

use super::{
    capacity, instance_profile_name, key_name, recommended_image, render_user_data, root_volume,
    self_managed_user_data_spec, validate_base, worker_subnets, worker_tags, ImageChoice,
    WorkerSecurityGroup,
};
use crate::ami;
use crate::core_data::CoreData;
use crate::deferred::{Deferred, Func};
use crate::error::Result;
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::lookup::CloudLookup;
use crate::userdata::NodeGroupType;
use eks_model::constants::DEFAULT_INSTANCE_TYPE;
use eks_model::{NodeGroupBaseOptions, NodeGroupOptions, OperatingSystem};
use log::{info, warn};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// A composed v1 node group.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGroup {
    /// The security group node, when this group declared its own.
    pub node_security_group: Option<String>,
    pub node_security_group_id: Deferred,
    pub extra_node_security_group_ids: Vec<String>,
    pub launch_configuration: String,
    pub cfn_stack: String,
    pub auto_scaling_group_name: Deferred,
}

impl NodeGroup {
    /// Declares a node group attached to `core`.
    pub async fn compose(
        graph: &mut Graph,
        name: &str,
        core: &CoreData,
        options: &NodeGroupOptions,
        lookup: &dyn CloudLookup,
    ) -> Result<Self> {
        warn!(
            "'{}' uses the deprecated CloudFormation node group, consider NodeGroupV2",
            name
        );
        compose(graph, name, core, &options.base, None, lookup).await
    }

    /// Declares the cluster's default node group in the cluster's node security group.
    pub(crate) async fn compose_default(
        graph: &mut Graph,
        core: &CoreData,
        lookup: &dyn CloudLookup,
    ) -> Result<Self> {
        let options = &core.node_group_options;
        let security_group = match options.node_security_group_id {
            Some(_) => None,
            None => Some(WorkerSecurityGroup::of_cluster(core)),
        };
        compose(graph, &core.name, core, options, security_group, lookup).await
    }
}

async fn compose(
    graph: &mut Graph,
    name: &str,
    core: &CoreData,
    options: &NodeGroupBaseOptions,
    security_group: Option<WorkerSecurityGroup>,
    lookup: &dyn CloudLookup,
) -> Result<NodeGroup> {
    let mut problems = validate_base(options);
    let os = problems.record(ami::operating_system(
        options.ami_type.as_deref(),
        options.operating_system,
        "",
    ));
    let profile = problems.record(instance_profile_name(options, core));
    let user_data_spec = os.map(|os| {
        self_managed_user_data_spec(core, os, NodeGroupType::SelfManagedV1, name, options)
    });
    if let (Some(spec), None) = (&user_data_spec, &options.node_user_data_override) {
        problems.extend(spec.validate(""));
    }
    let ((os, profile), user_data_spec) = problems.finish(os.zip(profile).zip(user_data_spec))?;

    let created_security_group = security_group.is_none();
    let security_group = match security_group {
        Some(group) => group,
        None => WorkerSecurityGroup::for_node_group(graph, name, core, options)?,
    };
    let key_name = key_name(graph, name, options)?;

    let instance_type = options
        .instance_type
        .clone()
        .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string());
    let image_id = match &options.ami_id {
        Some(ami_id) => Deferred::from(ami_id),
        None => {
            recommended_image(
                core,
                &ImageChoice {
                    ami_type: options.ami_type.as_deref(),
                    operating_system: os,
                    gpu: options.gpu.unwrap_or(false),
                    instance_types: std::slice::from_ref(&instance_type),
                    instance_types_path: "instanceType",
                    version: options.version.as_deref(),
                },
                lookup,
            )
            .await?
        }
    };
    let user_data = match &options.node_user_data_override {
        Some(user_data) => Deferred::from(user_data),
        None => render_user_data(core, user_data_spec),
    };

    let launch_configuration = format!("{}-nodeLaunchConfiguration", name);
    let mut node = ResourceNode::new(&launch_configuration, ResourceType::LaunchConfiguration)
        .property(
            "associatePublicIpAddress",
            options.node_associate_public_ip_address.unwrap_or(true),
        )
        .property("imageId", image_id)
        .property("instanceType", &instance_type)
        .property("iamInstanceProfile", profile)
        .optional_property("keyName", key_name)
        .property("securityGroups", security_group.ids(options))
        .optional_property("spotPrice", options.spot_price.clone())
        .property("userData", user_data)
        .optional_property("enableMonitoring", options.enable_detailed_monitoring)
        .depends_on(&core.cluster.node)
        .depends_on_all(security_group.nodes.iter().cloned());
    let ebs = root_volume(options, os, false);
    if os.resolve() == OperatingSystem::Bottlerocket {
        if let Some(mut ebs) = ebs {
            ebs.insert("deviceName".to_string(), json!(os.root_device_name()));
            node = node.property("ebsBlockDevices", json!([ebs]));
        }
    } else if let Some(ebs) = ebs {
        node = node.property("rootBlockDevice", Value::Object(ebs));
    }
    graph.add(node)?;

    let (desired, min, max) = capacity(options);
    let min_in_service = if options.spot_price.is_some() { 0 } else { 1 };
    let tags: Vec<Value> = worker_tags(&core.cluster_name, options.auto_scaling_group_tags.as_ref())
        .into_iter()
        .map(|(key, value)| json!({ "Key": key, "Value": value, "PropagateAtLaunch": "true" }))
        .collect();
    let template = Deferred::object(vec![
        ("AWSTemplateFormatVersion", Deferred::from("2010-09-09")),
        (
            "Outputs",
            Deferred::known(json!({ "NodeGroup": { "Value": { "Ref": "NodeGroup" } } })),
        ),
        (
            "Resources",
            Deferred::object(vec![(
                "NodeGroup",
                Deferred::object(vec![
                    (
                        "Type",
                        Deferred::from("AWS::AutoScaling::AutoScalingGroup"),
                    ),
                    (
                        "Properties",
                        Deferred::object(vec![
                            ("DesiredCapacity", Deferred::from(desired)),
                            (
                                "LaunchConfigurationName",
                                Deferred::attr(&launch_configuration, "id"),
                            ),
                            ("MinSize", Deferred::from(min)),
                            ("MaxSize", Deferred::from(max)),
                            (
                                "VPCZoneIdentifier",
                                Deferred::from(worker_subnets(options, core)),
                            ),
                            ("Tags", Deferred::known(Value::Array(tags))),
                        ]),
                    ),
                    (
                        "UpdatePolicy",
                        Deferred::known(json!({
                            "AutoScalingRollingUpdate": {
                                "MinInstancesInService": min_in_service.to_string(),
                                "MaxBatchSize": "1",
                            }
                        })),
                    ),
                ]),
            )]),
        ),
    ]);

    let cfn_stack = format!("{}-nodes", name);
    let mut stack_tags = BTreeMap::new();
    stack_tags.insert("Name".to_string(), cfn_stack.clone());
    stack_tags.extend(options.cloud_formation_tags.clone().unwrap_or_default());
    stack_tags.extend(core.tags.clone());
    graph.add(
        ResourceNode::new(&cfn_stack, ResourceType::CloudFormationStack)
            .property("name", name)
            .property("templateBody", Deferred::apply(Func::ToYaml, vec![template]))
            .property("tags", stack_tags)
            .depends_on_all(core.node_prerequisites()),
    )?;
    info!(
        "Declared node group '{}' with {} to {} '{}' workers",
        name, min, max, instance_type
    );

    Ok(NodeGroup {
        node_security_group: created_security_group
            .then(|| format!("{}-nodeSecurityGroup", name)),
        node_security_group_id: security_group.id,
        extra_node_security_group_ids: options
            .extra_node_security_group_ids
            .clone()
            .unwrap_or_default(),
        launch_configuration,
        auto_scaling_group_name: Deferred::attr(&cfn_stack, "outputs.NodeGroup"),
        cfn_stack,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nodegroup::test_support;
    use crate::deferred::RealizedState;
    use test_support::TestLookup;

    #[tokio::test]
    async fn default_node_group_uses_the_cluster_security_group() {
        let core = test_support::core();
        let mut graph = Graph::new();
        let group = NodeGroup::compose_default(&mut graph, &core, &TestLookup::default())
            .await
            .unwrap();
        assert!(group.node_security_group.is_none());
        assert!(!graph.contains("c-nodeSecurityGroup"));

        let lc = graph.get("c-nodeLaunchConfiguration").unwrap();
        assert_eq!(lc.get("imageId"), Some(&Deferred::from("ami-recommended")));
        assert_eq!(lc.get("instanceType"), Some(&Deferred::from("t3.medium")));
        assert!(lc.dependencies().contains("c-eksClusterIngressRule"));

        let stack = graph.get("c-nodes").unwrap();
        assert!(stack.dependencies().contains("c-nodeAccess"));
        assert!(stack.dependencies().contains("c-vpc-cni"));
        assert!(stack.dependencies().contains("c-nodeLaunchConfiguration"));

        let realized = RealizedState::new()
            .with_resource("c-nodeLaunchConfiguration", json!({ "id": "lc-1" }));
        let body = stack.get("templateBody").unwrap().evaluate(&realized).unwrap();
        let template: Value = serde_yaml::from_str(body.as_str().unwrap()).unwrap();
        let properties = &template["Resources"]["NodeGroup"]["Properties"];
        assert_eq!(properties["DesiredCapacity"], 2);
        assert_eq!(properties["MinSize"], 1);
        assert_eq!(properties["MaxSize"], 2);
        assert_eq!(properties["LaunchConfigurationName"], "lc-1");
        assert_eq!(properties["VPCZoneIdentifier"], json!(["subnet-b"]));
        assert!(properties["Tags"]
            .as_array()
            .unwrap()
            .contains(&json!({ "Key": "Name", "Value": "c-eksCluster-worker", "PropagateAtLaunch": "true" })));
        assert_eq!(
            group.auto_scaling_group_name,
            Deferred::attr("c-nodes", "outputs.NodeGroup")
        );
    }

    #[tokio::test]
    async fn standalone_group_declares_its_own_security_group_and_key() {
        let core = test_support::core();
        let mut graph = Graph::new();
        let options = NodeGroupOptions {
            base: NodeGroupBaseOptions {
                ami_id: Some("ami-custom".to_string()),
                node_public_key: Some("ssh-ed25519 AAAA".to_string()),
                spot_price: Some("0.1".to_string()),
                ..NodeGroupBaseOptions::default()
            },
        };
        let group = NodeGroup::compose(&mut graph, "ng", &core, &options, &TestLookup::default())
            .await
            .unwrap();
        assert_eq!(group.node_security_group.as_deref(), Some("ng-nodeSecurityGroup"));
        assert!(graph.contains("ng-eksClusterIngressRule"));
        assert!(graph.contains("ng-keyPair"));
        let lc = graph.get("ng-nodeLaunchConfiguration").unwrap();
        assert_eq!(lc.get("keyName"), Some(&Deferred::attr("ng-keyPair", "keyName")));
        assert_eq!(lc.get("imageId"), Some(&Deferred::from("ami-custom")));
    }

    #[tokio::test]
    async fn missing_instance_profile_is_reported() {
        let mut core = test_support::core();
        core.default_instance_profile_name = None;
        let err = NodeGroup::compose(
            &mut Graph::new(),
            "ng",
            &core,
            &NodeGroupOptions::default(),
            &TestLookup::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.invalid_fields()[0].path, "instanceProfileName");
    }
}
