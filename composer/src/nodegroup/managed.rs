//! EKS managed node groups.
//!
//! EKS provides a default launch template for managed node groups. When any option has to reach
//! the instances directly (extra kubelet arguments, a custom image, IMDSv2, EFA) a launch
//! template is generated instead, and the options EKS refuses alongside a custom image are
//! dropped from the node group.

use super::efa::{self, EfaRequest};
use super::{base64, recommended_image, render_user_data, ImageChoice};
use crate::ami;
use crate::core_data::CoreData;
use crate::deferred::Deferred;
use crate::error::{Problems, Result};
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::lookup::CloudLookup;
use crate::userdata::{NodeGroupType, UserDataSpec};
use eks_model::{ManagedNodeGroupOptions, OperatingSystem, Taint};
use log::info;
use serde_json::json;
use std::collections::BTreeMap;

/// Options that can only be honored through generated user data.
const CUSTOM_USER_DATA_ARGS: [&str; 4] = [
    "kubeletExtraArgs",
    "bootstrapExtraArgs",
    "bottlerocketSettings",
    "nodeadmExtraOptions",
];

/// Options that can only be honored through a generated launch template.
const CUSTOM_LAUNCH_TEMPLATE_ARGS: [&str; 8] = [
    "kubeletExtraArgs",
    "bootstrapExtraArgs",
    "bottlerocketSettings",
    "nodeadmExtraOptions",
    "enableIMDSv2",
    "userData",
    "amiId",
    "enableEfaSupport",
];

/// A composed managed node group.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedNodeGroup {
    pub node_group: String,
    pub node_group_name: Deferred,
    /// The generated launch template, if one was needed.
    pub launch_template: Option<String>,
    /// The placement group name of an EFA node group.
    pub placement_group_name: Option<Deferred>,
}

fn requires_custom_user_data(options: &ManagedNodeGroupOptions) -> bool {
    options.kubelet_extra_args.is_some()
        || options.bootstrap_extra_args.is_some()
        || options.bottlerocket_settings.is_some()
        || options.nodeadm_extra_options.is_some()
}

/// The role ARN of the node group, validating how the role was given.
fn node_role_arn(
    graph: &Graph,
    core: &CoreData,
    options: &ManagedNodeGroupOptions,
    problems: &mut Problems,
) -> Option<Deferred> {
    problems.check(
        options.node_role.is_some() && options.node_role_arn.is_some(),
        "nodeRole",
        "You cannot specify both nodeRole and nodeRoleArn when creating a managed node group.",
    );
    let arn = match (&options.node_role_arn, &options.node_role) {
        (Some(arn), _) => Deferred::from(arn),
        (None, Some(role)) => {
            if !graph.contains(role) {
                problems.push(
                    "nodeRole",
                    format!("nodeRole '{}' is not a role of this composition", role),
                );
                return None;
            }
            Deferred::attr(role, "arn")
        }
        (None, None) => {
            problems.push(
                "nodeRole",
                "An IAM role, or role ARN must be provided to create a managed node group",
            );
            return None;
        }
    };
    // Access entries can be created out of band, only aws-auth needs the role up front.
    problems.check(
        !core.auth_mode.supports_access_entries()
            && !core.has_instance_role(
                options.node_role_arn.as_deref(),
                options.node_role.as_deref(),
            ),
        "nodeRole",
        "A managed node group cannot be created without first setting its role in the cluster's \
         instanceRoles",
    );
    Some(arn)
}

fn validate(options: &ManagedNodeGroupOptions) -> Problems {
    let mut problems = Problems::new();
    for (key, set) in [("gpu", options.gpu.is_some()), ("amiType", options.ami_type.is_some())] {
        problems.check(
            options.ami_id.is_some() && set,
            "amiId",
            format!(
                "You cannot specify both amiId and {} when creating a managed node group.",
                key
            ),
        );
    }
    problems.check(
        options.enable_efa_support.unwrap_or(false)
            && options.placement_group_availability_zone.is_none(),
        "enableEfaSupport",
        "You must specify placementGroupAvailabilityZone when enabling EFA support.",
    );
    problems.check(
        options.launch_template.is_some() && options.needs_custom_launch_template(),
        "launchTemplate",
        format!(
            "If you provide a custom launch template, you cannot provide any of {}. Please \
             include these in the launch template that you are providing.",
            CUSTOM_LAUNCH_TEMPLATE_ARGS.join(", ")
        ),
    );
    problems.check(
        options.user_data.is_some() && requires_custom_user_data(options),
        "userData",
        format!(
            "If you provide custom userData, you cannot provide any of {}. Please include these \
             in the userData that you are providing.",
            CUSTOM_USER_DATA_ARGS.join(", ")
        ),
    );
    problems
}

/// Subnets of the node group: its own, else every cluster subnet, else the private ones, else
/// the public ones.
fn subnets(options: &ManagedNodeGroupOptions, core: &CoreData) -> Vec<String> {
    if let Some(subnet_ids) = &options.subnet_ids {
        return subnet_ids.clone();
    }
    [
        &core.subnet_ids,
        &core.private_subnet_ids,
        &core.public_subnet_ids,
    ]
    .into_iter()
    .find(|ids| !ids.is_empty())
    .cloned()
    .unwrap_or_default()
}

fn user_data_spec(
    core: &CoreData,
    os: OperatingSystem,
    options: &ManagedNodeGroupOptions,
) -> UserDataSpec {
    let mut spec = UserDataSpec::new(os, NodeGroupType::Managed, &core.cluster_name);
    spec.kubelet_extra_args = options.kubelet_extra_args.clone();
    spec.bootstrap_extra_args = options.bootstrap_extra_args.clone();
    spec.labels = options.labels.clone().unwrap_or_default();
    spec.taints = options
        .taints
        .iter()
        .flatten()
        .map(|taint| {
            (
                taint.key.clone(),
                Taint {
                    value: taint.value.clone().unwrap_or_default(),
                    effect: taint.effect.into(),
                },
            )
        })
        .collect::<BTreeMap<_, _>>();
    spec.bottlerocket_settings = options.bottlerocket_settings.clone();
    spec.nodeadm_extra_options = options.nodeadm_extra_options.clone().unwrap_or_default();
    spec
}

impl ManagedNodeGroup {
    pub async fn compose(
        graph: &mut Graph,
        name: &str,
        core: &CoreData,
        options: &ManagedNodeGroupOptions,
        lookup: &dyn CloudLookup,
    ) -> Result<Self> {
        let mut problems = validate(options);
        let role_arn = node_role_arn(graph, core, options, &mut problems);
        let os = problems.record(ami::operating_system(
            options.ami_type.as_deref(),
            options.operating_system,
            "",
        ));
        let custom_user_data = requires_custom_user_data(options);
        let needs_user_data =
            custom_user_data || options.user_data.is_some() || options.ami_id.is_some();
        let spec = os.map(|os| user_data_spec(core, os, options));
        if let (Some(spec), true) = (&spec, custom_user_data) {
            problems.extend(spec.validate(""));
        }
        let ((role_arn, os), spec) = problems.finish(role_arn.zip(os).zip(spec))?;

        let mut subnet_ids = subnets(options, core);
        let instance_types = options.instance_types.clone().unwrap_or_default();

        let placement = match (
            options.enable_efa_support.unwrap_or(false),
            &options.placement_group_availability_zone,
        ) {
            (true, Some(zone)) => {
                let placement = efa::place(
                    graph,
                    name,
                    &EfaRequest {
                        zone,
                        instance_types: options.instance_types.as_deref(),
                        subnet_ids: &subnet_ids,
                        security_group_id: core.cluster.cluster_security_group_id.clone(),
                        tags: options.tags.as_ref(),
                    },
                    lookup,
                )
                .await?;
                subnet_ids = placement.subnet_ids.clone();
                Some(placement)
            }
            _ => None,
        };

        let launch_template = if options.needs_custom_launch_template() {
            let user_data = if needs_user_data {
                Some(base64(match &options.user_data {
                    Some(user_data) => Deferred::from(user_data),
                    None => render_user_data(core, spec),
                }))
            } else {
                None
            };
            let image_id = match (&user_data, &options.ami_id) {
                (None, _) => None,
                (Some(_), Some(ami_id)) => Some(Deferred::from(ami_id)),
                (Some(_), None) => Some(
                    recommended_image(
                        core,
                        &ImageChoice {
                            ami_type: options.ami_type.as_deref(),
                            operating_system: os,
                            gpu: options.gpu.unwrap_or(false),
                            instance_types: &instance_types,
                            instance_types_path: "instanceTypes",
                            version: options.version.as_deref(),
                        },
                        lookup,
                    )
                    .await?,
                ),
            };
            let metadata_options = options.enable_imds_v2.map(|enabled| {
                json!({
                    "httpTokens": if enabled { "required" } else { "optional" },
                    "httpPutResponseHopLimit": 2,
                    "httpEndpoint": "enabled",
                })
            });
            let block_devices = options.disk_size.map(|size| {
                json!([{ "deviceName": os.root_device_name(), "ebs": { "volumeSize": size } }])
            });

            let node = format!("{}-launchTemplate", name);
            graph.add(
                ResourceNode::new(&node, ResourceType::LaunchTemplate)
                    .optional_property("blockDeviceMappings", block_devices)
                    .optional_property("userData", user_data)
                    .optional_property("metadataOptions", metadata_options)
                    .optional_property("imageId", image_id)
                    .optional_property(
                        "placement",
                        placement.as_ref().map(|p| {
                            Deferred::object(vec![("groupName", p.placement_group_name.clone())])
                        }),
                    )
                    .optional_property(
                        "networkInterfaces",
                        placement.as_ref().map(|p| p.network_interfaces.clone()),
                    ),
            )?;
            Some(node)
        } else {
            None
        };

        // EKS refuses a version, release or AMI type next to a custom image.
        let (ami_type, version, release_version) = if needs_user_data {
            (None, None, None)
        } else {
            let ami_type = match (&options.ami_type, options.operating_system) {
                (Some(ami_type), _) => Some(ami_type.clone()),
                (None, Some(_)) => Some(
                    ami::determine_ami_type(
                        os,
                        options.gpu.unwrap_or(false),
                        &instance_types,
                        "instanceTypes",
                    )?
                    .to_string(),
                ),
                (None, None) => None,
            };
            let version = match (&options.version, &options.launch_template) {
                (Some(version), _) => Some(Deferred::from(version)),
                (None, None) => Some(core.cluster.version.clone()),
                (None, Some(_)) => None,
            };
            (ami_type, version, options.release_version.clone())
        };

        let launch_template_ref = match (&launch_template, &options.launch_template) {
            (Some(node), _) => Some(Deferred::object(vec![
                ("id", Deferred::attr(node, "id")),
                (
                    "version",
                    Deferred::format("{}", vec![Deferred::attr(node, "latestVersion")]),
                ),
            ])),
            (None, Some(template)) => Some(Deferred::from_serialize("launchTemplate", template)?),
            (None, None) => None,
        };
        let taints = match &options.taints {
            Some(taints) => Some(Deferred::from_serialize("taints", taints)?),
            None => None,
        };
        let scaling_config = options.scaling_config.unwrap_or_default();

        let mut node_group = ResourceNode::new(name, ResourceType::NodeGroup)
            .property("clusterName", core.cluster.name.clone())
            .optional_property("nodeGroupName", options.node_group_name.clone())
            .optional_property("nodeGroupNamePrefix", options.node_group_name_prefix.clone())
            .property("nodeRoleArn", role_arn)
            .property(
                "scalingConfig",
                Deferred::from_serialize("scalingConfig", &scaling_config)?,
            )
            .property("subnetIds", subnet_ids)
            .optional_property("instanceTypes", options.instance_types.clone())
            .optional_property("capacityType", options.capacity_type.clone())
            .optional_property("labels", options.labels.as_ref())
            .optional_property("taints", taints)
            .optional_property("amiType", ami_type)
            .optional_property("releaseVersion", release_version)
            .optional_property("version", version)
            .optional_property("forceUpdateVersion", options.force_update_version)
            .optional_property("launchTemplate", launch_template_ref)
            .optional_property("remoteAccess", options.remote_access.clone())
            .optional_property("updateConfig", options.update_config.clone())
            .optional_property("tags", options.tags.as_ref())
            .depends_on_all(core.aws_auth.iter().cloned())
            .depends_on_all(core.security_groups.cluster_ingress_rule.iter().cloned());
        if launch_template.is_none() {
            node_group = node_group.optional_property("diskSize", options.disk_size);
        }
        if options.ignore_scaling_changes.unwrap_or(false) {
            node_group = node_group.ignore_changes(["scalingConfig.desiredSize"]);
        }
        graph.add(node_group)?;
        info!(
            "Declared managed node group '{}'{}",
            name,
            launch_template
                .as_ref()
                .map(|lt| format!(" with launch template '{}'", lt))
                .unwrap_or_default()
        );

        Ok(ManagedNodeGroup {
            node_group: name.to_string(),
            node_group_name: Deferred::attr(name, "nodeGroupName"),
            launch_template,
            placement_group_name: placement.map(|p| p.placement_group_name),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nodegroup::test_support::{self, subnet, TestLookup};
    use crate::lookup::InstanceTypeInfo;
    use eks_model::{AuthenticationMode, LaunchTemplateRef, ManagedTaint, ManagedTaintEffect};
    use maplit::btreemap;

    fn with_role() -> ManagedNodeGroupOptions {
        ManagedNodeGroupOptions {
            node_role: Some("c-instanceRole".to_string()),
            ..ManagedNodeGroupOptions::default()
        }
    }

    fn graph_with_role() -> Graph {
        let mut graph = Graph::new();
        graph
            .add(ResourceNode::new("c-instanceRole", ResourceType::Role))
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn default_launch_template_keeps_version_and_disk() {
        let core = test_support::core();
        let mut graph = graph_with_role();
        let options = ManagedNodeGroupOptions {
            disk_size: Some(50),
            ignore_scaling_changes: Some(true),
            ..with_role()
        };
        let group =
            ManagedNodeGroup::compose(&mut graph, "mng", &core, &options, &TestLookup::default())
                .await
                .unwrap();
        assert!(group.launch_template.is_none());
        let node = graph.get("mng").unwrap();
        assert_eq!(node.get("diskSize"), Some(&Deferred::from(50_i64)));
        assert_eq!(node.get("version"), Some(&core.cluster.version));
        assert_eq!(
            node.get("subnetIds").unwrap().as_known().unwrap(),
            json!(["subnet-a", "subnet-b"])
        );
        assert_eq!(
            node.get("scalingConfig").unwrap().as_known().unwrap(),
            json!({ "desiredSize": 2, "minSize": 1, "maxSize": 2 })
        );
        assert!(node.dependencies().contains("c-nodeAccess"));
        assert!(node.dependencies().contains("c-instanceRole"));
    }

    #[tokio::test]
    async fn waits_for_the_cluster_ingress_rule() {
        let core = test_support::core();
        let mut graph = graph_with_role();
        ManagedNodeGroup::compose(&mut graph, "mng", &core, &with_role(), &TestLookup::default())
            .await
            .unwrap();
        let dependencies = graph.get("mng").unwrap().dependencies();
        assert!(dependencies.contains("c-eksCluster"));
        assert!(dependencies.contains("c-eksClusterIngressRule"));
    }

    #[tokio::test]
    async fn kubelet_args_generate_a_launch_template() {
        let core = test_support::core();
        let mut graph = graph_with_role();
        let options = ManagedNodeGroupOptions {
            kubelet_extra_args: Some("--max-pods=110".to_string()),
            disk_size: Some(80),
            enable_imds_v2: Some(false),
            version: Some("1.29".to_string()),
            taints: Some(vec![ManagedTaint {
                key: "dedicated".to_string(),
                value: Some("batch".to_string()),
                effect: ManagedTaintEffect::NoSchedule,
            }]),
            ..with_role()
        };
        let group =
            ManagedNodeGroup::compose(&mut graph, "mng", &core, &options, &TestLookup::default())
                .await
                .unwrap();
        assert_eq!(group.launch_template.as_deref(), Some("mng-launchTemplate"));

        let template = graph.get("mng-launchTemplate").unwrap();
        assert_eq!(
            template.get("imageId"),
            Some(&Deferred::from("ami-recommended"))
        );
        assert_eq!(
            template.get("metadataOptions").unwrap().as_known().unwrap()["httpTokens"],
            "optional"
        );
        assert_eq!(
            template.get("blockDeviceMappings").unwrap().as_known().unwrap(),
            json!([{ "deviceName": "/dev/xvda", "ebs": { "volumeSize": 80 } }])
        );
        assert!(template.get("userData").is_some());

        let node = graph.get("mng").unwrap();
        assert!(node.get("diskSize").is_none());
        assert!(node.get("version").is_none());
        assert!(node.get("amiType").is_none());
        assert!(node.dependencies().contains("mng-launchTemplate"));
        assert_eq!(
            node.get("taints").unwrap().as_known().unwrap(),
            json!([{ "key": "dedicated", "value": "batch", "effect": "NO_SCHEDULE" }])
        );
    }

    #[tokio::test]
    async fn operating_system_picks_the_ami_type() {
        let core = test_support::core();
        let mut graph = graph_with_role();
        let options = ManagedNodeGroupOptions {
            operating_system: Some(OperatingSystem::Bottlerocket),
            instance_types: Some(vec!["m7g.large".to_string()]),
            ..with_role()
        };
        ManagedNodeGroup::compose(&mut graph, "mng", &core, &options, &TestLookup::default())
            .await
            .unwrap();
        assert_eq!(
            graph.get("mng").unwrap().get("amiType"),
            Some(&Deferred::from("BOTTLEROCKET_ARM_64"))
        );
    }

    #[tokio::test]
    async fn config_map_mode_requires_a_known_role() {
        let mut core = test_support::core();
        core.auth_mode = AuthenticationMode::ConfigMap;
        let options = ManagedNodeGroupOptions {
            node_role_arn: Some("arn:aws:iam::1:role/elsewhere".to_string()),
            ..ManagedNodeGroupOptions::default()
        };
        let err = ManagedNodeGroup::compose(
            &mut Graph::new(),
            "mng",
            &core,
            &options,
            &TestLookup::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.invalid_fields()[0].reason,
            "A managed node group cannot be created without first setting its role in the \
             cluster's instanceRoles"
        );

        // Access entries can grant the role later.
        core.auth_mode = AuthenticationMode::Api;
        assert!(ManagedNodeGroup::compose(
            &mut Graph::new(),
            "mng",
            &core,
            &options,
            &TestLookup::default(),
        )
        .await
        .is_ok());
    }

    #[tokio::test]
    async fn custom_launch_template_conflicts() {
        let core = test_support::core();
        let options = ManagedNodeGroupOptions {
            launch_template: Some(LaunchTemplateRef {
                id: Some("lt-1".to_string()),
                name: None,
                version: "3".to_string(),
            }),
            user_data: Some("#!/bin/bash".to_string()),
            kubelet_extra_args: Some("--max-pods=20".to_string()),
            ..with_role()
        };
        let err = ManagedNodeGroup::compose(
            &mut graph_with_role(),
            "mng",
            &core,
            &options,
            &TestLookup::default(),
        )
        .await
        .unwrap_err();
        let paths: Vec<&str> = err
            .invalid_fields()
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(paths, vec!["launchTemplate", "userData"]);
    }

    #[tokio::test]
    async fn missing_role_is_reported() {
        let err = ManagedNodeGroup::compose(
            &mut Graph::new(),
            "mng",
            &test_support::core(),
            &ManagedNodeGroupOptions::default(),
            &TestLookup::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.invalid_fields()[0].path, "nodeRole");
    }

    #[tokio::test]
    async fn efa_groups_are_placed_in_one_zone() {
        let core = test_support::core();
        let mut graph = graph_with_role();
        let lookup = TestLookup {
            subnets: vec![subnet("subnet-a", "us-west-2a"), subnet("subnet-b", "us-west-2b")],
            instance_types: btreemap! {
                "p5.48xlarge".to_string() => InstanceTypeInfo {
                    instance_type: "p5.48xlarge".to_string(),
                    efa_supported: true,
                    maximum_network_cards: 2,
                    availability_zones: vec!["us-west-2b".to_string()],
                },
            },
        };
        let options = ManagedNodeGroupOptions {
            enable_efa_support: Some(true),
            placement_group_availability_zone: Some("us-west-2b".to_string()),
            instance_types: Some(vec!["p5.48xlarge".to_string()]),
            ..with_role()
        };
        let group = ManagedNodeGroup::compose(&mut graph, "efa", &core, &options, &lookup)
            .await
            .unwrap();
        assert_eq!(
            group.placement_group_name,
            Some(Deferred::attr("efa-placementGroup", "name"))
        );
        let template = graph.get("efa-launchTemplate").unwrap();
        assert!(template.get("userData").is_none());
        assert!(template.get("imageId").is_none());
        assert!(template.dependencies().contains("efa-placementGroup"));
        assert!(template.dependencies().contains("c-eksCluster"));
        assert_eq!(
            graph.get("efa").unwrap().get("subnetIds").unwrap().as_known().unwrap(),
            json!(["subnet-b"])
        );
    }

    #[tokio::test]
    async fn efa_requires_a_zone() {
        let options = ManagedNodeGroupOptions {
            enable_efa_support: Some(true),
            ..with_role()
        };
        let err = ManagedNodeGroup::compose(
            &mut graph_with_role(),
            "efa",
            &test_support::core(),
            &options,
            &TestLookup::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.invalid_fields()[0].path, "enableEfaSupport");
    }
}
