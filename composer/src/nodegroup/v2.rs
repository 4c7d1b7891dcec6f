//! Self-managed node groups built from a launch template and an auto scaling group that rolls
//! instances with instance refresh.

use super::{
    base64, capacity, instance_profile_name, key_name, recommended_image, render_user_data,
    root_volume, self_managed_user_data_spec, validate_base, worker_subnets, worker_tags,
    ImageChoice, WorkerSecurityGroup,
};
use crate::ami;
use crate::core_data::CoreData;
use crate::deferred::Deferred;
use crate::error::Result;
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::lookup::CloudLookup;
use crate::userdata::NodeGroupType;
use eks_model::constants::{DEFAULT_INSTANCE_TYPE, DEFAULT_MIN_REFRESH_PERCENTAGE};
use eks_model::NodeGroupV2Options;
use log::info;
use serde_json::{json, Value};

/// A composed v2 node group.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGroupV2 {
    pub node_security_group: Option<String>,
    pub node_security_group_id: Deferred,
    pub extra_node_security_group_ids: Vec<String>,
    pub launch_template: String,
    pub auto_scaling_group: String,
    pub auto_scaling_group_name: Deferred,
}

impl NodeGroupV2 {
    pub async fn compose(
        graph: &mut Graph,
        name: &str,
        core: &CoreData,
        options: &NodeGroupV2Options,
        lookup: &dyn CloudLookup,
    ) -> Result<Self> {
        let base = &options.base;
        let mut problems = validate_base(base);
        let os = problems.record(ami::operating_system(
            base.ami_type.as_deref(),
            base.operating_system,
            "",
        ));
        let profile = problems.record(instance_profile_name(base, core));
        let user_data_spec = os.map(|os| {
            self_managed_user_data_spec(core, os, NodeGroupType::SelfManagedV2, name, base)
        });
        if let (Some(spec), None) = (&user_data_spec, &base.node_user_data_override) {
            problems.extend(spec.validate(""));
        }
        problems.check(
            options
                .min_refresh_percentage
                .map_or(false, |p| !(0..=100).contains(&p)),
            "minRefreshPercentage",
            "minRefreshPercentage must be between 0 and 100",
        );
        let ((os, profile), user_data_spec) =
            problems.finish(os.zip(profile).zip(user_data_spec))?;

        let security_group = WorkerSecurityGroup::for_node_group(graph, name, core, base)?;
        let key_name = key_name(graph, name, base)?;

        let instance_type = base
            .instance_type
            .clone()
            .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string());
        let image_id = match &base.ami_id {
            Some(ami_id) => Deferred::from(ami_id),
            None => {
                recommended_image(
                    core,
                    &ImageChoice {
                        ami_type: base.ami_type.as_deref(),
                        operating_system: os,
                        gpu: base.gpu.unwrap_or(false),
                        instance_types: std::slice::from_ref(&instance_type),
                        instance_types_path: "instanceType",
                        version: base.version.as_deref(),
                    },
                    lookup,
                )
                .await?
            }
        };
        let user_data = match &base.node_user_data_override {
            Some(user_data) => Deferred::from(user_data),
            None => render_user_data(core, user_data_spec),
        };

        let metadata_options = match (&options.metadata_options, options.enable_imds_v2) {
            (Some(metadata_options), _) => Some(metadata_options.clone()),
            (None, Some(true)) => Some(json!({
                "httpTokens": "required",
                "httpPutResponseHopLimit": 2,
                "httpEndpoint": "enabled",
            })),
            (None, _) => None,
        };
        let block_devices = root_volume(base, os, true).map(|ebs| {
            json!([{ "deviceName": os.root_device_name(), "ebs": ebs }])
        });
        let network_interfaces = Deferred::list(vec![Deferred::object(vec![
            (
                "associatePublicIpAddress",
                Deferred::from(
                    base.node_associate_public_ip_address
                        .unwrap_or(true)
                        .to_string(),
                ),
            ),
            ("securityGroups", security_group.ids(base)),
        ])]);
        let market_options = base.spot_price.as_ref().map(|price| {
            json!({ "marketType": "spot", "spotOptions": { "maxPrice": price } })
        });

        let launch_template = format!("{}-launchTemplate", name);
        graph.add(
            ResourceNode::new(&launch_template, ResourceType::LaunchTemplate)
                .property("imageId", image_id)
                .property("instanceType", &instance_type)
                .property(
                    "iamInstanceProfile",
                    Deferred::object(vec![("name", profile)]),
                )
                .optional_property("keyName", key_name)
                .optional_property("instanceMarketOptions", market_options)
                .optional_property("blockDeviceMappings", block_devices)
                .property("networkInterfaces", network_interfaces)
                .optional_property("metadataOptions", metadata_options)
                .property("userData", base64(user_data))
                .optional_property(
                    "tagSpecifications",
                    options
                        .launch_template_tag_specifications
                        .clone()
                        .map(Value::Array),
                )
                .optional_property(
                    "monitoring",
                    base.enable_detailed_monitoring
                        .map(|enabled| json!({ "enabled": enabled })),
                )
                .depends_on(&core.cluster.node)
                .depends_on_all(security_group.nodes.iter().cloned()),
        )?;

        let (desired, min, max) = capacity(base);
        let min_refresh = options
            .min_refresh_percentage
            .unwrap_or(DEFAULT_MIN_REFRESH_PERCENTAGE);
        let tags: Vec<Value> = worker_tags(&core.cluster_name, base.auto_scaling_group_tags.as_ref())
            .into_iter()
            .map(|(key, value)| json!({ "key": key, "value": value, "propagateAtLaunch": true }))
            .collect();
        let mut group = ResourceNode::new(name, ResourceType::AutoScalingGroup)
            .property("minSize", min)
            .property("maxSize", max)
            .property("desiredCapacity", desired)
            .property(
                "launchTemplate",
                Deferred::object(vec![
                    ("name", Deferred::attr(&launch_template, "name")),
                    ("version", Deferred::attr(&launch_template, "latestVersion")),
                ]),
            )
            .property("vpcZoneIdentifiers", worker_subnets(base, core))
            .property(
                "instanceRefresh",
                json!({
                    "strategy": "Rolling",
                    "preferences": { "minHealthyPercentage": 100 - min_refresh },
                }),
            )
            .property("tags", Value::Array(tags))
            .optional_property("defaultInstanceWarmup", options.default_instance_warmup)
            .depends_on_all(core.node_prerequisites());
        if options.ignore_scaling_changes.unwrap_or(false) {
            group = group.ignore_changes(["desiredCapacity"]);
        }
        graph.add(group)?;
        info!(
            "Declared node group '{}' with {} to {} '{}' workers",
            name, min, max, instance_type
        );

        Ok(NodeGroupV2 {
            node_security_group: base
                .node_security_group_id
                .is_none()
                .then(|| format!("{}-nodeSecurityGroup", name)),
            node_security_group_id: security_group.id,
            extra_node_security_group_ids: base
                .extra_node_security_group_ids
                .clone()
                .unwrap_or_default(),
            launch_template,
            auto_scaling_group: name.to_string(),
            auto_scaling_group_name: Deferred::attr(name, "name"),
        })
    }
}
