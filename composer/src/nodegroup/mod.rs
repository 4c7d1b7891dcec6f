//! Worker node groups.
//!
//! Three kinds of node group attach to a composed cluster:
//!
//! * [`NodeGroup`], the deprecated self-managed group whose auto scaling group lives in a
//!   CloudFormation stack. The cluster's default node group is one of these.
//! * [`NodeGroupV2`], a self-managed group built from a launch template and an auto scaling group
//!   with instance refresh.
//! * [`ManagedNodeGroup`], an EKS managed node group, optionally with a launch template generated
//!   from its options.
//!
//! All of them share user data assembly, subnet selection and IAM wiring.

mod efa;
mod managed;
mod v1;
mod v2;

pub use managed::ManagedNodeGroup;
pub use v1::NodeGroup;
pub use v2::NodeGroupV2;

use crate::ami;
use crate::core_data::CoreData;
use crate::deferred::{Deferred, Func};
use crate::error::{InvalidField, Problems, Result};
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::lookup::CloudLookup;
use crate::security_group::{NodeGroupSecurityGroup, NodeGroupSecurityGroupArgs};
use crate::userdata::{NodeGroupType, UserDataSpec};
use eks_model::constants::{
    DEFAULT_DESIRED_CAPACITY, DEFAULT_MAX_SIZE, DEFAULT_MIN_SIZE, DEFAULT_ROOT_VOLUME_SIZE,
};
use eks_model::{K8sVersion, NodeGroupBaseOptions, OperatingSystem};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// The security group workers of a self-managed group run in, and the rule that lets them reach
/// the API server.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WorkerSecurityGroup {
    pub id: Deferred,
    pub ingress_rule_id: Deferred,
    /// Nodes the workers wait for: the security group and its ingress rule, when composed.
    pub nodes: Vec<String>,
}

impl WorkerSecurityGroup {
    /// The node security group of the cluster itself.
    pub(crate) fn of_cluster(core: &CoreData) -> Self {
        let groups = &core.security_groups;
        Self {
            id: groups.node_security_group_id.clone(),
            ingress_rule_id: groups.cluster_ingress_rule_id.clone(),
            nodes: groups
                .node_security_group
                .iter()
                .chain(groups.cluster_ingress_rule.iter())
                .cloned()
                .collect(),
        }
    }

    /// The group named by the options, or a new one for this node group.
    pub(crate) fn for_node_group(
        graph: &mut Graph,
        name: &str,
        core: &CoreData,
        options: &NodeGroupBaseOptions,
    ) -> Result<Self> {
        if let Some(id) = &options.node_security_group_id {
            if !core.node_security_group_tags.is_empty()
                && core.security_groups.node_security_group_id.as_str() != Some(id.as_str())
            {
                return Err(InvalidField::new(
                    "nodeSecurityGroupId",
                    "The NodeGroup's nodeSecurityGroup and the cluster option \
                     nodeSecurityGroupTags are mutually exclusive. Choose a single approach",
                )
                .into());
            }
            return Ok(Self {
                id: Deferred::from(id),
                ingress_rule_id: Deferred::from(
                    options.cluster_ingress_rule_id.clone().unwrap_or_default(),
                ),
                nodes: Vec::new(),
            });
        }

        let mut tags = core.node_security_group_tags.clone();
        tags.extend(core.tags.clone());
        let group = NodeGroupSecurityGroup::compose(
            graph,
            name,
            &NodeGroupSecurityGroupArgs {
                vpc_id: Deferred::from(&core.vpc_id),
                cluster_security_group_id: core.security_groups.cluster_security_group_id.clone(),
                cluster_name: core.cluster_name.clone(),
                tags,
            },
        )?;
        Ok(Self {
            id: group.security_group_id,
            ingress_rule_id: group.cluster_ingress_rule_id,
            nodes: vec![group.security_group, group.cluster_ingress_rule],
        })
    }

    /// The security group ids of a worker: this group followed by any extra groups.
    pub(crate) fn ids(&self, options: &NodeGroupBaseOptions) -> Deferred {
        let mut ids = vec![self.id.clone()];
        ids.extend(
            options
                .extra_node_security_group_ids
                .iter()
                .flatten()
                .map(Deferred::from),
        );
        Deferred::list(ids)
    }
}

/// Reports the option combinations no self-managed node group accepts.
pub(crate) fn validate_base(options: &NodeGroupBaseOptions) -> Problems {
    let mut problems = Problems::new();
    problems.check(
        options.node_public_key.is_some() && options.key_name.is_some(),
        "nodePublicKey",
        "nodePublicKey and keyName are mutually exclusive. Choose a single approach",
    );
    problems.check(
        options.ami_id.is_some() && options.gpu.unwrap_or(false),
        "amiId",
        "amiId and gpu are mutually exclusive.",
    );
    problems.check(
        options.node_user_data_override.is_some()
            && (options.node_user_data.is_some()
                || options.labels.is_some()
                || options.taints.is_some()
                || options.kubelet_extra_args.is_some()
                || options.bootstrap_extra_args.is_some()),
        "nodeUserDataOverride",
        "nodeUserDataOverride and any combination of {nodeUserData, labels, taints, \
         kubeletExtraArgs, or bootstrapExtraArgs} is mutually exclusive.",
    );
    problems.check(
        options.node_security_group_id.is_some() && options.cluster_ingress_rule_id.is_none(),
        "clusterIngressRuleId",
        "clusterIngressRuleId is required when nodeSecurityGroupId is manually specified",
    );

    let volume_type = options.node_root_volume_type.as_deref();
    problems.check(
        options.node_root_volume_iops.is_some() && volume_type != Some("io1"),
        "nodeRootVolumeIops",
        "Cannot create a cluster node root volume of non-io1 type with provisioned IOPS \
         (nodeRootVolumeIops).",
    );
    problems.check(
        options.node_root_volume_throughput.is_some() && volume_type != Some("gp3"),
        "nodeRootVolumeThroughput",
        "Cannot create a cluster node root volume of non-gp3 type with provisioned throughput \
         (nodeRootVolumeThroughput).",
    );
    problems
}

/// Worker subnets: the node group's own, else the cluster's node subnets.
pub(crate) fn worker_subnets(options: &NodeGroupBaseOptions, core: &CoreData) -> Vec<String> {
    options
        .node_subnet_ids
        .clone()
        .unwrap_or_else(|| core.node_subnet_ids.clone())
}

/// `(desired, min, max)` capacity of a self-managed group.
pub(crate) fn capacity(options: &NodeGroupBaseOptions) -> (i64, i64, i64) {
    (
        options
            .desired_capacity
            .unwrap_or(DEFAULT_DESIRED_CAPACITY),
        options.min_size.unwrap_or(DEFAULT_MIN_SIZE),
        options.max_size.unwrap_or(DEFAULT_MAX_SIZE),
    )
}

/// Tags every self-managed worker carries. The `Name` tag is how external tooling maps workers
/// back to their cluster.
pub(crate) fn worker_tags(
    cluster_name: &str,
    extra: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("Name".to_string(), format!("{}-worker", cluster_name));
    tags.insert(
        format!("kubernetes.io/cluster/{}", cluster_name),
        "owned".to_string(),
    );
    tags.extend(extra.cloned().unwrap_or_default());
    tags
}

/// Declares an EC2 key pair for `nodePublicKey`. Returns the key name instances use.
pub(crate) fn key_name(
    graph: &mut Graph,
    name: &str,
    options: &NodeGroupBaseOptions,
) -> Result<Option<Deferred>> {
    match &options.node_public_key {
        Some(public_key) => {
            let node = format!("{}-keyPair", name);
            graph.add(
                ResourceNode::new(&node, ResourceType::KeyPair).property("publicKey", public_key),
            )?;
            Ok(Some(Deferred::attr(&node, "keyName")))
        }
        None => Ok(options.key_name.as_ref().map(Deferred::from)),
    }
}

/// The instance profile of a self-managed group: its own, else the cluster's.
pub(crate) fn instance_profile_name(
    options: &NodeGroupBaseOptions,
    core: &CoreData,
) -> std::result::Result<Deferred, InvalidField> {
    options
        .instance_profile_name
        .as_ref()
        .map(Deferred::from)
        .or_else(|| core.default_instance_profile_name.clone())
        .ok_or_else(|| {
            InvalidField::new(
                "instanceProfileName",
                "an instanceProfile or instanceProfileName is required",
            )
        })
}

/// The user data spec of a self-managed worker.
pub(crate) fn self_managed_user_data_spec(
    core: &CoreData,
    os: OperatingSystem,
    node_group_type: NodeGroupType,
    stack_name: &str,
    options: &NodeGroupBaseOptions,
) -> UserDataSpec {
    let mut spec = UserDataSpec::new(os, node_group_type, &core.cluster_name);
    spec.stack_name = Some(stack_name.to_string());
    if node_group_type == NodeGroupType::SelfManagedV1 {
        spec.region = Some(core.region.clone());
    }
    spec.kubelet_extra_args = options.kubelet_extra_args.clone();
    spec.bootstrap_extra_args = options.bootstrap_extra_args.clone();
    spec.labels = options.labels.clone().unwrap_or_default();
    spec.taints = options.taints.clone().unwrap_or_default();
    spec.extra_user_data = options.node_user_data.clone();
    spec.bottlerocket_settings = options.bottlerocket_settings.clone();
    spec.nodeadm_extra_options = options.nodeadm_extra_options.clone().unwrap_or_default();
    spec
}

/// User data rendered once the cluster exists.
pub(crate) fn render_user_data(core: &CoreData, spec: UserDataSpec) -> Deferred {
    Deferred::apply(
        Func::UserData(Box::new(spec)),
        vec![
            core.cluster.endpoint.clone(),
            core.cluster.certificate_authority.clone(),
            core.cluster.service_cidr.clone(),
        ],
    )
}

pub(crate) fn base64(value: Deferred) -> Deferred {
    match value.as_str() {
        Some(known) => Deferred::from(::base64::encode(known)),
        None => Deferred::apply(Func::Base64Encode, vec![value]),
    }
}

/// What the recommended image is chosen from.
#[derive(Debug, Clone)]
pub(crate) struct ImageChoice<'a> {
    pub ami_type: Option<&'a str>,
    pub operating_system: OperatingSystem,
    pub gpu: bool,
    pub instance_types: &'a [String],
    /// The option the instance types came from, for error reporting.
    pub instance_types_path: &'a str,
    /// The node group's own Kubernetes version.
    pub version: Option<&'a str>,
}

/// The recommended EKS image for a node group.
pub(crate) async fn recommended_image(
    core: &CoreData,
    choice: &ImageChoice<'_>,
    lookup: &dyn CloudLookup,
) -> Result<Deferred> {
    let ami_type = match choice.ami_type {
        Some(name) => ami::parse_ami_type(name, "amiType")?,
        None => ami::determine_ami_type(
            choice.operating_system,
            choice.gpu,
            choice.instance_types,
            choice.instance_types_path,
        )?,
    };
    let own_version = match choice.version {
        Some(version) => {
            Some(K8sVersion::parse(version).map_err(|e| InvalidField::new("version", e))?)
        }
        None => None,
    };
    let version = own_version.as_ref().or(core.version.as_ref());
    ami::recommended_ami_id(ami_type, version, &core.cluster.version, lookup, "amiId").await
}

/// EBS settings of a worker's data volume. Amazon Linux 2 keeps its historical defaults, the
/// other operating systems only override what is set. Launch templates take the booleans as
/// strings.
pub(crate) fn root_volume(
    options: &NodeGroupBaseOptions,
    os: OperatingSystem,
    launch_template: bool,
) -> Option<Map<String, Value>> {
    let flag = |value: bool| {
        if launch_template {
            json!(value.to_string())
        } else {
            json!(value)
        }
    };
    let mut ebs = Map::new();
    let mut set = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            ebs.insert(key.to_string(), value);
        }
    };
    if os.resolve() == OperatingSystem::Al2 {
        set(
            "encrypted",
            Some(flag(options.node_root_volume_encrypted.unwrap_or(false))),
        );
        set(
            "volumeSize",
            Some(json!(options
                .node_root_volume_size
                .unwrap_or(DEFAULT_ROOT_VOLUME_SIZE))),
        );
        set(
            "volumeType",
            Some(json!(options
                .node_root_volume_type
                .clone()
                .unwrap_or_else(|| "gp2".to_string()))),
        );
        set(
            "deleteOnTermination",
            Some(flag(
                options.node_root_volume_delete_on_termination.unwrap_or(true),
            )),
        );
    } else {
        set("encrypted", options.node_root_volume_encrypted.map(flag));
        set("volumeSize", options.node_root_volume_size.map(Value::from));
        set(
            "volumeType",
            options.node_root_volume_type.clone().map(Value::from),
        );
        set(
            "deleteOnTermination",
            options.node_root_volume_delete_on_termination.map(flag),
        );
    }
    set("iops", options.node_root_volume_iops.map(Value::from));
    set(
        "throughput",
        options.node_root_volume_throughput.map(Value::from),
    );
    if ebs.is_empty() {
        None
    } else {
        Some(ebs)
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base_validation_collects_every_problem() {
        let options = NodeGroupBaseOptions {
            node_public_key: Some("ssh-rsa AAAA".to_string()),
            key_name: Some("mine".to_string()),
            ami_id: Some("ami-1".to_string()),
            gpu: Some(true),
            node_root_volume_iops: Some(3000),
            node_root_volume_type: Some("gp3".to_string()),
            node_security_group_id: Some("sg-1".to_string()),
            ..NodeGroupBaseOptions::default()
        };
        let paths: Vec<String> = validate_base(&options)
            .into_result()
            .unwrap_err()
            .invalid_fields()
            .iter()
            .map(|f| f.path.clone())
            .collect();
        assert_eq!(
            paths,
            vec![
                "nodePublicKey",
                "amiId",
                "clusterIngressRuleId",
                "nodeRootVolumeIops"
            ]
        );
    }

    #[test]
    fn al2_root_volume_keeps_defaults() {
        let ebs = root_volume(
            &NodeGroupBaseOptions::default(),
            OperatingSystem::Al2,
            true,
        )
        .unwrap();
        assert_eq!(ebs["volumeSize"], 20);
        assert_eq!(ebs["volumeType"], "gp2");
        assert_eq!(ebs["encrypted"], "false");
        assert_eq!(ebs["deleteOnTermination"], "true");
        assert!(root_volume(
            &NodeGroupBaseOptions::default(),
            OperatingSystem::Al2023,
            true
        )
        .is_none());
    }

    #[test]
    fn worker_tags_name_the_cluster() {
        let tags = worker_tags("prod", None);
        assert_eq!(tags["Name"], "prod-worker");
        assert_eq!(tags["kubernetes.io/cluster/prod"], "owned");
    }

    #[test]
    fn known_user_data_is_encoded_now() {
        assert_eq!(base64(Deferred::from("hi")), Deferred::from("aGk="));
        let attr = Deferred::attr("n", "userData");
        assert!(matches!(
            base64(attr),
            Deferred::Apply {
                func: Func::Base64Encode,
                ..
            }
        ));
    }

    #[test]
    fn adopted_node_security_group_conflicts_with_tags() {
        let mut core = test_support::core();
        core.node_security_group_tags
            .insert("team".to_string(), "a".to_string());
        let options = NodeGroupBaseOptions {
            node_security_group_id: Some("sg-custom".to_string()),
            cluster_ingress_rule_id: Some("sgr-1".to_string()),
            ..NodeGroupBaseOptions::default()
        };
        let err = WorkerSecurityGroup::for_node_group(&mut Graph::new(), "ng", &core, &options)
            .unwrap_err();
        assert_eq!(err.invalid_fields()[0].path, "nodeSecurityGroupId");
    }
}
