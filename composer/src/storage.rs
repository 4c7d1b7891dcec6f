//! EBS-backed storage classes of the cluster.

use crate::deferred::Deferred;
use crate::error::{self, Result};
use crate::graph::{Graph, ResourceNode, ResourceType};
use eks_model::{EbsVolumeType, StorageClassSpec, StorageClasses};
use k8s_openapi::api::core::v1::{TopologySelectorLabelRequirement, TopologySelectorTerm};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use log::debug;
use snafu::ensure;
use std::collections::BTreeMap;

const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";
const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// The named classes described by the `storageClasses` option. A single volume type becomes one
/// default class named after the type.
pub fn classes(option: &StorageClasses) -> BTreeMap<String, StorageClassSpec> {
    match option {
        StorageClasses::Single(volume_type) => {
            let mut spec = StorageClassSpec::new(*volume_type);
            spec.default = true;
            let mut classes = BTreeMap::new();
            classes.insert(volume_type.to_string(), spec);
            classes
        }
        StorageClasses::Named(classes) => classes.clone(),
    }
}

/// The Kubernetes object of a storage class.
pub fn storage_class(name: &str, spec: &StorageClassSpec) -> StorageClass {
    let mut parameters = BTreeMap::new();
    parameters.insert("type".to_string(), spec.volume_type.to_string());
    if spec.volume_type == EbsVolumeType::Io1 {
        if let Some(iops) = spec.iops_per_gb {
            parameters.insert("iopsPerGB".to_string(), iops.to_string());
        }
    }
    if let Some(key) = &spec.kms_key_id {
        parameters.insert("kmsKeyId".to_string(), key.clone());
    }
    if let Some(encrypted) = spec.encrypted {
        parameters.insert("encrypted".to_string(), encrypted.to_string());
    }

    let mut annotations = spec.annotations.clone().unwrap_or_default();
    if spec.default {
        annotations.insert(DEFAULT_CLASS_ANNOTATION.to_string(), "true".to_string());
    }

    StorageClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: spec.labels.clone(),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            ..ObjectMeta::default()
        },
        provisioner: spec.volume_type.provisioner().to_string(),
        parameters: Some(parameters),
        allow_volume_expansion: spec.allow_volume_expansion,
        mount_options: spec.mount_options.clone(),
        reclaim_policy: spec.reclaim_policy.clone(),
        volume_binding_mode: spec.volume_binding_mode.clone(),
        allowed_topologies: spec.zones.as_ref().map(|zones| {
            vec![TopologySelectorTerm {
                match_label_expressions: Some(vec![TopologySelectorLabelRequirement {
                    key: ZONE_LABEL.to_string(),
                    values: zones.clone(),
                }]),
            }]
        }),
    }
}

/// Declares the storage classes through the cluster's Kubernetes provider. At most one may be
/// the default class.
pub fn compose(
    graph: &mut Graph,
    name: &str,
    option: &StorageClasses,
    provider: &str,
    depends_on: &[String],
) -> Result<Vec<String>> {
    let classes = classes(option);
    let defaults: Vec<String> = classes
        .iter()
        .filter(|(_, spec)| spec.default)
        .map(|(class, _)| class.clone())
        .collect();
    ensure!(
        defaults.len() <= 1,
        error::MultipleDefaultStorageClassesSnafu { names: defaults }
    );

    let mut nodes = Vec::with_capacity(classes.len());
    for (class, spec) in &classes {
        let object = storage_class(class, spec);
        let node = format!("{}-storageClass-{}", name, class);
        debug!("Declaring storage class '{}' as '{}'", class, node);
        graph.add(
            ResourceNode::new(&node, ResourceType::StorageClass)
                .property("object", Deferred::from_serialize("storage class", &object)?)
                .provider(provider)
                .depends_on_all(depends_on.iter().cloned()),
        )?;
        nodes.push(node);
    }
    Ok(nodes)
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn single_type_is_default() {
        let mut graph = Graph::new();
        let nodes = compose(
            &mut graph,
            "c",
            &StorageClasses::Single(EbsVolumeType::Gp2),
            "c-eks-k8s",
            &[],
        )
        .unwrap();
        assert_eq!(nodes, vec!["c-storageClass-gp2"]);
        let object = graph.get("c-storageClass-gp2").unwrap().get("object").unwrap().as_known().unwrap();
        assert_eq!(object["provisioner"], "kubernetes.io/aws-ebs");
        assert_eq!(object["parameters"]["type"], "gp2");
        assert_eq!(object["metadata"]["annotations"][DEFAULT_CLASS_ANNOTATION], "true");
    }

    #[test]
    fn two_defaults_fail() {
        let mut fast = StorageClassSpec::new(EbsVolumeType::Io1);
        fast.default = true;
        fast.iops_per_gb = Some(10);
        let mut cheap = StorageClassSpec::new(EbsVolumeType::Sc1);
        cheap.default = true;
        let option = StorageClasses::Named(btreemap! {
            "fast".to_string() => fast,
            "cheap".to_string() => cheap,
        });
        let err = compose(&mut Graph::new(), "c", &option, "c-eks-k8s", &[]).unwrap_err();
        assert!(matches!(
            err,
            error::Error::MultipleDefaultStorageClasses { ref names } if names.len() == 2
        ));
    }

    #[test]
    fn class_names_do_not_collide_with_cluster_nodes() {
        let mut graph = Graph::new();
        graph
            .add(ResourceNode::new("c-nodes", ResourceType::CloudFormationStack))
            .unwrap();
        let option = StorageClasses::Named(btreemap! {
            "nodes".to_string() => StorageClassSpec::new(EbsVolumeType::Gp3),
        });
        let nodes = compose(&mut graph, "c", &option, "c-eks-k8s", &[]).unwrap();
        assert_eq!(nodes, vec!["c-storageClass-nodes"]);
        assert_eq!(
            graph.get("c-nodes").unwrap().resource_type,
            ResourceType::CloudFormationStack
        );
    }

    #[test]
    fn io1_parameters_and_zones() {
        let mut spec = StorageClassSpec::new(EbsVolumeType::Io1);
        spec.iops_per_gb = Some(10);
        spec.encrypted = Some(true);
        spec.zones = Some(vec!["us-west-2a".to_string()]);
        let class = storage_class("fast", &spec);
        let parameters = class.parameters.unwrap();
        assert_eq!(parameters["iopsPerGB"], "10");
        assert_eq!(parameters["encrypted"], "true");
        assert!(class.metadata.annotations.is_none());
        let topology = class.allowed_topologies.unwrap();
        assert_eq!(
            topology[0].match_label_expressions.as_ref().unwrap()[0].key,
            ZONE_LABEL
        );
    }
}
