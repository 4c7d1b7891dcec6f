//! Fargate profiles and their pod execution role.

use crate::deferred::Deferred;
use crate::error::Result;
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::iam::{self, RoleRef};
use eks_model::{FargateConfig, FargateProfileOptions, FargateSelector};
use log::info;
use serde_json::json;
use std::collections::BTreeMap;

/// The profile and the role its pods run as.
#[derive(Debug, Clone, PartialEq)]
pub struct FargateProfile {
    pub node: String,
    pub pod_execution_role: RoleRef,
    pub id: Deferred,
    pub status: Deferred,
}

/// Inputs the profile takes from the rest of the cluster.
#[derive(Debug, Clone)]
pub struct FargateContext<'a> {
    pub name: &'a str,
    pub cluster_node: &'a str,
    pub cluster_name: Deferred,
    /// Fargate only schedules into private subnets.
    pub private_subnet_ids: &'a [String],
    pub subnet_ids: &'a [String],
    pub partition: &'a str,
    pub tags: &'a BTreeMap<String, String>,
}

fn default_selectors() -> Vec<FargateSelector> {
    ["default", "kube-system"]
        .iter()
        .map(|namespace| FargateSelector {
            namespace: namespace.to_string(),
            labels: None,
        })
        .collect()
}

/// Declares the profile when `fargate` asks for one.
pub fn compose(
    graph: &mut Graph,
    context: &FargateContext<'_>,
    config: Option<&FargateConfig>,
) -> Result<Option<FargateProfile>> {
    let options = match config {
        Some(FargateConfig::Enabled(true)) => FargateProfileOptions::default(),
        Some(FargateConfig::Profile(options)) => options.clone(),
        Some(FargateConfig::Enabled(false)) | None => return Ok(None),
    };

    let pod_execution_role = match &options.pod_execution_role_arn {
        Some(arn) => RoleRef::adopted_arn(arn),
        None => iam::create_role(
            graph,
            &format!("{}-podExecutionRole", context.name),
            "eks-fargate-pods.amazonaws.com",
            &["sts:AssumeRole"],
            &iam::FARGATE_POLICIES,
            context.partition,
            "Allows Fargate pods to run in the cluster.",
            context.tags,
        )?,
    };

    let subnet_ids = options.subnet_ids.clone().unwrap_or_else(|| {
        if context.private_subnet_ids.is_empty() {
            context.subnet_ids.to_vec()
        } else {
            context.private_subnet_ids.to_vec()
        }
    });
    let selectors = options.selectors.clone().unwrap_or_else(default_selectors);
    let selectors: Vec<_> = selectors
        .iter()
        .map(|s| match &s.labels {
            Some(labels) => json!({ "namespace": s.namespace, "labels": labels }),
            None => json!({ "namespace": s.namespace }),
        })
        .collect();

    let node = format!("{}-fargateProfile", context.name);
    let mut profile = ResourceNode::new(&node, ResourceType::FargateProfile)
        .property("clusterName", context.cluster_name.clone())
        .property("podExecutionRoleArn", pod_execution_role.arn.clone())
        .property("subnetIds", subnet_ids)
        .property("selectors", serde_json::Value::Array(selectors))
        .property("tags", context.tags)
        .depends_on(context.cluster_node);
    if let Some(role_node) = &pod_execution_role.node {
        profile = profile.depends_on(role_node);
    }
    graph.add(profile)?;
    info!("Declared Fargate profile '{}'", node);

    Ok(Some(FargateProfile {
        id: Deferred::attr(&node, "id"),
        status: Deferred::attr(&node, "status"),
        node,
        pod_execution_role,
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    fn context<'a>(private: &'a [String], all: &'a [String], tags: &'a BTreeMap<String, String>) -> FargateContext<'a> {
        FargateContext {
            name: "c",
            cluster_node: "c-eksCluster",
            cluster_name: Deferred::attr("c-eksCluster", "name"),
            private_subnet_ids: private,
            subnet_ids: all,
            partition: "aws",
            tags,
        }
    }

    #[test]
    fn default_profile() {
        let private = vec!["subnet-private".to_string()];
        let all = vec!["subnet-private".to_string(), "subnet-public".to_string()];
        let tags = BTreeMap::new();
        let mut graph = Graph::new();
        let profile = compose(
            &mut graph,
            &context(&private, &all, &tags),
            Some(&FargateConfig::Enabled(true)),
        )
        .unwrap()
        .unwrap();
        assert_eq!(profile.pod_execution_role.node.as_deref(), Some("c-podExecutionRole"));
        assert!(graph.contains("c-podExecutionRole-AmazonEKSFargatePodExecutionRolePolicy"));
        let node = graph.get("c-fargateProfile").unwrap();
        assert_eq!(
            node.get("selectors").unwrap().as_known().unwrap(),
            json!([{ "namespace": "default" }, { "namespace": "kube-system" }])
        );
        assert_eq!(
            node.get("subnetIds").unwrap().as_known().unwrap(),
            json!(["subnet-private"])
        );
    }

    #[test]
    fn disabled_means_nothing() {
        let tags = BTreeMap::new();
        let mut graph = Graph::new();
        assert!(compose(
            &mut graph,
            &context(&[], &[], &tags),
            Some(&FargateConfig::Enabled(false))
        )
        .unwrap()
        .is_none());
        assert!(graph.is_empty());
    }

    #[test]
    fn given_role_is_adopted() {
        let tags = BTreeMap::new();
        let mut graph = Graph::new();
        let profile = compose(
            &mut graph,
            &context(&[], &[], &tags),
            Some(&FargateConfig::Profile(FargateProfileOptions {
                pod_execution_role_arn: Some("arn:aws:iam::1:role/pods".to_string()),
                selectors: Some(vec![FargateSelector {
                    namespace: "apps".to_string(),
                    labels: None,
                }]),
                subnet_ids: Some(vec!["subnet-1".to_string()]),
            })),
        )
        .unwrap()
        .unwrap();
        assert!(profile.pod_execution_role.node.is_none());
        assert_eq!(graph.len(), 1);
    }
}
