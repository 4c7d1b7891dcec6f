//! EKS managed addons: the generic `Addon` resource and the cluster's `coredns` and `kube-proxy`.

use crate::deferred::{Deferred, Func};
use crate::error::{self, Result};
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::lookup::CloudLookup;
use eks_model::{
    AddonOptions, CoreDnsAddonOptions, K8sVersion, KubeProxyAddonOptions,
    ResolveConflictsOnCreate, ResolveConflictsOnUpdate,
};
use log::{debug, info};
use serde_json::Value;
use snafu::ResultExt;
use std::collections::BTreeMap;

/// The version of an addon: the requested one, the default for a known Kubernetes version, or a
/// lookup deferred until the cluster reports its version.
pub async fn resolve_version(
    addon: &str,
    requested: Option<&str>,
    version: Option<&K8sVersion>,
    cluster_version: &Deferred,
    lookup: &dyn CloudLookup,
) -> Result<Deferred> {
    if let Some(requested) = requested {
        return Ok(Deferred::from(requested));
    }
    match version {
        Some(version) => {
            let k8s_version = version.eks_version();
            let resolved = lookup
                .default_addon_version(addon, &k8s_version)
                .await
                .map_err(|e| error::Error::AddonVersionUnavailable {
                    addon: addon.to_string(),
                    k8s_version: k8s_version.clone(),
                    message: e.to_string(),
                })?;
            debug!(
                "Default version of '{}' for Kubernetes {} is '{}'",
                addon, k8s_version, resolved
            );
            Ok(Deferred::from(resolved))
        }
        None => Ok(Deferred::apply(
            Func::AddonVersion {
                addon: addon.to_string(),
            },
            vec![cluster_version.clone()],
        )),
    }
}

/// Addon configuration values as a JSON document with sorted keys.
pub fn configuration_json(values: &BTreeMap<String, Value>) -> Result<String> {
    // serde_json sorts object keys unless `preserve_order` is enabled
    let value = serde_json::to_value(values).context(error::JsonSerializeSnafu {
        what: "addon configuration values",
    })?;
    serde_json::to_string(&value).context(error::JsonSerializeSnafu {
        what: "addon configuration values",
    })
}

/// Everything an `aws:eks:Addon` node is made of.
#[derive(Debug, Clone)]
pub struct AddonSpec {
    pub addon_name: String,
    pub cluster_name: Deferred,
    pub version: Deferred,
    pub service_account_role_arn: Option<String>,
    pub preserve: Option<bool>,
    pub resolve_conflicts_on_create: Option<ResolveConflictsOnCreate>,
    pub resolve_conflicts_on_update: Option<ResolveConflictsOnUpdate>,
    pub configuration_values: Option<BTreeMap<String, Value>>,
    pub tags: BTreeMap<String, String>,
}

impl AddonSpec {
    pub fn node<S: Into<String>>(&self, node_name: S) -> Result<ResourceNode> {
        let configuration = match &self.configuration_values {
            Some(values) => Some(configuration_json(values)?),
            None => None,
        };
        Ok(ResourceNode::new(node_name, ResourceType::Addon)
            .property("clusterName", self.cluster_name.clone())
            .property("addonName", &self.addon_name)
            .property("addonVersion", self.version.clone())
            .optional_property(
                "serviceAccountRoleArn",
                self.service_account_role_arn.clone(),
            )
            .optional_property("preserve", self.preserve)
            .optional_property(
                "resolveConflictsOnCreate",
                self.resolve_conflicts_on_create.map(|r| r.to_string()),
            )
            .optional_property(
                "resolveConflictsOnUpdate",
                self.resolve_conflicts_on_update.map(|r| r.to_string()),
            )
            .optional_property("configurationValues", configuration)
            .property("tags", &self.tags))
    }
}

/// Declares any EKS addon on a cluster.
pub async fn compose_addon(
    graph: &mut Graph,
    name: &str,
    cluster_name: Deferred,
    cluster_version: &Deferred,
    options: &AddonOptions,
    lookup: &dyn CloudLookup,
) -> Result<String> {
    let version = resolve_version(
        &options.addon_name,
        options.addon_version.as_deref(),
        None,
        cluster_version,
        lookup,
    )
    .await?;
    let spec = AddonSpec {
        addon_name: options.addon_name.clone(),
        cluster_name,
        version,
        service_account_role_arn: options.service_account_role_arn.clone(),
        preserve: options.preserve,
        resolve_conflicts_on_create: options.resolve_conflicts_on_create,
        resolve_conflicts_on_update: options.resolve_conflicts_on_update,
        configuration_values: options.configuration_values.clone(),
        tags: options.tags.clone().unwrap_or_default(),
    };
    graph.add(spec.node(name)?)?;
    Ok(name.to_string())
}

/// What decides whether the cluster's own addons are managed.
#[derive(Debug, Clone)]
pub struct ClusterAddonContext<'a> {
    pub name: &'a str,
    pub cluster_node: &'a str,
    pub cluster_name: Deferred,
    pub cluster_version: Deferred,
    pub version: Option<&'a K8sVersion>,
    pub auto_mode: bool,
    /// Nodes that run pods: the default node group or a Fargate profile.
    pub compute: Vec<String>,
    pub tags: &'a BTreeMap<String, String>,
}

/// Declares `coredns` when there is compute for it to run on. Without a default node group or a
/// Fargate profile CoreDNS stays the unmanaged install.
pub async fn compose_coredns(
    graph: &mut Graph,
    context: &ClusterAddonContext<'_>,
    options: Option<&CoreDnsAddonOptions>,
    lookup: &dyn CloudLookup,
) -> Result<Option<String>> {
    let default = CoreDnsAddonOptions::default();
    let options = options.unwrap_or(&default);
    if !options.enabled {
        return Ok(None);
    }
    if context.compute.is_empty() {
        info!("Skipping the coredns addon, the cluster has no default compute");
        return Ok(None);
    }
    let version = resolve_version(
        "coredns",
        options.version.as_deref(),
        context.version,
        &context.cluster_version,
        lookup,
    )
    .await?;
    let spec = AddonSpec {
        addon_name: "coredns".to_string(),
        cluster_name: context.cluster_name.clone(),
        version,
        service_account_role_arn: None,
        preserve: None,
        resolve_conflicts_on_create: Some(
            options
                .resolve_conflicts_on_create
                .unwrap_or(ResolveConflictsOnCreate::Overwrite),
        ),
        resolve_conflicts_on_update: Some(
            options
                .resolve_conflicts_on_update
                .unwrap_or(ResolveConflictsOnUpdate::Overwrite),
        ),
        configuration_values: options.configuration_values.clone(),
        tags: context.tags.clone(),
    };
    let node = format!("{}-coredns", context.name);
    graph.add(
        spec.node(&node)?
            .depends_on(context.cluster_node)
            .depends_on_all(context.compute.iter().cloned()),
    )?;
    Ok(Some(node))
}

/// Declares `kube-proxy` unless auto mode runs its own.
pub async fn compose_kube_proxy(
    graph: &mut Graph,
    context: &ClusterAddonContext<'_>,
    options: Option<&KubeProxyAddonOptions>,
    lookup: &dyn CloudLookup,
) -> Result<Option<String>> {
    let default = KubeProxyAddonOptions::default();
    let options = options.unwrap_or(&default);
    if !options.enabled || context.auto_mode {
        return Ok(None);
    }
    let version = resolve_version(
        "kube-proxy",
        options.version.as_deref(),
        context.version,
        &context.cluster_version,
        lookup,
    )
    .await?;
    let spec = AddonSpec {
        addon_name: "kube-proxy".to_string(),
        cluster_name: context.cluster_name.clone(),
        version,
        service_account_role_arn: None,
        preserve: None,
        resolve_conflicts_on_create: Some(
            options
                .resolve_conflicts_on_create
                .unwrap_or(ResolveConflictsOnCreate::Overwrite),
        ),
        resolve_conflicts_on_update: Some(
            options
                .resolve_conflicts_on_update
                .unwrap_or(ResolveConflictsOnUpdate::Overwrite),
        ),
        configuration_values: options.configuration_values.clone(),
        tags: context.tags.clone(),
    };
    let node = format!("{}-kube-proxy", context.name);
    graph.add(spec.node(&node)?.depends_on(context.cluster_node))?;
    Ok(Some(node))
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;
    use serde_json::json;

    #[test]
    fn configuration_is_sorted() {
        let values = btreemap! {
            "zeta".to_string() => json!(1),
            "alpha".to_string() => json!({ "b": 2, "a": 1 }),
        };
        assert_eq!(
            configuration_json(&values).unwrap(),
            r#"{"alpha":{"a":1,"b":2},"zeta":1}"#
        );
    }

    #[test]
    fn addon_node_properties() {
        let spec = AddonSpec {
            addon_name: "aws-ebs-csi-driver".to_string(),
            cluster_name: Deferred::attr("c-eksCluster", "name"),
            version: Deferred::from("v1.30.0-eksbuild.1"),
            service_account_role_arn: None,
            preserve: Some(true),
            resolve_conflicts_on_create: Some(ResolveConflictsOnCreate::None),
            resolve_conflicts_on_update: None,
            configuration_values: None,
            tags: BTreeMap::new(),
        };
        let node = spec.node("ebs").unwrap();
        assert_eq!(node.get("resolveConflictsOnCreate"), Some(&Deferred::from("NONE")));
        assert!(node.get("resolveConflictsOnUpdate").is_none());
        assert!(node.get("configurationValues").is_none());
        assert!(node.dependencies().contains("c-eksCluster"));
    }
}
