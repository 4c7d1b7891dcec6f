//! The `vpc-cni` managed addon and the `aws-node` daemonset settings the addon cannot express.

use crate::addon::{resolve_version, AddonSpec};
use crate::deferred::Deferred;
use crate::error::{Problems, Result};
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::lookup::CloudLookup;
use eks_model::constants::KUBE_SYSTEM_NAMESPACE;
use eks_model::{K8sVersion, ResolveConflictsOnCreate, ResolveConflictsOnUpdate, VpcCniOptions};
use log::debug;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

const AWS_NODE: &str = "aws-node";

fn flag(value: bool) -> Value {
    Value::String(value.to_string())
}

/// Rejects contradictory CNI options.
pub fn validate(options: &VpcCniOptions) -> Problems {
    let mut problems = Problems::new();
    problems.check(
        options.cni_external_snat.unwrap_or(false) && options.external_snat.unwrap_or(false),
        "vpcCniOptions.cniExternalSnat",
        "Please specify one of `cniExternalSnat` or `externalSnat` in your VpcCniOptions",
    );
    problems
}

/// The `env` and `init.env` sections of the addon's configuration derived from the legacy flags.
/// Options that are not set fall back to the values the plugin was historically deployed with.
pub fn environment(options: &VpcCniOptions) -> (Map<String, Value>, Map<String, Value>) {
    let mut env = Map::new();
    let mut init_env = Map::new();
    let mut set = |key: &str, value: Value| {
        env.insert(key.to_string(), value);
    };

    if options.node_port_support.unwrap_or(false) {
        set("AWS_VPC_CNI_NODE_PORT_SUPPORT", flag(true));
    }
    if options.custom_network_config.unwrap_or(false) {
        set("AWS_VPC_K8S_CNI_CUSTOM_NETWORK_CFG", flag(true));
    }
    set(
        "WARM_ENI_TARGET",
        Value::String(options.warm_eni_target.unwrap_or(1).to_string()),
    );
    if let Some(target) = options.warm_ip_target {
        set("WARM_IP_TARGET", Value::String(target.to_string()));
    }
    if let Some(target) = options.warm_prefix_target {
        set("WARM_PREFIX_TARGET", Value::String(target.to_string()));
    }
    if options.enable_prefix_delegation.unwrap_or(false) {
        set("ENABLE_PREFIX_DELEGATION", flag(true));
    }
    set(
        "AWS_VPC_K8S_CNI_LOGLEVEL",
        json!(options.log_level.as_deref().unwrap_or("DEBUG")),
    );
    set(
        "AWS_VPC_K8S_CNI_LOG_FILE",
        json!(options
            .log_file
            .as_deref()
            .unwrap_or("/host/var/log/aws-routed-eni/ipamd.log")),
    );
    set(
        "AWS_VPC_K8S_CNI_VETHPREFIX",
        json!(options.veth_prefix.as_deref().unwrap_or("eni")),
    );
    set(
        "AWS_VPC_ENI_MTU",
        Value::String(options.eni_mtu.unwrap_or(9001).to_string()),
    );
    if let Some(label) = &options.eni_config_label_def {
        set("ENI_CONFIG_LABEL_DEF", json!(label));
    }
    set(
        "AWS_VPC_K8S_PLUGIN_LOG_LEVEL",
        json!(options.plugin_log_level.as_deref().unwrap_or("DEBUG")),
    );
    set(
        "AWS_VPC_K8S_PLUGIN_LOG_FILE",
        json!(options
            .plugin_log_file
            .as_deref()
            .unwrap_or("/var/log/aws-routed-eni/plugin.log")),
    );
    set("ENABLE_POD_ENI", flag(options.enable_pod_eni.unwrap_or(false)));
    if options.cni_configure_rpfilter.unwrap_or(false) {
        set("AWS_VPC_K8S_CNI_CONFIGURE_RPFILTER", flag(true));
    }
    set(
        "AWS_VPC_K8S_CNI_CUSTOM_NETWORK_CFG",
        flag(
            options.cni_custom_network_cfg.unwrap_or(false)
                || options.custom_network_config.unwrap_or(false),
        ),
    );
    set(
        "AWS_VPC_K8S_CNI_EXTERNALSNAT",
        flag(options.external_snat.unwrap_or(false) || options.cni_external_snat.unwrap_or(false)),
    );
    if options.enable_ipv6.unwrap_or(false) {
        set("ENABLE_IPv6", flag(true));
    }

    init_env.insert(
        "DISABLE_TCP_EARLY_DEMUX".to_string(),
        flag(options.disable_tcp_early_demux.unwrap_or(false)),
    );
    (env, init_env)
}

/// The addon's configuration values: the derived environment with the caller's values on top.
/// Keys the derived configuration does not know are passed through.
pub fn configuration_values(options: &VpcCniOptions) -> BTreeMap<String, Value> {
    let (env, init_env) = environment(options);
    let mut values = BTreeMap::new();
    values.insert("env".to_string(), Value::Object(env));
    values.insert("init".to_string(), json!({ "env": init_env }));
    if options.enable_network_policy.unwrap_or(false) {
        values.insert("enableNetworkPolicy".to_string(), json!("true"));
    }
    for (key, value) in options.configuration_values.clone().unwrap_or_default() {
        match values.get_mut(&key) {
            Some(existing) => merge_json(existing, value),
            None => {
                values.insert(key, value);
            }
        }
    }
    values
}

/// Deep-merges objects, anything else in `from` replaces what is in `into`.
fn merge_json(into: &mut Value, from: Value) {
    match (into, from) {
        (Value::Object(into), Value::Object(from)) => {
            for (key, value) in from {
                match into.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        into.insert(key, value);
                    }
                }
            }
        }
        (into, from) => *into = from,
    }
}

/// The `aws-node` containers the addon does not let us configure, as a server-side apply patch.
fn daemonset_patch(options: &VpcCniOptions) -> Option<Value> {
    let mut containers = Vec::new();
    let mut init_containers = Vec::new();
    if options.image.is_some() || options.security_context_privileged.unwrap_or(false) {
        let mut container = json!({ "name": AWS_NODE });
        if let Some(image) = &options.image {
            container["image"] = json!(image);
        }
        if options.security_context_privileged.unwrap_or(false) {
            container["securityContext"] = json!({ "privileged": true });
        }
        containers.push(container);
    }
    if let Some(image) = &options.node_agent_image {
        containers.push(json!({ "name": "aws-eks-nodeagent", "image": image }));
    }
    if let Some(image) = &options.init_image {
        init_containers.push(json!({ "name": "aws-vpc-cni-init", "image": image }));
    }
    if containers.is_empty() && init_containers.is_empty() {
        return None;
    }
    let mut pod_spec = Map::new();
    if !containers.is_empty() {
        pod_spec.insert("containers".to_string(), Value::Array(containers));
    }
    if !init_containers.is_empty() {
        pod_spec.insert("initContainers".to_string(), Value::Array(init_containers));
    }
    Some(json!({ "template": { "spec": pod_spec } }))
}

/// Inputs of the `vpc-cni` addon.
#[derive(Debug, Clone)]
pub struct VpcCniContext<'a> {
    pub name: &'a str,
    pub cluster_node: &'a str,
    pub cluster_name: Deferred,
    pub cluster_version: Deferred,
    pub version: Option<&'a K8sVersion>,
    /// The cluster's own Kubernetes provider, for the daemonset patch.
    pub provider: &'a str,
    pub tags: &'a BTreeMap<String, String>,
}

/// Declares the `vpc-cni` addon and, when images or privileges are overridden, the `aws-node`
/// patch applied after it. Returns the addon node.
pub async fn compose(
    graph: &mut Graph,
    context: &VpcCniContext<'_>,
    options: &VpcCniOptions,
    lookup: &dyn CloudLookup,
) -> Result<String> {
    validate(options).into_result()?;
    let version = resolve_version(
        "vpc-cni",
        options.addon_version.as_deref(),
        context.version,
        &context.cluster_version,
        lookup,
    )
    .await?;
    let spec = AddonSpec {
        addon_name: "vpc-cni".to_string(),
        cluster_name: context.cluster_name.clone(),
        version,
        service_account_role_arn: options.service_account_role_arn.clone(),
        preserve: Some(true),
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
        configuration_values: Some(configuration_values(options)),
        tags: context.tags.clone(),
    };
    let addon = format!("{}-vpc-cni", context.name);
    graph.add(spec.node(&addon)?.depends_on(context.cluster_node))?;

    if let Some(patch) = daemonset_patch(options) {
        let patch_node = format!("{}-aws-node", context.name);
        debug!("Patching the '{}' daemonset through '{}'", AWS_NODE, patch_node);
        graph.add(
            ResourceNode::new(&patch_node, ResourceType::DaemonSetPatch)
                .property(
                    "metadata",
                    json!({
                        "name": AWS_NODE,
                        "namespace": KUBE_SYSTEM_NAMESPACE,
                        "annotations": { "pulumi.com/patchForce": "true" },
                    }),
                )
                .property("spec", patch)
                .provider(context.provider)
                .depends_on(&addon),
        )?;
    }
    Ok(addon)
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn historical_defaults() {
        let (env, init_env) = environment(&VpcCniOptions::default());
        assert_eq!(env["WARM_ENI_TARGET"], "1");
        assert_eq!(env["AWS_VPC_K8S_CNI_LOGLEVEL"], "DEBUG");
        assert_eq!(env["AWS_VPC_ENI_MTU"], "9001");
        assert_eq!(env["AWS_VPC_K8S_CNI_EXTERNALSNAT"], "false");
        assert_eq!(env["ENABLE_POD_ENI"], "false");
        assert!(!env.contains_key("WARM_IP_TARGET"));
        assert_eq!(init_env["DISABLE_TCP_EARLY_DEMUX"], "false");
    }

    #[test]
    fn flags_become_env() {
        let options = VpcCniOptions {
            warm_ip_target: Some(5),
            enable_prefix_delegation: Some(true),
            cni_external_snat: Some(true),
            disable_tcp_early_demux: Some(true),
            ..VpcCniOptions::default()
        };
        let (env, init_env) = environment(&options);
        assert_eq!(env["WARM_IP_TARGET"], "5");
        assert_eq!(env["ENABLE_PREFIX_DELEGATION"], "true");
        assert_eq!(env["AWS_VPC_K8S_CNI_EXTERNALSNAT"], "true");
        assert_eq!(init_env["DISABLE_TCP_EARLY_DEMUX"], "true");
    }

    #[test]
    fn user_values_win_and_unknown_keys_pass_through() {
        let options = VpcCniOptions {
            enable_network_policy: Some(true),
            configuration_values: Some(btreemap! {
                "env".to_string() => json!({ "WARM_ENI_TARGET": "3", "MINIMUM_IP_TARGET": "2" }),
                "nodeAgent".to_string() => json!({ "enablePolicyEventLogs": "true" }),
            }),
            ..VpcCniOptions::default()
        };
        let values = configuration_values(&options);
        assert_eq!(values["env"]["WARM_ENI_TARGET"], "3");
        assert_eq!(values["env"]["MINIMUM_IP_TARGET"], "2");
        assert_eq!(values["env"]["AWS_VPC_K8S_CNI_VETHPREFIX"], "eni");
        assert_eq!(values["nodeAgent"]["enablePolicyEventLogs"], "true");
        assert_eq!(values["enableNetworkPolicy"], "true");
    }

    #[test]
    fn both_snat_flags_are_rejected() {
        let options = VpcCniOptions {
            external_snat: Some(true),
            cni_external_snat: Some(true),
            ..VpcCniOptions::default()
        };
        assert!(!validate(&options).is_empty());
    }

    #[test]
    fn patch_only_when_needed() {
        assert!(daemonset_patch(&VpcCniOptions::default()).is_none());
        let patch = daemonset_patch(&VpcCniOptions {
            init_image: Some("init:1".to_string()),
            security_context_privileged: Some(true),
            ..VpcCniOptions::default()
        })
        .unwrap();
        assert_eq!(
            patch["template"]["spec"]["containers"][0],
            json!({ "name": "aws-node", "securityContext": { "privileged": true } })
        );
        assert_eq!(
            patch["template"]["spec"]["initContainers"][0]["image"],
            "init:1"
        );
    }
}
