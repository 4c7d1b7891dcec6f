//! Grants IAM principals access to the cluster, through the `aws-auth` config map and/or EKS
//! access entries depending on the authentication mode.

use crate::deferred::{Deferred, Func};
use crate::error::{self, Problems, Result};
use crate::graph::{Graph, ResourceNode, ResourceType};
use crate::userdata::yaml_body;
use eks_model::constants::{
    AWS_AUTH_CONFIG_MAP, FARGATE_GROUPS, FARGATE_USERNAME, KUBE_SYSTEM_NAMESPACE,
    NODE_BOOTSTRAP_GROUPS, NODE_USERNAME,
};
use eks_model::{AccessEntry, AccessEntryType, AuthenticationMode, RoleMapping, UserMapping};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use snafu::{ensure, ResultExt};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Serialize)]
struct MapRole {
    rolearn: String,
    username: String,
    groups: Vec<String>,
}

#[derive(Serialize)]
struct MapUser {
    userarn: String,
    username: String,
    groups: Vec<String>,
}

/// The `mapRoles` document for a list of realized role mappings.
pub fn map_roles_yaml(mappings: &Value) -> Result<String> {
    let mappings: Vec<RoleMapping> =
        serde_json::from_value(mappings.clone()).map_err(|e| error::Error::Evaluation {
            func: "mapRoles".to_string(),
            message: format!(
                "The IAM role mappings provided could not be properly serialized to YAML for the \
                 aws-auth ConfigMap: {}",
                e
            ),
        })?;
    let entries: Vec<MapRole> = mappings
        .into_iter()
        .map(|m| MapRole {
            rolearn: m.role_arn,
            username: m.username,
            groups: m.groups,
        })
        .collect();
    yaml_body(&entries, "aws-auth mapRoles")
}

/// The `mapUsers` document for a list of realized user mappings.
pub fn map_users_yaml(mappings: &Value) -> Result<String> {
    let mappings: Vec<UserMapping> =
        serde_json::from_value(mappings.clone()).map_err(|e| error::Error::Evaluation {
            func: "mapUsers".to_string(),
            message: format!(
                "The IAM user mappings provided could not be properly serialized to YAML for the \
                 aws-auth ConfigMap: {}",
                e
            ),
        })?;
    let entries: Vec<MapUser> = mappings
        .into_iter()
        .map(|m| MapUser {
            userarn: m.user_arn,
            username: m.username,
            groups: m.groups,
        })
        .collect();
    yaml_body(&entries, "aws-auth mapUsers")
}

/// Maps a node instance role to the groups kubelets bootstrap with.
pub fn instance_role_mapping(role_arn: Deferred) -> Deferred {
    Deferred::object(vec![
        ("roleArn", role_arn),
        ("username", Deferred::from(NODE_USERNAME)),
        (
            "groups",
            Deferred::from(
                NODE_BOOTSTRAP_GROUPS
                    .iter()
                    .map(|g| g.to_string())
                    .collect::<Vec<_>>(),
            ),
        ),
    ])
}

/// Maps a Fargate pod execution role to the groups Fargate nodes need.
pub fn fargate_role_mapping(role_arn: Deferred) -> Deferred {
    Deferred::object(vec![
        ("roleArn", role_arn),
        ("username", Deferred::from(FARGATE_USERNAME)),
        (
            "groups",
            Deferred::from(FARGATE_GROUPS.iter().map(|g| g.to_string()).collect::<Vec<_>>()),
        ),
    ])
}

/// Rejects options the authentication mode cannot honor.
pub fn validate(
    mode: AuthenticationMode,
    role_mappings: bool,
    user_mappings: bool,
    access_entries: bool,
) -> Problems {
    let mut problems = Problems::new();
    let unsupported = |prop: &str| {
        format!(
            "The '{}' property is not supported when 'authenticationMode' is set to '{}'.",
            prop, mode
        )
    };
    if !mode.uses_config_map() {
        problems.check(role_mappings, "roleMappings", unsupported("roleMappings"));
        problems.check(user_mappings, "userMappings", unsupported("userMappings"));
    }
    if !mode.supports_access_entries() {
        problems.check(access_entries, "accessEntries", unsupported("accessEntries"));
    }
    problems
}

fn rank(mode: AuthenticationMode) -> u8 {
    match mode {
        AuthenticationMode::ConfigMap => 0,
        AuthenticationMode::ApiAndConfigMap => 1,
        AuthenticationMode::Api => 2,
    }
}

/// Authentication modes only move towards access entries. EKS drops the `aws-auth` config map
/// when a cluster enters `API`, and refuses to leave access entries behind once enabled.
pub fn check_transition(
    previous: Option<AuthenticationMode>,
    next: AuthenticationMode,
) -> Result<()> {
    if let Some(previous) = previous {
        ensure!(
            rank(next) >= rank(previous),
            error::AuthModeDowngradeForbiddenSnafu {
                from: previous,
                to: next,
            }
        );
        if previous != next {
            info!(
                "Migrating the authentication mode from '{}' to '{}'",
                previous, next
            );
        }
    }
    Ok(())
}

/// Declares the `aws-auth` config map. It is applied through the cluster's own Kubernetes
/// provider and waits for every role it maps.
pub fn compose_aws_auth(
    graph: &mut Graph,
    name: &str,
    provider: &str,
    role_mappings: Vec<Deferred>,
    user_mappings: Option<Vec<Deferred>>,
    depends_on: BTreeSet<String>,
) -> Result<String> {
    let node_name = format!("{}-nodeAccess", name);
    let metadata = ObjectMeta {
        name: Some(AWS_AUTH_CONFIG_MAP.to_string()),
        namespace: Some(KUBE_SYSTEM_NAMESPACE.to_string()),
        ..ObjectMeta::default()
    };
    let mut data = vec![(
        "mapRoles",
        Deferred::apply(Func::MapRoles, vec![Deferred::list(role_mappings)]),
    )];
    if let Some(user_mappings) = user_mappings {
        data.push((
            "mapUsers",
            Deferred::apply(Func::MapUsers, vec![Deferred::list(user_mappings)]),
        ));
    }
    debug!("Declaring the aws-auth config map as '{}'", node_name);
    graph.add(
        ResourceNode::new(&node_name, ResourceType::ConfigMap)
            .property("apiVersion", "v1")
            .property("kind", "ConfigMap")
            .property(
                "metadata",
                Deferred::from_serialize("aws-auth metadata", &metadata)?,
            )
            .property("data", Deferred::object(data))
            .provider(provider)
            .depends_on_all(depends_on),
    )?;
    Ok(node_name)
}

/// An access entry whose principal is only known once another resource exists, such as a role
/// the composition creates.
#[derive(Debug, Clone)]
pub struct ResolvedAccessEntry {
    pub principal_arn: Deferred,
    pub entry_type: AccessEntryType,
    pub username: Option<String>,
    pub kubernetes_groups: Option<Vec<String>>,
    pub access_policies: BTreeMap<String, eks_model::AccessPolicyAssociation>,
    pub tags: Option<BTreeMap<String, String>>,
}

impl ResolvedAccessEntry {
    pub fn new(principal_arn: Deferred, entry_type: AccessEntryType) -> Self {
        Self {
            principal_arn,
            entry_type,
            username: None,
            kubernetes_groups: None,
            access_policies: BTreeMap::new(),
            tags: None,
        }
    }
}

impl From<&AccessEntry> for ResolvedAccessEntry {
    fn from(entry: &AccessEntry) -> Self {
        Self {
            principal_arn: Deferred::from(&entry.principal_arn),
            entry_type: entry.entry_type.unwrap_or(AccessEntryType::Standard),
            username: entry.username.clone(),
            kubernetes_groups: entry.kubernetes_groups.clone(),
            access_policies: entry.access_policies.clone(),
            tags: entry.tags.clone(),
        }
    }
}

/// Rejects identity overrides on entry types whose identity EKS manages.
pub fn validate_access_entries(entries: &BTreeMap<String, AccessEntry>) -> Problems {
    let mut problems = Problems::new();
    for (key, entry) in entries {
        let entry_type = entry.entry_type.unwrap_or(AccessEntryType::Standard);
        if entry_type.allows_custom_identity() {
            continue;
        }
        problems.check(
            entry.username.is_some(),
            format!("accessEntries.{}.username", key),
            format!("a username cannot be set on access entries of type '{}'", entry_type),
        );
        problems.check(
            entry.kubernetes_groups.is_some(),
            format!("accessEntries.{}.kubernetesGroups", key),
            format!(
                "kubernetes groups cannot be set on access entries of type '{}'",
                entry_type
            ),
        );
    }
    problems
}

/// Declares one access entry per key, plus one policy association per access policy. Every node
/// waits for the cluster and for whatever the principal ARN refers to.
pub fn compose_access_entries(
    graph: &mut Graph,
    name: &str,
    cluster_name: &Deferred,
    entries: &BTreeMap<String, ResolvedAccessEntry>,
    tags: &BTreeMap<String, String>,
) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        let entry_name = format!("{}-{}", name, key);
        let mut entry_tags = tags.clone();
        entry_tags.extend(entry.tags.clone().unwrap_or_default());
        graph.add(
            ResourceNode::new(&entry_name, ResourceType::AccessEntry)
                .property("clusterName", cluster_name.clone())
                .property("principalArn", entry.principal_arn.clone())
                .property("type", entry.entry_type.to_string())
                .optional_property("userName", entry.username.clone())
                .optional_property("kubernetesGroups", entry.kubernetes_groups.clone())
                .property(
                    "tags",
                    Deferred::from_serialize("access entry tags", &entry_tags)?,
                ),
        )?;

        for (policy_key, association) in &entry.access_policies {
            let association_name = format!("{}-{}-{}", name, key, policy_key);
            let scope = serde_json::to_value(&association.access_scope).context(
                error::JsonSerializeSnafu {
                    what: "access scope",
                },
            )?;
            graph.add(
                ResourceNode::new(&association_name, ResourceType::AccessPolicyAssociation)
                    .property("clusterName", cluster_name.clone())
                    .property("principalArn", entry.principal_arn.clone())
                    .property("policyArn", &association.policy_arn)
                    .property("accessScope", scope)
                    .depends_on(&entry_name),
            )?;
        }
        names.push(entry_name);
    }
    Ok(names)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::deferred::RealizedState;
    use eks_model::{AccessPolicyAssociation, AccessScope, AccessScopeType};
    use maplit::btreemap;
    use serde_json::json;

    #[test]
    fn map_roles_lists_every_mapping() {
        let yaml = map_roles_yaml(&json!([
            { "roleArn": "arn:aws:iam::1:role/admin", "username": "admin", "groups": ["system:masters"] },
            { "roleArn": "arn:aws:iam::1:role/node", "username": NODE_USERNAME, "groups": NODE_BOOTSTRAP_GROUPS },
        ]))
        .unwrap();
        assert!(!yaml.starts_with("---"));
        let parsed: Vec<BTreeMap<String, serde_yaml::Value>> = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed[1]["rolearn"],
            serde_yaml::Value::String("arn:aws:iam::1:role/node".to_string())
        );
        assert!(parsed[0].contains_key("groups"));
    }

    #[test]
    fn map_users_uses_userarn() {
        let yaml = map_users_yaml(&json!([
            { "userArn": "arn:aws:iam::1:user/pat", "username": "pat", "groups": [] },
        ]))
        .unwrap();
        assert!(yaml.contains("userarn: "));
        assert!(map_users_yaml(&json!([{ "nope": 1 }])).is_err());
    }

    #[test]
    fn downgrades_are_forbidden() {
        use AuthenticationMode::*;
        assert!(check_transition(None, ConfigMap).is_ok());
        assert!(check_transition(Some(ConfigMap), ApiAndConfigMap).is_ok());
        assert!(check_transition(Some(ApiAndConfigMap), Api).is_ok());
        assert!(check_transition(Some(ConfigMap), Api).is_ok());
        assert!(matches!(
            check_transition(Some(Api), ConfigMap),
            Err(error::Error::AuthModeDowngradeForbidden { .. })
        ));
        assert!(matches!(
            check_transition(Some(ApiAndConfigMap), ConfigMap),
            Err(error::Error::AuthModeDowngradeForbidden { .. })
        ));
    }

    #[test]
    fn mode_specific_options() {
        let problems = validate(AuthenticationMode::ConfigMap, true, false, true);
        let err = problems.into_result().unwrap_err();
        assert_eq!(err.invalid_fields()[0].path, "accessEntries");
        let err = validate(AuthenticationMode::Api, true, true, true)
            .into_result()
            .unwrap_err();
        assert_eq!(err.invalid_fields().len(), 2);
    }

    #[test]
    fn config_map_evaluates_to_yaml() {
        let mut graph = Graph::new();
        graph
            .add(ResourceNode::new("c-provider", ResourceType::KubernetesProvider))
            .unwrap();
        graph
            .add(ResourceNode::new("c-instanceRole", ResourceType::Role))
            .unwrap();
        let name = compose_aws_auth(
            &mut graph,
            "c",
            "c-provider",
            vec![instance_role_mapping(Deferred::attr("c-instanceRole", "arn"))],
            None,
            BTreeSet::new(),
        )
        .unwrap();
        let node = graph.get(&name).unwrap();
        assert_eq!(node.provider.as_deref(), Some("c-provider"));
        assert!(node.dependencies().contains("c-instanceRole"));
        let realized = RealizedState::new()
            .with_resource("c-instanceRole", json!({ "arn": "arn:aws:iam::1:role/i" }));
        let data = node.get("data").unwrap().evaluate(&realized).unwrap();
        assert!(data["mapRoles"]
            .as_str()
            .unwrap()
            .contains("rolearn: \"arn:aws:iam::1:role/i\"")
            || data["mapRoles"]
                .as_str()
                .unwrap()
                .contains("rolearn: arn:aws:iam::1:role/i"));
        assert!(data.get("mapUsers").is_none());
    }

    #[test]
    fn access_policy_associations_follow_their_entry() {
        let mut graph = Graph::new();
        let entries = btreemap! {
            "admin".to_string() => ResolvedAccessEntry::from(&AccessEntry {
                principal_arn: "arn:aws:iam::1:role/admin".to_string(),
                entry_type: None,
                username: None,
                kubernetes_groups: None,
                access_policies: btreemap! {
                    "view".to_string() => AccessPolicyAssociation {
                        policy_arn: "arn:aws:eks::aws:cluster-access-policy/AmazonEKSViewPolicy".to_string(),
                        access_scope: AccessScope {
                            scope_type: AccessScopeType::Namespace,
                            namespaces: Some(vec!["default".to_string()]),
                        },
                    },
                },
                tags: None,
            }),
        };
        compose_access_entries(
            &mut graph,
            "c",
            &Deferred::from("c-phys"),
            &entries,
            &BTreeMap::new(),
        )
        .unwrap();
        let association = graph.get("c-admin-view").unwrap();
        assert!(association.dependencies().contains("c-admin"));
        assert_eq!(
            association.get("accessScope").unwrap().as_known().unwrap(),
            json!({ "type": "namespace", "namespaces": ["default"] })
        );
        assert_eq!(
            graph.get("c-admin").unwrap().get("type").unwrap().as_str(),
            Some("STANDARD")
        );
    }
}
