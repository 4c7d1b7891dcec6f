//! The desired-state graph handed to the resource engine.

use crate::deferred::Deferred;
use crate::error::{self, Result};
use log::trace;
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use snafu::ensure;
use std::collections::{BTreeMap, BTreeSet};
use topological_sort::TopologicalSort;

/// The kinds of sub-resources the composer declares.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "aws:autoscaling:Group")]
    AutoScalingGroup,
    #[serde(rename = "aws:cloudformation:Stack")]
    CloudFormationStack,
    #[serde(rename = "aws:ec2:KeyPair")]
    KeyPair,
    #[serde(rename = "aws:ec2:LaunchConfiguration")]
    LaunchConfiguration,
    #[serde(rename = "aws:ec2:LaunchTemplate")]
    LaunchTemplate,
    #[serde(rename = "aws:ec2:PlacementGroup")]
    PlacementGroup,
    #[serde(rename = "aws:ec2:SecurityGroup")]
    SecurityGroup,
    #[serde(rename = "aws:ec2:SecurityGroupRule")]
    SecurityGroupRule,
    #[serde(rename = "aws:ec2:Tag")]
    Tag,
    #[serde(rename = "aws:eks:AccessEntry")]
    AccessEntry,
    #[serde(rename = "aws:eks:AccessPolicyAssociation")]
    AccessPolicyAssociation,
    #[serde(rename = "aws:eks:Addon")]
    Addon,
    #[serde(rename = "aws:eks:Cluster")]
    Cluster,
    #[serde(rename = "aws:eks:FargateProfile")]
    FargateProfile,
    #[serde(rename = "aws:eks:NodeGroup")]
    NodeGroup,
    #[serde(rename = "aws:iam:InstanceProfile")]
    InstanceProfile,
    #[serde(rename = "aws:iam:OpenIdConnectProvider")]
    OpenIdConnectProvider,
    #[serde(rename = "aws:iam:Role")]
    Role,
    #[serde(rename = "aws:iam:RolePolicyAttachment")]
    RolePolicyAttachment,
    #[serde(rename = "kubernetes:core/v1:ConfigMap")]
    ConfigMap,
    #[serde(rename = "kubernetes:apps/v1:DaemonSetPatch")]
    DaemonSetPatch,
    #[serde(rename = "kubernetes:storage.k8s.io/v1:StorageClass")]
    StorageClass,
    #[serde(rename = "pulumi:providers:kubernetes")]
    KubernetesProvider,
    #[serde(rename = "pulumi:providers:aws")]
    AwsProvider,
}

impl ResourceType {
    /// Whether the resource lives in the cluster rather than in the AWS account.
    pub fn is_kubernetes(&self) -> bool {
        matches!(
            self,
            Self::ConfigMap | Self::DaemonSetPatch | Self::StorageClass | Self::KubernetesProvider
        )
    }
}

derive_display_from_serialize!(ResourceType);
derive_fromstr_from_deserialize!(ResourceType);

/// One sub-resource of the desired state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub properties: BTreeMap<String, Deferred>,
    /// Ordering edges that are not visible through property references.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
    /// False for resources that were supplied by the caller and must not be mutated.
    pub owned: bool,
    /// The provider node this resource is applied through, when not the ambient one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Property paths whose drift the engine must not act on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_changes: Vec<String>,
    /// Property paths whose change requires replacing the resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replace_on_changes: Vec<String>,
    /// Set when a property in `replace_on_changes` differs from the previous composition.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replace: bool,
}

impl ResourceNode {
    pub fn new<S: Into<String>>(name: S, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            resource_type,
            properties: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            owned: true,
            provider: None,
            ignore_changes: Vec::new(),
            replace_on_changes: Vec::new(),
            replace: false,
        }
    }

    pub fn property<K: Into<String>, V: Into<Deferred>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the property only when a value is present.
    pub fn optional_property<K, V>(self, key: K, value: Option<V>) -> Self
    where
        K: Into<String>,
        V: Into<Deferred>,
    {
        match value {
            Some(value) => self.property(key, value),
            None => self,
        }
    }

    pub fn depends_on<S: Into<String>>(mut self, node: S) -> Self {
        self.depends_on.insert(node.into());
        self
    }

    pub fn depends_on_all<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn provider<S: Into<String>>(mut self, provider: S) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn ignore_changes<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_changes.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn replace_on_changes<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replace_on_changes
            .extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    pub fn not_owned(mut self) -> Self {
        self.owned = false;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Deferred> {
        self.properties.get(key)
    }

    /// Every node this one must be created after.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = self.depends_on.clone();
        for value in self.properties.values() {
            deps.extend(value.references());
        }
        if let Some(provider) = &self.provider {
            deps.insert(provider.clone());
        }
        deps.remove(&self.name);
        deps
    }
}

/// A set of resource nodes keyed by logical name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    nodes: BTreeMap<String, ResourceNode>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a node. Logical names are unique within a graph.
    pub fn add(&mut self, node: ResourceNode) -> Result<()> {
        ensure!(
            !self.nodes.contains_key(&node.name),
            error::DuplicateNodeSnafu { name: &node.name }
        );
        trace!("Declaring {} '{}'", node.resource_type, node.name);
        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    /// Moves every node of `other` into this graph.
    pub fn extend(&mut self, other: Graph) -> Result<()> {
        for node in other.nodes.into_values() {
            self.add(node)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ResourceNode> {
        self.nodes.remove(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn of_type(&self, resource_type: ResourceType) -> Vec<&ResourceNode> {
        self.nodes
            .values()
            .filter(|node| node.resource_type == resource_type)
            .collect()
    }

    /// Node names in an order that creates every dependency before its dependents. Nodes that
    /// become ready together are ordered by name so the result is stable.
    pub fn creation_order(&self) -> Result<Vec<String>> {
        let mut topo_sort = TopologicalSort::<String>::new();
        for node in self.nodes.values() {
            topo_sort.insert(node.name.clone());
            for dependency in node.dependencies() {
                ensure!(
                    self.nodes.contains_key(&dependency),
                    error::UnknownDependencySnafu {
                        node: &node.name,
                        dependency,
                    }
                );
                topo_sort.add_dependency(dependency, node.name.clone());
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        loop {
            let mut ready = topo_sort.pop_all();
            if ready.is_empty() {
                break;
            }
            ready.sort();
            order.extend(ready);
        }
        if !topo_sort.is_empty() {
            let emitted: BTreeSet<&String> = order.iter().collect();
            return error::CyclicDependencySnafu {
                nodes: self
                    .nodes
                    .keys()
                    .filter(|name| !emitted.contains(name))
                    .cloned()
                    .collect::<Vec<_>>(),
            }
            .fail();
        }
        Ok(order)
    }

    /// The reverse of [`Graph::creation_order`].
    pub fn destruction_order(&self) -> Result<Vec<String>> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }
}

crate::impl_display_as_json!(Graph);
