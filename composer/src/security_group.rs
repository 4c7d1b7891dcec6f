//! Security groups of the control plane and of worker nodes, and the rules between them.

use crate::deferred::Deferred;
use crate::error::Result;
use crate::graph::{Graph, ResourceNode, ResourceType};
use log::debug;
use std::collections::BTreeMap;

const ALL_PROTOCOLS: &str = "-1";
const ANYWHERE: &str = "0.0.0.0/0";

/// One `aws:ec2:SecurityGroupRule`.
#[derive(Debug, Clone)]
struct Rule<'a> {
    description: &'a str,
    direction: &'a str,
    protocol: &'a str,
    from_port: i64,
    to_port: i64,
}

impl Rule<'_> {
    fn node(&self, name: String, security_group_id: Deferred) -> ResourceNode {
        ResourceNode::new(name, ResourceType::SecurityGroupRule)
            .property("description", self.description)
            .property("type", self.direction)
            .property("protocol", self.protocol)
            .property("fromPort", self.from_port)
            .property("toPort", self.to_port)
            .property("securityGroupId", security_group_id)
    }
}

/// The security group wiring of a cluster. When the default security groups are skipped, both
/// ids point at the security group EKS creates for the cluster and there is no ingress rule.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroups {
    pub cluster_security_group: Option<String>,
    pub cluster_security_group_id: Deferred,
    pub node_security_group: Option<String>,
    pub node_security_group_id: Deferred,
    pub cluster_ingress_rule: Option<String>,
    pub cluster_ingress_rule_id: Deferred,
}

impl SecurityGroups {
    /// The wiring when EKS manages the only security group.
    pub fn eks_managed(cluster_node: &str) -> Self {
        let id = Deferred::attr(cluster_node, "vpcConfig.clusterSecurityGroupId");
        Self {
            cluster_security_group: None,
            cluster_security_group_id: id.clone(),
            node_security_group: None,
            node_security_group_id: id,
            cluster_ingress_rule: None,
            cluster_ingress_rule_id: Deferred::from(""),
        }
    }
}

/// The control plane's security group: the caller's, or a new one with open egress and no
/// ingress. Returns the group's node, if created, and its id.
pub fn compose_cluster_security_group(
    graph: &mut Graph,
    name: &str,
    vpc_id: &str,
    given: Option<&str>,
    tags: &BTreeMap<String, String>,
) -> Result<(Option<String>, Deferred)> {
    if let Some(id) = given {
        debug!("Adopting cluster security group '{}'", id);
        return Ok((None, Deferred::from(id)));
    }
    let node = format!("{}-eksClusterSecurityGroup", name);
    let mut group_tags = BTreeMap::new();
    group_tags.insert("Name".to_string(), node.clone());
    group_tags.extend(tags.clone());
    graph.add(
        ResourceNode::new(&node, ResourceType::SecurityGroup)
            .property("vpcId", vpc_id)
            .property("revokeRulesOnDelete", true)
            .property("tags", group_tags),
    )?;
    graph.add(
        Rule {
            description: "Allow internet access.",
            direction: "egress",
            protocol: ALL_PROTOCOLS,
            from_port: 0,
            to_port: 0,
        }
        .node(
            format!("{}-eksClusterInternetEgressRule", name),
            Deferred::attr(&node, "id"),
        )
        .property("cidrBlocks", vec![ANYWHERE.to_string()]),
    )?;
    let id = Deferred::attr(&node, "id");
    Ok((Some(node), id))
}

/// Inputs of a node security group.
#[derive(Debug, Clone)]
pub struct NodeGroupSecurityGroupArgs {
    pub vpc_id: Deferred,
    pub cluster_security_group_id: Deferred,
    /// The physical cluster name, used in the ownership tag.
    pub cluster_name: String,
    pub tags: BTreeMap<String, String>,
}

/// A security group for worker nodes and the rule that lets them reach the API server.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGroupSecurityGroup {
    pub security_group: String,
    pub security_group_id: Deferred,
    pub cluster_ingress_rule: String,
    pub cluster_ingress_rule_id: Deferred,
}

impl NodeGroupSecurityGroup {
    /// Declares the node group, its rules and the API server ingress rule on the cluster's
    /// security group.
    pub fn compose(graph: &mut Graph, name: &str, args: &NodeGroupSecurityGroupArgs) -> Result<Self> {
        let node = format!("{}-nodeSecurityGroup", name);
        let mut group_tags = BTreeMap::new();
        group_tags.insert("Name".to_string(), node.clone());
        group_tags.insert(
            format!("kubernetes.io/cluster/{}", args.cluster_name),
            "owned".to_string(),
        );
        group_tags.extend(args.tags.clone());
        graph.add(
            ResourceNode::new(&node, ResourceType::SecurityGroup)
                .property("vpcId", args.vpc_id.clone())
                .property("revokeRulesOnDelete", true)
                .property("tags", group_tags),
        )?;
        let node_id = Deferred::attr(&node, "id");
        let cluster_id = &args.cluster_security_group_id;

        graph.add(
            Rule {
                description: "Allow nodes to communicate with each other",
                direction: "ingress",
                protocol: ALL_PROTOCOLS,
                from_port: 0,
                to_port: 0,
            }
            .node(format!("{}-eksNodeIngressRule", name), node_id.clone())
            .property("self", true),
        )?;
        graph.add(
            Rule {
                description: "Allow worker Kubelets and pods to receive communication from the \
                              cluster control plane",
                direction: "ingress",
                protocol: "tcp",
                from_port: 1025,
                to_port: 65535,
            }
            .node(format!("{}-eksNodeClusterIngressRule", name), node_id.clone())
            .property("sourceSecurityGroupId", cluster_id.clone()),
        )?;
        graph.add(
            Rule {
                description: "Allow pods running extension API servers on port 443 to receive \
                              communication from cluster control plane",
                direction: "ingress",
                protocol: "tcp",
                from_port: 443,
                to_port: 443,
            }
            .node(
                format!("{}-eksExtApiServerClusterIngressRule", name),
                node_id.clone(),
            )
            .property("sourceSecurityGroupId", cluster_id.clone()),
        )?;
        graph.add(
            Rule {
                description: "Allow internet access.",
                direction: "egress",
                protocol: ALL_PROTOCOLS,
                from_port: 0,
                to_port: 0,
            }
            .node(format!("{}-eksNodeInternetEgressRule", name), node_id.clone())
            .property("cidrBlocks", vec![ANYWHERE.to_string()]),
        )?;

        let rule = format!("{}-eksClusterIngressRule", name);
        graph.add(
            Rule {
                description: "Allow pods to communicate with the cluster API Server",
                direction: "ingress",
                protocol: "tcp",
                from_port: 443,
                to_port: 443,
            }
            .node(rule.clone(), cluster_id.clone())
            .property("sourceSecurityGroupId", node_id.clone()),
        )?;
        debug!("Declared node security group '{}'", node);

        Ok(Self {
            security_group_id: node_id,
            security_group: node,
            cluster_ingress_rule_id: Deferred::attr(&rule, "id"),
            cluster_ingress_rule: rule,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreeset;

    #[test]
    fn api_ingress_rule_depends_on_both_groups() {
        let mut graph = Graph::new();
        let (cluster_sg, cluster_sg_id) =
            compose_cluster_security_group(&mut graph, "c", "vpc-1", None, &BTreeMap::new())
                .unwrap();
        assert_eq!(cluster_sg.as_deref(), Some("c-eksClusterSecurityGroup"));
        let nodes = NodeGroupSecurityGroup::compose(
            &mut graph,
            "c",
            &NodeGroupSecurityGroupArgs {
                vpc_id: Deferred::from("vpc-1"),
                cluster_security_group_id: cluster_sg_id,
                cluster_name: "c-eksCluster".to_string(),
                tags: BTreeMap::new(),
            },
        )
        .unwrap();
        let rule = graph.get(&nodes.cluster_ingress_rule).unwrap();
        assert_eq!(
            rule.dependencies(),
            btreeset! {
                "c-eksClusterSecurityGroup".to_string(),
                "c-nodeSecurityGroup".to_string(),
            }
        );
        assert_eq!(rule.get("fromPort"), Some(&Deferred::from(443_i64)));

        let kubelet = graph.get("c-eksNodeClusterIngressRule").unwrap();
        assert_eq!(kubelet.get("fromPort"), Some(&Deferred::from(1025_i64)));
        assert_eq!(kubelet.get("toPort"), Some(&Deferred::from(65535_i64)));

        let tags = graph
            .get("c-nodeSecurityGroup")
            .unwrap()
            .get("tags")
            .unwrap()
            .as_known()
            .unwrap();
        assert_eq!(tags["kubernetes.io/cluster/c-eksCluster"], "owned");
        assert_eq!(graph.len(), 7);
    }

    #[test]
    fn adopted_cluster_group_gets_no_rules() {
        let mut graph = Graph::new();
        let (node, id) = compose_cluster_security_group(
            &mut graph,
            "c",
            "vpc-1",
            Some("sg-123"),
            &BTreeMap::new(),
        )
        .unwrap();
        assert!(node.is_none());
        assert_eq!(id, Deferred::from("sg-123"));
        assert!(graph.is_empty());
    }

    #[test]
    fn eks_managed_group_is_shared() {
        let groups = SecurityGroups::eks_managed("c-eksCluster");
        assert_eq!(groups.cluster_security_group_id, groups.node_security_group_id);
        assert_eq!(groups.cluster_ingress_rule_id, Deferred::from(""));
    }
}
