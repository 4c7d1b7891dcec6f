//! Assembles the user data that makes a worker node join its cluster on first boot.

use crate::error::{self, Error, Problems, Result};
use eks_model::{NodeadmOptions, OperatingSystem, Taint};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use toml::map::Entry;

const MANAGED_BOUNDARY: &str = "==MYBOUNDARY==";
const NODEADM_BOUNDARY: &str = "BOUNDARY";
const NODEADM_CONTENT_TYPE: &str = "application/node.eks.aws";
const SHELL_CONTENT_TYPE: &str = "text/x-shellscript; charset=\"us-ascii\"";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeGroupType {
    Managed,
    SelfManagedV1,
    SelfManagedV2,
}

impl NodeGroupType {
    fn is_self_managed(&self) -> bool {
        !matches!(self, NodeGroupType::Managed)
    }
}

/// Everything about a node's user data that is known while composing. The cluster endpoint,
/// certificate authority and service CIDR are supplied when the user data is rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDataSpec {
    pub operating_system: OperatingSystem,
    pub node_group_type: NodeGroupType,
    pub cluster_name: String,
    /// Names the heredoc of self-managed extra user data and the stack `cfn-signal` reports to.
    pub stack_name: Option<String>,
    /// The region `cfn-signal` reports to.
    pub region: Option<String>,
    pub kubelet_extra_args: Option<String>,
    pub bootstrap_extra_args: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: BTreeMap<String, Taint>,
    /// A script run after bootstrapping on self-managed nodes.
    pub extra_user_data: Option<String>,
    pub bottlerocket_settings: Option<Value>,
    #[serde(default)]
    pub nodeadm_extra_options: Vec<NodeadmOptions>,
}

impl UserDataSpec {
    pub fn new<S: Into<String>>(
        operating_system: OperatingSystem,
        node_group_type: NodeGroupType,
        cluster_name: S,
    ) -> Self {
        Self {
            operating_system: operating_system.resolve(),
            node_group_type,
            cluster_name: cluster_name.into(),
            stack_name: None,
            region: None,
            kubelet_extra_args: None,
            bootstrap_extra_args: None,
            labels: BTreeMap::new(),
            taints: BTreeMap::new(),
            extra_user_data: None,
            bottlerocket_settings: None,
            nodeadm_extra_options: Vec::new(),
        }
    }

    /// Reports the options the operating system cannot honor. `prefix` is prepended to each
    /// option path.
    pub fn validate(&self, prefix: &str) -> Problems {
        let mut problems = Problems::new();
        let path = |field: &str| format!("{}{}", prefix, field);
        let set = |s: &Option<String>| s.as_ref().map(|s| !s.is_empty()).unwrap_or(false);
        match self.operating_system.resolve() {
            OperatingSystem::Al2 | OperatingSystem::Recommended => {
                problems.check(
                    self.node_group_type != NodeGroupType::SelfManagedV1
                        && self.bottlerocket_settings.is_some(),
                    path("bottlerocketSettings"),
                    "not supported for Linux based user data",
                );
            }
            OperatingSystem::Al2023 => {
                problems.check(
                    self.bottlerocket_settings.is_some(),
                    path("bottlerocketSettings"),
                    "not supported for nodeadm based user data",
                );
                problems.check(
                    set(&self.bootstrap_extra_args),
                    path("bootstrapExtraArgs"),
                    "not supported for nodeadm based user data",
                );
            }
            OperatingSystem::Bottlerocket => {
                problems.check(
                    set(&self.bootstrap_extra_args),
                    path("bootstrapExtraArgs"),
                    "not supported with Bottlerocket",
                );
                problems.check(
                    set(&self.kubelet_extra_args),
                    path("kubeletExtraArgs"),
                    "not supported with Bottlerocket",
                );
                problems.check(
                    self.node_group_type.is_self_managed() && set(&self.extra_user_data),
                    path("nodeUserData"),
                    "Bottlerocket does not support running scripts as part of the user data",
                );
                if let Some(settings) = &self.bottlerocket_settings {
                    problems.check(
                        !settings.is_object(),
                        path("bottlerocketSettings"),
                        "must be an object",
                    );
                }
            }
        }
        problems
    }

    /// Renders the user data for a realized cluster.
    pub fn render(&self, endpoint: &str, certificate: &str, service_cidr: &str) -> Result<String> {
        self.validate("").into_result()?;
        match self.operating_system.resolve() {
            OperatingSystem::Al2 | OperatingSystem::Recommended => {
                Ok(self.linux_user_data(endpoint, certificate))
            }
            OperatingSystem::Al2023 => self.nodeadm_user_data(endpoint, certificate, service_cidr),
            OperatingSystem::Bottlerocket => {
                self.bottlerocket_user_data(endpoint, certificate, service_cidr)
            }
        }
    }

    /// Extra kubelet flags followed by flags that register the node's labels and taints.
    pub fn kubelet_flags(&self) -> Vec<String> {
        let mut flags: Vec<String> = self
            .kubelet_extra_args
            .as_deref()
            .map(|args| {
                args.split(' ')
                    .filter(|arg| !arg.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !self.labels.is_empty() {
            let labels: Vec<String> = self
                .labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            flags.push(format!("--node-labels={}", labels.join(",")));
        }
        if !self.taints.is_empty() {
            // key=value:effect, or key:effect when the value is empty
            let taints: Vec<String> = self
                .taints
                .iter()
                .map(|(k, taint)| {
                    if taint.value.is_empty() {
                        format!("{}:{}", k, taint.effect)
                    } else {
                        format!("{}={}:{}", k, taint.value, taint.effect)
                    }
                })
                .collect();
            flags.push(format!("--register-with-taints={}", taints.join(",")));
        }
        flags
    }

    fn stack_name(&self) -> &str {
        self.stack_name.as_deref().unwrap_or(&self.cluster_name)
    }

    fn cfn_signal(&self) -> String {
        format!(
            "/opt/aws/bin/cfn-signal --exit-code $? --stack {} --resource NodeGroup --region {}\n",
            self.stack_name(),
            self.region.as_deref().unwrap_or_default()
        )
    }

    fn extra_user_data(&self) -> Option<&str> {
        self.extra_user_data
            .as_deref()
            .filter(|s| !s.is_empty() && self.node_group_type.is_self_managed())
    }

    fn linux_user_data(&self, endpoint: &str, certificate: &str) -> String {
        let kubelet_flags = self.kubelet_flags();
        let mut bootstrap_args = self
            .bootstrap_extra_args
            .as_ref()
            .map(|args| format!(" {}", args))
            .unwrap_or_default();
        match kubelet_flags.len() {
            0 => {}
            // A single flag is not quoted so existing node groups keep their user data.
            1 => bootstrap_args.push_str(&format!(" --kubelet-extra-args {}", kubelet_flags[0])),
            _ => bootstrap_args.push_str(&format!(
                " --kubelet-extra-args '{}'",
                kubelet_flags.join(" ")
            )),
        }

        let base = format!(
            "#!/bin/bash\n\n/etc/eks/bootstrap.sh --apiserver-endpoint \"{}\" --b64-cluster-ca \"{}\" \"{}\"{}",
            endpoint, certificate, self.cluster_name, bootstrap_args
        );

        if self.node_group_type == NodeGroupType::Managed {
            return format!(
                "MIME-Version: 1.0\nContent-Type: multipart/mixed; boundary=\"{b}\"\n\n--{b}\nContent-Type: {ct}\n\n{base}\n--{b}--",
                b = MANAGED_BOUNDARY,
                ct = SHELL_CONTENT_TYPE,
                base = base
            );
        }

        let extra = match self.extra_user_data() {
            Some(script) => format!(
                "cat >/opt/user-data <<{stack}-user-data\n{script}\n{stack}-user-data\nchmod +x /opt/user-data\n/opt/user-data\n",
                stack = self.stack_name(),
                script = script
            ),
            None => String::new(),
        };
        let user_data = format!("{}\n{}\n", base, extra);
        if self.node_group_type == NodeGroupType::SelfManagedV1 {
            format!("{}{}", user_data, self.cfn_signal())
        } else {
            user_data
        }
    }

    fn nodeadm_user_data(
        &self,
        endpoint: &str,
        certificate: &str,
        service_cidr: &str,
    ) -> Result<String> {
        let mut parts = vec![MimePart {
            content_type: NODEADM_CONTENT_TYPE.to_string(),
            content: nodeadm_document(&NodeConfig {
                api_version: "node.eks.aws/v1alpha1",
                kind: "NodeConfig",
                spec: NodeConfigSpec {
                    cluster: Some(NodeConfigCluster {
                        name: self.cluster_name.clone(),
                        api_server_endpoint: endpoint.to_string(),
                        certificate_authority: certificate.to_string(),
                        cidr: service_cidr.to_string(),
                    }),
                    kubelet: None,
                },
            })?,
        }];

        // Nodeadm merges its documents in order, so the kubelet flags get their own section.
        let flags = self.kubelet_flags();
        if !flags.is_empty() {
            parts.push(MimePart {
                content_type: NODEADM_CONTENT_TYPE.to_string(),
                content: nodeadm_document(&NodeConfig {
                    api_version: "node.eks.aws/v1alpha1",
                    kind: "NodeConfig",
                    spec: NodeConfigSpec {
                        cluster: None,
                        kubelet: Some(NodeConfigKubelet { flags }),
                    },
                })?,
            });
        }

        parts.extend(self.nodeadm_extra_options.iter().map(|option| MimePart {
            content_type: option.content_type.clone(),
            content: option.content.clone(),
        }));

        if let Some(script) = self.extra_user_data() {
            parts.push(MimePart {
                content_type: SHELL_CONTENT_TYPE.to_string(),
                content: script.to_string(),
            });
        }

        if self.node_group_type == NodeGroupType::SelfManagedV1 {
            parts.push(MimePart {
                content_type: SHELL_CONTENT_TYPE.to_string(),
                content: format!("#!/bin/bash\n\n{}", self.cfn_signal()),
            });
        }

        let mut user_data = format!(
            "MIME-Version: 1.0\nContent-Type: multipart/mixed; boundary=\"{}\"\n\n",
            NODEADM_BOUNDARY
        );
        for part in parts {
            user_data.push_str(&format!(
                "--{}\nContent-Type: {}\n\n{}\n",
                NODEADM_BOUNDARY, part.content_type, part.content
            ));
        }
        user_data.push_str(&format!("--{}--\n", NODEADM_BOUNDARY));
        Ok(user_data)
    }

    fn bottlerocket_user_data(
        &self,
        endpoint: &str,
        certificate: &str,
        service_cidr: &str,
    ) -> Result<String> {
        let mut kubernetes = toml::map::Map::new();
        kubernetes.insert("cluster-name".into(), self.cluster_name.clone().into());
        kubernetes.insert("api-server".into(), endpoint.into());
        kubernetes.insert("cluster-certificate".into(), certificate.into());
        kubernetes.insert(
            "cluster-dns-ip".into(),
            cluster_dns_ip(service_cidr)?.into(),
        );
        if !self.labels.is_empty() {
            let labels: toml::map::Map<String, toml::Value> = self
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), toml::Value::String(v.clone())))
                .collect();
            kubernetes.insert("node-labels".into(), toml::Value::Table(labels));
        }
        if !self.taints.is_empty() {
            // An empty value is rendered as an empty string before the effect.
            let taints: toml::map::Map<String, toml::Value> = self
                .taints
                .iter()
                .map(|(k, taint)| {
                    (
                        k.clone(),
                        toml::Value::String(format!("{}:{}", taint.value, taint.effect)),
                    )
                })
                .collect();
            kubernetes.insert("node-taints".into(), toml::Value::Table(taints));
        }

        let mut settings = toml::map::Map::new();
        settings.insert("kubernetes".into(), toml::Value::Table(kubernetes));
        if self.node_group_type == NodeGroupType::SelfManagedV1 {
            let mut cloudformation = toml::map::Map::new();
            cloudformation.insert("should-signal".into(), true.into());
            cloudformation.insert("stack-name".into(), self.stack_name().into());
            cloudformation.insert("logical-resource-id".into(), "NodeGroup".into());
            settings.insert("cloudformation".into(), toml::Value::Table(cloudformation));
        }
        let mut base = toml::map::Map::new();
        base.insert("settings".into(), toml::Value::Table(settings));
        let mut base = toml::Value::Table(base);

        if let Some(user_settings) = &self.bottlerocket_settings {
            let user_settings = toml::Value::try_from(user_settings).context(
                error::TomlSerializeSnafu {
                    what: "bottlerocketSettings",
                },
            )?;
            merge_values(&user_settings, &mut base, "")?;
        }

        toml::to_string(&base).context(error::TomlSerializeSnafu {
            what: "Bottlerocket settings",
        })
    }
}

struct MimePart {
    content_type: String,
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeConfig {
    api_version: &'static str,
    kind: &'static str,
    spec: NodeConfigSpec,
}

#[derive(Serialize)]
struct NodeConfigSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    cluster: Option<NodeConfigCluster>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kubelet: Option<NodeConfigKubelet>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeConfigCluster {
    name: String,
    api_server_endpoint: String,
    certificate_authority: String,
    cidr: String,
}

#[derive(Serialize)]
struct NodeConfigKubelet {
    flags: Vec<String>,
}

fn nodeadm_document(config: &NodeConfig) -> Result<String> {
    Ok(format!("---\n{}", yaml_body(config, "nodeadm NodeConfig")?))
}

/// A YAML document without the leading document marker and with a trailing newline.
pub(crate) fn yaml_body<T: Serialize>(value: &T, what: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(value).context(error::YamlSerializeSnafu { what })?;
    let mut body = yaml
        .strip_prefix("---\n")
        .or_else(|| yaml.strip_prefix("---"))
        .unwrap_or(&yaml)
        .to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    Ok(body)
}

/// Overlays user settings onto generated ones. Tables are merged key by key, so generated settings
/// the user leaves out survive; scalars and arrays are replaced whole. `key` is the dotted path of
/// the two values and names the setting when their types disagree.
pub fn merge_values(merge_from: &toml::Value, merge_into: &mut toml::Value, key: &str) -> Result<()> {
    if !merge_into.same_type(merge_from) {
        return error::TomlMergeSnafu { key }.fail();
    }

    match merge_from {
        toml::Value::String(_)
        | toml::Value::Integer(_)
        | toml::Value::Float(_)
        | toml::Value::Boolean(_)
        | toml::Value::Datetime(_)
        | toml::Value::Array(_) => *merge_into = merge_from.clone(),

        toml::Value::Table(from) => {
            let to = merge_into
                .as_table_mut()
                .context(error::TomlMergeSnafu { key })?;
            for (k_from, v_from) in from.iter() {
                match to.entry(k_from) {
                    Entry::Vacant(e) => {
                        e.insert(v_from.clone());
                    }
                    // Merge recursively so distinct inner keys on the left survive.
                    Entry::Occupied(ref mut e) => {
                        let child = if key.is_empty() {
                            k_from.clone()
                        } else {
                            format!("{}.{}", key, k_from)
                        };
                        merge_values(v_from, e.get_mut(), &child)?;
                    }
                }
            }
        }
    }

    Ok(())
}

/// The address of the cluster DNS service: the network address of the service CIDR plus ten.
/// Works for both IPv4 and IPv6 CIDRs.
pub fn cluster_dns_ip(service_cidr: &str) -> Result<String> {
    let fail = |message: String| Error::Evaluation {
        func: "clusterDnsIp".to_string(),
        message: format!(
            "Couldn't calculate the cluster dns ip based on the service CIDR '{}': {}",
            service_cidr, message
        ),
    };
    let (address, prefix) = service_cidr
        .split_once('/')
        .ok_or_else(|| fail("missing prefix length".to_string()))?;
    let prefix: u32 = prefix
        .parse()
        .map_err(|e| fail(format!("invalid prefix length: {}", e)))?;
    let address: IpAddr = address
        .parse()
        .map_err(|e| fail(format!("invalid address: {}", e)))?;
    match address {
        IpAddr::V4(v4) => {
            if prefix > 32 {
                return Err(fail("prefix length exceeds 32".to_string()));
            }
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix)
            };
            let network = u32::from(v4) & mask;
            let dns = network
                .checked_add(10)
                .ok_or_else(|| fail("address out of range".to_string()))?;
            Ok(Ipv4Addr::from(dns).to_string())
        }
        IpAddr::V6(v6) => {
            if prefix > 128 {
                return Err(fail("prefix length exceeds 128".to_string()));
            }
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - prefix)
            };
            let network = u128::from(v6) & mask;
            let dns = network
                .checked_add(10)
                .ok_or_else(|| fail("address out of range".to_string()))?;
            Ok(Ipv6Addr::from(dns).to_string())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use eks_model::TaintEffect;
    use maplit::btreemap;
    use toml::toml;

    const EP: &str = "https://ABC.gr7.us-west-2.eks.amazonaws.com";
    const CA: &str = "Q0VSVA==";

    fn spec(os: OperatingSystem, ng: NodeGroupType) -> UserDataSpec {
        UserDataSpec::new(os, ng, "my-cluster")
    }

    #[test]
    fn cluster_dns_ip_from_service_ipv4_cidr() {
        assert_eq!(cluster_dns_ip("10.100.0.0/16").unwrap(), "10.100.0.10");
        assert_eq!(cluster_dns_ip("172.20.5.7/16").unwrap(), "172.20.0.10");
    }

    #[test]
    fn cluster_dns_ip_from_service_ipv6_cidr() {
        assert_eq!(
            cluster_dns_ip("fd30:1c53:5f8a::/108").unwrap(),
            "fd30:1c53:5f8a::a"
        );
        assert!(cluster_dns_ip("not-a-cidr").is_err());
        assert!(cluster_dns_ip("10.0.0.0/33").is_err());
    }

    #[test]
    fn kubelet_flags_from_labels_and_taints() {
        let mut spec = spec(OperatingSystem::Al2, NodeGroupType::SelfManagedV2);
        spec.kubelet_extra_args = Some("--max-pods=110".to_string());
        spec.labels = btreemap! { "team".to_string() => "a".to_string(), "tier".to_string() => "web".to_string() };
        spec.taints = btreemap! {
            "dedicated".to_string() => Taint { value: "gpu".to_string(), effect: TaintEffect::NoSchedule },
            "spot".to_string() => Taint { value: String::new(), effect: TaintEffect::PreferNoSchedule },
        };
        assert_eq!(
            spec.kubelet_flags(),
            vec![
                "--max-pods=110",
                "--node-labels=team=a,tier=web",
                "--register-with-taints=dedicated=gpu:NoSchedule,spot:PreferNoSchedule",
            ]
        );
    }

    #[test]
    fn al2_single_flag_is_not_quoted() {
        let mut spec = spec(OperatingSystem::Al2, NodeGroupType::SelfManagedV2);
        spec.labels = btreemap! { "a".to_string() => "b".to_string() };
        let user_data = spec.render(EP, CA, "10.100.0.0/16").unwrap();
        assert_eq!(
            user_data,
            format!(
                "#!/bin/bash\n\n/etc/eks/bootstrap.sh --apiserver-endpoint \"{}\" --b64-cluster-ca \"{}\" \"my-cluster\" --kubelet-extra-args --node-labels=a=b\n\n",
                EP, CA
            )
        );
    }

    #[test]
    fn al2_multiple_flags_are_quoted_and_extra_user_data_runs() {
        let mut spec = spec(OperatingSystem::Al2, NodeGroupType::SelfManagedV1);
        spec.kubelet_extra_args = Some("--max-pods=110 --v=2".to_string());
        spec.bootstrap_extra_args = Some("--use-max-pods false".to_string());
        spec.extra_user_data = Some("#!/bin/bash\necho hi".to_string());
        spec.stack_name = Some("ng-nodes".to_string());
        spec.region = Some("us-east-2".to_string());
        let user_data = spec.render(EP, CA, "10.100.0.0/16").unwrap();
        assert!(user_data.contains(
            "\"my-cluster\" --use-max-pods false --kubelet-extra-args '--max-pods=110 --v=2'\n"
        ));
        assert!(user_data.contains(
            "cat >/opt/user-data <<ng-nodes-user-data\n#!/bin/bash\necho hi\nng-nodes-user-data\n"
        ));
        assert!(user_data.ends_with(
            "/opt/aws/bin/cfn-signal --exit-code $? --stack ng-nodes --resource NodeGroup --region us-east-2\n"
        ));
    }

    #[test]
    fn al2_managed_is_mime() {
        let spec = spec(OperatingSystem::Al2, NodeGroupType::Managed);
        let user_data = spec.render(EP, CA, "10.100.0.0/16").unwrap();
        assert!(user_data.starts_with(
            "MIME-Version: 1.0\nContent-Type: multipart/mixed; boundary=\"==MYBOUNDARY==\"\n\n--==MYBOUNDARY==\n"
        ));
        assert!(user_data.ends_with("--==MYBOUNDARY==--"));
    }

    #[test]
    fn al2023_nodeadm_parts() {
        let mut spec = spec(OperatingSystem::Al2023, NodeGroupType::SelfManagedV2);
        spec.kubelet_extra_args = Some("--max-pods=58".to_string());
        spec.nodeadm_extra_options = vec![NodeadmOptions {
            content: "#!/bin/bash\necho extra".to_string(),
            content_type: "text/x-shellscript".to_string(),
        }];
        let user_data = spec.render(EP, CA, "10.100.0.0/16").unwrap();
        assert!(user_data
            .starts_with("MIME-Version: 1.0\nContent-Type: multipart/mixed; boundary=\"BOUNDARY\"\n\n"));
        assert_eq!(user_data.matches("--BOUNDARY\n").count(), 3);
        assert!(user_data.contains("apiVersion: node.eks.aws/v1alpha1"));
        assert!(user_data.contains(&format!("apiServerEndpoint: \"{}\"", EP)) || user_data.contains(&format!("apiServerEndpoint: {}", EP)));
        assert!(user_data.contains("10.100.0.0/16"));
        assert!(user_data.contains("--max-pods=58"));
        assert!(user_data.contains("Content-Type: text/x-shellscript\n\n#!/bin/bash\necho extra\n"));
        assert!(user_data.ends_with("--BOUNDARY--\n"));
    }

    #[test]
    fn al2023_rejects_bootstrap_args() {
        let mut spec = spec(OperatingSystem::Recommended, NodeGroupType::Managed);
        spec.bootstrap_extra_args = Some("--foo".to_string());
        let problems = spec.validate("nodeGroupOptions.");
        let err = problems.into_result().unwrap_err();
        assert_eq!(err.invalid_fields()[0].path, "nodeGroupOptions.bootstrapExtraArgs");
    }

    #[test]
    fn bottlerocket_settings_are_deep_merged() {
        let mut spec = spec(OperatingSystem::Bottlerocket, NodeGroupType::SelfManagedV1);
        spec.stack_name = Some("ng-nodes".to_string());
        spec.labels = btreemap! { "a".to_string() => "b".to_string() };
        spec.taints = btreemap! {
            "t".to_string() => Taint { value: String::new(), effect: TaintEffect::NoExecute },
        };
        spec.bottlerocket_settings = Some(serde_json::json!({
            "settings": {
                "kubernetes": { "max-pods": 20, "cluster-dns-ip": "10.100.0.53" },
                "motd": "hello"
            }
        }));
        let user_data = spec.render(EP, CA, "10.100.0.0/16").unwrap();
        let parsed: toml::Value = toml::from_str(&user_data).unwrap();
        let expected = toml! {
            [settings]
            motd = "hello"
            [settings.cloudformation]
            logical-resource-id = "NodeGroup"
            should-signal = true
            stack-name = "ng-nodes"
            [settings.kubernetes]
            api-server = "https://ABC.gr7.us-west-2.eks.amazonaws.com"
            cluster-certificate = "Q0VSVA=="
            cluster-dns-ip = "10.100.0.53"
            cluster-name = "my-cluster"
            max-pods = 20
            [settings.kubernetes.node-labels]
            a = "b"
            [settings.kubernetes.node-taints]
            t = ":NoExecute"
        };
        assert_eq!(parsed, expected);
    }

    #[test]
    fn bottlerocket_rejects_scripts_and_args() {
        let mut spec = spec(OperatingSystem::Bottlerocket, NodeGroupType::SelfManagedV2);
        spec.kubelet_extra_args = Some("--v=2".to_string());
        spec.extra_user_data = Some("echo".to_string());
        let err = spec.render(EP, CA, "10.100.0.0/16").unwrap_err();
        assert_eq!(err.invalid_fields().len(), 2);
    }

    #[test]
    fn user_settings_overlay_generated_kubernetes_settings() {
        let mut generated = toml! {
            [settings.kubernetes]
            cluster-name = "c-eksCluster"
            max-pods = 29
            [settings.kubernetes.node-labels]
            nodegroup = "ng"
        };
        let user = toml! {
            [settings.kubernetes]
            max-pods = 110
            [settings.kubernetes.node-labels]
            team = "payments"
            [settings.host-containers.admin]
            enabled = true
        };
        merge_values(&user, &mut generated, "").unwrap();

        let kubernetes = &generated["settings"]["kubernetes"];
        assert_eq!(kubernetes["cluster-name"].as_str(), Some("c-eksCluster"));
        assert_eq!(kubernetes["max-pods"].as_integer(), Some(110));
        let labels = kubernetes["node-labels"].as_table().unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["team"].as_str(), Some("payments"));
        assert_eq!(
            generated["settings"]["host-containers"]["admin"]["enabled"].as_bool(),
            Some(true)
        );
    }

    #[test]
    fn conflicting_setting_types_name_the_setting() {
        let mut generated = toml! {
            [settings.kubernetes]
            max-pods = 29
        };
        let user = toml! {
            [settings.kubernetes]
            max-pods = "many"
        };
        match merge_values(&user, &mut generated, "") {
            Err(Error::TomlMerge { key }) => assert_eq!(key, "settings.kubernetes.max-pods"),
            other => panic!("expected a merge error, got {:?}", other),
        }
    }
}
