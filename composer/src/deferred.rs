//! Values that are only known once the resources they come from have been created.
//!
//! The composer never blocks on a cloud API. Attributes such as the cluster endpoint are referenced
//! with [`Deferred::attr`], and strings derived from them (user data, kubeconfig, role mappings)
//! are described with [`Deferred::apply`]. The engine that reconciles the graph substitutes the
//! realized attributes and calls [`Deferred::evaluate`].

use crate::auth;
use crate::error::{self, BoxError, Error, Result};
use crate::kubeconfig::KubeconfigSpec;
use crate::userdata::{self, UserDataSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// An expression over realized resource attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Deferred {
    Known(Value),
    Attr { node: String, path: String },
    List(Vec<Deferred>),
    Object(BTreeMap<String, Deferred>),
    Apply { func: Func, args: Vec<Deferred> },
}

/// The transforms a [`Deferred::Apply`] can name. Everything except the lookups is pure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "name")]
pub enum Func {
    /// Replaces each `{}` of the template with the next argument.
    Format { template: String },
    Join { separator: String },
    StripPrefix { prefix: String },
    Base64Encode,
    ToJson,
    ToYaml,
    /// Concatenates list arguments.
    Concat,
    /// The cluster DNS address of a service CIDR.
    ClusterDnsIp,
    /// Renders node user data from `[endpoint, certificate authority, service CIDR]`.
    UserData(Box<UserDataSpec>),
    /// Renders a kubeconfig from `[endpoint, certificate authority]`.
    Kubeconfig(KubeconfigSpec),
    /// Renders the `mapRoles` key of the aws-auth config map from a list of role mappings.
    MapRoles,
    /// Renders the `mapUsers` key of the aws-auth config map from a list of user mappings.
    MapUsers,
    /// Looks up the default version of an EKS addon for a Kubernetes version.
    AddonVersion { addon: String },
    /// Looks up the value of an SSM parameter.
    SsmParameter,
    /// Looks up the thumbprint of the root CA of an OIDC issuer.
    IssuerThumbprint,
}

impl Func {
    /// Lookups are answered by the engine rather than computed here.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            Func::AddonVersion { .. } | Func::SsmParameter | Func::IssuerThumbprint
        )
    }

    /// A stable key for a lookup and its arguments.
    pub fn lookup_key(&self, args: &[Value]) -> String {
        let args: Vec<String> = args.iter().map(value_to_string).collect();
        match self {
            Func::AddonVersion { addon } => format!("addonVersion:{}:{}", addon, args.join(",")),
            other => format!("{}:{}", other, args.join(",")),
        }
    }
}

impl Display for Func {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Func::Format { .. } => "format",
            Func::Join { .. } => "join",
            Func::StripPrefix { .. } => "stripPrefix",
            Func::Base64Encode => "base64Encode",
            Func::ToJson => "toJson",
            Func::ToYaml => "toYaml",
            Func::Concat => "concat",
            Func::ClusterDnsIp => "clusterDnsIp",
            Func::UserData(_) => "userData",
            Func::Kubeconfig(_) => "kubeconfig",
            Func::MapRoles => "mapRoles",
            Func::MapUsers => "mapUsers",
            Func::AddonVersion { .. } => "addonVersion",
            Func::SsmParameter => "ssmParameter",
            Func::IssuerThumbprint => "issuerThumbprint",
        };
        f.write_str(name)
    }
}

/// The realized state of the resources a deferred value refers to.
pub trait Realized {
    /// The value at a dotted `path` of a realized resource, e.g. `identities.0.oidcs.0.issuer`.
    fn attribute(&self, node: &str, path: &str) -> Option<Value>;

    /// Answers a lookup function.
    fn lookup(&self, func: &Func, args: &[Value]) -> std::result::Result<Value, BoxError>;
}

impl Deferred {
    pub fn known<V: Into<Value>>(value: V) -> Self {
        Deferred::Known(value.into())
    }

    pub fn attr<N: Into<String>, P: Into<String>>(node: N, path: P) -> Self {
        Deferred::Attr {
            node: node.into(),
            path: path.into(),
        }
    }

    pub fn list<I: IntoIterator<Item = Deferred>>(items: I) -> Self {
        Deferred::List(items.into_iter().collect())
    }

    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Deferred)>,
    {
        Deferred::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn apply(func: Func, args: Vec<Deferred>) -> Self {
        Deferred::Apply { func, args }
    }

    pub fn format<T: Into<String>>(template: T, args: Vec<Deferred>) -> Self {
        Deferred::apply(
            Func::Format {
                template: template.into(),
            },
            args,
        )
    }

    /// Serializes any value into a known deferred value.
    pub fn from_serialize<T: Serialize>(what: &str, value: &T) -> Result<Self> {
        Ok(Deferred::Known(
            serde_json::to_value(value).context(error::JsonSerializeSnafu { what })?,
        ))
    }

    /// The names of every resource this value reads from.
    pub fn references(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut BTreeSet<String>) {
        match self {
            Deferred::Known(_) => {}
            Deferred::Attr { node, .. } => {
                refs.insert(node.clone());
            }
            Deferred::List(items) => items.iter().for_each(|i| i.collect_references(refs)),
            Deferred::Object(fields) => fields.values().for_each(|v| v.collect_references(refs)),
            Deferred::Apply { args, .. } => args.iter().for_each(|a| a.collect_references(refs)),
        }
    }

    /// The value when it needs neither realized attributes nor function application.
    pub fn as_known(&self) -> Option<Value> {
        match self {
            Deferred::Known(value) => Some(value.clone()),
            Deferred::List(items) => items
                .iter()
                .map(Deferred::as_known)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Deferred::Object(fields) => fields
                .iter()
                .map(|(k, v)| v.as_known().map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Value::Object),
            Deferred::Attr { .. } | Deferred::Apply { .. } => None,
        }
    }

    /// The known string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Deferred::Known(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Resolves the expression against realized state.
    pub fn evaluate(&self, realized: &dyn Realized) -> Result<Value> {
        match self {
            Deferred::Known(value) => Ok(value.clone()),
            Deferred::Attr { node, path } => realized.attribute(node, path).ok_or_else(|| {
                Error::UnresolvedAttribute {
                    node: node.clone(),
                    path: path.clone(),
                }
            }),
            Deferred::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|i| i.evaluate(realized))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Deferred::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.evaluate(realized)?);
                }
                Ok(Value::Object(map))
            }
            Deferred::Apply { func, args } => {
                let args = args
                    .iter()
                    .map(|a| a.evaluate(realized))
                    .collect::<Result<Vec<_>>>()?;
                if func.is_lookup() {
                    return lookup(func, &args, realized);
                }
                call(func, &args)
            }
        }
    }
}

impl From<&str> for Deferred {
    fn from(s: &str) -> Self {
        Deferred::Known(Value::String(s.to_string()))
    }
}

impl From<String> for Deferred {
    fn from(s: String) -> Self {
        Deferred::Known(Value::String(s))
    }
}

impl From<&String> for Deferred {
    fn from(s: &String) -> Self {
        Deferred::Known(Value::String(s.clone()))
    }
}

impl From<bool> for Deferred {
    fn from(b: bool) -> Self {
        Deferred::Known(Value::Bool(b))
    }
}

impl From<i64> for Deferred {
    fn from(i: i64) -> Self {
        Deferred::Known(Value::from(i))
    }
}

impl From<Value> for Deferred {
    fn from(v: Value) -> Self {
        Deferred::Known(v)
    }
}

impl From<Vec<String>> for Deferred {
    fn from(v: Vec<String>) -> Self {
        Deferred::List(v.into_iter().map(Deferred::from).collect())
    }
}

impl From<&[String]> for Deferred {
    fn from(v: &[String]) -> Self {
        Deferred::List(v.iter().map(Deferred::from).collect())
    }
}

impl From<Vec<Deferred>> for Deferred {
    fn from(v: Vec<Deferred>) -> Self {
        Deferred::List(v)
    }
}

/// Tags and labels.
impl From<&BTreeMap<String, String>> for Deferred {
    fn from(map: &BTreeMap<String, String>) -> Self {
        Deferred::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), Deferred::from(v)))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for Deferred {
    fn from(map: BTreeMap<String, String>) -> Self {
        Deferred::from(&map)
    }
}

impl From<BTreeMap<String, Deferred>> for Deferred {
    fn from(map: BTreeMap<String, Deferred>) -> Self {
        Deferred::Object(map)
    }
}

fn lookup(func: &Func, args: &[Value], realized: &dyn Realized) -> Result<Value> {
    realized.lookup(func, args).map_err(|source| match func {
        Func::AddonVersion { addon } => Error::AddonVersionUnavailable {
            addon: addon.clone(),
            k8s_version: args.first().map(value_to_string).unwrap_or_default(),
            message: source.to_string(),
        },
        other => Error::UpstreamFailure {
            path: func.lookup_key(args),
            source: format!("{} lookup failed: {}", other, source).into(),
        },
    })
}

fn call(func: &Func, args: &[Value]) -> Result<Value> {
    let fail = |message: String| Error::Evaluation {
        func: func.to_string(),
        message,
    };
    let string_arg = |i: usize| -> Result<String> {
        match args.get(i) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(value_to_string(other)),
            None => Err(fail(format!("missing argument {}", i))),
        }
    };
    match func {
        Func::Format { template } => {
            let pieces: Vec<&str> = template.split("{}").collect();
            if pieces.len() != args.len() + 1 {
                return Err(fail(format!(
                    "template has {} placeholders but {} arguments were given",
                    pieces.len() - 1,
                    args.len()
                )));
            }
            let mut out = String::new();
            for (i, piece) in pieces.iter().enumerate() {
                out.push_str(piece);
                if let Some(arg) = args.get(i) {
                    out.push_str(&value_to_string(arg));
                }
            }
            Ok(Value::String(out))
        }
        Func::Join { separator } => match args.first() {
            Some(Value::Array(items)) => Ok(Value::String(
                items
                    .iter()
                    .map(value_to_string)
                    .collect::<Vec<_>>()
                    .join(separator),
            )),
            _ => Err(fail("expected a list".to_string())),
        },
        Func::StripPrefix { prefix } => {
            let s = string_arg(0)?;
            Ok(Value::String(
                s.strip_prefix(prefix.as_str()).unwrap_or(&s).to_string(),
            ))
        }
        Func::Base64Encode => Ok(Value::String(base64::encode(string_arg(0)?))),
        Func::ToJson => {
            let value = args.first().cloned().unwrap_or(Value::Null);
            Ok(Value::String(serde_json::to_string(&value).context(
                error::JsonSerializeSnafu {
                    what: "deferred value",
                },
            )?))
        }
        Func::ToYaml => {
            let value = args.first().cloned().unwrap_or(Value::Null);
            Ok(Value::String(serde_yaml::to_string(&value).context(
                error::YamlSerializeSnafu {
                    what: "deferred value",
                },
            )?))
        }
        Func::Concat => {
            let mut out = Vec::new();
            for arg in args {
                match arg {
                    Value::Array(items) => out.extend(items.iter().cloned()),
                    Value::Null => {}
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::Array(out))
        }
        Func::ClusterDnsIp => Ok(Value::String(userdata::cluster_dns_ip(&string_arg(0)?)?)),
        Func::UserData(spec) => Ok(Value::String(spec.render(
            &string_arg(0)?,
            &string_arg(1)?,
            &string_arg(2)?,
        )?)),
        Func::Kubeconfig(spec) => spec.render(&string_arg(0)?, &string_arg(1)?),
        Func::MapRoles => Ok(Value::String(auth::map_roles_yaml(
            args.first().unwrap_or(&Value::Null),
        )?)),
        Func::MapUsers => Ok(Value::String(auth::map_users_yaml(
            args.first().unwrap_or(&Value::Null),
        )?)),
        Func::AddonVersion { .. } | Func::SsmParameter | Func::IssuerThumbprint => {
            Err(fail("lookups are answered by the engine".to_string()))
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Realized attributes and lookup answers held in memory. Engines that persist state elsewhere
/// implement [`Realized`] themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RealizedState {
    attributes: BTreeMap<String, Value>,
    lookups: BTreeMap<String, Value>,
}

impl RealizedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the realized attributes of a resource. Repeated calls merge top-level keys.
    pub fn with_resource<N: Into<String>>(mut self, node: N, attributes: Value) -> Self {
        let node = node.into();
        if let (Some(Value::Object(existing)), Value::Object(new)) =
            (self.attributes.get_mut(&node), &attributes)
        {
            existing.extend(new.clone());
            return self;
        }
        self.attributes.insert(node, attributes);
        self
    }

    pub fn with_lookup(mut self, func: &Func, args: &[Value], answer: Value) -> Self {
        self.lookups.insert(func.lookup_key(args), answer);
        self
    }

    pub fn with_addon_version(self, addon: &str, k8s_version: &str, version: &str) -> Self {
        self.with_lookup(
            &Func::AddonVersion {
                addon: addon.to_string(),
            },
            &[Value::from(k8s_version)],
            Value::from(version),
        )
    }

    pub fn with_ssm_parameter(self, name: &str, value: &str) -> Self {
        self.with_lookup(&Func::SsmParameter, &[Value::from(name)], Value::from(value))
    }

    pub fn with_thumbprint(self, issuer: &str, thumbprint: &str) -> Self {
        self.with_lookup(
            &Func::IssuerThumbprint,
            &[Value::from(issuer)],
            Value::from(thumbprint),
        )
    }
}

impl Realized for RealizedState {
    fn attribute(&self, node: &str, path: &str) -> Option<Value> {
        let mut current = self.attributes.get(node)?;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    fn lookup(&self, func: &Func, args: &[Value]) -> std::result::Result<Value, BoxError> {
        let key = func.lookup_key(args);
        self.lookups
            .get(&key)
            .cloned()
            .ok_or_else(|| format!("no answer recorded for '{}'", key).into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn state() -> RealizedState {
        RealizedState::new().with_resource(
            "c",
            json!({
                "endpoint": "https://ABC.gr7.us-west-2.eks.amazonaws.com",
                "identities": [{ "oidcs": [{ "issuer": "https://oidc.eks/id/ABC" }] }]
            }),
        )
    }

    #[test]
    fn attributes_navigate_lists() {
        let issuer = Deferred::attr("c", "identities.0.oidcs.0.issuer");
        assert_eq!(
            issuer.evaluate(&state()).unwrap(),
            json!("https://oidc.eks/id/ABC")
        );
        let missing = Deferred::attr("c", "identities.1.oidcs");
        assert!(matches!(
            missing.evaluate(&state()),
            Err(Error::UnresolvedAttribute { .. })
        ));
    }

    #[test]
    fn strip_prefix_and_format() {
        let issuer = Deferred::attr("c", "identities.0.oidcs.0.issuer");
        let stripped = Deferred::apply(
            Func::StripPrefix {
                prefix: "https://".to_string(),
            },
            vec![issuer.clone()],
        );
        assert_eq!(stripped.evaluate(&state()).unwrap(), json!("oidc.eks/id/ABC"));
        let formatted = Deferred::format("{}:sub", vec![stripped]);
        assert_eq!(
            formatted.evaluate(&state()).unwrap(),
            json!("oidc.eks/id/ABC:sub")
        );
        let bad = Deferred::format("{} {}", vec![Deferred::from("one")]);
        assert!(bad.evaluate(&state()).is_err());
    }

    #[test]
    fn references_are_collected() {
        let value = Deferred::object(vec![
            ("a", Deferred::attr("x", "id")),
            (
                "b",
                Deferred::list(vec![Deferred::attr("y", "arn"), Deferred::from("z")]),
            ),
        ]);
        let refs: Vec<String> = value.references().into_iter().collect();
        assert_eq!(refs, vec!["x".to_string(), "y".to_string()]);
        assert!(value.as_known().is_none());
        assert_eq!(
            Deferred::list(vec![Deferred::from("a"), Deferred::from(true)]).as_known(),
            Some(json!(["a", true]))
        );
    }

    #[test]
    fn lookups_come_from_the_realized_state() {
        let version = Deferred::apply(
            Func::AddonVersion {
                addon: "vpc-cni".to_string(),
            },
            vec![Deferred::from("1.30")],
        );
        let realized = state().with_addon_version("vpc-cni", "1.30", "v1.18.1-eksbuild.1");
        assert_eq!(version.evaluate(&realized).unwrap(), json!("v1.18.1-eksbuild.1"));
        assert!(matches!(
            version.evaluate(&state()),
            Err(Error::AddonVersionUnavailable { .. })
        ));
    }

    #[test]
    fn json_of_objects_has_sorted_keys() {
        let value = Deferred::apply(
            Func::ToJson,
            vec![Deferred::object(vec![
                ("b", Deferred::from("2")),
                ("a", Deferred::from("1")),
            ])],
        );
        assert_eq!(
            value.evaluate(&state()).unwrap(),
            json!(r#"{"a":"1","b":"2"}"#)
        );
    }

    #[test]
    fn concat_flattens_lists() {
        let value = Deferred::apply(
            Func::Concat,
            vec![
                Deferred::list(vec![Deferred::from("a")]),
                Deferred::list(vec![Deferred::from("b"), Deferred::from("c")]),
            ],
        );
        assert_eq!(value.evaluate(&state()).unwrap(), json!(["a", "b", "c"]));
    }
}
