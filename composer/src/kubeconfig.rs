//! Renders the kubeconfig that authenticates against a cluster through `aws eks get-token`.

use crate::deferred::{Deferred, Func};
use crate::error::{self, Result};
use eks_model::KubeconfigOptions;
use kube::config::Kubeconfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use snafu::ResultExt;

const EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";

/// The parts of a kubeconfig that are known while composing. The endpoint and certificate
/// authority are filled in once the cluster exists.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigSpec {
    pub cluster_name: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
}

impl KubeconfigSpec {
    pub fn new<C: Into<String>, R: Into<String>>(cluster_name: C, region: R) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            region: region.into(),
            role_arn: None,
            profile_name: None,
        }
    }

    /// Scopes the credentials to a role and/or a named AWS profile.
    pub fn with_options(mut self, options: Option<&KubeconfigOptions>) -> Self {
        if let Some(options) = options {
            self.role_arn = options.role_arn.clone();
            self.profile_name = options.profile_name.clone();
        }
        self
    }

    /// The arguments passed to the `aws` CLI. They always contain `--cluster-name <name>`.
    pub fn exec_args(&self) -> Vec<String> {
        let mut args = vec![
            "--region".to_string(),
            self.region.clone(),
            "eks".to_string(),
            "get-token".to_string(),
            "--cluster-name".to_string(),
            self.cluster_name.clone(),
        ];
        if let Some(role_arn) = &self.role_arn {
            args.push("--role".to_string());
            args.push(role_arn.clone());
        }
        args
    }

    pub fn render(&self, endpoint: &str, certificate_authority: &str) -> Result<Value> {
        let mut exec = json!({
            "apiVersion": EXEC_API_VERSION,
            "command": "aws",
            "args": self.exec_args(),
        });
        if let (Some(profile), Value::Object(exec)) = (&self.profile_name, &mut exec) {
            exec.insert(
                "env".to_string(),
                json!([{ "name": "AWS_PROFILE", "value": profile }]),
            );
        }
        Ok(json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{
                "name": self.cluster_name,
                "cluster": {
                    "server": endpoint,
                    "certificate-authority-data": certificate_authority,
                },
            }],
            "contexts": [{
                "name": self.cluster_name,
                "context": {
                    "cluster": self.cluster_name,
                    "user": self.cluster_name,
                },
            }],
            "current-context": self.cluster_name,
            "users": [{
                "name": self.cluster_name,
                "user": { "exec": exec },
            }],
        }))
    }

    /// The kubeconfig as a value resolved from the cluster's endpoint and certificate authority.
    pub fn deferred(&self, endpoint: Deferred, certificate_authority: Deferred) -> Deferred {
        Deferred::apply(
            Func::Kubeconfig(self.clone()),
            vec![endpoint, certificate_authority],
        )
    }
}

/// The JSON string of a kubeconfig value.
pub fn to_json(kubeconfig: Deferred) -> Deferred {
    Deferred::apply(Func::ToJson, vec![kubeconfig])
}

/// Loads a rendered kubeconfig the way Kubernetes clients do.
pub fn load(kubeconfig: &Value) -> Result<Kubeconfig> {
    let yaml = serde_yaml::to_string(kubeconfig).context(error::YamlSerializeSnafu {
        what: "kubeconfig",
    })?;
    Kubeconfig::from_yaml(&yaml).context(error::KubeconfigLoadSnafu)
}

/// The cluster a kubeconfig's exec arguments authenticate against.
pub fn cluster_name_from_args<S: AsRef<str>>(args: &[S]) -> Option<&str> {
    args.windows(2)
        .find(|pair| pair[0].as_ref() == "--cluster-name")
        .map(|pair| pair[1].as_ref())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exec_args_carry_the_cluster_name() {
        let spec = KubeconfigSpec::new("prod", "us-east-1").with_options(Some(&KubeconfigOptions {
            role_arn: Some("arn:aws:iam::123456789012:role/admin".to_string()),
            profile_name: Some("ops".to_string()),
        }));
        let args = spec.exec_args();
        assert_eq!(cluster_name_from_args(&args), Some("prod"));
        assert_eq!(&args[args.len() - 2..], ["--role", "arn:aws:iam::123456789012:role/admin"]);

        let rendered = spec.render("https://example.com", "Q0E=").unwrap();
        assert_eq!(
            rendered["users"][0]["user"]["exec"]["env"][0],
            json!({ "name": "AWS_PROFILE", "value": "ops" })
        );
        assert_eq!(rendered["current-context"], json!("prod"));
    }

    #[test]
    fn no_profile_means_no_env() {
        let rendered = KubeconfigSpec::new("c", "us-west-2")
            .render("https://example.com", "Q0E=")
            .unwrap();
        assert!(rendered["users"][0]["user"]["exec"].get("env").is_none());
        assert_eq!(
            rendered["clusters"][0]["cluster"]["certificate-authority-data"],
            json!("Q0E=")
        );
    }

    #[test]
    fn kube_can_load_it() {
        let rendered = KubeconfigSpec::new("c", "us-west-2")
            .render("https://example.com", "Q0E=")
            .unwrap();
        let loaded = load(&rendered).unwrap();
        assert_eq!(loaded.current_context.as_deref(), Some("c"));
        assert_eq!(loaded.clusters.len(), 1);
    }

    #[test]
    fn json_round_trip() {
        let rendered = KubeconfigSpec::new("c", "us-west-2")
            .render("https://example.com", "Q0E=")
            .unwrap();
        let json = serde_json::to_string(&rendered).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rendered);
    }
}
