use eks_model::AuthenticationMode;
use snafu::Snafu;
use std::fmt::{Display, Formatter};

/// The error type collaborators hand back to the composer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid configuration: {}", InvalidFields(fields)))]
    InvalidConfig { fields: Vec<InvalidField> },

    #[snafu(display(
        "No instance role is available for {}; set 'createInstanceRole', 'instanceRole' or \
         'instanceRoles'",
        what
    ))]
    MissingInstanceRole { what: String },

    #[snafu(display("Subnets span more than one VPC: {}", vpc_ids.join(", ")))]
    SubnetsInDifferentVpc { vpc_ids: Vec<String> },

    #[snafu(display(
        "Subnets must cover at least two availability zones, found {}",
        if zones.is_empty() { "none".to_string() } else { zones.join(", ") }
    ))]
    InsufficientAvailabilityZones { zones: Vec<String> },

    #[snafu(display(
        "Only one StorageClass may be marked default, found {}",
        names.join(", ")
    ))]
    MultipleDefaultStorageClasses { names: Vec<String> },

    #[snafu(display(
        "Changing 'authenticationMode' from '{}' to '{}' is forbidden: EKS removes the aws-auth \
         ConfigMap when entering '{}'",
        from,
        to,
        from
    ))]
    AuthModeDowngradeForbidden {
        from: AuthenticationMode,
        to: AuthenticationMode,
    },

    #[snafu(display(
        "{} is not supported in this runtime, use 'providerCredentialOpts' instead",
        feature
    ))]
    UnsupportedInRuntime { feature: String },

    #[snafu(display(
        "Unable to resolve a default version of addon '{}' for Kubernetes {}: {}",
        addon,
        k8s_version,
        message
    ))]
    AddonVersionUnavailable {
        addon: String,
        k8s_version: String,
        message: String,
    },

    #[snafu(display("{}: {}", path, source))]
    UpstreamFailure { path: String, source: BoxError },

    #[snafu(display("A resource named '{}' was declared twice", name))]
    DuplicateNode { name: String },

    #[snafu(display("Resource '{}' depends on unknown resource '{}'", node, dependency))]
    UnknownDependency { node: String, dependency: String },

    #[snafu(display("Dependency cycle between resources: {}", nodes.join(", ")))]
    CyclicDependency { nodes: Vec<String> },

    #[snafu(display("Attribute '{}' of resource '{}' has not been realized", path, node))]
    UnresolvedAttribute { node: String, path: String },

    #[snafu(display("Unable to evaluate '{}': {}", func, message))]
    Evaluation { func: String, message: String },

    #[snafu(display("Unable to serialize {} as JSON: {}", what, source))]
    JsonSerialize {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to serialize {} as YAML: {}", what, source))]
    YamlSerialize {
        what: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("Unable to serialize {} as TOML: {}", what, source))]
    TomlSerialize {
        what: String,
        source: toml::ser::Error,
    },

    #[snafu(display("Cannot merge mismatched data types in given TOML at '{}'", key))]
    TomlMerge { key: String },

    #[snafu(display("Rendered kubeconfig cannot be loaded: {}", source))]
    KubeconfigLoad {
        source: kube::config::KubeconfigError,
    },
}

impl Error {
    /// The offending fields of an `InvalidConfig` error, empty for every other kind.
    pub fn invalid_fields(&self) -> &[InvalidField] {
        match self {
            Error::InvalidConfig { fields } => fields,
            _ => &[],
        }
    }

    /// Wraps a collaborator failure with the logical path of the resource being composed.
    pub fn upstream<E>(path: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::UpstreamFailure {
            path: path.into(),
            source: source.into(),
        }
    }
}

/// One offending option of an `InvalidConfig` error.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InvalidField {
    /// The camelCase path of the option, such as `nodeGroupOptions.amiId`.
    pub path: String,
    pub reason: String,
}

impl InvalidField {
    pub fn new<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl Display for InvalidField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

impl From<InvalidField> for Error {
    fn from(field: InvalidField) -> Self {
        Error::InvalidConfig {
            fields: vec![field],
        }
    }
}

struct InvalidFields<'a>(&'a [InvalidField]);

impl Display for InvalidFields<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            Display::fmt(field, f)?;
        }
        Ok(())
    }
}

/// Collects every validation problem of a composition step so they can be reported at once.
#[derive(Debug, Default)]
pub struct Problems {
    fields: Vec<InvalidField>,
}

impl Problems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<P, R>(&mut self, path: P, reason: R)
    where
        P: Into<String>,
        R: Into<String>,
    {
        self.fields.push(InvalidField {
            path: path.into(),
            reason: reason.into(),
        });
    }

    /// Records `reason` against `path` when `condition` holds.
    pub fn check<P, R>(&mut self, condition: bool, path: P, reason: R)
    where
        P: Into<String>,
        R: Into<String>,
    {
        if condition {
            self.push(path, reason)
        }
    }

    /// Keeps the value of `result`, or records its problem.
    pub fn record<T>(&mut self, result: std::result::Result<T, InvalidField>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(field) => {
                self.fields.push(field);
                None
            }
        }
    }

    pub fn extend(&mut self, other: Problems) {
        self.fields.extend(other.fields)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The value validated alongside the recorded problems, when there were none.
    pub fn finish<T>(self, value: Option<T>) -> Result<T> {
        match value {
            Some(value) if self.fields.is_empty() => Ok(value),
            _ => Err(Error::InvalidConfig {
                fields: self.fields,
            }),
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig {
                fields: self.fields,
            })
        }
    }
}
