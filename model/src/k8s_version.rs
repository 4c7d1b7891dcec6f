use serde_plain::{derive_deserialize_from_fromstr, derive_serialize_from_display};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Represents a parsed Kubernetes version as EKS understands it. Examples of valid values when
/// parsing:
/// - `1.30`
/// - `v1.30`
/// - `1.30.2`
///
/// EKS control planes only accept the major and minor numbers, so the patch is kept for display but
/// ignored by [`K8sVersion::eks_version`] and by ordering.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct K8sVersion {
    major: u8,
    minor: u8,
    patch: Option<u8>,
}

impl K8sVersion {
    pub const fn new(major: u8, minor: u8, patch: Option<u8>) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }

    /// The version string accepted by the EKS API and used in SSM parameter paths. Example: `1.30`.
    pub fn eks_version(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// Returns a string representation of the Kubernetes version with a v prefix. Includes the
    /// patch value if it exists.
    pub fn full_version_with_v(&self) -> String {
        match self.patch {
            Some(patch) => format!("v{}.{}.{}", self.major, self.minor, patch),
            None => format!("v{}.{}", self.major, self.minor),
        }
    }

    pub fn parse<S: AsRef<str>>(s: S) -> std::result::Result<Self, String> {
        let original = s.as_ref().trim();
        let no_v = original.strip_prefix('v').unwrap_or(original);
        let mut iter = no_v.split('.');
        let major = iter
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                format!(
                    "Unable to find the major version number when parsing '{}' as a k8s version",
                    original
                )
            })?
            .parse::<u8>()
            .map_err(|e| {
                format!(
                    "Error when parsing the major version number of k8s version '{}': {}",
                    original, e
                )
            })?;
        let minor = iter
            .next()
            .ok_or_else(|| {
                format!(
                    "Unable to find the minor version number when parsing '{}' as a k8s version",
                    original
                )
            })?
            .parse::<u8>()
            .map_err(|e| {
                format!(
                    "Error when parsing the minor version number of k8s version '{}': {}",
                    original, e
                )
            })?;
        let patch = iter.next().and_then(|s| s.parse::<u8>().ok());
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl PartialOrd for K8sVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for K8sVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

impl Display for K8sVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl FromStr for K8sVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        K8sVersion::parse(s)
    }
}

derive_serialize_from_display!(K8sVersion);
derive_deserialize_from_fromstr!(K8sVersion, "k8s version such as 1.30 or v1.30.1");

#[cfg(test)]
mod test {
    use super::K8sVersion;

    #[test]
    fn parse_with_and_without_v() {
        let a = K8sVersion::parse("v1.30").unwrap();
        let b = K8sVersion::parse("1.30").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.eks_version(), "1.30");
        assert_eq!(a.full_version_with_v(), "v1.30");
    }

    #[test]
    fn patch_is_ignored_by_eks_version() {
        let v = K8sVersion::parse("1.29.4").unwrap();
        assert_eq!(v.eks_version(), "1.29");
        assert_eq!(v.to_string(), "1.29.4");
        assert!(v < K8sVersion::new(1, 30, None));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(K8sVersion::parse("").is_err());
        assert!(K8sVersion::parse("one.two").is_err());
        assert!(K8sVersion::parse("1").is_err());
    }

    #[test]
    fn serde_round_trip_as_plain_string() {
        let v: K8sVersion = serde_json::from_str("\"1.31\"").unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"1.31\"");
    }
}
