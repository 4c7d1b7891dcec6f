use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EbsVolumeType {
    Gp2,
    Gp3,
    Io1,
    Io2,
    Sc1,
    St1,
    Standard,
}

derive_display_from_serialize!(EbsVolumeType);
derive_fromstr_from_deserialize!(EbsVolumeType);

impl EbsVolumeType {
    /// `gp3` volumes can only be provisioned by the EBS CSI driver.
    pub fn provisioner(&self) -> &'static str {
        match self {
            Self::Gp3 => "ebs.csi.aws.com",
            _ => "kubernetes.io/aws-ebs",
        }
    }
}

/// `storageClasses` is either a single volume type or a map of named classes.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum StorageClasses {
    /// One class of this type, marked as the cluster default.
    Single(EbsVolumeType),
    Named(BTreeMap<String, StorageClassSpec>),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassSpec {
    #[serde(rename = "type")]
    pub volume_type: EbsVolumeType,
    /// I/O operations per second per GiB; only meaningful for `io1`.
    pub iops_per_gb: Option<i64>,
    pub kms_key_id: Option<String>,
    pub encrypted: Option<bool>,
    /// Availability zones the class may provision in.
    pub zones: Option<Vec<String>>,
    #[serde(default)]
    pub default: bool,
    pub allow_volume_expansion: Option<bool>,
    pub mount_options: Option<Vec<String>>,
    pub reclaim_policy: Option<String>,
    pub volume_binding_mode: Option<String>,
    pub labels: Option<BTreeMap<String, String>>,
    pub annotations: Option<BTreeMap<String, String>>,
}

impl StorageClassSpec {
    pub fn new(volume_type: EbsVolumeType) -> Self {
        Self {
            volume_type,
            iops_per_gb: None,
            kms_key_id: None,
            encrypted: None,
            zones: None,
            default: false,
            allow_volume_expansion: None,
            mount_options: None,
            reclaim_policy: None,
            volume_binding_mode: None,
            labels: None,
            annotations: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_volume_type() {
        let classes: StorageClasses = serde_json::from_str("\"gp2\"").unwrap();
        assert_eq!(classes, StorageClasses::Single(EbsVolumeType::Gp2));
    }

    #[test]
    fn named_classes() {
        let classes: StorageClasses = serde_json::from_value(serde_json::json!({
            "fast": { "type": "io1", "iopsPerGb": 10, "default": true },
            "cheap": { "type": "sc1" }
        }))
        .unwrap();
        match classes {
            StorageClasses::Named(map) => {
                assert!(map["fast"].default);
                assert_eq!(map["fast"].iops_per_gb, Some(10));
                assert!(!map["cheap"].default);
            }
            StorageClasses::Single(_) => panic!("expected a map"),
        }
    }

    #[test]
    fn gp3_uses_csi() {
        assert_eq!(EbsVolumeType::Gp3.provisioner(), "ebs.csi.aws.com");
        assert_eq!(EbsVolumeType::St1.provisioner(), "kubernetes.io/aws-ebs");
    }
}
