//! Picks the operating system and machine image of worker nodes.

use crate::deferred::{Deferred, Func};
use crate::error::{Error, InvalidField, Result};
use crate::lookup::CloudLookup;
use eks_model::{AmiType, CpuArchitecture, K8sVersion, OperatingSystem};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

lazy_static! {
    /// Family, generation, processor, additional capabilities and size, as in `c7gn.large`.
    static ref EC2_INSTANCE_TYPE: Regex = {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"([a-z]+)([0-9]+)([a-z])?-?([a-z]+)?\.([a-zA-Z0-9-]+)").unwrap()
    };
}

/// The operating system implied by an AMI type and an operating system option. When both are
/// given they have to agree.
pub fn operating_system(
    ami_type: Option<&str>,
    operating_system: Option<OperatingSystem>,
    prefix: &str,
) -> std::result::Result<OperatingSystem, InvalidField> {
    let ami_type_name = match ami_type {
        Some(name) => name,
        None => return Ok(operating_system.unwrap_or_default().resolve()),
    };
    let resolved = AmiType::from_name_or_alias(ami_type_name).ok_or_else(|| {
        InvalidField::new(
            format!("{}amiType", prefix),
            format!(
                "Cannot determine OS of unknown AMI type: {}",
                ami_type_name
            ),
        )
    })?;
    let detected = resolved.operating_system();
    if let Some(os) = operating_system {
        if os.resolve() != detected {
            return Err(InvalidField::new(
                format!("{}operatingSystem", prefix),
                format!(
                    "Operating system '{}' does not match the detected operating system '{}' of AMI type '{}'.",
                    os, detected, ami_type_name
                ),
            ));
        }
    }
    Ok(detected)
}

/// Whether an instance type runs on an AWS Graviton (arm64) processor.
pub fn is_graviton(instance_type: &str, path: &str) -> std::result::Result<bool, InvalidField> {
    let captures = EC2_INSTANCE_TYPE
        .captures(instance_type)
        .ok_or_else(|| {
            InvalidField::new(path, format!("Invalid EC2 instance type: {}", instance_type))
        })?;
    Ok(captures.get(3).map(|m| m.as_str()) == Some("g"))
}

/// The common architecture of a set of instance types. No instance types means `x86_64`.
pub fn architecture<S: AsRef<str>>(
    instance_types: &[S],
    path: &str,
) -> std::result::Result<CpuArchitecture, InvalidField> {
    let mut graviton = false;
    let mut x86 = false;
    for instance_type in instance_types {
        if is_graviton(instance_type.as_ref(), path)? {
            graviton = true;
        } else {
            x86 = true;
        }
        if graviton && x86 {
            return Err(InvalidField::new(
                path,
                "Cannot determine architecture of instance types. The provided instance types do \
                 not share a common architecture",
            ));
        }
    }
    Ok(if graviton {
        CpuArchitecture::Arm64
    } else {
        CpuArchitecture::X86_64
    })
}

/// The AMI type for an operating system, GPU requirement and set of instance types.
pub fn determine_ami_type<S: AsRef<str>>(
    os: OperatingSystem,
    gpu: bool,
    instance_types: &[S],
    path: &str,
) -> std::result::Result<AmiType, InvalidField> {
    let architecture = architecture(instance_types, path)?;
    AmiType::find(os, gpu, architecture).ok_or_else(|| {
        InvalidField::new(
            path,
            format!(
                "No AMI type found for OS: {}, GPU support: {}, architecture: {}",
                os.resolve(),
                gpu,
                architecture
            ),
        )
    })
}

/// The AMI type named by an option, which may be a legacy alias.
pub fn parse_ami_type(name: &str, path: &str) -> std::result::Result<AmiType, InvalidField> {
    AmiType::from_name_or_alias(name).ok_or_else(|| {
        InvalidField::new(
            path,
            format!(
                "Cannot resolve recommended AMI for AMI type: {}. Please provide the AMI ID and userdata.",
                name
            ),
        )
    })
}

/// The recommended image id of an AMI type. When the Kubernetes version is known while composing
/// the SSM parameter is read right away, otherwise the read is deferred until the cluster reports
/// its version.
pub async fn recommended_ami_id(
    ami_type: AmiType,
    version: Option<&K8sVersion>,
    cluster_version: &Deferred,
    lookup: &dyn CloudLookup,
    path: &str,
) -> Result<Deferred> {
    match version {
        Some(version) => {
            let parameter = ami_type.ssm_parameter_name(&version.eks_version());
            debug!("Resolving the recommended AMI from '{}'", parameter);
            let image_id = lookup
                .ssm_parameter(&parameter)
                .await
                .map_err(|e| Error::upstream(path, e))?;
            Ok(Deferred::from(image_id))
        }
        None => Ok(Deferred::apply(
            Func::SsmParameter,
            vec![Deferred::format(
                ami_type.ssm_parameter_name("{}"),
                vec![cluster_version.clone()],
            )],
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn graviton_detection() {
        assert!(is_graviton("m6g.large", "instanceType").unwrap());
        assert!(is_graviton("c7gn.2xlarge", "instanceType").unwrap());
        assert!(!is_graviton("t3.medium", "instanceType").unwrap());
        assert!(!is_graviton("m5d.xlarge", "instanceType").unwrap());
        assert!(is_graviton("nope", "instanceType").is_err());
    }

    #[test]
    fn mixed_architectures_are_rejected() {
        assert_eq!(
            architecture::<&str>(&[], "instanceTypes").unwrap(),
            CpuArchitecture::X86_64
        );
        assert_eq!(
            architecture(&["t4g.small", "m6g.large"], "instanceTypes").unwrap(),
            CpuArchitecture::Arm64
        );
        let err = architecture(&["t4g.small", "t3.small"], "instanceTypes").unwrap_err();
        assert_eq!(err.path, "instanceTypes");
    }

    #[test]
    fn os_from_ami_type_and_option() {
        assert_eq!(
            operating_system(None, None, "").unwrap(),
            OperatingSystem::Al2023
        );
        assert_eq!(
            operating_system(Some("BOTTLEROCKET_ARM_64"), None, "").unwrap(),
            OperatingSystem::Bottlerocket
        );
        assert_eq!(
            operating_system(Some("amazon-linux-2"), Some(OperatingSystem::Al2), "").unwrap(),
            OperatingSystem::Al2
        );
        let err = operating_system(Some("AL2_x86_64"), Some(OperatingSystem::Bottlerocket), "ng.")
            .unwrap_err();
        assert_eq!(err.path, "ng.operatingSystem");
        assert_eq!(
            err.reason,
            "Operating system 'Bottlerocket' does not match the detected operating system 'AL2' of AMI type 'AL2_x86_64'."
        );
        let err = operating_system(Some("WINDOWS"), None, "").unwrap_err();
        assert_eq!(err.reason, "Cannot determine OS of unknown AMI type: WINDOWS");
    }

    #[test]
    fn ami_type_for_gpu_arm() {
        assert_eq!(
            determine_ami_type(OperatingSystem::Bottlerocket, true, &["g5g.xlarge"], "x").unwrap(),
            AmiType::BottlerocketArm64Nvidia
        );
        assert_eq!(
            determine_ami_type(OperatingSystem::Recommended, false, &["t3.medium"], "x").unwrap(),
            AmiType::Al2023X86_64Standard
        );
        // AL2023 has no arm GPU image
        assert!(determine_ami_type(OperatingSystem::Al2023, true, &["g5g.xlarge"], "x").is_err());
    }

    #[tokio::test]
    async fn deferred_ami_lookup_formats_the_parameter() {
        let version = Deferred::attr("c-eksCluster", "version");
        let value = recommended_ami_id(
            AmiType::Al2023X86_64Standard,
            None,
            &version,
            &NoLookup,
            "ng",
        )
        .await
        .unwrap();
        match value {
            Deferred::Apply { func, args } => {
                assert_eq!(func, Func::SsmParameter);
                assert_eq!(
                    args[0],
                    Deferred::format(
                        "/aws/service/eks/optimized-ami/{}/amazon-linux-2023/x86_64/standard/recommended/image_id",
                        vec![version]
                    )
                );
            }
            other => panic!("expected a deferred lookup, got {:?}", other),
        }
    }

    struct NoLookup;

    #[async_trait::async_trait]
    impl CloudLookup for NoLookup {
        async fn region(&self) -> crate::lookup::LookupResult<String> {
            Err("unused".into())
        }
        async fn default_vpc(&self) -> crate::lookup::LookupResult<String> {
            Err("unused".into())
        }
        async fn vpc_subnets(
            &self,
            _: &str,
        ) -> crate::lookup::LookupResult<Vec<crate::lookup::SubnetInfo>> {
            Err("unused".into())
        }
        async fn describe_subnets(
            &self,
            _: &[String],
        ) -> crate::lookup::LookupResult<Vec<crate::lookup::SubnetInfo>> {
            Err("unused".into())
        }
        async fn default_addon_version(
            &self,
            _: &str,
            _: &str,
        ) -> crate::lookup::LookupResult<String> {
            Err("unused".into())
        }
        async fn ssm_parameter(&self, _: &str) -> crate::lookup::LookupResult<String> {
            Err("unused".into())
        }
        async fn instance_type_info(
            &self,
            _: &str,
        ) -> crate::lookup::LookupResult<crate::lookup::InstanceTypeInfo> {
            Err("unused".into())
        }
    }
}
