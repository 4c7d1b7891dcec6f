use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};

/// The node operating system families the composer knows how to bootstrap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum OperatingSystem {
    /// Amazon Linux 2. Deprecated by AWS, still supported for existing node groups.
    #[serde(rename = "AL2")]
    Al2,
    #[serde(rename = "AL2023")]
    Al2023,
    Bottlerocket,
    /// Whatever AWS currently recommends; resolves to `AL2023`.
    #[serde(rename = "RECOMMENDED")]
    Recommended,
}

derive_display_from_serialize!(OperatingSystem);
derive_fromstr_from_deserialize!(OperatingSystem);

impl OperatingSystem {
    /// Replaces `RECOMMENDED` with the concrete operating system it stands for.
    pub fn resolve(self) -> Self {
        match self {
            Self::Recommended => Self::Al2023,
            other => other,
        }
    }

    /// The root device name of the EKS optimized images of this family. Bottlerocket keeps its
    /// OS on `/dev/xvda` and the writable data volume on `/dev/xvdb`.
    pub fn root_device_name(&self) -> &'static str {
        match self.resolve() {
            Self::Bottlerocket => "/dev/xvdb",
            _ => "/dev/xvda",
        }
    }
}

impl Default for OperatingSystem {
    fn default() -> Self {
        Self::Al2023
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum CpuArchitecture {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "arm64")]
    Arm64,
}

derive_display_from_serialize!(CpuArchitecture);
derive_fromstr_from_deserialize!(CpuArchitecture);

/// The EKS optimized AMI types, as named by the EKS `CreateNodegroup` API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum AmiType {
    #[serde(rename = "AL2_x86_64")]
    Al2X86_64,
    #[serde(rename = "AL2_x86_64_GPU")]
    Al2X86_64Gpu,
    #[serde(rename = "AL2_ARM_64")]
    Al2Arm64,
    #[serde(rename = "AL2023_x86_64_STANDARD")]
    Al2023X86_64Standard,
    #[serde(rename = "AL2023_ARM_64_STANDARD")]
    Al2023Arm64Standard,
    #[serde(rename = "AL2023_x86_64_NVIDIA")]
    Al2023X86_64Nvidia,
    #[serde(rename = "BOTTLEROCKET_ARM_64")]
    BottlerocketArm64,
    #[serde(rename = "BOTTLEROCKET_x86_64")]
    BottlerocketX86_64,
    #[serde(rename = "BOTTLEROCKET_ARM_64_NVIDIA")]
    BottlerocketArm64Nvidia,
    #[serde(rename = "BOTTLEROCKET_x86_64_NVIDIA")]
    BottlerocketX86_64Nvidia,
}

derive_display_from_serialize!(AmiType);
derive_fromstr_from_deserialize!(AmiType);

impl AmiType {
    pub const ALL: [AmiType; 10] = [
        Self::Al2X86_64,
        Self::Al2X86_64Gpu,
        Self::Al2Arm64,
        Self::Al2023X86_64Standard,
        Self::Al2023Arm64Standard,
        Self::Al2023X86_64Nvidia,
        Self::BottlerocketArm64,
        Self::BottlerocketX86_64,
        Self::BottlerocketArm64Nvidia,
        Self::BottlerocketX86_64Nvidia,
    ];

    pub fn operating_system(&self) -> OperatingSystem {
        match self {
            Self::Al2X86_64 | Self::Al2X86_64Gpu | Self::Al2Arm64 => OperatingSystem::Al2,
            Self::Al2023X86_64Standard | Self::Al2023Arm64Standard | Self::Al2023X86_64Nvidia => {
                OperatingSystem::Al2023
            }
            Self::BottlerocketArm64
            | Self::BottlerocketX86_64
            | Self::BottlerocketArm64Nvidia
            | Self::BottlerocketX86_64Nvidia => OperatingSystem::Bottlerocket,
        }
    }

    pub fn gpu_support(&self) -> bool {
        matches!(
            self,
            Self::Al2X86_64Gpu
                | Self::Al2023X86_64Nvidia
                | Self::BottlerocketArm64Nvidia
                | Self::BottlerocketX86_64Nvidia
        )
    }

    pub fn architecture(&self) -> CpuArchitecture {
        match self {
            Self::Al2Arm64
            | Self::Al2023Arm64Standard
            | Self::BottlerocketArm64
            | Self::BottlerocketArm64Nvidia => CpuArchitecture::Arm64,
            _ => CpuArchitecture::X86_64,
        }
    }

    /// The SSM parameter that holds the recommended image id of this type for an EKS version
    /// such as `1.30`.
    pub fn ssm_parameter_name(&self, eks_version: &str) -> String {
        let al2 = |suffix: &str| {
            format!(
                "/aws/service/eks/optimized-ami/{}/{}/recommended/image_id",
                eks_version, suffix
            )
        };
        let bottlerocket = |variant: &str, arch: &str| {
            format!(
                "/aws/service/bottlerocket/aws-k8s-{}{}/{}/latest/image_id",
                eks_version, variant, arch
            )
        };
        match self {
            Self::Al2X86_64 => al2("amazon-linux-2"),
            Self::Al2X86_64Gpu => al2("amazon-linux-2-gpu"),
            Self::Al2Arm64 => al2("amazon-linux-2-arm64"),
            Self::Al2023X86_64Standard => al2("amazon-linux-2023/x86_64/standard"),
            Self::Al2023Arm64Standard => al2("amazon-linux-2023/arm64/standard"),
            Self::Al2023X86_64Nvidia => al2("amazon-linux-2023/x86_64/nvidia"),
            Self::BottlerocketArm64 => bottlerocket("", "arm64"),
            Self::BottlerocketX86_64 => bottlerocket("", "x86_64"),
            Self::BottlerocketArm64Nvidia => bottlerocket("-nvidia", "arm64"),
            Self::BottlerocketX86_64Nvidia => bottlerocket("-nvidia", "x86_64"),
        }
    }

    /// Names by which some types were exposed before they were keyed by EKS AMI type.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Al2X86_64 => &["amazon-linux-2"],
            Self::Al2X86_64Gpu => &["amazon-linux-2-gpu"],
            Self::Al2Arm64 => &["amazon-linux-2-arm"],
            Self::Al2023X86_64Standard => &["amazon-linux-2023/x86_64/standard"],
            Self::Al2023Arm64Standard => &["amazon-linux-2023/arm64/standard"],
            Self::Al2023X86_64Nvidia => &["amazon-linux-2023/x86_64/nvidia"],
            _ => &[],
        }
    }

    /// Parses an AMI type from its EKS name or one of its legacy aliases.
    pub fn from_name_or_alias(s: &str) -> Option<Self> {
        if let Ok(ami_type) = s.parse::<AmiType>() {
            return Some(ami_type);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|ami_type| ami_type.aliases().contains(&s))
    }

    /// The AMI type matching the given traits, if any.
    pub fn find(
        os: OperatingSystem,
        gpu_support: bool,
        architecture: CpuArchitecture,
    ) -> Option<Self> {
        let os = os.resolve();
        Self::ALL.iter().copied().find(|ami_type| {
            ami_type.operating_system() == os
                && ami_type.gpu_support() == gpu_support
                && ami_type.architecture() == architecture
        })
    }
}
