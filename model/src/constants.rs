//! Defaults shared by the model and the composer.

/// The region used when neither the options nor the environment name one.
pub const DEFAULT_REGION: &str = "us-west-2";
/// The instance type of self-managed worker nodes when none is given.
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.medium";
pub const DEFAULT_DESIRED_CAPACITY: i64 = 2;
pub const DEFAULT_MIN_SIZE: i64 = 1;
pub const DEFAULT_MAX_SIZE: i64 = 2;
/// Root volume size of AL2 self-managed nodes, in GiB.
pub const DEFAULT_ROOT_VOLUME_SIZE: i64 = 20;
pub const DEFAULT_MIN_REFRESH_PERCENTAGE: i64 = 50;
pub const DEFAULT_SERVICE_IPV4_CIDR: &str = "10.100.0.0/16";

pub const STS_AUDIENCE: &str = "sts.amazonaws.com";
pub const AWS_AUTH_CONFIG_MAP: &str = "aws-auth";
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

pub const NODE_BOOTSTRAP_GROUPS: [&str; 2] = ["system:bootstrappers", "system:nodes"];
pub const NODE_USERNAME: &str = "system:node:{{EC2PrivateDNSName}}";
pub const FARGATE_GROUPS: [&str; 3] = [
    "system:bootstrappers",
    "system:nodes",
    "system:node-proxier",
];
pub const FARGATE_USERNAME: &str = "system:node:{{SessionName}}";
