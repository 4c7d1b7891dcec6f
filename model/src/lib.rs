/*!

This library provides the input model for composing an EKS cluster: the user-facing options for the
cluster composite, its node groups and addons, and the bit-exact enumerations those options use.

The types here are plain data. They are validated and resolved by `eks-composer`.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

// Allows `#[derive(Configuration)]` to name this crate from inside itself.
extern crate self as eks_model;

pub use access::{
    AccessEntry, AccessEntryType, AccessPolicyAssociation, AccessScope, AccessScopeType,
    AuthenticationMode, RoleMapping, UserMapping,
};
pub use addon::{
    AddonOptions, CoreDnsAddonOptions, KubeProxyAddonOptions, ResolveConflictsOnCreate,
    ResolveConflictsOnUpdate, VpcCniOptions,
};
pub use ami::{AmiType, CpuArchitecture, OperatingSystem};
pub use cluster::{
    AutoModeOptions, ClusterConfig, ClusterNodePool, ComputeConfig, CreationRoleProviderArgs,
    FargateConfig, FargateProfileOptions, FargateSelector, IamRoleRef, IpFamily,
    KubeconfigOptions, UpgradePolicy, UpgradeSupportType,
};
pub use configuration::Configuration;
pub use configuration_derive::Configuration;
pub use error::{Error, Result};
pub use k8s_version::K8sVersion;
pub use node_group::{
    LaunchTemplateRef, ManagedNodeGroupOptions, ManagedTaint, ManagedTaintEffect,
    NodeGroupBaseOptions, NodeGroupOptions, NodeGroupV2Options, NodeadmOptions, ScalingConfig,
    Taint, TaintEffect,
};
pub use storage::{EbsVolumeType, StorageClassSpec, StorageClasses};

mod access;
mod addon;
mod ami;
mod cluster;
mod configuration;
pub mod constants;
mod error;
mod k8s_version;
mod node_group;
mod storage;
