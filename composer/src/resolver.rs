//! Validates cluster options, fills in their defaults and classifies the deployment.

use crate::auth;
use crate::error::{self, Problems, Result};
use eks_model::constants::DEFAULT_SERVICE_IPV4_CIDR;
use eks_model::{
    AuthenticationMode, ClusterConfig, Configuration, IpFamily, K8sVersion, NodeGroupBaseOptions,
};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_plain::derive_display_from_serialize;
use snafu::ensure;

/// Where the cluster's compute comes from.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// EKS auto mode manages the nodes.
    Auto,
    /// Only Fargate runs pods.
    Fargate,
    /// No default node group; managed node groups are attached later.
    ManagedOnly,
    /// The cluster's default self-managed node group.
    SelfManaged,
    /// Fargate alongside EC2 node groups attached later.
    Mixed,
}

derive_display_from_serialize!(Mode);

/// Cluster options with every default decided.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// The composite's name, the prefix of every logical name.
    pub name: String,
    /// The physical name of the EKS cluster.
    pub cluster_name: String,
    pub version: Option<K8sVersion>,
    pub mode: Mode,
    pub auth_mode: AuthenticationMode,
    pub skip_default_node_group: bool,
    pub skip_default_security_groups: bool,
    pub create_instance_role: bool,
    pub create_oidc_provider: bool,
    pub use_default_vpc_cni: bool,
    pub ip_family: IpFamily,
    /// The IPv4 service CIDR the cluster is created with, when it is chosen by the caller.
    pub service_ipv4_cidr: Option<String>,
    /// Options of the default node group, from `nodeGroupOptions` or the singular options.
    pub default_node_group: NodeGroupBaseOptions,
    /// Set when an immutable networking option changed since the previous composition.
    pub replace_cluster: bool,
    pub config: ClusterConfig,
}

impl ResolvedConfig {
    /// The IPv4 service CIDR nodes assume when the cluster picks its own.
    pub fn service_cidr_or_default(&self) -> &str {
        self.service_ipv4_cidr
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_IPV4_CIDR)
    }
}

/// Validates `config` against itself and against the options of the previous composition, then
/// decides every default. All validation problems are reported together.
pub fn resolve(
    name: &str,
    config: &ClusterConfig,
    previous: Option<&ClusterConfig>,
) -> Result<ResolvedConfig> {
    if config.creation_role_provider.is_some() {
        return error::UnsupportedInRuntimeSnafu {
            feature: "creationRoleProvider",
        }
        .fail();
    }

    let mut problems = Problems::new();
    let set = |v: &Option<Vec<String>>| v.as_ref().map(|v| !v.is_empty()).unwrap_or(false);

    problems.check(
        config.subnet_ids.is_some()
            && (config.public_subnet_ids.is_some() || config.private_subnet_ids.is_some()),
        "subnetIds",
        "subnetIds, and the use of publicSubnetIds and/or privateSubnetIds are mutually \
         exclusive. Choose a single approach.",
    );
    problems.check(
        config.instance_role.is_some() && config.instance_roles.is_some(),
        "instanceRole",
        "instanceRole and instanceRoles are mutually exclusive, and cannot both be set.",
    );
    problems.check(
        config.node_group_options.is_some() && config.has_singular_node_options(),
        "nodeGroupOptions",
        format!(
            "Setting nodeGroupOptions, and any set of singular node group option(s) on the \
             cluster, is mutually exclusive. Choose a single approach. Singular options set: {}",
            config.node_options_set().join(", ")
        ),
    );
    problems.check(
        config.node_ami_id.is_some() && config.gpu.unwrap_or(false),
        "nodeAmiId",
        "nodeAmiId and gpu are mutually exclusive.",
    );
    problems.check(
        config.vpc_cni_options.is_some() && config.use_default_vpc_cni.unwrap_or(false),
        "vpcCniOptions",
        "vpcCniOptions and useDefaultVpcCni are mutually exclusive.",
    );
    if let Some(options) = &config.node_group_options {
        problems.check(
            options.ami_id.is_some() && options.gpu.unwrap_or(false),
            "nodeGroupOptions.amiId",
            "amiId and gpu are mutually exclusive.",
        );
        problems.check(
            options.ami_id.is_some() && options.ami_type.is_some(),
            "nodeGroupOptions.amiId",
            "amiId and amiType are mutually exclusive.",
        );
    }

    let version = match &config.version {
        Some(version) => problems.record(
            K8sVersion::parse(version).map_err(|e| error::InvalidField::new("version", e)),
        ),
        None => None,
    };

    let auto_mode = config.auto_mode_enabled();
    let auth_mode = config.authentication_mode.unwrap_or_default();
    problems.check(
        auto_mode && !auth_mode.supports_access_entries(),
        "authenticationMode",
        "Access entries are required when using EKS Auto Mode. Use the authentication mode 'API' \
         or 'API_AND_CONFIG_MAP'.",
    );
    problems.extend(auth::validate(
        auth_mode,
        config.role_mappings.is_some(),
        config.user_mappings.is_some(),
        config
            .access_entries
            .as_ref()
            .map(|e| !e.is_empty())
            .unwrap_or(false),
    ));
    if let Some(entries) = &config.access_entries {
        problems.extend(auth::validate_access_entries(entries));
    }
    problems.check(
        set(&config.public_access_cidrs) && config.endpoint_public_access == Some(false),
        "publicAccessCidrs",
        "publicAccessCidrs cannot be set when endpointPublicAccess is false.",
    );
    if config.fargate_enabled() && auto_mode {
        debug!("Fargate profile requested alongside auto mode");
    }

    problems.into_result()?;

    if let Some(previous) = previous {
        auth::check_transition(
            Some(previous.authentication_mode.unwrap_or_default()),
            auth_mode,
        )?;
    }

    let skip_default_node_group =
        config.skip_default_node_group.unwrap_or(false) || config.fargate_enabled() || auto_mode;
    let skip_default_security_groups =
        config.skip_default_security_groups.unwrap_or(false) || auto_mode;
    let create_instance_role = config
        .create_instance_role
        .unwrap_or(!skip_default_node_group);

    let mut default_node_group = config
        .node_group_options
        .clone()
        .unwrap_or_else(|| singular_node_group_options(config));
    if let Some(size) = default_node_group.node_root_volume_size {
        default_node_group.node_root_volume_size = Some(size.max(1));
    }

    if !skip_default_node_group {
        let has_role = create_instance_role
            || config.instance_role.is_some()
            || config.instance_roles.is_some()
            || config.instance_profile_name.is_some()
            || default_node_group.instance_profile_name.is_some();
        ensure!(
            has_role,
            error::MissingInstanceRoleSnafu {
                what: "the default node group"
            }
        );
    }

    let has_ec2_roles = create_instance_role
        || config.instance_role.is_some()
        || config
            .instance_roles
            .as_ref()
            .map(|r| !r.is_empty())
            .unwrap_or(false);
    let mode = if auto_mode {
        Mode::Auto
    } else if config.fargate_enabled() && has_ec2_roles {
        Mode::Mixed
    } else if config.fargate_enabled() {
        Mode::Fargate
    } else if skip_default_node_group {
        Mode::ManagedOnly
    } else {
        Mode::SelfManaged
    };

    let ip_family = config.ip_family.unwrap_or_default();
    let replace_cluster = previous
        .map(|previous| {
            previous.ip_family.unwrap_or_default() != ip_family
                || previous.kubernetes_service_ip_address_range
                    != config.kubernetes_service_ip_address_range
        })
        .unwrap_or(false);
    if replace_cluster {
        debug!(
            "Immutable networking options of '{}' changed, the cluster will be replaced",
            name
        );
    }

    let resolved = ResolvedConfig {
        name: name.to_string(),
        cluster_name: config
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-eksCluster", name)),
        version,
        mode,
        auth_mode,
        skip_default_node_group,
        skip_default_security_groups,
        create_instance_role,
        create_oidc_provider: config.create_oidc_provider.unwrap_or(false),
        use_default_vpc_cni: config.use_default_vpc_cni.unwrap_or(false),
        ip_family,
        service_ipv4_cidr: config.kubernetes_service_ip_address_range.clone(),
        default_node_group,
        replace_cluster,
        config: config.clone(),
    };
    debug!(
        "Resolved '{}' in mode {} with authentication mode {}",
        name, resolved.mode, resolved.auth_mode
    );
    Ok(resolved)
}

fn singular_node_group_options(config: &ClusterConfig) -> NodeGroupBaseOptions {
    NodeGroupBaseOptions {
        node_subnet_ids: config.node_subnet_ids.clone(),
        instance_type: config.instance_type.clone(),
        gpu: config.gpu,
        ami_id: config.node_ami_id.clone(),
        node_public_key: config.node_public_key.clone(),
        node_root_volume_size: config.node_root_volume_size,
        node_root_volume_encrypted: config.node_root_volume_encrypted,
        node_user_data: config.node_user_data.clone(),
        desired_capacity: config.desired_capacity,
        min_size: config.min_size,
        max_size: config.max_size,
        node_associate_public_ip_address: config.node_associate_public_ip_address,
        instance_profile_name: config.instance_profile_name.clone(),
        ..NodeGroupBaseOptions::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use eks_model::{
        AccessEntry, AutoModeOptions, CreationRoleProviderArgs, FargateConfig, IamRoleRef,
    };
    use maplit::btreemap;

    fn paths(err: &error::Error) -> Vec<String> {
        err.invalid_fields().iter().map(|f| f.path.clone()).collect()
    }

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = resolve("c", &ClusterConfig::default(), None).unwrap();
        assert_eq!(resolved.mode, Mode::SelfManaged);
        assert_eq!(resolved.auth_mode, AuthenticationMode::ApiAndConfigMap);
        assert!(resolved.create_instance_role);
        assert!(!resolved.create_oidc_provider);
        assert_eq!(resolved.cluster_name, "c-eksCluster");
        assert_eq!(resolved.service_cidr_or_default(), "10.100.0.0/16");
    }

    #[test]
    fn every_problem_is_reported() {
        let config = ClusterConfig {
            subnet_ids: Some(vec!["subnet-1".to_string()]),
            public_subnet_ids: Some(vec!["subnet-2".to_string()]),
            instance_role: Some(IamRoleRef::new("arn:aws:iam::1:role/a")),
            instance_roles: Some(vec![IamRoleRef::new("arn:aws:iam::1:role/b")]),
            node_ami_id: Some("ami-123".to_string()),
            gpu: Some(true),
            version: Some("one.two".to_string()),
            ..ClusterConfig::default()
        };
        let err = resolve("c", &config, None).unwrap_err();
        assert_eq!(
            paths(&err),
            vec!["subnetIds", "instanceRole", "nodeAmiId", "version"]
        );
        assert!(err
            .to_string()
            .contains("instanceRole and instanceRoles are mutually exclusive, and cannot both be set."));
    }

    #[test]
    fn node_group_options_exclude_singular_options() {
        let config = ClusterConfig {
            node_group_options: Some(NodeGroupBaseOptions::default()),
            node_subnet_ids: Some(vec!["subnet-1".to_string()]),
            ..ClusterConfig::default()
        };
        let err = resolve("c", &config, None).unwrap_err();
        assert_eq!(paths(&err), vec!["nodeGroupOptions"]);
    }

    #[test]
    fn access_entries_need_api_mode() {
        let config = ClusterConfig {
            authentication_mode: Some(AuthenticationMode::ConfigMap),
            access_entries: Some(btreemap! {
                "admin".to_string() => AccessEntry {
                    principal_arn: "arn:aws:iam::1:role/admin".to_string(),
                    ..AccessEntry::default()
                },
            }),
            ..ClusterConfig::default()
        };
        let err = resolve("c", &config, None).unwrap_err();
        assert_eq!(paths(&err), vec!["accessEntries"]);
    }

    #[test]
    fn auto_mode_requires_access_entries() {
        let config = ClusterConfig {
            auto_mode: Some(AutoModeOptions {
                enabled: true,
                ..AutoModeOptions::default()
            }),
            authentication_mode: Some(AuthenticationMode::ConfigMap),
            ..ClusterConfig::default()
        };
        let err = resolve("c", &config, None).unwrap_err();
        assert!(err.to_string().contains(
            "Access entries are required when using EKS Auto Mode. Use the authentication mode \
             'API' or 'API_AND_CONFIG_MAP'."
        ));
    }

    #[test]
    fn modes() {
        let fargate = ClusterConfig {
            fargate: Some(FargateConfig::Enabled(true)),
            ..ClusterConfig::default()
        };
        let resolved = resolve("c", &fargate, None).unwrap();
        assert_eq!(resolved.mode, Mode::Fargate);
        assert!(resolved.skip_default_node_group);
        assert!(!resolved.create_instance_role);

        let mixed = ClusterConfig {
            create_instance_role: Some(true),
            ..fargate
        };
        assert_eq!(resolve("c", &mixed, None).unwrap().mode, Mode::Mixed);

        let managed = ClusterConfig {
            skip_default_node_group: Some(true),
            ..ClusterConfig::default()
        };
        assert_eq!(resolve("c", &managed, None).unwrap().mode, Mode::ManagedOnly);
    }

    #[test]
    fn default_node_group_needs_a_role() {
        let config = ClusterConfig {
            create_instance_role: Some(false),
            ..ClusterConfig::default()
        };
        assert!(matches!(
            resolve("c", &config, None),
            Err(error::Error::MissingInstanceRole { .. })
        ));
    }

    #[test]
    fn creation_role_provider_is_not_supported() {
        let config = ClusterConfig {
            creation_role_provider: Some(CreationRoleProviderArgs::default()),
            ..ClusterConfig::default()
        };
        let err = resolve("c", &config, None).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn ip_family_change_replaces_the_cluster() {
        let previous = ClusterConfig {
            ip_family: Some(IpFamily::Ipv6),
            ..ClusterConfig::default()
        };
        let next = ClusterConfig {
            ip_family: Some(IpFamily::Ipv4),
            ..ClusterConfig::default()
        };
        assert!(resolve("c", &next, Some(&previous)).unwrap().replace_cluster);
        assert!(!resolve("c", &previous, Some(&previous)).unwrap().replace_cluster);
    }

    #[test]
    fn root_volume_size_is_clamped() {
        let config = ClusterConfig {
            node_root_volume_size: Some(0),
            ..ClusterConfig::default()
        };
        let resolved = resolve("c", &config, None).unwrap();
        assert_eq!(resolved.default_node_group.node_root_volume_size, Some(1));
    }
}
