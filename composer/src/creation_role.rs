//! `ClusterCreationRoleProvider` hands an assumed-role credential provider to the process that
//! creates the cluster. Credential providers cannot cross into this runtime, so the resource is
//! refused and `providerCredentialOpts` is the way to scope credentials instead.

use crate::error::{self, Result};
use eks_model::CreationRoleProviderArgs;
use log::warn;

/// The role a cluster would be created with.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCreationRoleProvider {
    pub role_arn: String,
}

impl ClusterCreationRoleProvider {
    pub fn compose(name: &str, args: &CreationRoleProviderArgs) -> Result<Self> {
        warn!(
            "'{}' requests a creation role provider{}",
            name,
            args.role_arn
                .as_deref()
                .map(|arn| format!(" for '{}'", arn))
                .unwrap_or_default()
        );
        error::UnsupportedInRuntimeSnafu {
            feature: "ClusterCreationRoleProvider",
        }
        .fail()
    }
}
