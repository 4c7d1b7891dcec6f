/*!

`eks-composer` turns an [`eks_model::ClusterConfig`] into the desired state of an EKS cluster: a
[`Graph`] of sub-resources (IAM roles, security groups, the control plane, node groups, addons,
Kubernetes objects) whose attributes refer to each other through [`Deferred`] values.

Nothing here calls a mutating cloud API. A few reads (the default VPC, subnets, addon versions,
recommended AMIs) go through the [`CloudLookup`] trait; [`AwsLookup`] implements it with the AWS
SDK. Reconciling the graph is left to an external engine, which creates nodes in
[`Graph::creation_order`] and evaluates each property once the nodes it refers to exist.

```no_run
# async fn compose() -> eks_composer::Result<()> {
use eks_composer::{aws_config, AwsLookup, Cluster};
use eks_model::ClusterConfig;

let lookup = AwsLookup::new(&aws_config(Some("us-west-2"), None, None).await);
let cluster = Cluster::compose("demo", &ClusterConfig::default(), None, &lookup).await?;
println!("{}", cluster.outputs());
# Ok(())
# }
```

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

pub mod addon;
pub mod ami;
pub mod auth;
mod aws;
mod cluster;
pub mod cni;
pub mod control_plane;
mod core_data;
mod creation_role;
mod deferred;
mod error;
pub mod fargate;
mod graph;
pub mod iam;
pub mod kubeconfig;
mod lookup;
pub mod network;
pub mod nodegroup;
pub mod resolver;
pub mod security_group;
pub mod storage;
pub mod userdata;

pub use aws::{aws_config, AwsLookup};
pub use cluster::{Cluster, ClusterOutputs};
pub use core_data::CoreData;
pub use creation_role::ClusterCreationRoleProvider;
pub use deferred::{Deferred, Func, Realized, RealizedState};
pub use error::{BoxError, Error, InvalidField, Result};
pub use graph::{Graph, ResourceNode, ResourceType};
pub use lookup::{CloudLookup, InstanceTypeInfo, LookupResult, RouteInfo, SubnetInfo};
pub use nodegroup::{ManagedNodeGroup, NodeGroup, NodeGroupV2};
pub use security_group::NodeGroupSecurityGroup;

use serde::Serialize;

/// Pretty JSON of a serializable value, or the reason it could not be serialized.
pub fn json_display<T: Serialize>(object: T) -> String {
    serde_json::to_string_pretty(&object).unwrap_or_else(|e| format!("Serialization failed: {}", e))
}

/// Implement `Display` using `serde_json` `to_string_pretty` for types that implement Serialize.
#[macro_export]
macro_rules! impl_display_as_json {
    ($i:ident) => {
        impl std::fmt::Display for $i {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&$crate::json_display(self), f)
            }
        }
    };
}
