//! Common types for the EBS reconciler: errors, identity resolution, node
//! access and telemetry

#![deny(missing_docs)]

pub mod error;
pub mod identity;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

use std::time::Duration;

pub use error::Error;
pub use identity::{LastSegmentResolver, ReferenceResolver};
pub use kube_utils::{KubeNodeClient, NodeClient};
#[cfg(any(test, feature = "testing"))]
pub use kube_utils::MockNodeClient;

/// Annotation that opts a node into controller-managed attach/detach
pub const MANAGED_ATTACH_DETACH_ANNOTATION: &str =
    "volumes.kubernetes.io/controller-managed-attach-detach";

/// Legacy region label set by the AWS cloud provider
pub const REGION_LABEL: &str = "failure-domain.beta.kubernetes.io/region";

/// Topology region label used by newer kubelets
pub const TOPOLOGY_REGION_LABEL: &str = "topology.kubernetes.io/region";

/// Prefix of unique volume names owned by the in-tree AWS EBS plugin
pub const DEFAULT_VOLUME_PREFIX: &str = "kubernetes.io/aws-ebs/";

/// Deadline for one provider operation (probe plus mutation)
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Field manager recorded on status patches
pub const FIELD_MANAGER: &str = "ebs-operator";
