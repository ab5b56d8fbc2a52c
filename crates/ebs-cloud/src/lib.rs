//! Cloud provider access for the EBS reconciler
//!
//! [`CloudApi`] is the seam between reconciliation logic and the provider.
//! [`Ec2CloudApi`] implements it against EC2; [`VolumeProber`] wraps it to
//! give the attachment driver a single authoritative read per volume.

#![deny(missing_docs)]

pub mod api;
pub mod ec2;
pub mod prober;

pub use api::{
    CloudApi, InstancePresence, VolumeAttachment, VolumeLifecycle, VolumeProviderState,
};
#[cfg(any(test, feature = "testing"))]
pub use api::MockCloudApi;
pub use ec2::Ec2CloudApi;
pub use prober::VolumeProber;
