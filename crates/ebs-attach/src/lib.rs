//! Volume attachment reconciliation
//!
//! Converges each managed node's `status.volumesAttached` toward its
//! `status.volumesInUse` by attaching and detaching EBS volumes. Modules are
//! layered leaves first:
//!
//! - [`device`]: picks a free device path on a node
//! - [`driver`]: idempotent attach/detach of one volume against the provider
//! - [`status`]: writes the attached list back to node status
//! - [`reconciler`]: the detach-then-attach pass over all nodes

#![deny(missing_docs)]

pub mod device;
pub mod driver;
pub mod node;
pub mod reconciler;
pub mod status;

#[cfg(test)]
mod testing;

pub use driver::{AttachOutcome, AttachmentDriver, DetachOutcome};
pub use ebs_common::NodeClient;
pub use node::NodeSnapshot;
pub use reconciler::{Context, PassSummary, Reconciler, ReconcilerConfig};
pub use status::StatusSynchronizer;
