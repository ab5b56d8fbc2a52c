//! Node liveness reconciliation
//!
//! Removes Node objects whose backing EC2 instance has disappeared, so a
//! terminated instance does not keep its volumes pinned in node status.

#![deny(missing_docs)]

pub mod liveness;

pub use liveness::{has_fresh_ready_condition, GcSummary, NodeGc, NodeGcConfig};
