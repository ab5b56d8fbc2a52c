//! Detach-then-attach reconciliation pass over every managed node
//!
//! A pass lists nodes once, then runs two phases:
//!
//! 1. **Detach** - for every managed node, each volume in the cached attached
//!    list that the node no longer uses is detached and removed from status.
//! 2. **Attach** - for every managed node, each used volume missing from the
//!    cached attached list is attached and recorded in status.
//!
//! Detaching everywhere first frees device slots and lets a volume leave its
//! old node before another node claims it. Only volumes whose reference
//! starts with the configured prefix are considered.
//!
//! The reconciler holds no state between passes. Within a pass it keeps a
//! working copy of each node's attached list, refreshed after every status
//! write, so later steps see slots claimed by earlier ones. A slot freed by a
//! detach stays held until the next pass, since the provider keeps the old
//! volume at that path while it is detaching.
//!
//! A volume that moves between nodes inside one pass can race: if the new
//! node's attach is probed before the old node's detach lands at the
//! provider, the attach fails and succeeds on a later pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Node;
use tracing::{debug, error, info, instrument, warn};

use ebs_cloud::{CloudApi, VolumeProber};
use ebs_common::metrics::{record_volume_operation, OperationResult, RECONCILE_PASS_DURATION};
use ebs_common::{
    Error, NodeClient, ReferenceResolver, DEFAULT_PROVIDER_TIMEOUT, DEFAULT_VOLUME_PREFIX,
};

use crate::driver::{AttachOutcome, AttachmentDriver, DetachOutcome};
use crate::node::NodeSnapshot;
use crate::status::{with_attachment, without_attachment, StatusSynchronizer};

/// Tunables for a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Volume references handled by this reconciler start with this prefix
    pub volume_prefix: String,
    /// Deadline for one probe-plus-mutation provider operation
    pub provider_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            volume_prefix: DEFAULT_VOLUME_PREFIX.to_string(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

/// Dependencies injected into the reconciler
pub struct Context {
    /// Node inventory and status writer
    pub nodes: Arc<dyn NodeClient>,
    /// Cloud volume API
    pub cloud: Arc<dyn CloudApi>,
    /// Parses provider IDs out of node and volume references
    pub resolver: Arc<dyn ReferenceResolver>,
    /// Pass tunables
    pub config: ReconcilerConfig,
}

/// Counts of what one pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Nodes that opted into controller-managed attach/detach
    pub nodes_managed: usize,
    /// Nodes skipped because they did not opt in
    pub nodes_skipped: usize,
    /// Detach calls issued and recorded in status
    pub detached: usize,
    /// Attach calls issued and recorded in status
    pub attached: usize,
    /// Operations the provider already satisfied
    pub already_converged: usize,
    /// Operations that failed at the provider or at status write
    pub failed: usize,
}

/// Reconciles node attachment status against the provider
pub struct Reconciler {
    nodes: Arc<dyn NodeClient>,
    driver: AttachmentDriver,
    status: StatusSynchronizer,
    volume_prefix: String,
}

impl Reconciler {
    /// Build a reconciler from its dependencies
    pub fn new(ctx: Context) -> Self {
        let driver = AttachmentDriver::new(
            VolumeProber::new(ctx.cloud),
            ctx.resolver,
            ctx.config.provider_timeout,
        );
        Self {
            status: StatusSynchronizer::new(ctx.nodes.clone()),
            nodes: ctx.nodes,
            driver,
            volume_prefix: ctx.config.volume_prefix,
        }
    }

    /// List nodes and reconcile them
    ///
    /// Fails only when the node list cannot be read. Every per-node and
    /// per-volume failure is logged and counted in the summary.
    pub async fn reconcile_pass(&self) -> Result<PassSummary, Error> {
        let start = Instant::now();
        let nodes = self.nodes.list_nodes().await?;
        let summary = self.reconcile_nodes(&nodes).await;
        RECONCILE_PASS_DURATION.record(start.elapsed().as_secs_f64(), &[]);
        Ok(summary)
    }

    /// Reconcile a caller-supplied set of nodes
    #[instrument(skip_all, fields(nodes = nodes.len()))]
    pub async fn reconcile_nodes(&self, nodes: &[Node]) -> PassSummary {
        let mut summary = PassSummary::default();

        let mut managed: Vec<NodeSnapshot> = Vec::with_capacity(nodes.len());
        for node in nodes.iter().map(NodeSnapshot::from_node) {
            if node.managed {
                managed.push(node);
            } else {
                debug!(node = %node.name, "skipping node without managed attach/detach");
                summary.nodes_skipped += 1;
            }
        }
        summary.nodes_managed = managed.len();

        for node in managed.iter_mut() {
            for volume_ref in self.detach_candidates(node) {
                self.detach_one(node, &volume_ref, &mut summary).await;
            }
        }

        for node in managed.iter_mut() {
            for volume_ref in self.attach_candidates(node) {
                self.attach_one(node, &volume_ref, &mut summary).await;
            }
        }

        info!(
            managed = summary.nodes_managed,
            skipped = summary.nodes_skipped,
            detached = summary.detached,
            attached = summary.attached,
            converged = summary.already_converged,
            failed = summary.failed,
            "reconciliation pass complete"
        );
        summary
    }

    fn handles(&self, volume_ref: &str) -> bool {
        volume_ref.starts_with(&self.volume_prefix)
    }

    /// Attached volumes the node no longer uses, in status order
    fn detach_candidates(&self, node: &NodeSnapshot) -> Vec<String> {
        let mut seen = HashSet::new();
        node.volumes_attached
            .iter()
            .map(|v| v.name.as_str())
            .filter(|v| self.handles(v) && !node.volume_in_use(v) && seen.insert(*v))
            .map(str::to_string)
            .collect()
    }

    /// Used volumes missing from the attached list, in status order
    fn attach_candidates(&self, node: &NodeSnapshot) -> Vec<String> {
        let mut seen = HashSet::new();
        node.volumes_in_use
            .iter()
            .map(String::as_str)
            .filter(|v| self.handles(v) && !node.volume_attached(v) && seen.insert(*v))
            .map(str::to_string)
            .collect()
    }

    async fn detach_one(
        &self,
        node: &mut NodeSnapshot,
        volume_ref: &str,
        summary: &mut PassSummary,
    ) {
        info!(node = %node.name, volume = %volume_ref, "detaching volume no longer in use");

        let outcome = match self.driver.detach(volume_ref, node).await {
            Ok(outcome) => outcome,
            Err(e) => {
                fail("detach", &node.name, volume_ref, &e, summary);
                return;
            }
        };
        if let DetachOutcome::AttachedElsewhere { instance_id } = &outcome {
            debug!(
                node = %node.name,
                volume = %volume_ref,
                instance_id = %instance_id,
                "clearing stale status entry"
            );
        }
        if outcome.mutated() {
            node.hold_devices_of(volume_ref);
        }

        match self.status.remove_attachment(node, volume_ref).await {
            Ok(confirmed) => {
                node.volumes_attached = confirmed;
                if outcome.mutated() {
                    summary.detached += 1;
                    record_volume_operation("detach", OperationResult::Success);
                } else {
                    summary.already_converged += 1;
                    record_volume_operation("detach", OperationResult::Noop);
                }
            }
            Err(e) => {
                node.volumes_attached = without_attachment(&node.volumes_attached, volume_ref);
                fail("detach", &node.name, volume_ref, &e, summary);
            }
        }
    }

    async fn attach_one(
        &self,
        node: &mut NodeSnapshot,
        volume_ref: &str,
        summary: &mut PassSummary,
    ) {
        info!(node = %node.name, volume = %volume_ref, "attaching volume in use");

        let outcome = match self.driver.attach(volume_ref, node).await {
            Ok(outcome) => outcome,
            Err(e) => {
                fail("attach", &node.name, volume_ref, &e, summary);
                return;
            }
        };
        let device = outcome.device().to_string();

        match self.status.add_attachment(node, volume_ref, &device).await {
            Ok(confirmed) => {
                node.volumes_attached = confirmed;
                match outcome {
                    AttachOutcome::Attached { .. } => {
                        summary.attached += 1;
                        record_volume_operation("attach", OperationResult::Success);
                    }
                    AttachOutcome::AlreadyAttached { .. } => {
                        summary.already_converged += 1;
                        record_volume_operation("attach", OperationResult::Noop);
                    }
                }
                info!(node = %node.name, volume = %volume_ref, device = %device, "volume attached");
            }
            Err(e) => {
                node.volumes_attached =
                    with_attachment(&node.name, &node.volumes_attached, volume_ref, &device);
                fail("attach", &node.name, volume_ref, &e, summary);
            }
        }
    }
}

/// Log and count a failed operation; the pass continues
fn fail(
    operation: &'static str,
    node: &str,
    volume_ref: &str,
    e: &Error,
    summary: &mut PassSummary,
) {
    summary.failed += 1;
    record_volume_operation(operation, OperationResult::Error(e.kind()));
    if e.is_retryable() {
        warn!(
            node = %node,
            volume = %volume_ref,
            operation,
            error = %e,
            "operation failed, will retry next pass"
        );
    } else {
        error!(
            node = %node,
            volume = %volume_ref,
            operation,
            error = %e,
            stuck = true,
            "operation failed and will not succeed without intervention"
        );
    }
}
