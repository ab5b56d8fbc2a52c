//! Node liveness reconciler
//!
//! A node that stopped heartbeating is checked against the provider. When
//! the provider no longer knows the instance, or reports no status for it,
//! the Node object is deleted so its volumes can be released elsewhere. A
//! node whose instance is still reported is only logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use tracing::{debug, info, instrument, warn};

use ebs_cloud::{CloudApi, InstancePresence};
use ebs_common::kube_utils::{node_name, node_region};
use ebs_common::metrics::NODES_REMOVED;
use ebs_common::{Error, NodeClient, ReferenceResolver, DEFAULT_PROVIDER_TIMEOUT};

/// Heartbeat age under which a node counts as reporting
pub const DEFAULT_HEARTBEAT_WINDOW: Duration = Duration::from_secs(30);

/// Node condition type checked for heartbeats
const READY_CONDITION: &str = "Ready";

/// Tunables for a liveness pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeGcConfig {
    /// Maximum age of the Ready heartbeat for a node to count as reporting
    pub heartbeat_window: Duration,
    /// Deadline for one instance status lookup
    pub provider_timeout: Duration,
}

impl Default for NodeGcConfig {
    fn default() -> Self {
        Self {
            heartbeat_window: DEFAULT_HEARTBEAT_WINDOW,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

/// Counts of what one liveness pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcSummary {
    /// Nodes with a fresh Ready heartbeat
    pub reporting: usize,
    /// Stale nodes whose instance the provider still reports
    pub alive: usize,
    /// Nodes deleted because their instance is gone
    pub removed: usize,
    /// Stale nodes that could not be identified at the provider
    pub skipped: usize,
    /// Lookups or deletes that failed
    pub failed: usize,
}

/// Deletes nodes whose backing instance no longer exists
pub struct NodeGc {
    nodes: Arc<dyn NodeClient>,
    cloud: Arc<dyn CloudApi>,
    resolver: Arc<dyn ReferenceResolver>,
    config: NodeGcConfig,
}

impl NodeGc {
    /// Create a liveness reconciler
    pub fn new(
        nodes: Arc<dyn NodeClient>,
        cloud: Arc<dyn CloudApi>,
        resolver: Arc<dyn ReferenceResolver>,
        config: NodeGcConfig,
    ) -> Self {
        Self {
            nodes,
            cloud,
            resolver,
            config,
        }
    }

    /// List nodes and check every stale one
    ///
    /// Fails only when the node list cannot be read.
    pub async fn reconcile_pass(&self) -> Result<GcSummary, Error> {
        let nodes = self.nodes.list_nodes().await?;
        Ok(self.reconcile_nodes(&nodes, Utc::now()).await)
    }

    /// Check a caller-supplied set of nodes as of `now`
    #[instrument(skip_all, fields(nodes = nodes.len()))]
    pub async fn reconcile_nodes(&self, nodes: &[Node], now: DateTime<Utc>) -> GcSummary {
        let mut summary = GcSummary::default();

        for node in nodes {
            let name = node_name(node);
            if has_fresh_ready_condition(node, now, self.config.heartbeat_window) {
                summary.reporting += 1;
                continue;
            }

            let (region, instance_id) = match self.locate(node) {
                Ok(located) => located,
                Err(e) => {
                    warn!(
                        node = %name,
                        error = %e,
                        "cannot identify instance of stale node, skipping"
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            match self.presence(region, &instance_id).await {
                Ok(InstancePresence::Reported(state)) => {
                    info!(
                        node = %name,
                        instance_id = %instance_id,
                        state = %state,
                        "node seems unresponsive, but alive"
                    );
                    summary.alive += 1;
                }
                Ok(InstancePresence::NotFound | InstancePresence::NoStatus) => {
                    info!(node = %name, instance_id = %instance_id, "removing node");
                    match self.nodes.delete_node(name).await {
                        Ok(()) => {
                            NODES_REMOVED.add(1, &[]);
                            summary.removed += 1;
                        }
                        Err(e) => {
                            warn!(node = %name, error = %e, "failed to remove node");
                            summary.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        node = %name,
                        instance_id = %instance_id,
                        error = %e,
                        "instance status lookup failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        debug!(
            reporting = summary.reporting,
            alive = summary.alive,
            removed = summary.removed,
            skipped = summary.skipped,
            failed = summary.failed,
            "liveness pass complete"
        );
        summary
    }

    /// Region and instance ID of a node
    fn locate<'a>(&self, node: &'a Node) -> Result<(&'a str, String), Error> {
        let name = node_name(node);
        let region = node_region(node).ok_or_else(|| Error::MissingRegion {
            node: name.to_string(),
        })?;
        let provider_id = node
            .spec
            .as_ref()
            .and_then(|s| s.provider_id.as_deref())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::reference(name, "node has no spec.providerID"))?;
        Ok((region, self.resolver.resolve(provider_id)?))
    }

    async fn presence(&self, region: &str, instance_id: &str) -> Result<InstancePresence, Error> {
        let timeout = self.config.provider_timeout;
        tokio::time::timeout(timeout, self.cloud.describe_instance_status(region, instance_id))
            .await
            .map_err(|_| Error::timeout("describe-instance-status", timeout))?
    }
}

/// The node's Ready condition carries a heartbeat younger than `window`
///
/// Only the heartbeat age matters, not the condition's status: a kubelet
/// reporting `Ready=False` is still alive. Heartbeats from the future count
/// as fresh.
pub fn has_fresh_ready_condition(node: &Node, now: DateTime<Utc>, window: Duration) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .filter(|c| c.type_ == READY_CONDITION)
        .filter_map(|c| c.last_heartbeat_time.as_ref())
        .any(|heartbeat| match now.signed_duration_since(heartbeat.0).to_std() {
            Ok(age) => age < window,
            Err(_) => true,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{NodeCondition, NodeSpec, NodeStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use mockall::predicate::eq;
    use rstest::rstest;

    use ebs_cloud::MockCloudApi;
    use ebs_common::{LastSegmentResolver, MockNodeClient, REGION_LABEL};

    const REGION: &str = "eu-west-1";

    fn node_with_heartbeat(name: &str, heartbeat_age: Option<i64>) -> Node {
        let conditions = heartbeat_age.map(|secs| {
            vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "Unknown".to_string(),
                last_heartbeat_time: Some(Time(Utc::now() - chrono::Duration::seconds(secs))),
                ..Default::default()
            }]
        });

        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    REGION_LABEL.to_string(),
                    REGION.to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                provider_id: Some(format!("aws:///eu-west-1b/i-{name}")),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                conditions,
                ..Default::default()
            }),
        }
    }

    fn stale(name: &str) -> Node {
        node_with_heartbeat(name, Some(300))
    }

    fn gc(nodes: MockNodeClient, cloud: MockCloudApi) -> NodeGc {
        NodeGc::new(
            Arc::new(nodes),
            Arc::new(cloud),
            Arc::new(LastSegmentResolver),
            NodeGcConfig::default(),
        )
    }

    // ========================================================================
    // Heartbeat freshness
    // ========================================================================

    #[rstest]
    #[case::fresh(Some(5), true)]
    #[case::just_stale(Some(31), false)]
    #[case::long_gone(Some(3600), false)]
    #[case::future_clock_skew(Some(-10), true)]
    #[case::no_conditions(None, false)]
    fn heartbeat_freshness(#[case] age: Option<i64>, #[case] fresh: bool) {
        let node = node_with_heartbeat("n1", age);
        assert_eq!(
            has_fresh_ready_condition(&node, Utc::now(), DEFAULT_HEARTBEAT_WINDOW),
            fresh
        );
    }

    #[test]
    fn other_condition_types_do_not_count() {
        let mut node = node_with_heartbeat("n1", Some(1));
        if let Some(conditions) = node.status.as_mut().and_then(|s| s.conditions.as_mut()) {
            conditions[0].type_ = "MemoryPressure".to_string();
        }
        assert!(!has_fresh_ready_condition(&node, Utc::now(), DEFAULT_HEARTBEAT_WINDOW));
    }

    // ========================================================================
    // Removal decisions
    // ========================================================================

    #[tokio::test]
    async fn reporting_node_is_never_looked_up() {
        let mut cloud = MockCloudApi::new();
        cloud.expect_describe_instance_status().never();
        let mut nodes = MockNodeClient::new();
        nodes.expect_delete_node().never();

        let summary = gc(nodes, cloud)
            .reconcile_nodes(&[node_with_heartbeat("n1", Some(2))], Utc::now())
            .await;
        assert_eq!(summary.reporting, 1);
    }

    #[rstest]
    #[case::terminated(InstancePresence::NotFound)]
    #[case::stopped(InstancePresence::NoStatus)]
    #[tokio::test]
    async fn gone_instance_removes_node(#[case] presence: InstancePresence) {
        let mut cloud = MockCloudApi::new();
        cloud
            .expect_describe_instance_status()
            .with(eq(REGION), eq("i-n1"))
            .times(1)
            .returning(move |_, _| Ok(presence.clone()));
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_delete_node()
            .with(eq("n1"))
            .times(1)
            .returning(|_| Ok(()));

        let summary = gc(nodes, cloud).reconcile_nodes(&[stale("n1")], Utc::now()).await;
        assert_eq!(summary.removed, 1);
    }

    #[tokio::test]
    async fn reported_instance_keeps_node() {
        let mut cloud = MockCloudApi::new();
        cloud
            .expect_describe_instance_status()
            .returning(|_, _| Ok(InstancePresence::Reported("running".to_string())));
        let mut nodes = MockNodeClient::new();
        nodes.expect_delete_node().never();

        let summary = gc(nodes, cloud).reconcile_nodes(&[stale("n1")], Utc::now()).await;
        assert_eq!(summary.alive, 1);
        assert_eq!(summary.removed, 0);
    }

    #[tokio::test]
    async fn lookup_error_keeps_node() {
        let mut cloud = MockCloudApi::new();
        cloud
            .expect_describe_instance_status()
            .returning(|_, _| {
                Err(Error::cloud_with_code(
                    "describe-instance-status",
                    "UnauthorizedOperation",
                    "denied",
                ))
            });
        let mut nodes = MockNodeClient::new();
        nodes.expect_delete_node().never();

        let summary = gc(nodes, cloud).reconcile_nodes(&[stale("n1")], Utc::now()).await;
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn unidentifiable_nodes_are_skipped() {
        let mut no_region = stale("n1");
        no_region.metadata.labels = None;
        let mut no_provider = stale("n2");
        no_provider.spec = None;
        let mut bad_provider = stale("n3");
        bad_provider.spec = Some(NodeSpec {
            provider_id: Some("aws:///eu-west-1b/".to_string()),
            ..Default::default()
        });

        let mut cloud = MockCloudApi::new();
        cloud.expect_describe_instance_status().never();
        let mut nodes = MockNodeClient::new();
        nodes.expect_delete_node().never();

        let summary = gc(nodes, cloud)
            .reconcile_nodes(&[no_region, no_provider, bad_provider], Utc::now())
            .await;
        assert_eq!(summary.skipped, 3);
    }

    #[tokio::test]
    async fn delete_failure_does_not_stop_the_pass() {
        let mut cloud = MockCloudApi::new();
        cloud
            .expect_describe_instance_status()
            .returning(|_, _| Ok(InstancePresence::NotFound));
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_delete_node()
            .with(eq("n1"))
            .returning(|_| Err(Error::internal("forbidden")));
        nodes
            .expect_delete_node()
            .with(eq("n2"))
            .times(1)
            .returning(|_| Ok(()));

        let summary = gc(nodes, cloud)
            .reconcile_nodes(&[stale("n1"), stale("n2")], Utc::now())
            .await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.removed, 1);
    }

    #[tokio::test]
    async fn listing_failure_fails_the_pass() {
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_list_nodes()
            .returning(|| Err(Error::internal("list failed")));

        assert!(gc(nodes, MockCloudApi::new()).reconcile_pass().await.is_err());
    }
}
