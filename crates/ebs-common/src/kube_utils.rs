//! Kubernetes node inventory access
//!
//! The reconcilers only ever touch `Node` objects: list them, replace
//! `status.volumesAttached`, and delete nodes whose instance is gone.
//! [`NodeClient`] is the seam that lets tests swap the API server out.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use json_patch::{PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{AttachedVolume, Node};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::{Error, FIELD_MANAGER, REGION_LABEL, TOPOLOGY_REGION_LABEL};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait abstracting the node inventory store
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// List every node in the cluster as a point-in-time snapshot
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// Replace `status.volumesAttached` of a node with `volumes`
    ///
    /// Returns the server's resulting value of the field.
    async fn replace_attached_volumes(
        &self,
        node_name: &str,
        volumes: &[AttachedVolume],
    ) -> Result<Vec<AttachedVolume>, Error>;

    /// Delete a node object
    async fn delete_node(&self, node_name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeNodeClient {
    client: Client,
}

impl KubeNodeClient {
    /// Create a new KubeNodeClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        Ok(nodes.items)
    }

    async fn replace_attached_volumes(
        &self,
        node_name: &str,
        volumes: &[AttachedVolume],
    ) -> Result<Vec<AttachedVolume>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = attached_volumes_patch(volumes)?;
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        let node = api
            .patch_status(node_name, &params, &Patch::<()>::Json(patch))
            .await
            .map_err(|e| Error::status_sync(node_name, e.to_string()))?;

        Ok(node
            .status
            .and_then(|s| s.volumes_attached)
            .unwrap_or_default())
    }

    async fn delete_node(&self, node_name: &str) -> Result<(), Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.delete(node_name, &DeleteParams::default()).await?;
        debug!(node = %node_name, "node deleted");
        Ok(())
    }
}

/// Build the JSON patch that replaces `status.volumesAttached` wholesale
///
/// A single `replace` operation is used rather than a merge so entries that
/// only exist in a stale snapshot cannot be merged back in.
pub fn attached_volumes_patch(volumes: &[AttachedVolume]) -> Result<json_patch::Patch, Error> {
    Ok(json_patch::Patch(vec![PatchOperation::Replace(
        ReplaceOperation {
            path: PointerBuf::from_tokens(["status", "volumesAttached"]),
            value: serde_json::to_value(volumes)?,
        },
    )]))
}

/// Region of a node, from the legacy failure-domain label or the topology label
pub fn node_region(node: &Node) -> Option<&str> {
    let labels = node.metadata.labels.as_ref()?;
    labels
        .get(REGION_LABEL)
        .or_else(|| labels.get(TOPOLOGY_REGION_LABEL))
        .map(String::as_str)
        .filter(|r| !r.is_empty())
}

/// Name of a node, or an empty string for nameless objects
pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// Create a kube client from optional kubeconfig path
///
/// Without a path the in-cluster service account is tried first, then the
/// user's kubeconfig.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}
