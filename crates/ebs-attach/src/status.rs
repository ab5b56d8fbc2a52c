//! Writes attachment changes back to node status
//!
//! Every write replaces `/status/volumesAttached` wholesale with a list
//! computed from the caller's snapshot. The list returned by the API server
//! is handed back so the caller can refresh its working copy.

use std::sync::Arc;

use k8s_openapi::api::core::v1::AttachedVolume;
use tracing::{debug, warn};

use ebs_common::{Error, NodeClient};

use crate::node::NodeSnapshot;

/// Node status writer for the attached-volume list
#[derive(Clone)]
pub struct StatusSynchronizer {
    nodes: Arc<dyn NodeClient>,
}

impl StatusSynchronizer {
    /// Create a synchronizer over the given node client
    pub fn new(nodes: Arc<dyn NodeClient>) -> Self {
        Self { nodes }
    }

    /// Record `volume_ref` at `device` on the node
    pub async fn add_attachment(
        &self,
        node: &NodeSnapshot,
        volume_ref: &str,
        device: &str,
    ) -> Result<Vec<AttachedVolume>, Error> {
        let volumes = with_attachment(&node.name, &node.volumes_attached, volume_ref, device);
        debug!(node = %node.name, volume = %volume_ref, device = %device, "recording attachment");
        self.nodes.replace_attached_volumes(&node.name, &volumes).await
    }

    /// Drop every entry for `volume_ref` from the node
    pub async fn remove_attachment(
        &self,
        node: &NodeSnapshot,
        volume_ref: &str,
    ) -> Result<Vec<AttachedVolume>, Error> {
        let volumes = without_attachment(&node.volumes_attached, volume_ref);
        debug!(node = %node.name, volume = %volume_ref, "removing attachment");
        self.nodes.replace_attached_volumes(&node.name, &volumes).await
    }
}

/// Attached list with `(volume_ref, device)` appended
///
/// Entries already naming the same volume or the same device are dropped
/// first; the provider has just confirmed the new pair, so they are stale.
pub fn with_attachment(
    node: &str,
    current: &[AttachedVolume],
    volume_ref: &str,
    device: &str,
) -> Vec<AttachedVolume> {
    let mut volumes: Vec<AttachedVolume> = current
        .iter()
        .filter(|v| {
            let stale = v.name == volume_ref || v.device_path == device;
            if stale && !(v.name == volume_ref && v.device_path == device) {
                warn!(
                    node = %node,
                    volume = %v.name,
                    device = %v.device_path,
                    "dropping stale attachment entry"
                );
            }
            !stale
        })
        .cloned()
        .collect();

    volumes.push(AttachedVolume {
        name: volume_ref.to_string(),
        device_path: device.to_string(),
    });
    volumes
}

/// Attached list with every entry for `volume_ref` removed
pub fn without_attachment(current: &[AttachedVolume], volume_ref: &str) -> Vec<AttachedVolume> {
    current
        .iter()
        .filter(|v| v.name != volume_ref)
        .cloned()
        .collect()
}
