//! Working copy of the node fields the reconciler reads and writes

use std::collections::HashSet;

use k8s_openapi::api::core::v1::{AttachedVolume, Node};

use ebs_common::kube_utils::{node_name, node_region};
use ebs_common::{Error, MANAGED_ATTACH_DETACH_ANNOTATION};

/// Transient per-pass copy of one node
///
/// `volumes_in_use` is desired state owned by the scheduler and never written
/// here. `volumes_attached` is a cache of provider state; the reconciler
/// updates this copy as it goes so later steps in the same pass see slots it
/// already claimed. Slots freed by a detach in this pass move to
/// `held_devices` instead of becoming allocatable, because the provider keeps
/// the old volume at that path until the detach completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSnapshot {
    /// Node name
    pub name: String,
    /// `spec.providerID`, e.g. `aws:///us-east-1a/i-0abc`
    pub provider_id: Option<String>,
    /// Cloud region from the node's region label
    pub region: Option<String>,
    /// Whether the node opted into controller-managed attach/detach
    pub managed: bool,
    /// Volumes the node's workloads require
    pub volumes_in_use: Vec<String>,
    /// Last-known attached volumes, in status order
    pub volumes_attached: Vec<AttachedVolume>,
    /// Device paths detached earlier in this pass
    pub held_devices: HashSet<String>,
}

impl NodeSnapshot {
    /// Capture the fields of a Kubernetes node
    pub fn from_node(node: &Node) -> Self {
        let managed = node
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(MANAGED_ATTACH_DETACH_ANNOTATION))
            .is_some_and(|v| v == "true");
        let status = node.status.as_ref();

        Self {
            name: node_name(node).to_string(),
            provider_id: node.spec.as_ref().and_then(|s| s.provider_id.clone()),
            region: node_region(node).map(str::to_string),
            managed,
            volumes_in_use: status
                .and_then(|s| s.volumes_in_use.clone())
                .unwrap_or_default(),
            volumes_attached: status
                .and_then(|s| s.volumes_attached.clone())
                .unwrap_or_default(),
            held_devices: HashSet::new(),
        }
    }

    /// The node's workloads require `volume_ref`
    pub fn volume_in_use(&self, volume_ref: &str) -> bool {
        self.volumes_in_use.iter().any(|v| v == volume_ref)
    }

    /// The cached status lists `volume_ref` as attached
    pub fn volume_attached(&self, volume_ref: &str) -> bool {
        self.volumes_attached.iter().any(|v| v.name == volume_ref)
    }

    /// The cached status lists `device` as occupied
    pub fn device_in_use(&self, device: &str) -> bool {
        self.volumes_attached.iter().any(|v| v.device_path == device)
    }

    /// `device` can be handed to a new attachment in this pass
    pub fn device_free(&self, device: &str) -> bool {
        !self.device_in_use(device) && !self.held_devices.contains(device)
    }

    /// Keep the devices `volume_ref` occupies out of allocation until the
    /// next pass
    pub fn hold_devices_of(&mut self, volume_ref: &str) {
        let devices = self
            .volumes_attached
            .iter()
            .filter(|v| v.name == volume_ref)
            .map(|v| v.device_path.clone());
        self.held_devices.extend(devices);
    }

    /// Region to scope provider calls by
    pub fn region(&self) -> Result<&str, Error> {
        self.region.as_deref().ok_or_else(|| Error::MissingRegion {
            node: self.name.clone(),
        })
    }

    /// Raw provider ID
    pub fn provider_id(&self) -> Result<&str, Error> {
        self.provider_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::reference(&self.name, "node has no spec.providerID"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{attached, k8s_node};
    use std::collections::BTreeMap;

    #[test]
    fn captures_status_and_identity() {
        let node = k8s_node(
            "ip-10-0-0-1",
            &["kubernetes.io/aws-ebs/vol-a"],
            &[("kubernetes.io/aws-ebs/vol-b", "/dev/xvdba")],
        );
        let snapshot = NodeSnapshot::from_node(&node);

        assert_eq!(snapshot.name, "ip-10-0-0-1");
        assert_eq!(
            snapshot.provider_id.as_deref(),
            Some("aws:///us-east-1a/i-ip-10-0-0-1")
        );
        assert_eq!(snapshot.region().unwrap(), "us-east-1");
        assert!(snapshot.managed);
        assert!(snapshot.volume_in_use("kubernetes.io/aws-ebs/vol-a"));
        assert!(snapshot.volume_attached("kubernetes.io/aws-ebs/vol-b"));
        assert!(snapshot.device_in_use("/dev/xvdba"));
        assert!(!snapshot.device_in_use("/dev/xvdbb"));
    }

    #[test]
    fn annotation_must_be_exactly_true() {
        let mut node = k8s_node("n1", &[], &[]);
        node.metadata.annotations = Some(BTreeMap::from([(
            MANAGED_ATTACH_DETACH_ANNOTATION.to_string(),
            "True".to_string(),
        )]));
        assert!(!NodeSnapshot::from_node(&node).managed);

        node.metadata.annotations = None;
        assert!(!NodeSnapshot::from_node(&node).managed);
    }

    #[test]
    fn empty_node_has_empty_sets() {
        let snapshot = NodeSnapshot::from_node(&Node::default());
        assert!(snapshot.volumes_in_use.is_empty());
        assert!(snapshot.volumes_attached.is_empty());
        assert!(snapshot.held_devices.is_empty());
        assert!(matches!(snapshot.region(), Err(Error::MissingRegion { .. })));
        assert!(matches!(snapshot.provider_id(), Err(Error::Reference { .. })));
    }

    #[test]
    fn empty_provider_id_is_rejected() {
        let snapshot = NodeSnapshot {
            name: "n1".to_string(),
            provider_id: Some(String::new()),
            volumes_attached: vec![attached("kubernetes.io/aws-ebs/vol-a", "/dev/xvdba")],
            ..Default::default()
        };
        assert!(snapshot.provider_id().is_err());
    }

    #[test]
    fn held_devices_stay_unavailable_after_removal() {
        let mut snapshot = NodeSnapshot::from_node(&k8s_node(
            "n1",
            &[],
            &[
                ("kubernetes.io/aws-ebs/vol-a", "/dev/xvdba"),
                ("kubernetes.io/aws-ebs/vol-b", "/dev/xvdbb"),
            ],
        ));

        snapshot.hold_devices_of("kubernetes.io/aws-ebs/vol-a");
        snapshot.volumes_attached.remove(0);

        assert!(!snapshot.device_in_use("/dev/xvdba"));
        assert!(!snapshot.device_free("/dev/xvdba"));
        assert!(!snapshot.device_free("/dev/xvdbb"));
        assert!(snapshot.device_free("/dev/xvdbc"));
    }

    #[test]
    fn holding_an_unlisted_volume_holds_nothing() {
        let mut snapshot = NodeSnapshot::from_node(&k8s_node(
            "n1",
            &[],
            &[("kubernetes.io/aws-ebs/vol-a", "/dev/xvdba")],
        ));
        snapshot.hold_devices_of("kubernetes.io/aws-ebs/vol-z");
        assert!(snapshot.held_devices.is_empty());
    }
}
