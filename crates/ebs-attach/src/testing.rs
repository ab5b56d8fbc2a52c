//! Shared fixtures for unit tests

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{AttachedVolume, Node, NodeSpec, NodeStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use ebs_cloud::{VolumeAttachment, VolumeLifecycle, VolumeProviderState};
use ebs_common::{MANAGED_ATTACH_DETACH_ANNOTATION, REGION_LABEL};

pub use ebs_cloud::MockCloudApi;
pub use ebs_common::MockNodeClient;

use crate::node::NodeSnapshot;

pub const REGION: &str = "us-east-1";

/// Unique volume name for a provider volume ID
pub fn ebs(volume_id: &str) -> String {
    format!("kubernetes.io/aws-ebs/aws://us-east-1a/{volume_id}")
}

/// Instance ID the fixtures derive from a node name
pub fn instance_of(node: &str) -> String {
    format!("i-{node}")
}

pub fn attached(name: &str, device: &str) -> AttachedVolume {
    AttachedVolume {
        name: name.to_string(),
        device_path: device.to_string(),
    }
}

/// Managed node snapshot in [`REGION`]
pub fn snapshot(name: &str, in_use: &[&str], attached_volumes: &[(&str, &str)]) -> NodeSnapshot {
    NodeSnapshot::from_node(&k8s_node(name, in_use, attached_volumes))
}

/// Managed Kubernetes node in [`REGION`]
pub fn k8s_node(name: &str, in_use: &[&str], attached_volumes: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                REGION_LABEL.to_string(),
                REGION.to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                MANAGED_ATTACH_DETACH_ANNOTATION.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: Some(format!("aws:///us-east-1a/{}", instance_of(name))),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            volumes_in_use: Some(in_use.iter().map(|v| v.to_string()).collect()),
            volumes_attached: Some(
                attached_volumes
                    .iter()
                    .map(|(name, device)| attached(name, device))
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}

pub fn available(volume_id: &str) -> VolumeProviderState {
    VolumeProviderState {
        volume_id: volume_id.to_string(),
        lifecycle: VolumeLifecycle::Available,
        attachment: None,
    }
}

pub fn in_use_by(volume_id: &str, instance_id: &str, device: &str) -> VolumeProviderState {
    VolumeProviderState {
        volume_id: volume_id.to_string(),
        lifecycle: VolumeLifecycle::InUse,
        attachment: Some(VolumeAttachment {
            instance_id: instance_id.to_string(),
            device: device.to_string(),
        }),
    }
}
