//! [`CloudApi`] on top of the AWS EC2 SDK
//!
//! Nodes in one cluster can live in several regions, so one SDK client is
//! built lazily per region and cached. Credentials come from the default
//! provider chain (environment, profile, IRSA, instance metadata).

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_ec2::types as ec2;
use dashmap::DashMap;
use tracing::debug;

use ebs_common::error::{INSTANCE_NOT_FOUND_CODE, VOLUME_NOT_FOUND_CODE};
use ebs_common::Error;

use crate::api::{
    CloudApi, InstancePresence, VolumeAttachment, VolumeLifecycle, VolumeProviderState,
};

/// EC2-backed cloud API with a per-region client cache
#[derive(Default)]
pub struct Ec2CloudApi {
    clients: DashMap<String, aws_sdk_ec2::Client>,
}

impl Ec2CloudApi {
    /// Create an API with an empty client cache
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, region: &str) -> aws_sdk_ec2::Client {
        if let Some(client) = self.clients.get(region) {
            return client.clone();
        }

        debug!(region = %region, "building EC2 client");
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_ec2::Client::new(&config);
        self.clients.insert(region.to_string(), client.clone());
        client
    }
}

#[async_trait]
impl CloudApi for Ec2CloudApi {
    async fn describe_volume(
        &self,
        region: &str,
        volume_id: &str,
    ) -> Result<Option<VolumeProviderState>, Error> {
        let client = self.client(region).await;
        let output = match client.describe_volumes().volume_ids(volume_id).send().await {
            Ok(output) => output,
            Err(err) if err.code() == Some(VOLUME_NOT_FOUND_CODE) => return Ok(None),
            Err(err) => return Err(cloud_error("describe-volumes", err)),
        };

        Ok(output
            .volumes()
            .iter()
            .find(|v| v.volume_id() == Some(volume_id))
            .map(volume_state))
    }

    async fn attach_volume(
        &self,
        region: &str,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), Error> {
        let client = self.client(region).await;
        client
            .attach_volume()
            .volume_id(volume_id)
            .instance_id(instance_id)
            .device(device)
            .send()
            .await
            .map_err(|err| cloud_error("attach-volume", err))?;
        Ok(())
    }

    async fn detach_volume(
        &self,
        region: &str,
        volume_id: &str,
        instance_id: &str,
    ) -> Result<(), Error> {
        let client = self.client(region).await;
        client
            .detach_volume()
            .volume_id(volume_id)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(|err| cloud_error("detach-volume", err))?;
        Ok(())
    }

    async fn describe_instance_status(
        &self,
        region: &str,
        instance_id: &str,
    ) -> Result<InstancePresence, Error> {
        let client = self.client(region).await;
        let output = match client
            .describe_instance_status()
            .instance_ids(instance_id)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if err.code() == Some(INSTANCE_NOT_FOUND_CODE) => {
                return Ok(InstancePresence::NotFound)
            }
            Err(err) => return Err(cloud_error("describe-instance-status", err)),
        };

        Ok(instance_presence(output.instance_statuses()))
    }
}

/// Convert an SDK volume into provider state
///
/// An attachment is only reported when there is exactly one and it names
/// both an instance and a device.
fn volume_state(volume: &ec2::Volume) -> VolumeProviderState {
    let lifecycle = volume
        .state()
        .map(|s| VolumeLifecycle::from_state(s.as_str()))
        .unwrap_or_else(|| VolumeLifecycle::Other("unknown".to_string()));

    let attachment = match volume.attachments() {
        [only] => match (only.instance_id(), only.device()) {
            (Some(instance_id), Some(device)) => Some(VolumeAttachment {
                instance_id: instance_id.to_string(),
                device: device.to_string(),
            }),
            _ => None,
        },
        _ => None,
    };

    VolumeProviderState {
        volume_id: volume.volume_id().unwrap_or_default().to_string(),
        lifecycle,
        attachment,
    }
}

fn instance_presence(statuses: &[ec2::InstanceStatus]) -> InstancePresence {
    match statuses.first() {
        None => InstancePresence::NoStatus,
        Some(status) => InstancePresence::Reported(
            status
                .instance_state()
                .and_then(|s| s.name())
                .map(|n| n.as_str().to_string())
                .unwrap_or_default(),
        ),
    }
}

fn cloud_error<E>(operation: &str, err: E) -> Error
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let message = DisplayErrorContext(&err).to_string();
    match err.code() {
        Some(code) => Error::cloud_with_code(operation, code, message),
        None => Error::cloud(operation, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(instance: &str, device: &str) -> ec2::VolumeAttachment {
        ec2::VolumeAttachment::builder()
            .instance_id(instance)
            .device(device)
            .build()
    }

    #[test]
    fn in_use_volume_with_single_attachment() {
        let volume = ec2::Volume::builder()
            .volume_id("vol-a")
            .state(ec2::VolumeState::InUse)
            .attachments(attachment("i-1", "/dev/xvdba"))
            .build();

        let state = volume_state(&volume);
        assert_eq!(state.volume_id, "vol-a");
        assert_eq!(state.lifecycle, VolumeLifecycle::InUse);
        assert_eq!(state.device_on("i-1"), Some("/dev/xvdba"));
    }

    #[test]
    fn available_volume_has_no_attachment() {
        let volume = ec2::Volume::builder()
            .volume_id("vol-a")
            .state(ec2::VolumeState::Available)
            .build();

        let state = volume_state(&volume);
        assert!(state.is_available());
        assert!(state.attachment.is_none());
    }

    #[test]
    fn multiple_attachments_are_not_trusted() {
        let volume = ec2::Volume::builder()
            .volume_id("vol-a")
            .state(ec2::VolumeState::InUse)
            .attachments(attachment("i-1", "/dev/xvdba"))
            .attachments(attachment("i-2", "/dev/xvdbb"))
            .build();

        assert!(volume_state(&volume).attachment.is_none());
    }

    #[test]
    fn attachment_without_device_is_ignored() {
        let volume = ec2::Volume::builder()
            .volume_id("vol-a")
            .state(ec2::VolumeState::InUse)
            .attachments(ec2::VolumeAttachment::builder().instance_id("i-1").build())
            .build();

        assert!(volume_state(&volume).attachment.is_none());
    }

    #[test]
    fn missing_state_is_other() {
        let volume = ec2::Volume::builder().volume_id("vol-a").build();
        assert_eq!(
            volume_state(&volume).lifecycle,
            VolumeLifecycle::Other("unknown".to_string())
        );
    }

    #[test]
    fn empty_instance_status_means_no_status() {
        assert_eq!(instance_presence(&[]), InstancePresence::NoStatus);
    }

    #[test]
    fn instance_status_reports_state_name() {
        let status = ec2::InstanceStatus::builder()
            .instance_id("i-1")
            .instance_state(
                ec2::InstanceState::builder()
                    .name(ec2::InstanceStateName::Running)
                    .build(),
            )
            .build();
        assert_eq!(
            instance_presence(&[status]),
            InstancePresence::Reported("running".to_string())
        );
    }
}
