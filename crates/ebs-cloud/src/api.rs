//! Provider-agnostic view of the cloud volume and instance API

use async_trait::async_trait;
use ebs_common::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Lifecycle state of a volume as the provider reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeLifecycle {
    /// Not attached to anything
    Available,
    /// Attached (or attaching/detaching) to an instance
    InUse,
    /// Any other state (creating, deleting, error, ...)
    Other(String),
}

impl VolumeLifecycle {
    /// Parse the provider's state string
    pub fn from_state(state: &str) -> Self {
        match state {
            "available" => Self::Available,
            "in-use" => Self::InUse,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The instance and device a volume is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeAttachment {
    /// Provider instance ID
    pub instance_id: String,
    /// Device path the volume is exposed at
    pub device: String,
}

/// Authoritative provider state for one volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeProviderState {
    /// Provider volume ID
    pub volume_id: String,
    /// Lifecycle state
    pub lifecycle: VolumeLifecycle,
    /// The single attachment, when the provider reports exactly one
    /// with both an instance and a device
    pub attachment: Option<VolumeAttachment>,
}

impl VolumeProviderState {
    /// The volume is unattached
    pub fn is_available(&self) -> bool {
        self.lifecycle == VolumeLifecycle::Available
    }

    /// Device path when the volume is attached to `instance_id`
    pub fn device_on(&self, instance_id: &str) -> Option<&str> {
        self.attachment
            .as_ref()
            .filter(|a| a.instance_id == instance_id)
            .map(|a| a.device.as_str())
    }

    /// Instance the volume is attached to, when it is not `instance_id`
    pub fn attached_elsewhere(&self, instance_id: &str) -> Option<&str> {
        self.attachment
            .as_ref()
            .filter(|a| a.instance_id != instance_id)
            .map(|a| a.instance_id.as_str())
    }
}

/// What the provider knows about an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstancePresence {
    /// The provider reported a status, carrying the instance state name
    Reported(String),
    /// The call succeeded but no status was reported for the instance
    NoStatus,
    /// The provider does not know the instance ID
    NotFound,
}

/// Trait abstracting the cloud volume-and-instance API
///
/// Every call is scoped by region. Implementations surface transport and
/// API failures as [`Error::Cloud`]; "does not exist" answers are values,
/// not errors.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Describe a single volume, `None` when the provider does not know it
    async fn describe_volume(
        &self,
        region: &str,
        volume_id: &str,
    ) -> Result<Option<VolumeProviderState>, Error>;

    /// Attach a volume to an instance at `device`
    async fn attach_volume(
        &self,
        region: &str,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), Error>;

    /// Detach a volume from an instance
    async fn detach_volume(
        &self,
        region: &str,
        volume_id: &str,
        instance_id: &str,
    ) -> Result<(), Error>;

    /// Describe an instance's status
    async fn describe_instance_status(
        &self,
        region: &str,
        instance_id: &str,
    ) -> Result<InstancePresence, Error>;
}
