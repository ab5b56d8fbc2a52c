//! Single-volume attach and detach against the provider
//!
//! Both operations read provider state first and turn into no-ops when the
//! provider already holds the desired end state. The node's cached status is
//! only used to pick a free device, never to decide whether to mutate.
//!
//! Probe and mutation share one deadline. Expiry is reported as
//! [`Error::Timeout`] and the operation is retried on the next pass; there is
//! no retry inside the driver.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use ebs_cloud::VolumeProber;
use ebs_common::{Error, ReferenceResolver};

use crate::device;
use crate::node::NodeSnapshot;

/// Result of a successful attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// An attach call was issued for a newly allocated device
    Attached {
        /// Device the volume was attached at
        device: String,
    },
    /// The provider already had the volume on this instance
    AlreadyAttached {
        /// Device the provider reports
        device: String,
    },
}

impl AttachOutcome {
    /// Device path the volume is (or is becoming) available at
    pub fn device(&self) -> &str {
        match self {
            AttachOutcome::Attached { device } | AttachOutcome::AlreadyAttached { device } => {
                device
            }
        }
    }
}

/// Result of a successful detach
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachOutcome {
    /// A detach call was issued
    Detached,
    /// The volume is not attached to anything
    AlreadyAvailable,
    /// The volume is attached to another instance; nothing to undo here
    AttachedElsewhere {
        /// Instance that holds the volume
        instance_id: String,
    },
    /// The provider does not know the volume
    NotFound,
}

impl DetachOutcome {
    /// A provider mutation was issued
    pub fn mutated(&self) -> bool {
        matches!(self, DetachOutcome::Detached)
    }
}

/// Provider-side coordinates of one volume operation
struct Target<'a> {
    region: &'a str,
    volume_id: String,
    instance_id: String,
}

/// Orchestrates attach/detach calls for a single volume on a single node
#[derive(Clone)]
pub struct AttachmentDriver {
    prober: VolumeProber,
    resolver: Arc<dyn ReferenceResolver>,
    timeout: Duration,
}

impl AttachmentDriver {
    /// Create a driver
    pub fn new(
        prober: VolumeProber,
        resolver: Arc<dyn ReferenceResolver>,
        timeout: Duration,
    ) -> Self {
        Self {
            prober,
            resolver,
            timeout,
        }
    }

    /// Ensure `volume_ref` is attached to `node`'s instance
    ///
    /// Returns the device path. When the provider already reports the volume
    /// on this instance its device is returned and no attach call is made.
    pub async fn attach(
        &self,
        volume_ref: &str,
        node: &NodeSnapshot,
    ) -> Result<AttachOutcome, Error> {
        let target = self.target(volume_ref, node)?;
        self.with_deadline("attach", self.attach_target(volume_ref, &target, node))
            .await
    }

    /// Ensure `volume_ref` is not attached to `node`'s instance
    pub async fn detach(
        &self,
        volume_ref: &str,
        node: &NodeSnapshot,
    ) -> Result<DetachOutcome, Error> {
        let target = self.target(volume_ref, node)?;
        self.with_deadline("detach", self.detach_target(volume_ref, &target))
            .await
    }

    async fn attach_target(
        &self,
        volume_ref: &str,
        target: &Target<'_>,
        node: &NodeSnapshot,
    ) -> Result<AttachOutcome, Error> {
        let state = self
            .prober
            .describe(target.region, &target.volume_id)
            .await?;

        if let Some(device) = state.device_on(&target.instance_id) {
            info!(
                volume = %volume_ref,
                node = %node.name,
                device = %device,
                "volume is already attached"
            );
            return Ok(AttachOutcome::AlreadyAttached {
                device: device.to_string(),
            });
        }

        let device = device::allocate(node)?;
        debug!(
            volume = %volume_ref,
            node = %node.name,
            instance_id = %target.instance_id,
            device = %device,
            "issuing attach"
        );
        self.prober
            .api()
            .attach_volume(target.region, &target.volume_id, &target.instance_id, &device)
            .await?;

        Ok(AttachOutcome::Attached { device })
    }

    async fn detach_target(
        &self,
        volume_ref: &str,
        target: &Target<'_>,
    ) -> Result<DetachOutcome, Error> {
        let state = match self.prober.describe(target.region, &target.volume_id).await {
            Ok(state) => state,
            Err(Error::VolumeNotFound { .. }) => {
                info!(volume = %volume_ref, "volume no longer exists, nothing to detach");
                return Ok(DetachOutcome::NotFound);
            }
            Err(e) => return Err(e),
        };

        if state.is_available() {
            info!(volume = %volume_ref, "volume is already detached");
            return Ok(DetachOutcome::AlreadyAvailable);
        }

        if let Some(other) = state.attached_elsewhere(&target.instance_id) {
            info!(
                volume = %volume_ref,
                instance_id = %other,
                "volume is attached to another instance"
            );
            return Ok(DetachOutcome::AttachedElsewhere {
                instance_id: other.to_string(),
            });
        }

        debug!(volume = %volume_ref, instance_id = %target.instance_id, "issuing detach");
        self.prober
            .api()
            .detach_volume(target.region, &target.volume_id, &target.instance_id)
            .await?;

        Ok(DetachOutcome::Detached)
    }

    fn target<'a>(&self, volume_ref: &str, node: &'a NodeSnapshot) -> Result<Target<'a>, Error> {
        Ok(Target {
            region: node.region()?,
            volume_id: self.resolver.resolve(volume_ref)?,
            instance_id: self.resolver.resolve(node.provider_id()?)?,
        })
    }

    async fn with_deadline<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::timeout(operation, self.timeout))?
    }
}
