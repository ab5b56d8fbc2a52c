//! Provider-authoritative volume state lookups

use std::sync::Arc;

use tracing::debug;

use ebs_common::Error;

use crate::api::{CloudApi, VolumeProviderState};

/// Reads a volume's lifecycle and attachment straight from the provider
///
/// Callers use this immediately before every mutation; the node's cached
/// `volumesAttached` is never consulted for correctness.
#[derive(Clone)]
pub struct VolumeProber {
    api: Arc<dyn CloudApi>,
}

impl VolumeProber {
    /// Create a prober over the given cloud API
    pub fn new(api: Arc<dyn CloudApi>) -> Self {
        Self { api }
    }

    /// Describe one volume
    ///
    /// Fails with [`Error::VolumeNotFound`] when the provider does not know
    /// the volume, and with the provider's own error when the call fails.
    pub async fn describe(
        &self,
        region: &str,
        volume_id: &str,
    ) -> Result<VolumeProviderState, Error> {
        match self.api.describe_volume(region, volume_id).await? {
            Some(state) => {
                debug!(
                    volume_id = %volume_id,
                    lifecycle = ?state.lifecycle,
                    attached_to = ?state.attachment.as_ref().map(|a| a.instance_id.as_str()),
                    "probed volume"
                );
                Ok(state)
            }
            None => Err(Error::VolumeNotFound {
                volume_id: volume_id.to_string(),
            }),
        }
    }

    /// The cloud API this prober reads from
    pub fn api(&self) -> &Arc<dyn CloudApi> {
        &self.api
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockCloudApi, VolumeLifecycle};
    use mockall::predicate::eq;

    #[tokio::test]
    async fn returns_provider_state() {
        let mut mock = MockCloudApi::new();
        mock.expect_describe_volume()
            .with(eq("us-east-1"), eq("vol-a"))
            .times(1)
            .returning(|_, id| {
                Ok(Some(VolumeProviderState {
                    volume_id: id.to_string(),
                    lifecycle: VolumeLifecycle::Available,
                    attachment: None,
                }))
            });

        let prober = VolumeProber::new(Arc::new(mock));
        let state = prober.describe("us-east-1", "vol-a").await.unwrap();
        assert!(state.is_available());
    }

    #[tokio::test]
    async fn missing_volume_is_distinct_from_call_failure() {
        let mut mock = MockCloudApi::new();
        mock.expect_describe_volume()
            .with(eq("us-east-1"), eq("vol-gone"))
            .returning(|_, _| Ok(None));
        mock.expect_describe_volume()
            .with(eq("us-east-1"), eq("vol-flaky"))
            .returning(|_, _| Err(Error::cloud("describe-volumes", "throttled")));

        let prober = VolumeProber::new(Arc::new(mock));

        let err = prober.describe("us-east-1", "vol-gone").await.unwrap_err();
        assert!(matches!(err, Error::VolumeNotFound { ref volume_id } if volume_id == "vol-gone"));

        let err = prober.describe("us-east-1", "vol-flaky").await.unwrap_err();
        assert!(matches!(err, Error::Cloud { .. }));
    }
}
