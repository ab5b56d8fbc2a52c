//! Error types for the EBS reconciler
//!
//! Errors are scoped to a single node or volume. Each variant carries the
//! identifiers an operator needs to find the stuck object (node name, volume
//! reference, provider operation) so the logged narrative is enough to audit
//! why a volume did not converge.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Error code EC2 returns for a volume ID that does not exist
pub const VOLUME_NOT_FOUND_CODE: &str = "InvalidVolume.NotFound";

/// Error code EC2 returns for an instance ID that does not exist
pub const INSTANCE_NOT_FOUND_CODE: &str = "InvalidInstanceID.NotFound";

/// Main error type for reconciler operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A node or volume reference does not follow the identity convention
    #[error("cannot resolve reference '{reference}': {message}")]
    Reference {
        /// The raw reference string
        reference: String,
        /// Why it could not be resolved
        message: String,
    },

    /// The node carries no region label, so no provider call can be scoped
    #[error("node {node} has no region label")]
    MissingRegion {
        /// Name of the node
        node: String,
    },

    /// Cloud provider API call failed
    #[error("cloud error during {operation}{}: {message}", .code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Cloud {
        /// Provider operation that failed (describe-volumes, attach-volume, ...)
        operation: String,
        /// Provider error code when the API returned one
        code: Option<String>,
        /// Description of what failed
        message: String,
    },

    /// The provider reports that the volume does not exist
    #[error("volume {volume_id} not found at provider")]
    VolumeNotFound {
        /// Provider-native volume ID
        volume_id: String,
    },

    /// Every device slot on the node is occupied
    #[error("no free device slots on node {node} ({slots} slots in use)")]
    NoFreeDeviceSlots {
        /// Name of the node
        node: String,
        /// Number of slots in the enumerable space
        slots: usize,
    },

    /// A provider operation did not finish within its deadline
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// The deadline that expired
        after: Duration,
    },

    /// Writing the attachment set back to node status failed
    #[error("status sync failed for node {node}: {message}")]
    StatusSync {
        /// Name of the node
        node: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a reference resolution error
    pub fn reference(reference: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Reference {
            reference: reference.into(),
            message: msg.into(),
        }
    }

    /// Create a cloud error without a provider error code
    pub fn cloud(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            operation: operation.into(),
            code: None,
            message: msg.into(),
        }
    }

    /// Create a cloud error carrying the provider's error code
    pub fn cloud_with_code(
        operation: impl Into<String>,
        code: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Cloud {
            operation: operation.into(),
            code: Some(code.into()),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a status sync error
    pub fn status_sync(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::StatusSync {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Provider error code, if the provider returned one
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Cloud { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Check if this error will clear up on its own in a later pass
    ///
    /// Reference, region and allocation errors recur identically until
    /// someone fixes the node or frees a slot. Provider, timeout and status
    /// errors are expected to clear once the next pass re-reads provider
    /// state.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::Reference { .. } => false,
            Error::MissingRegion { .. } => false,
            Error::Cloud { .. } => true,
            Error::VolumeNotFound { .. } => false,
            Error::NoFreeDeviceSlots { .. } => false,
            Error::Timeout { .. } => true,
            Error::StatusSync { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Short, stable label for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "kube",
            Error::Reference { .. } => "reference",
            Error::MissingRegion { .. } => "missing_region",
            Error::Cloud { .. } => "cloud",
            Error::VolumeNotFound { .. } => "volume_not_found",
            Error::NoFreeDeviceSlots { .. } => "no_free_device_slots",
            Error::Timeout { .. } => "timeout",
            Error::StatusSync { .. } => "status_sync",
            Error::Serialization { .. } => "serialization",
            Error::Internal { .. } => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
