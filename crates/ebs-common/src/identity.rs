//! Resolution of opaque node and volume references to provider-native IDs
//!
//! Node provider IDs (`aws:///us-east-1a/i-0abc`) and unique volume names
//! (`kubernetes.io/aws-ebs/aws://us-east-1a/vol-0abc`) are slash-delimited.
//! The default scheme takes the final path segment as the provider ID.
//! A reference that does not fit the scheme is rejected, never guessed at.

use crate::Error;

/// Maps an opaque reference to the provider's native ID
pub trait ReferenceResolver: Send + Sync {
    /// Resolve `reference` to a provider ID or fail with [`Error::Reference`]
    fn resolve(&self, reference: &str) -> Result<String, Error>;
}

/// Takes the last `/`-separated segment of a reference as the provider ID
#[derive(Debug, Clone, Copy, Default)]
pub struct LastSegmentResolver;

impl ReferenceResolver for LastSegmentResolver {
    fn resolve(&self, reference: &str) -> Result<String, Error> {
        let Some((_, id)) = reference.rsplit_once('/') else {
            return Err(Error::reference(reference, "no path separator"));
        };
        if id.is_empty() {
            return Err(Error::reference(reference, "empty final path segment"));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(Error::reference(reference, "final path segment contains whitespace"));
        }
        Ok(id.to_string())
    }
}
