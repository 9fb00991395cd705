//! The estimator capability and the image handle passed to it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geofuse_core::{GeoCandidate, Source};
use sha2::{Digest, Sha256};

use crate::error::EstimatorError;

/// Shared, immutable image bytes plus a fingerprint for logs.
#[derive(Clone)]
pub struct ImageRef {
    bytes: Arc<[u8]>,
    filename: Option<String>,
    sha256: String,
}

impl ImageRef {
    pub fn new(bytes: impl Into<Arc<[u8]>>, filename: Option<String>) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        let sha256 = hex::encode(Sha256::digest(&bytes));
        Self {
            bytes,
            filename,
            sha256,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// First 12 hex digits, enough to tell requests apart in logs.
    pub fn short_id(&self) -> &str {
        &self.sha256[..12]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .field("sha256", &self.sha256)
            .finish()
    }
}

/// One opaque source of candidate locations.
///
/// Implementations must be safe to call concurrently and must tolerate
/// their future being dropped mid-flight.
#[async_trait]
pub trait Estimator: Send + Sync {
    /// Which signal this estimator produces.
    fn source(&self) -> Source;

    /// Name used in logs and manifests.
    fn name(&self) -> &str {
        self.source().as_str()
    }

    /// Declared maximum latency, if the estimator knows it.
    fn latency_hint(&self) -> Option<Duration> {
        None
    }

    async fn estimate(
        &self,
        image: &ImageRef,
        context: Option<&str>,
    ) -> Result<Vec<GeoCandidate>, EstimatorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_fingerprint() {
        let image = ImageRef::new(b"abc".to_vec(), Some("a.jpg".into()));
        assert_eq!(
            image.sha256(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(image.short_id(), "ba7816bf8f01");
        assert_eq!(image.len(), 3);
        assert_eq!(image.filename(), Some("a.jpg"));
    }

    #[test]
    fn test_debug_omits_bytes() {
        let image = ImageRef::new(vec![0u8; 4096], None);
        let debug = format!("{:?}", image);
        assert!(debug.contains("len: 4096"));
        assert!(debug.len() < 200);
    }
}
