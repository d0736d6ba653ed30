//! Seams between the batch pipeline and its external collaborators.
//!
//! All collaborators are shared across worker threads, hence the `Send + Sync` bounds.

use std::path::Path;
use std::sync::Arc;

use crate::error::{ExtractorError, TaskResult};
use crate::{DescriptorSet, FloatImage, Keypoint, RawDescriptor, SourceImage};

/// Computes one raw descriptor per keypoint over a grayscale image.
///
/// Implementations must return descriptors in keypoint order. The pipeline never calls
/// `extract` with an empty keypoint slice.
pub trait DescriptorExtractor: Send + Sync {
    fn extract(&self, image: &FloatImage, keypoints: &[Keypoint]) -> Result<Vec<RawDescriptor>, ExtractorError>;

    /// Human-readable name used in log output
    fn name(&self) -> &str {
        "extractor"
    }
}

impl<T: DescriptorExtractor + ?Sized> DescriptorExtractor for Arc<T> {
    fn extract(&self, image: &FloatImage, keypoints: &[Keypoint]) -> Result<Vec<RawDescriptor>, ExtractorError> {
        (**self).extract(image, keypoints)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Decodes an image file into a tagged sample buffer
pub trait ImageSource: Send + Sync {
    fn load(&self, path: &Path) -> TaskResult<SourceImage>;
}

/// Reads the ordered keypoint sequence of one image
pub trait KeypointStore: Send + Sync {
    fn load(&self, path: &Path) -> TaskResult<Vec<Keypoint>>;
}

/// Persists a validated descriptor set
pub trait DescriptorWriter: Send + Sync {
    fn write(&self, path: &Path, set: &DescriptorSet) -> TaskResult<()>;
}
