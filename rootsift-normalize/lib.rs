mod grayscale;
mod root;

pub use grayscale::{to_grayscale, LUMA_WEIGHTS};
pub use root::{l1_norm, root_normalize, root_normalize_all};

use rootsift_core::{DegeneratePolicy, DescriptorExtractor, DescriptorSet, FloatImage, Keypoint, TaskResult};

/// Extract, normalize and validate the descriptors of one image.
///
/// An empty keypoint slice yields an empty set without calling the extractor.
pub fn describe(
    image: &FloatImage,
    keypoints: &[Keypoint],
    extractor: &dyn DescriptorExtractor,
    policy: DegeneratePolicy,
) -> TaskResult<DescriptorSet> {
    if keypoints.is_empty() {
        return Ok(DescriptorSet::empty());
    }

    let raw = extractor.extract(image, keypoints)?;
    tracing::debug!(
        extractor = extractor.name(),
        keypoints = keypoints.len(),
        descriptors = raw.len(),
        "extracted raw descriptors"
    );

    let normalized = root_normalize_all(&raw, policy)?;
    DescriptorSet::pair(keypoints, normalized)
}
