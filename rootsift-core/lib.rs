//! Shared types for rootSIFT descriptor batches.

mod buffer;
mod config;
mod error;
mod task;
mod traits;

pub use buffer::{FloatImage, LayoutError, Samples, SourceImage};
pub use config::{BatchConfig, DegeneratePolicy};
pub use error::{ConfigError, ExtractorError, TaskError, TaskResult};
pub use task::ImageTask;
pub use traits::{DescriptorExtractor, DescriptorWriter, ImageSource, KeypointStore};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Descriptor dimension shared by every stage of the pipeline
pub const DESCRIPTOR_DIM: usize = 128;

/// Descriptor vector as returned by the extractor, not normalized
pub type RawDescriptor = [f32; DESCRIPTOR_DIM];

/// Descriptor after the rootSIFT transform; every entry lies in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedDescriptor(pub [f32; DESCRIPTOR_DIM]);

impl NormalizedDescriptor {
    pub const ZERO: Self = Self([0.0; DESCRIPTOR_DIM]);

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Affine shape of an elliptical keypoint, column-major `[[a11, a12], [a21, a22]]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineShape {
    pub a11: f32,
    pub a12: f32,
    pub a21: f32,
    pub a22: f32,
}

/// Keypoint geometry ≙ position + scale + orientation (radians), optionally affine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub orientation: f32,
    pub shape: Option<AffineShape>,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, scale: f32, orientation: f32) -> Self {
        Self { x, y, scale, orientation, shape: None }
    }

    /// Build a keypoint from its affine frame. Scale is the mean column norm of the
    /// shape matrix and orientation the angle of its first column.
    pub fn from_affine(x: f32, y: f32, shape: AffineShape) -> Self {
        let scale_x = (shape.a11 * shape.a11 + shape.a21 * shape.a21).sqrt();
        let scale_y = (shape.a12 * shape.a12 + shape.a22 * shape.a22).sqrt();
        Self {
            x,
            y,
            scale: 0.5 * (scale_x + scale_y),
            orientation: shape.a21.atan2(shape.a11),
            shape: Some(shape),
        }
    }
}

/// Normalized descriptors paired 1:1 with the keypoints of one image.
///
/// The only way to obtain a non-empty set is [`DescriptorSet::pair`], which rejects
/// any count mismatch, so a set that reaches the writer is always aligned with its
/// keypoints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DescriptorSet {
    descriptors: Vec<NormalizedDescriptor>,
}

impl DescriptorSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn pair(keypoints: &[Keypoint], descriptors: Vec<NormalizedDescriptor>) -> TaskResult<Self> {
        if keypoints.len() != descriptors.len() {
            return Err(TaskError::CountMismatch {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(Self { descriptors })
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptors(&self) -> &[NormalizedDescriptor] {
        &self.descriptors
    }

    /// Row-major `(len x DESCRIPTOR_DIM)` copy of the set
    pub fn to_row_major(&self) -> Vec<f32> {
        self.descriptors.iter().flat_map(|d| d.0).collect()
    }
}

/// Cooperative cancellation flag shared between a batch and its caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Build a dedicated Rayon pool; `0` threads means one per logical CPU
pub fn build_worker_pool(n_threads: usize) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    let n_threads = if n_threads == 0 { num_cpus::get().max(1) } else { n_threads };
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("rootsift-worker-{i}"))
        .build()
}
