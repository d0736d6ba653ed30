//! On-disk collaborators of the descriptor pipeline: matrix artifacts, keypoint
//! loading, image decoding, descriptor output and dataset layout.

mod dataset;
mod image_source;
mod keypoints;
mod matrix;
mod writer;

pub use dataset::{DatasetLayout, VerifyIssue, verify_dataset, verify_task};
pub use image_source::{FsImageSource, source_image_from_dynamic};
pub use keypoints::{
    AFFINE_COLS, MatrixKeypointStore, SIMILARITY_COLS, keypoints_from_matrix, keypoints_to_matrix,
};
pub use matrix::{
    Matrix, MatrixError, MatrixResult, decode_matrix, encode_matrix, read_matrix, write_matrix_atomic,
};
pub use writer::{MatrixDescriptorWriter, descriptor_matrix};
