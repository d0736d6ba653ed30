use std::path::Path;

use rootsift_core::{DESCRIPTOR_DIM, DescriptorSet, DescriptorWriter, TaskResult};

use crate::keypoints::matrix_task_error;
use crate::matrix::{Matrix, MatrixResult, write_matrix_atomic};

/// Writes descriptor sets as `(K x 128)` matrix artifacts, atomically
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixDescriptorWriter;

pub fn descriptor_matrix(set: &DescriptorSet) -> MatrixResult<Matrix> {
    Matrix::new(set.len(), DESCRIPTOR_DIM, set.to_row_major())
}

impl DescriptorWriter for MatrixDescriptorWriter {
    fn write(&self, path: &Path, set: &DescriptorSet) -> TaskResult<()> {
        descriptor_matrix(set)
            .and_then(|m| write_matrix_atomic(path, &m))
            .map_err(|e| matrix_task_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::read_matrix;
    use rootsift_core::{Keypoint, NormalizedDescriptor};

    #[test]
    fn test_written_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descriptors/img.png.bin");
        let kps = vec![Keypoint::new(0.0, 0.0, 1.0, 0.0); 2];
        let mut d = NormalizedDescriptor::ZERO;
        d.0[127] = 1.0;
        let set = DescriptorSet::pair(&kps, vec![NormalizedDescriptor::ZERO, d]).unwrap();

        MatrixDescriptorWriter.write(&path, &set).unwrap();

        let m = read_matrix(&path).unwrap();
        assert_eq!(m.shape(), (2, DESCRIPTOR_DIM));
        assert_eq!(m.row(1)[127], 1.0);
    }

    #[test]
    fn test_empty_set_is_zero_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        MatrixDescriptorWriter.write(&path, &DescriptorSet::empty()).unwrap();
        assert_eq!(read_matrix(&path).unwrap().shape(), (0, DESCRIPTOR_DIM));
    }
}
