use std::path::Path;

use rootsift_core::{AffineShape, Keypoint, KeypointStore, TaskError, TaskResult};

use crate::matrix::{Matrix, MatrixError, MatrixResult, read_matrix};

/// `[x, y, scale, orientation]`
pub const SIMILARITY_COLS: usize = 4;
/// `[x, y, a11, a12, a21, a22]`
pub const AFFINE_COLS: usize = 6;

/// Parse a keypoint matrix. A `0x0` matrix is an empty keypoint set.
pub fn keypoints_from_matrix(matrix: &Matrix) -> Result<Vec<Keypoint>, String> {
    if matrix.rows() == 0 {
        return Ok(Vec::new());
    }
    match matrix.cols() {
        SIMILARITY_COLS => Ok(matrix
            .iter_rows()
            .map(|r| Keypoint::new(r[0], r[1], r[2], r[3]))
            .collect()),
        AFFINE_COLS => Ok(matrix
            .iter_rows()
            .map(|r| {
                let shape = AffineShape { a11: r[2], a12: r[3], a21: r[4], a22: r[5] };
                Keypoint::from_affine(r[0], r[1], shape)
            })
            .collect()),
        cols => Err(format!(
            "keypoint matrix has {} columns, expected {} or {}",
            cols, SIMILARITY_COLS, AFFINE_COLS
        )),
    }
}

/// Encode keypoints; affine columns are used as soon as one keypoint carries a shape
pub fn keypoints_to_matrix(keypoints: &[Keypoint]) -> MatrixResult<Matrix> {
    let affine = keypoints.iter().any(|kp| kp.shape.is_some());
    let cols = if affine { AFFINE_COLS } else { SIMILARITY_COLS };
    let mut data = Vec::with_capacity(keypoints.len() * cols);
    for kp in keypoints {
        if affine {
            let s = kp.shape.unwrap_or_else(|| similarity_shape(kp));
            data.extend_from_slice(&[kp.x, kp.y, s.a11, s.a12, s.a21, s.a22]);
        } else {
            data.extend_from_slice(&[kp.x, kp.y, kp.scale, kp.orientation]);
        }
    }
    Matrix::new(keypoints.len(), cols, data)
}

fn similarity_shape(kp: &Keypoint) -> AffineShape {
    let (sin, cos) = kp.orientation.sin_cos();
    AffineShape {
        a11: kp.scale * cos,
        a12: -kp.scale * sin,
        a21: kp.scale * sin,
        a22: kp.scale * cos,
    }
}

pub(crate) fn matrix_task_error(path: &Path, err: MatrixError) -> TaskError {
    match err {
        MatrixError::Io(source) => TaskError::io(path, source),
        other => TaskError::malformed(path, other.to_string()),
    }
}

/// Keypoint store backed by matrix artifacts on disk
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixKeypointStore;

impl KeypointStore for MatrixKeypointStore {
    fn load(&self, path: &Path) -> TaskResult<Vec<Keypoint>> {
        let matrix = read_matrix(path).map_err(|e| matrix_task_error(path, e))?;
        keypoints_from_matrix(&matrix).map_err(|reason| TaskError::malformed(path, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::write_matrix_atomic;

    #[test]
    fn test_similarity_rows() {
        let m = Matrix::new(2, 4, vec![1.0, 2.0, 3.0, 0.5, 4.0, 5.0, 6.0, -0.5]).unwrap();
        let kps = keypoints_from_matrix(&m).unwrap();
        assert_eq!(kps, vec![Keypoint::new(1.0, 2.0, 3.0, 0.5), Keypoint::new(4.0, 5.0, 6.0, -0.5)]);
        assert_eq!(keypoints_to_matrix(&kps).unwrap(), m);
    }

    #[test]
    fn test_affine_rows() {
        let m = Matrix::new(1, 6, vec![10.0, 20.0, 2.0, 0.0, 0.0, 2.0]).unwrap();
        let kps = keypoints_from_matrix(&m).unwrap();
        assert_eq!(kps.len(), 1);
        assert_eq!(kps[0].scale, 2.0);
        assert_eq!(kps[0].orientation, 0.0);
        assert_eq!(keypoints_to_matrix(&kps).unwrap(), m);
    }

    #[test]
    fn test_mixed_keypoints_promote_to_affine() {
        let shape = AffineShape { a11: 1.0, a12: 0.0, a21: 0.0, a22: 1.0 };
        let kps = vec![Keypoint::new(0.0, 0.0, 2.0, 0.0), Keypoint::from_affine(1.0, 1.0, shape)];
        let m = keypoints_to_matrix(&kps).unwrap();
        assert_eq!(m.shape(), (2, AFFINE_COLS));
        assert_eq!(m.row(0), &[0.0, 0.0, 2.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_empty_matrix_any_width() {
        for cols in [0, 4, 6] {
            let m = Matrix::new(0, cols, Vec::new()).unwrap();
            assert!(keypoints_from_matrix(&m).unwrap().is_empty());
        }
    }

    #[test]
    fn test_bad_column_count() {
        let m = Matrix::new(1, 5, vec![0.0; 5]).unwrap();
        assert!(keypoints_from_matrix(&m).is_err());
    }

    #[test]
    fn test_store_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        assert!(matches!(MatrixKeypointStore.load(&missing), Err(TaskError::Io { .. })));

        let bad = dir.path().join("bad.bin");
        write_matrix_atomic(&bad, &Matrix::new(1, 3, vec![0.0; 3]).unwrap()).unwrap();
        assert!(matches!(MatrixKeypointStore.load(&bad), Err(TaskError::Malformed { .. })));
    }
}
