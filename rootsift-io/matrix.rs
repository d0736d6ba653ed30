//! Binary matrix artifacts.
//!
//! Layout, little-endian: `i32 rows`, `i32 cols`, then `rows * cols` `f32` values in
//! row-major order. Keypoint and descriptor files share this layout.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use thiserror::Error;

const HEADER_LEN: usize = 8;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("matrix i/o")]
    Io(#[from] io::Error),

    #[error("invalid matrix shape {rows}x{cols}")]
    InvalidShape { rows: i64, cols: i64 },

    #[error("matrix payload truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("matrix has {extra} trailing bytes after the payload")]
    TrailingData { extra: usize },

    #[error("data length {len} does not fit a {rows}x{cols} matrix")]
    LengthMismatch { rows: usize, cols: usize, len: usize },
}

pub type MatrixResult<T> = Result<T, MatrixError>;

/// Row-major `f32` matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> MatrixResult<Self> {
        if rows > i32::MAX as usize || cols > i32::MAX as usize {
            return Err(MatrixError::InvalidShape { rows: rows as i64, cols: cols as i64 });
        }
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(MatrixError::LengthMismatch { rows, cols, len: data.len() });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (0..self.rows).map(move |i| self.row(i))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

pub fn encode_matrix<W: Write>(writer: &mut W, matrix: &Matrix) -> io::Result<()> {
    writer.write_all(&(matrix.rows as i32).to_le_bytes())?;
    writer.write_all(&(matrix.cols as i32).to_le_bytes())?;
    for v in &matrix.data {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

pub fn decode_matrix<R: Read>(reader: &mut R) -> MatrixResult<Matrix> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let rows = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let cols = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if rows < 0 || cols < 0 {
        return Err(MatrixError::InvalidShape { rows: rows as i64, cols: cols as i64 });
    }
    let (rows, cols) = (rows as usize, cols as usize);
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(4))
        .ok_or(MatrixError::InvalidShape { rows: rows as i64, cols: cols as i64 })?;

    // The header is untrusted: grow with the bytes actually present, one past the
    // declared size so trailing data is still detected.
    let mut payload = Vec::new();
    reader.take((expected as u64).saturating_add(1)).read_to_end(&mut payload)?;
    if payload.len() < expected {
        return Err(MatrixError::Truncated { expected, actual: payload.len() });
    }
    if payload.len() > expected {
        return Err(MatrixError::TrailingData { extra: payload.len() - expected });
    }

    let data = payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Matrix::new(rows, cols, data)
}

pub fn read_matrix<P: AsRef<Path>>(path: P) -> MatrixResult<Matrix> {
    let mut reader = BufReader::new(File::open(path)?);
    decode_matrix(&mut reader)
}

/// Write `matrix` to `path` through a temporary file in the same directory.
///
/// The final path either keeps its previous content or holds the complete new matrix.
pub fn write_matrix_atomic<P: AsRef<Path>>(path: P, matrix: &Matrix) -> MatrixResult<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        encode_matrix(&mut writer, matrix)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
