//! Descriptor extraction delegated to an external program.
//!
//! The program receives three file paths: the grayscale image as an `(H x W)` matrix,
//! the keypoints as a `(K x 4)` or `(K x 6)` matrix, and the path where it must write a
//! `(K x 128)` descriptor matrix. All three use the little-endian matrix format.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use rootsift_core::{
    DESCRIPTOR_DIM, DescriptorExtractor, ExtractorError, FloatImage, Keypoint, RawDescriptor,
};
use rootsift_io::{Matrix, MatrixError, keypoints_to_matrix, read_matrix, write_matrix_atomic};
use tracing::debug;

use crate::config::ExtractorConfig;

const IMAGE_PLACEHOLDER: &str = "{image}";
const KEYPOINTS_PLACEHOLDER: &str = "{keypoints}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STDERR_TAIL: u64 = 2048;

#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandExtractor {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self { program: program.into(), args: Vec::new(), timeout: None }
    }

    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
        }
    }

    /// Arguments may contain `{image}`, `{keypoints}` and `{output}`; without any
    /// placeholder the three paths are appended in that order.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Kill the program if it runs longer than `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command_args(&self, image: &Path, keypoints: &Path, output: &Path) -> Vec<String> {
        let has_placeholder = self.args.iter().any(|a| {
            a.contains(IMAGE_PLACEHOLDER) || a.contains(KEYPOINTS_PLACEHOLDER) || a.contains(OUTPUT_PLACEHOLDER)
        });
        let (image, keypoints, output) = (
            image.display().to_string(),
            keypoints.display().to_string(),
            output.display().to_string(),
        );
        if !has_placeholder {
            let mut args = self.args.clone();
            args.extend([image, keypoints, output]);
            return args;
        }
        self.args
            .iter()
            .map(|a| {
                a.replace(IMAGE_PLACEHOLDER, &image)
                    .replace(KEYPOINTS_PLACEHOLDER, &keypoints)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }

    fn wait(&self, child: &mut std::process::Child) -> Result<ExitStatus, ExtractorError> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait()?);
        };
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                // The child may have exited between try_wait and kill
                let _ = child.kill();
                child.wait()?;
                return Err(ExtractorError::Timeout(timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

fn matrix_error(err: MatrixError) -> ExtractorError {
    match err {
        MatrixError::Io(e) => ExtractorError::Io(e),
        other => ExtractorError::failed(other.to_string()),
    }
}

fn image_matrix(image: &FloatImage) -> Result<Matrix, MatrixError> {
    Matrix::new(image.height, image.width, image.data.clone())
}

fn stderr_tail(path: &Path) -> String {
    let read = || -> std::io::Result<String> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(len.saturating_sub(STDERR_TAIL)))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    };
    read().unwrap_or_default()
}

impl DescriptorExtractor for CommandExtractor {
    fn extract(&self, image: &FloatImage, keypoints: &[Keypoint]) -> Result<Vec<RawDescriptor>, ExtractorError> {
        let dir = tempfile::Builder::new().prefix("rootsift-").tempdir()?;
        let image_path = dir.path().join("image.bin");
        let keypoint_path = dir.path().join("keypoints.bin");
        let output_path = dir.path().join("descriptors.bin");
        let stderr_path = dir.path().join("stderr.log");

        image_matrix(image)
            .and_then(|m| write_matrix_atomic(&image_path, &m))
            .map_err(matrix_error)?;
        keypoints_to_matrix(keypoints)
            .and_then(|m| write_matrix_atomic(&keypoint_path, &m))
            .map_err(matrix_error)?;

        let args = self.command_args(&image_path, &keypoint_path, &output_path);
        debug!("Running {} {:?}", self.program, args);
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(File::create(&stderr_path)?)
            .spawn()
            .map_err(|e| ExtractorError::failed(format!("cannot start {}: {}", self.program, e)))?;

        let status = self.wait(&mut child)?;
        if !status.success() {
            let tail = stderr_tail(&stderr_path);
            return Err(ExtractorError::failed(if tail.is_empty() {
                format!("{} exited with {}", self.program, status)
            } else {
                format!("{} exited with {}: {}", self.program, status, tail)
            }));
        }

        let output = read_matrix(&output_path).map_err(matrix_error)?;
        if output.rows() == 0 {
            return Ok(Vec::new());
        }
        if output.cols() != DESCRIPTOR_DIM {
            return Err(ExtractorError::Dimension { expected: DESCRIPTOR_DIM, actual: output.cols() });
        }
        Ok(output
            .iter_rows()
            .map(|row| {
                let mut d = [0.0f32; DESCRIPTOR_DIM];
                d.copy_from_slice(row);
                d
            })
            .collect())
    }

    fn name(&self) -> &str {
        &self.program
    }
}
