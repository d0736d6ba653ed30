//! Error types for a descriptor batch.
//!
//! Every variant of [`TaskError`] is scoped to a single image: the orchestrator catches it
//! at the task boundary and records it in the batch report.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Failure of the external descriptor extractor
#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("extractor failed: {message}")]
    Failed { message: String },

    #[error("extractor returned {actual}-dimensional descriptors, expected {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("extractor returned a non-finite value in descriptor {index}")]
    NonFinite { index: usize },

    #[error("extractor timed out after {0:.1?}")]
    Timeout(Duration),

    #[error("extractor i/o")]
    Io(#[from] std::io::Error),
}

impl ExtractorError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExtractorError::Failed { message: message.into() }
    }
}

/// Failure of one image's task
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("failed to decode image {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("descriptor extraction")]
    Extractor(#[from] ExtractorError),

    #[error("descriptor count {descriptors} does not match keypoint count {keypoints}")]
    CountMismatch { keypoints: usize, descriptors: usize },

    #[error("descriptor {index} has zero L1 norm")]
    DegenerateDescriptor { index: usize },

    #[error("malformed artifact {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("i/o on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        TaskError::Io { path: path.to_path_buf(), source }
    }

    pub fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        TaskError::Malformed { path: path.to_path_buf(), reason: reason.into() }
    }

    /// Short stable name of the error class, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Decode { .. } => "decode",
            TaskError::Extractor(_) => "extractor",
            TaskError::CountMismatch { .. } => "count_mismatch",
            TaskError::DegenerateDescriptor { .. } => "degenerate_descriptor",
            TaskError::Malformed { .. } => "malformed",
            TaskError::Io { .. } => "io",
            TaskError::Cancelled => "cancelled",
        }
    }

    /// Message of this error followed by all of its sources
    pub fn chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            message.push_str(": ");
            message.push_str(&err.to_string());
            source = std::error::Error::source(err);
        }
        message
    }
}

pub type TaskResult<T> = Result<T, TaskError>;

/// Rejected configuration value
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);
