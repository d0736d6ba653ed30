use crate::error::ConfigError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What to do with a raw descriptor whose L1 norm is zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum DegeneratePolicy {
    /// Write an all-zero descriptor
    #[default]
    ZeroFill,
    /// Fail the image with `TaskError::DegenerateDescriptor`
    Reject,
}

/// Batch-level settings for the descriptor pipeline
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BatchConfig {
    /// Worker threads, `0` for one per logical CPU
    pub n_threads: usize,
    pub degenerate: DegeneratePolicy,
    /// Skip images whose keypoint and descriptor artifacts both exist
    pub skip_existing: bool,
    /// Metadata
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub description: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            n_threads: num_cpus::get().max(1),
            degenerate: DegeneratePolicy::ZeroFill,
            skip_existing: true,
            name: None,
            description: None,
        }
    }
}

impl BatchConfig {
    /// Generate human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "BatchConfig: threads={}, degenerate={:?}, skip_existing={}",
            self.n_threads, self.degenerate, self.skip_existing
        )
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        const MAX_THREADS: usize = 1024;
        if self.n_threads > MAX_THREADS {
            return Err(ConfigError(format!(
                "n_threads {} exceeds {}",
                self.n_threads, MAX_THREADS
            )));
        }
        Ok(())
    }
}
