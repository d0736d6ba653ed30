//! Run configuration: dataset layout, batch settings and the extractor command.
//!
//! Files are JSON or TOML, chosen by extension; every section is optional.
//!
//! ```toml
//! [dataset]
//! root = "/data/fountain"
//!
//! [batch]
//! n_threads = 8
//! degenerate = "reject"
//!
//! [extractor]
//! program = "sift-describe"
//! args = ["--input", "{image}", "--keypoints", "{keypoints}", "--output", "{output}"]
//! timeout_secs = 30.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use rootsift_core::{BatchConfig, ConfigError};
use rootsift_io::DatasetLayout;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunConfigError {
    #[error("reading {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing JSON configuration")]
    Json(#[from] serde_json::Error),
    #[error("parsing TOML configuration")]
    TomlDe(#[from] toml::de::Error),
    #[error("writing TOML configuration")]
    TomlSer(#[from] toml::ser::Error),
    #[error("unsupported configuration format {}, expected .json or .toml", path.display())]
    Format { path: PathBuf },
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.trim().is_empty() {
            return Err(ConfigError("extractor program is empty".to_string()));
        }
        if let Some(secs) = self.timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError(format!("timeout_secs must be positive, got {secs}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub dataset: DatasetLayout,
    pub batch: BatchConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extractor: Option<ExtractorConfig>,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> Result<Format, RunConfigError> {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        _ => Err(RunConfigError::Format { path: path.to_path_buf() }),
    }
}

impl RunConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RunConfigError> {
        let path = path.as_ref();
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|source| RunConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RunConfigError> {
        let path = path.as_ref();
        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };
        std::fs::write(path, content).map_err(|source| RunConfigError::Io { path: path.to_path_buf(), source })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.batch.validate()?;
        if self.dataset.extension.is_empty() {
            return Err(ConfigError("artifact extension is empty".to_string()));
        }
        match &self.extractor {
            Some(extractor) => extractor.validate(),
            None => Ok(()),
        }
    }
}
