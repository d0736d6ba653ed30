//! Batch rootSIFT descriptor computation over a dataset directory.

mod command;
mod config;
mod pipeline;
mod report;

pub use command::CommandExtractor;
pub use config::{ExtractorConfig, RunConfig, RunConfigError};
pub use pipeline::{DescriptorPipeline, PipelineBuilder};
pub use report::{BatchReport, ReportRecord, TaskOutcome, TaskReport};

pub use rootsift_core::{self, BatchConfig, CancelToken, DegeneratePolicy, ImageTask, TaskError};
pub use rootsift_io::{self, DatasetLayout};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] rootsift_core::ConfigError),
    #[error("thread pool error")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Install the global `tracing` subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
