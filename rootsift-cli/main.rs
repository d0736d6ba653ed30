use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rootsift_cli::rootsift_io::verify_dataset;
use rootsift_cli::{
    CommandExtractor, DatasetLayout, DegeneratePolicy, ExtractorConfig, PipelineBuilder, RunConfig,
    init_tracing,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rootsift")]
#[command(about = "Compute rootSIFT descriptors for a dataset of images and keypoints")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute descriptors for every image without them
    Run(RunArgs),
    /// Check descriptor artifacts against their keypoints
    Verify(VerifyArgs),
}

#[derive(Args, Debug, Clone)]
struct DatasetArgs {
    /// Dataset root holding images/, keypoints/ and descriptors/
    #[arg(long)]
    dataset: Option<PathBuf>,
    /// JSON or TOML run configuration; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    common: DatasetArgs,
    /// Descriptor extractor program
    #[arg(long)]
    extractor: Option<String>,
    /// Extractor argument; may contain {image}, {keypoints} and {output}
    #[arg(long = "extractor-arg", allow_hyphen_values = true)]
    extractor_args: Vec<String>,
    #[arg(long)]
    timeout_secs: Option<f64>,
    /// Worker threads, 0 for one per logical CPU
    #[arg(long)]
    threads: Option<usize>,
    #[arg(long, value_enum)]
    degenerate: Option<DegenerateArg>,
    /// Recompute descriptors that already exist
    #[arg(long)]
    force: bool,
    /// Write a per-image JSON report
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct VerifyArgs {
    #[command(flatten)]
    common: DatasetArgs,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DegenerateArg {
    ZeroFill,
    Reject,
}

impl From<DegenerateArg> for DegeneratePolicy {
    fn from(arg: DegenerateArg) -> Self {
        match arg {
            DegenerateArg::ZeroFill => DegeneratePolicy::ZeroFill,
            DegenerateArg::Reject => DegeneratePolicy::Reject,
        }
    }
}

fn load_config(args: &DatasetArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(root) = &args.dataset {
        config.dataset = DatasetLayout { root: root.clone(), ..config.dataset };
    } else if args.config.is_none() {
        bail!("either --dataset or --config is required");
    }
    Ok(config)
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(&args.common)?;
    if let Some(threads) = args.threads {
        config.batch.n_threads = threads;
    }
    if let Some(policy) = args.degenerate {
        config.batch.degenerate = policy.into();
    }
    if args.force {
        config.batch.skip_existing = false;
    }
    if let Some(program) = args.extractor {
        config.extractor = Some(ExtractorConfig {
            program,
            args: args.extractor_args,
            timeout_secs: args.timeout_secs,
        });
    } else if let Some(extractor) = config.extractor.as_mut() {
        if !args.extractor_args.is_empty() {
            extractor.args = args.extractor_args;
        }
        if args.timeout_secs.is_some() {
            extractor.timeout_secs = args.timeout_secs;
        }
    }
    config.validate()?;

    let Some(extractor_config) = &config.extractor else {
        bail!("no extractor configured, pass --extractor or set [extractor] in the config file");
    };
    let extractor = CommandExtractor::from_config(extractor_config);
    let builder = PipelineBuilder::from_config(extractor, config.batch.clone());
    info!("{}", builder.summary());
    let pipeline = builder.build()?;

    let tasks = config
        .dataset
        .discover_tasks()
        .with_context(|| format!("listing images in {}", config.dataset.images_path().display()))?;
    let report = pipeline.run(&tasks);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report.records())?;
        std::fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
    }

    for (task, err) in report.failures() {
        error!("{}: {}", task.image, err.chain());
    }
    if !report.is_success() {
        bail!("{}", report.summary());
    }
    Ok(())
}

fn verify(args: VerifyArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let tasks = config
        .dataset
        .discover_tasks()
        .with_context(|| format!("listing images in {}", config.dataset.images_path().display()))?;
    let issues = verify_dataset(&tasks);
    for issue in &issues {
        error!("{}: {}", issue.image, issue.error.chain());
    }
    if !issues.is_empty() {
        bail!("{} of {} images failed verification", issues.len(), tasks.len());
    }
    info!("{} images verified", tasks.len());
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => run(args),
        Command::Verify(args) => verify(args),
    }
}
