use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

mod batch;
mod config;
mod error;
mod optimize;

use batch::{BatchError, BatchSettings};
use optimize::{OutputFormat, ProcessingOptions};

/// Shrink gallery photos to an upload byte budget
///
/// Files already under the budget are copied unchanged. Larger ones are
/// resized to fit the maximum dimensions and re-encoded at decreasing
/// quality until they fit. A photo that cannot be processed is copied
/// as-is, so every input always ends up in the output folder.
#[derive(Debug, Parser)]
#[command(name = "gallery-optimizer", version)]
struct Cli {
    /// Photo files or folders (folders are scanned recursively)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Folder the processed photos are written to
    #[arg(short, long, default_value = "optimized")]
    out_dir: PathBuf,

    /// Options file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Byte budget per photo
    #[arg(long)]
    max_size: Option<u64>,

    #[arg(long)]
    max_width: Option<u32>,

    #[arg(long)]
    max_height: Option<u32>,

    /// Starting quality in (0, 1]
    #[arg(short, long)]
    quality: Option<f32>,

    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Write a JSON report of the run
    #[arg(long)]
    report: Option<PathBuf>,

    /// Process and report without writing any photos
    #[arg(long)]
    dry_run: bool,

    /// Photos processed at the same time (defaults to the number of cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Save the effective options as the new defaults
    #[arg(long)]
    save_defaults: bool,
}

impl Cli {
    /// Layer command line flags over the loaded options
    fn apply_overrides(&self, mut options: ProcessingOptions) -> ProcessingOptions {
        if let Some(max_size) = self.max_size {
            options.max_size_bytes = max_size;
        }
        if let Some(max_width) = self.max_width {
            options.max_width = max_width;
        }
        if let Some(max_height) = self.max_height {
            options.max_height = max_height;
        }
        if let Some(quality) = self.quality {
            options.quality = quality;
        }
        if let Some(format) = self.format {
            options.format = format;
        }
        options
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr, the summary table to stdout
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let options = match config::load_options(cli.config.as_deref()) {
        Ok(options) => cli.apply_overrides(options),
        Err(e) => {
            tracing::error!("❌ {}", e);
            return ExitCode::from(1);
        }
    };

    if let Err(e) = config::validate(&options) {
        tracing::error!("❌ {}", e);
        return ExitCode::from(1);
    }

    if cli.save_defaults {
        let path = cli.config.clone().or_else(config::default_config_path);
        match path {
            Some(path) => match config::save_options(&path, &options) {
                Ok(()) => tracing::info!("💾 Saved defaults to {}", path.display()),
                Err(e) => tracing::warn!("⚠️  Could not save defaults: {}", e),
            },
            None => tracing::warn!("⚠️  No config directory available, defaults not saved"),
        }
    }

    tracing::info!(
        "🎨 gallery-optimizer v{}: budget {} bytes, max {}x{}, quality {}, {}",
        env!("CARGO_PKG_VERSION"),
        options.max_size_bytes,
        options.max_width,
        options.max_height,
        options.quality,
        options.format
    );

    match run(&cli, options).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(unreadable) => {
            tracing::error!("❌ {} photos could not be read", unreadable);
            ExitCode::from(1)
        }
        Err(BatchError::NoInputs) => {
            tracing::error!("❌ {}", BatchError::NoInputs);
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("❌ {}", e);
            ExitCode::from(1)
        }
    }
}

/// Run the batch and return how many inputs could not be read
async fn run(cli: &Cli, options: ProcessingOptions) -> Result<usize, BatchError> {
    let inputs = batch::collect_inputs(&cli.inputs)?;

    let mut settings = BatchSettings::new(&cli.out_dir);
    settings.dry_run = cli.dry_run;
    if let Some(jobs) = cli.jobs {
        settings.jobs = jobs.max(1);
    }
    let report = batch::run_batch(inputs, options, &settings).await?;

    batch::print_summary(&report);

    if let Some(path) = &cli.report {
        batch::write_report(&report, path)?;
        tracing::info!("📝 Report written to {}", path.display());
    }

    Ok(report.unreadable)
}
