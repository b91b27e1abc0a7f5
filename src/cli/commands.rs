//! CLI command definitions for change-forge.
//!
//! Single-unit crop and tile runs, multi-disaster processing, and the
//! catalog/download steps that populate the images tree.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::collectors::{
    download_all, fetch_catalog, filter_catalog, load_links, save_links, AcquireOptions,
    DownloadOptions, HttpFetcher, ImageFetcher, DEFAULT_LINKS_DIR, DEFAULT_MAX_CLOUDS_PERCENT,
};
use crate::pipeline::{
    prepare_disasters, CropConfig, CropMode, DisasterOrchestrator, RunSummary, UnitRunner,
};
use crate::scheduler::{Unit, UnitOutcome, UnitStatus};

/// Before/after crop dataset builder for disaster imagery.
#[derive(Parser)]
#[command(name = "change-forge")]
#[command(about = "Build before/after crop datasets from dated disaster imagery")]
#[command(version)]
#[command(
    long_about = "change-forge pairs the earliest and latest capture of each location and cuts aligned square crops from both.\n\nExample usage:\n  change-forge links -d Kalehe-DRC-Flooding-5-8-23\n  change-forge download -l filtered_links/Kalehe-DRC-Flooding-5-8-23_filtered_images.txt\n  change-forge process -d Kalehe-DRC-Flooding-5-8-23 --mode tile"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Root of the `<disaster>/<location>/` input tree.
    #[arg(long, global = true)]
    pub images_root: Option<PathBuf>,

    /// Root of the `<disaster>/<location>/pair_<n>/` output tree.
    #[arg(long, global = true)]
    pub output_root: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Cut one random valid crop pair from a single location.
    Crop(CropArgs),

    /// Tile a single location and keep every mostly non-black cell.
    #[command(alias = "tile")]
    Tiles(TilesArgs),

    /// Process many disasters with the two-level worker pool.
    Process(ProcessArgs),

    /// Fetch a disaster catalog and save the clear, repeated-location links.
    Links(LinksArgs),

    /// Download and convert images listed in a links file.
    Download(DownloadArgs),
}

/// Arguments for `change-forge crop`.
#[derive(Parser, Debug)]
pub struct CropArgs {
    /// Disaster directory name.
    #[arg(short = 'd', long)]
    pub disaster: String,

    /// Location directory name.
    #[arg(short = 'l', long)]
    pub location: String,

    /// Crop side length in pixels.
    #[arg(short = 's', long)]
    pub crop_size: Option<u32>,

    /// Random draws before giving up.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Seed for reproducible crops.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `change-forge tiles`.
#[derive(Parser, Debug)]
pub struct TilesArgs {
    /// Disaster directory name.
    #[arg(short = 'd', long)]
    pub disaster: String,

    /// Location directory name.
    #[arg(short = 'l', long)]
    pub location: String,

    /// Tile side length in pixels.
    #[arg(short = 's', long)]
    pub crop_size: Option<u32>,

    /// Print the outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `change-forge process`.
#[derive(Parser, Debug)]
pub struct ProcessArgs {
    /// Disasters to process (repeatable). All disasters when omitted.
    #[arg(short = 'd', long = "disaster")]
    pub disasters: Vec<String>,

    /// Crop side length in pixels.
    #[arg(short = 's', long)]
    pub crop_size: Option<u32>,

    /// Workers per pool level.
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Crop policy: "tile" or "sample".
    #[arg(long, default_value = "tile")]
    pub mode: String,

    /// Seed for reproducible sampling.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Only process disasters already on disk; never fetch catalogs or images.
    #[arg(long)]
    pub no_download: bool,

    /// Directory of saved filtered link lists, reused when present.
    #[arg(long, default_value = DEFAULT_LINKS_DIR)]
    pub links_dir: PathBuf,

    /// Maximum cloud cover in percent when filtering a fresh catalog.
    #[arg(long, default_value_t = DEFAULT_MAX_CLOUDS_PERCENT)]
    pub max_clouds: f64,

    /// Retries per request on transient HTTP failures.
    #[arg(long, default_value = "3")]
    pub retries: u32,

    /// Print the full summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `change-forge links`.
#[derive(Parser, Debug)]
pub struct LinksArgs {
    /// Disaster catalog name.
    #[arg(short = 'd', long)]
    pub disaster: String,

    /// Directory for the filtered links file.
    #[arg(short = 'o', long, default_value = DEFAULT_LINKS_DIR)]
    pub output: PathBuf,

    /// Maximum cloud cover in percent (inclusive).
    #[arg(long, default_value_t = DEFAULT_MAX_CLOUDS_PERCENT)]
    pub max_clouds: f64,

    /// Retries per request on transient HTTP failures.
    #[arg(long, default_value = "3")]
    pub retries: u32,
}

/// Arguments for `change-forge download`.
#[derive(Parser, Debug)]
pub struct DownloadArgs {
    /// File with one image URL per line.
    #[arg(short = 'l', long)]
    pub links: PathBuf,

    /// Base directory; images land under `<output>/images/`.
    #[arg(short = 'o', long, default_value = ".")]
    pub output: PathBuf,

    /// Longest edge of stored images in pixels.
    #[arg(long, default_value = "2048")]
    pub max_size: u32,

    /// JPEG quality (1-100).
    #[arg(long, default_value = "95")]
    pub quality: u8,

    /// Concurrent downloads.
    #[arg(long, default_value = "5")]
    pub concurrency: usize,

    /// Retries per request on transient HTTP failures.
    #[arg(long, default_value = "3")]
    pub retries: u32,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = CropConfig::from_env().context("Invalid CROP_* environment")?;
    if let Some(root) = cli.images_root {
        config = config.with_images_root(root);
    }
    if let Some(root) = cli.output_root {
        config = config.with_output_root(root);
    }

    match cli.command {
        Commands::Crop(args) => run_crop_command(config, args).await,
        Commands::Tiles(args) => run_tiles_command(config, args).await,
        Commands::Process(args) => run_process_command(config, args).await,
        Commands::Links(args) => run_links_command(args).await,
        Commands::Download(args) => run_download_command(args).await,
    }
}

// ============================================================================
// Crop Command Implementations
// ============================================================================

async fn run_crop_command(mut config: CropConfig, args: CropArgs) -> anyhow::Result<()> {
    if let Some(size) = args.crop_size {
        config = config.with_crop_size(size);
    }
    if let Some(attempts) = args.max_attempts {
        config = config.with_max_attempts(attempts);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    let unit = Unit::new(args.disaster, args.location);
    run_single_unit(config, unit, CropMode::Sample, args.json).await
}

async fn run_tiles_command(mut config: CropConfig, args: TilesArgs) -> anyhow::Result<()> {
    if let Some(size) = args.crop_size {
        config = config.with_crop_size(size);
    }
    let unit = Unit::new(args.disaster, args.location);
    run_single_unit(config, unit, CropMode::Tile, args.json).await
}

async fn run_single_unit(
    config: CropConfig,
    unit: Unit,
    mode: CropMode,
    json: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    let runner = UnitRunner::new(config);
    let outcome = tokio::task::spawn_blocking(move || runner.run(&unit, mode))
        .await
        .context("Unit task aborted")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    if outcome.status == UnitStatus::Failed {
        anyhow::bail!("{} failed: {}", outcome.unit, outcome.detail);
    }
    Ok(())
}

fn print_outcome(outcome: &UnitOutcome) {
    match outcome.status {
        UnitStatus::Produced => println!("{}: {}", outcome.unit, outcome.detail),
        UnitStatus::NoOutput => println!("{}: nothing written ({})", outcome.unit, outcome.detail),
        UnitStatus::Failed => eprintln!("{}: failed ({})", outcome.unit, outcome.detail),
    }
}

async fn run_process_command(mut config: CropConfig, args: ProcessArgs) -> anyhow::Result<()> {
    let mode: CropMode = args.mode.parse().map_err(anyhow::Error::msg)?;
    if let Some(size) = args.crop_size {
        config = config.with_crop_size(size);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    config.validate()?;

    let requested = args.disasters.len();
    let disasters = if requested == 0 {
        Vec::new()
    } else {
        let options = AcquireOptions::new(&config.images_root)
            .with_links_dir(&args.links_dir)
            .with_max_clouds_percent(args.max_clouds);
        let fetcher: Option<Arc<dyn ImageFetcher>> = if args.no_download {
            None
        } else {
            Some(Arc::new(HttpFetcher::new()?.with_max_retries(args.retries)))
        };
        prepare_disasters(args.disasters, fetcher, &options).await
    };
    if requested > 0 && disasters.is_empty() {
        println!("None of the requested disasters have images to process");
        return Ok(());
    }

    let orchestrator = DisasterOrchestrator::new(config, mode);
    let summary = orchestrator.run_disasters(disasters).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\nProcessing completed ({} mode)", summary.mode);
    println!(
        "Successful units: {}/{}",
        summary.successful_units,
        summary.total_units()
    );
    println!("Crop pairs written: {}", summary.total_crops);
    println!("Elapsed: {:.1}s", summary.elapsed_ms as f64 / 1000.0);

    if !summary.per_disaster.is_empty() {
        println!("\nResults by disaster:");
        for (disaster, tally) in &summary.per_disaster {
            println!(
                "  {}: {}/{} locations, {} crops{}",
                disaster,
                tally.successful,
                tally.total,
                tally.crops,
                if tally.aborted { " (aborted)" } else { "" }
            );
        }
    }

    let failed: Vec<&UnitOutcome> = summary
        .outcomes
        .iter()
        .filter(|o| !o.is_success())
        .collect();
    if !failed.is_empty() {
        println!("\nFailed units:");
        for outcome in failed {
            println!("  {}: {}", outcome.unit, outcome.detail);
        }
    }
}

// ============================================================================
// Collector Command Implementations
// ============================================================================

async fn run_links_command(args: LinksArgs) -> anyhow::Result<()> {
    let fetcher = HttpFetcher::new()?.with_max_retries(args.retries);
    info!(disaster = %args.disaster, "Fetching catalog");
    let tsv = fetch_catalog(&fetcher, &args.disaster)
        .await
        .with_context(|| format!("Failed to fetch catalog for {}", args.disaster))?;

    let links = filter_catalog(&tsv, args.max_clouds)?;
    if links.is_empty() {
        warn!(disaster = %args.disaster, "No clear locations with repeated captures");
    }
    let path = save_links(&links, &args.output, &args.disaster)?;
    println!("{} links saved to {}", links.len(), path.display());
    Ok(())
}

async fn run_download_command(args: DownloadArgs) -> anyhow::Result<()> {
    let urls = load_links(&args.links)
        .with_context(|| format!("Failed to read links from {}", args.links.display()))?;
    info!(urls = urls.len(), "Starting downloads");

    let options = DownloadOptions {
        max_size: args.max_size,
        quality: args.quality,
        concurrency: args.concurrency,
    };
    let fetcher = Arc::new(HttpFetcher::new()?.with_max_retries(args.retries));
    let report = download_all(fetcher, urls, &args.output.join("images"), &options).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Downloaded {} image(s), {} failed",
            report.saved.len(),
            report.failed.len()
        );
        for (url, error) in &report.failed {
            println!("  {url}: {error}");
        }
    }
    Ok(())
}
