//! Raster time-series ingester.
//!
//! Concatenates the available archives of compatible datasets into one
//! regular time series on a fixed grid:
//! - Datasets are listed in priority order, highest first
//! - Each dataset is read from local mirrors or remote archives
//! - Steps without any usable source are reported as gaps

mod config;
mod config_loader;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::{bind_datasets, MirrorArg};
use ingestion::{
    describe_gap, AssimilationEngine, AssimilationRequest, Credentials, GapPolicy, HttpFetcher, HttpFetcherConfig,
    PartialCoveragePolicy, RunOptions, StepOutcome, DEFAULT_NAMING,
};
use series_common::{parse_date, BoundingBox, Cadence, Resolution};

const SUMMARY_FILE: &str = "summary.json";

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Assemble a regular raster time series from prioritized archives")]
struct Args {
    /// Dataset ids in priority order (default: every catalog dataset)
    datasets: Vec<String>,

    /// Dataset catalog
    #[arg(long, env = "DATASET_CATALOG", default_value = "config/datasets.yaml")]
    catalog: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Target resolution: 300m, 1km or <n>ppd
    #[arg(short, long, default_value = "1km")]
    resolution: String,

    /// Output naming; placeholders $(yyyy), $(mm), $(dd), $(mdekad)
    #[arg(short, long, default_value = DEFAULT_NAMING)]
    naming: String,

    /// First date (YYYY-MM-DD)
    #[arg(short, long)]
    begin_date: String,

    /// Last date (YYYY-MM-DD)
    #[arg(short, long)]
    end_date: String,

    /// Output cadence: daily, dekad or monthly
    #[arg(long, default_value = "dekad")]
    cadence: String,

    /// Area of interest: <UL lon> <UL lat> <LR lon> <LR lat>
    #[arg(long, num_args = 4, value_names = ["UL_LON", "UL_LAT", "LR_LON", "LR_LAT"], allow_hyphen_values = true, required = true)]
    aoi: Vec<f64>,

    /// Mirror for a dataset, DATASET=LOCATION; * for all datasets. Repeatable.
    #[arg(short, long = "mirror")]
    mirrors: Vec<MirrorArg>,

    /// Archive username
    #[arg(short, long, env = "ARCHIVE_USERNAME")]
    username: Option<String>,

    /// Archive password
    #[arg(short, long, env = "ARCHIVE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Archive bearer token (takes precedence over username/password)
    #[arg(long, env = "ARCHIVE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Staging directory for downloaded files (default: <output>/.staging)
    #[arg(short, long)]
    staging: Option<PathBuf>,

    /// Steps processed concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Give up on steps not finished after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// What to write for a gap: skip or marker
    #[arg(long)]
    gap_policy: Option<String>,

    /// When the winning dataset covers part of the area: accept or fill
    #[arg(long)]
    partial_coverage: Option<String>,

    /// Rebuild frames that already exist
    #[arg(long)]
    overwrite: bool,

    /// Maximum retry attempts per download
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Report which dataset would serve each step, without fetching or writing
    #[arg(long)]
    dry_run: bool,

    /// Run summary file (default: <output>/summary.json)
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args)?;

    info!("Starting raster time-series ingester");

    let catalog = config_loader::load_catalog(&args.catalog)?;
    let bindings = bind_datasets(&catalog, &args.datasets, &args.mirrors)?;
    info!(
        datasets = ?bindings.iter().map(|b| b.id()).collect::<Vec<_>>(),
        "Loaded dataset catalog"
    );

    let request = build_request(&args, bindings)?;
    let fetcher = HttpFetcher::new(
        HttpFetcherConfig {
            max_retries: args.max_retries,
            ..HttpFetcherConfig::default()
        },
        request.credentials.clone(),
    )?;
    let engine = AssimilationEngine::new(request)?.with_fetcher(Arc::new(fetcher));

    if args.dry_run {
        for planned in engine.plan().await {
            info!(
                step = %planned.step,
                name = %planned.name,
                dataset = planned.dataset.as_deref().unwrap_or("-"),
                reused = planned.reused,
                "Planned step"
            );
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let summary = engine.run(&cancel).await;

    for entry in &summary.entries {
        if let StepOutcome::Gap { reasons, .. } = &entry.outcome {
            warn!(step = %entry.step, name = %entry.name, reasons = %describe_gap(reasons), "Gap");
        }
    }

    let summary_path = args
        .summary
        .clone()
        .unwrap_or_else(|| engine.request().output_dir.join(SUMMARY_FILE));
    engine
        .writer()
        .write_summary(&summary, &summary_path)
        .with_context(|| format!("Failed to write summary to {}", summary_path.display()))?;
    info!(
        path = %summary_path.display(),
        written = summary.written,
        reused = summary.reused,
        gaps = summary.gaps,
        partial = summary.partial,
        "Run finished"
    );

    if summary.cancelled {
        anyhow::bail!("run cancelled after {} of {} steps", summary.written + summary.reused, summary.entries.len());
    }
    Ok(())
}

fn init_tracing(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true);

    if args.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn build_request(args: &Args, bindings: Vec<ingestion::DatasetBinding>) -> Result<AssimilationRequest> {
    let mut options = RunOptions::from_env();
    if let Some(workers) = args.workers {
        options.workers = workers;
    }
    if let Some(secs) = args.deadline_secs {
        options.deadline = Some(Duration::from_secs(secs));
    }
    if let Some(policy) = &args.gap_policy {
        options.gap_policy = GapPolicy::from_str(policy);
    }
    if let Some(policy) = &args.partial_coverage {
        options.partial_coverage = PartialCoveragePolicy::from_str(policy);
    }
    options.overwrite |= args.overwrite;

    let [ul_lon, ul_lat, lr_lon, lr_lat] = args.aoi[..] else {
        anyhow::bail!("--aoi takes exactly four values");
    };

    let credentials = match (&args.token, &args.username) {
        (Some(token), _) => Credentials::bearer(token.clone()),
        (None, Some(username)) => Credentials::basic(username.clone(), args.password.clone().unwrap_or_default()),
        (None, None) => Credentials::default(),
    };

    let mut builder = AssimilationRequest::builder()
        .datasets(bindings)
        .resolution(Resolution::parse(&args.resolution)?)
        .date_range(parse_date(&args.begin_date)?, parse_date(&args.end_date)?)
        .cadence(args.cadence.parse::<Cadence>()?)
        .aoi(BoundingBox::new(ul_lon, lr_lat, lr_lon, ul_lat))
        .naming(args.naming.clone())
        .output_dir(args.output.clone())
        .credentials(credentials)
        .options(options);
    if let Some(staging) = &args.staging {
        builder = builder.staging_dir(staging.clone());
    }

    Ok(builder.build()?)
}
