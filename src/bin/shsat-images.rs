//! CLI binary for shsat-images.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, wires the quantizer and blob store, and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use shsat_images::pipeline::compress::PngquantQuantizer;
use shsat_images::pipeline::input::read_pages;
use shsat_images::process::default_quantizer;
use shsat_images::{
    BlobStore, Coordinate, FileJob, ImagePipeline, ImagePipelineError, JobReport,
    ObjectStoreBlobStore, PipelineConfig, PipelineProgressCallback, PipelineStage,
    ProgressCallback, PublishedImage, Role, StorageLayout,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner showing the current stage, plus one log line per finished run.
/// Works with several runs in flight (batch mode): each line names its job.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new(prefix: &str) -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix(prefix.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage(&self, job: &str, stage: PipelineStage) {
        self.bar.set_message(format!("{job}: {stage}"));
    }

    fn on_failed(&self, job: &str, last_stage: PipelineStage, error: &ImagePipelineError) {
        // First line only; the full chain is printed by main.
        let first = error.to_string();
        let msg = first.lines().next().unwrap_or_default();
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            job,
            dim(&format!("after {last_stage}")),
            red(msg),
        ));
    }

    fn on_complete(&self, job: &str, output: &PublishedImage) {
        self.bar.println(format!(
            "  {} {}  {}  {}",
            green("✓"),
            job,
            output.remote_key,
            dim(&format!(
                "{} bytes, {:.1}s",
                output.compressed_bytes,
                output.stats.total_duration_ms as f64 / 1000.0
            )),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Publish question 55 of the 2022 form A test from two scanned pages
  shsat-images question --year 2022 --form A --index 55 page1.png page2.png

  # Publish the answer explanation for the same question
  shsat-images answer --year 2022 --form A --index 55 answer.png

  # Publish a reading passage covering questions 32 through 36
  shsat-images passage --year 2022 --form A --first 32 --last 36 p1.png p2.png

  # Show where an image would be written, without doing anything
  shsat-images key question --year 2022 --form A --index 55

  # Process a manifest of jobs, four at a time
  shsat-images batch jobs.json --concurrency 4

  # Develop without S3: objects land under ./store/<bucket>/
  shsat-images --local-store ./store question --year 2022 --form A --index 1 q.png

MANIFEST FORMAT (batch):
  [
    { "coordinate": { "kind": "item", "year": 2022, "form": "A",
                      "role": "question", "index": 55 },
      "files": ["scans/q55-1.png", "scans/q55-2.png"] },
    { "coordinate": { "kind": "passage", "year": 2022, "form": "A",
                      "first_index": 32, "last_index": 36 },
      "files": ["scans/passage-32.png"] }
  ]
  Relative file paths are resolved against the manifest's directory.

ENVIRONMENT VARIABLES:
  IMAGE_ROOT          Local base directory for images (required)
  PROCESSED_SUBDIR    Subdirectory of IMAGE_ROOT for processed output (required)
  STORAGE_BUCKET      Destination bucket (required unless --no-upload)
  STORAGE_KEY_PREFIX  Remote key prefix (default: test-images)
  PNGQUANT_PATH       Path to the pngquant binary (default: found on PATH)
  AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_REGION, AWS_ENDPOINT
                      S3 credentials and endpoint
"#;

/// Trim, stack, compress and publish scanned test images.
#[derive(Parser, Debug)]
#[command(
    name = "shsat-images",
    version,
    about = "Trim, stack, compress and publish scanned test images",
    long_about = "Turn one or more scanned PNG pages of a test question, answer or reading \
passage into a single trimmed, padded and compressed PNG, store it locally under a \
deterministic path and upload it to blob storage under a deterministic key.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Local base directory for images.
    #[arg(long, global = true, env = "IMAGE_ROOT")]
    image_root: Option<PathBuf>,

    /// Subdirectory of the image root receiving processed output.
    #[arg(long, global = true, env = "PROCESSED_SUBDIR")]
    processed_subdir: Option<String>,

    /// Destination bucket.
    #[arg(long, global = true, env = "STORAGE_BUCKET")]
    bucket: Option<String>,

    /// Prefix of every remote key.
    #[arg(long, global = true, env = "STORAGE_KEY_PREFIX", default_value = "test-images")]
    key_prefix: String,

    /// Border added around each trimmed page, in pixels.
    #[arg(long, global = true, env = "SHSAT_BORDER", default_value_t = 16,
          value_parser = clap::value_parser!(u32).range(0..=1024))]
    border: u32,

    /// Path to the pngquant binary.
    #[arg(long, global = true, env = "PNGQUANT_PATH")]
    pngquant: Option<PathBuf>,

    /// Store objects under DIR/<bucket>/ instead of S3.
    #[arg(long, global = true, value_name = "DIR", env = "SHSAT_LOCAL_STORE")]
    local_store: Option<PathBuf>,

    /// Stop after compression; do not upload.
    #[arg(long, global = true)]
    no_upload: bool,

    /// Output structured JSON instead of bare keys.
    #[arg(long, global = true, env = "SHSAT_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "SHSAT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SHSAT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SHSAT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a question image.
    Question {
        #[command(flatten)]
        item: ItemArgs,
        #[command(flatten)]
        files: FileArgs,
    },
    /// Publish an answer image.
    Answer {
        #[command(flatten)]
        item: ItemArgs,
        #[command(flatten)]
        files: FileArgs,
    },
    /// Publish a reading-passage image.
    Passage {
        #[command(flatten)]
        passage: PassageArgs,
        #[command(flatten)]
        files: FileArgs,
    },
    /// Print the local path and remote key for a coordinate, then exit.
    Key {
        #[command(subcommand)]
        target: KeyTarget,
    },
    /// Process every job in a JSON manifest.
    Batch {
        /// Manifest file (see --help for the format).
        manifest: PathBuf,

        /// Jobs processed at the same time.
        #[arg(short, long, env = "SHSAT_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,
    },
}

#[derive(Subcommand, Debug)]
enum KeyTarget {
    Question(ItemArgs),
    Answer(ItemArgs),
    Passage(PassageArgs),
}

#[derive(Args, Debug, Clone)]
struct ItemArgs {
    /// Test year, e.g. 2022.
    #[arg(long)]
    year: u32,
    /// Test form, e.g. A.
    #[arg(long)]
    form: String,
    /// 1-based question number.
    #[arg(long)]
    index: u32,
}

#[derive(Args, Debug, Clone)]
struct PassageArgs {
    #[arg(long)]
    year: u32,
    #[arg(long)]
    form: String,
    /// First question the passage belongs to.
    #[arg(long)]
    first: u32,
    /// Last question the passage belongs to.
    #[arg(long)]
    last: u32,
}

#[derive(Args, Debug, Clone)]
struct FileArgs {
    /// Page images in top-to-bottom order.
    #[arg(required = true, value_name = "PNG")]
    files: Vec<PathBuf>,
}

impl ItemArgs {
    fn coordinate(&self, role: Role) -> Result<Coordinate> {
        Ok(Coordinate::item(self.year, self.form.clone(), role, self.index)?)
    }
}

impl PassageArgs {
    fn coordinate(&self) -> Result<Coordinate> {
        Ok(Coordinate::passage(
            self.year,
            self.form.clone(),
            self.first,
            self.last,
        )?)
    }
}

/// One manifest entry.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    coordinate: Coordinate,
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters while it is shown, so
    // INFO logs are only enabled without it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Key { ref target } => print_key(&cli, target),
        Command::Question {
            ref item,
            ref files,
        } => run_single(&cli, item.coordinate(Role::Question)?, &files.files, show_progress).await,
        Command::Answer {
            ref item,
            ref files,
        } => run_single(&cli, item.coordinate(Role::Answer)?, &files.files, show_progress).await,
        Command::Passage {
            ref passage,
            ref files,
        } => run_single(&cli, passage.coordinate()?, &files.files, show_progress).await,
        Command::Batch {
            ref manifest,
            concurrency,
        } => run_batch(&cli, manifest, concurrency, show_progress).await,
    }
}

/// `key` subcommand: derivation only, no bucket or quantizer needed.
fn print_key(cli: &Cli, target: &KeyTarget) -> Result<()> {
    let coordinate = match target {
        KeyTarget::Question(a) => a.coordinate(Role::Question)?,
        KeyTarget::Answer(a) => a.coordinate(Role::Answer)?,
        KeyTarget::Passage(p) => p.coordinate()?,
    };
    let config = build_config(cli, None)?;
    let layout = StorageLayout::from_config(&config).context("Invalid storage layout")?;
    let paths = layout.paths(&coordinate);

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&paths).context("Failed to serialise paths")?
        );
    } else {
        println!("{}", paths.remote_key);
        if !cli.quiet {
            eprintln!("{} {}", dim("local:"), paths.local_path.display());
        }
    }
    Ok(())
}

async fn run_single(
    cli: &Cli,
    coordinate: Coordinate,
    files: &[PathBuf],
    show_progress: bool,
) -> Result<()> {
    let progress = show_progress.then(|| CliProgressCallback::new("Publishing"));
    let config = build_config(cli, progress.clone().map(|p| p as ProgressCallback))?;
    let pipeline = build_pipeline(cli, config)?;
    let pages = read_pages(files).await?;

    if cli.no_upload {
        let result = pipeline.prepare(pages, &coordinate).await;
        if let Some(ref p) = progress {
            p.finish();
        }
        let prepared = result.with_context(|| format!("Failed to prepare {coordinate}"))?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&prepared).context("Failed to serialise output")?
            );
        } else {
            println!("{}", prepared.local_path.display());
            if !cli.quiet {
                eprintln!(
                    "{}  {}x{}  {} → {} bytes  {}ms",
                    green("✔"),
                    prepared.width,
                    prepared.height,
                    prepared.source_bytes,
                    prepared.compressed_bytes,
                    prepared.stats.total_duration_ms,
                );
            }
        }
        return Ok(());
    }

    let result = pipeline.process(pages, &coordinate).await;
    if let Some(ref p) = progress {
        p.finish();
    }
    let published = result.with_context(|| format!("Failed to publish {coordinate}"))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&published).context("Failed to serialise output")?
        );
    } else {
        println!("{}", published.remote_key);
        if !cli.quiet {
            eprintln!(
                "{}  {}  {}x{}  {} bytes  {}ms",
                green("✔"),
                bold(&format!("{}/{}", published.bucket, published.remote_key)),
                published.width,
                published.height,
                published.compressed_bytes,
                published.stats.total_duration_ms,
            );
        }
    }
    Ok(())
}

async fn run_batch(
    cli: &Cli,
    manifest: &Path,
    concurrency: usize,
    show_progress: bool,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(manifest)
        .await
        .with_context(|| format!("Failed to read manifest {}", manifest.display()))?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid manifest {}", manifest.display()))?;
    let base = manifest.parent().filter(|p| !p.as_os_str().is_empty());

    // Pages are read per job, so an unreadable file fails only its own entry.
    let jobs: Vec<FileJob> = entries
        .into_iter()
        .map(|entry| FileJob {
            files: relative_to(base, entry.files),
            coordinate: entry.coordinate,
        })
        .collect();
    let total = jobs.len();

    let progress = show_progress.then(|| CliProgressCallback::new("Batch"));
    let config = build_config(cli, progress.clone().map(|p| p as ProgressCallback))?;
    let pipeline = build_pipeline(cli, config)?;

    let outcomes = pipeline.process_file_batch(jobs, concurrency).await;
    if let Some(ref p) = progress {
        p.finish();
    }
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();

    if cli.json {
        let reports: Vec<JobReport> = outcomes.iter().map(JobReport::from).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialise output")?
        );
    } else {
        for outcome in &outcomes {
            match &outcome.result {
                Ok(published) => println!("{}", published.remote_key),
                Err(e) if !show_progress => eprintln!("{} {}: {}", red("✗"), outcome.coordinate, e),
                Err(_) => {}
            }
        }
    }

    if !cli.quiet {
        eprintln!(
            "{} {}/{} jobs published",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&(total - failed).to_string()),
            total
        );
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {total} jobs failed");
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .key_prefix(cli.key_prefix.clone())
        .border_px(cli.border);

    if let Some(ref root) = cli.image_root {
        builder = builder.image_root(root.clone());
    }
    if let Some(ref sub) = cli.processed_subdir {
        builder = builder.processed_subdir(sub.clone());
    }
    if let Some(ref bucket) = cli.bucket {
        builder = builder.bucket(bucket.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Wire the quantizer and the store chosen on the command line.
fn build_pipeline(cli: &Cli, mut config: PipelineConfig) -> Result<ImagePipeline> {
    let quantizer = match cli.pngquant {
        Some(ref path) => PngquantQuantizer::new(path.clone()),
        None => default_quantizer(),
    };

    // Preparing locally does not need a real bucket.
    if cli.no_upload && config.bucket.is_none() {
        config.bucket = Some("unused".to_string());
    }
    let bucket = config.require_bucket()?.to_string();

    let store: Arc<dyn BlobStore> = match cli.local_store {
        Some(ref dir) => Arc::new(
            ObjectStoreBlobStore::local(&bucket, dir).context("Failed to open local store")?,
        ),
        None if cli.no_upload => Arc::new(ObjectStoreBlobStore::in_memory(&bucket)),
        None => Arc::new(
            ObjectStoreBlobStore::s3_from_env(&bucket).context("Failed to configure S3 client")?,
        ),
    };

    ImagePipeline::new(config, Arc::new(quantizer), store).context("Invalid configuration")
}

fn relative_to(base: Option<&Path>, files: Vec<PathBuf>) -> Vec<PathBuf> {
    match base {
        Some(dir) => files
            .into_iter()
            .map(|f| if f.is_relative() { dir.join(f) } else { f })
            .collect(),
        None => files,
    }
}
