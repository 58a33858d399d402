//! The orchestrator: one [`ImagePipeline`] drives each run through
//! `Received → Validated → Trimmed → Composed → Compressed → Uploaded → Done`.
//!
//! Steps within a run are strictly sequential and the first failure ends the
//! run. Decoding, trimming, composition and quantization are CPU-bound and
//! run on the blocking pool; the upload runs on its own task
//! (see [`crate::pipeline::upload::publish`]). Independent runs share one
//! pipeline (it is cheap to clone) and may proceed concurrently.

use crate::config::PipelineConfig;
use crate::coordinate::Coordinate;
use crate::error::ImagePipelineError;
use crate::output::{JobOutcome, PipelineStats, PreparedImage, PublishedImage};
use crate::pipeline::compress::{compress_and_store, PngquantQuantizer, Quantizer};
use crate::pipeline::input::{read_pages, RawPage};
use crate::pipeline::keys::{ArtifactPaths, StorageLayout};
use crate::pipeline::normalize::{normalize_observed, NormalizeOptions};
use crate::pipeline::upload::{publish, BlobStore, ObjectStoreBlobStore};
use crate::progress::{PipelineStage, ProgressCallback};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One unit of work for [`ImagePipeline::process_batch`].
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub coordinate: Coordinate,
    pub pages: Vec<RawPage>,
}

/// A job whose pages are still files on disk, for
/// [`ImagePipeline::process_file_batch`].
#[derive(Debug, Clone)]
pub struct FileJob {
    pub coordinate: Coordinate,
    pub files: Vec<PathBuf>,
}

/// Validated configuration plus the two external collaborators.
#[derive(Clone)]
pub struct ImagePipeline {
    config: Arc<PipelineConfig>,
    layout: StorageLayout,
    bucket: String,
    quantizer: Arc<dyn Quantizer>,
    store: Arc<dyn BlobStore>,
}

impl fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("processed_root", &self.layout.processed_root())
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.config.key_prefix)
            .field("quantizer", &self.quantizer.name())
            .finish()
    }
}

impl ImagePipeline {
    /// Validate `config` and bind the collaborators.
    ///
    /// # Errors
    /// [`ImagePipelineError::Config`] when `IMAGE_ROOT`, `PROCESSED_SUBDIR`
    /// or `STORAGE_BUCKET` is missing. Call this once at startup.
    pub fn new(
        config: PipelineConfig,
        quantizer: Arc<dyn Quantizer>,
        store: Arc<dyn BlobStore>,
    ) -> Result<Self, ImagePipelineError> {
        let layout = StorageLayout::from_config(&config)?;
        let bucket = config.require_bucket()?.to_string();
        info!(
            "Pipeline ready: {} → {}/{}",
            layout.processed_root().display(),
            bucket,
            config.key_prefix
        );
        Ok(Self {
            config: Arc::new(config),
            layout,
            bucket,
            quantizer,
            store,
        })
    }

    /// Production wiring: `pngquant` from `PNGQUANT_PATH` or `PATH`, and an
    /// S3 store for the configured bucket.
    ///
    /// A missing `pngquant` is not fatal here; each run then fails at the
    /// compression step with a `ToolUnavailable` cause.
    pub fn from_config(config: PipelineConfig) -> Result<Self, ImagePipelineError> {
        let bucket = config.require_bucket()?.to_string();
        let store = ObjectStoreBlobStore::s3_from_env(&bucket)?;
        Self::new(config, Arc::new(default_quantizer()), Arc::new(store))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Local path and remote key for `coordinate`, without doing any work.
    pub fn paths(&self, coordinate: &Coordinate) -> Result<ArtifactPaths, ImagePipelineError> {
        coordinate.validate()?;
        Ok(self.layout.paths(coordinate))
    }

    /// Run the whole pipeline and publish the result.
    ///
    /// On success the compressed PNG exists at the derived local path and
    /// under the derived key in the bucket. If the upload fails, the local
    /// file is kept (it is complete) and the error is returned.
    pub async fn process(
        &self,
        pages: Vec<RawPage>,
        coordinate: &Coordinate,
    ) -> Result<PublishedImage, ImagePipelineError> {
        let total_start = Instant::now();
        let tracker = Arc::new(StageTracker::new(
            coordinate.to_string(),
            self.config.progress_callback.clone(),
        ));

        let result = self.run(pages, coordinate, &tracker, total_start).await;
        match &result {
            Ok(published) => {
                tracker.advance(PipelineStage::Done);
                tracker.complete(published);
                info!(
                    "Published {} ({}x{}, {} bytes) in {}ms",
                    published.remote_key,
                    published.width,
                    published.height,
                    published.compressed_bytes,
                    published.stats.total_duration_ms
                );
            }
            Err(e) => tracker.fail(e),
        }
        result
    }

    /// Run through `Compressed` and stop; nothing is uploaded.
    pub async fn prepare(
        &self,
        pages: Vec<RawPage>,
        coordinate: &Coordinate,
    ) -> Result<PreparedImage, ImagePipelineError> {
        let total_start = Instant::now();
        let tracker = Arc::new(StageTracker::new(
            coordinate.to_string(),
            self.config.progress_callback.clone(),
        ));

        let result = self.prepare_tracked(pages, coordinate, &tracker).await;
        match result {
            Ok(mut prepared) => {
                prepared.stats.total_duration_ms = elapsed_ms(total_start);
                Ok(prepared)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    /// Run many independent jobs, at most `concurrency` at a time.
    ///
    /// Outcomes come back in job order. One job failing does not affect the
    /// others.
    pub async fn process_batch(&self, jobs: Vec<ImageJob>, concurrency: usize) -> Vec<JobOutcome> {
        let concurrency = concurrency.max(1);
        debug!("Processing {} jobs, concurrency {}", jobs.len(), concurrency);

        stream::iter(jobs.into_iter().map(|job| {
            let pipeline = self.clone();
            async move {
                let result = pipeline.process(job.pages, &job.coordinate).await;
                JobOutcome {
                    coordinate: job.coordinate,
                    result,
                }
            }
        }))
        .buffered(concurrency)
        .collect()
        .await
    }

    /// [`process_batch`](Self::process_batch) for jobs whose pages are on disk.
    ///
    /// Each job reads its own files when it starts, so an unreadable file
    /// fails only that job (as [`ImagePipelineError::ReadInput`]) and the
    /// rest of the batch still runs.
    pub async fn process_file_batch(
        &self,
        jobs: Vec<FileJob>,
        concurrency: usize,
    ) -> Vec<JobOutcome> {
        let concurrency = concurrency.max(1);
        debug!("Processing {} file jobs, concurrency {}", jobs.len(), concurrency);

        stream::iter(jobs.into_iter().map(|job| {
            let pipeline = self.clone();
            async move {
                let result = match read_pages(&job.files).await {
                    Ok(pages) => pipeline.process(pages, &job.coordinate).await,
                    Err(e) => {
                        StageTracker::new(
                            job.coordinate.to_string(),
                            pipeline.config.progress_callback.clone(),
                        )
                        .fail(&e);
                        Err(e)
                    }
                };
                JobOutcome {
                    coordinate: job.coordinate,
                    result,
                }
            }
        }))
        .buffered(concurrency)
        .collect()
        .await
    }

    /// Blocking wrapper around [`process`](Self::process).
    ///
    /// Creates a temporary tokio runtime; do not call from async code.
    pub fn process_sync(
        &self,
        pages: Vec<RawPage>,
        coordinate: &Coordinate,
    ) -> Result<PublishedImage, ImagePipelineError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| ImagePipelineError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.process(pages, coordinate))
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    async fn run(
        &self,
        pages: Vec<RawPage>,
        coordinate: &Coordinate,
        tracker: &Arc<StageTracker>,
        total_start: Instant,
    ) -> Result<PublishedImage, ImagePipelineError> {
        let prepared = self.prepare_tracked(pages, coordinate, tracker).await?;

        let upload_start = Instant::now();
        let receipt = publish(
            Arc::clone(&self.store),
            prepared.local_path.clone(),
            self.bucket.clone(),
            prepared.remote_key.clone(),
        )
        .await?;
        tracker.advance(PipelineStage::Uploaded);

        let stats = PipelineStats {
            upload_duration_ms: elapsed_ms(upload_start),
            total_duration_ms: elapsed_ms(total_start),
            ..prepared.stats
        };

        Ok(PublishedImage {
            remote_key: receipt.key,
            bucket: receipt.bucket,
            local_path: prepared.local_path,
            width: prepared.width,
            height: prepared.height,
            page_count: prepared.page_count,
            compressed_bytes: receipt.size,
            e_tag: receipt.e_tag,
            stats,
        })
    }

    async fn prepare_tracked(
        &self,
        pages: Vec<RawPage>,
        coordinate: &Coordinate,
        tracker: &Arc<StageTracker>,
    ) -> Result<PreparedImage, ImagePipelineError> {
        tracker.advance(PipelineStage::Received);
        let ArtifactPaths {
            local_path,
            remote_key,
        } = self.paths(coordinate)?;
        debug!(
            "{}: {} page(s) → {}",
            coordinate,
            pages.len(),
            local_path.display()
        );

        let options = NormalizeOptions {
            border_px: self.config.border_px,
            background: self.config.background_rgb(),
        };
        let quantizer = Arc::clone(&self.quantizer);
        let worker_tracker = Arc::clone(tracker);
        let destination = local_path.clone();

        let work = tokio::task::spawn_blocking(move || {
            let page_count = pages.len();

            let normalize_start = Instant::now();
            let composite = normalize_observed(&pages, &options, &mut |stage| {
                worker_tracker.advance(stage)
            })?;
            let normalize_duration_ms = elapsed_ms(normalize_start);

            let compress_start = Instant::now();
            let artifact = compress_and_store(&composite, &destination, quantizer.as_ref())?;
            worker_tracker.advance(PipelineStage::Compressed);

            Ok::<_, ImagePipelineError>(PreparedImage {
                local_path: artifact.path,
                remote_key,
                width: composite.width(),
                height: composite.height(),
                page_count,
                source_bytes: artifact.source_bytes,
                compressed_bytes: artifact.compressed_bytes,
                stats: PipelineStats {
                    normalize_duration_ms,
                    compress_duration_ms: elapsed_ms(compress_start),
                    ..PipelineStats::default()
                },
            })
        });

        work.await
            .map_err(|e| ImagePipelineError::Internal(format!("image worker failed: {e}")))?
    }
}

/// `pngquant` as located on this machine, else the bare program name.
pub fn default_quantizer() -> PngquantQuantizer {
    PngquantQuantizer::locate().unwrap_or_else(|e| {
        warn!("{e}; falling back to 'pngquant' on PATH");
        PngquantQuantizer::new("pngquant")
    })
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Remembers the last stage entered so a failure can be attributed to it.
struct StageTracker {
    job: String,
    callback: Option<ProgressCallback>,
    current: Mutex<PipelineStage>,
}

impl StageTracker {
    fn new(job: String, callback: Option<ProgressCallback>) -> Self {
        Self {
            job,
            callback,
            current: Mutex::new(PipelineStage::Received),
        }
    }

    fn advance(&self, stage: PipelineStage) {
        if let Ok(mut current) = self.current.lock() {
            *current = stage;
        }
        debug!("{}: {}", self.job, stage);
        if let Some(ref cb) = self.callback {
            cb.on_stage(&self.job, stage);
        }
    }

    fn last(&self) -> PipelineStage {
        self.current
            .lock()
            .map(|s| *s)
            .unwrap_or(PipelineStage::Received)
    }

    fn fail(&self, error: &ImagePipelineError) {
        let last = self.last();
        warn!("{}: failed after {}: {}", self.job, last, error);
        if let Some(ref cb) = self.callback {
            cb.on_failed(&self.job, last, error);
        }
    }

    fn complete(&self, output: &PublishedImage) {
        if let Some(ref cb) = self.callback {
            cb.on_complete(&self.job, output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompressionFailure;
    use std::path::Path;

    struct CopyQuantizer;

    impl Quantizer for CopyQuantizer {
        fn name(&self) -> &str {
            "copy"
        }

        fn compress(&self, src: &Path, dst: &Path) -> Result<(), CompressionFailure> {
            std::fs::copy(src, dst)
                .map(|_| ())
                .map_err(|e| CompressionFailure::ToolUnavailable {
                    program: "copy".into(),
                    source: e,
                })
        }
    }

    fn config(root: &Path) -> PipelineConfig {
        PipelineConfig::builder()
            .image_root(root)
            .processed_subdir("processed-images")
            .bucket("shsat")
            .build()
            .unwrap()
    }

    #[test]
    fn new_requires_bucket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = PipelineConfig::builder()
            .image_root(tmp.path())
            .processed_subdir("p")
            .build()
            .unwrap();
        let err = ImagePipeline::new(
            cfg,
            Arc::new(CopyQuantizer),
            Arc::new(ObjectStoreBlobStore::in_memory("shsat")),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ImagePipelineError::Config {
                name: crate::config::STORAGE_BUCKET_ENV
            }
        ));
    }

    #[test]
    fn paths_validate_coordinate() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pipeline = ImagePipeline::new(
            config(tmp.path()),
            Arc::new(CopyQuantizer),
            Arc::new(ObjectStoreBlobStore::in_memory("shsat")),
        )
        .unwrap();

        let bad = Coordinate::Item {
            year: 2022,
            form: "A/../B".into(),
            role: crate::coordinate::Role::Question,
            index: 1,
        };
        assert!(matches!(
            pipeline.paths(&bad),
            Err(ImagePipelineError::InvalidCoordinate(_))
        ));

        let ok = pipeline
            .paths(&Coordinate::passage(2022, "A", 32, 36).unwrap())
            .unwrap();
        assert_eq!(ok.remote_key, "test-images/2022/A/passage/32_36.png");
        assert!(ok
            .local_path
            .starts_with(tmp.path().join("processed-images")));
    }

    #[test]
    fn tracker_remembers_last_stage() {
        let t = StageTracker::new("job".into(), None);
        assert_eq!(t.last(), PipelineStage::Received);
        t.advance(PipelineStage::Trimmed);
        assert_eq!(t.last(), PipelineStage::Trimmed);
    }

    #[test]
    fn debug_shows_quantizer_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pipeline = ImagePipeline::new(
            config(tmp.path()),
            Arc::new(CopyQuantizer),
            Arc::new(ObjectStoreBlobStore::in_memory("shsat")),
        )
        .unwrap();
        let dbg = format!("{pipeline:?}");
        assert!(dbg.contains("copy"));
        assert!(dbg.contains("shsat"));
    }
}
