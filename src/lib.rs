//! # shsat-images
//!
//! Publish scanned test pages (questions, answers, reading passages) as one
//! canonical, compressed PNG in blob storage under a deterministic key.
//!
//! ## Pipeline Overview
//!
//! ```text
//! pages + coordinate
//!  │
//!  ├─ 1. Keys       coordinate → local path + remote key (pure)
//!  ├─ 2. Validate   every page must decode as PNG
//!  ├─ 3. Trim       crop each page to its non-white bounding box
//!  ├─ 4. Compose    16 px border, pages stacked and centered
//!  ├─ 5. Compress   pngquant via temp files (spawn_blocking)
//!  └─ 6. Upload     object store put on its own task → remote key
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shsat_images::{Coordinate, ImagePipeline, PipelineConfig, RawPage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // IMAGE_ROOT, PROCESSED_SUBDIR and STORAGE_BUCKET from the environment
//!     let config = PipelineConfig::from_env().build()?;
//!     let pipeline = ImagePipeline::from_config(config)?;
//!
//!     let page = RawPage::from_file(std::path::Path::new("scan-1.png")).await?;
//!     let coordinate = Coordinate::question(2022, "A", 55)?;
//!     let published = pipeline.process(vec![page], &coordinate).await?;
//!     println!("{}", published.remote_key); // test-images/2022/A/question/55.png
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `shsat-images` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the library in a service:
//! ```toml
//! shsat-images = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod coordinate;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use coordinate::{Coordinate, Role};
pub use error::{CompressionFailure, ErrorClass, ImagePipelineError, UploadFailure};
pub use output::{JobOutcome, JobReport, PipelineStats, PreparedImage, PublishedImage};
pub use pipeline::compress::{PngquantQuantizer, Quantizer};
pub use pipeline::input::RawPage;
pub use pipeline::keys::{ArtifactPaths, StorageLayout};
pub use pipeline::upload::{BlobStore, ObjectStoreBlobStore, UploadReceipt};
pub use process::{FileJob, ImageJob, ImagePipeline};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, PipelineStage, ProgressCallback};
