//! Configuration types for the image publishing pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built
//! via its [`PipelineConfigBuilder`] or read from the environment with
//! [`PipelineConfig::from_env`]. The storage locations (`IMAGE_ROOT`,
//! `PROCESSED_SUBDIR`, `STORAGE_BUCKET`) are optional at build time so a
//! config can be assembled piecemeal, and are checked when an
//! [`crate::ImagePipeline`] is constructed, i.e. once at startup rather
//! than on every request.

use crate::error::ImagePipelineError;
use crate::progress::PipelineProgressCallback;
use image::{Rgb, Rgba};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Local base directory for images.
pub const IMAGE_ROOT_ENV: &str = "IMAGE_ROOT";
/// Subdirectory of the image root that receives processed images.
pub const PROCESSED_SUBDIR_ENV: &str = "PROCESSED_SUBDIR";
/// Remote bucket receiving published images.
pub const STORAGE_BUCKET_ENV: &str = "STORAGE_BUCKET";
/// Optional override of [`DEFAULT_KEY_PREFIX`].
pub const STORAGE_KEY_PREFIX_ENV: &str = "STORAGE_KEY_PREFIX";

/// Prefix of every remote key.
pub const DEFAULT_KEY_PREFIX: &str = "test-images";
/// Border added around each trimmed page, in pixels.
pub const DEFAULT_BORDER_PX: u32 = 16;
/// Upper bound on the border; larger values are almost certainly typos.
pub const MAX_BORDER_PX: u32 = 1024;

/// Configuration for the image pipeline.
///
/// # Example
/// ```rust
/// use shsat_images::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .image_root("/srv/shsat/images")
///     .processed_subdir("processed-images")
///     .bucket("shsat-images")
///     .build()
///     .unwrap();
/// assert_eq!(config.border_px, 16);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Local base directory (`IMAGE_ROOT`). A leading `~` is expanded.
    pub image_root: Option<PathBuf>,

    /// Subdirectory under the root for processed output (`PROCESSED_SUBDIR`).
    pub processed_subdir: Option<String>,

    /// Remote bucket (`STORAGE_BUCKET`).
    pub bucket: Option<String>,

    /// Prefix prepended to every remote key. Default: `test-images`.
    pub key_prefix: String,

    /// Border added on every side of each trimmed page. Default: 16.
    pub border_px: u32,

    /// Colour treated as empty margin when trimming, and used to fill
    /// borders and gutters. Default: white.
    pub background: [u8; 3],

    /// Stage event sink.
    pub progress_callback: Option<Arc<dyn PipelineProgressCallback>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_root: None,
            processed_subdir: None,
            bucket: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            border_px: DEFAULT_BORDER_PX,
            background: [255, 255, 255],
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("image_root", &self.image_root)
            .field("processed_subdir", &self.processed_subdir)
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.key_prefix)
            .field("border_px", &self.border_px)
            .field("background", &self.background)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builder pre-populated from `IMAGE_ROOT`, `PROCESSED_SUBDIR`,
    /// `STORAGE_BUCKET` and `STORAGE_KEY_PREFIX`. Unset or empty variables
    /// are left as defaults.
    pub fn from_env() -> PipelineConfigBuilder {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PipelineConfigBuilder {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut builder = Self::builder();
        if let Some(root) = get(IMAGE_ROOT_ENV) {
            builder = builder.image_root(root);
        }
        if let Some(sub) = get(PROCESSED_SUBDIR_ENV) {
            builder = builder.processed_subdir(sub);
        }
        if let Some(bucket) = get(STORAGE_BUCKET_ENV) {
            builder = builder.bucket(bucket);
        }
        if let Some(prefix) = get(STORAGE_KEY_PREFIX_ENV) {
            builder = builder.key_prefix(prefix);
        }
        builder
    }

    /// The configured bucket, or `ConfigError` naming `STORAGE_BUCKET`.
    pub fn require_bucket(&self) -> Result<&str, ImagePipelineError> {
        self.bucket
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or(ImagePipelineError::Config {
                name: STORAGE_BUCKET_ENV,
            })
    }

    pub fn background_rgb(&self) -> Rgb<u8> {
        Rgb(self.background)
    }

    pub fn background_rgba(&self) -> Rgba<u8> {
        let [r, g, b] = self.background;
        Rgba([r, g, b, 255])
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn image_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.image_root = Some(root.into());
        self
    }

    pub fn processed_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.config.processed_subdir = Some(subdir.into());
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.bucket = Some(bucket.into());
        self
    }

    /// Surrounding slashes are stripped: `"/test-images/"` → `"test-images"`.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    pub fn border_px(mut self, px: u32) -> Self {
        self.config.border_px = px;
        self
    }

    pub fn background(mut self, rgb: [u8; 3]) -> Self {
        self.config.background = rgb;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn PipelineProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ImagePipelineError> {
        let c = &self.config;
        if c.border_px > MAX_BORDER_PX {
            return Err(ImagePipelineError::InvalidConfig(format!(
                "border must be 0–{MAX_BORDER_PX} px, got {}",
                c.border_px
            )));
        }
        if let Some(ref sub) = c.processed_subdir {
            if sub.contains("..") {
                return Err(ImagePipelineError::InvalidConfig(format!(
                    "{PROCESSED_SUBDIR_ENV} must stay inside {IMAGE_ROOT_ENV}, got '{sub}'"
                )));
            }
        }
        if let Some(ref bucket) = c.bucket {
            if bucket.contains('/') {
                return Err(ImagePipelineError::InvalidConfig(format!(
                    "bucket name '{bucket}' must not contain '/'"
                )));
            }
        }
        Ok(self.config)
    }
}
