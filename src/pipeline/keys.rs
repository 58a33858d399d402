//! Path and key derivation: [`Coordinate`] → local file path + remote key.
//!
//! Both outputs share one relative layout:
//!
//! ```text
//! item     {year}/{form}/{role}/{index}.png        2022/A/question/55.png
//! passage  {year}/{form}/passage/{first}_{last}.png 2022/A/passage/32_36.png
//! ```
//!
//! The local path hangs it under `<IMAGE_ROOT>/<PROCESSED_SUBDIR>/`, the
//! remote key under the configured prefix. Everything here is pure string
//! and path manipulation; nothing touches the filesystem.

use crate::config::{PipelineConfig, IMAGE_ROOT_ENV, PROCESSED_SUBDIR_ENV};
use crate::coordinate::Coordinate;
use crate::error::ImagePipelineError;
use std::path::{Path, PathBuf};

/// Where a coordinate's artifact lives locally and remotely.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ArtifactPaths {
    pub local_path: PathBuf,
    pub remote_key: String,
}

/// Resolved storage roots, validated once at startup.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    processed_root: PathBuf,
    key_prefix: String,
}

impl StorageLayout {
    /// Build the layout from explicit values.
    ///
    /// Fails with [`ImagePipelineError::Config`] when either root is missing
    /// or empty.
    pub fn new(
        image_root: Option<&Path>,
        processed_subdir: Option<&str>,
        key_prefix: &str,
    ) -> Result<Self, ImagePipelineError> {
        let image_root = image_root
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ImagePipelineError::Config {
                name: IMAGE_ROOT_ENV,
            })?;
        let processed_subdir = processed_subdir
            .filter(|s| !s.is_empty())
            .ok_or(ImagePipelineError::Config {
                name: PROCESSED_SUBDIR_ENV,
            })?;

        Ok(Self {
            processed_root: expand_home(image_root).join(processed_subdir),
            key_prefix: key_prefix.trim_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ImagePipelineError> {
        Self::new(
            config.image_root.as_deref(),
            config.processed_subdir.as_deref(),
            &config.key_prefix,
        )
    }

    /// `<IMAGE_ROOT>/<PROCESSED_SUBDIR>` after `~` expansion.
    pub fn processed_root(&self) -> &Path {
        &self.processed_root
    }

    /// Filesystem path of the compressed artifact for `coord`.
    pub fn local_path(&self, coord: &Coordinate) -> PathBuf {
        relative_segments(coord)
            .iter()
            .fold(self.processed_root.clone(), |path, seg| path.join(seg))
    }

    /// Blob-store key of the published artifact for `coord`.
    pub fn remote_key(&self, coord: &Coordinate) -> String {
        let relative = relative_segments(coord).join("/");
        if self.key_prefix.is_empty() {
            relative
        } else {
            format!("{}/{}", self.key_prefix, relative)
        }
    }

    pub fn paths(&self, coord: &Coordinate) -> ArtifactPaths {
        ArtifactPaths {
            local_path: self.local_path(coord),
            remote_key: self.remote_key(coord),
        }
    }
}

/// Relative path shared by the local and remote layouts.
pub fn relative_path(coord: &Coordinate) -> PathBuf {
    relative_segments(coord).iter().collect()
}

fn relative_segments(coord: &Coordinate) -> [String; 4] {
    match coord {
        Coordinate::Item {
            year,
            form,
            role,
            index,
        } => [
            year.to_string(),
            form.clone(),
            role.as_str().to_string(),
            format!("{index}.png"),
        ],
        Coordinate::Passage {
            year,
            form,
            first_index,
            last_index,
        } => [
            year.to_string(),
            form.clone(),
            "passage".to_string(),
            format!("{first_index}_{last_index}.png"),
        ],
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
