//! Input validation: make sure every page really is a PNG before any work.
//!
//! A page arrives as raw bytes plus whatever content type the uploader
//! claimed. Neither is trusted: a claimed type other than `image/png` is
//! rejected outright, the magic bytes must identify a PNG, and the PNG must
//! actually decode. Only then does the page enter the trimming stage.

use crate::error::ImagePipelineError;
use image::{ImageFormat, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::debug;

const PNG_CONTENT_TYPE: &str = "image/png";

/// One uploaded page: raw bytes and the content type the sender declared.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl RawPage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: None,
        }
    }

    /// Attach the declared content type (e.g. the multipart part header).
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a page from disk, deriving the declared type from the extension.
    pub async fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let bytes = tokio::fs::read(path).await?;
        let page = Self::new(bytes);
        Ok(match ImageFormat::from_path(path) {
            Ok(fmt) => page.with_content_type(fmt.to_mime_type()),
            Err(_) => page,
        })
    }
}

/// Read `files` in order; the first unreadable file fails the whole set.
pub async fn read_pages(files: &[PathBuf]) -> Result<Vec<RawPage>, ImagePipelineError> {
    let mut pages = Vec::with_capacity(files.len());
    for path in files {
        let page = RawPage::from_file(path)
            .await
            .map_err(|source| ImagePipelineError::ReadInput {
                path: path.clone(),
                source,
            })?;
        pages.push(page);
    }
    Ok(pages)
}

/// Decode a page, enforcing that it is a PNG.
///
/// `page` is the 1-based position used in error messages.
pub fn decode_page(page: usize, raw: &RawPage) -> Result<RgbaImage, ImagePipelineError> {
    if let Some(ref declared) = raw.content_type {
        let essence = declared.split(';').next().unwrap_or_default().trim();
        if !essence.eq_ignore_ascii_case(PNG_CONTENT_TYPE) {
            return Err(ImagePipelineError::UnsupportedFormat {
                page,
                reason: format!("declared content type is '{declared}'"),
            });
        }
    }

    match image::guess_format(&raw.bytes) {
        Ok(ImageFormat::Png) => {}
        Ok(other) => {
            return Err(ImagePipelineError::UnsupportedFormat {
                page,
                reason: format!("detected {other:?} data"),
            })
        }
        Err(_) => {
            return Err(ImagePipelineError::UnsupportedFormat {
                page,
                reason: "unrecognised image data".into(),
            })
        }
    }

    let decoded = image::load_from_memory_with_format(&raw.bytes, ImageFormat::Png).map_err(
        |e| ImagePipelineError::UnsupportedFormat {
            page,
            reason: format!("PNG failed to decode: {e}"),
        },
    )?;

    debug!(
        "Decoded page {} → {}x{} px ({:?})",
        page,
        decoded.width(),
        decoded.height(),
        decoded.color()
    );
    Ok(decoded.into_rgba8())
}
