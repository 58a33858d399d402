//! Lossy compression: composite image → quantized PNG at the destination.
//!
//! The composite is written to a uniquely named temporary file, handed to a
//! [`Quantizer`] whose output goes to a staging file next to the
//! destination, and the staging file is renamed onto the destination only
//! after the quantizer reports success. Both temporaries are
//! [`tempfile::NamedTempFile`] guards, so they are deleted on every exit
//! path including panics, and a failed run never leaves a half-written
//! destination behind.
//!
//! This runs synchronously; callers on an async runtime wrap it in
//! `spawn_blocking`.

use crate::error::{CompressionFailure, ImagePipelineError};
use image::{ImageFormat, RgbaImage};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Reduces a PNG's palette to shrink it.
///
/// Implementations read `src` and write the compressed PNG to `dst`,
/// overwriting whatever is there.
pub trait Quantizer: Send + Sync {
    /// Short name for logs and error messages.
    fn name(&self) -> &str;

    fn compress(&self, src: &Path, dst: &Path) -> Result<(), CompressionFailure>;
}

/// Runs the `pngquant` executable.
///
/// Invocation contract: `<program> --force --output <dst> <src>`. The exit
/// status is the only success signal.
#[derive(Debug, Clone)]
pub struct PngquantQuantizer {
    program: PathBuf,
}

impl PngquantQuantizer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use the binary found by [`pngquant_locate::locate_pngquant`].
    pub fn locate() -> Result<Self, pngquant_locate::LocateError> {
        pngquant_locate::locate_pngquant().map(Self::new)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed for a given source/destination pair.
    pub fn arguments<'a>(&self, src: &'a Path, dst: &'a Path) -> [&'a std::ffi::OsStr; 4] {
        [
            "--force".as_ref(),
            "--output".as_ref(),
            dst.as_os_str(),
            src.as_os_str(),
        ]
    }
}

impl Quantizer for PngquantQuantizer {
    fn name(&self) -> &str {
        "pngquant"
    }

    fn compress(&self, src: &Path, dst: &Path) -> Result<(), CompressionFailure> {
        let program = self.program.display().to_string();
        debug!("Running {} {:?}", program, self.arguments(src, dst));

        let output = Command::new(&self.program)
            .args(self.arguments(src, dst))
            .output()
            .map_err(|e| CompressionFailure::ToolUnavailable {
                program: program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(CompressionFailure::ToolFailed {
                program,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// A compressed file now present at its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedArtifact {
    pub path: PathBuf,
    /// Size before quantization (the lossless PNG encoding).
    pub source_bytes: u64,
    pub compressed_bytes: u64,
}

/// Encode `image`, quantize it, and atomically place the result at `destination`.
///
/// Missing parent directories are created. On error `destination` is left as
/// it was and no temporary file survives.
pub fn compress_and_store(
    image: &RgbaImage,
    destination: &Path,
    quantizer: &dyn Quantizer,
) -> Result<CompressedArtifact, ImagePipelineError> {
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| local_write(&parent, e))?;

    // Lossless source for the quantizer.
    let mut source = tempfile::Builder::new()
        .prefix("shsat-src-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| local_write(&std::env::temp_dir(), e))?;
    encode_png(image, &mut source)
        .and_then(|()| source.flush())
        .map_err(|e| local_write(source.path(), e))?;
    let source_bytes = file_len(source.path());

    // Staging output on the destination's filesystem so the final rename is atomic.
    let staged = tempfile::Builder::new()
        .prefix(".shsat-")
        .suffix(".png.tmp")
        .tempfile_in(&parent)
        .map_err(|e| local_write(&parent, e))?;

    quantizer
        .compress(source.path(), staged.path())
        .map_err(|e| compression(destination, e))?;

    let compressed_bytes = file_len(staged.path());
    if compressed_bytes == 0 {
        return Err(compression(
            destination,
            CompressionFailure::MissingOutput {
                program: quantizer.name().to_string(),
            },
        ));
    }

    staged
        .persist(destination)
        .map_err(|e| local_write(destination, e.error))?;

    info!(
        "Compressed {} → {} bytes with {} → {}",
        source_bytes,
        compressed_bytes,
        quantizer.name(),
        destination.display()
    );

    Ok(CompressedArtifact {
        path: destination.to_path_buf(),
        source_bytes,
        compressed_bytes,
    })
}

fn encode_png(image: &RgbaImage, writer: &mut impl Write) -> std::io::Result<()> {
    let mut buf = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(std::io::Error::other)?;
    writer.write_all(&buf)
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn local_write(path: &Path, source: std::io::Error) -> ImagePipelineError {
    ImagePipelineError::LocalWrite {
        path: path.to_path_buf(),
        source,
    }
}

fn compression(destination: &Path, source: CompressionFailure) -> ImagePipelineError {
    ImagePipelineError::Compression {
        destination: destination.to_path_buf(),
        source,
    }
}
