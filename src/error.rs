//! Error types for the shsat-images library.
//!
//! One terminal error type, [`ImagePipelineError`], is returned by every
//! pipeline entry point. Two nested types carry the detail of the two
//! infrastructure boundaries:
//!
//! * [`CompressionFailure`]: what went wrong talking to the external
//!   quantizer (binary missing, non-zero exit, no output written).
//! * [`UploadFailure`]: what went wrong talking to the blob store.
//!
//! Every variant classifies itself via [`ImagePipelineError::class`] so the
//! HTTP layer in front of the pipeline can map caller mistakes to 4xx and
//! infrastructure trouble to 5xx without string matching.

use std::path::PathBuf;
use thiserror::Error;

/// Who is at fault for a failed pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// A required setting is missing; the service should not have started.
    Configuration,
    /// The caller sent something the pipeline cannot process.
    Client,
    /// The local filesystem, quantizer or blob store failed.
    Infrastructure,
}

/// All errors returned by the shsat-images library.
#[derive(Debug, Error)]
pub enum ImagePipelineError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// A required configuration value is unset or empty.
    #[error("Missing configuration: {name} is not set\nExport {name} or pass it on the command line.")]
    Config { name: &'static str },

    /// A configuration value is present but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Caller input errors ───────────────────────────────────────────────
    /// The test coordinate violates an invariant (zero index, bad form, …).
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// No page images were supplied.
    #[error("No page images supplied; at least one PNG is required")]
    NoPages,

    /// A page file could not be read from disk.
    #[error("Failed to read page '{path}': {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A page is not a decodable PNG.
    #[error("Page {page} is not a PNG image: {reason}\nAll files must be in PNG format.")]
    UnsupportedFormat { page: usize, reason: String },

    /// A page contains nothing but background, so there is nothing to trim to.
    #[error("{} contains only background pixels; unable to trim border", describe_page(.page))]
    EmptyContent { page: Option<usize> },

    // ── Infrastructure errors ─────────────────────────────────────────────
    /// Lossy compression of the composed image failed.
    #[error("Compression to '{destination}' failed: {source}")]
    Compression {
        destination: PathBuf,
        #[source]
        source: CompressionFailure,
    },

    /// Could not create directories or write temporary files locally.
    #[error("Failed to write '{path}': {source}")]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The upload to the blob store failed.
    #[error("Upload to '{bucket}/{key}' failed: {source}")]
    Upload {
        bucket: String,
        key: String,
        #[source]
        source: UploadFailure,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (worker task panicked, runtime unavailable).
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_page(page: &Option<usize>) -> String {
    match page {
        Some(n) => format!("Page {n}"),
        None => "Image".to_string(),
    }
}

impl ImagePipelineError {
    /// Fault classification used to pick a response status.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config { .. } | Self::InvalidConfig(_) => ErrorClass::Configuration,
            Self::InvalidCoordinate(_)
            | Self::NoPages
            | Self::ReadInput { .. }
            | Self::UnsupportedFormat { .. }
            | Self::EmptyContent { .. } => ErrorClass::Client,
            Self::Compression { .. }
            | Self::LocalWrite { .. }
            | Self::Upload { .. }
            | Self::Internal(_) => ErrorClass::Infrastructure,
        }
    }

    /// HTTP status a web front-end should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidCoordinate(_) | Self::NoPages | Self::ReadInput { .. } => 400,
            Self::UnsupportedFormat { .. } => 415,
            Self::EmptyContent { .. } => 422,
            Self::Upload { .. } => 502,
            Self::Config { .. }
            | Self::InvalidConfig(_)
            | Self::Compression { .. }
            | Self::LocalWrite { .. }
            | Self::Internal(_) => 500,
        }
    }

    /// `true` when the caller, not the service, caused the failure.
    pub fn is_client_fault(&self) -> bool {
        self.class() == ErrorClass::Client
    }
}

/// Why the external quantizer step failed.
#[derive(Debug, Error)]
pub enum CompressionFailure {
    /// The quantizer program could not be started at all.
    #[error("could not run '{program}': {source}")]
    ToolUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The quantizer ran but reported failure through its exit status.
    #[error("'{program}' exited with {}: {stderr}", describe_status(.status))]
    ToolFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The quantizer reported success but left no usable output file.
    #[error("'{program}' produced no output")]
    MissingOutput { program: String },
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Why an upload to the blob store failed.
#[derive(Debug, Error)]
pub enum UploadFailure {
    /// The local artifact could not be read.
    #[error("cannot read local file '{path}': {source}")]
    ReadLocal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The key is not a valid object path.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// The store handle serves a different bucket than the one requested.
    #[error("store is bound to bucket '{bound}', not '{requested}'")]
    BucketMismatch { bound: String, requested: String },

    /// The remote store rejected the request or the connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upload task panicked or was aborted.
    #[error("upload task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_variable() {
        let e = ImagePipelineError::Config { name: "STORAGE_BUCKET" };
        assert!(e.to_string().contains("STORAGE_BUCKET"));
        assert_eq!(e.class(), ErrorClass::Configuration);
    }

    #[test]
    fn empty_content_display_with_and_without_page() {
        let with = ImagePipelineError::EmptyContent { page: Some(2) };
        assert!(with.to_string().starts_with("Page 2"), "got: {with}");
        let without = ImagePipelineError::EmptyContent { page: None };
        assert!(without.to_string().starts_with("Image"), "got: {without}");
    }

    #[test]
    fn caller_errors_are_client_faults() {
        let e = ImagePipelineError::UnsupportedFormat {
            page: 1,
            reason: "detected Jpeg".into(),
        };
        assert!(e.is_client_fault());
        assert_eq!(e.status_code(), 415);
        assert_eq!(ImagePipelineError::NoPages.status_code(), 400);
        assert_eq!(
            ImagePipelineError::EmptyContent { page: Some(1) }.status_code(),
            422
        );
    }

    #[test]
    fn unreadable_page_is_client_fault() {
        let e = ImagePipelineError::ReadInput {
            path: PathBuf::from("scans/missing.png"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(e.is_client_fault());
        assert_eq!(e.status_code(), 400);
        assert!(e.to_string().contains("scans/missing.png"));
    }

    #[test]
    fn infrastructure_errors_map_to_5xx() {
        let compression = ImagePipelineError::Compression {
            destination: PathBuf::from("/tmp/out.png"),
            source: CompressionFailure::ToolFailed {
                program: "pngquant".into(),
                status: Some(99),
                stderr: String::new(),
            },
        };
        assert_eq!(compression.class(), ErrorClass::Infrastructure);
        assert_eq!(compression.status_code(), 500);
        assert!(compression.to_string().contains("status 99"));

        let upload = ImagePipelineError::Upload {
            bucket: "b".into(),
            key: "k".into(),
            source: UploadFailure::Transport("connection reset".into()),
        };
        assert_eq!(upload.status_code(), 502);
        assert!(!upload.is_client_fault());
    }

    #[test]
    fn signal_termination_display() {
        let f = CompressionFailure::ToolFailed {
            program: "pngquant".into(),
            status: None,
            stderr: "killed".into(),
        };
        assert!(f.to_string().contains("signal"));
    }
}
