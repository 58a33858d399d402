//! Result types returned by the pipeline.

use crate::coordinate::Coordinate;
use crate::error::ImagePipelineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A run that reached `Done`: the artifact exists locally and remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedImage {
    /// Blob-store key; this is what the caller persists.
    pub remote_key: String,
    pub bucket: String,
    pub local_path: PathBuf,

    /// Dimensions of the composite before quantization.
    pub width: u32,
    pub height: u32,
    pub page_count: usize,

    /// Size of the uploaded file.
    pub compressed_bytes: u64,

    /// Entity tag reported by the store, when it reports one.
    pub e_tag: Option<String>,

    pub stats: PipelineStats,
}

/// A run stopped after `Compressed`: the artifact exists only locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedImage {
    pub local_path: PathBuf,
    /// Key the artifact would be published under.
    pub remote_key: String,
    pub width: u32,
    pub height: u32,
    pub page_count: usize,
    /// Lossless PNG size before quantization.
    pub source_bytes: u64,
    pub compressed_bytes: u64,
    pub stats: PipelineStats,
}

/// Wall-clock timings of one run, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Decode + trim + pad + compose.
    pub normalize_duration_ms: u64,
    pub compress_duration_ms: u64,
    /// Zero for runs that were never uploaded.
    pub upload_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Outcome of one job in [`crate::ImagePipeline::process_batch`].
#[derive(Debug)]
pub struct JobOutcome {
    pub coordinate: Coordinate,
    pub result: Result<PublishedImage, ImagePipelineError>,
}

impl JobOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Serialisable summary of a [`JobOutcome`], for `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub coordinate: Coordinate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl From<&JobOutcome> for JobReport {
    fn from(outcome: &JobOutcome) -> Self {
        match &outcome.result {
            Ok(published) => Self {
                coordinate: outcome.coordinate.clone(),
                published: Some(published.clone()),
                error: None,
                status: None,
            },
            Err(e) => Self {
                coordinate: outcome.coordinate.clone(),
                published: None,
                error: Some(e.to_string()),
                status: Some(e.status_code()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_outcome_reports_status() {
        let outcome = JobOutcome {
            coordinate: Coordinate::question(2022, "A", 1).unwrap(),
            result: Err(ImagePipelineError::NoPages),
        };
        let report = JobReport::from(&outcome);
        assert_eq!(report.status, Some(400));
        assert!(report.published.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("published").is_none());
        assert_eq!(json["coordinate"]["kind"], "item");
    }
}
