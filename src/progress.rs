//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe
//! each run move through the state machine:
//!
//! ```text
//! Received → Validated → Trimmed → Composed → Compressed → Uploaded → Done
//!     └──────────┴──────────┴──────────┴───────────┴───────────┴──▶ Failed
//! ```
//!
//! The CPU-bound stages run on a blocking worker thread and the upload runs
//! on its own task, so callbacks arrive from several threads. The trait is
//! `Send + Sync`; implementations guard shared state themselves.
//!
//! # Example
//!
//! ```rust
//! use shsat_images::{PipelineConfig, PipelineProgressCallback, PipelineStage};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Recorder {
//!     seen: Mutex<Vec<PipelineStage>>,
//! }
//!
//! impl PipelineProgressCallback for Recorder {
//!     fn on_stage(&self, _job: &str, stage: PipelineStage) {
//!         self.seen.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Recorder::default()))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ImagePipelineError;
use crate::output::PublishedImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// States of a single pipeline run, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Received,
    Validated,
    Trimmed,
    Composed,
    Compressed,
    Uploaded,
    Done,
}

impl PipelineStage {
    /// The stage entered after this one on success, or `None` for `Done`.
    pub fn next(self) -> Option<PipelineStage> {
        use PipelineStage::*;
        match self {
            Received => Some(Validated),
            Validated => Some(Trimmed),
            Trimmed => Some(Composed),
            Composed => Some(Compressed),
            Compressed => Some(Uploaded),
            Uploaded => Some(Done),
            Done => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Received => "received",
            PipelineStage::Validated => "validated",
            PipelineStage::Trimmed => "trimmed",
            PipelineStage::Composed => "composed",
            PipelineStage::Compressed => "compressed",
            PipelineStage::Uploaded => "uploaded",
            PipelineStage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Called by the pipeline as a run changes state.
///
/// `job` is the display form of the run's coordinate, so one callback can
/// follow several concurrent runs. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// The run has entered `stage`.
    fn on_stage(&self, job: &str, stage: PipelineStage) {
        let _ = (job, stage);
    }

    /// The run failed while trying to leave `last_stage`; nothing further runs.
    fn on_failed(&self, job: &str, last_stage: PipelineStage, error: &ImagePipelineError) {
        let _ = (job, last_stage, error);
    }

    /// The run reached `Done`.
    fn on_complete(&self, job: &str, output: &PublishedImage) {
        let _ = (job, output);
    }
}

/// Convenience alias.
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

/// No-op implementation used when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_chain_to_done() {
        let mut stage = PipelineStage::Received;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            visited.push(next);
            stage = next;
        }
        assert_eq!(visited.len(), 7);
        assert_eq!(stage, PipelineStage::Done);
    }

    #[test]
    fn noop_callback_compiles_as_trait_object() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage("2022 form A question 1", PipelineStage::Received);
    }
}
