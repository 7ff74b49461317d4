//! External media toolkit seam
//!
//! Filter-graph rendering, final encoding and probing are delegated to an
//! external toolkit. Production uses [`super::ffmpeg::FfmpegToolkit`];
//! tests substitute a fake.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tonedesk_common::session::AudioMetadata;

use crate::chain::ConversionTarget;

#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("unreadable probe output: {0}")]
    Probe(String),
}

/// Everything the final encode needs
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// File whose tags are copied into the output
    pub metadata_source: Option<PathBuf>,
    pub target: ConversionTarget,
    /// Duration of `input` in seconds, when known; needed for fade-out
    pub input_duration: Option<f64>,
}

#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Read codec, container and stream properties of `path`
    async fn probe(&self, path: &Path) -> Result<AudioMetadata, ToolkitError>;

    /// Decode `input`, run it through `filters` in order and write 32-bit
    /// float WAV to `output`. An empty filter list only decodes.
    async fn render(&self, input: &Path, output: &Path, filters: &[String])
        -> Result<(), ToolkitError>;

    /// Produce the final encoded file described by `job`
    async fn encode(&self, job: &EncodeJob) -> Result<(), ToolkitError>;
}
