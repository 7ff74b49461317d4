//! Audio Processing Engine
//!
//! Executes a stage list produced by [`crate::chain::build_chain`] against a
//! source file. Each stage reads the previous stage's output and writes a new
//! file into a per-run scratch directory; the final encoded file is moved into
//! the work directory and the scratch directory is removed on every exit path.
//!
//! EQ and effects are rendered by the [`MediaToolkit`]; spatialization and
//! loudness normalization run on decoded PCM in a blocking task.

pub mod ffmpeg;
pub mod filters;
pub mod loudness;
pub mod pcm;
pub mod spatial;
pub mod toolkit;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tonedesk_common::session::AudioMetadata;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::Stage;
use crate::error::ValidationError;

use self::filters::{effect_filter_expr, eq_filters_for_rate};
use self::pcm::PcmBuffer;
use self::toolkit::{EncodeJob, MediaToolkit, ToolkitError};

pub use self::ffmpeg::FfmpegToolkit;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] ValidationError),

    #[error("{stage} stage failed: {source}")]
    Toolkit {
        stage: &'static str,
        #[source]
        source: ToolkitError,
    },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("processing exceeded {0:?}")]
    Timeout(Duration),

    #[error("processing cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stage list must end with a conversion")]
    EmptyChain,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedAudio {
    pub path: PathBuf,
    pub metadata: AudioMetadata,
}

/// Hook called before each stage of a run
///
/// Runs before the cancellation check, so an observer that cancels the run
/// stops it at that boundary.
#[async_trait]
pub trait StageObserver: Send + Sync {
    async fn before_stage(&self, index: usize, stage: &'static str);
}

/// Observer that does nothing
pub struct NoObserver;

#[async_trait]
impl StageObserver for NoObserver {
    async fn before_stage(&self, _index: usize, _stage: &'static str) {}
}

/// Scratch directory removed when dropped
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(parent: &Path) -> Result<Self, EngineError> {
        let path = parent.join(format!(".run-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn file(&self, index: usize, extension: &str) -> PathBuf {
        self.path.join(format!("stage{}.{}", index, extension))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    }
}

pub struct AudioEngine {
    toolkit: Arc<dyn MediaToolkit>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl AudioEngine {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            toolkit,
            work_dir: work_dir.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Read the properties of an audio file
    pub async fn probe(&self, path: &Path) -> Result<AudioMetadata, EngineError> {
        self.toolkit
            .probe(path)
            .await
            .map_err(|source| EngineError::Toolkit {
                stage: "probe",
                source,
            })
    }

    /// Run `stages` over `source`
    ///
    /// `cancel` is observed at stage boundaries: a stage already running is
    /// allowed to finish, then the run stops with [`EngineError::Cancelled`].
    /// Exceeding the timeout drops the run (and any child process) with
    /// [`EngineError::Timeout`]. No output file is left behind on failure.
    pub async fn execute(
        &self,
        source: &Path,
        stages: &[Stage],
        cancel: &CancellationToken,
    ) -> Result<ProcessedAudio, EngineError> {
        self.execute_observed(source, stages, cancel, &NoObserver).await
    }

    /// [`execute`](Self::execute) with `observer` told about every stage
    /// boundary
    pub async fn execute_observed(
        &self,
        source: &Path,
        stages: &[Stage],
        cancel: &CancellationToken,
        observer: &dyn StageObserver,
    ) -> Result<ProcessedAudio, EngineError> {
        if !matches!(stages.last(), Some(Stage::Convert(_))) {
            return Err(EngineError::EmptyChain);
        }

        let started = Instant::now();
        let run = self.run_stages(source, stages, cancel, observer);
        let outcome = tokio::time::timeout(self.timeout, run)
            .await
            .unwrap_or_else(|_| Err(EngineError::Timeout(self.timeout)));

        match &outcome {
            Ok(output) => info!(
                source = %source.display(),
                output = %output.path.display(),
                stages = stages.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Processing complete"
            ),
            Err(e) => warn!(
                source = %source.display(),
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Processing stopped"
            ),
        }
        outcome
    }

    async fn run_stages(
        &self,
        source: &Path,
        stages: &[Stage],
        cancel: &CancellationToken,
        observer: &dyn StageObserver,
    ) -> Result<ProcessedAudio, EngineError> {
        let scratch = ScratchDir::create(&self.work_dir)?;
        let mut current = source.to_path_buf();
        let mut extension = "wav";

        for (index, stage) in stages.iter().enumerate() {
            observer.before_stage(index, stage.name()).await;
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let stage_started = Instant::now();
            debug!(stage = stage.name(), index, "Running stage");

            current = match stage {
                Stage::Equalize(bands) => {
                    let sample_rate = self
                        .probe(&current)
                        .await
                        .map(|m| m.sample_rate)
                        .unwrap_or(0);
                    let filters = eq_filters_for_rate(bands, sample_rate);
                    self.render(stage.name(), &current, scratch.file(index, "wav"), &filters)
                        .await?
                }
                Stage::Effects(effects) => {
                    let filters: Vec<String> = effects.iter().map(effect_filter_expr).collect();
                    self.render(stage.name(), &current, scratch.file(index, "wav"), &filters)
                        .await?
                }
                Stage::Spatialize(position) => {
                    let position = *position;
                    self.transform_pcm(&scratch, index, &current, move |pcm| {
                        Ok(spatial::spatialize(&pcm, position)?)
                    })
                    .await?
                }
                Stage::Normalize { target_lufs } => {
                    let target = *target_lufs;
                    self.transform_pcm(&scratch, index, &current, move |mut pcm| {
                        loudness::normalize(&mut pcm, target);
                        Ok(pcm)
                    })
                    .await?
                }
                Stage::Convert(target) => {
                    extension = target.format.extension();
                    let output = scratch.file(index, extension);
                    let input_duration = if target.fade_out > 0.0 {
                        self.probe(&current).await.ok().map(|m| m.duration_secs)
                    } else {
                        None
                    };
                    let job = EncodeJob {
                        input: current.clone(),
                        output: output.clone(),
                        metadata_source: Some(source.to_path_buf()),
                        target: *target,
                        input_duration,
                    };
                    self.toolkit
                        .encode(&job)
                        .await
                        .map_err(|source| EngineError::Toolkit {
                            stage: "convert",
                            source,
                        })?;
                    output
                }
            };

            debug!(
                stage = stage.name(),
                elapsed_ms = stage_started.elapsed().as_millis() as u64,
                "Stage finished"
            );
        }

        let metadata = self.probe(&current).await?;
        let destination = self
            .work_dir
            .join(format!("{}.{}", Uuid::new_v4(), extension));
        tokio::fs::rename(&current, &destination).await?;

        Ok(ProcessedAudio {
            path: destination,
            metadata,
        })
    }

    async fn render(
        &self,
        stage: &'static str,
        input: &Path,
        output: PathBuf,
        filters: &[String],
    ) -> Result<PathBuf, EngineError> {
        self.toolkit
            .render(input, &output, filters)
            .await
            .map_err(|source| EngineError::Toolkit { stage, source })?;
        Ok(output)
    }

    /// Decode `input`, apply `transform` off the async runtime and write the
    /// result as float WAV
    async fn transform_pcm<F>(
        &self,
        scratch: &ScratchDir,
        index: usize,
        input: &Path,
        transform: F,
    ) -> Result<PathBuf, EngineError>
    where
        F: FnOnce(PcmBuffer) -> Result<PcmBuffer, EngineError> + Send + 'static,
    {
        let decode_path = match decode_blocking(input.to_path_buf()).await {
            Ok(pcm) => return self.finish_transform(scratch, index, pcm, transform).await,
            Err(EngineError::Decode(reason)) => {
                // Formats symphonia cannot read go through the toolkit first
                debug!(input = %input.display(), reason, "Decoding through toolkit");
                let decoded = scratch.file(index, "decoded.wav");
                self.render("decode", input, decoded.clone(), &[]).await?;
                decoded
            }
            Err(e) => return Err(e),
        };

        let pcm = decode_blocking(decode_path).await?;
        self.finish_transform(scratch, index, pcm, transform).await
    }

    async fn finish_transform<F>(
        &self,
        scratch: &ScratchDir,
        index: usize,
        pcm: PcmBuffer,
        transform: F,
    ) -> Result<PathBuf, EngineError>
    where
        F: FnOnce(PcmBuffer) -> Result<PcmBuffer, EngineError> + Send + 'static,
    {
        let output = scratch.file(index, "wav");
        let path = output.clone();
        tokio::task::spawn_blocking(move || {
            let transformed = transform(pcm)?;
            pcm::write_wav(&path, &transformed)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("transform task failed: {}", e)))??;
        Ok(output)
    }
}

async fn decode_blocking(path: PathBuf) -> Result<PcmBuffer, EngineError> {
    tokio::task::spawn_blocking(move || pcm::decode_file(&path))
        .await
        .map_err(|e| EngineError::Internal(format!("decode task failed: {}", e)))?
}
