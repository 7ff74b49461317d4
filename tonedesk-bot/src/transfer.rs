//! Transfer Manager
//!
//! Pulls a remote file into local storage with bounded retry and periodic
//! progress notifications.
//!
//! The file is written to `<dest>.part` and only renamed into place once the
//! source reports completion, so a failed transfer never leaves a truncated
//! file at `dest`. Sources charge every chunk against a [`ByteCounter`]
//! before writing it, so a download without an announced size still stops
//! as soon as it passes the size limit.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Attempts before giving up on transient failures
pub const MAX_ATTEMPTS: u32 = 5;

/// First backoff delay; doubled after every failed attempt
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Cadence of progress notifications while a transfer runs
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Reference to a file held by the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Opaque identifier understood by the [`RemoteSource`]
    pub id: String,
    pub file_name: Option<String>,
    /// Size announced by the remote side, if any
    pub size: Option<u64>,
}

/// Failure of a single fetch attempt, classified for the retry loop
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network error or timeout; worth another attempt
    #[error("transient failure: {0}")]
    Transient(String),

    /// Server asked us to slow down
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Invalid reference, permission denied, file too big for the source
    #[error("{0}")]
    Fatal(String),

    /// Download passed the local size limit after `received` bytes
    #[error("download exceeds {limit} bytes")]
    TooLarge { limit: u64, received: u64 },
}

/// Terminal transfer failure
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("non-retryable: {0}")]
    NonRetryable(String),

    #[error("file exceeds {limit} bytes")]
    TooLarge { limit: u64, received: u64 },

    /// Local filesystem failure while storing the download
    #[error("local storage: {0}")]
    Local(#[from] std::io::Error),
}

/// Bytes received by one attempt, capped at the download limit
#[derive(Debug)]
pub struct ByteCounter {
    bytes: AtomicU64,
    limit: u64,
}

impl ByteCounter {
    pub fn new(limit: u64) -> Self {
        Self {
            bytes: AtomicU64::new(0),
            limit,
        }
    }

    /// Charge `len` more bytes; fails once the total would pass the limit
    pub fn add(&self, len: u64) -> Result<u64, FetchError> {
        let total = self.bytes.load(Ordering::Relaxed).saturating_add(len);
        if total > self.limit {
            return Err(FetchError::TooLarge {
                limit: self.limit,
                received: total,
            });
        }
        self.bytes.store(total, Ordering::Relaxed);
        Ok(total)
    }

    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Remote side of a transfer
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Write the referenced file into `sink`, charging every chunk to
    /// `transferred` before it is written and stopping on the first error.
    async fn fetch(
        &self,
        file: &FileRef,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        transferred: &ByteCounter,
    ) -> Result<(), FetchError>;
}

/// Snapshot emitted while a transfer is running
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    pub bytes: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Completion percentage, when the total size is known
    pub fn percentage(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.bytes as f64 / total as f64 * 100.0).min(100.0)),
            _ => None,
        }
    }
}

/// Receiver of progress snapshots
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: TransferProgress);
}

/// Reporter that drops every snapshot
pub struct NoProgress;

#[async_trait]
impl ProgressReporter for NoProgress {
    async fn report(&self, _progress: TransferProgress) {}
}

/// Retry schedule
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given (1-based) failed attempt: 1s, 2s, 4s, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

pub struct TransferManager {
    source: Arc<dyn RemoteSource>,
    policy: RetryPolicy,
    progress_interval: Duration,
}

impl TransferManager {
    pub fn new(source: Arc<dyn RemoteSource>) -> Self {
        Self {
            source,
            policy: RetryPolicy::default(),
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Download `file` to `dest`, returning the number of bytes written.
    ///
    /// A download passing `max_bytes` is abandoned without retry.
    pub async fn fetch(
        &self,
        file: &FileRef,
        dest: &Path,
        max_bytes: u64,
        reporter: &dyn ProgressReporter,
    ) -> Result<u64, TransferError> {
        let part = part_path(dest);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(file_id = %file.id, attempt, "Starting transfer attempt");

            let err = match self.attempt(file, &part, max_bytes, reporter).await {
                Ok(bytes) => {
                    tokio::fs::rename(&part, dest).await.inspect_err(|_| {
                        discard_partial(&part);
                    })?;
                    info!(file_id = %file.id, attempt, bytes, "Transfer complete");
                    return Ok(bytes);
                }
                Err(AttemptError::Local(e)) => {
                    discard_partial(&part);
                    return Err(TransferError::Local(e));
                }
                Err(AttemptError::Remote(e)) => e,
            };

            let wait = match &err {
                FetchError::Fatal(reason) => {
                    warn!(file_id = %file.id, attempt, error = %reason, "Transfer failed, not retrying");
                    discard_partial(&part);
                    return Err(TransferError::NonRetryable(reason.clone()));
                }
                FetchError::TooLarge { limit, received } => {
                    warn!(
                        file_id = %file.id,
                        attempt,
                        limit,
                        received,
                        "Transfer passed the size limit"
                    );
                    discard_partial(&part);
                    return Err(TransferError::TooLarge {
                        limit: *limit,
                        received: *received,
                    });
                }
                _ if attempt >= self.policy.max_attempts => {
                    warn!(file_id = %file.id, attempt, error = %err, "Transfer retries exhausted");
                    discard_partial(&part);
                    return Err(TransferError::Exhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    });
                }
                FetchError::RateLimited { retry_after } => *retry_after,
                FetchError::Transient(_) => self.policy.backoff(attempt),
            };

            warn!(
                file_id = %file.id,
                attempt,
                delay_ms = wait.as_millis() as u64,
                error = %err,
                "Transfer attempt failed, will retry after backoff"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn attempt(
        &self,
        file: &FileRef,
        part: &Path,
        max_bytes: u64,
        reporter: &dyn ProgressReporter,
    ) -> Result<u64, AttemptError> {
        let mut out = tokio::fs::File::create(part).await.map_err(AttemptError::Local)?;
        let transferred = ByteCounter::new(max_bytes);

        let result = {
            let fetch = self.source.fetch(file, &mut out, &transferred);
            tokio::pin!(fetch);

            let mut ticker = interval_at(
                Instant::now() + self.progress_interval,
                self.progress_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    result = &mut fetch => break result,
                    _ = ticker.tick() => {
                        reporter
                            .report(TransferProgress {
                                bytes: transferred.get(),
                                total: file.size,
                            })
                            .await;
                    }
                }
            }
        };

        result.map_err(AttemptError::Remote)?;
        out.flush().await.map_err(AttemptError::Local)?;
        out.sync_all().await.map_err(AttemptError::Local)?;

        Ok(transferred.get())
    }
}

enum AttemptError {
    Remote(FetchError),
    Local(std::io::Error),
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn discard_partial(part: &Path) {
    match std::fs::remove_file(part) {
        Ok(()) => debug!(path = %part.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %part.display(), error = %e, "Failed to remove partial download"),
    }
}
