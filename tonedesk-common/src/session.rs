//! Session data model
//!
//! A session is one user's held artifact plus the settings accumulated for
//! it. Records are owned by the session store; everything else works on
//! copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::format::{AudioFormat, Bitrate};
use crate::Error;

/// Chat-side identity of the user owning a session
pub type UserId = i64;

/// Inactivity window before a session may be swept
pub const SESSION_TTL_SECS: i64 = 5 * 60;

pub fn session_ttl() -> chrono::Duration {
    chrono::Duration::seconds(SESSION_TTL_SECS)
}

/// One parametric EQ adjustment, in the order the user entered it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    #[serde(rename = "freq")]
    pub freq_hz: f64,
    #[serde(rename = "gain")]
    pub gain_db: f64,
}

impl EqBand {
    pub fn new(freq_hz: f64, gain_db: f64) -> Self {
        Self { freq_hz, gain_db }
    }
}

/// Virtual source direction for binaural rendering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialPosition {
    /// Horizontal angle, -180..=180, positive to the right
    pub azimuth: f64,
    /// Vertical angle, -90..=90
    pub elevation: f64,
}

/// Accumulated processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub format: AudioFormat,
    pub bitrate: Bitrate,
    pub sample_rate: u32,
    pub channels: u8,
    pub eq: Vec<EqBand>,
    /// Effect names in application order; checked against the effect
    /// catalogue when the chain is built
    pub effects: Vec<String>,
    pub spatial: Option<SpatialPosition>,
    pub normalize: bool,
    pub speed: f64,
    pub fade_in: f64,
    pub fade_out: f64,
    pub bass_boost: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            format: AudioFormat::Mp3,
            bitrate: Bitrate::default(),
            sample_rate: 48_000,
            channels: 2,
            eq: Vec::new(),
            effects: Vec::new(),
            spatial: None,
            normalize: false,
            speed: 1.0,
            fade_in: 0.0,
            fade_out: 0.0,
            bass_boost: 0,
        }
    }
}

impl Settings {
    /// Clear the one-shot transformations, keeping the output target.
    ///
    /// Applied when a processed result becomes the new source so the next
    /// step does not re-apply the previous step's edits.
    pub fn reset_transforms(&mut self) {
        let defaults = Settings::default();
        self.eq.clear();
        self.effects.clear();
        self.spatial = None;
        self.normalize = defaults.normalize;
        self.speed = defaults.speed;
        self.fade_in = defaults.fade_in;
        self.fade_out = defaults.fade_out;
        self.bass_boost = defaults.bass_boost;
    }
}

/// Probed properties of an audio file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioMetadata {
    pub codec: String,
    pub format: String,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
    pub size_bytes: u64,
}

/// Where a live session sits in the processing lifecycle.
///
/// `Idle` is represented by the absence of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingConfiguration,
    Processing,
    AwaitingContinuation,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::AwaitingConfiguration => "awaiting_configuration",
            SessionPhase::Processing => "processing",
            SessionPhase::AwaitingContinuation => "awaiting_continuation",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionPhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_configuration" => Ok(SessionPhase::AwaitingConfiguration),
            "processing" => Ok(SessionPhase::Processing),
            "awaiting_continuation" => Ok(SessionPhase::AwaitingContinuation),
            other => Err(Error::Internal(format!("Unknown session phase: {}", other))),
        }
    }
}

/// Output of a completed processing step, held until the user continues
/// or finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedArtifact {
    pub path: PathBuf,
    pub metadata: AudioMetadata,
}

/// One user's in-progress work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: UserId,
    pub artifact_path: PathBuf,
    pub original_filename: String,
    pub metadata: AudioMetadata,
    pub settings: Settings,
    pub phase: SessionPhase,
    pub result: Option<ProcessedArtifact>,
    pub created_at: DateTime<Utc>,
    /// Last activity
    pub updated_at: DateTime<Utc>,
    /// Always `updated_at + SESSION_TTL_SECS`
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        user_id: UserId,
        artifact_path: PathBuf,
        original_filename: String,
        metadata: AudioMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            artifact_path,
            original_filename,
            metadata,
            settings: Settings::default(),
            phase: SessionPhase::AwaitingConfiguration,
            result: None,
            created_at: now,
            updated_at: now,
            expires_at: now + session_ttl(),
        }
    }

    /// Record activity at `now`, sliding the expiry window
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.expires_at = now + session_ttl();
    }

    /// Expired at or after the expiry instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Files on disk owned by this session
    pub fn backing_files(&self) -> Vec<&Path> {
        let mut files = vec![self.artifact_path.as_path()];
        if let Some(result) = &self.result {
            files.push(result.path.as_path());
        }
        files
    }
}

/// Lifecycle of a recorded operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "processing" => Ok(OperationStatus::Processing),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            other => Err(Error::Internal(format!("Unknown operation status: {}", other))),
        }
    }
}

/// Observability row for one ingest or processing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub session_id: Uuid,
    pub operation: String,
    pub status: OperationStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn pending(user_id: UserId, session_id: Uuid, operation: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_id,
            operation: operation.to_string(),
            status: OperationStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
