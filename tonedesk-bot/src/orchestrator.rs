//! Session Orchestrator
//!
//! Ties user actions to session mutations and engine runs:
//!
//! ```text
//! Idle ──ingest──▶ AwaitingConfiguration ──process──▶ Processing
//!                     ▲       │ configure                 │
//!                     │       └───────────┘               │ success
//!                     │ continue                          ▼
//!                     └────────────────────── AwaitingContinuation
//! cancel / finish / expiry: any state ──▶ Idle
//! ```
//!
//! A failed run returns the session to `AwaitingConfiguration` with its
//! settings untouched. At most one run per user is in flight, and its
//! session's expiry is pushed back at every stage boundary.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tonedesk_common::format::{AudioFormat, Bitrate};
use tonedesk_common::session::{
    EqBand, OperationRecord, OperationStatus, ProcessedArtifact, Session, SessionPhase,
    Settings, SpatialPosition, UserId,
};
use tonedesk_common::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::{
    build_chain, validate_bass_boost, validate_bitrate, validate_channels, validate_eq,
    validate_eq_band, validate_fade, validate_position, validate_sample_rate, validate_speed,
    EffectKind,
};
use crate::engine::{AudioEngine, StageObserver};
use crate::error::{BotError, ValidationError};
use crate::store::{discard_file, SessionStore};
use crate::transfer::{FileRef, ProgressReporter, TransferError, TransferManager};

/// One configuration step requested by the user
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigAction {
    SetFormat(AudioFormat),
    SetBitrate(Bitrate),
    SetSampleRate(u32),
    SetChannels(u8),
    /// Replace the whole EQ list
    SetEq(Vec<EqBand>),
    AddEqBand(EqBand),
    ClearEq,
    /// Append an effect to the chain
    AddEffect(String),
    ClearEffects,
    SetSpatial(SpatialPosition),
    ClearSpatial,
    SetNormalize(bool),
    SetSpeed(f64),
    SetFadeIn(f64),
    SetFadeOut(f64),
    SetBassBoost(u8),
}

impl ConfigAction {
    /// Check the action's own parameters
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ConfigAction::SetBitrate(bitrate) => validate_bitrate(*bitrate),
            ConfigAction::SetSampleRate(rate) => validate_sample_rate(*rate),
            ConfigAction::SetChannels(channels) => validate_channels(*channels),
            ConfigAction::SetEq(bands) => validate_eq(bands),
            ConfigAction::AddEqBand(band) => validate_eq_band(band),
            ConfigAction::AddEffect(name) => EffectKind::from_name(name)
                .map(|_| ())
                .ok_or_else(|| ValidationError::UnknownEffect(name.clone())),
            ConfigAction::SetSpatial(position) => validate_position(*position),
            ConfigAction::SetSpeed(speed) => validate_speed(*speed),
            ConfigAction::SetFadeIn(secs) | ConfigAction::SetFadeOut(secs) => validate_fade(*secs),
            ConfigAction::SetBassBoost(db) => validate_bass_boost(*db),
            ConfigAction::SetFormat(_)
            | ConfigAction::ClearEq
            | ConfigAction::ClearEffects
            | ConfigAction::ClearSpatial
            | ConfigAction::SetNormalize(_) => Ok(()),
        }
    }

    pub fn apply(&self, settings: &mut Settings) {
        match self {
            ConfigAction::SetFormat(format) => settings.format = *format,
            ConfigAction::SetBitrate(bitrate) => settings.bitrate = *bitrate,
            ConfigAction::SetSampleRate(rate) => settings.sample_rate = *rate,
            ConfigAction::SetChannels(channels) => settings.channels = *channels,
            ConfigAction::SetEq(bands) => settings.eq = bands.clone(),
            ConfigAction::AddEqBand(band) => settings.eq.push(*band),
            ConfigAction::ClearEq => settings.eq.clear(),
            ConfigAction::AddEffect(name) => settings.effects.push(name.trim().to_ascii_lowercase()),
            ConfigAction::ClearEffects => settings.effects.clear(),
            ConfigAction::SetSpatial(position) => settings.spatial = Some(*position),
            ConfigAction::ClearSpatial => settings.spatial = None,
            ConfigAction::SetNormalize(on) => settings.normalize = *on,
            ConfigAction::SetSpeed(speed) => settings.speed = *speed,
            ConfigAction::SetFadeIn(secs) => settings.fade_in = *secs,
            ConfigAction::SetFadeOut(secs) => settings.fade_out = *secs,
            ConfigAction::SetBassBoost(db) => settings.bass_boost = *db,
        }
    }
}

/// How a process trigger ended
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Result attached; session is awaiting continuation
    Completed(Session),
    /// User cancelled while the run was in flight
    Discarded,
    /// Session expired and was swept while the run was in flight
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    NothingToCancel,
    Cancelled,
    /// A run was in flight; it stops at the next stage boundary
    CancelledDuringProcessing,
}

/// Removes the user's in-flight entry when the run ends or is dropped
struct InflightGuard<'a> {
    inflight: &'a Mutex<HashMap<UserId, CancellationToken>>,
    user_id: UserId,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&self.user_id);
    }
}

/// Refreshes a running session's expiry at each stage boundary.
///
/// If the session is already gone without a user cancel, it was swept:
/// the run is cancelled and the expiry remembered.
struct SessionKeepAlive<'a> {
    store: &'a SessionStore,
    user_id: UserId,
    session_id: Uuid,
    cancel: &'a CancellationToken,
    expired: AtomicBool,
}

impl SessionKeepAlive<'_> {
    fn expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageObserver for SessionKeepAlive<'_> {
    async fn before_stage(&self, index: usize, stage: &'static str) {
        if self.cancel.is_cancelled() {
            return;
        }
        match self.store.update(self.session_id, |_| Ok(())).await {
            Ok(session) => debug!(
                user_id = self.user_id,
                index,
                stage,
                expires_at = %session.expires_at,
                "Session expiry refreshed"
            ),
            // cancel() cancels the token before deleting the session
            Err(Error::NotFound(_)) if !self.cancel.is_cancelled() => {
                warn!(
                    user_id = self.user_id,
                    session_id = %self.session_id,
                    stage,
                    "Session expired during processing, stopping run"
                );
                self.expired.store(true, Ordering::SeqCst);
                self.cancel.cancel();
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => warn!(
                user_id = self.user_id,
                error = %e,
                "Failed to refresh session expiry"
            ),
        }
    }
}

/// Outcome for a run whose session disappeared before the result landed
fn vanished(token: &CancellationToken) -> ProcessOutcome {
    if token.is_cancelled() {
        ProcessOutcome::Discarded
    } else {
        ProcessOutcome::Expired
    }
}

pub struct Orchestrator {
    store: Arc<SessionStore>,
    transfers: TransferManager,
    engine: AudioEngine,
    download_dir: PathBuf,
    max_file_size: u64,
    inflight: Mutex<HashMap<UserId, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        transfers: TransferManager,
        engine: AudioEngine,
        download_dir: impl Into<PathBuf>,
        max_file_size: u64,
    ) -> Self {
        Self {
            store,
            transfers,
            engine,
            download_dir: download_dir.into(),
            max_file_size,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Current phase of the user's session, `None` when idle
    pub async fn state_of(&self, user_id: UserId) -> Result<Option<SessionPhase>, BotError> {
        Ok(self.store.get(user_id).await?.map(|s| s.phase))
    }

    pub async fn session(&self, user_id: UserId) -> Result<Option<Session>, BotError> {
        Ok(self.store.get(user_id).await?)
    }

    async fn require_session(&self, user_id: UserId) -> Result<Session, BotError> {
        self.store.get(user_id).await?.ok_or(BotError::NoSession)
    }

    /// Download `file` and make it the user's new session, replacing any
    /// previous one
    pub async fn ingest(
        &self,
        user_id: UserId,
        file: &FileRef,
        reporter: &dyn ProgressReporter,
    ) -> Result<Session, BotError> {
        if let Some(existing) = self.store.get(user_id).await? {
            if existing.phase == SessionPhase::Processing {
                return Err(processing_conflict());
            }
        }
        if let Some(size) = file.size {
            self.check_size(size)?;
        }

        let filename = file
            .file_name
            .clone()
            .unwrap_or_else(|| format!("audio_{}", file.id));
        let dest = self.download_dir.join(format!(
            "{}_{}.{}",
            user_id,
            Uuid::new_v4(),
            source_extension(&filename)
        ));

        let op = OperationRecord::pending(user_id, Uuid::nil(), "ingest", self.store.now());
        self.track(&op).await;
        self.mark(op.id, OperationStatus::Processing, None).await;

        match self.download_and_register(user_id, file, &dest, filename, reporter).await {
            Ok(session) => {
                self.mark(op.id, OperationStatus::Completed, None).await;
                info!(
                    user_id,
                    session_id = %session.id,
                    size_bytes = session.metadata.size_bytes,
                    "File ingested"
                );
                Ok(session)
            }
            Err(e) => {
                self.mark(op.id, OperationStatus::Failed, Some(&e.to_string())).await;
                discard_file(&dest).await;
                warn!(user_id, error = %e, "Ingest failed");
                Err(e)
            }
        }
    }

    async fn download_and_register(
        &self,
        user_id: UserId,
        file: &FileRef,
        dest: &Path,
        filename: String,
        reporter: &dyn ProgressReporter,
    ) -> Result<Session, BotError> {
        let bytes = match self
            .transfers
            .fetch(file, dest, self.max_file_size, reporter)
            .await
        {
            Err(TransferError::TooLarge { limit, received }) => {
                return Err(ValidationError::FileTooLarge {
                    size: received,
                    max: limit,
                }
                .into())
            }
            other => other?,
        };
        self.check_size(bytes)?;

        let mut metadata = self.engine.probe(dest).await?;
        if metadata.size_bytes == 0 {
            metadata.size_bytes = bytes;
        }

        Ok(self
            .store
            .create(user_id, dest.to_path_buf(), filename, metadata)
            .await?)
    }

    fn check_size(&self, size: u64) -> Result<(), ValidationError> {
        if size > self.max_file_size {
            Err(ValidationError::FileTooLarge {
                size,
                max: self.max_file_size,
            })
        } else {
            Ok(())
        }
    }

    /// Apply one configuration action
    ///
    /// The resulting settings are validated as a whole before anything is
    /// written, so a rejected action leaves the session unchanged.
    pub async fn configure(&self, user_id: UserId, action: ConfigAction) -> Result<Session, BotError> {
        action.validate()?;
        let session = self.require_session(user_id).await?;
        expect_phase(&session, SessionPhase::AwaitingConfiguration)?;

        let mut candidate = session.settings.clone();
        action.apply(&mut candidate);
        build_chain(&candidate)?;

        let updated = self
            .store
            .update(session.id, move |s| {
                phase_guard(s, SessionPhase::AwaitingConfiguration)?;
                action.apply(&mut s.settings);
                Ok(())
            })
            .await
            .map_err(into_bot_error)?;

        debug!(user_id, session_id = %updated.id, "Settings updated");
        Ok(updated)
    }

    /// Compile the current settings and run them through the engine
    pub async fn process(&self, user_id: UserId) -> Result<ProcessOutcome, BotError> {
        let session = self.require_session(user_id).await?;
        expect_phase(&session, SessionPhase::AwaitingConfiguration)?;
        let stages = build_chain(&session.settings)?;

        let token = CancellationToken::new();
        {
            let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if map.contains_key(&user_id) {
                return Err(processing_conflict());
            }
            map.insert(user_id, token.clone());
        }
        let _guard = InflightGuard {
            inflight: &self.inflight,
            user_id,
        };

        let session = self
            .store
            .update(session.id, |s| {
                phase_guard(s, SessionPhase::AwaitingConfiguration)?;
                s.phase = SessionPhase::Processing;
                Ok(())
            })
            .await
            .map_err(into_bot_error)?;

        let op = OperationRecord::pending(user_id, session.id, "process", self.store.now());
        self.track(&op).await;
        self.mark(op.id, OperationStatus::Processing, None).await;

        info!(
            user_id,
            session_id = %session.id,
            stages = stages.len(),
            "Processing started"
        );
        let keep_alive = SessionKeepAlive {
            store: &self.store,
            user_id,
            session_id: session.id,
            cancel: &token,
            expired: AtomicBool::new(false),
        };
        let result = self
            .engine
            .execute_observed(&session.artifact_path, &stages, &token, &keep_alive)
            .await;

        if token.is_cancelled() {
            if let Ok(output) = &result {
                discard_file(&output.path).await;
            }
            if keep_alive.expired() {
                self.mark(op.id, OperationStatus::Failed, Some("session expired")).await;
                info!(user_id, session_id = %session.id, "Processing stopped, session expired");
                return Ok(ProcessOutcome::Expired);
            }
            self.mark(op.id, OperationStatus::Failed, Some("cancelled")).await;
            info!(user_id, session_id = %session.id, "Processing result discarded after cancel");
            return Ok(ProcessOutcome::Discarded);
        }

        match result {
            Ok(output) => {
                let artifact = ProcessedArtifact {
                    path: output.path.clone(),
                    metadata: output.metadata.clone(),
                };
                let updated = self
                    .store
                    .update(session.id, move |s| {
                        s.phase = SessionPhase::AwaitingContinuation;
                        s.result = Some(artifact.clone());
                        Ok(())
                    })
                    .await;

                match updated {
                    Ok(updated) => {
                        self.mark(op.id, OperationStatus::Completed, None).await;
                        Ok(ProcessOutcome::Completed(updated))
                    }
                    Err(Error::NotFound(_)) => {
                        discard_file(&output.path).await;
                        self.mark(op.id, OperationStatus::Failed, Some("session gone")).await;
                        Ok(vanished(&token))
                    }
                    Err(e) => {
                        discard_file(&output.path).await;
                        self.mark(op.id, OperationStatus::Failed, Some(&e.to_string())).await;
                        Err(e.into())
                    }
                }
            }
            Err(e) => {
                self.mark(op.id, OperationStatus::Failed, Some(&e.to_string())).await;
                let reverted = self
                    .store
                    .update(session.id, |s| {
                        s.phase = SessionPhase::AwaitingConfiguration;
                        Ok(())
                    })
                    .await;
                match reverted {
                    Ok(_) => Err(e.into()),
                    Err(Error::NotFound(_)) => Ok(vanished(&token)),
                    Err(store_err) => {
                        warn!(user_id, error = %store_err, "Failed to reset session after error");
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Make the last result the new source and reopen configuration
    pub async fn continue_editing(&self, user_id: UserId) -> Result<Session, BotError> {
        let session = self.require_session(user_id).await?;
        expect_phase(&session, SessionPhase::AwaitingContinuation)?;
        if session.result.is_none() {
            return Err(BotError::StateConflict("There is no result to continue from.".into()));
        }
        let previous_source = session.artifact_path.clone();

        let updated = self
            .store
            .update(session.id, |s| {
                phase_guard(s, SessionPhase::AwaitingContinuation)?;
                let result = s
                    .result
                    .take()
                    .ok_or_else(|| Error::InvalidInput("no result to continue from".into()))?;
                s.artifact_path = result.path;
                s.metadata = result.metadata;
                s.settings.reset_transforms();
                s.phase = SessionPhase::AwaitingConfiguration;
                Ok(())
            })
            .await
            .map_err(into_bot_error)?;

        if previous_source != updated.artifact_path {
            discard_file(&previous_source).await;
        }
        info!(user_id, session_id = %updated.id, "Continuing with processed result");
        Ok(updated)
    }

    /// End the session after delivery
    pub async fn finalize(&self, user_id: UserId) -> Result<(), BotError> {
        let session = self.require_session(user_id).await?;
        if session.phase == SessionPhase::Processing {
            return Err(processing_conflict());
        }
        self.store.delete(session.id).await?;
        info!(user_id, session_id = %session.id, "Session finished");
        Ok(())
    }

    /// Drop the user's session in any state
    ///
    /// An in-flight run is told to stop at its next stage boundary and its
    /// output is discarded when it resolves.
    pub async fn cancel(&self, user_id: UserId) -> Result<CancelOutcome, BotError> {
        let in_flight = {
            let map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            map.get(&user_id).cloned()
        };
        if let Some(token) = &in_flight {
            token.cancel();
        }

        let session = self.store.get(user_id).await?;
        if let Some(session) = &session {
            self.store.delete(session.id).await?;
        }

        let outcome = match (in_flight, session) {
            (Some(_), _) => CancelOutcome::CancelledDuringProcessing,
            (None, Some(_)) => CancelOutcome::Cancelled,
            (None, None) => CancelOutcome::NothingToCancel,
        };
        info!(user_id, outcome = ?outcome, "Cancel requested");
        Ok(outcome)
    }

    async fn track(&self, op: &OperationRecord) {
        if let Err(e) = self.store.record_operation(op).await {
            warn!(operation = %op.operation, error = %e, "Failed to record operation");
        }
    }

    async fn mark(&self, id: Uuid, status: OperationStatus, error: Option<&str>) {
        if let Err(e) = self.store.set_operation_status(id, status, error).await {
            warn!(operation_id = %id, status = status.as_str(), error = %e, "Failed to update operation");
        }
    }
}

/// File name offered for a processed result
pub fn output_filename(session: &Session) -> String {
    let stem = Path::new(&session.original_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("audio");
    format!("{}_processed.{}", stem, session.settings.format.extension())
}

fn source_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

fn processing_conflict() -> BotError {
    BotError::StateConflict("Processing is already in progress, please wait.".into())
}

fn phase_message(phase: SessionPhase) -> String {
    match phase {
        SessionPhase::Processing => "Processing is already in progress, please wait.".into(),
        SessionPhase::AwaitingContinuation => {
            "Choose Continue Editing or Done for the last result first.".into()
        }
        SessionPhase::AwaitingConfiguration => "Process the file first.".into(),
    }
}

fn expect_phase(session: &Session, expected: SessionPhase) -> Result<(), BotError> {
    if session.phase == expected {
        Ok(())
    } else {
        Err(BotError::StateConflict(phase_message(session.phase)))
    }
}

/// Phase re-check inside a store mutator
fn phase_guard(session: &Session, expected: SessionPhase) -> tonedesk_common::Result<()> {
    if session.phase == expected {
        Ok(())
    } else {
        Err(Error::InvalidInput(phase_message(session.phase)))
    }
}

/// Map store errors from a guarded update into the bot taxonomy
fn into_bot_error(err: Error) -> BotError {
    match err {
        Error::InvalidInput(reason) => BotError::StateConflict(reason),
        Error::NotFound(_) => BotError::NoSession,
        other => BotError::Storage(other),
    }
}
