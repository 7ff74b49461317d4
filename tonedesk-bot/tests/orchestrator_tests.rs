//! Session Orchestrator scenarios over the in-memory store

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tonedesk_bot::engine::EngineError;
use tonedesk_bot::error::{BotError, ValidationError};
use tonedesk_bot::orchestrator::{CancelOutcome, ConfigAction, ProcessOutcome};
use tonedesk_bot::transfer::{NoProgress, TransferError};
use tonedesk_common::format::AudioFormat;
use tonedesk_common::session::{EqBand, SessionPhase};
use tonedesk_common::time::ManualClock;

use common::{file_ref, Harness};

const USER: i64 = 42;

async fn ingest_tone(harness: &Harness) {
    harness.serve_tone("f1");
    harness
        .orchestrator
        .ingest(USER, &file_ref("f1", "song.wav"), &NoProgress)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_ingest_creates_configurable_session() {
    let harness = Harness::new();
    ingest_tone(&harness).await;

    let session = harness.orchestrator.session(USER).await.unwrap().unwrap();
    assert_eq!(session.phase, SessionPhase::AwaitingConfiguration);
    assert_eq!(session.original_filename, "song.wav");
    assert_eq!(session.metadata.sample_rate, 8_000);
    assert_eq!(session.metadata.channels, 2);
    assert!(session.metadata.size_bytes > 0);
    assert!(session.artifact_path.exists());

    let name = session.artifact_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("42_"));
    assert!(name.ends_with(".wav"));
}

#[tokio::test]
async fn test_new_upload_replaces_session_and_its_file() {
    let harness = Harness::new();
    ingest_tone(&harness).await;
    let first = harness.orchestrator.session(USER).await.unwrap().unwrap();

    harness.serve_tone("f2");
    let second = harness
        .orchestrator
        .ingest(USER, &file_ref("f2", "other.wav"), &NoProgress)
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert!(!first.artifact_path.exists());
    assert!(second.artifact_path.exists());
}

#[tokio::test]
async fn test_oversized_download_is_rejected_and_removed() {
    let harness = Harness::with_limits(1_000, Duration::from_secs(30));
    harness.serve_tone("big");

    let err = harness
        .orchestrator
        .ingest(USER, &file_ref("big", "big.wav"), &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BotError::Validation(ValidationError::FileTooLarge { max: 1_000, .. })
    ));
    assert!(harness.orchestrator.state_of(USER).await.unwrap().is_none());
    assert!(harness.dir_entries().is_empty());
}

#[tokio::test]
async fn test_announced_size_checked_before_download() {
    let harness = Harness::with_limits(1_000, Duration::from_secs(30));
    let mut file = file_ref("never-served", "big.wav");
    file.size = Some(5_000);

    let err = harness
        .orchestrator
        .ingest(USER, &file, &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BotError::Validation(ValidationError::FileTooLarge { size: 5_000, .. })
    ));
}

#[tokio::test]
async fn test_missing_remote_file_is_not_retried() {
    let harness = Harness::new();
    let err = harness
        .orchestrator
        .ingest(USER, &file_ref("nope", "x.mp3"), &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::Transfer(TransferError::NonRetryable(_))));
    assert!(harness.dir_entries().is_empty());
}

#[tokio::test]
async fn test_invalid_configuration_leaves_settings_unchanged() {
    let harness = Harness::new();
    ingest_tone(&harness).await;
    harness
        .orchestrator
        .configure(USER, ConfigAction::AddEffect("reverb".into()))
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .configure(USER, ConfigAction::AddEqBand(EqBand::new(1000.0, 25.0)))
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::Validation(ValidationError::EqGain(_))));

    let err = harness
        .orchestrator
        .configure(USER, ConfigAction::AddEffect("wobble".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::Validation(ValidationError::UnknownEffect(_))));

    let settings = harness.orchestrator.session(USER).await.unwrap().unwrap().settings;
    assert!(settings.eq.is_empty());
    assert_eq!(settings.effects, vec!["reverb".to_string()]);
}

#[tokio::test]
async fn test_configure_without_session() {
    let harness = Harness::new();
    let err = harness
        .orchestrator
        .configure(USER, ConfigAction::SetFormat(AudioFormat::Flac))
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::NoSession));
}

#[tokio::test]
async fn test_process_continue_finish() {
    let harness = Harness::new();
    ingest_tone(&harness).await;
    let original = harness.orchestrator.session(USER).await.unwrap().unwrap();

    harness
        .orchestrator
        .configure(USER, ConfigAction::SetFormat(AudioFormat::Flac))
        .await
        .unwrap();
    harness
        .orchestrator
        .configure(USER, ConfigAction::AddEffect("Reverb".into()))
        .await
        .unwrap();

    let session = match harness.orchestrator.process(USER).await.unwrap() {
        ProcessOutcome::Completed(session) => session,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(session.phase, SessionPhase::AwaitingContinuation);
    let result = session.result.clone().unwrap();
    assert!(result.path.exists());
    assert_eq!(result.path.extension().unwrap(), "flac");
    assert_eq!(harness.toolkit.renders().len(), 1);

    let continued = harness.orchestrator.continue_editing(USER).await.unwrap();
    assert_eq!(continued.phase, SessionPhase::AwaitingConfiguration);
    assert_eq!(continued.artifact_path, result.path);
    assert!(continued.result.is_none());
    assert!(continued.settings.effects.is_empty());
    assert_eq!(continued.settings.format, AudioFormat::Flac);
    assert!(!original.artifact_path.exists());

    harness.orchestrator.finalize(USER).await.unwrap();
    assert!(harness.orchestrator.state_of(USER).await.unwrap().is_none());
    assert!(harness.dir_entries().is_empty());
}

#[tokio::test]
async fn test_failed_run_returns_to_configuration() {
    let harness = Harness::new();
    ingest_tone(&harness).await;
    harness
        .orchestrator
        .configure(USER, ConfigAction::SetNormalize(true))
        .await
        .unwrap();
    harness.toolkit.fail_encode.store(true, Ordering::SeqCst);

    let err = harness.orchestrator.process(USER).await.unwrap_err();
    assert!(matches!(err, BotError::Engine(EngineError::Toolkit { .. })));

    let session = harness.orchestrator.session(USER).await.unwrap().unwrap();
    assert_eq!(session.phase, SessionPhase::AwaitingConfiguration);
    assert!(session.settings.normalize);
    assert!(session.result.is_none());
    assert_eq!(harness.dir_entries().len(), 1);

    // Retry succeeds once the toolkit recovers
    harness.toolkit.fail_encode.store(false, Ordering::SeqCst);
    assert!(matches!(
        harness.orchestrator.process(USER).await.unwrap(),
        ProcessOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn test_timeout_keeps_settings() {
    let harness = Harness::with_limits(u64::MAX, Duration::from_millis(200));
    ingest_tone(&harness).await;
    harness
        .orchestrator
        .configure(USER, ConfigAction::AddEffect("delay".into()))
        .await
        .unwrap();
    *harness.toolkit.render_delay.lock().unwrap() = Some(Duration::from_secs(10));

    let err = harness.orchestrator.process(USER).await.unwrap_err();
    assert!(matches!(err, BotError::Engine(EngineError::Timeout(_))));
    assert!(err.user_message().contains("seconds"));

    let session = harness.orchestrator.session(USER).await.unwrap().unwrap();
    assert_eq!(session.phase, SessionPhase::AwaitingConfiguration);
    assert_eq!(session.settings.effects, vec!["delay".to_string()]);
}

#[tokio::test]
async fn test_requests_during_processing_conflict_and_cancel_discards() {
    let harness = Harness::new();
    ingest_tone(&harness).await;
    harness
        .orchestrator
        .configure(USER, ConfigAction::AddEffect("chorus".into()))
        .await
        .unwrap();
    harness.toolkit.hold_render.store(true, Ordering::SeqCst);

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.process(USER).await });
    harness.toolkit.entered.notified().await;

    assert_eq!(
        harness.orchestrator.state_of(USER).await.unwrap(),
        Some(SessionPhase::Processing)
    );
    assert!(matches!(
        harness.orchestrator.process(USER).await,
        Err(BotError::StateConflict(_))
    ));
    assert!(matches!(
        harness
            .orchestrator
            .configure(USER, ConfigAction::SetBassBoost(3))
            .await,
        Err(BotError::StateConflict(_))
    ));
    harness.serve_tone("f2");
    assert!(matches!(
        harness
            .orchestrator
            .ingest(USER, &file_ref("f2", "next.wav"), &NoProgress)
            .await,
        Err(BotError::StateConflict(_))
    ));

    assert_eq!(
        harness.orchestrator.cancel(USER).await.unwrap(),
        CancelOutcome::CancelledDuringProcessing
    );
    assert!(harness.orchestrator.state_of(USER).await.unwrap().is_none());

    harness.toolkit.release.notify_one();
    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome, ProcessOutcome::Discarded);
    assert!(harness.toolkit.encodes().is_empty());
    assert!(harness.dir_entries().is_empty());
}

#[tokio::test]
async fn test_cancel_outcomes() {
    let harness = Harness::new();
    assert_eq!(
        harness.orchestrator.cancel(USER).await.unwrap(),
        CancelOutcome::NothingToCancel
    );

    ingest_tone(&harness).await;
    assert_eq!(
        harness.orchestrator.cancel(USER).await.unwrap(),
        CancelOutcome::Cancelled
    );
    assert!(harness.dir_entries().is_empty());
}

#[tokio::test]
async fn test_continue_requires_a_result() {
    let harness = Harness::new();
    ingest_tone(&harness).await;
    assert!(matches!(
        harness.orchestrator.continue_editing(USER).await,
        Err(BotError::StateConflict(_))
    ));
}

/// Session with an EQ band and one effect, so a run has two render stages
async fn two_render_session(harness: &Harness) {
    ingest_tone(harness).await;
    harness
        .orchestrator
        .configure(USER, ConfigAction::AddEqBand(EqBand::new(1000.0, 3.0)))
        .await
        .unwrap();
    harness
        .orchestrator
        .configure(USER, ConfigAction::AddEffect("chorus".into()))
        .await
        .unwrap();
    harness.toolkit.hold_render.store(true, Ordering::SeqCst);
}

#[tokio::test]
async fn test_long_run_keeps_session_alive_across_stages() {
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let harness = Harness::with_clock(clock.clone());
    two_render_session(&harness).await;

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.process(USER).await });

    // Each step stays inside the five minute TTL, their sum does not
    harness.toolkit.entered.notified().await;
    clock.advance(chrono::Duration::seconds(200));
    harness.toolkit.release.notify_one();

    harness.toolkit.entered.notified().await;
    clock.advance(chrono::Duration::seconds(200));
    assert_eq!(harness.store.sweep_expired().await.unwrap(), 0);
    harness.toolkit.release.notify_one();

    let outcome = run.await.unwrap().unwrap();
    let ProcessOutcome::Completed(session) = outcome else {
        panic!("expected a completed run, got {:?}", outcome);
    };
    assert_eq!(session.phase, SessionPhase::AwaitingContinuation);
    assert_eq!(harness.toolkit.encodes().len(), 1);
}

#[tokio::test]
async fn test_session_swept_mid_run_reports_expiry() {
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let harness = Harness::with_clock(clock.clone());
    two_render_session(&harness).await;

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.process(USER).await });

    harness.toolkit.entered.notified().await;
    clock.advance(chrono::Duration::seconds(301));
    assert_eq!(harness.store.sweep_expired().await.unwrap(), 1);
    harness.toolkit.release.notify_one();

    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome, ProcessOutcome::Expired);
    // The run stopped at the next boundary
    assert_eq!(harness.toolkit.renders().len(), 1);
    assert!(harness.toolkit.encodes().is_empty());
    assert!(harness.dir_entries().is_empty());
    assert!(harness.orchestrator.state_of(USER).await.unwrap().is_none());
}
