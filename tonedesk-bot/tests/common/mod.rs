//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tonedesk_bot::engine::toolkit::{EncodeJob, MediaToolkit, ToolkitError};
use tonedesk_bot::engine::AudioEngine;
use tonedesk_bot::orchestrator::Orchestrator;
use tonedesk_bot::store::SessionStore;
use tonedesk_bot::transfer::{
    ByteCounter, FetchError, FileRef, RemoteSource, RetryPolicy, TransferManager,
};
use tonedesk_common::session::AudioMetadata;
use tonedesk_common::time::{Clock, SystemClock};

/// Write a sine tone as 16-bit PCM WAV
pub fn write_tone(path: &Path, channels: u16, sample_rate: u32, seconds: f32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (sample_rate as f32 * seconds) as usize;
    for n in 0..frames {
        let t = n as f32 / sample_rate as f32;
        let value = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.25;
        for _ in 0..channels {
            writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
}

pub fn tone_bytes(channels: u16, sample_rate: u32, seconds: f32) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_tone(&path, channels, sample_rate, seconds);
    std::fs::read(path).unwrap()
}

/// What the engine asked the toolkit to do
#[derive(Debug, Clone, PartialEq)]
pub enum ToolkitCall {
    Probe(PathBuf),
    Render { input: PathBuf, filters: Vec<String> },
    Encode(EncodeJob),
}

/// Toolkit that copies WAV data instead of running ffmpeg
#[derive(Default)]
pub struct FakeToolkit {
    calls: Mutex<Vec<ToolkitCall>>,
    pub fail_render: AtomicBool,
    pub fail_encode: AtomicBool,
    /// Park every render until `release` is notified
    pub hold_render: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
    pub render_delay: Mutex<Option<Duration>>,
}

impl FakeToolkit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ToolkitCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn renders(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ToolkitCall::Render { filters, .. } => Some(filters),
                _ => None,
            })
            .collect()
    }

    pub fn encodes(&self) -> Vec<EncodeJob> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ToolkitCall::Encode(job) => Some(job),
                _ => None,
            })
            .collect()
    }

    fn failure(program: &str) -> ToolkitError {
        ToolkitError::Failed {
            program: program.to_string(),
            status: "exit status: 1".to_string(),
            stderr: "simulated failure".to_string(),
        }
    }
}

#[async_trait]
impl MediaToolkit for FakeToolkit {
    async fn probe(&self, path: &Path) -> Result<AudioMetadata, ToolkitError> {
        self.calls
            .lock()
            .unwrap()
            .push(ToolkitCall::Probe(path.to_path_buf()));
        let reader =
            hound::WavReader::open(path).map_err(|e| ToolkitError::Probe(e.to_string()))?;
        let spec = reader.spec();
        let frames = reader.duration() as f64;
        let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Ok(AudioMetadata {
            codec: "pcm".to_string(),
            format: "wav".to_string(),
            bitrate_kbps: 0,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            duration_secs: frames / spec.sample_rate as f64,
            size_bytes,
        })
    }

    async fn render(
        &self,
        input: &Path,
        output: &Path,
        filters: &[String],
    ) -> Result<(), ToolkitError> {
        self.calls.lock().unwrap().push(ToolkitCall::Render {
            input: input.to_path_buf(),
            filters: filters.to_vec(),
        });
        // Output lands before the hold so a held stage survives its input
        // being removed
        std::fs::copy(input, output).map_err(|e| ToolkitError::Launch {
            program: "copy".to_string(),
            source: e,
        })?;
        if self.hold_render.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        let delay = *self.render_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_render.load(Ordering::SeqCst) {
            return Err(Self::failure("ffmpeg"));
        }
        Ok(())
    }

    async fn encode(&self, job: &EncodeJob) -> Result<(), ToolkitError> {
        self.calls
            .lock()
            .unwrap()
            .push(ToolkitCall::Encode(job.clone()));
        if self.fail_encode.load(Ordering::SeqCst) {
            return Err(Self::failure("ffmpeg"));
        }
        std::fs::copy(&job.input, &job.output).map_err(|e| ToolkitError::Launch {
            program: "copy".to_string(),
            source: e,
        })?;
        Ok(())
    }
}

/// Remote side serving in-memory payloads by file id
#[derive(Default)]
pub struct FakeSource {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, id: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(id.to_string(), bytes);
    }
}

#[async_trait]
impl RemoteSource for FakeSource {
    async fn fetch(
        &self,
        file: &FileRef,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        transferred: &ByteCounter,
    ) -> Result<(), FetchError> {
        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(&file.id)
            .cloned()
            .ok_or_else(|| FetchError::Fatal("file not found".to_string()))?;
        transferred.add(bytes.len() as u64)?;
        sink.write_all(&bytes)
            .await
            .map_err(|e| FetchError::Fatal(e.to_string()))?;
        Ok(())
    }
}

pub fn file_ref(id: &str, name: &str) -> FileRef {
    FileRef {
        id: id.to_string(),
        file_name: Some(name.to_string()),
        size: None,
    }
}

/// Orchestrator over the in-memory store, the fake toolkit and fake source
pub struct Harness {
    pub dir: TempDir,
    pub toolkit: Arc<FakeToolkit>,
    pub source: Arc<FakeSource>,
    pub store: Arc<SessionStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(u64::MAX, Duration::from_secs(30))
    }

    pub fn with_limits(max_file_size: u64, timeout: Duration) -> Self {
        Self::build(max_file_size, timeout, Arc::new(SystemClock))
    }

    /// Harness whose session expiry follows `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::build(u64::MAX, Duration::from_secs(30), clock)
    }

    fn build(max_file_size: u64, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        let dir = TempDir::new().unwrap();
        let toolkit = FakeToolkit::new();
        let source = FakeSource::new();
        let store = Arc::new(SessionStore::in_memory(clock));
        let engine = AudioEngine::new(toolkit.clone(), dir.path(), timeout);
        let transfers = TransferManager::new(source.clone()).with_policy(RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
        });
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            transfers,
            engine,
            dir.path(),
            max_file_size,
        ));
        Self {
            dir,
            toolkit,
            source,
            store,
            orchestrator,
        }
    }

    /// Serve a short stereo tone under `id`
    pub fn serve_tone(&self, id: &str) {
        self.source.insert(id, tone_bytes(2, 8_000, 1.0));
    }

    /// Entries of the work directory, scratch directories included
    pub fn dir_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}
