//! ffmpeg / ffprobe subprocess toolkit
//!
//! Child processes are spawned with `kill_on_drop`, so a run that is
//! cancelled or times out takes its ffmpeg process down with it.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tonedesk_common::session::AudioMetadata;
use tracing::debug;

use super::filters::{encode_args, render_args};
use super::toolkit::{EncodeJob, MediaToolkit, ToolkitError};

/// Longest stderr tail kept in error messages
const STDERR_TAIL: usize = 800;

pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegToolkit {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Check that ffmpeg can be launched
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<Vec<u8>, ToolkitError> {
        let name = program.display().to_string();
        debug!(program = %name, args = ?args, "Running media tool");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolkitError::Launch {
                program: name.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ToolkitError::Failed {
                program: name,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(output.stdout)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, path: &Path) -> Result<AudioMetadata, ToolkitError> {
        let args: Vec<String> = vec![
            "-v".into(),
            "quiet".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            "-show_streams".into(),
            path.to_string_lossy().into_owned(),
        ];
        let stdout = self.run(&self.ffprobe, &args).await?;
        parse_probe_output(&stdout)
    }

    async fn render(
        &self,
        input: &Path,
        output: &Path,
        filters: &[String],
    ) -> Result<(), ToolkitError> {
        self.run(&self.ffmpeg, &render_args(input, output, filters))
            .await
            .map(|_| ())
    }

    async fn encode(&self, job: &EncodeJob) -> Result<(), ToolkitError> {
        self.run(&self.ffmpeg, &encode_args(job)).await.map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
    bit_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

fn parse_num<T: std::str::FromStr>(value: Option<&String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Convert ffprobe's JSON report into [`AudioMetadata`]
pub fn parse_probe_output(json: &[u8]) -> Result<AudioMetadata, ToolkitError> {
    let report: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| ToolkitError::Probe(e.to_string()))?;

    let stream = report
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_else(|| ToolkitError::Probe("no audio stream".to_string()))?;
    let format = report.format.as_ref();

    let bit_rate: Option<u64> = parse_num(stream.bit_rate.as_ref())
        .or_else(|| format.and_then(|f| parse_num(f.bit_rate.as_ref())));
    let duration: Option<f64> = parse_num(stream.duration.as_ref())
        .or_else(|| format.and_then(|f| parse_num(f.duration.as_ref())));

    Ok(AudioMetadata {
        codec: stream.codec_name.clone().unwrap_or_default(),
        format: format
            .and_then(|f| f.format_name.clone())
            .unwrap_or_default(),
        bitrate_kbps: bit_rate.map(|b| (b / 1000) as u32).unwrap_or(0),
        sample_rate: parse_num(stream.sample_rate.as_ref()).unwrap_or(0),
        channels: stream.channels.unwrap_or(0),
        duration_secs: duration.unwrap_or(0.0),
        size_bytes: format.and_then(|f| parse_num(f.size.as_ref())).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "mjpeg"},
                {"codec_type": "audio", "codec_name": "mp3", "sample_rate": "44100",
                 "channels": 2, "bit_rate": "320000", "duration": "185.3"}
            ],
            "format": {"format_name": "mp3", "duration": "185.4", "size": "7413120",
                       "bit_rate": "320100"}
        }"#;
        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.codec, "mp3");
        assert_eq!(meta.format, "mp3");
        assert_eq!(meta.bitrate_kbps, 320);
        assert_eq!(meta.sample_rate, 44_100);
        assert_eq!(meta.channels, 2);
        assert!((meta.duration_secs - 185.3).abs() < 1e-9);
        assert_eq!(meta.size_bytes, 7_413_120);
    }

    #[test]
    fn test_probe_falls_back_to_container_fields() {
        let json = br#"{
            "streams": [{"codec_type": "audio", "codec_name": "flac",
                         "sample_rate": "96000", "channels": 1}],
            "format": {"format_name": "flac", "duration": "10.0", "bit_rate": "1411000"}
        }"#;
        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.bitrate_kbps, 1411);
        assert_eq!(meta.duration_secs, 10.0);
        assert_eq!(meta.size_bytes, 0);
    }

    #[test]
    fn test_probe_without_audio_stream() {
        let json = br#"{"streams": [{"codec_type": "video"}], "format": {}}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(ToolkitError::Probe(_))
        ));
        assert!(matches!(
            parse_probe_output(b"not json"),
            Err(ToolkitError::Probe(_))
        ));
    }

    #[test]
    fn test_stderr_tail_keeps_end() {
        let long = "x".repeat(2000) + "fatal";
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.ends_with("fatal"));
        assert!(tail.len() <= STDERR_TAIL + 1);
    }
}
