//! In-memory PCM for the sample-level stages
//!
//! Decoding uses symphonia; intermediates are written back as 32-bit float
//! WAV with hound so no precision is lost between stages.

use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::EngineError;

/// Interleaved f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Samples of one channel
    pub fn channel(&self, index: usize) -> impl Iterator<Item = f32> + '_ {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels.max(1) as usize)
            .copied()
    }
}

/// Decode every frame of the first audio track in `path`
pub fn decode_file(path: &Path) -> Result<PcmBuffer, EngineError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EngineError::Decode(format!("probe failed: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| EngineError::Decode("no audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| EngineError::Decode("sample rate unknown".to_string()))?;
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::Decode(format!("no decoder: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(EngineError::Decode(format!("read failed: {}", e))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = %e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(EngineError::Decode(format!("decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count() as u16;
        let required = decoded.capacity() * channels as usize;
        if buffer.as_ref().map_or(true, |b| b.capacity() < required) {
            buffer = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        if let Some(sample_buffer) = buffer.as_mut() {
            sample_buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buffer.samples());
        }
    }

    if channels == 0 {
        return Err(EngineError::Decode("channel layout unknown".to_string()));
    }

    let pcm = PcmBuffer::new(samples, channels, sample_rate);
    debug!(
        path = %path.display(),
        frames = pcm.frames(),
        channels,
        sample_rate,
        "Decoded audio"
    );
    Ok(pcm)
}

/// Write `pcm` as 32-bit float WAV
pub fn write_wav(path: &Path, pcm: &PcmBuffer) -> Result<(), EngineError> {
    let spec = hound::WavSpec {
        channels: pcm.channels,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let wav_err = |e: hound::Error| EngineError::Internal(format!("wav write failed: {}", e));

    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in &pcm.samples {
        writer.write_sample(sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wav_round_trip_preserves_samples() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..4800)
            .flat_map(|i| {
                let v = (i as f32 * 0.01).sin() * 0.5;
                [v, -v]
            })
            .collect();
        let pcm = PcmBuffer::new(samples, 2, 48_000);

        write_wav(&path, &pcm).unwrap();
        let decoded = decode_file(&path).unwrap();

        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 48_000);
        assert_eq!(decoded.frames(), 4800);
        for (a, b) in decoded.samples.iter().zip(pcm.samples.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_decode_rejects_non_audio() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(matches!(decode_file(&path), Err(EngineError::Decode(_))));
    }

    #[test]
    fn test_channel_iterator() {
        let pcm = PcmBuffer::new(vec![1.0, 2.0, 3.0, 4.0], 2, 8000);
        assert_eq!(pcm.channel(0).collect::<Vec<_>>(), vec![1.0, 3.0]);
        assert_eq!(pcm.channel(1).collect::<Vec<_>>(), vec![2.0, 4.0]);
        assert_eq!(pcm.duration_secs(), 2.0 / 8000.0);
    }
}
