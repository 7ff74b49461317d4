//! Filter expressions and encoder arguments for the ffmpeg toolkit
//!
//! Each EQ band and effect maps onto one ffmpeg audio filter (or a short
//! chain of them) with the effect's fixed parameters.

use std::path::Path;
use tonedesk_common::format::AudioFormat;
use tracing::warn;

use crate::chain::{ConversionTarget, EffectKind, EqFilter, FilterRole};

use super::toolkit::EncodeJob;

/// Sample rates libopus accepts
const OPUS_SAMPLE_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

/// Highest EQ center frequency as a fraction of the Nyquist frequency
const NYQUIST_HEADROOM: f64 = 0.95;

/// Compact decimal rendering: `0.5`, `100`, `0.1585`
pub fn num(value: f64) -> String {
    let text = format!("{:.4}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

pub fn eq_filter_expr(filter: &EqFilter) -> String {
    let name = match filter.role {
        FilterRole::LowShelf => "lowshelf",
        FilterRole::HighShelf => "highshelf",
        FilterRole::Peak => "equalizer",
    };
    format!(
        "{}=f={}:t=q:w={}:g={}",
        name,
        num(filter.freq_hz),
        num(filter.q),
        num(filter.gain_db)
    )
}

/// EQ filter expressions for a stage input sampled at `sample_rate`.
///
/// ffmpeg rejects a biquad centered at or above half the sample rate, so a
/// band that high is pulled just below it. A rate of 0 means unknown and
/// leaves the bands untouched.
pub fn eq_filters_for_rate(bands: &[EqFilter], sample_rate: u32) -> Vec<String> {
    let ceiling = f64::from(sample_rate) / 2.0 * NYQUIST_HEADROOM;
    bands
        .iter()
        .map(|band| {
            if sample_rate == 0 || band.freq_hz <= ceiling {
                return eq_filter_expr(band);
            }
            warn!(
                freq_hz = band.freq_hz,
                sample_rate,
                clamped_hz = ceiling.floor(),
                "EQ band above Nyquist, clamping"
            );
            eq_filter_expr(&EqFilter {
                freq_hz: ceiling.floor(),
                ..*band
            })
        })
        .collect()
}

pub fn effect_filter_expr(effect: &EffectKind) -> String {
    match *effect {
        EffectKind::Reverb {
            room_size,
            damping,
            wet_level,
        } => {
            // Four early reflections spread over the room size
            let base_ms = 20.0 + room_size * 80.0;
            let delays: Vec<String> = [1.0, 1.5, 2.1, 2.9]
                .iter()
                .map(|k| num(base_ms * k))
                .collect();
            let decays: Vec<String> = [1.0, 0.7, 0.5, 0.35]
                .iter()
                .map(|k| num(wet_level * (1.0 - damping * 0.5) * k))
                .collect();
            format!(
                "aecho=1:{}:{}:{}",
                num(1.0 - wet_level * 0.5),
                delays.join("|"),
                decays.join("|")
            )
        }
        EffectKind::Chorus {
            rate_hz,
            depth,
            centre_delay_ms,
            feedback,
            mix,
        } => format!(
            "chorus=0.7:{}:{}:{}:{}:{}",
            num(1.0 - mix * 0.2 + feedback * 0.1),
            num(centre_delay_ms),
            num(mix),
            num(rate_hz),
            num(depth * centre_delay_ms)
        ),
        EffectKind::Phaser {
            rate_hz,
            depth,
            centre_hz,
            feedback,
            mix,
        } => format!(
            "aphaser=in_gain=0.6:out_gain={}:delay={}:decay={}:speed={}:type=t",
            num(0.5 + mix * 0.5),
            num((2000.0 / centre_hz * depth * 2.0).clamp(0.1, 5.0)),
            num((0.4 + feedback * 0.5).min(0.99)),
            num(rate_hz)
        ),
        EffectKind::Compressor {
            threshold_db,
            ratio,
            attack_ms,
            release_ms,
        } => format!(
            "acompressor=threshold={}:ratio={}:attack={}:release={}",
            num(db_to_linear(threshold_db)),
            num(ratio),
            num(attack_ms),
            num(release_ms)
        ),
        EffectKind::Delay {
            seconds,
            feedback,
            mix,
        } => {
            // Feedback approximated by three decaying repeats
            let delays: Vec<String> = (1..=3).map(|k| num(seconds * 1000.0 * k as f64)).collect();
            let decays: Vec<String> = (0..3)
                .map(|k| num(mix * feedback.powi(k)))
                .collect();
            format!("aecho=1:1:{}:{}", delays.join("|"), decays.join("|"))
        }
        EffectKind::Distortion { drive_db } => format!(
            "volume={}dB,asoftclip=type=tanh,volume=-{}dB",
            num(drive_db),
            num(drive_db / 2.0)
        ),
        EffectKind::Limiter {
            threshold_db,
            release_ms,
        } => format!(
            "alimiter=limit={}:release={}",
            num(db_to_linear(threshold_db)),
            num(release_ms)
        ),
        EffectKind::Bitcrush { bit_depth } => {
            format!("acrusher=bits={}:mode=lin:mix=1", bit_depth)
        }
    }
}

/// Filters applied during the final encode: bass boost, fades, tempo
pub fn conversion_filters(target: &ConversionTarget, input_duration: Option<f64>) -> Vec<String> {
    let mut filters = Vec::new();

    if target.bass_boost_db > 0 {
        filters.push(format!(
            "equalizer=f=100:width_type=h:width=200:g={}",
            target.bass_boost_db
        ));
    }
    if target.fade_in > 0.0 {
        filters.push(format!("afade=t=in:st=0:d={}", num(target.fade_in)));
    }
    if target.fade_out > 0.0 {
        match input_duration.filter(|d| *d > 0.0) {
            Some(duration) => filters.push(format!(
                "afade=t=out:st={}:d={}",
                num((duration - target.fade_out).max(0.0)),
                num(target.fade_out)
            )),
            None => warn!("Input duration unknown, skipping fade-out"),
        }
    }
    if (target.speed - 1.0).abs() > f64::EPSILON {
        filters.push(format!("atempo={}", num(target.speed)));
    }

    filters
}

/// Sample rate actually requested from the encoder.
///
/// Opus only accepts a fixed set of rates; anything else moves to the
/// nearest one, preferring the higher rate on a tie.
pub fn effective_sample_rate(format: AudioFormat, requested: u32) -> u32 {
    match format {
        AudioFormat::Opus | AudioFormat::Webm if !OPUS_SAMPLE_RATES.contains(&requested) => {
            let nearest = OPUS_SAMPLE_RATES
                .iter()
                .rev()
                .copied()
                .min_by_key(|rate| rate.abs_diff(requested))
                .unwrap_or(48_000);
            warn!(requested, nearest, "Opus does not support this sample rate");
            nearest
        }
        _ => requested,
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// ffmpeg arguments that decode, filter and write float WAV
pub fn render_args(input: &Path, output: &Path, filters: &[String]) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(path_arg(input));
    args.extend(["-map".to_string(), "0:a:0".to_string()]);
    if !filters.is_empty() {
        args.extend(["-af".to_string(), filters.join(",")]);
    }
    args.extend(
        ["-c:a", "pcm_f32le", "-f", "wav"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(path_arg(output));
    args
}

/// ffmpeg arguments for the final encode
pub fn encode_args(job: &EncodeJob) -> Vec<String> {
    let target = &job.target;
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(path_arg(&job.input));

    match &job.metadata_source {
        Some(source) => {
            args.push("-i".to_string());
            args.push(path_arg(source));
            args.extend(
                ["-map", "0:a:0", "-map_metadata", "1"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        None => args.extend(["-map".to_string(), "0:a:0".to_string()]),
    }

    let filters = conversion_filters(target, job.input_duration);
    if !filters.is_empty() {
        args.extend(["-af".to_string(), filters.join(",")]);
    }

    args.extend(["-c:a".to_string(), target.format.codec().to_string()]);
    if let Some(bitrate) = target.bitrate {
        args.extend(["-b:a".to_string(), bitrate.to_string()]);
    }
    args.extend([
        "-ar".to_string(),
        effective_sample_rate(target.format, target.sample_rate).to_string(),
        "-ac".to_string(),
        target.channels.to_string(),
    ]);

    match target.format {
        AudioFormat::M4a | AudioFormat::Aac | AudioFormat::Alac => {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }
        AudioFormat::Flac => {
            args.extend(["-compression_level".to_string(), "8".to_string()]);
        }
        _ => {}
    }

    args.push(path_arg(&job.output));
    args
}
