//! Effect Chain Builder
//!
//! Compiles a session's [`Settings`] into the ordered list of stages the
//! engine executes:
//!
//! ```text
//! [Equalize?] [Effects?] [Spatialize?] [Normalize?] Convert
//! ```
//!
//! Every parameter is validated here, so an invalid setting is rejected
//! before the first stage runs.

use tonedesk_common::format::{AudioFormat, Bitrate};
use tonedesk_common::session::{EqBand, Settings, SpatialPosition};

use crate::error::ValidationError;

/// Bands below this frequency become low shelves
pub const LOW_SHELF_BELOW_HZ: f64 = 200.0;
/// Bands above this frequency become high shelves
pub const HIGH_SHELF_ABOVE_HZ: f64 = 8000.0;
/// Quality factor of peak bands
pub const PEAK_Q: f64 = 1.0;
/// Shelf slope expressed as Q (Butterworth)
pub const SHELF_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

pub const MIN_EQ_FREQ_HZ: f64 = 20.0;
pub const MAX_EQ_FREQ_HZ: f64 = 40_000.0;
pub const MAX_EQ_GAIN_DB: f64 = 20.0;
pub const MAX_EQ_BANDS: usize = 20;

/// Integrated loudness target of the normalize stage
pub const NORMALIZE_TARGET_LUFS: f64 = -14.0;

pub const MIN_BITRATE_KBPS: u32 = 32;
pub const MAX_BITRATE_KBPS: u32 = 512;
pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;
pub const MAX_CHANNELS: u8 = 8;
pub const MAX_BASS_BOOST_DB: u8 = 5;
pub const MAX_FADE_SECS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRole {
    LowShelf,
    HighShelf,
    Peak,
}

/// One EQ band resolved into a concrete filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqFilter {
    pub role: FilterRole,
    pub freq_hz: f64,
    pub gain_db: f64,
    pub q: f64,
}

impl EqFilter {
    pub fn from_band(band: &EqBand) -> Self {
        let role = if band.freq_hz < LOW_SHELF_BELOW_HZ {
            FilterRole::LowShelf
        } else if band.freq_hz > HIGH_SHELF_ABOVE_HZ {
            FilterRole::HighShelf
        } else {
            FilterRole::Peak
        };
        let q = match role {
            FilterRole::Peak => PEAK_Q,
            FilterRole::LowShelf | FilterRole::HighShelf => SHELF_Q,
        };
        Self {
            role,
            freq_hz: band.freq_hz,
            gain_db: band.gain_db,
            q,
        }
    }
}

/// Named effect with its fixed parameter set
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectKind {
    Reverb {
        room_size: f64,
        damping: f64,
        wet_level: f64,
    },
    Chorus {
        rate_hz: f64,
        depth: f64,
        centre_delay_ms: f64,
        feedback: f64,
        mix: f64,
    },
    Phaser {
        rate_hz: f64,
        depth: f64,
        centre_hz: f64,
        feedback: f64,
        mix: f64,
    },
    Compressor {
        threshold_db: f64,
        ratio: f64,
        attack_ms: f64,
        release_ms: f64,
    },
    Delay {
        seconds: f64,
        feedback: f64,
        mix: f64,
    },
    Distortion {
        drive_db: f64,
    },
    Limiter {
        threshold_db: f64,
        release_ms: f64,
    },
    Bitcrush {
        bit_depth: u8,
    },
}

impl EffectKind {
    /// Effect names accepted in settings, in menu order
    pub const NAMES: [&'static str; 8] = [
        "reverb",
        "chorus",
        "phaser",
        "compressor",
        "delay",
        "distortion",
        "limiter",
        "bitcrush",
    ];

    /// Look up an effect by name (case-insensitive) with its defaults
    pub fn from_name(name: &str) -> Option<Self> {
        let effect = match name.trim().to_ascii_lowercase().as_str() {
            "reverb" => EffectKind::Reverb {
                room_size: 0.5,
                damping: 0.5,
                wet_level: 0.33,
            },
            "chorus" => EffectKind::Chorus {
                rate_hz: 1.0,
                depth: 0.25,
                centre_delay_ms: 7.0,
                feedback: 0.0,
                mix: 0.5,
            },
            "phaser" => EffectKind::Phaser {
                rate_hz: 1.0,
                depth: 0.5,
                centre_hz: 1300.0,
                feedback: 0.0,
                mix: 0.5,
            },
            "compressor" => EffectKind::Compressor {
                threshold_db: -16.0,
                ratio: 4.0,
                attack_ms: 1.0,
                release_ms: 100.0,
            },
            "delay" => EffectKind::Delay {
                seconds: 0.25,
                feedback: 0.3,
                mix: 0.5,
            },
            "distortion" => EffectKind::Distortion { drive_db: 25.0 },
            "limiter" => EffectKind::Limiter {
                threshold_db: -1.0,
                release_ms: 100.0,
            },
            "bitcrush" => EffectKind::Bitcrush { bit_depth: 8 },
            _ => return None,
        };
        Some(effect)
    }

    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Reverb { .. } => "reverb",
            EffectKind::Chorus { .. } => "chorus",
            EffectKind::Phaser { .. } => "phaser",
            EffectKind::Compressor { .. } => "compressor",
            EffectKind::Delay { .. } => "delay",
            EffectKind::Distortion { .. } => "distortion",
            EffectKind::Limiter { .. } => "limiter",
            EffectKind::Bitcrush { .. } => "bitcrush",
        }
    }
}

/// Final encode parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionTarget {
    pub format: AudioFormat,
    /// `None` for lossless targets
    pub bitrate: Option<Bitrate>,
    pub sample_rate: u32,
    pub channels: u8,
    pub speed: f64,
    pub fade_in: f64,
    pub fade_out: f64,
    pub bass_boost_db: u8,
}

impl ConversionTarget {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            format: settings.format,
            bitrate: (!settings.format.is_lossless()).then_some(settings.bitrate),
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            speed: settings.speed,
            fade_in: settings.fade_in,
            fade_out: settings.fade_out,
            bass_boost_db: settings.bass_boost,
        }
    }
}

/// One executable step of a processing run
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Equalize(Vec<EqFilter>),
    Effects(Vec<EffectKind>),
    Spatialize(SpatialPosition),
    Normalize { target_lufs: f64 },
    Convert(ConversionTarget),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Equalize(_) => "equalize",
            Stage::Effects(_) => "effects",
            Stage::Spatialize(_) => "spatialize",
            Stage::Normalize { .. } => "normalize",
            Stage::Convert(_) => "convert",
        }
    }
}

/// Build the stage list for `settings`
pub fn build_chain(settings: &Settings) -> Result<Vec<Stage>, ValidationError> {
    validate_eq(&settings.eq)?;
    let effects = resolve_effects(&settings.effects)?;
    if let Some(position) = settings.spatial {
        validate_position(position)?;
    }
    validate_output(settings)?;

    let mut stages = Vec::with_capacity(5);
    if !settings.eq.is_empty() {
        stages.push(Stage::Equalize(
            settings.eq.iter().map(EqFilter::from_band).collect(),
        ));
    }
    if !effects.is_empty() {
        stages.push(Stage::Effects(effects));
    }
    if let Some(position) = settings.spatial {
        stages.push(Stage::Spatialize(position));
    }
    if settings.normalize {
        stages.push(Stage::Normalize {
            target_lufs: NORMALIZE_TARGET_LUFS,
        });
    }
    stages.push(Stage::Convert(ConversionTarget::from_settings(settings)));

    Ok(stages)
}

pub fn validate_eq_band(band: &EqBand) -> Result<(), ValidationError> {
    if !(MIN_EQ_FREQ_HZ..=MAX_EQ_FREQ_HZ).contains(&band.freq_hz) {
        return Err(ValidationError::EqFrequency(band.freq_hz));
    }
    if !(-MAX_EQ_GAIN_DB..=MAX_EQ_GAIN_DB).contains(&band.gain_db) {
        return Err(ValidationError::EqGain(band.gain_db));
    }
    Ok(())
}

pub fn validate_eq(bands: &[EqBand]) -> Result<(), ValidationError> {
    if bands.len() > MAX_EQ_BANDS {
        return Err(ValidationError::TooManyBands {
            count: bands.len(),
            max: MAX_EQ_BANDS,
        });
    }
    bands.iter().try_for_each(validate_eq_band)
}

pub fn resolve_effects(names: &[String]) -> Result<Vec<EffectKind>, ValidationError> {
    names
        .iter()
        .map(|name| {
            EffectKind::from_name(name).ok_or_else(|| ValidationError::UnknownEffect(name.clone()))
        })
        .collect()
}

pub fn validate_position(position: SpatialPosition) -> Result<(), ValidationError> {
    if !(-180.0..=180.0).contains(&position.azimuth) {
        return Err(ValidationError::Azimuth(position.azimuth));
    }
    if !(-90.0..=90.0).contains(&position.elevation) {
        return Err(ValidationError::Elevation(position.elevation));
    }
    Ok(())
}

pub fn validate_bitrate(bitrate: Bitrate) -> Result<(), ValidationError> {
    if (MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&bitrate.as_kbps()) {
        Ok(())
    } else {
        Err(ValidationError::Bitrate(bitrate.as_kbps()))
    }
}

pub fn validate_sample_rate(sample_rate: u32) -> Result<(), ValidationError> {
    if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        Ok(())
    } else {
        Err(ValidationError::SampleRate(sample_rate))
    }
}

pub fn validate_channels(channels: u8) -> Result<(), ValidationError> {
    if (1..=MAX_CHANNELS).contains(&channels) {
        Ok(())
    } else {
        Err(ValidationError::Channels(channels))
    }
}

pub fn validate_bass_boost(db: u8) -> Result<(), ValidationError> {
    if db <= MAX_BASS_BOOST_DB {
        Ok(())
    } else {
        Err(ValidationError::BassBoost(db))
    }
}

pub fn validate_speed(speed: f64) -> Result<(), ValidationError> {
    if (0.5..=2.0).contains(&speed) {
        Ok(())
    } else {
        Err(ValidationError::Speed(speed))
    }
}

pub fn validate_fade(seconds: f64) -> Result<(), ValidationError> {
    if (0.0..=MAX_FADE_SECS).contains(&seconds) {
        Ok(())
    } else {
        Err(ValidationError::Fade(seconds))
    }
}

fn validate_output(settings: &Settings) -> Result<(), ValidationError> {
    if !settings.format.is_lossless() {
        validate_bitrate(settings.bitrate)?;
    }
    validate_sample_rate(settings.sample_rate)?;
    validate_channels(settings.channels)?;
    validate_bass_boost(settings.bass_boost)?;
    validate_speed(settings.speed)?;
    validate_fade(settings.fade_in)?;
    validate_fade(settings.fade_out)
}
