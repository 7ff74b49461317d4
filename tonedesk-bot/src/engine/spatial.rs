//! Binaural placement of a source
//!
//! The source is folded to mono and rendered to stereo with an interaural
//! time difference and level difference on the ear facing away from it.
//! Azimuth 0 is straight ahead, positive azimuth is to the right. Elevation
//! is range-checked but does not alter the rendering.

use tonedesk_common::session::SpatialPosition;
use tracing::debug;

use super::pcm::PcmBuffer;
use crate::chain::validate_position;
use crate::error::ValidationError;

/// Interaural time difference at 90 degrees
pub const MAX_ITD_SECS: f64 = 0.0006;
/// Level difference at 90 degrees
pub const MAX_ILD_DB: f64 = 10.0;

/// Far-ear delay in frames and attenuation in dB for `azimuth` degrees
pub fn interaural_offsets(azimuth: f64, sample_rate: u32) -> (usize, f64) {
    let radians = azimuth.to_radians();
    let delay = (MAX_ITD_SECS * sample_rate as f64 * radians.sin().abs()).round() as usize;
    let attenuation_db = MAX_ILD_DB * (1.0 - radians.cos().abs());
    (delay, attenuation_db)
}

fn to_mono(pcm: &PcmBuffer) -> Result<Vec<f32>, ValidationError> {
    match pcm.channels {
        1 => Ok(pcm.samples.clone()),
        2 => Ok(pcm
            .samples
            .chunks_exact(2)
            .map(|frame| (frame[0] + frame[1]) * 0.5)
            .collect()),
        other => Err(ValidationError::SourceChannels(other)),
    }
}

/// Render `pcm` as a stereo signal placed at `position`
pub fn spatialize(pcm: &PcmBuffer, position: SpatialPosition) -> Result<PcmBuffer, ValidationError> {
    validate_position(position)?;
    let mono = to_mono(pcm)?;

    let (delay, attenuation_db) = interaural_offsets(position.azimuth, pcm.sample_rate);
    let far_gain = 10f32.powf(-(attenuation_db as f32) / 20.0);
    let source_right = position.azimuth.to_radians().sin() > 0.0;

    debug!(
        azimuth = position.azimuth,
        elevation = position.elevation,
        delay_frames = delay,
        attenuation_db,
        "Spatializing"
    );

    let frames = mono.len() + delay;
    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let near = mono.get(i).copied().unwrap_or(0.0);
        let far = i
            .checked_sub(delay)
            .and_then(|j| mono.get(j))
            .map(|s| s * far_gain)
            .unwrap_or(0.0);
        if source_right {
            samples.push(far);
            samples.push(near);
        } else {
            samples.push(near);
            samples.push(far);
        }
    }

    Ok(PcmBuffer::new(samples, 2, pcm.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(channels: u16) -> PcmBuffer {
        let mut samples = vec![0.0f32; 100 * channels as usize];
        for c in 0..channels as usize {
            samples[c] = 1.0;
        }
        PcmBuffer::new(samples, channels, 48_000)
    }

    fn at(azimuth: f64) -> SpatialPosition {
        SpatialPosition {
            azimuth,
            elevation: 0.0,
        }
    }

    #[test]
    fn test_front_is_centred() {
        let out = spatialize(&impulse(1), at(0.0)).unwrap();
        assert_eq!(out.channels, 2);
        let left: Vec<f32> = out.channel(0).collect();
        let right: Vec<f32> = out.channel(1).collect();
        assert_eq!(left, right);
        assert_eq!(out.frames(), 100);
    }

    #[test]
    fn test_right_source_delays_and_attenuates_left() {
        let out = spatialize(&impulse(1), at(90.0)).unwrap();
        let left: Vec<f32> = out.channel(0).collect();
        let right: Vec<f32> = out.channel(1).collect();

        // 0.6 ms at 48 kHz
        assert_eq!(out.frames(), 129);
        assert_eq!(right[0], 1.0);
        assert_eq!(left[0], 0.0);
        let expected = 10f32.powf(-10.0 / 20.0);
        assert!((left[29] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_left_source_mirrors() {
        let out = spatialize(&impulse(1), at(-90.0)).unwrap();
        let left: Vec<f32> = out.channel(0).collect();
        let right: Vec<f32> = out.channel(1).collect();
        assert_eq!(left[0], 1.0);
        assert_eq!(right[0], 0.0);
        assert!(right[29] > 0.0);
    }

    #[test]
    fn test_rear_has_no_offsets() {
        assert_eq!(interaural_offsets(180.0, 48_000).0, 0);
        assert!(interaural_offsets(180.0, 48_000).1.abs() < 1e-9);
        let (delay, ild) = interaural_offsets(45.0, 48_000);
        assert_eq!(delay, 20);
        assert!((ild - 10.0 * (1.0 - 45f64.to_radians().cos())).abs() < 1e-9);
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let pcm = PcmBuffer::new(vec![1.0, 0.0, 0.5, 0.5], 2, 48_000);
        let out = spatialize(&pcm, at(0.0)).unwrap();
        assert_eq!(out.samples, vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_rejects_surround_and_bad_elevation() {
        assert_eq!(
            spatialize(&impulse(6), at(30.0)),
            Err(ValidationError::SourceChannels(6))
        );
        let high = SpatialPosition {
            azimuth: 0.0,
            elevation: 95.0,
        };
        assert_eq!(
            spatialize(&impulse(1), high),
            Err(ValidationError::Elevation(95.0))
        );
    }
}
