//! Integrated loudness (ITU-R BS.1770) and loudness normalization

use tracing::{debug, warn};

use super::pcm::PcmBuffer;

/// Gating block length in seconds
const BLOCK_SECS: f64 = 0.4;
/// Step between blocks (75% overlap)
const STEP_SECS: f64 = 0.1;
const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = -10.0;
const SURROUND_WEIGHT: f64 = 1.41;

#[derive(Debug, Clone, Copy)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
}

impl Biquad {
    fn new(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b: [b0 / a0, b1 / a0, b2 / a0],
            a: [a1 / a0, a2 / a0],
        }
    }

    /// Pre-filter: high shelf, +4 dB above ~1.5 kHz
    fn k_shelf(sample_rate: u32) -> Self {
        let gain_db = 4.0;
        let q = std::f64::consts::FRAC_1_SQRT_2;
        let fc = 1500.0;

        let a = 10f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * fc / sample_rate as f64;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();
        let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::new(
            a * ((a + 1.0) + (a - 1.0) * cos + sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
            a * ((a + 1.0) + (a - 1.0) * cos - sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos + sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos),
            (a + 1.0) - (a - 1.0) * cos - sqrt_a_alpha,
        )
    }

    /// RLB weighting: second-order high pass at 38 Hz
    fn k_highpass(sample_rate: u32) -> Self {
        let q = 0.5;
        let fc = 38.0;

        let w0 = 2.0 * std::f64::consts::PI * fc / sample_rate as f64;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();

        Self::new(
            (1.0 + cos) / 2.0,
            -(1.0 + cos),
            (1.0 + cos) / 2.0,
            1.0 + alpha,
            -2.0 * cos,
            1.0 - alpha,
        )
    }

    fn apply(&self, input: &[f64]) -> Vec<f64> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        input
            .iter()
            .map(|&x| {
                let y = self.b[0] * x + self.b[1] * x1 + self.b[2] * x2
                    - self.a[0] * y1
                    - self.a[1] * y2;
                x2 = x1;
                x1 = x;
                y2 = y1;
                y1 = y;
                y
            })
            .collect()
    }
}

fn channel_weight(index: usize, channels: usize) -> f64 {
    if channels >= 6 {
        // L R C LFE Ls Rs ...
        match index {
            3 => 0.0,
            4 | 5 => SURROUND_WEIGHT,
            _ => 1.0,
        }
    } else {
        match index {
            3 | 4 => SURROUND_WEIGHT,
            _ => 1.0,
        }
    }
}

fn block_loudness(weighted_power: f64) -> f64 {
    -0.691 + 10.0 * weighted_power.log10()
}

/// Integrated loudness of `pcm` in LUFS
///
/// `None` when the signal is shorter than one gating block or every block
/// falls below the absolute gate.
pub fn integrated_loudness(pcm: &PcmBuffer) -> Option<f64> {
    let channels = pcm.channels as usize;
    let rate = pcm.sample_rate as f64;
    let block_len = (BLOCK_SECS * rate).round() as usize;
    let step = (STEP_SECS * rate).round() as usize;
    let frames = pcm.frames();

    if channels == 0 || block_len == 0 || step == 0 || frames < block_len {
        return None;
    }

    let shelf = Biquad::k_shelf(pcm.sample_rate);
    let highpass = Biquad::k_highpass(pcm.sample_rate);
    let filtered: Vec<Vec<f64>> = (0..channels)
        .map(|c| {
            let raw: Vec<f64> = pcm.channel(c).map(f64::from).collect();
            highpass.apply(&shelf.apply(&raw))
        })
        .collect();

    let block_count = (frames - block_len) / step + 1;
    // Mean square per channel per block
    let powers: Vec<Vec<f64>> = (0..block_count)
        .map(|j| {
            let start = j * step;
            filtered
                .iter()
                .map(|ch| {
                    ch[start..start + block_len].iter().map(|s| s * s).sum::<f64>()
                        / block_len as f64
                })
                .collect()
        })
        .collect();

    let weighted = |block: &[f64]| -> f64 {
        block
            .iter()
            .enumerate()
            .map(|(i, z)| channel_weight(i, channels) * z)
            .sum()
    };

    let above_absolute: Vec<&Vec<f64>> = powers
        .iter()
        .filter(|block| block_loudness(weighted(block)) > ABSOLUTE_GATE_LUFS)
        .collect();
    if above_absolute.is_empty() {
        return None;
    }

    let mean_power = |blocks: &[&Vec<f64>]| -> f64 {
        (0..channels)
            .map(|i| {
                channel_weight(i, channels) * blocks.iter().map(|b| b[i]).sum::<f64>()
                    / blocks.len() as f64
            })
            .sum()
    };

    let relative_gate = block_loudness(mean_power(&above_absolute)) + RELATIVE_GATE_LU;
    let gated: Vec<&Vec<f64>> = above_absolute
        .into_iter()
        .filter(|block| block_loudness(weighted(block)) > relative_gate)
        .collect();
    if gated.is_empty() {
        return None;
    }

    Some(block_loudness(mean_power(&gated)))
}

/// Scale `pcm` so its integrated loudness equals `target_lufs`
///
/// Returns the applied gain in dB, or `None` when loudness could not be
/// measured and the audio was left untouched.
pub fn normalize(pcm: &mut PcmBuffer, target_lufs: f64) -> Option<f64> {
    let Some(measured) = integrated_loudness(pcm) else {
        warn!(
            duration_secs = pcm.duration_secs(),
            "Loudness not measurable, skipping normalization"
        );
        return None;
    };

    let gain_db = target_lufs - measured;
    let gain = 10f64.powf(gain_db / 20.0) as f32;
    pcm.samples.iter_mut().for_each(|s| *s *= gain);

    debug!(measured_lufs = measured, target_lufs, gain_db, "Normalized loudness");
    Some(gain_db)
}
