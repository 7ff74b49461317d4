//! Argument parsing for `/eq` and `/3d`

use tonedesk_common::session::{EqBand, SpatialPosition};

use crate::chain::{validate_eq, validate_position};
use crate::error::ValidationError;

pub const EQ_USAGE: &str = "EQ command format:\n\
    /eq --100hz +3db --1khz -2db --5khz +1.5db\n\n\
    Frequency: 20 Hz to 40 kHz (use k for kHz)\n\
    Gain: -20 dB to +20 dB, sign required\n\
    Up to 20 bands; the list replaces the current EQ.";

pub const SPATIAL_USAGE: &str = "3D position format:\n\
    /3d <azimuth> [elevation]\n\n\
    Azimuth: -180 to 180 degrees (negative is left, 90 is right)\n\
    Elevation: -90 to 90 degrees, default 0";

fn usage_error(detail: &str, usage: &str) -> ValidationError {
    ValidationError::MalformedCommand(format!("{}\n\n{}", detail, usage))
}

/// `--100hz`, `--1.5kHz`
fn parse_frequency(token: &str) -> Option<f64> {
    let body = token.strip_prefix("--")?.to_ascii_lowercase();
    let value = body.strip_suffix("hz")?;
    let (digits, scale) = match value.strip_suffix('k') {
        Some(digits) => (digits, 1000.0),
        None => (value, 1.0),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    digits.parse::<f64>().ok().map(|f| f * scale)
}

/// `+3db`, `-1.5dB`; the sign is mandatory
fn parse_gain(token: &str) -> Option<f64> {
    let lower = token.to_ascii_lowercase();
    let value = lower.strip_suffix("db")?;
    if !value.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = &value[1..];
    if magnitude.is_empty() || !magnitude.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    value.parse::<f64>().ok()
}

/// Parse `/eq` arguments into bands, in the order given
pub fn parse_eq_args(args: &str) -> Result<Vec<EqBand>, ValidationError> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(usage_error("No EQ bands given.", EQ_USAGE));
    }

    let mut bands = Vec::new();
    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        let freq = parse_frequency(token)
            .ok_or_else(|| usage_error(&format!("Cannot read frequency '{}'.", token), EQ_USAGE))?;
        let gain_token = iter
            .next()
            .ok_or_else(|| usage_error(&format!("Missing gain after '{}'.", token), EQ_USAGE))?;
        let gain = parse_gain(gain_token)
            .ok_or_else(|| usage_error(&format!("Cannot read gain '{}'.", gain_token), EQ_USAGE))?;
        bands.push(EqBand::new(freq, gain));
    }

    validate_eq(&bands)?;
    Ok(bands)
}

/// Parse `/3d <azimuth> [elevation]`
pub fn parse_spatial_args(args: &str) -> Result<SpatialPosition, ValidationError> {
    let mut parts = args.split_whitespace();
    let azimuth = parts
        .next()
        .and_then(|v| v.trim_end_matches('°').parse::<f64>().ok())
        .ok_or_else(|| usage_error("Azimuth is required.", SPATIAL_USAGE))?;
    let elevation = match parts.next() {
        Some(v) => v
            .trim_end_matches('°')
            .parse::<f64>()
            .map_err(|_| usage_error(&format!("Cannot read elevation '{}'.", v), SPATIAL_USAGE))?,
        None => 0.0,
    };
    if parts.next().is_some() {
        return Err(usage_error("Too many values.", SPATIAL_USAGE));
    }

    let position = SpatialPosition { azimuth, elevation };
    validate_position(position)?;
    Ok(position)
}
