//! Audio format catalogue
//!
//! Every target the conversion stage can encode, with the encoder, container
//! extension, and whether a bitrate applies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Encodable output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    M4a,
    Aac,
    Ogg,
    Opus,
    Flac,
    Wav,
    Alac,
    Wma,
    Ac3,
    Webm,
    Aiff,
    Wv,
    Tta,
}

impl AudioFormat {
    /// All encodable formats, in menu order
    pub const ALL: [AudioFormat; 14] = [
        AudioFormat::Mp3,
        AudioFormat::M4a,
        AudioFormat::Aac,
        AudioFormat::Flac,
        AudioFormat::Wav,
        AudioFormat::Alac,
        AudioFormat::Ogg,
        AudioFormat::Opus,
        AudioFormat::Wma,
        AudioFormat::Wv,
        AudioFormat::Tta,
        AudioFormat::Aiff,
        AudioFormat::Webm,
        AudioFormat::Ac3,
    ];

    /// Short lowercase code used in settings and action tokens
    pub fn code(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Aac => "aac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Opus => "opus",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
            AudioFormat::Alac => "alac",
            AudioFormat::Wma => "wma",
            AudioFormat::Ac3 => "ac3",
            AudioFormat::Webm => "webm",
            AudioFormat::Aiff => "aiff",
            AudioFormat::Wv => "wv",
            AudioFormat::Tta => "tta",
        }
    }

    /// Encoder name understood by the external toolkit
    pub fn codec(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::M4a | AudioFormat::Aac => "aac",
            AudioFormat::Ogg => "libvorbis",
            AudioFormat::Opus | AudioFormat::Webm => "libopus",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "pcm_s16le",
            AudioFormat::Alac => "alac",
            AudioFormat::Wma => "wmav2",
            AudioFormat::Ac3 => "ac3",
            AudioFormat::Aiff => "pcm_s16be",
            AudioFormat::Wv => "wavpack",
            AudioFormat::Tta => "tta",
        }
    }

    /// File extension of the output container
    pub fn extension(&self) -> &'static str {
        match self {
            // ALAC lives in an MP4 container
            AudioFormat::Alac => "m4a",
            other => other.code(),
        }
    }

    /// Lossless targets ignore the bitrate setting
    pub fn is_lossless(&self) -> bool {
        matches!(
            self,
            AudioFormat::Flac
                | AudioFormat::Wav
                | AudioFormat::Alac
                | AudioFormat::Aiff
                | AudioFormat::Wv
                | AudioFormat::Tta
        )
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "MP3 (Lossy)",
            AudioFormat::M4a => "M4A/AAC (Lossy)",
            AudioFormat::Aac => "AAC (Lossy)",
            AudioFormat::Ogg => "OGG Vorbis (Lossy)",
            AudioFormat::Opus => "OPUS (Lossy)",
            AudioFormat::Flac => "FLAC (Lossless)",
            AudioFormat::Wav => "WAV (Lossless)",
            AudioFormat::Alac => "ALAC (Lossless)",
            AudioFormat::Wma => "WMA (Lossy)",
            AudioFormat::Ac3 => "AC3 (Lossy)",
            AudioFormat::Webm => "WebM Audio",
            AudioFormat::Aiff => "AIFF (Lossless)",
            AudioFormat::Wv => "WavPack (Lossless)",
            AudioFormat::Tta => "TTA (Lossless)",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for AudioFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        if code == "aif" {
            return Ok(AudioFormat::Aiff);
        }
        AudioFormat::ALL
            .iter()
            .copied()
            .find(|format| format.code() == code)
            .ok_or_else(|| Error::InvalidInput(format!("Unsupported output format: {}", s)))
    }
}

/// Target bitrate in kbit/s, persisted as text like `"320k"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bitrate(u32);

impl Bitrate {
    pub const fn kbps(value: u32) -> Self {
        Self(value)
    }

    pub fn as_kbps(&self) -> u32 {
        self.0
    }
}

impl Default for Bitrate {
    fn default() -> Self {
        Self(320)
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}k", self.0)
    }
}

impl FromStr for Bitrate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_suffix('k')
            .or_else(|| trimmed.strip_suffix('K'))
            .unwrap_or(trimmed);
        digits
            .parse::<u32>()
            .ok()
            .filter(|kbps| *kbps > 0)
            .map(Bitrate)
            .ok_or_else(|| Error::InvalidInput(format!("Invalid bitrate: {}", s)))
    }
}

impl TryFrom<String> for Bitrate {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Bitrate> for String {
    fn from(value: Bitrate) -> Self {
        value.to_string()
    }
}
