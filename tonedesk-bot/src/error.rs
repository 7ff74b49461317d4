//! Error types for tonedesk-bot
//!
//! [`ValidationError`] covers every out-of-range parameter and malformed
//! request. [`BotError`] is the orchestrator-level taxonomy that the chat
//! layer turns into replies.

use thiserror::Error;
use tonedesk_common::human::format_size;

use crate::engine::EngineError;
use crate::transfer::TransferError;
use crate::transport::TransportError;

/// Rejected parameter or request, detected before any work starts
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("EQ frequency {0} Hz is outside 20 Hz to 40 kHz")]
    EqFrequency(f64),

    #[error("EQ gain {0} dB is outside ±20 dB")]
    EqGain(f64),

    #[error("Too many EQ bands: {count} (maximum {max})")]
    TooManyBands { count: usize, max: usize },

    #[error("Unknown effect '{0}'")]
    UnknownEffect(String),

    #[error("Unsupported output format '{0}'")]
    UnsupportedFormat(String),

    #[error("Bitrate {0}k is outside 32k to 512k")]
    Bitrate(u32),

    #[error("Sample rate {0} Hz is outside 8000 to 192000 Hz")]
    SampleRate(u32),

    #[error("Channel count {0} is outside 1 to 8")]
    Channels(u8),

    #[error("Bass boost {0} dB is outside 0 to 5 dB")]
    BassBoost(u8),

    #[error("Speed {0}x is outside 0.5x to 2.0x")]
    Speed(f64),

    #[error("Fade of {0} s is outside 0 to 60 s")]
    Fade(f64),

    #[error("Azimuth {0}° is outside -180° to 180°")]
    Azimuth(f64),

    #[error("Elevation {0}° is outside -90° to 90°")]
    Elevation(f64),

    #[error("3D audio needs a mono or stereo source, got {0} channels")]
    SourceChannels(u16),

    #[error("File is {} but the limit is {}", format_size(*size), format_size(*max))]
    FileTooLarge { size: u64, max: u64 },

    #[error("{0}")]
    MalformedCommand(String),
}

/// Top-level error for user-initiated operations
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Processing failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Storage error: {0}")]
    Storage(#[from] tonedesk_common::Error),

    #[error("Chat transport error: {0}")]
    Chat(#[from] TransportError),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("No active session")]
    NoSession,
}

impl BotError {
    /// Text shown to the end user
    pub fn user_message(&self) -> String {
        match self {
            BotError::Transfer(TransferError::NonRetryable(_)) => {
                "❌ This file cannot be downloaded. Please send it again or try another file."
                    .to_string()
            }
            BotError::Transfer(TransferError::Exhausted { attempts, .. }) => format!(
                "❌ Download failed after {} attempts. Please try again in a moment.",
                attempts
            ),
            BotError::Transfer(TransferError::TooLarge { limit, received }) => format!(
                "⚠️ {}",
                ValidationError::FileTooLarge {
                    size: *received,
                    max: *limit
                }
            ),
            BotError::Transfer(TransferError::Local(_)) => {
                "❌ Could not store the file. Please try again later.".to_string()
            }
            BotError::Validation(err) => format!("⚠️ {}", err),
            BotError::Engine(EngineError::Timeout(limit)) => format!(
                "⏱ Processing took longer than {} seconds and was stopped. \
                 Your settings are kept, try fewer effects or a shorter file.",
                limit.as_secs()
            ),
            BotError::Engine(EngineError::InvalidParameter(err)) => format!("⚠️ {}", err),
            BotError::Engine(EngineError::Cancelled) => "🚫 Processing cancelled.".to_string(),
            BotError::Engine(_) => {
                "❌ Processing failed. Your settings are kept, adjust them and try again."
                    .to_string()
            }
            BotError::Storage(_) | BotError::Chat(_) => {
                "❌ Something went wrong on our side. Please try again.".to_string()
            }
            BotError::StateConflict(reason) => format!("⏳ {}", reason),
            BotError::NoSession => {
                "📂 No active file. Send an audio file to get started.".to_string()
            }
        }
    }
}
