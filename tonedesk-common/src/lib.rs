//! # tonedesk common library
//!
//! Shared code for the tonedesk crates:
//! - Session data model (sessions, settings, operation records)
//! - Audio format catalogue
//! - Configuration loading
//! - Error type
//! - Clock and timestamp helpers
//! - Human-readable formatting

pub mod config;
pub mod error;
pub mod format;
pub mod human;
pub mod session;
pub mod time;

pub use error::{Error, Result};
pub use format::{AudioFormat, Bitrate};
pub use session::{
    AudioMetadata, EqBand, OperationRecord, OperationStatus, ProcessedArtifact, Session,
    SessionPhase, Settings, SpatialPosition, UserId,
};
