//! tonedesk-bot library interface
//!
//! Chat-driven audio processing: files arrive through a chat transport, are
//! downloaded by the [`transfer`] manager, configured and processed through
//! the [`orchestrator`], and the result is sent back to the user.

pub mod bot;
pub mod chain;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod store;
pub mod telegram;
pub mod transfer;
pub mod transport;

pub use crate::error::{BotError, ValidationError};
pub use crate::orchestrator::Orchestrator;

/// Short git commit hash of the build
pub const GIT_HASH: &str = env!("TONEDESK_GIT_HASH");
/// Build time as RFC 3339
pub const BUILD_TIMESTAMP: &str = env!("TONEDESK_BUILD_TIMESTAMP");
/// Cargo profile the binary was built with
pub const BUILD_PROFILE: &str = env!("TONEDESK_BUILD_PROFILE");
