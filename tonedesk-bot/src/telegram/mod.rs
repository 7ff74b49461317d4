//! Telegram Bot API adapter
//!
//! Long polling, message primitives and file download over `reqwest`.

pub mod api;
pub mod source;
pub mod transport;

pub use api::TelegramClient;
pub use source::TelegramFileSource;
pub use transport::{update_to_event, TelegramTransport};
