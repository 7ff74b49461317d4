//! Chat transport boundary
//!
//! Everything the bot needs from a chat platform: inbound events and a few
//! outbound primitives. [`crate::telegram`] implements it over the Telegram
//! Bot API.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tonedesk_common::human::{format_size, progress_bar};
use tonedesk_common::session::UserId;
use tracing::debug;

use crate::transfer::{FileRef, ProgressReporter, TransferProgress};

pub type ChatId = i64;

/// A message previously sent by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// One button: a label and the action token it sends back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    pub token: String,
}

impl Choice {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// Rows of buttons
pub type ChoiceGrid = Vec<Vec<Choice>>;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEventKind {
    FileUpload(FileRef),
    /// `/name args`, name without the slash and lowercased
    Command { name: String, args: String },
    /// Button press
    Action {
        token: String,
        callback_id: String,
        message: Option<MessageRef>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub kind: ChatEventKind,
}

impl ChatEvent {
    /// Cancel requests skip the per-user queue
    pub fn is_cancel(&self) -> bool {
        match &self.kind {
            ChatEventKind::Command { name, .. } => name == "cancel",
            ChatEventKind::Action { token, .. } => token == "cancel_operation",
            ChatEventKind::FileUpload(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        choices: Option<&ChoiceGrid>,
    ) -> Result<MessageRef, TransportError>;

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        choices: Option<&ChoiceGrid>,
    ) -> Result<(), TransportError>;

    async fn send_choices(
        &self,
        chat_id: ChatId,
        text: &str,
        choices: &ChoiceGrid,
    ) -> Result<MessageRef, TransportError> {
        self.send_message(chat_id, text, Some(choices)).await
    }

    async fn send_file(
        &self,
        chat_id: ChatId,
        path: &Path,
        file_name: &str,
        caption: &str,
    ) -> Result<MessageRef, TransportError>;

    /// Replace the text of a status message
    async fn send_progress(&self, message: MessageRef, text: &str) -> Result<(), TransportError> {
        self.edit_message(message, text, None).await
    }

    /// Answer a button press, optionally with a short toast
    async fn acknowledge(&self, callback_id: &str, text: Option<&str>)
        -> Result<(), TransportError>;
}

/// Render a transfer snapshot as a status line
pub fn progress_text(label: &str, progress: &TransferProgress) -> String {
    match (progress.percentage(), progress.total) {
        (Some(pct), Some(total)) => format!(
            "{}\n{} {:.1}%\n{} / {}",
            label,
            progress_bar(pct, 10),
            pct,
            format_size(progress.bytes),
            format_size(total)
        ),
        _ => format!("{}\n{} received", label, format_size(progress.bytes)),
    }
}

/// Progress reporter that edits a chat status message
pub struct ChatProgress {
    transport: Arc<dyn ChatTransport>,
    message: MessageRef,
    label: String,
}

impl ChatProgress {
    pub fn new(transport: Arc<dyn ChatTransport>, message: MessageRef, label: impl Into<String>) -> Self {
        Self {
            transport,
            message,
            label: label.into(),
        }
    }
}

#[async_trait]
impl ProgressReporter for ChatProgress {
    async fn report(&self, progress: TransferProgress) {
        let text = progress_text(&self.label, &progress);
        if let Err(e) = self.transport.send_progress(self.message, &text).await {
            debug!(error = %e, "Progress update not delivered");
        }
    }
}
