//! [`ChatTransport`] over the Telegram Bot API

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::api::{InlineKeyboardButton, InlineKeyboardMarkup, Message, TelegramClient, Update};
use crate::transfer::FileRef;
use crate::transport::{
    ChatEvent, ChatEventKind, ChatId, ChatTransport, ChoiceGrid, MessageRef, TransportError,
};

pub struct TelegramTransport {
    client: Arc<TelegramClient>,
}

impl TelegramTransport {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self { client }
    }
}

pub fn keyboard(choices: &ChoiceGrid) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: choices
            .iter()
            .map(|row| {
                row.iter()
                    .map(|choice| InlineKeyboardButton {
                        text: choice.label.clone(),
                        callback_data: choice.token.clone(),
                    })
                    .collect()
            })
            .collect(),
    }
}

fn message_ref(message: &Message) -> MessageRef {
    MessageRef {
        chat_id: message.chat.id,
        message_id: message.message_id,
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        choices: Option<&ChoiceGrid>,
    ) -> Result<MessageRef, TransportError> {
        let markup = choices.map(keyboard);
        let sent = self
            .client
            .send_message(chat_id, text, markup.as_ref())
            .await?;
        Ok(message_ref(&sent))
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        choices: Option<&ChoiceGrid>,
    ) -> Result<(), TransportError> {
        let markup = choices.map(keyboard);
        self.client
            .edit_message_text(message.chat_id, message.message_id, text, markup.as_ref())
            .await
    }

    async fn send_file(
        &self,
        chat_id: ChatId,
        path: &Path,
        file_name: &str,
        caption: &str,
    ) -> Result<MessageRef, TransportError> {
        let sent = self
            .client
            .send_document(chat_id, path, file_name, caption)
            .await?;
        Ok(message_ref(&sent))
    }

    async fn acknowledge(&self, callback_id: &str, text: Option<&str>) -> Result<(), TransportError> {
        self.client.answer_callback_query(callback_id, text).await
    }
}

/// Translate an update into a chat event; unsupported updates yield `None`
pub fn update_to_event(update: Update) -> Option<ChatEvent> {
    if let Some(query) = update.callback_query {
        let message = query.message.as_ref().map(message_ref);
        return Some(ChatEvent {
            user_id: query.from.id,
            chat_id: message.map(|m| m.chat_id).unwrap_or(query.from.id),
            kind: ChatEventKind::Action {
                token: query.data.unwrap_or_default(),
                callback_id: query.id,
                message,
            },
        });
    }

    let message = update.message?;
    let user_id = message.from.as_ref()?.id;
    let chat_id = message.chat.id;

    if let Some(text) = message.text.as_deref() {
        let text = text.trim();
        if let Some(command) = text.strip_prefix('/') {
            let (head, args) = command
                .split_once(char::is_whitespace)
                .unwrap_or((command, ""));
            // "/eq@SomeBot" addresses a specific bot in groups
            let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
            return Some(ChatEvent {
                user_id,
                chat_id,
                kind: ChatEventKind::Command {
                    name,
                    args: args.trim().to_string(),
                },
            });
        }
        return None;
    }

    let (attachment, fallback_name) = if let Some(audio) = message.audio {
        (audio, None)
    } else if let Some(voice) = message.voice {
        (voice, Some("voice.ogg".to_string()))
    } else {
        (message.document?, None)
    };

    Some(ChatEvent {
        user_id,
        chat_id,
        kind: ChatEventKind::FileUpload(FileRef {
            id: attachment.file_id,
            file_name: attachment.file_name.or(fallback_name),
            size: attachment.file_size,
        }),
    })
}
