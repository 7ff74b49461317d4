//! Minimal Telegram Bot API client

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::transport::TransportError;

const USER_AGENT: &str = concat!("tonedesk/", env!("CARGO_PKG_VERSION"));
/// Slack on top of the long-poll timeout before the HTTP request gives up
const POLL_SLACK: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub audio: Option<Attachment>,
    pub voice: Option<Attachment>,
    pub document: Option<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

/// Audio, voice note or document
#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFile {
    pub file_id: String,
    pub file_size: Option<u64>,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

pub struct TelegramClient {
    http: reqwest::Client,
    method_base: String,
    file_base: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let api_url = api_url.trim_end_matches('/');

        Ok(Self {
            http,
            method_base: format!("{}/bot{}", api_url, token),
            file_base: format!("{}/file/bot{}", api_url, token),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Download URL of a file returned by [`Self::get_file`]
    pub fn file_url(&self, file_path: &str) -> String {
        format!("{}/{}", self.file_base, file_path)
    }

    async fn call<P, T>(&self, method: &str, params: &P, timeout: Duration) -> Result<T, TransportError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}/{}", self.method_base, method))
            .timeout(timeout)
            .json(params)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        decode_response(method, response).await
    }

    pub async fn get_updates(&self, offset: Option<i64>, poll_secs: u64) -> Result<Vec<Update>, TransportError> {
        let params = serde_json::json!({
            "offset": offset,
            "timeout": poll_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call(
            "getUpdates",
            &params,
            Duration::from_secs(poll_secs) + POLL_SLACK,
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, TransportError> {
        let params = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "reply_markup": markup,
        });
        self.call("sendMessage", &params, REQUEST_TIMEOUT).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TransportError> {
        let params = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "reply_markup": markup,
        });
        match self
            .call::<_, serde_json::Value>("editMessageText", &params, REQUEST_TIMEOUT)
            .await
        {
            Ok(_) => Ok(()),
            // Editing to identical content is not a failure
            Err(TransportError::Api { description, .. })
                if description.contains("message is not modified") =>
            {
                debug!(chat_id, message_id, "Message unchanged");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<(), TransportError> {
        let params = serde_json::json!({
            "callback_query_id": callback_id,
            "text": text,
        });
        self.call::<_, bool>("answerCallbackQuery", &params, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    pub async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        file_name: &str,
        caption: &str,
    ) -> Result<Message, TransportError> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length).file_name(file_name.to_string());

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        let response = self
            .http
            .post(format!("{}/sendDocument", self.method_base))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        decode_response("sendDocument", response).await
    }

    pub async fn get_file(&self, file_id: &str) -> Result<RemoteFile, TransportError> {
        let params = serde_json::json!({ "file_id": file_id });
        self.call("getFile", &params, REQUEST_TIMEOUT).await
    }
}

async fn decode_response<T: DeserializeOwned>(
    method: &str,
    response: reqwest::Response,
) -> Result<T, TransportError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;
    parse_envelope(method, status.as_u16(), &body)
}

/// Unwrap the `{ok, result, ...}` envelope every Bot API method returns
pub(crate) fn parse_envelope<T: DeserializeOwned>(
    method: &str,
    status: u16,
    body: &[u8],
) -> Result<T, TransportError> {
    let envelope: ApiResponse<T> = serde_json::from_slice(body)
        .map_err(|e| TransportError::Decode(format!("{} (HTTP {}): {}", method, status, e)))?;

    if envelope.ok {
        return envelope
            .result
            .ok_or_else(|| TransportError::Decode(format!("{}: missing result", method)));
    }

    if let Some(wait) = envelope.parameters.and_then(|p| p.retry_after) {
        return Err(TransportError::RateLimited(Duration::from_secs(wait)));
    }
    Err(TransportError::Api {
        code: envelope.error_code.unwrap_or(status as i64),
        description: envelope.description.unwrap_or_default(),
    })
}
