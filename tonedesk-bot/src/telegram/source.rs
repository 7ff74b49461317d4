//! Telegram file download as a [`RemoteSource`]

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::api::TelegramClient;
use crate::transfer::{ByteCounter, FetchError, FileRef, RemoteSource};
use crate::transport::TransportError;

/// Wait used when a 429 carries no usable retry hint
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

pub struct TelegramFileSource {
    client: Arc<TelegramClient>,
}

impl TelegramFileSource {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self { client }
    }
}

/// Sort an API failure into the retry classes
pub fn classify_api_error(err: TransportError) -> FetchError {
    match err {
        TransportError::RateLimited(retry_after) => FetchError::RateLimited { retry_after },
        TransportError::Api { code: 429, .. } => FetchError::RateLimited {
            retry_after: DEFAULT_RETRY_AFTER,
        },
        TransportError::Api { code, description } if code >= 500 => {
            FetchError::Transient(format!("{}: {}", code, description))
        }
        TransportError::Api { code, description } => {
            FetchError::Fatal(format!("{}: {}", code, description))
        }
        TransportError::Http(reason) | TransportError::Decode(reason) => {
            FetchError::Transient(reason)
        }
        TransportError::Io(e) => FetchError::Transient(e.to_string()),
    }
}

/// Sort a download HTTP status into the retry classes
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> Option<FetchError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(FetchError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        })
    } else if status.is_server_error() {
        Some(FetchError::Transient(format!("server returned {}", status)))
    } else {
        Some(FetchError::Fatal(format!("server returned {}", status)))
    }
}

fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl RemoteSource for TelegramFileSource {
    async fn fetch(
        &self,
        file: &FileRef,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        transferred: &ByteCounter,
    ) -> Result<(), FetchError> {
        let remote = self
            .client
            .get_file(&file.id)
            .await
            .map_err(classify_api_error)?;
        let file_path = remote
            .file_path
            .ok_or_else(|| FetchError::Fatal("file is not available for download".to_string()))?;

        let response = self
            .client
            .http()
            .get(self.client.file_url(&file_path))
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        if let Some(err) = classify_status(response.status(), retry_after_header(&response)) {
            return Err(err);
        }
        debug!(file_id = %file.id, size = ?remote.file_size, "Download stream opened");

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Transient(e.to_string()))?;
            transferred.add(chunk.len() as u64)?;
            sink.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Fatal(format!("local write failed: {}", e)))?;
        }

        Ok(())
    }
}
