//! Long-poll loop feeding the dispatcher

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use crate::telegram::{update_to_event, TelegramClient};
use crate::transport::TransportError;

/// Server-side wait of one `getUpdates` call
pub const POLL_TIMEOUT_SECS: u64 = 30;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Doubling delay after consecutive polling failures, capped at 30 s
pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

pub async fn run_poller(
    client: Arc<TelegramClient>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    let mut offset: Option<i64> = None;
    let mut backoff = INITIAL_BACKOFF;
    info!("Polling for updates");

    loop {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => break,
            polled = client.get_updates(offset, POLL_TIMEOUT_SECS) => polled,
        };

        let wait = match polled {
            Ok(updates) => {
                backoff = INITIAL_BACKOFF;
                for update in updates {
                    offset = Some(update.update_id + 1);
                    match update_to_event(update) {
                        Some(event) => dispatcher.dispatch(event),
                        None => debug!("Ignoring unsupported update"),
                    }
                }
                continue;
            }
            Err(TransportError::RateLimited(retry_after)) => {
                warn!(retry_after_secs = retry_after.as_secs(), "Polling rate limited");
                retry_after
            }
            Err(e) => {
                let delay = backoff;
                backoff = next_backoff(backoff);
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Polling failed");
                delay
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
    info!("Polling stopped");
}
