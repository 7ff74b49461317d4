//! tonedesk-bot - main entry point
//!
//! Loads configuration, wires the store, engine and Telegram adapter
//! together and runs the polling loop until Ctrl+C or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tonedesk_bot::bot::{run_poller, Dispatcher, Handler};
use tonedesk_bot::engine::{AudioEngine, FfmpegToolkit};
use tonedesk_bot::store::{SessionStore, SqliteBackend, Sweeper};
use tonedesk_bot::telegram::{TelegramClient, TelegramFileSource, TelegramTransport};
use tonedesk_bot::transfer::TransferManager;
use tonedesk_bot::Orchestrator;
use tonedesk_common::config::AppConfig;
use tonedesk_common::time::{Clock, SystemClock};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = tonedesk_bot::GIT_HASH,
        built = tonedesk_bot::BUILD_TIMESTAMP,
        profile = tonedesk_bot::BUILD_PROFILE,
        "Starting tonedesk-bot"
    );

    config.validate().context("Invalid configuration")?;
    info!(download_dir = %config.download_dir.display(), "Configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(open_store(&config, clock).await);
    match store.reset_stale_processing().await {
        Ok(0) => {}
        Ok(count) => info!(count, "Reset sessions interrupted by the previous run"),
        Err(e) => warn!(error = %e, "Could not reset interrupted sessions"),
    }

    let toolkit = FfmpegToolkit::new(&config.ffmpeg_path, &config.ffprobe_path);
    if !toolkit.is_available().await {
        warn!(ffmpeg = %config.ffmpeg_path, "ffmpeg not found, processing will fail");
    }
    let engine = AudioEngine::new(
        Arc::new(toolkit),
        config.download_dir.clone(),
        config.processing_timeout,
    );

    let client = Arc::new(
        TelegramClient::new(&config.telegram_api_url, &config.bot_token)
            .context("Failed to build Telegram client")?,
    );
    let transfers = TransferManager::new(Arc::new(TelegramFileSource::new(client.clone())));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        transfers,
        engine,
        config.download_dir.clone(),
        config.max_file_size_bytes,
    ));

    let transport = Arc::new(TelegramTransport::new(client.clone()));
    let handler = Arc::new(Handler::new(orchestrator, transport));
    let dispatcher = Arc::new(Dispatcher::new(handler));

    let shutdown = CancellationToken::new();
    let sweeper = Sweeper::spawn(store.clone(), config.sweep_interval, shutdown.clone());
    let poller = tokio::spawn(run_poller(client, dispatcher.clone(), shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    poller.await.context("Polling task panicked")?;
    dispatcher.shutdown().await;
    sweeper.await.context("Sweeper task panicked")?;

    info!("Shutdown complete");
    Ok(())
}

/// Durable store when configured, otherwise (or if it cannot be opened) the
/// in-process one
async fn open_store(config: &AppConfig, clock: Arc<dyn Clock>) -> SessionStore {
    let Some(url) = config.database_url.as_deref() else {
        return SessionStore::in_memory(clock);
    };
    match SqliteBackend::connect(url).await {
        Ok(backend) => {
            info!("Session database ready");
            SessionStore::with_backend(Arc::new(backend), clock)
        }
        Err(e) => {
            warn!(error = %e, "Session database unavailable, using in-memory sessions");
            SessionStore::in_memory(clock)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
