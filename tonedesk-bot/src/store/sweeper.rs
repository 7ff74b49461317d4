//! Background expiry sweep
//!
//! A cancellable periodic task started with the process and stopped on
//! shutdown. It only talks to the store through [`SessionStore::sweep_expired`].

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::SessionStore;

pub struct Sweeper;

impl Sweeper {
    /// Start sweeping every `interval` until `shutdown` is cancelled
    pub fn spawn(
        store: Arc<SessionStore>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Session sweeper started");

            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.sweep_expired().await {
                            Ok(0) => debug!("Sweep found no expired sessions"),
                            Ok(count) => info!(count, "Swept expired sessions"),
                            Err(e) => error!(error = %e, "Session sweep failed"),
                        }
                    }
                }
            }

            info!("Session sweeper stopped");
        })
    }
}
