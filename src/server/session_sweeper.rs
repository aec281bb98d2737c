use crate::domain_port::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically drops session records that expired more than `grace` ago.
pub struct SessionSweeper {
    session_store: Arc<dyn AuthSessionStore>,
    interval: Duration,
    grace: chrono::Duration,
    cancellation_token: CancellationToken,
}

impl SessionSweeper {
    pub fn new(
        session_store: Arc<dyn AuthSessionStore>,
        interval: Duration,
        grace: chrono::Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            session_store,
            interval,
            grace,
            cancellation_token,
        }
    }

    async fn tick_once(&self) -> Result<usize, SessionStoreError> {
        let removed = self.session_store.sweep(self.grace).await?;
        if removed > 0 {
            tracing::debug!(removed, "swept expired sessions");
        }
        Ok(removed)
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("session sweeper shutting down...");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick_once().await {
                        tracing::error!("session sweep failed: {}", e);
                    }
                }
            }
        }
    }
}
