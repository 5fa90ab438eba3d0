use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::loop_worker::{reset_loop, ResetTicker};

/// Owns the background reset loop. Started and stopped explicitly by the
/// host's lifecycle; there is no global instance.
pub struct ResetScheduler {
    ticker: Arc<ResetTicker>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl ResetScheduler {
    pub fn new(ticker: Arc<ResetTicker>, interval: Duration) -> Self {
        Self {
            ticker,
            interval,
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            bail!("reset scheduler already running");
        }
        if self.interval.is_zero() {
            bail!("scheduler interval must be greater than zero");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(reset_loop(
            self.ticker.clone(),
            self.interval,
            cancel_token.clone(),
        ));

        info!(
            "Demo reset scheduler started, checking every {}s",
            self.interval.as_secs()
        );

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Signal the loop to exit and wait for it. A swap already underway is
    /// allowed to finish first.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("reset loop task failed to join")?;
            info!("Demo reset scheduler stopped");
        }
        Ok(())
    }
}
