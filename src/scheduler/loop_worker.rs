use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    coordination::{load_clocks, CoordinationStore},
    errors::{ResetError, Result},
    policy::{PolicyConfig, ResetDecision},
    swap::{SnapshotSwap, SwapOutcome, SwapReport},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NotDue(ResetDecision),
    Swapped {
        decision: ResetDecision,
        report: SwapReport,
    },
    /// Due when checked, but another caller reset first.
    NoLongerDue(ResetDecision),
    /// Another swap held the lock; this tick is coalesced into it.
    Coalesced,
}

/// One scheduler tick: read clocks, ask the policy, swap if due.
pub struct ResetTicker {
    store: Arc<dyn CoordinationStore>,
    swap: Arc<SnapshotSwap>,
    clock: Arc<dyn Clock>,
    policy: PolicyConfig,
}

impl ResetTicker {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        swap: Arc<SnapshotSwap>,
        clock: Arc<dyn Clock>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            store,
            swap,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        let now = self.clock.now();
        let clocks = load_clocks(self.store.as_ref(), now).await?;
        let decision = self.policy.evaluate(now, &clocks);

        log_debug!(
            "reset check now={} last_modified_at={} last_reset_at={} inactivity={}s ceiling={}s -> {}",
            now,
            clocks.last_modified_at,
            clocks.last_reset_at,
            self.policy.inactivity_secs(),
            self.policy.force_reset_secs(),
            decision.rule()
        );

        match decision {
            ResetDecision::Misconfigured => {
                log_warn!(
                    "reset policy misconfigured (inactivity={}s, ceiling={}s); never resetting",
                    self.policy.inactivity_secs(),
                    self.policy.force_reset_secs()
                );
                return Ok(TickOutcome::NotDue(decision));
            }
            ResetDecision::ClockSkew { behind_by_secs } => {
                log_warn!(
                    "wall clock is {behind_by_secs}s behind last reset ({}); skipping",
                    clocks.last_reset_at
                );
                return Ok(TickOutcome::NotDue(decision));
            }
            ResetDecision::NotDue { .. } => return Ok(TickOutcome::NotDue(decision)),
            ResetDecision::ForceCeiling { .. } | ResetDecision::Idle { .. } => {}
        }

        log_info!(
            "resetting demo datastore: rule={} now={} last_modified_at={} last_reset_at={}",
            decision.rule(),
            now,
            clocks.last_modified_at,
            clocks.last_reset_at
        );

        match self.swap.reset_when_due(&self.policy).await {
            Ok(SwapOutcome::Swapped(report)) => Ok(TickOutcome::Swapped { decision, report }),
            Ok(SwapOutcome::NoLongerDue(latest)) => Ok(TickOutcome::NoLongerDue(latest)),
            Err(ResetError::SwapInProgress) => Ok(TickOutcome::Coalesced),
            Err(err) => Err(err),
        }
    }
}

pub async fn reset_loop(ticker: Arc<ResetTicker>, interval: Duration, cancel_token: CancellationToken) {
    let mut timer = tokio::time::interval(interval);
    // A tick that overruns (a long swap) is coalesced, never queued.
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match ticker.tick().await {
                    Ok(TickOutcome::Swapped { decision, report }) => log_info!(
                        "demo datastore reset ({}) swap_id={} in {}ms",
                        decision.rule(),
                        report.swap_id,
                        report.duration_ms
                    ),
                    Ok(TickOutcome::NotDue(_)) => {}
                    Ok(TickOutcome::NoLongerDue(_)) => log_info!("reset already performed elsewhere"),
                    Ok(TickOutcome::Coalesced) => log_debug!("swap already in progress; tick coalesced"),
                    Err(err @ ResetError::SnapshotMissing { .. }) => {
                        log_error!("demo reset skipped, keeping current data: {err}")
                    }
                    Err(err @ ResetError::CoordinationStoreUnavailable(_)) => {
                        log_warn!("demo reset tick skipped: {err}")
                    }
                    Err(err) => log_error!("demo reset tick failed, retrying next interval: {err}"),
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("reset loop shutting down");
                break;
            }
        }
    }
}
