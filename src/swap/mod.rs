//! Destructive restore of the live datastore from the clean snapshot.
//!
//! Only one swap runs at a time across all processes sharing the
//! coordination store. A caller that finds the lock taken gets
//! `ResetError::SwapInProgress` straight away instead of waiting.

mod restorer;

pub use restorer::{DatastoreRestorer, RestoreReport, SnapshotInfo, SqliteFileRestorer};

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    clock::Clock,
    coordination::{load_clocks, ClockKey, CoordinationStore},
    errors::{ResetError, Result},
    policy::{PolicyConfig, ResetDecision},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwapReport {
    pub swap_id: String,
    pub last_reset_at: i64,
    pub bytes_copied: u64,
    pub snapshot_version: i32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped(SwapReport),
    /// Someone else reset between the caller's check and taking the lock.
    NoLongerDue(ResetDecision),
}

struct SwapLease {
    holder: String,
}

pub struct SnapshotSwap {
    store: Arc<dyn CoordinationStore>,
    restorer: Arc<dyn DatastoreRestorer>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl SnapshotSwap {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        restorer: Arc<dyn DatastoreRestorer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            restorer,
            clock,
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
        }
    }

    /// How long a lock may be held before another caller treats its holder
    /// as crashed and takes over.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn restorer(&self) -> &Arc<dyn DatastoreRestorer> {
        &self.restorer
    }

    /// Replace the live datastore unconditionally.
    pub async fn reset_datastore(&self) -> Result<SwapReport> {
        let lease = self.acquire().await?;
        let result = self.swap(&lease).await;
        self.release(lease).await;
        result
    }

    /// Replace the live datastore only if `policy` still says so once the
    /// lock is held. Another process may have reset in the meantime.
    pub async fn reset_when_due(&self, policy: &PolicyConfig) -> Result<SwapOutcome> {
        let lease = self.acquire().await?;
        let result = async {
            let now = self.clock.now();
            let clocks = load_clocks(self.store.as_ref(), now).await?;
            let decision = policy.evaluate(now, &clocks);
            if !decision.is_due() {
                log_debug!("reset no longer due after taking lock ({})", decision.rule());
                return Ok(SwapOutcome::NoLongerDue(decision));
            }
            self.swap(&lease).await.map(SwapOutcome::Swapped)
        }
        .await;
        self.release(lease).await;
        result
    }

    pub async fn is_swapping(&self) -> Result<bool> {
        let now = self.clock.now();
        self.store.swap_lock_held(self.stale_before(now)).await
    }

    fn stale_before(&self, now: i64) -> i64 {
        let timeout = i64::try_from(self.lock_timeout.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(timeout)
    }

    async fn acquire(&self) -> Result<SwapLease> {
        let holder = Uuid::new_v4().to_string();
        let now = self.clock.now();
        if self
            .store
            .try_acquire_swap_lock(&holder, now, self.stale_before(now))
            .await?
        {
            Ok(SwapLease { holder })
        } else {
            log_debug!("swap lock held elsewhere; skipping");
            Err(ResetError::SwapInProgress)
        }
    }

    async fn release(&self, lease: SwapLease) {
        if let Err(err) = self.store.release_swap_lock(&lease.holder).await {
            log_warn!(
                "failed to release swap lock {}: {err}; it expires after {}s",
                lease.holder,
                self.lock_timeout.as_secs()
            );
        }
    }

    async fn swap(&self, lease: &SwapLease) -> Result<SwapReport> {
        let started = Instant::now();
        let restorer = Arc::clone(&self.restorer);

        let restored = tokio::task::spawn_blocking(move || restorer.restore())
            .await
            .map_err(|err| ResetError::io("restore worker join failed", err))?;
        let report = match restored {
            Ok(report) => report,
            Err(err) => {
                log_error!("swap {} failed, live datastore left as it was: {err}", lease.holder);
                return Err(err);
            }
        };

        // The live store is already fresh at this point; if the clock update
        // fails the next tick will simply swap again.
        let previous_reset = self.store.get(ClockKey::LastReset).await?;
        self.store.clear().await?;
        let now = self.clock.now();
        let last_reset_at = previous_reset.map_or(now, |previous| previous.max(now));
        self.store.set(ClockKey::LastReset, last_reset_at).await?;

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        log_info!(
            "swap {} restored {} bytes from snapshot v{} in {}ms; last_reset_at={}",
            lease.holder,
            report.bytes_copied,
            report.snapshot_version,
            duration_ms,
            last_reset_at
        );

        Ok(SwapReport {
            swap_id: lease.holder.clone(),
            last_reset_at,
            bytes_copied: report.bytes_copied,
            snapshot_version: report.snapshot_version,
            duration_ms,
        })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::test_support::CountingRestorer;
    use super::*;
    use crate::clock::ManualClock;
    use crate::coordination::MemoryCoordinationStore;

    struct Fixture {
        store: Arc<MemoryCoordinationStore>,
        clock: Arc<ManualClock>,
        restorer: Arc<CountingRestorer>,
        swap: Arc<SnapshotSwap>,
    }

    fn fixture(restorer: Arc<CountingRestorer>) -> Fixture {
        let store = Arc::new(MemoryCoordinationStore::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let swap = Arc::new(SnapshotSwap::new(
            store.clone(),
            restorer.clone(),
            clock.clone(),
        ));
        Fixture {
            store,
            clock,
            restorer,
            swap,
        }
    }

    #[tokio::test]
    async fn successful_swap_resets_clocks() {
        let fx = fixture(Arc::new(CountingRestorer::default()));
        fx.store.set(ClockKey::LastModified, 9_990).await.unwrap();
        fx.store.set(ClockKey::LastReset, 8_000).await.unwrap();

        let report = fx.swap.reset_datastore().await.unwrap();

        assert_eq!(fx.restorer.calls(), 1);
        assert_eq!(report.last_reset_at, 10_000);
        assert_eq!(fx.store.get(ClockKey::LastModified).await.unwrap(), None);
        assert_eq!(fx.store.get(ClockKey::LastReset).await.unwrap(), Some(10_000));
        assert!(fx.store.lock_holder().is_none());
    }

    #[tokio::test]
    async fn last_reset_never_moves_backward() {
        let fx = fixture(Arc::new(CountingRestorer::default()));
        fx.store.set(ClockKey::LastReset, 12_000).await.unwrap();
        fx.clock.set(11_000);

        let report = fx.swap.reset_datastore().await.unwrap();
        assert_eq!(report.last_reset_at, 12_000);
    }

    #[tokio::test]
    async fn failed_copy_keeps_clocks_for_retry() {
        let fx = fixture(Arc::new(CountingRestorer::default()));
        fx.restorer.broken.store(true, Ordering::SeqCst);
        fx.store.set(ClockKey::LastModified, 5_000).await.unwrap();
        fx.store.set(ClockKey::LastReset, 4_000).await.unwrap();

        let err = fx.swap.reset_datastore().await.unwrap_err();

        assert!(matches!(err, ResetError::SwapIo(_)));
        assert_eq!(fx.store.get(ClockKey::LastReset).await.unwrap(), Some(4_000));
        assert_eq!(fx.store.get(ClockKey::LastModified).await.unwrap(), Some(5_000));
        assert!(fx.store.lock_holder().is_none(), "lock must be released");
    }

    #[tokio::test]
    async fn missing_snapshot_is_reported() {
        let fx = fixture(Arc::new(CountingRestorer::default()));
        fx.restorer.missing.store(true, Ordering::SeqCst);

        let err = fx.swap.reset_datastore().await.unwrap_err();
        assert!(matches!(err, ResetError::SnapshotMissing { .. }));
        assert_eq!(fx.restorer.calls(), 0);
        assert!(fx.store.lock_holder().is_none());
    }

    #[tokio::test]
    async fn concurrent_swaps_copy_once() {
        let fx = fixture(CountingRestorer::slow(Duration::from_millis(100)));

        let (first, second) = tokio::join!(fx.swap.reset_datastore(), fx.swap.reset_datastore());

        let results = [first, second];
        let swapped = results.iter().filter(|r| r.is_ok()).count();
        let in_progress = results
            .iter()
            .filter(|r| matches!(r, Err(ResetError::SwapInProgress)))
            .count();
        assert_eq!((swapped, in_progress), (1, 1));
        assert_eq!(fx.restorer.calls(), 1);
    }

    #[tokio::test]
    async fn due_swap_is_not_repeated_back_to_back() {
        let fx = fixture(Arc::new(CountingRestorer::default()));
        let policy = PolicyConfig::from_secs(600, 1800);
        fx.store.set(ClockKey::LastReset, 0).await.unwrap();

        let first = fx.swap.reset_when_due(&policy).await.unwrap();
        let second = fx.swap.reset_when_due(&policy).await.unwrap();

        assert!(matches!(first, SwapOutcome::Swapped(_)));
        assert!(matches!(second, SwapOutcome::NoLongerDue(_)));
        assert_eq!(fx.restorer.calls(), 1);
    }

    #[tokio::test]
    async fn abandoned_lock_expires() {
        let fx = fixture(Arc::new(CountingRestorer::default()));
        let swap = SnapshotSwap::new(fx.store.clone(), fx.restorer.clone(), fx.clock.clone())
            .with_lock_timeout(Duration::from_secs(300));
        fx.store
            .try_acquire_swap_lock("crashed", 9_900, 0)
            .await
            .unwrap();

        assert!(matches!(
            swap.reset_datastore().await,
            Err(ResetError::SwapInProgress)
        ));
        assert!(swap.is_swapping().await.unwrap());

        fx.clock.set(10_200);
        assert!(!swap.is_swapping().await.unwrap());
        swap.reset_datastore().await.unwrap();
        assert_eq!(fx.restorer.calls(), 1);
    }

    #[tokio::test]
    async fn store_failure_after_copy_is_reported() {
        let fx = fixture(Arc::new(CountingRestorer::default()));
        fx.store.fail_writes(true);

        let err = fx.swap.reset_datastore().await.unwrap_err();
        assert!(matches!(err, ResetError::CoordinationStoreUnavailable(_)));
        assert_eq!(fx.restorer.calls(), 1);
    }
}
