//! Durable timestamps shared between request handlers and the scheduler.
//!
//! The two execution contexts never share memory; everything they agree on
//! goes through a `CoordinationStore`. The same store also carries the swap
//! lock so that exclusion holds across processes.

mod memory;
mod migrations;
mod sqlite;

pub use memory::MemoryCoordinationStore;
pub use sqlite::SqliteCoordinationStore;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::Result;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockKey {
    LastModified,
    LastReset,
}

impl ClockKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockKey::LastModified => "last_modified_at",
            ClockKey::LastReset => "last_reset_at",
        }
    }
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: ClockKey) -> Result<Option<i64>>;

    /// Last write wins.
    async fn set(&self, key: ClockKey, value: i64) -> Result<()>;

    /// Drop every clock. The swap lock is not affected.
    async fn clear(&self) -> Result<()>;

    /// Take the swap lock for `holder`. Returns `false` when someone else
    /// holds it and acquired it after `stale_before`.
    async fn try_acquire_swap_lock(&self, holder: &str, now: i64, stale_before: i64) -> Result<bool>;

    /// Release the swap lock if `holder` still owns it.
    async fn release_swap_lock(&self, holder: &str) -> Result<()>;

    /// Whether any caller currently holds a non-stale swap lock.
    async fn swap_lock_held(&self, stale_before: i64) -> Result<bool>;
}

/// Both clocks as read at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Clocks {
    pub last_modified_at: i64,
    pub last_reset_at: i64,
}

/// Read both clocks, seeding any missing one.
///
/// A missing clock means a cold start or a freshly wiped store. Treating it
/// as zero would look like infinite staleness and reset immediately, so a
/// missing reset clock becomes `now`. A missing activity clock becomes the
/// reset time: right after a swap nobody has touched the fresh data yet.
pub async fn load_clocks(store: &dyn CoordinationStore, now: i64) -> Result<Clocks> {
    let last_reset_at = get_or_seed(store, ClockKey::LastReset, now).await?;
    let last_modified_at = get_or_seed(store, ClockKey::LastModified, last_reset_at).await?;
    Ok(Clocks {
        last_modified_at,
        last_reset_at,
    })
}

/// Same defaults as `load_clocks`, but nothing is written back.
pub async fn peek_clocks(store: &dyn CoordinationStore, now: i64) -> Result<Clocks> {
    let last_reset_at = store.get(ClockKey::LastReset).await?.unwrap_or(now);
    let last_modified_at = store
        .get(ClockKey::LastModified)
        .await?
        .unwrap_or(last_reset_at);
    Ok(Clocks {
        last_modified_at,
        last_reset_at,
    })
}

async fn get_or_seed(store: &dyn CoordinationStore, key: ClockKey, seed: i64) -> Result<i64> {
    match store.get(key).await? {
        Some(value) => Ok(value),
        None => {
            log_info!("{} not set; seeding with {seed}", key.as_str());
            store.set(key, seed).await?;
            Ok(seed)
        }
    }
}
