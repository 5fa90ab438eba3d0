use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ClockKey, CoordinationStore};
use crate::errors::{ResetError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    clocks: HashMap<ClockKey, i64>,
    lock: Option<(String, i64)>,
    fail_writes: bool,
}

/// Process-local store for tests and single-process setups.
#[derive(Debug, Default)]
pub struct MemoryCoordinationStore {
    state: Mutex<MemoryState>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`clear` fail, simulating an unavailable
    /// backing store.
    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_writes = fail;
        }
    }

    pub fn lock_holder(&self) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.lock.as_ref().map(|(holder, _)| holder.clone()))
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(ResetError::store)
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn get(&self, key: ClockKey) -> Result<Option<i64>> {
        Ok(self.state()?.clocks.get(&key).copied())
    }

    async fn set(&self, key: ClockKey, value: i64) -> Result<()> {
        let mut state = self.state()?;
        if state.fail_writes {
            return Err(ResetError::store("simulated write failure"));
        }
        state.clocks.insert(key, value);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state()?;
        if state.fail_writes {
            return Err(ResetError::store("simulated write failure"));
        }
        state.clocks.clear();
        Ok(())
    }

    async fn try_acquire_swap_lock(&self, holder: &str, now: i64, stale_before: i64) -> Result<bool> {
        let mut state = self.state()?;
        let free = match &state.lock {
            None => true,
            Some((_, acquired_at)) => *acquired_at <= stale_before,
        };
        if free {
            state.lock = Some((holder.to_string(), now));
        }
        Ok(free)
    }

    async fn release_swap_lock(&self, holder: &str) -> Result<()> {
        let mut state = self.state()?;
        if state.lock.as_ref().is_some_and(|(owner, _)| owner == holder) {
            state.lock = None;
        }
        Ok(())
    }

    async fn swap_lock_held(&self, stale_before: i64) -> Result<bool> {
        Ok(self
            .state()?
            .lock
            .as_ref()
            .is_some_and(|(_, acquired_at)| *acquired_at > stale_before))
    }
}
