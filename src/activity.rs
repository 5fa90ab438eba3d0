use std::sync::Arc;

use axum::http::Method;

use crate::{
    clock::Clock,
    coordination::{ClockKey, CoordinationStore},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Which requests count as "someone is using the demo".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityTracking {
    /// POST, PUT, PATCH and DELETE only.
    #[default]
    MutationsOnly,
    /// Mutations plus any request carrying credentials, so a logged-in user
    /// who is only reading is not reset out from under.
    MutationsAndSessions,
}

/// Stamps the activity clock from the request path.
#[derive(Clone)]
pub struct ActivityRecorder {
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    tracking: ActivityTracking,
}

impl ActivityRecorder {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
        tracking: ActivityTracking,
    ) -> Self {
        Self {
            store,
            clock,
            tracking,
        }
    }

    pub fn tracking(&self) -> ActivityTracking {
        self.tracking
    }

    pub fn is_mutating(method: &Method) -> bool {
        matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    pub fn counts_as_activity(&self, method: &Method, authenticated: bool) -> bool {
        Self::is_mutating(method)
            || (authenticated && self.tracking == ActivityTracking::MutationsAndSessions)
    }

    /// Write `now` to the activity clock. Never fails the caller; a store
    /// error is logged and swallowed.
    pub async fn record_activity(&self) {
        let now = self.clock.now();
        if let Err(err) = self.store.set(ClockKey::LastModified, now).await {
            log_warn!("could not record demo activity at {now}: {err}");
        }
    }

    /// Record activity if this request qualifies. Returns whether it did.
    pub async fn observe(&self, method: &Method, authenticated: bool) -> bool {
        if !self.counts_as_activity(method, authenticated) {
            return false;
        }
        self.record_activity().await;
        true
    }
}
