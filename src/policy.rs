//! Reset decision rules.
//!
//! Two thresholds drive the decision:
//! - **force-reset ceiling**: once this long has passed since the last reset,
//!   reset no matter what. Checked first so a busy demo can never starve it.
//! - **inactivity threshold**: once nobody has mutated data for this long,
//!   reset.
//!
//! Everything here is pure; callers supply `now` and both clocks.

use std::time::Duration;

use serde::Serialize;

use crate::coordination::Clocks;

pub const DEFAULT_INACTIVITY_SECS: u64 = 600;
pub const DEFAULT_FORCE_RESET_SECS: u64 = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    pub inactivity_threshold: Duration,
    pub force_reset_ceiling: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold: Duration::from_secs(DEFAULT_INACTIVITY_SECS),
            force_reset_ceiling: Duration::from_secs(DEFAULT_FORCE_RESET_SECS),
        }
    }
}

impl PolicyConfig {
    pub fn from_secs(inactivity_secs: u64, force_reset_secs: u64) -> Self {
        Self {
            inactivity_threshold: Duration::from_secs(inactivity_secs),
            force_reset_ceiling: Duration::from_secs(force_reset_secs),
        }
    }

    /// The ceiling must be strictly above a non-zero inactivity threshold.
    /// An invalid config never resets.
    pub fn is_valid(&self) -> bool {
        !self.inactivity_threshold.is_zero() && self.force_reset_ceiling > self.inactivity_threshold
    }

    pub fn inactivity_secs(&self) -> i64 {
        secs_i64(self.inactivity_threshold)
    }

    pub fn force_reset_secs(&self) -> i64 {
        secs_i64(self.force_reset_ceiling)
    }

    pub fn evaluate(&self, now: i64, clocks: &Clocks) -> ResetDecision {
        evaluate(now, clocks.last_modified_at, clocks.last_reset_at, self)
    }
}

fn secs_i64(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Outcome of one policy evaluation, carrying which rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "rule")]
pub enum ResetDecision {
    #[serde(rename_all = "camelCase")]
    ForceCeiling { since_reset_secs: i64 },
    #[serde(rename_all = "camelCase")]
    Idle { idle_secs: i64 },
    #[serde(rename_all = "camelCase")]
    NotDue {
        idle_secs: i64,
        since_reset_secs: i64,
    },
    /// The wall clock reads earlier than the last reset.
    #[serde(rename_all = "camelCase")]
    ClockSkew { behind_by_secs: i64 },
    Misconfigured,
}

impl ResetDecision {
    pub fn is_due(&self) -> bool {
        matches!(
            self,
            ResetDecision::ForceCeiling { .. } | ResetDecision::Idle { .. }
        )
    }

    pub fn rule(&self) -> &'static str {
        match self {
            ResetDecision::ForceCeiling { .. } => "force-ceiling",
            ResetDecision::Idle { .. } => "idle",
            ResetDecision::NotDue { .. } => "not-due",
            ResetDecision::ClockSkew { .. } => "clock-skew",
            ResetDecision::Misconfigured => "misconfigured",
        }
    }
}

pub fn evaluate(
    now: i64,
    last_modified_at: i64,
    last_reset_at: i64,
    cfg: &PolicyConfig,
) -> ResetDecision {
    if !cfg.is_valid() {
        return ResetDecision::Misconfigured;
    }

    if now < last_reset_at {
        return ResetDecision::ClockSkew {
            behind_by_secs: last_reset_at.saturating_sub(now),
        };
    }

    let since_reset_secs = now.saturating_sub(last_reset_at);
    if since_reset_secs >= cfg.force_reset_secs() {
        return ResetDecision::ForceCeiling { since_reset_secs };
    }

    // Activity stamped by a clock running ahead of ours counts as "just now".
    let idle_secs = now.saturating_sub(last_modified_at).max(0);
    if idle_secs >= cfg.inactivity_secs() {
        return ResetDecision::Idle { idle_secs };
    }

    ResetDecision::NotDue {
        idle_secs,
        since_reset_secs,
    }
}

pub fn should_reset(now: i64, last_modified_at: i64, last_reset_at: i64, cfg: &PolicyConfig) -> bool {
    evaluate(now, last_modified_at, last_reset_at, cfg).is_due()
}

/// Seconds until the idle rule would fire, assuming no further activity.
pub fn secs_until_idle_reset(now: i64, last_modified_at: i64, cfg: &PolicyConfig) -> i64 {
    let idle = now.saturating_sub(last_modified_at).max(0);
    cfg.inactivity_secs().saturating_sub(idle).max(0)
}

/// Seconds until the ceiling rule fires regardless of activity.
pub fn secs_until_forced_reset(now: i64, last_reset_at: i64, cfg: &PolicyConfig) -> i64 {
    let since = now.saturating_sub(last_reset_at).max(0);
    cfg.force_reset_secs().saturating_sub(since).max(0)
}
