//! Operator-initiated reset.
//!
//! Bypasses the policy entirely. Whoever calls this is responsible for
//! having checked the operator's authorization first.

use std::sync::Arc;

use crate::{
    errors::{ResetError, Result},
    swap::{SnapshotSwap, SwapReport},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Clone)]
pub struct ManualTrigger {
    swap: Arc<SnapshotSwap>,
}

impl ManualTrigger {
    pub fn new(swap: Arc<SnapshotSwap>) -> Self {
        Self { swap }
    }

    pub async fn force_reset(&self, operator: &str) -> Result<SwapReport> {
        log_info!("manual demo reset requested by {operator}");
        match self.swap.reset_datastore().await {
            Ok(report) => {
                log_info!(
                    "manual demo reset by {operator} complete (swap_id={})",
                    report.swap_id
                );
                Ok(report)
            }
            Err(ResetError::SwapInProgress) => {
                log_warn!("manual demo reset by {operator} skipped: a swap is already running");
                Err(ResetError::SwapInProgress)
            }
            Err(err) => {
                log_error!("manual demo reset by {operator} failed: {err}");
                Err(err)
            }
        }
    }
}
