mod activity;
mod clock;
mod coordination;
mod errors;
mod http;
mod policy;
mod scheduler;
mod settings;
mod swap;
mod trigger;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

pub use activity::{ActivityRecorder, ActivityTracking};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordination::{
    load_clocks, peek_clocks, ClockKey, Clocks, CoordinationStore, MemoryCoordinationStore,
    SqliteCoordinationStore,
};
pub use errors::ResetError;
pub use http::{activity_layer, admin_router};
pub use policy::{evaluate, should_reset, PolicyConfig, ResetDecision};
pub use scheduler::{ResetScheduler, ResetTicker, TickOutcome};
pub use settings::DemoSettings;
pub use swap::{
    DatastoreRestorer, RestoreReport, SnapshotInfo, SnapshotSwap, SqliteFileRestorer, SwapOutcome,
    SwapReport,
};
pub use trigger::ManualTrigger;
pub use utils::init_logging;

/// Point-in-time view of the reset machinery, for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoStatus {
    pub now: i64,
    pub clocks: Clocks,
    pub decision: ResetDecision,
    pub secs_until_idle_reset: i64,
    pub secs_until_forced_reset: i64,
    pub inactivity_threshold_secs: i64,
    pub force_reset_ceiling_secs: i64,
    pub swap_in_progress: bool,
    pub scheduler_running: bool,
    pub snapshot: Option<SnapshotInfo>,
    pub snapshot_error: Option<String>,
}

/// Everything the host application needs, wired together.
#[derive(Clone)]
pub struct DemoReset {
    settings: Arc<DemoSettings>,
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    recorder: ActivityRecorder,
    swap: Arc<SnapshotSwap>,
    trigger: ManualTrigger,
    ticker: Arc<ResetTicker>,
    scheduler: Arc<Mutex<ResetScheduler>>,
}

impl DemoReset {
    /// Build from settings using the SQLite store and file restorer.
    /// Returns `None` when demo mode is off: nothing in this crate runs then.
    pub fn open(settings: DemoSettings) -> Result<Option<Self>> {
        if !settings.demo_mode_enabled {
            info!("Not in demo mode; demo reset disabled");
            return Ok(None);
        }

        for warning in settings.validate()? {
            warn!("{warning}");
        }

        let store = SqliteCoordinationStore::open(settings.coordination_db_path())
            .context("failed to open coordination store")?;
        let restorer = SqliteFileRestorer::new(
            settings.live_db_path.clone(),
            settings.clean_db_path.clone(),
        );

        Ok(Some(Self::with_parts(
            settings,
            Arc::new(store),
            Arc::new(restorer),
            Arc::new(SystemClock),
        )))
    }

    pub fn with_parts(
        settings: DemoSettings,
        store: Arc<dyn CoordinationStore>,
        restorer: Arc<dyn DatastoreRestorer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let swap = Arc::new(
            SnapshotSwap::new(store.clone(), restorer, clock.clone())
                .with_lock_timeout(settings.swap_lock_timeout()),
        );
        let recorder =
            ActivityRecorder::new(store.clone(), clock.clone(), settings.activity_tracking());
        let ticker = Arc::new(ResetTicker::new(
            store.clone(),
            swap.clone(),
            clock.clone(),
            settings.policy(),
        ));
        let scheduler = ResetScheduler::new(ticker.clone(), settings.scheduler_interval());

        Self {
            settings: Arc::new(settings),
            store,
            clock,
            recorder,
            trigger: ManualTrigger::new(swap.clone()),
            swap,
            ticker,
            scheduler: Arc::new(Mutex::new(scheduler)),
        }
    }

    pub fn settings(&self) -> &DemoSettings {
        &self.settings
    }

    pub fn recorder(&self) -> &ActivityRecorder {
        &self.recorder
    }

    pub async fn record_activity(&self) {
        self.recorder.record_activity().await;
    }

    pub async fn reset_datastore(&self) -> errors::Result<SwapReport> {
        self.swap.reset_datastore().await
    }

    pub async fn force_reset(&self, operator: &str) -> errors::Result<SwapReport> {
        self.trigger.force_reset(operator).await
    }

    /// Run one scheduler tick inline, outside the background loop.
    pub async fn tick(&self) -> errors::Result<TickOutcome> {
        self.ticker.tick().await
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.lock().await.start()
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.lock().await.stop().await
    }

    /// Read-only snapshot of the clocks and policy; never seeds the store.
    pub async fn status(&self) -> errors::Result<DemoStatus> {
        let now = self.clock.now();
        let clocks = peek_clocks(self.store.as_ref(), now).await?;
        let policy = self.settings.policy();
        let swap_in_progress = self.swap.is_swapping().await?;
        let scheduler_running = self.scheduler.lock().await.is_running();

        let restorer = Arc::clone(self.swap.restorer());
        let snapshot_check = tokio::task::spawn_blocking(move || restorer.check_snapshot())
            .await
            .map_err(|err| ResetError::io("snapshot check join failed", err))?;
        let (snapshot, snapshot_error) = match snapshot_check {
            Ok(info) => (Some(info), None),
            Err(err) => (None, Some(err.to_string())),
        };

        Ok(DemoStatus {
            now,
            clocks,
            decision: policy.evaluate(now, &clocks),
            secs_until_idle_reset: policy::secs_until_idle_reset(
                now,
                clocks.last_modified_at,
                &policy,
            ),
            secs_until_forced_reset: policy::secs_until_forced_reset(
                now,
                clocks.last_reset_at,
                &policy,
            ),
            inactivity_threshold_secs: policy.inactivity_secs(),
            force_reset_ceiling_secs: policy.force_reset_secs(),
            swap_in_progress,
            scheduler_running,
            snapshot,
            snapshot_error,
        })
    }
}
