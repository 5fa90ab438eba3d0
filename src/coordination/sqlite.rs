use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

use super::migrations::ensure_schema;
use super::{ClockKey, CoordinationStore};
use crate::errors::{self, ResetError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to coordination store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join coordination store thread: {join_err:?}");
            }
        }
    }
}

/// SQLite-backed coordination store.
///
/// One connection lives on a dedicated thread; callers hand it closures over
/// a channel. Other processes open the same file and rely on SQLite's own
/// locking (WAL mode plus a busy timeout).
#[derive(Clone)]
pub struct SqliteCoordinationStore {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl SqliteCoordinationStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create state directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("demo-reset-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open coordination database")));
                        return;
                    }
                };

                if let Err(err) = conn.busy_timeout(BUSY_TIMEOUT) {
                    error!("Failed to set busy timeout: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    ensure_schema(&mut conn).context("failed to prepare coordination schema");
                if ready_tx.send(init_result).is_err() {
                    error!("Coordination store receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Coordination store thread shutting down");
            })
            .with_context(|| "failed to spawn coordination store thread")?;

        ready_rx
            .recv()
            .context("coordination store thread exited before signaling readiness")??;

        info!("Coordination store opened at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Coordination store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to coordination store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("coordination store thread terminated unexpectedly"))?
    }
}

#[async_trait]
impl CoordinationStore for SqliteCoordinationStore {
    async fn get(&self, key: ClockKey) -> errors::Result<Option<i64>> {
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM demo_clocks WHERE key = ?1",
                    params![key.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .with_context(|| format!("failed to read {}", key.as_str()))?;
            Ok(value)
        })
        .await
        .map_err(ResetError::store)
    }

    async fn set(&self, key: ClockKey, value: i64) -> errors::Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO demo_clocks (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key.as_str(), value, updated_at],
            )
            .with_context(|| format!("failed to write {}", key.as_str()))?;
            Ok(())
        })
        .await
        .map_err(ResetError::store)
    }

    async fn clear(&self) -> errors::Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM demo_clocks", [])
                .context("failed to clear clocks")?;
            Ok(())
        })
        .await
        .map_err(ResetError::store)
    }

    async fn try_acquire_swap_lock(
        &self,
        holder: &str,
        now: i64,
        stale_before: i64,
    ) -> errors::Result<bool> {
        let holder = holder.to_string();
        self.execute(move |conn| {
            // Upsert only overwrites an abandoned lock; a live one leaves 0 rows changed.
            let changed = conn
                .execute(
                    "INSERT INTO swap_lock (id, holder, acquired_at) VALUES (1, ?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, acquired_at = excluded.acquired_at
                     WHERE swap_lock.acquired_at <= ?3",
                    params![holder, now, stale_before],
                )
                .context("failed to acquire swap lock")?;
            Ok(changed == 1)
        })
        .await
        .map_err(ResetError::store)
    }

    async fn release_swap_lock(&self, holder: &str) -> errors::Result<()> {
        let holder = holder.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM swap_lock WHERE id = 1 AND holder = ?1",
                params![holder],
            )
            .context("failed to release swap lock")?;
            Ok(())
        })
        .await
        .map_err(ResetError::store)
    }

    async fn swap_lock_held(&self, stale_before: i64) -> errors::Result<bool> {
        self.execute(move |conn| {
            let held: Option<i64> = conn
                .query_row(
                    "SELECT acquired_at FROM swap_lock WHERE id = 1 AND acquired_at > ?1",
                    params![stale_before],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to inspect swap lock")?;
            Ok(held.is_some())
        })
        .await
        .map_err(ResetError::store)
    }
}
