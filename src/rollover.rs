//! Once per local calendar day the stopwatch is archived and zeroed and every task starts over.
//! Progress is kept as per-day markers in the local [KeyValueStore], each step only marks itself
//! done after it went through, so an interrupted rollover picks up where it failed.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::{
    store::{
        entities::{Entity, Session, TimerSnapshot, TIMER_RECORD_ID},
        fields,
        kv::KeyValueStore,
        RecordStore, Table, WriteOp,
    },
    stopwatch::snapshot::{displayed_time, reset_fields},
    tracker::{
        sessions::{ArchiveEntry, SessionArchive, StoreSessionArchive},
        tasks::TaskBook,
    },
    utils::{clock::Clock, time::date_to_key},
};

pub const TIMER_RESET_MARKER: &str = "lastTimerResetDate";
pub const TASK_RESET_MARKER: &str = "lastTaskResetDate";
pub const ROLLOVER_SESSION_NAME: &str = "Auto-saved (daily reset)";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RolloverOutcome {
    pub timer_reset: bool,
    pub archived: Option<Session>,
    pub tasks_reset: usize,
}

impl RolloverOutcome {
    pub fn is_noop(&self) -> bool {
        !self.timer_reset && self.archived.is_none() && self.tasks_reset == 0
    }
}

pub struct DailyRollover {
    store: Arc<dyn RecordStore>,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    archive: Arc<dyn SessionArchive>,
    tasks: TaskBook,
}

impl DailyRollover {
    pub fn new(
        store: Arc<dyn RecordStore>,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let archive = Arc::new(StoreSessionArchive::new(store.clone(), clock.clone()));
        let tasks = TaskBook::new(store.clone(), clock.clone());
        Self {
            store,
            kv,
            clock,
            archive,
            tasks,
        }
    }

    pub fn with_archive(self, archive: Arc<dyn SessionArchive>) -> Self {
        Self { archive, ..self }
    }

    /// Runs whatever part of today's rollover hasn't happened yet. Safe to call any number of
    /// times, failures are logged and retried by the next call.
    pub async fn run(&self) -> RolloverOutcome {
        let today = date_to_key(self.clock.today());
        let mut outcome = RolloverOutcome::default();

        if self.is_stale(TIMER_RESET_MARKER, &today) {
            match self.reset_timer().await {
                Ok(archived) => {
                    outcome.timer_reset = true;
                    outcome.archived = archived;
                    self.mark(TIMER_RESET_MARKER, &today);
                }
                Err(e) => error!("Daily timer reset failed, will retry {e:?}"),
            }
        }

        if self.is_stale(TASK_RESET_MARKER, &today) {
            match self.reset_tasks().await {
                Ok(count) => {
                    outcome.tasks_reset = count;
                    self.mark(TASK_RESET_MARKER, &today);
                }
                Err(e) => error!("Daily task reset failed, will retry {e:?}"),
            }
        }

        if outcome.is_noop() {
            debug!("Nothing to roll over for {today}");
        } else {
            info!(
                "Rolled over into {today}: timer reset {}, {} tasks reset",
                outcome.timer_reset, outcome.tasks_reset
            );
        }
        outcome
    }

    fn is_stale(&self, marker: &str, today: &str) -> bool {
        self.kv.get(marker).as_deref() != Some(today)
    }

    fn mark(&self, marker: &str, today: &str) {
        if let Err(e) = self.kv.set(marker, today) {
            error!("Failed to write {marker}, rollover step will repeat {e:?}");
        }
    }

    /// Archives whatever the stopwatch holds and zeroes it in the same batch.
    async fn reset_timer(&self) -> Result<Option<Session>> {
        let Some(record) = self
            .store
            .get(Table::TimerState, TIMER_RECORD_ID)
            .await
            .context("Failed to read timer state")?
        else {
            debug!("No timer record yet, nothing to archive");
            return Ok(None);
        };
        let snapshot = TimerSnapshot::from_record(record)?;
        let entry = ArchiveEntry {
            duration_ms: displayed_time(&snapshot, self.clock.now_ms()),
            laps: snapshot.laps,
            name: Some(ROLLOVER_SESSION_NAME.to_string()),
            task_id: snapshot.active_task_id,
        };
        let reset = WriteOp::Update {
            table: Table::TimerState,
            id: TIMER_RECORD_ID.to_string(),
            fields: reset_fields(true),
        };
        self.archive.archive(entry, vec![reset]).await
    }

    async fn reset_tasks(&self) -> Result<usize> {
        let writes = self
            .tasks
            .list()
            .await
            .context("Failed to read tasks")?
            .into_iter()
            .map(|task| WriteOp::Update {
                table: Table::Tasks,
                id: task.id,
                fields: fields(serde_json::json!({
                    "totalTimeSpentMs": 0,
                    "isCompleted": false,
                })),
            })
            .collect::<Vec<_>>();
        let count = writes.len();
        if count > 0 {
            self.store.apply(writes).await?;
        }
        Ok(count)
    }
}
