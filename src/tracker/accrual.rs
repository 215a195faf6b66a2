use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::utils::clock::Clock;

use super::tasks::TaskBook;

/// Batch window for task time. Credited time collects in a pending buffer and is written out
/// once nothing new arrived for `window`, or when [TaskAccrual::flush] is called before shutdown.
#[derive(Clone)]
pub struct TaskAccrual {
    pending: Arc<Mutex<HashMap<String, i64>>>,
    tasks: TaskBook,
    wake: mpsc::UnboundedSender<()>,
}

impl TaskAccrual {
    pub fn spawn(tasks: TaskBook, clock: Arc<dyn Clock>, window: Duration) -> Self {
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let (wake, receiver) = mpsc::unbounded_channel();
        tokio::spawn(debounce(
            receiver,
            pending.clone(),
            tasks.clone(),
            clock,
            window,
        ));
        Self {
            pending,
            tasks,
            wake,
        }
    }

    pub async fn credit(&self, task_id: &str, delta_ms: i64) {
        if delta_ms <= 0 {
            return;
        }
        *self
            .pending
            .lock()
            .await
            .entry(task_id.to_string())
            .or_insert(0) += delta_ms;
        let _ = self.wake.send(());
    }

    pub async fn pending_ms(&self, task_id: &str) -> i64 {
        self.pending.lock().await.get(task_id).copied().unwrap_or(0)
    }

    /// Writes everything pending right away.
    pub async fn flush(&self) {
        write_pending(&self.pending, &self.tasks).await;
    }
}

async fn debounce(
    mut receiver: mpsc::UnboundedReceiver<()>,
    pending: Arc<Mutex<HashMap<String, i64>>>,
    tasks: TaskBook,
    clock: Arc<dyn Clock>,
    window: Duration,
) {
    while receiver.recv().await.is_some() {
        // Every new credit restarts the window.
        loop {
            tokio::select! {
                next = receiver.recv() => {
                    if next.is_none() {
                        break;
                    }
                }
                _ = clock.sleep(window) => break,
            }
        }
        write_pending(&pending, &tasks).await;
    }
    write_pending(&pending, &tasks).await;
}

async fn write_pending(pending: &Mutex<HashMap<String, i64>>, tasks: &TaskBook) {
    let batch = std::mem::take(&mut *pending.lock().await);
    for (task_id, delta) in batch {
        match tasks.add_time(&task_id, delta).await {
            Ok(Some(task)) => debug!(
                "Credited {delta}ms to {}, now at {}ms",
                task.name, task.total_time_spent_ms
            ),
            Ok(None) => warn!("Task {task_id} is gone, dropping {delta}ms"),
            Err(e) => error!("Failed to credit {delta}ms to task {task_id} {e:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

    use crate::{
        store::{memory::MemoryStore, RecordStore},
        utils::clock::ManualClock,
    };

    use super::*;

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    fn setup() -> (Arc<MemoryStore>, TaskBook, TaskAccrual) {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> =
            Arc::new(ManualClock::new(Utc.from_utc_datetime(&TEST_START_DATE)));
        let tasks = TaskBook::new(store.clone() as Arc<dyn RecordStore>, clock.clone());
        let accrual = TaskAccrual::spawn(tasks.clone(), clock, Duration::from_millis(500));
        (store, tasks, accrual)
    }

    #[tokio::test(start_paused = true)]
    async fn test_credits_are_coalesced_into_one_write() -> Result<()> {
        let (store, tasks, accrual) = setup();
        let task = tasks.create("Read", 60_000).await?;
        let writes = store.applied_batches();

        accrual.credit(&task.id, 100).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        accrual.credit(&task.id, 200).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The second credit pushed the window out, nothing is written yet.
        assert_eq!(store.applied_batches(), writes);
        assert_eq!(accrual.pending_ms(&task.id).await, 300);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.applied_batches(), writes + 1);
        assert_eq!(tasks.get(&task.id).await?.total_time_spent_ms, 300);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately() -> Result<()> {
        let (_, tasks, accrual) = setup();
        let task = tasks.create("Read", 60_000).await?;

        accrual.credit(&task.id, 1_000).await;
        accrual.credit(&task.id, 0).await;
        accrual.flush().await;

        assert_eq!(tasks.get(&task.id).await?.total_time_spent_ms, 1_000);
        assert_eq!(accrual.pending_ms(&task.id).await, 0);
        Ok(())
    }
}
