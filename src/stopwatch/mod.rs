//! The shared stopwatch. One persisted [TimerSnapshot] is observed by any number of processes;
//! each of them derives the shown time from it with [snapshot::displayed_time] and keeps its own
//! copy current by listening to store notifications.
//!
//! Writes are last-writer-wins and fire-and-forget: a failed write is logged and the local copy
//! stays authoritative until the next notification replaces it.

pub mod echo;
pub mod snapshot;
pub mod ticker;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::AppConfig,
    error::ClockError,
    store::{
        entities::{Entity, Lap, Session, TimerSnapshot, TIMER_RECORD_ID},
        ChangeEvent, ChangeFilter, ChangeType, Record, RecordStore, Table, WriteOp,
    },
    tracker::{
        accrual::TaskAccrual,
        sessions::{ArchiveEntry, SessionArchive, StoreSessionArchive},
        tasks::TaskBook,
    },
    utils::clock::Clock,
};

use echo::EchoLatch;
use snapshot::{
    displayed_time, fold_on_stop, lap_fields, next_lap, normalized, rebase, reset_fields,
    run_state_fields, running_elapsed, start_at,
};
use ticker::DisplayTicker;

pub struct Stopwatch {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    archive: Arc<dyn SessionArchive>,
    accrual: TaskAccrual,
    state: Arc<Mutex<TimerSnapshot>>,
    echo: EchoLatch,
    display: watch::Sender<i64>,
    ticker: Mutex<Option<DisplayTicker>>,
    tick_interval: Duration,
}

impl Stopwatch {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        let archive = Arc::new(StoreSessionArchive::new(store.clone(), clock.clone()));
        let tasks = TaskBook::new(store.clone(), clock.clone());
        let accrual = TaskAccrual::spawn(tasks, clock.clone(), config.batch_window());
        let (display, _) = watch::channel(0);
        Self {
            store,
            clock,
            archive,
            accrual,
            state: Arc::new(Mutex::new(TimerSnapshot::default())),
            echo: EchoLatch::new(config.echo_window()),
            display,
            ticker: Mutex::new(None),
            tick_interval: config.tick_interval(),
        }
    }

    pub fn with_archive(self, archive: Arc<dyn SessionArchive>) -> Self {
        Self { archive, ..self }
    }

    /// Reads the shared record, creating a stopped one if there is none yet.
    pub async fn load(&self) -> Result<TimerSnapshot> {
        let snapshot = match self.store.get(Table::TimerState, TIMER_RECORD_ID).await? {
            Some(record) => TimerSnapshot::from_record(record)?,
            None => {
                let initial = TimerSnapshot::default();
                match self.store.insert(Table::TimerState, initial.to_record()?).await {
                    Ok(()) => info!("Created the timer record"),
                    // Somebody else created it first, theirs wins.
                    Err(e) => match self.store.get(Table::TimerState, TIMER_RECORD_ID).await? {
                        Some(record) => {
                            return Ok(self.adopt(TimerSnapshot::from_record(record)?).await)
                        }
                        None => return Err(e),
                    },
                }
                initial
            }
        };
        Ok(self.adopt(snapshot).await)
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        self.state.lock().await.clone()
    }

    pub async fn displayed(&self) -> i64 {
        displayed_time(&*self.state.lock().await, self.clock.now_ms())
    }

    /// Shown time, refreshed every tick while running.
    pub fn watch_display(&self) -> watch::Receiver<i64> {
        self.display.subscribe()
    }

    pub async fn is_ticking(&self) -> bool {
        self.ticker
            .lock()
            .await
            .as_ref()
            .is_some_and(|ticker| !ticker.is_finished())
    }

    pub async fn start(&self) -> Result<TimerSnapshot, ClockError> {
        let started = {
            let mut state = self.state.lock().await;
            if state.is_running {
                return Err(ClockError::AlreadyRunning);
            }
            *state = start_at(&state, self.clock.now_ms());
            state.clone()
        };
        info!("Started at {}ms", started.accumulated_time);
        self.follow_run_state(&started).await;
        self.persist(run_state_fields(&started)).await;
        Ok(started)
    }

    pub async fn stop(&self) -> Result<TimerSnapshot, ClockError> {
        let now = self.clock.now_ms();
        let (before, stopped) = {
            let mut state = self.state.lock().await;
            if !state.is_running {
                return Err(ClockError::NotRunning);
            }
            let before = state.clone();
            *state = fold_on_stop(&before, now);
            (before, state.clone())
        };
        info!("Stopped at {}ms", stopped.accumulated_time);
        self.follow_run_state(&stopped).await;
        self.persist(run_state_fields(&stopped)).await;
        self.credit_run(&before, now).await;
        Ok(stopped)
    }

    pub async fn lap(&self) -> Result<Lap, ClockError> {
        let (lap, laps) = {
            let mut state = self.state.lock().await;
            let shown = displayed_time(&state, self.clock.now_ms());
            if shown <= 0 {
                return Err(ClockError::NothingToLap);
            }
            let lap = next_lap(&state.laps, shown);
            state.laps.push(lap);
            (lap, state.laps.clone())
        };
        debug!("Lap {} at {}ms", lap.sequence_number, lap.cumulative_time);
        self.persist(lap_fields(&laps)).await;
        Ok(lap)
    }

    /// Closes the current run into a session (unless nothing was timed) and zeroes the stopwatch.
    /// The active task stays selected.
    pub async fn reset(&self, label: Option<String>) -> Option<Session> {
        let now = self.clock.now_ms();
        let (before, entry) = {
            let mut state = self.state.lock().await;
            let before = state.clone();
            let entry = ArchiveEntry {
                duration_ms: displayed_time(&before, now),
                laps: before.laps.clone(),
                name: label,
                task_id: before.active_task_id.clone(),
            };
            *state = TimerSnapshot {
                active_task_id: before.active_task_id.clone(),
                ..Default::default()
            };
            (before, entry)
        };
        self.follow_run_state(&TimerSnapshot::default()).await;

        let reset = WriteOp::Update {
            table: Table::TimerState,
            id: TIMER_RECORD_ID.to_string(),
            fields: reset_fields(false),
        };
        let session = if entry.duration_ms > 0 {
            self.echo.arm(self.clock.instant());
            match self.archive.archive(entry, vec![reset]).await {
                Ok(session) => session,
                Err(e) => {
                    self.echo.disarm();
                    error!("Failed to archive session on reset {e:?}");
                    // The run stays in the store and is credited whenever it ends there.
                    return None;
                }
            }
        } else {
            self.persist(reset_fields(false)).await;
            None
        };
        self.credit_run(&before, now).await;
        session
    }

    /// Switches the task accruing time. A running stopwatch credits what it ran so far to the
    /// previous task and keeps going for the new one.
    pub async fn select_task(&self, task_id: Option<String>) -> TimerSnapshot {
        let now = self.clock.now_ms();
        let (before, selected) = {
            let mut state = self.state.lock().await;
            let before = state.clone();
            *state = TimerSnapshot {
                active_task_id: task_id,
                ..rebase(&before, now)
            };
            (before, state.clone())
        };
        let mut fields = run_state_fields(&selected);
        fields.insert("activeTaskId".into(), json!(selected.active_task_id));
        self.persist(fields).await;
        self.credit_run(&before, now).await;
        selected
    }

    /// Replaces local state with a snapshot written by another observer. Returns the shown time.
    pub async fn reconcile_from_remote(&self, remote: TimerSnapshot) -> i64 {
        let remote = normalized(remote);
        {
            let mut state = self.state.lock().await;
            if *state == remote {
                return displayed_time(&state, self.clock.now_ms());
            }
            *state = remote.clone();
        }
        debug!(
            "Reconciled with remote state, running: {}, banked {}ms",
            remote.is_running, remote.accumulated_time
        );
        self.follow_run_state(&remote).await
    }

    /// Feeds one store notification into the stopwatch. Our own echoes are dropped.
    pub async fn handle_change(&self, event: ChangeEvent) {
        if event.table != Table::TimerState || event.record_id() != Some(TIMER_RECORD_ID) {
            return;
        }
        if self.echo.is_echo(self.clock.instant()) {
            debug!("Ignoring echo of our own write");
            return;
        }
        let record = match (event.change_type, event.new_record) {
            (ChangeType::Delete, _) | (_, None) => {
                warn!("Timer record was deleted remotely, treating it as reset");
                Record::new()
            }
            (_, Some(record)) => record,
        };
        match TimerSnapshot::from_record(record) {
            Ok(remote) => {
                self.reconcile_from_remote(remote).await;
            }
            Err(e) => error!("Ignoring malformed remote timer state {e:?}"),
        }
    }

    /// Listens for remote changes of the timer record until cancelled.
    pub async fn run_sync(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut changes = self.store.subscribe(
            ChangeFilter::table(Table::TimerState).with_field("id", TIMER_RECORD_ID),
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                event = changes.next() => match event {
                    Some(event) => self.handle_change(event).await,
                    None => {
                        warn!("Store closed the change feed");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Stops the display refresh and writes out pending task time.
    pub async fn shutdown(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.cancel().await;
        }
        self.accrual.flush().await;
    }

    async fn adopt(&self, snapshot: TimerSnapshot) -> TimerSnapshot {
        let snapshot = normalized(snapshot);
        *self.state.lock().await = snapshot.clone();
        self.follow_run_state(&snapshot).await;
        snapshot
    }

    /// Runs the display refresh exactly while the stopwatch runs and publishes the shown time.
    async fn follow_run_state(&self, snapshot: &TimerSnapshot) -> i64 {
        let shown = displayed_time(snapshot, self.clock.now_ms());
        let mut ticker = self.ticker.lock().await;
        match (snapshot.is_running, ticker.take()) {
            (true, Some(running)) if !running.is_finished() => *ticker = Some(running),
            (true, _) => {
                *ticker = Some(DisplayTicker::spawn(
                    self.state.clone(),
                    self.clock.clone(),
                    self.display.clone(),
                    self.tick_interval,
                ))
            }
            (false, Some(running)) => running.cancel().await,
            (false, None) => {}
        }
        self.display.send_replace(shown);
        shown
    }

    async fn persist(&self, fields: Record) {
        self.echo.arm(self.clock.instant());
        if let Err(e) = self
            .store
            .update(Table::TimerState, TIMER_RECORD_ID, fields)
            .await
        {
            self.echo.disarm();
            error!("Failed to persist timer state, keeping local state {e:?}");
        }
    }

    async fn credit_run(&self, before: &TimerSnapshot, now: i64) {
        if let Some(task_id) = &before.active_task_id {
            self.accrual
                .credit(task_id, running_elapsed(before, now))
                .await;
        }
    }
}
