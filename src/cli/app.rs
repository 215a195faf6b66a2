use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use tracing::debug;

use crate::{
    config::AppConfig,
    rollover::DailyRollover,
    stopwatch::Stopwatch,
    store::{file::FileStore, kv::FileKv, RecordStore},
    tracker::{
        goal::GoalBook,
        sessions::{SessionArchive, SessionLog, StoreSessionArchive},
        tasks::TaskBook,
    },
    utils::clock::{Clock, DefaultClock},
};

const STORE_DIR: &str = "store";
const LOCAL_VALUES_FILE: &str = "local.json";

/// Everything one invocation of the cli works with, wired to the files of the application
/// directory.
pub struct App {
    pub config: AppConfig,
    pub store: Arc<FileStore>,
    pub clock: Arc<dyn Clock>,
    pub stopwatch: Arc<Stopwatch>,
    pub tasks: TaskBook,
    pub sessions: SessionLog,
    pub goals: GoalBook,
    pub rollover: DailyRollover,
}

impl App {
    /// Opens the stores and catches up on the daily rollover before the stopwatch is loaded.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        let config = AppConfig::load(&dir)?;
        debug!("Using {dir:?} with {config:?}");
        let store = Arc::new(FileStore::open(dir.join(STORE_DIR)).await?);
        let shared: Arc<dyn RecordStore> = store.clone();
        let kv = Arc::new(FileKv::open(dir.join(LOCAL_VALUES_FILE))?);
        let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
        let archive: Arc<dyn SessionArchive> =
            Arc::new(StoreSessionArchive::new(shared.clone(), clock.clone()));

        let rollover =
            DailyRollover::new(shared.clone(), kv, clock.clone()).with_archive(archive.clone());
        rollover.run().await;

        let stopwatch = Arc::new(
            Stopwatch::new(shared.clone(), clock.clone(), &config).with_archive(archive),
        );
        stopwatch.load().await?;

        Ok(Self {
            config,
            store,
            tasks: TaskBook::new(shared.clone(), clock.clone()),
            sessions: SessionLog::new(shared.clone()),
            goals: GoalBook::new(shared),
            clock,
            stopwatch,
            rollover,
        })
    }
}
