use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::ValidationError,
    store::{
        entities::{Entity, Lap, Session},
        fields, RecordStore, Table, WriteOp,
    },
    utils::{clock::Clock, time::local_day},
};

/// What gets archived when a run is closed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveEntry {
    pub duration_ms: i64,
    pub laps: Vec<Lap>,
    pub name: Option<String>,
    pub task_id: Option<String>,
}

/// Turns closed runs into [Session] records. Used by manual resets and by the daily rollover.
#[async_trait]
pub trait SessionArchive: Send + Sync {
    /// Persists a session for `entry` together with `companion` writes, all or nothing. Entries
    /// without duration are not sessions: only the companion writes are applied and `None` is
    /// returned.
    async fn archive(&self, entry: ArchiveEntry, companion: Vec<WriteOp>)
        -> Result<Option<Session>>;
}

pub struct StoreSessionArchive {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl StoreSessionArchive {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl SessionArchive for StoreSessionArchive {
    async fn archive(
        &self,
        entry: ArchiveEntry,
        mut companion: Vec<WriteOp>,
    ) -> Result<Option<Session>> {
        if entry.duration_ms <= 0 {
            if !companion.is_empty() {
                self.store.apply(companion).await?;
            }
            return Ok(None);
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            time: entry.duration_ms,
            laps: entry.laps,
            date: self.clock.time(),
            name: entry.name,
            task_id: entry.task_id,
        };
        companion.insert(
            0,
            WriteOp::Insert {
                table: Table::Sessions,
                record: session.to_record()?,
            },
        );
        self.store.apply(companion).await?;
        info!("Archived session {} of {}ms", session.id, session.time);
        Ok(Some(session))
    }
}

/// Read side and edits of the session history.
#[derive(Clone)]
pub struct SessionLog {
    store: Arc<dyn RecordStore>,
}

impl SessionLog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<Session>> {
        let mut sessions = self
            .store
            .list(Table::Sessions)
            .await?
            .into_iter()
            .map(Session::from_record)
            .collect::<Result<Vec<_>>>()?;
        sessions.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(sessions)
    }

    /// Finds a session by its id or an unambiguous id prefix.
    pub async fn resolve(&self, key: &str) -> Result<Session> {
        let key = key.trim();
        let mut matching = self
            .list()
            .await?
            .into_iter()
            .filter(|session| !key.is_empty() && session.id.starts_with(key))
            .collect::<Vec<_>>();
        if let Some(exact) = matching.iter().position(|session| session.id == key) {
            return Ok(matching.swap_remove(exact));
        }
        match matching.len() {
            1 => Ok(matching.remove(0)),
            _ => Err(ValidationError::UnknownSession(key.to_string()).into()),
        }
    }

    pub async fn rename(&self, id: &str, name: Option<String>) -> Result<()> {
        if self.store.get(Table::Sessions, id).await?.is_none() {
            return Err(ValidationError::UnknownSession(id.to_string()).into());
        }
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self.store
            .update(Table::Sessions, id, fields(json!({ "name": name })))
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.store.get(Table::Sessions, id).await?.is_none() {
            return Err(ValidationError::UnknownSession(id.to_string()).into());
        }
        self.store.delete(Table::Sessions, id).await
    }

    /// Total session time per local calendar day. This is what a calendar heatmap colors.
    pub async fn daily_totals(&self) -> Result<BTreeMap<NaiveDate, i64>> {
        Ok(daily_totals(&self.list().await?))
    }

    pub async fn total_for(&self, day: NaiveDate) -> Result<i64> {
        Ok(self.daily_totals().await?.get(&day).copied().unwrap_or(0))
    }
}

pub fn daily_totals(sessions: &[Session]) -> BTreeMap<NaiveDate, i64> {
    let mut totals = BTreeMap::new();
    for session in sessions {
        *totals.entry(local_day(session.date)).or_insert(0) += session.time;
    }
    totals
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

    use crate::{
        store::{entities::TIMER_RECORD_ID, memory::MemoryStore},
        utils::clock::ManualClock,
    };

    use super::*;

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    fn setup() -> (Arc<MemoryStore>, StoreSessionArchive, SessionLog) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.from_utc_datetime(&TEST_START_DATE));
        let archive = StoreSessionArchive::new(store.clone(), Arc::new(clock));
        let log = SessionLog::new(store.clone());
        (store, archive, log)
    }

    #[tokio::test]
    async fn test_archive_creates_session() -> Result<()> {
        let (_, archive, log) = setup();
        let session = archive
            .archive(
                ArchiveEntry {
                    duration_ms: 1500,
                    name: Some("Reading".into()),
                    ..Default::default()
                },
                vec![],
            )
            .await?
            .unwrap();

        assert_eq!(log.list().await?, vec![session]);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_duration_is_not_a_session() -> Result<()> {
        let (store, archive, log) = setup();
        store
            .insert(
                Table::TimerState,
                fields(json!({"id": TIMER_RECORD_ID, "accumulatedTime": 0})),
            )
            .await?;

        let result = archive
            .archive(
                ArchiveEntry::default(),
                vec![WriteOp::Update {
                    table: Table::TimerState,
                    id: TIMER_RECORD_ID.into(),
                    fields: fields(json!({"laps": []})),
                }],
            )
            .await?;

        assert_eq!(result, None);
        assert!(log.list().await?.is_empty());
        // The companion write still went through.
        assert_eq!(store.applied_batches(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_companion_failure_drops_the_session() -> Result<()> {
        let (_, archive, log) = setup();
        let result = archive
            .archive(
                ArchiveEntry {
                    duration_ms: 10,
                    ..Default::default()
                },
                vec![WriteOp::Update {
                    table: Table::TimerState,
                    id: "missing".into(),
                    fields: fields(json!({})),
                }],
            )
            .await;
        assert!(result.is_err());
        assert!(log.list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_by_prefix() -> Result<()> {
        let (_, archive, log) = setup();
        let session = archive
            .archive(
                ArchiveEntry {
                    duration_ms: 10,
                    ..Default::default()
                },
                vec![],
            )
            .await?
            .unwrap();

        assert_eq!(log.resolve(&session.id[..8]).await?, session);
        assert_eq!(log.resolve(&session.id).await?, session);
        assert!(log.resolve("").await.is_err());
        assert!(log.resolve("not-an-id").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_and_delete() -> Result<()> {
        let (_, archive, log) = setup();
        let session = archive
            .archive(
                ArchiveEntry {
                    duration_ms: 10,
                    ..Default::default()
                },
                vec![],
            )
            .await?
            .unwrap();

        log.rename(&session.id, Some("  Deep work ".into())).await?;
        assert_eq!(log.list().await?[0].name.as_deref(), Some("Deep work"));

        log.rename(&session.id, Some("   ".into())).await?;
        assert_eq!(log.list().await?[0].name, None);

        log.delete(&session.id).await?;
        assert!(log.list().await?.is_empty());

        let missing = log.delete(&session.id).await.unwrap_err();
        assert_eq!(
            missing.downcast_ref::<ValidationError>(),
            Some(&ValidationError::UnknownSession(session.id))
        );
        Ok(())
    }

    #[test]
    fn test_daily_totals() {
        let noon = Utc.from_utc_datetime(&TEST_START_DATE) + Duration::hours(12);
        let session = |date, time| Session {
            id: Uuid::new_v4().to_string(),
            time,
            laps: vec![],
            date,
            name: None,
            task_id: None,
        };
        let sessions = vec![
            session(noon, 1000),
            session(noon + Duration::minutes(5), 500),
            session(noon + Duration::days(2), 42),
        ];

        let totals = daily_totals(&sessions);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[&local_day(noon)], 1500);
        assert_eq!(totals[&local_day(noon + Duration::days(2))], 42);
    }
}
