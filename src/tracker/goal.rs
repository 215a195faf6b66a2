use std::sync::Arc;

use anyhow::Result;
use chrono::{Days, NaiveDate};

use crate::{
    error::ValidationError,
    store::{
        entities::{DailyGoal, Entity, GOAL_RECORD_ID},
        RecordStore, Table, WriteOp,
    },
    utils::percentage::{progress_percentage, Percentage},
};

use super::sessions::SessionLog;

#[derive(Debug, Clone, PartialEq)]
pub struct GoalProgress {
    pub goal: DailyGoal,
    pub today_ms: i64,
    pub today: Percentage,
    /// Time of the seven days ending today.
    pub week_ms: i64,
    pub week: Percentage,
}

#[derive(Clone)]
pub struct GoalBook {
    store: Arc<dyn RecordStore>,
}

impl GoalBook {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self) -> Result<Option<DailyGoal>> {
        self.store
            .get(Table::DailyGoals, GOAL_RECORD_ID)
            .await?
            .map(DailyGoal::from_record)
            .transpose()
    }

    /// Creates the goal or replaces its target.
    pub async fn set(&self, target_ms: i64) -> Result<DailyGoal> {
        if target_ms <= 0 {
            return Err(ValidationError::NonPositiveGoal.into());
        }
        let goal = DailyGoal { target_ms };
        let write = if self.get().await?.is_some() {
            WriteOp::Update {
                table: Table::DailyGoals,
                id: GOAL_RECORD_ID.to_string(),
                fields: goal.to_record()?,
            }
        } else {
            WriteOp::Insert {
                table: Table::DailyGoals,
                record: goal.to_record()?,
            }
        };
        self.store.apply(vec![write]).await?;
        Ok(goal)
    }

    pub async fn progress(
        &self,
        sessions: &SessionLog,
        today: NaiveDate,
    ) -> Result<Option<GoalProgress>> {
        let Some(goal) = self.get().await? else {
            return Ok(None);
        };
        let totals = sessions.daily_totals().await?;
        let week_start = today.checked_sub_days(Days::new(6)).unwrap_or(today);
        let today_ms = totals.get(&today).copied().unwrap_or(0);
        let week_ms = totals.range(week_start..=today).map(|(_, ms)| ms).sum();

        Ok(Some(GoalProgress {
            goal,
            today_ms,
            today: progress_percentage(today_ms, goal.target_ms),
            week_ms,
            week: progress_percentage(week_ms, goal.weekly_target_ms()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};

    use crate::{
        store::memory::MemoryStore,
        tracker::sessions::{ArchiveEntry, SessionArchive, StoreSessionArchive},
        utils::{
            clock::{Clock, ManualClock},
            time::local_day,
        },
    };

    use super::*;

    const TEST_START_DATE: NaiveDateTime = NaiveDateTime::new(
        NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(),
        NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
    );

    #[tokio::test]
    async fn test_set_goal_validates_and_replaces() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let goals = GoalBook::new(store.clone());
        assert_eq!(goals.get().await?, None);

        assert_eq!(
            goals
                .set(0)
                .await
                .unwrap_err()
                .downcast_ref::<ValidationError>(),
            Some(&ValidationError::NonPositiveGoal)
        );

        goals.set(3_600_000).await?;
        let goal = goals.set(7_200_000).await?;
        assert_eq!(goals.get().await?, Some(goal));
        assert_eq!(goal.weekly_target_ms(), 50_400_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_progress_over_day_and_week() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.from_utc_datetime(&TEST_START_DATE));
        let archive = StoreSessionArchive::new(store.clone(), Arc::new(clock.clone()));
        let sessions = SessionLog::new(store.clone());
        let goals = GoalBook::new(store.clone());

        assert_eq!(goals.progress(&sessions, clock.today()).await?, None);
        goals.set(3_600_000).await?;

        let entry = |ms| ArchiveEntry {
            duration_ms: ms,
            ..Default::default()
        };
        archive.archive(entry(1_800_000), vec![]).await?;
        clock.advance(Duration::days(3).num_milliseconds());
        archive.archive(entry(3_600_000), vec![]).await?;
        clock.advance(Duration::days(10).num_milliseconds());
        archive.archive(entry(900_000), vec![]).await?;

        let day = local_day(Utc.from_utc_datetime(&TEST_START_DATE) + Duration::days(3));
        let progress = goals.progress(&sessions, day).await?.unwrap();
        assert_eq!(progress.today_ms, 3_600_000);
        assert_eq!(*progress.today, 100.);
        assert_eq!(progress.week_ms, 5_400_000);
        Ok(())
    }
}
