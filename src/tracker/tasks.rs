use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::ValidationError,
    store::{
        entities::{Entity, Task},
        fields, RecordStore, Table,
    },
    utils::clock::Clock,
};

/// Task bookkeeping. All validation happens before the first write.
#[derive(Clone)]
pub struct TaskBook {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl TaskBook {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Oldest first.
    pub async fn list(&self) -> Result<Vec<Task>> {
        let mut tasks = self
            .store
            .list(Table::Tasks)
            .await?
            .into_iter()
            .map(Task::from_record)
            .collect::<Result<Vec<_>>>()?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(tasks)
    }

    pub async fn get(&self, id: &str) -> Result<Task> {
        match self.store.get(Table::Tasks, id).await? {
            Some(record) => Task::from_record(record),
            None => Err(ValidationError::UnknownTask(id.to_string()).into()),
        }
    }

    /// Finds a task by id, or by name ignoring case.
    pub async fn resolve(&self, key: &str) -> Result<Task> {
        let key = key.trim();
        self.list()
            .await?
            .into_iter()
            .find(|task| task.id == key || task.name.eq_ignore_ascii_case(key))
            .ok_or_else(|| ValidationError::UnknownTask(key.to_string()).into())
    }

    pub async fn create(&self, name: &str, target_time_ms: i64) -> Result<Task> {
        let name = self.validate_name(name, None).await?;
        validate_target(target_time_ms)?;

        let task = Task {
            id: Uuid::new_v4().to_string(),
            name,
            target_time_ms,
            total_time_spent_ms: 0,
            is_completed: false,
            created_at: self.clock.time(),
        };
        self.store.insert(Table::Tasks, task.to_record()?).await?;
        info!("Created task {} ({})", task.name, task.id);
        Ok(task)
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<Task> {
        self.get(id).await?;
        let name = self.validate_name(name, Some(id)).await?;
        self.store
            .update(Table::Tasks, id, fields(json!({ "name": name })))
            .await?;
        self.get(id).await
    }

    pub async fn set_target(&self, id: &str, target_time_ms: i64) -> Result<Task> {
        validate_target(target_time_ms)?;
        self.get(id).await?;
        self.store
            .update(
                Table::Tasks,
                id,
                fields(json!({ "targetTimeMs": target_time_ms })),
            )
            .await?;
        self.get(id).await
    }

    pub async fn set_completed(&self, id: &str, completed: bool) -> Result<Task> {
        self.get(id).await?;
        self.store
            .update(
                Table::Tasks,
                id,
                fields(json!({ "isCompleted": completed })),
            )
            .await?;
        self.get(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.get(id).await?;
        self.store.delete(Table::Tasks, id).await
    }

    /// Adds time to a task. A task deleted in the meantime just doesn't get it.
    pub async fn add_time(&self, id: &str, delta_ms: i64) -> Result<Option<Task>> {
        let Some(record) = self.store.get(Table::Tasks, id).await? else {
            return Ok(None);
        };
        let task = Task::from_record(record)?;
        let total = task.total_time_spent_ms.saturating_add(delta_ms).max(0);
        self.store
            .update(
                Table::Tasks,
                id,
                fields(json!({ "totalTimeSpentMs": total })),
            )
            .await?;
        Ok(Some(Task {
            total_time_spent_ms: total,
            ..task
        }))
    }

    async fn validate_name(&self, name: &str, current: Option<&str>) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let lowered = name.to_lowercase();
        let duplicate = self
            .list()
            .await?
            .into_iter()
            .find(|task| Some(task.id.as_str()) != current && task.name.to_lowercase() == lowered);
        if let Some(existing) = duplicate {
            return Err(ValidationError::DuplicateName(existing.name).into());
        }
        Ok(name.to_string())
    }
}

fn validate_target(target_time_ms: i64) -> Result<()> {
    if target_time_ms <= 0 {
        return Err(ValidationError::NonPositiveTarget.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

    use crate::{store::memory::MemoryStore, utils::clock::ManualClock};

    use super::*;

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    fn setup() -> (Arc<MemoryStore>, ManualClock, TaskBook) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.from_utc_datetime(&TEST_START_DATE));
        let book = TaskBook::new(store.clone(), Arc::new(clock.clone()));
        (store, clock, book)
    }

    fn validation(error: anyhow::Error) -> ValidationError {
        error
            .downcast::<ValidationError>()
            .expect("expected a validation error")
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected_without_writing() -> Result<()> {
        let (store, _, book) = setup();
        book.create("study", 3_600_000).await?;
        let writes = store.applied_batches();

        let error = book.create("Study", 1_800_000).await.unwrap_err();
        assert_eq!(
            validation(error),
            ValidationError::DuplicateName("study".into())
        );
        assert_eq!(store.applied_batches(), writes);
        assert_eq!(book.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_input() -> Result<()> {
        let (store, _, book) = setup();
        assert_eq!(
            validation(book.create("   ", 1000).await.unwrap_err()),
            ValidationError::EmptyName
        );
        assert_eq!(
            validation(book.create("Read", 0).await.unwrap_err()),
            ValidationError::NonPositiveTarget
        );
        assert_eq!(store.applied_batches(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_keeps_own_name_free() -> Result<()> {
        let (_, _, book) = setup();
        let read = book.create("Read", 1000).await?;
        book.create("Write", 1000).await?;

        let renamed = book.rename(&read.id, "READ").await?;
        assert_eq!(renamed.name, "READ");

        assert_eq!(
            validation(book.rename(&read.id, "write").await.unwrap_err()),
            ValidationError::DuplicateName("Write".into())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_goal_met_is_not_completion() -> Result<()> {
        let (_, _, book) = setup();
        let task = book.create("Piano", 1000).await?;

        let task = book.add_time(&task.id, 1200).await?.unwrap();
        assert!(task.goal_met());
        assert!(!book.get(&task.id).await?.is_completed);

        let task = book.set_completed(&task.id, true).await?;
        assert!(task.is_completed);
        assert_eq!(task.total_time_spent_ms, 1200);
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_and_delete() -> Result<()> {
        let (_, clock, book) = setup();
        let first = book.create("Read", 1000).await?;
        clock.advance(1000);
        let second = book.create("Write", 1000).await?;

        assert_eq!(book.resolve("write").await?.id, second.id);
        assert_eq!(book.resolve(&first.id).await?.id, first.id);
        assert_eq!(
            book.list().await?.iter().map(|t| &t.name).collect::<Vec<_>>(),
            vec!["Read", "Write"]
        );

        book.delete(&first.id).await?;
        assert!(book.resolve("read").await.is_err());
        assert_eq!(book.add_time(&first.id, 10).await?, None);
        Ok(())
    }
}
