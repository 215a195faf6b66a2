use std::{collections::BTreeMap, io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    sync::{broadcast, Mutex},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{
    filtered_stream, record_id,
    tables::{diff_rows, TableRows, TableSet},
    ChangeEvent, ChangeFilter, ChangeStream, Record, RecordStore, Table, WriteOp,
};

const STORE_FILE: &str = "store.json";
const LOCK_FILE: &str = "store.lock";
const EVENT_CAPACITY: usize = 256;

/// Store persisted as a single json document inside a directory. Several processes can share the
/// directory: writes are serialized through a lock file and each process notices the writes of
/// others when it rereads the document, either on access or through [FileStore::watch_external].
pub struct FileStore {
    dir: PathBuf,
    /// Image of the document as this process last saw it. Differences against a fresh read are
    /// changes made by someone else.
    seen: Mutex<TableSet>,
    events: broadcast::Sender<ChangeEvent>,
}

impl FileStore {
    pub async fn open(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create store directory {dir:?}"))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            dir,
            seen: Mutex::new(TableSet::default()),
            events,
        };
        let image = store.read_shared().await?;
        *store.seen.lock().await = image;
        Ok(store)
    }

    async fn open_lock(&self) -> Result<File> {
        Ok(File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))
            .await?)
    }

    async fn read_image(&self) -> Result<TableSet> {
        let path = self.dir.join(STORE_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TableSet::default()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(TableSet::default());
        }

        let document: BTreeMap<String, Vec<Record>> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Store document {path:?} is corrupted"))?;

        let mut image = TableSet::default();
        for (name, records) in document {
            let Some(table) = Table::ALL.into_iter().find(|t| t.name() == name) else {
                warn!("Ignoring unknown table {name} in {path:?}");
                continue;
            };
            let mut rows = TableRows::new();
            for record in records {
                match record_id(&record) {
                    Some(id) => {
                        rows.insert(id.to_string(), record);
                    }
                    None => warn!("Ignoring record without id in {name}"),
                }
            }
            image.set_rows(table, rows);
        }
        Ok(image)
    }

    /// Replaces the document in one rename so that readers never see half of a batch.
    async fn write_image(&self, image: &TableSet) -> Result<()> {
        let document = Table::ALL
            .into_iter()
            .map(|table| (table.name(), image.list(table)))
            .collect::<BTreeMap<_, _>>();
        let buffer = serde_json::to_vec_pretty(&document)?;

        let path = self.dir.join(STORE_FILE);
        let temporary = self.dir.join(format!("{STORE_FILE}.tmp"));
        tokio::fs::write(&temporary, buffer).await?;
        tokio::fs::rename(&temporary, &path).await?;
        Ok(())
    }

    async fn read_shared(&self) -> Result<TableSet> {
        // Semi-safe acquire-release for the document
        let lock = self.open_lock().await?;
        lock.lock_shared()?;
        let image = self.read_image().await;
        lock.unlock_async().await?;
        image
    }

    /// Takes `image` as the new truth and announces how it differs from what was seen before.
    async fn absorb(&self, image: TableSet) -> usize {
        let empty = TableRows::new();
        let events = {
            let mut seen = self.seen.lock().await;
            let events = Table::ALL
                .into_iter()
                .flat_map(|table| {
                    diff_rows(
                        table,
                        seen.rows(table).unwrap_or(&empty),
                        image.rows(table).unwrap_or(&empty),
                    )
                })
                .collect::<Vec<_>>();
            *seen = image;
            events
        };
        let count = events.len();
        for event in events {
            let _ = self.events.send(event);
        }
        count
    }

    /// Rereads the document and announces changes written by other processes. Returns how many
    /// changes were found.
    pub async fn refresh(&self) -> Result<usize> {
        let image = self.read_shared().await?;
        Ok(self.absorb(image).await)
    }

    /// Polls the document for foreign writes until cancelled.
    pub async fn watch_external(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => ()
            }
            match self.refresh().await {
                Ok(0) => {}
                Ok(changes) => debug!("Picked up {changes} external changes"),
                Err(e) => error!("Failed to refresh store {e:?}"),
            }
        }
    }

    async fn apply_locked(&self, writes: Vec<WriteOp>) -> Result<()> {
        let current = self.read_image().await?;
        self.absorb(current.clone()).await;

        let mut next = current;
        let events = next.apply(writes)?;
        self.write_image(&next).await?;

        *self.seen.lock().await = next;
        for event in events {
            let _ = self.events.send(event);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn get(&self, table: Table, id: &str) -> Result<Option<Record>> {
        self.refresh().await?;
        Ok(self.seen.lock().await.get(table, id).cloned())
    }

    async fn list(&self, table: Table) -> Result<Vec<Record>> {
        self.refresh().await?;
        Ok(self.seen.lock().await.list(table))
    }

    async fn apply(&self, writes: Vec<WriteOp>) -> Result<()> {
        let lock = self.open_lock().await?;
        lock.lock_exclusive()?;
        let result = self.apply_locked(writes).await;
        lock.unlock_async().await?;
        result
    }

    fn subscribe(&self, filter: ChangeFilter) -> ChangeStream {
        filtered_stream(self.events.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use futures::StreamExt;
    use serde_json::json;
    use tempfile::tempdir;

    use crate::store::{fields, ChangeType};

    use super::*;

    #[tokio::test]
    async fn test_records_survive_reopening() -> Result<()> {
        let dir = tempdir()?;
        {
            let store = FileStore::open(dir.path().to_path_buf()).await?;
            store
                .insert(Table::Tasks, fields(json!({"id": "t", "name": "Read"})))
                .await?;
            store
                .update(Table::Tasks, "t", fields(json!({"totalTimeSpentMs": 10})))
                .await?;
        }

        let store = FileStore::open(dir.path().to_path_buf()).await?;
        let task = store.get(Table::Tasks, "t").await?.unwrap();
        assert_eq!(task["name"], "Read");
        assert_eq!(task["totalTimeSpentMs"], 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_foreign_writes_are_announced() -> Result<()> {
        let dir = tempdir()?;
        let ours = FileStore::open(dir.path().to_path_buf()).await?;
        let theirs = FileStore::open(dir.path().to_path_buf()).await?;
        let mut changes = ours.subscribe(ChangeFilter::table(Table::TimerState));

        theirs
            .insert(
                Table::TimerState,
                fields(json!({"id": "singleton", "isRunning": true})),
            )
            .await?;

        assert_eq!(ours.refresh().await?, 1);
        let event = changes.next().await.unwrap();
        assert_eq!(event.change_type, ChangeType::Insert);
        assert_eq!(event.new_record.unwrap()["isRunning"], true);

        // Nothing new on disk, nothing announced.
        assert_eq!(ours.refresh().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_document_untouched() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::open(dir.path().to_path_buf()).await?;
        store
            .insert(Table::Tasks, fields(json!({"id": "t"})))
            .await?;

        let result = store
            .apply(vec![
                WriteOp::Delete {
                    table: Table::Tasks,
                    id: "t".into(),
                },
                WriteOp::Update {
                    table: Table::TimerState,
                    id: "singleton".into(),
                    fields: fields(json!({"isRunning": true})),
                },
            ])
            .await;
        assert!(result.is_err());

        let reopened = FileStore::open(dir.path().to_path_buf()).await?;
        assert!(reopened.get(Table::Tasks, "t").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupted_document_is_reported() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join(STORE_FILE), "{ not json")?;
        assert!(FileStore::open(dir.path().to_path_buf()).await.is_err());
        Ok(())
    }
}
