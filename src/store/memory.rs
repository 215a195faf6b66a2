use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use super::{
    filtered_stream, tables::TableSet, ChangeEvent, ChangeFilter, ChangeStream, Record,
    RecordStore, Table, WriteOp,
};

const EVENT_CAPACITY: usize = 256;

/// Store living entirely in process memory. Every clone of the `Arc` around it is another
/// observer of the same data.
pub struct MemoryStore {
    tables: Mutex<TableSet>,
    events: broadcast::Sender<ChangeEvent>,
    applied_batches: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tables: Mutex::new(TableSet::default()),
            events,
            applied_batches: AtomicUsize::new(0),
        }
    }

    /// Number of successfully applied write batches so far.
    pub fn applied_batches(&self) -> usize {
        self.applied_batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, table: Table, id: &str) -> Result<Option<Record>> {
        Ok(self.tables.lock().await.get(table, id).cloned())
    }

    async fn list(&self, table: Table) -> Result<Vec<Record>> {
        Ok(self.tables.lock().await.list(table))
    }

    async fn apply(&self, writes: Vec<WriteOp>) -> Result<()> {
        let events = self.tables.lock().await.apply(writes)?;
        self.applied_batches.fetch_add(1, Ordering::SeqCst);
        for event in events {
            debug!("Announcing {:?} on {}", event.change_type, event.table.name());
            // No subscribers is fine, nobody is listening yet.
            let _ = self.events.send(event);
        }
        Ok(())
    }

    fn subscribe(&self, filter: ChangeFilter) -> ChangeStream {
        filtered_stream(self.events.subscribe(), filter)
    }
}
