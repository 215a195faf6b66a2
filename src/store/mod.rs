//! Storage is organized around a record oriented [RecordStore].
//! The basic idea is:
//!   - There are a handful of tables, each holding json records keyed by their `id` field.
//!   - Writes are partial: an update merges the given fields into the stored record.
//!   - Every applied write is announced as a [ChangeEvent] to subscribers, which is how other
//!     observers of the same data learn about it.
//!
//! [memory::MemoryStore] keeps everything in process, [file::FileStore] keeps tables in a
//! directory so that several processes can share them.

pub mod entities;
pub mod file;
pub mod kv;
pub mod memory;
pub mod tables;

use std::future;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored record. Always a json object with a string `id` field.
pub type Record = serde_json::Map<String, Value>;

pub type ChangeStream = BoxStream<'static, ChangeEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    TimerState,
    Tasks,
    Sessions,
    DailyGoals,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::TimerState,
        Table::Tasks,
        Table::Sessions,
        Table::DailyGoals,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::TimerState => "timer_state",
            Table::Tasks => "tasks",
            Table::Sessions => "sessions",
            Table::DailyGoals => "daily_goals",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub table: Table,
    pub new_record: Option<Record>,
    pub old_record: Option<Record>,
}

impl ChangeEvent {
    pub fn record_id(&self) -> Option<&str> {
        self.new_record
            .as_ref()
            .or(self.old_record.as_ref())
            .and_then(record_id)
    }
}

/// Selects which change events a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: Table,
    pub field: Option<(String, Value)>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self { table, field: None }
    }

    /// Only pass events whose new (or, for deletes, old) record has `name == value`.
    pub fn with_field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: Some((name.into(), value.into())),
            ..self
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        let Some((name, value)) = &self.field else {
            return true;
        };
        event
            .new_record
            .as_ref()
            .or(event.old_record.as_ref())
            .and_then(|record| record.get(name))
            .is_some_and(|v| v == value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert { table: Table, record: Record },
    Update { table: Table, id: String, fields: Record },
    Delete { table: Table, id: String },
}

impl WriteOp {
    pub fn table(&self) -> Table {
        match self {
            WriteOp::Insert { table, .. }
            | WriteOp::Update { table, .. }
            | WriteOp::Delete { table, .. } => *table,
        }
    }
}

/// Interface for abstracting the shared store. Implementations must apply each call of
/// [RecordStore::apply] in full or not at all, and announce every applied change to subscribers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, table: Table, id: &str) -> Result<Option<Record>>;

    async fn list(&self, table: Table) -> Result<Vec<Record>>;

    /// Applies a batch of writes atomically.
    async fn apply(&self, writes: Vec<WriteOp>) -> Result<()>;

    fn subscribe(&self, filter: ChangeFilter) -> ChangeStream;

    async fn insert(&self, table: Table, record: Record) -> Result<()> {
        self.apply(vec![WriteOp::Insert { table, record }]).await
    }

    /// Merges `fields` into the record. Fails if there is no such record.
    async fn update(&self, table: Table, id: &str, fields: Record) -> Result<()> {
        self.apply(vec![WriteOp::Update {
            table,
            id: id.to_string(),
            fields,
        }])
        .await
    }

    async fn delete(&self, table: Table, id: &str) -> Result<()> {
        self.apply(vec![WriteOp::Delete {
            table,
            id: id.to_string(),
        }])
        .await
    }
}

pub fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

/// Turns `json!({...})` into a field set for partial updates. Anything but an object becomes an
/// empty set.
pub fn fields(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

/// Shared subscription plumbing for stores announcing changes over a broadcast channel.
pub(crate) fn filtered_stream(
    receiver: tokio::sync::broadcast::Receiver<ChangeEvent>,
    filter: ChangeFilter,
) -> ChangeStream {
    use futures::StreamExt;
    use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

    BroadcastStream::new(receiver)
        .filter_map(move |event| {
            future::ready(match event {
                Ok(event) if filter.matches(&event) => Some(event),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber lagged behind, skipped {skipped} change events");
                    None
                }
            })
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(table: Table, new: Value) -> ChangeEvent {
        ChangeEvent {
            change_type: ChangeType::Update,
            table,
            new_record: Some(fields(new)),
            old_record: None,
        }
    }

    #[test]
    fn test_filter_by_table_and_field() {
        let filter = ChangeFilter::table(Table::Tasks).with_field("id", "a");
        assert!(filter.matches(&event(Table::Tasks, json!({"id": "a"}))));
        assert!(!filter.matches(&event(Table::Tasks, json!({"id": "b"}))));
        assert!(!filter.matches(&event(Table::Sessions, json!({"id": "a"}))));
        assert!(ChangeFilter::table(Table::Sessions).matches(&event(Table::Sessions, json!({}))));
    }

    #[test]
    fn test_delete_events_match_on_old_record() {
        let filter = ChangeFilter::table(Table::Tasks).with_field("id", "a");
        let deleted = ChangeEvent {
            change_type: ChangeType::Delete,
            table: Table::Tasks,
            new_record: None,
            old_record: Some(fields(json!({"id": "a"}))),
        };
        assert!(filter.matches(&deleted));
        assert_eq!(deleted.record_id(), Some("a"));
    }

    #[test]
    fn test_change_event_wire_shape() {
        let value = serde_json::to_value(event(Table::TimerState, json!({"id": "x"}))).unwrap();
        assert_eq!(value["changeType"], "update");
        assert_eq!(value["table"], "timer_state");
        assert_eq!(value["oldRecord"], Value::Null);
    }
}
