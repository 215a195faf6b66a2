use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::{record_id, ChangeEvent, ChangeType, Record, Table, WriteOp};

pub type TableRows = BTreeMap<String, Record>;

/// In memory image of every table. Both store implementations run their writes through it so
/// that they agree on merge and event semantics.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TableSet {
    tables: BTreeMap<Table, TableRows>,
}

impl TableSet {
    pub fn get(&self, table: Table, id: &str) -> Option<&Record> {
        self.tables.get(&table).and_then(|rows| rows.get(id))
    }

    pub fn list(&self, table: Table) -> Vec<Record> {
        self.tables
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rows(&self, table: Table) -> Option<&TableRows> {
        self.tables.get(&table)
    }

    pub fn set_rows(&mut self, table: Table, rows: TableRows) {
        self.tables.insert(table, rows);
    }

    /// Applies all writes or none of them. Returns the resulting change events in write order.
    pub fn apply(&mut self, writes: Vec<WriteOp>) -> Result<Vec<ChangeEvent>> {
        let mut staged = self.clone();
        let mut events = Vec::with_capacity(writes.len());
        for write in writes {
            if let Some(event) = staged.apply_one(write)? {
                events.push(event);
            }
        }
        *self = staged;
        Ok(events)
    }

    fn apply_one(&mut self, write: WriteOp) -> Result<Option<ChangeEvent>> {
        match write {
            WriteOp::Insert { table, record } => {
                let id = record_id(&record)
                    .ok_or_else(|| anyhow!("Record inserted into {} has no id", table.name()))?
                    .to_string();
                let rows = self.tables.entry(table).or_default();
                if rows.contains_key(&id) {
                    return Err(anyhow!("Record {id} already exists in {}", table.name()));
                }
                rows.insert(id, record.clone());
                Ok(Some(ChangeEvent {
                    change_type: ChangeType::Insert,
                    table,
                    new_record: Some(record),
                    old_record: None,
                }))
            }
            WriteOp::Update { table, id, fields } => {
                let record = self
                    .tables
                    .get_mut(&table)
                    .and_then(|rows| rows.get_mut(&id))
                    .ok_or_else(|| anyhow!("No record {id} in {}", table.name()))?;
                let old = record.clone();
                for (key, value) in fields {
                    // The id is the key of the row, it never changes.
                    if key != "id" {
                        record.insert(key, value);
                    }
                }
                Ok(Some(ChangeEvent {
                    change_type: ChangeType::Update,
                    table,
                    new_record: Some(record.clone()),
                    old_record: Some(old),
                }))
            }
            WriteOp::Delete { table, id } => {
                let removed = self.tables.get_mut(&table).and_then(|rows| rows.remove(&id));
                Ok(removed.map(|old| ChangeEvent {
                    change_type: ChangeType::Delete,
                    table,
                    new_record: None,
                    old_record: Some(old),
                }))
            }
        }
    }
}

/// Describes how `old` became `new` as a sequence of change events. Used when a table changed
/// behind our back and we only have before and after images.
pub fn diff_rows(table: Table, old: &TableRows, new: &TableRows) -> Vec<ChangeEvent> {
    let mut events = vec![];
    for (id, record) in new {
        match old.get(id) {
            None => events.push(ChangeEvent {
                change_type: ChangeType::Insert,
                table,
                new_record: Some(record.clone()),
                old_record: None,
            }),
            Some(previous) if previous != record => events.push(ChangeEvent {
                change_type: ChangeType::Update,
                table,
                new_record: Some(record.clone()),
                old_record: Some(previous.clone()),
            }),
            Some(_) => {}
        }
    }
    for (id, record) in old {
        if !new.contains_key(id) {
            events.push(ChangeEvent {
                change_type: ChangeType::Delete,
                table,
                new_record: None,
                old_record: Some(record.clone()),
            });
        }
    }
    events
}
