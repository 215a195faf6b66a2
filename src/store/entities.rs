use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::{Record, Table};

/// Id of the one and only timer record.
pub const TIMER_RECORD_ID: &str = "singleton";
/// Id of the one and only daily goal record.
pub const GOAL_RECORD_ID: &str = "global";

/// Something stored as a record of a fixed table.
pub trait Entity: Serialize + DeserializeOwned {
    const TABLE: Table;

    fn id(&self) -> &str;

    fn to_record(&self) -> Result<Record> {
        match serde_json::to_value(self)? {
            Value::Object(mut record) => {
                record.insert("id".into(), Value::String(self.id().to_string()));
                Ok(record)
            }
            _ => Err(anyhow!("{} entity is not a json object", Self::TABLE.name())),
        }
    }

    fn from_record(record: Record) -> Result<Self> {
        serde_json::from_value(Value::Object(record))
            .with_context(|| format!("Malformed record in {}", Self::TABLE.name()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lap {
    pub sequence_number: u32,
    pub cumulative_time: i64,
    pub split_time: i64,
}

/// Persisted state of the shared stopwatch. Shown time is
/// `accumulated_time + (now - start_timestamp)` while running and `accumulated_time` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerSnapshot {
    /// Milliseconds banked before the current run.
    pub accumulated_time: i64,
    /// Wall clock millis of the last transition to running.
    pub start_timestamp: Option<i64>,
    pub is_running: bool,
    pub laps: Vec<Lap>,
    pub active_task_id: Option<String>,
}

impl Entity for TimerSnapshot {
    const TABLE: Table = Table::TimerState;

    fn id(&self) -> &str {
        TIMER_RECORD_ID
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub target_time_ms: i64,
    #[serde(default)]
    pub total_time_spent_ms: i64,
    #[serde(default)]
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Target reached. This is not the same as completed, completing is up to the user.
    pub fn goal_met(&self) -> bool {
        self.total_time_spent_ms >= self.target_time_ms
    }
}

impl Entity for Task {
    const TABLE: Table = Table::Tasks;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Duration in milliseconds, never zero.
    pub time: i64,
    #[serde(default)]
    pub laps: Vec<Lap>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
}

impl Entity for Session {
    const TABLE: Table = Table::Sessions;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyGoal {
    pub target_ms: i64,
}

impl DailyGoal {
    pub fn weekly_target_ms(&self) -> i64 {
        self.target_ms * 7
    }
}

impl Entity for DailyGoal {
    const TABLE: Table = Table::DailyGoals;

    fn id(&self) -> &str {
        GOAL_RECORD_ID
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::store::fields;

    use super::*;

    #[test]
    fn test_timer_record_shape() -> Result<()> {
        let snapshot = TimerSnapshot {
            accumulated_time: 1500,
            start_timestamp: Some(10),
            is_running: true,
            laps: vec![Lap {
                sequence_number: 1,
                cumulative_time: 1200,
                split_time: 1200,
            }],
            active_task_id: None,
        };
        let record = snapshot.to_record()?;
        assert_eq!(record["id"], TIMER_RECORD_ID);
        assert_eq!(record["accumulatedTime"], 1500);
        assert_eq!(record["startTimestamp"], 10);
        assert_eq!(record["laps"][0]["sequenceNumber"], 1);
        assert_eq!(TimerSnapshot::from_record(record)?, snapshot);
        Ok(())
    }

    #[test]
    fn test_partial_timer_record_uses_defaults() -> Result<()> {
        let snapshot = TimerSnapshot::from_record(fields(json!({"id": TIMER_RECORD_ID})))?;
        assert_eq!(snapshot, TimerSnapshot::default());
        Ok(())
    }

    #[test]
    fn test_weekly_goal() {
        assert_eq!(DailyGoal { target_ms: 3_600_000 }.weekly_target_ms(), 25_200_000);
    }
}
