//! Pure reconciliation functions. Everything an observer shows is derived from a
//! [TimerSnapshot] and the current wall clock, never from counting ticks.

use serde_json::json;

use crate::store::{
    entities::{Lap, TimerSnapshot},
    fields, Record,
};

/// Time of the current run. A clock that went backwards yields zero rather than negative time.
pub fn running_elapsed(snapshot: &TimerSnapshot, now: i64) -> i64 {
    match (snapshot.is_running, snapshot.start_timestamp) {
        (true, Some(start)) => now.saturating_sub(start).max(0),
        _ => 0,
    }
}

pub fn displayed_time(snapshot: &TimerSnapshot, now: i64) -> i64 {
    snapshot
        .accumulated_time
        .saturating_add(running_elapsed(snapshot, now))
}

pub fn start_at(snapshot: &TimerSnapshot, now: i64) -> TimerSnapshot {
    TimerSnapshot {
        start_timestamp: Some(now),
        is_running: true,
        ..snapshot.clone()
    }
}

/// Moves the running interval into `accumulated_time`. A stopped snapshot never keeps a start
/// timestamp.
pub fn fold_on_stop(snapshot: &TimerSnapshot, now: i64) -> TimerSnapshot {
    TimerSnapshot {
        accumulated_time: displayed_time(snapshot, now),
        start_timestamp: None,
        is_running: false,
        ..snapshot.clone()
    }
}

/// Banks the running interval and starts a fresh one at `now`. Shown time doesn't change.
pub fn rebase(snapshot: &TimerSnapshot, now: i64) -> TimerSnapshot {
    if !snapshot.is_running {
        return snapshot.clone();
    }
    start_at(&fold_on_stop(snapshot, now), now)
}

pub fn next_lap(laps: &[Lap], displayed: i64) -> Lap {
    let previous = laps.last().map(|lap| lap.cumulative_time).unwrap_or(0);
    Lap {
        sequence_number: laps.len() as u32 + 1,
        cumulative_time: displayed,
        split_time: displayed - previous,
    }
}

/// Repairs snapshots that break the running invariant. A running snapshot without a start can't
/// be timed, so it is treated as stopped.
pub fn normalized(snapshot: TimerSnapshot) -> TimerSnapshot {
    if snapshot.is_running && snapshot.start_timestamp.is_none() {
        tracing::warn!("Running timer without a start timestamp, treating it as stopped");
        return TimerSnapshot {
            is_running: false,
            ..snapshot
        };
    }
    if !snapshot.is_running && snapshot.start_timestamp.is_some() {
        return TimerSnapshot {
            start_timestamp: None,
            ..snapshot
        };
    }
    snapshot
}

/// Fields written when the run state changes.
pub fn run_state_fields(snapshot: &TimerSnapshot) -> Record {
    fields(json!({
        "startTimestamp": snapshot.start_timestamp,
        "accumulatedTime": snapshot.accumulated_time,
        "isRunning": snapshot.is_running,
    }))
}

pub fn lap_fields(laps: &[Lap]) -> Record {
    fields(json!({ "laps": laps }))
}

/// Fields of a zeroed timer. `clear_task` also drops the active task.
pub fn reset_fields(clear_task: bool) -> Record {
    let mut record = fields(json!({
        "accumulatedTime": 0,
        "startTimestamp": null,
        "isRunning": false,
        "laps": [],
    }));
    if clear_task {
        record.insert("activeTaskId".into(), serde_json::Value::Null);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopped(accumulated: i64) -> TimerSnapshot {
        TimerSnapshot {
            accumulated_time: accumulated,
            ..Default::default()
        }
    }

    #[test]
    fn test_fold_sums_running_intervals() {
        let timer = stopped(0);
        let timer = start_at(&timer, 0);
        let timer = fold_on_stop(&timer, 1000);
        assert_eq!(timer.accumulated_time, 1000);
        let timer = start_at(&timer, 2000);
        assert_eq!(displayed_time(&timer, 2200), 1200);
        let timer = fold_on_stop(&timer, 2500);
        assert_eq!(timer.accumulated_time, 1500);
        assert_eq!(timer.start_timestamp, None);
        assert!(!timer.is_running);
    }

    #[test]
    fn test_many_short_cycles_fold_to_the_same_total() {
        let mut timer = stopped(0);
        let mut now = 0;
        for _ in 0..100 {
            timer = start_at(&timer, now);
            now += 37;
            timer = fold_on_stop(&timer, now);
            now += 1000;
        }
        assert_eq!(timer.accumulated_time, 3700);
    }

    #[test]
    fn test_displayed_time_while_stopped_ignores_clock() {
        let timer = stopped(4200);
        assert_eq!(displayed_time(&timer, 0), 4200);
        assert_eq!(displayed_time(&timer, i64::MAX), 4200);
    }

    #[test]
    fn test_clock_going_backwards_never_subtracts() {
        let timer = start_at(&stopped(500), 10_000);
        assert_eq!(displayed_time(&timer, 9_000), 500);
    }

    #[test]
    fn test_lap_splits() {
        let mut laps = vec![];
        for cumulative in [1200, 3000, 3100] {
            let lap = next_lap(&laps, cumulative);
            laps.push(lap);
        }
        let splits = laps.iter().map(|l| l.split_time).collect::<Vec<_>>();
        let numbers = laps.iter().map(|l| l.sequence_number).collect::<Vec<_>>();
        assert_eq!(splits, vec![1200, 1800, 100]);
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_rebase_keeps_displayed_time() {
        let timer = start_at(&stopped(100), 1000);
        let rebased = rebase(&timer, 1600);
        assert_eq!(rebased.accumulated_time, 700);
        assert_eq!(rebased.start_timestamp, Some(1600));
        assert_eq!(displayed_time(&rebased, 2000), displayed_time(&timer, 2000));
    }

    #[test]
    fn test_normalized_repairs_invariant() {
        let broken = TimerSnapshot {
            is_running: true,
            accumulated_time: 10,
            ..Default::default()
        };
        let repaired = normalized(broken);
        assert!(!repaired.is_running);
        assert_eq!(displayed_time(&repaired, 1_000_000), 10);

        let stale_start = TimerSnapshot {
            start_timestamp: Some(5),
            ..Default::default()
        };
        assert_eq!(normalized(stale_start).start_timestamp, None);
    }

    #[test]
    fn test_reset_fields() {
        assert!(!reset_fields(false).contains_key("activeTaskId"));
        assert!(reset_fields(true)["activeTaskId"].is_null());
        assert_eq!(run_state_fields(&stopped(5))["accumulatedTime"], 5);
    }
}
