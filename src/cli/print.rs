use std::collections::{BTreeMap, HashMap};

use ansi_term::{Colour, Style};
use anyhow::Result;
use chrono::{Days, Local, NaiveDate};

use crate::{
    rollover::RolloverOutcome,
    store::entities::{Lap, Session, Task},
    tracker::goal::GoalProgress,
    utils::{
        percentage::progress_percentage,
        time::{format_duration, format_elapsed},
    },
};

use super::app::App;

/// One line summary of the stopwatch, also used by `watch`.
pub fn status_line(shown: i64, running: bool, task: Option<&Task>) -> String {
    let state = if running {
        Colour::Green.paint("running")
    } else {
        Colour::Yellow.paint("stopped")
    };
    let task = task
        .map(|task| {
            format!(
                "  {} {}/{}",
                task.name,
                format_duration(task.total_time_spent_ms),
                format_duration(task.target_time_ms)
            )
        })
        .unwrap_or_default();
    format!(
        "{}  {state}{task}",
        Style::new().bold().paint(format_elapsed(shown))
    )
}

pub async fn print_stopwatch(app: &App) -> Result<()> {
    let snapshot = app.stopwatch.snapshot().await;
    let task = match &snapshot.active_task_id {
        Some(id) => app.tasks.get(id).await.ok(),
        None => None,
    };
    println!(
        "{}",
        status_line(
            app.stopwatch.displayed().await,
            snapshot.is_running,
            task.as_ref()
        )
    );
    Ok(())
}

pub fn print_lap(lap: &Lap) {
    println!(
        "Lap {}\t{}\t+{}",
        lap.sequence_number,
        format_elapsed(lap.cumulative_time),
        format_elapsed(lap.split_time)
    );
}

pub fn print_saved_session(session: &Session) {
    println!(
        "Saved {} as session {}",
        format_elapsed(session.time),
        short_id(&session.id)
    );
}

pub async fn print_status(app: &App) -> Result<()> {
    print_stopwatch(app).await?;
    for lap in app.stopwatch.snapshot().await.laps {
        print_lap(&lap);
    }

    let today = app.clock.today();
    let today_ms = app.sessions.total_for(today).await?;
    println!("Today\t{}", format_duration(today_ms));
    if let Some(progress) = app.goals.progress(&app.sessions, today).await? {
        print_goal_progress(&progress);
    }
    Ok(())
}

pub fn print_rollover(outcome: &RolloverOutcome) {
    if outcome.is_noop() {
        println!("Already rolled over today");
        return;
    }
    if let Some(session) = &outcome.archived {
        print_saved_session(session);
    }
    if outcome.timer_reset {
        println!("Stopwatch zeroed");
    }
    println!("{} tasks reset", outcome.tasks_reset);
}

pub fn print_tasks(tasks: &[Task], active: Option<&str>) {
    if tasks.is_empty() {
        println!("No tasks yet");
        return;
    }
    for task in tasks {
        let marker = if Some(task.id.as_str()) == active {
            "*"
        } else {
            " "
        };
        let state = if task.is_completed {
            Colour::Green.paint("done")
        } else if task.goal_met() {
            Colour::Cyan.paint("met")
        } else {
            Style::new().paint("")
        };
        println!(
            "{marker} {}\t{}/{}\t{}\t{state}",
            task.name,
            format_duration(task.total_time_spent_ms),
            format_duration(task.target_time_ms),
            progress_percentage(task.total_time_spent_ms, task.target_time_ms),
        );
    }
}

pub fn print_sessions(sessions: &[Session], tasks: &[Task]) {
    if sessions.is_empty() {
        println!("No sessions yet");
        return;
    }
    let names = tasks
        .iter()
        .map(|task| (task.id.as_str(), task.name.as_str()))
        .collect::<HashMap<_, _>>();
    for session in sessions {
        let task = session
            .task_id
            .as_deref()
            .and_then(|id| names.get(id).copied())
            .unwrap_or("-");
        println!(
            "{}\t{}\t{}\t{} laps\t{}\t{}",
            short_id(&session.id),
            session.date.with_timezone(&Local).format("%x %H:%M"),
            format_elapsed(session.time),
            session.laps.len(),
            task,
            session.name.as_deref().unwrap_or("")
        );
    }
}

/// Daily totals of the last `days` days, oldest first, with a bar scaled to the busiest day.
pub fn print_days(totals: &BTreeMap<NaiveDate, i64>, today: NaiveDate, days: u64) {
    const BAR_WIDTH: i64 = 30;
    let start = today
        .checked_sub_days(Days::new(days.saturating_sub(1)))
        .unwrap_or(today);
    let busiest = totals
        .range(start..=today)
        .map(|(_, ms)| *ms)
        .max()
        .unwrap_or(0);
    for day in start.iter_days().take_while(|day| *day <= today) {
        let total = totals.get(&day).copied().unwrap_or(0);
        let width = if busiest > 0 {
            (total * BAR_WIDTH / busiest) as usize
        } else {
            0
        };
        println!(
            "{}\t{}\t{}",
            day.format("%a %Y-%m-%d"),
            Colour::Green.paint("#".repeat(width)),
            format_duration(total)
        );
    }
}

pub fn print_goal_progress(progress: &GoalProgress) {
    let paint = |met: bool| if met { Colour::Green } else { Colour::Yellow };
    let today_met = progress.today_ms >= progress.goal.target_ms;
    let week_met = progress.week_ms >= progress.goal.weekly_target_ms();
    println!(
        "Goal\t{}/{}\t{}",
        format_duration(progress.today_ms),
        format_duration(progress.goal.target_ms),
        paint(today_met).paint(progress.today.to_string())
    );
    println!(
        "Week\t{}/{}\t{}",
        format_duration(progress.week_ms),
        format_duration(progress.goal.weekly_target_ms()),
        paint(week_met).paint(progress.week.to_string())
    );
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
