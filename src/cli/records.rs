use anyhow::Result;
use clap::Subcommand;

use crate::utils::time::{format_duration, parse_duration_ms};

use super::{app::App, print};

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    #[command(about = "Create a task with a target time such as 90m or 1h30m")]
    Add { name: String, target: String },
    #[command(about = "List tasks, the selected one is marked with *")]
    List,
    Rename {
        #[arg(help = "Task name or id")]
        task: String,
        name: String,
    },
    #[command(about = "Change the target time of a task")]
    Target {
        #[arg(help = "Task name or id")]
        task: String,
        target: String,
    },
    #[command(about = "Mark a task as completed")]
    Done {
        #[arg(help = "Task name or id")]
        task: String,
    },
    #[command(about = "Mark a task as not completed")]
    Undo {
        #[arg(help = "Task name or id")]
        task: String,
    },
    #[command(about = "Delete a task")]
    Rm {
        #[arg(help = "Task name or id")]
        task: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    #[command(about = "List sessions, newest first")]
    List {
        #[arg(long, short = 'n', help = "Show at most this many sessions")]
        limit: Option<usize>,
    },
    #[command(about = "Rename a session. Without a name the name is removed")]
    Rename {
        #[arg(help = "Session id or its prefix")]
        session: String,
        name: Option<String>,
    },
    #[command(about = "Delete a session")]
    Rm {
        #[arg(help = "Session id or its prefix")]
        session: String,
    },
    #[command(about = "Total time per day")]
    Days {
        #[arg(long, short, default_value_t = 14, help = "Number of days ending today")]
        days: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum GoalCommand {
    #[command(about = "Set the daily goal, e.g. 2h")]
    Set { target: String },
    #[command(about = "Show progress against the daily and weekly goal")]
    Show,
}

pub async fn process_task_command(app: &App, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::Add { name, target } => {
            let task = app.tasks.create(&name, parse_duration_ms(&target)?).await?;
            println!(
                "Created {} with target {}",
                task.name,
                format_duration(task.target_time_ms)
            );
        }
        TaskCommand::List => {
            let active = app.stopwatch.snapshot().await.active_task_id;
            print::print_tasks(&app.tasks.list().await?, active.as_deref());
        }
        TaskCommand::Rename { task, name } => {
            let task = app.tasks.resolve(&task).await?;
            let renamed = app.tasks.rename(&task.id, &name).await?;
            println!("Renamed {} to {}", task.name, renamed.name);
        }
        TaskCommand::Target { task, target } => {
            let task = app.tasks.resolve(&task).await?;
            let task = app
                .tasks
                .set_target(&task.id, parse_duration_ms(&target)?)
                .await?;
            println!(
                "Target of {} is now {}",
                task.name,
                format_duration(task.target_time_ms)
            );
        }
        TaskCommand::Done { task } => {
            let task = app.tasks.resolve(&task).await?;
            app.tasks.set_completed(&task.id, true).await?;
            println!("Completed {}", task.name);
        }
        TaskCommand::Undo { task } => {
            let task = app.tasks.resolve(&task).await?;
            app.tasks.set_completed(&task.id, false).await?;
            println!("Reopened {}", task.name);
        }
        TaskCommand::Rm { task } => {
            let task = app.tasks.resolve(&task).await?;
            let snapshot = app.stopwatch.snapshot().await;
            if snapshot.active_task_id.as_deref() == Some(task.id.as_str()) {
                app.stopwatch.select_task(None).await;
            }
            app.tasks.delete(&task.id).await?;
            println!("Deleted {}", task.name);
        }
    }
    Ok(())
}

pub async fn process_session_command(app: &App, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::List { limit } => {
            let mut sessions = app.sessions.list().await?;
            if let Some(limit) = limit {
                sessions.truncate(limit);
            }
            print::print_sessions(&sessions, &app.tasks.list().await?);
        }
        SessionCommand::Rename { session, name } => {
            let session = app.sessions.resolve(&session).await?;
            app.sessions.rename(&session.id, name).await?;
            println!("Renamed session {}", session.id);
        }
        SessionCommand::Rm { session } => {
            let session = app.sessions.resolve(&session).await?;
            app.sessions.delete(&session.id).await?;
            println!("Deleted session {}", session.id);
        }
        SessionCommand::Days { days } => {
            let totals = app.sessions.daily_totals().await?;
            print::print_days(&totals, app.clock.today(), days.max(1));
        }
    }
    Ok(())
}

pub async fn process_goal_command(app: &App, command: GoalCommand) -> Result<()> {
    match command {
        GoalCommand::Set { target } => {
            let goal = app.goals.set(parse_duration_ms(&target)?).await?;
            println!("Daily goal set to {}", format_duration(goal.target_ms));
        }
        GoalCommand::Show => {
            match app.goals.progress(&app.sessions, app.clock.today()).await? {
                Some(progress) => print::print_goal_progress(&progress),
                None => println!("No daily goal set"),
            }
        }
    }
    Ok(())
}
