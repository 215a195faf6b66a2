pub mod app;
pub mod print;
pub mod records;
pub mod shutdown;
pub mod watch;

use std::path::PathBuf;

use anyhow::Result;
use app::App;
use clap::{Parser, Subcommand};
use records::{process_goal_command, process_session_command, process_task_command};
use records::{GoalCommand, SessionCommand, TaskCommand};
use tracing::level_filters::LevelFilter;

use crate::utils::{
    dir::{create_application_default_path, ensure_dir},
    logging::{enable_logging, CLI_PREFIX, WATCH_PREFIX},
};

#[derive(Parser, Debug)]
#[command(name = "focusclock", version, long_about = None)]
#[command(about = "Stopwatch shared between terminals, with tasks, sessions and a daily goal")]
pub struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        help = "Log level, e.g. debug or trace. Defaults to RUST_LOG or info"
    )]
    log: Option<LevelFilter>,
    #[arg(long, global = true, help = "Also print logs to the console")]
    log_console: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Start the stopwatch")]
    Start,
    #[command(about = "Stop the stopwatch, keeping the time")]
    Stop,
    #[command(about = "Record a lap")]
    Lap,
    #[command(about = "Save the current run as a session and zero the stopwatch")]
    Reset {
        #[arg(long, short, help = "Name of the saved session")]
        name: Option<String>,
    },
    #[command(about = "Show the stopwatch, today's total and goal progress")]
    Status,
    #[command(about = "Follow the stopwatch live until interrupted")]
    Watch,
    #[command(
        about = "Choose the task that accrues time. Without a task the selection is cleared"
    )]
    Select {
        #[arg(help = "Task name or id")]
        task: Option<String>,
    },
    #[command(about = "Run the daily rollover now. Every command already does this first")]
    Rollover,
    #[command(about = "Manage tasks")]
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    #[command(about = "Browse and edit saved sessions")]
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    #[command(about = "Set or show the daily goal")]
    Goal {
        #[command(subcommand)]
        command: GoalCommand,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let dir = match args.dir {
        Some(dir) => ensure_dir(dir)?,
        None => create_application_default_path()?,
    };
    let prefix = match args.commands {
        Commands::Watch => WATCH_PREFIX,
        _ => CLI_PREFIX,
    };
    enable_logging(
        prefix,
        &ensure_dir(dir.join("logs"))?,
        args.log,
        args.log_console,
    )?;

    let app = App::open(dir).await?;
    let result = process_command(&app, args.commands).await;
    app.stopwatch.shutdown().await;
    result
}

async fn process_command(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Start => {
            app.stopwatch.start().await?;
            print::print_stopwatch(app).await
        }
        Commands::Stop => {
            app.stopwatch.stop().await?;
            print::print_stopwatch(app).await
        }
        Commands::Lap => {
            let lap = app.stopwatch.lap().await?;
            print::print_lap(&lap);
            Ok(())
        }
        Commands::Reset { name } => {
            match app.stopwatch.reset(name).await {
                Some(session) => print::print_saved_session(&session),
                None => println!("Nothing to save, stopwatch zeroed"),
            }
            Ok(())
        }
        Commands::Status => print::print_status(app).await,
        Commands::Watch => watch::watch(app).await,
        Commands::Select { task } => {
            let task = match task {
                Some(key) => Some(app.tasks.resolve(&key).await?),
                None => None,
            };
            app.stopwatch
                .select_task(task.as_ref().map(|task| task.id.clone()))
                .await;
            match task {
                Some(task) => println!("Tracking {}", task.name),
                None => println!("No task selected"),
            }
            Ok(())
        }
        Commands::Rollover => {
            let outcome = app.rollover.run().await;
            print::print_rollover(&outcome);
            Ok(())
        }
        Commands::Task { command } => process_task_command(app, command).await,
        Commands::Session { command } => process_session_command(app, command).await,
        Commands::Goal { command } => process_goal_command(app, command).await,
    }
}
