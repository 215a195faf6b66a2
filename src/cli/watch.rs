use std::{
    io::{stdout, Write},
    time::Duration,
};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{rollover::DailyRollover, store::entities::Task};

use super::{app::App, print::status_line, shutdown::detect_shutdown};

/// A watcher left running over midnight rolls over on its own.
const ROLLOVER_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Renders the stopwatch on one line until ctrl-c, following changes made from other terminals.
pub async fn watch(app: &App) -> Result<()> {
    let shutdown = CancellationToken::new();

    let (_, _, synced, rendered, _) = tokio::join!(
        detect_shutdown(shutdown.clone()),
        app.store
            .clone()
            .watch_external(app.config.poll_interval(), shutdown.clone()),
        app.stopwatch.clone().run_sync(shutdown.clone()),
        render(app, shutdown.clone()),
        roll_over_periodically(&app.rollover, shutdown.clone()),
    );
    println!();
    synced.and(rendered)
}

async fn render(app: &App, shutdown: CancellationToken) -> Result<()> {
    let result = render_until(app, &shutdown).await;
    // Nothing else can stop without the renderer.
    if result.is_err() {
        shutdown.cancel();
    }
    result
}

async fn render_until(app: &App, shutdown: &CancellationToken) -> Result<()> {
    let mut display = app.stopwatch.watch_display();
    let mut selected: Option<String> = None;
    let mut task: Option<Task> = None;
    loop {
        let shown = *display.borrow_and_update();
        let snapshot = app.stopwatch.snapshot().await;
        // Looked up again only when the selection changes.
        if snapshot.active_task_id != selected {
            selected = snapshot.active_task_id.clone();
            task = match &selected {
                Some(id) => app.tasks.get(id).await.ok(),
                None => None,
            };
        }
        {
            let mut out = stdout().lock();
            write!(
                out,
                "\r{}\x1b[K",
                status_line(shown, snapshot.is_running, task.as_ref())
            )?;
            out.flush()?;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            changed = display.changed() => changed?,
        }
    }
}

async fn roll_over_periodically(rollover: &DailyRollover, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(ROLLOVER_CHECK_INTERVAL) => (),
        }
        let outcome = rollover.run().await;
        if let Some(session) = outcome.archived {
            info!(
                "Rolled over while watching, saved {}ms as session {}",
                session.time, session.id
            );
        }
    }
}
