use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{store::entities::TimerSnapshot, utils::clock::Clock};

use super::snapshot::displayed_time;

/// Repeating display refresh. Each tick recomputes the shown time from the snapshot and the wall
/// clock, so ticks that were delayed or skipped cost nothing once the next one runs.
pub struct DisplayTicker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DisplayTicker {
    pub fn spawn(
        state: Arc<Mutex<TimerSnapshot>>,
        clock: Arc<dyn Clock>,
        display: watch::Sender<i64>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            debug!("Display refresh started");
            let mut tick_point = clock.instant();
            loop {
                let shown = {
                    let snapshot = state.lock().await;
                    displayed_time(&snapshot, clock.now_ms())
                };
                display.send_replace(shown);

                // A throttled observer doesn't try to catch up on missed ticks.
                tick_point = (tick_point + interval).max(clock.instant());
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = clock.sleep_until(tick_point) => ()
                }
            }
            debug!("Display refresh stopped");
        });
        Self { cancel, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn cancel(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
