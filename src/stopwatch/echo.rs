use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;

#[derive(Debug, Default)]
struct LatchState {
    pending: usize,
    deadline: Option<Instant>,
}

/// "Recently wrote, ignore the next echo". Every write of ours arms the latch once; the next
/// notification arriving inside the window is taken to be that write coming back to us.
#[derive(Debug)]
pub struct EchoLatch {
    window: Duration,
    state: Mutex<LatchState>,
}

impl EchoLatch {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(LatchState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn arm(&self, now: Instant) {
        let mut state = self.state();
        state.pending += 1;
        state.deadline = Some(now + self.window);
    }

    /// The write never happened, so there is no echo to wait for.
    pub fn disarm(&self) {
        let mut state = self.state();
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            state.deadline = None;
        }
    }

    /// Consumes one pending echo if the notification arrived in time.
    pub fn is_echo(&self, now: Instant) -> bool {
        let mut state = self.state();
        match state.deadline {
            Some(deadline) if now <= deadline && state.pending > 0 => {
                state.pending -= 1;
                true
            }
            Some(_) => {
                *state = LatchState::default();
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_swallows_one_echo_per_write() {
        let latch = EchoLatch::new(Duration::from_millis(100));
        let now = Instant::now();
        assert!(!latch.is_echo(now));

        latch.arm(now);
        latch.arm(now);
        assert!(latch.is_echo(now + Duration::from_millis(10)));
        assert!(latch.is_echo(now + Duration::from_millis(20)));
        assert!(!latch.is_echo(now + Duration::from_millis(30)));
    }

    #[test]
    fn test_latch_expires() {
        let latch = EchoLatch::new(Duration::from_millis(100));
        let now = Instant::now();
        latch.arm(now);
        assert!(!latch.is_echo(now + Duration::from_millis(150)));
        // Expiry clears everything that was pending.
        assert!(!latch.is_echo(now + Duration::from_millis(151)));
    }

    #[test]
    fn test_disarm_after_failed_write() {
        let latch = EchoLatch::new(Duration::from_millis(100));
        let now = Instant::now();
        latch.arm(now);
        latch.disarm();
        assert!(!latch.is_echo(now));
    }
}
