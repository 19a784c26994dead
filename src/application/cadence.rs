// Visibility-aware scheduling for polling loops and reconnect backoff
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Whether the consuming view is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Foreground,
    Background,
}

impl Visibility {
    pub fn from_visible(visible: bool) -> Self {
        if visible {
            Visibility::Foreground
        } else {
            Visibility::Background
        }
    }
}

/// Repeat periods for each visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub foreground: Duration,
    pub background: Duration,
}

impl Cadence {
    pub fn period(&self, visibility: Visibility) -> Duration {
        match visibility {
            Visibility::Foreground => self.foreground,
            Visibility::Background => self.background,
        }
    }
}

/// Cancellable repeating timer whose period follows the visibility signal.
///
/// The first tick fires one period after construction. Moving to the
/// background stretches the pending wait; regaining the foreground ticks
/// immediately and restarts the foreground period from there.
#[derive(Debug)]
pub struct AdaptiveTicker {
    cadence: Cadence,
    visibility: watch::Receiver<Visibility>,
    current: Visibility,
    last: Instant,
    detached: bool,
}

impl AdaptiveTicker {
    pub fn new(cadence: Cadence, mut visibility: watch::Receiver<Visibility>) -> Self {
        let current = *visibility.borrow_and_update();
        Self {
            cadence,
            visibility,
            current,
            last: Instant::now(),
            detached: false,
        }
    }

    pub fn visibility(&self) -> Visibility {
        self.current
    }

    pub fn period(&self) -> Duration {
        self.cadence.period(self.current)
    }

    /// Waits for the next tick. Cancel-safe.
    pub async fn tick(&mut self) -> Instant {
        loop {
            let deadline = self.last + self.period();
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    self.last = Instant::now();
                    return self.last;
                }
                changed = self.visibility.changed(), if !self.detached => {
                    if changed.is_err() {
                        // signal source gone; keep the last known period
                        self.detached = true;
                        continue;
                    }
                    let next = *self.visibility.borrow_and_update();
                    let regained = self.current == Visibility::Background && next == Visibility::Foreground;
                    self.current = next;
                    if regained {
                        self.last = Instant::now();
                        return self.last;
                    }
                }
            }
        }
    }
}

/// Linear backoff before reconnect `attempt` (1-based), stretched while backgrounded.
pub fn reconnect_delay(base: Duration, attempt: u32, visibility: Visibility) -> Duration {
    match visibility {
        Visibility::Foreground => base.saturating_mul(attempt),
        Visibility::Background => base.saturating_mul(attempt).saturating_mul(3).min(Duration::from_secs(30)),
    }
}
