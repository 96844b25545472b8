//! Timers as explicit state machines.
//!
//! The reference design for this kind of client is a pile of callbacks:
//! a poll `setInterval`, a debounce timer per edit stream, a
//! visibility-change hook. Here each of those is a small state machine
//! driven by explicit `Instant`s, so tests simulate timer firing by
//! passing fabricated nows instead of sleeping:
//!
//! ```text
//! join / foreground ──► kick ─┐
//!                             ▼
//!            ┌──────── SyncSchedule::tick(now, last_write)
//!            │                │
//!        Tick::Wait      interval due?
//!            │                │
//!            │        within suppress window? ──► Tick::Suppressed
//!            │                │
//!            └──────────── Tick::Poll
//! ```
//!
//! Self-write suppression is a heuristic, not a correctness guarantee:
//! it keeps a client from immediately pulling back its own just-pushed
//! write, but the merge algorithm must stay correct without it.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Fixed cadence of the two polling loops.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Window after a local push/delete during which the poll body is
/// skipped.
pub const WRITE_SUPPRESS_WINDOW: Duration = Duration::from_millis(2500);

/// Debounce for brand-new files — short, to get them visible to other
/// members quickly.
pub const NEW_FILE_DEBOUNCE: Duration = Duration::from_millis(600);

/// Debounce for in-place edits — long enough to not push every
/// keystroke.
pub const EDIT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Foreground/background transitions of the hosting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityEvent {
    /// The client regained foreground — poll immediately, the process
    /// may have been suspended for a long time.
    Foreground,
    Background,
}

/// Outcome of one schedule tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Run the poll body now.
    Poll,
    /// The interval elapsed but a recent local write suppresses this
    /// tick; try again next interval.
    Suppressed,
    /// Not due yet.
    Wait,
}

/// Poll-loop state machine: fixed interval, immediate kick on project
/// join and on foreground visibility, self-write suppression.
#[derive(Debug)]
pub struct SyncSchedule {
    interval: Duration,
    suppress_window: Duration,
    last_poll: Option<Instant>,
    kick_pending: bool,
}

impl SyncSchedule {
    pub fn new() -> Self {
        Self::with_intervals(POLL_INTERVAL, WRITE_SUPPRESS_WINDOW)
    }

    /// Create with custom intervals (for testing).
    pub fn with_intervals(interval: Duration, suppress_window: Duration) -> Self {
        Self {
            interval,
            suppress_window,
            last_poll: None,
            kick_pending: true, // first tick polls immediately
        }
    }

    /// Request an immediate poll on the next tick.
    pub fn kick(&mut self) {
        self.kick_pending = true;
    }

    /// Record that a poll body ran outside the tick path (e.g. the
    /// project-join load), so the next interval starts from `now`.
    pub fn mark_polled(&mut self, now: Instant) {
        self.kick_pending = false;
        self.last_poll = Some(now);
    }

    pub fn handle_visibility(&mut self, event: VisibilityEvent) {
        if event == VisibilityEvent::Foreground {
            self.kick();
        }
    }

    /// Advance the state machine.
    ///
    /// `last_local_write` is the engine's own most recent push/delete;
    /// a tick landing inside the suppress window skips its body. A
    /// pending kick survives suppression and fires once the window
    /// passes.
    pub fn tick(&mut self, now: Instant, last_local_write: Option<Instant>) -> Tick {
        let due = self.kick_pending
            || self
                .last_poll
                .map_or(true, |t| now.saturating_duration_since(t) >= self.interval);
        if !due {
            return Tick::Wait;
        }

        let suppressed = last_local_write
            .map_or(false, |t| now.saturating_duration_since(t) < self.suppress_window);
        if suppressed {
            if !self.kick_pending {
                self.last_poll = Some(now);
            }
            return Tick::Suppressed;
        }

        self.kick_pending = false;
        self.last_poll = Some(now);
        Tick::Poll
    }
}

impl Default for SyncSchedule {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-file debounce of content pushes.
///
/// Every edit resets the file's deadline; the push fires once the edit
/// stream pauses. Brand-new files use the short delay so they become
/// visible to other members quickly.
#[derive(Debug)]
pub struct DebounceQueue {
    new_delay: Duration,
    edit_delay: Duration,
    deadlines: HashMap<Uuid, Instant>,
}

impl DebounceQueue {
    pub fn new() -> Self {
        Self::with_delays(NEW_FILE_DEBOUNCE, EDIT_DEBOUNCE)
    }

    /// Create with custom delays (for testing).
    pub fn with_delays(new_delay: Duration, edit_delay: Duration) -> Self {
        Self {
            new_delay,
            edit_delay,
            deadlines: HashMap::new(),
        }
    }

    /// Record an edit to a file, resetting its flush deadline.
    pub fn note(&mut self, file_id: Uuid, is_new: bool, now: Instant) {
        let delay = if is_new { self.new_delay } else { self.edit_delay };
        self.deadlines.insert(file_id, now + delay);
    }

    /// Drain every file whose deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Vec<Uuid> {
        let due: Vec<Uuid> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            self.deadlines.remove(id);
        }
        due
    }

    /// Drain everything regardless of deadline (save-all).
    pub fn take_all(&mut self) -> Vec<Uuid> {
        self.deadlines.drain().map(|(id, _)| id).collect()
    }

    pub fn contains(&self, file_id: Uuid) -> bool {
        self.deadlines.contains_key(&file_id)
    }

    pub fn remove(&mut self, file_id: Uuid) {
        self.deadlines.remove(&file_id);
    }

    pub fn pending(&self) -> usize {
        self.deadlines.len()
    }

    pub fn pending_ids(&self) -> Vec<Uuid> {
        self.deadlines.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

impl Default for DebounceQueue {
    fn default() -> Self {
        Self::new()
    }
}
