use std::cell::Cell;
use std::time::Instant;

/// The two timers an endpoint may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    /// Retransmission of the oldest unacknowledged control or data segment.
    Retransmit,
    /// Post-close wait before the connection is released.
    Linger,
}

impl TimerId {
    pub const ALL: [TimerId; 2] = [TimerId::Retransmit, TimerId::Linger];

    fn slot(self) -> usize {
        match self {
            TimerId::Retransmit => 0,
            TimerId::Linger => 1,
        }
    }
}

/// A timer request issued by a protocol during one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOp {
    Start { delay_ms: u64, timer: TimerId },
    Cancel(TimerId),
}

/// Deadlines (milliseconds on some [`Clock`]) for each [`TimerId`].
///
/// A timer is either disarmed or holds exactly one deadline; arming an armed
/// timer moves its deadline.
#[derive(Debug, Default, Clone)]
pub struct Timers {
    deadlines: [Option<u64>; 2],
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, timer: TimerId, now: u64, delay_ms: u64) {
        self.deadlines[timer.slot()] = Some(now.saturating_add(delay_ms));
    }

    pub fn cancel(&mut self, timer: TimerId) {
        self.deadlines[timer.slot()] = None;
    }

    pub fn apply(&mut self, op: TimerOp, now: u64) {
        match op {
            TimerOp::Start { delay_ms, timer } => self.arm(timer, now, delay_ms),
            TimerOp::Cancel(timer) => self.cancel(timer),
        }
    }

    pub fn is_armed(&self, timer: TimerId) -> bool {
        self.deadlines[timer.slot()].is_some()
    }

    pub fn deadline(&self, timer: TimerId) -> Option<u64> {
        self.deadlines[timer.slot()]
    }

    /// Earliest pending deadline across all timers.
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.iter().flatten().copied().min()
    }

    /// Disarm and return every timer whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_expired(&mut self, now: u64) -> Vec<TimerId> {
        let mut expired: Vec<(u64, TimerId)> = TimerId::ALL
            .iter()
            .filter_map(|&id| match self.deadlines[id.slot()] {
                Some(deadline) if deadline <= now => Some((deadline, id)),
                _ => None,
            })
            .collect();
        expired.sort();
        for (_, id) in &expired {
            self.cancel(*id);
        }
        expired.into_iter().map(|(_, id)| id).collect()
    }
}

/// Source of monotonic milliseconds.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Monotonic clock counting from its construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A clock you advance by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}
