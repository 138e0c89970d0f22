use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Rebuild the live graph.
    Reconnect,
    /// Resume the fallback loop after its end-of-stream pause.
    LoopRestart,
}

/// Identifies one armed timer. The ticket distinguishes successive arms of
/// the same timer so a late firing of a cancelled one is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub channel: usize,
    pub kind: TimerKind,
    pub ticket: u64,
}

/// Single-shot, cancellable timers. Firing is reported back to the control
/// loop as `ControlEvent::TimerFired(key)`; nothing repeats implicitly.
pub trait TimerService {
    fn start(&mut self, key: TimerKey, after: Duration);

    fn cancel(&mut self, key: &TimerKey);
}

/// At most one outstanding timer of one kind for one channel.
#[derive(Debug)]
pub struct OneShot {
    channel: usize,
    kind: TimerKind,
    pending: Option<u64>,
    next_ticket: u64,
}

impl OneShot {
    pub fn new(channel: usize, kind: TimerKind) -> Self {
        Self {
            channel,
            kind,
            pending: None,
            next_ticket: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn key(&self, ticket: u64) -> TimerKey {
        TimerKey {
            channel: self.channel,
            kind: self.kind,
            ticket,
        }
    }

    /// Arm unless already pending. Returns whether a timer was started.
    pub fn arm<T: TimerService>(&mut self, timers: &mut T, after: Duration) -> bool {
        if self.pending.is_some() {
            debug!(channel = self.channel, kind = ?self.kind, "timer already pending, not re-arming");
            return false;
        }
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending = Some(ticket);
        timers.start(self.key(ticket), after);
        true
    }

    /// Accept a fired timer. Clears the pending slot only if `key` is the
    /// currently armed ticket; stale or foreign keys are rejected.
    pub fn accept(&mut self, key: &TimerKey) -> bool {
        if key.channel != self.channel || key.kind != self.kind || self.pending != Some(key.ticket) {
            return false;
        }
        self.pending = None;
        true
    }

    pub fn cancel<T: TimerService>(&mut self, timers: &mut T) {
        if let Some(ticket) = self.pending.take() {
            timers.cancel(&self.key(ticket));
        }
    }
}

/// Schedules live-graph rebuilds after a failure, at a fixed delay,
/// indefinitely. The upstream source is expected to come back.
#[derive(Debug)]
pub struct ReconnectScheduler {
    timer: OneShot,
    delay: Duration,
    attempts: u32,
}

impl ReconnectScheduler {
    pub fn new(channel: usize, delay: Duration) -> Self {
        Self {
            timer: OneShot::new(channel, TimerKind::Reconnect),
            delay,
            attempts: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    /// Attempts made since the live graph last reached PLAYING.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Arm with the standard delay. No-op while a reconnect is pending.
    pub fn arm<T: TimerService>(&mut self, timers: &mut T) -> bool {
        self.timer.arm(timers, self.delay)
    }

    /// Arm with a one-off delay (first connect after startup).
    pub fn arm_after<T: TimerService>(&mut self, timers: &mut T, after: Duration) -> bool {
        self.timer.arm(timers, after)
    }

    /// Accept a fired timer; counts as one attempt.
    pub fn accept(&mut self, key: &TimerKey) -> bool {
        let accepted = self.timer.accept(key);
        if accepted {
            self.attempts = self.attempts.saturating_add(1);
        }
        accepted
    }

    pub fn cancel<T: TimerService>(&mut self, timers: &mut T) {
        self.timer.cancel(timers);
    }

    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }
}
