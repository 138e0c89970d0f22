//! Tokio-backed timer service: one spawned sleep per armed timer, posting
//! `TimerFired` to the control loop. Cancel aborts the sleep.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

use vwall_core::reconnect::{TimerKey, TimerService};
use vwall_core::ControlEvent;

pub struct TokioTimers {
    events: UnboundedSender<ControlEvent>,
    running: HashMap<TimerKey, JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new(events: UnboundedSender<ControlEvent>) -> Self {
        Self {
            events,
            running: HashMap::new(),
        }
    }

    /// Timers started and neither fired nor cancelled.
    pub fn active(&self) -> usize {
        self.running.values().filter(|h| !h.is_finished()).count()
    }
}

impl TimerService for TokioTimers {
    fn start(&mut self, key: TimerKey, after: Duration) {
        self.running.retain(|_, handle| !handle.is_finished());

        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(ControlEvent::TimerFired(key));
        });
        debug!(
            "timers: {:?} #{} for channel {} in {:?}",
            key.kind, key.ticket, key.channel, after
        );
        if let Some(previous) = self.running.insert(key, handle) {
            previous.abort();
        }
    }

    fn cancel(&mut self, key: &TimerKey) {
        if let Some(handle) = self.running.remove(key) {
            handle.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, handle) in self.running.drain() {
            handle.abort();
        }
    }
}
