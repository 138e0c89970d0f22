//! In-memory media backend.
//!
//! `SimFactory` builds graphs that never touch a media framework. In `Auto`
//! mode a graph walks the state ladder one rung per request and reports each
//! rung through its sink, the way a real pipeline does; in `Manual` mode it
//! only records requests and the caller injects events. Every build and
//! command lands in a shared [`SimLedger`] for inspection.
//!
//! [`ManualTimers`] is a virtual-clock [`TimerService`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::graph::{
    BuildRequest, GraphError, GraphFactory, GraphRole, GraphState, MediaGraph, SurfaceHandle,
};
use crate::reconnect::{TimerKey, TimerService};
use crate::router::{GraphEventKind, GraphSink, GraphSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub channel: usize,
    pub role: GraphRole,
    pub generation: u64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOp {
    SetState(GraphState),
    BindSurface(SurfaceHandle),
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    pub channel: usize,
    pub source: GraphSource,
    pub op: SimOp,
}

#[derive(Debug, Default)]
struct LedgerInner {
    builds: Vec<BuildRecord>,
    failed_builds: Vec<BuildRecord>,
    commands: Vec<CommandRecord>,
    /// Outcomes for upcoming live builds; empty means success.
    live_build_script: VecDeque<bool>,
    refuse_live_playing: bool,
    duration: Option<Duration>,
    position: Option<Duration>,
}

/// Shared record of what the simulated backend was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SimLedger(Arc<Mutex<LedgerInner>>);

impl SimLedger {
    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        // A panic while holding the lock only happens in a failing test.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn builds(&self) -> Vec<BuildRecord> {
        self.lock().builds.clone()
    }

    pub fn failed_builds(&self) -> Vec<BuildRecord> {
        self.lock().failed_builds.clone()
    }

    pub fn commands(&self) -> Vec<CommandRecord> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    /// Commands issued to one graph of one channel, in order.
    pub fn ops(&self, channel: usize, role: GraphRole) -> Vec<SimOp> {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.channel == channel && c.source.role == role)
            .map(|c| c.op)
            .collect()
    }

    /// Last generation built for a channel's live graph.
    pub fn live_generation(&self, channel: usize) -> Option<u64> {
        self.lock()
            .builds
            .iter()
            .rev()
            .find(|b| b.channel == channel && b.role == GraphRole::Live)
            .map(|b| b.generation)
    }

    /// Make the next `n` live builds fail.
    pub fn fail_next_live_builds(&self, n: usize) {
        let mut inner = self.lock();
        inner.live_build_script.extend(std::iter::repeat(false).take(n));
    }

    /// Live graphs refuse the transition to PLAYING synchronously.
    pub fn refuse_live_playing(&self, refuse: bool) {
        self.lock().refuse_live_playing = refuse;
    }

    pub fn set_timeline(&self, duration: Option<Duration>, position: Option<Duration>) {
        let mut inner = self.lock();
        inner.duration = duration;
        inner.position = position;
    }
}

pub struct SimGraph {
    sink: GraphSink,
    ledger: SimLedger,
    mode: SimMode,
    state: GraphState,
}

impl SimGraph {
    fn record(&self, op: SimOp) {
        self.ledger.lock().commands.push(CommandRecord {
            channel: self.sink.channel(),
            source: self.sink.source(),
            op,
        });
    }
}

impl MediaGraph for SimGraph {
    fn set_state(&mut self, target: GraphState) -> Result<(), GraphError> {
        let role = self.sink.source().role;
        if role == GraphRole::Live
            && target == GraphState::Playing
            && self.ledger.lock().refuse_live_playing
        {
            return Err(GraphError::StateChange {
                role,
                target,
                reason: "simulated refusal".into(),
            });
        }
        self.record(SimOp::SetState(target));

        if self.mode == SimMode::Auto {
            while let Some(next) = self.state.step_towards(target) {
                let old = self.state;
                self.state = next;
                self.sink.emit(GraphEventKind::StateChanged { old, new: next });
            }
        }
        Ok(())
    }

    fn query_duration(&self) -> Option<Duration> {
        self.ledger.lock().duration
    }

    fn query_position(&self) -> Option<Duration> {
        self.ledger.lock().position
    }

    fn bind_surface(&mut self, handle: SurfaceHandle) {
        self.record(SimOp::BindSurface(handle));
    }

    fn release(&mut self) {
        self.record(SimOp::Release);
    }
}

pub struct SimFactory {
    ledger: SimLedger,
    mode: SimMode,
}

impl SimFactory {
    pub fn new(mode: SimMode) -> Self {
        Self {
            ledger: SimLedger::default(),
            mode,
        }
    }

    pub fn ledger(&self) -> SimLedger {
        self.ledger.clone()
    }
}

impl GraphFactory for SimFactory {
    type Graph = SimGraph;

    fn build(&mut self, request: BuildRequest<'_>) -> Result<SimGraph, GraphError> {
        let record = BuildRecord {
            channel: request.channel,
            role: request.role,
            generation: request.sink.source().generation,
            description: request.description.to_string(),
        };

        let succeed = {
            let mut inner = self.ledger.lock();
            let ok = match request.role {
                GraphRole::Live => inner.live_build_script.pop_front().unwrap_or(true),
                GraphRole::Fallback => true,
            };
            if ok {
                inner.builds.push(record);
            } else {
                inner.failed_builds.push(record);
            }
            ok
        };
        if !succeed {
            return Err(GraphError::Build {
                role: request.role,
                reason: "simulated build failure".into(),
            });
        }

        Ok(SimGraph {
            sink: request.sink,
            ledger: self.ledger.clone(),
            mode: self.mode,
            state: GraphState::Null,
        })
    }
}

/// Virtual-clock timer service. Nothing fires until [`ManualTimers::advance`].
#[derive(Debug, Default)]
pub struct ManualTimers {
    now: Duration,
    pending: Vec<(Duration, TimerKey)>,
    started: Vec<(TimerKey, Duration)>,
}

impl ManualTimers {
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Every `start` call so far, with its delay.
    pub fn started(&self) -> &[(TimerKey, Duration)] {
        &self.started
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &TimerKey> {
        self.pending.iter().map(|(_, key)| key)
    }

    /// Move the clock forward and return the timers that came due, in
    /// deadline order.
    pub fn advance(&mut self, by: Duration) -> Vec<TimerKey> {
        self.now += by;
        let now = self.now;
        let mut due: Vec<(Duration, TimerKey)> = Vec::new();
        self.pending.retain(|&(deadline, key)| {
            if deadline <= now {
                due.push((deadline, key));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(deadline, _)| *deadline);
        due.into_iter().map(|(_, key)| key).collect()
    }
}

impl TimerService for ManualTimers {
    fn start(&mut self, key: TimerKey, after: Duration) {
        self.pending.push((self.now + after, key));
        self.started.push((key, after));
    }

    fn cancel(&mut self, key: &TimerKey) {
        self.pending.retain(|(_, k)| k != key);
    }
}
