//! Per-channel failover state machine.
//!
//! One channel = one display region with a live graph (network camera) and a
//! fallback graph (local loop). The fallback is built once and only ever
//! paused and resumed; the live graph is rebuilt after every failure.
//!
//! Reactions, all on the control thread:
//!
//! | event                          | reaction                                               |
//! |--------------------------------|--------------------------------------------------------|
//! | live reaches PLAYING           | fallback → PAUSED                                      |
//! | live drops to PAUSED/READY/NULL| fallback → PLAYING                                     |
//! | live end-of-stream             | live READY→NULL, dispose; fallback → PLAYING; reconnect |
//! | live transport error           | same as end-of-stream                                  |
//! | live hardware error            | both → READY; process shutdown                         |
//! | fallback end-of-stream         | fallback → READY, resume after a short pause           |
//!
//! Failure handling disposes the live graph on the spot and bumps its
//! generation, so a cross-fade event still in flight from the same graph is
//! stale when it arrives. Failure paths therefore always win over the
//! healthy cross-fade for the same underlying transition.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::config::{ChannelConfig, ErrorPolicy};
use crate::graph::{
    BuildRequest, ErrorCategory, GraphError, GraphFactory, GraphHandle, GraphRole, GraphState,
    MediaGraph, TrackedState,
};
use crate::pipeline::{self, Description};
use crate::protocol::ChannelStatus;
use crate::reconnect::{OneShot, ReconnectScheduler, TimerKey, TimerKind, TimerService};
use crate::router::{
    ControlEvent, GraphEventKind, GraphFault, GraphSink, GraphSource, SurfaceBinding, SurfaceSlot,
};

/// Collaborators a channel needs while handling an event.
pub struct Ctx<'a, F, T> {
    pub factory: &'a mut F,
    pub timers: &'a mut T,
    pub events: &'a UnboundedSender<ControlEvent>,
    pub policy: &'a ErrorPolicy,
}

/// Why the process should stop.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    CloseRequested,
    HardwareFault {
        channel: String,
        element: String,
        message: String,
    },
    StartupFailure {
        channel: String,
        reason: String,
    },
}

/// Outcome of handling one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Continue,
    Shutdown(ShutdownReason),
}

pub struct Channel<G> {
    index: usize,
    id: String,
    live_description: Description,
    initial_delay: Duration,
    loop_restart_pause: Duration,

    live: Option<GraphHandle<G>>,
    fallback: GraphHandle<G>,
    live_state: TrackedState,
    fallback_state: TrackedState,
    live_generation: u64,

    known_duration: Option<Duration>,
    position: Option<Duration>,

    surface: SurfaceSlot,
    reconnect: ReconnectScheduler,
    loop_restart: OneShot,

    /// Fallback has shown a frame at least once.
    active: bool,
    /// Fatal fault or shutdown; no further transitions.
    halted: bool,
}

impl<G: MediaGraph> Channel<G> {
    /// Create the channel and build its fallback graph. The fallback stays in
    /// NULL until the surface is ready.
    pub fn new<F, T>(
        index: usize,
        config: &ChannelConfig,
        reconnect_delay: Duration,
        loop_restart_pause: Duration,
        ctx: &mut Ctx<'_, F, T>,
    ) -> Result<Self, GraphError>
    where
        F: GraphFactory<Graph = G>,
    {
        let live_description = pipeline::live_description(&config.live);
        let fallback_description = pipeline::fallback_description(&config.fallback);
        let surface = SurfaceSlot::new();

        debug!("{}: fallback = {}", config.id, fallback_description.redacted());
        debug!("{}: live = {}", config.id, live_description.redacted());

        let graph = ctx.factory.build(BuildRequest {
            channel: index,
            channel_id: &config.id,
            role: GraphRole::Fallback,
            description: fallback_description.as_str(),
            sink: GraphSink::new(ctx.events.clone(), index, GraphSource::FALLBACK),
            surface: surface.clone(),
            policy: ctx.policy,
        })?;

        Ok(Self {
            index,
            id: config.id.clone(),
            live_description,
            initial_delay: config.initial_delay(),
            loop_restart_pause,
            live: None,
            fallback: GraphHandle::new(GraphRole::Fallback, graph),
            live_state: TrackedState::Absent,
            fallback_state: TrackedState::Null,
            live_generation: 0,
            known_duration: None,
            position: None,
            surface,
            reconnect: ReconnectScheduler::new(index, reconnect_delay),
            loop_restart: OneShot::new(index, TimerKind::LoopRestart),
            active: false,
            halted: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn live_state(&self) -> TrackedState {
        self.live_state
    }

    pub fn fallback_state(&self) -> TrackedState {
        self.fallback_state
    }

    pub fn has_live_graph(&self) -> bool {
        self.live.is_some()
    }

    /// Generation of the current (or most recent) live graph.
    pub fn live_generation(&self) -> u64 {
        self.live_generation
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_pending()
    }

    pub fn loop_restart_pending(&self) -> bool {
        self.loop_restart.is_pending()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn known_duration(&self) -> Option<Duration> {
        self.known_duration
    }

    /// Last target commanded on the fallback graph.
    pub fn fallback_target(&self) -> Option<GraphState> {
        self.fallback.target()
    }

    /// Neither graph has a frame up; the surface should show a neutral fill.
    pub fn needs_filler(&self) -> bool {
        !self.live_state.is_visible() && !self.fallback_state.is_visible()
    }

    /// A frame is on screen or on its way. Holds for every active channel:
    /// one graph is PAUSED/PLAYING, or the fallback has been commanded to a
    /// visible state and the transition is in flight, or the fallback sits in
    /// its loop-restart pause.
    pub fn frame_guaranteed(&self) -> bool {
        if !self.active || self.halted {
            return true;
        }
        self.live_state.is_visible()
            || self.fallback_state.is_visible()
            || self.fallback.target().is_some_and(|t| t >= GraphState::Paused)
            || self.loop_restart.is_pending()
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            id: self.id.clone(),
            live: self.live_state,
            fallback: self.fallback_state,
            filler: self.needs_filler(),
            blank: !self.frame_guaranteed(),
            reconnect_pending: self.reconnect.is_pending(),
            reconnect_attempts: self.reconnect.attempts(),
            duration_secs: self.known_duration.map(|d| d.as_secs_f64()),
            position_secs: self.position.map(|d| d.as_secs_f64()),
        }
    }

    // ── surface binder ────────────────────────────────────────────────────────

    /// The window for this channel exists. Bind it to both graphs, start the
    /// fallback loop and schedule the first live connect.
    pub fn on_surface_ready<F, T>(&mut self, binding: SurfaceBinding, ctx: &mut Ctx<'_, F, T>) -> Verdict
    where
        F: GraphFactory<Graph = G>,
        T: TimerService,
    {
        if self.halted {
            return Verdict::Continue;
        }
        if !self.surface.bind(binding) {
            debug!("{}: surface already bound, ignoring", self.id);
            return Verdict::Continue;
        }

        if let SurfaceBinding::Native(handle) = binding {
            info!("{}: binding surface {}", self.id, handle);
            if let Err(e) = self.fallback.bind_surface(handle) {
                warn!("{}: fallback surface bind failed: {}", self.id, e);
            }
            if let Some(live) = self.live.as_mut() {
                if let Err(e) = live.bind_surface(handle) {
                    warn!("{}: live surface bind failed: {}", self.id, e);
                }
            }
        } else {
            info!("{}: no external surface, sinks open their own window", self.id);
        }

        if let Err(e) = self.fallback.set_state(GraphState::Playing) {
            error!("{}: unable to start the fallback loop: {}", self.id, e);
            return Verdict::Shutdown(ShutdownReason::StartupFailure {
                channel: self.id.clone(),
                reason: e.to_string(),
            });
        }

        if self.reconnect.arm_after(ctx.timers, self.initial_delay) {
            info!(
                "{}: first live connect in {}s",
                self.id,
                self.initial_delay.as_secs()
            );
        }
        Verdict::Continue
    }

    // ── graph events ──────────────────────────────────────────────────────────

    pub fn on_graph_event<F, T>(
        &mut self,
        source: GraphSource,
        kind: GraphEventKind,
        ctx: &mut Ctx<'_, F, T>,
    ) -> Verdict
    where
        F: GraphFactory<Graph = G>,
        T: TimerService,
    {
        if self.halted {
            return Verdict::Continue;
        }

        match source.role {
            GraphRole::Live => {
                if source.generation != self.live_generation || self.live.is_none() {
                    debug!(
                        "{}: dropping stale live event (gen {}, current {})",
                        self.id, source.generation, self.live_generation
                    );
                    return Verdict::Continue;
                }
                match kind {
                    GraphEventKind::Error(fault) => self.on_live_error(fault, ctx),
                    GraphEventKind::Eos => {
                        info!("{}: live end-of-stream", self.id);
                        self.fail_over(TrackedState::Null, ctx);
                        Verdict::Continue
                    }
                    GraphEventKind::StateChanged { old, new } => {
                        self.on_live_state(old, new);
                        Verdict::Continue
                    }
                }
            }
            GraphRole::Fallback => match kind {
                GraphEventKind::StateChanged { new, .. } => {
                    self.fallback_state = new.into();
                    if self.fallback_state.is_visible() && !self.active {
                        info!("{}: fallback loop on screen", self.id);
                        self.active = true;
                    }
                    Verdict::Continue
                }
                GraphEventKind::Eos => {
                    self.restart_loop(ctx);
                    Verdict::Continue
                }
                GraphEventKind::Error(fault) => {
                    if fault.category == ErrorCategory::Hardware {
                        return self.halt_on_hardware(fault, ctx);
                    }
                    warn!(
                        "{}: fallback error from {}: {}; restarting loop",
                        self.id, fault.element, fault.message
                    );
                    self.restart_loop(ctx);
                    Verdict::Continue
                }
            },
        }
    }

    fn on_live_state(&mut self, old: GraphState, new: GraphState) {
        debug!("{}: live {} -> {}", self.id, old, new);
        self.live_state = new.into();
        match new {
            GraphState::Playing => {
                info!("{}: live feed up, pausing fallback", self.id);
                self.reconnect.reset_attempts();
                self.command_fallback(GraphState::Paused);
            }
            GraphState::Paused | GraphState::Ready | GraphState::Null => {
                self.command_fallback(GraphState::Playing);
            }
        }
    }

    fn on_live_error<F, T>(&mut self, fault: GraphFault, ctx: &mut Ctx<'_, F, T>) -> Verdict
    where
        F: GraphFactory<Graph = G>,
        T: TimerService,
    {
        match fault.category {
            ErrorCategory::Hardware => self.halt_on_hardware(fault, ctx),
            ErrorCategory::Transport | ErrorCategory::Unclassified => {
                warn!(
                    "{}: error received from element {}: {}",
                    self.id, fault.element, fault.message
                );
                debug!(
                    "{}: debugging information: {}",
                    self.id,
                    fault.debug.as_deref().unwrap_or("none")
                );
                self.fail_over(TrackedState::Failed, ctx);
                Verdict::Continue
            }
        }
    }

    /// Live source lost: tear the live graph down, bring the loop back,
    /// schedule a rebuild.
    fn fail_over<F, T>(&mut self, state: TrackedState, ctx: &mut Ctx<'_, F, T>)
    where
        T: TimerService,
    {
        self.teardown_live(state);
        self.command_fallback(GraphState::Playing);
        self.arm_reconnect(ctx.timers);
    }

    fn halt_on_hardware<F, T>(&mut self, fault: GraphFault, ctx: &mut Ctx<'_, F, T>) -> Verdict
    where
        T: TimerService,
    {
        error!(
            "{}: hardware fault in {}: {}; shutting down",
            self.id, fault.element, fault.message
        );
        if let Some(live) = self.live.as_mut() {
            if let Err(e) = live.set_state(GraphState::Ready) {
                warn!("{}: live graph did not accept READY: {}", self.id, e);
            }
        }
        self.command_fallback(GraphState::Ready);
        self.reconnect.cancel(ctx.timers);
        self.loop_restart.cancel(ctx.timers);
        if self.live.is_some() {
            self.live_state = TrackedState::Failed;
        }
        self.halted = true;
        Verdict::Shutdown(ShutdownReason::HardwareFault {
            channel: self.id.clone(),
            element: fault.element,
            message: fault.message,
        })
    }

    fn restart_loop<F, T>(&mut self, ctx: &mut Ctx<'_, F, T>)
    where
        T: TimerService,
    {
        debug!("{}: fallback loop boundary, restarting", self.id);
        self.command_fallback(GraphState::Ready);
        self.loop_restart.arm(ctx.timers, self.loop_restart_pause);
    }

    // ── timers ────────────────────────────────────────────────────────────────

    pub fn on_timer<F, T>(&mut self, key: TimerKey, ctx: &mut Ctx<'_, F, T>) -> Verdict
    where
        F: GraphFactory<Graph = G>,
        T: TimerService,
    {
        if self.halted {
            return Verdict::Continue;
        }
        match key.kind {
            TimerKind::Reconnect => {
                if !self.reconnect.accept(&key) {
                    debug!("{}: ignoring stale reconnect timer", self.id);
                    return Verdict::Continue;
                }
                self.connect_live(ctx);
            }
            TimerKind::LoopRestart => {
                if !self.loop_restart.accept(&key) {
                    debug!("{}: ignoring stale loop-restart timer", self.id);
                    return Verdict::Continue;
                }
                // The live feed may have come up during the pause.
                let target = if self.live_state == TrackedState::Playing {
                    GraphState::Paused
                } else {
                    GraphState::Playing
                };
                self.command_fallback(target);
            }
        }
        Verdict::Continue
    }

    /// Build a fresh live graph and start it. On failure, try again after
    /// the standard delay.
    fn connect_live<F, T>(&mut self, ctx: &mut Ctx<'_, F, T>)
    where
        F: GraphFactory<Graph = G>,
        T: TimerService,
    {
        if self.live.is_some() {
            warn!("{}: live graph still present, skipping rebuild", self.id);
            return;
        }

        let generation = self.live_generation + 1;
        info!(
            "{}: connecting live source (attempt {}): {}",
            self.id,
            self.reconnect.attempts(),
            self.live_description.redacted()
        );

        let built = ctx.factory.build(BuildRequest {
            channel: self.index,
            channel_id: &self.id,
            role: GraphRole::Live,
            description: self.live_description.as_str(),
            sink: GraphSink::new(ctx.events.clone(), self.index, GraphSource::live(generation)),
            surface: self.surface.clone(),
            policy: ctx.policy,
        });

        let graph = match built {
            Ok(graph) => graph,
            Err(e) => {
                warn!("{}: {}", self.id, e);
                self.arm_reconnect(ctx.timers);
                return;
            }
        };

        self.live_generation = generation;
        self.known_duration = None;
        self.position = None;
        self.live_state = TrackedState::Null;

        let mut live = GraphHandle::new(GraphRole::Live, graph);
        if let Some(handle) = self.surface.handle() {
            if let Err(e) = live.bind_surface(handle) {
                warn!("{}: live surface bind failed: {}", self.id, e);
            }
        }

        match live.set_state(GraphState::Playing) {
            Ok(()) => self.live = Some(live),
            Err(e) => {
                warn!("{}: unable to set the live graph to PLAYING: {}", self.id, e);
                live.dispose();
                self.live_state = TrackedState::Failed;
                self.arm_reconnect(ctx.timers);
            }
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn arm_reconnect<T: TimerService>(&mut self, timers: &mut T) {
        if self.reconnect.arm(timers) {
            info!(
                "{}: reconnecting in {}s",
                self.id,
                self.reconnect.delay().as_secs()
            );
        }
    }

    fn command_fallback(&mut self, target: GraphState) {
        if let Err(e) = self.fallback.set_state(target) {
            error!("{}: fallback did not accept {}: {}", self.id, target, e);
        }
    }

    fn teardown_live(&mut self, state: TrackedState) {
        if let Some(mut live) = self.live.take() {
            live.dispose();
        }
        self.live_state = state;
        self.known_duration = None;
        self.position = None;
    }

    /// Refresh position and, until known, duration of a playing live graph.
    /// Unavailable answers are skipped until the next call.
    pub fn refresh_timeline(&mut self) {
        let Some(live) = self.live.as_ref() else {
            return;
        };
        if self.live_state != TrackedState::Playing {
            return;
        }
        if self.known_duration.is_none() {
            self.known_duration = live.query_duration().ok().flatten();
        }
        self.position = live.query_position().ok().flatten();
    }

    /// Stop everything: cancel timers, drain both graphs through READY and
    /// NULL, release them. Idempotent.
    pub fn shutdown<T: TimerService>(&mut self, timers: &mut T) {
        self.reconnect.cancel(timers);
        self.loop_restart.cancel(timers);
        self.halted = true;
        if self.live.is_some() {
            info!("{}: stopping live graph", self.id);
        }
        self.teardown_live(TrackedState::Absent);
        self.fallback.dispose();
        self.fallback_state = TrackedState::Null;
    }
}
