#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use vwall_core::channel::{Channel, Verdict};
use vwall_core::config::Config;
use vwall_core::graph::{ErrorCategory, GraphRole, GraphState};
use vwall_core::router::{
    ControlEvent, GraphEvent, GraphEventKind, GraphFault, GraphSource, SurfaceBinding,
};
use vwall_core::sim::{ManualTimers, SimFactory, SimGraph, SimLedger, SimMode, SimOp};
use vwall_core::Supervisor;

pub const NORTH: usize = 0;
pub const SOUTH: usize = 1;

pub const ONE_CHANNEL: &str = r#"
    [supervisor]
    backend = "simulated"
    reconnect_delay_secs = 10
    loop_restart_pause_ms = 500

    [[channel]]
    id = "north"
    initial_delay_secs = 5
    surface = 4096
    [channel.live]
    location = "rtsp://10.0.0.5:8554/cam"
    [channel.fallback]
    path = "/srv/wall/loop.h264"
"#;

pub fn two_channels() -> String {
    format!(
        r#"{ONE_CHANNEL}
    [[channel]]
    id = "south"
    initial_delay_secs = 10
    surface = 8192
    [channel.live]
    location = "rtsp://10.0.0.6:8554/cam"
    [channel.fallback]
    path = "/srv/wall/loop.h264"
"#
    )
}

pub fn config(text: &str) -> Config {
    Config::from_toml_str(text).expect("test config should parse")
}

/// A supervisor over simulated graphs and a virtual clock, plus the event
/// queue it would normally be fed from.
pub struct Wall {
    pub sup: Supervisor<SimFactory, ManualTimers>,
    pub tx: UnboundedSender<ControlEvent>,
    pub rx: UnboundedReceiver<ControlEvent>,
    pub ledger: SimLedger,
    pub config: Config,
}

impl Wall {
    pub fn new(mode: SimMode, config: Config) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory = SimFactory::new(mode);
        let ledger = factory.ledger();
        let sup = Supervisor::new(&config, factory, ManualTimers::default(), tx.clone())
            .expect("fallback graphs should build");
        Self {
            sup,
            tx,
            rx,
            ledger,
            config,
        }
    }

    pub fn auto() -> Self {
        Self::new(SimMode::Auto, config(ONE_CHANNEL))
    }

    pub fn manual() -> Self {
        Self::new(SimMode::Manual, config(ONE_CHANNEL))
    }

    /// Queue surface-ready for every channel, the way the daemon does once
    /// the windows exist.
    pub fn realize(&mut self) {
        for (channel, cfg) in self.config.channels.iter().enumerate() {
            let binding = cfg
                .surface
                .map(SurfaceBinding::Native)
                .unwrap_or(SurfaceBinding::SelfManaged);
            self.send(ControlEvent::SurfaceReady { channel, binding });
        }
    }

    /// Realize and drain, leaving the fallback loops running.
    pub fn start(&mut self) -> Verdict {
        self.realize();
        self.pump()
    }

    pub fn send(&self, event: ControlEvent) {
        self.tx.send(event).expect("queue open");
    }

    /// Deliver one queued event. `None` when the queue is empty.
    pub fn step(&mut self) -> Option<Verdict> {
        let event = self.rx.try_recv().ok()?;
        Some(self.sup.handle(event))
    }

    /// Deliver queued events until the queue is empty. Returns the first
    /// shutdown verdict seen, if any.
    pub fn pump(&mut self) -> Verdict {
        let mut verdict = Verdict::Continue;
        while let Some(v) = self.step() {
            if verdict == Verdict::Continue {
                verdict = v;
            }
        }
        verdict
    }

    /// Move the virtual clock and queue whatever timers came due.
    pub fn advance(&mut self, by: Duration) {
        for key in self.sup.timers_mut().advance(by) {
            self.send(ControlEvent::TimerFired(key));
        }
    }

    pub fn advance_secs(&mut self, secs: u64) -> Verdict {
        self.advance(Duration::from_secs(secs));
        self.pump()
    }

    pub fn channel(&self, index: usize) -> &Channel<SimGraph> {
        &self.sup.channels()[index]
    }

    /// Source of the channel's current live graph.
    pub fn live(&self, index: usize) -> GraphSource {
        GraphSource::live(self.channel(index).live_generation())
    }

    pub fn emit(&self, channel: usize, source: GraphSource, kind: GraphEventKind) {
        self.send(ControlEvent::Graph(GraphEvent {
            channel,
            source,
            kind,
        }));
    }

    pub fn emit_state(&self, channel: usize, source: GraphSource, old: GraphState, new: GraphState) {
        self.emit(channel, source, GraphEventKind::StateChanged { old, new });
    }

    /// Walk a graph up the ladder to `to`, one reported rung at a time.
    pub fn emit_climb(&self, channel: usize, source: GraphSource, to: GraphState) {
        let mut state = GraphState::Null;
        while let Some(next) = state.step_towards(to) {
            self.emit_state(channel, source, state, next);
            state = next;
        }
    }

    /// Commands sent to one particular graph instance.
    pub fn ops_of(&self, channel: usize, source: GraphSource) -> Vec<SimOp> {
        self.ledger
            .commands()
            .into_iter()
            .filter(|c| c.channel == channel && c.source == source)
            .map(|c| c.op)
            .collect()
    }

    pub fn last_fallback_op(&self, channel: usize) -> Option<SimOp> {
        self.ledger.ops(channel, GraphRole::Fallback).last().copied()
    }

    pub fn live_builds(&self, channel: usize) -> usize {
        self.ledger
            .builds()
            .iter()
            .filter(|b| b.channel == channel && b.role == GraphRole::Live)
            .count()
    }

    pub fn reconnects_started(&self) -> Vec<Duration> {
        self.sup
            .timers()
            .started()
            .iter()
            .filter(|(key, _)| key.kind == vwall_core::reconnect::TimerKind::Reconnect)
            .map(|(_, after)| *after)
            .collect()
    }
}

pub fn fault(category: ErrorCategory, element: &str) -> GraphEventKind {
    GraphEventKind::Error(GraphFault {
        category,
        element: element.to_string(),
        message: format!("{element} failed"),
        debug: None,
    })
}

pub fn transport_error() -> GraphEventKind {
    fault(ErrorCategory::Transport, "rtspsrc0")
}

pub fn hardware_error() -> GraphEventKind {
    fault(ErrorCategory::Hardware, "omxh264dec-omxh264dec0")
}

pub fn set(state: GraphState) -> SimOp {
    SimOp::SetState(state)
}
