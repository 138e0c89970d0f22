//! Event routing between media graphs and the control thread.
//!
//! ```text
//!   graph worker thread                       control thread
//!   ───────────────────                       ──────────────
//!   "surface requested" ── SurfaceSlot::answer_request (sync, never blocks)
//!   state / eos / error ── GraphSink::emit ──► mpsc ──► Supervisor::handle
//!   timers, surface-ready, close ────────────────────►┘
//! ```
//!
//! The synchronous path only reads the already-bound surface and performs a
//! single bind-and-acknowledge. Everything else is queued as a
//! [`ControlEvent`] and handled on the control thread in emission order per
//! graph. Nothing orders events of two different graphs relative to each
//! other.

use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::graph::{ErrorCategory, GraphRole, GraphState, SurfaceHandle};
use crate::reconnect::TimerKey;

/// Identifies one graph instance. The fallback graph keeps generation 0 for
/// the channel's lifetime; each live build gets a fresh generation so events
/// from a disposed live graph can be recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphSource {
    pub role: GraphRole,
    pub generation: u64,
}

impl GraphSource {
    pub const FALLBACK: GraphSource = GraphSource {
        role: GraphRole::Fallback,
        generation: 0,
    };

    pub fn live(generation: u64) -> Self {
        Self {
            role: GraphRole::Live,
            generation,
        }
    }
}

/// Error details surfaced by the backend, already classified.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphFault {
    pub category: ErrorCategory,
    /// Name of the element that posted the error.
    pub element: String,
    pub message: String,
    pub debug: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphEventKind {
    /// The graph as a whole (not one of its elements) completed a transition.
    StateChanged { old: GraphState, new: GraphState },
    Eos,
    Error(GraphFault),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEvent {
    pub channel: usize,
    pub source: GraphSource,
    pub kind: GraphEventKind,
}

/// How a channel's surface came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceBinding {
    /// A window created elsewhere; sinks render into it.
    Native(SurfaceHandle),
    /// No external window; sinks open their own.
    SelfManaged,
}

/// Everything the control loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    SurfaceReady {
        channel: usize,
        binding: SurfaceBinding,
    },
    Graph(GraphEvent),
    TimerFired(TimerKey),
    /// Periodic position/duration refresh.
    Tick,
    /// Window close / termination signal.
    CloseRequested,
}

/// Non-blocking emitter handed to a backend graph. Safe to use from any
/// thread; every event is stamped with the channel and graph instance.
#[derive(Debug, Clone)]
pub struct GraphSink {
    tx: UnboundedSender<ControlEvent>,
    channel: usize,
    source: GraphSource,
}

impl GraphSink {
    pub fn new(tx: UnboundedSender<ControlEvent>, channel: usize, source: GraphSource) -> Self {
        Self {
            tx,
            channel,
            source,
        }
    }

    pub fn source(&self) -> GraphSource {
        self.source
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    /// Queue an event for the control thread. Returns false once the control
    /// loop has gone away.
    pub fn emit(&self, kind: GraphEventKind) -> bool {
        self.tx
            .send(ControlEvent::Graph(GraphEvent {
                channel: self.channel,
                source: self.source,
                kind,
            }))
            .is_ok()
    }
}

/// Reply of the synchronous surface handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReply {
    /// Handle passed to the sink; swallow the request.
    Handled,
    /// No surface yet; the request is dropped and the sink stays blank.
    Dropped,
    /// Self-managed surface; let the request through to the framework.
    Pass,
}

/// Per-channel, set-once surface cell shared between the channel and the
/// synchronous handlers of both its graphs.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSlot(Arc<OnceLock<SurfaceBinding>>);

impl SurfaceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the surface. Returns false if the slot was already bound.
    pub fn bind(&self, binding: SurfaceBinding) -> bool {
        self.0.set(binding).is_ok()
    }

    pub fn handle(&self) -> Option<SurfaceHandle> {
        match self.0.get() {
            Some(SurfaceBinding::Native(handle)) => Some(*handle),
            _ => None,
        }
    }

    /// Answer a "surface handle requested" message on the graph's worker
    /// thread. `apply` performs the single bind on the requesting sink.
    pub fn answer_request(&self, channel_id: &str, apply: impl FnOnce(SurfaceHandle)) -> SyncReply {
        match self.0.get() {
            Some(SurfaceBinding::Native(handle)) => {
                apply(*handle);
                SyncReply::Handled
            }
            Some(SurfaceBinding::SelfManaged) => SyncReply::Pass,
            None => {
                warn!(channel = channel_id, "surface requested before the window was realized");
                SyncReply::Dropped
            }
        }
    }
}
