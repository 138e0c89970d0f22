//! Media graph abstraction.
//!
//! A media graph is one constructed pipeline instance, built from a textual
//! description by an external media framework. The supervisor only sees the
//! small surface below: state requests, position/duration queries, surface
//! binding and an event feed (delivered through [`GraphSink`]).
//!
//! State transitions are asynchronous. `set_state` returning `Ok` means the
//! request was accepted; the transition is complete only once the matching
//! `StateChanged` event arrives on the control thread.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ErrorPolicy;
use crate::router::{GraphSink, SurfaceSlot};

/// Lifecycle state of a media graph, ordered `Null < Ready < Paused < Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GraphState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl GraphState {
    pub fn name(self) -> &'static str {
        match self {
            GraphState::Null => "NULL",
            GraphState::Ready => "READY",
            GraphState::Paused => "PAUSED",
            GraphState::Playing => "PLAYING",
        }
    }

    /// The adjacent state one step towards `target`, or `None` when already there.
    /// Media frameworks walk the ladder one rung at a time and report each rung.
    pub fn step_towards(self, target: GraphState) -> Option<GraphState> {
        use GraphState::*;
        let next = match self.cmp(&target) {
            std::cmp::Ordering::Equal => return None,
            std::cmp::Ordering::Less => match self {
                Null => Ready,
                Ready => Paused,
                Paused | Playing => Playing,
            },
            std::cmp::Ordering::Greater => match self {
                Playing => Paused,
                Paused => Ready,
                Ready | Null => Null,
            },
        };
        Some(next)
    }
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the supervisor last observed about a graph.
///
/// `Absent` means no graph exists (live graph between teardown and rebuild);
/// `Failed` is terminal for one live graph instance and only reached through
/// an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrackedState {
    #[default]
    Absent,
    Null,
    Ready,
    Paused,
    Playing,
    Failed,
}

impl TrackedState {
    /// True when the graph has a frame on screen (PAUSED or PLAYING).
    pub fn is_visible(self) -> bool {
        matches!(self, TrackedState::Paused | TrackedState::Playing)
    }
}

impl From<GraphState> for TrackedState {
    fn from(state: GraphState) -> Self {
        match state {
            GraphState::Null => TrackedState::Null,
            GraphState::Ready => TrackedState::Ready,
            GraphState::Paused => TrackedState::Paused,
            GraphState::Playing => TrackedState::Playing,
        }
    }
}

/// Which of a channel's two graphs something refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphRole {
    Live,
    Fallback,
}

impl fmt::Display for GraphRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphRole::Live => f.write_str("live"),
            GraphRole::Fallback => f.write_str("fallback"),
        }
    }
}

/// Native drawable handle (X11 window id, HWND, NSView pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceHandle(pub u64);

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Classification of a graph error, decided at the backend boundary from
/// the configured [`ErrorPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Network source unreachable or dropped. Recoverable.
    Transport,
    /// Hardware decoder/encoder failure. Fatal for the process.
    Hardware,
    /// Not covered by the policy; handled like a transport error.
    Unclassified,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("failed to build {role} graph: {reason}")]
    Build { role: GraphRole, reason: String },
    #[error("{role} graph refused transition to {target}: {reason}")]
    StateChange {
        role: GraphRole,
        target: GraphState,
        reason: String,
    },
    #[error("graph handle already disposed")]
    Disposed,
}

/// One backend graph instance.
pub trait MediaGraph {
    /// Request an asynchronous transition towards `target`.
    fn set_state(&mut self, target: GraphState) -> Result<(), GraphError>;

    fn query_duration(&self) -> Option<Duration>;

    fn query_position(&self) -> Option<Duration>;

    /// Hand the native surface to every video sink in the graph.
    fn bind_surface(&mut self, handle: SurfaceHandle);

    /// Release backend resources. Only called once the graph was driven to NULL.
    fn release(&mut self);
}

/// Everything a backend needs to construct one graph.
pub struct BuildRequest<'a> {
    /// Index of the owning channel in the supervisor.
    pub channel: usize,
    pub channel_id: &'a str,
    pub role: GraphRole,
    pub description: &'a str,
    /// Asynchronous event path to the control thread.
    pub sink: GraphSink,
    /// Synchronous surface handshake, answered on the graph's worker thread.
    pub surface: SurfaceSlot,
    pub policy: &'a ErrorPolicy,
}

pub trait GraphFactory {
    type Graph: MediaGraph;

    fn build(&mut self, request: BuildRequest<'_>) -> Result<Self::Graph, GraphError>;
}

/// Owned wrapper around a backend graph.
///
/// Tracks the last requested target and enforces the disposal contract: a
/// disposed handle rejects every call with [`GraphError::Disposed`], disposing
/// twice is a no-op, and disposal always drains the graph through READY and
/// NULL before the backend releases it.
pub struct GraphHandle<G> {
    role: GraphRole,
    inner: Option<G>,
    target: Option<GraphState>,
}

impl<G: MediaGraph> GraphHandle<G> {
    pub fn new(role: GraphRole, graph: G) -> Self {
        Self {
            role,
            inner: Some(graph),
            target: None,
        }
    }

    /// Last accepted target, `None` if never commanded.
    pub fn target(&self) -> Option<GraphState> {
        self.target
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn set_state(&mut self, target: GraphState) -> Result<(), GraphError> {
        let graph = self.inner.as_mut().ok_or(GraphError::Disposed)?;
        graph.set_state(target)?;
        self.target = Some(target);
        Ok(())
    }

    pub fn query_duration(&self) -> Result<Option<Duration>, GraphError> {
        let graph = self.inner.as_ref().ok_or(GraphError::Disposed)?;
        Ok(graph.query_duration())
    }

    pub fn query_position(&self) -> Result<Option<Duration>, GraphError> {
        let graph = self.inner.as_ref().ok_or(GraphError::Disposed)?;
        Ok(graph.query_position())
    }

    pub fn bind_surface(&mut self, handle: SurfaceHandle) -> Result<(), GraphError> {
        let graph = self.inner.as_mut().ok_or(GraphError::Disposed)?;
        graph.bind_surface(handle);
        Ok(())
    }

    /// Drain to NULL and release. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        let Some(mut graph) = self.inner.take() else {
            return;
        };

        // A graph that was never commanded is still in NULL.
        if let Some(target) = self.target {
            for step in [GraphState::Ready, GraphState::Null] {
                if target > step {
                    if let Err(e) = graph.set_state(step) {
                        debug!(role = %self.role, "drain to {} failed: {}", step, e);
                    }
                }
            }
        }
        self.target = Some(GraphState::Null);
        graph.release();
    }
}

impl<G> fmt::Debug for GraphHandle<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphHandle")
            .field("role", &self.role)
            .field("disposed", &self.inner.is_none())
            .field("target", &self.target)
            .finish()
    }
}
