//! Failover supervision for a multi-screen video wall.
//!
//! Each channel pairs a live network feed with a local fallback loop and
//! keeps a frame on screen at all times: the loop plays while the feed is
//! down and pauses underneath it once the feed is up.

pub mod channel;
pub mod config;
pub mod graph;
pub mod pipeline;
pub mod platform;
pub mod protocol;
pub mod reconnect;
pub mod relay;
pub mod router;
pub mod sim;
pub mod state;
pub mod supervisor;

pub use channel::{ShutdownReason, Verdict};
pub use config::Config;
pub use graph::{GraphError, GraphFactory, GraphRole, GraphState, MediaGraph, TrackedState};
pub use router::{ControlEvent, GraphEvent, GraphEventKind, GraphSink, SurfaceBinding, SurfaceSlot};
pub use supervisor::Supervisor;
