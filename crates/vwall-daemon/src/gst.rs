//! GStreamer media backend.
//!
//! ```text
//!   GstFactory::build(description)
//!         │
//!         └── gst::parse::launch → Pipeline
//!                  └── bus sync handler (streaming threads)
//!                        ├── prepare-window-handle → SurfaceSlot::answer_request
//!                        ├── state-changed (pipeline only) ─┐
//!                        ├── eos ──────────────────────────┼──► GraphSink::emit
//!                        └── error (classified) ───────────┘
//! ```
//!
//! Every message is consumed by the sync handler; nothing is left queued on
//! the bus and no GLib main loop is needed for the graphs.

use std::time::Duration;

use gstreamer as gst;
use gstreamer_video as gst_video;

use gst::prelude::*;
use gst_video::prelude::*;
use tracing::{debug, info, warn};

use vwall_core::config::ErrorPolicy;
use vwall_core::graph::{
    BuildRequest, GraphError, GraphFactory, GraphRole, GraphState, MediaGraph, SurfaceHandle,
};
use vwall_core::router::{GraphEventKind, GraphFault, GraphSink, SurfaceSlot, SyncReply};

pub fn init() -> anyhow::Result<()> {
    gst::init()?;
    info!("gst: {}", gst::version_string());
    Ok(())
}

fn to_gst(state: GraphState) -> gst::State {
    match state {
        GraphState::Null => gst::State::Null,
        GraphState::Ready => gst::State::Ready,
        GraphState::Paused => gst::State::Paused,
        GraphState::Playing => gst::State::Playing,
    }
}

fn from_gst(state: gst::State) -> Option<GraphState> {
    match state {
        gst::State::Null => Some(GraphState::Null),
        gst::State::Ready => Some(GraphState::Ready),
        gst::State::Paused => Some(GraphState::Paused),
        gst::State::Playing => Some(GraphState::Playing),
        _ => None,
    }
}

/// Native window handle as the overlay API expects it. Handles wider than a
/// pointer (a 64-bit id on a 32-bit host) are refused rather than truncated.
fn window_handle(handle: SurfaceHandle) -> Option<usize> {
    match usize::try_from(handle.0) {
        Ok(raw) => Some(raw),
        Err(_) => {
            warn!("gst: surface handle {} does not fit a native window handle", handle);
            None
        }
    }
}

/// Name of the posting element plus factory names of it and every ancestor,
/// innermost first.
fn ancestry(src: Option<&gst::Object>) -> (String, Vec<String>) {
    let name = src
        .map(|s| s.name().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let mut factories = Vec::new();
    let mut current = src.cloned();
    while let Some(object) = current {
        if let Some(factory) = object
            .downcast_ref::<gst::Element>()
            .and_then(|e| e.factory())
        {
            factories.push(factory.name().to_string());
        }
        current = object.parent();
    }
    (name, factories)
}

// ── bus handler ───────────────────────────────────────────────────────────────

struct BusHandler {
    channel_id: String,
    role: GraphRole,
    pipeline: gst::glib::WeakRef<gst::Pipeline>,
    sink: GraphSink,
    surface: SurfaceSlot,
    policy: ErrorPolicy,
}

impl BusHandler {
    /// Runs on whichever streaming thread posted the message. Must not block.
    fn on_message(&self, msg: &gst::Message) -> gst::BusSyncReply {
        use gst::MessageView;

        if gst_video::is_video_overlay_prepare_window_handle_message(msg) {
            let Some(overlay) = msg
                .src()
                .and_then(|src| src.clone().dynamic_cast::<gst_video::VideoOverlay>().ok())
            else {
                return gst::BusSyncReply::Pass;
            };
            let reply = self.surface.answer_request(&self.channel_id, |handle| {
                if let Some(raw) = window_handle(handle) {
                    unsafe { overlay.set_window_handle(raw) };
                }
            });
            return match reply {
                SyncReply::Handled | SyncReply::Dropped => gst::BusSyncReply::Drop,
                SyncReply::Pass => gst::BusSyncReply::Pass,
            };
        }

        match msg.view() {
            MessageView::StateChanged(changed) => {
                let from_pipeline = self
                    .pipeline
                    .upgrade()
                    .is_some_and(|p| msg.src() == Some(p.upcast_ref::<gst::Object>()));
                if from_pipeline {
                    if let (Some(old), Some(new)) = (from_gst(changed.old()), from_gst(changed.current())) {
                        self.sink.emit(GraphEventKind::StateChanged { old, new });
                    }
                }
            }
            MessageView::Eos(_) => {
                self.sink.emit(GraphEventKind::Eos);
            }
            MessageView::Error(err) => {
                let (element, factories) = ancestry(msg.src());
                let category = self.policy.classify(factories.iter().map(String::as_str));
                debug!(
                    "{}: {} error from {} classified as {:?} (factories {:?})",
                    self.channel_id, self.role, element, category, factories
                );
                self.sink.emit(GraphEventKind::Error(GraphFault {
                    category,
                    element,
                    message: err.error().to_string(),
                    debug: err.debug().map(|d| d.to_string()),
                }));
            }
            MessageView::Warning(w) => {
                warn!(
                    "{}: {} warning from {}: {}",
                    self.channel_id,
                    self.role,
                    msg.src().map(|s| s.name().to_string()).unwrap_or_default(),
                    w.error()
                );
            }
            _ => {}
        }
        gst::BusSyncReply::Drop
    }
}

// ── graphs ────────────────────────────────────────────────────────────────────

pub struct GstGraph {
    pipeline: gst::Pipeline,
    role: GraphRole,
}

impl MediaGraph for GstGraph {
    fn set_state(&mut self, target: GraphState) -> Result<(), GraphError> {
        self.pipeline
            .set_state(to_gst(target))
            .map(|_| ())
            .map_err(|e| GraphError::StateChange {
                role: self.role,
                target,
                reason: e.to_string(),
            })
    }

    fn query_duration(&self) -> Option<Duration> {
        self.pipeline
            .query_duration::<gst::ClockTime>()
            .map(|t| Duration::from_nanos(t.nseconds()))
    }

    fn query_position(&self) -> Option<Duration> {
        self.pipeline
            .query_position::<gst::ClockTime>()
            .map(|t| Duration::from_nanos(t.nseconds()))
    }

    fn bind_surface(&mut self, handle: SurfaceHandle) {
        let Some(raw) = window_handle(handle) else {
            return;
        };
        let mut sinks = self
            .pipeline
            .iterate_all_by_interface(gst_video::VideoOverlay::static_type());
        loop {
            match sinks.next() {
                Ok(Some(element)) => {
                    if let Ok(overlay) = element.dynamic_cast::<gst_video::VideoOverlay>() {
                        unsafe { overlay.set_window_handle(raw) };
                    }
                }
                Ok(None) => break,
                Err(gst::IteratorError::Resync) => sinks.resync(),
                Err(gst::IteratorError::Error) => {
                    warn!("gst: failed to walk {} graph for video sinks", self.role);
                    break;
                }
            }
        }
    }

    fn release(&mut self) {
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
    }
}

impl Drop for GstGraph {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            debug!("gst: {} graph did not reach NULL on drop: {}", self.role, e);
        }
    }
}

#[derive(Default)]
pub struct GstFactory;

impl GraphFactory for GstFactory {
    type Graph = GstGraph;

    fn build(&mut self, request: BuildRequest<'_>) -> Result<GstGraph, GraphError> {
        let role = request.role;
        let build_error = |reason: String| GraphError::Build { role, reason };

        let element = gst::parse::launch(request.description).map_err(|e| build_error(e.to_string()))?;
        let pipeline = element
            .downcast::<gst::Pipeline>()
            .map_err(|_| build_error("description did not produce a pipeline".to_string()))?;
        let bus = pipeline
            .bus()
            .ok_or_else(|| build_error("pipeline has no bus".to_string()))?;

        let handler = BusHandler {
            channel_id: request.channel_id.to_string(),
            role,
            pipeline: pipeline.downgrade(),
            sink: request.sink,
            surface: request.surface,
            policy: request.policy.clone(),
        };
        bus.set_sync_handler(move |_, msg| handler.on_message(msg));

        debug!("gst: built {} graph for {}", role, request.channel_id);
        Ok(GstGraph { pipeline, role })
    }
}
