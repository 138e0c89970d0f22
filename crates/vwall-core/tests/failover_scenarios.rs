mod common;

use common::*;
use std::time::Duration;
use vwall_core::channel::{ShutdownReason, Verdict};
use vwall_core::graph::{ErrorCategory, GraphRole, GraphState, SurfaceHandle, TrackedState};
use vwall_core::router::{ControlEvent, GraphEventKind, GraphSource};
use vwall_core::sim::{SimMode, SimOp};

/// Fallback up, first live connect done, live on screen.
fn wall_with_live_up() -> Wall {
    let mut w = Wall::auto();
    assert_eq!(w.start(), Verdict::Continue);
    assert_eq!(w.advance_secs(5), Verdict::Continue);
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Playing);
    w
}

#[test]
fn startup_binds_surface_and_plays_fallback() {
    let mut w = Wall::auto();
    w.start();

    assert_eq!(
        w.ledger.ops(NORTH, GraphRole::Fallback),
        vec![SimOp::BindSurface(SurfaceHandle(4096)), set(GraphState::Playing)]
    );
    let ch = w.channel(NORTH);
    assert_eq!(ch.fallback_state(), TrackedState::Playing);
    assert_eq!(ch.live_state(), TrackedState::Absent);
    assert!(ch.is_active());
    assert!(ch.reconnect_pending());
    assert_eq!(w.reconnects_started(), vec![Duration::from_secs(5)]);

    // Nothing is built before the initial delay elapses.
    w.advance_secs(4);
    assert_eq!(w.live_builds(NORTH), 0);
}

#[test]
fn scenario_a_live_up_pauses_fallback() {
    let w = wall_with_live_up();

    assert_eq!(w.live_builds(NORTH), 1);
    assert_eq!(w.last_fallback_op(NORTH), Some(set(GraphState::Paused)));
    let ch = w.channel(NORTH);
    assert_eq!(ch.fallback_state(), TrackedState::Paused);
    assert!(!ch.reconnect_pending());

    let status = ch.status();
    assert_eq!(status.badge(), "LIVE");
    assert!(!status.filler);
    assert_eq!(status.reconnect_attempts, 0);

    // The live graph got the surface before it was started.
    assert_eq!(
        w.ops_of(NORTH, GraphSource::live(1)),
        vec![SimOp::BindSurface(SurfaceHandle(4096)), set(GraphState::Playing)]
    );
}

#[test]
fn scenario_b_transport_error_fails_over_and_reconnects() {
    let mut w = wall_with_live_up();
    let first = w.live(NORTH);

    w.emit(NORTH, first, transport_error());
    assert_eq!(w.pump(), Verdict::Continue);

    assert_eq!(
        w.ops_of(NORTH, first),
        vec![
            SimOp::BindSurface(SurfaceHandle(4096)),
            set(GraphState::Playing),
            set(GraphState::Ready),
            set(GraphState::Null),
            SimOp::Release,
        ]
    );
    let ch = w.channel(NORTH);
    assert_eq!(ch.live_state(), TrackedState::Failed);
    assert!(!ch.has_live_graph());
    assert_eq!(ch.fallback_state(), TrackedState::Playing);
    assert_eq!(w.last_fallback_op(NORTH), Some(set(GraphState::Playing)));
    assert!(ch.reconnect_pending());
    assert_eq!(ch.status().badge(), "LOOP");
    assert_eq!(
        w.reconnects_started(),
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );

    w.advance_secs(9);
    assert_eq!(w.live_builds(NORTH), 1);
    w.advance_secs(1);
    assert_eq!(w.live_builds(NORTH), 2);
    assert_eq!(w.ledger.live_generation(NORTH), Some(2));
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Playing);
    assert_eq!(w.channel(NORTH).fallback_state(), TrackedState::Paused);
}

#[test]
fn live_eos_tears_down_to_null_not_failed() {
    let mut w = wall_with_live_up();
    let live = w.live(NORTH);

    w.emit(NORTH, live, GraphEventKind::Eos);
    w.pump();

    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Null);
    assert_eq!(w.ops_of(NORTH, live).last(), Some(&SimOp::Release));
    assert!(w.channel(NORTH).reconnect_pending());
    assert_eq!(w.channel(NORTH).fallback_state(), TrackedState::Playing);
}

#[test]
fn scenario_c_build_failures_retry_at_fixed_delay() {
    let mut w = Wall::auto();
    w.ledger.fail_next_live_builds(3);
    w.start();

    w.advance_secs(5);
    assert_eq!(w.ledger.failed_builds().len(), 1);
    assert!(w.channel(NORTH).reconnect_pending());
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Absent);

    w.advance_secs(10);
    w.advance_secs(10);
    assert_eq!(w.ledger.failed_builds().len(), 3);
    assert_eq!(w.channel(NORTH).status().reconnect_attempts, 3);
    assert_eq!(w.channel(NORTH).fallback_state(), TrackedState::Playing);
    assert_eq!(w.live_builds(NORTH), 0);

    w.advance_secs(10);
    assert_eq!(w.live_builds(NORTH), 1);
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Playing);
    assert_eq!(w.channel(NORTH).status().reconnect_attempts, 0);
    assert_eq!(
        w.reconnects_started(),
        vec![
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(10),
            Duration::from_secs(10),
        ]
    );
}

#[test]
fn refused_start_disposes_and_retries() {
    let mut w = Wall::auto();
    w.ledger.refuse_live_playing(true);
    w.start();
    w.advance_secs(5);

    assert_eq!(w.live_builds(NORTH), 1);
    // Never commanded, so nothing to drain.
    assert_eq!(
        w.ops_of(NORTH, GraphSource::live(1)),
        vec![SimOp::BindSurface(SurfaceHandle(4096)), SimOp::Release]
    );
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Failed);
    assert!(w.channel(NORTH).reconnect_pending());

    w.ledger.refuse_live_playing(false);
    w.advance_secs(10);
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Playing);
}

#[test]
fn scenario_d_hardware_error_halts_everything() {
    let mut w = wall_with_live_up();
    let live = w.live(NORTH);

    w.emit(NORTH, live, hardware_error());
    let verdict = w.pump();

    assert_eq!(
        verdict,
        Verdict::Shutdown(ShutdownReason::HardwareFault {
            channel: "north".into(),
            element: "omxh264dec-omxh264dec0".into(),
            message: "omxh264dec-omxh264dec0 failed".into(),
        })
    );
    assert_eq!(w.ops_of(NORTH, live).last(), Some(&set(GraphState::Ready)));
    assert_eq!(w.last_fallback_op(NORTH), Some(set(GraphState::Ready)));
    assert!(!w.channel(NORTH).reconnect_pending());
    assert_eq!(w.sup.timers().pending_count(), 0);
    assert!(w.channel(NORTH).is_halted());

    // Halted channels ignore the rest of the world.
    w.emit(NORTH, GraphSource::FALLBACK, GraphEventKind::Eos);
    w.advance_secs(60);
    assert_eq!(w.live_builds(NORTH), 1);
    assert_eq!(w.last_fallback_op(NORTH), Some(set(GraphState::Ready)));

    w.sup.shutdown();
    let ops = w.ops_of(NORTH, live);
    assert_eq!(
        &ops[ops.len() - 3..],
        &[set(GraphState::Ready), set(GraphState::Null), SimOp::Release]
    );
}

#[test]
fn hardware_error_from_fallback_is_fatal_too() {
    let mut w = Wall::auto();
    w.start();
    w.emit(
        NORTH,
        GraphSource::FALLBACK,
        fault(ErrorCategory::Hardware, "omxh264dec-omxh264dec1"),
    );
    assert!(matches!(
        w.pump(),
        Verdict::Shutdown(ShutdownReason::HardwareFault { .. })
    ));
    assert_eq!(w.sup.timers().pending_count(), 0);
}

#[test]
fn unclassified_error_is_retried() {
    let mut w = wall_with_live_up();
    let live = w.live(NORTH);
    w.emit(NORTH, live, fault(ErrorCategory::Unclassified, "capsfilter0"));
    assert_eq!(w.pump(), Verdict::Continue);
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Failed);
    assert!(w.channel(NORTH).reconnect_pending());
}

// ── failure precedence ────────────────────────────────────────────────────────

/// Manual-mode wall with fallback on screen and a built (silent) live graph.
fn manual_with_live_built() -> Wall {
    let mut w = Wall::manual();
    w.start();
    w.emit_climb(NORTH, GraphSource::FALLBACK, GraphState::Playing);
    w.advance_secs(5);
    assert!(w.channel(NORTH).has_live_graph());
    w
}

#[test]
fn error_beats_in_flight_playing() {
    let mut w = manual_with_live_built();
    let live = w.live(NORTH);
    w.ledger.clear_commands();

    // The PLAYING notification was already queued when the error arrived.
    w.emit(NORTH, live, transport_error());
    w.emit_state(NORTH, live, GraphState::Paused, GraphState::Playing);
    w.pump();

    let fallback_ops = w.ledger.ops(NORTH, GraphRole::Fallback);
    assert_eq!(fallback_ops, vec![set(GraphState::Playing)]);
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Failed);
}

#[test]
fn eos_beats_in_flight_playing() {
    let mut w = manual_with_live_built();
    let live = w.live(NORTH);
    w.emit_state(NORTH, live, GraphState::Null, GraphState::Ready);
    w.emit_state(NORTH, live, GraphState::Ready, GraphState::Paused);
    w.emit(NORTH, live, GraphEventKind::Eos);
    w.emit_state(NORTH, live, GraphState::Paused, GraphState::Playing);
    w.pump();

    assert!(!w
        .ledger
        .ops(NORTH, GraphRole::Fallback)
        .contains(&set(GraphState::Paused)));
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Null);
    assert_eq!(w.channel(NORTH).fallback_target(), Some(GraphState::Playing));
}

#[test]
fn live_dropping_below_playing_resumes_fallback() {
    let mut w = manual_with_live_built();
    let live = w.live(NORTH);
    w.emit_climb(NORTH, live, GraphState::Playing);
    w.emit_state(NORTH, GraphSource::FALLBACK, GraphState::Playing, GraphState::Paused);
    w.pump();
    assert_eq!(w.last_fallback_op(NORTH), Some(set(GraphState::Paused)));

    // Buffering: the live graph steps back to PAUSED without failing.
    w.emit_state(NORTH, live, GraphState::Playing, GraphState::Paused);
    w.pump();
    assert_eq!(w.last_fallback_op(NORTH), Some(set(GraphState::Playing)));
    assert!(w.channel(NORTH).has_live_graph());
    assert!(!w.channel(NORTH).reconnect_pending());
}

// ── reconnect bookkeeping ─────────────────────────────────────────────────────

#[test]
fn back_to_back_failures_schedule_one_reconnect() {
    let mut w = manual_with_live_built();
    let live = w.live(NORTH);
    w.emit(NORTH, live, GraphEventKind::Eos);
    w.emit(NORTH, live, transport_error());
    w.emit(NORTH, live, transport_error());
    w.pump();

    assert_eq!(
        w.reconnects_started(),
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );
    assert_eq!(w.sup.timers().pending_count(), 1);
}

#[test]
fn events_from_a_replaced_live_graph_are_ignored() {
    let mut w = wall_with_live_up();
    let old = w.live(NORTH);
    w.emit(NORTH, old, transport_error());
    w.pump();
    w.advance_secs(10);
    assert_eq!(w.live(NORTH), GraphSource::live(2));

    w.emit(NORTH, old, GraphEventKind::Eos);
    w.emit(NORTH, old, transport_error());
    w.pump();

    let ch = w.channel(NORTH);
    assert!(ch.has_live_graph());
    assert_eq!(ch.live_state(), TrackedState::Playing);
    assert!(!ch.reconnect_pending());
}

// ── fallback loop ─────────────────────────────────────────────────────────────

#[test]
fn fallback_eos_restarts_loop_after_pause() {
    let mut w = Wall::auto();
    w.start();
    w.emit(NORTH, GraphSource::FALLBACK, GraphEventKind::Eos);
    w.pump();

    assert_eq!(w.last_fallback_op(NORTH), Some(set(GraphState::Ready)));
    assert_eq!(w.channel(NORTH).fallback_state(), TrackedState::Ready);
    assert!(w.channel(NORTH).loop_restart_pending());
    assert!(w.channel(NORTH).needs_filler());
    assert!(w.channel(NORTH).frame_guaranteed());

    w.advance(Duration::from_millis(400));
    w.pump();
    assert_eq!(w.channel(NORTH).fallback_state(), TrackedState::Ready);

    w.advance(Duration::from_millis(100));
    w.pump();
    assert_eq!(w.last_fallback_op(NORTH), Some(set(GraphState::Playing)));
    assert_eq!(w.channel(NORTH).fallback_state(), TrackedState::Playing);
    assert_eq!(w.live_builds(NORTH), 0);
}

#[test]
fn loop_restart_stays_paused_under_live_feed() {
    let mut w = wall_with_live_up();
    w.ledger.clear_commands();
    w.emit(NORTH, GraphSource::FALLBACK, GraphEventKind::Eos);
    w.pump();
    w.advance(Duration::from_millis(500));
    w.pump();

    assert_eq!(
        w.ledger.ops(NORTH, GraphRole::Fallback),
        vec![set(GraphState::Ready), set(GraphState::Paused)]
    );
    // The loop never touches the live graph.
    assert!(w.ledger.ops(NORTH, GraphRole::Live).is_empty());
}

#[test]
fn fallback_stream_error_is_a_loop_boundary() {
    let mut w = Wall::auto();
    w.start();
    w.emit(
        NORTH,
        GraphSource::FALLBACK,
        fault(ErrorCategory::Unclassified, "multifilesrc0"),
    );
    assert_eq!(w.pump(), Verdict::Continue);
    assert!(w.channel(NORTH).loop_restart_pending());
    w.advance(Duration::from_millis(500));
    w.pump();
    assert_eq!(w.channel(NORTH).fallback_state(), TrackedState::Playing);
}

// ── surface ───────────────────────────────────────────────────────────────────

#[test]
fn second_surface_ready_is_ignored() {
    let mut w = Wall::auto();
    w.start();
    w.send(ControlEvent::SurfaceReady {
        channel: NORTH,
        binding: vwall_core::SurfaceBinding::Native(SurfaceHandle(0xdead)),
    });
    w.pump();

    assert_eq!(
        w.ledger.ops(NORTH, GraphRole::Fallback),
        vec![SimOp::BindSurface(SurfaceHandle(4096)), set(GraphState::Playing)]
    );
    assert_eq!(w.reconnects_started().len(), 1);
}

#[test]
fn self_managed_surface_binds_nothing() {
    let text = ONE_CHANNEL.replace("surface = 4096\n", "");
    let mut w = Wall::new(SimMode::Auto, config(&text));
    w.start();
    w.advance_secs(5);

    assert!(w
        .ledger
        .commands()
        .iter()
        .all(|c| !matches!(c.op, SimOp::BindSurface(_))));
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Playing);
}

// ── timeline ──────────────────────────────────────────────────────────────────

#[test]
fn duration_is_cached_position_refreshed() {
    let mut w = wall_with_live_up();
    w.ledger
        .set_timeline(Some(Duration::from_secs(30)), Some(Duration::from_secs(5)));
    w.send(ControlEvent::Tick);
    w.pump();
    let status = w.channel(NORTH).status();
    assert_eq!(status.duration_secs, Some(30.0));
    assert_eq!(status.position_secs, Some(5.0));

    w.ledger
        .set_timeline(Some(Duration::from_secs(60)), Some(Duration::from_secs(6)));
    w.send(ControlEvent::Tick);
    w.pump();
    let status = w.channel(NORTH).status();
    assert_eq!(status.duration_secs, Some(30.0));
    assert_eq!(status.position_secs, Some(6.0));

    let live = w.live(NORTH);
    w.emit(NORTH, live, transport_error());
    w.pump();
    assert_eq!(w.channel(NORTH).known_duration(), None);
    assert_eq!(w.channel(NORTH).status().position_secs, None);
}

#[test]
fn unavailable_queries_are_skipped() {
    let mut w = wall_with_live_up();
    w.sup.tick();
    assert_eq!(w.channel(NORTH).known_duration(), None);

    w.ledger.set_timeline(Some(Duration::from_secs(12)), None);
    w.sup.tick();
    assert_eq!(w.channel(NORTH).known_duration(), Some(Duration::from_secs(12)));
}

// ── shutdown ──────────────────────────────────────────────────────────────────

#[test]
fn close_drains_every_graph_before_release() {
    let mut w = wall_with_live_up();
    let live = w.live(NORTH);
    w.send(ControlEvent::CloseRequested);
    assert_eq!(w.pump(), Verdict::Shutdown(ShutdownReason::CloseRequested));

    w.ledger.clear_commands();
    w.sup.shutdown();
    assert_eq!(
        w.ops_of(NORTH, live),
        vec![set(GraphState::Ready), set(GraphState::Null), SimOp::Release]
    );
    assert_eq!(
        w.ledger.ops(NORTH, GraphRole::Fallback),
        vec![set(GraphState::Ready), set(GraphState::Null), SimOp::Release]
    );
    assert_eq!(w.sup.timers().pending_count(), 0);

    // Second shutdown and late events do nothing.
    w.sup.shutdown();
    w.emit(NORTH, GraphSource::FALLBACK, GraphEventKind::Eos);
    w.advance_secs(30);
    assert_eq!(w.ledger.commands().len(), 6);
    assert!(w.sup.is_stopped());
}

#[test]
fn shutdown_cancels_pending_first_connect() {
    let mut w = Wall::auto();
    w.start();
    assert_eq!(w.sup.timers().pending_count(), 1);
    w.sup.shutdown();
    assert_eq!(w.sup.timers().pending_count(), 0);
    w.advance_secs(5);
    assert_eq!(w.live_builds(NORTH), 0);
}

// ── routing ───────────────────────────────────────────────────────────────────

#[test]
fn channels_are_independent() {
    let mut w = Wall::new(SimMode::Auto, config(&two_channels()));
    w.start();
    w.advance_secs(5);
    assert_eq!(w.channel(NORTH).live_state(), TrackedState::Playing);
    assert_eq!(w.live_builds(SOUTH), 0);

    let live = w.live(NORTH);
    w.emit(NORTH, live, transport_error());
    w.pump();
    assert_eq!(w.last_fallback_op(SOUTH), Some(set(GraphState::Playing)));
    assert_eq!(w.ledger.ops(SOUTH, GraphRole::Fallback).len(), 2);

    w.advance_secs(5);
    assert_eq!(w.live_builds(SOUTH), 1);
    assert_eq!(w.channel(SOUTH).live_state(), TrackedState::Playing);
    assert_eq!(w.sup.snapshot().len(), 2);
    assert_eq!(w.sup.channel("south").map(|c| c.index()), Some(SOUTH));
}

#[test]
fn events_for_unknown_channels_are_dropped() {
    let mut w = Wall::auto();
    w.start();
    w.emit(7, GraphSource::FALLBACK, GraphEventKind::Eos);
    assert_eq!(w.pump(), Verdict::Continue);
    assert_eq!(w.last_fallback_op(NORTH), Some(set(GraphState::Playing)));
}
