//! The control loop.
//!
//! All inputs (graph events, timer firings, surface readiness, periodic
//! ticks, termination signals) funnel into one task on the current-thread
//! runtime, which is the only place channel state changes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use vwall_core::config::Config;
use vwall_core::state::StatusBoard;
use vwall_core::{ControlEvent, GraphFactory, ShutdownReason, Supervisor, SurfaceBinding, Verdict};

use crate::timers::TokioTimers;

pub struct WallCore<F: GraphFactory> {
    supervisor: Supervisor<F, TokioTimers>,
    board: Arc<StatusBoard>,
    events: UnboundedSender<ControlEvent>,
    surfaces: Vec<SurfaceBinding>,
    query_interval: Duration,
}

impl<F: GraphFactory> WallCore<F> {
    /// Build the supervisor (and with it every fallback graph).
    pub fn new(
        config: &Config,
        factory: F,
        board: Arc<StatusBoard>,
        events: UnboundedSender<ControlEvent>,
    ) -> anyhow::Result<Self> {
        let timers = TokioTimers::new(events.clone());
        let supervisor = Supervisor::new(config, factory, timers, events.clone())
            .context("failed to build the fallback graphs")?;

        let surfaces = config
            .channels
            .iter()
            .map(|c| {
                c.surface
                    .map(SurfaceBinding::Native)
                    .unwrap_or(SurfaceBinding::SelfManaged)
            })
            .collect();

        Ok(Self {
            supervisor,
            board,
            events,
            surfaces,
            query_interval: config.supervisor.query_interval(),
        })
    }

    /// Run until a termination signal, a close request or a fatal fault.
    pub async fn run(self, events: UnboundedReceiver<ControlEvent>) -> anyhow::Result<ShutdownReason> {
        self.run_until(events, shutdown_signal()).await
    }

    pub async fn run_until(
        mut self,
        mut events: UnboundedReceiver<ControlEvent>,
        stop: impl Future<Output = ()>,
    ) -> anyhow::Result<ShutdownReason> {
        // Surfaces come from configuration, so they are ready right away.
        for (channel, binding) in self.surfaces.iter().enumerate() {
            self.events
                .send(ControlEvent::SurfaceReady {
                    channel,
                    binding: *binding,
                })
                .context("control queue closed before startup")?;
        }

        let mut ticker = tokio::time::interval(self.query_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(stop);

        info!("Control loop running");
        let reason = loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    if let Verdict::Shutdown(reason) = self.supervisor.handle(event) {
                        break reason;
                    }
                    self.publish().await;
                }
                _ = ticker.tick() => {
                    self.supervisor.handle(ControlEvent::Tick);
                    self.publish().await;
                }
                _ = &mut stop => {
                    info!("Termination requested");
                    break ShutdownReason::CloseRequested;
                }
            }
        };

        match &reason {
            ShutdownReason::CloseRequested => info!("Shutting down"),
            ShutdownReason::HardwareFault {
                channel,
                element,
                message,
            } => error!(
                "Shutting down after hardware fault on {} ({}): {}",
                channel, element, message
            ),
            ShutdownReason::StartupFailure { channel, reason } => {
                error!("Shutting down, {} failed to start: {}", channel, reason)
            }
        }

        self.board.set_shutting_down().await;
        self.supervisor.shutdown();
        self.publish().await;
        Ok(reason)
    }

    async fn publish(&self) {
        self.board.publish_channels(self.supervisor.snapshot()).await;
    }
}

/// Resolves on SIGINT or (unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
