//! Owns every channel and dispatches control events to them.
//!
//! The supervisor is sans-IO: graphs come from a [`GraphFactory`], timers
//! from a [`TimerService`], events arrive through [`Supervisor::handle`].
//! The daemon drives it from a single control task; tests drive it by hand.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::channel::{Channel, Ctx, ShutdownReason, Verdict};
use crate::config::{Config, ErrorPolicy};
use crate::graph::{GraphError, GraphFactory};
use crate::protocol::ChannelStatus;
use crate::reconnect::TimerService;
use crate::router::{ControlEvent, GraphEvent};

pub struct Supervisor<F: GraphFactory, T> {
    channels: Vec<Channel<F::Graph>>,
    factory: F,
    timers: T,
    events: UnboundedSender<ControlEvent>,
    policy: ErrorPolicy,
    stopped: bool,
}

impl<F: GraphFactory, T: TimerService> Supervisor<F, T> {
    /// Build every channel's fallback graph. Live graphs are built later,
    /// once each channel's surface is ready.
    pub fn new(
        config: &Config,
        mut factory: F,
        mut timers: T,
        events: UnboundedSender<ControlEvent>,
    ) -> Result<Self, GraphError> {
        let policy = config.errors.clone();
        let mut channels = Vec::with_capacity(config.channels.len());
        {
            let mut ctx = Ctx {
                factory: &mut factory,
                timers: &mut timers,
                events: &events,
                policy: &policy,
            };
            for (index, channel) in config.channels.iter().enumerate() {
                channels.push(Channel::new(
                    index,
                    channel,
                    config.supervisor.reconnect_delay(),
                    config.supervisor.loop_restart_pause(),
                    &mut ctx,
                )?);
            }
        }
        info!("supervisor: {} channel(s) ready", channels.len());

        Ok(Self {
            channels,
            factory,
            timers,
            events,
            policy,
            stopped: false,
        })
    }

    pub fn handle(&mut self, event: ControlEvent) -> Verdict {
        if self.stopped {
            debug!("supervisor: stopped, dropping {:?}", event);
            return Verdict::Continue;
        }
        match event {
            ControlEvent::SurfaceReady { channel, binding } => {
                self.dispatch(channel, |ch, ctx| ch.on_surface_ready(binding, ctx))
            }
            ControlEvent::Graph(GraphEvent {
                channel,
                source,
                kind,
            }) => self.dispatch(channel, |ch, ctx| ch.on_graph_event(source, kind, ctx)),
            ControlEvent::TimerFired(key) => {
                self.dispatch(key.channel, |ch, ctx| ch.on_timer(key, ctx))
            }
            ControlEvent::Tick => {
                self.tick();
                Verdict::Continue
            }
            ControlEvent::CloseRequested => {
                info!("supervisor: close requested");
                Verdict::Shutdown(ShutdownReason::CloseRequested)
            }
        }
    }

    fn dispatch(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut Channel<F::Graph>, &mut Ctx<'_, F, T>) -> Verdict,
    ) -> Verdict {
        let Some(channel) = self.channels.get_mut(index) else {
            warn!("supervisor: event for unknown channel #{}", index);
            return Verdict::Continue;
        };
        let mut ctx = Ctx {
            factory: &mut self.factory,
            timers: &mut self.timers,
            events: &self.events,
            policy: &self.policy,
        };
        f(channel, &mut ctx)
    }

    /// Refresh timeline information of every playing live graph.
    pub fn tick(&mut self) {
        for channel in &mut self.channels {
            channel.refresh_timeline();
        }
    }

    pub fn snapshot(&self) -> Vec<ChannelStatus> {
        self.channels.iter().map(Channel::status).collect()
    }

    pub fn channels(&self) -> &[Channel<F::Graph>] {
        &self.channels
    }

    pub fn channel(&self, id: &str) -> Option<&Channel<F::Graph>> {
        self.channels.iter().find(|c| c.id() == id)
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Tear down every channel: cancel timers, drain graphs to NULL, release.
    /// Events arriving afterwards are ignored.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        info!("supervisor: shutting down {} channel(s)", self.channels.len());
        for channel in &mut self.channels {
            channel.shutdown(&mut self.timers);
        }
        self.stopped = true;
    }
}
