mod core;
#[cfg(feature = "gstreamer")]
mod gst;
mod http;
#[cfg(feature = "gstreamer")]
mod relay;
mod timers;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::info;
#[cfg(not(feature = "gstreamer"))]
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vwall_core::config::{Backend, Config, RelayConfig};
use vwall_core::pipeline;
use vwall_core::protocol::RelayStatus;
use vwall_core::sim::{SimFactory, SimMode};
use vwall_core::state::StatusBoard;
use vwall_core::{ControlEvent, GraphFactory, ShutdownReason};

#[derive(Parser)]
#[command(version, about = "Failover supervisor for an RTSP video wall")]
struct Args {
    /// Configuration file (default: ~/.config/videowall/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration, print the rendered graphs and exit
    #[arg(long)]
    check: bool,

    /// Also log to stderr
    #[arg(short, long)]
    foreground: bool,
}

/// Tracing layer that copies WARN and ERROR lines onto the status board.
struct StatusLayer {
    board: Arc<StatusBoard>,
}

impl<S> tracing_subscriber::Layer<S> for StatusLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut line = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut line);
        event.record(&mut visitor);
        self.board.push_warning(line);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(board: Arc<StatusBoard>, foreground: bool) -> anyhow::Result<PathBuf> {
    let log_path = vwall_core::platform::log_path();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = foreground.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(StatusLayer { board })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,vwall_daemon=debug,vwall_core=debug")
            }),
        )
        .init();

    Ok(log_path)
}

fn print_check(config: &Config) {
    println!("backend: {:?}", config.supervisor.backend);
    for channel in &config.channels {
        let live = pipeline::live_description(&channel.live);
        let fallback = pipeline::fallback_description(&channel.fallback);
        println!("[{}]", channel.id);
        println!("  live:     {}", live.redacted());
        println!("  fallback: {}", fallback.redacted());
    }
}

#[cfg(feature = "gstreamer")]
fn init_media(config: &Config) -> anyhow::Result<()> {
    if config.supervisor.backend == Backend::Gstreamer || config.relay.enabled {
        gst::init()?;
    }
    Ok(())
}

#[cfg(not(feature = "gstreamer"))]
fn init_media(_config: &Config) -> anyhow::Result<()> {
    Ok(())
}

/// The returned server must outlive the control loop.
#[cfg(feature = "gstreamer")]
fn start_relay(config: &RelayConfig) -> (relay::GstRelayServer, RelayStatus) {
    let mut server = relay::GstRelayServer::default();
    let status = vwall_core::relay::start_relay(&mut server, config);
    (server, status)
}

#[cfg(not(feature = "gstreamer"))]
fn start_relay(config: &RelayConfig) -> ((), RelayStatus) {
    if !config.enabled {
        return ((), RelayStatus::Disabled);
    }
    warn!("relay: enabled in config but this build has no gstreamer support");
    (
        (),
        RelayStatus::Failed {
            reason: "built without gstreamer support".to_string(),
        },
    )
}

async fn run_wall<F: GraphFactory>(
    config: &Config,
    factory: F,
    board: Arc<StatusBoard>,
    events: UnboundedSender<ControlEvent>,
    rx: UnboundedReceiver<ControlEvent>,
) -> anyhow::Result<ShutdownReason> {
    core::WallCore::new(config, factory, board, events)?.run(rx).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    if args.check {
        print_check(&config);
        return Ok(());
    }

    let board = Arc::new(StatusBoard::new());
    let log_path = init_logging(board.clone(), args.foreground)?;
    info!("Log file: {:?}", log_path);
    info!(
        "Config loaded from: {:?}",
        args.config.clone().unwrap_or_else(Config::config_path)
    );

    init_media(&config)?;
    let (_relay_server, relay_status) = start_relay(&config.relay);
    board.set_relay(relay_status).await;

    // Held until the control loop returns.
    let _http_server = config.http.enabled.then(|| {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            board.clone(),
        )
    });

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ControlEvent>();
    let reason = match config.supervisor.backend {
        Backend::Simulated => {
            info!("Using simulated media graphs");
            run_wall(&config, SimFactory::new(SimMode::Auto), board, tx, rx).await?
        }
        #[cfg(feature = "gstreamer")]
        Backend::Gstreamer => run_wall(&config, gst::GstFactory, board, tx, rx).await?,
        #[cfg(not(feature = "gstreamer"))]
        Backend::Gstreamer => {
            anyhow::bail!(
                "backend \"gstreamer\" requested but this build has no gstreamer support \
                 (rebuild with --features gstreamer, or set backend = \"simulated\")"
            )
        }
    };

    match reason {
        ShutdownReason::CloseRequested => Ok(()),
        ShutdownReason::HardwareFault {
            channel,
            element,
            message,
        } => anyhow::bail!("hardware fault on {} ({}): {}", channel, element, message),
        ShutdownReason::StartupFailure { channel, reason } => {
            anyhow::bail!("{} failed to start: {}", channel, reason)
        }
    }
}
