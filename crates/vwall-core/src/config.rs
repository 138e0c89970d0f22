use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::graph::{ErrorCategory, SurfaceHandle};
use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub errors: ErrorPolicy,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelConfig>,
}

/// Which media backend drives the graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Gstreamer,
    /// In-memory graphs that walk through their state ladder on request.
    /// Useful to dry-run a configuration on a machine without the hardware.
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Fixed delay between a live-source failure and the next build attempt.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Pause between the fallback loop's end-of-stream and its restart.
    #[serde(default = "default_loop_restart_pause_ms")]
    pub loop_restart_pause_ms: u64,
    /// How often position/duration of live graphs are queried.
    #[serde(default = "default_query_interval_ms")]
    pub query_interval_ms: u64,
}

impl SupervisorConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn loop_restart_pause(&self) -> Duration {
        Duration::from_millis(self.loop_restart_pause_ms)
    }

    pub fn query_interval(&self) -> Duration {
        Duration::from_millis(self.query_interval_ms)
    }
}

/// Which elements' errors are transient network trouble and which are
/// hardware failures. Matched against element factory names (e.g.
/// `rtspsrc`), never against free-form error text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPolicy {
    #[serde(default = "default_transport_elements")]
    pub transport_elements: Vec<String>,
    #[serde(default = "default_fatal_elements")]
    pub fatal_elements: Vec<String>,
}

impl ErrorPolicy {
    /// Classify an error by the factory names of the posting element and its
    /// ancestors, innermost first. The first element found in either list
    /// decides; elements in neither list are skipped.
    pub fn classify<'a>(&self, factories: impl IntoIterator<Item = &'a str>) -> ErrorCategory {
        for factory in factories {
            if self.fatal_elements.iter().any(|f| f == factory) {
                return ErrorCategory::Hardware;
            }
            if self.transport_elements.iter().any(|f| f == factory) {
                return ErrorCategory::Transport;
            }
        }
        ErrorCategory::Unclassified
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_relay_address")]
    pub address: String,
    #[serde(default = "default_relay_port")]
    pub port: u16,
    #[serde(default = "default_relay_mount")]
    pub mount: String,
    /// Capture-to-payload launch line. Must contain a payloader named `pay0`.
    #[serde(default = "default_relay_launch")]
    pub launch: String,
    /// One capture session shared by every connecting client.
    #[serde(default = "default_true")]
    pub shared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    /// Delay before the first live connect attempt after the surface is ready.
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Native window handle to render into. Absent: sinks open their own window.
    #[serde(default)]
    pub surface: Option<SurfaceHandle>,
    pub live: LiveSource,
    pub fallback: FallbackSource,
}

impl ChannelConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

/// The network camera feed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LiveSource {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_pw: Option<String>,
    #[serde(default)]
    pub latency_ms: u32,
    #[serde(default = "default_jitter_latency_ms")]
    pub jitter_latency_ms: u32,
    #[serde(default = "default_framerate")]
    pub framerate: String,
    #[serde(default = "default_decoder")]
    pub decoder: String,
    #[serde(default = "default_sink")]
    pub sink: String,
    /// Full description override; the fields above are ignored when set.
    #[serde(default)]
    pub pipeline: Option<String>,
}

/// The local loop shown while the live feed is down.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FallbackSource {
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default = "default_decoder")]
    pub decoder: String,
    #[serde(default = "default_sink")]
    pub sink: String,
    #[serde(default)]
    pub crop: Option<Crop>,
    #[serde(default)]
    pub pipeline: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Crop {
    #[serde(default)]
    pub right: u32,
    #[serde(default)]
    pub bottom: u32,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no channels configured")]
    NoChannels,
    #[error("channel #{0} has an empty id")]
    EmptyId(usize),
    #[error("duplicate channel id '{0}'")]
    DuplicateId(String),
    #[error("channel '{0}': live source needs a location or a pipeline")]
    MissingLiveSource(String),
    #[error("channel '{0}': fallback needs a path or a pipeline")]
    MissingFallback(String),
    #[error("reconnect delay must be at least one second")]
    ZeroReconnectDelay,
    #[error("query interval must be at least one millisecond")]
    ZeroQueryInterval,
    #[error("relay mount '{0}' must start with '/'")]
    BadMount(String),
    #[error("relay launch line needs a payloader named pay0")]
    MissingPayloader,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            loop_restart_pause_ms: default_loop_restart_pause_ms(),
            query_interval_ms: default_query_interval_ms(),
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            transport_elements: default_transport_elements(),
            fatal_elements: default_fatal_elements(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_relay_address(),
            port: default_relay_port(),
            mount: default_relay_mount(),
            launch: default_relay_launch(),
            shared: true,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay_secs() -> u64 {
    10
}

fn default_loop_restart_pause_ms() -> u64 {
    500
}

fn default_query_interval_ms() -> u64 {
    1000
}

fn default_initial_delay_secs() -> u64 {
    5
}

fn default_jitter_latency_ms() -> u32 {
    10
}

fn default_framerate() -> String {
    "30/1".to_string()
}

fn default_decoder() -> String {
    "omxh264dec".to_string()
}

fn default_sink() -> String {
    "glimagesink".to_string()
}

fn default_transport_elements() -> Vec<String> {
    ["rtspsrc", "rtpjitterbuffer", "rtph264depay", "udpsrc", "tcpclientsrc", "souphttpsrc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_fatal_elements() -> Vec<String> {
    ["omxh264dec", "omxh264enc", "v4l2h264dec", "v4l2h264enc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_relay_address() -> String {
    "0.0.0.0".to_string()
}

fn default_relay_port() -> u16 {
    platform::DEFAULT_RTSP_PORT
}

fn default_relay_mount() -> String {
    "/test".to_string()
}

fn default_relay_launch() -> String {
    "v4l2src ! video/x-raw, width=1920, height=1080, framerate=30/1 \
     ! queue max-size-buffers=1 leaky=downstream ! omxh264enc \
     ! video/x-h264, stream-format=byte-stream, alignment=au, profile=high \
     ! h264parse ! rtph264pay name=pay0 pt=96"
        .to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    platform::DEFAULT_STATUS_PORT
}

/// A two-screen wall, one camera per screen, both looping the same clip
/// while their camera is away.
fn default_channels() -> Vec<ChannelConfig> {
    let fallback = FallbackSource {
        path: PathBuf::from("/home/pi/test.h264"),
        decoder: default_decoder(),
        sink: default_sink(),
        crop: Some(Crop {
            right: 275,
            bottom: 75,
        }),
        pipeline: None,
    };
    let live = |location: &str| LiveSource {
        location: location.to_string(),
        jitter_latency_ms: default_jitter_latency_ms(),
        framerate: default_framerate(),
        decoder: default_decoder(),
        sink: default_sink(),
        ..LiveSource::default()
    };
    vec![
        ChannelConfig {
            id: "left".to_string(),
            initial_delay_secs: 10,
            surface: None,
            live: live("rtsp://192.168.1.10:8554/test"),
            fallback: fallback.clone(),
        },
        ChannelConfig {
            id: "right".to_string(),
            initial_delay_secs: 5,
            surface: None,
            live: live("rtsp://192.168.1.11:8554/test"),
            fallback,
        },
    ]
}

impl Config {
    /// Load from `path` (or the default location). A missing file is
    /// replaced by the defaults, which are written out for editing.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        if !config_path.exists() {
            let config = Self::default();
            config.save(&config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if self.supervisor.reconnect_delay_secs == 0 {
            return Err(ConfigError::ZeroReconnectDelay);
        }
        if self.supervisor.query_interval_ms == 0 {
            return Err(ConfigError::ZeroQueryInterval);
        }

        let mut seen = HashSet::new();
        for (idx, channel) in self.channels.iter().enumerate() {
            if channel.id.trim().is_empty() {
                return Err(ConfigError::EmptyId(idx));
            }
            if !seen.insert(channel.id.as_str()) {
                return Err(ConfigError::DuplicateId(channel.id.clone()));
            }
            if channel.live.pipeline.is_none() && channel.live.location.trim().is_empty() {
                return Err(ConfigError::MissingLiveSource(channel.id.clone()));
            }
            if channel.fallback.pipeline.is_none() && channel.fallback.path.as_os_str().is_empty() {
                return Err(ConfigError::MissingFallback(channel.id.clone()));
            }
        }

        if self.relay.enabled {
            if !self.relay.mount.starts_with('/') {
                return Err(ConfigError::BadMount(self.relay.mount.clone()));
            }
            if !self.relay.launch.contains("name=pay0") {
                return Err(ConfigError::MissingPayloader);
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            errors: ErrorPolicy::default(),
            relay: RelayConfig::default(),
            http: HttpConfig::default(),
            channels: default_channels(),
        }
    }
}
