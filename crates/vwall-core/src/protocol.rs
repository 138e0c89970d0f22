use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::TrackedState;

/// Bump when the status JSON changes in a breaking way.
pub const PROTOCOL_VERSION: u32 = 1;

/// Snapshot of one channel as published on the status API.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChannelStatus {
    pub id: String,
    pub live: TrackedState,
    pub fallback: TrackedState,
    /// True when neither graph has a frame up and the surface shows a
    /// neutral fill.
    pub filler: bool,
    /// An active channel with no frame on screen and none on its way.
    #[serde(default)]
    pub blank: bool,
    pub reconnect_pending: bool,
    /// Build attempts since the live feed last reached PLAYING.
    pub reconnect_attempts: u32,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub position_secs: Option<f64>,
}

impl ChannelStatus {
    /// Short label for dashboards.
    pub fn badge(&self) -> &'static str {
        match (self.live, self.fallback) {
            (TrackedState::Playing, _) => "LIVE",
            (_, f) if f.is_visible() => "LOOP",
            (TrackedState::Failed, _) => "FAIL",
            _ => "WAIT",
        }
    }
}

/// Relay endpoint as seen by clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum RelayStatus {
    #[default]
    Disabled,
    Publishing {
        url: String,
    },
    Failed {
        reason: String,
    },
}

/// Full state of the wall. `rev` increases on every published change.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WallState {
    #[serde(default)]
    pub rev: u64,
    pub protocol_version: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub channels: Vec<ChannelStatus>,
    #[serde(default)]
    pub relay: RelayStatus,
    /// Most recent WARN/ERROR log lines, oldest first.
    #[serde(default)]
    pub recent_warnings: Vec<String>,
    /// Set once shutdown has begun.
    #[serde(default)]
    pub shutting_down: bool,
}

impl WallState {
    /// Every active channel has a frame on screen or on its way.
    pub fn is_healthy(&self) -> bool {
        !self.shutting_down && self.channels.iter().all(|c| !c.blank)
    }
}
