use crate::protocol::{ChannelStatus, RelayStatus, WallState, PROTOCOL_VERSION};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How many WARN/ERROR lines the status API keeps.
pub const RECENT_WARNINGS: usize = 50;

/// Shared, read-mostly view of the wall for the status API. Only the control
/// loop writes channel state; the log layer appends warnings.
pub struct StatusBoard {
    state: Arc<RwLock<WallState>>,
    warnings: std::sync::Mutex<VecDeque<String>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let state = WallState {
            rev: 1,
            protocol_version: PROTOCOL_VERSION,
            started_at: Some(chrono::Utc::now()),
            ..WallState::default()
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            warnings: std::sync::Mutex::new(VecDeque::with_capacity(RECENT_WARNINGS)),
        }
    }

    pub async fn get_state(&self) -> WallState {
        let mut state = self.state.read().await.clone();
        state.recent_warnings = self.recent_warnings();
        state
    }

    /// Replace the channel list. Bumps `rev` only when something changed.
    pub async fn publish_channels(&self, channels: Vec<ChannelStatus>) {
        let mut state = self.state.write().await;
        if state.channels != channels {
            state.channels = channels;
            state.rev += 1;
        }
    }

    pub async fn set_relay(&self, relay: RelayStatus) {
        let mut state = self.state.write().await;
        state.relay = relay;
        state.rev += 1;
    }

    pub async fn set_shutting_down(&self) {
        let mut state = self.state.write().await;
        state.shutting_down = true;
        state.rev += 1;
    }

    /// Append a log line. Callable from any thread, including inside a
    /// tracing layer, so it must not touch the async lock.
    pub fn push_warning(&self, line: String) {
        let mut warnings = self.warnings.lock().unwrap_or_else(|p| p.into_inner());
        if warnings.len() == RECENT_WARNINGS {
            warnings.pop_front();
        }
        warnings.push_back(line);
    }

    pub fn recent_warnings(&self) -> Vec<String> {
        let warnings = self.warnings.lock().unwrap_or_else(|p| p.into_inner());
        warnings.iter().cloned().collect()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
