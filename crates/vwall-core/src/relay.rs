//! Optional RTSP re-publication of a local capture device.
//!
//! Independent of the failover logic: a relay that cannot start is logged
//! and reported, and the wall keeps running.

use std::fmt;

use thiserror::Error;
use tracing::{error, info};

use crate::config::RelayConfig;
use crate::protocol::RelayStatus;

/// Where clients can pull the relayed stream from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    pub address: String,
    pub port: u16,
    pub mount: String,
}

impl RelayEndpoint {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            address: config.address.clone(),
            port: config.port,
            mount: config.mount.clone(),
        }
    }

    pub fn url(&self) -> String {
        format!("rtsp://{}:{}{}", self.address, self.port, self.mount)
    }
}

impl fmt::Display for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to bind {address}:{port}: {reason}")]
    Bind {
        address: String,
        port: u16,
        reason: String,
    },
    #[error("failed to mount {mount}: {reason}")]
    Mount { mount: String, reason: String },
}

/// Backend that publishes a capture launch line at a mount point.
pub trait RelayServer {
    fn publish(&mut self, config: &RelayConfig) -> Result<RelayEndpoint, RelayError>;
}

/// Start the relay if enabled. Never fails; the outcome is returned for the
/// status board.
pub fn start_relay<S: RelayServer>(server: &mut S, config: &RelayConfig) -> RelayStatus {
    if !config.enabled {
        return RelayStatus::Disabled;
    }
    match server.publish(config) {
        Ok(endpoint) => {
            info!("relay: stream ready at {}", endpoint);
            RelayStatus::Publishing {
                url: endpoint.url(),
            }
        }
        Err(e) => {
            error!("relay: {}", e);
            RelayStatus::Failed {
                reason: e.to_string(),
            }
        }
    }
}
