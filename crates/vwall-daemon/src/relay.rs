//! RTSP relay backed by gst-rtsp-server.
//!
//! The server needs a GLib main loop; it gets one on a dedicated thread with
//! its own context so it never competes with the control loop.

use std::thread::JoinHandle;

use gstreamer::glib;
use gstreamer_rtsp_server as rtsp;
use rtsp::prelude::*;
use tracing::{debug, warn};

use vwall_core::config::RelayConfig;
use vwall_core::relay::{RelayEndpoint, RelayError, RelayServer};

#[derive(Default)]
pub struct GstRelayServer {
    main_loop: Option<glib::MainLoop>,
    thread: Option<JoinHandle<()>>,
}

impl RelayServer for GstRelayServer {
    fn publish(&mut self, config: &RelayConfig) -> Result<RelayEndpoint, RelayError> {
        let endpoint = RelayEndpoint::from_config(config);

        let server = rtsp::RTSPServer::new();
        server.set_address(&config.address);
        server.set_service(&config.port.to_string());

        let mounts = server
            .mount_points()
            .ok_or_else(|| RelayError::Mount {
                mount: config.mount.clone(),
                reason: "server has no mount points".to_string(),
            })?;
        let factory = rtsp::RTSPMediaFactory::new();
        factory.set_launch(&format!("( {} )", config.launch));
        factory.set_shared(config.shared);
        mounts.add_factory(&config.mount, factory);

        let context = glib::MainContext::new();
        server.attach(Some(&context)).map_err(|e| RelayError::Bind {
            address: config.address.clone(),
            port: config.port,
            reason: e.to_string(),
        })?;

        let main_loop = glib::MainLoop::new(Some(&context), false);
        let runner = main_loop.clone();
        let thread = std::thread::Builder::new()
            .name("rtsp-relay".to_string())
            .spawn(move || {
                // Keeps the server (and its listening socket) alive with the loop.
                let _server = server;
                runner.run();
            })
            .map_err(|e| RelayError::Unavailable(e.to_string()))?;

        debug!("relay: main loop running for {}", endpoint);
        self.main_loop = Some(main_loop);
        self.thread = Some(thread);
        Ok(endpoint)
    }
}

impl Drop for GstRelayServer {
    fn drop(&mut self) {
        if let Some(main_loop) = self.main_loop.take() {
            main_loop.quit();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("relay: main loop thread panicked");
            }
        }
    }
}
