use std::path::PathBuf;

/// Port the status API listens on unless configured otherwise.
pub const DEFAULT_STATUS_PORT: u16 = 8990;

/// Port the RTSP relay publishes on unless configured otherwise.
pub const DEFAULT_RTSP_PORT: u16 = 8554;

const APP_DIR: &str = "videowall";

pub fn data_dir() -> PathBuf {
    // On Linux (the usual video-wall host) stick to ~/.local/share/videowall/
    // so the log sits next to what a systemd user unit expects.
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(not(unix))]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(not(unix))]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn log_path() -> PathBuf {
    data_dir().join("videowall.log")
}
