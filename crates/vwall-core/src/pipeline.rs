//! Rendering of media graph descriptions.
//!
//! The supervisor treats descriptions as opaque build inputs; this module is
//! where deployment configuration (camera URI, credentials, loop file,
//! decoder and sink choice) becomes a linear element chain.

use std::fmt::Write;

use crate::config::{FallbackSource, LiveSource};

/// A rendered description plus a variant safe to write to logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    text: String,
    redacted: String,
}

impl Description {
    fn plain(text: String) -> Self {
        Self {
            redacted: text.clone(),
            text,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Same line with credentials masked.
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

/// Quote a property value if the framework's parser would otherwise split it.
fn quote(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '!' || c == '"') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

pub fn live_description(source: &LiveSource) -> Description {
    if let Some(pipeline) = &source.pipeline {
        return Description::plain(pipeline.clone());
    }

    let mut head = format!(
        "rtspsrc location={} latency={} do-retransmission=false",
        quote(&source.location),
        source.latency_ms
    );
    if let Some(user) = &source.user_id {
        let _ = write!(head, " user-id={}", quote(user));
    }
    let mut redacted_head = head.clone();
    if let Some(pw) = &source.user_pw {
        let _ = write!(head, " user-pw={}", quote(pw));
        redacted_head.push_str(" user-pw=***");
    }

    let tail = format!(
        " ! rtpjitterbuffer latency={} drop-on-latency=true mode=2 \
         ! application/x-rtp, encoding-name=H264 ! rtph264depay ! h264parse \
         ! capsfilter caps=\"video/x-h264, stream-format=byte-stream, framerate={}\" \
         ! {} ! {} sync=false async=false",
        source.jitter_latency_ms, source.framerate, source.decoder, source.sink
    );

    Description {
        text: format!("{head}{tail}"),
        redacted: format!("{redacted_head}{tail}"),
    }
}

pub fn fallback_description(source: &FallbackSource) -> Description {
    if let Some(pipeline) = &source.pipeline {
        return Description::plain(pipeline.clone());
    }

    let mut text = format!(
        "multifilesrc location={} loop=true ! h264parse ! {}",
        quote(&source.path.to_string_lossy()),
        source.decoder
    );
    if let Some(crop) = source.crop {
        let _ = write!(text, " ! videocrop right={} bottom={}", crop.right, crop.bottom);
    }
    let _ = write!(text, " ! {} sync=false async=false", source.sink);
    Description::plain(text)
}
