use crate::channel::ChannelName;
use crate::config::DeploymentConfig;
use serde::Serialize;

pub const MANIFEST_FILE: &str = "index.m3u8";

/// Public endpoints of one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackUrls {
    /// Where publishers push the live stream
    pub ingest_url: String,
    /// HLS manifest players load
    pub manifest_url: String,
}

/// Builds the ingest and manifest URLs of `channel`. Pure string templating.
pub fn resolve(channel: &ChannelName, config: &DeploymentConfig) -> PlaybackUrls {
    PlaybackUrls {
        ingest_url: format!("rtmp://{}/{channel}", config.ingest_host()),
        manifest_url: format!("https://{}/{channel}/{MANIFEST_FILE}", config.video_host()),
    }
}
