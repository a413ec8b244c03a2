pub mod registry;

use crate::error::ProvisionError;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

pub use registry::ChannelRegistry;

pub const MAX_CHANNEL_NAME_LEN: usize = 64;

pub const HLS_SEGMENT_SECONDS: u32 = 2;
pub const HLS_LIST_SIZE: u32 = 3;

/// A caller-supplied channel name that is safe to join onto the media root.
///
/// Only ASCII letters, digits, `_` and `-` are accepted, so separators,
/// `..` segments and absolute forms can never reach a path join.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn parse(raw: &str) -> Result<Self, ProvisionError> {
        if raw.is_empty()
            || raw.len() > MAX_CHANNEL_NAME_LEN
            || !raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(ProvisionError::InvalidChannelName(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `{media_root}/{name}`
    pub fn directory(&self, media_root: &Path) -> PathBuf {
        media_root.join(&self.0)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Mp4Flags {
    pub frag_keyframe: bool,
    pub empty_moov: bool,
}

impl Default for Mp4Flags {
    fn default() -> Self {
        Self {
            frag_keyframe: true,
            empty_moov: true,
        }
    }
}

/// Packaging task the engine runs for one channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskDescriptor {
    pub app_name: String,
    pub hls_enabled: bool,
    pub hls_segment_seconds: u32,
    pub hls_list_size: u32,
    pub hls_delete_segments: bool,
    pub dash_enabled: bool,
    pub mp4_enabled: bool,
    pub mp4_fragment_flags: Mp4Flags,
    pub media_root: PathBuf,
}

impl TaskDescriptor {
    pub fn for_channel(channel: &ChannelName, directory: PathBuf) -> Self {
        Self {
            app_name: channel.to_string(),
            hls_enabled: true,
            hls_segment_seconds: HLS_SEGMENT_SECONDS,
            hls_list_size: HLS_LIST_SIZE,
            hls_delete_segments: true,
            dash_enabled: true,
            mp4_enabled: true,
            mp4_fragment_flags: Mp4Flags::default(),
            media_root: directory,
        }
    }

    /// Muxer options in the engine's bracketed form,
    /// e.g. `[hls_time=2:hls_list_size=3:hls_flags=delete_segments]`.
    pub fn hls_flags(&self) -> String {
        let mut flags = format!(
            "[hls_time={}:hls_list_size={}",
            self.hls_segment_seconds, self.hls_list_size
        );
        if self.hls_delete_segments {
            flags.push_str(":hls_flags=delete_segments");
        }
        flags.push(']');
        flags
    }

    pub fn mp4_flags(&self) -> String {
        let mut movflags = Vec::with_capacity(2);
        if self.mp4_fragment_flags.frag_keyframe {
            movflags.push("frag_keyframe");
        }
        if self.mp4_fragment_flags.empty_moov {
            movflags.push("empty_moov");
        }
        if movflags.is_empty() {
            return String::new();
        }
        format!("[movflags={}]", movflags.join("+"))
    }
}
