use crate::error::ConfigError;
use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure that can be loaded from CLI, environment, or a config file
///
/// Example configuration file content
/// # Live Channels Configuration
///
/// http_port = 8001
/// rtmp_port = 1935
/// video_port = 8000
/// media_root = "./media"
///
/// # Public URL labels: rtmp://{base}-{rtmp_label}.{domain}/{channel}
/// base = "live"
/// domain = "example.com"
/// rtmp_label = "ingest"
/// video_label = "stream"
///
/// # Engine
/// ffmpeg_path = "/usr/bin/ffmpeg"
/// hot_registration = true
/// max_channels = 100
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Port the channel front door listens on
    #[arg(long, env = "HTTP_PORT", default_value_t = 8001)]
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Port the engine accepts RTMP publishers on
    #[arg(long, env = "RTMP_PORT", default_value_t = 1935)]
    #[serde(default = "default_rtmp_port")]
    pub rtmp_port: u16,

    /// Port serving packaged media out of the media root
    #[arg(long, env = "VIDEO_PORT", default_value_t = 8000)]
    #[serde(default = "default_video_port")]
    pub video_port: u16,

    /// Base label shared by the public host names
    #[arg(long, env = "BASE")]
    pub base: Option<String>,

    /// Public domain
    #[arg(long, env = "DOMAIN")]
    pub domain: Option<String>,

    /// Subdomain label of the ingest host
    #[arg(long, env = "RTMP_SUBDOMAIN")]
    pub rtmp_label: Option<String>,

    /// Subdomain label of the playback host
    #[arg(long, env = "VIDEO_SUBDOMAIN")]
    pub video_label: Option<String>,

    /// Directory holding one subdirectory per channel
    #[arg(short, long, env = "MEDIA_ROOT", default_value = "./media")]
    #[serde(default = "default_media_root")]
    pub media_root: String,

    /// ffmpeg binary handed to the engine
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Whether the engine picks up tasks appended while running
    #[arg(long, env = "ENGINE_HOT_REGISTRATION", default_value_t = true, action = clap::ArgAction::Set)]
    #[serde(default = "default_hot_registration")]
    pub hot_registration: bool,

    /// Upper bound on engine tasks (unbounded when unset)
    #[arg(long, env = "MAX_CHANNELS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_channels: Option<usize>,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            rtmp_port: default_rtmp_port(),
            video_port: default_video_port(),
            base: None,
            domain: None,
            rtmp_label: None,
            video_label: None,
            media_root: default_media_root(),
            ffmpeg_path: default_ffmpeg_path(),
            hot_registration: default_hot_registration(),
            max_channels: None,
            config: None,
        }
    }
}

/// Deployment values read once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentConfig {
    pub http_port: u16,
    pub rtmp_port: u16,
    pub video_port: u16,
    pub base: String,
    pub domain: String,
    pub rtmp_label: String,
    pub video_label: String,
}

impl DeploymentConfig {
    /// `{base}-{rtmp_label}.{domain}`
    pub fn ingest_host(&self) -> String {
        format!("{}-{}.{}", self.base, self.rtmp_label, self.domain)
    }

    /// `{base}-{video_label}.{domain}`
    pub fn video_host(&self) -> String {
        format!("{}-{}.{}", self.base, self.video_label, self.domain)
    }
}

impl Config {
    /// Load configuration from CLI args and environment, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        if self.http_port == default_http_port() {
            self.http_port = file_config.http_port;
        }
        if self.rtmp_port == default_rtmp_port() {
            self.rtmp_port = file_config.rtmp_port;
        }
        if self.video_port == default_video_port() {
            self.video_port = file_config.video_port;
        }
        if self.media_root == default_media_root() {
            self.media_root = file_config.media_root;
        }
        if self.ffmpeg_path == default_ffmpeg_path() {
            self.ffmpeg_path = file_config.ffmpeg_path;
        }
        if self.hot_registration == default_hot_registration() {
            self.hot_registration = file_config.hot_registration;
        }

        if self.base.is_none() {
            self.base = file_config.base;
        }
        if self.domain.is_none() {
            self.domain = file_config.domain;
        }
        if self.rtmp_label.is_none() {
            self.rtmp_label = file_config.rtmp_label;
        }
        if self.video_label.is_none() {
            self.video_label = file_config.video_label;
        }
        if self.max_channels.is_none() {
            self.max_channels = file_config.max_channels;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.deployment().map(|_| ())
    }

    /// Immutable deployment values for URL resolution
    pub fn deployment(&self) -> Result<DeploymentConfig, ConfigError> {
        let base = required(&self.base, "base")?;
        let domain = required(&self.domain, "domain")?;
        let rtmp_label = required(&self.rtmp_label, "rtmp_label")?;
        let video_label = required(&self.video_label, "video_label")?;

        if self.http_port != 0 && self.http_port == self.video_port {
            return Err(ConfigError::Invalid(format!(
                "http_port and video_port must differ (both {})",
                self.http_port
            )));
        }
        if self.media_root.is_empty() {
            return Err(ConfigError::Invalid("media_root cannot be empty".into()));
        }
        if self.max_channels == Some(0) {
            return Err(ConfigError::Invalid("max_channels must be at least 1".into()));
        }

        Ok(DeploymentConfig {
            http_port: self.http_port,
            rtmp_port: self.rtmp_port,
            video_port: self.video_port,
            base,
            domain,
            rtmp_label,
            video_label,
        })
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, ConfigError> {
    let value = value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(field))?;

    if value.contains(|c: char| c.is_whitespace() || c == '/' || c == ':') {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a bare host label, got {value:?}"
        )));
    }
    Ok(value.to_string())
}

// Default value functions
fn default_http_port() -> u16 {
    8001
}

fn default_rtmp_port() -> u16 {
    1935
}

fn default_video_port() -> u16 {
    8000
}

fn default_media_root() -> String {
    "./media".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_hot_registration() -> bool {
    true
}
