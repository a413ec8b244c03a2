use crate::channel::{ChannelName, ChannelRegistry};
use crate::config::{Config, DeploymentConfig};
use crate::engine::{EngineSettings, TaskListEngine};
use crate::pages::Pages;
use crate::playback::{PlaybackUrls, resolve};
use crate::provisioner::ChannelProvisioner;
use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

async fn init_media_root(media_root: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(media_root).await?;
    tokio::fs::canonicalize(media_root).await
}

#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<ChannelProvisioner>,
    pub engine: Arc<TaskListEngine>,
    pub deployment: Arc<DeploymentConfig>,
    pub pages: Pages,

    pub media_root: PathBuf,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let deployment = config.deployment()?;
        let media_root = init_media_root(Path::new(&config.media_root)).await?;
        info!(media_root = %media_root.display(), "Media root ready");

        let (engine, restart_rx) = TaskListEngine::new(EngineSettings {
            rtmp_port: config.rtmp_port,
            http_port: config.video_port,
            media_root: media_root.clone(),
            ffmpeg_path: PathBuf::from(&config.ffmpeg_path),
            hot_registration: config.hot_registration,
            max_tasks: config.max_channels,
        });
        let engine = Arc::new(engine);

        let provisioner = Arc::new(ChannelProvisioner::new(
            media_root.clone(),
            ChannelRegistry::new(),
            engine.clone(),
        ));

        let this = Self {
            provisioner,
            engine,
            deployment: Arc::new(deployment),
            pages: Pages::new()?,
            media_root,
        };

        this.handle_restarts(restart_rx);
        Ok(this)
    }

    pub fn media_root(&self) -> &Path {
        self.media_root.as_path()
    }

    pub fn resolve(&self, channel: &ChannelName) -> PlaybackUrls {
        resolve(channel, &self.deployment)
    }

    /// Applies queued engine tasks whenever the engine asks for a restart.
    /// Requests that pile up while a restart runs are folded into it.
    fn handle_restarts(&self, rx: UnboundedReceiver<()>) {
        let engine = self.engine.clone();

        tokio::spawn(async move {
            debug!("Engine restart handler started");
            let mut rx = rx;
            while rx.next().await.is_some() {
                let mut folded = 0;
                while let Ok(Some(())) = rx.try_next() {
                    folded += 1;
                }
                let applied = engine.restart();
                info!(applied, folded, "Engine restart handled");
            }
            debug!("Engine restart handler finished");
        });
    }
}
