//! Adapter around the streaming-media engine's task list.
//!
//! The engine owns RTMP ingest and the transcode/packaging work; this side
//! only maintains the configuration document it consumes. All task-list
//! mutation goes through [`MediaEngine::append_task`].

use crate::channel::TaskDescriptor;
use crate::error::EngineError;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const RTMP_CHUNK_SIZE: u32 = 60000;
pub const RTMP_PING_SECS: u32 = 10;
pub const RTMP_PING_TIMEOUT_SECS: u32 = 30;

/// Where an appended task landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Live in the running task list.
    Active,
    /// Waiting for the next engine restart.
    Queued,
}

pub trait MediaEngine: Send + Sync {
    /// Begin accepting ingest connections and running registered tasks.
    fn start(&self);

    fn append_task(&self, task: &TaskDescriptor) -> Result<Admission, EngineError>;

    /// Tasks the engine is currently running
    fn tasks(&self) -> Vec<EngineTask>;
}

/// A task in the engine's wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineTask {
    pub app: String,
    pub hls: bool,
    pub hls_flags: String,
    pub dash: bool,
    pub mp4: bool,
    pub mp4_flags: String,
    pub media_root: PathBuf,
}

impl From<&TaskDescriptor> for EngineTask {
    fn from(task: &TaskDescriptor) -> Self {
        Self {
            app: task.app_name.clone(),
            hls: task.hls_enabled,
            hls_flags: task.hls_flags(),
            dash: task.dash_enabled,
            mp4: task.mp4_enabled,
            mp4_flags: task.mp4_flags(),
            media_root: task.media_root.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RtmpSettings {
    pub port: u16,
    pub chunk_size: u32,
    pub gop_cache: bool,
    pub ping: u32,
    pub ping_timeout: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpSettings {
    pub port: u16,
    pub allow_origin: String,
    pub mediaroot: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransSettings {
    pub ffmpeg: PathBuf,
    pub tasks: Vec<EngineTask>,
}

/// Configuration document consumed by the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub rtmp: RtmpSettings,
    pub http: HttpSettings,
    pub trans: TransSettings,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub rtmp_port: u16,
    pub http_port: u16,
    pub media_root: PathBuf,
    pub ffmpeg_path: PathBuf,
    /// Whether tasks appended after `start` take effect without a restart.
    pub hot_registration: bool,
    pub max_tasks: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub started: bool,
    pub generation: u64,
    pub hot_registration: bool,
    pub pending: Vec<EngineTask>,
    pub config: EngineConfig,
}

#[derive(Debug)]
struct EngineState {
    started: bool,
    generation: u64,
    config: EngineConfig,
    pending: Vec<EngineTask>,
}

impl EngineState {
    fn contains(&self, app: &str) -> bool {
        self.config.trans.tasks.iter().any(|t| t.app == app)
            || self.pending.iter().any(|t| t.app == app)
    }

    fn task_count(&self) -> usize {
        self.config.trans.tasks.len() + self.pending.len()
    }
}

/// In-process owner of the engine's task list.
///
/// When hot registration is disabled, tasks appended after `start` are queued
/// and a restart request is emitted; [`TaskListEngine::restart`] applies them.
#[derive(Debug)]
pub struct TaskListEngine {
    state: Mutex<EngineState>,
    hot_registration: bool,
    max_tasks: Option<usize>,
    restart_tx: UnboundedSender<()>,
    config_tx: watch::Sender<EngineConfig>,
}

impl TaskListEngine {
    pub fn new(settings: EngineSettings) -> (Self, UnboundedReceiver<()>) {
        let config = EngineConfig {
            rtmp: RtmpSettings {
                port: settings.rtmp_port,
                chunk_size: RTMP_CHUNK_SIZE,
                gop_cache: true,
                ping: RTMP_PING_SECS,
                ping_timeout: RTMP_PING_TIMEOUT_SECS,
            },
            http: HttpSettings {
                port: settings.http_port,
                allow_origin: "*".to_string(),
                mediaroot: settings.media_root,
            },
            trans: TransSettings {
                ffmpeg: settings.ffmpeg_path,
                tasks: Vec::new(),
            },
        };

        let (restart_tx, restart_rx) = unbounded();
        let (config_tx, _) = watch::channel(config.clone());

        let this = Self {
            state: Mutex::new(EngineState {
                started: false,
                generation: 0,
                config,
                pending: Vec::new(),
            }),
            hot_registration: settings.hot_registration,
            max_tasks: settings.max_tasks,
            restart_tx,
            config_tx,
        };
        (this, restart_rx)
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &EngineState) {
        self.config_tx.send_replace(state.config.clone());
    }

    /// Receives the engine document every time the running task list changes.
    pub fn subscribe(&self) -> watch::Receiver<EngineConfig> {
        self.config_tx.subscribe()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.lock();
        EngineSnapshot {
            started: state.started,
            generation: state.generation,
            hot_registration: self.hot_registration,
            pending: state.pending.clone(),
            config: state.config.clone(),
        }
    }

    pub fn pending(&self) -> Vec<EngineTask> {
        self.lock().pending.clone()
    }

    /// Moves queued tasks into the running list and bumps the generation.
    /// Returns how many tasks were applied.
    pub fn restart(&self) -> usize {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return 0;
        }

        let pending = std::mem::take(&mut state.pending);
        let applied = pending.len();
        state.config.trans.tasks.extend(pending);
        state.generation += 1;
        info!(
            applied,
            generation = state.generation,
            "Engine restarted with queued tasks"
        );
        self.publish(&state);
        applied
    }
}

impl MediaEngine for TaskListEngine {
    fn start(&self) {
        let mut state = self.lock();
        if state.started {
            debug!("Engine already started");
            return;
        }

        state.started = true;
        state.generation = 1;
        info!(
            rtmp_port = state.config.rtmp.port,
            http_port = state.config.http.port,
            tasks = state.config.trans.tasks.len(),
            "Engine started"
        );
        self.publish(&state);
    }

    fn append_task(&self, task: &TaskDescriptor) -> Result<Admission, EngineError> {
        let mut state = self.lock();
        if state.contains(&task.app_name) {
            return Err(EngineError::DuplicateApp(task.app_name.clone()));
        }
        if let Some(max) = self.max_tasks
            && state.task_count() >= max
        {
            return Err(EngineError::CapacityExceeded(max));
        }

        let task = EngineTask::from(task);
        if state.started && !self.hot_registration {
            info!(app = %task.app, "Task queued until engine restart");
            if let Err(error) = self.restart_tx.unbounded_send(()) {
                warn!(app = %task.app, %error, "Restart handler gone, task stays queued");
            }
            state.pending.push(task);
            return Ok(Admission::Queued);
        }

        info!(app = %task.app, "Task appended");
        state.config.trans.tasks.push(task);
        self.publish(&state);
        Ok(Admission::Active)
    }

    fn tasks(&self) -> Vec<EngineTask> {
        self.lock().config.trans.tasks.clone()
    }
}
