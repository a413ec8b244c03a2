use crate::channel::{ChannelName, ChannelRegistry, TaskDescriptor};
use crate::engine::MediaEngine;
use crate::error::ProvisionError;
use dashmap::DashMap;
use std::future::Future;
use std::io::ErrorKind as StdIoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

const DIR_CREATE_ATTEMPTS: usize = 2;

/// Result of a provisioning call
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub descriptor: Arc<TaskDescriptor>,
    /// `true` only for the call that registered the channel.
    pub created: bool,
}

/// Registers channels: validates the name, creates `{media_root}/{name}`,
/// hands the task to the engine and records it in the registry.
///
/// First-time requests for one name are serialized by a per-name creation
/// lock; the registry lock itself is only taken for the state transition.
/// Everything from directory creation to registration runs on its own task,
/// so a caller that goes away cannot leave the engine and registry disagreeing.
#[derive(Clone)]
pub struct ChannelProvisioner {
    media_root: PathBuf,
    registry: ChannelRegistry,
    engine: Arc<dyn MediaEngine>,
    creation_locks: Arc<DashMap<String, Arc<TokioMutex<()>>>>,
}

impl ChannelProvisioner {
    pub fn new(media_root: PathBuf, registry: ChannelRegistry, engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            media_root,
            registry,
            engine,
            creation_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Validates an untrusted name, then provisions it.
    pub async fn provision(&self, raw: &str) -> Result<Provisioned, ProvisionError> {
        let channel = ChannelName::parse(raw)
            .inspect_err(|_| warn!(channel = ?raw, "Rejected channel name"))?;
        self.provision_channel(&channel).await
    }

    pub async fn provision_channel(
        &self,
        channel: &ChannelName,
    ) -> Result<Provisioned, ProvisionError> {
        if let Some(descriptor) = self.registry.get(channel).await {
            debug!(%channel, "Channel already provisioned");
            return Ok(Provisioned {
                descriptor,
                created: false,
            });
        }

        let lock = self
            .creation_locks
            .entry(channel.to_string())
            .or_default()
            .value()
            .clone();
        let guard = lock.lock_owned().await;

        let this = self.clone();
        let owned = channel.clone();
        let handle = tokio::spawn(async move { this.provision_locked(&owned, guard).await });

        match handle.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                std::panic::resume_unwind(join_error.into_panic())
            }
            Err(join_error) => {
                error!(%channel, %join_error, "Provisioning task did not finish");
                Err(ProvisionError::Interrupted(channel.to_string()))
            }
        }
    }

    async fn provision_locked(
        &self,
        channel: &ChannelName,
        guard: OwnedMutexGuard<()>,
    ) -> Result<Provisioned, ProvisionError> {
        let result = self.register_new(channel).await;
        drop(guard);

        // Only drop the entry when no waiter still holds the lock
        self.creation_locks
            .remove_if(channel.as_str(), |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn register_new(&self, channel: &ChannelName) -> Result<Provisioned, ProvisionError> {
        // Re-check after acquiring lock
        if let Some(descriptor) = self.registry.get(channel).await {
            debug!(%channel, "Channel provisioned by concurrent request");
            return Ok(Provisioned {
                descriptor,
                created: false,
            });
        }

        let directory = channel.directory(&self.media_root);
        let newly_created = create_channel_dir(&directory).await.map_err(|source| {
            ProvisionError::DirectoryCreationFailure {
                channel: channel.to_string(),
                source,
            }
        })?;
        info!(%channel, newly_created, directory = %directory.display(), "Channel directory ready");

        let descriptor = TaskDescriptor::for_channel(channel, directory.clone());

        let admission = match self.engine.append_task(&descriptor) {
            Ok(admission) => admission,
            Err(source) => {
                warn!(%channel, %source, "Engine refused task, rolling back");
                if newly_created
                    && let Err(error) = tokio::fs::remove_dir(&directory).await
                {
                    warn!(%channel, %error, "Failed to remove channel directory");
                }
                return Err(ProvisionError::EngineRegistrationFailure {
                    channel: channel.to_string(),
                    source,
                });
            }
        };

        let (descriptor, created) = self
            .registry
            .register_if_absent(channel, move || descriptor)
            .await;

        info!(%channel, ?admission, created, "Channel provisioned");
        Ok(Provisioned {
            descriptor,
            created,
        })
    }
}

async fn create_channel_dir(directory: &Path) -> std::io::Result<bool> {
    create_dir_with_retry(directory, |dir| tokio::fs::create_dir(dir)).await
}

/// Creates the channel directory with `create`, retrying once on failure.
/// Returns whether this call created it.
async fn create_dir_with_retry<F, Fut>(directory: &Path, mut create: F) -> std::io::Result<bool>
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut attempt = 1;
    loop {
        match create(directory.to_path_buf()).await {
            Ok(()) => return Ok(true),
            Err(error) if error.kind() == StdIoErrorKind::AlreadyExists => {
                if tokio::fs::metadata(directory).await?.is_dir() {
                    return Ok(false);
                }
                return Err(std::io::Error::new(
                    StdIoErrorKind::AlreadyExists,
                    format!("{} exists and is not a directory", directory.display()),
                ));
            }
            Err(error) if attempt < DIR_CREATE_ATTEMPTS => {
                warn!(%error, directory = %directory.display(), attempt, "Retrying directory creation");
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Admission, EngineSettings, EngineTask, TaskListEngine};
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};

    fn build(max_tasks: Option<usize>) -> (Arc<ChannelProvisioner>, Arc<TaskListEngine>, TempDir) {
        let media = tempdir().expect("create tempdir");
        let (engine, _restart_rx) = TaskListEngine::new(EngineSettings {
            rtmp_port: 1935,
            http_port: 8000,
            media_root: media.path().to_path_buf(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            hot_registration: true,
            max_tasks,
        });
        let engine = Arc::new(engine);
        engine.start();

        let provisioner = Arc::new(ChannelProvisioner::new(
            media.path().to_path_buf(),
            ChannelRegistry::new(),
            engine.clone(),
        ));
        (provisioner, engine, media)
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).expect("read media root").count()
    }

    /// Engine that refuses every task
    struct RefusingEngine;

    impl MediaEngine for RefusingEngine {
        fn start(&self) {}

        fn append_task(&self, _task: &TaskDescriptor) -> Result<Admission, EngineError> {
            Err(EngineError::CapacityExceeded(0))
        }

        fn tasks(&self) -> Vec<EngineTask> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn first_request_creates_directory_and_task() {
        let (provisioner, engine, media) = build(None);

        let provisioned = provisioner.provision("teamA").await.unwrap();
        assert!(provisioned.created);

        let descriptor = provisioned.descriptor;
        assert_eq!(descriptor.app_name, "teamA");
        assert!(descriptor.hls_enabled);
        assert!(descriptor.mp4_enabled);
        assert_eq!(descriptor.media_root, media.path().join("teamA"));
        assert!(media.path().join("teamA").is_dir());

        let tasks = engine.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].app, "teamA");
    }

    #[tokio::test]
    async fn repeated_provisioning_is_idempotent() {
        let (provisioner, engine, _media) = build(None);

        let first = provisioner.provision("teamA").await.unwrap();
        let second = provisioner.provision("teamA").await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(*first.descriptor, *second.descriptor);
        assert_eq!(engine.tasks().iter().filter(|t| t.app == "teamA").count(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_register_once() {
        let (provisioner, engine, media) = build(None);

        let mut handles = Vec::new();
        for _ in 0..64 {
            let provisioner = provisioner.clone();
            handles.push(tokio::spawn(async move { provisioner.provision("x").await }));
        }

        let mut created = 0;
        let mut descriptors = Vec::new();
        for handle in handles {
            let provisioned = handle.await.unwrap().unwrap();
            if provisioned.created {
                created += 1;
            }
            descriptors.push(provisioned.descriptor);
        }

        assert_eq!(created, 1);
        assert!(descriptors.iter().all(|d| Arc::ptr_eq(d, &descriptors[0])));
        assert_eq!(engine.tasks().len(), 1);
        assert_eq!(entries(media.path()), 1);
        assert!(provisioner.creation_locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_channels_do_not_interfere() {
        let (provisioner, engine, media) = build(None);

        let (a, b) = tokio::join!(provisioner.provision("teamA"), provisioner.provision("teamB"));
        let a = a.unwrap();
        b.unwrap();

        let again = provisioner.provision("teamA").await.unwrap();
        assert_eq!(*a.descriptor, *again.descriptor);
        assert_eq!(a.descriptor.media_root, media.path().join("teamA"));
        assert_eq!(engine.tasks().len(), 2);
        assert_eq!(provisioner.registry().list().await, vec!["teamA", "teamB"]);
    }

    #[tokio::test]
    async fn traversal_names_touch_nothing() {
        let (_, engine, media) = build(None);
        let inner = media.path().join("inner");
        std::fs::create_dir(&inner).unwrap();
        let provisioner = ChannelProvisioner::new(inner.clone(), ChannelRegistry::new(), engine.clone());

        for name in ["", "..", "../secrets", "a/b", "/abs", "a\\b", "..%2F"] {
            let err = provisioner.provision(name).await.unwrap_err();
            assert!(matches!(err, ProvisionError::InvalidChannelName(_)), "{name:?}");
            assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        }

        assert_eq!(entries(&inner), 0);
        assert_eq!(entries(media.path()), 1);
        assert!(engine.tasks().is_empty());
        assert!(provisioner.registry().is_empty().await);
    }

    #[tokio::test]
    async fn existing_directory_is_reused() {
        let (provisioner, engine, media) = build(None);
        std::fs::create_dir(media.path().join("teamA")).unwrap();
        std::fs::write(media.path().join("teamA").join("index.m3u8"), b"#EXTM3U").unwrap();

        let provisioned = provisioner.provision("teamA").await.unwrap();
        assert!(provisioned.created);
        assert_eq!(engine.tasks().len(), 1);
        assert!(media.path().join("teamA").join("index.m3u8").exists());
    }

    #[tokio::test]
    async fn directory_failure_surfaces_after_retry() {
        let (_, engine, media) = build(None);
        let not_a_dir = media.path().join("file");
        std::fs::write(&not_a_dir, b"").unwrap();
        let provisioner = ChannelProvisioner::new(not_a_dir, ChannelRegistry::new(), engine.clone());

        let err = provisioner.provision("teamA").await.unwrap_err();
        assert!(matches!(err, ProvisionError::DirectoryCreationFailure { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(engine.tasks().is_empty());
        assert!(!provisioner.registry().exists(&ChannelName::parse("teamA").unwrap()).await);
    }

    #[tokio::test]
    async fn engine_refusal_rolls_back_new_directory() {
        let media = tempdir().unwrap();
        let provisioner = ChannelProvisioner::new(
            media.path().to_path_buf(),
            ChannelRegistry::new(),
            Arc::new(RefusingEngine),
        );

        let err = provisioner.provision("teamA").await.unwrap_err();
        assert!(matches!(err, ProvisionError::EngineRegistrationFailure { .. }));
        assert!(!media.path().join("teamA").exists());
        assert!(provisioner.registry().is_empty().await);
    }

    #[tokio::test]
    async fn engine_refusal_keeps_preexisting_directory() {
        let (provisioner, _engine, media) = build(Some(1));
        provisioner.provision("teamA").await.unwrap();
        std::fs::create_dir(media.path().join("teamB")).unwrap();

        let err = provisioner.provision("teamB").await.unwrap_err();
        assert!(matches!(err, ProvisionError::EngineRegistrationFailure { .. }));
        assert!(media.path().join("teamB").is_dir());
        assert!(!provisioner.registry().exists(&ChannelName::parse("teamB").unwrap()).await);
    }

    #[tokio::test]
    async fn refused_names_leave_no_creation_locks() {
        let (provisioner, engine, _media) = build(Some(1));
        provisioner.provision("teamA").await.unwrap();

        for i in 0..50 {
            let err = provisioner.provision(&format!("overflow-{i}")).await.unwrap_err();
            assert!(matches!(err, ProvisionError::EngineRegistrationFailure { .. }));
        }

        assert!(provisioner.creation_locks.is_empty());
        assert_eq!(engine.tasks().len(), 1);
    }

    #[tokio::test]
    async fn refused_name_can_be_retried() {
        let media = tempdir().unwrap();
        let provisioner = ChannelProvisioner::new(
            media.path().to_path_buf(),
            ChannelRegistry::new(),
            Arc::new(RefusingEngine),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let provisioner = provisioner.clone();
            handles.push(tokio::spawn(async move { provisioner.provision("teamA").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }

        assert!(provisioner.creation_locks.is_empty());
        assert!(!media.path().join("teamA").exists());
    }

    #[tokio::test]
    async fn transient_directory_error_is_retried() {
        let media = tempdir().unwrap();
        let directory = media.path().join("teamA");
        let attempts = AtomicUsize::new(0);

        let created = create_dir_with_retry(&directory, |dir| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt == 1 {
                    return Err(std::io::Error::other("transient"));
                }
                tokio::fs::create_dir(dir).await
            }
        })
        .await
        .unwrap();

        assert!(created);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(directory.is_dir());
    }

    #[tokio::test]
    async fn persistent_directory_error_surfaces_after_two_attempts() {
        let media = tempdir().unwrap();
        let attempts = AtomicUsize::new(0);

        let err = create_dir_with_retry(&media.path().join("teamA"), |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(std::io::Error::other("disk on fire")) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "disk on fire");
        assert_eq!(attempts.load(Ordering::SeqCst), DIR_CREATE_ATTEMPTS);
    }

    #[tokio::test]
    async fn cancelled_caller_still_completes_registration() {
        let (provisioner, engine, media) = build(None);
        let registry = provisioner.registry().clone();

        // Stall the registry insert so the caller can be dropped after the
        // engine accepted the task
        let read = registry.read_guard_for_test().await;
        let caller = {
            let provisioner = provisioner.clone();
            tokio::spawn(async move { provisioner.provision("teamA").await })
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while engine.tasks().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("engine receives the task");

        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        drop(read);

        let retry = provisioner.provision("teamA").await.unwrap();
        assert!(!retry.created);
        assert_eq!(retry.descriptor.media_root, media.path().join("teamA"));
        assert!(registry.exists(&ChannelName::parse("teamA").unwrap()).await);
        assert_eq!(engine.tasks().len(), 1);
        assert!(provisioner.creation_locks.is_empty());
    }
}
