use super::{ChannelName, TaskDescriptor};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock as TokioRwLock;
use tracing::debug;

/// Authoritative map of channel name to task descriptor.
///
/// Entries are never removed: a channel stays registered for the lifetime of
/// the process.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<TokioRwLock<BTreeMap<String, Arc<TaskDescriptor>>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the descriptor produced by `builder` unless `name` is already
    /// registered. Returns the stored descriptor and whether this call created it.
    ///
    /// `builder` runs inside the write lock and must not block.
    pub async fn register_if_absent<F>(
        &self,
        name: &ChannelName,
        builder: F,
    ) -> (Arc<TaskDescriptor>, bool)
    where
        F: FnOnce() -> TaskDescriptor,
    {
        let mut channels = self.channels.write().await;
        if let Some(existing) = channels.get(name.as_str()) {
            debug!(channel = %name, "Channel already registered");
            return (existing.clone(), false);
        }

        let descriptor = Arc::new(builder());
        channels.insert(name.to_string(), descriptor.clone());
        debug!(channel = %name, total = channels.len(), "Channel registered");
        (descriptor, true)
    }

    pub async fn get(&self, name: &ChannelName) -> Option<Arc<TaskDescriptor>> {
        self.channels.read().await.get(name.as_str()).cloned()
    }

    pub async fn exists(&self, name: &ChannelName) -> bool {
        self.channels.read().await.contains_key(name.as_str())
    }

    /// Registered names in ascending order
    pub async fn list(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Blocks writers while held
    #[cfg(test)]
    pub(crate) async fn read_guard_for_test(
        &self,
    ) -> tokio::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<TaskDescriptor>>> {
        self.channels.read().await
    }
}
