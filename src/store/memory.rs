use super::traits::{NotificationEntry, Store, UserRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// In-process store backend.
///
/// Nothing survives a restart; used for tests and throwaway runs
/// (`store.backend = "memory"`).
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, UserRecord>,
    registry: BTreeSet<String>,
    thoughts: u64,
    history: VecDeque<NotificationEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_user(&self, username: &str) -> anyhow::Result<Option<UserRecord>> {
        Ok(self.inner.lock().users.get(username).cloned())
    }

    async fn put_user(&self, username: &str, record: &UserRecord) -> anyhow::Result<()> {
        self.inner
            .lock()
            .users
            .insert(username.to_string(), record.clone());
        Ok(())
    }

    async fn add_to_registry(&self, username: &str) -> anyhow::Result<()> {
        self.inner.lock().registry.insert(username.to_string());
        Ok(())
    }

    async fn registry_members(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.inner.lock().registry.iter().cloned().collect())
    }

    async fn increment_system_counter(&self) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock();
        inner.thoughts += 1;
        Ok(inner.thoughts)
    }

    async fn system_counter(&self) -> anyhow::Result<u64> {
        Ok(self.inner.lock().thoughts)
    }

    async fn push_notification(
        &self,
        entry: &NotificationEntry,
        keep: usize,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.history.push_front(entry.clone());
        inner.history.truncate(keep);
        Ok(())
    }

    async fn notifications(&self, limit: usize) -> anyhow::Result<Vec<NotificationEntry>> {
        Ok(self.inner.lock().history.iter().take(limit).cloned().collect())
    }
}
