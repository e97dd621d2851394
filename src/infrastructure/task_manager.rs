use std::collections::HashMap;
use std::hash::Hash;
use tokio::task::JoinHandle;

/// Tracks background tasks by key; spawning under an existing key replaces it.
pub struct TaskManager<K> {
    handles: HashMap<K, JoinHandle<()>>,
}

impl<K: Eq + Hash> TaskManager<K> {
    /// Create a new empty task manager
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }

    /// Spawn a task under `key`, aborting any task already tracked there
    pub fn spawn<F>(&mut self, key: K, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        if let Some(previous) = self.handles.insert(key, handle) {
            previous.abort();
        }
    }

    /// Abort the task under `key`. Returns false if nothing was tracked there.
    pub fn abort(&mut self, key: &K) -> bool {
        match self.handles.remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.handles
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn len(&self) -> usize {
        self.handles.values().filter(|h| !h.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort all tasks without waiting
    pub fn abort_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl<K: Eq + Hash> Default for TaskManager<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for TaskManager<K> {
    fn drop(&mut self) {
        for handle in self.handles.values() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_spawn_replaces_task_under_same_key() {
        let mut tasks = TaskManager::new();
        tasks.spawn("tick", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        tasks.spawn("tick", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        tokio::task::yield_now().await;
        assert_eq!(tasks.len(), 1);

        assert!(tasks.abort(&"tick"));
        assert!(!tasks.abort(&"tick"));
        assert!(tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_all_clears_everything() {
        let mut tasks = TaskManager::new();
        for key in 0..3 {
            tasks.spawn(key, async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
        assert_eq!(tasks.len(), 3);
        tasks.abort_all();
        assert!(tasks.is_empty());
        assert!(!tasks.contains(&1));
    }
}
