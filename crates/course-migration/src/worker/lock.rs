use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// What a worker holds exclusively while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// One backup per source course at a time.
    BackupCourse(i64),
    /// One restore unit per job at a time.
    RestoreJob(i64),
}

/// In-process registry of held locks. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct LockRegistry {
    held: Arc<Mutex<HashSet<LockKey>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<LockKey>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes `key` if nobody holds it. The lock is released when the guard
    /// is dropped.
    pub fn try_acquire(&self, key: LockKey) -> Option<LockGuard> {
        if self.held().insert(key) {
            Some(LockGuard {
                registry: self.clone(),
                key,
            })
        } else {
            None
        }
    }

    pub fn is_held(&self, key: LockKey) -> bool {
        self.held().contains(&key)
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    registry: LockRegistry,
    key: LockKey,
}

impl LockGuard {
    pub fn key(&self) -> LockKey {
        self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.registry.held().remove(&self.key);
    }
}
