//! Per-path advisory locks.
//!
//! Used around read-modify-write cycles on shared files (the global
//! manifest). A caller requests the lock for a path, queues behind any
//! in-flight holder, and releases by dropping the guard or calling
//! [`PathLocks::release`]. Locks are advisory: only writers going through the
//! same `PathLocks` are serialized.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Debug, Default, Clone)]
pub struct PathLocks {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

/// Held while a path is locked.
#[derive(Debug)]
pub struct PathGuard {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl PathGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`.
    pub async fn acquire(&self, path: &Path) -> PathGuard {
        // Clone the mutex out so the map shard is not held across the await.
        let mutex = self
            .locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        trace!(path = %path.display(), "waiting for path lock");
        let guard = mutex.lock_owned().await;
        PathGuard {
            path: path.to_path_buf(),
            _guard: guard,
        }
    }

    pub fn release(&self, guard: PathGuard) {
        let path = guard.path.clone();
        drop(guard);
        // Forget the entry once nobody else holds or waits on it.
        self.locks
            .remove_if(&path, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of paths with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_forgets_idle_entry() {
        let locks = PathLocks::new();
        let guard = locks.acquire(Path::new("/tmp/a.json")).await;
        assert_eq!(locks.len(), 1);
        locks.release(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_paths_do_not_block() {
        let locks = PathLocks::new();
        let a = locks.acquire(Path::new("/tmp/a.json")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(Path::new("/tmp/b.json")),
        )
        .await
        .expect("second path should not wait");
        assert_eq!(b.path(), Path::new("/tmp/b.json"));
        locks.release(a);
        locks.release(b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_writers_on_same_path_are_serialized() {
        let locks = PathLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let guard = locks.acquire(Path::new("/tmp/shared.json")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                locks.release(guard);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
