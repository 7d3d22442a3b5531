//! Account lock manager
//!
//! A keyed registry of async mutexes, one per `tenant:id`. Entries are
//! created on first use and dropped again once nobody holds or waits for
//! them. Acquiring several accounts always happens in sorted key order,
//! so two calls locking overlapping sets cannot deadlock.

use crate::context::CallContext;
use ocs_core::error::AppError;
use ocs_core::AppResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

#[derive(Default)]
struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drops the entry when the registry holds the only reference
    fn release(&self, key: &str) {
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
            locks.remove(key);
        }
    }
}

/// Exclusive hold on a set of accounts, released on drop
pub struct AccountLockGuard {
    registry: Arc<LockRegistry>,
    held: Vec<(String, OwnedMutexGuard<()>)>,
}

impl AccountLockGuard {
    pub fn keys(&self) -> Vec<&str> {
        self.held.iter().map(|(key, _)| key.as_str()).collect()
    }
}

impl Drop for AccountLockGuard {
    fn drop(&mut self) {
        while let Some((key, guard)) = self.held.pop() {
            drop(guard);
            self.registry.release(&key);
        }
    }
}

/// Per-account mutual exclusion shared by every engine operation
#[derive(Clone, Default)]
pub struct AccountLockManager {
    registry: Arc<LockRegistry>,
}

impl AccountLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every key, waiting at most until the call deadline
    ///
    /// Keys are sorted and deduplicated first. On timeout the locks taken so
    /// far are released and `AppError::Timeout` is returned.
    pub async fn lock<I, K>(&self, keys: I, ctx: &CallContext) -> AppResult<AccountLockGuard>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let mut guard = AccountLockGuard {
            registry: self.registry.clone(),
            held: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let handle = self.registry.handle(&key);
            match tokio::time::timeout_at(ctx.deadline(), handle.lock_owned()).await {
                Ok(held) => {
                    debug!("Locked account {}", key);
                    guard.held.push((key, held));
                }
                Err(_) => {
                    self.registry.release(&key);
                    warn!("Timed out waiting for lock on account {}", key);
                    return Err(AppError::Timeout(format!("lock on account {}", key)));
                }
            }
        }
        Ok(guard)
    }

    /// Runs `f` while holding the locks of `keys`
    pub async fn with_locks<I, K, F, Fut, T>(&self, keys: I, ctx: &CallContext, f: F) -> AppResult<T>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let _guard = self.lock(keys, ctx).await?;
        f().await
    }

    /// Number of accounts currently locked or waited on
    pub fn active(&self) -> usize {
        self.registry.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ctx(ms: u64) -> CallContext {
        CallContext::with_timeout(Duration::from_millis(ms))
    }

    #[tokio::test]
    async fn test_entries_removed_after_release() {
        let locks = AccountLockManager::new();
        {
            let guard = locks
                .lock(["cgrates.org:1002", "cgrates.org:1001", "cgrates.org:1001"], &ctx(1000))
                .await
                .unwrap();
            assert_eq!(guard.keys(), vec!["cgrates.org:1001", "cgrates.org:1002"]);
            assert_eq!(locks.active(), 2);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_timeout_while_held() {
        let locks = AccountLockManager::new();
        let held = locks.lock(["cgrates.org:1001"], &ctx(1000)).await.unwrap();

        let result = locks
            .lock(["cgrates.org:1000", "cgrates.org:1001"], &ctx(20))
            .await;
        assert!(matches!(result, Err(AppError::Timeout(_))));
        // the lock taken before the timeout was released
        assert_eq!(locks.active(), 1);

        drop(held);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_distinct_accounts_do_not_block() {
        let locks = AccountLockManager::new();
        let _a = locks.lock(["cgrates.org:1001"], &ctx(1000)).await.unwrap();
        let b = locks.lock(["cgrates.org:1002"], &ctx(50)).await;
        assert!(b.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_serializes_same_account() {
        let locks = AccountLockManager::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            tasks.push(tokio::spawn(async move {
                locks
                    .with_locks(["cgrates.org:1001"], &ctx(5000), move || async move {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }
}
