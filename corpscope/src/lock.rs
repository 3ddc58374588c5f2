use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::kv::{KvError, KvStore};

/// Proof of a successful acquisition; needed to release the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub key: String,
    pub token: String,
}

/// Advisory lock on top of the store's set-if-absent primitive.
///
/// A key is either absent or held by exactly one token until that token
/// releases it or the TTL expires.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Try to take `key` for `ttl`.
    ///
    /// `Ok(None)` means the key is held by someone else or no backend is
    /// configured; check [`KvStore::is_configured`] to tell the two apart.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, KvError> {
        if !self.store.is_configured() {
            return Ok(None);
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        if self.store.set_if_absent(key, &token, ttl).await? {
            debug!(key, ttl_secs = ttl.as_secs(), "lock acquired");
            Ok(Some(LockGuard {
                key: key.to_string(),
                token,
            }))
        } else {
            debug!(key, "lock already held");
            Ok(None)
        }
    }

    /// Release the lock if `guard` still owns it. Never fails; the TTL covers anything missed.
    pub async fn release(&self, guard: &LockGuard) -> bool {
        match self.store.delete_if_equals(&guard.key, &guard.token).await {
            Ok(true) => {
                debug!(key = %guard.key, "lock released");
                true
            }
            Ok(false) => {
                warn!(key = %guard.key, "lock no longer owned at release (expired or taken over)");
                false
            }
            Err(e) => {
                warn!(key = %guard.key, error = %e, "lock release failed; relying on TTL");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemoryKvStore, RestKvClient};

    fn memory_lock() -> (Arc<MemoryKvStore>, DistributedLock) {
        let store = Arc::new(MemoryKvStore::new());
        (store.clone(), DistributedLock::new(store))
    }

    #[tokio::test]
    async fn second_acquire_is_rejected_until_release() {
        let (_, lock) = memory_lock();
        let ttl = Duration::from_secs(30);

        let first = lock.acquire("lock:acme", ttl).await.unwrap().expect("first acquire");
        assert!(lock.acquire("lock:acme", ttl).await.unwrap().is_none());

        assert!(lock.release(&first).await);
        assert!(lock.acquire("lock:acme", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn tokens_are_unique_per_acquisition() {
        let (_, lock) = memory_lock();
        let ttl = Duration::from_secs(30);

        let a = lock.acquire("lock:a", ttl).await.unwrap().unwrap();
        let b = lock.acquire("lock:b", ttl).await.unwrap().unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 32);
    }

    #[tokio::test]
    async fn stale_guard_never_releases_new_holder() {
        let (store, lock) = memory_lock();

        let stale = lock
            .acquire("lock:acme", Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let current = lock
            .acquire("lock:acme", Duration::from_secs(30))
            .await
            .unwrap()
            .expect("expired lock can be re-acquired");

        assert!(!lock.release(&stale).await);
        assert_eq!(
            store.get("lock:acme").await.unwrap().as_deref(),
            Some(current.token.as_str())
        );
    }

    #[tokio::test]
    async fn concurrent_acquires_have_exactly_one_winner() {
        for trial in 0..20 {
            let (_, lock) = memory_lock();
            let key = format!("lock:trial-{}", trial);

            let mut handles = Vec::new();
            for _ in 0..8 {
                let lock = lock.clone();
                let key = key.clone();
                handles.push(tokio::spawn(async move {
                    lock.acquire(&key, Duration::from_secs(30)).await.unwrap()
                }));
            }

            let mut winners = 0;
            for handle in handles {
                if handle.await.unwrap().is_some() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1, "trial {}", trial);
        }
    }

    #[tokio::test]
    async fn unconfigured_backend_yields_no_lock() {
        let lock = DistributedLock::new(Arc::new(RestKvClient::unconfigured()));
        assert!(lock.acquire("lock:acme", Duration::from_secs(30)).await.unwrap().is_none());
    }
}
