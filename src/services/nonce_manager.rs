//! Nonce allocation for the single platform signer
//!
//! "Get nonce, sign, submit" must not interleave between concurrent
//! workflows. A [`NonceLease`] holds the lock for the duration of one
//! submission; committing advances the cached nonce, anything else drops the
//! cache so the next lease resyncs from the chain's pending count.

use std::future::Future;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
pub struct NonceManager {
    next: Mutex<Option<u64>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of the signer and returns the nonce to use.
    ///
    /// `fetch_pending` is only called when no nonce is cached.
    pub async fn lease<F, Fut, E>(&self, fetch_pending: F) -> Result<NonceLease<'_>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, E>>,
    {
        let mut guard = self.next.lock().await;
        let nonce = match *guard {
            Some(nonce) => nonce,
            None => {
                let fetched = fetch_pending().await?;
                debug!(nonce = fetched, "Synced nonce from chain");
                *guard = Some(fetched);
                fetched
            }
        };

        Ok(NonceLease {
            guard,
            nonce,
            committed: false,
        })
    }
}

pub struct NonceLease<'a> {
    guard: MutexGuard<'a, Option<u64>>,
    nonce: u64,
    committed: bool,
}

impl NonceLease<'_> {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// The transaction was accepted by the node
    pub fn commit(mut self) {
        *self.guard = Some(self.nonce + 1);
        self.committed = true;
    }

    /// The submission failed; force a resync on the next lease
    pub fn invalidate(mut self) {
        *self.guard = None;
        self.committed = true;
    }
}

impl Drop for NonceLease<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *self.guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_sequential_leases_advance() {
        let manager = NonceManager::new();
        let fetches = AtomicUsize::new(0);

        for expected in 5..8 {
            let lease = manager
                .lease(|| async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(5)
                })
                .await
                .unwrap();
            assert_eq!(lease.nonce(), expected);
            lease.commit();
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_leases_never_share_a_nonce() {
        let manager = Arc::new(NonceManager::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let lease = manager.lease(|| async { Ok::<_, ()>(0) }).await.unwrap();
                let nonce = lease.nonce();
                tokio::task::yield_now().await;
                lease.commit();
                nonce
            }));
        }

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (0..16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_invalidated_lease_forces_resync() {
        let manager = NonceManager::new();

        let lease = manager.lease(|| async { Ok::<_, ()>(3) }).await.unwrap();
        lease.invalidate();

        let lease = manager.lease(|| async { Ok::<_, ()>(9) }).await.unwrap();
        assert_eq!(lease.nonce(), 9);
        drop(lease);

        // Dropped without commit also resyncs
        let lease = manager.lease(|| async { Ok::<_, ()>(11) }).await.unwrap();
        assert_eq!(lease.nonce(), 11);
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_cache_empty() {
        let manager = NonceManager::new();
        let result = manager.lease(|| async { Err::<u64, _>("rpc down") }).await;
        assert!(result.is_err());

        let lease = manager.lease(|| async { Ok::<_, &str>(4) }).await.unwrap();
        assert_eq!(lease.nonce(), 4);
    }
}
