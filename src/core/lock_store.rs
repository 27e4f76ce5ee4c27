/// Per-(wallet, mint) buy locks.
///
/// A lock must be taken before any buy attempt so concurrent pool
/// events can never double-buy the same token for the same user. Locks
/// self-expire after a TTL so a crashed or wedged buy task cannot
/// freeze a user out of a token forever.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, warn};

use crate::core::constants::BUY_LOCK_TTL_SECS;
use crate::core::error::ExecutionError;

/// Opaque proof of lock ownership. Release requires the token handed
/// out at acquire time, so an expired-and-reacquired lock cannot be
/// released by the stale previous owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockToken(u64);

#[derive(Debug)]
struct LockEntry {
    token: u64,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct BuyLockStore {
    locks: DashMap<(String, String), LockEntry>,
    ttl: Duration,
}

impl Default for BuyLockStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(BUY_LOCK_TTL_SECS))
    }
}

impl BuyLockStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            ttl,
        }
    }

    /// Take the buy lock for (wallet, mint).
    ///
    /// Atomic check-and-set: exactly one caller wins when several race.
    /// A lock whose TTL has lapsed counts as free and is taken over.
    pub fn acquire(&self, wallet: &str, mint: &str) -> Result<LockToken, ExecutionError> {
        let token = rand::thread_rng().gen::<u64>();
        let entry = LockEntry {
            token,
            expires_at: Instant::now() + self.ttl,
        };

        match self.locks.entry((wallet.to_string(), mint.to_string())) {
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                debug!(wallet, mint, "🔒 Buy lock acquired");
                Ok(LockToken(token))
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= Instant::now() {
                    warn!(wallet, mint, "Buy lock expired, taking over");
                    occupied.insert(entry);
                    Ok(LockToken(token))
                } else {
                    Err(ExecutionError::LockContended {
                        wallet: wallet.to_string(),
                        mint: mint.to_string(),
                    })
                }
            }
        }
    }

    /// Release the lock if `token` still owns it. Releasing a lock that
    /// expired and was re-acquired by someone else is a no-op.
    pub fn release(&self, wallet: &str, mint: &str, token: LockToken) {
        let key = (wallet.to_string(), mint.to_string());
        let removed = self
            .locks
            .remove_if(&key, |_, entry| entry.token == token.0)
            .is_some();
        if removed {
            debug!(wallet, mint, "🔓 Buy lock released");
        } else {
            debug!(wallet, mint, "Stale lock release ignored");
        }
    }

    /// Whether a live (non-expired) lock is held for (wallet, mint).
    pub fn is_locked(&self, wallet: &str, mint: &str) -> bool {
        let key = (wallet.to_string(), mint.to_string());
        self.locks
            .get(&key)
            .map(|entry| entry.expires_at > Instant::now())
            .unwrap_or(false)
    }

    /// Drop all expired entries. Called opportunistically; correctness
    /// never depends on it since acquire treats expired locks as free.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.locks.retain(|_, entry| entry.expires_at > now);
    }

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
    use std::sync::Arc;

    #[test]
    fn second_acquire_is_contended() {
        let store = BuyLockStore::default();
        let token = store.acquire("w1", "mint").unwrap();
        assert!(matches!(
            store.acquire("w1", "mint"),
            Err(ExecutionError::LockContended { .. })
        ));
        // Different wallet or mint is unrelated
        store.acquire("w2", "mint").unwrap();
        store.acquire("w1", "other").unwrap();

        store.release("w1", "mint", token);
        store.acquire("w1", "mint").unwrap();
    }

    #[test]
    fn expired_lock_is_free() {
        let store = BuyLockStore::new(Duration::from_millis(10));
        let stale = store.acquire("w1", "mint").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert!(!store.is_locked("w1", "mint"));
        let fresh = store.acquire("w1", "mint").unwrap();

        // The stale owner can no longer release the re-acquired lock
        store.release("w1", "mint", stale);
        assert!(store.is_locked("w1", "mint"));
        store.release("w1", "mint", fresh);
        assert!(!store.is_locked("w1", "mint"));
    }

    #[test]
    fn purge_drops_only_expired() {
        let store = BuyLockStore::new(Duration::from_millis(10));
        store.acquire("old", "mint").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let long_lived = BuyLockStore::default();
        long_lived.acquire("new", "mint").unwrap();

        store.purge_expired();
        long_lived.purge_expired();
        assert!(store.is_empty());
        assert_eq!(long_lived.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_buyers_get_exactly_one_lock() {
        let store = Arc::new(BuyLockStore::default());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.acquire("wallet", "mint").is_ok()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
