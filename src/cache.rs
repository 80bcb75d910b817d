//! Keyed single-flight cache with per-entry expiry.
//!
//! [`MicroCache`] memoizes the result of an async computation per key. The
//! first caller for a key runs the computation; concurrent callers for the
//! same key wait on the same [`OnceCell`] and receive the same value. The
//! outer lock only guards slot lookup and creation, so a slow computation
//! for one key never blocks access to other keys.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OnceCell, RwLock};
use tokio::time::Instant;

/// Computes an entry's time-to-live from its freshly computed value.
pub type ExpiryPolicy<V> = Arc<dyn Fn(&V) -> Duration + Send + Sync>;

/// When a cached value stops being served.
pub enum Expiration<V> {
    /// Expire a fixed duration after the value was computed.
    After(Duration),
    /// Expire at an absolute instant.
    At(Instant),
    /// Ask the policy for a TTL each time a value is inserted.
    Policy(ExpiryPolicy<V>),
}

impl<V> Expiration<V> {
    fn deadline(&self, value: &V, now: Instant) -> Instant {
        match self {
            Self::After(ttl) => now + *ttl,
            Self::At(at) => *at,
            Self::Policy(policy) => now + policy(value),
        }
    }
}

impl<V> Clone for Expiration<V> {
    fn clone(&self) -> Self {
        match self {
            Self::After(ttl) => Self::After(*ttl),
            Self::At(at) => Self::At(*at),
            Self::Policy(policy) => Self::Policy(Arc::clone(policy)),
        }
    }
}

impl<V> fmt::Debug for Expiration<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::After(ttl) => f.debug_tuple("After").field(ttl).finish(),
            Self::At(at) => f.debug_tuple("At").field(at).finish(),
            Self::Policy(_) => f.write_str("Policy(..)"),
        }
    }
}

/// A computed value and the instant it stops being valid.
struct Stamped<V> {
    value: V,
    expires_at: Instant,
}

/// One cache slot. Empty while its first computation is in flight.
type Slot<V> = Arc<OnceCell<Stamped<V>>>;

/// Single-flight cache keyed by string.
pub struct MicroCache<V> {
    slots: RwLock<HashMap<String, Slot<V>>>,
}

impl<V: Clone + Send + Sync> MicroCache<V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key`, computing it if absent or expired.
    pub async fn get_or_add<F, Fut>(&self, key: &str, compute: F, expiration: Expiration<V>) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let result: Result<V, std::convert::Infallible> = self
            .get_or_try_add(key, || async move { Ok(compute().await) }, expiration)
            .await;
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_add`](Self::get_or_add) for fallible computations.
    ///
    /// A failed computation leaves the slot empty; the next caller (or a
    /// concurrent waiter) runs the computation again.
    pub async fn get_or_try_add<F, Fut, E>(
        &self,
        key: &str,
        compute: F,
        expiration: Expiration<V>,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key).await;
        let stamped = slot
            .get_or_try_init(|| async move {
                let value = compute().await?;
                let expires_at = expiration.deadline(&value, Instant::now());
                tracing::trace!(key, "cache entry computed");
                Ok(Stamped { value, expires_at })
            })
            .await?;
        Ok(stamped.value.clone())
    }

    /// Returns the live slot for `key`, replacing it if its value expired.
    async fn slot(&self, key: &str) -> Slot<V> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(key) {
                if is_live(slot) {
                    return Arc::clone(slot);
                }
            }
        }

        let mut slots = self.slots.write().await;
        // Another caller may have replaced the slot while we waited for the lock.
        if let Some(slot) = slots.get(key) {
            if is_live(slot) {
                return Arc::clone(slot);
            }
            tracing::trace!(key, "cache entry expired");
        }
        let slot: Slot<V> = Arc::new(OnceCell::new());
        slots.insert(key.to_owned(), Arc::clone(&slot));
        slot
    }

    /// Returns true if `key` holds a computed, unexpired value.
    pub async fn contains(&self, key: &str) -> bool {
        let slots = self.slots.read().await;
        slots
            .get(key)
            .and_then(|slot| slot.get())
            .is_some_and(|stamped| stamped.expires_at > Instant::now())
    }

    /// Removes `key`. Callers already waiting on an in-flight computation
    /// still receive its value.
    pub async fn remove(&self, key: &str) {
        self.slots.write().await.remove(key);
    }
}

impl<V: Clone + Send + Sync> Default for MicroCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A slot is live while it is in flight or holds an unexpired value.
fn is_live<V>(slot: &Slot<V>) -> bool {
    slot.get()
        .is_none_or(|stamped| stamped.expires_at > Instant::now())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_access_computes_once() {
        let cache = Arc::new(MicroCache::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_add(
                            "status",
                            || async {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                42
                            },
                            Expiration::After(Duration::from_secs(1)),
                        )
                        .await
                })
            })
            .collect();

        let values = futures::future::join_all(tasks).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.into_iter().all(|v| v.unwrap() == 42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_recomputed_after_ttl() {
        let cache = MicroCache::<u32>::new();
        let ttl = Expiration::After(Duration::from_millis(500));

        let first = cache.get_or_add("k", || async { 1 }, ttl.clone()).await;
        let cached = cache.get_or_add("k", || async { 2 }, ttl.clone()).await;
        assert_eq!((first, cached), (1, 1));
        assert!(cache.contains("k").await);

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(!cache.contains("k").await);
        let refreshed = cache.get_or_add("k", || async { 3 }, ttl).await;
        assert_eq!(refreshed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absolute_expiration() {
        let cache = MicroCache::<&'static str>::new();
        let at = Instant::now() + Duration::from_secs(2);

        cache.get_or_add("k", || async { "a" }, Expiration::At(at)).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            cache.get_or_add("k", || async { "b" }, Expiration::At(at)).await,
            "a"
        );
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(
            cache
                .get_or_add("k", || async { "c" }, Expiration::After(Duration::ZERO))
                .await,
            "c"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_sees_value() {
        let cache = MicroCache::<u64>::new();
        let policy: ExpiryPolicy<u64> = Arc::new(|v: &u64| Duration::from_millis(*v));

        cache
            .get_or_add("k", || async { 100 }, Expiration::Policy(Arc::clone(&policy)))
            .await;
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(cache.contains("k").await);
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(!cache.contains("k").await);
    }

    #[tokio::test]
    async fn test_remove_forces_recompute() {
        let cache = MicroCache::<u32>::new();
        let ttl = Expiration::After(Duration::from_secs(60));

        cache.get_or_add("k", || async { 1 }, ttl.clone()).await;
        cache.remove("k").await;
        assert!(!cache.contains("k").await);
        assert_eq!(cache.get_or_add("k", || async { 2 }, ttl).await, 2);
    }

    #[tokio::test]
    async fn test_failed_computation_is_not_cached() {
        let cache = MicroCache::<u32>::new();
        let ttl = Expiration::After(Duration::from_secs(60));

        let failed: Result<u32, &str> = cache
            .get_or_try_add("k", || async { Err("boom") }, ttl.clone())
            .await;
        assert_eq!(failed, Err("boom"));
        assert!(!cache.contains("k").await);

        let ok: Result<u32, &str> = cache.get_or_try_add("k", || async { Ok(7) }, ttl).await;
        assert_eq!(ok, Ok(7));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let cache = MicroCache::<u32>::new();
        let ttl = Expiration::After(Duration::from_secs(60));

        cache.get_or_add("a", || async { 1 }, ttl.clone()).await;
        assert_eq!(cache.get_or_add("b", || async { 2 }, ttl).await, 2);
    }
}
