//! Short-lived staging cache for extract-now-confirm-later workflows.
//!
//! An extraction step `put`s a payload and shows it to the user; a later,
//! separate turn (possibly after the flow that wrote it has terminated)
//! `take`s it to perform the committing side effect. Entries expire after a
//! per-entry TTL; an expired entry reads as absent and is evicted on that
//! read, so correctness never depends on a background sweeper.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::UserKey;

struct StageEntry<T> {
    payload: T,
    stored_at: Instant,
    ttl: Duration,
}

impl<T> StageEntry<T> {
    fn expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

/// One namespace of the staging cache, keyed by [`UserKey`].
///
/// Namespaces with different payload types and TTLs are separate
/// `StageCache` values; the mechanics are identical. Entries are replaced
/// wholesale on re-`put`, never mutated in place.
pub struct StageCache<T> {
    namespace: &'static str,
    default_ttl: Duration,
    entries: Mutex<HashMap<UserKey, StageEntry<T>>>,
}

impl<T: Clone> StageCache<T> {
    #[must_use]
    pub fn new(namespace: &'static str, default_ttl: Duration) -> Self {
        Self {
            namespace,
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn namespace(&self) -> &'static str {
        self.namespace
    }

    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Stage `payload` for `user` with the namespace default TTL.
    pub fn put(&self, user: UserKey, payload: T) {
        self.put_with_ttl(user, payload, self.default_ttl);
    }

    /// Stage `payload` for `user`, replacing any previous entry wholesale.
    pub fn put_with_ttl(&self, user: UserKey, payload: T, ttl: Duration) {
        let mut entries = self.lock();
        let replaced = entries
            .insert(
                user.clone(),
                StageEntry {
                    payload,
                    stored_at: Instant::now(),
                    ttl,
                },
            )
            .is_some();
        debug!(
            namespace = self.namespace,
            user = %user,
            ttl_secs = ttl.as_secs(),
            replaced,
            "staged payload"
        );
    }

    /// Read the staged payload, if a live entry exists.
    ///
    /// An entry past its TTL reads as absent and is evicted here; a second
    /// read after expiry is an ordinary miss, not an error.
    #[must_use]
    pub fn get(&self, user: &UserKey) -> Option<T> {
        let mut entries = self.lock();
        match entries.get(user) {
            Some(entry) if !entry.expired() => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(user);
                info!(namespace = self.namespace, user = %user, "staged entry expired");
                None
            }
            None => None,
        }
    }

    /// Read and delete in one step; the confirm half of the workflow.
    #[must_use]
    pub fn take(&self, user: &UserKey) -> Option<T> {
        let mut entries = self.lock();
        match entries.remove(user) {
            Some(entry) if !entry.expired() => Some(entry.payload),
            Some(_) => {
                info!(namespace = self.namespace, user = %user, "staged entry expired");
                None
            }
            None => None,
        }
    }

    /// Drop the entry regardless of expiry. Returns whether one existed.
    #[must_use]
    pub fn remove(&self, user: &UserKey) -> bool {
        self.lock().remove(user).is_some()
    }

    /// Age of the live entry for `user`, if any. Expired entries are
    /// evicted and read as absent, same as [`StageCache::get`].
    #[must_use]
    pub fn entry_age(&self, user: &UserKey) -> Option<Duration> {
        let mut entries = self.lock();
        match entries.get(user) {
            Some(entry) if !entry.expired() => Some(entry.stored_at.elapsed()),
            Some(_) => {
                entries.remove(user);
                None
            }
            None => None,
        }
    }

    /// Evict every expired entry. Purely a memory bound for keys that are
    /// never read again; reads already expire lazily.
    #[must_use]
    pub fn sweep(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.expired());
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(namespace = self.namespace, evicted, "swept expired entries");
        }
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UserKey, StageEntry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Type-erased view of one staged namespace.
///
/// Lets the orchestrator purge, inspect, and sweep every registered cache
/// on reset/status without knowing payload types.
pub trait StagedNamespace: Send + Sync {
    fn namespace(&self) -> &'static str;
    /// Drop the user's entry regardless of expiry (global reset).
    fn purge(&self, user: &UserKey) -> bool;
    /// Age of the user's live entry, for status introspection.
    fn age_of(&self, user: &UserKey) -> Option<Duration>;
    /// Evict expired entries; returns how many were dropped.
    fn sweep_expired(&self) -> usize;
}

impl<T: Clone + Send + Sync> StagedNamespace for StageCache<T> {
    fn namespace(&self) -> &'static str {
        self.namespace
    }

    fn purge(&self, user: &UserKey) -> bool {
        self.remove(user)
    }

    fn age_of(&self, user: &UserKey) -> Option<Duration> {
        self.entry_age(user)
    }

    fn sweep_expired(&self) -> usize {
        self.sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn user(raw: &str) -> UserKey {
        UserKey::from(raw)
    }

    #[test]
    fn put_then_get_within_ttl() {
        let cache = StageCache::new("test", Duration::from_secs(60));
        cache.put(user("a"), vec![1, 2, 3]);
        assert_eq!(cache.get(&user("a")), Some(vec![1, 2, 3]));
        // non-destructive read
        assert_eq!(cache.get(&user("a")), Some(vec![1, 2, 3]));
    }

    #[test]
    fn expired_entry_reads_absent_twice() {
        let cache = StageCache::new("test", Duration::from_millis(20));
        cache.put(user("a"), 7u32);
        sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&user("a")), None);
        // second read after the eviction must not panic or resurrect
        assert_eq!(cache.get(&user("a")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn take_deletes_the_entry() {
        let cache = StageCache::new("test", Duration::from_secs(60));
        cache.put(user("a"), String::from("rows"));
        assert_eq!(cache.take(&user("a")), Some(String::from("rows")));
        assert_eq!(cache.take(&user("a")), None);
    }

    #[test]
    fn take_past_ttl_is_a_miss() {
        let cache = StageCache::new("test", Duration::from_millis(20));
        cache.put(user("a"), 1u8);
        sleep(Duration::from_millis(40));
        assert_eq!(cache.take(&user("a")), None);
    }

    #[test]
    fn replacement_is_wholesale() {
        let cache = StageCache::new("test", Duration::from_millis(30));
        cache.put(user("a"), 1u8);
        sleep(Duration::from_millis(20));
        cache.put(user("a"), 2u8);
        // the clock restarted with the second put
        sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&user("a")), Some(2));
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let cache = StageCache::new("test", Duration::from_millis(10));
        cache.put_with_ttl(user("a"), 9u8, Duration::from_secs(60));
        sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&user("a")), Some(9));
    }

    #[test]
    fn entries_are_keyed_per_user() {
        let cache = StageCache::new("test", Duration::from_secs(60));
        cache.put(user("a"), 1u8);
        cache.put(user("b"), 2u8);
        assert_eq!(cache.take(&user("a")), Some(1));
        assert_eq!(cache.get(&user("b")), Some(2));
    }

    #[test]
    fn sweep_evicts_only_expired() {
        let cache = StageCache::new("test", Duration::from_millis(20));
        cache.put(user("old"), 1u8);
        sleep(Duration::from_millis(40));
        cache.put_with_ttl(user("fresh"), 2u8, Duration::from_secs(60));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&user("fresh")), Some(2));
    }

    #[test]
    fn age_tracks_storage_time() {
        let cache = StageCache::new("test", Duration::from_secs(60));
        cache.put(user("a"), 1u8);
        sleep(Duration::from_millis(25));
        let age = cache.entry_age(&user("a"));
        assert!(age.is_some_and(|age| age >= Duration::from_millis(20)));
        assert_eq!(cache.entry_age(&user("missing")), None);
    }

    #[test]
    fn purge_via_namespace_trait() {
        let cache = StageCache::new("ns", Duration::from_secs(60));
        cache.put(user("a"), 1u8);
        let facet: &dyn StagedNamespace = &cache;
        assert_eq!(facet.namespace(), "ns");
        assert!(facet.purge(&user("a")));
        assert!(!facet.purge(&user("a")));
    }
}
