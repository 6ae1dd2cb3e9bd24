//! Cache Store Module
//!
//! Main cache engine combining keyed storage with insertion-order eviction,
//! proactive expiration and dependency invalidation.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::cache::options::ResolvedOptions;
use crate::cache::{
    normalize, CacheEntry, CacheKey, CacheOptions, CacheStats, InsertionQueue, RemovalReason,
    RemovedItem,
};
use crate::config::CacheConfig;
use crate::dependency::CacheDependency;
use crate::error::{CacheError, Result};
use crate::hub::{lock, NotificationHub, SubscriptionId};
use crate::tasks::ExpirationDriver;

// == Cache ==
/// In-process keyed cache.
///
/// `Cache` is a cheap handle; clones share the same store. No internal lock
/// is held while caller code runs (removal callbacks, hub handlers,
/// predicates, visitors), so that code may call back into the cache.
///
/// Expiration is proactive: the first time an entry with a deadline is stored,
/// the cache starts its own expiration task on the current tokio runtime, or
/// an expiration thread when there is no runtime. It is stopped when the last
/// handle is dropped.
pub struct Cache<V> {
    inner: Arc<CacheInner<V>>,
}

struct CacheInner<V> {
    state: Mutex<CacheState<V>>,
    item_removed: NotificationHub<RemovedItem<V>>,
    scheduler: Mutex<Option<ExpirationDriver>>,
    expiration_slack: Duration,
}

struct CacheState<V> {
    /// Entries by identifier
    entries: HashMap<String, CacheEntry<V>>,
    /// Live entries by insertion order, entries being removed excluded
    order: InsertionQueue,
    next_seq: u64,
    max_size: Option<usize>,
    stats: CacheStats,
}

/// Non-owning handle used by the expiration task and dependency wiring.
pub(crate) struct WeakCache<V> {
    inner: Weak<CacheInner<V>>,
}

impl<V> WeakCache<V> {
    pub fn upgrade(&self) -> Option<Cache<V>> {
        self.inner.upgrade().map(|inner| Cache { inner })
    }
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates an unbounded cache.
    pub fn new() -> Self {
        Self::build(None, Duration::ZERO)
    }

    /// Creates a cache holding at most `max_size` entries.
    pub fn with_max_size(max_size: usize) -> Result<Self> {
        validate_max_size(Some(max_size))?;
        Ok(Self::build(Some(max_size), Duration::ZERO))
    }

    /// Creates a cache from configuration.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        validate_max_size(config.max_size)?;
        Ok(Self::build(config.max_size, config.expiration_slack()))
    }

    fn build(max_size: Option<usize>, expiration_slack: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    order: InsertionQueue::new(),
                    next_seq: 0,
                    max_size,
                    stats: CacheStats::new(),
                }),
                item_removed: NotificationHub::new(),
                scheduler: Mutex::new(None),
                expiration_slack,
            }),
        }
    }

    // == Set ==
    /// Stores a value under `key`, replacing any existing entry.
    ///
    /// Fails with `InvalidValue` for an absent value, `InvalidKey` for a key
    /// that cannot be normalized, `InvalidOptions` for conflicting or
    /// out-of-range expiration, and `AlreadyAttached` for a dependency bound
    /// elsewhere. A rejected call leaves the cache unchanged.
    ///
    /// An existing entry is removed first (reason `Overwritten`). If the cache
    /// is at capacity the oldest entry is evicted (reason `Underused`).
    pub fn set(
        &self,
        key: impl Into<CacheKey>,
        value: impl Into<Option<V>>,
        options: CacheOptions<V>,
    ) -> Result<()> {
        let Some(value) = value.into() else {
            return Err(CacheError::InvalidValue(
                "value cannot be absent".to_string(),
            ));
        };
        let key = key.into();
        let identifier = normalize(&key)?.identifier;
        let resolved = options.resolve()?;

        self.insert_entry(key, identifier, value, resolved)
    }

    // == Add ==
    /// Stores the value only if `key` is absent.
    ///
    /// Returns the existing value without touching it, or None after storing.
    pub fn add(
        &self,
        key: impl Into<CacheKey>,
        value: impl Into<Option<V>>,
        options: CacheOptions<V>,
    ) -> Result<Option<V>> {
        let key = key.into();
        let identifier = normalize(&key)?.identifier;

        if let Some(existing) = self.peek(&identifier) {
            return Ok(Some(existing));
        }
        self.set(key, value, options)?;
        Ok(None)
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// On a hit with sliding expiration the deadline moves to now + window.
    /// An entry whose deadline has passed is removed (reason `Expired`) and
    /// counted as a miss.
    pub fn get(&self, key: impl Into<CacheKey>) -> Result<Option<V>> {
        let identifier = normalize(&key.into())?.identifier;
        let now = Instant::now();

        let found = {
            let mut state = self.state();
            let found = state.entries.get_mut(&identifier).map(|entry| {
                if !entry.removing && entry.is_expired(now) {
                    return Err(entry.seq);
                }
                let refreshed = !entry.removing && entry.touch(now);
                Ok((entry.value.clone(), refreshed))
            });
            match &found {
                Some(Ok(_)) => state.stats.record_hit(),
                _ => state.stats.record_miss(),
            }
            found
        };

        match found {
            None => Ok(None),
            Some(Err(seq)) => {
                self.remove_entry(&identifier, Some(seq), RemovalReason::Expired);
                Ok(None)
            }
            Some(Ok((value, refreshed))) => {
                if refreshed {
                    self.schedule_expiration();
                }
                Ok(Some(value))
            }
        }
    }

    /// Returns the cached value, or computes, stores and returns it on a miss.
    pub fn get_or_insert_with<F>(
        &self,
        key: impl Into<CacheKey>,
        compute: F,
        options: CacheOptions<V>,
    ) -> Result<V>
    where
        F: FnOnce() -> V,
    {
        let key = key.into();
        if let Some(value) = self.get(&key)? {
            return Ok(value);
        }

        let value = compute();
        self.set(key, value.clone(), options)?;
        Ok(value)
    }

    // == Has ==
    /// Returns true if a live entry exists for `key`.
    pub fn has(&self, key: impl Into<CacheKey>) -> Result<bool> {
        let identifier = normalize(&key.into())?.identifier;
        Ok(self.is_live(&identifier))
    }

    /// Returns true if live entries exist for every key.
    ///
    /// Fails with `InvalidArgument` on an empty list.
    pub fn has_all<K, I>(&self, keys: I) -> Result<bool>
    where
        K: Into<CacheKey>,
        I: IntoIterator<Item = K>,
    {
        let identifiers = normalize_all(keys)?;
        Ok(identifiers.iter().all(|identifier| self.is_live(identifier)))
    }

    // == Remove ==
    /// Removes the entry for `key` with reason `Removed`.
    ///
    /// Returns false if no entry existed.
    pub fn remove(&self, key: impl Into<CacheKey>) -> Result<bool> {
        self.remove_with_reason(key, RemovalReason::Removed)
    }

    /// Removes the entry for `key`, reporting `reason` to observers.
    pub fn remove_with_reason(
        &self,
        key: impl Into<CacheKey>,
        reason: RemovalReason,
    ) -> Result<bool> {
        let identifier = normalize(&key.into())?.identifier;
        Ok(self.remove_entry(&identifier, None, reason))
    }

    /// Removes every listed key, skipping missing ones.
    ///
    /// Fails with `InvalidArgument` on an empty list. Returns the number of
    /// entries removed.
    pub fn remove_many<K, I>(&self, keys: I, reason: RemovalReason) -> Result<usize>
    where
        K: Into<CacheKey>,
        I: IntoIterator<Item = K>,
    {
        let identifiers = normalize_all(keys)?;
        Ok(identifiers
            .iter()
            .filter(|identifier| self.remove_entry(identifier, None, reason))
            .count())
    }

    // == Clear ==
    /// Removes every entry. Returns the number removed.
    pub fn clear(&self) -> usize {
        self.clear_where(|_, _| true)
    }

    /// Removes every entry for which `predicate` returns true.
    ///
    /// Returns how many of the entries present when the call started have
    /// left the store, so entries removed by a dependency cascade count too.
    /// Cascaded entries are not offered to the predicate.
    pub fn clear_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&CacheKey, &V) -> bool,
    {
        let snapshot = self.insertion_snapshot();
        for (seq, identifier) in &snapshot {
            let Some((key, value)) = self.current(identifier, *seq) else {
                continue;
            };
            if predicate(&key, &value) {
                self.remove_entry(identifier, Some(*seq), RemovalReason::Removed);
            }
        }

        let state = self.state();
        snapshot
            .iter()
            .filter(|(seq, identifier)| {
                !state
                    .entries
                    .get(identifier)
                    .is_some_and(|entry| entry.seq == *seq)
            })
            .count()
    }

    // == Enumerate ==
    /// Visits live entries from oldest to newest until the visitor breaks.
    pub fn enumerate<F>(&self, mut visitor: F)
    where
        F: FnMut(&CacheKey, &V) -> ControlFlow<()>,
    {
        for (seq, identifier) in self.insertion_snapshot() {
            let Some((key, value)) = self.current(&identifier, seq) else {
                continue;
            };
            if visitor(&key, &value).is_break() {
                break;
            }
        }
    }

    // == Size ==
    pub fn max_size(&self) -> Option<usize> {
        self.state().max_size
    }

    /// Changes the size cap, evicting the oldest entries (reason `Underused`)
    /// until the cache fits. `None` removes the cap.
    pub fn set_max_size(&self, max_size: Option<usize>) -> Result<()> {
        validate_max_size(max_size)?;
        self.state().max_size = max_size;
        self.shrink_to_fit();
        Ok(())
    }

    /// Returns the current number of entries in the cache.
    pub fn size(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Time left before the entry for `key` expires.
    ///
    /// Returns None if the key is absent or the entry never expires.
    pub fn ttl(&self, key: impl Into<CacheKey>) -> Result<Option<Duration>> {
        let identifier = normalize(&key.into())?.identifier;
        let now = Instant::now();
        Ok(self
            .state()
            .entries
            .get(&identifier)
            .and_then(|entry| entry.ttl_remaining(now)))
    }

    // == Observers ==
    /// Broadcast fired after every removal, whatever the cause.
    pub fn item_removed(&self) -> &NotificationHub<RemovedItem<V>> {
        &self.inner.item_removed
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.entries.len());
        stats
    }

    // == Expiration ==
    /// Removes every entry whose deadline has passed. Returns the number removed.
    pub(crate) fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let due: Vec<(u64, String)> = {
            let state = self.state();
            state
                .order
                .iter()
                .filter(|(_, identifier)| {
                    state
                        .entries
                        .get(*identifier)
                        .is_some_and(|entry| entry.is_expired(now))
                })
                .map(|(seq, identifier)| (seq, identifier.to_string()))
                .collect()
        };

        due.into_iter()
            .filter(|(seq, identifier)| {
                self.remove_entry(identifier, Some(*seq), RemovalReason::Expired)
            })
            .count()
    }

    /// Nearest deadline among live entries.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.state()
            .entries
            .values()
            .filter(|entry| !entry.removing)
            .filter_map(|entry| entry.expires_at)
            .min()
    }

    /// Makes sure the expiration driver knows about the current deadlines.
    ///
    /// Outside a tokio runtime, due entries are also swept immediately.
    fn schedule_expiration(&self) {
        if self.next_deadline().is_none() {
            return;
        }
        if Handle::try_current().is_err() {
            self.sweep_expired();
        }

        let mut scheduler = lock(&self.inner.scheduler);
        if let Some(driver) = scheduler.as_ref().filter(|driver| driver.is_running()) {
            driver.wake();
            return;
        }

        match ExpirationDriver::start(self.downgrade(), self.inner.expiration_slack) {
            Ok(driver) => *scheduler = Some(driver),
            Err(err) => warn!("Failed to start expiration driver: {}", err),
        }
    }

    // == Internals ==
    pub(crate) fn downgrade(&self) -> WeakCache<V> {
        WeakCache {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState<V>> {
        lock(&self.inner.state)
    }

    fn insert_entry(
        &self,
        key: CacheKey,
        identifier: String,
        value: V,
        resolved: ResolvedOptions<V>,
    ) -> Result<()> {
        let ResolvedOptions {
            absolute,
            sliding_window,
            remove_callback,
            dependencies,
        } = resolved;

        // Reject dependencies bound elsewhere before touching the store
        let mut pending: Vec<CacheDependency> = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            if dependency.is_triggered() {
                pending.push(dependency);
                continue;
            }
            if dependency.is_attached() || pending.iter().any(|d| d.ptr_eq(&dependency)) {
                return Err(CacheError::AlreadyAttached);
            }
            pending.push(dependency);
        }

        // Displace the previous entry and evict until there is room
        let mut state = loop {
            let victim = {
                let state = self.state();
                match state.displaced_by(&identifier) {
                    None => break state,
                    Some(victim) => victim,
                }
            };
            let (victim_id, victim_seq, reason) = victim;
            debug!(identifier = %victim_id, %reason, "Making room for new entry");
            self.remove_entry(&victim_id, Some(victim_seq), reason);
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.order.push(seq, &identifier);
        state.entries.insert(
            identifier.clone(),
            CacheEntry::new(key, value, seq, absolute, sliding_window, remove_callback),
        );
        let total = state.entries.len();
        state.stats.set_total_entries(total);
        drop(state);
        trace!(identifier = %identifier, seq, "Stored cache entry");

        // Wire dependencies now that the entry is visible
        let mut invalidated = false;
        let mut attached: Vec<(CacheDependency, SubscriptionId)> = Vec::new();
        for dependency in pending {
            if dependency.is_triggered() {
                invalidated = true;
                continue;
            }
            if let Err(err) = dependency.attach(self) {
                release_dependencies(attached);
                self.remove_entry(&identifier, Some(seq), RemovalReason::Removed);
                return Err(err);
            }
            let id = dependency
                .triggered()
                .add_once(self.dependency_handler(&identifier, seq));
            attached.push((dependency, id));
        }

        {
            let mut state = self.state();
            match state
                .entries
                .get_mut(&identifier)
                .filter(|entry| entry.seq == seq && !entry.removing)
            {
                Some(entry) => entry.dependencies = attached,
                None => {
                    drop(state);
                    release_dependencies(attached);
                }
            }
        }

        if invalidated {
            self.remove_entry(&identifier, Some(seq), RemovalReason::DependencyTriggered);
        }
        self.schedule_expiration();
        Ok(())
    }

    /// Handler registered on each dependency of the entry `identifier`/`seq`.
    fn dependency_handler(
        &self,
        identifier: &str,
        seq: u64,
    ) -> impl Fn(&()) + Send + Sync + 'static {
        let cache = self.downgrade();
        let identifier = identifier.to_string();
        move |_: &()| {
            if let Some(cache) = cache.upgrade() {
                cache.remove_entry(&identifier, Some(seq), RemovalReason::DependencyTriggered);
            }
        }
    }

    // == Remove Entry ==
    /// Removes one entry with the full side-effect sequence:
    /// (1) removal callback while the entry is still visible, (2) detach from
    /// the store and release its dependencies, (3) `item_removed` broadcast.
    ///
    /// With `expected_seq`, only that exact insertion is removed. Returns false
    /// if nothing was removed, including when a removal of the same entry is
    /// already in progress.
    fn remove_entry(
        &self,
        identifier: &str,
        expected_seq: Option<u64>,
        reason: RemovalReason,
    ) -> bool {
        let (key, value, seq, callback, dependencies) = {
            let mut state = self.state();
            let Some(entry) = state.entries.get_mut(identifier) else {
                return false;
            };
            if entry.removing || expected_seq.is_some_and(|seq| seq != entry.seq) {
                return false;
            }
            entry.removing = true;
            let taken = (
                entry.key.clone(),
                entry.value.clone(),
                entry.seq,
                entry.remove_callback.take(),
                mem::take(&mut entry.dependencies),
            );
            state.order.remove(taken.2);
            taken
        };

        let outcome = callback.map(|callback| {
            panic::catch_unwind(AssertUnwindSafe(|| callback(&key, &value, reason)))
        });

        {
            let mut state = self.state();
            if state
                .entries
                .get(identifier)
                .is_some_and(|entry| entry.seq == seq)
            {
                state.entries.remove(identifier);
            }
            state.stats.record_removal(reason);
            let total = state.entries.len();
            state.stats.set_total_entries(total);
        }
        debug!(key = %key, %reason, "Removed cache entry");

        release_dependencies(dependencies);
        self.inner.item_removed.dispatch(&RemovedItem {
            key,
            identifier: identifier.to_string(),
            value,
            reason,
        });

        if let Some(Err(payload)) = outcome {
            panic::resume_unwind(payload);
        }
        true
    }

    fn shrink_to_fit(&self) {
        loop {
            let victim = {
                let state = self.state();
                match state.max_size {
                    Some(max) if state.order.len() > max => state
                        .order
                        .peek_oldest()
                        .map(|(seq, identifier)| (seq, identifier.to_string())),
                    _ => None,
                }
            };
            let Some((seq, identifier)) = victim else {
                break;
            };
            self.remove_entry(&identifier, Some(seq), RemovalReason::Underused);
        }
    }

    /// Returns the value if a live entry exists, without refreshing it.
    fn peek(&self, identifier: &str) -> Option<V> {
        if !self.is_live(identifier) {
            return None;
        }
        self.state()
            .entries
            .get(identifier)
            .map(|entry| entry.value.clone())
    }

    /// Checks for a live entry, purging it if its deadline already passed.
    fn is_live(&self, identifier: &str) -> bool {
        let now = Instant::now();
        let expired = {
            let state = self.state();
            match state.entries.get(identifier) {
                None => return false,
                Some(entry) if !entry.removing && entry.is_expired(now) => entry.seq,
                Some(_) => return true,
            }
        };
        self.remove_entry(identifier, Some(expired), RemovalReason::Expired);
        false
    }

    fn insertion_snapshot(&self) -> Vec<(u64, String)> {
        self.state()
            .order
            .iter()
            .map(|(seq, identifier)| (seq, identifier.to_string()))
            .collect()
    }

    /// Key and value of the insertion `seq` if it is still live.
    fn current(&self, identifier: &str, seq: u64) -> Option<(CacheKey, V)> {
        self.state()
            .entries
            .get(identifier)
            .filter(|entry| entry.seq == seq && !entry.removing)
            .map(|entry| (entry.key.clone(), entry.value.clone()))
    }
}

impl<V> CacheState<V> {
    /// Next entry that must leave before `identifier` can be inserted.
    fn displaced_by(&self, identifier: &str) -> Option<(String, u64, RemovalReason)> {
        if let Some(existing) = self.entries.get(identifier) {
            if !existing.removing {
                return Some((identifier.to_string(), existing.seq, RemovalReason::Overwritten));
            }
        }

        let max = self.max_size?;
        if self.order.len() < max {
            return None;
        }
        self.order
            .peek_oldest()
            .map(|(seq, oldest)| (oldest.to_string(), seq, RemovalReason::Underused))
    }
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("Cache")
            .field("size", &state.entries.len())
            .field("max_size", &state.max_size)
            .finish()
    }
}

impl<V> Drop for CacheInner<V> {
    fn drop(&mut self) {
        let scheduler = match self.scheduler.get_mut() {
            Ok(scheduler) => scheduler.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(driver) = scheduler {
            driver.stop();
        }
    }
}

fn validate_max_size(max_size: Option<usize>) -> Result<()> {
    if max_size == Some(0) {
        return Err(CacheError::InvalidArgument(
            "max size should be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn normalize_all<K, I>(keys: I) -> Result<Vec<String>>
where
    K: Into<CacheKey>,
    I: IntoIterator<Item = K>,
{
    let identifiers = keys
        .into_iter()
        .map(|key| normalize(&key.into()).map(|ks| ks.identifier))
        .collect::<Result<Vec<_>>>()?;

    if identifiers.is_empty() {
        return Err(CacheError::InvalidArgument(
            "key list cannot be empty".to_string(),
        ));
    }
    Ok(identifiers)
}

fn release_dependencies(dependencies: Vec<(CacheDependency, SubscriptionId)>) {
    for (dependency, id) in dependencies {
        dependency.triggered().remove(id);
        dependency.detach();
    }
}
