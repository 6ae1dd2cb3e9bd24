//! Cache Statistics Module
//!
//! Counts lookups and removals by cause.

use serde::Serialize;

use crate::cache::RemovalReason;

// == Cache Stats ==
/// Snapshot of a cache's counters, returned by `Cache::stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found a live entry
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Explicit removals, including `clear`
    pub removals: u64,
    /// Entries replaced by a later `set` on the same key
    pub overwrites: u64,
    /// Entries evicted to satisfy the size cap
    pub evictions: u64,
    /// Entries whose deadline passed
    pub expirations: u64,
    /// Entries removed because a dependency triggered
    pub invalidations: u64,
    /// Entries currently stored
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total lookups served.
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups that hit, 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            lookups => self.hits as f64 / lookups as f64,
        }
    }

    /// Entries that left the cache for any reason.
    pub fn removed_total(&self) -> u64 {
        self.removals + self.overwrites + self.evictions + self.expirations + self.invalidations
    }

    // == Recording ==
    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_removal(&mut self, reason: RemovalReason) {
        let counter = match reason {
            RemovalReason::Removed => &mut self.removals,
            RemovalReason::Overwritten => &mut self.overwrites,
            RemovalReason::Underused => &mut self.evictions,
            RemovalReason::Expired => &mut self.expirations,
            RemovalReason::DependencyTriggered => &mut self.invalidations,
        };
        *counter += 1;
    }

    pub(crate) fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
