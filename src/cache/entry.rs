//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with expiration support.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::cache::CacheKey;
use crate::dependency::CacheDependency;
use crate::hub::SubscriptionId;

/// Hook invoked when an entry leaves the cache.
pub type RemoveCallback<V> = Arc<dyn Fn(&CacheKey, &V, RemovalReason) + Send + Sync>;

// == Removal Reason ==
/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RemovalReason {
    /// Explicit removal or clear
    Removed,
    /// Replaced by a `set` on the same key
    Overwritten,
    /// Evicted to satisfy the size cap
    Underused,
    /// Deadline passed
    Expired,
    /// An attached dependency triggered
    DependencyTriggered,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemovalReason::Removed => "removed",
            RemovalReason::Overwritten => "overwritten",
            RemovalReason::Underused => "underused",
            RemovalReason::Expired => "expired",
            RemovalReason::DependencyTriggered => "dependency triggered",
        };
        f.write_str(name)
    }
}

// == Removed Item ==
/// Payload of the cache-wide `item_removed` broadcast.
#[derive(Debug, Clone)]
pub struct RemovedItem<V> {
    pub key: CacheKey,
    pub identifier: String,
    pub value: V,
    pub reason: RemovalReason,
}

// == Cache Entry ==
/// A stored value plus its metadata.
pub(crate) struct CacheEntry<V> {
    /// Caller-supplied key
    pub key: CacheKey,
    /// The stored value
    pub value: V,
    /// Insertion sequence number
    pub seq: u64,
    /// Deadline, None = no expiration
    pub expires_at: Option<Instant>,
    /// Sliding window, refreshed on every read
    pub sliding_window: Option<Duration>,
    pub remove_callback: Option<RemoveCallback<V>>,
    /// Attached dependencies with the trigger handler registered on each
    pub dependencies: Vec<(CacheDependency, SubscriptionId)>,
    /// Set once a removal has started; the entry stays visible until it ends
    pub removing: bool,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry; the absolute deadline wins over the sliding window.
    pub fn new(
        key: CacheKey,
        value: V,
        seq: u64,
        absolute: Option<Instant>,
        sliding_window: Option<Duration>,
        remove_callback: Option<RemoveCallback<V>>,
    ) -> Self {
        let expires_at = absolute.or_else(|| sliding_window.map(|w| Instant::now() + w));

        Self {
            key,
            value,
            seq,
            expires_at,
            sliding_window: if absolute.is_some() { None } else { sliding_window },
            remove_callback,
            dependencies: Vec::new(),
            removing: false,
        }
    }

    // == Is Expired ==
    /// An entry is expired once `now` reaches its deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Touch ==
    /// Pushes a sliding deadline to `now + window`. Returns true if it moved.
    pub fn touch(&mut self, now: Instant) -> bool {
        match self.sliding_window {
            Some(window) => {
                self.expires_at = Some(now + window);
                true
            }
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns remaining time before expiration, or None if no deadline is set.
    pub fn ttl_remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(now))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn entry(absolute: Option<Instant>, sliding: Option<Duration>) -> CacheEntry<u32> {
        CacheEntry::new("key".into(), 1, 0, absolute, sliding, None)
    }

    #[test]
    fn test_entry_no_expiration() {
        let entry = entry(None, None);

        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired(Instant::now()));
        assert!(entry.ttl_remaining(Instant::now()).is_none());
    }

    #[test]
    fn test_entry_sliding_deadline() {
        let before = Instant::now();
        let entry = entry(None, Some(Duration::from_secs(10)));

        let expires = entry.expires_at.unwrap();
        assert!(expires >= before + Duration::from_secs(10));
        assert!(!entry.is_expired(before));
        assert!(entry.is_expired(expires));
    }

    #[test]
    fn test_absolute_wins_over_sliding() {
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut entry = entry(Some(deadline), Some(Duration::from_secs(60)));

        assert_eq!(entry.expires_at, Some(deadline));
        assert!(!entry.touch(Instant::now()));
        assert_eq!(entry.expires_at, Some(deadline));
    }

    #[test]
    fn test_touch_refreshes_sliding_deadline() {
        let mut entry = entry(None, Some(Duration::from_secs(1)));
        let later = Instant::now() + Duration::from_millis(500);

        assert!(entry.touch(later));
        assert_eq!(entry.expires_at, Some(later + Duration::from_secs(1)));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = Instant::now();
        let entry = entry(Some(now), None);

        assert!(entry.is_expired(now), "Entry should be expired at boundary");
        assert_eq!(entry.ttl_remaining(now), Some(Duration::ZERO));
    }

    #[test]
    fn test_removal_reason_display() {
        assert_eq!(RemovalReason::Underused.to_string(), "underused");
        assert_eq!(
            RemovalReason::DependencyTriggered.to_string(),
            "dependency triggered"
        );
    }
}
