//! Cache Dependency Module
//!
//! A one-shot trigger that invalidates the entries it is attached to when a
//! watched key leaves the cache or when a parent dependency triggers.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cache::{normalize, Cache, CacheKey, RemovedItem};
use crate::error::{CacheError, Result};
use crate::hub::{lock, NotificationHub, SubscriptionId};

// == Cache Dependency ==
/// Shared handle to a dependency. Clones refer to the same trigger.
///
/// Dependencies compose: a dependency with parents triggers as soon as any
/// parent triggers, so chains of any length propagate a single removal.
#[derive(Clone)]
pub struct CacheDependency {
    inner: Arc<DependencyInner>,
}

struct DependencyInner {
    /// Normalized identifiers of the watched keys
    watched: HashSet<String>,
    parents: Vec<CacheDependency>,
    triggered: NotificationHub<()>,
    state: Mutex<DependencyState>,
}

#[derive(Default)]
struct DependencyState {
    attachment: Option<Attachment>,
    triggered_at: Option<DateTime<Utc>>,
}

/// Subscriptions held while bound to a cache.
struct Attachment {
    /// Unsubscribes from the cache's removal broadcast; holds the cache weakly
    release_cache: Option<Box<dyn FnOnce() + Send>>,
    /// One subscription per parent, same order as `parents`
    parent_subscriptions: Vec<SubscriptionId>,
}

impl CacheDependency {
    // == Constructors ==
    /// Creates a dependency on `keys` and on `parents`.
    ///
    /// Fails with `InvalidKey` if a key cannot be normalized.
    pub fn new<K, I, P>(keys: I, parents: P) -> Result<Self>
    where
        K: Into<CacheKey>,
        I: IntoIterator<Item = K>,
        P: IntoIterator<Item = CacheDependency>,
    {
        let watched = keys
            .into_iter()
            .map(|key| normalize(&key.into()).map(|ks| ks.identifier))
            .collect::<Result<HashSet<_>>>()?;

        Ok(Self {
            inner: Arc::new(DependencyInner {
                watched,
                parents: parents.into_iter().collect(),
                triggered: NotificationHub::new(),
                state: Mutex::new(DependencyState::default()),
            }),
        })
    }

    /// Dependency on a single key.
    pub fn on_key(key: impl Into<CacheKey>) -> Result<Self> {
        Self::new([key], Vec::new())
    }

    /// Dependency on several keys.
    pub fn on_keys<K, I>(keys: I) -> Result<Self>
    where
        K: Into<CacheKey>,
        I: IntoIterator<Item = K>,
    {
        Self::new(keys, Vec::new())
    }

    /// Dependency that triggers when any of `parents` triggers.
    pub fn on_parents(parents: impl IntoIterator<Item = CacheDependency>) -> Self {
        Self {
            inner: Arc::new(DependencyInner {
                watched: HashSet::new(),
                parents: parents.into_iter().collect(),
                triggered: NotificationHub::new(),
                state: Mutex::new(DependencyState::default()),
            }),
        }
    }

    // == Accessors ==
    pub fn is_triggered(&self) -> bool {
        lock(&self.inner.state).triggered_at.is_some()
    }

    /// Returns when the dependency triggered, or None if it has not.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.state).triggered_at
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.inner.state).attachment.is_some()
    }

    /// Broadcast fired once when the dependency triggers.
    pub fn triggered(&self) -> &NotificationHub<()> {
        &self.inner.triggered
    }

    /// Returns true if both handles refer to the same dependency.
    pub fn ptr_eq(&self, other: &CacheDependency) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // == Attach ==
    /// Binds the dependency to `cache`.
    ///
    /// Watches the cache's removal broadcast when the dependency has keys, and
    /// subscribes once to each parent's trigger.
    pub(crate) fn attach<V>(&self, cache: &Cache<V>) -> Result<()>
    where
        V: Clone + Send + Sync + 'static,
    {
        let mut state = lock(&self.inner.state);
        if state.attachment.is_some() {
            return Err(CacheError::AlreadyAttached);
        }

        let release_cache = if self.inner.watched.is_empty() {
            None
        } else {
            let this = Arc::downgrade(&self.inner);
            let hub_owner = cache.downgrade();
            let id = cache.item_removed().add(move |item: &RemovedItem<V>| {
                if let Some(inner) = this.upgrade() {
                    CacheDependency { inner }.handle_removed_item(&item.identifier);
                }
            });
            let release: Box<dyn FnOnce() + Send> = Box::new(move || {
                if let Some(cache) = hub_owner.upgrade() {
                    cache.item_removed().remove(id);
                }
            });
            Some(release)
        };

        let parent_subscriptions = self
            .inner
            .parents
            .iter()
            .map(|parent| {
                let child: Weak<DependencyInner> = Arc::downgrade(&self.inner);
                parent.triggered().add_once(move |_| {
                    if let Some(inner) = child.upgrade() {
                        CacheDependency { inner }.set_triggered();
                    }
                })
            })
            .collect();

        state.attachment = Some(Attachment {
            release_cache,
            parent_subscriptions,
        });
        Ok(())
    }

    // == Detach ==
    /// Drops every subscription taken by `attach`. No-op when not attached.
    pub(crate) fn detach(&self) {
        let Some(attachment) = lock(&self.inner.state).attachment.take() else {
            return;
        };

        if let Some(release) = attachment.release_cache {
            release();
        }
        for (parent, id) in self
            .inner
            .parents
            .iter()
            .zip(attachment.parent_subscriptions)
        {
            parent.triggered().remove(id);
        }
    }

    fn handle_removed_item(&self, identifier: &str) {
        if self.inner.watched.contains(identifier) {
            self.set_triggered();
        }
    }

    // == Set Triggered ==
    /// One-shot transition: detach, record the time, then broadcast.
    fn set_triggered(&self) {
        if self.is_triggered() {
            return;
        }

        self.detach();
        {
            let mut state = lock(&self.inner.state);
            if state.triggered_at.is_some() {
                return;
            }
            state.triggered_at = Some(Utc::now());
        }

        debug!(
            watched = self.inner.watched.len(),
            parents = self.inner.parents.len(),
            "Dependency triggered"
        );
        self.inner.triggered.dispatch(&());
    }
}

impl fmt::Debug for CacheDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("CacheDependency")
            .field("watched", &self.inner.watched)
            .field("parents", &self.inner.parents.len())
            .field("attached", &state.attachment.is_some())
            .field("triggered_at", &state.triggered_at)
            .finish()
    }
}
