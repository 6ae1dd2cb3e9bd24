//! Entry Options Module
//!
//! Per-entry settings accepted by `Cache::set`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::cache::{CacheKey, RemovalReason, RemoveCallback, MAX_SLIDING_EXPIRATION_MSEC};
use crate::dependency::CacheDependency;
use crate::error::{CacheError, Result};

/// Computes an absolute expiration from the options it belongs to.
pub type ExpirationFn<V> = Arc<dyn Fn(&CacheOptions<V>) -> DateTime<Utc> + Send + Sync>;

// == Absolute Expiration ==
/// A fixed deadline, given directly or computed at insertion time.
pub enum AbsoluteExpiration<V> {
    At(DateTime<Utc>),
    Computed(ExpirationFn<V>),
}

impl<V> Clone for AbsoluteExpiration<V> {
    fn clone(&self) -> Self {
        match self {
            AbsoluteExpiration::At(at) => AbsoluteExpiration::At(*at),
            AbsoluteExpiration::Computed(f) => AbsoluteExpiration::Computed(Arc::clone(f)),
        }
    }
}

// == Cache Options ==
/// Options for a single `set` call, built fluently:
///
/// ```ignore
/// let options = CacheOptions::new()
///     .sliding_expiration_msec(1_000)
///     .dependency(CacheDependency::on_key("user:1")?);
/// ```
pub struct CacheOptions<V> {
    dependencies: Vec<CacheDependency>,
    sliding_expiration_msec: Option<u64>,
    absolute_expiration: Option<AbsoluteExpiration<V>>,
    remove_callback: Option<RemoveCallback<V>>,
}

impl<V> CacheOptions<V> {
    pub fn new() -> Self {
        Self {
            dependencies: Vec::new(),
            sliding_expiration_msec: None,
            absolute_expiration: None,
            remove_callback: None,
        }
    }

    /// Adds one dependency.
    pub fn dependency(mut self, dependency: CacheDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Adds several dependencies.
    pub fn dependencies<I>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = CacheDependency>,
    {
        self.dependencies.extend(dependencies);
        self
    }

    /// Expire the entry once it has not been read for `msec` milliseconds.
    pub fn sliding_expiration_msec(mut self, msec: u64) -> Self {
        self.sliding_expiration_msec = Some(msec);
        self
    }

    /// Expire the entry at a fixed point in time.
    pub fn absolute_expiration(mut self, at: DateTime<Utc>) -> Self {
        self.absolute_expiration = Some(AbsoluteExpiration::At(at));
        self
    }

    /// Expire the entry at a point in time computed from these options when
    /// the entry is stored.
    pub fn absolute_expiration_with<F>(mut self, compute: F) -> Self
    where
        F: Fn(&CacheOptions<V>) -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.absolute_expiration = Some(AbsoluteExpiration::Computed(Arc::new(compute)));
        self
    }

    /// Hook invoked once, synchronously, when the entry leaves the cache.
    pub fn remove_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CacheKey, &V, RemovalReason) + Send + Sync + 'static,
    {
        self.remove_callback = Some(Arc::new(callback));
        self
    }

    pub fn get_dependencies(&self) -> &[CacheDependency] {
        &self.dependencies
    }

    pub fn get_sliding_expiration_msec(&self) -> Option<u64> {
        self.sliding_expiration_msec
    }

    // == Validate ==
    /// Checks the options and resolves them into entry settings.
    pub(crate) fn resolve(self) -> Result<ResolvedOptions<V>> {
        if self.absolute_expiration.is_some() && self.sliding_expiration_msec.is_some() {
            return Err(CacheError::InvalidOptions(
                "absolute and sliding expiration are mutually exclusive".to_string(),
            ));
        }

        if let Some(msec) = self.sliding_expiration_msec {
            if msec > MAX_SLIDING_EXPIRATION_MSEC {
                return Err(CacheError::InvalidOptions(format!(
                    "allowed range for sliding expiration is [0..{}] msec",
                    MAX_SLIDING_EXPIRATION_MSEC
                )));
            }
        }

        let absolute = self.absolute_expiration.as_ref().map(|expiration| match expiration {
            AbsoluteExpiration::At(at) => *at,
            AbsoluteExpiration::Computed(compute) => compute(&self),
        });

        Ok(ResolvedOptions {
            absolute: absolute.map(deadline_from),
            sliding_window: self.sliding_expiration_msec.map(Duration::from_millis),
            remove_callback: self.remove_callback,
            dependencies: self.dependencies,
        })
    }
}

impl<V> Default for CacheOptions<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for CacheOptions<V> {
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            sliding_expiration_msec: self.sliding_expiration_msec,
            absolute_expiration: self.absolute_expiration.clone(),
            remove_callback: self.remove_callback.clone(),
        }
    }
}

impl<V> fmt::Debug for CacheOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("dependencies", &self.dependencies.len())
            .field("sliding_expiration_msec", &self.sliding_expiration_msec)
            .field("absolute_expiration", &self.absolute_expiration.is_some())
            .field("remove_callback", &self.remove_callback.is_some())
            .finish()
    }
}

/// Validated settings for a new entry.
pub(crate) struct ResolvedOptions<V> {
    pub absolute: Option<Instant>,
    pub sliding_window: Option<Duration>,
    pub remove_callback: Option<RemoveCallback<V>>,
    pub dependencies: Vec<CacheDependency>,
}

/// Maps a wall-clock deadline onto the monotonic clock; past deadlines map to now.
fn deadline_from(at: DateTime<Utc>) -> Instant {
    let remaining = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Instant::now() + remaining
}
