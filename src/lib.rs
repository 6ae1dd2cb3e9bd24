//! Keyed Cache - An in-process keyed object cache
//!
//! Provides string or structured keys, absolute and sliding expiration,
//! size-bounded eviction, removal notifications and chained invalidation
//! through composable dependencies.

pub mod cache;
pub mod config;
pub mod dependency;
pub mod error;
pub mod hub;
mod tasks;

pub use cache::{Cache, CacheKey, CacheOptions, CacheStats, RemovalReason, RemovedItem};
pub use config::CacheConfig;
pub use dependency::CacheDependency;
pub use error::{CacheError, Result};
pub use hub::{NotificationHub, SubscriptionId};
