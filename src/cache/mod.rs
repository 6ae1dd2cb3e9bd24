//! Cache Module
//!
//! Provides in-process keyed caching with expiration, insertion-order
//! eviction and dependency invalidation.

mod entry;
mod key;
mod options;
mod order;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub(crate) use entry::CacheEntry;
pub use entry::{RemovalReason, RemoveCallback, RemovedItem};
pub use key::{normalize, CacheKey, KeyStruct};
pub use options::{AbsoluteExpiration, CacheOptions, ExpirationFn};
pub(crate) use order::InsertionQueue;
pub use stats::CacheStats;
pub use store::Cache;
pub(crate) use store::WeakCache;

// == Public Constants ==
/// Largest accepted sliding expiration window (one year) in milliseconds
pub const MAX_SLIDING_EXPIRATION_MSEC: u64 = 31_536_000_000;
