//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// Every variant is raised synchronously by the call that violated a contract
/// and leaves the cache in the state it had before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Empty key list or non-positive size cap
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Conflicting or out-of-range entry options
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Attempt to store the absent value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Key that cannot be normalized
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Dependency is already bound to a cache
    #[error("Dependency already attached to a cache")]
    AlreadyAttached,
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CacheError::InvalidArgument("empty keys".to_string());
        assert_eq!(err.to_string(), "Invalid argument: empty keys");

        let err = CacheError::AlreadyAttached;
        assert_eq!(err.to_string(), "Dependency already attached to a cache");
    }
}
