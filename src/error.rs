//! Error types for the genarena library.
//!
//! ## Key Components
//!
//! - [`CacheError`]: Every failure surfaced at the public API boundary:
//!   invalid construction parameters, operations on a closed cache,
//!   cancellation, and user loader failures.
//! - [`BoxError`]: The opaque error type user loaders return.
//!
//! Loader failures are shared by every waiter of a single-flight execution,
//! so the loader variant carries its source behind an `Arc` and the whole
//! enum stays `Clone`.
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use genarena::cache::Cache;
//! use genarena::error::CacheError;
//!
//! // Fallible constructor for user-configurable parameters
//! let cache: Result<Cache<String, i32>, CacheError> =
//!     Cache::new(1 << 20, Duration::from_secs(60), 4);
//! assert!(cache.is_ok());
//!
//! // Invalid shard count is caught without panicking
//! let bad = Cache::<String, i32>::new(1 << 20, Duration::from_secs(60), 3);
//! assert_eq!(bad.unwrap_err(), CacheError::InvalidShardCount);
//! ```

use std::fmt;
use std::sync::Arc;

/// Boxed error type returned by user loader functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by cache constructors and operations.
///
/// Configuration variants are produced by
/// [`CacheBuilder::try_build`](crate::builder::CacheBuilder::try_build) and
/// are fatal: no partial cache state is retained. `Closed` is returned by any
/// keyed operation issued after `close()`. `Cancelled` propagates a tripped
/// [`CancelToken`](crate::loader::CancelToken). `Loader` wraps a failure from
/// a user loader; the same instance is delivered to every waiter that shared
/// the execution.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// Capacity was zero or negative at construction.
    InvalidCapacity,
    /// TTL was zero at construction.
    InvalidTtl,
    /// Shard count was zero or not a power of two.
    InvalidShardCount,
    /// The cache has been closed.
    Closed,
    /// The caller's cancellation token tripped while waiting.
    Cancelled,
    /// A user loader returned an error; not cached, shared with waiters.
    Loader(Arc<BoxError>),
}

impl CacheError {
    /// Wraps a loader failure for shared delivery.
    #[inline]
    pub fn loader(err: BoxError) -> Self {
        Self::Loader(Arc::new(err))
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCapacity => f.write_str("capacity bytes must be > 0"),
            Self::InvalidTtl => f.write_str("ttl must be > 0"),
            Self::InvalidShardCount => f.write_str("shards must be power-of-two and > 0"),
            Self::Closed => f.write_str("cache is closed"),
            Self::Cancelled => f.write_str("operation cancelled"),
            Self::Loader(err) => write!(f, "loader failed: {err}"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Loader(err) => {
                let source: &(dyn std::error::Error + 'static) = err.as_ref().as_ref();
                Some(source)
            },
            _ => None,
        }
    }
}

impl PartialEq for CacheError {
    /// Loader errors compare by pointer identity: two waiters of the same
    /// execution hold the same failure.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidCapacity, Self::InvalidCapacity) => true,
            (Self::InvalidTtl, Self::InvalidTtl) => true,
            (Self::InvalidShardCount, Self::InvalidShardCount) => true,
            (Self::Closed, Self::Closed) => true,
            (Self::Cancelled, Self::Cancelled) => true,
            (Self::Loader(a), Self::Loader(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for CacheError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_parameter() {
        assert_eq!(
            CacheError::InvalidCapacity.to_string(),
            "capacity bytes must be > 0"
        );
        assert_eq!(CacheError::InvalidTtl.to_string(), "ttl must be > 0");
        assert_eq!(
            CacheError::InvalidShardCount.to_string(),
            "shards must be power-of-two and > 0"
        );
        assert_eq!(CacheError::Closed.to_string(), "cache is closed");
    }

    #[test]
    fn loader_display_includes_source() {
        let err = CacheError::loader("backend unreachable".into());
        assert!(err.to_string().contains("backend unreachable"));
    }

    #[test]
    fn loader_source_is_exposed() {
        let err = CacheError::loader("boom".into());
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&CacheError::Closed).is_none());
    }

    #[test]
    fn loader_errors_compare_by_shared_identity() {
        let a = CacheError::loader("x".into());
        let b = a.clone();
        let c = CacheError::loader("x".into());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<CacheError>();
    }
}
