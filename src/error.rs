//! Error types for the tscache library.
//!
//! Construction-time validation is the only fallible surface. At
//! runtime, capacity pressure and save rejections are surfaced through
//! statistics and requeues rather than errors, and caller misuse (such
//! as releasing a page that holds no references, or adding a clean page
//! with an empty interval) is a `debug_assert!`, not an error value.

use thiserror::Error;

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by [`CacheBuilder::try_build`](crate::builder::CacheBuilder::try_build).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The clean-queue byte budget must be non-zero.
    #[error("clean size budget must be greater than zero")]
    ZeroCleanBudget,

    /// The partition count is outside the supported range.
    #[error("partition count {0} is out of range (1..={max})", max = crate::builder::MAX_PARTITIONS)]
    PartitionCount(usize),

    /// A tuning limit that must be at least 1 was zero.
    #[error("tuning parameter `{0}` must be at least 1")]
    ZeroLimit(&'static str),

    /// No save handler was supplied.
    #[error("a save handler is required; dirty pages cannot be persisted without one")]
    MissingSaveHandler,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_parameter() {
        let err = ConfigError::ZeroLimit("max_dirty_pages_per_flush");
        assert!(err.to_string().contains("max_dirty_pages_per_flush"));
    }

    #[test]
    fn implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<ConfigError>();
    }
}
