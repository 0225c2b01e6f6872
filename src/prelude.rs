//! Convenience re-exports for typical cache users.

pub use crate::builder::{CacheBuilder, CacheConfig};
pub use crate::cache::{Cache, PageHandle, ShutdownMode, ShutdownReport};
pub use crate::error::ConfigError;
pub use crate::index::LookupMode;
pub use crate::page::{MetricId, PageEntry, PageId, PageState, SectionId};
pub use crate::stats::{PartitionPages, StatsSnapshot};
pub use crate::traits::{
    DropEvict, EvictHandler, EvictedPage, FlushPage, SaveAck, SaveHandler,
};
