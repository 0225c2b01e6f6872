//! Cache configuration and construction.

use std::sync::Arc;

use crate::cache::Cache;
use crate::error::ConfigError;
use crate::traits::{DropEvict, EvictHandler, SaveHandler};

/// Upper bound on the partition count.
pub const MAX_PARTITIONS: usize = 1024;

/// Validated configuration of one cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Name used in log events.
    pub name: String,
    /// Byte budget for clean page payloads; eviction engages above it.
    pub clean_bytes_max: u64,
    /// Number of lock domains.
    pub partitions: usize,
    /// Batch size ceiling for one flush pass.
    pub max_dirty_pages_per_flush: usize,
    /// Concurrent flush passes allowed before extra callers bail out.
    pub max_flushes_inline: usize,
    /// Pages one inline eviction scan may reclaim.
    pub max_pages_per_inline_eviction: usize,
    /// Concurrent inline evictors allowed before extra callers bail out.
    pub max_inline_evictors: usize,
    /// Referenced pages one eviction scan may step over per partition.
    pub max_skip_pages_per_inline_eviction: usize,
    /// Keep saved pages cached as clean; otherwise free them after the
    /// save handler confirms persistence.
    pub retain_saved_pages: bool,
}

/// Builder for a [`Cache`].
///
/// ```
/// use std::sync::Arc;
/// use tscache::prelude::*;
///
/// struct NullSaver;
/// impl SaveHandler<Vec<u8>> for NullSaver {
///     fn save(&self, pages: &[FlushPage<'_, Vec<u8>>]) -> SaveAck {
///         SaveAck::all_saved(pages.len())
///     }
/// }
///
/// let cache: Cache<Vec<u8>> = CacheBuilder::new("main")
///     .clean_bytes_max(64 * 1024 * 1024)
///     .partitions(8)
///     .save_handler(Arc::new(NullSaver))
///     .try_build()
///     .unwrap();
/// ```
pub struct CacheBuilder<D: Send + Sync + 'static> {
    name: String,
    clean_bytes_max: u64,
    partitions: Option<usize>,
    max_dirty_pages_per_flush: usize,
    max_flushes_inline: usize,
    max_pages_per_inline_eviction: usize,
    max_inline_evictors: usize,
    max_skip_pages_per_inline_eviction: usize,
    retain_saved_pages: bool,
    save_handler: Option<Arc<dyn SaveHandler<D>>>,
    evict_handler: Arc<dyn EvictHandler<D>>,
}

impl<D: Send + Sync + 'static> CacheBuilder<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clean_bytes_max: 32 * 1024 * 1024,
            partitions: None,
            max_dirty_pages_per_flush: 64,
            max_flushes_inline: 2,
            max_pages_per_inline_eviction: 32,
            max_inline_evictors: 2,
            max_skip_pages_per_inline_eviction: 32,
            retain_saved_pages: true,
            save_handler: None,
            evict_handler: Arc::new(DropEvict),
        }
    }

    pub fn clean_bytes_max(mut self, bytes: u64) -> Self {
        self.clean_bytes_max = bytes;
        self
    }

    /// Defaults to the machine's available parallelism.
    pub fn partitions(mut self, partitions: usize) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn max_dirty_pages_per_flush(mut self, pages: usize) -> Self {
        self.max_dirty_pages_per_flush = pages;
        self
    }

    pub fn max_flushes_inline(mut self, flushes: usize) -> Self {
        self.max_flushes_inline = flushes;
        self
    }

    pub fn max_pages_per_inline_eviction(mut self, pages: usize) -> Self {
        self.max_pages_per_inline_eviction = pages;
        self
    }

    pub fn max_inline_evictors(mut self, evictors: usize) -> Self {
        self.max_inline_evictors = evictors;
        self
    }

    pub fn max_skip_pages_per_inline_eviction(mut self, pages: usize) -> Self {
        self.max_skip_pages_per_inline_eviction = pages;
        self
    }

    pub fn retain_saved_pages(mut self, retain: bool) -> Self {
        self.retain_saved_pages = retain;
        self
    }

    pub fn save_handler(mut self, handler: Arc<dyn SaveHandler<D>>) -> Self {
        self.save_handler = Some(handler);
        self
    }

    pub fn evict_handler(mut self, handler: Arc<dyn EvictHandler<D>>) -> Self {
        self.evict_handler = handler;
        self
    }

    pub fn try_build(self) -> Result<Cache<D>, ConfigError> {
        if self.clean_bytes_max == 0 {
            return Err(ConfigError::ZeroCleanBudget);
        }
        let partitions = self.partitions.unwrap_or_else(default_partitions);
        if partitions == 0 || partitions > MAX_PARTITIONS {
            return Err(ConfigError::PartitionCount(partitions));
        }
        for (name, value) in [
            ("max_dirty_pages_per_flush", self.max_dirty_pages_per_flush),
            ("max_flushes_inline", self.max_flushes_inline),
            (
                "max_pages_per_inline_eviction",
                self.max_pages_per_inline_eviction,
            ),
            ("max_inline_evictors", self.max_inline_evictors),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(name));
            }
        }
        let save_handler = self
            .save_handler
            .ok_or(ConfigError::MissingSaveHandler)?;

        let config = CacheConfig {
            name: self.name,
            clean_bytes_max: self.clean_bytes_max,
            partitions,
            max_dirty_pages_per_flush: self.max_dirty_pages_per_flush,
            max_flushes_inline: self.max_flushes_inline,
            max_pages_per_inline_eviction: self.max_pages_per_inline_eviction,
            max_inline_evictors: self.max_inline_evictors,
            max_skip_pages_per_inline_eviction: self.max_skip_pages_per_inline_eviction,
            retain_saved_pages: self.retain_saved_pages,
        };
        Ok(Cache::from_parts(config, save_handler, self.evict_handler))
    }
}

fn default_partitions() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_PARTITIONS)
}
