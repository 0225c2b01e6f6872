//! Cache-wide counters and gauges.
//!
//! All cells are relaxed atomics: they feed monitoring, not control flow,
//! with one exception. `clean_bytes` is also read by the eviction trigger,
//! so it is maintained exactly (incremented on transition to CLEAN,
//! decremented on eviction and teardown) even though individual reads are
//! still relaxed snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counter_cells {
    ($($(#[$doc:meta])* $name:ident),+ $(,)?) => {
        /// Live counters of one cache. Shared by all partitions.
        #[derive(Debug, Default)]
        pub struct CacheStats {
            $($(#[$doc])* pub(crate) $name: AtomicU64,)+
        }

        /// Point-in-time copy of [`CacheStats`].
        ///
        /// Gauges are read independently, so a snapshot taken during
        /// concurrent activity is approximately, not transactionally,
        /// consistent.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct StatsSnapshot {
            $($(#[$doc])* pub $name: u64,)+
        }

        impl CacheStats {
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)+
                }
            }
        }
    };
}

counter_cells! {
    /// Pages currently in the hot queue.
    hot_pages,
    /// Bytes of payload in the hot queue.
    hot_bytes,
    /// Pages currently in the dirty queue (flush batches included).
    dirty_pages,
    /// Bytes of payload in the dirty queue.
    dirty_bytes,
    /// Pages currently in the clean queue.
    clean_pages,
    /// Bytes of payload in the clean queue, compared against the budget.
    clean_bytes,
    /// Successful page additions.
    adds,
    /// Adds that resolved to an already-resident page.
    duplicate_adds,
    /// Exact lookups that matched a page's start time.
    exact_hits,
    /// Exact lookups that found nothing.
    exact_misses,
    /// Closest lookups that found some page.
    closest_hits,
    /// Closest lookups over a metric with no resident pages.
    closest_misses,
    /// Reference releases.
    releases,
    /// Hot pages finalized into the dirty queue.
    hot_to_dirty,
    /// Eviction passes that ran (inline or background).
    evict_passes,
    /// Eviction passes refused because enough were already inline.
    evict_throttled,
    /// Pages freed by eviction.
    evicted_pages,
    /// Bytes freed by eviction.
    evicted_bytes,
    /// Referenced clean pages skipped during eviction scans.
    evict_skips,
    /// Flush passes that ran.
    flush_passes,
    /// Pages confirmed saved by the save handler.
    flushed_pages,
    /// Pages the save handler failed to persist (requeued).
    save_failures,
}

impl CacheStats {
    pub(crate) fn incr(cell: &AtomicU64) {
        cell.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(cell: &AtomicU64, amount: u64) {
        cell.fetch_add(amount, Ordering::Relaxed);
    }

    pub(crate) fn sub(cell: &AtomicU64, amount: u64) {
        cell.fetch_sub(amount, Ordering::Relaxed);
    }

    pub(crate) fn clean_bytes(&self) -> u64 {
        self.clean_bytes.load(Ordering::Relaxed)
    }
}

/// Per-partition page counts, for inspecting balance across partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionPages {
    pub hot: usize,
    pub dirty: usize,
    pub clean: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_cells() {
        let stats = CacheStats::default();
        CacheStats::incr(&stats.adds);
        CacheStats::add(&stats.clean_bytes, 4096);
        CacheStats::add(&stats.clean_pages, 2);
        CacheStats::sub(&stats.clean_pages, 1);

        let snap = stats.snapshot();
        assert_eq!(snap.adds, 1);
        assert_eq!(snap.clean_bytes, 4096);
        assert_eq!(snap.clean_pages, 1);
        assert_eq!(snap.evicted_pages, 0);
        assert_eq!(stats.clean_bytes(), 4096);
    }
}
