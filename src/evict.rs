//! Eviction: reclaiming clean pages to honor the byte budget.
//!
//! Candidates come off the front (least recently released end) of each
//! partition's clean queue. A page is claimed by winning the
//! zero-to-deleted reference transition; referenced pages are skipped, up
//! to a per-scan bound so a queue full of pinned pages cannot stall the
//! scan. Payloads are handed to the evict handler outside all locks.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::cache::Cache;
use crate::stats::CacheStats;
use crate::traits::EvictedPage;

impl<D: Send + Sync + 'static> Cache<D> {
    /// Inline eviction: called on the paths that grow the clean queue.
    ///
    /// At most `max_inline_evictors` callers evict concurrently; the rest
    /// proceed immediately and leave the work to whoever holds a slot.
    /// Each caller runs exactly one scan of up to
    /// `max_pages_per_inline_eviction` pages, so an insert pays a bounded
    /// price no matter how far over budget the cache is; leftover excess
    /// belongs to the background [`evict_pass`](Cache::evict_pass).
    pub(crate) fn evict_if_over_budget(&self) {
        if self.stats.clean_bytes() <= self.config.clean_bytes_max {
            return;
        }
        let running = self.inline_evictors.fetch_add(1, Ordering::AcqRel);
        if running >= self.config.max_inline_evictors {
            self.inline_evictors.fetch_sub(1, Ordering::AcqRel);
            CacheStats::incr(&self.stats.evict_throttled);
            return;
        }
        self.evict_some(self.config.max_pages_per_inline_eviction);
        self.inline_evictors.fetch_sub(1, Ordering::AcqRel);
    }

    /// One background eviction step.
    ///
    /// Returns `true` while the caller should keep scheduling passes:
    /// either this pass reclaimed pages or the cache is still over
    /// budget. When over budget with nothing evictable, runs one flush
    /// pass so dirty pages can become eviction candidates.
    pub fn evict_pass(&self) -> bool {
        if self.stats.clean_bytes() <= self.config.clean_bytes_max {
            return false;
        }
        let evicted = self.evict_some(self.config.max_pages_per_inline_eviction);
        if evicted == 0 {
            self.flush_pass();
        }
        evicted > 0 || self.stats.clean_bytes() > self.config.clean_bytes_max
    }

    /// Scans partitions round-robin and evicts up to `max_pages`
    /// unreferenced clean pages. Returns how many were reclaimed.
    ///
    /// The skip budget is shared across the whole scan, so a pass over
    /// many partitions steps over at most
    /// `max_skip_pages_per_inline_eviction` referenced pages in total.
    fn evict_some(&self, max_pages: usize) -> usize {
        CacheStats::incr(&self.stats.evict_passes);
        let partition_count = self.partitions.len();
        let start = self.evict_cursor.fetch_add(1, Ordering::Relaxed);
        let mut reclaimed = 0usize;
        let mut skipped = 0usize;

        for offset in 0..partition_count {
            if reclaimed >= max_pages
                || skipped >= self.config.max_skip_pages_per_inline_eviction
            {
                break;
            }
            let partition = &self.partitions[(start + offset) % partition_count];
            let mut victims: Vec<EvictedPage<D>> = Vec::new();
            {
                let mut guard = partition.lock();
                let core = &mut *guard;
                let mut cursor = core.clean.front_id();
                while let Some(node) = cursor {
                    if reclaimed >= max_pages
                        || skipped >= self.config.max_skip_pages_per_inline_eviction
                    {
                        break;
                    }
                    cursor = core.clean.next_id(&core.arena, node);
                    let Some(page) = core.clean.get(&core.arena, node).map(Arc::clone) else {
                        break;
                    };
                    if !page.try_begin_delete() {
                        // Referenced or freshly reacquired; leave it.
                        skipped += 1;
                        CacheStats::incr(&self.stats.evict_skips);
                        continue;
                    }
                    core.clean.remove(&mut core.arena, node);
                    page.set_link(None);
                    core.index
                        .remove(page.section(), page.metric(), page.start_time());
                    CacheStats::sub(&self.stats.clean_pages, 1);
                    CacheStats::sub(&self.stats.clean_bytes, page.size() as u64);
                    reclaimed += 1;
                    if let Some(data) = page.take_data() {
                        victims.push(EvictedPage {
                            id: page.id(),
                            end_time: page.end_time(),
                            update_every_s: page.update_every_s(),
                            size: page.size(),
                            data,
                        });
                    }
                }
            }
            for victim in victims {
                CacheStats::incr(&self.stats.evicted_pages);
                CacheStats::add(&self.stats.evicted_bytes, victim.size as u64);
                self.evict_handler.free(victim);
            }
        }

        if reclaimed > 0 {
            trace!(
                cache = %self.config.name,
                reclaimed,
                clean_bytes = self.stats.clean_bytes(),
                "eviction scan finished"
            );
        }
        reclaimed
    }
}
