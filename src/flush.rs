//! Flushing: persisting dirty pages through the save handler.
//!
//! One flush pass detaches a batch from the front (dirtiest the longest)
//! of one partition's dirty queue, holding a flush reference on each
//! page. Detached pages belong to the batch and to nothing else, so two
//! concurrent passes can never present the same page to the handler. The
//! save call runs outside all cache locks with read borrows of the
//! payloads; afterwards, acknowledged pages become clean (or are freed
//! when the cache is configured not to retain them) and rejected pages
//! return to the front of the dirty queue in their original order.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::Cache;
use crate::page::{PageDescriptor, PageState};
use crate::partition::{Partition, Queue};
use crate::stats::CacheStats;
use crate::traits::{EvictedPage, FlushPage};

impl<D: Send + Sync + 'static> Cache<D> {
    /// One flush step, bounded by `max_flushes_inline` concurrent
    /// callers. Returns whether any dirty pages were processed.
    pub fn flush_pass(&self) -> bool {
        let running = self.inline_flushers.fetch_add(1, Ordering::AcqRel);
        if running >= self.config.max_flushes_inline {
            self.inline_flushers.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        let (processed, _saved) = self.flush_some();
        self.inline_flushers.fetch_sub(1, Ordering::AcqRel);
        processed > 0
    }

    /// Drains the dirty queues completely. Returns how many pages the
    /// handler confirmed saved.
    ///
    /// If the handler keeps rejecting pages, the drain gives up after a
    /// full barren cycle over the partitions rather than spinning.
    pub fn flush_all(&self) -> u64 {
        let mut total = 0u64;
        let mut barren_passes = 0usize;
        loop {
            let (processed, saved) = self.flush_some();
            if processed == 0 {
                break;
            }
            total += saved as u64;
            if saved == 0 {
                barren_passes += 1;
                if barren_passes >= self.partition_count() {
                    debug!(
                        cache = %self.config.name,
                        remaining = self.stats().dirty_pages,
                        "flush_all stopping; save handler is rejecting pages"
                    );
                    break;
                }
            } else {
                barren_passes = 0;
            }
        }
        total
    }

    /// Flushes one batch from the first partition (round-robin) with
    /// dirty pages. Returns `(processed, saved)` counts.
    fn flush_some(&self) -> (usize, usize) {
        CacheStats::incr(&self.stats.flush_passes);
        self.save_init.call_once(|| self.save_handler.init());

        let partition_count = self.partitions.len();
        let start = self.flush_cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..partition_count {
            let partition = &self.partitions[(start + offset) % partition_count];
            let batch = self.detach_batch(partition);
            if batch.is_empty() {
                continue;
            }
            let saved = self.save_batch(partition, &batch);
            return (batch.len(), saved);
        }
        (0, 0)
    }

    /// Takes up to one batch off the front of a partition's dirty queue,
    /// acquiring a flush reference on each page. Oldest first.
    fn detach_batch(&self, partition: &Partition<D>) -> Vec<Arc<PageDescriptor<D>>> {
        let mut guard = partition.lock();
        let core = &mut *guard;
        let mut batch = Vec::new();
        while batch.len() < self.config.max_dirty_pages_per_flush {
            let Some(front) = core.dirty.front_id() else {
                break;
            };
            let Some(page) = core.dirty.get(&core.arena, front).map(Arc::clone) else {
                break;
            };
            if !page.try_acquire() {
                // A dirty page is never deletable, so this cannot
                // happen in a consistent cache; drop the husk.
                core.dirty.remove(&mut core.arena, front);
                page.set_link(None);
                continue;
            }
            core.dirty.remove(&mut core.arena, front);
            page.set_link(None);
            batch.push(page);
        }
        batch
    }

    /// Presents `batch` to the save handler and resolves each page
    /// according to the acknowledgement. Returns the saved count.
    fn save_batch(&self, partition: &Partition<D>, batch: &[Arc<PageDescriptor<D>>]) -> usize {
        let ack = {
            let guards: Vec<_> = batch.iter().map(|page| page.read_data()).collect();
            let pages: Vec<FlushPage<'_, D>> = batch
                .iter()
                .zip(&guards)
                .map(|(page, guard)| FlushPage {
                    id: page.id(),
                    end_time: page.end_time(),
                    update_every_s: page.update_every_s(),
                    size: page.size(),
                    data: guard.as_ref().expect("dirty page has a payload"),
                })
                .collect();
            self.save_handler.save(&pages)
        };
        debug_assert_eq!(ack.page_count(), batch.len());

        let mut saved = 0usize;
        let mut clean_grew = false;
        let mut discards: Vec<EvictedPage<D>> = Vec::new();
        let mut rejected: Vec<Arc<PageDescriptor<D>>> = Vec::new();
        {
            let mut guard = partition.lock();
            let core = &mut *guard;
            for (i, page) in batch.iter().enumerate() {
                if !ack.is_saved(i) {
                    CacheStats::incr(&self.stats.save_failures);
                    page.release_ref();
                    rejected.push(Arc::clone(page));
                    continue;
                }

                saved += 1;
                CacheStats::incr(&self.stats.flushed_pages);
                CacheStats::sub(&self.stats.dirty_pages, 1);
                CacheStats::sub(&self.stats.dirty_bytes, page.size() as u64);
                page.set_state(PageState::Clean);
                page.release_ref();

                if !self.config.retain_saved_pages && page.try_begin_delete() {
                    core.index
                        .remove(page.section(), page.metric(), page.start_time());
                    if let Some(data) = page.take_data() {
                        discards.push(EvictedPage {
                            id: page.id(),
                            end_time: page.end_time(),
                            update_every_s: page.update_every_s(),
                            size: page.size(),
                            data,
                        });
                    }
                } else {
                    // Retained, or still referenced by a reader.
                    core.link_back(Queue::Clean, Arc::clone(page));
                    CacheStats::incr(&self.stats.clean_pages);
                    CacheStats::add(&self.stats.clean_bytes, page.size() as u64);
                    clean_grew = true;
                }
            }
            // Rejected pages go back to the front, oldest ending up
            // frontmost so retry order matches arrival order.
            for page in rejected.iter().rev() {
                core.link_front(Queue::Dirty, Arc::clone(page));
            }
        }

        for discard in discards {
            self.evict_handler.free(discard);
        }
        if clean_grew {
            self.evict_if_over_budget();
        }
        trace!(
            cache = %self.config.name,
            batch = batch.len(),
            saved,
            rejected = rejected.len(),
            "flush batch resolved"
        );
        saved
    }
}
