//! The cache facade: add, lookup, release, finalize, shutdown.
//!
//! ## Locking model
//!
//! Every structural transition happens in one short critical section on
//! the owning partition's mutex. Reference counting is lock-free once a
//! descriptor is in hand, so the hot read path (resolve once, then
//! acquire/read/release repeatedly) contends on the partition lock only
//! at resolve time. The only nested acquisition is partition lock then a
//! page's payload lock, never the reverse, so no cycle exists.
//!
//! ## Handle discipline
//!
//! Operations that hand out a page return a [`PageHandle`], an RAII
//! reference that releases on drop. A page is never freed while any
//! handle to it exists; eviction and flush-discard only claim pages that
//! win the zero-to-deleted transition.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use tracing::{debug, warn};

use crate::builder::CacheConfig;
use crate::ds::PartitionSelector;
use crate::index::LookupMode;
use crate::page::{MetricId, PageDescriptor, PageEntry, PageId, PageState, SectionId};
use crate::partition::{Partition, Queue};
use crate::stats::{CacheStats, PartitionPages, StatsSnapshot};
use crate::traits::{EvictHandler, EvictedPage, SaveHandler};

/// How [`Cache::shutdown`] treats unfinished work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Flush dirty pages to the save handler before freeing.
    Graceful,
    /// Free what can be freed without persisting anything.
    Force,
}

/// Accounting of one shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Pages persisted during a graceful shutdown.
    pub flushed: u64,
    /// Pages whose payload was handed to the evict handler.
    pub freed: u64,
    /// Pages abandoned because references were still outstanding.
    pub leaked: u64,
}

/// Partitioned page cache, generic over the payload type.
pub struct Cache<D: Send + Sync + 'static> {
    pub(crate) config: CacheConfig,
    pub(crate) evict_handler: Arc<dyn EvictHandler<D>>,
    pub(crate) save_handler: Arc<dyn SaveHandler<D>>,
    pub(crate) partitions: Vec<Partition<D>>,
    pub(crate) selector: PartitionSelector,
    pub(crate) stats: CacheStats,
    /// Threads currently evicting inline, bounded by the config.
    pub(crate) inline_evictors: AtomicUsize,
    /// Threads currently flushing inline, bounded by the config.
    pub(crate) inline_flushers: AtomicUsize,
    pub(crate) evict_cursor: AtomicUsize,
    pub(crate) flush_cursor: AtomicUsize,
    pub(crate) save_init: Once,
    shutdown_done: AtomicBool,
}

impl<D: Send + Sync + 'static> std::fmt::Debug for Cache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl<D: Send + Sync + 'static> Cache<D> {
    pub(crate) fn from_parts(
        config: CacheConfig,
        save_handler: Arc<dyn SaveHandler<D>>,
        evict_handler: Arc<dyn EvictHandler<D>>,
    ) -> Self {
        let selector = PartitionSelector::new(config.partitions);
        let partitions = (0..selector.partition_count())
            .map(|_| Partition::new())
            .collect();
        Self {
            config,
            evict_handler,
            save_handler,
            partitions,
            selector,
            stats: CacheStats::default(),
            inline_evictors: AtomicUsize::new(0),
            inline_flushers: AtomicUsize::new(0),
            evict_cursor: AtomicUsize::new(0),
            flush_cursor: AtomicUsize::new(0),
            save_init: Once::new(),
            shutdown_done: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn partition_count(&self) -> usize {
        self.selector.partition_count()
    }

    /// Adds a page, or resolves to the already-resident page with the
    /// same identity. Returns the acquired handle and whether the add
    /// inserted a new page.
    ///
    /// With `hot` the page enters collection (provisional end time);
    /// otherwise it enters as already-persisted CLEAN content, e.g. a
    /// page loaded back from storage for a query. Only a hot page may
    /// carry an empty interval.
    pub fn add_and_acquire(&self, entry: PageEntry<D>, hot: bool) -> (PageHandle<'_, D>, bool) {
        debug_assert!(
            hot || entry.start_time < entry.end_time,
            "page {:?}/{:?}@{} added outside collection must have a non-empty interval",
            entry.section,
            entry.metric,
            entry.start_time
        );
        let partition = self
            .selector
            .partition_for(entry.section, entry.metric);
        let state = if hot { PageState::Hot } else { PageState::Clean };
        let page = Arc::new(PageDescriptor::new(entry, state));

        let inserted = {
            let mut core = self.partitions[partition].lock();
            loop {
                match core.index.insert(Arc::clone(&page)) {
                    Ok(()) => {
                        let queue = if hot { Queue::Hot } else { Queue::Clean };
                        core.link_back(queue, Arc::clone(&page));
                        break None;
                    }
                    Err(existing) => {
                        if existing.try_acquire() {
                            break Some(existing);
                        }
                        // The occupant lost an eviction race after we
                        // resolved it; unlink the husk and insert ours.
                        core.index.remove(
                            existing.section(),
                            existing.metric(),
                            existing.start_time(),
                        );
                    }
                }
            }
        };

        match inserted {
            Some(existing) => {
                CacheStats::incr(&self.stats.duplicate_adds);
                // `page` (and the caller's payload) drops here unused.
                (self.handle(existing), false)
            }
            None => {
                CacheStats::incr(&self.stats.adds);
                let size = page.size() as u64;
                if hot {
                    CacheStats::incr(&self.stats.hot_pages);
                    CacheStats::add(&self.stats.hot_bytes, size);
                } else {
                    CacheStats::incr(&self.stats.clean_pages);
                    CacheStats::add(&self.stats.clean_bytes, size);
                    self.evict_if_over_budget();
                }
                (self.handle(page), true)
            }
        }
    }

    /// Resolves `time` against the pages of one metric and acquires the
    /// result. Exact matches a page starting at `time`; Closest resolves
    /// coverage and nearness.
    pub fn get_and_acquire(
        &self,
        section: SectionId,
        metric: MetricId,
        time: i64,
        mode: LookupMode,
    ) -> Option<PageHandle<'_, D>> {
        let partition = self.selector.partition_for(section, metric);
        let found = {
            let core = self.partitions[partition].lock();
            let found = match mode {
                LookupMode::Exact => core.index.exact(section, metric, time),
                LookupMode::Closest => core.index.closest(section, metric, time),
            };
            found.map(Arc::clone).filter(|page| page.try_acquire())
        };

        let (hit, miss) = match mode {
            LookupMode::Exact => (&self.stats.exact_hits, &self.stats.exact_misses),
            LookupMode::Closest => (&self.stats.closest_hits, &self.stats.closest_misses),
        };
        match found {
            Some(page) => {
                CacheStats::incr(hit);
                Some(self.handle(page))
            }
            None => {
                CacheStats::incr(miss);
                None
            }
        }
    }

    /// Counters and gauges at this instant.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Page counts per partition, for inspecting placement balance.
    pub fn partition_pages(&self) -> Vec<PartitionPages> {
        self.partitions
            .iter()
            .map(|partition| partition.lock().counts())
            .collect()
    }

    /// Stops the cache: flushes (in graceful mode), frees every page
    /// that is not referenced, and reports what could not be freed.
    ///
    /// Pages with outstanding references are leaked rather than freed so
    /// that live handles never observe a torn-down page. Idempotent;
    /// later calls return an empty report.
    pub fn shutdown(&self, mode: ShutdownMode) -> ShutdownReport {
        if self.shutdown_done.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }

        let flushed = match mode {
            ShutdownMode::Graceful => self.flush_all(),
            ShutdownMode::Force => 0,
        };

        let mut freed = 0u64;
        let mut leaked = 0u64;
        for partition in &self.partitions {
            let mut victims = Vec::new();
            {
                let mut core = partition.lock();
                for page in core.index.drain_pages() {
                    if !page.try_begin_delete() {
                        leaked += 1;
                        continue;
                    }
                    let queue = match page.state() {
                        PageState::Hot => Queue::Hot,
                        PageState::Dirty => Queue::Dirty,
                        PageState::Clean => Queue::Clean,
                    };
                    core.unlink(queue, &page);
                    self.retire_gauges(page.state(), page.size() as u64);
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
            freed += victims.len() as u64;
            for victim in victims {
                self.evict_handler.free(victim);
            }
        }

        if leaked > 0 {
            warn!(
                cache = %self.config.name,
                leaked,
                "shutdown abandoned pages with outstanding references"
            );
        }
        debug!(
            cache = %self.config.name,
            flushed, freed, leaked, "cache shut down"
        );
        ShutdownReport {
            flushed,
            freed,
            leaked,
        }
    }

    pub(crate) fn retire_gauges(&self, state: PageState, size: u64) {
        match state {
            PageState::Hot => {
                CacheStats::sub(&self.stats.hot_pages, 1);
                CacheStats::sub(&self.stats.hot_bytes, size);
            }
            PageState::Dirty => {
                CacheStats::sub(&self.stats.dirty_pages, 1);
                CacheStats::sub(&self.stats.dirty_bytes, size);
            }
            PageState::Clean => {
                CacheStats::sub(&self.stats.clean_pages, 1);
                CacheStats::sub(&self.stats.clean_bytes, size);
            }
        }
    }

    fn handle(&self, page: Arc<PageDescriptor<D>>) -> PageHandle<'_, D> {
        PageHandle {
            cache: self,
            page: Some(page),
        }
    }

    /// Drops one reference and, when the page becomes idle and clean,
    /// opportunistically moves it to the recently-used end of its queue.
    pub(crate) fn release(&self, page: &Arc<PageDescriptor<D>>) {
        let remaining = page.release_ref();
        CacheStats::incr(&self.stats.releases);
        if remaining != 0 || page.state() != PageState::Clean {
            return;
        }

        // Best effort only; under contention the page keeps its old
        // queue position, which costs accuracy, not correctness.
        let partition = self.selector.partition_for(page.section(), page.metric());
        if let Some(mut guard) = self.partitions[partition].try_lock() {
            let core = &mut *guard;
            if page.state() == PageState::Clean {
                if let Some(link) = page.link() {
                    core.clean.move_to_back(&mut core.arena, link);
                }
            }
        }
    }

    fn finalize_to_dirty(&self, page: &Arc<PageDescriptor<D>>) {
        debug_assert_eq!(
            page.state(),
            PageState::Hot,
            "only a hot page can be finalized"
        );
        debug_assert!(
            page.end_time() > page.start_time(),
            "finalized page {:?} has an empty interval",
            page.id()
        );
        let partition = self.selector.partition_for(page.section(), page.metric());
        {
            let mut core = self.partitions[partition].lock();
            core.unlink(Queue::Hot, page);
            page.set_state(PageState::Dirty);
            core.link_back(Queue::Dirty, Arc::clone(page));
        }
        let size = page.size() as u64;
        CacheStats::sub(&self.stats.hot_pages, 1);
        CacheStats::sub(&self.stats.hot_bytes, size);
        CacheStats::incr(&self.stats.dirty_pages);
        CacheStats::add(&self.stats.dirty_bytes, size);
        CacheStats::incr(&self.stats.hot_to_dirty);
    }
}

impl<D: Send + Sync + 'static> Drop for Cache<D> {
    fn drop(&mut self) {
        if !self.shutdown_done.load(Ordering::Acquire) {
            warn!(
                cache = %self.config.name,
                "cache dropped without shutdown; forcing teardown"
            );
            self.shutdown(ShutdownMode::Force);
        }
    }
}

/// RAII reference to a cached page.
///
/// Holding a handle pins the page: it cannot be evicted, freed, or torn
/// down until every handle is gone. Dropping the handle releases the
/// reference.
pub struct PageHandle<'c, D: Send + Sync + 'static> {
    cache: &'c Cache<D>,
    /// `None` only after a consuming transition took the page out.
    page: Option<Arc<PageDescriptor<D>>>,
}

impl<D: Send + Sync + 'static> PageHandle<'_, D> {
    fn page(&self) -> &Arc<PageDescriptor<D>> {
        self.page.as_ref().expect("handle already consumed")
    }

    pub fn id(&self) -> PageId {
        self.page().id()
    }

    pub fn start_time(&self) -> i64 {
        self.page().start_time()
    }

    pub fn end_time(&self) -> i64 {
        self.page().end_time()
    }

    pub fn update_every_s(&self) -> u32 {
        self.page().update_every_s()
    }

    pub fn size(&self) -> usize {
        self.page().size()
    }

    pub fn state(&self) -> PageState {
        self.page().state()
    }

    /// Runs `f` against the payload.
    ///
    /// The payload exists for as long as the handle does, so this only
    /// returns `None` for a handle obtained before an unrelated bug; it
    /// is `Some` in every supported interleaving.
    pub fn with_data<R>(&self, f: impl FnOnce(&D) -> R) -> Option<R> {
        self.page().with_data(f)
    }

    /// Extends a hot page's provisional end time as samples arrive.
    ///
    /// Calling this on a page that is no longer hot is collector misuse.
    pub fn set_end_time(&self, end_time: i64) {
        debug_assert_eq!(
            self.state(),
            PageState::Hot,
            "end time is only mutable while hot"
        );
        self.page().set_end_time(end_time);
    }

    /// Finalizes a hot page: the payload is complete, the end time is
    /// final, and the page moves to the dirty queue to await a flush.
    /// Consumes the handle, releasing the collector's reference.
    pub fn finalize_to_dirty(mut self) {
        let page = self.page.take().expect("handle already consumed");
        self.cache.finalize_to_dirty(&page);
        self.cache.release(&page);
    }
}

impl<D: Send + Sync + 'static> Drop for PageHandle<'_, D> {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            self.cache.release(&page);
        }
    }
}

impl<D: Send + Sync + 'static> std::fmt::Debug for PageHandle<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.page {
            Some(page) => f
                .debug_struct("PageHandle")
                .field("id", &page.id())
                .field("state", &page.state())
                .finish(),
            None => f.write_str("PageHandle(consumed)"),
        }
    }
}
