//! One lock domain of the cache.
//!
//! A partition bundles everything that must change together when a page
//! moves through its lifecycle: the metric index, the three state queues
//! and the arena their nodes live in. A single mutex guards the bundle;
//! every structural transition (add, finalize, flush detach/requeue,
//! evict unlink) is one short critical section on it.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::ds::{Arena, LinkNode, PageList, SlotId};
use crate::page::PageDescriptor;
use crate::stats::PartitionPages;

pub(crate) type QueueArena<D> = Arena<LinkNode<Arc<PageDescriptor<D>>>>;

/// The lock-guarded state of one partition.
pub(crate) struct PartitionCore<D> {
    pub arena: QueueArena<D>,
    pub index: crate::index::MetricIndex<D>,
    pub hot: PageList,
    pub dirty: PageList,
    pub clean: PageList,
}

impl<D> PartitionCore<D> {
    fn new() -> Self {
        Self {
            arena: Arena::new(),
            index: crate::index::MetricIndex::new(),
            hot: PageList::new(),
            dirty: PageList::new(),
            clean: PageList::new(),
        }
    }

    /// Unlinks `page` from whichever queue its link word names.
    ///
    /// Returns `false` if the page carried no live link (already
    /// detached, e.g. by a concurrent flush).
    pub fn unlink(&mut self, list: Queue, page: &PageDescriptor<D>) -> bool {
        let Some(id) = page.link() else {
            return false;
        };
        let removed = match list {
            Queue::Hot => self.hot.remove(&mut self.arena, id),
            Queue::Dirty => self.dirty.remove(&mut self.arena, id),
            Queue::Clean => self.clean.remove(&mut self.arena, id),
        };
        if removed.is_some() {
            page.set_link(None);
            true
        } else {
            false
        }
    }

    /// Appends `page` to the newest end of `list` and records the link.
    pub fn link_back(&mut self, list: Queue, page: Arc<PageDescriptor<D>>) -> SlotId {
        let id = match list {
            Queue::Hot => self.hot.push_back(&mut self.arena, Arc::clone(&page)),
            Queue::Dirty => self.dirty.push_back(&mut self.arena, Arc::clone(&page)),
            Queue::Clean => self.clean.push_back(&mut self.arena, Arc::clone(&page)),
        };
        page.set_link(Some(id));
        id
    }

    /// Prepends `page` to the oldest end of `list` and records the link.
    pub fn link_front(&mut self, list: Queue, page: Arc<PageDescriptor<D>>) -> SlotId {
        let id = match list {
            Queue::Hot => self.hot.push_front(&mut self.arena, Arc::clone(&page)),
            Queue::Dirty => self.dirty.push_front(&mut self.arena, Arc::clone(&page)),
            Queue::Clean => self.clean.push_front(&mut self.arena, Arc::clone(&page)),
        };
        page.set_link(Some(id));
        id
    }

    pub fn counts(&self) -> PartitionPages {
        PartitionPages {
            hot: self.hot.len(),
            dirty: self.dirty.len(),
            clean: self.clean.len(),
        }
    }
}

/// Which state queue an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Queue {
    Hot,
    Dirty,
    Clean,
}

pub(crate) struct Partition<D> {
    core: Mutex<PartitionCore<D>>,
}

impl<D> Partition<D> {
    pub fn new() -> Self {
        Self {
            core: Mutex::new(PartitionCore::new()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, PartitionCore<D>> {
        self.core.lock()
    }

    /// Non-blocking lock, for best-effort work like LRU reordering.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, PartitionCore<D>>> {
        self.core.try_lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{MetricId, PageEntry, PageState, SectionId};

    fn page(start: i64) -> Arc<PageDescriptor<()>> {
        Arc::new(PageDescriptor::new(
            PageEntry {
                section: SectionId(0),
                metric: MetricId(9),
                start_time: start,
                end_time: start + 10,
                update_every_s: 1,
                size: 64,
                data: (),
            },
            PageState::Hot,
        ))
    }

    #[test]
    fn link_unlink_roundtrip() {
        let partition: Partition<()> = Partition::new();
        let mut core = partition.lock();
        let a = page(0);
        let b = page(10);

        core.link_back(Queue::Hot, Arc::clone(&a));
        core.link_back(Queue::Hot, Arc::clone(&b));
        assert_eq!(core.counts().hot, 2);
        assert!(a.link().is_some());

        assert!(core.unlink(Queue::Hot, &a));
        assert_eq!(core.counts().hot, 1);
        assert!(a.link().is_none());
        // Second unlink is a no-op.
        assert!(!core.unlink(Queue::Hot, &a));
    }

    #[test]
    fn queue_move_preserves_front_order() {
        let partition: Partition<()> = Partition::new();
        let mut core = partition.lock();
        let a = page(0);
        let b = page(10);

        core.link_back(Queue::Dirty, Arc::clone(&a));
        core.link_back(Queue::Dirty, Arc::clone(&b));

        // Requeue a at the front after a failed flush attempt.
        assert!(core.unlink(Queue::Dirty, &a));
        core.link_front(Queue::Dirty, Arc::clone(&a));

        let front = core.dirty.front_id().unwrap();
        let front_page = core.dirty.get(&core.arena, front).unwrap();
        assert_eq!(front_page.start_time(), 0);
    }
}
