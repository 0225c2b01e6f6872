//! Page identity, descriptor and reference-count state machine.
//!
//! A [`PageDescriptor`] is the cache's metadata record for one page of
//! samples. Structural fields (queue links, index membership) are only
//! touched under the owning partition's lock; the reference count and
//! state word are atomics so that acquire/release on an already-resolved
//! descriptor never takes a lock.
//!
//! ## Reference count
//!
//! ```text
//!   refs >= 1   held by creators / readers / the flush engine
//!   refs == 0   idle; a CLEAN page in this state is evictable
//!   refs == -1  deleted: won the 0 → deleted CAS, being torn down
//! ```
//!
//! The only way out of `0` downward is the compare-and-swap in
//! [`try_begin_delete`](PageDescriptor::try_begin_delete); acquire fails
//! once a page is deleted, forcing the caller to re-resolve identity
//! through the index.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

use parking_lot::RwLock;

use crate::ds::arena::SlotId;

/// Caller-defined namespace for independent page populations
/// (e.g. a storage tier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(pub u32);

/// Opaque handle to a time series, resolved by an external registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(pub u64);

/// Composite page identity. Unique among resident pages of one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub section: SectionId,
    pub metric: MetricId,
    pub start_time: i64,
}

/// Lifecycle state of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageState {
    /// Being appended to by a collector; end_time is provisional.
    Hot = 0,
    /// Content final but not yet confirmed persisted.
    Dirty = 1,
    /// Confirmed persisted; cached for reads, evictable at zero refs.
    Clean = 2,
}

impl PageState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PageState::Hot,
            1 => PageState::Dirty,
            _ => PageState::Clean,
        }
    }
}

/// Caller-supplied description of a page being added to the cache.
#[derive(Debug)]
pub struct PageEntry<D> {
    pub section: SectionId,
    pub metric: MetricId,
    pub start_time: i64,
    /// Provisional for hot adds; final for clean adds.
    pub end_time: i64,
    /// Sampling interval in seconds.
    pub update_every_s: u32,
    /// Payload size in bytes, charged against the byte budget.
    pub size: usize,
    pub data: D,
}

pub(crate) const REFS_DELETED: i64 = -1;

/// Metadata record for one cached page.
///
/// Shared via `Arc`: the owning partition's index and queue hold clones,
/// as does every outstanding [`PageHandle`](crate::cache::PageHandle).
#[derive(Debug)]
pub struct PageDescriptor<D> {
    id: PageId,
    end_time: AtomicI64,
    update_every_s: u32,
    size: usize,
    state: AtomicU8,
    refs: AtomicI64,
    /// Packed [`SlotId`] of the queue node currently holding this page,
    /// or [`SlotId::NONE`]. Written only under the partition lock.
    link: AtomicU64,
    /// Present from add until the evict handler takes ownership.
    data: RwLock<Option<D>>,
}

impl<D> PageDescriptor<D> {
    /// Builds a descriptor with one reference already held (the caller's).
    pub(crate) fn new(entry: PageEntry<D>, state: PageState) -> Self {
        Self {
            id: PageId {
                section: entry.section,
                metric: entry.metric,
                start_time: entry.start_time,
            },
            end_time: AtomicI64::new(entry.end_time),
            update_every_s: entry.update_every_s,
            size: entry.size,
            state: AtomicU8::new(state as u8),
            refs: AtomicI64::new(1),
            link: AtomicU64::new(SlotId::NONE),
            data: RwLock::new(Some(entry.data)),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn section(&self) -> SectionId {
        self.id.section
    }

    pub fn metric(&self) -> MetricId {
        self.id.metric
    }

    pub fn start_time(&self) -> i64 {
        self.id.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time.load(Ordering::Acquire)
    }

    pub fn update_every_s(&self) -> u32 {
        self.update_every_s
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn state(&self) -> PageState {
        PageState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PageState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn set_end_time(&self, end_time: i64) {
        self.end_time.store(end_time, Ordering::Release);
    }

    /// Runs `f` against the payload. `None` once the page was torn down.
    pub fn with_data<R>(&self, f: impl FnOnce(&D) -> R) -> Option<R> {
        self.data.read().as_ref().map(f)
    }

    /// Read access to the payload slot, for building flush batches that
    /// hold the borrow across the save call.
    pub(crate) fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Option<D>> {
        self.data.read()
    }

    /// Takes the payload out for the evict/save-discard path.
    ///
    /// Only called by the winner of the 0 → deleted CAS, so it runs at
    /// most once per page.
    pub(crate) fn take_data(&self) -> Option<D> {
        self.data.write().take()
    }

    /// Attempts to add a reference. Fails iff the page is deleted.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut current = self.refs.load(Ordering::Acquire);
        loop {
            if current == REFS_DELETED {
                return false;
            }
            match self.refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Drops one reference; returns the count remaining.
    ///
    /// Releasing a page with no outstanding references is caller misuse
    /// and a memory-safety hazard upstream, hence fatal in debug builds.
    pub(crate) fn release_ref(&self) -> i64 {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(
            previous > 0,
            "page {:?} released with no outstanding references",
            self.id
        );
        previous - 1
    }

    /// Attempts the 0 → deleted transition that grants exclusive
    /// teardown rights. Exactly one caller can ever win this.
    pub(crate) fn try_begin_delete(&self) -> bool {
        self.refs
            .compare_exchange(0, REFS_DELETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Current reference count (deleted reads as -1). Diagnostics only.
    pub fn ref_count(&self) -> i64 {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn link(&self) -> Option<SlotId> {
        SlotId::unpack(self.link.load(Ordering::Acquire))
    }

    pub(crate) fn set_link(&self, id: Option<SlotId>) {
        let word = id.map(SlotId::pack).unwrap_or(SlotId::NONE);
        self.link.store(word, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(state: PageState) -> PageDescriptor<Vec<u8>> {
        PageDescriptor::new(
            PageEntry {
                section: SectionId(1),
                metric: MetricId(7),
                start_time: 100,
                end_time: 200,
                update_every_s: 1,
                size: 4096,
                data: vec![0u8; 16],
            },
            state,
        )
    }

    #[test]
    fn new_descriptor_starts_acquired() {
        let page = descriptor(PageState::Hot);
        assert_eq!(page.ref_count(), 1);
        assert_eq!(page.state(), PageState::Hot);
        assert_eq!(page.start_time(), 100);
        assert_eq!(page.end_time(), 200);
        assert_eq!(page.size(), 4096);
    }

    #[test]
    fn acquire_release_cycle() {
        let page = descriptor(PageState::Clean);
        assert!(page.try_acquire());
        assert_eq!(page.ref_count(), 2);
        assert_eq!(page.release_ref(), 1);
        assert_eq!(page.release_ref(), 0);
    }

    #[test]
    fn delete_requires_zero_refs() {
        let page = descriptor(PageState::Clean);
        assert!(!page.try_begin_delete()); // creator ref still held
        page.release_ref();
        assert!(page.try_begin_delete());
        assert_eq!(page.ref_count(), REFS_DELETED);
    }

    #[test]
    fn acquire_fails_once_deleted() {
        let page = descriptor(PageState::Clean);
        page.release_ref();
        assert!(page.try_begin_delete());
        assert!(!page.try_acquire());
        // The delete is exclusive.
        assert!(!page.try_begin_delete());
    }

    #[test]
    fn take_data_runs_once() {
        let page = descriptor(PageState::Clean);
        assert_eq!(page.with_data(|d| d.len()), Some(16));
        assert!(page.take_data().is_some());
        assert!(page.take_data().is_none());
        assert_eq!(page.with_data(|d| d.len()), None);
    }

    #[test]
    fn link_roundtrip() {
        let page = descriptor(PageState::Clean);
        assert_eq!(page.link(), None);
        let mut arena = crate::ds::Arena::new();
        let id = arena.insert(0u8);
        page.set_link(Some(id));
        assert_eq!(page.link(), Some(id));
        page.set_link(None);
        assert_eq!(page.link(), None);
    }
}
