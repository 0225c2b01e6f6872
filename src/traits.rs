//! Callback seams between the cache and the storage engine.
//!
//! The cache never performs I/O. Persistence happens through a
//! [`SaveHandler`] that receives batches of dirty pages, and final
//! payload disposal happens through an [`EvictHandler`]. Both are invoked
//! outside all cache locks, so implementations may block.

use crate::page::PageId;

/// A page leaving the cache, with payload ownership transferred.
#[derive(Debug)]
pub struct EvictedPage<D> {
    pub id: PageId,
    pub end_time: i64,
    pub update_every_s: u32,
    pub size: usize,
    pub data: D,
}

/// A dirty page presented to the save handler. Borrowed: the cache
/// retains ownership and a flush reference for the duration of the call.
#[derive(Debug)]
pub struct FlushPage<'a, D> {
    pub id: PageId,
    pub end_time: i64,
    pub update_every_s: u32,
    pub size: usize,
    pub data: &'a D,
}

/// Receives pages whose payload the cache is done with.
pub trait EvictHandler<D>: Send + Sync {
    fn free(&self, page: EvictedPage<D>);
}

/// Default disposal: drop the payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropEvict;

impl<D> EvictHandler<D> for DropEvict {
    fn free(&self, page: EvictedPage<D>) {
        drop(page);
    }
}

/// Per-page outcome of one save call.
///
/// Built by the handler; pages not marked saved are requeued for a later
/// flush attempt.
#[derive(Debug, Clone)]
pub struct SaveAck {
    page_count: usize,
    failed: Vec<usize>,
}

impl SaveAck {
    /// Everything in the batch was persisted.
    pub fn all_saved(page_count: usize) -> Self {
        Self {
            page_count,
            failed: Vec::new(),
        }
    }

    /// The pages at `failed` positions (indices into the batch slice)
    /// were not persisted.
    pub fn with_failures(page_count: usize, failed: Vec<usize>) -> Self {
        debug_assert!(failed.iter().all(|&i| i < page_count));
        Self { page_count, failed }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn is_saved(&self, index: usize) -> bool {
        !self.failed.contains(&index)
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

/// Persists batches of dirty pages.
pub trait SaveHandler<D>: Send + Sync {
    /// Called once, before the first save of this cache.
    fn init(&self) {}

    /// Persists `pages` and reports which succeeded. Called outside all
    /// cache locks; pages stay readable (and their identity resolvable)
    /// while the call runs.
    fn save(&self, pages: &[FlushPage<'_, D>]) -> SaveAck;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_marks_failures() {
        let ack = SaveAck::with_failures(4, vec![1, 3]);
        assert!(ack.is_saved(0));
        assert!(!ack.is_saved(1));
        assert!(ack.is_saved(2));
        assert!(!ack.is_saved(3));
        assert_eq!(ack.failure_count(), 2);
        assert_eq!(ack.page_count(), 4);

        let ok = SaveAck::all_saved(2);
        assert!(ok.is_saved(0) && ok.is_saved(1));
        assert_eq!(ok.failure_count(), 0);
    }
}
