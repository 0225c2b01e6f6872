//! Per-partition time index: metric identity to pages ordered by start time.
//!
//! Each partition owns one [`MetricIndex`]. Lookups resolve a single
//! instant against the pages of one metric; the interesting case is
//! [`closest`](MetricIndex::closest), which backs gap-tolerant queries
//! over sparse retention.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::page::{MetricId, PageDescriptor, SectionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MetricKey {
    section: SectionId,
    metric: MetricId,
}

/// How a lookup resolves the requested instant to a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// Only the page whose identity start time equals the instant.
    Exact,
    /// A page covering the instant if one exists, otherwise the nearest
    /// page in time.
    Closest,
}

/// Pages of one partition, keyed by metric and ordered by start time.
///
/// Mutated only under the partition lock. Values are shared descriptors;
/// removal here drops the index's reference but outstanding handles keep
/// the descriptor alive.
#[derive(Debug, Default)]
pub struct MetricIndex<D> {
    metrics: FxHashMap<MetricKey, BTreeMap<i64, Arc<PageDescriptor<D>>>>,
}

impl<D> MetricIndex<D> {
    pub fn new() -> Self {
        Self {
            metrics: FxHashMap::default(),
        }
    }

    /// Number of indexed pages across all metrics.
    pub fn len(&self) -> usize {
        self.metrics.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Inserts a page, or returns the already-indexed page with the same
    /// identity without replacing it.
    pub fn insert(
        &mut self,
        page: Arc<PageDescriptor<D>>,
    ) -> Result<(), Arc<PageDescriptor<D>>> {
        let key = MetricKey {
            section: page.section(),
            metric: page.metric(),
        };
        match self
            .metrics
            .entry(key)
            .or_default()
            .entry(page.start_time())
        {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(page);
                Ok(())
            }
            std::collections::btree_map::Entry::Occupied(slot) => Err(Arc::clone(slot.get())),
        }
    }

    /// Unlinks a page by identity. `None` if it was not indexed.
    pub fn remove(
        &mut self,
        section: SectionId,
        metric: MetricId,
        start_time: i64,
    ) -> Option<Arc<PageDescriptor<D>>> {
        let key = MetricKey { section, metric };
        let pages = self.metrics.get_mut(&key)?;
        let removed = pages.remove(&start_time);
        if pages.is_empty() {
            self.metrics.remove(&key);
        }
        removed
    }

    /// Page whose identity start time is exactly `time`, if any.
    ///
    /// A key match: the page key is `(section, metric, start_time)`.
    /// Resolving an instant that falls inside a page's interval is
    /// [`closest`](Self::closest)'s job.
    pub fn exact(
        &self,
        section: SectionId,
        metric: MetricId,
        time: i64,
    ) -> Option<&Arc<PageDescriptor<D>>> {
        self.metrics.get(&MetricKey { section, metric })?.get(&time)
    }

    /// Page nearest `time` for this metric, covering pages winning
    /// outright.
    ///
    /// Distance is measured to the nearest covered instant: for a page
    /// ending before `time` that is `time - (end_time - 1)`, for a page
    /// starting after it is `start_time - time`. A tie goes to the later
    /// page.
    pub fn closest(
        &self,
        section: SectionId,
        metric: MetricId,
        time: i64,
    ) -> Option<&Arc<PageDescriptor<D>>> {
        let pages = self.metrics.get(&MetricKey { section, metric })?;

        let predecessor = pages.range(..=time).next_back().map(|(_, page)| page);
        if let Some(page) = predecessor {
            if covers(page, time) {
                return Some(page);
            }
        }
        let successor = pages
            .range((Excluded(time), Unbounded))
            .next()
            .map(|(_, page)| page);

        match (predecessor, successor) {
            (Some(before), Some(after)) => {
                let before_distance = time - last_instant(before);
                let after_distance = after.start_time() - time;
                // Tie-break toward the later page.
                if after_distance <= before_distance {
                    Some(after)
                } else {
                    Some(before)
                }
            }
            (Some(page), None) | (None, Some(page)) => Some(page),
            (None, None) => None,
        }
    }

    /// All pages of the index, in no particular order. Shutdown only.
    pub fn drain_pages(&mut self) -> Vec<Arc<PageDescriptor<D>>> {
        self.metrics
            .drain()
            .flat_map(|(_, pages)| pages.into_values())
            .collect()
    }
}

fn covers<D>(page: &PageDescriptor<D>, time: i64) -> bool {
    let start = page.start_time();
    let end = page.end_time();
    time >= start && (time < end || time == start)
}

/// Last instant a page covers under half-open semantics.
fn last_instant<D>(page: &PageDescriptor<D>) -> i64 {
    let start = page.start_time();
    let end = page.end_time();
    if end > start {
        end - 1
    } else {
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{PageEntry, PageState};

    fn page(start: i64, end: i64) -> Arc<PageDescriptor<()>> {
        let descriptor = PageDescriptor::new(
            PageEntry {
                section: SectionId(0),
                metric: MetricId(1),
                start_time: start,
                end_time: end,
                update_every_s: 1,
                size: 128,
                data: (),
            },
            PageState::Clean,
        );
        descriptor.release_ref();
        Arc::new(descriptor)
    }

    fn index_of(intervals: &[(i64, i64)]) -> MetricIndex<()> {
        let mut index = MetricIndex::new();
        for &(start, end) in intervals {
            index.insert(page(start, end)).unwrap();
        }
        index
    }

    #[test]
    fn exact_matches_start_time_identity_only() {
        let index = index_of(&[(0, 10), (20, 30)]);

        assert_eq!(
            index.exact(SectionId(0), MetricId(1), 0).unwrap().start_time(),
            0
        );
        assert_eq!(
            index.exact(SectionId(0), MetricId(1), 20).unwrap().start_time(),
            20
        );
        // Covered instants that are not a start time do not match;
        // interval resolution belongs to closest.
        assert!(index.exact(SectionId(0), MetricId(1), 9).is_none());
        assert!(index.exact(SectionId(0), MetricId(1), 25).is_none());
        assert!(index.exact(SectionId(0), MetricId(1), 15).is_none());
    }

    #[test]
    fn closest_covers_zero_length_provisional_page() {
        // A hot page whose end time has not advanced yet still answers
        // for its start instant.
        let index = index_of(&[(50, 50)]);
        assert_eq!(
            index
                .closest(SectionId(0), MetricId(1), 50)
                .unwrap()
                .start_time(),
            50
        );
    }

    #[test]
    fn closest_prefers_covering_page() {
        let index = index_of(&[(0, 10), (20, 30), (40, 50)]);
        assert_eq!(
            index
                .closest(SectionId(0), MetricId(1), 25)
                .unwrap()
                .start_time(),
            20
        );
    }

    #[test]
    fn closest_in_gap_picks_nearer_neighbor() {
        let index = index_of(&[(0, 10), (20, 30), (40, 50)]);
        // 12 is 3 from instant 9, 8 from instant 20.
        assert_eq!(
            index
                .closest(SectionId(0), MetricId(1), 12)
                .unwrap()
                .start_time(),
            0
        );
        // 18 is 9 from instant 9, 2 from instant 20.
        assert_eq!(
            index
                .closest(SectionId(0), MetricId(1), 18)
                .unwrap()
                .start_time(),
            20
        );
    }

    #[test]
    fn closest_tie_goes_to_later_page() {
        let index = index_of(&[(20, 30), (39, 50)]);
        // 34 is 5 from instant 29 and 5 from instant 39: a dead tie.
        assert_eq!(
            index
                .closest(SectionId(0), MetricId(1), 34)
                .unwrap()
                .start_time(),
            39
        );
        // One step earlier the predecessor wins outright.
        assert_eq!(
            index
                .closest(SectionId(0), MetricId(1), 33)
                .unwrap()
                .start_time(),
            20
        );
    }

    #[test]
    fn closest_beyond_either_end() {
        let index = index_of(&[(20, 30), (40, 50)]);
        assert_eq!(
            index
                .closest(SectionId(0), MetricId(1), 5)
                .unwrap()
                .start_time(),
            20
        );
        assert_eq!(
            index
                .closest(SectionId(0), MetricId(1), 500)
                .unwrap()
                .start_time(),
            40
        );
    }

    #[test]
    fn closest_misses_unknown_metric() {
        let index = index_of(&[(0, 10)]);
        assert!(index.closest(SectionId(0), MetricId(2), 5).is_none());
        assert!(index.closest(SectionId(1), MetricId(1), 5).is_none());
    }

    #[test]
    fn insert_duplicate_returns_existing() {
        let mut index = MetricIndex::new();
        let first = page(0, 10);
        index.insert(Arc::clone(&first)).unwrap();

        let second = page(0, 99);
        let existing = index.insert(second).unwrap_err();
        assert!(Arc::ptr_eq(&existing, &first));
        // The original mapping is untouched.
        assert_eq!(
            index.exact(SectionId(0), MetricId(1), 0).unwrap().end_time(),
            10
        );
    }

    #[test]
    fn remove_cleans_up_empty_metrics() {
        let mut index = index_of(&[(0, 10)]);
        assert!(index
            .remove(SectionId(0), MetricId(1), 0)
            .is_some());
        assert!(index.is_empty());
        assert!(index.remove(SectionId(0), MetricId(1), 0).is_none());
    }

    mod closest_matches_linear_scan {
        use super::*;
        use proptest::prelude::*;

        fn naive_closest(intervals: &[(i64, i64)], time: i64) -> Option<i64> {
            let mut best: Option<(i64, i64)> = None; // (distance, start)
            for &(start, end) in intervals {
                let last = if end > start { end - 1 } else { start };
                if time >= start && (time < end || time == start) {
                    return Some(start);
                }
                let distance = if time < start {
                    start - time
                } else {
                    time - last
                };
                best = match best {
                    None => Some((distance, start)),
                    Some((d, s)) => {
                        if distance < d || (distance == d && start > s) {
                            Some((distance, start))
                        } else {
                            Some((d, s))
                        }
                    }
                };
            }
            best.map(|(_, start)| start)
        }

        proptest! {
            #[test]
            fn agrees_with_naive_scan(
                starts in proptest::collection::btree_set(0i64..1000, 1..12),
                lengths in proptest::collection::vec(1i64..40, 12),
                time in -100i64..1200,
            ) {
                // Build non-overlapping intervals from sorted starts.
                let mut intervals = Vec::new();
                let mut floor = i64::MIN;
                for (i, &start) in starts.iter().enumerate() {
                    if start < floor {
                        continue;
                    }
                    let end = start + lengths[i % lengths.len()];
                    intervals.push((start, end));
                    floor = end;
                }

                let index = index_of(&intervals);
                let found = index
                    .closest(SectionId(0), MetricId(1), time)
                    .map(|page| page.start_time());
                prop_assert_eq!(found, naive_closest(&intervals, time));
            }
        }
    }
}
