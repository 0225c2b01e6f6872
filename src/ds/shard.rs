//! Deterministic mapping of page identity to a partition.
//!
//! Partition selection hashes only `(section, metric)` — never the start
//! time — so every page of one metric lands in the same partition and a
//! CLOSEST lookup scans a single partition's index.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::page::{MetricId, SectionId};

/// Maps `(section, metric)` to a partition index in `[0, partitions)`.
///
/// The mapping is a pure function of identity: the same pair always
/// yields the same partition for a given selector configuration.
#[derive(Debug, PartialEq, Eq)]
pub struct PartitionSelector {
    partitions: usize,
}

impl PartitionSelector {
    /// Creates a selector over `partitions` partitions (clamped to ≥ 1).
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions
    }

    pub fn partition_for(&self, section: SectionId, metric: MetricId) -> usize {
        let mut hasher = FxHasher::default();
        section.hash(&mut hasher);
        metric.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_deterministic() {
        let selector = PartitionSelector::new(8);
        let a = selector.partition_for(SectionId(1), MetricId(42));
        let b = selector.partition_for(SectionId(1), MetricId(42));
        assert_eq!(a, b);
        assert!(a < selector.partition_count());
    }

    #[test]
    fn start_time_is_irrelevant_to_placement() {
        // Placement depends on (section, metric) only; pages of one
        // metric at different times must colocate.
        let selector = PartitionSelector::new(16);
        let p = selector.partition_for(SectionId(3), MetricId(7));
        for _ in 0..4 {
            assert_eq!(selector.partition_for(SectionId(3), MetricId(7)), p);
        }
    }

    #[test]
    fn zero_partitions_clamps_to_one() {
        let selector = PartitionSelector::new(0);
        assert_eq!(selector.partition_count(), 1);
        assert_eq!(selector.partition_for(SectionId(0), MetricId(0)), 0);
    }
}
