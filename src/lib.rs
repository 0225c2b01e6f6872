//! tscache: partitioned in-memory page cache for time-series storage engines.
//!
//! Pages move through a hot (being collected), dirty (awaiting
//! persistence) and clean (cached, evictable) lifecycle. Identity is
//! `(section, metric, start_time)`; placement hashes only the first two
//! so one metric's pages share a partition. Each partition guards its
//! index and queues with one short-held mutex, while per-page reference
//! counts are lock-free atomics; a page is freed only by winning the
//! zero-to-deleted refcount transition, so held pages are never torn
//! down. Persistence and payload disposal belong to caller-supplied
//! [`SaveHandler`](traits::SaveHandler) and
//! [`EvictHandler`](traits::EvictHandler) implementations, invoked
//! outside all cache locks.

pub mod builder;
pub mod cache;
pub mod ds;
pub mod error;
pub mod index;
pub mod page;
pub mod stats;
pub mod traits;

mod evict;
mod flush;
mod partition;

pub mod prelude;
