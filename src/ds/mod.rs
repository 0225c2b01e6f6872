pub mod arena;
pub mod list;
pub mod shard;

pub use arena::{Arena, SlotId};
pub use list::{LinkNode, PageList};
pub use shard::PartitionSelector;
