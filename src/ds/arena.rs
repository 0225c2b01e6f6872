//! Generational slot arena with stable `SlotId` handles.
//!
//! Queue nodes live in a contiguous `Vec` with a free list for slot reuse.
//! Each slot carries a generation counter that is bumped on removal, so a
//! handle retained after its node was freed (and the slot recycled) is
//! detected instead of silently addressing the new occupant. Page
//! descriptors store their current queue position as a packed `SlotId`
//! word; the generation tag is what makes that word safe to read back
//! after an arbitrary interleaving of unlink/relink operations.

/// Stable handle to an arena slot: index plus generation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Returns the raw slot index.
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Packs the handle into a single word for atomic storage.
    ///
    /// The all-ones pattern is reserved as the "no slot" sentinel, which
    /// is unreachable for a real handle because generations wrap before
    /// `u32::MAX` (see `Arena::remove`).
    pub fn pack(self) -> u64 {
        ((self.index as u64) << 32) | self.generation as u64
    }

    /// Reverses [`pack`](Self::pack); `None` for the sentinel word.
    pub fn unpack(word: u64) -> Option<Self> {
        if word == Self::NONE {
            return None;
        }
        Some(Self {
            index: (word >> 32) as u32,
            generation: word as u32,
        })
    }

    /// Packed representation of "not in any queue".
    pub const NONE: u64 = u64::MAX;
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of queue nodes addressed by generational [`SlotId`]s.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> SlotId {
        let index = if let Some(index) = self.free_list.pop() {
            self.slots[index as usize].value = Some(value);
            index
        } else {
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            (self.slots.len() - 1) as u32
        };
        self.len += 1;
        SlotId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        // Wrap below u32::MAX so a live handle can never pack to the
        // NONE sentinel.
        slot.generation = slot.generation.wrapping_add(1) & 0x7fff_ffff;
        self.free_list.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));

        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.len(), 1);

        let c = arena.insert("c");
        assert_eq!(c.index(), a.index());
        assert_eq!(arena.get(c), Some(&"c"));
    }

    #[test]
    fn stale_handle_is_rejected() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        arena.remove(a);
        let b = arena.insert(2);
        assert_eq!(b.index(), a.index());

        // The recycled slot must not be reachable through the old handle.
        assert!(!arena.contains(a));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(b), Some(&2));
    }

    #[test]
    fn pack_roundtrip_and_sentinel() {
        let mut arena = Arena::new();
        let id = arena.insert("x");
        assert_eq!(SlotId::unpack(id.pack()), Some(id));
        assert_eq!(SlotId::unpack(SlotId::NONE), None);
        assert_ne!(id.pack(), SlotId::NONE);
    }
}
