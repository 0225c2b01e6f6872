//! Intrusive doubly-linked queue threaded through a shared [`Arena`].
//!
//! A partition owns one arena and three `PageList` heads (hot, dirty,
//! clean). Nodes hold prev/next links by [`SlotId`], so moving a page
//! between queues is remove-from-one / push-to-other without touching the
//! page descriptor itself, and a stale id retained across that move is
//! caught by the arena's generation check.
//!
//! Front/back convention as used by the partition: the front is the
//! oldest entry (least recently released for the clean queue, dirty the
//! longest for the dirty queue) and the back is the newest.

use crate::ds::arena::{Arena, SlotId};

/// Arena node: a queue value plus its links.
#[derive(Debug)]
pub struct LinkNode<T> {
    value: T,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Head/tail of one intrusive queue over a shared arena.
///
/// All operations take the arena explicitly; the caller (the partition)
/// guarantees every id passed in was produced by this list against the
/// same arena.
#[derive(Debug, Default)]
pub struct PageList {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl PageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn front_id(&self) -> Option<SlotId> {
        self.head
    }

    pub fn back_id(&self) -> Option<SlotId> {
        self.tail
    }

    pub fn get<'a, T>(&self, arena: &'a Arena<LinkNode<T>>, id: SlotId) -> Option<&'a T> {
        arena.get(id).map(|node| &node.value)
    }

    /// Returns the id following `id`, walking toward the back.
    pub fn next_id<T>(&self, arena: &Arena<LinkNode<T>>, id: SlotId) -> Option<SlotId> {
        arena.get(id).and_then(|node| node.next)
    }

    /// Inserts at the back (newest end) and returns the node id.
    pub fn push_back<T>(&mut self, arena: &mut Arena<LinkNode<T>>, value: T) -> SlotId {
        let id = arena.insert(LinkNode {
            value,
            prev: self.tail,
            next: None,
        });
        if let Some(tail) = self.tail {
            if let Some(node) = arena.get_mut(tail) {
                node.next = Some(id);
            }
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        self.len += 1;
        id
    }

    /// Inserts at the front (oldest end) and returns the node id.
    pub fn push_front<T>(&mut self, arena: &mut Arena<LinkNode<T>>, value: T) -> SlotId {
        let id = arena.insert(LinkNode {
            value,
            prev: None,
            next: self.head,
        });
        if let Some(head) = self.head {
            if let Some(node) = arena.get_mut(head) {
                node.prev = Some(id);
            }
        } else {
            self.tail = Some(id);
        }
        self.head = Some(id);
        self.len += 1;
        id
    }

    /// Removes and returns the front (oldest) value.
    pub fn pop_front<T>(&mut self, arena: &mut Arena<LinkNode<T>>) -> Option<T> {
        let id = self.head?;
        self.remove(arena, id)
    }

    /// Unlinks `id` and returns its value. `None` for a stale id.
    pub fn remove<T>(&mut self, arena: &mut Arena<LinkNode<T>>, id: SlotId) -> Option<T> {
        let (prev, next) = {
            let node = arena.get(id)?;
            (node.prev, node.next)
        };

        if let Some(prev_id) = prev {
            if let Some(prev_node) = arena.get_mut(prev_id) {
                prev_node.next = next;
            }
        } else {
            self.head = next;
        }

        if let Some(next_id) = next {
            if let Some(next_node) = arena.get_mut(next_id) {
                next_node.prev = prev;
            }
        } else {
            self.tail = prev;
        }

        self.len -= 1;
        arena.remove(id).map(|node| node.value)
    }

    /// Moves an existing node to the back (newest end).
    ///
    /// Returns `false` for a stale id.
    pub fn move_to_back<T>(&mut self, arena: &mut Arena<LinkNode<T>>, id: SlotId) -> bool {
        if !arena.contains(id) {
            return false;
        }
        if Some(id) == self.tail {
            return true;
        }

        let (prev, next) = {
            let node = match arena.get(id) {
                Some(node) => node,
                None => return false,
            };
            (node.prev, node.next)
        };
        if let Some(prev_id) = prev {
            if let Some(prev_node) = arena.get_mut(prev_id) {
                prev_node.next = next;
            }
        } else {
            self.head = next;
        }
        if let Some(next_id) = next {
            if let Some(next_node) = arena.get_mut(next_id) {
                next_node.prev = prev;
            }
        }

        let old_tail = self.tail;
        if let Some(node) = arena.get_mut(id) {
            node.prev = old_tail;
            node.next = None;
        }
        if let Some(tail_id) = old_tail {
            if let Some(tail_node) = arena.get_mut(tail_id) {
                tail_node.next = Some(id);
            }
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        true
    }

    /// Iterates values front to back.
    pub fn iter<'a, T>(&self, arena: &'a Arena<LinkNode<T>>) -> PageListIter<'a, T> {
        PageListIter {
            arena,
            current: self.head,
        }
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate<T>(&self, arena: &Arena<LinkNode<T>>) {
        if self.head.is_none() || self.tail.is_none() {
            assert!(self.head.is_none());
            assert!(self.tail.is_none());
            assert_eq!(self.len, 0);
            return;
        }

        let mut count = 0usize;
        let mut prev = None;
        let mut current = self.head;
        while let Some(id) = current {
            let node = arena.get(id).expect("list node missing from arena");
            assert_eq!(node.prev, prev);
            prev = Some(id);
            current = node.next;
            count += 1;
            assert!(count <= self.len);
        }
        assert_eq!(prev, self.tail);
        assert_eq!(count, self.len);
    }
}

pub struct PageListIter<'a, T> {
    arena: &'a Arena<LinkNode<T>>,
    current: Option<SlotId>,
}

impl<'a, T> Iterator for PageListIter<'a, T> {
    type Item = (SlotId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let node = self.arena.get(id)?;
        self.current = node.next;
        Some((id, &node.value))
    }
}
