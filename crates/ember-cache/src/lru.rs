//! Recency list for eviction.

use crate::arena::{PageArena, SlotId};

/// Doubly linked list over arena slots.
///
/// Head is the most recently used page, tail the least recently used.
#[derive(Debug, Default)]
pub(crate) struct LruList {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl LruList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Returns the least recently used slot.
    pub(crate) fn back(&self) -> Option<SlotId> {
        self.tail
    }

    #[cfg(test)]
    pub(crate) fn front(&self) -> Option<SlotId> {
        self.head
    }

    /// Links an unlinked slot at the most-recently-used end.
    pub(crate) fn push_front(&mut self, arena: &mut PageArena, id: SlotId) {
        arena[id].lru_prev = None;
        arena[id].lru_next = self.head;
        match self.head {
            Some(old) => arena[old].lru_prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    /// Unlinks a slot from the list.
    pub(crate) fn unlink(&mut self, arena: &mut PageArena, id: SlotId) {
        let prev = arena[id].lru_prev.take();
        let next = arena[id].lru_next.take();
        match prev {
            Some(p) => arena[p].lru_next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => arena[n].lru_prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// Marks a linked slot as most recently used.
    pub(crate) fn touch(&mut self, arena: &mut PageArena, id: SlotId) {
        if self.head == Some(id) {
            return;
        }
        self.unlink(arena, id);
        self.push_front(arena, id);
    }

    /// Returns slots from most to least recently used.
    pub(crate) fn iter<'a>(&self, arena: &'a PageArena) -> LruIter<'a> {
        LruIter {
            arena,
            cursor: self.head,
        }
    }
}

pub(crate) struct LruIter<'a> {
    arena: &'a PageArena,
    cursor: Option<SlotId>,
}

impl Iterator for LruIter<'_> {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        let id = self.cursor?;
        self.cursor = self.arena[id].lru_next;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;
    use ember_common::page::{FileId, PageKey};

    fn setup(n: u32) -> (PageArena, LruList, Vec<SlotId>) {
        let mut arena = PageArena::new();
        let mut lru = LruList::new();
        let ids: Vec<_> = (0..n)
            .map(|i| {
                let id = arena.alloc(Page::zeroed(PageKey::new(FileId(1), i), 8));
                lru.push_front(&mut arena, id);
                id
            })
            .collect();
        (arena, lru, ids)
    }

    #[test]
    fn test_push_front_order() {
        let (arena, lru, ids) = setup(3);
        let order: Vec<_> = lru.iter(&arena).collect();
        assert_eq!(order, vec![ids[2], ids[1], ids[0]]);
        assert_eq!(lru.back(), Some(ids[0]));
        assert_eq!(lru.front(), Some(ids[2]));
        assert_eq!(lru.len(), 3);
    }

    #[test]
    fn test_touch_moves_to_front() {
        let (mut arena, mut lru, ids) = setup(3);
        lru.touch(&mut arena, ids[0]);
        let order: Vec<_> = lru.iter(&arena).collect();
        assert_eq!(order, vec![ids[0], ids[2], ids[1]]);
        assert_eq!(lru.back(), Some(ids[1]));
    }

    #[test]
    fn test_unlink_ends_and_middle() {
        let (mut arena, mut lru, ids) = setup(4);
        lru.unlink(&mut arena, ids[0]);
        assert_eq!(lru.back(), Some(ids[1]));
        lru.unlink(&mut arena, ids[3]);
        assert_eq!(lru.front(), Some(ids[2]));
        lru.unlink(&mut arena, ids[2]);
        let order: Vec<_> = lru.iter(&arena).collect();
        assert_eq!(order, vec![ids[1]]);
        lru.unlink(&mut arena, ids[1]);
        assert_eq!(lru.len(), 0);
        assert!(lru.front().is_none());
        assert!(lru.back().is_none());
    }
}
