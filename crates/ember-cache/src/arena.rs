//! Dense slot arena for resident pages.
//!
//! Every resident page lives in one slot. Hash chains and the LRU list
//! link slots by index, so unlinking a page never leaves a dangling
//! reference in either structure.

use crate::page::Page;
use std::ops::{Index, IndexMut};

/// Index of a slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot:{}", self.0)
    }
}

/// A resident page together with its links.
pub(crate) struct Node {
    pub(crate) page: Page,
    /// Next node in the same hash bucket chain.
    pub(crate) hash_next: Option<SlotId>,
    /// Neighbour towards the most-recently-used end.
    pub(crate) lru_prev: Option<SlotId>,
    /// Neighbour towards the least-recently-used end.
    pub(crate) lru_next: Option<SlotId>,
}

#[derive(Default)]
pub(crate) struct PageArena {
    slots: Vec<Option<Node>>,
    /// Vacant slots available for reuse.
    free: Vec<SlotId>,
    len: usize,
}

impl PageArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stores an unlinked page and returns its slot.
    pub(crate) fn alloc(&mut self, page: Page) -> SlotId {
        let node = Node {
            page,
            hash_next: None,
            lru_prev: None,
            lru_next: None,
        };
        self.len += 1;
        match self.free.pop() {
            Some(id) => {
                self.slots[id.0 as usize] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                SlotId((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Vacates a slot and returns its page. The caller unlinks it first.
    pub(crate) fn release(&mut self, id: SlotId) -> Option<Page> {
        let node = self.slots.get_mut(id.0 as usize)?.take()?;
        self.free.push(id);
        self.len -= 1;
        Some(node.page)
    }

    pub(crate) fn get(&self, id: SlotId) -> Option<&Node> {
        self.slots.get(id.0 as usize)?.as_ref()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Iterates over occupied slots.
    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SlotId, &Node)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|node| (SlotId(i as u32), node)))
    }
}

impl Index<SlotId> for PageArena {
    type Output = Node;

    fn index(&self, id: SlotId) -> &Node {
        match self.slots[id.0 as usize].as_ref() {
            Some(node) => node,
            None => panic!("{} is vacant", id),
        }
    }
}

impl IndexMut<SlotId> for PageArena {
    fn index_mut(&mut self, id: SlotId) -> &mut Node {
        match self.slots[id.0 as usize].as_mut() {
            Some(node) => node,
            None => panic!("{} is vacant", id),
        }
    }
}
