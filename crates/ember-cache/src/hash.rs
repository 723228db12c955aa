//! Hash bucket chains keyed by (file id, address).

use crate::arena::{PageArena, SlotId};
use ember_common::page::PageKey;

/// Spreads file ids so different files with equal addresses land apart.
const FILE_ID_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// Singly linked collision chains, one per bucket. New pages go to the head.
pub(crate) struct HashChains {
    heads: Vec<Option<SlotId>>,
}

impl HashChains {
    /// Creates `hashsize` empty chains. `hashsize` must be non-zero.
    pub(crate) fn new(hashsize: u32) -> Self {
        Self {
            heads: vec![None; hashsize as usize],
        }
    }

    pub(crate) fn hashsize(&self) -> usize {
        self.heads.len()
    }

    /// Returns the bucket for a key.
    ///
    /// Addresses congruent modulo `hashsize` within one file share a bucket.
    #[inline]
    pub(crate) fn bucket(&self, key: PageKey) -> usize {
        let n = self.heads.len() as u64;
        let spread = (key.file_id.0 as u64).wrapping_mul(FILE_ID_MULTIPLIER) % n;
        ((spread + key.addr as u64 % n) % n) as usize
    }

    /// Finds the slot holding `key`, comparing both fields.
    pub(crate) fn find(&self, arena: &PageArena, key: PageKey) -> Option<SlotId> {
        let mut cursor = self.heads[self.bucket(key)];
        while let Some(id) = cursor {
            let node = &arena[id];
            if node.page.key() == key {
                return Some(id);
            }
            cursor = node.hash_next;
        }
        None
    }

    /// Links a slot at the head of its bucket chain.
    pub(crate) fn insert(&mut self, arena: &mut PageArena, id: SlotId) {
        let bucket = self.bucket(arena[id].page.key());
        arena[id].hash_next = self.heads[bucket];
        self.heads[bucket] = Some(id);
    }

    /// Unlinks a slot from its bucket chain. Returns false if it was not linked.
    pub(crate) fn remove(&mut self, arena: &mut PageArena, id: SlotId) -> bool {
        let bucket = self.bucket(arena[id].page.key());
        let next = arena[id].hash_next.take();

        if self.heads[bucket] == Some(id) {
            self.heads[bucket] = next;
            return true;
        }

        let mut cursor = self.heads[bucket];
        while let Some(prev) = cursor {
            if arena[prev].hash_next == Some(id) {
                arena[prev].hash_next = next;
                return true;
            }
            cursor = arena[prev].hash_next;
        }
        false
    }

    /// Returns the slots chained in one bucket, head first.
    pub(crate) fn chain(&self, arena: &PageArena, bucket: usize) -> Vec<SlotId> {
        let mut out = Vec::new();
        let mut cursor = self.heads[bucket];
        while let Some(id) = cursor {
            out.push(id);
            cursor = arena[id].hash_next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;
    use ember_common::page::FileId;

    fn add(arena: &mut PageArena, chains: &mut HashChains, file: u32, addr: u32) -> SlotId {
        let id = arena.alloc(Page::zeroed(PageKey::new(FileId(file), addr), 8));
        chains.insert(arena, id);
        id
    }

    #[test]
    fn test_congruent_addresses_share_bucket() {
        let chains = HashChains::new(8);
        let b0 = chains.bucket(PageKey::new(FileId(4), 0));
        assert_eq!(chains.bucket(PageKey::new(FileId(4), 8)), b0);
        assert_eq!(chains.bucket(PageKey::new(FileId(4), 16)), b0);
        assert!(b0 < 8);
    }

    #[test]
    fn test_find_walks_chain() {
        let mut arena = PageArena::new();
        let mut chains = HashChains::new(8);
        let a = add(&mut arena, &mut chains, 1, 0);
        let b = add(&mut arena, &mut chains, 1, 8);
        let c = add(&mut arena, &mut chains, 1, 16);

        let bucket = chains.bucket(PageKey::new(FileId(1), 0));
        assert_eq!(chains.chain(&arena, bucket), vec![c, b, a]);

        assert_eq!(chains.find(&arena, PageKey::new(FileId(1), 8)), Some(b));
        assert_eq!(chains.find(&arena, PageKey::new(FileId(1), 24)), None);
        assert_eq!(chains.find(&arena, PageKey::new(FileId(2), 8)), None);
    }

    #[test]
    fn test_remove_middle_and_head() {
        let mut arena = PageArena::new();
        let mut chains = HashChains::new(1);
        let a = add(&mut arena, &mut chains, 1, 1);
        let b = add(&mut arena, &mut chains, 1, 2);
        let c = add(&mut arena, &mut chains, 1, 3);

        assert!(chains.remove(&mut arena, b));
        assert_eq!(chains.chain(&arena, 0), vec![c, a]);
        assert!(chains.remove(&mut arena, c));
        assert_eq!(chains.chain(&arena, 0), vec![a]);
        assert!(!chains.remove(&mut arena, b));
        assert_eq!(chains.hashsize(), 1);
    }
}
