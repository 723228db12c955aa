//! Page cache owned by a single worker.

use crate::arena::{PageArena, SlotId};
use crate::hash::HashChains;
use crate::lru::LruList;
use crate::page::Page;
use ember_common::page::{FileId, PageKey};
use ember_common::{CacheStats, EmberError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Configuration for a page cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Byte budget for resident pages.
    pub cache_max: u64,
    /// Number of hash buckets.
    pub hashsize: u32,
}

/// Destination for dirty pages leaving the cache.
pub trait WriteBack {
    /// Writes a dirty page to its backing file.
    fn write_back(&mut self, key: PageKey, data: &[u8]) -> Result<()>;

    /// Called after a page has been removed from the cache.
    fn evicted(&mut self, _key: PageKey) {}
}

impl<F> WriteBack for F
where
    F: FnMut(PageKey, &[u8]) -> Result<()>,
{
    fn write_back(&mut self, key: PageKey, data: &[u8]) -> Result<()> {
        self(key, data)
    }
}

/// Page cache with hash lookup, LRU eviction and a byte budget.
///
/// Every resident page sits in exactly one hash chain and at exactly one
/// LRU position, and `cache_bytes` is the sum of resident page sizes.
/// The cache is not synchronized; one worker thread owns it.
pub struct PageCache {
    config: CacheConfig,
    arena: PageArena,
    chains: HashChains,
    lru: LruList,
    /// Bytes held by resident pages.
    cache_bytes: u64,
    stats: Arc<CacheStats>,
}

impl PageCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_stats(config, Arc::new(CacheStats::new()))
    }

    /// Creates an empty cache that reports into `stats`.
    pub fn with_stats(config: CacheConfig, stats: Arc<CacheStats>) -> Result<Self> {
        if config.cache_max == 0 {
            return Err(EmberError::InvalidParameter {
                name: "cache_max".to_string(),
                value: "0".to_string(),
            });
        }
        if config.hashsize == 0 {
            return Err(EmberError::InvalidParameter {
                name: "hashsize".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Self {
            config,
            arena: PageArena::new(),
            chains: HashChains::new(config.hashsize),
            lru: LruList::new(),
            cache_bytes: 0,
            stats,
        })
    }

    pub fn cache_max(&self) -> u64 {
        self.config.cache_max
    }

    pub fn cache_bytes(&self) -> u64 {
        self.cache_bytes
    }

    pub fn hashsize(&self) -> u32 {
        self.config.hashsize
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    /// Returns true if the page is resident. Does not affect recency.
    pub fn contains(&self, key: PageKey) -> bool {
        self.chains.find(&self.arena, key).is_some()
    }

    /// Returns a resident page without affecting recency.
    pub fn peek(&self, key: PageKey) -> Option<&Page> {
        let id = self.chains.find(&self.arena, key)?;
        Some(&self.arena[id].page)
    }

    /// Mutable access to a resident page without affecting recency or stats.
    pub fn peek_mut(&mut self, key: PageKey) -> Option<&mut Page> {
        let id = self.chains.find(&self.arena, key)?;
        Some(&mut self.arena[id].page)
    }

    /// Looks up a page. `None` is a miss.
    ///
    /// A hit moves the page to the most-recently-used end.
    pub fn lookup(&mut self, key: PageKey) -> Option<&mut Page> {
        match self.chains.find(&self.arena, key) {
            Some(id) => {
                self.stats.record_hit();
                self.lru.touch(&mut self.arena, id);
                Some(&mut self.arena[id].page)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Inserts a page that is not already resident.
    ///
    /// Evicts least-recently-used pages until the new page fits, writing
    /// dirty victims back through `wb`. A failed write-back aborts the
    /// insert and leaves the victim resident.
    ///
    /// A page larger than the whole budget fails with `PageTooLarge` before
    /// anything is evicted, so resident pages survive the failed insert.
    pub fn insert<W: WriteBack>(&mut self, page: Page, wb: &mut W) -> Result<&mut Page> {
        let key = page.key();
        let size = page.size();

        if self.contains(key) {
            return Err(EmberError::InvalidArgument(format!(
                "page {} is already resident",
                key
            )));
        }
        if size > self.config.cache_max {
            return Err(EmberError::PageTooLarge {
                size,
                cache_max: self.config.cache_max,
            });
        }

        while self.cache_bytes + size > self.config.cache_max {
            let victim = self.lru.back().ok_or_else(|| {
                EmberError::ResourceExhausted(format!("no room for page {} in empty cache", key))
            })?;
            self.evict_slot(victim, wb)?;
        }

        let id = self.arena.alloc(page);
        self.chains.insert(&mut self.arena, id);
        self.lru.push_front(&mut self.arena, id);
        self.cache_bytes += size;

        Ok(&mut self.arena[id].page)
    }

    /// Writes back and removes every page belonging to `file_id`.
    ///
    /// Stops at the first failed write-back; pages already evicted stay
    /// evicted and the rest remain resident. Returns the number evicted.
    pub fn evict_file<W: WriteBack>(&mut self, file_id: FileId, wb: &mut W) -> Result<usize> {
        let victims = self.file_slots(file_id);
        let count = victims.len();
        for id in victims {
            self.evict_slot(id, wb)?;
        }
        if count > 0 {
            debug!(file_id = %file_id, pages = count, "evicted file pages");
        }
        Ok(count)
    }

    /// Writes back and removes every resident page, least recently used
    /// first.
    ///
    /// Unlike [`PageCache::evict_file`] a failed write-back does not stop the
    /// sweep: the failing page stays resident and the first error is
    /// returned after every other page has been tried.
    pub fn evict_all<W: WriteBack>(&mut self, wb: &mut W) -> Result<usize> {
        let mut victims: Vec<SlotId> = self.lru.iter(&self.arena).collect();
        victims.reverse();

        let mut evicted = 0;
        let mut first_err = None;
        for id in victims {
            match self.evict_slot(id, wb) {
                Ok(()) => evicted += 1,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(evicted),
        }
    }

    /// Writes back dirty pages of `file_id` without evicting them.
    ///
    /// Returns the number of pages written.
    pub fn sync_file<W: WriteBack>(&mut self, file_id: FileId, wb: &mut W) -> Result<usize> {
        let mut written = 0;
        for id in self.file_slots(file_id) {
            if self.arena[id].page.is_dirty() {
                self.write_back_slot(id, wb)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Returns resident keys from most to least recently used.
    pub fn lru_keys(&self) -> Vec<PageKey> {
        self.lru
            .iter(&self.arena)
            .map(|id| self.arena[id].page.key())
            .collect()
    }

    /// Checks the structural invariants of the cache.
    ///
    /// Every resident page must be linked in exactly one hash chain (the
    /// one its key hashes to) and exactly once in the LRU list, and the
    /// byte total must match the resident pages and stay within budget.
    pub fn verify(&self) -> Result<()> {
        let broken = |msg: String| Err(EmberError::Internal(msg));

        let mut in_lru = HashSet::with_capacity(self.arena.len());
        let mut bytes = 0u64;
        let mut prev: Option<SlotId> = None;
        for id in self.lru.iter(&self.arena) {
            let Some(node) = self.arena.get(id) else {
                return broken(format!("LRU references vacant {}", id));
            };
            if node.lru_prev != prev {
                return broken(format!("LRU back link of {} is wrong", id));
            }
            if !in_lru.insert(id) {
                return broken(format!("{} appears twice in LRU", id));
            }
            bytes += node.page.size();
            prev = Some(id);
        }
        if self.lru.back() != prev {
            return broken("LRU tail does not match last node".to_string());
        }
        if in_lru.len() != self.lru.len() || in_lru.len() != self.arena.len() {
            return broken(format!(
                "LRU holds {} pages, arena holds {}",
                in_lru.len(),
                self.arena.len()
            ));
        }

        let mut in_chains = HashSet::with_capacity(self.arena.len());
        for bucket in 0..self.chains.hashsize() {
            for id in self.chains.chain(&self.arena, bucket) {
                if !in_lru.contains(&id) {
                    return broken(format!("{} is chained but not in LRU", id));
                }
                if self.chains.bucket(self.arena[id].page.key()) != bucket {
                    return broken(format!("{} is chained in the wrong bucket", id));
                }
                if !in_chains.insert(id) {
                    return broken(format!("{} is chained twice", id));
                }
            }
        }
        if in_chains.len() != in_lru.len() {
            return broken(format!(
                "{} pages chained, {} in LRU",
                in_chains.len(),
                in_lru.len()
            ));
        }

        if bytes != self.cache_bytes {
            return broken(format!(
                "cache_bytes is {}, resident pages total {}",
                self.cache_bytes, bytes
            ));
        }
        if self.cache_bytes > self.config.cache_max {
            return broken(format!(
                "cache_bytes {} exceeds cache_max {}",
                self.cache_bytes, self.config.cache_max
            ));
        }
        Ok(())
    }

    /// Slots of one file in eviction order (least recently used first).
    fn file_slots(&self, file_id: FileId) -> Vec<SlotId> {
        let mut slots: Vec<SlotId> = self
            .lru
            .iter(&self.arena)
            .filter(|&id| self.arena[id].page.key().file_id == file_id)
            .collect();
        slots.reverse();
        slots
    }

    fn write_back_slot<W: WriteBack>(&mut self, id: SlotId, wb: &mut W) -> Result<()> {
        let page = &mut self.arena[id].page;
        let key = page.key();
        if let Err(e) = wb.write_back(key, page.data()) {
            self.stats.record_flush_failure();
            warn!(page = %key, error = %e, "page write-back failed");
            return Err(EmberError::FlushFailed {
                page: key,
                reason: e.to_string(),
            });
        }
        page.set_dirty(false);
        self.stats.record_write();
        Ok(())
    }

    /// Removes one page from both structures, writing it back first if dirty.
    fn evict_slot<W: WriteBack>(&mut self, id: SlotId, wb: &mut W) -> Result<()> {
        if self.arena[id].page.is_dirty() {
            self.write_back_slot(id, wb)?;
        }

        self.chains.remove(&mut self.arena, id);
        self.lru.unlink(&mut self.arena, id);
        let page = self
            .arena
            .release(id)
            .ok_or_else(|| EmberError::Internal(format!("evicted {} was vacant", id)))?;
        self.cache_bytes -= page.size();
        self.stats.record_eviction();
        debug!(page = %page.key(), cache_bytes = self.cache_bytes, "evicted page");
        wb.evicted(page.key());
        Ok(())
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("pages", &self.len())
            .field("cache_bytes", &self.cache_bytes)
            .field("cache_max", &self.config.cache_max)
            .field("hashsize", &self.config.hashsize)
            .finish()
    }
}
