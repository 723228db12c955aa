//! Per-worker page cache for EmberDB.
//!
//! This crate provides the private cache each worker thread owns:
//! - Slot arena holding every resident page
//! - Hash bucket chains for lookup by (file id, address)
//! - LRU list ordering pages for eviction
//! - Byte budget enforcement with write-back of dirty victims

mod arena;
mod cache;
mod hash;
mod lru;
mod page;

pub use arena::SlotId;
pub use cache::{CacheConfig, PageCache, WriteBack};
pub use page::Page;
