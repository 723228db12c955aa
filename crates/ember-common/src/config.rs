//! Configuration structures for EmberDB.

use crate::error::{EmberError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use sysinfo::System;

/// Default per-worker cache budget (20 MB).
pub const DEFAULT_CACHE_BYTES: u64 = 20 * 1024 * 1024;

/// Default number of operations a worker queue holds before rejecting.
pub const DEFAULT_QUEUE_CAPACITY: usize = 40;

/// Default number of hash buckets per worker cache.
pub const DEFAULT_HASHSIZE: u32 = 1021;

/// Default database page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Smallest page size a database may be created with.
pub const MIN_PAGE_SIZE: u32 = 64;

/// Default number of record pages in a new database.
pub const DEFAULT_BUCKET_PAGES: u32 = 64;

/// Most record pages a database may have. Page 0 holds the descriptor, so
/// record pages start at address 1 and the last one must stay addressable.
pub const MAX_BUCKET_PAGES: u32 = u32::MAX - 1;

/// How a submission behaves when the target worker queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubmitMode {
    /// Return `Busy` immediately.
    #[default]
    NonBlocking,
    /// Wait for a free slot; fails only if the environment shuts down.
    Blocking,
}

/// Environment configuration, supplied by the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Number of worker threads, each owning one page cache.
    pub workers: usize,
    /// Per-worker cache budget in bytes.
    pub cache_max: u64,
    /// Number of hash buckets per worker cache.
    pub hashsize: u32,
    /// Operations queued per worker before submissions are rejected.
    pub queue_capacity: usize,
    /// Directory for database files.
    pub data_dir: PathBuf,
    /// Enable fsync after page writes.
    pub fsync_enabled: bool,
    /// Default submission mode for cursors.
    pub submit_mode: SubmitMode,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus(),
            cache_max: DEFAULT_CACHE_BYTES,
            hashsize: DEFAULT_HASHSIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
            submit_mode: SubmitMode::NonBlocking,
        }
    }
}

impl EnvConfig {
    /// Creates a configuration with the per-worker cache sized from 25% of
    /// available system RAM, split across workers.
    ///
    /// Never goes below the 20 MB default per worker.
    pub fn auto_sized() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let mut config = Self::default();
        let target = sys.available_memory() / 4;
        let per_worker = target / config.workers.max(1) as u64;
        config.cache_max = per_worker.max(DEFAULT_CACHE_BYTES);
        config
    }

    /// Checks the configuration before an environment is started.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(invalid("workers", self.workers));
        }
        if self.cache_max == 0 {
            return Err(invalid("cache_max", self.cache_max));
        }
        if self.hashsize == 0 {
            return Err(invalid("hashsize", self.hashsize));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", self.queue_capacity));
        }
        Ok(())
    }

}

/// Per-database configuration passed to `open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Page size in bytes for a newly created file.
    pub page_size: u32,
    /// Number of record pages for a newly created file.
    pub bucket_pages: u32,
    /// Create the file if it does not exist.
    pub create: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            bucket_pages: DEFAULT_BUCKET_PAGES,
            create: true,
        }
    }
}

impl DatabaseConfig {
    /// Checks the geometry used when a file is created.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(invalid("page_size", self.page_size));
        }
        if self.bucket_pages == 0 || self.bucket_pages > MAX_BUCKET_PAGES {
            return Err(invalid("bucket_pages", self.bucket_pages));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: impl ToString) -> EmberError {
    EmberError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// Returns the number of available CPUs.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}
