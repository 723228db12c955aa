//! Open database handles.

use ember_common::page::{FileId, PageAddr};
use ember_common::{CacheStats, EmberError, Result};
use ember_storage::{bucket_for_key, BackingFile, FileDescriptor};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a database handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Accepting operations.
    Open,
    /// Close started; new operations are rejected. A failed close leaves
    /// the handle here so the close can be retried.
    Closing,
    /// Pages flushed and the handle deregistered.
    Closed,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleState::Open => "open",
            HandleState::Closing => "closing",
            HandleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Registry entry for an open database. Shared by all workers.
pub(crate) struct Database {
    file_id: FileId,
    name: Arc<str>,
    file: Arc<dyn BackingFile>,
    descriptor: FileDescriptor,
    state: Mutex<HandleState>,
    stats: CacheStats,
}

impl Database {
    pub(crate) fn new(
        file_id: FileId,
        name: &str,
        file: Arc<dyn BackingFile>,
        descriptor: FileDescriptor,
    ) -> Self {
        Self {
            file_id,
            name: Arc::from(name),
            file,
            descriptor,
            state: Mutex::new(HandleState::Open),
            stats: CacheStats::new(),
        }
    }

    pub(crate) fn file_id(&self) -> FileId {
        self.file_id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn file(&self) -> &dyn BackingFile {
        self.file.as_ref()
    }

    pub(crate) fn page_size(&self) -> usize {
        self.descriptor.page_size as usize
    }

    pub(crate) fn root_addr(&self) -> PageAddr {
        self.descriptor.root_addr
    }

    pub(crate) fn bucket_pages(&self) -> u32 {
        self.descriptor.bucket_pages
    }

    /// Record page holding `key`.
    pub(crate) fn bucket_for(&self, key: &[u8]) -> PageAddr {
        bucket_for_key(key, self.descriptor.root_addr, self.descriptor.bucket_pages)
    }

    pub(crate) fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub(crate) fn state(&self) -> HandleState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: HandleState) {
        *self.state.lock() = state;
    }

    /// Fails unless the handle accepts new operations.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.state() {
            HandleState::Open => Ok(()),
            state => Err(EmberError::HandleNotOpen {
                file_id: self.file_id,
                state: state.to_string(),
            }),
        }
    }

    /// Moves an open or half-closed handle to `Closing`.
    pub(crate) fn begin_close(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            HandleState::Open | HandleState::Closing => {
                *state = HandleState::Closing;
                Ok(())
            }
            HandleState::Closed => Err(EmberError::HandleNotOpen {
                file_id: self.file_id,
                state: HandleState::Closed.to_string(),
            }),
        }
    }

    pub(crate) fn handle(&self) -> DatabaseHandle {
        DatabaseHandle {
            file_id: self.file_id,
            name: Arc::clone(&self.name),
            page_size: self.descriptor.page_size,
            bucket_pages: self.descriptor.bucket_pages,
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("file_id", &self.file_id)
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .finish()
    }
}

/// Caller-side reference to an open database.
///
/// Cheap to clone; operations carry only the file id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHandle {
    file_id: FileId,
    name: Arc<str>,
    page_size: u32,
    bucket_pages: u32,
}

impl DatabaseHandle {
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn bucket_pages(&self) -> u32 {
        self.bucket_pages
    }
}
