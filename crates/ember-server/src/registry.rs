//! Table of open databases shared by the environment and its workers.
//!
//! The lock is only held for map updates and id allocation. File I/O for
//! open and close happens outside it.

use crate::handle::Database;
use crate::operation::ContextId;
use ember_common::page::FileId;
use ember_common::{EmberError, Result};
use ember_storage::{BackingFile, FileDescriptor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct RegistryInner {
    databases: HashMap<FileId, Arc<Database>>,
    next_file_id: u32,
    next_context_id: u64,
}

pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                databases: HashMap::new(),
                next_file_id: 1,
                next_context_id: 1,
            }),
        }
    }

    /// Registers an opened file under a fresh file id.
    ///
    /// A name can only be registered once at a time.
    pub(crate) fn register(
        &self,
        name: &str,
        file: Arc<dyn BackingFile>,
        descriptor: FileDescriptor,
    ) -> Result<Arc<Database>> {
        let mut inner = self.inner.lock();
        if inner.databases.values().any(|db| db.name() == name) {
            return Err(EmberError::InvalidArgument(format!(
                "database {} is already open",
                name
            )));
        }

        let file_id = FileId(inner.next_file_id);
        inner.next_file_id = inner
            .next_file_id
            .checked_add(1)
            .ok_or_else(|| EmberError::ResourceExhausted("file ids exhausted".to_string()))?;

        let db = Arc::new(Database::new(file_id, name, file, descriptor));
        inner.databases.insert(file_id, Arc::clone(&db));
        Ok(db)
    }

    pub(crate) fn deregister(&self, file_id: FileId) -> Option<Arc<Database>> {
        self.inner.lock().databases.remove(&file_id)
    }

    pub(crate) fn get(&self, file_id: FileId) -> Result<Arc<Database>> {
        self.inner
            .lock()
            .databases
            .get(&file_id)
            .cloned()
            .ok_or(EmberError::UnknownFile { file_id })
    }

    pub(crate) fn allocate_context_id(&self) -> Result<ContextId> {
        let mut inner = self.inner.lock();
        let id = inner.next_context_id;
        inner.next_context_id = id
            .checked_add(1)
            .ok_or_else(|| EmberError::ResourceExhausted("context ids exhausted".to_string()))?;
        Ok(ContextId(id))
    }

    /// Registered databases in file id order.
    pub(crate) fn databases(&self) -> Vec<Arc<Database>> {
        let mut dbs: Vec<_> = self.inner.lock().databases.values().cloned().collect();
        dbs.sort_by_key(|db| db.file_id());
        dbs
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().databases.len()
    }
}
