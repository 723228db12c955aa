//! Per-client cursors over an open database.

use crate::environment::Environment;
use crate::handle::DatabaseHandle;
use crate::operation::{ContextId, Operation, Reply, Request, ScanPosition, WorkerSelector};
use bytes::Bytes;
use ember_common::{EmberError, Result, SubmitMode};

/// Forwards record operations for one database and tracks a scan position.
///
/// A cursor owns no cache state. Operations are routed by file, so every
/// request of a cursor runs on the worker caching that database.
#[derive(Debug)]
pub struct Cursor<'env> {
    env: &'env Environment,
    handle: DatabaseHandle,
    context: ContextId,
    mode: SubmitMode,
    position: Option<ScanPosition>,
}

impl<'env> Cursor<'env> {
    pub(crate) fn new(
        env: &'env Environment,
        handle: DatabaseHandle,
        context: ContextId,
        mode: SubmitMode,
    ) -> Self {
        Self {
            env,
            handle,
            context,
            mode,
            position: Some(ScanPosition::default()),
        }
    }

    pub fn with_submit_mode(mut self, mode: SubmitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn handle(&self) -> &DatabaseHandle {
        &self.handle
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Next scan position, or `None` once the scan reached the end.
    pub fn position(&self) -> Option<ScanPosition> {
        self.position
    }

    pub fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        match self.call(Request::Get { key: key.into() })? {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected("get", other)),
        }
    }

    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let request = Request::Put {
            key: key.into(),
            value: value.into(),
        };
        match self.call(request)? {
            Reply::Stored => Ok(()),
            other => Err(unexpected("put", other)),
        }
    }

    /// Removes a key. Returns whether it was present.
    pub fn delete(&self, key: impl Into<Bytes>) -> Result<bool> {
        match self.call(Request::Delete { key: key.into() })? {
            Reply::Deleted(existed) => Ok(existed),
            other => Err(unexpected("delete", other)),
        }
    }

    /// Returns up to `limit` records from the current position and advances.
    ///
    /// An empty result means the scan is complete. Records are ordered by
    /// key within a record page only.
    pub fn scan(&mut self, limit: usize) -> Result<Vec<(Bytes, Bytes)>> {
        let Some(from) = self.position else {
            return Ok(Vec::new());
        };
        match self.call(Request::Scan { from, limit })? {
            Reply::Scanned { entries, next } => {
                self.position = next;
                Ok(entries)
            }
            other => Err(unexpected("scan", other)),
        }
    }

    /// Restarts the scan from the first record page.
    pub fn reset(&mut self) {
        self.position = Some(ScanPosition::default());
    }

    /// Writes back this database's dirty pages without evicting them.
    pub fn sync(&self) -> Result<usize> {
        match self.call(Request::Sync)? {
            Reply::Pages(n) => Ok(n),
            other => Err(unexpected("sync", other)),
        }
    }

    fn call(&self, request: Request) -> Result<Reply> {
        let op = Operation::new(self.context, &self.handle, request);
        self.env
            .submit(op, WorkerSelector::ByFile, self.mode)?
            .wait()
    }
}

fn unexpected(request: &str, reply: Reply) -> EmberError {
    EmberError::Internal(format!("unexpected reply to {}: {:?}", request, reply))
}
