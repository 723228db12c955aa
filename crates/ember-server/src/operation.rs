//! Operations submitted to workers and their replies.

use crate::handle::DatabaseHandle;
use bytes::Bytes;
use ember_common::page::{FileId, PageAddr};
use ember_common::{EmberError, Result};
use std::fmt;
use std::sync::mpsc;

/// Identifies the caller context an operation was issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}

/// Resume point for a record scan: a record page and an entry within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanPosition {
    /// Record page index, counted from the root address.
    pub bucket: u32,
    /// Entry index within that page.
    pub entry: usize,
}

/// Work requested against one database.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Get { key: Bytes },
    Put { key: Bytes, value: Bytes },
    Delete { key: Bytes },
    /// Returns up to `limit` records starting at `from`.
    Scan { from: ScanPosition, limit: usize },
    /// Reads a raw page through the cache.
    ReadPage { addr: PageAddr },
    /// Overwrites a raw page in the cache. Short data is zero-padded.
    WritePage { addr: PageAddr, data: Bytes },
    /// Writes back the database's dirty pages held by the worker.
    Sync,
    /// Writes back and drops the database's pages held by the worker.
    EvictFile,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Get { .. } => "get",
            Request::Put { .. } => "put",
            Request::Delete { .. } => "delete",
            Request::Scan { .. } => "scan",
            Request::ReadPage { .. } => "read_page",
            Request::WritePage { .. } => "write_page",
            Request::Sync => "sync",
            Request::EvictFile => "evict_file",
        }
    }
}

/// Successful result of a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Result of `Get`.
    Value(Option<Bytes>),
    /// Result of `Put` and `WritePage`.
    Stored,
    /// Result of `Delete`: whether the key existed.
    Deleted(bool),
    /// Result of `Scan`. `next` is `None` once every record page is read.
    Scanned {
        entries: Vec<(Bytes, Bytes)>,
        next: Option<ScanPosition>,
    },
    /// Result of `ReadPage`.
    Page(Bytes),
    /// Result of `Sync` and `EvictFile`: pages written or evicted.
    Pages(usize),
}

/// A request bound to a caller context and a database.
#[derive(Debug, Clone)]
pub struct Operation {
    context: ContextId,
    file_id: FileId,
    request: Request,
}

impl Operation {
    pub fn new(context: ContextId, handle: &DatabaseHandle, request: Request) -> Self {
        Self {
            context,
            file_id: handle.file_id(),
            request,
        }
    }

    pub(crate) fn for_file(context: ContextId, file_id: FileId, request: Request) -> Self {
        Self {
            context,
            file_id,
            request,
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn into_parts(self) -> (ContextId, FileId, Request) {
        (self.context, self.file_id, self.request)
    }
}

/// An operation queued on a worker together with its reply channel.
pub(crate) struct Envelope {
    pub(crate) op: Operation,
    pub(crate) reply: mpsc::SyncSender<Result<Reply>>,
}

impl Envelope {
    pub(crate) fn new(op: Operation) -> (Self, mpsc::Receiver<Result<Reply>>) {
        let (reply, receiver) = mpsc::sync_channel(1);
        (Self { op, reply }, receiver)
    }
}

/// Completion handle for a submitted operation.
#[derive(Debug)]
pub struct Ticket {
    worker: usize,
    receiver: mpsc::Receiver<Result<Reply>>,
}

impl Ticket {
    pub(crate) fn new(worker: usize, receiver: mpsc::Receiver<Result<Reply>>) -> Self {
        Self { worker, receiver }
    }

    /// Index of the worker the operation was queued on.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Blocks until the worker has executed the operation.
    pub fn wait(self) -> Result<Reply> {
        self.receiver
            .recv()
            .map_err(|_| EmberError::ShuttingDown)?
    }

    /// Returns the reply if the operation has already completed.
    pub fn try_wait(&self) -> Option<Result<Reply>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(EmberError::ShuttingDown)),
        }
    }
}

/// How `submit` picks the worker for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerSelector {
    /// Same database, same worker. Keeps each page in at most one cache.
    #[default]
    ByFile,
    /// Rotate across workers. Only safe for read-only traffic, since a
    /// page written through one worker may be stale in another.
    RoundRobin,
    /// A specific worker index.
    Fixed(usize),
}
