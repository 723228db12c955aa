//! Worker threads.
//!
//! Each worker owns one page cache and drains one operation queue in FIFO
//! order. Pages are only touched by the owning worker, so the cache needs
//! no locking; the registry is the only state shared with other threads.

use crate::handle::Database;
use crate::operation::{Envelope, Reply, Request, ScanPosition};
use crate::queue::BoundedQueue;
use crate::registry::Registry;
use bytes::{Bytes, BytesMut};
use ember_cache::{CacheConfig, Page, PageCache, WriteBack};
use ember_common::page::{FileId, PageAddr, PageKey};
use ember_common::{CacheStats, EmberError, Result};
use ember_storage::RecordPage;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Lifecycle of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for an operation.
    Idle = 0,
    /// Executing an operation.
    Running = 1,
    /// Draining its queue after shutdown started.
    Stopping = 2,
    /// Thread has exited.
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// The parts of a worker visible to submitting threads.
pub(crate) struct WorkerShared {
    id: usize,
    queue: BoundedQueue<Envelope>,
    state: AtomicU8,
    stats: Arc<CacheStats>,
}

impl WorkerShared {
    pub(crate) fn new(id: usize, queue_capacity: usize) -> Self {
        Self {
            id,
            queue: BoundedQueue::new(queue_capacity),
            state: AtomicU8::new(WorkerState::Idle as u8),
            stats: Arc::new(CacheStats::new()),
        }
    }

    pub(crate) fn queue(&self) -> &BoundedQueue<Envelope> {
        &self.queue
    }

    pub(crate) fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Writes victims back to whichever database owns them.
///
/// A victim may belong to any database the worker has served, not just the
/// one the current operation targets.
struct RegistryWriteBack<'a> {
    registry: &'a Registry,
    last: Option<Arc<Database>>,
}

impl<'a> RegistryWriteBack<'a> {
    fn new(registry: &'a Registry, current: Option<Arc<Database>>) -> Self {
        Self {
            registry,
            last: current,
        }
    }

    fn database(&mut self, file_id: FileId) -> Result<Arc<Database>> {
        if let Some(db) = &self.last {
            if db.file_id() == file_id {
                return Ok(Arc::clone(db));
            }
        }
        let db = self.registry.get(file_id)?;
        self.last = Some(Arc::clone(&db));
        Ok(db)
    }
}

impl WriteBack for RegistryWriteBack<'_> {
    fn write_back(&mut self, key: PageKey, data: &[u8]) -> Result<()> {
        let db = self.database(key.file_id)?;
        match db.file().write_page(key.addr, data) {
            Ok(()) => {
                db.stats().record_write();
                Ok(())
            }
            Err(e) => {
                db.stats().record_flush_failure();
                Err(e)
            }
        }
    }

    fn evicted(&mut self, key: PageKey) {
        if let Ok(db) = self.database(key.file_id) {
            db.stats().record_eviction();
        }
    }
}

pub(crate) struct Worker {
    shared: Arc<WorkerShared>,
    registry: Arc<Registry>,
    cache: PageCache,
    /// Database of the most recent operation.
    current: Option<Arc<Database>>,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<WorkerShared>,
        registry: Arc<Registry>,
        config: CacheConfig,
    ) -> Result<Self> {
        let cache = PageCache::with_stats(config, Arc::clone(&shared.stats))?;
        Ok(Self {
            shared,
            registry,
            cache,
            current: None,
        })
    }

    /// Starts the worker on a named thread.
    ///
    /// The thread yields the number of pages written back on exit.
    pub(crate) fn spawn(self) -> Result<JoinHandle<Result<usize>>> {
        let name = format!("ember-worker-{}", self.shared.id);
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .map_err(|e| {
                EmberError::ResourceExhausted(format!("failed to spawn worker thread: {}", e))
            })
    }

    /// Drains the queue until it is stopped and empty, then writes back
    /// every resident page.
    fn run(mut self) -> Result<usize> {
        let id = self.shared.id;
        debug!(worker = id, "worker started");

        while let Some(envelope) = self.shared.queue.pop() {
            self.shared.set_state(WorkerState::Running);
            self.execute(envelope);
            let next = if self.shared.queue.is_stopping() {
                WorkerState::Stopping
            } else {
                WorkerState::Idle
            };
            self.shared.set_state(next);
        }

        self.shared.set_state(WorkerState::Stopping);
        let mut wb = RegistryWriteBack::new(&self.registry, self.current.take());
        let result = self.cache.evict_all(&mut wb);
        match &result {
            Ok(pages) => info!(worker = id, pages, "worker stopped"),
            Err(e) => warn!(
                worker = id,
                pages = self.cache.len(),
                error = %e,
                "worker stopped with unflushed pages"
            ),
        }
        self.shared.set_state(WorkerState::Stopped);
        result
    }

    fn execute(&mut self, envelope: Envelope) {
        let Envelope { op, reply } = envelope;
        let (context, file_id, request) = op.into_parts();
        trace!(
            worker = self.shared.id,
            context = %context,
            file_id = %file_id,
            request = request.name(),
            "executing operation"
        );

        let result = self.dispatch(file_id, request);
        if let Err(e) = &result {
            debug!(worker = self.shared.id, file_id = %file_id, error = %e, "operation failed");
        }
        // The submitter may have dropped its ticket.
        let _ = reply.send(result);
    }

    pub(crate) fn dispatch(&mut self, file_id: FileId, request: Request) -> Result<Reply> {
        let db = self.context(file_id)?;
        // Close marks the handle Closing before queueing EvictFile, so any
        // operation queued behind the eviction is refused here.
        if !matches!(request, Request::Sync | Request::EvictFile) {
            db.ensure_open()?;
        }
        match request {
            Request::Get { key } => self.get(&db, key),
            Request::Put { key, value } => self.put(&db, key, value),
            Request::Delete { key } => self.delete(&db, key),
            Request::Scan { from, limit } => self.scan(&db, from, limit),
            Request::ReadPage { addr } => self.read_page(&db, addr),
            Request::WritePage { addr, data } => self.write_page(&db, addr, data),
            Request::Sync => self.sync(&db),
            Request::EvictFile => self.evict_file(&db),
        }
    }

    /// Resolves the database for an operation, reusing the last one.
    fn context(&mut self, file_id: FileId) -> Result<Arc<Database>> {
        if let Some(db) = &self.current {
            if db.file_id() == file_id {
                return Ok(Arc::clone(db));
            }
        }
        let db = self.registry.get(file_id)?;
        self.current = Some(Arc::clone(&db));
        Ok(db)
    }

    /// Returns the cached page, reading it from the backing file on a miss.
    fn fetch(&mut self, db: &Arc<Database>, addr: PageAddr) -> Result<&mut Page> {
        let key = PageKey::new(db.file_id(), addr);
        if self.cache.lookup(key).is_some() {
            db.stats().record_hit();
            return self.resident(key);
        }

        db.stats().record_miss();
        let data = db.file().read_page(addr, db.page_size())?;
        db.stats().record_read();
        self.cache.stats().record_read();

        let mut wb = RegistryWriteBack::new(&self.registry, Some(Arc::clone(db)));
        self.cache.insert(Page::new(key, data), &mut wb)
    }

    fn resident(&mut self, key: PageKey) -> Result<&mut Page> {
        self.cache
            .peek_mut(key)
            .ok_or_else(|| EmberError::Internal(format!("page {} vanished from cache", key)))
    }

    fn records(&mut self, db: &Arc<Database>, addr: PageAddr) -> Result<RecordPage> {
        let page = self.fetch(db, addr)?;
        RecordPage::decode(page.key(), page.data())
    }

    /// Re-encodes a record page into its cached page, marking it dirty.
    fn store_records(&mut self, db: &Arc<Database>, addr: PageAddr, records: &RecordPage) -> Result<()> {
        let key = PageKey::new(db.file_id(), addr);
        let mut image = vec![0u8; db.page_size()];
        records.encode_into(key, &mut image)?;
        self.resident(key)?.copy_from(&image);
        Ok(())
    }

    fn get(&mut self, db: &Arc<Database>, key: Bytes) -> Result<Reply> {
        let records = self.records(db, db.bucket_for(&key))?;
        Ok(Reply::Value(records.get(&key).cloned()))
    }

    fn put(&mut self, db: &Arc<Database>, key: Bytes, value: Bytes) -> Result<Reply> {
        let addr = db.bucket_for(&key);
        let mut records = self.records(db, addr)?;
        records.put(key, value)?;
        self.store_records(db, addr, &records)?;
        Ok(Reply::Stored)
    }

    fn delete(&mut self, db: &Arc<Database>, key: Bytes) -> Result<Reply> {
        let addr = db.bucket_for(&key);
        let mut records = self.records(db, addr)?;
        if records.delete(&key).is_none() {
            return Ok(Reply::Deleted(false));
        }
        self.store_records(db, addr, &records)?;
        Ok(Reply::Deleted(true))
    }

    /// Collects records in page order, then key order within each page.
    fn scan(&mut self, db: &Arc<Database>, from: ScanPosition, limit: usize) -> Result<Reply> {
        if limit == 0 {
            return Err(EmberError::InvalidArgument(
                "scan limit must be positive".to_string(),
            ));
        }

        let mut entries = Vec::new();
        let mut pos = from;
        while pos.bucket < db.bucket_pages() {
            let records = self.records(db, db.root_addr() + pos.bucket)?;
            let start = pos.entry.min(records.len());
            let take = (limit - entries.len()).min(records.len() - start);
            entries.extend_from_slice(&records.entries()[start..start + take]);
            pos.entry = start + take;

            if pos.entry >= records.len() {
                pos = ScanPosition {
                    bucket: pos.bucket + 1,
                    entry: 0,
                };
            }
            if entries.len() == limit {
                break;
            }
        }

        let next = (pos.bucket < db.bucket_pages()).then_some(pos);
        Ok(Reply::Scanned { entries, next })
    }

    fn check_raw_addr(addr: PageAddr) -> Result<()> {
        if addr == 0 {
            return Err(EmberError::InvalidArgument(
                "page 0 holds the file descriptor".to_string(),
            ));
        }
        Ok(())
    }

    fn read_page(&mut self, db: &Arc<Database>, addr: PageAddr) -> Result<Reply> {
        Self::check_raw_addr(addr)?;
        let page = self.fetch(db, addr)?;
        Ok(Reply::Page(Bytes::copy_from_slice(page.data())))
    }

    /// Overwrites a whole page. A miss does not read the old contents.
    fn write_page(&mut self, db: &Arc<Database>, addr: PageAddr, data: Bytes) -> Result<Reply> {
        Self::check_raw_addr(addr)?;
        if data.len() > db.page_size() {
            return Err(EmberError::InvalidArgument(format!(
                "{} bytes do not fit a {} byte page",
                data.len(),
                db.page_size()
            )));
        }

        let key = PageKey::new(db.file_id(), addr);
        if self.cache.lookup(key).is_some() {
            db.stats().record_hit();
            self.resident(key)?.copy_from(&data);
            return Ok(Reply::Stored);
        }

        db.stats().record_miss();
        let mut page = Page::new(key, BytesMut::zeroed(db.page_size()));
        page.copy_from(&data);
        let mut wb = RegistryWriteBack::new(&self.registry, Some(Arc::clone(db)));
        self.cache.insert(page, &mut wb)?;
        Ok(Reply::Stored)
    }

    fn sync(&mut self, db: &Arc<Database>) -> Result<Reply> {
        let mut wb = RegistryWriteBack::new(&self.registry, Some(Arc::clone(db)));
        let written = self.cache.sync_file(db.file_id(), &mut wb)?;
        db.file().sync()?;
        Ok(Reply::Pages(written))
    }

    fn evict_file(&mut self, db: &Arc<Database>) -> Result<Reply> {
        let mut wb = RegistryWriteBack::new(&self.registry, Some(Arc::clone(db)));
        let evicted = self.cache.evict_file(db.file_id(), &mut wb)?;
        if self
            .current
            .as_ref()
            .is_some_and(|current| current.file_id() == db.file_id())
        {
            self.current = None;
        }
        Ok(Reply::Pages(evicted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_common::ErrorKind;
    use ember_storage::{BackingFile, FileDescriptor, MemFile, ROOT_ADDR};

    const PAGE_SIZE: u32 = 256;

    fn setup(cache_max: u64) -> (Worker, Arc<Registry>, Arc<MemFile>, FileId) {
        let registry = Arc::new(Registry::new());
        let file = Arc::new(MemFile::new());
        let descriptor = FileDescriptor {
            page_size: PAGE_SIZE,
            bucket_pages: 4,
            root_addr: ROOT_ADDR,
        };
        descriptor.initialize(file.as_ref()).unwrap();
        let db = registry
            .register("test", Arc::clone(&file) as Arc<dyn BackingFile>, descriptor)
            .unwrap();

        let shared = Arc::new(WorkerShared::new(0, 4));
        let worker = Worker::new(
            shared,
            Arc::clone(&registry),
            CacheConfig {
                cache_max,
                hashsize: 7,
            },
        )
        .unwrap();
        (worker, registry, file, db.file_id())
    }

    fn put(worker: &mut Worker, file_id: FileId, key: &str, value: &str) {
        let reply = worker
            .dispatch(
                file_id,
                Request::Put {
                    key: Bytes::copy_from_slice(key.as_bytes()),
                    value: Bytes::copy_from_slice(value.as_bytes()),
                },
            )
            .unwrap();
        assert_eq!(reply, Reply::Stored);
    }

    fn get(worker: &mut Worker, file_id: FileId, key: &str) -> Option<Bytes> {
        match worker
            .dispatch(
                file_id,
                Request::Get {
                    key: Bytes::copy_from_slice(key.as_bytes()),
                },
            )
            .unwrap()
        {
            Reply::Value(value) => value,
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_put_get_delete() {
        let (mut worker, _registry, _file, file_id) = setup(4096);

        put(&mut worker, file_id, "alpha", "1");
        put(&mut worker, file_id, "beta", "2");
        assert_eq!(get(&mut worker, file_id, "alpha"), Some(Bytes::from("1")));
        assert_eq!(get(&mut worker, file_id, "gamma"), None);

        put(&mut worker, file_id, "alpha", "3");
        assert_eq!(get(&mut worker, file_id, "alpha"), Some(Bytes::from("3")));

        let reply = worker
            .dispatch(file_id, Request::Delete { key: Bytes::from("alpha") })
            .unwrap();
        assert_eq!(reply, Reply::Deleted(true));
        let reply = worker
            .dispatch(file_id, Request::Delete { key: Bytes::from("alpha") })
            .unwrap();
        assert_eq!(reply, Reply::Deleted(false));
        assert_eq!(get(&mut worker, file_id, "alpha"), None);
    }

    #[test]
    fn test_second_read_hits_cache() {
        let (mut worker, registry, _file, file_id) = setup(4096);

        worker.dispatch(file_id, Request::ReadPage { addr: 1 }).unwrap();
        worker.dispatch(file_id, Request::ReadPage { addr: 1 }).unwrap();

        let stats = registry.get(file_id).unwrap().stats().snapshot();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.pages_read, 1);
        assert_eq!(worker.shared.stats().snapshot().pages_read, 1);
    }

    #[test]
    fn test_eviction_writes_back_to_owner() {
        // Room for two pages.
        let (mut worker, registry, file, file_id) = setup(2 * PAGE_SIZE as u64);

        for addr in 1..=3 {
            let data = Bytes::from(vec![addr as u8; 16]);
            worker
                .dispatch(file_id, Request::WritePage { addr, data })
                .unwrap();
        }

        // Page 1 was evicted to make room for page 3.
        let stored = file.page_bytes(1, PAGE_SIZE as usize).unwrap();
        assert_eq!(&stored[..16], &[1u8; 16]);
        assert!(stored[16..].iter().all(|&b| b == 0));

        let stats = registry.get(file_id).unwrap().stats().snapshot();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.pages_written, 1);
        worker.cache.verify().unwrap();
    }

    #[test]
    fn test_sync_keeps_pages_resident() {
        let (mut worker, _registry, file, file_id) = setup(4096);
        worker
            .dispatch(
                file_id,
                Request::WritePage {
                    addr: 2,
                    data: Bytes::from_static(b"synced"),
                },
            )
            .unwrap();

        let reply = worker.dispatch(file_id, Request::Sync).unwrap();
        assert_eq!(reply, Reply::Pages(1));
        assert_eq!(&file.page_bytes(2, PAGE_SIZE as usize).unwrap()[..6], b"synced");
        assert_eq!(worker.cache.len(), 1);

        // Nothing left to write.
        assert_eq!(worker.dispatch(file_id, Request::Sync).unwrap(), Reply::Pages(0));
    }

    #[test]
    fn test_evict_file_failure_keeps_pages() {
        let (mut worker, _registry, file, file_id) = setup(4096);
        put(&mut worker, file_id, "k", "v");

        file.set_fail_writes(true);
        let err = worker.dispatch(file_id, Request::EvictFile).unwrap_err();
        assert!(err.is_io());
        assert_eq!(worker.cache.len(), 1);

        file.set_fail_writes(false);
        assert_eq!(
            worker.dispatch(file_id, Request::EvictFile).unwrap(),
            Reply::Pages(1)
        );
        assert!(worker.cache.is_empty());
        assert!(worker.current.is_none());
    }

    #[test]
    fn test_scan_resumes_across_pages() {
        let (mut worker, _registry, _file, file_id) = setup(4096);
        let keys: Vec<String> = (0..10).map(|i| format!("key-{}", i)).collect();
        for key in &keys {
            put(&mut worker, file_id, key, "v");
        }

        let mut seen = Vec::new();
        let mut from = ScanPosition::default();
        loop {
            let reply = worker
                .dispatch(file_id, Request::Scan { from, limit: 3 })
                .unwrap();
            let Reply::Scanned { entries, next } = reply else {
                panic!("unexpected reply");
            };
            assert!(entries.len() <= 3);
            seen.extend(entries.into_iter().map(|(k, _)| k));
            match next {
                Some(pos) => from = pos,
                None => break,
            }
        }

        let mut expected: Vec<Bytes> = keys.iter().map(|k| Bytes::from(k.clone())).collect();
        expected.sort();
        seen.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_raw_page_rules() {
        let (mut worker, _registry, _file, file_id) = setup(4096);

        let err = worker
            .dispatch(file_id, Request::ReadPage { addr: 0 })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = worker
            .dispatch(
                file_id,
                Request::WritePage {
                    addr: 1,
                    data: Bytes::from(vec![0u8; PAGE_SIZE as usize + 1]),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        // Beyond the end of the file.
        let err = worker
            .dispatch(file_id, Request::ReadPage { addr: 100 })
            .unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_page_larger_than_cache() {
        let (mut worker, _registry, _file, file_id) = setup(64);
        let err = worker
            .dispatch(file_id, Request::ReadPage { addr: 1 })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_closing_handle_refuses_new_work() {
        let (mut worker, registry, file, file_id) = setup(4096);
        put(&mut worker, file_id, "kept", "1");

        let db = registry.get(file_id).unwrap();
        db.begin_close().unwrap();

        let err = worker
            .dispatch(
                file_id,
                Request::Put {
                    key: Bytes::from_static(b"late"),
                    value: Bytes::from_static(b"2"),
                },
            )
            .unwrap_err();
        assert!(matches!(err, EmberError::HandleNotOpen { .. }));
        let err = worker
            .dispatch(file_id, Request::ReadPage { addr: 1 })
            .unwrap_err();
        assert!(matches!(err, EmberError::HandleNotOpen { .. }));

        // Eviction still runs and leaves nothing behind.
        assert_eq!(worker.dispatch(file_id, Request::Sync).unwrap(), Reply::Pages(1));
        assert_eq!(
            worker.dispatch(file_id, Request::EvictFile).unwrap(),
            Reply::Pages(1)
        );
        assert!(worker.cache.is_empty());

        let bucket = db.bucket_for(b"kept");
        let stored = file.page_bytes(bucket, PAGE_SIZE as usize).unwrap();
        let records = RecordPage::decode(PageKey::new(file_id, bucket), &stored).unwrap();
        assert_eq!(records.get(b"kept"), Some(&Bytes::from_static(b"1")));
        assert_eq!(records.get(b"late"), None);
    }

    #[test]
    fn test_unknown_file() {
        let (mut worker, _registry, _file, _file_id) = setup(4096);
        let err = worker.dispatch(FileId(99), Request::Sync).unwrap_err();
        assert!(matches!(err, EmberError::UnknownFile { .. }));
    }
}
