//! The environment: handle registry, worker pool, and submission.
//!
//! An `Environment` is built once with [`Environment::new`], which validates
//! the configuration and spawns the worker threads, and torn down with
//! [`Environment::shutdown`]. Shutdown stops the queues, which wakes blocked
//! submitters, lets every worker drain its queue and write back its cache,
//! then syncs and deregisters the open databases.

use crate::cursor::Cursor;
use crate::handle::{DatabaseHandle, HandleState};
use crate::operation::{ContextId, Envelope, Operation, Reply, Request, Ticket, WorkerSelector};
use crate::queue::PushError;
use crate::registry::Registry;
use crate::worker::{Worker, WorkerShared, WorkerState};
use ember_cache::CacheConfig;
use ember_common::page::FileId;
use ember_common::{DatabaseConfig, EmberError, EnvConfig, Result, StatsSnapshot, SubmitMode};
use ember_storage::{BackingFile, DiskFile, DiskFileConfig, FileDescriptor};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Environment-wide submission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvStats {
    pub submitted: u64,
    pub rejected_busy: u64,
    pub open_databases: usize,
}

pub struct Environment {
    config: EnvConfig,
    registry: Arc<Registry>,
    workers: Vec<Arc<WorkerShared>>,
    threads: Mutex<Vec<JoinHandle<Result<usize>>>>,
    next_worker: AtomicUsize,
    stopping: AtomicBool,
    submitted: AtomicU64,
    rejected_busy: AtomicU64,
}

impl Environment {
    /// Validates `config` and starts the worker pool.
    pub fn new(config: EnvConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::new());
        let cache_config = CacheConfig {
            cache_max: config.cache_max,
            hashsize: config.hashsize,
        };

        let mut env = Self {
            workers: Vec::with_capacity(config.workers),
            threads: Mutex::new(Vec::with_capacity(config.workers)),
            registry,
            next_worker: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            rejected_busy: AtomicU64::new(0),
            config,
        };

        for id in 0..env.config.workers {
            let shared = Arc::new(WorkerShared::new(id, env.config.queue_capacity));
            let worker = Worker::new(Arc::clone(&shared), Arc::clone(&env.registry), cache_config)?;
            // On failure, dropping `env` stops the workers already running.
            let thread = worker.spawn()?;
            env.workers.push(shared);
            env.threads.get_mut().push(thread);
        }

        info!(
            workers = env.config.workers,
            cache_max = env.config.cache_max,
            hashsize = env.config.hashsize,
            queue_capacity = env.config.queue_capacity,
            "environment started"
        );
        Ok(env)
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Opens (or creates) the database file `name` under the data directory.
    ///
    /// `mode` holds the unix permission bits for a newly created file.
    pub fn open(&self, name: &str, mode: u32, config: &DatabaseConfig) -> Result<DatabaseHandle> {
        self.ensure_running()?;
        Self::check_name(name)?;
        config.validate()?;

        std::fs::create_dir_all(&self.config.data_dir)?;
        let file = DiskFile::open(DiskFileConfig {
            path: self.config.data_dir.join(name),
            mode,
            create: config.create,
            fsync_enabled: self.config.fsync_enabled,
        })?;
        self.open_with(name, Arc::new(file), config)
    }

    /// Opens a database stored in an already opened backing file.
    ///
    /// An empty file is initialized from `config` when `config.create` is
    /// set; an existing file keeps its stored geometry.
    pub fn open_with(
        &self,
        name: &str,
        file: Arc<dyn BackingFile>,
        config: &DatabaseConfig,
    ) -> Result<DatabaseHandle> {
        self.ensure_running()?;
        Self::check_name(name)?;
        config.validate()?;

        let descriptor = match FileDescriptor::load(file.as_ref())? {
            Some(descriptor) => descriptor,
            None if config.create => {
                let descriptor = FileDescriptor::from_config(config);
                descriptor.initialize(file.as_ref())?;
                descriptor
            }
            None => {
                return Err(EmberError::InvalidArgument(format!(
                    "{} is empty and create is not set",
                    name
                )));
            }
        };

        let db = self.registry.register(name, file, descriptor)?;
        info!(
            file_id = %db.file_id(),
            name = %name,
            page_size = descriptor.page_size,
            bucket_pages = descriptor.bucket_pages,
            "database opened"
        );
        Ok(db.handle())
    }

    /// Flushes and evicts the database's pages from every worker, then
    /// deregisters it.
    ///
    /// A failed flush leaves the handle `Closing`; calling `close` again
    /// retries.
    pub fn close(&self, handle: &DatabaseHandle) -> Result<()> {
        let file_id = handle.file_id();
        let db = self.registry.get(file_id)?;
        db.begin_close()?;

        let mut tickets = Vec::with_capacity(self.workers.len());
        for worker in 0..self.workers.len() {
            let op = Operation::for_file(ContextId(0), file_id, Request::EvictFile);
            tickets.push(self.enqueue(worker, op, SubmitMode::Blocking)?);
        }

        let mut evicted = 0;
        let mut failure = None;
        for ticket in tickets {
            match ticket.wait() {
                Ok(Reply::Pages(n)) => evicted += n,
                Ok(other) => {
                    failure.get_or_insert(EmberError::Internal(format!(
                        "unexpected reply to evict: {:?}",
                        other
                    )));
                }
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            warn!(file_id = %file_id, error = %e, "close failed, handle left closing");
            return Err(e);
        }

        db.file().sync()?;
        self.registry.deregister(file_id);
        db.set_state(HandleState::Closed);
        info!(file_id = %file_id, name = db.name(), pages = evicted, "database closed");
        Ok(())
    }

    /// State of the database behind `handle`. Deregistered handles are `Closed`.
    pub fn handle_state(&self, handle: &DatabaseHandle) -> HandleState {
        self.registry
            .get(handle.file_id())
            .map(|db| db.state())
            .unwrap_or(HandleState::Closed)
    }

    pub fn allocate_context_id(&self) -> Result<ContextId> {
        self.registry.allocate_context_id()
    }

    /// Queues an operation on the worker picked by `selector`.
    ///
    /// With `SubmitMode::NonBlocking` a full queue yields `Busy`; with
    /// `SubmitMode::Blocking` the caller waits for a slot.
    pub fn submit(
        &self,
        op: Operation,
        selector: WorkerSelector,
        mode: SubmitMode,
    ) -> Result<Ticket> {
        self.ensure_running()?;
        self.registry.get(op.file_id())?.ensure_open()?;
        let worker = self.select_worker(op.file_id(), selector)?;
        self.enqueue(worker, op, mode)
    }

    /// Opens a cursor over `handle` with its own caller context.
    pub fn cursor(&self, handle: &DatabaseHandle) -> Result<Cursor<'_>> {
        self.ensure_running()?;
        self.registry.get(handle.file_id())?.ensure_open()?;
        let context = self.allocate_context_id()?;
        Ok(Cursor::new(self, handle.clone(), context, self.config.submit_mode))
    }

    pub fn stats(&self) -> EnvStats {
        EnvStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
            open_databases: self.registry.len(),
        }
    }

    pub fn worker_stats(&self) -> Vec<StatsSnapshot> {
        self.workers.iter().map(|w| w.stats().snapshot()).collect()
    }

    pub fn database_stats(&self, handle: &DatabaseHandle) -> Result<StatsSnapshot> {
        Ok(self.registry.get(handle.file_id())?.stats().snapshot())
    }

    /// Operations waiting in each worker queue.
    pub fn queue_lengths(&self) -> Vec<usize> {
        self.workers.iter().map(|w| w.queue().len()).collect()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(|w| w.state()).collect()
    }

    /// Stops the environment.
    ///
    /// New submissions fail with `ShuttingDown` and submitters blocked on a
    /// full queue are woken with the same error. Operations already queued
    /// still run. Each worker then writes back its cache before exiting, and
    /// every open database is synced and closed. Returns the first failure.
    /// Later calls are no-ops.
    pub fn shutdown(&self) -> Result<()> {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("environment shutting down");

        for worker in &self.workers {
            worker.queue().stop();
        }

        let mut result = Ok(());
        let threads = std::mem::take(&mut *self.threads.lock());
        for (worker, thread) in threads.into_iter().enumerate() {
            let outcome = thread.join().unwrap_or_else(|_| {
                Err(EmberError::Internal(format!("worker {} panicked", worker)))
            });
            if let Err(e) = outcome {
                error!(worker, error = %e, "worker failed to flush at shutdown");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        for db in self.registry.databases() {
            db.set_state(HandleState::Closing);
            if let Err(e) = db.file().sync() {
                error!(file_id = %db.file_id(), error = %e, "failed to sync database at shutdown");
                if result.is_ok() {
                    result = Err(e);
                }
            }
            self.registry.deregister(db.file_id());
            db.set_state(HandleState::Closed);
            info!(file_id = %db.file_id(), name = db.name(), "database closed");
        }

        info!("environment stopped");
        result
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopping.load(Ordering::Acquire) {
            return Err(EmberError::ShuttingDown);
        }
        Ok(())
    }

    fn check_name(name: &str) -> Result<()> {
        let path = Path::new(name);
        if name.is_empty() || path.file_name().is_none_or(|n| n != path.as_os_str()) {
            return Err(EmberError::InvalidArgument(format!(
                "invalid database name {:?}",
                name
            )));
        }
        Ok(())
    }

    fn select_worker(&self, file_id: FileId, selector: WorkerSelector) -> Result<usize> {
        let count = self.workers.len();
        match selector {
            WorkerSelector::ByFile => Ok(file_id.0 as usize % count),
            WorkerSelector::RoundRobin => Ok(self.next_worker.fetch_add(1, Ordering::Relaxed) % count),
            WorkerSelector::Fixed(worker) if worker < count => Ok(worker),
            WorkerSelector::Fixed(worker) => Err(EmberError::InvalidArgument(format!(
                "worker {} out of range (have {})",
                worker, count
            ))),
        }
    }

    fn enqueue(&self, worker: usize, op: Operation, mode: SubmitMode) -> Result<Ticket> {
        let (envelope, receiver) = Envelope::new(op);
        let queue = self.workers[worker].queue();
        let pushed = match mode {
            SubmitMode::NonBlocking => queue.try_push(envelope),
            SubmitMode::Blocking => queue.push_blocking(envelope),
        };

        match pushed {
            Ok(()) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(Ticket::new(worker, receiver))
            }
            Err(PushError::Full(_)) => {
                self.rejected_busy.fetch_add(1, Ordering::Relaxed);
                debug!(worker, "worker queue full");
                Err(EmberError::Busy { worker })
            }
            Err(PushError::Stopped(_)) => {
                warn!(worker, "submission rejected, worker stopping");
                Err(EmberError::ShuttingDown)
            }
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "environment shutdown failed");
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("workers", &self.workers.len())
            .field("open_databases", &self.registry.len())
            .field("stopping", &self.stopping.load(Ordering::Relaxed))
            .finish()
    }
}
