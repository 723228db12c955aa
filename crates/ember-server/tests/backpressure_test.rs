//! Queue backpressure and shutdown wake-up tests.
//!
//! A gated backing file parks the worker inside a page read so the queue
//! in front of it can be filled deterministically.

use bytes::{Bytes, BytesMut};
use ember_server::{
    DatabaseConfig, DatabaseHandle, EmberError, EnvConfig, Environment, Operation, Reply, Request,
    SubmitMode, Ticket, WorkerSelector, WorkerState,
};
use ember_storage::{BackingFile, MemFile};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct Gate {
    entered: bool,
    released: bool,
}

/// Backing file whose next read blocks until released.
#[derive(Default)]
struct GatedFile {
    inner: MemFile,
    armed: AtomicBool,
    gate: Mutex<Gate>,
    cond: Condvar,
}

impl GatedFile {
    fn arm(&self) {
        *self.gate.lock() = Gate::default();
        self.armed.store(true, Ordering::SeqCst);
    }

    fn wait_entered(&self) {
        let mut gate = self.gate.lock();
        while !gate.entered {
            self.cond.wait(&mut gate);
        }
    }

    fn release(&self) {
        self.gate.lock().released = true;
        self.cond.notify_all();
    }
}

impl BackingFile for GatedFile {
    fn read_page(&self, addr: u32, size: usize) -> ember_common::Result<BytesMut> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let mut gate = self.gate.lock();
            gate.entered = true;
            self.cond.notify_all();
            while !gate.released {
                self.cond.wait(&mut gate);
            }
        }
        self.inner.read_page(addr, size)
    }

    fn write_page(&self, addr: u32, data: &[u8]) -> ember_common::Result<()> {
        self.inner.write_page(addr, data)
    }

    fn sync(&self) -> ember_common::Result<()> {
        self.inner.sync()
    }

    fn len_bytes(&self) -> ember_common::Result<u64> {
        self.inner.len_bytes()
    }
}

fn single_worker(queue_capacity: usize) -> Environment {
    Environment::new(EnvConfig {
        workers: 1,
        cache_max: 1 << 20,
        hashsize: 17,
        queue_capacity,
        fsync_enabled: false,
        ..Default::default()
    })
    .unwrap()
}

fn open_gated(env: &Environment) -> (DatabaseHandle, Arc<GatedFile>) {
    let file = Arc::new(GatedFile::default());
    let config = DatabaseConfig {
        page_size: 512,
        bucket_pages: 8,
        create: true,
    };
    let handle = env.open_with("gated", file.clone(), &config).unwrap();
    (handle, file)
}

fn submit_read(
    env: &Environment,
    handle: &DatabaseHandle,
    addr: u32,
    mode: SubmitMode,
) -> ember_common::Result<Ticket> {
    let context = env.allocate_context_id()?;
    let op = Operation::new(context, handle, Request::ReadPage { addr });
    env.submit(op, WorkerSelector::ByFile, mode)
}

/// Parks the single worker inside a read of page 1.
fn park_worker(env: &Environment, handle: &DatabaseHandle, file: &GatedFile) -> Ticket {
    file.arm();
    let ticket = submit_read(env, handle, 1, SubmitMode::NonBlocking).unwrap();
    file.wait_entered();
    ticket
}

#[test]
fn test_full_queue_returns_busy() {
    let env = single_worker(40);
    let (handle, file) = open_gated(&env);
    let parked = park_worker(&env, &handle, &file);
    assert_eq!(env.worker_states(), vec![WorkerState::Running]);

    let queued: Vec<Ticket> = (0..40)
        .map(|_| submit_read(&env, &handle, 1, SubmitMode::NonBlocking).unwrap())
        .collect();
    assert_eq!(env.queue_lengths(), vec![40]);

    let err = submit_read(&env, &handle, 1, SubmitMode::NonBlocking).unwrap_err();
    assert!(matches!(err, EmberError::Busy { worker: 0 }));
    assert_eq!(env.stats().rejected_busy, 1);

    file.release();
    assert!(matches!(parked.wait().unwrap(), Reply::Page(_)));

    // Once the first queued operation completes it has left the queue.
    let mut queued = queued.into_iter();
    queued.next().unwrap().wait().unwrap();
    let extra = submit_read(&env, &handle, 1, SubmitMode::NonBlocking).unwrap();

    for ticket in queued.chain(std::iter::once(extra)) {
        assert!(matches!(ticket.wait().unwrap(), Reply::Page(_)));
    }
}

#[test]
fn test_blocking_submit_waits_for_slot() {
    let env = single_worker(1);
    let (handle, file) = open_gated(&env);
    let parked = park_worker(&env, &handle, &file);
    let queued = submit_read(&env, &handle, 2, SubmitMode::NonBlocking).unwrap();

    thread::scope(|s| {
        let blocked = s.spawn(|| {
            submit_read(&env, &handle, 3, SubmitMode::Blocking)
                .and_then(Ticket::wait)
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!blocked.is_finished());

        file.release();
        let reply = blocked.join().unwrap().unwrap();
        assert!(matches!(reply, Reply::Page(_)));
    });

    parked.wait().unwrap();
    queued.wait().unwrap();
}

#[test]
fn test_shutdown_wakes_blocked_submitter() {
    let env = single_worker(1);
    let (handle, file) = open_gated(&env);
    let parked = park_worker(&env, &handle, &file);
    let queued = submit_read(&env, &handle, 2, SubmitMode::NonBlocking).unwrap();

    thread::scope(|s| {
        let blocked = s.spawn(|| submit_read(&env, &handle, 3, SubmitMode::Blocking));
        thread::sleep(Duration::from_millis(50));

        // Shutdown joins the worker, which is still parked.
        let stopper = s.spawn(|| env.shutdown());

        // The blocked submitter is woken before the worker finishes.
        let err = blocked.join().unwrap().unwrap_err();
        assert!(matches!(err, EmberError::ShuttingDown));
        assert!(!stopper.is_finished());

        file.release();
        stopper.join().unwrap().unwrap();
    });

    // Operations queued before shutdown still ran.
    assert!(matches!(parked.wait().unwrap(), Reply::Page(_)));
    assert!(matches!(queued.wait().unwrap(), Reply::Page(_)));
    assert_eq!(env.worker_states(), vec![WorkerState::Stopped]);

    let err = submit_read(&env, &handle, 1, SubmitMode::NonBlocking).unwrap_err();
    assert!(matches!(err, EmberError::ShuttingDown));
}

#[test]
fn test_dropped_ticket_does_not_stall_worker() {
    let env = single_worker(4);
    let (handle, _file) = open_gated(&env);

    for addr in 1..=4 {
        drop(submit_read(&env, &handle, addr, SubmitMode::Blocking).unwrap());
    }
    let ticket = submit_read(&env, &handle, 5, SubmitMode::Blocking).unwrap();
    match ticket.wait().unwrap() {
        Reply::Page(data) => assert_eq!(data, Bytes::from(vec![0u8; 512])),
        other => panic!("unexpected reply {:?}", other),
    }
}
