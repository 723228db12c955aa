//! Environment and worker pool for EmberDB.
//!
//! This crate ties the storage and cache layers together:
//! - Environment owning the handle registry and a fixed pool of workers
//! - Bounded per-worker operation queues with `Busy` backpressure
//! - Worker threads, each driving a private page cache
//! - Database handles and cursors that submit operations

mod cursor;
mod environment;
mod handle;
mod operation;
mod queue;
mod registry;
mod worker;

pub use cursor::Cursor;
pub use environment::{EnvStats, Environment};
pub use handle::{DatabaseHandle, HandleState};
pub use operation::{ContextId, Operation, Reply, Request, ScanPosition, Ticket, WorkerSelector};
pub use worker::WorkerState;

pub use ember_common::{DatabaseConfig, EmberError, EnvConfig, ErrorKind, Result, SubmitMode};
