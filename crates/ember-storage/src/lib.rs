//! Storage layer for EmberDB.
//!
//! This crate provides:
//! - The `BackingFile` abstraction the page cache reads from and writes to
//! - Disk-backed and in-memory file implementations
//! - The file descriptor page stored at address 0
//! - Record page encoding used by get/put/delete/scan

mod descriptor;
mod disk;
mod file;
mod record;

pub use descriptor::{FileDescriptor, DESCRIPTOR_SIZE, ROOT_ADDR};
pub use disk::{DiskFile, DiskFileConfig};
pub use file::{BackingFile, MemFile};
pub use record::{bucket_for_key, RecordPage, MAX_KEY_SIZE, RECORD_HEADER_SIZE};
