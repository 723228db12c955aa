//! Backing file abstraction.

use bytes::BytesMut;
use ember_common::page::PageAddr;
use ember_common::{EmberError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Page-granular access to the file backing one database.
///
/// Offsets are `addr * size`; pages are read and written whole. Called
/// synchronously from worker threads on cache misses and write-backs.
pub trait BackingFile: Send + Sync {
    /// Reads `size` bytes at page address `addr`.
    fn read_page(&self, addr: PageAddr, size: usize) -> Result<BytesMut>;

    /// Writes a full page at page address `addr`.
    fn write_page(&self, addr: PageAddr, data: &[u8]) -> Result<()>;

    /// Forces written pages to stable storage.
    fn sync(&self) -> Result<()>;

    /// Returns the current length of the file in bytes.
    fn len_bytes(&self) -> Result<u64>;
}

fn page_offset(addr: PageAddr, size: usize) -> u64 {
    (addr as u64) * (size as u64)
}

/// In-memory backing file.
///
/// Used for volatile databases and for tests. Writes can be made to fail
/// to exercise write-back error paths.
#[derive(Debug, Default)]
pub struct MemFile {
    data: Mutex<Vec<u8>>,
    fail_writes: AtomicBool,
}

impl MemFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail (or succeed again) until toggled.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Returns a copy of the bytes stored at `addr`, if the file is long enough.
    pub fn page_bytes(&self, addr: PageAddr, size: usize) -> Option<Vec<u8>> {
        let data = self.data.lock();
        let start = page_offset(addr, size) as usize;
        data.get(start..start + size).map(|s| s.to_vec())
    }
}

impl BackingFile for MemFile {
    fn read_page(&self, addr: PageAddr, size: usize) -> Result<BytesMut> {
        let data = self.data.lock();
        let start = page_offset(addr, size) as usize;
        let slice = data.get(start..start + size).ok_or_else(|| {
            EmberError::IoError(format!("page {} is beyond end of file", addr))
        })?;
        Ok(BytesMut::from(slice))
    }

    fn write_page(&self, addr: PageAddr, page: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(EmberError::IoError(format!(
                "injected write failure at page {}",
                addr
            )));
        }
        let mut data = self.data.lock();
        let start = page_offset(addr, page.len()) as usize;
        let end = start + page.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(page);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn len_bytes(&self) -> Result<u64> {
        Ok(self.data.lock().len() as u64)
    }
}
