//! Disk-backed database file.

use crate::file::BackingFile;
use bytes::BytesMut;
use ember_common::page::PageAddr;
use ember_common::{EmberError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration for opening a disk file.
#[derive(Debug, Clone)]
pub struct DiskFileConfig {
    /// Path of the data file.
    pub path: PathBuf,
    /// Unix permission bits used when the file is created.
    pub mode: u32,
    /// Create the file if it does not exist.
    pub create: bool,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl DiskFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: 0o644,
            create: true,
            fsync_enabled: true,
        }
    }
}

/// A database file on disk.
///
/// All access goes through one mutex-guarded handle; seeks and reads
/// for a single page happen under that lock.
pub struct DiskFile {
    config: DiskFileConfig,
    file: Mutex<File>,
}

impl DiskFile {
    /// Opens (or creates) the file described by `config`.
    ///
    /// A file that cannot be opened is reported as an invalid argument.
    pub fn open(config: DiskFileConfig) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(config.create);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(config.mode);
        }

        let file = options.open(&config.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::IsADirectory => {
                EmberError::InvalidArgument(format!(
                    "cannot open {}: {}",
                    config.path.display(),
                    e
                ))
            }
            _ => EmberError::Io(e),
        })?;

        debug!(path = %config.path.display(), "opened disk file");
        Ok(Self {
            config,
            file: Mutex::new(file),
        })
    }

    /// Returns the path of the data file.
    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

impl BackingFile for DiskFile {
    fn read_page(&self, addr: PageAddr, size: usize) -> Result<BytesMut> {
        let offset = (addr as u64) * (size as u64);
        let mut file = self.file.lock();

        let len = file.metadata()?.len();
        if offset + size as u64 > len {
            return Err(EmberError::IoError(format!(
                "page {} does not exist in {}",
                addr,
                self.config.path.display()
            )));
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = BytesMut::zeroed(size);
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_page(&self, addr: PageAddr, data: &[u8]) -> Result<()> {
        let offset = (addr as u64) * (data.len() as u64);
        let mut file = self.file.lock();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        if self.config.fsync_enabled {
            file.sync_data()?;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn len_bytes(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }
}

impl Drop for DiskFile {
    fn drop(&mut self) {
        let _ = self.file.get_mut().sync_all();
    }
}
