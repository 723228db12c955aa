//! File descriptor page.
//!
//! Address 0 of every database file holds a descriptor recording the page
//! geometry the file was created with. Layout (32 bytes, little endian):
//! - magic: 4 bytes
//! - version: 4 bytes
//! - page_size: 4 bytes
//! - bucket_pages: 4 bytes
//! - root_addr: 4 bytes
//! - reserved: 8 bytes
//! - checksum: 4 bytes (CRC32 of the preceding 28 bytes)

use crate::file::BackingFile;
use bytes::{Buf, BufMut, BytesMut};
use ember_common::config::MIN_PAGE_SIZE;
use ember_common::page::{FileId, PageAddr, PageKey};
use ember_common::{DatabaseConfig, EmberError, Result};

/// Size of the encoded descriptor in bytes.
pub const DESCRIPTOR_SIZE: usize = 32;

/// Address of the first record page.
pub const ROOT_ADDR: PageAddr = 1;

const MAGIC: u32 = 0x454D_4252; // "EMBR"
const VERSION: u32 = 1;

/// Geometry of a database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    pub page_size: u32,
    pub bucket_pages: u32,
    pub root_addr: PageAddr,
}

impl FileDescriptor {
    /// Builds the descriptor for a new file from the open-time config.
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            page_size: config.page_size,
            bucket_pages: config.bucket_pages,
            root_addr: ROOT_ADDR,
        }
    }

    /// Serializes the descriptor, padded to a full page.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.page_size as usize);
        buf.put_u32_le(MAGIC);
        buf.put_u32_le(VERSION);
        buf.put_u32_le(self.page_size);
        buf.put_u32_le(self.bucket_pages);
        buf.put_u32_le(self.root_addr);
        buf.put_u64_le(0);
        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);
        buf.resize(self.page_size as usize, 0);
        buf
    }

    /// Parses a descriptor from the first bytes of a file.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let corrupted = |reason: String| EmberError::PageCorrupted {
            page: PageKey::new(FileId(0), 0),
            reason,
        };

        if data.len() < DESCRIPTOR_SIZE {
            return Err(corrupted(format!("descriptor truncated to {} bytes", data.len())));
        }

        let stored = (&data[DESCRIPTOR_SIZE - 4..DESCRIPTOR_SIZE]).get_u32_le();
        let computed = crc32fast::hash(&data[..DESCRIPTOR_SIZE - 4]);
        if stored != computed {
            return Err(corrupted("descriptor checksum mismatch".to_string()));
        }

        let mut buf = &data[..DESCRIPTOR_SIZE - 4];
        let magic = buf.get_u32_le();
        if magic != MAGIC {
            return Err(corrupted(format!("bad magic {:#x}", magic)));
        }
        let version = buf.get_u32_le();
        if version != VERSION {
            return Err(corrupted(format!("unsupported version {}", version)));
        }
        let page_size = buf.get_u32_le();
        let bucket_pages = buf.get_u32_le();
        let root_addr = buf.get_u32_le();

        if page_size < MIN_PAGE_SIZE
            || bucket_pages == 0
            || root_addr == 0
            || root_addr.checked_add(bucket_pages).is_none()
        {
            return Err(corrupted("invalid geometry".to_string()));
        }

        Ok(Self {
            page_size,
            bucket_pages,
            root_addr,
        })
    }

    /// Returns the address one past the last record page.
    pub fn end_addr(&self) -> Result<PageAddr> {
        self.root_addr.checked_add(self.bucket_pages).ok_or_else(|| {
            EmberError::InvalidParameter {
                name: "bucket_pages".to_string(),
                value: self.bucket_pages.to_string(),
            }
        })
    }

    /// Reads the descriptor of an existing file, or `None` if the file is empty.
    pub fn load(file: &dyn BackingFile) -> Result<Option<Self>> {
        if file.len_bytes()? == 0 {
            return Ok(None);
        }
        let data = file.read_page(0, DESCRIPTOR_SIZE)?;
        Self::decode(&data).map(Some)
    }

    /// Writes the descriptor and zeroed record pages to an empty file.
    pub fn initialize(&self, file: &dyn BackingFile) -> Result<()> {
        let end = self.end_addr()?;
        file.write_page(0, &self.encode())?;
        let empty = vec![0u8; self.page_size as usize];
        for addr in self.root_addr..end {
            file.write_page(addr, &empty)?;
        }
        file.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemFile;

    fn descriptor() -> FileDescriptor {
        FileDescriptor {
            page_size: 128,
            bucket_pages: 4,
            root_addr: ROOT_ADDR,
        }
    }

    #[test]
    fn test_encode_is_page_sized() {
        let encoded = descriptor().encode();
        assert_eq!(encoded.len(), 128);
        assert_eq!(FileDescriptor::decode(&encoded).unwrap(), descriptor());
    }

    #[test]
    fn test_decode_detects_corruption() {
        let mut encoded = descriptor().encode();
        encoded[8] ^= 0xFF;
        assert!(matches!(
            FileDescriptor::decode(&encoded),
            Err(EmberError::PageCorrupted { .. })
        ));
        assert!(FileDescriptor::decode(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_initialize_and_load() {
        let file = MemFile::new();
        assert!(FileDescriptor::load(&file).unwrap().is_none());

        descriptor().initialize(&file).unwrap();
        assert_eq!(file.len_bytes().unwrap(), 128 * 5);
        assert_eq!(FileDescriptor::load(&file).unwrap(), Some(descriptor()));
        assert_eq!(descriptor().end_addr().unwrap(), 5);
    }

    #[test]
    fn test_overflowing_geometry_rejected() {
        let wide = FileDescriptor {
            page_size: 64,
            bucket_pages: u32::MAX,
            root_addr: ROOT_ADDR,
        };
        assert!(matches!(
            wide.end_addr(),
            Err(EmberError::InvalidParameter { .. })
        ));

        // Nothing is written for a geometry that cannot be addressed.
        let file = MemFile::new();
        assert!(wide.initialize(&file).is_err());
        assert_eq!(file.len_bytes().unwrap(), 0);

        // A stored descriptor with the same geometry is corrupt.
        assert!(matches!(
            FileDescriptor::decode(&wide.encode()),
            Err(EmberError::PageCorrupted { .. })
        ));
    }

    #[test]
    fn test_from_config() {
        let config = DatabaseConfig {
            page_size: 512,
            bucket_pages: 8,
            create: true,
        };
        let desc = FileDescriptor::from_config(&config);
        assert_eq!(desc.page_size, 512);
        assert_eq!(desc.bucket_pages, 8);
        assert_eq!(desc.root_addr, ROOT_ADDR);
    }
}
