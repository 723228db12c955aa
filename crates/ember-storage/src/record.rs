//! Record page encoding.
//!
//! Page layout:
//! - entry_count: 4 bytes
//! - used: 4 bytes (bytes of entry data following the header)
//! - checksum: 4 bytes (CRC32 of the entry data)
//! - entries, sorted by key: key_len (2) | value_len (4) | key | value
//!
//! A zero-filled page decodes as an empty page.

use bytes::{Buf, BufMut, Bytes};
use ember_common::page::{PageAddr, PageKey};
use ember_common::{EmberError, Result};

/// Size of the record page header in bytes.
pub const RECORD_HEADER_SIZE: usize = 12;

/// Per-entry overhead in bytes.
const ENTRY_OVERHEAD: usize = 6;

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// Maps a key to the record page that stores it.
#[inline]
pub fn bucket_for_key(key: &[u8], root_addr: PageAddr, bucket_pages: u32) -> PageAddr {
    root_addr + crc32fast::hash(key) % bucket_pages
}

/// Decoded contents of one record page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPage {
    entries: Vec<(Bytes, Bytes)>,
}

impl RecordPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a page image.
    pub fn decode(page: PageKey, data: &[u8]) -> Result<Self> {
        let corrupted = |reason: String| EmberError::PageCorrupted { page, reason };

        if data.len() < RECORD_HEADER_SIZE {
            return Err(corrupted(format!("page is only {} bytes", data.len())));
        }

        let mut header = &data[..RECORD_HEADER_SIZE];
        let count = header.get_u32_le() as usize;
        let used = header.get_u32_le() as usize;
        let checksum = header.get_u32_le();

        let body = data
            .get(RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + used)
            .ok_or_else(|| corrupted(format!("used length {} exceeds page", used)))?;
        if crc32fast::hash(body) != checksum {
            return Err(corrupted("record checksum mismatch".to_string()));
        }

        let mut entries = Vec::with_capacity(count);
        let mut buf = body;
        for _ in 0..count {
            if buf.remaining() < ENTRY_OVERHEAD {
                return Err(corrupted("truncated entry header".to_string()));
            }
            let key_len = buf.get_u16_le() as usize;
            let value_len = buf.get_u32_le() as usize;
            if buf.remaining() < key_len + value_len {
                return Err(corrupted("truncated entry".to_string()));
            }
            let key = Bytes::copy_from_slice(&buf[..key_len]);
            buf.advance(key_len);
            let value = Bytes::copy_from_slice(&buf[..value_len]);
            buf.advance(value_len);
            entries.push((key, value));
        }

        Ok(Self { entries })
    }

    /// Returns the number of bytes this page needs when encoded.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|(k, v)| ENTRY_OVERHEAD + k.len() + v.len())
                .sum::<usize>()
    }

    /// Encodes into `out`, zero-filling the tail.
    ///
    /// Fails with `PageFull` without touching `out` if the entries do not fit.
    pub fn encode_into(&self, page: PageKey, out: &mut [u8]) -> Result<()> {
        let len = self.encoded_len();
        if len > out.len() {
            return Err(EmberError::PageFull { page });
        }

        let mut body = Vec::with_capacity(len - RECORD_HEADER_SIZE);
        for (key, value) in &self.entries {
            body.put_u16_le(key.len() as u16);
            body.put_u32_le(value.len() as u32);
            body.put_slice(key);
            body.put_slice(value);
        }

        let mut header = &mut out[..RECORD_HEADER_SIZE];
        header.put_u32_le(self.entries.len() as u32);
        header.put_u32_le(body.len() as u32);
        header.put_u32_le(crc32fast::hash(&body));

        out[RECORD_HEADER_SIZE..len].copy_from_slice(&body);
        out[len..].fill(0);
        Ok(())
    }

    /// Looks up a key.
    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.search(key).ok().map(|i| &self.entries[i].1)
    }

    /// Inserts or replaces a key, returning the previous value.
    pub fn put(&mut self, key: Bytes, value: Bytes) -> Result<Option<Bytes>> {
        if key.len() > MAX_KEY_SIZE {
            return Err(EmberError::RecordTooLarge {
                size: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        match self.search(&key) {
            Ok(i) => Ok(Some(std::mem::replace(&mut self.entries[i].1, value))),
            Err(i) => {
                self.entries.insert(i, (key, value));
                Ok(None)
            }
        }
    }

    /// Removes a key, returning its value.
    pub fn delete(&mut self, key: &[u8]) -> Option<Bytes> {
        self.search(key).ok().map(|i| self.entries.remove(i).1)
    }

    /// Returns all entries in key order.
    pub fn entries(&self) -> &[(Bytes, Bytes)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.as_ref().cmp(key))
    }
}
