//! Cached page.

use bytes::BytesMut;
use ember_common::page::PageKey;

/// A resident copy of one page of a backing file.
pub struct Page {
    /// Identity of the page.
    key: PageKey,
    /// Page contents.
    data: BytesMut,
    /// Whether the contents differ from the backing file.
    dirty: bool,
}

impl Page {
    /// Wraps page contents read from a backing file.
    pub fn new(key: PageKey, data: BytesMut) -> Self {
        Self {
            key,
            data,
            dirty: false,
        }
    }

    /// Creates a zero-filled page of `size` bytes.
    pub fn zeroed(key: PageKey, size: usize) -> Self {
        Self::new(key, BytesMut::zeroed(size))
    }

    #[inline]
    pub fn key(&self) -> PageKey {
        self.key
    }

    /// Returns the size in bytes charged against the cache budget.
    #[inline]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns mutable contents and marks the page dirty.
    #[inline]
    pub fn write(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data
    }

    /// Replaces the page contents, truncating or zero-padding to the page size.
    pub fn copy_from(&mut self, src: &[u8]) {
        let len = src.len().min(self.data.len());
        let data = self.write();
        data[..len].copy_from_slice(&src[..len]);
        data[len..].fill(0);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("key", &self.key)
            .field("size", &self.size())
            .field("dirty", &self.dirty)
            .finish()
    }
}
