//! Page identity types for EmberDB.

use serde::{Deserialize, Serialize};

/// In-memory identifier of an open database file.
///
/// File ids are unique among currently open databases and are never
/// reused while the environment is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub u32);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Page address within a backing file, counted in pages.
pub type PageAddr = u32;

/// Identity of a cached page: the pair (file id, address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageKey {
    /// Owning database file.
    pub file_id: FileId,
    /// Page address within the file.
    pub addr: PageAddr,
}

impl PageKey {
    /// Creates a new PageKey.
    pub fn new(file_id: FileId, addr: PageAddr) -> Self {
        Self { file_id, addr }
    }
}

impl std::fmt::Display for PageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.addr)
    }
}
