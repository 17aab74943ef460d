//! Identifiers for the data model: blocks, pages, and the files pages live in.

use std::fmt;

/// Opaque 64-bit block identifier, globally unique across the cluster.
///
/// Callers supply block ids; this crate never allocates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a page-store file: either a committed block's page file or
/// a temp block's page file. The two are derived deterministically so that
/// `PageStoreDir::commit` can rename rather than copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const TEMP_FILE_TAG: u64 = 1 << 63;

/// Golden-ratio multiplicative mix constant (splitmix64), used here only to
/// spread `(block_id, length)` pairs rather than for any cryptographic
/// property.
const MIX_CONST: u64 = 0x9E37_79B9_7F4A_7C15;

/// File id for a block's committed pages, derived from both the block id
/// and its final length (spec's data model: two commits of the same block
/// id at different lengths never alias the same file id). Distinct from the
/// block's temp file id so `commit` never aliases a still-open temp file.
pub fn file_id_for_block(block_id: BlockId, length: u64) -> FileId {
    let mixed = block_id.0 ^ length.wrapping_mul(MIX_CONST);
    FileId(mixed & !TEMP_FILE_TAG)
}

/// File id for a block's temp (not yet committed) pages.
pub fn temp_file_id_for_block(block_id: BlockId) -> FileId {
    FileId(block_id.0 | TEMP_FILE_TAG)
}

/// A page within a file, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct PageId {
    pub file_id: FileId,
    pub page_index: u32,
}

impl PageId {
    pub fn new(file_id: FileId, page_index: u32) -> Self {
        Self { file_id, page_index }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_index)
    }
}

/// Stable directory index. Assigned once per `PageStoreDir` for the lifetime
/// of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct DirIndex(pub u32);

impl fmt::Display for DirIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
