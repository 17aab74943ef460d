//! Lazy, finite sequence of file status records produced while enumerating a
//! UFS directory tree. Spec §9 design note: "contract is only that
//! `has_next`/`next` advance monotonically and may suspend on network I/O" —
//! modeled here as an async trait so both blocking and networked
//! implementations fit without forcing a thread per job.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub ufs_path: String,
    pub length: u64,
}

#[async_trait]
pub trait FileIterator: Send {
    /// Returns the next file, or `None` once the tree is exhausted.
    async fn next(&mut self) -> anyhow::Result<Option<FileStatus>>;

    /// `true` if this iterator reflects a complete listing (so `total_bytes`
    /// in the progress report is meaningful), `false` for a partial listing.
    fn is_full_listing(&self) -> bool;
}

/// In-memory iterator over a fixed list, for tests.
pub struct VecFileIterator {
    items: std::vec::IntoIter<FileStatus>,
    full_listing: bool,
}

impl VecFileIterator {
    pub fn new(items: Vec<FileStatus>, full_listing: bool) -> Self {
        Self {
            items: items.into_iter(),
            full_listing,
        }
    }
}

#[async_trait]
impl FileIterator for VecFileIterator {
    async fn next(&mut self) -> anyhow::Result<Option<FileStatus>> {
        Ok(self.items.next())
    }

    fn is_full_listing(&self) -> bool {
        self.full_listing
    }
}
