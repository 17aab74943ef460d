//! External collaborator interfaces consumed by the block store: the page
//! store backend and its per-directory eviction policy.
//!
//! These are specified here only as contracts (spec §6): the block store
//! depends on them but does not choose their implementation. `LocalPageStoreDir`
//! in `local_page_store.rs` is a reference implementation used by tests, not
//! the only possible one.

use async_trait::async_trait;
use bytes::Bytes;

use crate::ids::{BlockId, DirIndex, FileId, PageId};

/// Per-directory byte storage addressed by page id.
#[async_trait]
pub trait PageStoreDir: Send + Sync {
    /// Stable index for the lifetime of the process.
    fn dir_index(&self) -> DirIndex;

    /// Reserves `bytes` for `file_id`; idempotent by `file_id`.
    async fn allocate(&self, file_id: FileId, bytes: u64) -> anyhow::Result<()>;

    /// Registers a pending (temp) file.
    async fn put_temp_file(&self, file_id: FileId) -> anyhow::Result<()>;

    /// `block_id` lets the directory track which block a file id currently
    /// belongs to, needed to answer `block_pages` once a committed file id
    /// is a function of length as well as block id.
    async fn write_page(
        &self,
        block_id: BlockId,
        file_id: FileId,
        page_index: u32,
        bytes: Bytes,
    ) -> anyhow::Result<()>;

    async fn read_page(&self, file_id: FileId, page_index: u32) -> anyhow::Result<Option<Bytes>>;

    /// Atomic rename of a temp file's pages to their final file id.
    async fn commit(&self, block_id: BlockId, temp_file_id: FileId, final_file_id: FileId) -> anyhow::Result<()>;

    /// Deletes every page registered under a temp file id.
    async fn abort(&self, temp_file_id: FileId) -> anyhow::Result<()>;

    async fn delete_page(&self, page: PageId) -> anyhow::Result<()>;

    async fn block_pages(&self, block_id: BlockId) -> anyhow::Result<Vec<PageId>>;

    async fn temp_block_cached_bytes(&self, block_id: BlockId) -> anyhow::Result<u64>;

    fn evictor(&self) -> &dyn Evictor;
}

/// Per-directory pinned-set and victim-selection policy. The block store
/// only ever calls the pin/unpin operations; victim selection runs
/// internally to the directory, out of scope for this crate (spec
/// Non-goals: "actual eviction algorithm choice").
pub trait Evictor: Send + Sync {
    /// Adds `block` to the pinned set. Returns `true` iff the block
    /// transitioned from unpinned to pinned (pin is reference-counted
    /// semantically: repeated pins still return `false` after the first).
    fn add_pinned(&self, block: BlockId) -> bool;

    /// Removes `block` from the pinned set.
    fn remove_pinned(&self, block: BlockId);

    fn is_pinned(&self, block: BlockId) -> bool;
}
