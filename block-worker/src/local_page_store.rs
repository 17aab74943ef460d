//! Reference `PageStoreDir` implementation: one file per `FileId` on local
//! disk, pages read/written at their page-sized offset.
//!
//! Grounded on the teacher's `tenant::ephemeral_file` page-at-a-time I/O:
//! every page is written at `page_index * page_size`, so writes never need
//! to know the final block length up front.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8PathBuf;
use parking_lot::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::ids::{BlockId, DirIndex, FileId, PageId};
use crate::page_store::{Evictor, PageStoreDir};

struct FileState {
    allocated_bytes: u64,
    pages_written: HashSet<u32>,
}

#[derive(Default)]
struct Registry {
    files: HashMap<FileId, FileState>,
    capacity_used: u64,
    /// Which file id a block's pages currently live under. Needed because a
    /// committed file id is a function of block id *and* length, so it
    /// can't be recomputed from `block_id` alone the way the temp file id
    /// can.
    block_files: HashMap<BlockId, FileId>,
}

pub struct LocalPageStoreDir {
    dir_index: DirIndex,
    root: Utf8PathBuf,
    page_size: u64,
    capacity_bytes: u64,
    registry: Mutex<Registry>,
    evictor: Arc<PinningFifoEvictor>,
}

impl LocalPageStoreDir {
    pub fn new(dir_index: DirIndex, root: Utf8PathBuf, page_size: u64, capacity_bytes: u64) -> Self {
        Self {
            dir_index,
            root,
            page_size,
            capacity_bytes,
            registry: Mutex::new(Registry::default()),
            evictor: Arc::new(PinningFifoEvictor::default()),
        }
    }

    fn path_for(&self, file_id: FileId) -> Utf8PathBuf {
        self.root.join(format!("{file_id}.page"))
    }

    async fn open_rw(&self, file_id: FileId) -> anyhow::Result<File> {
        tokio::fs::create_dir_all(&self.root).await.ok();
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.path_for(file_id).as_std_path())
            .await?;
        Ok(f)
    }
}

#[async_trait]
impl PageStoreDir for LocalPageStoreDir {
    fn dir_index(&self) -> DirIndex {
        self.dir_index
    }

    async fn allocate(&self, file_id: FileId, bytes: u64) -> anyhow::Result<()> {
        let mut reg = self.registry.lock();
        if reg.files.contains_key(&file_id) {
            return Ok(()); // idempotent
        }
        anyhow::ensure!(
            reg.capacity_used + bytes <= self.capacity_bytes,
            "directory {} out of capacity",
            self.dir_index
        );
        reg.capacity_used += bytes;
        reg.files.insert(
            file_id,
            FileState {
                allocated_bytes: bytes,
                pages_written: HashSet::new(),
            },
        );
        Ok(())
    }

    async fn put_temp_file(&self, file_id: FileId) -> anyhow::Result<()> {
        let mut reg = self.registry.lock();
        reg.files.entry(file_id).or_insert(FileState {
            allocated_bytes: 0,
            pages_written: HashSet::new(),
        });
        Ok(())
    }

    async fn write_page(
        &self,
        block_id: BlockId,
        file_id: FileId,
        page_index: u32,
        bytes: Bytes,
    ) -> anyhow::Result<()> {
        let mut f = self.open_rw(file_id).await?;
        f.seek(SeekFrom::Start(page_index as u64 * self.page_size))
            .await?;
        f.write_all(&bytes).await?;
        f.flush().await?;
        let mut reg = self.registry.lock();
        let is_new = reg
            .files
            .entry(file_id)
            .or_insert(FileState {
                allocated_bytes: 0,
                pages_written: HashSet::new(),
            })
            .pages_written
            .insert(page_index);
        reg.block_files.insert(block_id, file_id);
        drop(reg);
        if is_new {
            crate::metrics::PAGE_CACHE_PAGES_CACHED.inc();
        }
        Ok(())
    }

    async fn read_page(&self, file_id: FileId, page_index: u32) -> anyhow::Result<Option<Bytes>> {
        let written = {
            let reg = self.registry.lock();
            reg.files
                .get(&file_id)
                .map(|s| s.pages_written.contains(&page_index))
                .unwrap_or(false)
        };
        if !written {
            return Ok(None);
        }
        let mut f = self.open_rw(file_id).await?;
        f.seek(SeekFrom::Start(page_index as u64 * self.page_size))
            .await?;
        let mut buf = vec![0u8; self.page_size as usize];
        let n = f.read(&mut buf).await?;
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    async fn commit(&self, block_id: BlockId, temp_file_id: FileId, final_file_id: FileId) -> anyhow::Result<()> {
        let from = self.path_for(temp_file_id);
        let to = self.path_for(final_file_id);
        tokio::fs::rename(from.as_std_path(), to.as_std_path()).await?;
        let mut reg = self.registry.lock();
        if let Some(state) = reg.files.remove(&temp_file_id) {
            reg.files.insert(final_file_id, state);
        }
        reg.block_files.insert(block_id, final_file_id);
        Ok(())
    }

    async fn abort(&self, temp_file_id: FileId) -> anyhow::Result<()> {
        let path = self.path_for(temp_file_id);
        tokio::fs::remove_file(path.as_std_path()).await.ok();
        let mut reg = self.registry.lock();
        if let Some(state) = reg.files.remove(&temp_file_id) {
            reg.capacity_used = reg.capacity_used.saturating_sub(state.allocated_bytes);
            crate::metrics::PAGE_CACHE_PAGES_CACHED.sub(state.pages_written.len() as u64);
        }
        Ok(())
    }

    async fn delete_page(&self, page: PageId) -> anyhow::Result<()> {
        let mut reg = self.registry.lock();
        if let Some(state) = reg.files.get_mut(&page.file_id) {
            if state.pages_written.remove(&page.page_index) {
                crate::metrics::PAGE_CACHE_PAGES_CACHED.dec();
            }
        }
        Ok(())
    }

    async fn block_pages(&self, block_id: BlockId) -> anyhow::Result<Vec<PageId>> {
        let reg = self.registry.lock();
        let Some(&file_id) = reg.block_files.get(&block_id) else {
            return Ok(Vec::new());
        };
        Ok(reg
            .files
            .get(&file_id)
            .map(|s| {
                s.pages_written
                    .iter()
                    .map(|&idx| PageId::new(file_id, idx))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn temp_block_cached_bytes(&self, block_id: BlockId) -> anyhow::Result<u64> {
        let file_id = crate::ids::temp_file_id_for_block(block_id);
        let reg = self.registry.lock();
        Ok(reg
            .files
            .get(&file_id)
            .map(|s| s.pages_written.len() as u64 * self.page_size)
            .unwrap_or(0))
    }

    fn evictor(&self) -> &dyn Evictor {
        self.evictor.as_ref()
    }
}

/// Simplest eviction policy that honors pinning: a FIFO queue of unpinned
/// candidates. Victim *selection* beyond pin/unpin is explicitly out of
/// scope for this crate; this exists only so `LocalPageStoreDir` is usable
/// without a separately supplied evictor.
#[derive(Default)]
pub struct PinningFifoEvictor {
    pinned: Mutex<HashSet<BlockId>>,
}

impl Evictor for PinningFifoEvictor {
    fn add_pinned(&self, block: BlockId) -> bool {
        self.pinned.lock().insert(block)
    }

    fn remove_pinned(&self, block: BlockId) {
        self.pinned.lock().remove(&block);
    }

    fn is_pinned(&self, block: BlockId) -> bool {
        self.pinned.lock().contains(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_page_round_trips() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let dir = LocalPageStoreDir::new(DirIndex(0), tmp.path().to_path_buf(), 4096, 1 << 20);
        let block = BlockId(1);
        let file_id = FileId(1);
        dir.put_temp_file(file_id).await.unwrap();
        dir.write_page(block, file_id, 0, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let got = dir.read_page(file_id, 0).await.unwrap().unwrap();
        assert_eq!(&got[..5], b"hello");
    }

    #[tokio::test]
    async fn commit_renames_temp_to_final() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let dir = LocalPageStoreDir::new(DirIndex(0), tmp.path().to_path_buf(), 4096, 1 << 20);
        let block = BlockId(2);
        let temp = FileId(2);
        let final_id = FileId(3);
        dir.put_temp_file(temp).await.unwrap();
        dir.write_page(block, temp, 0, Bytes::from_static(b"data"))
            .await
            .unwrap();
        dir.commit(block, temp, final_id).await.unwrap();
        let got = dir.read_page(final_id, 0).await.unwrap().unwrap();
        assert_eq!(&got[..4], b"data");
        assert!(dir.read_page(temp, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn block_pages_resolves_through_committed_file_id() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let dir = LocalPageStoreDir::new(DirIndex(0), tmp.path().to_path_buf(), 4096, 1 << 20);
        let block = BlockId(5);
        let temp = crate::ids::temp_file_id_for_block(block);
        let final_id = crate::ids::file_id_for_block(block, 4);
        dir.put_temp_file(temp).await.unwrap();
        dir.write_page(block, temp, 0, Bytes::from_static(b"data"))
            .await
            .unwrap();
        dir.commit(block, temp, final_id).await.unwrap();
        let pages = dir.block_pages(block).await.unwrap();
        assert_eq!(pages, vec![PageId::new(final_id, 0)]);
    }

    #[tokio::test]
    async fn abort_deletes_temp_pages() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let dir = LocalPageStoreDir::new(DirIndex(0), tmp.path().to_path_buf(), 4096, 1 << 20);
        let block = BlockId(4);
        let temp = FileId(4);
        dir.put_temp_file(temp).await.unwrap();
        dir.write_page(block, temp, 0, Bytes::from_static(b"x"))
            .await
            .unwrap();
        dir.abort(temp).await.unwrap();
        assert!(dir.read_page(temp, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pin_transition_reported_once() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let dir = LocalPageStoreDir::new(DirIndex(0), tmp.path().to_path_buf(), 4096, 1 << 20);
        let b = BlockId(10);
        assert!(dir.evictor().add_pinned(b));
        assert!(!dir.evictor().add_pinned(b));
        dir.evictor().remove_pinned(b);
        assert!(dir.evictor().add_pinned(b));
    }
}
