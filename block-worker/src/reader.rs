//! Read-side adapter: presents a byte stream starting at an offset,
//! consulting the page store first and falling back to the UFS reader on a
//! miss, filling the page store as it goes (spec §4.4).
//!
//! The cache-miss-with-caching path needs to commit to the master and unpin
//! only once the caller is done reading (spec §9, "scoped reader with
//! deferred release"): `PagedBlockReader` owns an optional release hook that
//! runs exactly once, whether the caller reads to completion, drops the
//! reader early, or an I/O error propagates.

use bytes::{Bytes, BytesMut};

use crate::ids::{BlockId, FileId};
use crate::page_store::PageStoreDir;
use crate::ufs::UfsReader;
use std::sync::Arc;

/// Runs exactly once, on the first of: explicit `close`, or `Drop`.
type ReleaseHook = Box<dyn FnOnce() + Send>;

pub struct PagedBlockReader {
    block_id: BlockId,
    file_id: FileId,
    page_size: u64,
    block_len: u64,
    offset: u64,
    dir: Arc<dyn PageStoreDir>,
    ufs: Option<UfsFallback>,
    release: Option<ReleaseHook>,
}

struct UfsFallback {
    reader: Arc<dyn UfsReader>,
    ufs_path: String,
    /// Whether pages read from UFS are written back into the page store.
    cache_fills: bool,
}

impl PagedBlockReader {
    /// Reader over an already-committed (or temp, mid-write) block whose
    /// pages live in the page store; no UFS fallback configured.
    pub fn for_cached_block(
        block_id: BlockId,
        file_id: FileId,
        page_size: u64,
        block_len: u64,
        offset: u64,
        dir: Arc<dyn PageStoreDir>,
        release: Option<ReleaseHook>,
    ) -> Self {
        Self {
            block_id,
            file_id,
            page_size,
            block_len,
            offset,
            dir,
            ufs: None,
            release,
        }
    }

    /// Reader that falls back to UFS on a page miss, optionally populating
    /// the page store as pages are read (the cache-miss-with-caching path).
    pub fn with_ufs_fallback(
        block_id: BlockId,
        file_id: FileId,
        page_size: u64,
        block_len: u64,
        offset: u64,
        dir: Arc<dyn PageStoreDir>,
        ufs_reader: Arc<dyn UfsReader>,
        ufs_path: String,
        cache_fills: bool,
        release: Option<ReleaseHook>,
    ) -> Self {
        Self {
            block_id,
            file_id,
            page_size,
            block_len,
            offset,
            dir,
            ufs: Some(UfsFallback {
                reader: ufs_reader,
                ufs_path,
                cache_fills,
            }),
            release,
        }
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    fn page_index_for(&self, offset: u64) -> u32 {
        (offset / self.page_size) as u32
    }

    fn page_len_at(&self, page_index: u32) -> u64 {
        let start = page_index as u64 * self.page_size;
        self.page_size.min(self.block_len.saturating_sub(start))
    }

    /// Reads the remainder of the block from the current offset, returning
    /// the full tail as one buffer. Sufficient for this adapter's scope;
    /// streaming consumers can call repeatedly with an updated offset.
    pub async fn read_to_end(&mut self) -> anyhow::Result<Bytes> {
        let mut out = BytesMut::new();
        while self.offset < self.block_len {
            let page_index = self.page_index_for(self.offset);
            let page_len = self.page_len_at(page_index);
            let page_start = page_index as u64 * self.page_size;
            let within_page = (self.offset - page_start) as usize;

            let page_bytes = self.page_bytes(page_index, page_len).await?;
            out.extend_from_slice(&page_bytes[within_page..]);
            self.offset = page_start + page_len;
        }
        Ok(out.freeze())
    }

    async fn page_bytes(&mut self, page_index: u32, page_len: u64) -> anyhow::Result<Bytes> {
        if let Some(bytes) = self.dir.read_page(self.file_id, page_index).await? {
            return Ok(bytes);
        }
        let Some(ufs) = self.ufs.as_ref() else {
            anyhow::bail!(
                "page {page_index} of block {} missing and no UFS fallback configured",
                self.block_id
            );
        };
        let page_start = page_index as u64 * self.page_size;
        let bytes = ufs
            .reader
            .read_range(&ufs.ufs_path, page_start, page_len)
            .await?;
        if ufs.cache_fills && bytes.len() as u64 == page_len {
            self.dir
                .write_page(self.block_id, self.file_id, page_index, bytes.clone())
                .await?;
        }
        Ok(bytes)
    }

    /// Runs the release hook exactly once. Safe to call more than once (a
    /// no-op after the first call), matching the spec's idempotence
    /// requirement for `close`.
    pub fn close(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Drop for PagedBlockReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{file_id_for_block, DirIndex};
    use crate::local_page_store::LocalPageStoreDir;
    use camino_tempfile::Utf8TempDir;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn local_dir() -> (Utf8TempDir, Arc<LocalPageStoreDir>) {
        let tmp = camino_tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let dir = Arc::new(LocalPageStoreDir::new(DirIndex(0), root, 4096, 1 << 20));
        (tmp, dir)
    }

    #[tokio::test]
    async fn reads_trailing_bytes_across_two_pages() {
        // Scenario S1: pages (4096, 4096, 1000), read starting at offset 8000.
        let (_tmp, dir) = local_dir().await;
        let block = BlockId(42);
        let block_len = 4096 + 4096 + 1000;
        let file_id = file_id_for_block(block, block_len);
        dir.put_temp_file(file_id).await.unwrap();
        dir.write_page(block, file_id, 0, Bytes::from(vec![0u8; 4096]))
            .await
            .unwrap();
        let mut middle = vec![1u8; 4096];
        dir.write_page(block, file_id, 1, Bytes::from(middle.clone()))
            .await
            .unwrap();
        let last = vec![2u8; 1000];
        dir.write_page(block, file_id, 2, Bytes::from(last.clone()))
            .await
            .unwrap();

        let mut reader = PagedBlockReader::for_cached_block(
            block, file_id, 4096, block_len, 8000, dir, None,
        );
        let got = reader.read_to_end().await.unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&middle.split_off(8000 - 4096));
        expected.extend_from_slice(&last);
        assert_eq!(got.len(), expected.len());
        assert_eq!(&got[..], &expected[..]);
    }

    #[tokio::test]
    async fn release_hook_runs_exactly_once_even_on_double_close() {
        let (_tmp, dir) = local_dir().await;
        let block = BlockId(1);
        let file_id = file_id_for_block(block, 0);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut reader = PagedBlockReader::for_cached_block(
            block,
            file_id,
            4096,
            0,
            0,
            dir,
            Some(Box::new(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
            })),
        );
        reader.close();
        reader.close();
        drop(reader);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_hook_runs_on_drop_without_reading() {
        let (_tmp, dir) = local_dir().await;
        let block = BlockId(2);
        let file_id = file_id_for_block(block, 0);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let reader = PagedBlockReader::for_cached_block(
            block,
            file_id,
            4096,
            0,
            0,
            dir,
            Some(Box::new(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
            })),
        );
        drop(reader);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
