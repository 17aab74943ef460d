//! Write-side adapter: accepts sequential page-sized writes into a temp
//! block's pages, tracking the cached-bytes counter per write (spec §4.4).

use std::sync::Arc;

use bytes::Bytes;

use crate::ids::{temp_file_id_for_block, BlockId};
use crate::page_store::PageStoreDir;

pub struct PagedBlockWriter {
    block_id: BlockId,
    page_size: u64,
    dir: Arc<dyn PageStoreDir>,
    next_page_index: u32,
    bytes_written: u64,
    closed: bool,
}

impl PagedBlockWriter {
    pub fn new(block_id: BlockId, page_size: u64, dir: Arc<dyn PageStoreDir>) -> Self {
        Self {
            block_id,
            page_size,
            dir,
            next_page_index: 0,
            bytes_written: 0,
            closed: false,
        }
    }

    /// Writes the next page-sized chunk. Only the final call of a block's
    /// write sequence may be shorter than `page_size`; writing again after a
    /// short write is a caller bug and panics, matching the adapter's
    /// documented sequential-only contract.
    pub async fn write_page(&mut self, bytes: Bytes) -> anyhow::Result<()> {
        anyhow::ensure!(!self.closed, "writer already closed");
        assert!(
            bytes.len() as u64 <= self.page_size,
            "write exceeds page_size"
        );
        let file_id = temp_file_id_for_block(self.block_id);
        let is_full_page = bytes.len() as u64 == self.page_size;
        let index = self.next_page_index;
        self.dir
            .write_page(self.block_id, file_id, index, bytes.clone())
            .await?;
        self.bytes_written += bytes.len() as u64;
        self.next_page_index += 1;
        if !is_full_page {
            self.closed = true; // short write must be the last one
        }
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }
}
