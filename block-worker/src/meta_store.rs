//! In-memory authority for block/temp-block existence, directory assignment,
//! and per-directory page sets.
//!
//! One `RwLock` guards all three maps together (the "metadata lock" of the
//! concurrency model), the same single-authority-behind-one-lock shape the
//! teacher uses for its layer manager.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::errors::MetaStoreError;
use crate::ids::{BlockId, DirIndex, PageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub length: u64,
    pub dir_index: DirIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempBlockMeta {
    pub block_id: BlockId,
    pub dir_index: DirIndex,
}

/// Snapshot used for the master's periodic usage report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreMetaSnapshot {
    pub used_bytes: u64,
    pub committed_block_count: usize,
    pub temp_block_count: usize,
}

#[derive(Default)]
struct MetaStoreState {
    committed: HashMap<BlockId, BlockMeta>,
    temp: HashMap<BlockId, TempBlockMeta>,
    /// Per-directory set of pages belonging to committed blocks.
    dir_pages: HashMap<DirIndex, HashSet<PageId>>,
    dir_capacity_bytes: Vec<u64>,
    /// Round-robin cursor for `allocate`.
    next_dir: usize,
}

pub struct PagedBlockMetaStore {
    state: RwLock<MetaStoreState>,
}

impl PagedBlockMetaStore {
    pub fn new(dir_capacity_bytes: Vec<u64>) -> Self {
        Self {
            state: RwLock::new(MetaStoreState {
                dir_capacity_bytes,
                ..Default::default()
            }),
        }
    }

    /// Chooses a directory with at least `size` bytes of (advisory) free
    /// capacity using deterministic round-robin, per the spec's allowance
    /// that allocation policy is implementation-defined.
    pub async fn allocate(&self, size: u64) -> Result<DirIndex, MetaStoreError> {
        let mut state = self.state.write().await;
        let dir_count = state.dir_capacity_bytes.len();
        if dir_count == 0 {
            return Err(MetaStoreError::ResourceExhausted { needed: size });
        }
        for offset in 0..dir_count {
            let idx = (state.next_dir + offset) % dir_count;
            if state.dir_capacity_bytes[idx] >= size {
                state.next_dir = (idx + 1) % dir_count;
                return Ok(DirIndex(idx as u32));
            }
        }
        Err(MetaStoreError::ResourceExhausted { needed: size })
    }

    pub async fn add_temp_block(&self, meta: TempBlockMeta) -> Result<(), MetaStoreError> {
        let mut state = self.state.write().await;
        if state.committed.contains_key(&meta.block_id) || state.temp.contains_key(&meta.block_id)
        {
            return Err(MetaStoreError::AlreadyExists(meta.block_id));
        }
        state.temp.insert(meta.block_id, meta);
        Ok(())
    }

    pub async fn has_temp_block(&self, id: BlockId) -> bool {
        self.state.read().await.temp.contains_key(&id)
    }

    pub async fn get_temp_block(&self, id: BlockId) -> Option<TempBlockMeta> {
        self.state.read().await.temp.get(&id).cloned()
    }

    pub async fn add_block(&self, meta: BlockMeta) -> Result<(), MetaStoreError> {
        let mut state = self.state.write().await;
        if state.committed.contains_key(&meta.block_id) {
            return Err(MetaStoreError::AlreadyExists(meta.block_id));
        }
        state.committed.insert(meta.block_id, meta);
        Ok(())
    }

    pub async fn has_block(&self, id: BlockId) -> bool {
        self.state.read().await.committed.contains_key(&id)
    }

    pub async fn get_block(&self, id: BlockId) -> Option<BlockMeta> {
        self.state.read().await.committed.get(&id).cloned()
    }

    /// Atomically moves a block from temp to committed.
    pub async fn commit(
        &self,
        block_id: BlockId,
        length: u64,
        pages: impl IntoIterator<Item = PageId>,
    ) -> Result<BlockMeta, MetaStoreError> {
        let mut state = self.state.write().await;
        let temp = state
            .temp
            .remove(&block_id)
            .ok_or(MetaStoreError::NotFound(block_id))?;
        if state.committed.contains_key(&block_id) {
            // Restore the temp entry; commit failed, state unchanged.
            state.temp.insert(block_id, temp);
            return Err(MetaStoreError::AlreadyExists(block_id));
        }
        let meta = BlockMeta {
            block_id,
            length,
            dir_index: temp.dir_index,
        };
        state.committed.insert(block_id, meta.clone());
        state
            .dir_pages
            .entry(temp.dir_index)
            .or_default()
            .extend(pages);
        Ok(meta)
    }

    /// Discards a temp block without committing it.
    pub async fn discard_temp_block(&self, block_id: BlockId) -> Result<TempBlockMeta, MetaStoreError> {
        let mut state = self.state.write().await;
        state
            .temp
            .remove(&block_id)
            .ok_or(MetaStoreError::NotFound(block_id))
    }

    /// Removes a committed block and every page it owns.
    pub async fn remove_block(&self, block_id: BlockId) -> Result<(BlockMeta, Vec<PageId>), MetaStoreError> {
        let mut state = self.state.write().await;
        let meta = state
            .committed
            .remove(&block_id)
            .ok_or(MetaStoreError::NotFound(block_id))?;
        let removed: Vec<PageId> = if let Some(set) = state.dir_pages.get_mut(&meta.dir_index) {
            let removed: Vec<PageId> = set
                .iter()
                .filter(|p| p.file_id == crate::ids::file_id_for_block(block_id, meta.length))
                .copied()
                .collect();
            for p in &removed {
                set.remove(p);
            }
            removed
        } else {
            Vec::new()
        };
        Ok((meta, removed))
    }

    pub async fn remove_page(&self, dir: DirIndex, page: PageId) -> Result<(), MetaStoreError> {
        let mut state = self.state.write().await;
        let set = state
            .dir_pages
            .get_mut(&dir)
            .ok_or(MetaStoreError::PageNotFound(page))?;
        if !set.remove(&page) {
            return Err(MetaStoreError::PageNotFound(page));
        }
        Ok(())
    }

    pub async fn store_meta(&self) -> StoreMetaSnapshot {
        let state = self.state.read().await;
        StoreMetaSnapshot {
            used_bytes: state.committed.values().map(|b| b.length).sum(),
            committed_block_count: state.committed.len(),
            temp_block_count: state.temp.len(),
        }
    }

    /// Same as `store_meta`, but also includes per-directory page counts,
    /// for callers (the master reporting path) that want both in one lock
    /// acquisition.
    pub async fn store_meta_full(&self) -> StoreMetaFullSnapshot {
        let state = self.state.read().await;
        StoreMetaFullSnapshot {
            used_bytes: state.committed.values().map(|b| b.length).sum(),
            committed_block_count: state.committed.len(),
            temp_block_count: state.temp.len(),
            dir_page_counts: state
                .dir_pages
                .iter()
                .map(|(dir, pages)| (*dir, pages.len()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreMetaFullSnapshot {
    pub used_bytes: u64,
    pub committed_block_count: usize,
    pub temp_block_count: usize,
    pub dir_page_counts: HashMap<DirIndex, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn block_cannot_be_both_committed_and_temp() {
        let store = PagedBlockMetaStore::new(vec![1024]);
        let b = BlockId(1);
        let dir = store.allocate(10).await.unwrap();
        store
            .add_temp_block(TempBlockMeta {
                block_id: b,
                dir_index: dir,
            })
            .await
            .unwrap();
        assert!(store.has_temp_block(b).await);
        assert!(!store.has_block(b).await);

        store.commit(b, 10, []).await.unwrap();
        assert!(store.has_block(b).await);
        assert!(!store.has_temp_block(b).await);
    }

    #[tokio::test]
    async fn commit_fails_for_unknown_temp_block() {
        let store = PagedBlockMetaStore::new(vec![1024]);
        let err = store.commit(BlockId(99), 10, []).await.unwrap_err();
        assert!(matches!(err, MetaStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn allocate_fails_when_nothing_fits() {
        let store = PagedBlockMetaStore::new(vec![4]);
        let err = store.allocate(100).await.unwrap_err();
        assert!(matches!(err, MetaStoreError::ResourceExhausted { .. }));
    }

    #[tokio::test]
    async fn remove_block_clears_its_pages() {
        let store = PagedBlockMetaStore::new(vec![1024]);
        let b = BlockId(2);
        let dir = store.allocate(10).await.unwrap();
        store
            .add_temp_block(TempBlockMeta {
                block_id: b,
                dir_index: dir,
            })
            .await
            .unwrap();
        let page = PageId::new(crate::ids::file_id_for_block(b, 10), 0);
        store.commit(b, 10, [page]).await.unwrap();

        let (_, removed) = store.remove_block(b).await.unwrap();
        assert_eq!(removed, vec![page]);
        assert!(!store.has_block(b).await);
    }
}
