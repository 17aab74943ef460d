//! `PagedBlockStore`: the facade implementing the block API (spec §4.3),
//! orchestrating the lock manager, metadata store, page store directories,
//! event listeners, and master reporting.
//!
//! Grounded on the teacher's `Timeline`/`Tenant` role: the single struct that
//! owns every collaborator and enforces the lock-acquisition order (block
//! lock, then metadata lock, then per-listener mutex — never reversed).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::config::BlockWorkerConfig;
use crate::errors::{BlockStoreError, MetaStoreError};
use crate::ids::{file_id_for_block, temp_file_id_for_block, BlockId};
use crate::listener::{BlockStoreEvent, BlockStoreEventListener, EventListenerRegistry};
use crate::lock_manager::{BlockLockHandle, BlockLockManager, LockMode};
use crate::master_client::{BlockMasterClient, CommitBlockRequest};
use crate::meta_store::{BlockMeta, PagedBlockMetaStore, TempBlockMeta};
use crate::page_store::PageStoreDir;
use crate::reader::PagedBlockReader;
use crate::ufs::UfsReader;
use crate::writer::PagedBlockWriter;
use utils::id::{SessionId, WorkerId};
use utils::sync::gate::Gate;

/// Handle returned by `pin`; releasing it (via `unpin` or `Drop`) drops the
/// shared block lock acquired to take the pin.
pub struct PinHandle {
    _lock: BlockLockHandle,
}

#[derive(Default)]
pub struct CreateBlockReaderOpts {
    pub no_cache: bool,
    pub ufs_path: Option<String>,
    pub ufs_block_size: Option<u64>,
}

pub struct PagedBlockStore {
    config: Arc<BlockWorkerConfig>,
    worker_id: WorkerId,
    locks: Arc<BlockLockManager>,
    meta: PagedBlockMetaStore,
    dirs: Vec<Arc<dyn PageStoreDir>>,
    ufs: Arc<dyn UfsReader>,
    master: Arc<dyn BlockMasterClient>,
    listeners: Arc<EventListenerRegistry>,
    pinned_inodes: Mutex<std::collections::HashSet<u64>>,
    gate: Gate,
}

impl PagedBlockStore {
    pub fn new(
        config: Arc<BlockWorkerConfig>,
        worker_id: WorkerId,
        dirs: Vec<Arc<dyn PageStoreDir>>,
        ufs: Arc<dyn UfsReader>,
        master: Arc<dyn BlockMasterClient>,
    ) -> Self {
        let dir_capacities = (0..dirs.len())
            .map(|i| config.dir_capacity_bytes(i))
            .collect();
        Self {
            config,
            worker_id,
            locks: Arc::new(BlockLockManager::new()),
            meta: PagedBlockMetaStore::new(dir_capacities),
            dirs,
            ufs,
            master,
            listeners: Arc::new(EventListenerRegistry::new()),
            pinned_inodes: Mutex::new(std::collections::HashSet::new()),
            gate: Gate::default(),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn BlockStoreEventListener>) {
        self.listeners.register(listener);
    }

    fn dir(&self, index: crate::ids::DirIndex) -> Arc<dyn PageStoreDir> {
        self.dirs[index.0 as usize].clone()
    }

    /// `pin(s, b)`: acquires a shared block lock, handle if present, else
    /// none (lock released immediately if the block isn't known).
    pub async fn pin(&self, session: SessionId, block: BlockId) -> Option<PinHandle> {
        let guard = self.gate.enter().ok()?;
        let lock = self.locks.acquire(session, block, LockMode::Shared).await;
        if !self.meta.has_block(block).await {
            drop(guard);
            return None;
        }
        drop(guard);
        Some(PinHandle { _lock: lock })
    }

    /// `unpin(h)`: releases the shared lock. Dropping the handle does the
    /// same; this just makes the call site read like the spec's operation
    /// table.
    pub fn unpin(&self, _handle: PinHandle) {}

    /// `create_block(s, b, initial_bytes)`. No block lock is taken: the
    /// block doesn't exist yet, so there's nothing to serialize against
    /// besides the metastore write `add_temp_block` already guards.
    pub async fn create_block(
        &self,
        _session: SessionId,
        block: BlockId,
        initial_bytes: u64,
    ) -> Result<(), BlockStoreError> {
        let _gate = self.gate.enter().map_err(|_| {
            BlockStoreError::Unavailable(crate::errors::MasterClientError::Unavailable(
                "store is shutting down".to_string(),
            ))
        })?;
        let dir_index = self.meta.allocate(initial_bytes).await?;
        let temp_file_id = temp_file_id_for_block(block);
        self.dir(dir_index).put_temp_file(temp_file_id).await?;
        self.meta
            .add_temp_block(TempBlockMeta {
                block_id: block,
                dir_index,
            })
            .await?;
        Ok(())
    }

    /// `create_block_writer(s, b)`. No block lock is taken, for the same
    /// reason as `create_block`.
    pub async fn create_block_writer(
        &self,
        _session: SessionId,
        block: BlockId,
    ) -> Result<PagedBlockWriter, BlockStoreError> {
        let _gate = self.gate.enter().map_err(|_| {
            BlockStoreError::Unavailable(crate::errors::MasterClientError::Unavailable(
                "store is shutting down".to_string(),
            ))
        })?;
        let dir_index = self.meta.allocate(0).await?;
        let temp_file_id = temp_file_id_for_block(block);
        self.dir(dir_index).put_temp_file(temp_file_id).await?;
        self.meta
            .add_temp_block(TempBlockMeta {
                block_id: block,
                dir_index,
            })
            .await?;
        Ok(PagedBlockWriter::new(
            block,
            self.config.page_size,
            self.dir(dir_index),
        ))
    }

    /// `create_block_reader(s, b, offset, ufs_opts)`.
    pub async fn create_block_reader(
        &self,
        session: SessionId,
        block: BlockId,
        offset: u64,
        opts: CreateBlockReaderOpts,
    ) -> Result<PagedBlockReader, BlockStoreError> {
        if let Some(meta) = self.meta.get_block(block).await {
            let lock = self.locks.acquire(session, block, LockMode::Shared).await;
            let dir = self.dir(meta.dir_index);
            dir.evictor().add_pinned(block);
            let dir_for_close = dir.clone();
            let release: Box<dyn FnOnce() + Send> = Box::new(move || {
                dir_for_close.evictor().remove_pinned(block);
                drop(lock);
            });
            return Ok(PagedBlockReader::for_cached_block(
                block,
                file_id_for_block(block, meta.length),
                self.config.page_size,
                meta.length,
                offset,
                dir,
                Some(release),
            ));
        }

        let Some(ufs_path) = opts.ufs_path.clone() else {
            return Err(BlockStoreError::NotFound(format!(
                "block {block} unknown and no ufs_path supplied"
            )));
        };

        if opts.no_cache {
            // Cache-miss, no_cache: UFS-only reader, no block lock held.
            let block_len = match opts.ufs_block_size {
                Some(len) => len,
                None => self
                    .ufs
                    .stat_len(&ufs_path)
                    .await
                    .map_err(|e| BlockStoreError::Internal(e.into()))?,
            };
            let dummy_dir = self.dirs[0].clone();
            return Ok(PagedBlockReader::with_ufs_fallback(
                block,
                file_id_for_block(block, block_len),
                self.config.page_size,
                block_len,
                offset,
                dummy_dir,
                self.ufs.clone(),
                ufs_path,
                false,
                None,
            ));
        }

        // Cache miss, caching: register a new BlockMeta, pin, and on reader
        // close, commit locally + report to master, then unpin.
        let block_len = match opts.ufs_block_size {
            Some(len) => len,
            None => self
                .ufs
                .stat_len(&ufs_path)
                .await
                .map_err(|e| BlockStoreError::Internal(e.into()))?,
        };
        let dir_index = self.meta.allocate(block_len).await?;
        let lock = self.locks.acquire(session, block, LockMode::Exclusive).await;
        let dir = self.dir(dir_index);
        dir.evictor().add_pinned(block);

        self.meta
            .add_block(BlockMeta {
                block_id: block,
                length: block_len,
                dir_index,
            })
            .await?;

        let file_id = file_id_for_block(block, block_len);

        self.listeners
            .dispatch(BlockStoreEvent::CommitLocal { block })
            .await;

        let master = self.master.clone();
        let tier = self.config.default_tier.clone();
        let medium = self.config.default_medium.clone();
        let worker_id = self.worker_id;
        let used_bytes = self.meta.store_meta().await.used_bytes;
        let listeners = self.listeners.clone();
        let dir_for_close = dir.clone();
        let release: Box<dyn FnOnce() + Send> = Box::new(move || {
            dir_for_close.evictor().remove_pinned(block);
            drop(lock);
            // Fire-and-forget master report on close; best-effort per spec
            // (commit's `Unavailable` does not roll back the local commit).
            tokio::spawn(async move {
                let _ = master
                    .commit_block(CommitBlockRequest {
                        worker_id,
                        used_bytes,
                        tier,
                        medium,
                        block_id: block,
                        length: block_len,
                    })
                    .await;
                listeners
                    .dispatch(BlockStoreEvent::CommitMaster { block })
                    .await;
            });
        });

        Ok(PagedBlockReader::with_ufs_fallback(
            block,
            file_id,
            self.config.page_size,
            block_len,
            offset,
            dir,
            self.ufs.clone(),
            ufs_path,
            true,
            Some(release),
        ))
    }

    /// `commit(s, b, pin_on_create)`.
    pub async fn commit(
        &self,
        session: SessionId,
        block: BlockId,
        pin_on_create: bool,
    ) -> Result<(), BlockStoreError> {
        let temp = self
            .meta
            .get_temp_block(block)
            .await
            .ok_or_else(|| BlockStoreError::NotFound(format!("temp block {block}")))?;

        let lock = self.locks.acquire(session, block, LockMode::Exclusive).await;
        let dir = self.dir(temp.dir_index);
        let cached = dir
            .temp_block_cached_bytes(block)
            .await
            .map_err(BlockStoreError::Internal)?;

        let length = cached;
        let temp_file_id = temp_file_id_for_block(block);
        let final_file_id = file_id_for_block(block, length);
        dir.commit(block, temp_file_id, final_file_id)
            .await
            .map_err(BlockStoreError::Internal)?;

        let page_count = length.div_ceil(self.config.page_size);
        let pages: Vec<_> = (0..page_count as u32)
            .map(|i| crate::ids::PageId::new(final_file_id, i))
            .collect();

        self.meta.commit(block, length, pages).await?;

        // Release the metadata write lock before the master RPC (spec §9's
        // offered relaxation): only the block's exclusive lock is held past
        // this point, so unrelated blocks' commits aren't serialized behind
        // this network call.
        self.listeners
            .dispatch(BlockStoreEvent::CommitLocal { block })
            .await;
        crate::metrics::COMMITS_LOCAL_TOTAL.inc();

        let used_bytes = self.meta.store_meta().await.used_bytes;
        let report = self
            .master
            .commit_block(CommitBlockRequest {
                worker_id: self.worker_id,
                used_bytes,
                tier: self.config.default_tier.clone(),
                medium: self.config.default_medium.clone(),
                block_id: block,
                length,
            })
            .await;

        match report {
            Ok(()) => {
                self.listeners
                    .dispatch(BlockStoreEvent::CommitMaster { block })
                    .await;
                crate::metrics::COMMITS_MASTER_TOTAL.inc();
            }
            Err(e) => {
                crate::metrics::MASTER_RPC_FAILURES_TOTAL.inc();
                drop(lock);
                return Err(e.into());
            }
        }

        if !pin_on_create {
            dir.evictor().remove_pinned(block);
        } else {
            dir.evictor().add_pinned(block);
        }
        drop(lock);
        Ok(())
    }

    /// `abort(s, b)`. No block lock is taken: `b` is still a temp block, not
    /// yet visible to readers.
    pub async fn abort(&self, _session: SessionId, block: BlockId) -> Result<(), BlockStoreError> {
        let temp = self.meta.discard_temp_block(block).await?;
        let dir = self.dir(temp.dir_index);
        dir.abort(temp_file_id_for_block(block))
            .await
            .map_err(BlockStoreError::Internal)?;
        self.listeners
            .dispatch(BlockStoreEvent::Abort { block })
            .await;
        Ok(())
    }

    /// `remove(s, b, timeout)`.
    pub async fn remove(
        &self,
        session: SessionId,
        block: BlockId,
        timeout: Duration,
    ) -> Result<(), BlockStoreError> {
        if self.meta.has_temp_block(block).await {
            return Err(BlockStoreError::InvalidState(format!(
                "block {block} is a temp block"
            )));
        }
        let lock = self
            .locks
            .try_acquire(session, block, LockMode::Exclusive, timeout)
            .await?;

        let (meta, pages) = self.meta.remove_block(block).await?;
        let dir = self.dir(meta.dir_index);
        for page in pages {
            dir.delete_page(page).await.map_err(BlockStoreError::Internal)?;
        }
        drop(lock);

        self.listeners
            .dispatch(BlockStoreEvent::Remove { block })
            .await;
        Ok(())
    }

    /// `validate(s, b, lock_id)`: verifies a claimed lock handle belongs to
    /// `session` and `block`.
    pub fn validate_lock(
        &self,
        session: SessionId,
        block: BlockId,
        lock_id: crate::lock_manager::LockId,
    ) -> Result<(), BlockStoreError> {
        self.locks.validate(session, block, lock_id).map_err(Into::into)
    }

    /// `release_session(session)`: releases every lock the session holds,
    /// for crash/disconnect cleanup.
    pub fn release_session(&self, session: SessionId) {
        self.locks.release_session(session);
    }

    /// `access(b)`: notify listeners only.
    pub async fn access(&self, block: BlockId) {
        self.listeners
            .dispatch(BlockStoreEvent::Access { block })
            .await;
    }

    /// `update_pinned_inodes(set)`: replaces the advisory pinned-inode set
    /// used as input to the allocation policy.
    pub async fn update_pinned_inodes(&self, inodes: std::collections::HashSet<u64>) {
        let mut guard = self.pinned_inodes.lock().await;
        *guard = inodes;
    }

    pub async fn has_block(&self, block: BlockId) -> bool {
        self.meta.has_block(block).await
    }

    pub async fn has_temp_block(&self, block: BlockId) -> bool {
        self.meta.has_temp_block(block).await
    }

    /// Stub per spec §9 Open Questions: out-of-scope placeholder operations
    /// retain only their stable signature, no placeholder listener
    /// emissions.
    pub async fn request_space(&self, _bytes: u64) -> Result<(), BlockStoreError> {
        Ok(())
    }

    pub async fn move_block(&self, _block: BlockId, _dst_dir: crate::ids::DirIndex) -> Result<(), BlockStoreError> {
        Ok(())
    }

    pub async fn remove_inaccessible_storage(&self, _dir: crate::ids::DirIndex) -> Result<(), BlockStoreError> {
        Ok(())
    }

    /// Legacy local-path reader: the paged store has no physical per-block
    /// file, so this always fails (spec §9 Open Question 2).
    pub async fn create_block_reader_legacy(
        &self,
        _block: BlockId,
        _lock_id: &str,
    ) -> Result<PagedBlockReader, BlockStoreError> {
        Err(BlockStoreError::NotFound(
            "legacy local-path reader is unsupported by the paged store".to_string(),
        ))
    }

    /// Drains outstanding operations and waits for in-flight readers/writers
    /// to finish, mirroring the teacher's `SecondaryTenant::shutdown`.
    pub async fn shutdown(&self) {
        self.gate.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DirIndex;
    use crate::local_page_store::LocalPageStoreDir;
    use crate::master_client::NullBlockMasterClient;
    use crate::ufs::LocalUfs;
    use camino_tempfile::Utf8TempDir;

    async fn build_store() -> (Utf8TempDir, Utf8TempDir, PagedBlockStore) {
        let data_tmp = camino_tempfile::tempdir().unwrap();
        let ufs_tmp = camino_tempfile::tempdir().unwrap();
        let data_root = data_tmp.path().to_path_buf();
        let ufs_root = ufs_tmp.path().to_path_buf();

        let config = Arc::new(
            BlockWorkerConfig::parse(&format!(
                r#"
                page_size = 4096
                data_dirs = ["{data_root}"]
                ufs_root = "{ufs_root}"
                "#
            ))
            .unwrap(),
        );
        let dir: Arc<dyn PageStoreDir> = Arc::new(LocalPageStoreDir::new(
            DirIndex(0),
            data_root,
            4096,
            1 << 20,
        ));
        let ufs: Arc<dyn UfsReader> = Arc::new(LocalUfs::new(ufs_root));
        let master: Arc<dyn BlockMasterClient> = Arc::new(NullBlockMasterClient);

        let store = PagedBlockStore::new(config, WorkerId::generate(), vec![dir], ufs, master);
        (data_tmp, ufs_tmp, store)
    }

    #[tokio::test]
    async fn s1_create_write_commit_read() {
        let (_d, _u, store) = build_store().await;
        let session = SessionId::generate();
        let block = BlockId(42);
        store.create_block(session, block, 0).await.unwrap();
        let mut writer = store.create_block_writer(session, block).await.unwrap();
        writer.write_page(Bytes::from(vec![0u8; 4096])).await.unwrap();
        let mut middle = vec![1u8; 4096];
        writer.write_page(Bytes::from(middle.clone())).await.unwrap();
        let last = vec![2u8; 1000];
        writer.write_page(Bytes::from(last.clone())).await.unwrap();
        drop(writer);

        store.commit(session, block, false).await.unwrap();
        assert!(store.has_block(block).await);
        assert!(!store.has_temp_block(block).await);

        let mut reader = store
            .create_block_reader(session, block, 8000, CreateBlockReaderOpts::default())
            .await
            .unwrap();
        let got = reader.read_to_end().await.unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&middle.split_off(8000 - 4096));
        expected.extend_from_slice(&last);
        assert_eq!(&got[..], &expected[..]);
    }

    #[tokio::test]
    async fn s2_cache_miss_no_cache_leaves_block_unknown() {
        let (_d, ufs_tmp, store) = build_store().await;
        tokio::fs::write(ufs_tmp.path().join("x"), vec![7u8; 5000])
            .await
            .unwrap();

        let session = SessionId::generate();
        let block = BlockId(7);
        let mut reader = store
            .create_block_reader(
                session,
                block,
                0,
                CreateBlockReaderOpts {
                    no_cache: true,
                    ufs_path: Some("x".to_string()),
                    ufs_block_size: Some(5000),
                },
            )
            .await
            .unwrap();
        let got = reader.read_to_end().await.unwrap();
        assert_eq!(got.len(), 5000);
        reader.close();
        assert!(!store.has_block(block).await);
    }

    #[tokio::test]
    async fn s4_concurrent_create_block_writer_exactly_one_wins() {
        let (_d, _u, store) = build_store().await;
        let store = Arc::new(store);
        let block = BlockId(99);

        let s1 = store.clone();
        let s2 = store.clone();
        let session = SessionId::generate();
        let (r1, r2) = tokio::join!(
            s1.create_block_writer(session, block),
            s2.create_block_writer(session, block)
        );
        let oks = [r1.is_ok(), r2.is_ok()];
        assert_eq!(oks.iter().filter(|x| **x).count(), 1);
    }

    #[tokio::test]
    async fn s3_cache_miss_with_caching_commits_locally_and_reports_to_master() {
        struct RecordingListener {
            events: Mutex<Vec<BlockStoreEvent>>,
        }

        #[async_trait::async_trait]
        impl BlockStoreEventListener for RecordingListener {
            async fn on_event(&self, event: BlockStoreEvent) {
                self.events.lock().await.push(event);
            }
        }

        let (_d, ufs_tmp, store) = build_store().await;
        tokio::fs::write(ufs_tmp.path().join("y"), vec![3u8; 5000])
            .await
            .unwrap();

        let recorder = Arc::new(RecordingListener {
            events: Mutex::new(Vec::new()),
        });
        store.register_listener(recorder.clone());

        let session = SessionId::generate();
        let block = BlockId(7);
        assert!(!store.has_block(block).await);

        let mut reader = store
            .create_block_reader(
                session,
                block,
                0,
                CreateBlockReaderOpts {
                    no_cache: false,
                    ufs_path: Some("y".to_string()),
                    ufs_block_size: Some(5000),
                },
            )
            .await
            .unwrap();
        let got = reader.read_to_end().await.unwrap();
        assert_eq!(got.len(), 5000);
        reader.close();

        assert!(store.has_block(block).await);

        let dir = store.dirs[0].clone();
        let mut pages = dir
            .block_pages(block)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.page_index)
            .collect::<Vec<_>>();
        pages.sort();
        assert_eq!(pages, vec![0, 1]);

        // The master report runs fire-and-forget on a spawned task; give it
        // a chance to run before asserting on delivered events.
        for _ in 0..50 {
            if recorder
                .events
                .lock()
                .await
                .iter()
                .any(|e| matches!(e, BlockStoreEvent::CommitMaster { block: b } if *b == block))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let events = recorder.events.lock().await;
        assert!(events
            .iter()
            .any(|e| matches!(e, BlockStoreEvent::CommitLocal { block: b } if *b == block)));
        assert!(events
            .iter()
            .any(|e| matches!(e, BlockStoreEvent::CommitMaster { block: b } if *b == block)));
    }

    #[tokio::test]
    async fn s5_remove_times_out_while_reader_holds_shared_lock() {
        let (_d, _u, store) = build_store().await;
        let session = SessionId::generate();
        let block = BlockId(9);
        store.create_block(session, block, 0).await.unwrap();
        let mut writer = store.create_block_writer(session, block).await.unwrap();
        writer.write_page(Bytes::from(vec![0u8; 10])).await.unwrap();
        drop(writer);
        store.commit(session, block, false).await.unwrap();

        let reader = store
            .create_block_reader(session, block, 0, CreateBlockReaderOpts::default())
            .await
            .unwrap();

        let result = store
            .remove(session, block, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(BlockStoreError::DeadlineExceeded(_))));
        assert!(store.has_block(block).await);
        drop(reader);
    }

    #[tokio::test]
    async fn validate_lock_rejects_another_sessions_handle() {
        let (_d, _u, store) = build_store().await;
        let session = SessionId::generate();
        let other = SessionId::generate();
        let block = BlockId(20);
        store.create_block(session, block, 0).await.unwrap();
        let mut writer = store.create_block_writer(session, block).await.unwrap();
        writer.write_page(Bytes::from(vec![0u8; 10])).await.unwrap();
        drop(writer);
        store.commit(session, block, true).await.unwrap();

        let reader = store
            .create_block_reader(session, block, 0, CreateBlockReaderOpts::default())
            .await
            .unwrap();
        let lock = store.locks.acquire(session, block, LockMode::Shared).await;
        assert!(store.validate_lock(session, block, lock.lock_id()).is_ok());
        assert!(store.validate_lock(other, block, lock.lock_id()).is_err());
        drop(lock);
        drop(reader);
    }
}
