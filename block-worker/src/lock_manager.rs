//! Per-block shared/exclusive lock manager.
//!
//! Mirrors the discipline in the teacher's page cache: a per-entry
//! `tokio::sync::RwLock` guards contents, and handles are scoped resources
//! whose `Drop` releases exactly one acquisition. Unlike `page_cache::Slot`
//! (a fixed-size table of buffer slots), entries here are created lazily per
//! block id and reaped once no session holds them.
//!
//! Handles are also session-scoped: every acquisition is tagged with the
//! caller's `SessionId` and a manager-assigned `LockId`, so a session's locks
//! can be located and force-released by `release_session` on crash/disconnect
//! cleanup, without requiring the caller to still own the handle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::errors::LockError;
use crate::ids::BlockId;
use utils::id::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Identifies one granted acquisition, unique for the lifetime of the
/// manager. Used by `validate` to check a claimed handle against the session
/// and block it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId(u64);

struct Entry {
    lock: Arc<RwLock<()>>,
    /// Number of live handles referencing this entry, used to reap entries
    /// with no outstanding interest. Guarded by the table mutex, not by
    /// `lock` itself.
    refcount: usize,
}

/// Bookkeeping for one granted acquisition, shared between the handle
/// returned to the caller and the manager's own tables so either side can
/// drive the actual release.
struct Grant {
    session: SessionId,
    block: BlockId,
    guard: Mutex<Option<LockGuard>>,
}

/// Manages one `RwLock<()>` per block id, created on first use and dropped
/// once unreferenced.
pub struct BlockLockManager {
    table: Mutex<HashMap<BlockId, Entry>>,
    next_lock_id: AtomicU64,
    grants: Mutex<HashMap<LockId, Arc<Grant>>>,
    by_session: Mutex<HashMap<SessionId, HashSet<LockId>>>,
}

impl Default for BlockLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockLockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            next_lock_id: AtomicU64::new(0),
            grants: Mutex::new(HashMap::new()),
            by_session: Mutex::new(HashMap::new()),
        }
    }

    fn entry_lock(&self, block: BlockId) -> Arc<RwLock<()>> {
        let mut table = self.table.lock();
        let entry = table.entry(block).or_insert_with(|| Entry {
            lock: Arc::new(RwLock::new(())),
            refcount: 0,
        });
        entry.refcount += 1;
        entry.lock.clone()
    }

    fn release_entry(&self, block: BlockId) {
        let mut table = self.table.lock();
        if let Some(entry) = table.get_mut(&block) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                table.remove(&block);
            }
        }
    }

    /// Blocks until `mode` is granted for `block`.
    ///
    /// Takes `self` wrapped in `Arc` so the returned handle can carry a back
    /// reference to the manager and release on drop, per the cyclic-ownership
    /// pattern: the manager outlives every handle because callers only ever
    /// hand out handles through operations on an `Arc<BlockLockManager>` they
    /// themselves own for at least as long.
    pub async fn acquire(
        self: &Arc<Self>,
        session: SessionId,
        block: BlockId,
        mode: LockMode,
    ) -> BlockLockHandle {
        let lock = self.entry_lock(block);
        let started = std::time::Instant::now();
        let guard = match mode {
            LockMode::Shared => LockGuard::Shared(lock.clone().read_owned().await),
            LockMode::Exclusive => LockGuard::Exclusive(lock.clone().write_owned().await),
        };
        crate::metrics::BLOCK_LOCK_WAIT_SECONDS.observe(started.elapsed().as_secs_f64());

        let lock_id = LockId(self.next_lock_id.fetch_add(1, Ordering::Relaxed));
        let grant = Arc::new(Grant {
            session,
            block,
            guard: Mutex::new(Some(guard)),
        });
        self.grants.lock().insert(lock_id, grant);
        self.by_session
            .lock()
            .entry(session)
            .or_default()
            .insert(lock_id);

        BlockLockHandle {
            block,
            mode,
            session,
            lock_id,
            manager: self.clone(),
        }
    }

    /// Same as [`Self::acquire`], but fails with `DeadlineExceeded` if `mode`
    /// isn't granted within `timeout`.
    pub async fn try_acquire(
        self: &Arc<Self>,
        session: SessionId,
        block: BlockId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<BlockLockHandle, LockError> {
        match tokio::time::timeout(timeout, self.acquire(session, block, mode)).await {
            Ok(handle) => Ok(handle),
            Err(_) => Err(LockError::DeadlineExceeded { block, timeout }),
        }
    }

    /// Verifies that `lock_id` was granted to `session` for `block` and is
    /// still outstanding.
    pub fn validate(
        &self,
        session: SessionId,
        block: BlockId,
        lock_id: LockId,
    ) -> Result<(), LockError> {
        let grants = self.grants.lock();
        match grants.get(&lock_id) {
            Some(grant) if grant.session == session && grant.block == block => Ok(()),
            _ => Err(LockError::InvalidHandle { session, block }),
        }
    }

    /// Releases every lock currently held by `session`, for crash/disconnect
    /// cleanup. Safe to call even if some of the session's handles are still
    /// live in a caller's hands: their eventual `Drop` finds the grant
    /// already gone and is a no-op.
    pub fn release_session(&self, session: SessionId) {
        let ids: Vec<LockId> = self
            .by_session
            .lock()
            .remove(&session)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for lock_id in ids {
            self.release_grant(lock_id);
        }
    }

    /// Drops the held `RwLock` guard (if not already taken) and tears down
    /// the manager-side bookkeeping for one grant. Idempotent: a grant is
    /// released by whichever of the handle's `Drop` or `release_session`
    /// gets there first; the other finds nothing to do.
    fn release_grant(&self, lock_id: LockId) {
        let grant = self.grants.lock().remove(&lock_id);
        let Some(grant) = grant else {
            return;
        };
        if let Some(set) = self.by_session.lock().get_mut(&grant.session) {
            set.remove(&lock_id);
        }
        let held = grant.guard.lock().take();
        drop(held);
        self.release_entry(grant.block);
    }
}

enum LockGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// A scoped lock acquisition. Dropping it releases exactly one hold on the
/// block's lock (unless `release_session` has already released it first).
pub struct BlockLockHandle {
    block: BlockId,
    mode: LockMode,
    session: SessionId,
    lock_id: LockId,
    manager: Arc<BlockLockManager>,
}

impl BlockLockHandle {
    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn lock_id(&self) -> LockId {
        self.lock_id
    }
}

impl Drop for BlockLockHandle {
    fn drop(&mut self) {
        self.manager.release_grant(self.lock_id);
    }
}
