//! Error taxonomy for the block store and load job.
//!
//! Narrow, per-module enums are converted into `BlockStoreError` at the
//! facade boundary, matching the teacher's convention of keeping internal
//! errors specific and widening them only where callers need one type.

use std::time::Duration;

use crate::ids::{BlockId, FileId, PageId};
use utils::id::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock wait for block {block} exceeded {timeout:?}")]
    DeadlineExceeded { block: BlockId, timeout: Duration },
    #[error("lock handle does not belong to session {session} / block {block}")]
    InvalidHandle { session: SessionId, block: BlockId },
}

#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("block {0} not found")]
    NotFound(BlockId),
    #[error("block {0} already exists")]
    AlreadyExists(BlockId),
    #[error("no directory has {needed} bytes free")]
    ResourceExhausted { needed: u64 },
    #[error("page {0} not found")]
    PageNotFound(PageId),
    #[error("temp block {0} is not fully written: length {length}, cached {cached}")]
    IncompleteTempBlock {
        block: BlockId,
        length: u64,
        cached: u64,
    },
}

/// Errors surfaced by [`crate::master_client::BlockMasterClient`].
#[derive(Debug, thiserror::Error)]
pub enum MasterClientError {
    #[error("master RPC unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Top-level error surfaced by [`crate::store::PagedBlockStore`]'s public API.
#[derive(thiserror::Error)]
pub enum BlockStoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("master unavailable: {0}")]
    Unavailable(#[source] MasterClientError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

// `MasterClientError` doesn't implement `Debug` the way `anyhow::Error`'s
// formatting would want it displayed inline, so spell it out by hand rather
// than deriving, matching the manual-Debug idiom used for wide error enums
// that hold non-trivial inner types.
impl std::fmt::Debug for BlockStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(s) => write!(f, "NotFound({s:?})"),
            Self::AlreadyExists(s) => write!(f, "AlreadyExists({s:?})"),
            Self::InvalidState(s) => write!(f, "InvalidState({s:?})"),
            Self::ResourceExhausted(s) => write!(f, "ResourceExhausted({s:?})"),
            Self::DeadlineExceeded(s) => write!(f, "DeadlineExceeded({s:?})"),
            Self::Unavailable(e) => write!(f, "Unavailable({e})"),
            Self::Internal(e) => write!(f, "Internal({e:?})"),
        }
    }
}

impl From<LockError> for BlockStoreError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::DeadlineExceeded { block, timeout } => BlockStoreError::DeadlineExceeded(
                format!("block {block} lock not acquired within {timeout:?}"),
            ),
            LockError::InvalidHandle { session, block } => {
                BlockStoreError::InvalidState(format!("invalid lock handle for {session}/{block}"))
            }
        }
    }
}

impl From<MetaStoreError> for BlockStoreError {
    fn from(e: MetaStoreError) -> Self {
        match e {
            MetaStoreError::NotFound(b) => BlockStoreError::NotFound(format!("block {b}")),
            MetaStoreError::AlreadyExists(b) => {
                BlockStoreError::AlreadyExists(format!("block {b}"))
            }
            MetaStoreError::ResourceExhausted { needed } => {
                BlockStoreError::ResourceExhausted(format!("need {needed} bytes"))
            }
            MetaStoreError::PageNotFound(p) => BlockStoreError::NotFound(format!("page {p}")),
            MetaStoreError::IncompleteTempBlock {
                block,
                length,
                cached,
            } => BlockStoreError::InvalidState(format!(
                "block {block} not fully written: length {length}, cached {cached}"
            )),
        }
    }
}

impl From<MasterClientError> for BlockStoreError {
    fn from(e: MasterClientError) -> Self {
        BlockStoreError::Unavailable(e)
    }
}

/// Errors surfaced by [`crate::load_job::LoadJob`].
#[derive(Debug, thiserror::Error)]
pub enum LoadJobError {
    #[error("load job already completed")]
    AlreadyDone,
    #[error("load job failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UfsError {
    #[error("ufs path not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_store_errors_widen_into_block_store_errors() {
        let e: BlockStoreError = MetaStoreError::NotFound(BlockId(1)).into();
        assert!(matches!(e, BlockStoreError::NotFound(_)));

        let e: BlockStoreError = MetaStoreError::AlreadyExists(BlockId(2)).into();
        assert!(matches!(e, BlockStoreError::AlreadyExists(_)));
    }

    #[test]
    fn lock_deadline_widens_to_deadline_exceeded() {
        let e: BlockStoreError = LockError::DeadlineExceeded {
            block: BlockId(9),
            timeout: Duration::from_millis(100),
        }
        .into();
        assert!(matches!(e, BlockStoreError::DeadlineExceeded(_)));
    }
}
