//! The worker RPC dispatched by the load job scheduler (spec §6): one task
//! per worker, each task carrying up to `MAX_FILES_PER_TASK` files.

use async_trait::async_trait;
use utils::id::WorkerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFileEntry {
    pub alluxio_path: String,
    pub length: u64,
    pub ufs_path: String,
}

#[derive(Debug, Clone)]
pub struct LoadFileRequest {
    pub job_id: String,
    pub files: Vec<LoadFileEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Success,
    Failure,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub file: String,
    pub message: String,
    pub code: i32,
    pub retryable: bool,
}

#[derive(Debug, Clone)]
pub struct LoadFileResponse {
    pub status: LoadStatus,
    pub files: Vec<FileFailure>,
}

#[async_trait]
pub trait BlockWorkerRpc: Send + Sync {
    async fn load_file(&self, worker: WorkerId, req: LoadFileRequest) -> anyhow::Result<LoadFileResponse>;
}

/// In-memory fake used by load job tests: every file not listed in
/// `failures` is reported successful.
pub struct FakeBlockWorkerRpc {
    pub failures: std::collections::HashMap<String, FileFailure>,
}

#[async_trait]
impl BlockWorkerRpc for FakeBlockWorkerRpc {
    async fn load_file(
        &self,
        _worker: WorkerId,
        req: LoadFileRequest,
    ) -> anyhow::Result<LoadFileResponse> {
        let mut failures = Vec::new();
        for f in &req.files {
            if let Some(failure) = self.failures.get(&f.alluxio_path) {
                failures.push(failure.clone());
            }
        }
        let status = if failures.is_empty() {
            LoadStatus::Success
        } else if failures.len() == req.files.len() {
            LoadStatus::Failure
        } else {
            LoadStatus::Partial
        };
        Ok(LoadFileResponse {
            status,
            files: failures,
        })
    }
}
