//! Drives a [`LoadJob`] to completion: repeatedly prepares a batch of tasks,
//! dispatches each to its assigned worker concurrently, and feeds responses
//! back into the job.
//!
//! Grounded on the teacher's `tenant::secondary::SecondaryTenant` dispatch
//! loop (a `tokio::select!` over pending work and cancellation) and
//! `tenant::tasks`'s rate-limited background loop shape — this job's
//! equivalent "rate limit" is simply waiting for the previous round's tasks
//! to finish before preparing the next.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::rpc::BlockWorkerRpc;
use super::{task_to_request, LoadJob};

/// Runs `job` to completion against `rpc`, dispatching prepared tasks and
/// reconciling their responses, until the job reports done or `cancel`
/// fires.
pub async fn run_load_job(job: Arc<LoadJob>, rpc: Arc<dyn BlockWorkerRpc>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            info!(job_id = %job.job_id, "load job cancelled");
            return;
        }
        if job.is_done() {
            info!(job_id = %job.job_id, "load job complete");
            return;
        }

        let tasks = job.prepare_next_tasks().await;
        if tasks.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                _ = cancel.cancelled() => return,
            }
            continue;
        }

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let job = job.clone();
            let rpc = rpc.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let req = task_to_request(&job.job_id, &task);
                tokio::select! {
                    result = rpc.load_file(task.worker, req) => {
                        match result {
                            Ok(resp) => job.process_response(&task, resp),
                            Err(e) => {
                                warn!(worker = %task.worker, error = %e, "load_file RPC failed");
                                job.on_task_execution_error(&task, &e.to_string());
                            }
                        }
                    }
                    _ = cancel.cancelled() => {
                        job.on_task_cancelled(&task);
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_job::iterator::{FileStatus, VecFileIterator};
    use crate::load_job::rpc::FakeBlockWorkerRpc;
    use crate::load_job::LoadJobConfig;
    use crate::ufs::LocalUfs;
    use utils::id::WorkerId;

    #[tokio::test]
    async fn drives_a_small_job_to_completion() {
        let tmp = camino_tempfile::tempdir().unwrap();
        let files: Vec<FileStatus> = (0..5)
            .map(|i| FileStatus {
                ufs_path: format!("f{i}"),
                length: 10,
            })
            .collect();
        for f in &files {
            tokio::fs::write(tmp.path().join(&f.ufs_path), vec![0u8; 10])
                .await
                .unwrap();
        }
        let root = tmp.path().to_path_buf();
        let ufs = Arc::new(LocalUfs::new(root));

        let job = Arc::new(LoadJob::new(
            "job-x".to_string(),
            LoadJobConfig {
                path: "/".to_string(),
                bandwidth: None,
                verify: false,
                batch_size: 10,
                user: None,
            },
            ufs,
            Box::new(VecFileIterator::new(files, true)),
            Some(5),
        ));
        job.set_active_workers(vec![WorkerId::generate()]);

        let rpc: Arc<dyn BlockWorkerRpc> = Arc::new(FakeBlockWorkerRpc {
            failures: Default::default(),
        });
        let cancel = CancellationToken::new();

        run_load_job(job.clone(), rpc, cancel).await;

        let report = job.progress_report().await;
        assert_eq!(report.processed, 5);
        assert_eq!(report.failed_file_count, 0);
    }
}
