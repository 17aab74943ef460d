//! The distributed load job: enumerates a UFS directory tree, assigns each
//! file deterministically to a worker, and drives a bounded batch pipeline
//! with retry/failure accounting (spec §4.6).
//!
//! Grounded on the teacher's `tenant::secondary::SecondaryTenant` scheduling
//! loop (command channel + completion channel dispatched over `tokio::select!`)
//! and `tenant::tasks`'s rate-limited background loop shape.

pub mod iterator;
pub mod rpc;
pub mod scheduler;

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::warn;
use utils::id::WorkerId;

use crate::ufs::UfsReader;
use iterator::{FileIterator, FileStatus};
use rpc::{BlockWorkerRpc, FileFailure, LoadFileEntry, LoadFileRequest, LoadStatus};

pub const RETRY_BLOCK_CAPACITY: usize = 1000;
pub const MAX_FILES_PER_TASK: usize = 20;
pub const FAILURE_COUNT_THRESHOLD: u64 = 100;
pub const FAILURE_RATIO_THRESHOLD: f64 = 0.05;
/// 0.8 * RETRY_BLOCK_CAPACITY, computed in integers to keep this a `const`.
pub const RETRY_THRESHOLD: usize = RETRY_BLOCK_CAPACITY * 8 / 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum JobState {
    Running,
    Failed,
    Completed,
}

/// One task dispatched to a worker: a bucket of files assigned to it,
/// capped at `MAX_FILES_PER_TASK`.
#[derive(Debug, Clone)]
pub struct LoadTask {
    pub worker: WorkerId,
    pub files: Vec<FileStatus>,
}

struct RetryEntry {
    file: FileStatus,
}

struct Counters {
    processed: AtomicU64,
    loaded_bytes: AtomicU64,
    failed: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            processed: AtomicU64::new(0),
            loaded_bytes: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

pub struct LoadJobConfig {
    pub path: String,
    pub bandwidth: Option<u64>,
    pub verify: bool,
    pub batch_size: usize,
    /// User who issued the load command, carried through to the journal
    /// entry; not otherwise used by the scheduling loop.
    pub user: Option<String>,
}

/// Tree-wide prefetch job. One instance per job id.
pub struct LoadJob {
    pub job_id: String,
    config: LoadJobConfig,
    ufs: Arc<dyn UfsReader>,
    iterator: tokio::sync::Mutex<Box<dyn FileIterator>>,
    retry: Mutex<VecDeque<RetryEntry>>,
    failed_files: Mutex<HashMap<String, FileFailure>>,
    active_workers: Mutex<Vec<WorkerId>>,
    counters: Counters,
    total_files: Option<u64>,
    state: Mutex<JobState>,
    preparing: AtomicBool,
    in_flight_tasks: AtomicU64,
    iterator_exhausted: AtomicBool,
    started_at: Instant,
}

impl LoadJob {
    pub fn new(
        job_id: String,
        config: LoadJobConfig,
        ufs: Arc<dyn UfsReader>,
        iterator: Box<dyn FileIterator>,
        total_files: Option<u64>,
    ) -> Self {
        Self {
            job_id,
            config,
            ufs,
            iterator: tokio::sync::Mutex::new(iterator),
            retry: Mutex::new(VecDeque::new()),
            failed_files: Mutex::new(HashMap::new()),
            active_workers: Mutex::new(Vec::new()),
            counters: Counters::default(),
            total_files,
            state: Mutex::new(JobState::Running),
            preparing: AtomicBool::new(false),
            in_flight_tasks: AtomicU64::new(0),
            iterator_exhausted: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    pub fn set_active_workers(&self, workers: Vec<WorkerId>) {
        *self.active_workers.lock() = workers;
    }

    fn pick_worker(&self, path: &str) -> Option<WorkerId> {
        let workers = self.active_workers.lock();
        if workers.is_empty() {
            return None;
        }
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        path.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % workers.len();
        Some(workers[idx])
    }

    /// Builds the next round of tasks. Guarded by a single-entry flag:
    /// concurrent callers while a `prepare_next_tasks` is already running
    /// get the empty list back, never a partial or duplicated batch.
    pub async fn prepare_next_tasks(&self) -> Vec<LoadTask> {
        if self
            .preparing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Vec::new();
        }
        let tasks = self.prepare_next_tasks_inner().await;
        self.preparing.store(false, Ordering::Release);
        tasks
    }

    async fn prepare_next_tasks_inner(&self) -> Vec<LoadTask> {
        let mut batch: Vec<FileStatus> = Vec::new();

        // Drain up to RETRY_THRESHOLD entries from the retry deque.
        let drained: Vec<RetryEntry> = {
            let mut retry = self.retry.lock();
            let n = retry.len().min(RETRY_THRESHOLD);
            retry.drain(..n).collect()
        };
        for entry in drained {
            match self.ufs.stat_len(&entry.file.ufs_path).await {
                Ok(_) => batch.push(entry.file),
                Err(crate::errors::UfsError::NotFound(_)) => {
                    // File genuinely gone; drop it from the retry set.
                }
                Err(e) => {
                    warn!(path = %entry.file.ufs_path, error = %e, "re-stat failed, re-queuing");
                    self.enqueue_retry(entry.file);
                }
            }
        }

        // Pull from the directory iterator until the batch reaches batch_size.
        while batch.len() < self.config.batch_size {
            let next = self.iterator.lock().await.next().await;
            match next {
                Ok(Some(status)) => batch.push(status),
                Ok(None) => {
                    self.iterator_exhausted.store(true, Ordering::Release);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "directory iterator error, stopping this round");
                    break;
                }
            }
        }

        // Assign each file to a worker; files with no available worker go
        // back to the retry deque.
        let mut buckets: HashMap<WorkerId, Vec<FileStatus>> = HashMap::new();
        for file in batch {
            match self.pick_worker(&file.ufs_path) {
                Some(worker) => buckets.entry(worker).or_default().push(file),
                None => self.enqueue_retry(file),
            }
        }

        // Pack each worker's files into tasks of at most MAX_FILES_PER_TASK.
        let mut tasks = Vec::new();
        for (worker, files) in buckets {
            for chunk in files.chunks(MAX_FILES_PER_TASK) {
                tasks.push(LoadTask {
                    worker,
                    files: chunk.to_vec(),
                });
            }
        }
        self.in_flight_tasks
            .fetch_add(tasks.len() as u64, Ordering::AcqRel);
        tasks
    }

    fn enqueue_retry(&self, file: FileStatus) {
        let mut retry = self.retry.lock();
        if retry.len() >= RETRY_BLOCK_CAPACITY {
            warn!(path = %file.ufs_path, "retry deque at capacity, dropping file");
            return;
        }
        retry.push_back(RetryEntry { file });
    }

    /// Reconciles a worker's response to a dispatched task.
    pub fn process_response(&self, task: &LoadTask, response: rpc::LoadFileResponse) {
        self.in_flight_tasks.fetch_sub(1, Ordering::AcqRel);

        let failed_paths: HashMap<&str, &FileFailure> = response
            .files
            .iter()
            .map(|f| (f.file.as_str(), f))
            .collect();

        let healthy = self.is_healthy();
        for file in &task.files {
            match failed_paths.get(file.ufs_path.as_str()) {
                None => {
                    self.counters.processed.fetch_add(1, Ordering::AcqRel);
                    self.counters
                        .loaded_bytes
                        .fetch_add(file.length, Ordering::AcqRel);
                    crate::metrics::LOAD_JOB_FILES_PROCESSED_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    crate::metrics::LOAD_JOB_BYTES_LOADED_TOTAL.inc_by(file.length);
                }
                Some(failure) => {
                    if healthy && failure.retryable {
                        self.enqueue_retry(file.clone());
                        crate::metrics::LOAD_JOB_FILES_PROCESSED_TOTAL
                            .with_label_values(&["retried"])
                            .inc();
                    } else {
                        self.record_permanent_failure(file.ufs_path.clone(), (*failure).clone());
                    }
                }
            }
        }

    }

    fn record_permanent_failure(&self, path: String, failure: FileFailure) {
        let mut failed = self.failed_files.lock();
        // First-observed failure reason wins; later failures don't overwrite.
        failed.entry(path).or_insert(failure);
        self.counters.processed.fetch_add(1, Ordering::AcqRel);
        self.counters.failed.fetch_add(1, Ordering::AcqRel);
        crate::metrics::LOAD_JOB_FILES_PROCESSED_TOTAL
            .with_label_values(&["failed"])
            .inc();
    }

    /// `Cancellation`: retry every file of the task.
    pub fn on_task_cancelled(&self, task: &LoadTask) {
        self.in_flight_tasks.fetch_sub(1, Ordering::AcqRel);
        for file in &task.files {
            self.enqueue_retry(file.clone());
        }
    }

    /// `Interrupted`: retry every file, do not count as failure, propagate
    /// interruption to the caller (the caller decides what "propagate"
    /// means at the scheduler layer; this only restores job state).
    pub fn on_task_interrupted(&self, task: &LoadTask) {
        self.on_task_cancelled(task);
    }

    /// `Execution`: retry if the job is still healthy, else record each file
    /// of the task as a permanent failure with the given reason.
    pub fn on_task_execution_error(&self, task: &LoadTask, message: &str) {
        self.in_flight_tasks.fetch_sub(1, Ordering::AcqRel);
        let healthy = self.is_healthy();
        for file in &task.files {
            if healthy {
                self.enqueue_retry(file.clone());
            } else {
                self.record_permanent_failure(
                    file.ufs_path.clone(),
                    FileFailure {
                        file: file.ufs_path.clone(),
                        message: message.to_string(),
                        code: -1,
                        retryable: false,
                    },
                );
            }
        }
    }

    /// Healthy while `state != Failed` AND (total failures <= 100 OR failure
    /// ratio <= 5%). Monotonic: the first time both thresholds are crossed,
    /// `state` latches to `Failed` right here, so later successes diluting
    /// the ratio back under 5% can never flip this back to healthy.
    pub fn is_healthy(&self) -> bool {
        if *self.state.lock() == JobState::Failed {
            return false;
        }
        let failed = self.counters.failed.load(Ordering::Acquire);
        let processed = self.counters.processed.load(Ordering::Acquire).max(1);
        let ratio = failed as f64 / processed as f64;
        let unhealthy = failed > FAILURE_COUNT_THRESHOLD && ratio > FAILURE_RATIO_THRESHOLD;
        if unhealthy {
            *self.state.lock() = JobState::Failed;
            return false;
        }
        true
    }

    /// Done when the iterator is exhausted, the retry deque is empty, and no
    /// tasks are in flight.
    pub fn is_done(&self) -> bool {
        self.iterator_exhausted.load(Ordering::Acquire)
            && self.retry.lock().is_empty()
            && self.in_flight_tasks.load(Ordering::Acquire) == 0
    }

    /// Builds the persisted journal record for this job as of now. `end_time`
    /// is supplied by the caller rather than stamped here, since job
    /// completion and journal-write happen at different layers.
    pub async fn journal_entry(&self, end_time: Option<chrono::DateTime<chrono::Utc>>) -> JournalEntry {
        JournalEntry {
            job_id: self.job_id.clone(),
            load_path: self.config.path.clone(),
            state: *self.state.lock(),
            partial_listing: !self.iterator.lock().await.is_full_listing(),
            verify: self.config.verify,
            user: self.config.user.clone(),
            bandwidth: self.config.bandwidth,
            end_time,
        }
    }

    pub async fn progress_report(&self) -> ProgressReport {
        let processed = self.counters.processed.load(Ordering::Acquire);
        let loaded_bytes = self.counters.loaded_bytes.load(Ordering::Acquire);
        let failed = self.counters.failed.load(Ordering::Acquire);
        let elapsed = self.started_at.elapsed().as_secs_f64().max(1e-9);
        let failure_percentage = if processed > 0 {
            100.0 * failed as f64 / processed as f64
        } else {
            0.0
        };
        ProgressReport {
            state: *self.state.lock(),
            bandwidth: self.config.bandwidth,
            verify: self.config.verify,
            processed,
            loaded_bytes,
            total_bytes: if self.iterator.lock().await.is_full_listing() {
                self.total_files
            } else {
                None
            },
            throughput_bytes_per_sec: loaded_bytes as f64 / elapsed,
            failure_percentage,
            failed_file_count: failed,
            failed_files: self.failed_files.lock().clone(),
        }
    }
}

/// Persisted record of a load job's state, one entry per job. Encoding this
/// to disk is handled elsewhere; this type only fixes the shape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JournalEntry {
    pub job_id: String,
    pub load_path: String,
    pub state: JobState,
    pub partial_listing: bool,
    pub verify: bool,
    pub user: Option<String>,
    pub bandwidth: Option<u64>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Converts `LoadFileEntry`-shaped tasks into the wire request the worker
/// RPC expects.
pub fn task_to_request(job_id: &str, task: &LoadTask) -> LoadFileRequest {
    LoadFileRequest {
        job_id: job_id.to_string(),
        files: task
            .files
            .iter()
            .map(|f| LoadFileEntry {
                alluxio_path: f.ufs_path.clone(),
                length: f.length,
                ufs_path: f.ufs_path.clone(),
            })
            .collect(),
    }
}

#[derive(Debug, Clone)]
pub struct ProgressReport {
    pub state: JobState,
    pub bandwidth: Option<u64>,
    pub verify: bool,
    pub processed: u64,
    pub loaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub throughput_bytes_per_sec: f64,
    pub failure_percentage: f64,
    pub failed_file_count: u64,
    pub failed_files: HashMap<String, FileFailure>,
}

impl std::fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "load job [{:?}] processed={} loaded_bytes={} throughput={:.1}B/s failures={} ({:.2}%)",
            self.state,
            self.processed,
            self.loaded_bytes,
            self.throughput_bytes_per_sec,
            self.failed_file_count,
            self.failure_percentage,
        )?;
        if let Some(total) = self.total_bytes {
            write!(f, " total={total}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_job::iterator::VecFileIterator;
    use crate::ufs::LocalUfs;
    use camino_tempfile::Utf8TempDir;

    async fn job_with_files(files: Vec<FileStatus>) -> (Utf8TempDir, LoadJob) {
        let tmp = camino_tempfile::tempdir().unwrap();
        for f in &files {
            tokio::fs::write(tmp.path().join(&f.ufs_path), vec![0u8; f.length as usize])
                .await
                .unwrap();
        }
        let root = tmp.path().to_path_buf();
        let ufs = Arc::new(LocalUfs::new(root));
        let total = files.len() as u64;
        let job = LoadJob::new(
            "job-1".to_string(),
            LoadJobConfig {
                path: "/".to_string(),
                bandwidth: None,
                verify: false,
                batch_size: 10,
                user: None,
            },
            ufs,
            Box::new(VecFileIterator::new(files, true)),
            Some(total),
        );
        (tmp, job)
    }

    #[tokio::test]
    async fn s6_partial_failure_updates_counters_as_spec_describes() {
        let files: Vec<FileStatus> = (0..10)
            .map(|i| FileStatus {
                ufs_path: format!("f{i}"),
                length: 100,
            })
            .collect();
        let (_tmp, job) = job_with_files(files).await;
        job.set_active_workers(vec![WorkerId::generate()]);

        let tasks = job.prepare_next_tasks().await;
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.files.len(), 10);

        let mut failures = Vec::new();
        for i in 0..3 {
            failures.push(FileFailure {
                file: format!("f{i}"),
                message: "transient".to_string(),
                code: 1,
                retryable: true,
            });
        }
        failures.push(FileFailure {
            file: "f3".to_string(),
            message: "permanent".to_string(),
            code: 2,
            retryable: false,
        });

        job.process_response(
            task,
            rpc::LoadFileResponse {
                status: LoadStatus::Partial,
                files: failures,
            },
        );

        assert_eq!(job.retry.lock().len(), 3);
        assert_eq!(job.failed_files.lock().len(), 1);
        assert_eq!(job.counters.processed.load(Ordering::Acquire), 6);
        assert_eq!(job.counters.failed.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn prepare_next_tasks_is_single_entry() {
        let (_tmp, job) = job_with_files(Vec::new()).await;
        job.preparing.store(true, Ordering::Release);
        let tasks = job.prepare_next_tasks().await;
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn health_is_false_once_failure_thresholds_cross() {
        let (_tmp, job) = job_with_files(Vec::new()).await;
        for i in 0..101 {
            job.record_permanent_failure(
                format!("f{i}"),
                FileFailure {
                    file: format!("f{i}"),
                    message: "x".to_string(),
                    code: 1,
                    retryable: false,
                },
            );
        }
        // processed == failed == 101, ratio 100% > 5%, count > 100.
        assert!(!job.is_healthy());
    }

    #[tokio::test]
    async fn health_stays_false_once_latched_even_after_ratio_dilutes() {
        let (_tmp, job) = job_with_files(Vec::new()).await;
        for i in 0..101 {
            job.record_permanent_failure(
                format!("f{i}"),
                FileFailure {
                    file: format!("f{i}"),
                    message: "x".to_string(),
                    code: 1,
                    retryable: false,
                },
            );
        }
        assert!(!job.is_healthy());

        // Later successes would dilute failed/processed back under 5% if
        // health were recomputed live; the latch must keep it false.
        for _ in 0..10_000 {
            job.counters.processed.fetch_add(1, Ordering::AcqRel);
        }
        assert!(!job.is_healthy());
    }

    #[tokio::test]
    async fn done_requires_exhausted_iterator_empty_retry_and_no_in_flight() {
        let (_tmp, job) = job_with_files(Vec::new()).await;
        assert!(!job.is_done());
        job.set_active_workers(vec![WorkerId::generate()]);
        job.prepare_next_tasks().await;
        assert!(job.is_done());
    }

    #[tokio::test]
    async fn journal_entry_reflects_config_and_listing_state() {
        let files: Vec<FileStatus> = (0..2)
            .map(|i| FileStatus {
                ufs_path: format!("f{i}"),
                length: 10,
            })
            .collect();
        let tmp = camino_tempfile::tempdir().unwrap();
        for f in &files {
            tokio::fs::write(tmp.path().join(&f.ufs_path), vec![0u8; f.length as usize])
                .await
                .unwrap();
        }
        let ufs = Arc::new(LocalUfs::new(tmp.path().to_path_buf()));
        let job = LoadJob::new(
            "job-journal".to_string(),
            LoadJobConfig {
                path: "/tree".to_string(),
                bandwidth: Some(1024),
                verify: true,
                batch_size: 10,
                user: Some("alice".to_string()),
            },
            ufs,
            Box::new(VecFileIterator::new(files, false)),
            None,
        );

        let entry = job.journal_entry(None).await;
        assert_eq!(entry.job_id, "job-journal");
        assert_eq!(entry.load_path, "/tree");
        assert_eq!(entry.state, JobState::Running);
        assert!(entry.partial_listing);
        assert!(entry.verify);
        assert_eq!(entry.user.as_deref(), Some("alice"));
        assert_eq!(entry.bandwidth, Some(1024));
        assert!(entry.end_time.is_none());

        let stamped = job.journal_entry(Some(chrono::Utc::now())).await;
        assert!(stamped.end_time.is_some());
    }
}
