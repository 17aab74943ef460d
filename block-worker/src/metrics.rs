//! Process-wide metrics, registered once as `Lazy` statics, following the
//! teacher's `pageserver::metrics` convention.

use metrics::{
    register_histogram, register_int_counter, register_int_counter_vec, register_uint_gauge,
    Histogram, IntCounter, IntCounterVec, UIntGauge,
};
use once_cell::sync::Lazy;

pub static PAGE_CACHE_PAGES_CACHED: Lazy<UIntGauge> = Lazy::new(|| {
    register_uint_gauge!(
        "block_worker_page_cache_pages_cached",
        "Number of pages currently resident across all directories"
    )
    .expect("failed to register block_worker_page_cache_pages_cached")
});

pub static BLOCK_LOCK_WAIT_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "block_worker_block_lock_wait_seconds",
        "Time spent waiting to acquire a per-block lock"
    )
    .expect("failed to register block_worker_block_lock_wait_seconds")
});

pub static COMMITS_LOCAL_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "block_worker_commits_local_total",
        "Blocks committed locally"
    )
    .expect("failed to register block_worker_commits_local_total")
});

pub static COMMITS_MASTER_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "block_worker_commits_master_total",
        "Blocks successfully reported to the master after commit"
    )
    .expect("failed to register block_worker_commits_master_total")
});

pub static MASTER_RPC_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "block_worker_master_rpc_failures_total",
        "Master RPC attempts that returned an error"
    )
    .expect("failed to register block_worker_master_rpc_failures_total")
});

pub static LOAD_JOB_FILES_PROCESSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "block_worker_load_job_files_processed_total",
        "Files processed by the load job, by outcome",
        &["outcome"]
    )
    .expect("failed to register block_worker_load_job_files_processed_total")
});

pub static LOAD_JOB_BYTES_LOADED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "block_worker_load_job_bytes_loaded_total",
        "Bytes loaded by the load job"
    )
    .expect("failed to register block_worker_load_job_bytes_loaded_total")
});

/// Forces all statics in this module to register, so `/metrics` reports
/// zero-valued series before any activity happens. Call once at startup.
pub fn init() {
    Lazy::force(&PAGE_CACHE_PAGES_CACHED);
    Lazy::force(&BLOCK_LOCK_WAIT_SECONDS);
    Lazy::force(&COMMITS_LOCAL_TOTAL);
    Lazy::force(&COMMITS_MASTER_TOTAL);
    Lazy::force(&MASTER_RPC_FAILURES_TOTAL);
    Lazy::force(&LOAD_JOB_FILES_PROCESSED_TOTAL);
    Lazy::force(&LOAD_JOB_BYTES_LOADED_TOTAL);
}
