//! Small utilities shared between the block worker binary and its tests.
//!
//! This crate intentionally stays tiny: it holds the handful of id types,
//! logging setup, and concurrency helpers that would otherwise be copy-pasted
//! across the worker and the load job.

pub mod backoff;
pub mod id;
pub mod logging;
pub mod sync;
