//! Process configuration, loaded from a TOML file with built-in defaults for
//! everything optional.

use std::time::Duration;

use anyhow::Context;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use utils::logging::LogFormat;

pub mod defaults {
    pub const DEFAULT_REMOVE_BLOCK_TIMEOUT_MS: u64 = 60_000;
    pub const DEFAULT_TIER: &str = "MEM";
    pub const DEFAULT_MEDIUM: &str = "MEM";
    pub const DEFAULT_BATCH_SIZE: usize = 256;
    pub const DEFAULT_MAX_FILES_PER_TASK: usize = 20;
    pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9898";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockWorkerConfig {
    /// Byte size of every page; every block's pages are exactly this size
    /// except possibly the last. Required, must be > 0.
    pub page_size: u64,

    /// Bound on exclusive lock wait during `remove`.
    #[serde(default = "default_remove_block_timeout_ms")]
    pub remove_block_timeout_ms: u64,

    /// Labels reported to the master alongside `commit_block`.
    #[serde(default = "default_tier")]
    pub default_tier: String,
    #[serde(default = "default_medium")]
    pub default_medium: String,

    /// Directories backing the local page store, in allocation order.
    pub data_dirs: Vec<Utf8PathBuf>,

    /// Per-directory capacity in bytes; parallel to `data_dirs` when set,
    /// otherwise every directory gets `default_dir_capacity_bytes`.
    #[serde(default)]
    pub dir_capacities_bytes: Vec<u64>,
    #[serde(default = "default_dir_capacity_bytes")]
    pub default_dir_capacity_bytes: u64,

    /// Root of the local UFS stand-in used by `LocalUfs`.
    pub ufs_root: Utf8PathBuf,

    /// Master RPC endpoint; `None` runs with `NullBlockMasterClient`.
    #[serde(default)]
    pub master_endpoint: Option<String>,

    #[serde(default)]
    pub worker_id: Option<String>,

    #[serde(default)]
    pub load_job: LoadJobConfig,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoadJobConfig {
    pub batch_size: usize,
    pub max_files_per_task: usize,
}

impl Default for LoadJobConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::DEFAULT_BATCH_SIZE,
            max_files_per_task: defaults::DEFAULT_MAX_FILES_PER_TASK,
        }
    }
}

fn default_remove_block_timeout_ms() -> u64 {
    defaults::DEFAULT_REMOVE_BLOCK_TIMEOUT_MS
}
fn default_tier() -> String {
    defaults::DEFAULT_TIER.to_string()
}
fn default_medium() -> String {
    defaults::DEFAULT_MEDIUM.to_string()
}
fn default_dir_capacity_bytes() -> u64 {
    16 * 1024 * 1024 * 1024
}
fn default_listen_addr() -> String {
    defaults::DEFAULT_LISTEN_ADDR.to_string()
}

impl BlockWorkerConfig {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml_edit::de::from_str(raw).context("parsing block worker config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.page_size > 0, "page_size must be > 0");
        anyhow::ensure!(!self.data_dirs.is_empty(), "data_dirs must not be empty");
        if !self.dir_capacities_bytes.is_empty() {
            anyhow::ensure!(
                self.dir_capacities_bytes.len() == self.data_dirs.len(),
                "dir_capacities_bytes must have the same length as data_dirs, or be empty"
            );
        }
        Ok(())
    }

    pub fn remove_block_timeout(&self) -> Duration {
        Duration::from_millis(self.remove_block_timeout_ms)
    }

    pub fn dir_capacity_bytes(&self, idx: usize) -> u64 {
        self.dir_capacities_bytes
            .get(idx)
            .copied()
            .unwrap_or(self.default_dir_capacity_bytes)
    }
}
