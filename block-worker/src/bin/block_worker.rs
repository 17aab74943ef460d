//! Process entry point: load config, init logging, build the store, serve
//! `/metrics`, run until a shutdown signal arrives.
//!
//! Grounded loosely on the teacher's `bin/pageserver.rs` startup sequence
//! (parse config, init logging, build core state, spawn HTTP endpoint, run),
//! scaled down to this crate's much smaller surface. Load jobs are not
//! started here: a worker receives them as RPCs from the master (spec.md
//! §4.6), they aren't a startup-time concern.

use std::sync::Arc;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use block_worker::config::BlockWorkerConfig;
use block_worker::ids::DirIndex;
use block_worker::local_page_store::LocalPageStoreDir;
use block_worker::master_client::{BlockMasterClient, HttpBlockMasterClient, NullBlockMasterClient};
use block_worker::page_store::PageStoreDir;
use block_worker::store::PagedBlockStore;
use block_worker::ufs::{LocalUfs, UfsReader};
use utils::id::WorkerId;

#[derive(Parser, Debug)]
#[command(name = "block-worker")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long)]
    config: Utf8PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading config file {}", args.config))?;
    let config = Arc::new(BlockWorkerConfig::parse(&raw)?);

    utils::logging::init(config.log_format)?;
    block_worker::metrics::init();

    let worker_id = match &config.worker_id {
        Some(s) => s.parse().context("parsing worker_id")?,
        None => WorkerId::generate(),
    };
    info!(%worker_id, "starting block worker");

    let cancel = CancellationToken::new();

    let dirs: Vec<Arc<dyn PageStoreDir>> = config
        .data_dirs
        .iter()
        .enumerate()
        .map(|(i, root)| {
            let dir: Arc<dyn PageStoreDir> = Arc::new(LocalPageStoreDir::new(
                DirIndex(i as u32),
                root.clone(),
                config.page_size,
                config.dir_capacity_bytes(i),
            ));
            dir
        })
        .collect();

    let ufs: Arc<dyn UfsReader> = Arc::new(LocalUfs::new(config.ufs_root.clone()));

    let master: Arc<dyn BlockMasterClient> = match &config.master_endpoint {
        Some(endpoint) => Arc::new(HttpBlockMasterClient::new(endpoint.clone(), cancel.clone())),
        None => Arc::new(NullBlockMasterClient),
    };

    let store = Arc::new(PagedBlockStore::new(
        config.clone(),
        worker_id,
        dirs,
        ufs,
        master,
    ));

    let metrics_addr: std::net::SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("parsing listen_addr {}", config.listen_addr))?;
    let metrics_cancel = cancel.clone();
    let metrics_handle =
        tokio::spawn(async move { block_worker::metrics_server::serve(metrics_addr, metrics_cancel).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
    store.shutdown().await;
    if let Ok(Err(e)) = metrics_handle.await {
        tracing::warn!(error = %e, "metrics endpoint exited with an error");
    }
    Ok(())
}
