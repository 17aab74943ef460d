//! Client for the block master's commit-reporting RPC.
//!
//! Grounded directly on the teacher's `control_plane_client::ControlPlaneClient`:
//! a `reqwest::Client` plus `utils::backoff::retry` retrying forever except on
//! cancellation or a permanent (4xx) response.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use utils::id::WorkerId;

use crate::errors::MasterClientError;
use crate::ids::BlockId;

#[derive(Debug, Clone, serde::Serialize)]
pub struct CommitBlockRequest {
    pub worker_id: WorkerId,
    pub used_bytes: u64,
    pub tier: String,
    pub medium: String,
    pub block_id: BlockId,
    pub length: u64,
}

/// RPC client for reporting commits and usage to the block master. Idempotent
/// on the master side; this crate may retry freely.
#[async_trait]
pub trait BlockMasterClient: Send + Sync {
    async fn commit_block(&self, req: CommitBlockRequest) -> Result<(), MasterClientError>;
}

/// No-op client for tests and standalone (no master configured) operation.
pub struct NullBlockMasterClient;

#[async_trait]
impl BlockMasterClient for NullBlockMasterClient {
    async fn commit_block(&self, _req: CommitBlockRequest) -> Result<(), MasterClientError> {
        Ok(())
    }
}

pub struct HttpBlockMasterClient {
    client: reqwest::Client,
    base_url: String,
    cancel: CancellationToken,
}

impl HttpBlockMasterClient {
    pub fn new(base_url: String, cancel: CancellationToken) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            cancel,
        }
    }

    fn is_permanent(status: &Option<reqwest::StatusCode>) -> bool {
        matches!(status, Some(s) if s.is_client_error())
    }
}

#[async_trait]
impl BlockMasterClient for HttpBlockMasterClient {
    async fn commit_block(&self, req: CommitBlockRequest) -> Result<(), MasterClientError> {
        let url = format!("{}/commit_block", self.base_url);
        let result = utils::backoff::retry(
            || async {
                self.client
                    .post(&url)
                    .json(&req)
                    .send()
                    .await
                    .and_then(|resp| resp.error_for_status())
                    .map(|_| ())
                    .map_err(|e| e.status())
            },
            Self::is_permanent,
            3,
            u32::MAX,
            "commit_block",
            &self.cancel,
        )
        .await;

        match result {
            Some(Ok(())) => Ok(()),
            Some(Err(status)) => Err(MasterClientError::Unavailable(format!(
                "commit_block failed: status {status:?}"
            ))),
            None => Err(MasterClientError::Unavailable(
                "commit_block cancelled".to_string(),
            )),
        }
    }
}
