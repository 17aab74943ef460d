//! A gate that tracks in-flight work so shutdown can wait for it to drain.
//!
//! Background loops call [`Gate::enter`] before touching shared state and
//! hold the returned guard for the duration of the operation. [`Gate::close`]
//! stops new entries and waits for existing guards to be dropped.

use std::sync::Arc;
use tokio::sync::Semaphore;

const MAX_ENTRANTS: usize = Semaphore::MAX_PERMITS;

#[derive(Default)]
pub struct Gate {
    sem: Arc<Semaphore>,
    closing: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate").finish_non_exhaustive()
    }
}

pub struct GateGuard(tokio::sync::OwnedSemaphorePermit);

#[derive(Debug, thiserror::Error)]
#[error("gate is closed")]
pub struct GateError;

impl Gate {
    pub fn new() -> Self {
        Self {
            sem: Arc::new(Semaphore::new(MAX_ENTRANTS)),
            closing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn enter(&self) -> Result<GateGuard, GateError> {
        if self.closing.load(std::sync::atomic::Ordering::Acquire) {
            return Err(GateError);
        }
        match Arc::clone(&self.sem).try_acquire_owned() {
            Ok(permit) => Ok(GateGuard(permit)),
            Err(_) => Err(GateError),
        }
    }

    /// Stops new entries and waits for all current guards to be dropped.
    pub async fn close(&self) {
        self.closing.store(true, std::sync::atomic::Ordering::Release);
        // Acquiring every permit only succeeds once all guards are released.
        let _ = self.sem.acquire_many(MAX_ENTRANTS as u32).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_waits_for_outstanding_guards() {
        let gate = Gate::new();
        let guard = gate.enter().unwrap();

        let gate = Arc::new(gate);
        let gate_clone = gate.clone();
        let closer = tokio::spawn(async move { gate_clone.close().await });

        tokio::task::yield_now().await;
        assert!(!closer.is_finished());

        drop(guard);
        closer.await.unwrap();

        assert!(gate.enter().is_err());
    }
}
