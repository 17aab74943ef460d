//! Process-wide event listener registry.
//!
//! An append-only, copy-on-write list of listener handles, iterated as a
//! snapshot; delivery to each listener is serialized by a mutex private to
//! that listener, so a listener implementation sees a total order of the
//! events it observes without ever blocking registration or other
//! listeners. Mirrors the shape described in spec §9's design note on the
//! listener registry.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::ids::BlockId;

#[derive(Debug, Clone)]
pub enum BlockStoreEvent {
    CommitLocal { block: BlockId },
    CommitMaster { block: BlockId },
    Abort { block: BlockId },
    Access { block: BlockId },
    MoveByClient { block: BlockId, src: String, dst: String },
    RemoveByClient { block: BlockId },
    RemoveByWorker { block: BlockId },
    Remove { block: BlockId },
    BlockLost { block: BlockId },
    StorageLost { tier: String, path: String },
}

/// A listener must not block on the block lock or the metadata lock: it is
/// always invoked with neither held (spec §4.5), so it's free to do its own
/// I/O without risking a deadlock with the core locking discipline.
#[async_trait]
pub trait BlockStoreEventListener: Send + Sync {
    async fn on_event(&self, event: BlockStoreEvent);
}

struct Registered {
    listener: Arc<dyn BlockStoreEventListener>,
    /// Serializes delivery to this one listener so it observes a total
    /// order, without serializing delivery across listeners.
    delivery_lock: Mutex<()>,
}

#[derive(Default)]
pub struct EventListenerRegistry {
    listeners: ArcSwap<Vec<Arc<Registered>>>,
}

impl EventListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn register(&self, listener: Arc<dyn BlockStoreEventListener>) {
        let registered = Arc::new(Registered {
            listener,
            delivery_lock: Mutex::new(()),
        });
        self.listeners.rcu(|current| {
            let mut next = (**current).clone();
            next.push(registered.clone());
            next
        });
    }

    /// Delivers `event` to every registered listener. Each listener's
    /// delivery is serialized against its own prior deliveries, but
    /// listeners run independently of each other.
    pub async fn dispatch(&self, event: BlockStoreEvent) {
        let snapshot = self.listeners.load_full();
        for registered in snapshot.iter() {
            let _guard = registered.delivery_lock.lock().await;
            registered.listener.on_event(event.clone()).await;
        }
    }
}
