//! Process-wide set of live peer connections.
//!
//! Created once at startup and handed to the transport; `close_all` runs at
//! shutdown. All mutations go through one mutex.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::info;

/// A connection the registry can close.
#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Close the connection and release its session. Must be idempotent.
    async fn close(&self);
}

#[derive(Default)]
pub struct SessionRegistry {
    connections: Mutex<HashMap<String, Arc<dyn PeerConnection>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, connection: Arc<dyn PeerConnection>) {
        let id = connection.id().to_string();
        let mut connections = self.connections.lock();
        connections.insert(id.clone(), connection);
        info!(connection_id = %id, active = connections.len(), "connection registered");
    }

    /// Drop a connection; `true` if it was tracked.
    pub fn remove(&self, id: &str) -> bool {
        let mut connections = self.connections.lock();
        let removed = connections.remove(id).is_some();
        if removed {
            info!(connection_id = %id, active = connections.len(), "connection removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every tracked connection and wait for all of them.
    ///
    /// The set is emptied up front so connections that call `remove` while
    /// closing do not contend with this call.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.connections.lock().drain().map(|(_, c)| c).collect();
        let count = drained.len();
        join_all(drained.iter().map(|c| c.close())).await;
        info!(count, "all peer connections closed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Fake {
        id: String,
        closes: Arc<AtomicUsize>,
        registry: Arc<SessionRegistry>,
    }

    #[async_trait]
    impl PeerConnection for Fake {
        fn id(&self) -> &str {
            &self.id
        }

        async fn close(&self) {
            tokio::task::yield_now().await;
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.registry.remove(&self.id);
        }
    }

    fn fake(id: &str, closes: &Arc<AtomicUsize>, registry: &Arc<SessionRegistry>) -> Arc<Fake> {
        Arc::new(Fake {
            id: id.into(),
            closes: Arc::clone(closes),
            registry: Arc::clone(registry),
        })
    }

    #[tokio::test]
    async fn close_all_closes_everything_and_clears() {
        let registry = Arc::new(SessionRegistry::new());
        let closes = Arc::new(AtomicUsize::new(0));
        for id in ["a", "b", "c"] {
            registry.add(fake(id, &closes, &registry));
        }
        assert_eq!(registry.len(), 3);

        registry.close_all().await;
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn remove_reports_membership() {
        let registry = Arc::new(SessionRegistry::new());
        let closes = Arc::new(AtomicUsize::new(0));
        registry.add(fake("a", &closes, &registry));
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        registry.close_all().await;
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }
}
