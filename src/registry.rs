//! Process-wide registry of benchmark clients.
//!
//! Holds the only strong reference to each client; removing a client from
//! the registry cancels its scheduler and is the sole termination path. Ids
//! are minted monotonically and exposed to HTTP clients as opaque positive
//! integers.

use crate::benchmark::client::{BenchmarkConfig, BenchmarkedRequestClient};
use crate::benchmark::scheduler;
use crate::db::Store;
use crate::providers::LabelProvider;
use crate::types::ClientId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub struct Registry {
    clients: RwLock<HashMap<ClientId, Arc<BenchmarkedRequestClient>>>,
    next_id: AtomicI64,
    shutdown: CancellationToken,
}

impl Registry {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            shutdown,
        }
    }

    /// Create a client, start its scheduler, and insert it synchronously.
    ///
    /// If the config asks for autobenchmarking the first benchmark is kicked
    /// off on a detached task, so creation returns before the dataset-sized
    /// fan-out completes.
    pub async fn create(
        &self,
        dataset: Vec<String>,
        config: BenchmarkConfig,
        store: Store,
        provider: Arc<dyn LabelProvider>,
    ) -> Arc<BenchmarkedRequestClient> {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let token = self.shutdown.child_token();
        let autobenchmark = config.autobenchmark;

        let client = Arc::new(BenchmarkedRequestClient::new(id, dataset, config, store, provider, token));

        self.clients.write().await.insert(id, client.clone());
        scheduler::spawn(client.clone());

        if autobenchmark {
            let background = client.clone();
            tokio::spawn(async move {
                if let Err(e) = background.benchmark().await {
                    background.log().error(format!("initial benchmark failed: {e}"));
                }
            });
        }

        client
    }

    pub async fn get(&self, id: ClientId) -> Option<Arc<BenchmarkedRequestClient>> {
        self.clients.read().await.get(&id).cloned()
    }

    /// Remove a client, cancelling its scheduler. Dropping the returned Arc
    /// ends the client's life once in-flight tasks finish.
    pub async fn remove(&self, id: ClientId) -> Option<Arc<BenchmarkedRequestClient>> {
        let removed = self.clients.write().await.remove(&id);
        if let Some(client) = &removed {
            client.shutdown_token().cancel();
        }
        removed
    }

    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Cancel every client's scheduler. Called on process shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
