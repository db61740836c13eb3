//! Connection pool for protocol clients.
//!
//! One persistent client per controller address, created lazily on first use
//! and reused across poll cycles. The pool-level map lock is only held to
//! look up or insert a slot; the actual connect happens under the slot's own
//! lock, so callers for different addresses never wait on each other's I/O
//! while the single-creation guarantee still holds per address.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::{ClientFactory, DeviceClient, PointId, PointRead};
use crate::error::{AppResult, LoggerError};

/// Lazily-connected slot for one controller address.
struct ClientSlot {
    client: Option<Box<dyn DeviceClient>>,
}

type SharedSlot = Arc<Mutex<ClientSlot>>;

/// Pool of protocol clients, one per controller address.
pub struct ConnectionPool {
    factory: Arc<dyn ClientFactory>,
    connect_timeout: Duration,
    slots: Mutex<HashMap<String, SharedSlot>>,
}

impl ConnectionPool {
    /// Create an empty pool backed by the given client factory.
    pub fn new(factory: Arc<dyn ClientFactory>, connect_timeout: Duration) -> Self {
        Self {
            factory,
            connect_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Look up or insert the slot for an address. Holds the map lock only
    /// for the map operation, never across a connect.
    async fn slot(&self, address: &str) -> SharedSlot {
        let mut slots = self.slots.lock().await;
        slots
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ClientSlot { client: None })))
            .clone()
    }

    /// Read a batch of points through the pooled client for `address`,
    /// connecting first if no client exists yet.
    pub async fn read_batch(
        &self,
        address: &str,
        points: &[PointId],
    ) -> AppResult<Vec<PointRead>> {
        let slot = self.slot(address).await;
        let mut slot = slot.lock().await;

        if slot.client.is_none() {
            let client = self.factory.connect(address, self.connect_timeout).await?;
            info!(address, "connected to controller");
            slot.client = Some(client);
        }

        let client = slot
            .client
            .as_mut()
            .ok_or_else(|| LoggerError::device(address, "client slot empty after connect"))?;

        match client.read_batch(points).await {
            Ok(reads) => Ok(reads),
            Err(err) => {
                // Drop the handle so the next attempt reconnects from scratch.
                if let Some(mut dead) = slot.client.take() {
                    if let Err(close_err) = dead.close().await {
                        warn!(address, error = %close_err, "error closing failed client");
                    }
                }
                Err(err)
            }
        }
    }

    /// Evict and close the client for one address after a fatal error.
    pub async fn evict(&self, address: &str) {
        let removed = {
            let mut slots = self.slots.lock().await;
            slots.remove(address)
        };
        if let Some(slot) = removed {
            let mut slot = slot.lock().await;
            if let Some(mut client) = slot.client.take() {
                if let Err(err) = client.close().await {
                    warn!(address, error = %err, "error closing evicted client");
                }
            }
        }
    }

    /// Close every pooled client. Individual close failures are logged, not
    /// propagated; this is the only safe way to release connections before
    /// process exit.
    pub async fn close_all(&self) {
        let drained: Vec<(String, SharedSlot)> = {
            let mut slots = self.slots.lock().await;
            slots.drain().collect()
        };
        for (address, slot) in drained {
            let mut slot = slot.lock().await;
            if let Some(mut client) = slot.client.take() {
                if let Err(err) = client.close().await {
                    warn!(address = %address, error = %err, "error closing pooled client");
                }
            }
        }
        info!("connection pool closed");
    }

    /// Number of addresses with a pooled slot (connected or pending).
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// True when no slots exist.
    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimClientFactory;

    fn points(names: &[&str]) -> Vec<PointId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reuses_one_client_per_address() {
        let factory = Arc::new(SimClientFactory::default());
        let pool = ConnectionPool::new(factory.clone(), Duration::from_secs(1));

        pool.read_batch("10.0.0.1", &points(&["A"])).await.unwrap();
        pool.read_batch("10.0.0.1", &points(&["A"])).await.unwrap();
        pool.read_batch("10.0.0.2", &points(&["A"])).await.unwrap();

        assert_eq!(pool.len().await, 2);
        assert_eq!(factory.connections_made(), 2);
    }

    #[tokio::test]
    async fn concurrent_gets_create_single_client() {
        let factory = Arc::new(SimClientFactory::default());
        let pool = Arc::new(ConnectionPool::new(factory.clone(), Duration::from_secs(1)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.read_batch("10.0.0.1", &["A".to_string()]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(factory.connections_made(), 1);
    }

    #[tokio::test]
    async fn failed_batch_drops_handle_for_reconnect() {
        let factory = Arc::new(SimClientFactory::default());
        factory.fail_address("10.0.0.9");
        let pool = ConnectionPool::new(factory.clone(), Duration::from_secs(1));

        let err = pool.read_batch("10.0.0.9", &points(&["A"])).await;
        assert!(err.is_err());

        factory.heal_address("10.0.0.9");
        pool.read_batch("10.0.0.9", &points(&["A"])).await.unwrap();
        assert!(factory.connections_made() >= 2);
    }

    #[tokio::test]
    async fn close_all_empties_pool() {
        let factory = Arc::new(SimClientFactory::default());
        let pool = ConnectionPool::new(factory, Duration::from_secs(1));

        pool.read_batch("10.0.0.1", &points(&["A"])).await.unwrap();
        assert!(!pool.is_empty().await);

        pool.close_all().await;
        assert!(pool.is_empty().await);
    }
}
