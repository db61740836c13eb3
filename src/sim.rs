//! Simulated protocol clients.
//!
//! Hardware-free stand-ins for the external device capability, used by the
//! binary's simulate mode and throughout the test suite. Failure injection is
//! address- and point-scoped so tests can exercise the batch-retry path and
//! the per-point status path independently.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::{ClientFactory, DeviceClient, PointId, PointRead, ReadStatus, TagValue};
use crate::error::{AppResult, LoggerError};

#[derive(Default)]
struct FaultState {
    dead_addresses: HashSet<String>,
    failed_points: HashSet<(String, String)>,
}

/// Factory producing [`SimClient`]s with shared fault injection.
#[derive(Default)]
pub struct SimClientFactory {
    connects: AtomicUsize,
    faults: Arc<Mutex<FaultState>>,
}

impl SimClientFactory {
    /// Total connect attempts made through this factory.
    pub fn connections_made(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make every batch read (and connect) for `address` fail.
    pub fn fail_address(&self, address: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.dead_addresses.insert(address.to_string());
        }
    }

    /// Undo [`fail_address`](Self::fail_address).
    pub fn heal_address(&self, address: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.dead_addresses.remove(address);
        }
    }

    /// Make one point on one address report a failed status while the rest
    /// of its batch succeeds.
    pub fn fail_point(&self, address: &str, point: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults
                .failed_points
                .insert((address.to_string(), point.to_string()));
        }
    }
}

#[async_trait]
impl ClientFactory for SimClientFactory {
    async fn connect(&self, address: &str, _timeout: Duration) -> AppResult<Box<dyn DeviceClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let dead = self
            .faults
            .lock()
            .map(|f| f.dead_addresses.contains(address))
            .unwrap_or(false);
        if dead {
            return Err(LoggerError::device(address, "simulated connect failure"));
        }
        Ok(Box::new(SimClient {
            address: address.to_string(),
            faults: self.faults.clone(),
        }))
    }
}

/// Simulated client for one controller address.
pub struct SimClient {
    address: String,
    faults: Arc<Mutex<FaultState>>,
}

impl SimClient {
    fn simulated_value(point: &str) -> TagValue {
        let mut rng = rand::thread_rng();
        // Keep values plausible per point family so trend plots look sane.
        if point.to_ascii_lowercase().contains("count") {
            TagValue::Int(rng.gen_range(0..10_000))
        } else if point.to_ascii_lowercase().contains("run") {
            TagValue::Bool(rng.gen_bool(0.9))
        } else {
            TagValue::Float((rng.gen_range(0.0..100.0_f64) * 100.0).round() / 100.0)
        }
    }
}

#[async_trait]
impl DeviceClient for SimClient {
    async fn read_batch(&mut self, points: &[PointId]) -> AppResult<Vec<PointRead>> {
        let faults = self
            .faults
            .lock()
            .map_err(|_| LoggerError::device(&self.address, "fault state poisoned"))?;
        if faults.dead_addresses.contains(&self.address) {
            return Err(LoggerError::device(&self.address, "simulated link loss"));
        }

        Ok(points
            .iter()
            .map(|point| {
                let failed = faults
                    .failed_points
                    .contains(&(self.address.clone(), point.clone()));
                if failed {
                    PointRead {
                        point: point.clone(),
                        status: ReadStatus::Failed("simulated tag fault".to_string()),
                        value: None,
                    }
                } else {
                    PointRead {
                        point: point.clone(),
                        status: ReadStatus::Success,
                        value: Some(Self::simulated_value(point)),
                    }
                }
            })
            .collect())
    }

    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_reads_cover_all_points() {
        let factory = SimClientFactory::default();
        let mut client = factory
            .connect("10.0.0.1", Duration::from_secs(1))
            .await
            .unwrap();

        let points: Vec<PointId> = vec!["Speed".into(), "Count".into(), "Running".into()];
        let reads = client.read_batch(&points).await.unwrap();
        assert_eq!(reads.len(), 3);
        assert!(reads.iter().all(|r| r.status == ReadStatus::Success));
        assert!(reads.iter().all(|r| r.value.is_some()));
    }

    #[tokio::test]
    async fn point_fault_fails_only_that_point() {
        let factory = SimClientFactory::default();
        factory.fail_point("10.0.0.1", "Speed");
        let mut client = factory
            .connect("10.0.0.1", Duration::from_secs(1))
            .await
            .unwrap();

        let reads = client
            .read_batch(&vec!["Speed".into(), "Count".into()])
            .await
            .unwrap();
        assert_eq!(reads[0].status, ReadStatus::Failed("simulated tag fault".into()));
        assert!(reads[0].value.is_none());
        assert_eq!(reads[1].status, ReadStatus::Success);
    }

    #[tokio::test]
    async fn dead_address_fails_whole_batch() {
        let factory = SimClientFactory::default();
        let mut client = factory
            .connect("10.0.0.1", Duration::from_secs(1))
            .await
            .unwrap();
        factory.fail_address("10.0.0.1");

        assert!(client.read_batch(&vec!["Speed".into()]).await.is_err());
    }
}
