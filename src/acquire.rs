//! Acquisition engine: one poll cycle across the configured fleet.
//!
//! Points are read per device in fixed-size batches through the connection
//! pool. A batch-level failure makes the whole device attempt retryable with
//! linearly increasing delay; per-point failure statuses from the controller
//! are honored independently, so a batch can partially succeed. However many
//! devices fail, the produced [`Sample`] always covers every configured
//! point — failed reads are nulls, never omissions.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::core::{Device, PointKey, ReadStatus, Sample, TagValue};
use crate::error::LoggerError;
use crate::pool::ConnectionPool;
use crate::shutdown::Shutdown;

/// Linear-backoff retry policy for per-device batch failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Attempts per device per cycle.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retry_delay * n`.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}

/// Outcome of one whole-device read attempt.
enum DeviceOutcome {
    /// Every batch returned; map holds per-point values (null on failed status).
    Success(BTreeMap<PointKey, Option<TagValue>>),
    /// A batch failed at the protocol level; the attempt may be retried.
    Retryable(LoggerError),
    /// Cancellation observed; abort without further retries.
    Cancelled,
}

/// Reads all configured points for all devices, producing one sample per cycle.
pub struct AcquisitionEngine {
    pool: Arc<ConnectionPool>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl AcquisitionEngine {
    /// Build an engine over a shared connection pool.
    pub fn new(pool: Arc<ConnectionPool>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// Run one poll cycle over the fleet.
    ///
    /// The timestamp is captured once, up front, and shared by every point.
    /// Devices whose retries are exhausted contribute nulls for all their
    /// points; the key set of the result is always the full configured set.
    pub async fn acquire(&self, devices: &[Device], shutdown: &mut Shutdown) -> Sample {
        let timestamp = Utc::now();

        // Seed every configured key as null so no point is ever omitted.
        let mut values: BTreeMap<PointKey, Option<TagValue>> = devices
            .iter()
            .flat_map(|d| d.point_keys().map(|k| (k, None)))
            .collect();

        for device in devices {
            if shutdown.is_cancelled() {
                break;
            }
            match self.read_device(device, shutdown).await {
                Some(device_values) => values.extend(device_values),
                None => {
                    // Retries exhausted or cancelled: keys stay null.
                }
            }
        }

        Sample { timestamp, values }
    }

    /// Read one device with retry; `None` leaves its points null.
    async fn read_device(
        &self,
        device: &Device,
        shutdown: &mut Shutdown,
    ) -> Option<BTreeMap<PointKey, Option<TagValue>>> {
        for attempt in 1..=self.retry.max_retries {
            match self.read_device_once(device, shutdown).await {
                DeviceOutcome::Success(values) => return Some(values),
                DeviceOutcome::Cancelled => return None,
                DeviceOutcome::Retryable(err) => {
                    warn!(
                        address = %device.address,
                        attempt,
                        max = self.retry.max_retries,
                        error = %err,
                        "device read attempt failed"
                    );
                    if attempt < self.retry.max_retries {
                        if shutdown.sleep(self.retry.delay_for(attempt)).await {
                            return None;
                        }
                    } else {
                        error!(
                            address = %device.address,
                            attempts = self.retry.max_retries,
                            "device read failed after all retries; recording nulls"
                        );
                    }
                }
            }
        }
        None
    }

    /// One attempt: read every batch for the device through the pool.
    async fn read_device_once(
        &self,
        device: &Device,
        shutdown: &mut Shutdown,
    ) -> DeviceOutcome {
        let mut values = BTreeMap::new();

        for batch in device.points.chunks(self.batch_size) {
            if shutdown.is_cancelled() {
                return DeviceOutcome::Cancelled;
            }
            let reads = match self.pool.read_batch(&device.address, batch).await {
                Ok(reads) => reads,
                Err(err) => return DeviceOutcome::Retryable(err),
            };
            for read in reads {
                let key = PointKey::new(device.address.clone(), read.point);
                let value = match read.status {
                    ReadStatus::Success => read.value,
                    ReadStatus::Failed(reason) => {
                        debug!(key = %key, %reason, "point read failed");
                        None
                    }
                };
                values.insert(key, value);
            }
        }

        DeviceOutcome::Success(values)
    }
}
