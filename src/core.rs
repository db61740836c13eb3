//! Core data model and device traits for the logging pipeline.
//!
//! The value types here are deliberately small and immutable once produced:
//! a [`Sample`] is one timestamped snapshot of every configured point across
//! the fleet, with `None` standing in for a failed read. Column identity is a
//! structured [`PointKey`] rather than an ad hoc `"addr_point"` string; the
//! flat rendering only appears at the CSV boundary via `Display`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::AppResult;

/// Opaque point (tag) identifier, scoped to a device.
pub type PointId = String;

/// Composite column key: controller address plus point identifier.
///
/// Ordering is address-major so a file header groups each device's columns
/// together in configuration order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointKey {
    /// Controller address (typically an IP).
    pub address: String,
    /// Point identifier on that controller.
    pub point: PointId,
}

impl PointKey {
    /// Build a key for one point on one device.
    pub fn new(address: impl Into<String>, point: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            point: point.into(),
        }
    }
}

impl fmt::Display for PointKey {
    /// Stable string rendering used for CSV column names.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.address, self.point)
    }
}

/// A typed value read from a controller point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Boolean coil or bit tag.
    Bool(bool),
    /// Integer tag (DINT and friends).
    Int(i64),
    /// Floating-point tag.
    Float(f64),
    /// String tag.
    Text(String),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{b}"),
            TagValue::Int(i) => write!(f, "{i}"),
            TagValue::Float(v) => write!(f, "{v}"),
            TagValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One timestamped snapshot of every configured point value.
///
/// The timestamp is captured once at the start of the acquisition cycle and
/// shared by all points. A `None` value records that the read failed for that
/// point in this cycle; the key set always equals the full configured point
/// set, never a subset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sample {
    /// Cycle timestamp, shared by every point in the snapshot.
    pub timestamp: DateTime<Utc>,
    /// Value per configured point; `None` marks a failed read.
    pub values: BTreeMap<PointKey, Option<TagValue>>,
}

impl Sample {
    /// Number of points carried by this sample.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the sample carries no points.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An addressable controller and the points to log from it.
///
/// Created by configuration or discovery tooling; read-only to the core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Device {
    /// Controller address.
    pub address: String,
    /// Points to read each cycle, in column order.
    pub points: Vec<PointId>,
}

impl Device {
    /// Keys for this device's points, in configuration order.
    pub fn point_keys(&self) -> impl Iterator<Item = PointKey> + '_ {
        self.points
            .iter()
            .map(|p| PointKey::new(self.address.clone(), p.clone()))
    }
}

/// Per-point status reported by the device client.
///
/// Any non-success status is a per-point failure, not a protocol-level error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// The point was read successfully.
    Success,
    /// The controller reported a failure for this point.
    Failed(String),
}

/// Result of reading one point within a batch.
#[derive(Clone, Debug)]
pub struct PointRead {
    /// Point identifier as requested.
    pub point: PointId,
    /// Controller-reported status for this point.
    pub status: ReadStatus,
    /// Value when the status is success.
    pub value: Option<TagValue>,
}

/// Protocol-level client for one controller.
///
/// The wire protocol itself is an external capability; the core only relies
/// on batched reads with per-point status and an explicit close.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Read a batch of points, returning one result per requested point.
    ///
    /// An `Err` means the batch as a whole failed (connection dropped,
    /// timeout); per-point failures are reported through [`ReadStatus`].
    async fn read_batch(&mut self, points: &[PointId]) -> AppResult<Vec<PointRead>>;

    /// Close the underlying connection.
    async fn close(&mut self) -> AppResult<()>;
}

/// Factory that opens protocol clients; injected into the connection pool.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Connect to a controller, bounded by `timeout`.
    async fn connect(&self, address: &str, timeout: Duration) -> AppResult<Box<dyn DeviceClient>>;
}

/// Descriptive metadata about a known controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Controller model, e.g. "CompactLogix".
    #[serde(rename = "type")]
    pub device_type: String,
    /// Free-form description.
    pub description: String,
}

/// Known-device sidecar: address to descriptive metadata.
pub type DeviceInfoMap = BTreeMap<String, DeviceInfo>;

/// Load the device-info sidecar, creating it with defaults when absent.
pub fn load_device_info(path: &Path) -> AppResult<DeviceInfoMap> {
    if path.exists() {
        let json = std::fs::read_to_string(path)?;
        let map = serde_json::from_str(&json)
            .map_err(|e| crate::error::LoggerError::Configuration(e.to_string()))?;
        Ok(map)
    } else {
        let map = DeviceInfoMap::new();
        save_device_info(path, &map)?;
        Ok(map)
    }
}

/// Persist the device-info sidecar as pretty-printed JSON.
pub fn save_device_info(path: &Path, info: &DeviceInfoMap) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(info)
        .map_err(|e| crate::error::LoggerError::Configuration(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_key_renders_flat_at_boundary() {
        let key = PointKey::new("10.13.50.100", "Line1_Speed");
        assert_eq!(key.to_string(), "10.13.50.100_Line1_Speed");
    }

    #[test]
    fn point_keys_order_address_major() {
        let a = PointKey::new("10.0.0.1", "Z_Tag");
        let b = PointKey::new("10.0.0.2", "A_Tag");
        assert!(a < b);
    }

    #[test]
    fn tag_value_displays_for_csv() {
        assert_eq!(TagValue::Bool(true).to_string(), "true");
        assert_eq!(TagValue::Int(-42).to_string(), "-42");
        assert_eq!(TagValue::Float(1.5).to_string(), "1.5");
        assert_eq!(TagValue::Text("run".into()).to_string(), "run");
    }

    #[test]
    fn device_point_keys_preserve_config_order() {
        let device = Device {
            address: "10.0.0.1".into(),
            points: vec!["B".into(), "A".into()],
        };
        let keys: Vec<String> = device.point_keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["10.0.0.1_B", "10.0.0.1_A"]);
    }

    #[test]
    fn device_info_roundtrip_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_info.json");

        let loaded = load_device_info(&path).unwrap();
        assert!(loaded.is_empty());
        assert!(path.exists());

        let mut map = DeviceInfoMap::new();
        map.insert(
            "10.13.50.100".into(),
            DeviceInfo {
                device_type: "CompactLogix".into(),
                description: "Line 1 Main PLC".into(),
            },
        );
        save_device_info(&path, &map).unwrap();
        let reloaded = load_device_info(&path).unwrap();
        assert_eq!(reloaded["10.13.50.100"].device_type, "CompactLogix");
    }
}
