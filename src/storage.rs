//! Storage selection and rotation policy.
//!
//! Output lands on the first removable, writable volume with enough free
//! space, falling back to a fixed local directory when none qualifies.
//! Volume enumeration sits behind the [`VolumeProbe`] capability so the
//! platform-specific probing (sysinfo) stays swappable in tests.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::Disks;
use tracing::{debug, info, warn};

use crate::core::{Device, PointKey};
use crate::error::{AppResult, LoggerError};
use crate::writer::ActiveFile;

/// Subdirectory created on removable volumes for our output files.
const REMOVABLE_SUBDIR: &str = "plc_data_logs";

/// One mounted volume as seen by the probe.
#[derive(Clone, Debug)]
pub struct VolumeInfo {
    /// Mount point.
    pub path: PathBuf,
    /// Free space in bytes.
    pub free_bytes: u64,
    /// Whether the OS reports the volume as removable.
    pub removable: bool,
}

/// Capability interface over platform volume enumeration.
pub trait VolumeProbe: Send + Sync {
    /// Enumerate currently mounted volumes.
    fn volumes(&self) -> Vec<VolumeInfo>;
}

/// Production probe backed by `sysinfo`.
#[derive(Default)]
pub struct SystemVolumeProbe;

impl VolumeProbe for SystemVolumeProbe {
    fn volumes(&self) -> Vec<VolumeInfo> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .iter()
            .map(|disk| VolumeInfo {
                path: disk.mount_point().to_path_buf(),
                free_bytes: disk.available_space(),
                removable: disk.is_removable(),
            })
            .collect()
    }
}

/// Fixed-list probe for tests and simulate mode.
pub struct FixedVolumeProbe {
    volumes: Vec<VolumeInfo>,
}

impl FixedVolumeProbe {
    /// Probe that always reports the given volumes.
    pub fn new(volumes: Vec<VolumeInfo>) -> Self {
        Self { volumes }
    }
}

impl VolumeProbe for FixedVolumeProbe {
    fn volumes(&self) -> Vec<VolumeInfo> {
        self.volumes.clone()
    }
}

/// Chooses the directory that receives new output files.
pub struct StorageSelector {
    probe: Box<dyn VolumeProbe>,
    local_dir: PathBuf,
    min_free_space_bytes: u64,
}

impl StorageSelector {
    /// Build a selector over the given probe and local fallback directory.
    pub fn new(probe: Box<dyn VolumeProbe>, local_dir: PathBuf, min_free_space_bytes: u64) -> Self {
        Self {
            probe,
            local_dir,
            min_free_space_bytes,
        }
    }

    /// Pick the output directory: first removable volume with enough free
    /// space that we can actually create our subdirectory on, else the
    /// local fallback. Errors only when the fallback cannot be created.
    pub fn select_directory(&self) -> AppResult<PathBuf> {
        for volume in self.probe.volumes() {
            if !volume.removable {
                continue;
            }
            if volume.free_bytes < self.min_free_space_bytes {
                debug!(
                    volume = %volume.path.display(),
                    free = volume.free_bytes,
                    needed = self.min_free_space_bytes,
                    "removable volume below free-space threshold"
                );
                continue;
            }
            let dir = volume.path.join(REMOVABLE_SUBDIR);
            match std::fs::create_dir_all(&dir) {
                Ok(()) => {
                    info!(dir = %dir.display(), "selected removable volume for output");
                    return Ok(dir);
                }
                Err(err) => {
                    warn!(
                        volume = %volume.path.display(),
                        error = %err,
                        "removable volume not writable; skipping"
                    );
                }
            }
        }

        std::fs::create_dir_all(&self.local_dir).map_err(|err| {
            warn!(dir = %self.local_dir.display(), error = %err, "local fallback unusable");
            LoggerError::NoStorage
        })?;
        debug!(dir = %self.local_dir.display(), "using local fallback directory");
        Ok(self.local_dir.clone())
    }

    /// Directories the retention sweep should cover: every removable
    /// volume's subdirectory plus the local fallback.
    pub fn sweep_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .probe
            .volumes()
            .into_iter()
            .filter(|v| v.removable)
            .map(|v| v.path.join(REMOVABLE_SUBDIR))
            .collect();
        dirs.push(self.local_dir.clone());
        dirs
    }
}

/// Size/age/error predicate deciding when the active file must rotate.
#[derive(Clone, Copy, Debug)]
pub struct RotationPolicy {
    /// Size that forces rotation.
    pub max_file_bytes: u64,
    /// Age that forces rotation.
    pub save_interval: Duration,
}

impl RotationPolicy {
    /// True when the active file should be replaced: no file yet, size or
    /// age threshold exceeded, or the path is gone/unreadable.
    pub fn due(&self, active: Option<&ActiveFile>) -> bool {
        let Some(active) = active else {
            return true;
        };
        if active.created_at().elapsed() >= self.save_interval {
            return true;
        }
        match active.byte_size() {
            Ok(size) => size >= self.max_file_bytes,
            Err(_) => true, // error-triggered rotation
        }
    }
}

/// File name for a new output file: `plc_data_<YYYYMMDD_HHMMSS>.csv`.
///
/// The stamp has one-second resolution, so a forced rotation landing in the
/// same second as the previous one gets a sequence suffix. Rotation must
/// always produce a genuinely new file: reopening the prior file would also
/// restart its rotation-age clock.
pub fn next_file_path(dir: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let mut path = dir.join(format!("plc_data_{stamp}.csv"));
    let mut seq = 1u32;
    while path.exists() {
        path = dir.join(format!("plc_data_{stamp}_{seq}.csv"));
        seq += 1;
    }
    path
}

/// Column keys for a new file, in device/point configuration order.
pub fn build_header(devices: &[Device]) -> Vec<PointKey> {
    devices.iter().flat_map(|d| d.point_keys()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::BufferedWriter;

    fn volume(path: &Path, free: u64, removable: bool) -> VolumeInfo {
        VolumeInfo {
            path: path.to_path_buf(),
            free_bytes: free,
            removable,
        }
    }

    #[test]
    fn picks_first_removable_volume_with_space() {
        let dir = tempfile::tempdir().unwrap();
        let usb_a = dir.path().join("usb_a");
        let usb_b = dir.path().join("usb_b");
        std::fs::create_dir_all(&usb_a).unwrap();
        std::fs::create_dir_all(&usb_b).unwrap();

        let probe = FixedVolumeProbe::new(vec![
            volume(&usb_a, 10, true), // below threshold
            volume(&usb_b, 1 << 30, true),
        ]);
        let selector = StorageSelector::new(Box::new(probe), dir.path().join("logs"), 1024);

        let chosen = selector.select_directory().unwrap();
        assert_eq!(chosen, usb_b.join(REMOVABLE_SUBDIR));
        assert!(chosen.exists());
    }

    #[test]
    fn ignores_non_removable_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let internal = dir.path().join("root_fs");
        std::fs::create_dir_all(&internal).unwrap();

        let probe = FixedVolumeProbe::new(vec![volume(&internal, 1 << 40, false)]);
        let local = dir.path().join("logs");
        let selector = StorageSelector::new(Box::new(probe), local.clone(), 1024);

        assert_eq!(selector.select_directory().unwrap(), local);
    }

    #[test]
    fn falls_back_to_local_when_no_volume_qualifies() {
        let dir = tempfile::tempdir().unwrap();
        let probe = FixedVolumeProbe::new(vec![]);
        let local = dir.path().join("logs");
        let selector = StorageSelector::new(Box::new(probe), local.clone(), 1024);

        let chosen = selector.select_directory().unwrap();
        assert_eq!(chosen, local);
        assert!(local.exists());
    }

    #[test]
    fn sweep_covers_removable_subdirs_and_local() {
        let dir = tempfile::tempdir().unwrap();
        let usb = dir.path().join("usb");
        let probe = FixedVolumeProbe::new(vec![volume(&usb, 1 << 30, true)]);
        let local = dir.path().join("logs");
        let selector = StorageSelector::new(Box::new(probe), local.clone(), 1024);

        let dirs = selector.sweep_directories();
        assert_eq!(dirs, vec![usb.join(REMOVABLE_SUBDIR), local]);
    }

    #[test]
    fn rotation_due_without_active_file() {
        let policy = RotationPolicy {
            max_file_bytes: 100 * 1024 * 1024,
            save_interval: Duration::from_secs(3600),
        };
        assert!(policy.due(None));
    }

    #[test]
    fn rotation_due_on_age() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BufferedWriter::new(10, Duration::from_secs(60));
        writer
            .set_file(&dir.path().join("out.csv"), vec![])
            .unwrap();

        let fresh = RotationPolicy {
            max_file_bytes: u64::MAX,
            save_interval: Duration::from_secs(3600),
        };
        assert!(!fresh.due(writer.active_file()));

        let expired = RotationPolicy {
            max_file_bytes: u64::MAX,
            save_interval: Duration::ZERO,
        };
        assert!(expired.due(writer.active_file()));
    }

    #[test]
    fn rotation_due_on_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BufferedWriter::new(10, Duration::from_secs(60));
        writer
            .set_file(&dir.path().join("out.csv"), vec![])
            .unwrap();

        let tiny = RotationPolicy {
            max_file_bytes: 1,
            save_interval: Duration::from_secs(3600),
        };
        // Header row alone already exceeds one byte.
        assert!(tiny.due(writer.active_file()));
    }

    #[test]
    fn rotation_due_when_file_vanishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut writer = BufferedWriter::new(10, Duration::from_secs(60));
        writer.set_file(&path, vec![]).unwrap();

        let policy = RotationPolicy {
            max_file_bytes: u64::MAX,
            save_interval: Duration::from_secs(3600),
        };
        assert!(!policy.due(writer.active_file()));

        std::fs::remove_file(&path).unwrap();
        assert!(policy.due(writer.active_file()));
    }

    #[test]
    fn header_follows_device_and_point_order() {
        let devices = vec![
            Device {
                address: "10.0.0.2".into(),
                points: vec!["B".into(), "A".into()],
            },
            Device {
                address: "10.0.0.1".into(),
                points: vec!["C".into()],
            },
        ];
        let header: Vec<String> = build_header(&devices).iter().map(|k| k.to_string()).collect();
        assert_eq!(header, vec!["10.0.0.2_B", "10.0.0.2_A", "10.0.0.1_C"]);
    }

    #[test]
    fn colliding_names_get_sequence_suffix() {
        let dir = tempfile::tempdir().unwrap();

        let first = next_file_path(dir.path());
        std::fs::write(&first, "x").unwrap();
        let second = next_file_path(dir.path());
        assert_ne!(first, second, "rotation must never reuse an existing file");

        std::fs::write(&second, "x").unwrap();
        let third = next_file_path(dir.path());
        assert_ne!(third, first);
        assert_ne!(third, second);

        // Suffixed names still match the retention sweep's pattern.
        let name = second.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("plc_data_"));
        assert!(name.ends_with(".csv"));
    }

    #[test]
    fn file_names_carry_timestamp_stem() {
        let path = next_file_path(Path::new("/data"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("plc_data_"));
        assert!(name.ends_with(".csv"));
        // plc_data_YYYYMMDD_HHMMSS.csv
        assert_eq!(name.len(), "plc_data_".len() + 15 + ".csv".len());
    }
}
