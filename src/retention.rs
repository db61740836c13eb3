//! Retention sweep: compress aged output files, delete expired archives.
//!
//! Raw `plc_data_*.csv` files older than the retention window are gzipped in
//! place; the original is deleted only after the compressed copy exists and
//! is verified non-empty. Compressed files past the window are deleted
//! outright. Ages come from file modification time, never from parsing the
//! filename. One bad file never aborts the sweep; errors are logged and the
//! sweep moves on.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::error::AppResult;

const RAW_PREFIX: &str = "plc_data_";
const RAW_SUFFIX: &str = ".csv";
const COMPRESSED_SUFFIX: &str = ".csv.gz";

/// Counters for one sweep run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Raw files compressed (and originals removed).
    pub compressed: usize,
    /// Compressed files deleted as expired.
    pub deleted: usize,
    /// Files skipped because of per-file errors.
    pub skipped_errors: usize,
}

/// Sweep every directory using the configured retention window.
pub fn sweep(dirs: &[PathBuf], retention_days: u32) -> SweepStats {
    let window = Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let cutoff = SystemTime::now()
        .checked_sub(window)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    sweep_with_cutoff(dirs, cutoff)
}

/// Sweep with an explicit cutoff: anything modified before it is aged.
pub fn sweep_with_cutoff(dirs: &[PathBuf], cutoff: SystemTime) -> SweepStats {
    let mut stats = SweepStats::default();
    for dir in dirs {
        if !dir.exists() {
            continue;
        }
        sweep_dir(dir, cutoff, &mut stats);
    }
    info!(
        compressed = stats.compressed,
        deleted = stats.deleted,
        errors = stats.skipped_errors,
        "retention sweep finished"
    );
    stats
}

fn sweep_dir(dir: &Path, cutoff: SystemTime, stats: &mut SweepStats) {
    // Snapshot the directory first: archives created by this sweep get a
    // fresh mtime and must not be visited until a later run.
    let mut raw_files = Vec::new();
    let mut archives = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "cannot read sweep directory");
            stats.skipped_errors += 1;
            return;
        }
    };
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "unreadable directory entry");
                stats.skipped_errors += 1;
                continue;
            }
        };
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(RAW_PREFIX) {
            continue;
        }
        if name.ends_with(COMPRESSED_SUFFIX) {
            archives.push(path);
        } else if name.ends_with(RAW_SUFFIX) {
            raw_files.push(path);
        }
    }

    for path in raw_files {
        if let Err(err) = compress_raw(&path, cutoff, stats) {
            warn!(file = %path.display(), error = %err, "skipping file during sweep");
            stats.skipped_errors += 1;
        }
    }
    for path in archives {
        if let Err(err) = expire_compressed(&path, cutoff, stats) {
            warn!(file = %path.display(), error = %err, "skipping file during sweep");
            stats.skipped_errors += 1;
        }
    }
}

fn is_older_than(path: &Path, cutoff: SystemTime) -> AppResult<bool> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified < cutoff)
}

fn compress_raw(path: &Path, cutoff: SystemTime, stats: &mut SweepStats) -> AppResult<()> {
    if !is_older_than(path, cutoff)? {
        return Ok(());
    }

    let gz_path = compressed_path(path);
    if !gz_path.exists() {
        let mut input = File::open(path)?;
        let output = File::create(&gz_path)?;
        let mut encoder = GzEncoder::new(output, Compression::default());
        std::io::copy(&mut input, &mut encoder)?;
        encoder.finish()?;
    }

    // Delete the original only once the archive is present and non-empty.
    if std::fs::metadata(&gz_path)?.len() == 0 {
        std::fs::remove_file(&gz_path)?;
        return Err(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "compressed copy was empty; original kept",
        )
        .into());
    }
    std::fs::remove_file(path)?;
    debug!(file = %path.display(), "compressed aged output file");
    stats.compressed += 1;
    Ok(())
}

fn expire_compressed(path: &Path, cutoff: SystemTime, stats: &mut SweepStats) -> AppResult<()> {
    if !is_older_than(path, cutoff)? {
        return Ok(());
    }
    std::fs::remove_file(path)?;
    debug!(file = %path.display(), "deleted expired archive");
    stats.deleted += 1;
    Ok(())
}

fn compressed_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}
