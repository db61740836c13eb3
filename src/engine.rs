//! Scheduler: drives fixed-period acquisition cycles end to end.
//!
//! One long-lived tokio task runs the cycle loop: resource check, rotation
//! check, acquisition, history append, buffered write, sample publication.
//! Consumers subscribe to a broadcast channel rather than registering
//! callbacks, so a slow display or exporter can never delay the next poll.
//!
//! The loop degrades in layers. Low disk or memory skips the cycle after a
//! fixed delay without touching the error counter. A cycle-level failure
//! backs off exponentially (`error_delay * 2^(n-1)`) and trips a circuit
//! breaker after `max_consecutive_errors` in a row, which stops the run and
//! surfaces the trip to the operator. Every sleep observes the shared
//! cancellation signal, so `stop()` is responsive mid-backoff.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use sysinfo::{Disks, System};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::acquire::{AcquisitionEngine, RetryPolicy};
use crate::config::LoggerConfig;
use crate::core::{load_device_info, ClientFactory, Sample};
use crate::error::{AppResult, LoggerError};
use crate::history::SampleHistory;
use crate::pool::ConnectionPool;
use crate::retention;
use crate::shutdown::{Shutdown, ShutdownSignal};
use crate::storage::{build_header, next_file_path, RotationPolicy, StorageSelector, VolumeProbe};
use crate::writer::BufferedWriter;

/// Memory usage fraction above which cycles are skipped.
const MEMORY_PRESSURE_PCT: f64 = 90.0;

/// Run state of the logger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoggerState {
    /// No cycle loop running.
    Idle,
    /// Cycle loop active.
    Running,
    /// Cancellation requested, loop draining.
    Stopping,
}

/// What one cycle did.
enum CycleOutcome {
    /// Sample acquired, stored and published.
    Completed,
    /// Disk or memory pressure; cycle skipped.
    ResourcesLow,
}

/// Shared pieces the cycle loop works over.
struct LoopCtx {
    config: LoggerConfig,
    pool: Arc<ConnectionPool>,
    engine: AcquisitionEngine,
    history: Arc<SampleHistory>,
    writer: Arc<StdMutex<BufferedWriter>>,
    selector: Arc<StorageSelector>,
    rotation: RotationPolicy,
    samples_tx: broadcast::Sender<Sample>,
    state: Arc<StdMutex<LoggerState>>,
}

struct Control {
    signal: Option<ShutdownSignal>,
    task: Option<JoinHandle<AppResult<()>>>,
}

/// The acquisition-and-durability pipeline behind a start/stop facade.
pub struct DataLogger {
    ctx: Arc<LoopCtx>,
    control: Mutex<Control>,
}

impl DataLogger {
    /// Assemble the pipeline from configuration, a protocol client factory
    /// and a volume probe. Loads the device-info sidecar. Needs no async
    /// runtime; the first retention sweep fires with the initial rotation
    /// in [`start`](Self::start).
    pub fn new(
        config: LoggerConfig,
        factory: Arc<dyn ClientFactory>,
        probe: Box<dyn VolumeProbe>,
    ) -> AppResult<Self> {
        config.validate()?;

        match load_device_info(&config.application.device_info_path) {
            Ok(info) => info!(known_devices = info.len(), "device info loaded"),
            Err(err) => warn!(error = %err, "device info sidecar unavailable"),
        }

        let pool = Arc::new(ConnectionPool::new(
            factory,
            config.acquisition.connect_timeout,
        ));
        let engine = AcquisitionEngine::new(
            pool.clone(),
            config.acquisition.batch_size,
            RetryPolicy {
                max_retries: config.acquisition.max_retries,
                retry_delay: config.acquisition.retry_delay,
            },
        );
        let history = Arc::new(SampleHistory::new(config.acquisition.history_limit));
        let writer = Arc::new(StdMutex::new(BufferedWriter::new(
            config.storage.flush_rows,
            config.storage.flush_interval,
        )));
        let selector = Arc::new(StorageSelector::new(
            probe,
            config.storage.local_dir.clone(),
            config.storage.min_free_space_bytes,
        ));
        let rotation = RotationPolicy {
            max_file_bytes: config.storage.max_file_bytes,
            save_interval: config.storage.save_interval,
        };
        let (samples_tx, _) = broadcast::channel(256);

        Ok(Self {
            ctx: Arc::new(LoopCtx {
                config,
                pool,
                engine,
                history,
                writer,
                selector,
                rotation,
                samples_tx,
                state: Arc::new(StdMutex::new(LoggerState::Idle)),
            }),
            control: Mutex::new(Control {
                signal: None,
                task: None,
            }),
        })
    }

    /// Current run state.
    pub fn state(&self) -> LoggerState {
        match self.ctx.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Receiver of every sample produced by successful cycles.
    pub fn subscribe(&self) -> broadcast::Receiver<Sample> {
        self.ctx.samples_tx.subscribe()
    }

    /// Shared view of the bounded sample history.
    pub fn history(&self) -> Arc<SampleHistory> {
        self.ctx.history.clone()
    }

    /// Path of the file currently receiving appends, if any.
    pub fn active_path(&self) -> Option<std::path::PathBuf> {
        let writer = match self.ctx.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writer.active_file().map(|f| f.path().to_path_buf())
    }

    /// Start the cycle loop. No-op when already running. Fails only when
    /// the initial output file cannot be created anywhere.
    pub async fn start(&self) -> AppResult<()> {
        let mut control = self.control.lock().await;
        if self.state() != LoggerState::Idle {
            return Ok(());
        }
        // Stale handle from a breaker-stopped run; the task has finished.
        control.task.take();

        // Unrecoverable startup error when no output file can be created.
        rotate(&self.ctx)?;

        let (signal, shutdown) = ShutdownSignal::new();
        set_state(&self.ctx.state, LoggerState::Running);
        let ctx = self.ctx.clone();
        control.task = Some(tokio::spawn(run_cycle_loop(ctx, shutdown)));
        control.signal = Some(signal);
        info!("logging started");
        Ok(())
    }

    /// Stop the cycle loop: cancel, wait for the loop to drain, flush and
    /// close everything. No-op when already idle. Returns the loop's
    /// terminal result (a circuit-breaker trip surfaces here).
    pub async fn stop(&self) -> AppResult<()> {
        let mut control = self.control.lock().await;
        if self.state() == LoggerState::Idle && control.task.is_none() {
            return Ok(());
        }
        set_state(&self.ctx.state, LoggerState::Stopping);
        if let Some(signal) = control.signal.take() {
            signal.cancel();
        }
        let result = match control.task.take() {
            Some(task) => task.await.unwrap_or_else(|join_err| {
                error!(error = %join_err, "cycle loop panicked");
                Ok(())
            }),
            None => Ok(()),
        };
        info!("logging stopped");
        result
    }

    /// Wait for the loop to end on its own (circuit breaker) or via `stop`.
    pub async fn wait(&self) -> AppResult<()> {
        let task = {
            let mut control = self.control.lock().await;
            control.task.take()
        };
        match task {
            Some(task) => task.await.unwrap_or(Ok(())),
            None => Ok(()),
        }
    }
}

fn set_state(state: &StdMutex<LoggerState>, next: LoggerState) {
    match state.lock() {
        Ok(mut guard) => *guard = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}

/// The long-lived cycle loop. Owns cleanup on every exit path: buffered
/// rows are flushed and pooled connections closed before the state returns
/// to idle.
async fn run_cycle_loop(ctx: Arc<LoopCtx>, mut shutdown: Shutdown) -> AppResult<()> {
    let mut consecutive_errors: u32 = 0;
    let mut sys = System::new();

    let outcome = loop {
        if shutdown.is_cancelled() {
            break Ok(());
        }
        match run_cycle(&ctx, &mut sys, &mut shutdown).await {
            Ok(CycleOutcome::Completed) => {
                consecutive_errors = 0;
                if shutdown.sleep(ctx.config.acquisition.sample_interval).await {
                    break Ok(());
                }
            }
            Ok(CycleOutcome::ResourcesLow) => {
                // Deliberately not counted against the circuit breaker.
                warn!("resources low; skipping cycle");
                if shutdown.sleep(ctx.config.acquisition.error_delay).await {
                    break Ok(());
                }
            }
            Err(err) => {
                consecutive_errors += 1;
                error!(
                    error = %err,
                    consecutive = consecutive_errors,
                    "cycle failed"
                );
                if consecutive_errors >= ctx.config.acquisition.max_consecutive_errors {
                    error!(
                        consecutive = consecutive_errors,
                        "too many consecutive errors; halting logging"
                    );
                    break Err(LoggerError::CircuitBreaker {
                        consecutive: consecutive_errors,
                    });
                }
                let delay = error_backoff(ctx.config.acquisition.error_delay, consecutive_errors);
                if shutdown.sleep(delay).await {
                    break Ok(());
                }
            }
        }
    };

    set_state(&ctx.state, LoggerState::Stopping);
    {
        let mut writer = match ctx.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writer.flush() {
            error!(error = %err, "final flush failed");
        }
    }
    ctx.pool.close_all().await;
    set_state(&ctx.state, LoggerState::Idle);
    outcome
}

/// One poll cycle.
async fn run_cycle(
    ctx: &LoopCtx,
    sys: &mut System,
    shutdown: &mut Shutdown,
) -> AppResult<CycleOutcome> {
    if !resources_ok(ctx, sys) {
        return Ok(CycleOutcome::ResourcesLow);
    }

    {
        let rotation_needed = {
            let writer = match ctx.writer.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            ctx.rotation.due(writer.active_file())
        };
        if rotation_needed {
            rotate(ctx)?;
        }
    }

    let sample = ctx.engine.acquire(&ctx.config.devices, shutdown).await;
    if shutdown.is_cancelled() {
        return Ok(CycleOutcome::Completed);
    }

    ctx.history.push(sample.clone());

    let write_result = {
        let mut writer = match ctx.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writer.add_record(&sample)
    };
    if let Err(err) = write_result {
        // A dead handle is abandoned for a fresh file; the buffered rows
        // ride along and flush there.
        warn!(error = %err, "write failed; forcing rotation");
        rotate(ctx)?;
    }

    // Publish for display/trend consumers; nobody listening is fine.
    let _ = ctx.samples_tx.send(sample);

    Ok(CycleOutcome::Completed)
}

/// Flush, select a directory, create the next file and swap the active
/// reference, then kick the retention sweep in the background.
fn rotate(ctx: &LoopCtx) -> AppResult<()> {
    let mut writer = match ctx.writer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if let Err(err) = writer.flush() {
        warn!(error = %err, "flush before rotation failed; rows carried to new file");
    }

    let dir = ctx.selector.select_directory()?;
    let header = build_header(&ctx.config.devices);
    let path = next_file_path(&dir);
    writer.set_file(&path, header)?;
    if let Err(err) = writer.flush() {
        warn!(error = %err, "carried-over rows failed to flush to new file");
    }
    drop(writer);

    info!(path = %path.display(), "rotated output file");

    let dirs = ctx.selector.sweep_directories();
    let retention_days = ctx.config.storage.retention_days;
    // Fire and forget; compression never delays the cycle.
    tokio::task::spawn_blocking(move || retention::sweep(&dirs, retention_days));

    Ok(())
}

/// Exponential backoff after the nth consecutive cycle failure:
/// `error_delay * 2^(n-1)`, with the shift capped to keep the math sane.
fn error_backoff(error_delay: std::time::Duration, consecutive: u32) -> std::time::Duration {
    error_delay.saturating_mul(1u32 << consecutive.saturating_sub(1).min(16))
}

/// Disk and memory pressure gate for the cycle.
fn resources_ok(ctx: &LoopCtx, sys: &mut System) -> bool {
    sys.refresh_memory();
    let total = sys.total_memory();
    if total > 0 {
        let used_pct = (sys.used_memory() as f64 / total as f64) * 100.0;
        if used_pct > MEMORY_PRESSURE_PCT {
            warn!(used_pct, "memory pressure");
            return false;
        }
    }

    let active_dir = {
        let writer = match ctx.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writer
            .active_file()
            .and_then(|f| f.path().parent().map(Path::to_path_buf))
    };
    if let Some(dir) = active_dir {
        if let Some(free) = free_space_for(&dir) {
            if free < ctx.config.storage.min_free_space_bytes {
                warn!(dir = %dir.display(), free, "disk pressure on active volume");
                return false;
            }
        }
    }
    true
}

/// Available bytes on the volume holding `dir`, by longest mount-point match.
fn free_space_for(dir: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| dir.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}
