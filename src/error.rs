//! Custom error types for the application.
//!
//! This module defines the primary error type, `LoggerError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failure the pipeline can
//! see, from configuration and I/O issues to device communication problems.
//!
//! The taxonomy mirrors how failures propagate:
//!
//! - **`Config` / `Configuration`**: parse-level errors from figment versus
//!   semantic errors caught by validation (e.g. an empty device list).
//! - **`Io` / `Csv`**: file-system and serialization failures from the write
//!   path. A flush failure is surfaced to the scheduler, which responds by
//!   rotating to a fresh file.
//! - **`Device`**: batch-level communication failure against one controller.
//!   These are absorbed below the cycle level as null point values.
//! - **`NoStorage`**: no output directory could be created anywhere. This is
//!   one of the few run-terminating conditions.
//! - **`CircuitBreaker`**: the cycle loop saw too many consecutive failures
//!   and halted itself; fatal to the run and surfaced to the operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, LoggerError>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// Parse-level configuration failure from figment.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Semantic configuration failure caught during validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File-system failure on the write or retention path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Row serialization failure in the buffered writer.
    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),

    /// Batch-level communication failure against one controller.
    #[error("Device '{address}' error: {message}")]
    Device {
        /// Address of the controller that failed.
        address: String,
        /// Underlying failure description.
        message: String,
    },

    /// `add_record` was called before any active file was set.
    #[error("No writer target set; call set_file before adding records")]
    WriterNotInitialized,

    /// No output directory could be created anywhere.
    #[error("No usable output directory (removable volumes and local fallback all failed)")]
    NoStorage,

    /// The cycle loop halted itself after repeated failures.
    #[error("Logging halted after {consecutive} consecutive cycle failures")]
    CircuitBreaker {
        /// Number of consecutive cycle failures observed at the trip.
        consecutive: u32,
    },
}

impl LoggerError {
    /// Build a device-scoped error from anything displayable.
    pub fn device(address: impl Into<String>, err: impl std::fmt::Display) -> Self {
        LoggerError::Device {
            address: address.into(),
            message: err.to_string(),
        }
    }
}
