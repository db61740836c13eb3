//! # PLC Logger Core Library
//!
//! This crate is the core library behind the `plc_logger` binary: an
//! acquisition-and-durability pipeline that polls a fleet of PLC controllers
//! on a fixed period and appends every snapshot to rotating CSV files.
//!
//! ## Crate Structure
//!
//! - **`acquire`**: The acquisition engine. Reads all configured points per
//!   device in batches, with per-device retry and linear backoff.
//! - **`config`**: Configuration loading (TOML merged with environment
//!   variables via figment) and semantic validation.
//! - **`core`**: Fundamental value types and traits: `Sample`, `PointKey`,
//!   `TagValue`, and the `DeviceClient`/`ClientFactory` protocol seams.
//! - **`engine`**: The `DataLogger` scheduler: cycle loop, circuit breaker,
//!   rotation, and the broadcast channel consumers subscribe to.
//! - **`error`**: The `LoggerError` taxonomy shared by the whole pipeline.
//! - **`history`**: Bounded in-memory FIFO of recent samples.
//! - **`pool`**: One persistent protocol client per controller address.
//! - **`retention`**: Compress aged output files, delete expired archives.
//! - **`shutdown`**: Cooperative cancellation observed by every sleep.
//! - **`sim`**: Hardware-free simulated clients for tests and simulate mode.
//! - **`storage`**: Output directory selection and the rotation policy.
//! - **`tracing_setup`**: Structured logging initialization.
//! - **`writer`**: Buffered CSV appender for the active output file.

pub mod acquire;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod history;
pub mod pool;
pub mod retention;
pub mod shutdown;
pub mod sim;
pub mod storage;
pub mod tracing_setup;
pub mod writer;

pub use crate::config::LoggerConfig;
pub use crate::core::{Device, PointKey, Sample, TagValue};
pub use crate::engine::{DataLogger, LoggerState};
pub use crate::error::{AppResult, LoggerError};
