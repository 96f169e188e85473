//! Scalar training metrics and logging backends.
//!
//! ## Metrics
//!
//! - [`Metrics`]: ordered map of named scalars produced by every training call
//!
//! ## Loggers
//!
//! - [`ConsoleLogger`]: structured `tracing` events
//! - [`CsvLogger`]: CSV file logging for analysis
//! - [`MultiLogger`]: Combine multiple loggers

pub mod logger;
pub mod scalars;

pub use logger::{ConsoleLogger, CsvLogger, MetricsLogger, MultiLogger};
pub use scalars::{tensor_scalar, Metrics};
