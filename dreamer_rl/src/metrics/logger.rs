//! Metric loggers.
//!
//! Provides different logging backends for the scalar [`Metrics`] returned by
//! the training calls.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use super::Metrics;

/// Logger trait for different logging backends.
pub trait MetricsLogger: Send {
    /// Log the metrics of one training step.
    fn log(&mut self, step: u64, metrics: &Metrics);

    /// Flush any buffered output.
    fn flush(&mut self);
}

/// Logger that emits one `tracing` event per logged step.
pub struct ConsoleLogger {
    log_interval: u64,
    last_log_step: Option<u64>,
    start_time: Instant,
}

impl ConsoleLogger {
    /// Create a new console logger.
    ///
    /// # Arguments
    ///
    /// * `log_interval` - Steps between log entries
    pub fn new(log_interval: u64) -> Self {
        Self {
            log_interval: log_interval.max(1),
            last_log_step: None,
            start_time: Instant::now(),
        }
    }

    /// Reset the start time.
    pub fn reset_timer(&mut self) {
        self.start_time = Instant::now();
    }

    fn due(&self, step: u64) -> bool {
        match self.last_log_step {
            None => true,
            Some(last) => step >= last + self.log_interval,
        }
    }
}

impl MetricsLogger for ConsoleLogger {
    fn log(&mut self, step: u64, metrics: &Metrics) {
        if !self.due(step) {
            return;
        }

        let summary = metrics
            .iter()
            .map(|(k, v)| format!("{}={:.4}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(
            step,
            elapsed_secs = self.start_time.elapsed().as_secs_f64(),
            "{}",
            summary
        );

        self.last_log_step = Some(step);
    }

    fn flush(&mut self) {}
}

/// CSV file logger for analysis.
///
/// The header is taken from the keys of the first logged step; later steps
/// write their values in that column order and leave unknown columns empty.
pub struct CsvLogger {
    writer: BufWriter<File>,
    columns: Option<Vec<String>>,
    start_time: Instant,
}

impl CsvLogger {
    /// Create a new CSV logger.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the CSV file
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            columns: None,
            start_time: Instant::now(),
        })
    }

    fn write_row(&mut self, step: u64, metrics: &Metrics) -> std::io::Result<()> {
        let columns = match &self.columns {
            Some(columns) => columns.clone(),
            None => {
                let columns: Vec<String> = metrics.iter().map(|(k, _)| k.to_string()).collect();
                writeln!(self.writer, "step,elapsed_secs,{}", columns.join(","))?;
                self.columns = Some(columns.clone());
                columns
            }
        };

        let values = columns
            .iter()
            .map(|c| metrics.get(c).map(|v| v.to_string()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(
            self.writer,
            "{},{:.2},{}",
            step,
            self.start_time.elapsed().as_secs_f64(),
            values
        )
    }
}

impl MetricsLogger for CsvLogger {
    fn log(&mut self, step: u64, metrics: &Metrics) {
        if let Err(err) = self.write_row(step, metrics) {
            tracing::warn!(%err, "failed to write metrics row");
        }
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for CsvLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Multi-logger that writes to multiple backends.
pub struct MultiLogger {
    loggers: Vec<Box<dyn MetricsLogger>>,
}

impl MultiLogger {
    /// Create a new multi-logger.
    pub fn new() -> Self {
        Self {
            loggers: Vec::new(),
        }
    }

    /// Add a logger.
    pub fn add<L: MetricsLogger + 'static>(mut self, logger: L) -> Self {
        self.loggers.push(Box::new(logger));
        self
    }
}

impl Default for MultiLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsLogger for MultiLogger {
    fn log(&mut self, step: u64, metrics: &Metrics) {
        for logger in &mut self.loggers {
            logger.log(step, metrics);
        }
    }

    fn flush(&mut self) {
        for logger in &mut self.loggers {
            logger.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(loss: f64) -> Metrics {
        let mut m = Metrics::new();
        m.insert("model_loss", loss);
        m.insert("actor_ent", 0.1);
        m
    }

    #[test]
    fn test_console_logger_interval() {
        let mut logger = ConsoleLogger::new(10);
        assert!(logger.due(0));
        logger.log(0, &sample(1.0));
        assert!(!logger.due(5));
        assert!(logger.due(10));
    }

    #[test]
    fn test_csv_logger_writes_header_once() {
        let path = std::env::temp_dir().join(format!("dreamer_rl_metrics_{}.csv", std::process::id()));
        {
            let mut logger = CsvLogger::new(&path).unwrap();
            logger.log(1, &sample(1.5));
            let mut partial = Metrics::new();
            partial.insert("model_loss", 0.5);
            logger.log(2, &partial);
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "step,elapsed_secs,actor_ent,model_loss");
        assert!(lines[1].starts_with("1,"));
        assert!(lines[1].ends_with(",0.1,1.5"));
        assert!(lines[2].ends_with(",,0.5"), "got {}", lines[2]);
    }

    #[test]
    fn test_multi_logger() {
        let mut multi = MultiLogger::new().add(ConsoleLogger::new(1));
        multi.log(3, &sample(0.2));
        multi.flush();
    }
}
