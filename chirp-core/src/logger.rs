//! Mask-filtered diagnostic logging.
//!
//! The engine reports every recoverable failure (underruns, stream I/O errors,
//! malformed assets, render overload) through a [`Logger`]. The logger filters
//! by [`LogMask`] and hands the message to a [`LogSink`]. When the host does not
//! install a sink, messages go to the [`log`] facade, so an `env_logger` (or any
//! other `log` backend) picks them up.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn mask_bit(self) -> u32 {
        match self {
            Self::Info => LogMask::INFO.0,
            Self::Warning => LogMask::WARNING.0,
            Self::Error => LogMask::ERROR.0,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Bit mask selecting which [`LogLevel`]s reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogMask(pub u32);

impl LogMask {
    pub const NONE: Self = Self(0);
    pub const INFO: Self = Self(1 << 0);
    pub const WARNING: Self = Self(1 << 1);
    pub const ERROR: Self = Self(1 << 2);
    pub const ALL: Self = Self(Self::INFO.0 | Self::WARNING.0 | Self::ERROR.0);

    pub fn contains(self, level: LogLevel) -> bool {
        self.0 & level.mask_bit() != 0
    }
}

impl Default for LogMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl std::ops::BitOr for LogMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Destination for engine diagnostics.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards diagnostics to the `log` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacadeSink;

impl LogSink for LogFacadeSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => log::info!(target: "chirp", "{}", message),
            LogLevel::Warning => log::warn!(target: "chirp", "{}", message),
            LogLevel::Error => log::error!(target: "chirp", "{}", message),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Mask-filtering front end shared by all engine components.
#[derive(Clone)]
pub struct Logger {
    mask: LogMask,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("mask", &self.mask).finish()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogMask::ALL, None)
    }
}

impl Logger {
    pub fn new(mask: LogMask, sink: Option<Arc<dyn LogSink>>) -> Self {
        Self {
            mask,
            sink: sink.unwrap_or_else(|| Arc::new(LogFacadeSink)),
        }
    }

    pub fn mask(&self) -> LogMask {
        self.mask
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.mask.contains(level)
    }

    /// Formats and emits a message if `level` passes the mask.
    ///
    /// Formatting happens only after the mask check, so filtered messages cost
    /// nothing on the audio path.
    pub fn write(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        match args.as_str() {
            Some(message) => self.sink.log(level, message),
            None => self.sink.log(level, &args.to_string()),
        }
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.write(LogLevel::Info, args);
    }

    pub fn warning(&self, args: fmt::Arguments<'_>) {
        self.write(LogLevel::Warning, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.write(LogLevel::Error, args);
    }
}

/// Lets a repeating diagnostic through at most once per interval.
#[derive(Debug)]
pub struct RateLimit {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimit {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns true if the caller should emit now.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(LogLevel, String)>>);

    impl LogSink for Collect {
        fn log(&self, level: LogLevel, message: &str) {
            self.0.lock().unwrap().push((level, message.to_string()));
        }
    }

    #[test]
    fn mask_filters_levels() {
        let sink = Arc::new(Collect::default());
        let logger = Logger::new(LogMask::WARNING | LogMask::ERROR, Some(sink.clone()));

        logger.info(format_args!("hidden"));
        logger.warning(format_args!("underrun on task {}", 3));
        logger.error(format_args!("stream failed"));

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (LogLevel::Warning, "underrun on task 3".to_string()));
        assert_eq!(seen[1].0, LogLevel::Error);
    }

    #[test]
    fn null_sink_is_safe() {
        let logger = Logger::new(LogMask::ALL, Some(Arc::new(NullLogSink)));
        logger.error(format_args!("nobody listens"));
    }

    #[test]
    fn empty_mask_emits_nothing() {
        let sink = Arc::new(Collect::default());
        let logger = Logger::new(LogMask::NONE, Some(sink.clone()));
        logger.error(format_args!("dropped"));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn rate_limit_suppresses_repeats() {
        let mut limit = RateLimit::new(Duration::from_secs(60));
        assert!(limit.ready());
        assert!(!limit.ready());
    }
}
