// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! `log` backend for the firmware embedding the engine.
//!
//! The engine itself only uses the `log` macros. The embedding firmware picks a [`LogSink`] (for
//! example a UART wrapped in a [`LockedWriter`]) and calls [`init`] once on the boot core.

use crate::config::DEBUG;
use core::fmt::{Arguments, Write};
#[cfg(not(test))]
use core::option_env;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::{Once, mutex::SpinMutex};

static LOGGER: Once<Logger> = Once::new();

struct Logger {
    sink: &'static (dyn LogSink + Sync),
}

impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        writeln!(self.sink, "{}: {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Initialises logger.
///
/// Only the first sink passed in is ever used, later calls return the error from
/// [`log::set_logger`].
pub fn init(sink: &'static (dyn LogSink + Sync)) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| Logger { sink });
    log::set_logger(logger)?;
    log::set_max_level(build_time_log_level());
    Ok(())
}

/// Gets a reference to the log sink, if it has been set.
pub fn get_log_sink() -> Option<&'static (dyn LogSink + Sync)> {
    LOGGER.get().map(|logger| logger.sink)
}

/// Returns the logging [`LevelFilter`] set by the build-time environment variable `LOG_LEVEL`.
/// `LOG_LEVEL` can have the lower-case string values "off", "error", "warn", "info", "debug", or
/// "trace", corresponding to the named values of [`LevelFilter`]. If `LOG_LEVEL` is absent or has
/// some other value, this function returns `LevelFilter::Debug` if [`DEBUG`] is true, otherwise
/// `LevelFilter::Info`.
pub const fn build_time_log_level() -> LevelFilter {
    let level = match option_env!("LOG_LEVEL") {
        Some(level) => level,
        None => "",
    };
    level_from_name(level)
}

const fn level_from_name(level: &str) -> LevelFilter {
    match level.as_bytes() {
        b"off" => LevelFilter::Off,
        b"error" => LevelFilter::Error,
        b"warn" => LevelFilter::Warn,
        b"info" => LevelFilter::Info,
        b"debug" => LevelFilter::Debug,
        b"trace" => LevelFilter::Trace,
        _ => {
            if DEBUG {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            }
        }
    }
}

/// Something to which logs can be sent.
///
/// Note that unlike `core::fmt::Write`, the `write_fmt` method on this trait takes `&self` rather
/// than `&mut self`. This means that the implementation is responsible for handling locking if
/// necessary, or can be made lock-free.
pub trait LogSink {
    /// Writes the given format arguments to the log sink.
    fn write_fmt(&self, args: Arguments);
}

/// An implementation of `LogSink` that wraps around any implementation of `core::fmt::Write`.
///
/// This wraps the given writer in a spin mutex, to allow a single instance it to be used safely
/// from multiple cores. This also ensures that a complete log line is written at once, rather than
/// being interleaved with characters from another core.
pub struct LockedWriter<W: Write> {
    writer: SpinMutex<W>,
}

impl<W: Write> LockedWriter<W> {
    /// Creates a new `LockedWriter` wrapping the given [`Write`] implementation.
    pub const fn new(writer: W) -> Self {
        Self {
            writer: SpinMutex::new(writer),
        }
    }

    /// Runs `f` with exclusive access to the wrapped writer.
    pub fn with_writer<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.writer.lock())
    }
}

impl<W: Write> LogSink for LockedWriter<W> {
    fn write_fmt(&self, args: Arguments) {
        // Ignore errors.
        let _ = self.writer.lock().write_fmt(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(level_from_name("off"), LevelFilter::Off);
        assert_eq!(level_from_name("warn"), LevelFilter::Warn);
        assert_eq!(level_from_name("trace"), LevelFilter::Trace);
        assert_eq!(level_from_name("TRACE"), level_from_name(""));
        assert_eq!(level_from_name("verbose"), level_from_name(""));
    }

    #[test]
    fn locked_writer_keeps_lines_whole() {
        let writer = LockedWriter::new(String::new());
        writeln!(writer, "{}: {}", "INFO", "CPU 3 powered down");
        writeln!(writer, "second line");
        writer.with_writer(|buffer| {
            assert_eq!(buffer, "INFO: CPU 3 powered down\nsecond line\n");
        });
    }

    #[test]
    fn logger_forwards_to_sink() {
        static SINK: LockedWriter<String> = LockedWriter::new(String::new());

        // Another test binary thread may have installed the logger first; only the sink installed
        // by this call is checked.
        if init(&SINK).is_ok() {
            log::info!("hello {}", 42);
            SINK.with_writer(|buffer| assert!(buffer.contains("INFO: hello 42")));
        }
        assert!(get_log_sink().is_some());
    }
}
