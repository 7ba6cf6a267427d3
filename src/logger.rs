use std::io::{self, Write};

use anyhow::Result;
use flexi_logger::writers::LogWriter;
use flexi_logger::{DeferredNow, LogSpecification, Logger as FlexiLogger, LoggerHandle, WriteMode};
use lazy_static::lazy_static;
use log::{Level, LevelFilter, Record};
use parking_lot::{Mutex, MutexGuard};

/// Writes log messages, as they are, to the console: warnings and
/// errors to stderr, progress and debug output to stdout.
pub struct Logger;

lazy_static! {
    static ref LOGGER: Mutex<Option<LoggerHandle>> = Mutex::new(None);
}

struct ConsoleWriter;

impl LogWriter for ConsoleWriter {
    fn write(&self, now: &mut DeferredNow, record: &Record) -> io::Result<()> {
        if Logger::to_stderr(record.level()) {
            Logger::format_log(&mut io::stderr().lock(), now, record)
        } else {
            Logger::format_log(&mut io::stdout().lock(), now, record)
        }
    }

    fn flush(&self) -> io::Result<()> {
        io::stdout().flush()?;
        io::stderr().flush()
    }
}

impl Logger {
    fn to_stderr(level: Level) -> bool {
        level <= Level::Warn
    }

    fn format_log(
        w: &mut dyn Write,
        _now: &mut DeferredNow,
        record: &Record,
    ) -> io::Result<()> {
        writeln!(w, "{}", record.args())
    }
}

impl Logger {
    pub fn is_inited() -> bool {
        LOGGER.lock().is_some()
    }

    /// Starts logging. Calling this again once logging
    /// has started does nothing.
    pub fn initialize(max_level: LevelFilter) -> Result<()> {
        let mut logger: MutexGuard<Option<LoggerHandle>> = LOGGER.lock();

        if logger.is_none() {
            let log_spec = LogSpecification::builder().default(max_level).build();
            let log_handle = FlexiLogger::with(log_spec)
                .log_to_writer(Box::new(ConsoleWriter))
                .write_mode(WriteMode::Direct)
                .start()?;

            let _ = logger.insert(log_handle);
        }

        Ok(())
    }
}
