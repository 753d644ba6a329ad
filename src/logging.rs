use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Timestamp format used on every log line. The correlation-log reader
/// parses it back, so the two must stay in sync.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Logger writing pipe-delimited lines: `timestamp|LEVEL|message`.
///
/// Start/stop events emitted by the execution engine become the
/// correlation log that the reconciliation stage re-parses.
pub struct PipeLogger {
    level: LevelFilter,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl PipeLogger {
    pub fn new(level: LevelFilter, sink: Box<dyn Write + Send>) -> Self {
        PipeLogger {
            level,
            sink: Mutex::new(sink),
        }
    }
}

impl Log for PipeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT);
        let mut sink = self.sink.lock().unwrap();
        let _ = writeln!(
            sink,
            "{}|{}|{}",
            timestamp,
            level_name(record.level()),
            record.args()
        );
        let _ = sink.flush();
    }

    fn flush(&self) {
        let _ = self.sink.lock().unwrap().flush();
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Installs the pipe logger, writing to `logfile` when given, stderr otherwise.
pub fn init(verbose: u8, logfile: Option<&Path>) -> io::Result<()> {
    let level = if verbose > 0 {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let sink: Box<dyn Write + Send> = match logfile {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stderr()),
    };
    log::set_boxed_logger(Box::new(PipeLogger::new(level, sink)))
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;
    log::set_max_level(level);
    Ok(())
}
