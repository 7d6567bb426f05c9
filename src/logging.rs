//! Logging setup for the compositor and its demo binary.
//!
//! Console output goes through `env_logger` with UTC timestamps and coloured levels.
//! Every record for this crate is also kept in a bounded in-memory buffer (the last
//! [`MAX_LOG_LINES`] entries) so it can be exported on demand or dumped next to a
//! panic report.
//!
//! Defaults when `RUST_LOG` is not set:
//! - debug builds show DEBUG and above for this crate
//! - release builds show ERROR only
//!
//! Files are written under `<data_dir>/<app_name>/logs/`.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use env_logger::fmt::{Color, Formatter};
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

#[allow(unused_imports)]
use log::{debug, info, warn, error};

pub const MAX_LOG_LINES: usize = 1000;

const LOG_TARGET: &str = "overlay_compositor";

pub type LogBuffer = Arc<Mutex<VecDeque<String>>>;

static LOG_BUFFER: Lazy<LogBuffer> = Lazy::new(|| {
    Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES)))
});

/// The process-wide buffer the logger captures into.
pub fn log_buffer() -> LogBuffer {
    Arc::clone(&LOG_BUFFER)
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

struct BufferLogger {
    log_buffer: LogBuffer,
}

impl BufferLogger {
    fn push(&self, entry: String) {
        let mut buffer = self.log_buffer.lock();
        if buffer.len() == MAX_LOG_LINES {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }
}

impl log::Log for BufferLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with(LOG_TARGET) && metadata.level() <= LevelFilter::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // The module is already part of the target, so only the line is added.
        let entry = match record.line() {
            Some(line) => format!("{}:{} {:<5} {}", record.target(), line, record.level(), record.args()),
            None => format!("{} {:<5} {}", record.target(), record.level(), record.args()),
        };
        self.push(entry);
    }

    fn flush(&self) {}
}

struct CompositeLogger {
    console_logger: env_logger::Logger,
    buffer_logger: BufferLogger,
}

impl log::Log for CompositeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console_logger.enabled(metadata) || self.buffer_logger.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.console_logger.enabled(record.metadata()) {
            self.console_logger.log(record);
        }
        if self.buffer_logger.enabled(record.metadata()) {
            self.buffer_logger.log(record);
        }
    }

    fn flush(&self) {
        self.console_logger.flush();
        self.buffer_logger.flush();
    }
}

/// Install the console + buffer logger. Fails if a logger is already installed.
pub fn setup_logger() -> Result<LogBuffer, SetLoggerError> {
    let mut builder = env_logger::Builder::new();

    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        // Filter out all other crates' logs
        builder.filter(None, LevelFilter::Off);
        if cfg!(debug_assertions) {
            builder.filter(Some(LOG_TARGET), LevelFilter::Debug);
        } else {
            builder.filter(Some(LOG_TARGET), LevelFilter::Error);
        }
    }

    builder.format(|buf: &mut Formatter, record: &Record| {
        let module_info = match (record.module_path(), record.line()) {
            (Some(module), Some(line)) => format!("{module}:{line}"),
            (Some(module), None) => module.to_string(),
            (None, Some(line)) => format!("line:{line}"),
            (None, None) => "unknown".to_string(),
        };

        let mut level_style = buf.style();
        let mut meta_style = buf.style();

        match record.level() {
            Level::Error => level_style.set_color(Color::Red).set_bold(true),
            Level::Warn => level_style.set_color(Color::Yellow).set_bold(true),
            Level::Info => level_style.set_color(Color::Green).set_bold(true),
            Level::Debug => level_style.set_color(Color::Blue).set_bold(true),
            Level::Trace => level_style.set_color(Color::White),
        };

        // Color::Rgb does not render on the macOS terminal
        #[cfg(target_os = "macos")]
        meta_style.set_color(Color::Blue);
        #[cfg(not(target_os = "macos"))]
        meta_style.set_color(Color::Rgb(120, 120, 120));

        writeln!(
            buf,
            "{} {} {} {}",
            meta_style.value(timestamp()),
            level_style.value(record.level()),
            meta_style.value(module_info),
            record.args()
        )
    });

    let composite_logger = CompositeLogger {
        console_logger: builder.build(),
        buffer_logger: BufferLogger { log_buffer: log_buffer() },
    };

    log::set_boxed_logger(Box::new(composite_logger))?;
    // Per-target filtering happens in the loggers themselves.
    log::set_max_level(LevelFilter::Trace);

    Ok(log_buffer())
}

pub fn get_log_directory(app_name: &str) -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join(app_name).join("logs")
}

/// Write the buffered log lines to `<log dir>/debug.log` and return its path.
pub fn export_debug_logs(app_name: &str, log_buffer: &LogBuffer) -> io::Result<PathBuf> {
    let path = write_log_export(&get_log_directory(app_name), log_buffer)?;
    info!("Debug logs exported to: {}", path.display());
    Ok(path)
}

fn write_log_export(log_dir: &Path, log_buffer: &LogBuffer) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let debug_log_path = log_dir.join("debug.log");

    // Copy out first; the logger must not wait on file IO.
    let entries: Vec<String> = log_buffer.lock().iter().cloned().collect();

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&debug_log_path)?;

    let timestamp = timestamp();
    writeln!(file, "{timestamp} [DEBUG EXPORT] =====================================")?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] Overlay Compositor Debug Log Export")?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] Maximum captured entries: {MAX_LOG_LINES}")?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] =====================================")?;
    writeln!(file)?;

    if entries.is_empty() {
        writeln!(file, "{timestamp} [DEBUG EXPORT] No log entries found in buffer")?;
    } else {
        for entry in &entries {
            writeln!(file, "{timestamp} {entry}")?;
        }
    }

    writeln!(file)?;
    writeln!(file, "{timestamp} [DEBUG EXPORT] Total entries exported: {}", entries.len())?;
    file.flush()?;

    Ok(debug_log_path)
}

/// Write panics with a backtrace and the buffered log lines to `<log dir>/panic.log`,
/// and echo them to stderr.
pub fn setup_panic_hook(app_name: &str, log_buffer: LogBuffer) {
    let log_file_path = get_log_directory(app_name).join("panic.log");
    if let Some(parent) = log_file_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Could not create log directory {}: {}", parent.display(), e);
        }
    }

    panic::set_hook(Box::new(move |info| {
        let backtrace = backtrace::Backtrace::new();
        let timestamp = timestamp();

        let location = match info.location() {
            Some(location) => format!("{}:{}", location.file(), location.line()),
            None => "unknown location".to_string(),
        };
        let header_msg = format!("[PANIC] at {location} - {info}");
        let backtrace_lines: Vec<String> = format!("{backtrace:?}")
            .lines()
            .map(|line| format!("[BACKTRACE] {}", line.trim()))
            .collect();

        // try_lock: the panic may have happened while the buffer was held.
        let entries: Vec<String> = log_buffer
            .try_lock()
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default();

        let written = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_file_path)
            .and_then(|mut file| {
                writeln!(file, "{timestamp} {header_msg}")?;
                writeln!(file, "{timestamp} [PANIC] Backtrace:")?;
                for line in &backtrace_lines {
                    writeln!(file, "{timestamp} {line}")?;
                }
                writeln!(file)?;
                writeln!(file, "{timestamp} [PANIC] Last {MAX_LOG_LINES} log entries:")?;
                for entry in &entries {
                    writeln!(file, "{timestamp} {entry}")?;
                }
                file.flush()
            });

        eprintln!("\n\n{header_msg}");
        eprintln!("[PANIC] Backtrace:");
        for line in &backtrace_lines {
            eprintln!("{line}");
        }
        match written {
            Ok(()) => eprintln!("\nA complete crash log has been written to: {}", log_file_path.display()),
            Err(e) => eprintln!("\nFailed to write crash log to {}: {}", log_file_path.display(), e),
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;

    fn record_line(logger: &BufferLogger, target: &str, message: &str) {
        logger.log(
            &Record::builder()
                .target(target)
                .level(Level::Info)
                .line(Some(7))
                .args(format_args!("{}", message))
                .build(),
        );
    }

    #[test]
    fn test_buffer_keeps_own_target_and_is_bounded() {
        let logger = BufferLogger { log_buffer: Arc::new(Mutex::new(VecDeque::new())) };
        record_line(&logger, "overlay_compositor::overlay", "hello");
        record_line(&logger, "tokio::runtime", "ignored");
        assert_eq!(
            logger.log_buffer.lock().iter().cloned().collect::<Vec<_>>(),
            vec!["overlay_compositor::overlay:7 INFO  hello"]
        );

        for i in 0..MAX_LOG_LINES + 5 {
            record_line(&logger, LOG_TARGET, &i.to_string());
        }
        let buffer = logger.log_buffer.lock();
        assert_eq!(buffer.len(), MAX_LOG_LINES);
        assert!(buffer.back().unwrap().ends_with(&(MAX_LOG_LINES + 4).to_string()));
    }

    #[test]
    fn test_export_writes_entries() {
        let dir = std::env::temp_dir().join(format!("overlay-compositor-logs-{}", std::process::id()));
        let buffer: LogBuffer = Arc::new(Mutex::new(VecDeque::from(vec!["first".to_string()])));
        let path = write_log_export(&dir, &buffer).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains(" first\n"));
        assert!(contents.contains("Total entries exported: 1"));
        let _ = fs::remove_dir_all(&dir);
    }
}
