//! Host log file plus the `getRecentLogs` ring, both fed from one `tracing`
//! subscriber.
//!
//! The host is a daemon with no terminal of its own, so every log line has
//! to reach two places at once: a file under `<socket dir>/logs/` for
//! post-mortem debugging, and the in-memory [`LogBuffer`] ring that
//! `getRecentLogs` serves to whichever client asks. `tracing_subscriber`
//! only knows how to hand a layer one writer, so [`DualWriter`] re-parses
//! its own formatted output back into a [`LogEntry`] rather than carrying
//! structured fields through twice.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::buffer::{LogBuffer, LogEntry, LogLevel};

/// Information about the current log file
#[derive(Debug, Clone)]
pub struct LogFileInfo {
    /// Full path to the log file
    pub path: PathBuf,
}

/// Builds a timestamped, per-process log file path so two host instances
/// sharing a logs directory (a restart racing a lingering shutdown grace
/// period, say) never clobber each other's file.
pub fn create_log_file_path(logs_dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    logs_dir.join(format!("muxd-{timestamp}-{}.log", std::process::id()))
}

/// Fans formatted log lines out to the log file and the in-memory ring.
struct DualWriter {
    file: Arc<std::sync::Mutex<File>>,
    buffer: Arc<LogBuffer>,
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(buf);
            let _ = file.flush();
        }

        if let Ok(line) = std::str::from_utf8(buf) {
            let line = line.trim();
            if !line.is_empty() {
                if let Some(entry) = parse_log_line(line) {
                    self.buffer.push(entry);
                }
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Ok(mut file) = self.file.lock() {
            file.flush()
        } else {
            Ok(())
        }
    }
}

/// Recovers a [`LogEntry`] from one line of `tracing_subscriber`'s default
/// fmt layer output (`"<timestamp> <LEVEL> <target>: <message>"`).
fn parse_log_line(line: &str) -> Option<LogEntry> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let level = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ]
    .into_iter()
    .find(|lvl| line.contains(&format!(" {} ", lvl.as_str())))
    .unwrap_or(LogLevel::Info);

    let level_marker = format!(" {} ", level.as_str());
    let rest = match line.find(&level_marker) {
        Some(pos) => line[pos + level_marker.len()..].trim(),
        None => line,
    };

    let (target, message) = match rest.find(": ") {
        Some(colon_pos) if looks_like_target(&rest[..colon_pos]) => {
            (rest[..colon_pos].to_string(), rest[colon_pos + 2..].to_string())
        }
        _ => ("muxd".to_string(), rest.to_string()),
    };

    Some(LogEntry {
        timestamp: Utc::now(),
        level,
        target,
        message,
    })
}

/// A module path (`muxd::pty::host`) or a single bare word, as opposed to a
/// message that merely happens to contain a colon.
fn looks_like_target(candidate: &str) -> bool {
    !candidate.is_empty() && (candidate.contains("::") || !candidate.contains(' '))
}

struct DualWriterMaker {
    file: Arc<std::sync::Mutex<File>>,
    buffer: Arc<LogBuffer>,
}

impl<'a> MakeWriter<'a> for DualWriterMaker {
    type Writer = DualWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DualWriter {
            file: Arc::clone(&self.file),
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// Guard that keeps the logging system alive
pub struct LoggingGuard {
    _file: Arc<std::sync::Mutex<File>>,
}

/// Opens the host's log file and wires a `tracing` subscriber that writes
/// every event to both that file and `buffer`. Returns the file's path and a
/// guard that must be held for the duration of logging.
pub fn init_file_logging(
    logs_dir: PathBuf,
    buffer: Arc<LogBuffer>,
) -> Result<(LogFileInfo, LoggingGuard)> {
    fs::create_dir_all(&logs_dir).context("failed to create logs directory")?;

    let log_path = create_log_file_path(&logs_dir);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("failed to open log file")?;

    let file = Arc::new(std::sync::Mutex::new(file));

    let writer = DualWriterMaker {
        file: Arc::clone(&file),
        buffer,
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "muxd=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    let info = LogFileInfo {
        path: log_path.clone(),
    };

    let guard = LoggingGuard { _file: file };

    Ok((info, guard))
}
