//! Logging for the host process: file output via `tracing-subscriber`, plus
//! an in-memory ring buffer so `getRecentLogs` can serve a tail without
//! re-reading the log file.

mod buffer;
mod file_writer;

pub use buffer::{LogBuffer, LogEntry, LogLevel};
pub use file_writer::{init_file_logging, LogFileInfo};
