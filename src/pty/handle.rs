//! Spawns and owns a single PTY-backed child process.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Outcome of a process exit, classified per spec.md §4.6a so a client can
/// tell a clean exit from a crash without re-deriving it from raw fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: i32,
    pub success: bool,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn format_reason(&self) -> String {
        if self.success {
            "Exited normally".to_string()
        } else if let Some(sig) = self.signal {
            format!("Killed by signal {} ({})", sig, signal_name(sig))
        } else {
            format!("Exit code: {}", self.code)
        }
    }
}

fn signal_name(sig: i32) -> &'static str {
    match sig {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        4 => "SIGILL",
        6 => "SIGABRT",
        8 => "SIGFPE",
        9 => "SIGKILL",
        11 => "SIGSEGV",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        _ => "unknown",
    }
}

const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(1);

/// A single spawned PTY: the master side, the child handle, and split
/// reader/writer. Non-blocking on Unix so polling never stalls the host loop.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    reader: Box<dyn Read + Send>,
}

impl PtyHandle {
    pub fn spawn(
        cmd: &str,
        args: &[&str],
        working_dir: &Path,
        env: HashMap<String, String>,
        rows: u16,
        cols: u16,
    ) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to open pty")?;

        let mut cmd_builder = CommandBuilder::new(cmd);
        cmd_builder.args(args);
        cmd_builder.cwd(working_dir);
        for (key, value) in env {
            cmd_builder.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd_builder).context("failed to spawn command in pty")?;
        let reader = pair.master.try_clone_reader().context("failed to clone pty reader")?;
        let writer = pair.master.take_writer().context("failed to take pty writer")?;

        set_nonblocking(&pair.master);

        Ok(Self {
            master: pair.master,
            child,
            writer,
            reader,
        })
    }

    fn write_all_with_retry(&mut self, data: &[u8]) -> Result<()> {
        let mut written = 0;
        let start = Instant::now();

        while written < data.len() {
            if start.elapsed() > WRITE_TIMEOUT {
                anyhow::bail!(
                    "timed out writing to pty after {:?} ({} of {} bytes written)",
                    WRITE_TIMEOUT,
                    written,
                    data.len()
                );
            }

            match self.writer.write(&data[written..]) {
                Ok(0) => anyhow::bail!("write returned 0 bytes"),
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(WRITE_RETRY_DELAY);
                }
                Err(e) => return Err(e).context("failed to write to pty"),
            }
        }
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.write_all_with_retry(data)?;
        self.writer.flush().context("failed to flush pty writer")
    }

    pub fn try_read(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = [0u8; 4096];
        match self.reader.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).context("failed to read from pty"),
        }
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to resize pty")
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// The pid of the process group currently in the foreground of this
    /// PTY's controlling terminal (e.g. an editor the shell launched), if
    /// the platform exposes it.
    pub fn foreground_pid(&self) -> Option<i32> {
        self.master.process_group_leader()
    }

    pub fn exit_status(&mut self) -> Option<ExitInfo> {
        match self.child.try_wait() {
            Ok(None) => None,
            Ok(Some(status)) => {
                let code = status.exit_code() as i32;
                let success = status.success();

                #[cfg(unix)]
                let signal = if !success && code > 128 && code <= 128 + 64 {
                    Some(code - 128)
                } else {
                    None
                };
                #[cfg(not(unix))]
                let signal = None;

                Some(ExitInfo { code, success, signal })
            }
            Err(_) => Some(ExitInfo {
                code: 255,
                success: false,
                signal: None,
            }),
        }
    }

    pub fn kill(&mut self) -> Result<()> {
        self.child.kill().context("failed to kill pty child process")
    }
}

#[cfg(unix)]
fn set_nonblocking(master: &Box<dyn MasterPty + Send>) {
    use std::os::fd::AsRawFd;
    if let Some(fd) = master.as_raw_fd() {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags != -1 {
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
    }
}

#[cfg(not(unix))]
fn set_nonblocking(_master: &Box<dyn MasterPty + Send>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tmp() -> PathBuf {
        std::env::temp_dir()
    }

    #[test]
    fn spawn_echo_produces_output_and_exits_cleanly() {
        let mut pty = PtyHandle::spawn("echo", &["hello"], &tmp(), HashMap::new(), 24, 80).unwrap();

        let mut collected = Vec::new();
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if let Some(data) = pty.try_read().unwrap() {
                collected.extend(data);
            }
            if !pty.is_alive() && collected.windows(5).any(|w| w == b"hello") {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(String::from_utf8_lossy(&collected).contains("hello"));

        std::thread::sleep(Duration::from_millis(50));
        let exit = pty.exit_status();
        assert!(exit.is_some());
        assert!(exit.unwrap().success);
    }

    #[test]
    fn write_reaches_cat_and_echoes_back() {
        let mut pty = PtyHandle::spawn("cat", &[], &tmp(), HashMap::new(), 24, 80).unwrap();
        pty.write(b"abc\n").unwrap();

        let mut collected = Vec::new();
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if let Some(data) = pty.try_read().unwrap() {
                collected.extend(data);
                if collected.len() >= 4 {
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(String::from_utf8_lossy(&collected).contains("abc"));
        pty.kill().unwrap();
    }

    #[test]
    fn kill_stops_a_long_running_process() {
        let mut pty = PtyHandle::spawn("sleep", &["30"], &tmp(), HashMap::new(), 24, 80).unwrap();
        assert!(pty.is_alive());
        pty.kill().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!pty.is_alive());
    }

    #[test]
    #[cfg(unix)]
    fn foreground_pid_is_reported_while_child_runs() {
        let mut pty = PtyHandle::spawn("sleep", &["5"], &tmp(), HashMap::new(), 24, 80).unwrap();
        assert!(pty.foreground_pid().is_some());
        pty.kill().unwrap();
    }

    #[test]
    fn format_reason_distinguishes_success_signal_and_code() {
        let ok = ExitInfo {
            code: 0,
            success: true,
            signal: None,
        };
        assert_eq!(ok.format_reason(), "Exited normally");

        let signaled = ExitInfo {
            code: 137,
            success: false,
            signal: Some(9),
        };
        assert_eq!(signaled.format_reason(), "Killed by signal 9 (SIGKILL)");

        let failed = ExitInfo {
            code: 2,
            success: false,
            signal: None,
        };
        assert_eq!(failed.format_reason(), "Exit code: 2");
    }
}
