//! Internal host configuration.
//!
//! Deliberately not a TOML-file loader or CLI-flag parser — just the handful
//! of ambient constants the host needs so they aren't hardcoded magic numbers.
//! Read from the environment with [`HostConfig::from_env`], falling back to
//! [`HostConfig::default`].

use std::path::PathBuf;
use std::time::Duration;

/// Host-wide tunables.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Path to the Unix-domain socket the IPC server listens on.
    pub socket_path: PathBuf,

    /// Maximum number of completed scrollback lines retained per PTY.
    pub hot_scrollback_limit: usize,

    /// Capacity of the per-PTY LRU line cache.
    pub line_cache_capacity: usize,

    /// Timeout for a single PTY write before giving up.
    pub write_timeout: Duration,

    /// Grace period between destroying all PTYs and exiting on `shutdown`.
    pub shutdown_grace_period: Duration,

    /// Maximum in-memory log lines retained for `getRecentLogs`.
    pub log_buffer_capacity: usize,

    /// Interval between `PtyHost::tick` calls: how often pending PTY output
    /// is pumped into the emulator and unified updates are dispatched.
    pub tick_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            hot_scrollback_limit: 10_000,
            line_cache_capacity: 1_000,
            write_timeout: Duration::from_secs(1),
            shutdown_grace_period: Duration::from_millis(10),
            log_buffer_capacity: 2_000,
            tick_interval: Duration::from_millis(10),
        }
    }
}

impl HostConfig {
    /// Build a config from `MUX_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            socket_path: std::env::var("MUX_SOCKET_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.socket_path),
            hot_scrollback_limit: env_usize("MUX_HOT_SCROLLBACK_LIMIT")
                .unwrap_or(defaults.hot_scrollback_limit),
            line_cache_capacity: env_usize("MUX_LINE_CACHE_CAPACITY")
                .unwrap_or(defaults.line_cache_capacity),
            write_timeout: env_millis("MUX_WRITE_TIMEOUT_MS").unwrap_or(defaults.write_timeout),
            shutdown_grace_period: env_millis("MUX_SHUTDOWN_GRACE_MS")
                .unwrap_or(defaults.shutdown_grace_period),
            log_buffer_capacity: env_usize("MUX_LOG_BUFFER_CAPACITY")
                .unwrap_or(defaults.log_buffer_capacity),
            tick_interval: env_millis("MUX_TICK_INTERVAL_MS").unwrap_or(defaults.tick_interval),
        }
    }

    /// Ensure the socket's parent directory exists and remove a stale socket
    /// file left behind by a previous, now-dead host.
    pub fn prepare_socket_dir(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_usize(key).map(|ms| Duration::from_millis(ms as u64))
}

/// `$XDG_RUNTIME_DIR/mux.sock`, falling back to `~/.mux/mux.sock`, then
/// `./.mux/mux.sock` if neither can be determined.
fn default_socket_path() -> PathBuf {
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("mux.sock");
    }
    let base = dirs::home_dir().unwrap_or_else(|| {
        tracing::warn!("could not determine home directory, using current directory");
        PathBuf::from(".")
    });
    base.join(".mux").join("mux.sock")
}
