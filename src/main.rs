use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use muxd::config::HostConfig;
use muxd::ipc::IpcServer;
use muxd::logging::{self, LogBuffer};
use muxd::pty::PtyHost;

/// Parsed command-line invocation. `--shim` marks a host process that was
/// auto-spawned by a client rather than launched directly by a user; it only
/// affects startup logging, not behavior. `--socket-path` overrides the
/// `MUX_SOCKET_PATH` environment variable for that spawn.
struct Args {
    shim_spawned: bool,
    socket_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut shim_spawned = false;
    let mut socket_path = None;
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--shim" => shim_spawned = true,
            "--socket-path" => socket_path = iter.next().map(PathBuf::from),
            _ => {}
        }
    }
    Args { shim_spawned, socket_path }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = parse_args();

    let mut config = HostConfig::from_env();
    if let Some(path) = args.socket_path {
        config.socket_path = path;
    }

    let logs = Arc::new(LogBuffer::new(config.log_buffer_capacity));
    let logs_dir = config
        .socket_path
        .parent()
        .map(|p| p.join("logs"))
        .unwrap_or_else(|| PathBuf::from(".mux/logs"));
    let (log_file, _guard) = logging::init_file_logging(logs_dir, Arc::clone(&logs))?;

    if args.shim_spawned {
        tracing::info!(path = %log_file.path.display(), "host auto-spawned by shim client");
    } else {
        tracing::info!(path = %log_file.path.display(), "host starting");
    }

    let host = PtyHost::new(config.clone());
    let server = IpcServer::new(config, host, logs);
    server.run().await
}
