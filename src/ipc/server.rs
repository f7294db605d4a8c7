//! Unix-domain-socket IPC server.
//!
//! At most one connection is ever "active" — the one whose requests get
//! served and whose subscriptions receive broadcasts. A fresh `hello` always
//! wins: the previous active client is sent `detached`, forcibly revoked,
//! and hard-closed shortly after if it hasn't gone away on its own.

use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cell::pack_dirty_update;
use crate::cell::{CursorKeyMode, Cursor, Modes, ScrollState};
use crate::config::HostConfig;
use crate::error::{classify, MuxError};
use crate::focus_tracker::{FocusEvent, FocusTracker};
use crate::git;
use crate::ids::PtyId;
use crate::keyboard::{KeyboardRouter, MuxCommand, RouteContext, RouteDecision};
use crate::logging::LogBuffer;
use crate::paste_gate::{HostColorScheme, PasteEvent, PasteGate};
use crate::pty::{PtyHost, UnifiedUpdate};
use crate::session_registry::SessionRegistry;

use super::framing::{Frame, FrameHeader, FrameReader};

type OutboundTx = mpsc::UnboundedSender<Vec<u8>>;

/// Grace period between sending `detached` to a displaced client and
/// forcibly tearing down its connection if it hasn't closed itself.
const HANDOFF_HARD_CLOSE: Duration = Duration::from_millis(250);

/// Subscription handles for whichever connection is currently active, torn
/// down on handoff or disconnect.
#[derive(Default)]
struct ActiveSubs {
    unified: HashMap<PtyId, u64>,
    exit: HashMap<PtyId, u64>,
    lifecycle: Option<u64>,
    title: Option<u64>,
}

#[derive(Debug)]
struct ActiveClient {
    id: String,
    tx: OutboundTx,
    abort: AbortHandle,
}

#[derive(Default)]
struct ConnectionRegistry {
    active: Option<ActiveClient>,
    revoked: HashSet<String>,
}

impl ConnectionRegistry {
    /// Promotes `client_id` to active, returning whichever client it
    /// displaced so the caller can notify and eventually close it.
    fn promote(&mut self, client_id: String, tx: OutboundTx, abort: AbortHandle) -> Result<Option<ActiveClient>, MuxError> {
        if self.revoked.contains(&client_id) {
            return Err(MuxError::Revoked);
        }
        let displaced = self.active.take();
        if let Some(old) = &displaced {
            self.revoked.insert(old.id.clone());
        }
        self.active = Some(ActiveClient { id: client_id, tx, abort });
        Ok(displaced)
    }

    fn is_active(&self, client_id: &str) -> bool {
        self.active.as_ref().is_some_and(|c| c.id == client_id)
    }

    /// Clears the active slot, but only if it still belongs to `client_id` —
    /// a disconnect from a connection already displaced by a newer `hello`
    /// must not clobber whoever replaced it.
    fn clear_if_active(&mut self, client_id: &str) {
        if self.is_active(client_id) {
            self.active = None;
        }
    }
}

/// Keyboard-routing state for whichever client is currently active. Reset
/// fresh on every promotion, same as [`ActiveSubs`] — a newly-attached
/// client starts with no pending vim sequence, no open overlay, and no
/// opinion on host/pane focus.
#[derive(Default)]
struct InputState {
    router: KeyboardRouter,
    paste_gate: PasteGate,
    focus: FocusTracker,
}

struct Shared {
    host: AsyncMutex<PtyHost>,
    sessions: StdMutex<SessionRegistry>,
    logs: Arc<LogBuffer>,
    registry: StdMutex<ConnectionRegistry>,
    subs: StdMutex<ActiveSubs>,
    input: StdMutex<InputState>,
    config: HostConfig,
}

pub struct IpcServer {
    shared: Arc<Shared>,
}

impl IpcServer {
    pub fn new(config: HostConfig, host: PtyHost, logs: Arc<LogBuffer>) -> Self {
        Self {
            shared: Arc::new(Shared {
                host: AsyncMutex::new(host),
                sessions: StdMutex::new(SessionRegistry::new()),
                logs,
                registry: StdMutex::new(ConnectionRegistry::default()),
                subs: StdMutex::new(ActiveSubs::default()),
                input: StdMutex::new(InputState::default()),
                config,
            }),
        }
    }

    /// Binds the socket and serves connections until the process is asked to
    /// exit via a `shutdown` request.
    pub async fn run(self) -> Result<()> {
        self.shared.config.prepare_socket_dir()?;
        let std_listener =
            std::os::unix::net::UnixListener::bind(&self.shared.config.socket_path).context("binding ipc socket")?;
        std_listener.set_nonblocking(true)?;
        std::fs::set_permissions(&self.shared.config.socket_path, std::fs::Permissions::from_mode(0o600))?;
        let listener = UnixListener::from_std(std_listener)?;

        info!(path = %self.shared.config.socket_path.display(), "ipc server listening");

        tokio::spawn(tick_loop(Arc::clone(&self.shared)));

        loop {
            let (stream, _addr) = listener.accept().await?;
            let shared = Arc::clone(&self.shared);
            let (abort_tx, abort_rx) = oneshot::channel();
            let join = tokio::spawn(async move {
                let Ok(abort) = abort_rx.await else { return };
                if let Err(e) = handle_connection(shared, stream, abort).await {
                    debug!(error = %e, "connection closed with error");
                }
            });
            let _ = abort_tx.send(join.abort_handle());
        }
    }
}

/// Drives the host's event loop: pumps PTY output, diffs the emulator, and
/// broadcasts unified/exit/lifecycle updates to whichever subscriptions are
/// live, on a fixed cadence for as long as the process runs.
async fn tick_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(shared.config.tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        shared.host.lock().await.tick();
    }
}

async fn handle_connection(shared: Arc<Shared>, stream: UnixStream, own_abort: AbortHandle) -> Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut client_id: Option<String> = None;
    let mut reader = FrameReader::new();
    let mut buf = vec![0u8; 8192];

    let result: Result<()> = 'conn: loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => break 'conn Ok(()),
            Ok(n) => n,
            Err(e) => break 'conn Err(anyhow!(e)),
        };
        reader.push(&buf[..n]);

        loop {
            let frame = match reader.next_frame() {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "malformed frame, closing connection");
                    break 'conn Ok(());
                }
            };

            match dispatch_frame(&shared, &mut client_id, &tx, &own_abort, frame).await {
                Ok(Outcome::Keep) => {}
                Ok(Outcome::Close) => break 'conn Ok(()),
                Err(e) => warn!(error = %e, "error handling frame"),
            }
        }
    };

    if let Some(id) = client_id {
        let was_active = {
            let mut registry = shared.registry.lock().unwrap();
            let was_active = registry.is_active(&id);
            registry.clear_if_active(&id);
            was_active
        };
        if was_active {
            teardown_active_subs(&shared).await;
        }
    }

    drop(tx);
    let _ = writer_task.await;
    result
}

enum Outcome {
    Keep,
    Close,
}

async fn dispatch_frame(
    shared: &Arc<Shared>,
    client_id: &mut Option<String>,
    tx: &OutboundTx,
    own_abort: &AbortHandle,
    frame: Frame,
) -> Result<Outcome> {
    let FrameHeader::Request { request_id, method, params, .. } = frame.header else {
        debug!("ignoring non-request frame from client");
        return Ok(Outcome::Keep);
    };

    if method == "hello" {
        return handle_hello(shared, client_id, tx, own_abort, &request_id, params).await;
    }

    let Some(id) = client_id.clone() else {
        send_response_err(tx, &request_id, "Inactive client")?;
        return Ok(Outcome::Close);
    };
    if !shared.registry.lock().unwrap().is_active(&id) {
        send_response_err(tx, &request_id, "Inactive client")?;
        return Ok(Outcome::Close);
    }

    match handle_request(shared, tx, &method, params, frame.payloads).await {
        Ok(result) => send_response_ok(tx, &request_id, result)?,
        Err(e) => send_response_err(tx, &request_id, &e.wire_message())?,
    }
    Ok(Outcome::Keep)
}

async fn handle_hello(
    shared: &Arc<Shared>,
    client_id: &mut Option<String>,
    tx: &OutboundTx,
    own_abort: &AbortHandle,
    request_id: &str,
    params: Option<Value>,
) -> Result<Outcome> {
    let Some(id) = params.as_ref().and_then(|p| p.get("clientId")).and_then(|v| v.as_str()) else {
        send_response_err(tx, request_id, "protocol error: hello missing clientId")?;
        return Ok(Outcome::Close);
    };
    let id = id.to_string();

    let displaced = {
        let mut registry = shared.registry.lock().unwrap();
        match registry.promote(id.clone(), tx.clone(), own_abort.clone()) {
            Ok(displaced) => displaced,
            Err(_) => {
                send_response_err(tx, request_id, "Client is detached")?;
                return Ok(Outcome::Close);
            }
        }
    };

    if let Some(old) = displaced {
        let _ = send_frame(&old.tx, Frame::header_only(FrameHeader::Detached));
        teardown_active_subs(shared).await;
        tokio::spawn(async move {
            tokio::time::sleep(HANDOFF_HARD_CLOSE).await;
            old.abort.abort();
        });
    }

    *client_id = Some(id);
    send_response_ok(tx, request_id, None)?;

    resubscribe_active(shared, tx).await;
    snapshot_send_all(shared, tx).await;

    Ok(Outcome::Keep)
}

/// Subscribes `tx` to lifecycle, titles, and every currently-live PTY, then
/// sends each PTY a full-state snapshot — the baseline a newly-promoted
/// client needs before incremental updates make sense.
async fn resubscribe_active(shared: &Arc<Shared>, tx: &OutboundTx) {
    *shared.input.lock().unwrap() = InputState::default();

    let ids: Vec<PtyId> = shared.host.lock().await.list_all().into_iter().map(|s| s.id).collect();

    {
        let mut host = shared.host.lock().await;
        let lifecycle_tx = tx.clone();
        let lifecycle_id = host.subscribe_to_lifecycle(Box::new(move |event| {
            let (pty_id, event_name) = match event {
                crate::pty::LifecycleEvent::Created(id) => (*id, "created"),
                crate::pty::LifecycleEvent::Destroyed(id) => (*id, "destroyed"),
            };
            let header = FrameHeader::PtyLifecycle { pty_id, event: event_name.to_string() };
            let _ = send_frame(&lifecycle_tx, Frame::header_only(header));
        }));
        let title_tx = tx.clone();
        let title_id = host.subscribe_to_all_title_changes(Box::new(move |pty_id, title| {
            let header = FrameHeader::PtyTitle { pty_id, title: title.to_string() };
            let _ = send_frame(&title_tx, Frame::header_only(header));
        }));
        let mut subs = shared.subs.lock().unwrap();
        subs.lifecycle = Some(lifecycle_id);
        subs.title = Some(title_id);
    }

    for id in ids {
        let _ = subscribe_pty_to_active(shared, id, tx).await;
    }
}

async fn subscribe_pty_to_active(shared: &Arc<Shared>, pty_id: PtyId, tx: &OutboundTx) -> Result<()> {
    let mut host = shared.host.lock().await;
    let tx_unified = tx.clone();
    let unified_id = host.subscribe_unified(
        pty_id,
        Box::new(move |update| {
            if let Ok(frame) = build_pty_update_frame(pty_id, update) {
                let _ = send_frame(&tx_unified, frame);
            }
        }),
    )?;
    let tx_exit = tx.clone();
    let exit_id = host.on_exit(
        pty_id,
        Box::new(move |exit| {
            let header = FrameHeader::PtyExit { pty_id, exit_code: Some(exit.code), signal: exit.signal };
            let _ = send_frame(&tx_exit, Frame::header_only(header));
        }),
    )?;
    drop(host);

    let mut subs = shared.subs.lock().unwrap();
    subs.unified.insert(pty_id, unified_id);
    subs.exit.insert(pty_id, exit_id);
    Ok(())
}

async fn snapshot_send_all(shared: &Arc<Shared>, tx: &OutboundTx) {
    let ids: Vec<PtyId> = shared.host.lock().await.list_all().into_iter().map(|s| s.id).collect();
    let mut host = shared.host.lock().await;
    for id in ids {
        let Ok(state) = host.get_terminal_state(id) else { continue };
        let Ok(scroll_state) = host.get_scroll_state(id) else { continue };
        let (cursor, cols, rows, modes) = (state.cursor, state.cols, state.rows, state.modes);
        let update = UnifiedUpdate {
            terminal_update: crate::cell::DirtyUpdate {
                dirty_rows: Default::default(),
                cursor,
                scroll_state,
                cols,
                rows,
                is_full: true,
                full_state: Some(state),
                modes,
            },
            scroll_state,
        };
        if let Ok(frame) = build_pty_update_frame(id, &update) {
            let _ = send_frame(tx, frame);
        }
    }
}

async fn teardown_active_subs(shared: &Arc<Shared>) {
    let (unified, exit, lifecycle, title) = {
        let mut subs = shared.subs.lock().unwrap();
        (
            std::mem::take(&mut subs.unified),
            std::mem::take(&mut subs.exit),
            subs.lifecycle.take(),
            subs.title.take(),
        )
    };

    let mut host = shared.host.lock().await;
    for (pty_id, sub_id) in unified {
        host.unsubscribe_unified(pty_id, sub_id);
    }
    for (pty_id, sub_id) in exit {
        host.unsubscribe_exit(pty_id, sub_id);
    }
    if let Some(id) = lifecycle {
        host.unsubscribe_lifecycle(id);
    }
    if let Some(id) = title {
        host.unsubscribe_title(id);
    }
}

async fn handle_request(
    shared: &Arc<Shared>,
    tx: &OutboundTx,
    method: &str,
    params: Option<Value>,
    payloads: Vec<Vec<u8>>,
) -> Result<Option<Value>, MuxError> {
    let params = params.unwrap_or(Value::Null);
    let mut host = shared.host.lock().await;

    match method {
        "setHostColors" => {
            let fg = color_param(&params, "fg")?;
            let bg = color_param(&params, "bg")?;
            host.set_host_colors(fg, bg);
            Ok(None)
        }
        "createPty" => {
            let cols = u16_param(&params, "cols")?;
            let rows = u16_param(&params, "rows")?;
            let cwd = params.get("cwd").and_then(|v| v.as_str()).map(std::path::PathBuf::from);
            let id = host.create(cols, rows, cwd).map_err(|e| classify(&e))?;
            drop(host);
            subscribe_pty_to_active(shared, id, tx).await.map_err(|e| classify(&e))?;
            Ok(Some(json!({ "ptyId": id })))
        }
        "write" => {
            let id = pty_id_param(&params)?;
            let data = payloads.into_iter().next().unwrap_or_default();
            host.write(id, &data).map_err(|e| classify(&e))?;
            Ok(None)
        }
        "sendKey" => {
            let id = pty_id_param(&params)?;
            let key_value = params.get("key").cloned().ok_or_else(|| MuxError::protocol("missing key"))?;
            let key: crossterm::event::KeyEvent =
                serde_json::from_value(key_value).map_err(|e| MuxError::protocol(format!("invalid key: {e}")))?;

            let modes = host.get_terminal_state(id).map_err(|e| classify(&e))?.modes;
            let ctx = RouteContext {
                cursor_key_mode: modes.cursor_key_mode,
                kitty_keyboard_flags: modes.kitty_keyboard_flags,
            };

            let (stale, decision) = {
                let mut input = shared.input.lock().unwrap();
                let stale = input.router.expire_stale_sequence(&ctx);
                let decision = input.router.route(key, &ctx);
                (stale, decision)
            };
            if let Some(bytes) = stale {
                host.write(id, &bytes).map_err(|e| classify(&e))?;
            }

            match decision {
                RouteDecision::Forward(bytes) => {
                    host.write(id, &bytes).map_err(|e| classify(&e))?;
                    Ok(None)
                }
                RouteDecision::Consumed => Ok(None),
                RouteDecision::Command(command) => Ok(Some(json!({ "command": mux_command_name(&command) }))),
            }
        }
        "feedHostInput" => {
            let id = pty_id_param(&params)?;
            let data = payloads.into_iter().next().unwrap_or_default();

            let (clean, paste_events, focus_events) = {
                let mut input = shared.input.lock().unwrap();
                let (clean, paste_events) = input.paste_gate.feed(&data);
                input.focus.set_focused_pty(Some(id));
                let focus_events = input.focus.feed(&clean);
                (clean, paste_events, focus_events)
            };

            if !clean.is_empty() {
                host.write(id, &clean).map_err(|e| classify(&e))?;
            }
            for event in &focus_events {
                let (target, bytes) = match *event {
                    FocusEvent::In(pty) => (pty, event.to_bytes()),
                    FocusEvent::Out(pty) => (pty, event.to_bytes()),
                };
                let _ = host.write(target, bytes);
            }

            let mut paste_requested = false;
            let mut color_scheme = None;
            for event in paste_events {
                match event {
                    PasteEvent::ClipboardRead => paste_requested = true,
                    PasteEvent::ColorScheme(scheme) => {
                        color_scheme = Some(match scheme {
                            HostColorScheme::Light => "light",
                            HostColorScheme::Dark => "dark",
                        });
                    }
                }
            }
            Ok(Some(json!({ "pasteRequested": paste_requested, "colorScheme": color_scheme })))
        }
        "resize" => {
            let id = pty_id_param(&params)?;
            let cols = u16_param(&params, "cols")?;
            let rows = u16_param(&params, "rows")?;
            host.resize(id, cols, rows).map_err(|e| classify(&e))?;
            Ok(None)
        }
        "destroy" => {
            let id = pty_id_param(&params)?;
            host.destroy(id).map_err(|e| classify(&e))?;
            drop(host);
            forget_subs(shared, id);
            shared.sessions.lock().unwrap().forget_pty(id);
            Ok(None)
        }
        "destroyAll" => {
            host.destroy_all();
            drop(host);
            let mut subs = shared.subs.lock().unwrap();
            subs.unified.clear();
            subs.exit.clear();
            Ok(None)
        }
        "shutdown" => {
            let grace = host.shutdown_grace_period();
            host.destroy_all();
            drop(host);
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                std::process::exit(0);
            });
            Ok(None)
        }
        "setPanePosition" => {
            let id = pty_id_param(&params)?;
            let x = u16_param(&params, "x")?;
            let y = u16_param(&params, "y")?;
            host.set_pane_position(id, x, y).map_err(|e| classify(&e))?;
            Ok(None)
        }
        "getCwd" => {
            let id = pty_id_param(&params)?;
            let cwd = host.get_cwd(id).map_err(|e| classify(&e))?;
            Ok(Some(json!({ "cwd": cwd })))
        }
        "getTerminalState" => {
            let id = pty_id_param(&params)?;
            let state = host.get_terminal_state(id).map_err(|e| classify(&e))?;
            Ok(Some(json!({
                "cols": state.cols,
                "rows": state.rows,
                "cursor": cursor_json(&state.cursor),
                "modes": modes_json(&state.modes),
            })))
        }
        "getScrollState" => {
            let id = pty_id_param(&params)?;
            let scroll = host.get_scroll_state(id).map_err(|e| classify(&e))?;
            Ok(Some(scroll_state_json(&scroll)))
        }
        "setScrollOffset" => {
            let id = pty_id_param(&params)?;
            let offset = usize_param(&params, "offset")?;
            host.set_scroll_offset(id, offset).map_err(|e| classify(&e))?;
            Ok(None)
        }
        "setUpdateEnabled" => {
            let id = pty_id_param(&params)?;
            let enabled = params.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true);
            host.set_update_enabled(id, enabled).map_err(|e| classify(&e))?;
            Ok(None)
        }
        "getScrollbackLines" => {
            let id = pty_id_param(&params)?;
            let start = usize_param(&params, "startOffset")?;
            let count = usize_param(&params, "count")?;
            let lines = host.get_scrollback_lines(id, start, count).map_err(|e| classify(&e))?;
            let rows: Vec<Value> = lines
                .into_iter()
                .map(|(offset, row)| json!({ "offset": offset, "text": row_text(&row) }))
                .collect();
            Ok(Some(json!({ "lines": rows })))
        }
        "search" => {
            let id = pty_id_param(&params)?;
            let query = params.get("query").and_then(|v| v.as_str()).ok_or_else(|| MuxError::protocol("missing query"))?;
            let limit = params.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);
            let result = host.search(id, query, limit).map_err(|e| classify(&e))?;
            let matches: Vec<Value> = result
                .matches
                .iter()
                .map(|m| json!({ "offset": m.offset, "startCol": m.start_col, "endCol": m.end_col }))
                .collect();
            Ok(Some(json!({ "matches": matches, "hasMore": result.has_more })))
        }
        "listAll" => {
            let sessions: Vec<Value> = host.list_all().iter().map(session_info_json).collect();
            Ok(Some(json!({ "sessions": sessions })))
        }
        "getSession" => {
            let id = pty_id_param(&params)?;
            let info = host.get_session(id).map_err(|e| classify(&e))?;
            Ok(Some(session_info_json(&info)))
        }
        "getForegroundProcess" => {
            let id = pty_id_param(&params)?;
            let process = host.get_foreground_process(id).map_err(|e| classify(&e))?;
            Ok(Some(match process {
                Some((pid, name)) => json!({ "pid": pid, "name": name }),
                None => Value::Null,
            }))
        }
        "getGitBranch" => {
            let id = pty_id_param(&params)?;
            let branch = host.get_git_branch(id).map_err(|e| classify(&e))?;
            Ok(Some(json!({ "branch": branch })))
        }
        "getTitle" => {
            let id = pty_id_param(&params)?;
            let title = host.get_title(id).map_err(|e| classify(&e))?;
            Ok(Some(json!({ "title": title })))
        }
        "registerPane" => {
            let session_id = params.get("sessionId").and_then(|v| v.as_str()).ok_or_else(|| MuxError::protocol("missing sessionId"))?;
            let pane_id = params.get("paneId").and_then(|v| v.as_str()).ok_or_else(|| MuxError::protocol("missing paneId"))?;
            let pty_id = pty_id_param(&params)?;
            shared.sessions.lock().unwrap().register_pane(session_id, pane_id, pty_id);
            Ok(None)
        }
        "getSessionMapping" => {
            let session_id = params.get("sessionId").and_then(|v| v.as_str()).ok_or_else(|| MuxError::protocol("missing sessionId"))?;
            let mapping = shared
                .sessions
                .lock()
                .unwrap()
                .get_session_mapping(session_id, |id| host.exists(id));
            let entries: Vec<Value> = mapping.entries.iter().map(|e| json!({ "paneId": e.pane_id, "ptyId": e.pty_id })).collect();
            Ok(Some(json!({ "entries": entries, "stalePaneIds": mapping.stale_pane_ids })))
        }
        "getRecentLogs" => {
            let limit = params.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);
            let mut entries = shared.logs.all_entries();
            if let Some(limit) = limit {
                if entries.len() > limit {
                    entries = entries.split_off(entries.len() - limit);
                }
            }
            let lines: Vec<Value> = entries
                .iter()
                .map(|e| json!({ "timestamp": e.timestamp.to_rfc3339(), "level": e.level.as_str(), "target": e.target, "message": e.message }))
                .collect();
            Ok(Some(json!({ "logs": lines })))
        }
        other => Err(MuxError::protocol(format!("unknown method: {other}"))),
    }
}

fn forget_subs(shared: &Arc<Shared>, pty_id: PtyId) {
    let mut subs = shared.subs.lock().unwrap();
    subs.unified.remove(&pty_id);
    subs.exit.remove(&pty_id);
}

fn build_pty_update_frame(pty_id: PtyId, update: &UnifiedUpdate) -> Result<Frame> {
    let packed_dirty = pack_dirty_update(&update.terminal_update);
    let scroll = &update.scroll_state;
    let cursor = &update.terminal_update.cursor;
    let modes = &update.terminal_update.modes;

    let packed = json!({
        "cursor": cursor_json(cursor),
        "cols": update.terminal_update.cols,
        "rows": update.terminal_update.rows,
        "scrollbackLength": scroll.scrollback_length,
        "isFull": update.terminal_update.is_full,
        "modes": modes_json(modes),
    });

    let header = FrameHeader::PtyUpdate { pty_id, packed, scroll_state: scroll_state_json(scroll), payload_lengths: Vec::new() };
    Ok(Frame::new(header, vec![packed_dirty.row_indices, packed_dirty.row_data, packed_dirty.full_state_data]))
}

fn cursor_json(cursor: &Cursor) -> Value {
    json!({ "x": cursor.x, "y": cursor.y, "visible": cursor.visible })
}

fn modes_json(modes: &Modes) -> Value {
    json!({
        "alternateScreen": modes.alternate_screen,
        "cursorKeyMode": matches!(modes.cursor_key_mode, CursorKeyMode::Application),
        "inBandResize": modes.in_band_resize,
    })
}

fn scroll_state_json(scroll: &ScrollState) -> Value {
    json!({
        "viewportOffset": scroll.viewport_offset,
        "scrollbackLength": scroll.scrollback_length,
        "isAtBottom": scroll.is_at_bottom,
        "isAtScrollbackLimit": scroll.is_at_scrollback_limit,
    })
}

fn session_info_json(info: &crate::pty::SessionInfo) -> Value {
    json!({
        "ptyId": info.id,
        "cwd": info.cwd,
        "cols": info.cols,
        "rows": info.rows,
        "title": info.title,
        "idleForMs": info.idle_for.as_millis() as u64,
    })
}

fn row_text(row: &[crate::cell::Cell]) -> String {
    row.iter().map(|c| char::from_u32(c.codepoint).unwrap_or(' ')).collect()
}

/// A mux-layout command a client sent via `sendKey` matched — layout and
/// pane focus are the attached client's responsibility, so the host's job
/// ends at naming which command fired.
fn mux_command_name(command: &MuxCommand) -> &'static str {
    match command {
        MuxCommand::NextPane => "nextPane",
        MuxCommand::PrevPane => "prevPane",
        MuxCommand::EnterSearch => "enterSearch",
        MuxCommand::GoToTop => "goToTop",
        MuxCommand::GoToBottom => "goToBottom",
    }
}

fn pty_id_param(params: &Value) -> Result<PtyId, MuxError> {
    params
        .get("ptyId")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| MuxError::protocol("missing or invalid ptyId"))
}

fn u16_param(params: &Value, key: &str) -> Result<u16, MuxError> {
    params.get(key).and_then(|v| v.as_u64()).map(|n| n as u16).ok_or_else(|| MuxError::protocol(format!("missing {key}")))
}

fn usize_param(params: &Value, key: &str) -> Result<usize, MuxError> {
    params.get(key).and_then(|v| v.as_u64()).map(|n| n as usize).ok_or_else(|| MuxError::protocol(format!("missing {key}")))
}

fn color_param(params: &Value, key: &str) -> Result<[u8; 3], MuxError> {
    let arr = params.get(key).and_then(|v| v.as_array()).ok_or_else(|| MuxError::protocol(format!("missing {key}")))?;
    if arr.len() != 3 {
        return Err(MuxError::protocol(format!("{key} must have 3 components")));
    }
    let mut out = [0u8; 3];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = arr[i].as_u64().ok_or_else(|| MuxError::protocol(format!("{key}[{i}] must be a number")))? as u8;
    }
    Ok(out)
}

fn send_frame(tx: &OutboundTx, frame: Frame) -> Result<()> {
    let bytes = frame.encode()?;
    tx.send(bytes).map_err(|_| anyhow!("connection closed"))?;
    Ok(())
}

fn send_response_ok(tx: &OutboundTx, request_id: &str, result: Option<Value>) -> Result<()> {
    send_frame(tx, Frame::header_only(FrameHeader::response_ok(request_id, result)))
}

fn send_response_err(tx: &OutboundTx, request_id: &str, error: &str) -> Result<()> {
    send_frame(tx, Frame::header_only(FrameHeader::response_err(request_id, error)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn test_config(socket_path: PathBuf) -> HostConfig {
        let mut config = HostConfig::default();
        config.socket_path = socket_path;
        config.hot_scrollback_limit = 200;
        config.line_cache_capacity = 50;
        config.shutdown_grace_period = Duration::from_millis(5);
        config
    }

    fn spawn_server(dir: &tempfile::TempDir) -> PathBuf {
        let socket_path = dir.path().join("mux.sock");
        let config = test_config(socket_path.clone());
        let host = PtyHost::new(config.clone());
        let logs = Arc::new(LogBuffer::new(100));
        let server = IpcServer::new(config, host, logs);
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        socket_path
    }

    async fn connect(socket_path: &std::path::Path) -> UnixStream {
        for _ in 0..50 {
            if let Ok(stream) = UnixStream::connect(socket_path).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("could not connect to test server");
    }

    async fn send(stream: &mut UnixStream, header: FrameHeader) {
        let bytes = Frame::header_only(header).encode().unwrap();
        stream.write_all(&bytes).await.unwrap();
    }

    async fn recv_header(stream: &mut UnixStream) -> FrameHeader {
        let mut reader = FrameReader::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            reader.push(&buf[..n]);
            if let Some(frame) = reader.next_frame().unwrap() {
                return frame.header;
            }
        }
    }

    /// Reads headers until the `Response` for `request_id`, skipping any
    /// broadcast frames (`ptyUpdate`, `ptyLifecycle`, `ptyTitle`) the tick
    /// loop may have interleaved in the meantime.
    async fn recv_response(stream: &mut UnixStream, request_id: &str) -> FrameHeader {
        loop {
            let header = recv_header(stream).await;
            if let FrameHeader::Response { request_id: ref r, .. } = header {
                if r == request_id {
                    return header;
                }
            }
        }
    }

    #[tokio::test]
    async fn hello_then_request_round_trips() {
        let dir = tempdir().unwrap();
        let socket_path = spawn_server(&dir);
        let mut stream = connect(&socket_path).await;

        send(&mut stream, FrameHeader::request("r1", "hello", Some(json!({"clientId": "A"})))).await;
        let header = recv_header(&mut stream).await;
        assert!(matches!(header, FrameHeader::Response { ok: true, .. }));

        send(&mut stream, FrameHeader::request("r2", "createPty", Some(json!({"cols": 80, "rows": 24})))).await;
        let header = recv_header(&mut stream).await;
        match header {
            FrameHeader::Response { ok, result, .. } => {
                assert!(ok);
                assert!(result.unwrap().get("ptyId").is_some());
            }
            other => panic!("unexpected header: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_hello_detaches_the_first_client() {
        let dir = tempdir().unwrap();
        let socket_path = spawn_server(&dir);

        let mut a = connect(&socket_path).await;
        send(&mut a, FrameHeader::request("r1", "hello", Some(json!({"clientId": "A"})))).await;
        let _ = recv_header(&mut a).await;

        let mut b = connect(&socket_path).await;
        send(&mut b, FrameHeader::request("r2", "hello", Some(json!({"clientId": "B"})))).await;
        let _ = recv_header(&mut b).await;

        let a_header = recv_header(&mut a).await;
        assert!(matches!(a_header, FrameHeader::Detached));
    }

    #[tokio::test]
    async fn revoked_client_is_refused_on_reconnect() {
        let dir = tempdir().unwrap();
        let socket_path = spawn_server(&dir);

        let mut a = connect(&socket_path).await;
        send(&mut a, FrameHeader::request("r1", "hello", Some(json!({"clientId": "A"})))).await;
        let _ = recv_header(&mut a).await;

        let mut b = connect(&socket_path).await;
        send(&mut b, FrameHeader::request("r2", "hello", Some(json!({"clientId": "B"})))).await;
        let _ = recv_header(&mut b).await;
        let _ = recv_header(&mut a).await; // detached

        let mut a2 = connect(&socket_path).await;
        send(&mut a2, FrameHeader::request("r3", "hello", Some(json!({"clientId": "A"})))).await;
        let header = recv_header(&mut a2).await;
        match header {
            FrameHeader::Response { ok, error, .. } => {
                assert!(!ok);
                assert_eq!(error.as_deref(), Some("Client is detached"));
            }
            other => panic!("unexpected header: {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_from_inactive_client_is_rejected() {
        let dir = tempdir().unwrap();
        let socket_path = spawn_server(&dir);

        let mut stream = connect(&socket_path).await;
        send(&mut stream, FrameHeader::request("r1", "listAll", None)).await;
        let header = recv_header(&mut stream).await;
        match header {
            FrameHeader::Response { ok, error, .. } => {
                assert!(!ok);
                assert_eq!(error.as_deref(), Some("Inactive client"));
            }
            other => panic!("unexpected header: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_registry_promote_tracks_revocation() {
        let mut registry = ConnectionRegistry::default();
        let dummy_abort = || tokio::spawn(async {}).abort_handle();

        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        registry.promote("a".to_string(), tx_a, dummy_abort()).unwrap();
        assert!(registry.is_active("a"));

        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let displaced = registry.promote("b".to_string(), tx_b, dummy_abort()).unwrap();
        assert!(displaced.is_some());
        assert!(registry.is_active("b"));
        assert!(!registry.is_active("a"));

        let (tx_a2, _rx_a2) = mpsc::unbounded_channel();
        let err = registry.promote("a".to_string(), tx_a2, dummy_abort()).unwrap_err();
        assert_eq!(err, MuxError::Revoked);
    }

    #[tokio::test]
    async fn send_key_forwards_plain_char_to_pty() {
        let dir = tempdir().unwrap();
        let socket_path = spawn_server(&dir);
        let mut stream = connect(&socket_path).await;

        send(&mut stream, FrameHeader::request("r1", "hello", Some(json!({"clientId": "A"})))).await;
        recv_response(&mut stream, "r1").await;

        send(&mut stream, FrameHeader::request("r2", "createPty", Some(json!({"cols": 80, "rows": 24})))).await;
        let pty_id = match recv_response(&mut stream, "r2").await {
            FrameHeader::Response { result: Some(r), .. } => r.get("ptyId").unwrap().as_str().unwrap().to_string(),
            other => panic!("unexpected header: {other:?}"),
        };

        let key = json!({"code": {"Char": "x"}, "modifiers": 0, "kind": "Press", "state": 0});
        send(
            &mut stream,
            FrameHeader::request("r3", "sendKey", Some(json!({"ptyId": pty_id, "key": key}))),
        )
        .await;
        match recv_response(&mut stream, "r3").await {
            FrameHeader::Response { ok, .. } => assert!(ok),
            other => panic!("unexpected header: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_key_vim_sequence_reports_mux_command() {
        let dir = tempdir().unwrap();
        let socket_path = spawn_server(&dir);
        let mut stream = connect(&socket_path).await;

        send(&mut stream, FrameHeader::request("r1", "hello", Some(json!({"clientId": "A"})))).await;
        recv_response(&mut stream, "r1").await;

        send(&mut stream, FrameHeader::request("r2", "createPty", Some(json!({"cols": 80, "rows": 24})))).await;
        let pty_id = match recv_response(&mut stream, "r2").await {
            FrameHeader::Response { result: Some(r), .. } => r.get("ptyId").unwrap().as_str().unwrap().to_string(),
            other => panic!("unexpected header: {other:?}"),
        };

        let g_key = json!({"code": {"Char": "g"}, "modifiers": 0, "kind": "Press", "state": 0});
        send(
            &mut stream,
            FrameHeader::request("r3", "sendKey", Some(json!({"ptyId": pty_id, "key": g_key}))),
        )
        .await;
        recv_response(&mut stream, "r3").await;

        send(
            &mut stream,
            FrameHeader::request("r4", "sendKey", Some(json!({"ptyId": pty_id, "key": g_key}))),
        )
        .await;
        match recv_response(&mut stream, "r4").await {
            FrameHeader::Response { ok, result: Some(r), .. } => {
                assert!(ok);
                assert_eq!(r.get("command").and_then(|v| v.as_str()), Some("goToTop"));
            }
            other => panic!("unexpected header: {other:?}"),
        }
    }

    #[tokio::test]
    async fn feed_host_input_strips_paste_markers_and_reports_clipboard_read() {
        let dir = tempdir().unwrap();
        let socket_path = spawn_server(&dir);
        let mut stream = connect(&socket_path).await;

        send(&mut stream, FrameHeader::request("r1", "hello", Some(json!({"clientId": "A"})))).await;
        recv_response(&mut stream, "r1").await;

        send(&mut stream, FrameHeader::request("r2", "createPty", Some(json!({"cols": 80, "rows": 24})))).await;
        let pty_id = match recv_response(&mut stream, "r2").await {
            FrameHeader::Response { result: Some(r), .. } => r.get("ptyId").unwrap().as_str().unwrap().to_string(),
            other => panic!("unexpected header: {other:?}"),
        };

        let header = FrameHeader::request("r3", "feedHostInput", Some(json!({"ptyId": pty_id})));
        let payload = b"before\x1b[200~pasted\x1b[201~after".to_vec();
        let bytes = Frame::new(header, vec![payload]).encode().unwrap();
        stream.write_all(&bytes).await.unwrap();

        match recv_response(&mut stream, "r3").await {
            FrameHeader::Response { ok, result: Some(r), .. } => {
                assert!(ok);
                assert_eq!(r.get("pasteRequested").and_then(|v| v.as_bool()), Some(true));
            }
            other => panic!("unexpected header: {other:?}"),
        }
    }
}
