//! Owns every spawned PTY, dispatching batched notifications, exit, title,
//! and lifecycle events to whatever the IPC layer subscribes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

use crate::cell::{DirtyUpdate, Row, ScrollState};
use crate::config::HostConfig;
use crate::ids::PtyId;
use crate::observer::ObserverList;

use super::handle::ExitInfo;
use super::session::PtySession;

/// Metadata snapshot returned by `getSession`/`listAll` — no effect on
/// emulator behavior, purely informational for a client's status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: PtyId,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub title: Option<String>,
    pub idle_for: Duration,
}

/// `{terminalUpdate, scrollState}` delivered to `subscribe_unified` callbacks.
#[derive(Debug, Clone)]
pub struct UnifiedUpdate {
    pub terminal_update: DirtyUpdate,
    pub scroll_state: ScrollState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Created(PtyId),
    Destroyed(PtyId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub offset: usize,
    pub start_col: u16,
    pub end_col: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
    pub has_more: bool,
}

const DEFAULT_SEARCH_LIMIT: usize = 500;

type UnifiedCallback = Box<dyn FnMut(&UnifiedUpdate) + Send>;
type ExitCallback = Box<dyn FnMut(&ExitInfo) + Send>;
type LifecycleCallback = Box<dyn FnMut(&LifecycleEvent) + Send>;
type TitleCallback = Box<dyn FnMut(PtyId, &str) + Send>;

/// Spawns, owns, and tears down every PTY for the process lifetime.
pub struct PtyHost {
    sessions: HashMap<PtyId, PtySession>,
    order: Vec<PtyId>,
    scroll_offsets: HashMap<PtyId, usize>,
    update_enabled: HashMap<PtyId, bool>,
    config: HostConfig,
    default_colors: Option<([u8; 3], [u8; 3])>,

    unified_subs: HashMap<PtyId, ObserverList<UnifiedCallback>>,
    exit_subs: HashMap<PtyId, ObserverList<ExitCallback>>,
    lifecycle_subs: ObserverList<LifecycleCallback>,
    title_subs: ObserverList<TitleCallback>,
}

impl PtyHost {
    pub fn new(config: HostConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            order: Vec::new(),
            scroll_offsets: HashMap::new(),
            update_enabled: HashMap::new(),
            config,
            default_colors: None,
            unified_subs: HashMap::new(),
            exit_subs: HashMap::new(),
            lifecycle_subs: ObserverList::new(),
            title_subs: ObserverList::new(),
        }
    }

    pub fn create(&mut self, cols: u16, rows: u16, cwd: Option<PathBuf>) -> Result<PtyId> {
        let id = PtyId::new_v4();
        let cwd = cwd.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let shell = default_shell();

        let mut session = PtySession::spawn(
            id,
            &shell,
            &[],
            cwd,
            std::env::vars().collect(),
            cols,
            rows,
            self.config.hot_scrollback_limit,
            self.config.line_cache_capacity,
        )?;

        if let Some((fg, bg)) = self.default_colors {
            session.set_colors(fg, bg);
        }

        self.sessions.insert(id, session);
        self.order.push(id);
        self.scroll_offsets.insert(id, 0);
        self.update_enabled.insert(id, true);

        info!(pty_id = %id, "created pty");
        self.dispatch_lifecycle(&LifecycleEvent::Created(id));
        Ok(id)
    }

    pub fn write(&mut self, pty_id: PtyId, data: &[u8]) -> Result<()> {
        self.session_mut(pty_id)?.write(data)
    }

    pub fn resize(&mut self, pty_id: PtyId, cols: u16, rows: u16) -> Result<()> {
        self.session_mut(pty_id)?.resize(cols, rows)
    }

    /// Pass-through for graphics-related systems; the host itself doesn't
    /// interpret pane geometry beyond remembering it was set.
    pub fn set_pane_position(&mut self, pty_id: PtyId, _x: u16, _y: u16) -> Result<()> {
        self.session(pty_id)?;
        Ok(())
    }

    pub fn get_terminal_state(&self, pty_id: PtyId) -> Result<crate::cell::TerminalState> {
        Ok(self.session(pty_id)?.get_terminal_state())
    }

    pub fn get_scroll_state(&self, pty_id: PtyId) -> Result<ScrollState> {
        let offset = self.viewport_offset(pty_id);
        Ok(self.session(pty_id)?.scroll_state(offset))
    }

    pub fn set_scroll_offset(&mut self, pty_id: PtyId, offset: usize) -> Result<()> {
        self.session(pty_id)?;
        self.scroll_offsets.insert(pty_id, offset);
        Ok(())
    }

    pub fn scroll_to_bottom(&mut self, pty_id: PtyId) -> Result<()> {
        self.set_scroll_offset(pty_id, 0)
    }

    pub fn get_scrollback_lines(&mut self, pty_id: PtyId, start_offset: usize, count: usize) -> Result<Vec<(usize, Row)>> {
        let session = self.session_mut(pty_id)?;
        let mut lines = Vec::with_capacity(count);
        for offset in start_offset..start_offset + count {
            match session.get_scrollback_line(offset) {
                Some(row) => lines.push((offset, row)),
                None => break,
            }
        }
        Ok(lines)
    }

    /// Case-insensitive substring search over scrollback (oldest→newest)
    /// then the live viewport, stopping after `limit` matches.
    pub fn search(&mut self, pty_id: PtyId, query: &str, limit: Option<usize>) -> Result<SearchResult> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let query_lower = query.to_ascii_lowercase();
        let session = self.session_mut(pty_id)?;
        let mut matches = Vec::new();
        let mut has_more = false;

        let mut offset = 0;
        loop {
            let Some(row) = session.get_scrollback_line(offset) else {
                break;
            };
            if find_matches_in_row(&row, &query_lower, offset, &mut matches, limit) {
                has_more = true;
                break;
            }
            offset += 1;
        }

        if !has_more {
            let state = session.get_terminal_state();
            for (row_idx, row) in state.cells.iter().enumerate() {
                if find_matches_in_row(row, &query_lower, offset + row_idx, &mut matches, limit) {
                    has_more = true;
                    break;
                }
            }
        }

        Ok(SearchResult { matches, has_more })
    }

    pub fn subscribe_unified(&mut self, pty_id: PtyId, callback: UnifiedCallback) -> Result<u64> {
        self.session(pty_id)?;
        Ok(self.unified_subs.entry(pty_id).or_default().insert(callback))
    }

    pub fn unsubscribe_unified(&mut self, pty_id: PtyId, sub_id: u64) {
        if let Some(subs) = self.unified_subs.get_mut(&pty_id) {
            subs.remove(sub_id);
        }
    }

    pub fn on_exit(&mut self, pty_id: PtyId, callback: ExitCallback) -> Result<u64> {
        self.session(pty_id)?;
        Ok(self.exit_subs.entry(pty_id).or_default().insert(callback))
    }

    pub fn unsubscribe_exit(&mut self, pty_id: PtyId, sub_id: u64) {
        if let Some(subs) = self.exit_subs.get_mut(&pty_id) {
            subs.remove(sub_id);
        }
    }

    pub fn subscribe_to_lifecycle(&mut self, callback: LifecycleCallback) -> u64 {
        self.lifecycle_subs.insert(callback)
    }

    pub fn unsubscribe_lifecycle(&mut self, sub_id: u64) {
        self.lifecycle_subs.remove(sub_id);
    }

    pub fn subscribe_to_all_title_changes(&mut self, callback: TitleCallback) -> u64 {
        self.title_subs.insert(callback)
    }

    pub fn unsubscribe_title(&mut self, sub_id: u64) {
        self.title_subs.remove(sub_id);
    }

    pub fn set_host_colors(&mut self, default_fg: [u8; 3], default_bg: [u8; 3]) {
        self.default_colors = Some((default_fg, default_bg));
        for session in self.sessions.values_mut() {
            session.set_colors(default_fg, default_bg);
        }
    }

    pub fn get_cwd(&self, pty_id: PtyId) -> Result<PathBuf> {
        Ok(self.session(pty_id)?.cwd.clone())
    }

    pub fn get_title(&self, pty_id: PtyId) -> Result<Option<String>> {
        Ok(self.session(pty_id)?.current_title())
    }

    /// `(pid, processName)` of whatever program currently owns the PTY's
    /// controlling terminal, if the platform exposes it.
    pub fn get_foreground_process(&self, pty_id: PtyId) -> Result<Option<(i32, Option<String>)>> {
        let session = self.session(pty_id)?;
        Ok(session.foreground_pid().map(|pid| (pid, session.foreground_process_name())))
    }

    pub fn get_git_branch(&self, pty_id: PtyId) -> Result<Option<String>> {
        Ok(crate::git::current_branch(&self.session(pty_id)?.cwd))
    }

    /// Suppresses `ptyUpdate` dispatch for this PTY without stopping output
    /// from being pumped into its emulator — used when a client detaches but
    /// wants resize/exit bookkeeping to keep running in the background.
    pub fn set_update_enabled(&mut self, pty_id: PtyId, enabled: bool) -> Result<()> {
        self.session(pty_id)?;
        self.update_enabled.insert(pty_id, enabled);
        Ok(())
    }

    pub fn exists(&self, pty_id: PtyId) -> bool {
        self.sessions.contains_key(&pty_id)
    }

    pub fn get_session(&self, pty_id: PtyId) -> Result<SessionInfo> {
        let session = self.session(pty_id)?;
        Ok(SessionInfo {
            id: pty_id,
            cwd: session.cwd.clone(),
            cols: session.cols(),
            rows: session.rows(),
            title: session.current_title(),
            idle_for: session.last_activity().elapsed(),
        })
    }

    pub fn list_all(&self) -> Vec<SessionInfo> {
        self.order.iter().filter_map(|&id| self.get_session(id).ok()).collect()
    }

    pub fn destroy(&mut self, pty_id: PtyId) -> Result<()> {
        let mut session = self
            .sessions
            .remove(&pty_id)
            .ok_or_else(|| anyhow!(crate::error::MuxError::not_found(pty_id.to_string())))?;
        if session.is_alive() {
            session.kill()?;
        }
        self.order.retain(|&id| id != pty_id);
        self.scroll_offsets.remove(&pty_id);
        self.update_enabled.remove(&pty_id);
        self.unified_subs.remove(&pty_id);
        self.exit_subs.remove(&pty_id);

        debug!(pty_id = %pty_id, "destroyed pty");
        self.dispatch_lifecycle(&LifecycleEvent::Destroyed(pty_id));
        Ok(())
    }

    pub fn destroy_all(&mut self) {
        info!(count = self.sessions.len(), "destroying all ptys");
        let ids: Vec<PtyId> = self.order.clone();
        for id in ids {
            if let Err(e) = self.destroy(id) {
                warn!(pty_id = %id, error = %e, "failed to destroy pty during shutdown");
            }
        }
    }

    pub fn shutdown_grace_period(&self) -> std::time::Duration {
        self.config.shutdown_grace_period
    }

    /// Drives one iteration of the host loop: pumps every PTY's pending
    /// output into its emulator, dispatches at most one unified update per
    /// PTY since the last tick, relays titles, and reports exits exactly
    /// once before tearing the session down.
    pub fn tick(&mut self) {
        let ids: Vec<PtyId> = self.order.clone();
        for id in ids {
            self.tick_session(id);
        }
    }

    fn tick_session(&mut self, id: PtyId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        let _ = session.pump_output();

        let titles = session.take_pending_titles();
        for title in titles {
            self.dispatch_title(id, &title);
        }

        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.take_pending_notify() && *self.update_enabled.get(&id).unwrap_or(&true) {
            let offset = *self.scroll_offsets.get(&id).unwrap_or(&0);
            if let Some(session) = self.sessions.get_mut(&id) {
                let terminal_update = session.get_dirty_update(offset);
                let scroll_state = terminal_update.scroll_state;
                self.dispatch_unified(id, &UnifiedUpdate { terminal_update, scroll_state });
            }
        }

        let exited = self.sessions.get_mut(&id).and_then(|s| s.poll_exit());
        if let Some(exit) = exited {
            self.dispatch_exit(id, &exit);
            let _ = self.destroy(id);
        }
    }

    fn viewport_offset(&self, pty_id: PtyId) -> usize {
        *self.scroll_offsets.get(&pty_id).unwrap_or(&0)
    }

    fn session(&self, pty_id: PtyId) -> Result<&PtySession> {
        self.sessions
            .get(&pty_id)
            .ok_or_else(|| anyhow!(crate::error::MuxError::not_found(pty_id.to_string())))
    }

    fn session_mut(&mut self, pty_id: PtyId) -> Result<&mut PtySession> {
        self.sessions
            .get_mut(&pty_id)
            .ok_or_else(|| anyhow!(crate::error::MuxError::not_found(pty_id.to_string())))
    }

    fn dispatch_unified(&mut self, pty_id: PtyId, update: &UnifiedUpdate) {
        if let Some(subs) = self.unified_subs.get_mut(&pty_id) {
            for id in subs.ids() {
                if let Some(cb) = subs.get_mut(id) {
                    cb(update);
                }
            }
        }
    }

    fn dispatch_exit(&mut self, pty_id: PtyId, exit: &ExitInfo) {
        if let Some(subs) = self.exit_subs.get_mut(&pty_id) {
            for id in subs.ids() {
                if let Some(cb) = subs.get_mut(id) {
                    cb(exit);
                }
            }
        }
    }

    fn dispatch_lifecycle(&mut self, event: &LifecycleEvent) {
        for id in self.lifecycle_subs.ids() {
            if let Some(cb) = self.lifecycle_subs.get_mut(id) {
                cb(event);
            }
        }
    }

    fn dispatch_title(&mut self, pty_id: PtyId, title: &str) {
        for id in self.title_subs.ids() {
            if let Some(cb) = self.title_subs.get_mut(id) {
                cb(pty_id, title);
            }
        }
    }
}

/// Column-indexed substring search over a single row. Operates on chars
/// rather than bytes so `start_col`/`end_col` line up with cell indices even
/// when the row contains multi-byte codepoints.
fn find_matches_in_row(row: &Row, query_lower: &str, offset: usize, matches: &mut Vec<SearchMatch>, limit: usize) -> bool {
    if query_lower.is_empty() {
        return false;
    }
    let chars: Vec<char> = row.iter().map(|c| char::from_u32(c.codepoint).unwrap_or(' ').to_ascii_lowercase()).collect();
    let query: Vec<char> = query_lower.chars().collect();

    if query.len() > chars.len() {
        return false;
    }
    for start_col in 0..=(chars.len() - query.len()) {
        if chars[start_col..start_col + query.len()] == query[..] {
            matches.push(SearchMatch {
                offset,
                start_col: start_col as u16,
                end_col: (start_col + query.len()) as u16,
            });
            if matches.len() >= limit {
                return true;
            }
        }
    }
    false
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
