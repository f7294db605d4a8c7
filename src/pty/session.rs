//! One spawned PTY: its process handle, its emulator, and the bookkeeping
//! the host needs to batch notifications and report exit/idle metadata.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;

use crate::cell::{DirtyUpdate, Row, ScrollState, TerminalState};
use crate::ids::PtyId;

use super::handle::{ExitInfo, PtyHandle};
use crate::vt::{Emulator, QueryResponder};

/// A single PTY-backed pane.
pub struct PtySession {
    pub id: PtyId,
    pub cwd: PathBuf,
    handle: PtyHandle,
    emulator: Emulator,
    query_responder: QueryResponder,
    cols: u16,
    rows: u16,
    created_at: Instant,
    last_activity: Instant,
    pending_notify: Arc<AtomicBool>,
    pending_titles: Arc<Mutex<VecDeque<String>>>,
    current_title: Arc<Mutex<Option<String>>>,
    exited: bool,
}

impl PtySession {
    pub fn spawn(
        id: PtyId,
        cmd: &str,
        args: &[&str],
        cwd: PathBuf,
        env: std::collections::HashMap<String, String>,
        cols: u16,
        rows: u16,
        hot_scrollback_limit: usize,
        line_cache_capacity: usize,
    ) -> Result<Self> {
        let handle = PtyHandle::spawn(cmd, args, &cwd, env, rows, cols)?;
        let mut emulator = Emulator::new(cols, rows, hot_scrollback_limit, line_cache_capacity);

        let pending_notify = Arc::new(AtomicBool::new(false));
        let flag_for_update = Arc::clone(&pending_notify);
        emulator.on_update(Box::new(move |_| {
            flag_for_update.store(true, Ordering::SeqCst);
        }));
        let flag_for_mode = Arc::clone(&pending_notify);
        emulator.on_mode_change(Box::new(move |_| {
            flag_for_mode.store(true, Ordering::SeqCst);
        }));

        let pending_titles = Arc::new(Mutex::new(VecDeque::new()));
        let titles_for_callback = Arc::clone(&pending_titles);
        let current_title = Arc::new(Mutex::new(None));
        let current_title_for_callback = Arc::clone(&current_title);
        emulator.on_title_change(Box::new(move |title| {
            titles_for_callback.lock().unwrap().push_back(title.to_string());
            *current_title_for_callback.lock().unwrap() = Some(title.to_string());
        }));

        let now = Instant::now();
        Ok(Self {
            id,
            cwd,
            handle,
            emulator,
            query_responder: QueryResponder::new(),
            cols,
            rows,
            created_at: now,
            last_activity: now,
            pending_notify,
            pending_titles,
            current_title,
            exited: false,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.handle.write(data)?;
        self.last_activity = Instant::now();
        Ok(())
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.handle.resize(rows, cols)?;
        self.emulator.resize(cols, rows);
        self.cols = cols;
        self.rows = rows;
        Ok(())
    }

    /// Drains all currently-buffered PTY output into the emulator, first
    /// routing it through the query responder so guest-issued terminal
    /// queries (DECRQM, kitty keyboard, device attributes) are answered
    /// directly rather than passed through to the emulator. Returns whether
    /// any bytes were read.
    pub fn pump_output(&mut self) -> Result<bool> {
        let mut read_any = false;
        while let Some(data) = self.handle.try_read()? {
            let result = self.query_responder.process(&data, &self.emulator);
            if !result.forward.is_empty() {
                self.emulator.write(&result.forward);
            }
            if !result.reply.is_empty() {
                self.handle.write(&result.reply)?;
            }
            self.last_activity = Instant::now();
            read_any = true;
        }
        Ok(read_any)
    }

    /// Drains any titles extracted since the last call, oldest first.
    pub fn take_pending_titles(&mut self) -> Vec<String> {
        let mut guard = self.pending_titles.lock().unwrap();
        guard.drain(..).collect()
    }

    /// The most recently observed OSC title, if any has been set yet.
    pub fn current_title(&self) -> Option<String> {
        self.current_title.lock().unwrap().clone()
    }

    /// The process group leader currently attached to the PTY's controlling
    /// terminal, i.e. the foreground process — `None` on platforms or states
    /// where this can't be determined.
    pub fn foreground_pid(&self) -> Option<i32> {
        self.handle.foreground_pid()
    }

    /// Best-effort name of the process currently in the foreground.
    pub fn foreground_process_name(&self) -> Option<String> {
        self.handle.foreground_pid().and_then(super::process_info::process_name)
    }

    /// Whether a notification is pending for this tick; clears the flag so
    /// at most one dispatch happens per scheduler tick.
    pub fn take_pending_notify(&mut self) -> bool {
        self.pending_notify.swap(false, Ordering::SeqCst)
    }

    pub fn get_terminal_state(&self) -> TerminalState {
        self.emulator.get_terminal_state()
    }

    pub fn get_dirty_update(&mut self, viewport_offset: usize) -> DirtyUpdate {
        self.emulator.get_dirty_update(viewport_offset)
    }

    pub fn get_scrollback_line(&mut self, offset: usize) -> Option<Row> {
        self.emulator.get_scrollback_line(offset)
    }

    pub fn scroll_state(&self, viewport_offset: usize) -> ScrollState {
        ScrollState::new(viewport_offset, self.emulator.scrollback_length(), self.emulator.scrollback_limit())
    }

    pub fn set_colors(&mut self, default_fg: [u8; 3], default_bg: [u8; 3]) {
        self.emulator.set_colors(default_fg, default_bg);
    }

    pub fn is_alive(&mut self) -> bool {
        !self.exited && self.handle.is_alive()
    }

    /// Checks for a child exit, marking the session exited the first time
    /// one is observed so callers only see it once.
    pub fn poll_exit(&mut self) -> Option<ExitInfo> {
        if self.exited {
            return None;
        }
        let exit = self.handle.exit_status();
        if exit.is_some() {
            self.exited = true;
        }
        exit
    }

    pub fn kill(&mut self) -> Result<()> {
        self.handle.kill()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn is_idle(&self, threshold: std::time::Duration) -> bool {
        self.last_activity.elapsed() >= threshold
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }
}
