//! Maps external `(sessionId, paneId)` pairs onto host-assigned `PtyId`s.
//!
//! The host itself doesn't know about sessions or panes — this is bookkeeping
//! the IPC layer keeps on top of it so a reconnecting client can ask "what
//! pane am I supposed to be showing" without re-deriving it from scratch.

use std::collections::HashMap;

use crate::ids::PtyId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneMapping {
    pub pane_id: String,
    pub pty_id: PtyId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionMapping {
    pub entries: Vec<PaneMapping>,
    pub stale_pane_ids: Vec<String>,
}

struct PaneEntry {
    pty_id: PtyId,
    stale_reported: bool,
}

/// Forward index only; reverse lookups (which session/pane points at a given
/// pty) are answered by scanning on `forget_pty`, which is rare compared to
/// `get_session_mapping`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, HashMap<String, PaneEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pane(&mut self, session_id: &str, pane_id: &str, pty_id: PtyId) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(pane_id.to_string(), PaneEntry { pty_id, stale_reported: false });
    }

    /// Entries for panes whose pty is still alive (per `is_alive`), plus any
    /// pane whose pty died since the last call — each stale pane is reported
    /// exactly once, then dropped from future stale lists.
    pub fn get_session_mapping(&mut self, session_id: &str, mut is_alive: impl FnMut(PtyId) -> bool) -> SessionMapping {
        let mut entries = Vec::new();
        let mut stale = Vec::new();

        if let Some(panes) = self.sessions.get_mut(session_id) {
            for (pane_id, entry) in panes.iter_mut() {
                if is_alive(entry.pty_id) {
                    entries.push(PaneMapping { pane_id: pane_id.clone(), pty_id: entry.pty_id });
                } else if !entry.stale_reported {
                    stale.push(pane_id.clone());
                    entry.stale_reported = true;
                }
            }
        }

        entries.sort_by(|a, b| a.pane_id.cmp(&b.pane_id));
        stale.sort();
        SessionMapping { entries, stale_pane_ids: stale }
    }

    /// Removes every pane mapping pointing at `pty_id`, called when the host
    /// destroys it so the reverse index never outlives the pty.
    pub fn forget_pty(&mut self, pty_id: PtyId) {
        for panes in self.sessions.values_mut() {
            panes.retain(|_, entry| entry.pty_id != pty_id);
        }
    }
}
