//! Tracks whether the outer terminal the user is actually looking at has
//! focus (reported via DEC private mode 1004 as `ESC[I`/`ESC[O` on the
//! client's stdin) and relays that to whichever PTY is currently focused in
//! the mux, so guest programs relying on focus events (editors, shells with
//! bracketed-paste-style hints) still see them.
//!
//! The two axes — host focus and which pane is focused — are tracked
//! independently and combined into a single `effective` target: a pane only
//! counts as focused when the host window itself has focus too.

use crate::ids::PtyId;

const CANDIDATES: &[&[u8]] = &[b"\x1b[I", b"\x1b[O"];

/// A focus change to relay into a PTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusEvent {
    In(PtyId),
    Out(PtyId),
}

impl FocusEvent {
    /// The bytes to write into the PTY for this event.
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            FocusEvent::In(_) => b"\x1b[I",
            FocusEvent::Out(_) => b"\x1b[O",
        }
    }
}

#[derive(Default)]
pub struct FocusTracker {
    host_focused: Option<bool>,
    focused_pty_id: Option<PtyId>,
    last_dispatched: Option<PtyId>,
    pending: Vec<u8>,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans raw client-stdin bytes for focus reports, updating host focus
    /// state and returning any resulting dispatch events. Non-focus-report
    /// bytes are left for the caller to route elsewhere; this never consumes
    /// them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<FocusEvent> {
        let mut events = Vec::new();
        for &b in bytes {
            if self.pending.is_empty() && b != 0x1b {
                continue;
            }
            self.pending.push(b);

            if let Some(matched) = CANDIDATES.iter().find(|&&c| c == self.pending.as_slice()) {
                let focused = *matched == CANDIDATES[0];
                self.pending.clear();
                events.extend(self.set_host_focused(focused));
                continue;
            }

            if !CANDIDATES.iter().any(|c| c.starts_with(self.pending.as_slice())) {
                self.pending.clear();
            }
        }
        events
    }

    /// Updates which pane is focused (e.g. after a pane switch), returning
    /// any resulting dispatch events.
    pub fn set_focused_pty(&mut self, pty_id: Option<PtyId>) -> Vec<FocusEvent> {
        self.focused_pty_id = pty_id;
        self.recompute()
    }

    fn set_host_focused(&mut self, focused: bool) -> Vec<FocusEvent> {
        self.host_focused = Some(focused);
        self.recompute()
    }

    /// `hostFocused ? focusedPtyId : None`, suppressed entirely until the
    /// host focus state is known at least once.
    pub fn effective(&self) -> Option<PtyId> {
        match self.host_focused {
            Some(true) => self.focused_pty_id,
            Some(false) => None,
            None => None,
        }
    }

    fn recompute(&mut self) -> Vec<FocusEvent> {
        if self.host_focused.is_none() {
            return Vec::new();
        }

        let new_effective = self.effective();
        if new_effective == self.last_dispatched {
            return Vec::new();
        }

        let mut events = Vec::new();
        if let Some(old) = self.last_dispatched {
            events.push(FocusEvent::Out(old));
        }
        if let Some(new) = new_effective {
            events.push(FocusEvent::In(new));
        }
        self.last_dispatched = new_effective;
        events
    }
}
