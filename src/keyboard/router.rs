//! Routes a key event through, in priority order: the active overlay (if
//! any), search mode, the mux command layer (Vim-style sequences), and
//! finally normal forwarding to the focused PTY.

use crossterm::event::KeyEvent;

use crate::cell::CursorKeyMode;

use super::encoder::encode_key;
use super::vim_matcher::{MatchOutcome, SequenceKey, VimSequenceMatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlay {
    Help,
    PaneList,
    ConfirmKill,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MuxCommand {
    NextPane,
    PrevPane,
    EnterSearch,
    GoToTop,
    GoToBottom,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// Bytes to write to the focused PTY.
    Forward(Vec<u8>),
    /// The key was consumed by an overlay or search input, nothing to send.
    Consumed,
    /// A mux command sequence matched.
    Command(MuxCommand),
}

/// Context the router needs but doesn't itself own.
pub struct RouteContext {
    pub cursor_key_mode: CursorKeyMode,
    pub kitty_keyboard_flags: u8,
}

pub struct KeyboardRouter {
    overlay_stack: Vec<Overlay>,
    search_active: bool,
    vim: VimSequenceMatcher<MuxCommand>,
}

impl Default for KeyboardRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardRouter {
    pub fn new() -> Self {
        Self {
            overlay_stack: Vec::new(),
            search_active: false,
            vim: VimSequenceMatcher::new(vec![
                (vec![SequenceKey::Char('g'), SequenceKey::Char('g')], MuxCommand::GoToTop),
                (vec![SequenceKey::Char('G')], MuxCommand::GoToBottom),
                (vec![SequenceKey::Char('n'), SequenceKey::Char('p')], MuxCommand::NextPane),
                (vec![SequenceKey::Char('p'), SequenceKey::Char('p')], MuxCommand::PrevPane),
                (vec![SequenceKey::Char('/')], MuxCommand::EnterSearch),
            ]),
        }
    }

    pub fn push_overlay(&mut self, overlay: Overlay) {
        self.overlay_stack.push(overlay);
    }

    pub fn pop_overlay(&mut self) -> Option<Overlay> {
        self.overlay_stack.pop()
    }

    pub fn active_overlay(&self) -> Option<Overlay> {
        self.overlay_stack.last().copied()
    }

    pub fn enter_search(&mut self) {
        self.search_active = true;
    }

    pub fn exit_search(&mut self) {
        self.search_active = false;
    }

    pub fn is_searching(&self) -> bool {
        self.search_active
    }

    /// Call periodically (or before routing) so a stale pending mux sequence
    /// gets forwarded instead of swallowed forever.
    pub fn expire_stale_sequence(&mut self, ctx: &RouteContext) -> Option<Vec<u8>> {
        self.vim
            .expire_if_stale()
            .map(|keys| flush_to_bytes(keys, ctx))
    }

    pub fn route(&mut self, key: KeyEvent, ctx: &RouteContext) -> RouteDecision {
        use crossterm::event::KeyCode;

        if !self.overlay_stack.is_empty() {
            if key.code == KeyCode::Esc {
                self.overlay_stack.pop();
            }
            return RouteDecision::Consumed;
        }

        if self.search_active {
            if key.code == KeyCode::Esc {
                self.search_active = false;
            }
            return RouteDecision::Consumed;
        }

        match self.vim.feed(key) {
            MatchOutcome::Pending => RouteDecision::Consumed,
            MatchOutcome::Matched(MuxCommand::EnterSearch) => {
                self.search_active = true;
                RouteDecision::Command(MuxCommand::EnterSearch)
            }
            MatchOutcome::Matched(command) => RouteDecision::Command(command),
            MatchOutcome::Flush(keys) => RouteDecision::Forward(flush_to_bytes(keys, ctx)),
        }
    }
}

fn flush_to_bytes(keys: Vec<KeyEvent>, ctx: &RouteContext) -> Vec<u8> {
    let mut bytes = Vec::new();
    for key in keys {
        bytes.extend(encode_key(key, ctx.cursor_key_mode, ctx.kitty_keyboard_flags));
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyModifiers};

    fn ctx() -> RouteContext {
        RouteContext {
            cursor_key_mode: CursorKeyMode::Normal,
            kitty_keyboard_flags: 0,
        }
    }

    fn key(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
    }

    #[test]
    fn plain_key_forwards_immediately() {
        let mut router = KeyboardRouter::new();
        match router.route(key('x'), &ctx()) {
            RouteDecision::Forward(bytes) => assert_eq!(bytes, b"x".to_vec()),
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn gg_sequence_matches_goto_top() {
        let mut router = KeyboardRouter::new();
        assert_eq!(router.route(key('g'), &ctx()), RouteDecision::Consumed);
        assert_eq!(router.route(key('g'), &ctx()), RouteDecision::Command(MuxCommand::GoToTop));
    }

    #[test]
    fn overlay_swallows_keys_until_escape() {
        let mut router = KeyboardRouter::new();
        router.push_overlay(Overlay::Help);
        assert_eq!(router.route(key('x'), &ctx()), RouteDecision::Consumed);
        assert_eq!(
            router.route(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE), &ctx()),
            RouteDecision::Consumed
        );
        assert!(router.active_overlay().is_none());
    }

    #[test]
    fn slash_enters_search_mode() {
        let mut router = KeyboardRouter::new();
        assert_eq!(router.route(key('/'), &ctx()), RouteDecision::Command(MuxCommand::EnterSearch));
        assert!(router.is_searching());
        assert_eq!(router.route(key('a'), &ctx()), RouteDecision::Consumed);
    }
}
