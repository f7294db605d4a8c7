//! Matches Vim-style multi-key command sequences (e.g. `g` `g`, `d` `d`)
//! against a fixed table, with a timeout so a lone prefix key that the user
//! didn't mean to chain still reaches the guest eventually.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

const SEQUENCE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKey {
    Char(char),
}

impl From<KeyEvent> for SequenceKey {
    fn from(key: KeyEvent) -> Self {
        match key.code {
            KeyCode::Char(c) if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT => {
                SequenceKey::Char(c)
            }
            KeyCode::Char(c) => SequenceKey::Char(c),
            _ => SequenceKey::Char('\0'),
        }
    }
}

/// Outcome of feeding one key into the matcher.
pub enum MatchOutcome<A> {
    /// The key extends a pending sequence; nothing should be forwarded yet.
    Pending,
    /// A full sequence matched; run the bound action.
    Matched(A),
    /// No sequence matches the buffered keys (including the new one); these
    /// keys should now be forwarded to the guest in original order.
    Flush(Vec<KeyEvent>),
}

pub struct VimSequenceMatcher<A: Clone> {
    table: Vec<(Vec<SequenceKey>, A)>,
    buffer: Vec<KeyEvent>,
    last_key_at: Option<Instant>,
}

impl<A: Clone> VimSequenceMatcher<A> {
    pub fn new(table: Vec<(Vec<SequenceKey>, A)>) -> Self {
        Self {
            table,
            buffer: Vec::new(),
            last_key_at: None,
        }
    }

    /// Drops a pending buffer whose last key arrived longer than
    /// [`SEQUENCE_TIMEOUT`] ago, returning the stale keys to forward.
    pub fn expire_if_stale(&mut self) -> Option<Vec<KeyEvent>> {
        if let Some(at) = self.last_key_at {
            if !self.buffer.is_empty() && at.elapsed() > SEQUENCE_TIMEOUT {
                self.last_key_at = None;
                return Some(std::mem::take(&mut self.buffer));
            }
        }
        None
    }

    pub fn feed(&mut self, key: KeyEvent) -> MatchOutcome<A> {
        self.buffer.push(key);
        self.last_key_at = Some(Instant::now());

        let sequence: Vec<SequenceKey> = self.buffer.iter().map(|k| SequenceKey::from(*k)).collect();

        if let Some((_, action)) = self.table.iter().find(|(seq, _)| seq == &sequence) {
            let action = action.clone();
            self.buffer.clear();
            self.last_key_at = None;
            return MatchOutcome::Matched(action);
        }

        if self.table.iter().any(|(seq, _)| seq.starts_with(&sequence[..])) {
            return MatchOutcome::Pending;
        }

        self.last_key_at = None;
        MatchOutcome::Flush(std::mem::take(&mut self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Action {
        GoToTop,
    }

    fn matcher() -> VimSequenceMatcher<Action> {
        VimSequenceMatcher::new(vec![(vec![SequenceKey::Char('g'), SequenceKey::Char('g')], Action::GoToTop)])
    }

    fn key(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
    }

    #[test]
    fn matches_full_sequence() {
        let mut m = matcher();
        assert!(matches!(m.feed(key('g')), MatchOutcome::Pending));
        assert!(matches!(m.feed(key('g')), MatchOutcome::Matched(Action::GoToTop)));
    }

    #[test]
    fn flushes_on_non_matching_second_key() {
        let mut m = matcher();
        assert!(matches!(m.feed(key('g')), MatchOutcome::Pending));
        match m.feed(key('x')) {
            MatchOutcome::Flush(keys) => assert_eq!(keys.len(), 2),
            _ => panic!("expected flush"),
        }
    }

    #[test]
    fn unrelated_key_flushes_immediately() {
        let mut m = matcher();
        match m.feed(key('z')) {
            MatchOutcome::Flush(keys) => assert_eq!(keys.len(), 1),
            _ => panic!("expected flush"),
        }
    }

    #[test]
    fn stale_pending_sequence_expires() {
        let mut m = matcher();
        assert!(matches!(m.feed(key('g')), MatchOutcome::Pending));
        // Simulate time passing by directly rewinding last_key_at.
        m.last_key_at = Some(Instant::now() - Duration::from_millis(600));
        let expired = m.expire_if_stale();
        assert!(expired.is_some());
        assert_eq!(expired.unwrap().len(), 1);
    }
}
